use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AdminClaims;
use crate::error::ApiError;
use crate::intake::IntakeSubmission;
use crate::models::{AdminUser, LoginRequest, NewPatient, ADMIN_ROLE};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessSpeechRequest {
    // A missing id is treated like an unknown one so the client restarts.
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_input: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetSessionRequest {
    pub session_id: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::Validation(err.to_string()).into()),
    )
    .service(
        web::scope("/api")
            .route("/auth/login", web::post().to(login))
            .route("/patients", web::get().to(list_patients))
            .route("/patients", web::post().to(create_patient))
            .route("/patients/{patient_id}", web::delete().to(delete_patient))
            .route("/intake", web::post().to(submit_intake))
            .route("/voice/start-session", web::post().to(start_voice_session))
            .route("/voice/process-speech", web::post().to(process_speech))
            .route("/voice/reset-session", web::post().to(reset_voice_session))
            .route("/health", web::get().to(health)),
    );
}

// Exchanges the shared admin credential for a bearer token
pub async fn login(
    state: web::Data<AppState>,
    credentials: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let LoginRequest { username, password } = credentials.into_inner();
    if !state.admin.matches(&username, &password) {
        tracing::warn!("admin login rejected");
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.tokens.issue(&username, ADMIN_ROLE)?;
    tracing::info!(%username, "admin logged in");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "token": token,
        "user": AdminUser { username, role: ADMIN_ROLE.to_string() },
    })))
}

pub async fn list_patients(
    state: web::Data<AppState>,
    AdminClaims(admin): AdminClaims,
) -> Result<HttpResponse, ApiError> {
    let patients = state.store.list().await?;
    tracing::debug!(admin = %admin.username, count = patients.len(), "listed patients");
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": patients })))
}

pub async fn create_patient(
    state: web::Data<AppState>,
    new_patient_data: web::Json<NewPatient>,
) -> Result<HttpResponse, ApiError> {
    let new_patient = new_patient_data.into_inner().normalized();
    if !new_patient.consent_given {
        return Err(ApiError::Validation("Please provide consent to proceed".to_string()));
    }
    new_patient.validate()?;
    store_patient(&state, new_patient).await
}

// Review screen submit: flat draft plus the consent checkbox
pub async fn submit_intake(
    state: web::Data<AppState>,
    submission: web::Json<IntakeSubmission>,
) -> Result<HttpResponse, ApiError> {
    let IntakeSubmission { draft, consent_given } = submission.into_inner();
    let new_patient = draft.into_new_patient(consent_given)?;
    store_patient(&state, new_patient).await
}

async fn store_patient(state: &AppState, new_patient: NewPatient) -> Result<HttpResponse, ApiError> {
    let patient = state.store.create(new_patient).await?;
    tracing::info!(patient_id = %patient.id, "patient registered");
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": patient })))
}

pub async fn delete_patient(
    state: web::Data<AppState>,
    AdminClaims(admin): AdminClaims,
    patient_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = Uuid::parse_str(&patient_id)
        .map_err(|_| ApiError::Validation(format!("Invalid patient id: {patient_id}")))?;

    if !state.store.delete(id).await? {
        return Err(ApiError::NotFound("Patient"));
    }
    tracing::info!(patient_id = %id, admin = %admin.username, "patient deleted");
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub async fn start_voice_session(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let greeting = state.voice.start().await?;
    Ok(HttpResponse::Ok().json(greeting))
}

pub async fn process_speech(
    state: web::Data<AppState>,
    request: web::Json<ProcessSpeechRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .voice
        .turn(&request.session_id, &request.user_input)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn reset_voice_session(
    state: web::Data<AppState>,
    request: web::Json<ResetSessionRequest>,
) -> HttpResponse {
    state.voice.reset(&request.session_id).await;
    HttpResponse::Ok().json(json!({ "message": "Session reset successfully" }))
}

pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let patients = state.store.count().await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "store": state.store.backend(),
        "patients": patients,
        "active_voice_sessions": state.voice.active_sessions(),
    })))
}
