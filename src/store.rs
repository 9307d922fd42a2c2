use actix_web::web;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{NewPatient, Patient};
use crate::schema::patients;

// Database connection pool type
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str, max_size: u32) -> Result<DbPool, r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder().max_size(max_size).build(manager)
}

/// Persistence for submitted patient records.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// All records, newest first.
    async fn list(&self) -> Result<Vec<Patient>, ApiError>;
    async fn create(&self, patient: NewPatient) -> Result<Patient, ApiError>;
    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, ApiError>;
    async fn count(&self) -> Result<i64, ApiError>;
    fn backend(&self) -> &'static str;
}

pub struct PgPatientStore {
    pool: DbPool,
}

impl PgPatientStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientStore for PgPatientStore {
    async fn list(&self) -> Result<Vec<Patient>, ApiError> {
        let pool = self.pool.clone();
        web::block(move || -> Result<Vec<Patient>, ApiError> {
            let mut conn = pool.get()?;
            patients::table
                .order(patients::created_at.desc())
                .select(Patient::as_select())
                .load(&mut conn)
                .map_err(ApiError::from)
        })
        .await?
    }

    async fn create(&self, patient: NewPatient) -> Result<Patient, ApiError> {
        let pool = self.pool.clone();
        let new_patient = patient.to_patient(Utc::now());
        web::block(move || -> Result<Patient, ApiError> {
            let mut conn = pool.get()?;
            diesel::insert_into(patients::table)
                .values(&new_patient)
                .returning(Patient::as_returning())
                .get_result(&mut conn)
                .map_err(ApiError::from)
        })
        .await?
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ApiError> {
        let pool = self.pool.clone();
        let removed = web::block(move || -> Result<usize, ApiError> {
            let mut conn = pool.get()?;
            diesel::delete(patients::table.filter(patients::id.eq(id)))
                .execute(&mut conn)
                .map_err(ApiError::from)
        })
        .await??;
        Ok(removed > 0)
    }

    async fn count(&self) -> Result<i64, ApiError> {
        let pool = self.pool.clone();
        web::block(move || -> Result<i64, ApiError> {
            let mut conn = pool.get()?;
            patients::table
                .count()
                .get_result(&mut conn)
                .map_err(ApiError::from)
        })
        .await?
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Process-local store, used when no database is configured.
#[derive(Default)]
pub struct MemoryPatientStore {
    patients: RwLock<Vec<Patient>>,
}

impl MemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatientStore for MemoryPatientStore {
    async fn list(&self) -> Result<Vec<Patient>, ApiError> {
        let mut patients = self.patients.read().clone();
        patients.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(patients)
    }

    async fn create(&self, patient: NewPatient) -> Result<Patient, ApiError> {
        let patient = patient.to_patient(Utc::now());
        // Front insertion keeps ties on created_at in newest-first order.
        self.patients.write().insert(0, patient.clone());
        Ok(patient)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ApiError> {
        let mut patients = self.patients.write();
        let before = patients.len();
        patients.retain(|p| p.id != id);
        Ok(patients.len() < before)
    }

    async fn count(&self) -> Result<i64, ApiError> {
        Ok(self.patients.read().len() as i64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
