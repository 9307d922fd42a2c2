//! Proxy to the conversational registration service.
//!
//! The upstream service owns the dialogue itself. This side keeps one
//! [`TurnPhase`] per live session so a session never has two utterances in
//! flight, and turns a completed conversation into an [`IntakeDraft`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::intake::IntakeDraft;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReply {
    Continue { message: String },
    Completed { message: String, form_data: IntakeDraft },
    Expired,
}

#[async_trait]
pub trait ConversationClient: Send + Sync {
    async fn start_session(&self) -> Result<Greeting, ApiError>;
    async fn process_speech(&self, session_id: &str, user_input: &str) -> Result<TurnReply, ApiError>;
    async fn reset_session(&self, session_id: &str) -> Result<(), ApiError>;
}

// Upstream reply body for a processed utterance; error bodies share the shape.
#[derive(Debug, Deserialize)]
struct ProcessSpeechBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    form_data: Option<IntakeDraft>,
    #[serde(default)]
    restart: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpConversationClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpConversationClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ConversationClient for HttpConversationClient {
    async fn start_session(&self) -> Result<Greeting, ApiError> {
        let greeting = self
            .http
            .post(self.url("/api/start-session"))
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?
            .json::<Greeting>()
            .await?;
        Ok(greeting)
    }

    async fn process_speech(&self, session_id: &str, user_input: &str) -> Result<TurnReply, ApiError> {
        let response = self
            .http
            .post(self.url("/api/process-speech"))
            .json(&json!({ "session_id": session_id, "user_input": user_input }))
            .send()
            .await?;
        let status = response.status();
        let body = response.json::<ProcessSpeechBody>().await?;
        interpret_reply(status, body)
    }

    async fn reset_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.http
            .post(self.url("/api/reset-session"))
            .json(&json!({ "session_id": session_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn interpret_reply(status: StatusCode, body: ProcessSpeechBody) -> Result<TurnReply, ApiError> {
    if body.restart {
        return Ok(TurnReply::Expired);
    }
    if !status.is_success() {
        // A failed turn may still carry a fallback prompt for the caller to speak.
        if let Some(message) = body.message.filter(|m| !m.trim().is_empty()) {
            tracing::warn!(%status, error = ?body.error, "conversation service failed, relaying fallback prompt");
            return Ok(TurnReply::Continue { message });
        }
        let detail = body.error.unwrap_or_else(|| status.to_string());
        return Err(ApiError::Upstream(detail));
    }
    let message = body.message.unwrap_or_default();
    match (body.completed, body.form_data) {
        (true, Some(form_data)) => Ok(TurnReply::Completed { message, form_data }),
        _ => Ok(TurnReply::Continue { message }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingSpeech,
    Processing,
}

#[derive(Debug)]
struct SessionEntry {
    phase: TurnPhase,
    last_activity: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TurnOutcome {
    Continue {
        message: String,
        completed: bool,
        session_id: String,
    },
    Completed {
        message: String,
        completed: bool,
        form_data: IntakeDraft,
        missing_fields: Vec<&'static str>,
    },
}

pub struct VoiceGateway {
    client: Arc<dyn ConversationClient>,
    sessions: DashMap<String, SessionEntry>,
    idle_ttl: Duration,
}

impl VoiceGateway {
    pub fn new(client: Arc<dyn ConversationClient>, idle_ttl: Duration) -> Self {
        Self {
            client,
            sessions: DashMap::new(),
            idle_ttl,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn phase(&self, session_id: &str) -> Option<TurnPhase> {
        self.sessions.get(session_id).map(|entry| entry.phase)
    }

    pub async fn start(&self) -> Result<Greeting, ApiError> {
        self.purge_idle();
        let greeting = self.client.start_session().await?;
        self.sessions.insert(
            greeting.session_id.clone(),
            SessionEntry {
                phase: TurnPhase::AwaitingSpeech,
                last_activity: Instant::now(),
            },
        );
        tracing::info!(session = %greeting.session_id, "voice session started");
        Ok(greeting)
    }

    pub async fn turn(&self, session_id: &str, user_input: &str) -> Result<TurnOutcome, ApiError> {
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Err(ApiError::Validation("user_input must not be empty".to_string()));
        }
        self.begin_turn(session_id)?;

        let reply = self.client.process_speech(session_id, user_input).await;
        match reply {
            Ok(TurnReply::Continue { message }) => {
                self.set_phase(session_id, TurnPhase::AwaitingSpeech);
                Ok(TurnOutcome::Continue {
                    message,
                    completed: false,
                    session_id: session_id.to_string(),
                })
            }
            Ok(TurnReply::Completed { message, form_data }) => {
                self.sessions.remove(session_id);
                let missing_fields = form_data.missing_fields();
                tracing::info!(
                    session = %session_id,
                    missing = missing_fields.len(),
                    "voice session completed"
                );
                Ok(TurnOutcome::Completed {
                    message,
                    completed: true,
                    form_data,
                    missing_fields,
                })
            }
            Ok(TurnReply::Expired) => {
                self.sessions.remove(session_id);
                tracing::warn!(session = %session_id, "upstream reported session expired");
                Err(ApiError::SessionExpired)
            }
            Err(err) => {
                self.set_phase(session_id, TurnPhase::AwaitingSpeech);
                Err(err)
            }
        }
    }

    pub async fn reset(&self, session_id: &str) {
        self.sessions.remove(session_id);
        if let Err(err) = self.client.reset_session(session_id).await {
            tracing::warn!(session = %session_id, error = %err, "upstream reset failed");
        }
    }

    // Moves the session to Processing, refusing if a turn is already in flight.
    fn begin_turn(&self, session_id: &str) -> Result<(), ApiError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or(ApiError::SessionExpired)?;
        if entry.phase == TurnPhase::Processing {
            return Err(ApiError::TurnInProgress);
        }
        entry.phase = TurnPhase::Processing;
        entry.last_activity = Instant::now();
        Ok(())
    }

    fn set_phase(&self, session_id: &str, phase: TurnPhase) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.phase = phase;
            entry.last_activity = Instant::now();
        }
    }

    fn purge_idle(&self) {
        let ttl = self.idle_ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.last_activity.elapsed() < ttl);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::debug!(purged, "dropped idle voice sessions");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Scripted upstream: replies are popped in order; `hold` parks process_speech until released.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub replies: Mutex<Vec<Result<TurnReply, ApiError>>>,
        pub resets: Mutex<Vec<String>>,
        pub hold: Option<Arc<Notify>>,
        pub entered: Arc<Notify>,
        pub started: AtomicUsize,
    }

    impl ScriptedClient {
        pub(crate) fn with_replies(replies: Vec<Result<TurnReply, ApiError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ConversationClient for ScriptedClient {
        async fn start_session(&self) -> Result<Greeting, ApiError> {
            let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Greeting {
                session_id: format!("session-{n}"),
                message: "Hello! What's your full name?".to_string(),
            })
        }

        async fn process_speech(&self, _session_id: &str, _user_input: &str) -> Result<TurnReply, ApiError> {
            self.entered.notify_one();
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                return Err(ApiError::Upstream("no scripted reply".to_string()));
            }
            replies.remove(0)
        }

        async fn reset_session(&self, session_id: &str) -> Result<(), ApiError> {
            self.resets.lock().push(session_id.to_string());
            Ok(())
        }
    }

    fn gateway(client: ScriptedClient) -> (VoiceGateway, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let gateway = VoiceGateway::new(client.clone(), Duration::from_secs(60));
        (gateway, client)
    }

    fn finished_draft() -> IntakeDraft {
        IntakeDraft {
            full_name: "Asha Verma".into(),
            age: "34".into(),
            ..IntakeDraft::default()
        }
    }

    #[actix_web::test]
    async fn continue_reply_returns_session_to_awaiting() {
        let (gateway, _) = gateway(ScriptedClient::with_replies(vec![Ok(TurnReply::Continue {
            message: "How old are you?".into(),
        })]));
        let greeting = gateway.start().await.unwrap();
        assert_eq!(gateway.phase(&greeting.session_id), Some(TurnPhase::AwaitingSpeech));

        let outcome = gateway.turn(&greeting.session_id, "Asha Verma").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Continue {
                message: "How old are you?".into(),
                completed: false,
                session_id: "session-1".into(),
            }
        );
        assert_eq!(gateway.phase("session-1"), Some(TurnPhase::AwaitingSpeech));
    }

    #[actix_web::test]
    async fn completed_reply_forgets_session_and_reports_missing_fields() {
        let (gateway, _) = gateway(ScriptedClient::with_replies(vec![Ok(TurnReply::Completed {
            message: "Perfect!".into(),
            form_data: finished_draft(),
        })]));
        gateway.start().await.unwrap();

        let outcome = gateway.turn("session-1", "that's all").await.unwrap();
        match outcome {
            TurnOutcome::Completed { missing_fields, completed, .. } => {
                assert!(completed);
                assert!(missing_fields.contains(&"gender"));
                assert!(!missing_fields.contains(&"fullName"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(gateway.active_sessions(), 0);
    }

    #[actix_web::test]
    async fn unknown_session_is_expired() {
        let (gateway, _) = gateway(ScriptedClient::default());
        let err = gateway.turn("nope", "hello").await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired));
    }

    #[actix_web::test]
    async fn blank_transcript_is_rejected_without_changing_phase() {
        let (gateway, _) = gateway(ScriptedClient::default());
        gateway.start().await.unwrap();
        let err = gateway.turn("session-1", "   ").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(gateway.phase("session-1"), Some(TurnPhase::AwaitingSpeech));
    }

    #[actix_web::test]
    async fn upstream_failure_releases_the_session() {
        let (gateway, _) = gateway(ScriptedClient::with_replies(vec![Err(ApiError::Upstream(
            "boom".into(),
        ))]));
        gateway.start().await.unwrap();
        assert!(gateway.turn("session-1", "hello").await.is_err());
        assert_eq!(gateway.phase("session-1"), Some(TurnPhase::AwaitingSpeech));
    }

    #[actix_web::test]
    async fn upstream_expiry_forgets_session() {
        let (gateway, _) = gateway(ScriptedClient::with_replies(vec![Ok(TurnReply::Expired)]));
        gateway.start().await.unwrap();
        let err = gateway.turn("session-1", "hello").await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired));
        assert_eq!(gateway.phase("session-1"), None);
    }

    #[actix_web::test]
    async fn second_turn_while_processing_conflicts() {
        let hold = Arc::new(Notify::new());
        let client = ScriptedClient {
            hold: Some(hold.clone()),
            ..ScriptedClient::with_replies(vec![Ok(TurnReply::Continue {
                message: "Next?".into(),
            })])
        };
        let (gateway, client) = gateway(client);
        let gateway = Arc::new(gateway);
        gateway.start().await.unwrap();

        let first = {
            let gateway = gateway.clone();
            actix_web::rt::spawn(async move { gateway.turn("session-1", "Asha").await })
        };
        client.entered.notified().await;
        assert_eq!(gateway.phase("session-1"), Some(TurnPhase::Processing));

        let err = gateway.turn("session-1", "again").await.unwrap_err();
        assert!(matches!(err, ApiError::TurnInProgress));

        hold.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(gateway.phase("session-1"), Some(TurnPhase::AwaitingSpeech));
    }

    #[actix_web::test]
    async fn reset_forgets_session_and_notifies_upstream() {
        let (gateway, client) = gateway(ScriptedClient::default());
        gateway.start().await.unwrap();
        gateway.reset("session-1").await;
        assert_eq!(gateway.active_sessions(), 0);
        assert_eq!(client.resets.lock().as_slice(), ["session-1".to_string()]);
    }

    #[actix_web::test]
    async fn idle_sessions_are_purged_on_start() {
        let gateway = VoiceGateway::new(Arc::new(ScriptedClient::default()), Duration::ZERO);
        let first = gateway.start().await.unwrap();
        let second = gateway.start().await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(gateway.phase(&first.session_id), None);
        assert_eq!(gateway.phase(&second.session_id), Some(TurnPhase::AwaitingSpeech));
        assert_eq!(gateway.active_sessions(), 1);
    }

    #[actix_web::test]
    async fn fresh_sessions_survive_the_purge() {
        let gateway = VoiceGateway::new(Arc::new(ScriptedClient::default()), Duration::from_secs(3600));
        let first = gateway.start().await.unwrap();
        let second = gateway.start().await.unwrap();

        assert_eq!(gateway.phase(&first.session_id), Some(TurnPhase::AwaitingSpeech));
        assert_eq!(gateway.phase(&second.session_id), Some(TurnPhase::AwaitingSpeech));
        assert_eq!(gateway.active_sessions(), 2);
    }

    #[test]
    fn restart_flag_means_expired_regardless_of_status() {
        let body = ProcessSpeechBody {
            message: None,
            completed: false,
            form_data: None,
            restart: true,
            error: Some("Invalid session".into()),
        };
        assert_eq!(interpret_reply(StatusCode::BAD_REQUEST, body).unwrap(), TurnReply::Expired);
    }

    #[test]
    fn server_error_without_prompt_becomes_upstream_error() {
        let body = ProcessSpeechBody {
            message: None,
            completed: false,
            form_data: None,
            restart: false,
            error: Some("Failed to process request".into()),
        };
        let err = interpret_reply(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert_eq!(err.to_string(), "Conversation service error: Failed to process request");
    }

    #[test]
    fn server_error_with_fallback_prompt_keeps_talking() {
        let body = ProcessSpeechBody {
            message: Some("I apologize, I'm having trouble. Could you please repeat that?".into()),
            completed: false,
            form_data: None,
            restart: false,
            error: Some("Failed to process request".into()),
        };
        assert_eq!(
            interpret_reply(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap(),
            TurnReply::Continue {
                message: "I apologize, I'm having trouble. Could you please repeat that?".into()
            }
        );
    }

    #[test]
    fn completed_without_form_data_keeps_talking() {
        let body = ProcessSpeechBody {
            message: Some("One more thing".into()),
            completed: true,
            form_data: None,
            restart: false,
            error: None,
        };
        assert_eq!(
            interpret_reply(StatusCode::OK, body).unwrap(),
            TurnReply::Continue { message: "One more thing".into() }
        );
    }
}
