//! Create/update/delete with shared loading and error state.
//!
//! # Design
//! One `UserOperations` instance drives one write at a time. Each call moves
//! the controller `Idle -> Pending` and always back to `Idle`, whether the
//! request succeeded, failed, or the caller's future was dropped. A call
//! made while another is pending is refused with `OperationError::Busy` and
//! touches neither the loading flag nor the stored error.
//!
//! Failures are turned into user-facing messages by `failure_message`:
//! 409 on create/update is always the duplicate-email message, 404 is the
//! not-found message, and everything else is either the server's plain-text
//! message or the operation's generic fallback.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::UsersApi;
use crate::error::ApiError;
use crate::types::{CreateUser, DeleteUserResponse, UpdateUser, User};

pub const DUPLICATE_EMAIL_MESSAGE: &str = "That email address is already in use";
pub const NOT_FOUND_MESSAGE: &str = "User not found";
pub const CREATE_FAILED_MESSAGE: &str = "Something went wrong";
pub const UPDATE_FAILED_MESSAGE: &str = "Update failed";
pub const DELETE_FAILED_MESSAGE: &str = "Delete failed";
pub const DELETE_PROMPT: &str = "Delete this user?";

/// Interactive yes/no gate shown before a delete.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

#[async_trait]
impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Where to go after a successful create or update.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

pub type SuccessCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ApiError) + Send + Sync>;

#[derive(Clone)]
pub struct OperationsOptions {
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Navigation target after create/update; `None` stays in place.
    pub redirect_to: Option<String>,
    pub navigator: Option<Arc<dyn Navigator>>,
}

impl Default for OperationsOptions {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            redirect_to: Some("/users".to_string()),
            navigator: None,
        }
    }
}

impl fmt::Debug for OperationsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationsOptions")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("redirect_to", &self.redirect_to)
            .field("navigator", &self.navigator.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Idle,
    Pending,
}

#[derive(Debug, Clone, Error)]
pub enum OperationError {
    #[error("another operation is already in progress")]
    Busy,

    #[error("{message}")]
    Failed { message: String, source: ApiError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    fn fallback(self) -> &'static str {
        match self {
            WriteKind::Create => CREATE_FAILED_MESSAGE,
            WriteKind::Update => UPDATE_FAILED_MESSAGE,
            WriteKind::Delete => DELETE_FAILED_MESSAGE,
        }
    }
}

/// Message shown for a failed write.
fn failure_message(kind: WriteKind, error: &ApiError) -> String {
    match (kind, error.status()) {
        (WriteKind::Create | WriteKind::Update, Some(409)) => DUPLICATE_EMAIL_MESSAGE.to_string(),
        (_, Some(404)) => NOT_FOUND_MESSAGE.to_string(),
        _ => match error.body() {
            Value::String(text) if !text.trim().is_empty() => text.clone(),
            _ => kind.fallback().to_string(),
        },
    }
}

#[derive(Debug)]
struct State {
    phase: OperationPhase,
    error: Option<String>,
}

/// Resets the phase to `Idle` when the call finishes or is dropped.
struct PendingGuard<'a> {
    state: &'a Mutex<State>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).phase = OperationPhase::Idle;
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct UserOperations {
    api: UsersApi,
    options: OperationsOptions,
    state: Mutex<State>,
}

impl UserOperations {
    pub fn new(api: UsersApi, options: OperationsOptions) -> Self {
        Self {
            api,
            options,
            state: Mutex::new(State {
                phase: OperationPhase::Idle,
                error: None,
            }),
        }
    }

    pub fn phase(&self) -> OperationPhase {
        lock(&self.state).phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == OperationPhase::Pending
    }

    /// User-facing message of the last failed write.
    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    pub fn clear_error(&self) {
        lock(&self.state).error = None;
    }

    fn begin(&self) -> Result<PendingGuard<'_>, OperationError> {
        let mut state = lock(&self.state);
        if state.phase == OperationPhase::Pending {
            return Err(OperationError::Busy);
        }
        state.phase = OperationPhase::Pending;
        state.error = None;
        Ok(PendingGuard { state: &self.state })
    }

    fn succeed(&self, navigate: bool) {
        lock(&self.state).error = None;
        if let Some(on_success) = &self.options.on_success {
            on_success();
        }
        if !navigate {
            return;
        }
        if let (Some(path), Some(navigator)) = (&self.options.redirect_to, &self.options.navigator) {
            navigator.navigate(path);
        }
    }

    fn fail(&self, kind: WriteKind, error: ApiError) -> OperationError {
        let message = failure_message(kind, &error);
        warn!(?kind, %error, %message, "User operation failed");
        lock(&self.state).error = Some(message.clone());
        if let Some(on_error) = &self.options.on_error {
            on_error(&error);
        }
        OperationError::Failed {
            message,
            source: error,
        }
    }

    pub async fn create_user(&self, input: &CreateUser) -> Result<User, OperationError> {
        let _pending = self.begin()?;
        match self.api.create(input).await {
            Ok(user) => {
                self.succeed(true);
                Ok(user)
            }
            Err(error) => Err(self.fail(WriteKind::Create, error)),
        }
    }

    pub async fn update_user(&self, id: &str, input: &UpdateUser) -> Result<User, OperationError> {
        let _pending = self.begin()?;
        match self.api.update(id, input).await {
            Ok(user) => {
                self.succeed(true);
                Ok(user)
            }
            Err(error) => Err(self.fail(WriteKind::Update, error)),
        }
    }

    /// Ask for confirmation, then delete. Returns `Ok(None)` when declined;
    /// in that case nothing is sent and no state changes.
    pub async fn delete_user(
        &self,
        id: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<DeleteUserResponse>, OperationError> {
        if self.is_loading() {
            return Err(OperationError::Busy);
        }
        if !confirm.confirm(DELETE_PROMPT).await {
            info!(id, "Delete cancelled");
            return Ok(None);
        }
        let _pending = self.begin()?;
        match self.api.remove(id).await {
            Ok(confirmation) => {
                self.succeed(false);
                Ok(Some(confirmation))
            }
            Err(error) => Err(self.fail(WriteKind::Delete, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNavigator {
        visited: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, path: &str) {
            self.visited.lock().unwrap().push(path.to_string());
        }
    }

    struct Counters {
        success: Arc<AtomicUsize>,
        error: Arc<AtomicUsize>,
        navigator: Arc<RecordingNavigator>,
    }

    fn setup() -> (Arc<ScriptedTransport>, UserOperations, Counters) {
        let transport = ScriptedTransport::new();
        let api = UsersApi::new("http://api.test", transport.clone());
        let success = Arc::new(AtomicUsize::new(0));
        let error = Arc::new(AtomicUsize::new(0));
        let navigator = Arc::new(RecordingNavigator::default());
        let options = OperationsOptions {
            on_success: Some({
                let success = Arc::clone(&success);
                Arc::new(move || {
                    success.fetch_add(1, Ordering::SeqCst);
                })
            }),
            on_error: Some({
                let error = Arc::clone(&error);
                Arc::new(move |_: &ApiError| {
                    error.fetch_add(1, Ordering::SeqCst);
                })
            }),
            navigator: Some(navigator.clone()),
            ..Default::default()
        };
        let ops = UserOperations::new(api, options);
        (
            transport,
            ops,
            Counters {
                success,
                error,
                navigator,
            },
        )
    }

    fn input() -> CreateUser {
        CreateUser {
            email: "a@b.io".into(),
            name: "A".into(),
            phone: None,
            image_url: None,
        }
    }

    const USER: &str = r#"{"id":"1","email":"a@b.io","name":"A"}"#;

    #[tokio::test]
    async fn create_success_calls_back_and_navigates() {
        let (transport, ops, counters) = setup();
        transport.push(201, USER);
        let user = ops.create_user(&input()).await.unwrap();
        assert_eq!(user.id, "1");
        assert!(!ops.is_loading());
        assert_eq!(ops.error(), None);
        assert_eq!(counters.success.load(Ordering::SeqCst), 1);
        assert_eq!(*counters.navigator.visited.lock().unwrap(), vec!["/users".to_string()]);
    }

    #[tokio::test]
    async fn create_conflict_shows_duplicate_email_message() {
        let (transport, ops, counters) = setup();
        transport.push(409, "Conflict");
        let err = ops.create_user(&input()).await.unwrap_err();
        assert_eq!(err.to_string(), DUPLICATE_EMAIL_MESSAGE);
        assert_eq!(ops.error().as_deref(), Some(DUPLICATE_EMAIL_MESSAGE));
        assert!(!ops.is_loading());
        assert_eq!(counters.error.load(Ordering::SeqCst), 1);
        assert_eq!(counters.success.load(Ordering::SeqCst), 0);
        assert!(counters.navigator.visited.lock().unwrap().is_empty());
        match err {
            OperationError::Failed { source, .. } => assert_eq!(source.status(), Some(409)),
            OperationError::Busy => panic!("expected a failure"),
        }
    }

    #[tokio::test]
    async fn update_conflict_shows_duplicate_email_message() {
        let (transport, ops, _) = setup();
        transport.push(409, r#"{"message":"email exists"}"#);
        let update = UpdateUser {
            email: Some("taken@b.io".into()),
            ..Default::default()
        };
        ops.update_user("1", &update).await.unwrap_err();
        assert_eq!(ops.error().as_deref(), Some(DUPLICATE_EMAIL_MESSAGE));
    }

    #[tokio::test]
    async fn update_not_found_and_generic_failures_differ() {
        let (transport, ops, _) = setup();
        transport.push(404, "");
        transport.push(500, r#"{"stack":"at line 1"}"#);
        let update = UpdateUser::default();
        ops.update_user("1", &update).await.unwrap_err();
        assert_eq!(ops.error().as_deref(), Some(NOT_FOUND_MESSAGE));
        ops.update_user("1", &update).await.unwrap_err();
        assert_eq!(ops.error().as_deref(), Some(UPDATE_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn plain_text_server_message_is_shown() {
        let (transport, ops, _) = setup();
        transport.push(400, "name too long");
        ops.create_user(&input()).await.unwrap_err();
        assert_eq!(ops.error().as_deref(), Some("name too long"));
    }

    #[tokio::test]
    async fn successful_write_clears_previous_error() {
        let (transport, ops, _) = setup();
        transport.push(500, "");
        transport.push(201, USER);
        ops.create_user(&input()).await.unwrap_err();
        assert!(ops.error().is_some());
        ops.create_user(&input()).await.unwrap();
        assert_eq!(ops.error(), None);
    }

    #[tokio::test]
    async fn declined_delete_sends_nothing() {
        let (transport, ops, counters) = setup();
        let result = ops.delete_user("1", &|_: &str| false).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(transport.request_count(), 0);
        assert!(!ops.is_loading());
        assert_eq!(ops.error(), None);
        assert_eq!(counters.success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirmed_delete_does_not_navigate() {
        let (transport, ops, counters) = setup();
        transport.push(200, r#"{"deleted":true,"id":"1"}"#);
        let confirmation = ops.delete_user("1", &|_: &str| true).await.unwrap().unwrap();
        assert!(confirmation.deleted);
        assert_eq!(counters.success.load(Ordering::SeqCst), 1);
        assert!(counters.navigator.visited.lock().unwrap().is_empty());
        assert_eq!(transport.requests()[0].url, "http://api.test/users/1");
    }

    #[tokio::test]
    async fn delete_conflict_is_not_a_duplicate_email() {
        let (transport, ops, _) = setup();
        transport.push(409, "");
        ops.delete_user("1", &|_: &str| true).await.unwrap_err();
        assert_eq!(ops.error().as_deref(), Some(DELETE_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn overlapping_call_is_refused() {
        let (transport, ops, _) = setup();
        transport.set_delay(Duration::from_millis(20));
        transport.always(201, USER);
        let first_input = input();
        let first = ops.create_user(&first_input);
        let second = async {
            tokio::task::yield_now().await;
            assert!(ops.is_loading());
            ops.create_user(&input()).await
        };
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(second, Err(OperationError::Busy)));
        assert_eq!(transport.request_count(), 1);
        assert!(!ops.is_loading());
    }

    #[tokio::test]
    async fn dropped_call_returns_to_idle() {
        let (transport, ops, _) = setup();
        transport.set_delay(Duration::from_millis(50));
        transport.always(201, USER);
        let _ = tokio::time::timeout(Duration::from_millis(5), ops.create_user(&input())).await;
        assert_eq!(ops.phase(), OperationPhase::Idle);
    }
}
