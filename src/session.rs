//! The current generation and its compiled preview.
//!
//! Submitting a prompt hands out a [`GenerationToken`]. When the request
//! finishes, its result is only accepted if no newer submission has been made
//! in the meantime; otherwise it is dropped and the current preview stays.

use crate::llm_generator::GenerationResult;
use crate::preview_compiler::{compile, PreviewDocument};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenerationToken(u64);

impl GenerationToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct CurrentPreview {
    pub token: GenerationToken,
    pub result: GenerationResult,
    pub document: PreviewDocument,
}

#[derive(Default)]
struct SessionState {
    latest: u64,
    in_flight: bool,
    current: Option<CurrentPreview>,
}

/// Holds at most one current generation result and preview document.
#[derive(Default)]
pub struct PreviewSession {
    state: Mutex<SessionState>,
}

impl PreviewSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a new submission and supersedes any earlier one.
    pub fn begin(&self) -> GenerationToken {
        let mut state = self.lock();
        state.latest += 1;
        state.in_flight = true;
        debug!("Generation {} started", state.latest);
        GenerationToken(state.latest)
    }

    /// Accepts a result for `token`, compiling its preview.
    ///
    /// Returns the new document, or `None` when a newer submission exists.
    pub fn complete(
        &self,
        token: GenerationToken,
        result: GenerationResult,
    ) -> Option<PreviewDocument> {
        let mut state = self.lock();
        if token.0 != state.latest {
            info!(
                "Discarding result of generation {} (latest is {})",
                token.0, state.latest
            );
            return None;
        }

        let document = compile(&result.extracted_source);
        state.in_flight = false;
        state.current = Some(CurrentPreview {
            token,
            result,
            document: document.clone(),
        });
        Some(document)
    }

    /// Marks a failed submission as finished. The current preview is kept.
    pub fn abandon(&self, token: GenerationToken) {
        let mut state = self.lock();
        if token.0 == state.latest {
            state.in_flight = false;
        }
    }

    pub fn is_generating(&self) -> bool {
        self.lock().in_flight
    }

    pub fn current(&self) -> Option<CurrentPreview> {
        self.lock().current.clone()
    }

    pub fn current_source(&self) -> Option<String> {
        self.lock()
            .current
            .as_ref()
            .map(|c| c.result.extracted_source.clone())
    }

    pub fn current_document(&self) -> Option<PreviewDocument> {
        self.lock().current.as_ref().map(|c| c.document.clone())
    }
}

/// A submission that is abandoned when dropped before completing.
///
/// Request handlers can be cancelled at any await point; holding one of
/// these keeps the in-flight flag from outliving the request.
pub struct PendingGeneration {
    session: Arc<PreviewSession>,
    token: GenerationToken,
    finished: bool,
}

impl PendingGeneration {
    pub fn begin(session: Arc<PreviewSession>) -> Self {
        let token = session.begin();
        Self {
            session,
            token,
            finished: false,
        }
    }

    pub fn token(&self) -> GenerationToken {
        self.token
    }

    /// See [`PreviewSession::complete`].
    pub fn complete(mut self, result: GenerationResult) -> Option<PreviewDocument> {
        self.finished = true;
        self.session.complete(self.token, result)
    }
}

impl Drop for PendingGeneration {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Generation {} ended without a result", self.token.0);
            self.session.abandon(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(source: &str) -> GenerationResult {
        GenerationResult {
            extracted_source: source.to_string(),
            raw_response: json!({}),
        }
    }

    #[test]
    fn test_empty_session() {
        let session = PreviewSession::new();
        assert!(session.current().is_none());
        assert!(session.current_source().is_none());
        assert!(!session.is_generating());
    }

    #[test]
    fn test_complete_latest_generation() {
        let session = PreviewSession::new();
        let token = session.begin();
        assert!(session.is_generating());

        let document = session.complete(token, result("function App() {}")).unwrap();
        assert!(!session.is_generating());
        assert_eq!(document, compile("function App() {}"));
        assert_eq!(session.current_source().as_deref(), Some("function App() {}"));
        assert_eq!(session.current_document(), Some(document));
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let session = PreviewSession::new();
        let first = session.begin();
        let second = session.begin();
        assert!(second > first);

        assert!(session.complete(first, result("function Old() {}")).is_none());
        assert!(session.current().is_none());
        assert!(session.is_generating());

        session.complete(second, result("function New() {}")).unwrap();
        assert_eq!(session.current().unwrap().token, second);
    }

    #[test]
    fn test_new_submission_replaces_previous_preview() {
        let session = PreviewSession::new();
        let first = session.begin();
        session.complete(first, result("function A() {}")).unwrap();

        let second = session.begin();
        session.complete(second, result("function B() {}")).unwrap();
        assert_eq!(session.current_source().as_deref(), Some("function B() {}"));
    }

    #[test]
    fn test_abandon_keeps_previous_preview() {
        let session = PreviewSession::new();
        let first = session.begin();
        session.complete(first, result("function A() {}")).unwrap();

        let failed = session.begin();
        session.abandon(failed);
        assert!(!session.is_generating());
        assert_eq!(session.current_source().as_deref(), Some("function A() {}"));
    }

    #[test]
    fn test_dropped_pending_generation_is_abandoned() {
        let session = Arc::new(PreviewSession::new());
        let pending = PendingGeneration::begin(session.clone());
        assert!(session.is_generating());
        drop(pending);
        assert!(!session.is_generating());
    }

    #[test]
    fn test_completed_pending_generation_keeps_result() {
        let session = Arc::new(PreviewSession::new());
        let pending = PendingGeneration::begin(session.clone());
        let token = pending.token();
        assert!(pending.complete(result("function App() {}")).is_some());
        assert!(!session.is_generating());
        assert_eq!(session.current().unwrap().token, token);
    }

    #[test]
    fn test_abandon_of_stale_token_keeps_in_flight_flag() {
        let session = PreviewSession::new();
        let first = session.begin();
        let _second = session.begin();
        session.abandon(first);
        assert!(session.is_generating());
    }
}
