use std::path::Path;

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tutor_contracts::conversation::ConversationStore;
use tutor_contracts::events::{EventKind, EventPayload, EventWriter};
use tutor_contracts::transcript::{write_transcript, Transcript};

use crate::config::CompletionSettings;
use crate::media::ImageUpload;
use crate::payload::build_messages;
use crate::provider::{CompletionError, CompletionProvider, CompletionRequest, CompletionResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    AwaitingResponse,
}

/// Result of one submission, after the session is back to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Answered(CompletionResponse),
    Failed(CompletionError),
    DuplicateImage,
    Empty,
}

/// What `begin_text` / `begin_image` did with the input.
#[derive(Debug)]
pub enum Submission {
    Pending(PendingSubmission),
    DuplicateImage,
    Empty,
}

impl Submission {
    pub fn pending(self) -> Option<PendingSubmission> {
        match self {
            Submission::Pending(pending) => Some(pending),
            Submission::DuplicateImage | Submission::Empty => None,
        }
    }
}

/// Ticket for a request that has been recorded but not yet answered.
#[derive(Debug)]
pub struct PendingSubmission {
    request: CompletionRequest,
    kind: &'static str,
}

impl PendingSubmission {
    pub fn request(&self) -> &CompletionRequest {
        &self.request
    }
}

/// One user's conversation plus the in-flight flag that keeps submissions
/// from overlapping.
///
/// Event-log writes never fail a submission; a failed write is kept as a
/// warning for the caller to show (see `take_warnings`).
#[derive(Debug)]
pub struct TutorSession {
    store: ConversationStore,
    state: SubmissionState,
    settings: CompletionSettings,
    events: EventWriter,
    warnings: Vec<String>,
}

impl TutorSession {
    pub fn new(settings: CompletionSettings, events: EventWriter) -> Self {
        Self::resume(ConversationStore::new(), settings, events)
    }

    pub fn resume(
        store: ConversationStore,
        settings: CompletionSettings,
        events: EventWriter,
    ) -> Self {
        let mut session = Self {
            store,
            state: SubmissionState::Idle,
            settings,
            events,
            warnings: Vec::new(),
        };
        session.emit(
            EventKind::SessionStarted,
            json!({
                "model": session.settings.model,
                "max_output_tokens": session.settings.max_output_tokens,
                "resumed_turns": session.store.len(),
            }),
        );
        session
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Drains the event-log failures recorded since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn transcript(&self) -> Transcript {
        Transcript::from_store(
            &self.store,
            self.session_id(),
            Some(self.settings.model.clone()),
        )
    }

    pub fn export_transcript(&mut self, path: &Path) -> Result<()> {
        write_transcript(path, &self.transcript())?;
        self.emit(
            EventKind::TranscriptExported,
            json!({"path": path.display().to_string(), "turns": self.store.len()}),
        );
        Ok(())
    }

    pub fn begin_text(&mut self, text: &str) -> Result<Submission> {
        self.ensure_idle()?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(Submission::Empty);
        }
        self.store.append_user_text(text);
        self.emit(
            EventKind::UserTurn,
            json!({"kind": "text", "chars": text.chars().count()}),
        );
        Ok(Submission::Pending(self.start_request("text")))
    }

    pub fn begin_image(&mut self, upload: &ImageUpload) -> Result<Submission> {
        self.ensure_idle()?;
        let Some(encoded) = upload.encode() else {
            return Ok(Submission::Empty);
        };
        if !self.store.try_accept_image(&encoded.fingerprint) {
            self.emit(
                EventKind::ImageDuplicateSkipped,
                json!({"fingerprint": encoded.fingerprint}),
            );
            return Ok(Submission::DuplicateImage);
        }
        self.store.append_user_image(encoded.data_url(&upload.mime));
        self.emit(
            EventKind::UserTurn,
            json!({
                "kind": "image",
                "mime": upload.mime,
                "bytes": upload.bytes.len(),
                "fingerprint": encoded.fingerprint,
            }),
        );
        Ok(Submission::Pending(self.start_request("image")))
    }

    /// Records the provider's result and returns the session to `Idle`.
    /// A failed request leaves the user turn in place and adds nothing.
    pub fn finish(
        &mut self,
        pending: PendingSubmission,
        result: Result<CompletionResponse, CompletionError>,
    ) -> Result<SubmissionOutcome> {
        if self.state != SubmissionState::AwaitingResponse {
            bail!("no completion request is in flight");
        }
        self.state = SubmissionState::Idle;
        match result {
            Ok(response) => {
                self.store.append_assistant(response.text.clone());
                self.emit(
                    EventKind::CompletionSucceeded,
                    json!({
                        "kind": pending.kind,
                        "model": response.model,
                        "chars": response.text.chars().count(),
                        "input_tokens": response.input_tokens,
                        "output_tokens": response.output_tokens,
                        "turns": self.store.len(),
                    }),
                );
                Ok(SubmissionOutcome::Answered(response))
            }
            Err(err) => {
                self.emit(
                    EventKind::CompletionFailed,
                    json!({
                        "kind": pending.kind,
                        "provider": err.provider,
                        "error_kind": err.kind_str(),
                        "status": err.status,
                        "error": err.message,
                        "turns": self.store.len(),
                    }),
                );
                Ok(SubmissionOutcome::Failed(err))
            }
        }
    }

    pub fn submit_text(
        &mut self,
        provider: &dyn CompletionProvider,
        text: &str,
    ) -> Result<SubmissionOutcome> {
        let submission = self.begin_text(text)?;
        self.dispatch(provider, submission)
    }

    pub fn submit_image(
        &mut self,
        provider: &dyn CompletionProvider,
        upload: &ImageUpload,
    ) -> Result<SubmissionOutcome> {
        let submission = self.begin_image(upload)?;
        self.dispatch(provider, submission)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let dropped = self.store.len();
        self.store.clear();
        self.emit(EventKind::HistoryCleared, json!({"dropped_turns": dropped}));
        Ok(())
    }

    fn dispatch(
        &mut self,
        provider: &dyn CompletionProvider,
        submission: Submission,
    ) -> Result<SubmissionOutcome> {
        match submission {
            Submission::Pending(pending) => {
                let result = provider.complete(pending.request());
                self.finish(pending, result)
            }
            Submission::DuplicateImage => Ok(SubmissionOutcome::DuplicateImage),
            Submission::Empty => Ok(SubmissionOutcome::Empty),
        }
    }

    fn start_request(&mut self, kind: &'static str) -> PendingSubmission {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: build_messages(self.store.history()),
            max_output_tokens: self.settings.max_output_tokens,
        };
        self.state = SubmissionState::AwaitingResponse;
        self.emit(
            EventKind::CompletionRequest,
            json!({
                "kind": kind,
                "model": request.model,
                "messages": request.messages.len(),
                "max_output_tokens": request.max_output_tokens,
            }),
        );
        PendingSubmission { request, kind }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state == SubmissionState::AwaitingResponse {
            bail!("a completion request is already in flight for this session");
        }
        Ok(())
    }

    fn emit(&mut self, kind: EventKind, payload: Value) {
        if let Err(err) = self.events.emit(kind, json_object(payload)) {
            let message = format!("event log write failed ({}): {err:#}", kind.as_str());
            if !self.warnings.contains(&message) {
                self.warnings.push(message);
            }
        }
    }
}

fn json_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_else(Map::new)
}
