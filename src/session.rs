//! Per-chat conversation state.
//!
//! The session never talks to the network itself. Each event yields a list of
//! [`Action`]s for the transport to perform in order; message ids the
//! transport gets back are reported through [`Session::record_sent`] so the
//! next step can delete them.

use std::path::{Path, PathBuf};

use crate::dispatch::{InputSource, Job, ProcessingMode};

pub type MessageId = i64;

pub const GREETING: &str = "Hello! I map researchers and laboratories onto the OECD \
classification of research fields and summarize their competencies.";
pub const START_TEXT: &str = "Two kinds of input are supported: a Semantic Scholar author ID, \
or a spreadsheet describing laboratories with their annotations.";
pub const SOURCE_PROMPT: &str = "Send an author ID (digits only) or upload a spreadsheet.";
pub const INVALID_SOURCE_WARNING: &str = "That is neither an author ID nor a document.";
pub const MODE_PROMPT: &str = "Choose what to produce:";
pub const MODE_HINT: &str = "Please pick one of the buttons above.";
pub const WAITING_TEXT: &str = "Working on it, this can take a few minutes...";
pub const STILL_WORKING: &str = "Still working on your previous request, please wait.";
pub const IDLE_HINT: &str = "Send /start to begin.";
pub const RESTART_HINT: &str = "To run the bot again send /start";
pub const FAILURE_TEXT: &str = "Something went wrong. Send /start to try again.";
pub const NOTHING_TO_CLASSIFY_TEXT: &str = "No text to classify was found for this input. \
Send /start to try another one.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Start,
    Text {
        message_id: MessageId,
        text: String,
    },
    Document {
        message_id: MessageId,
        file_id: String,
        file_name: String,
    },
    ModeSelected(ProcessingMode),
    DownloadFailed,
    JobFinished(PathBuf),
    JobFailed(JobFailure),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobFailure {
    NothingToClassify,
    Other,
}

/// What the transport should do with the id of a message it sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tracked {
    No,
    /// Deleted at the next step of the conversation.
    Cleanup,
    /// Deleted when the running job completes.
    Waiting,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    SendText {
        text: String,
        mode_keyboard: bool,
        tracked: Tracked,
    },
    DeleteMessages(Vec<MessageId>),
    DownloadDocument {
        file_id: String,
        destination: PathBuf,
    },
    RunJob(Job),
    SendArtifact(PathBuf),
}

impl Action {
    fn text(text: impl Into<String>, tracked: Tracked) -> Self {
        Self::SendText {
            text: text.into(),
            mode_keyboard: false,
            tracked,
        }
    }

    fn mode_prompt() -> Self {
        Self::SendText {
            text: MODE_PROMPT.to_string(),
            mode_keyboard: true,
            tracked: Tracked::Cleanup,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingSource,
    AwaitingMode { source: InputSource },
    Processing,
}

#[derive(Debug)]
pub struct Session {
    user_id: i64,
    files_dir: PathBuf,
    state: SessionState,
    cleanup: Vec<MessageId>,
    waiting: Option<MessageId>,
    greeted: bool,
}

impl Session {
    pub fn new(user_id: i64, files_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_id,
            files_dir: files_dir.into(),
            state: SessionState::Idle,
            cleanup: Vec::new(),
            waiting: None,
            greeted: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn record_sent(&mut self, tracked: Tracked, message_id: MessageId) {
        match tracked {
            Tracked::No => {}
            Tracked::Cleanup => self.cleanup.push(message_id),
            Tracked::Waiting => self.waiting = Some(message_id),
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.state == SessionState::Processing {
            return self.while_processing(event);
        }
        match event {
            Event::Start => self.start(),
            Event::Text { message_id, text } => match self.state {
                SessionState::AwaitingSource => self.source_text(message_id, &text),
                _ => self.unexpected_input(),
            },
            Event::Document {
                file_id,
                file_name,
                ..
            } => match self.state {
                SessionState::AwaitingSource => self.source_document(file_id, &file_name),
                _ => self.unexpected_input(),
            },
            Event::ModeSelected(mode) => self.select_mode(mode),
            Event::DownloadFailed => {
                let mut actions = self.take_cleanup();
                actions.push(Action::text(FAILURE_TEXT, Tracked::No));
                self.end_iteration();
                actions
            }
            // Completions only arrive while processing.
            Event::JobFinished(_) | Event::JobFailed(_) => Vec::new(),
        }
    }

    /// Back to `Idle`; the next `/start` greets again.
    fn end_iteration(&mut self) {
        self.state = SessionState::Idle;
        self.greeted = false;
    }

    fn take_cleanup(&mut self) -> Vec<Action> {
        if self.cleanup.is_empty() {
            return Vec::new();
        }
        vec![Action::DeleteMessages(std::mem::take(&mut self.cleanup))]
    }

    fn start(&mut self) -> Vec<Action> {
        let mut actions = self.take_cleanup();
        if !self.greeted {
            actions.push(Action::text(GREETING, Tracked::No));
            self.greeted = true;
        }
        actions.push(Action::text(START_TEXT, Tracked::No));
        actions.push(Action::text(SOURCE_PROMPT, Tracked::Cleanup));
        self.state = SessionState::AwaitingSource;
        actions
    }

    fn source_text(&mut self, message_id: MessageId, text: &str) -> Vec<Action> {
        match parse_identifier(text) {
            Some(author_id) => {
                let mut actions = self.take_cleanup();
                actions.push(Action::mode_prompt());
                self.state = SessionState::AwaitingMode {
                    source: InputSource::Identifier(author_id),
                };
                actions
            }
            None => {
                self.cleanup.push(message_id);
                let mut actions = self.take_cleanup();
                actions.push(Action::text(
                    format!("{INVALID_SOURCE_WARNING}\n\n{SOURCE_PROMPT}"),
                    Tracked::Cleanup,
                ));
                actions
            }
        }
    }

    fn source_document(&mut self, file_id: String, file_name: &str) -> Vec<Action> {
        let destination = upload_path(&self.files_dir, self.user_id, file_name);
        let mut actions = self.take_cleanup();
        actions.push(Action::DownloadDocument {
            file_id,
            destination: destination.clone(),
        });
        actions.push(Action::mode_prompt());
        self.state = SessionState::AwaitingMode {
            source: InputSource::Document(destination),
        };
        actions
    }

    fn unexpected_input(&mut self) -> Vec<Action> {
        match self.state {
            SessionState::AwaitingMode { .. } => vec![Action::text(MODE_HINT, Tracked::Cleanup)],
            _ => vec![Action::text(IDLE_HINT, Tracked::No)],
        }
    }

    fn select_mode(&mut self, mode: ProcessingMode) -> Vec<Action> {
        let source = match std::mem::replace(&mut self.state, SessionState::Processing) {
            SessionState::AwaitingMode { source } => source,
            other => {
                // Stale button press from an earlier prompt.
                self.state = other;
                return Vec::new();
            }
        };
        let mut actions = self.take_cleanup();
        actions.push(Action::text(WAITING_TEXT, Tracked::Waiting));
        actions.push(Action::RunJob(Job {
            user_id: self.user_id,
            source,
            mode,
        }));
        actions
    }

    fn while_processing(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            Event::JobFinished(path) => {
                if let Some(waiting) = self.waiting.take() {
                    actions.push(Action::DeleteMessages(vec![waiting]));
                }
                actions.push(Action::SendArtifact(path));
                actions.push(Action::text(RESTART_HINT, Tracked::Cleanup));
                self.end_iteration();
            }
            Event::JobFailed(failure) => {
                if let Some(waiting) = self.waiting.take() {
                    actions.push(Action::DeleteMessages(vec![waiting]));
                }
                let text = match failure {
                    JobFailure::NothingToClassify => NOTHING_TO_CLASSIFY_TEXT,
                    JobFailure::Other => FAILURE_TEXT,
                };
                actions.push(Action::text(text, Tracked::No));
                self.end_iteration();
            }
            Event::ModeSelected(_) | Event::DownloadFailed => {}
            Event::Start | Event::Text { .. } | Event::Document { .. } => {
                actions.push(Action::text(STILL_WORKING, Tracked::No));
            }
        }
        actions
    }
}

/// A message made only of ASCII digits that fits a `u64`.
pub fn parse_identifier(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Where an uploaded document is stored; any directory part of the
/// client-supplied name is discarded.
pub fn upload_path(files_dir: &Path, user_id: i64, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("document");
    files_dir.join(format!("{user_id}_{name}"))
}
