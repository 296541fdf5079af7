use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use dotenvy::dotenv;
use tokio::sync::Mutex;

use research_fields_bot::config::{OracleSettings, PathSettings, ScholarSettings, TelegramSettings};
use research_fields_bot::session::{Action, Event, JobFailure, Session, FAILURE_TEXT};
use research_fields_bot::telegram::{incoming, Incoming, TelegramClient};
use research_fields_bot::{logging, run_job, Error, Job, Services};

const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

struct BotState {
    telegram: TelegramClient,
    services: Arc<Services>,
    files_dir: PathBuf,
    sessions: Mutex<HashMap<i64, Arc<Mutex<Session>>>>,
}

impl BotState {
    async fn session(&self, chat_id: i64, user_id: i64) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(user_id, self.files_dir.clone()))))
            .clone()
    }
}

fn main() -> Result<()> {
    dotenv().ok();
    logging::init();

    let paths = PathSettings::from_env();
    let oracle = OracleSettings::from_env()?;
    let scholar = ScholarSettings::from_env();
    let telegram = TelegramSettings::from_env()?;
    std::fs::create_dir_all(&paths.files_dir)
        .with_context(|| format!("create {}", paths.files_dir.display()))?;

    // The pipeline clients are blocking and must be created and dropped
    // outside the runtime.
    let services = Arc::new(
        Services::from_settings(&paths, &oracle, &scholar).context("initialize services")?,
    );
    let state = Arc::new(BotState {
        telegram: TelegramClient::new(&telegram)?,
        services: services.clone(),
        files_dir: paths.files_dir.clone(),
        sessions: Mutex::new(HashMap::new()),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    tracing::info!(
        component = "bot",
        taxonomy_rows = services.taxonomy.rows().len(),
        files_dir = %paths.files_dir.display(),
        "bot starting"
    );
    runtime.block_on(poll_loop(state));
    drop(runtime);
    drop(services);
    Ok(())
}

async fn poll_loop(state: Arc<BotState>) {
    let mut offset = None;
    loop {
        let updates = match state.telegram.get_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::error!(component = "bot", error = %err, "poll failed");
                tokio::time::sleep(POLL_ERROR_DELAY).await;
                continue;
            }
        };
        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(incoming) = incoming(&update) else {
                continue;
            };
            let state = state.clone();
            tokio::spawn(async move { handle_incoming(state, incoming).await });
        }
    }
}

async fn handle_incoming(state: Arc<BotState>, incoming: Incoming) {
    if let Some(callback_id) = &incoming.callback_id {
        state.telegram.answer_callback_query(callback_id).await;
    }
    let Some(event) = incoming.event else {
        return;
    };
    if event == Event::Start {
        tracing::info!(component = "bot", chat_id = incoming.chat_id, "iteration started");
    }

    let session = state.session(incoming.chat_id, incoming.user_id).await;
    let job = {
        let mut session = session.lock().await;
        let actions = session.handle(event);
        perform(&state, incoming.chat_id, &mut session, actions).await
    };
    if let Some(job) = job {
        spawn_job(state, incoming.chat_id, session, job);
    }
}

/// Executes actions in order and returns the job to start, if any.
async fn perform(
    state: &BotState,
    chat_id: i64,
    session: &mut Session,
    actions: Vec<Action>,
) -> Option<Job> {
    let mut queue: VecDeque<Action> = actions.into();
    let mut job = None;
    while let Some(action) = queue.pop_front() {
        match action {
            Action::SendText {
                text,
                mode_keyboard,
                tracked,
            } => match state.telegram.send_message(chat_id, &text, mode_keyboard).await {
                Ok(message_id) => session.record_sent(tracked, message_id),
                Err(err) => {
                    tracing::error!(component = "bot", chat_id, error = %err, "send message failed")
                }
            },
            Action::DeleteMessages(message_ids) => {
                state.telegram.delete_messages(chat_id, &message_ids).await;
            }
            Action::DownloadDocument {
                file_id,
                destination,
            } => {
                if let Err(err) = state.telegram.download_file(&file_id, &destination).await {
                    tracing::error!(component = "bot", chat_id, error = %err, "document download failed");
                    queue = session.handle(Event::DownloadFailed).into();
                }
            }
            Action::RunJob(next) => job = Some(next),
            Action::SendArtifact(path) => {
                if let Err(err) = state.telegram.send_document(chat_id, &path).await {
                    tracing::error!(
                        component = "bot",
                        chat_id,
                        path = %path.display(),
                        error = %err,
                        "send artifact failed"
                    );
                    if let Err(err) = state.telegram.send_message(chat_id, FAILURE_TEXT, false).await {
                        tracing::error!(component = "bot", chat_id, error = %err, "send message failed");
                    }
                }
            }
        }
    }
    job
}

fn spawn_job(state: Arc<BotState>, chat_id: i64, session: Arc<Mutex<Session>>, job: Job) {
    tokio::spawn(async move {
        tracing::info!(component = "bot", chat_id, mode = job.mode.suffix(), "job started");
        let services = state.services.clone();
        let outcome = tokio::task::spawn_blocking(move || run_job(&services, &job)).await;
        let event = match outcome {
            Ok(Ok(path)) => Event::JobFinished(path),
            Ok(Err(Error::NothingToClassify(reason))) => {
                tracing::warn!(component = "bot", chat_id, reason = %reason, "nothing to classify");
                Event::JobFailed(JobFailure::NothingToClassify)
            }
            Ok(Err(err)) => {
                tracing::error!(component = "bot", chat_id, error = %err, "job failed");
                Event::JobFailed(JobFailure::Other)
            }
            Err(err) => {
                tracing::error!(component = "bot", chat_id, error = %err, "job task panicked");
                Event::JobFailed(JobFailure::Other)
            }
        };

        let mut session = session.lock().await;
        let actions = session.handle(event);
        perform(&state, chat_id, &mut session, actions).await;
        tracing::info!(component = "bot", chat_id, "iteration finished");
    });
}
