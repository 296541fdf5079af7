//! Minimal Telegram Bot API client over long polling.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelegramSettings;
use crate::dispatch::ProcessingMode;
use crate::error::{Error, Result};
use crate::oracle::truncate_preview;
use crate::retry::{RetryDecision, RetryError, RetryPolicy};
use crate::session::{Event, MessageId};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub document: Option<Document>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

/// An update reduced to what the session needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incoming {
    pub chat_id: i64,
    pub user_id: i64,
    /// Callback queries must be answered even when they carry no event.
    pub callback_id: Option<String>,
    pub event: Option<Event>,
}

pub fn incoming(update: &Update) -> Option<Incoming> {
    if let Some(query) = &update.callback_query {
        let chat_id = query.message.as_ref().map(|m| m.chat.id).unwrap_or(query.from.id);
        let event = query
            .data
            .as_deref()
            .and_then(ProcessingMode::from_callback_data)
            .map(Event::ModeSelected);
        return Some(Incoming {
            chat_id,
            user_id: query.from.id,
            callback_id: Some(query.id.clone()),
            event,
        });
    }

    let message = update.message.as_ref()?;
    let user_id = message.from.as_ref().map(|u| u.id).unwrap_or(message.chat.id);
    let event = if let Some(document) = &message.document {
        Event::Document {
            message_id: message.message_id,
            file_id: document.file_id.clone(),
            file_name: document
                .file_name
                .clone()
                .unwrap_or_else(|| "document".to_string()),
        }
    } else {
        let text = message.text.clone().unwrap_or_default();
        if is_start_command(&text) {
            Event::Start
        } else {
            Event::Text {
                message_id: message.message_id,
                text,
            }
        }
    };
    Some(Incoming {
        chat_id: message.chat.id,
        user_id,
        callback_id: None,
        event: Some(event),
    })
}

fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or("");
    command == "/start" || command.starts_with("/start@")
}

pub fn mode_keyboard() -> serde_json::Value {
    let rows: Vec<_> = ProcessingMode::ALL
        .iter()
        .map(|mode| {
            json!([{ "text": mode.label(), "callback_data": mode.callback_data() }])
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[derive(Debug)]
enum CallError {
    Transport(reqwest::Error),
    Status(StatusCode, String),
    RateLimited(Duration),
    Api(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Status(status, body) => {
                write!(f, "status {status}: {}", truncate_preview(body, 300))
            }
            Self::RateLimited(delay) => write!(f, "rate limited for {}s", delay.as_secs()),
            Self::Api(description) => f.write_str(description),
        }
    }
}

fn classify_call_error(err: &CallError) -> RetryDecision {
    match err {
        CallError::Transport(_) => RetryDecision::Retry,
        CallError::RateLimited(delay) => RetryDecision::RetryAfter(*delay),
        CallError::Status(status, _) if status.is_server_error() => RetryDecision::Retry,
        CallError::Status(_, _) | CallError::Api(_) => RetryDecision::Stop,
    }
}

fn decode<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> std::result::Result<T, CallError> {
    let parsed: ApiResponse<T> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => return Err(CallError::Status(status, body.to_string())),
        Err(err) => return Err(CallError::Api(format!("parse response: {err}"))),
    };
    if let Some(retry_after) = parsed.parameters.as_ref().and_then(|p| p.retry_after) {
        return Err(CallError::RateLimited(Duration::from_secs(retry_after)));
    }
    if status.is_server_error() {
        return Err(CallError::Status(status, body.to_string()));
    }
    if !parsed.ok {
        return Err(CallError::Api(
            parsed
                .description
                .unwrap_or_else(|| format!("request failed with status {status}")),
        ));
    }
    parsed
        .result
        .ok_or_else(|| CallError::Api("response missing result".to_string()))
}

fn into_error(method: &str, err: RetryError<CallError>) -> Error {
    Error::Telegram(format!("{method}: {err}"))
}

pub struct TelegramClient {
    client: Client,
    api_base: String,
    file_base: String,
    poll_timeout_secs: u64,
    retry: RetryPolicy,
}

impl TelegramClient {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent("research-fields-bot/0.1")
            .build()
            .map_err(|err| Error::Telegram(format!("build http client: {err}")))?;
        let api_url = settings.api_url.trim_end_matches('/');
        Ok(Self {
            client,
            api_base: format!("{api_url}/bot{}", settings.token),
            file_base: format!("{api_url}/file/bot{}", settings.token),
            poll_timeout_secs: settings.poll_timeout_secs,
            retry: settings.retry,
        })
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + 30)
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<T, CallError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .timeout(self.request_timeout())
            .json(body)
            .send()
            .await
            .map_err(CallError::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(CallError::Transport)?;
        decode(status, &text)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let body = &body;
        self.retry
            .run_async(method, move |_| self.call_once(method, body), classify_call_error)
            .await
            .map_err(|err| into_error(method, err))
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        with_mode_keyboard: bool,
    ) -> Result<MessageId> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if with_mode_keyboard {
            body["reply_markup"] = mode_keyboard();
        }
        let message: Message = self.call("sendMessage", body).await?;
        Ok(message.message_id)
    }

    /// Best effort; messages may already be gone.
    pub async fn delete_messages(&self, chat_id: i64, message_ids: &[MessageId]) {
        if message_ids.is_empty() {
            return;
        }
        let body = json!({ "chat_id": chat_id, "message_ids": message_ids });
        if let Err(err) = self.call::<bool>("deleteMessages", body).await {
            tracing::warn!(
                component = "telegram",
                chat_id,
                messages = ?message_ids,
                error = %err,
                "delete messages failed"
            );
        }
    }

    pub async fn answer_callback_query(&self, callback_id: &str) {
        let body = json!({ "callback_query_id": callback_id });
        if let Err(err) = self.call::<bool>("answerCallbackQuery", body).await {
            tracing::warn!(component = "telegram", error = %err, "answer callback failed");
        }
    }

    pub async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()> {
        let info: FileInfo = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = info
            .file_path
            .ok_or_else(|| Error::Telegram("getFile: response missing file_path".to_string()))?;
        let url = format!("{}/{file_path}", self.file_base);

        let bytes = self
            .retry
            .run_async(
                "download",
                |_| {
                    let request = self.client.get(&url).timeout(self.request_timeout());
                    async move {
                        let response = request.send().await.map_err(CallError::Transport)?;
                        let status = response.status();
                        if !status.is_success() {
                            let body = response.text().await.unwrap_or_default();
                            return Err(CallError::Status(status, body));
                        }
                        response.bytes().await.map_err(CallError::Transport)
                    }
                },
                classify_call_error,
            )
            .await
            .map_err(|err| into_error("download", err))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &bytes).await?;
        tracing::info!(
            component = "telegram",
            path = %destination.display(),
            bytes = bytes.len(),
            "document downloaded"
        );
        Ok(())
    }

    pub async fn send_document(&self, chat_id: i64, path: &Path) -> Result<MessageId> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("result.xlsx")
            .to_string();
        let url = format!("{}/sendDocument", self.api_base);

        let message: Message = self
            .retry
            .run_async(
                "sendDocument",
                |_| {
                    let form = Form::new()
                        .text("chat_id", chat_id.to_string())
                        .part("document", Part::bytes(data.clone()).file_name(file_name.clone()));
                    let request = self
                        .client
                        .post(&url)
                        .timeout(self.request_timeout())
                        .multipart(form);
                    async move {
                        let response = request.send().await.map_err(CallError::Transport)?;
                        let status = response.status();
                        let text = response.text().await.map_err(CallError::Transport)?;
                        decode(status, &text)
                    }
                },
                classify_call_error,
            )
            .await
            .map_err(|err| into_error("sendDocument", err))?;
        Ok(message.message_id)
    }
}
