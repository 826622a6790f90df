use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use jd_core::{Error, Result};

pub const CALLBACK_SUBSCRIBE: &str = "sub:on";
pub const CALLBACK_UNSUBSCRIBE: &str = "sub:off";
pub const CALLBACK_WEEK: &str = "list:week";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Above both the long-poll timeout and the per-send read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(65);

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Self {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

/// Chat transport as the scheduler and command handlers need it: send a
/// formatted message, poll inbound events, acknowledge a button press.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()>;

    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Update>>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

/// Telegram Bot API client. Messages go out as HTML with link previews
/// disabled; an `ok: false` API response surfaces as a transport error.
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

#[derive(Serialize)]
struct GetUpdatesPayload<'a> {
    timeout: u32,
    allowed_updates: [&'a str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
}

#[derive(Serialize)]
struct AnswerCallbackPayload<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl TelegramApi {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{token}"),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &impl Serialize,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("{method}: {status}: {body}")));
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.ok {
            return Err(Error::Transport(format!(
                "{method}: {}",
                envelope.description.unwrap_or_else(|| "unknown API error".to_string())
            )));
        }
        envelope
            .result
            .ok_or_else(|| Error::Transport(format!("{method}: empty result")))
    }
}

#[async_trait]
impl Transport for TelegramApi {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let payload = SendMessagePayload {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: keyboard,
        };
        self.call::<serde_json::Value>("sendMessage", &payload)
            .await?;
        Ok(())
    }

    async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Update>> {
        let payload = GetUpdatesPayload {
            timeout: timeout_secs,
            allowed_updates: ["message", "callback_query"],
            offset,
        };
        self.call("getUpdates", &payload).await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let payload = AnswerCallbackPayload {
            callback_query_id: callback_id,
            text,
        };
        self.call::<serde_json::Value>("answerCallbackQuery", &payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_payload_deserializes() {
        let raw = r#"{
            "update_id": 12,
            "message": {
                "chat": {"id": 77},
                "text": "/start",
                "from": {"username": "alice", "first_name": "Alice"}
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(update.update_id, 12);
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 77);
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn keyboard_serializes_to_inline_markup() {
        let keyboard = InlineKeyboard {
            inline_keyboard: vec![vec![InlineButton::new("Подписаться", CALLBACK_SUBSCRIBE)]],
        };
        let json = serde_json::to_value(&keyboard).unwrap();
        assert_eq!(
            json["inline_keyboard"][0][0]["callback_data"],
            "sub:on"
        );
    }
}
