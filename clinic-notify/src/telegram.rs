use serde::Deserialize;
use serde_json::json;
use tracing;

use clinic_core::config::NotifyConfig;
use clinic_core::types::User;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Incoming webhook update. Only the fields the linking flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Delivers nudges through the Telegram Bot API. Configured without a
/// token it degrades to a silent no-op; a send failure is reported as
/// `false`, never as an error.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    bot_token: Option<String>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        if config.bot_token.is_none() {
            tracing::warn!("Telegram delivery disabled (no BOT_TOKEN)");
        }
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some()
    }

    fn api_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, token, method)
    }

    /// Attempts delivery to the user's linked chat. Returns whether a
    /// delivery was attempted and acknowledged; an unlinked user is a
    /// silent no-op.
    pub async fn send(&self, user: &User, text: &str) -> bool {
        let Some(chat_id) = user.notify_channel_id.clone() else {
            tracing::debug!("User {} has no linked chat, skipping delivery", user.user_name);
            return false;
        };
        self.send_chat(&chat_id, text).await
    }

    /// Raw delivery to a chat id; used for webhook replies before a user
    /// is linked.
    pub async fn send_chat(&self, chat_id: &str, text: &str) -> bool {
        let Some(token) = self.bot_token.clone() else {
            return false;
        };
        match self.post_send_message(&token, chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Telegram send to chat {} failed: {}", chat_id, e);
                false
            }
        }
    }

    async fn post_send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        let response = self
            .client
            .post(self.api_url(token, "sendMessage"))
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;
        let result: TelegramApiResponse = response.json().await?;
        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Points the bot's webhook at this deployment. Called once at boot
    /// when PUBLIC_BASE_URL is configured.
    pub async fn register_webhook(&self, public_base_url: &str) {
        let Some(token) = self.bot_token.clone() else {
            return;
        };
        let url = format!("{}/webhook", public_base_url.trim_end_matches('/'));
        let body = json!({ "url": url });
        let outcome = async {
            let response = self
                .client
                .post(self.api_url(&token, "setWebhook"))
                .json(&body)
                .timeout(std::time::Duration::from_secs(10))
                .send()
                .await?;
            let result: TelegramApiResponse = response.json().await?;
            if !result.ok {
                anyhow::bail!(
                    "Telegram API error: {}",
                    result.description.unwrap_or_default()
                );
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;
        match outcome {
            Ok(()) => tracing::info!("Telegram webhook registered at {}", url),
            Err(e) => tracing::warn!("Failed to register Telegram webhook: {}", e),
        }
    }
}
