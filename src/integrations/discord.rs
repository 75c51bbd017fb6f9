//! Discord REST delivery.
//!
//! Notifications go out as direct messages: the DM channel for a user is
//! opened once via `POST /users/@me/channels` and cached for the process
//! lifetime, then messages are posted to `POST /channels/{id}/messages`.

use super::Messenger;
use crate::data::{Recipient, UserId};
use crate::error::TrackerError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects message content longer than this many characters
pub const MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

pub struct DiscordMessenger {
    client: reqwest::Client,
    token: String,
    api_base: String,
    dm_channels: Mutex<HashMap<UserId, String>>,
}

impl DiscordMessenger {
    pub fn new(client: reqwest::Client, token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            dm_channels: Mutex::new(HashMap::new()),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn resolve_recipient(&self, user_id: UserId) -> Result<Recipient, TrackerError> {
        if let Some(handle) = self.dm_channels.lock().await.get(&user_id) {
            return Ok(Recipient {
                user_id,
                handle: handle.clone(),
            });
        }

        let unresolved = |reason: String| TrackerError::RecipientUnresolved { user_id, reason };

        let response = self
            .client
            .post(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await
            .map_err(|e| unresolved(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unresolved(format!(
                "Discord API returned status {}",
                response.status()
            )));
        }

        let channel: DmChannel = response
            .json()
            .await
            .map_err(|e| unresolved(format!("unexpected DM channel response: {}", e)))?;

        self.dm_channels
            .lock()
            .await
            .insert(user_id, channel.id.clone());

        Ok(Recipient {
            user_id,
            handle: channel.id,
        })
    }

    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), TrackerError> {
        let failed = |reason: String| TrackerError::Send {
            user_id: recipient.user_id,
            reason,
        };

        let response = self
            .client
            .post(format!("{}/channels/{}/messages", self.api_base, recipient.handle))
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": fit_message(content, MESSAGE_LIMIT) }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(failed(format!("rate limited, retry after {}s", retry_after)));
        }
        if !status.is_success() {
            return Err(failed(format!("Discord API returned status {}", status)));
        }

        Ok(())
    }
}

/// Cut `content` at a line boundary so it fits in `limit` characters.
///
/// Dropped lines are summarized by a trailing `... and N more` line.
pub fn fit_message(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::new();
    let mut kept_chars = 0;

    for (i, line) in lines.iter().enumerate() {
        let remaining_after = lines.len() - i - 1;
        let suffix_len = format!("\n... and {} more", remaining_after + 1).chars().count();
        let separator = usize::from(i > 0);
        let line_len = line.chars().count();

        if i == 0 && line_len + suffix_len > limit {
            return fit_header(line, remaining_after, limit);
        }

        if kept_chars + separator + line_len + suffix_len > limit {
            let dropped = lines.len() - i;
            kept.push_str(&format!("\n... and {} more", dropped));
            return kept;
        }

        if i > 0 {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_chars += separator + line_len;
    }

    kept
}

/// The first line alone is too long: keep as much of it as fits
fn fit_header(header: &str, dropped: usize, limit: usize) -> String {
    if dropped == 0 {
        return header.chars().take(limit).collect();
    }

    let marker = format!("\n... and {} more", dropped);
    let budget = limit.saturating_sub(marker.chars().count());
    let mut fitted: String = header.chars().take(budget).collect();
    fitted.push_str(&marker);
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_message_short_content_unchanged() {
        assert_eq!(fit_message("a\nb", 10), "a\nb");
    }

    #[test]
    fn test_fit_message_truncates_on_line_boundary() {
        let content = "header\nline one\nline two\nline three";
        let fitted = fit_message(content, 30);

        assert!(fitted.chars().count() <= 30);
        assert!(fitted.starts_with("header\n"));
        assert!(fitted.ends_with("more"));
        assert!(!fitted.contains("line three"));
    }

    #[test]
    fn test_fit_message_keeps_truncated_header() {
        let content = "a very long header line\nx\ny";
        let fitted = fit_message(content, 20);

        assert_eq!(fitted, "a ver\n... and 2 more");
        assert!(fitted.chars().count() <= 20);
    }

    #[test]
    fn test_fit_message_single_long_line() {
        let fitted = fit_message(&"z".repeat(30), 10);
        assert_eq!(fitted, "z".repeat(10));
    }
}
