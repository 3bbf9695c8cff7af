//! Command replies.
//!
//! A [`Reply`] is built once by whoever answers a command and then rendered
//! for the channel it travels on: a Discord interaction response, a Discord
//! webhook edit, or the `{status, message, data}` document web clients poll.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{
    COLOR_ERROR, COLOR_INFO, COLOR_SUCCESS, COLOR_WARNING, FLAG_EPHEMERAL,
    RESPONSE_CHANNEL_MESSAGE, RESPONSE_DEFERRED_CHANNEL_MESSAGE, RESPONSE_PONG,
};

// ---------------------------------------------------------------------------
// Embeds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedImage {
    pub url: String,
}

impl Embed {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color,
            timestamp: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn author(mut self, name: impl Into<String>, icon_url: Option<String>) -> Self {
        self.author = Some(EmbedAuthor {
            name: name.into(),
            icon_url,
        });
        self
    }

    pub fn thumbnail(mut self, url: Option<String>) -> Self {
        self.thumbnail = url.map(|url| EmbedImage { url });
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.image = Some(EmbedImage { url: url.into() });
        self
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Success => "success",
            ReplyStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub status: ReplyStatus,
    pub embed: Embed,
    #[serde(default)]
    pub ephemeral: bool,
    /// Machine-readable payload for web clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn success(embed: Embed) -> Self {
        Self {
            status: ReplyStatus::Success,
            embed,
            ephemeral: false,
            data: None,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            embed: Embed::new(title, description, COLOR_ERROR),
            ephemeral: true,
            data: None,
        }
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            embed: Embed::new(title, description, COLOR_WARNING),
            ephemeral: true,
            data: None,
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::success(Embed::new(title, description, COLOR_INFO))
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }

    /// Human-readable one-liner for web clients.
    pub fn message(&self) -> &str {
        if self.embed.description.is_empty() {
            &self.embed.title
        } else {
            &self.embed.description
        }
    }

    /// Message body as sent to Discord (webhook edits and type-4 `data`).
    pub fn to_discord_message(&self) -> Value {
        let mut message = json!({ "embeds": [self.embed] });
        if self.ephemeral {
            message["flags"] = json!(FLAG_EPHEMERAL);
        }
        message
    }

    /// Immediate (type 4) interaction response.
    pub fn to_discord(&self) -> Value {
        json!({
            "type": RESPONSE_CHANNEL_MESSAGE,
            "data": self.to_discord_message(),
        })
    }

    pub fn to_web(&self) -> Value {
        let data = self.data.clone().unwrap_or_else(|| json!({ "embed": self.embed }));
        json!({
            "status": self.status.as_str(),
            "message": self.message(),
            "title": self.embed.title,
            "data": data,
        })
    }
}

pub fn pong() -> Value {
    json!({ "type": RESPONSE_PONG })
}

pub fn deferred_ack() -> Value {
    json!({ "type": RESPONSE_DEFERRED_CHANNEL_MESSAGE })
}

/// Format a wait as `Xm Ys`, or `Ys` under a minute.
pub fn format_wait(seconds: u64) -> String {
    let (m, s) = (seconds / 60, seconds % 60);
    if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Reply for a caller who exhausted a command's window.
pub fn rate_limited(command: &str, max: u32, reset_in_secs: u64) -> Reply {
    let embed = Embed::new(
        "Rate Limit Exceeded",
        format!(
            "You've reached the limit for `/{command}`. Try again in **{}**.",
            format_wait(reset_in_secs)
        ),
        COLOR_WARNING,
    )
    .field("Limit", format!("{max} uses per window"), true)
    .field("Remaining", "0", true)
    .footer("Tip: Premium users enjoy larger rate limits");

    Reply {
        status: ReplyStatus::Error,
        embed,
        ephemeral: true,
        data: Some(json!({
            "command": command,
            "remaining": 0,
            "max": max,
            "reset_in": reset_in_secs,
        })),
    }
}

pub fn registration_required() -> Reply {
    Reply::warning(
        "Registration Required",
        "You need to register before using this command. Run `/register` to get started.",
    )
}

pub fn banned(reason: Option<&str>) -> Reply {
    let description = match reason {
        Some(r) if !r.is_empty() => format!("You are banned from using this bot.\n**Reason:** {r}"),
        _ => "You are banned from using this bot.".to_string(),
    };
    Reply::error("Access Denied", description)
}

pub fn temporarily_unavailable() -> Reply {
    Reply::error(
        "Service Temporarily Unavailable",
        "The service is temporarily unavailable. Please try again in a moment.",
    )
}

pub fn command_not_found(command: &str) -> Reply {
    Reply::error(
        "Command Not Found",
        format!("The command `/{command}` is not recognized."),
    )
}

pub fn processing_error() -> Reply {
    Reply::error(
        "Command Error",
        "An error occurred while processing your command. The service continues to run, please try again.",
    )
}

pub fn success_embed(title: impl Into<String>, description: impl Into<String>) -> Embed {
    Embed::new(title, description, COLOR_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discord_rendering() {
        let reply = Reply::error("Oops", "bad input");
        let v = reply.to_discord();
        assert_eq!(v["type"], 4);
        assert_eq!(v["data"]["flags"], 64);
        assert_eq!(v["data"]["embeds"][0]["title"], "Oops");

        let public = Reply::info("Hi", "there").to_discord();
        assert!(public["data"].get("flags").is_none());
    }

    #[test]
    fn test_web_rendering() {
        let reply = Reply::info("Pong", "Latency ok").with_data(json!({"latency_ms": 3}));
        let v = reply.to_web();
        assert_eq!(v["status"], "success");
        assert_eq!(v["message"], "Latency ok");
        assert_eq!(v["data"]["latency_ms"], 3);
    }

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(45), "45s");
        assert_eq!(format_wait(60), "1m 0s");
        assert_eq!(format_wait(299), "4m 59s");
    }

    #[test]
    fn test_rate_limited_reply() {
        let reply = rate_limited("draw", 10, 42);
        assert!(reply.is_error());
        assert!(reply.ephemeral);
        assert_eq!(reply.embed.title, "Rate Limit Exceeded");
        assert!(reply.embed.description.contains("42s"));
        assert_eq!(reply.data.as_ref().unwrap()["reset_in"], 42);
    }
}
