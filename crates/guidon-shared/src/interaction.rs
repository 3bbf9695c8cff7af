//! Platform-agnostic command invocations.
//!
//! Discord webhooks and web-client requests are both decoded into an
//! [`Interaction`] at the edge. From then on nothing downstream cares where
//! the command came from, except the [`ReplyChannel`] that says where the
//! answer has to go.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::constants::{INTERACTION_APPLICATION_COMMAND, INTERACTION_PING};
use crate::error::InteractionError;
use crate::types::{display_name, Caller, CommandOption, OptionValue, Permissions, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Ping,
    Command,
    Unknown(u8),
}

impl InteractionKind {
    pub fn from_wire(kind: u8) -> Self {
        match kind {
            INTERACTION_PING => InteractionKind::Ping,
            INTERACTION_APPLICATION_COMMAND => InteractionKind::Command,
            other => InteractionKind::Unknown(other),
        }
    }
}

/// Where the finished reply for an interaction must be delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyChannel {
    /// Discord follow-up: edit the deferred message through the webhook.
    Webhook { application_id: String, token: String },
    /// Web client: park the reply until the client polls for `token`.
    PollSlot { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub kind: InteractionKind,
    /// Empty for pings.
    pub command_name: String,
    pub options: Vec<CommandOption>,
    /// User id -> display name, for user-typed options.
    #[serde(default)]
    pub resolved_users: BTreeMap<String, String>,
    pub caller: Option<Caller>,
    pub reply_channel: ReplyChannel,
    pub correlation_id: String,
}

impl Interaction {
    /// Decode a raw Discord interaction body.
    pub fn from_discord(body: &[u8], correlation_id: &str) -> Result<Self, InteractionError> {
        let raw: RawInteraction = serde_json::from_slice(body)?;
        let kind = InteractionKind::from_wire(raw.kind);

        let permissions = raw
            .member
            .as_ref()
            .and_then(|m| m.permissions.as_deref())
            .map(Permissions::parse)
            .unwrap_or_default();

        let user = raw.member.and_then(|m| m.user).or(raw.user);
        let caller = user.map(|u| Caller {
            id: UserId(u.id),
            username: display_name(&u.username, u.discriminator.as_deref()),
            avatar: u.avatar,
            permissions,
        });

        let data = raw.data.unwrap_or_default();
        if kind == InteractionKind::Command && data.name.is_empty() {
            return Err(InteractionError::MissingField("data.name"));
        }

        let mut options = Vec::new();
        flatten_options(data.options, &mut options);

        let resolved_users = data
            .resolved
            .map(|r| {
                r.users
                    .into_iter()
                    .map(|(id, u)| (id, display_name(&u.username, u.discriminator.as_deref())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id: raw.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind,
            command_name: data.name,
            options,
            resolved_users,
            caller,
            reply_channel: ReplyChannel::Webhook {
                application_id: raw.application_id.unwrap_or_default(),
                token: raw.token.unwrap_or_default(),
            },
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Build an interaction from a web-client request whose session has
    /// already been verified.
    pub fn from_web(
        request: WebInteractionRequest,
        caller: Caller,
        poll_token: String,
        correlation_id: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: InteractionKind::Command,
            command_name: request.command.trim().to_ascii_lowercase(),
            options: request.options.into_list(),
            resolved_users: BTreeMap::new(),
            caller: Some(caller),
            reply_channel: ReplyChannel::PollSlot { token: poll_token },
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    pub fn option_i64(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(OptionValue::as_i64)
    }

    pub fn option_bool(&self, name: &str) -> Option<bool> {
        self.option(name).and_then(OptionValue::as_bool)
    }

    pub fn option_text(&self, name: &str) -> Option<String> {
        self.option(name).map(OptionValue::as_text)
    }

    pub fn caller_id(&self) -> Option<&UserId> {
        self.caller.as_ref().map(|c| &c.id)
    }

    pub fn is_web(&self) -> bool {
        matches!(self.reply_channel, ReplyChannel::PollSlot { .. })
    }
}

/// Body of `POST /web/interactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebInteractionRequest {
    pub command: String,
    #[serde(default)]
    pub options: WebOptions,
    /// Poll token chosen by the client. Generated when absent.
    #[serde(default)]
    pub token: Option<String>,
}

/// Web clients send options either as a Discord-style list or a flat map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WebOptions {
    List(Vec<CommandOption>),
    Map(HashMap<String, OptionValue>),
}

impl Default for WebOptions {
    fn default() -> Self {
        WebOptions::List(Vec::new())
    }
}

impl WebOptions {
    fn into_list(self) -> Vec<CommandOption> {
        match self {
            WebOptions::List(list) => list,
            WebOptions::Map(map) => {
                let mut list: Vec<CommandOption> = map
                    .into_iter()
                    .map(|(name, value)| CommandOption { name, value })
                    .collect();
                list.sort_by(|a, b| a.name.cmp(&b.name));
                list
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Discord wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawInteraction {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    application_id: Option<String>,
    token: Option<String>,
    data: Option<RawData>,
    member: Option<RawMember>,
    user: Option<RawUser>,
}

#[derive(Deserialize, Default)]
struct RawData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    options: Vec<RawOption>,
    resolved: Option<RawResolved>,
}

#[derive(Deserialize)]
struct RawOption {
    name: String,
    value: Option<OptionValue>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Deserialize, Default)]
struct RawResolved {
    #[serde(default)]
    users: HashMap<String, RawUser>,
}

#[derive(Deserialize)]
struct RawMember {
    user: Option<RawUser>,
    permissions: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    username: String,
    discriminator: Option<String>,
    avatar: Option<String>,
}

// Subcommand groups nest their options; we only care about leaf values.
fn flatten_options(raw: Vec<RawOption>, out: &mut Vec<CommandOption>) {
    for opt in raw {
        match opt.value {
            Some(value) => out.push(CommandOption {
                name: opt.name,
                value,
            }),
            None => flatten_options(opt.options, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ping() {
        let body = br#"{"id":"1","type":1,"application_id":"app","token":"tok"}"#;
        let interaction = Interaction::from_discord(body, "corr").unwrap();
        assert_eq!(interaction.kind, InteractionKind::Ping);
        assert!(interaction.caller.is_none());
    }

    #[test]
    fn test_decode_guild_command() {
        let body = br#"{
            "id": "42",
            "type": 2,
            "application_id": "app",
            "token": "tok",
            "data": {
                "name": "draw",
                "options": [
                    {"name": "x", "type": 4, "value": 5},
                    {"name": "y", "type": 4, "value": 7},
                    {"name": "color", "type": 3, "value": "red"}
                ]
            },
            "member": {
                "permissions": "8",
                "user": {"id": "100", "username": "alice", "discriminator": "0", "avatar": "abc"}
            }
        }"#;
        let interaction = Interaction::from_discord(body, "corr").unwrap();
        assert_eq!(interaction.kind, InteractionKind::Command);
        assert_eq!(interaction.command_name, "draw");
        assert_eq!(interaction.option_i64("x"), Some(5));
        assert_eq!(interaction.option_text("color").as_deref(), Some("red"));

        let caller = interaction.caller.as_ref().unwrap();
        assert_eq!(caller.id.as_str(), "100");
        assert_eq!(caller.username, "alice");
        assert!(caller.is_admin());
        assert_eq!(
            interaction.reply_channel,
            ReplyChannel::Webhook {
                application_id: "app".into(),
                token: "tok".into()
            }
        );
    }

    #[test]
    fn test_decode_dm_command_with_resolved_user() {
        let body = br#"{
            "id": "43",
            "type": 2,
            "application_id": "app",
            "token": "tok",
            "data": {
                "name": "ban",
                "options": [{"name": "user", "type": 6, "value": "200"}],
                "resolved": {"users": {"200": {"id": "200", "username": "mallory", "discriminator": "0042"}}}
            },
            "user": {"id": "100", "username": "bob", "discriminator": "7"}
        }"#;
        let interaction = Interaction::from_discord(body, "corr").unwrap();
        let caller = interaction.caller.as_ref().unwrap();
        assert_eq!(caller.username, "bob#7");
        assert!(!caller.is_admin());
        assert_eq!(
            interaction.resolved_users.get("200").map(String::as_str),
            Some("mallory#0042")
        );
    }

    #[test]
    fn test_command_without_name_is_rejected() {
        let body = br#"{"id":"1","type":2,"data":{}}"#;
        assert!(Interaction::from_discord(body, "corr").is_err());
    }

    #[test]
    fn test_nested_subcommand_options_are_flattened() {
        let body = br#"{
            "type": 2,
            "data": {"name": "admin", "options": [
                {"name": "ban", "type": 1, "options": [{"name": "user", "type": 6, "value": "9"}]}
            ]}
        }"#;
        let interaction = Interaction::from_discord(body, "corr").unwrap();
        assert_eq!(interaction.option_text("user").as_deref(), Some("9"));
    }

    #[test]
    fn test_web_request_with_map_options() {
        let request: WebInteractionRequest = serde_json::from_str(
            r#"{"command": "Draw", "options": {"x": 1, "y": 2, "color": "blue"}}"#,
        )
        .unwrap();
        let caller = Caller {
            id: UserId::new("7"),
            username: "web".into(),
            avatar: None,
            permissions: Permissions::default(),
        };
        let interaction = Interaction::from_web(request, caller, "poll".into(), "corr");
        assert_eq!(interaction.command_name, "draw");
        assert_eq!(interaction.option_i64("y"), Some(2));
        assert!(interaction.is_web());
    }
}
