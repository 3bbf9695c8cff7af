use serde::{Deserialize, Serialize};

use crate::constants::{PERMISSION_ADMINISTRATOR, PERMISSION_MANAGE_GUILD};

// User identity = Discord snowflake (or the web session's user id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Guild permission bitset as sent by Discord (a decimal string on the wire).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Permissions(pub u64);

impl Permissions {
    /// Parse Discord's decimal-string representation. Garbage means no bits.
    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().parse().unwrap_or(0))
    }

    pub fn is_admin(&self) -> bool {
        self.0 & (PERMISSION_ADMINISTRATOR | PERMISSION_MANAGE_GUILD) != 0
    }
}

/// Who issued an interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caller {
    pub id: UserId,
    /// Display name (`name#1234` for legacy discriminators).
    pub username: String,
    /// Avatar hash or URL, whatever the platform gave us.
    pub avatar: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.permissions.is_admin()
    }

    /// CDN URL for the caller's avatar, if the platform sent a hash.
    pub fn avatar_url(&self) -> Option<String> {
        let avatar = self.avatar.as_deref()?;
        if avatar.starts_with("http://") || avatar.starts_with("https://") {
            return Some(avatar.to_string());
        }
        Some(format!(
            "https://cdn.discordapp.com/avatars/{}/{}.png",
            self.id, avatar
        ))
    }
}

/// Join a username and legacy discriminator the way Discord displays them.
pub fn display_name(username: &str, discriminator: Option<&str>) -> String {
    match discriminator {
        Some(d) if !d.is_empty() && d != "0" => format!("{username}#{d}"),
        _ => username.to_string(),
    }
}

/// A typed command option value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl OptionValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            OptionValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            OptionValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            OptionValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            OptionValue::Integer(i) => Some(*i != 0),
            OptionValue::Number(_) => None,
        }
    }

    /// Text form of the value. User and role options arrive as strings.
    pub fn as_text(&self) -> String {
        match self {
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Integer(i) => i.to_string(),
            OptionValue::Number(n) => n.to_string(),
            OptionValue::String(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}
