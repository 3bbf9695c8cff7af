//! Command processors.
//!
//! A [`Processor`] takes one delivered [`Envelope`], finds the handler
//! registered for its command and turns the outcome into a [`Reply`]. It
//! never fails: unknown commands, handler errors and handler panics all come
//! back as error replies so the caller always hears something.

mod admin;
mod base;
mod canvas_read;
mod draw;
mod snapshot;
mod users;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, warn};

use guidon_shared::envelope::Envelope;
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{self, Reply};
use guidon_shared::types::Caller;
use guidon_store::{StoreError, User};

use crate::canvas::{Canvas, CanvasError};
use crate::directory::Directory;
use crate::rate_limit::{RateDecision, RateLimiter};

pub use base::fast_path;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("{0}")]
    NotFound(String),

    #[error("registration required")]
    RegistrationRequired,

    #[error("caller is banned")]
    Banned(Option<String>),

    #[error("rate limited on {command}")]
    RateLimited {
        command: String,
        decision: RateDecision,
    },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CommandError::NotFound("User not found.".to_string()),
            other => CommandError::Unavailable(other.to_string()),
        }
    }
}

impl From<CanvasError> for CommandError {
    fn from(e: CanvasError) -> Self {
        match e {
            CanvasError::OutOfBounds { .. } | CanvasError::InvalidColor(_) => {
                CommandError::InvalidInput(e.to_string())
            }
            CanvasError::Store(inner) => inner.into(),
            CanvasError::Render(inner) => CommandError::Unavailable(inner.to_string()),
        }
    }
}

impl CommandError {
    pub fn into_reply(self) -> Reply {
        match self {
            CommandError::InvalidInput(msg) => Reply::error("Invalid Input", msg),
            CommandError::PermissionDenied => Reply::error(
                "Permission Denied",
                "You need administrator permissions to use this command.",
            ),
            CommandError::NotFound(msg) => Reply::error("Not Found", msg),
            CommandError::RegistrationRequired => reply::registration_required(),
            CommandError::Banned(reason) => reply::banned(reason.as_deref()),
            CommandError::RateLimited { command, decision } => {
                reply::rate_limited(&command, decision.max, decision.reset_in)
            }
            CommandError::Unavailable(_) => reply::temporarily_unavailable(),
            CommandError::Internal(_) => reply::processing_error(),
        }
    }
}

/// Everything a handler may touch.
#[derive(Clone)]
pub struct Services {
    pub directory: Directory,
    pub rate_limiter: RateLimiter,
    pub canvas: Canvas,
}

impl Services {
    /// Caller's stored record. Missing means not registered; banned is refused.
    pub async fn registered_caller(&self, caller: &Caller) -> Result<User, CommandError> {
        let user = self
            .directory
            .get(caller.id.as_str())
            .await?
            .ok_or(CommandError::RegistrationRequired)?;
        if user.is_banned {
            return Err(CommandError::Banned(user.ban_reason));
        }
        Ok(user)
    }

    /// Record one metered call, refusing if the window is full. A redelivery
    /// of an interaction that was already counted is not charged again.
    pub async fn consume_quota(
        &self,
        user: &User,
        command: &str,
        interaction_id: &str,
    ) -> Result<RateDecision, CommandError> {
        if self.directory.already_counted(interaction_id).await? {
            debug!(user_id = %user.user_id, command, interaction_id, "Redelivery, quota already charged");
            return Ok(self
                .rate_limiter
                .get_info(&user.user_id, command, user.is_premium)
                .await?);
        }

        let decision = self
            .rate_limiter
            .check_and_record(&user.user_id, command, user.is_premium)
            .await?;
        if !decision.allowed {
            return Err(CommandError::RateLimited {
                command: command.to_string(),
                decision,
            });
        }
        Ok(decision)
    }
}

pub(crate) fn require_caller(interaction: &Interaction) -> Result<&Caller, CommandError> {
    interaction
        .caller
        .as_ref()
        .ok_or_else(|| CommandError::InvalidInput("Could not identify user.".to_string()))
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable command name -> handler table, built once at startup.
pub struct Registry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl RegistryBuilder {
    pub fn register(mut self, name: &str, handler: impl CommandHandler + 'static) -> Self {
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            handlers: self.handlers,
        }
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every command the bot ships with.
    pub fn standard() -> Self {
        Self::builder()
            .register("hello", base::Hello)
            .register("ping", base::Ping)
            .register("help", base::Help)
            .register("register", users::Register)
            .register("userinfo", users::UserInfo)
            .register("stats", users::Stats)
            .register("leaderboard", users::Leaderboard)
            .register("ban", admin::Ban)
            .register("unban", admin::Unban)
            .register("setpremium", admin::SetPremium)
            .register("draw", draw::Draw)
            .register("snapshot", snapshot::Snapshot)
            .register("colors", canvas_read::Colors)
            .register("canvas_state", canvas_read::CanvasState)
            .register("pixel_info", canvas_read::PixelLookup)
            .register("getpixel", canvas_read::PixelLookup)
            .build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Processor {
    registry: Arc<Registry>,
    services: Services,
}

impl Processor {
    pub fn new(registry: Arc<Registry>, services: Services) -> Self {
        Self { registry, services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn handle(&self, envelope: &Envelope) -> Reply {
        self.dispatch(&envelope.interaction).await
    }

    pub async fn dispatch(&self, interaction: &Interaction) -> Reply {
        let command = interaction.command_name.as_str();
        let correlation_id = interaction.correlation_id.as_str();
        let user_id = interaction.caller_id().map(|id| id.as_str()).unwrap_or("");

        let Some(handler) = self.registry.get(command) else {
            warn!(correlation_id, command, user_id, "No handler for command");
            return reply::command_not_found(command);
        };

        let outcome = AssertUnwindSafe(handler.handle(&self.services, interaction))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(reply)) => {
                debug!(correlation_id, command, user_id, "Command processed");
                reply
            }
            Ok(Err(e)) => {
                match &e {
                    CommandError::Internal(detail) => {
                        error!(correlation_id, command, user_id, error = %detail, "Command failed")
                    }
                    CommandError::Unavailable(detail) => {
                        warn!(correlation_id, command, user_id, error = %detail, "Backend unavailable")
                    }
                    other => debug!(correlation_id, command, user_id, error = %other, "Command rejected"),
                }
                e.into_reply()
            }
            Err(_) => {
                error!(correlation_id, command, user_id, "Command handler panicked");
                reply::processing_error()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use guidon_shared::interaction::ReplyChannel;
    use guidon_shared::types::{CommandOption, OptionValue, Permissions, UserId};
    use guidon_store::{DbHandle, UserUpsert};

    use crate::rate_limit::TierTable;

    pub(crate) fn services() -> Services {
        let db = DbHandle::open_in_memory().unwrap();
        Services {
            directory: Directory::new(db.clone(), Duration::from_secs(60)),
            rate_limiter: RateLimiter::new(db.clone(), TierTable::default()),
            canvas: crate::canvas::tests::canvas_on(db),
        }
    }

    pub(crate) fn interaction(command: &str, user: &str, options: &[(&str, OptionValue)]) -> Interaction {
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            kind: guidon_shared::interaction::InteractionKind::Command,
            command_name: command.to_string(),
            options: options
                .iter()
                .map(|(name, value)| CommandOption {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
            resolved_users: Default::default(),
            caller: Some(Caller {
                id: UserId::new(user),
                username: format!("user{user}"),
                avatar: None,
                permissions: Permissions::default(),
            }),
            reply_channel: ReplyChannel::PollSlot { token: "t".into() },
            correlation_id: "corr".into(),
        }
    }

    pub(crate) async fn register(services: &Services, user: &str) {
        services
            .directory
            .create_or_update(
                user,
                UserUpsert {
                    username: format!("user{user}"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    struct Panics;

    #[async_trait]
    impl CommandHandler for Panics {
        async fn handle(&self, _: &Services, _: &Interaction) -> Result<Reply, CommandError> {
            panic!("handler bug");
        }
    }

    struct Fails;

    #[async_trait]
    impl CommandHandler for Fails {
        async fn handle(&self, _: &Services, _: &Interaction) -> Result<Reply, CommandError> {
            Err(CommandError::Internal("boom".into()))
        }
    }

    fn processor(registry: Registry) -> Processor {
        Processor::new(Arc::new(registry), services())
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let p = processor(Registry::standard());
        let reply = p.dispatch(&interaction("teleport", "1", &[])).await;
        assert!(reply.is_error());
        assert_eq!(reply.embed.title, "Command Not Found");
    }

    #[tokio::test]
    async fn test_panic_becomes_processing_error() {
        let p = processor(Registry::builder().register("boom", Panics).build());
        let reply = p.dispatch(&interaction("boom", "1", &[])).await;
        assert_eq!(reply.embed.title, "Command Error");
        assert!(reply.ephemeral);

        // The processor is still usable afterwards.
        let again = p.dispatch(&interaction("boom", "1", &[])).await;
        assert_eq!(again.embed.title, "Command Error");
    }

    #[tokio::test]
    async fn test_internal_error_is_generic() {
        let p = processor(Registry::builder().register("fail", Fails).build());
        let reply = p.dispatch(&interaction("fail", "1", &[])).await;
        assert_eq!(reply.embed.title, "Command Error");
        assert!(!reply.message().contains("boom"));
    }

    #[test]
    fn test_standard_registry_covers_command_set() {
        let registry = Registry::standard();
        for name in [
            "hello", "ping", "help", "register", "userinfo", "stats", "leaderboard", "ban",
            "unban", "setpremium", "draw", "snapshot", "colors", "canvas_state", "pixel_info",
            "getpixel",
        ] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
        assert_eq!(registry.commands().len(), 16);
    }
}
