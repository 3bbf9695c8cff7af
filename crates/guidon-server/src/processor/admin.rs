//! Moderation commands. Callers need Administrator or Manage Guild.

use async_trait::async_trait;
use serde_json::json;

use guidon_shared::constants::{COLOR_PREMIUM, COLOR_SUCCESS, COLOR_WARNING};
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};

use super::{require_caller, CommandError, CommandHandler, Services};

fn require_admin(interaction: &Interaction) -> Result<(), CommandError> {
    if require_caller(interaction)?.is_admin() {
        Ok(())
    } else {
        Err(CommandError::PermissionDenied)
    }
}

/// Target user id plus how to show it.
fn target(interaction: &Interaction, verb: &str) -> Result<(String, String), CommandError> {
    let id = interaction
        .option_text("user")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CommandError::InvalidInput(format!("Please specify a user to {verb}.")))?;
    let display = interaction
        .resolved_users
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("<@{id}>"));
    Ok((id, display))
}

fn not_registered(display: &str) -> impl FnOnce(CommandError) -> CommandError + '_ {
    move |e| match e {
        CommandError::NotFound(_) => CommandError::NotFound(format!("{display} is not registered.")),
        other => other,
    }
}

pub struct Ban;

#[async_trait]
impl CommandHandler for Ban {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        require_admin(interaction)?;
        let (id, display) = target(interaction, "ban")?;
        let reason = interaction.option_text("reason").filter(|r| !r.trim().is_empty());

        let user = services
            .directory
            .ban(&id, reason.as_deref())
            .await
            .map_err(CommandError::from)
            .map_err(not_registered(&display))?;

        let mut embed = Embed::new("User Banned", format!("{display} has been banned."), COLOR_WARNING);
        if let Some(ref r) = reason {
            embed = embed.field("Reason", r.clone(), false);
        }
        Ok(Reply::success(embed).with_data(json!({ "user": user })))
    }
}

pub struct Unban;

#[async_trait]
impl CommandHandler for Unban {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        require_admin(interaction)?;
        let (id, display) = target(interaction, "unban")?;

        let user = services
            .directory
            .unban(&id)
            .await
            .map_err(CommandError::from)
            .map_err(not_registered(&display))?;

        Ok(Reply::success(Embed::new(
            "User Unbanned",
            format!("{display} has been unbanned."),
            COLOR_SUCCESS,
        ))
        .with_data(json!({ "user": user })))
    }
}

pub struct SetPremium;

#[async_trait]
impl CommandHandler for SetPremium {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        require_admin(interaction)?;
        let (id, display) = target(interaction, "update")?;
        let premium = interaction.option_bool("premium").ok_or_else(|| {
            CommandError::InvalidInput("Please specify premium: true or false.".to_string())
        })?;

        let user = services
            .directory
            .set_premium(&id, premium)
            .await
            .map_err(CommandError::from)
            .map_err(not_registered(&display))?;

        let status = if premium { "granted" } else { "revoked" };
        Ok(Reply::success(Embed::new(
            "Premium Status Updated",
            format!("Premium status for {display} has been {status}."),
            COLOR_PREMIUM,
        ))
        .with_data(json!({ "user": user })))
    }
}
