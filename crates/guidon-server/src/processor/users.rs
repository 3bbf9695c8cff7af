//! Account commands: register, userinfo, stats, leaderboard.

use async_trait::async_trait;
use serde_json::json;

use guidon_shared::constants::{COLOR_INFO, COLOR_PREMIUM, COLOR_SUCCESS};
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};
use guidon_store::UserUpsert;

use crate::directory::{LEADERBOARD_DEFAULT, LEADERBOARD_MAX};

use super::{require_caller, CommandError, CommandHandler, Services};

pub struct Register;

#[async_trait]
impl CommandHandler for Register {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let caller = require_caller(interaction)?;

        if let Some(existing) = services.directory.get(caller.id.as_str()).await? {
            return Ok(Reply::success(
                Embed::new(
                    "Already Registered",
                    format!(
                        "Your account is already registered!\n\n**Username:** {}",
                        existing.username
                    ),
                    COLOR_SUCCESS,
                )
                .footer("User Management"),
            )
            .ephemeral());
        }

        let user = services
            .directory
            .create_or_update(
                caller.id.as_str(),
                UserUpsert {
                    username: caller.username.clone(),
                    avatar: caller.avatar.clone(),
                    ..Default::default()
                },
            )
            .await?;

        Ok(Reply::success(
            Embed::new(
                "Registration Successful",
                format!(
                    "Your account has been registered successfully!\n\n**Username:** {}",
                    user.username
                ),
                COLOR_SUCCESS,
            )
            .footer("User Management"),
        )
        .ephemeral()
        .with_data(json!({ "user_id": user.user_id, "username": user.username })))
    }
}

pub struct UserInfo;

#[async_trait]
impl CommandHandler for UserInfo {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let caller = require_caller(interaction)?;
        let target_id = interaction
            .option_text("user")
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| caller.id.to_string());

        let display = interaction
            .resolved_users
            .get(&target_id)
            .cloned()
            .unwrap_or_else(|| format!("<@{target_id}>"));

        let user = services
            .directory
            .get(&target_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("{display} is not registered.")))?;

        let status = if user.is_banned { "Banned" } else { "Active" };
        let mut embed = Embed::new(
            "User Information",
            format!("Profile of **{}**", user.username),
            if user.is_premium { COLOR_PREMIUM } else { COLOR_INFO },
        )
        .field("Total Draws", user.total_draws.to_string(), true)
        .field("Commands", user.total_commands.to_string(), true)
        .field("Premium", if user.is_premium { "Yes" } else { "No" }, true)
        .field("Status", status, true)
        .field(
            "Member Since",
            user.created_at.format("%Y-%m-%d").to_string(),
            true,
        );
        if let Some(reason) = user.ban_reason.as_deref().filter(|_| user.is_banned) {
            embed = embed.field("Ban Reason", reason, false);
        }

        Ok(Reply::success(embed.footer("User Management"))
            .with_data(json!({ "user": user })))
    }
}

pub struct Stats;

#[async_trait]
impl CommandHandler for Stats {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let caller = require_caller(interaction)?;
        let user = services.directory.get(caller.id.as_str()).await?;
        let premium = user.as_ref().map(|u| u.is_premium).unwrap_or(false);

        let draw_limit = services
            .rate_limiter
            .get_info(caller.id.as_str(), "draw", premium)
            .await?;
        let canvas = services.canvas.stats(false).await?;
        let total_users = services.directory.count_users().await?;
        let active_users = services.directory.active_users(24).await?;

        let tier = if premium { "Premium" } else { "Standard" };
        let draws = user.as_ref().map(|u| u.total_draws).unwrap_or(0);

        let embed = Embed::new(
            "Statistics Dashboard",
            format!("Detailed statistics for **{}**", caller.username),
            if premium { COLOR_PREMIUM } else { COLOR_INFO },
        )
        .author(caller.username.clone(), caller.avatar_url())
        .field(
            "Your Account",
            format!("**Tier:** {tier}\n**Your Pixels:** {draws}"),
            false,
        )
        .field(
            "Rate Limits",
            format!(
                "**Draws remaining:** {}/{}",
                draw_limit.remaining, draw_limit.max
            ),
            false,
        )
        .field(
            "Canvas Statistics",
            format!(
                "**Total pixels:** {}\n**Contributors:** {}",
                canvas.total_pixels, canvas.unique_contributors
            ),
            false,
        )
        .field(
            "Global Stats",
            format!("**Total Users:** {total_users}\n**Active (24h):** {active_users}"),
            false,
        )
        .footer("Use /draw and /snapshot to climb the leaderboard");

        Ok(Reply::success(embed).ephemeral().with_data(json!({
            "user": user,
            "draw_limit": draw_limit,
            "canvas": canvas,
            "total_users": total_users,
            "active_users": active_users,
        })))
    }
}

pub struct Leaderboard;

#[async_trait]
impl CommandHandler for Leaderboard {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let limit = interaction
            .option_i64("limit")
            .map(|l| l.clamp(1, LEADERBOARD_MAX as i64) as u32)
            .unwrap_or(LEADERBOARD_DEFAULT);
        let top = services.directory.leaderboard(limit).await?;

        if top.is_empty() {
            return Ok(Reply::info("Leaderboard", "No users found yet."));
        }

        let lines: Vec<String> = top
            .iter()
            .enumerate()
            .map(|(i, user)| {
                let badge = if user.is_premium { " (premium)" } else { "" };
                format!(
                    "{}. **{}**{badge} - {} draws",
                    i + 1,
                    user.username,
                    user.total_draws
                )
            })
            .collect();

        let entries: Vec<_> = top
            .iter()
            .enumerate()
            .map(|(i, u)| {
                json!({
                    "rank": i + 1,
                    "user_id": u.user_id,
                    "username": u.username,
                    "total_draws": u.total_draws,
                    "is_premium": u.is_premium,
                })
            })
            .collect();

        Ok(Reply::success(
            Embed::new("Leaderboard", lines.join("\n"), COLOR_PREMIUM)
                .footer(format!("Top {} users by draws", top.len())),
        )
        .with_data(json!({ "leaderboard": entries })))
    }
}
