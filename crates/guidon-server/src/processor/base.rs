//! Stateless commands. The gateway answers these inline too.

use async_trait::async_trait;

use guidon_shared::constants::{APP_NAME, COLOR_INFO, COLOR_SUCCESS};
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};

use super::{CommandError, CommandHandler, Services};

fn hello(interaction: &Interaction, canvas_size: u32) -> Reply {
    let name = interaction
        .caller
        .as_ref()
        .map(|c| c.username.as_str())
        .unwrap_or("there");
    Reply::success(
        Embed::new(
            format!("Welcome to {APP_NAME}"),
            format!(
                "Hello **{name}**! Grab a pixel on the shared {canvas_size}x{canvas_size} canvas with `/draw`."
            ),
            COLOR_INFO,
        )
        .footer(format!("{APP_NAME} - collaborative pixel art")),
    )
}

fn ping() -> Reply {
    Reply::success(
        Embed::new("Pong!", "Bot is up and answering.", COLOR_SUCCESS).footer("Status: Online"),
    )
}

fn help() -> Reply {
    let embed = Embed::new(
        "Available Commands",
        "Here are the commands you can use:",
        COLOR_INFO,
    )
    .field(
        "Basic Commands",
        "`/hello` - Greeting\n`/ping` - Check the bot is alive\n`/help` - Show this help message",
        false,
    )
    .field(
        "Account",
        "`/register` - Create your account\n`/userinfo [user]` - Profile details\n`/stats` - Your statistics\n`/leaderboard` - Top artists",
        false,
    )
    .field(
        "Art Commands",
        "`/draw x y [color]` - Draw a pixel\n`/snapshot` - Take a snapshot\n`/colors` - Named colors\n`/pixel_info x y` - Who painted a pixel",
        false,
    )
    .footer(format!("{APP_NAME} - collaborative pixel art"));
    Reply::success(embed)
}

/// Reply for commands cheap enough to answer without touching the bus.
pub fn fast_path(interaction: &Interaction, canvas_size: u32) -> Option<Reply> {
    match interaction.command_name.as_str() {
        "hello" => Some(hello(interaction, canvas_size)),
        "ping" => Some(ping()),
        "help" => Some(help()),
        _ => None,
    }
}

pub struct Hello;

#[async_trait]
impl CommandHandler for Hello {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        Ok(hello(interaction, services.canvas.size()))
    }
}

pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn handle(&self, _: &Services, _: &Interaction) -> Result<Reply, CommandError> {
        Ok(ping())
    }
}

pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn handle(&self, _: &Services, _: &Interaction) -> Result<Reply, CommandError> {
        Ok(help())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::interaction;

    #[test]
    fn test_fast_path_table() {
        assert_eq!(
            fast_path(&interaction("ping", "1", &[]), 100).unwrap().embed.title,
            "Pong!"
        );
        assert!(fast_path(&interaction("hello", "1", &[]), 100)
            .unwrap()
            .message()
            .contains("user1"));
        assert!(fast_path(&interaction("help", "1", &[]), 100).is_some());
        assert!(fast_path(&interaction("draw", "1", &[]), 100).is_none());
        assert!(fast_path(&interaction("register", "1", &[]), 100).is_none());
    }

    #[test]
    fn test_greeting_quotes_configured_size() {
        let reply = fast_path(&interaction("hello", "1", &[]), 32).unwrap();
        assert!(reply.message().contains("32x32"));
        assert!(!reply.message().contains("100x100"));
    }
}
