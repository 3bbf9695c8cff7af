use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use guidon_shared::color::{named_color_hint, Color};
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};

use super::{require_caller, CommandError, CommandHandler, Services};

const DEFAULT_DRAW_COLOR: &str = "black";

pub struct Draw;

#[async_trait]
impl CommandHandler for Draw {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let caller = require_caller(interaction)?;
        let user = services.registered_caller(caller).await?;

        let (Some(x), Some(y)) = (interaction.option_i64("x"), interaction.option_i64("y")) else {
            return Err(CommandError::InvalidInput(
                "Both `x` and `y` must be whole numbers.".to_string(),
            ));
        };
        services.canvas.validate_coords(x, y)?;

        let raw_color = interaction
            .option_text("color")
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DRAW_COLOR.to_string());
        let color = Color::parse(&raw_color).map_err(|_| {
            CommandError::InvalidInput(format!(
                "`{raw_color}` is not a color. Use `#RRGGBB` or a name like {}",
                named_color_hint()
            ))
        })?;

        // The window may have moved while the envelope sat on the bus.
        services
            .consume_quota(&user, "draw", interaction.id.as_str())
            .await?;

        let outcome = services
            .canvas
            .draw_pixel(x, y, color.as_str(), caller.id.as_str(), &caller.username)
            .await?;

        let total_draws = match services
            .directory
            .increment_usage(caller.id.as_str(), &caller.username, "draw", Some(interaction.id.as_str()))
            .await
        {
            Ok(usage) => Some(usage.user.total_draws),
            Err(e) => {
                warn!(
                    correlation_id = %interaction.correlation_id,
                    user_id = %caller.id,
                    error = %e,
                    "Usage increment failed"
                );
                None
            }
        };

        let size = services.canvas.size();
        let description = if outcome.changed {
            format!("Pixel successfully placed on the shared {size}x{size} canvas!")
        } else {
            "Pixel already had this color. No changes made.".to_string()
        };

        let mut embed = Embed::new("Pixel Placed Successfully", description, color.to_rgb())
            .author(caller.username.clone(), caller.avatar_url())
            .field("Coordinates", format!("**X:** {x} | **Y:** {y}"), false)
            .field("Color", format!("`{color}`"), true);
        if outcome.changed {
            if let Some(ref previous) = outcome.previous_color {
                embed = embed.field("Previous Color", format!("`{previous}`"), true);
            }
        }
        if let Some(total) = total_draws {
            embed = embed.field("Your Total Draws", format!("**{total}** pixels"), true);
        }
        if user.is_premium {
            embed = embed.field("Status", "Premium", true);
        }

        Ok(Reply::success(embed).with_data(json!({
            "x": x,
            "y": y,
            "color": color.as_str(),
            "previous_color": outcome.previous_color,
            "changed": outcome.changed,
            "total_draws": total_draws,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{interaction, register, services};
    use guidon_shared::types::OptionValue;

    fn draw(user: &str, x: i64, y: i64, color: &str) -> Interaction {
        interaction(
            "draw",
            user,
            &[
                ("x", OptionValue::Integer(x)),
                ("y", OptionValue::Integer(y)),
                ("color", OptionValue::String(color.into())),
            ],
        )
    }

    #[tokio::test]
    async fn test_draw_places_pixel_and_counts() {
        let services = services();
        register(&services, "1").await;

        let reply = Draw.handle(&services, &draw("1", 3, 4, "red")).await.unwrap();
        assert_eq!(reply.embed.title, "Pixel Placed Successfully");
        let data = reply.data.unwrap();
        assert_eq!(data["color"], "#FF0000");
        assert_eq!(data["total_draws"], 1);

        let pixel = services.canvas.read_pixel(3, 4).await.unwrap();
        assert_eq!(pixel.color, "#FF0000");
    }

    #[tokio::test]
    async fn test_default_color_is_black() {
        let services = services();
        register(&services, "1").await;
        let i = interaction(
            "draw",
            "1",
            &[("x", OptionValue::Integer(0)), ("y", OptionValue::Integer(0))],
        );
        Draw.handle(&services, &i).await.unwrap();
        assert_eq!(services.canvas.read_pixel(0, 0).await.unwrap().color, "#000000");
    }

    #[tokio::test]
    async fn test_same_color_is_reported_unchanged() {
        let services = services();
        register(&services, "1").await;
        Draw.handle(&services, &draw("1", 1, 1, "#00ff00")).await.unwrap();
        let reply = Draw.handle(&services, &draw("1", 1, 1, "lime")).await.unwrap();
        assert_eq!(reply.message(), "Pixel already had this color. No changes made.");
    }

    #[tokio::test]
    async fn test_invalid_input_consumes_nothing() {
        let services = services();
        register(&services, "1").await;

        for bad in [draw("1", 48, 0, "red"), draw("1", 0, -1, "red"), draw("1", 0, 0, "nope")] {
            let err = Draw.handle(&services, &bad).await.unwrap_err();
            assert!(matches!(err, CommandError::InvalidInput(_)));
        }
        let info = services.rate_limiter.get_info("1", "draw", false).await.unwrap();
        assert_eq!(info.remaining, 10);
    }

    #[tokio::test]
    async fn test_unregistered_and_banned() {
        let services = services();
        let err = Draw.handle(&services, &draw("9", 0, 0, "red")).await.unwrap_err();
        assert!(matches!(err, CommandError::RegistrationRequired));

        register(&services, "9").await;
        services.directory.ban("9", Some("griefing")).await.unwrap();
        let err = Draw.handle(&services, &draw("9", 0, 0, "red")).await.unwrap_err();
        assert!(matches!(err, CommandError::Banned(Some(ref r)) if r == "griefing"));
    }

    #[tokio::test]
    async fn test_redelivered_draw_is_charged_once() {
        let services = services();
        register(&services, "1").await;
        let delivery = draw("1", 2, 2, "red");

        Draw.handle(&services, &delivery).await.unwrap();
        let again = Draw.handle(&services, &delivery).await.unwrap();
        assert_eq!(again.data.unwrap()["total_draws"], 1);

        let info = services.rate_limiter.get_info("1", "draw", false).await.unwrap();
        assert_eq!(info.remaining, 9);

        // Even with the window full, a redelivery still answers with success.
        for i in 0..9 {
            Draw.handle(&services, &draw("1", i, 5, "blue")).await.unwrap();
        }
        let late = Draw.handle(&services, &delivery).await.unwrap();
        assert!(!late.is_error());
    }

    #[tokio::test]
    async fn test_eleventh_draw_is_rate_limited() {
        let services = services();
        register(&services, "1").await;
        for i in 0..10 {
            Draw.handle(&services, &draw("1", i, 0, "red")).await.unwrap();
        }
        let err = Draw.handle(&services, &draw("1", 10, 0, "red")).await.unwrap_err();
        let decision = match err {
            CommandError::RateLimited { decision, .. } => decision,
            other => panic!("expected rate limit, got {other:?}"),
        };
        assert_eq!(decision.max, 10);
        assert!(decision.reset_in >= 1);
        assert!(services.canvas.read_pixel(10, 0).await.unwrap().is_empty);
    }
}
