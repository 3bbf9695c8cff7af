//! Read-only canvas commands. Not metered, not counted.

use async_trait::async_trait;
use serde_json::json;

use guidon_shared::color::{Color, COLOR_NAMES};
use guidon_shared::constants::{COLOR_INFO, COLOR_PALETTE};
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};

use super::{CommandError, CommandHandler, Services};

const COLOR_GROUPS: &[(&str, &[&str])] = &[
    ("Basics", &["red", "green", "blue", "yellow", "black", "white"]),
    ("Pastels", &["pink", "salmon", "coral", "violet", "turquoise", "khaki"]),
    ("Dark tones", &["navy", "teal", "maroon", "olive", "indigo", "crimson"]),
    ("Metallic", &["gold", "silver"]),
];

pub struct Colors;

#[async_trait]
impl CommandHandler for Colors {
    async fn handle(&self, _: &Services, _: &Interaction) -> Result<Reply, CommandError> {
        let mut embed = Embed::new(
            "Available Colors",
            format!(
                "You can use **{} named colors** or any **hex code** format `#RRGGBB`.",
                COLOR_NAMES.len()
            ),
            COLOR_PALETTE,
        );
        for (label, names) in COLOR_GROUPS {
            let list: Vec<String> = names.iter().map(|n| format!("`{n}`")).collect();
            embed = embed.field(*label, list.join(", "), false);
        }
        embed = embed
            .field(
                "Usage Examples",
                "```\n/draw x:10 y:10 color:red\n/draw x:10 y:10 color:#FFAA00\n```",
                false,
            )
            .footer("Tip: /draw x:<number> y:<number> color:<name or hex>");

        let palette: serde_json::Map<String, serde_json::Value> = COLOR_NAMES
            .iter()
            .map(|(name, hex)| (name.to_string(), json!(hex)))
            .collect();

        Ok(Reply::success(embed)
            .ephemeral()
            .with_data(json!({ "colors": palette })))
    }
}

/// Whole grid, for web clients that paint it themselves.
pub struct CanvasState;

#[async_trait]
impl CommandHandler for CanvasState {
    async fn handle(&self, services: &Services, _: &Interaction) -> Result<Reply, CommandError> {
        let grid = services.canvas.read_grid().await?;
        let stats = services.canvas.stats(false).await?;
        let size = services.canvas.size();

        let embed = Embed::new(
            "Canvas State",
            format!(
                "{size}x{size} canvas, **{}** pixels painted by **{}** contributors.",
                stats.total_pixels, stats.unique_contributors
            ),
            COLOR_INFO,
        );

        Ok(Reply::success(embed).with_data(json!({
            "canvas": { "size": size, "pixels": grid },
            "stats": stats,
        })))
    }
}

pub struct PixelLookup;

#[async_trait]
impl CommandHandler for PixelLookup {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let (Some(x), Some(y)) = (interaction.option_i64("x"), interaction.option_i64("y")) else {
            return Err(CommandError::InvalidInput(
                "Both `x` and `y` must be whole numbers.".to_string(),
            ));
        };
        let pixel = services.canvas.read_pixel(x, y).await?;

        let accent = Color::from_hex(&pixel.color)
            .map(|c| c.to_rgb())
            .unwrap_or(COLOR_INFO);
        let mut embed = Embed::new(
            "Pixel Information",
            format!("Details for pixel at ({x}, {y})"),
            accent,
        )
        .field("Coordinates", format!("**X:** {x} | **Y:** {y}"), true)
        .field("Color", format!("`{}`", pixel.color), true);

        if pixel.is_empty {
            embed = embed.field("Drawn by", "Nobody yet", true);
        } else {
            embed = embed
                .field("Drawn by", pixel.username.clone(), true)
                .field("Edit count", pixel.edit_count.to_string(), true);
            if let Some(at) = pixel.updated_at {
                embed = embed.field("Last updated", at.format("%Y-%m-%d %H:%M UTC").to_string(), true);
            }
        }

        Ok(Reply::success(embed).with_data(json!({ "pixel": pixel })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{interaction, services};
    use guidon_shared::types::OptionValue;

    fn at(x: i64, y: i64) -> Interaction {
        interaction(
            "pixel_info",
            "1",
            &[("x", OptionValue::Integer(x)), ("y", OptionValue::Integer(y))],
        )
    }

    #[tokio::test]
    async fn test_pixel_lookup() {
        let services = services();
        services.canvas.draw_pixel(2, 3, "#ABCDEF", "5", "eve").await.unwrap();

        let reply = PixelLookup.handle(&services, &at(2, 3)).await.unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data["pixel"]["color"], "#ABCDEF");
        assert_eq!(data["pixel"]["username"], "eve");

        let empty = PixelLookup.handle(&services, &at(0, 0)).await.unwrap();
        assert_eq!(empty.data.unwrap()["pixel"]["is_empty"], true);

        let err = PixelLookup.handle(&services, &at(0, 99)).await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_canvas_state_shape() {
        let services = services();
        services.canvas.draw_pixel(1, 0, "#000000", "5", "eve").await.unwrap();
        let reply = CanvasState
            .handle(&services, &interaction("canvas_state", "1", &[]))
            .await
            .unwrap();
        let data = reply.data.unwrap();
        assert_eq!(data["canvas"]["pixels"][0][1], "#000000");
        assert_eq!(data["stats"]["total_pixels"], 1);
    }

    #[tokio::test]
    async fn test_colors_lists_palette() {
        let services = services();
        let reply = Colors
            .handle(&services, &interaction("colors", "1", &[]))
            .await
            .unwrap();
        assert!(reply.ephemeral);
        assert_eq!(reply.data.unwrap()["colors"]["red"], "#FF0000");
    }
}
