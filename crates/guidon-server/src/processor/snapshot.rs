use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use guidon_shared::constants::COLOR_SNAPSHOT;
use guidon_shared::interaction::Interaction;
use guidon_shared::reply::{Embed, Reply};

use super::{require_caller, CommandError, CommandHandler, Services};

pub struct Snapshot;

#[async_trait]
impl CommandHandler for Snapshot {
    async fn handle(&self, services: &Services, interaction: &Interaction) -> Result<Reply, CommandError> {
        let caller = require_caller(interaction)?;
        let user = services.registered_caller(caller).await?;
        services
            .consume_quota(&user, "snapshot", interaction.id.as_str())
            .await?;

        let record = services
            .canvas
            .snapshot(Some((caller.id.as_str(), caller.username.as_str())))
            .await?;

        if let Err(e) = services
            .directory
            .increment_usage(caller.id.as_str(), &caller.username, "snapshot", Some(interaction.id.as_str()))
            .await
        {
            warn!(
                correlation_id = %interaction.correlation_id,
                user_id = %caller.id,
                error = %e,
                "Usage increment failed"
            );
        }

        let size = services.canvas.size();
        let embed = Embed::new(
            "Canvas Snapshot Created",
            format!("Snapshot successfully captured by **{}**", caller.username),
            COLOR_SNAPSHOT,
        )
        .field(
            "Image Details",
            format!(
                "**Size:** {size}x{size}\n**Pixels painted:** {}\n**ID:** `{}`",
                record.pixel_count, record.snapshot_id
            ),
            false,
        )
        .field("Download", format!("[Open snapshot]({})", record.image_ref), false)
        .image(record.image_ref.clone());

        Ok(Reply::success(embed).with_data(json!({
            "snapshot_id": record.snapshot_id,
            "image_ref": record.image_ref,
            "pixel_count": record.pixel_count,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{interaction, register, services};

    #[tokio::test]
    async fn test_snapshot_counts_usage_not_draws() {
        let services = services();
        register(&services, "1").await;

        let reply = Snapshot
            .handle(&services, &interaction("snapshot", "1", &[]))
            .await
            .unwrap();
        let data = reply.data.unwrap();
        assert!(data["snapshot_id"].as_str().unwrap().starts_with("snapshot_"));

        let user = services.directory.get("1").await.unwrap().unwrap();
        assert_eq!(user.total_commands, 1);
        assert_eq!(user.total_draws, 0);
    }

    #[tokio::test]
    async fn test_snapshot_limit() {
        let services = services();
        register(&services, "1").await;
        for _ in 0..5 {
            Snapshot
                .handle(&services, &interaction("snapshot", "1", &[]))
                .await
                .unwrap();
        }
        let err = Snapshot
            .handle(&services, &interaction("snapshot", "1", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::RateLimited { .. }));
    }
}
