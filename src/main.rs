//! Garment Preview
//!
//! Renders one preview from configuration: loads the base garment and
//! shadow, optionally places a design file, writes the frame to disk and
//! optionally publishes it to blob storage.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use garment_preview::config::Settings;
use garment_preview::customizer::{
    ApplyOutcome, CachingLoader, Customizer, HttpImageLoader, ImageLoader,
};
use garment_preview::storage::{self, R2Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("garment_preview=info".parse()?)
        )
        .json()
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base = %settings.preview.base_source,
        "Starting garment-preview"
    );

    let http = HttpImageLoader::new(&settings.loader)?;
    let loader: Arc<dyn ImageLoader> = if settings.loader.cache {
        Arc::new(CachingLoader::new(http))
    } else {
        Arc::new(http)
    };

    let mut customizer = Customizer::new(loader, settings.preview.clone())?;

    let (base, _shadow) = customizer.load_assets().await?;
    if base != ApplyOutcome::Applied {
        let reason = customizer
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "base image was not applied".to_string());
        anyhow::bail!("Cannot render preview: {}", reason);
    }

    if let Some(path) = &settings.render.design {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read design {}", path.display()))?;
        customizer.select_file(&bytes)?;
        customizer.confirm_crop()?;
    }

    let encoded = customizer.export(settings.render.format)?;
    tokio::fs::write(&settings.render.output, &encoded)
        .await
        .with_context(|| format!("Failed to write {}", settings.render.output.display()))?;

    info!(
        output = %settings.render.output.display(),
        bytes = encoded.len(),
        "Preview written"
    );

    if settings.render.publish {
        let storage_settings = settings
            .storage
            .as_ref()
            .context("render.publish is set but [storage] is not configured")?;
        let store = R2Store::new(storage_settings)?;
        let frame = customizer.frame().context("No frame to publish")?;

        let stored = storage::publish_frame(&store, &frame, settings.render.format, store.key_prefix()).await?;

        info!(
            key = %stored.key,
            size = stored.size,
            public_url = stored.public_url.as_deref().unwrap_or(""),
            "Preview published"
        );
    }

    Ok(())
}
