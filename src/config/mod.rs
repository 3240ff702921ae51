//! Configuration module for the preview engine

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::path::PathBuf;

use crate::customizer::CustomizerOptions;
use crate::engine::ExportFormat;

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preview: CustomizerOptions,
    pub loader: LoaderSettings,
    pub storage: Option<StorageSettings>,
    pub render: RenderSettings,
}

/// Image fetching configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Keep decoded base/shadow images in memory between loads
    pub cache: bool,
}

/// Cloudflare R2 (S3-compatible) blob storage for exported previews
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub public_url_prefix: Option<String>,
    /// Override the endpoint (defaults to the R2 account endpoint)
    pub endpoint_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
}

/// One-shot render performed by the `garment-preview` binary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Optional design file, cropped with the seeded (full) crop box
    pub design: Option<PathBuf>,
    pub output: PathBuf,
    pub format: ExportFormat,
    /// Also upload the result to blob storage
    pub publish: bool,
}

fn default_key_prefix() -> String {
    "previews".to_string()
}

fn default_presign_expiry() -> u64 {
    3600
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with PREVIEW_)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local overrides (gitignored)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment variables (PREVIEW_PREVIEW__BASE_SOURCE, PREVIEW_RENDER__OUTPUT, etc.)
            .add_source(
                Environment::with_prefix("PREVIEW")
                    .separator("__")
                    .try_parsing(true)
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            preview: CustomizerOptions::default(),
            loader: LoaderSettings::default(),
            storage: None,
            render: RenderSettings::default(),
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            timeout_secs: 30,
            user_agent: format!("garment-preview/{}", env!("CARGO_PKG_VERSION")),
            cache: true,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            design: None,
            output: PathBuf::from("preview.png"),
            format: ExportFormat::Png,
            publish: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.loader.timeout_secs, 30);
        assert!(settings.storage.is_none());
        assert_eq!(settings.render.format, ExportFormat::Png);
        assert_eq!(settings.preview.crop_aspect_ratio, 0.8);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let toml = r##"
            [preview]
            base_source = "https://cdn.example.com/tshirt.png"
            color = "#112233"
            design_blend = "multiply"

            [preview.placement]
            y = 0.5

            [storage]
            account_id = "acct"
            access_key_id = "key"
            secret_access_key = "secret"
            bucket_name = "previews"
        "##;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.preview.base_source, "https://cdn.example.com/tshirt.png");
        assert_eq!(settings.preview.color.unwrap().to_string(), "#112233");
        assert_eq!(settings.preview.design_blend.as_str(), "multiply");
        assert_eq!(settings.preview.placement.y, 0.5);
        assert_eq!(settings.preview.placement.x, 0.5);
        assert_eq!(settings.preview.displacement_strength, 0.15);

        let storage = settings.storage.unwrap();
        assert_eq!(storage.key_prefix, "previews");
        assert_eq!(storage.presign_expiry_secs, 3600);
        assert_eq!(settings.loader.timeout_secs, 30);
    }
}
