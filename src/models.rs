//! Data models and structures
//!
//! Defines the media asset and repository item model handed over by the
//! publish pipeline, plus the runtime configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Cache-control applied to uploaded objects (8 days).
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=691200";
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 5;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_REGION: &str = "us-east-1";

/// Lazily readable byte source behind a media asset.
#[derive(Debug, Clone)]
pub enum ContentSource {
    Memory(Vec<u8>),
    File(PathBuf),
}

impl ContentSource {
    /// Length of the content without reading the body.
    pub fn len(&self) -> std::io::Result<u64> {
        match self {
            ContentSource::Memory(data) => Ok(data.len() as u64),
            ContentSource::File(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    pub fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }

    pub async fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            ContentSource::Memory(data) => Ok(data.clone()),
            ContentSource::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// A binary asset held by the content repository.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub id: String,
    /// Slash separated path within the media tree, ending in the display name.
    pub logical_path: String,
    pub name: String,
    pub display_name: String,
    pub file_extension: String,
    pub mime_type: String,
    pub language: String,
    pub content: Option<ContentSource>,
    pub revision: String,
}

impl MediaAsset {
    pub fn new(id: impl Into<String>, logical_path: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            logical_path: logical_path.into(),
            display_name: name.clone(),
            name,
            file_extension: String::new(),
            mime_type: String::new(),
            language: "en".to_string(),
            content: None,
            revision: String::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_content(mut self, content: ContentSource) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// True when a content stream is attached and holds at least one byte.
    ///
    /// An unreadable stream counts as absent.
    pub fn has_content(&self) -> bool {
        match &self.content {
            Some(content) => match content.is_empty() {
                Ok(empty) => !empty,
                Err(e) => {
                    tracing::debug!("Media stream for {} is unreadable: {}", self.id, e);
                    false
                }
            },
            None => false,
        }
    }
}

/// A repository item as the publish pipeline resolves it.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub language: String,
    /// Present only for items living in the media tree.
    pub media: Option<MediaAsset>,
}

impl Item {
    pub fn new(id: impl Into<String>, name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            media: None,
        }
    }

    pub fn from_media(asset: MediaAsset) -> Self {
        Self {
            id: asset.id.clone(),
            name: asset.name.clone(),
            language: asset.language.clone(),
            media: Some(asset),
        }
    }

    pub fn as_media(&self) -> Option<&MediaAsset> {
        self.media.as_ref()
    }

    pub fn is_media_item(&self) -> bool {
        self.media.is_some()
    }
}

/// What happened to an item during a publish run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishAction {
    None,
    PublishSharedFields,
    PublishVersion,
    DeleteTargetItem,
}

// Configuration

/// Parsed object-store connection settings.
///
/// Format: `Endpoint=https://...;Region=us-east-1;AccessKeyId=...;SecretAccessKey=...;ForcePathStyle=true`.
/// Every key is optional except that the two credential keys come as a pair.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageConnection {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl fmt::Debug for StorageConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConnection")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl StorageConnection {
    pub fn parse(input: &str) -> Result<Self> {
        let mut connection = Self::default();

        for pair in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!("Malformed connection string segment: '{}'", pair))
            })?;
            let value = value.trim().to_string();

            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => connection.endpoint = Some(value),
                "region" => connection.region = Some(value),
                "accesskeyid" => connection.access_key_id = Some(value),
                "secretaccesskey" => connection.secret_access_key = Some(value),
                "forcepathstyle" => {
                    connection.force_path_style = value.parse().map_err(|_| {
                        Error::Config(format!("ForcePathStyle must be true or false, got '{}'", value))
                    })?
                }
                other => {
                    return Err(Error::Config(format!(
                        "Unknown connection string key: '{}'",
                        other
                    )))
                }
            }
        }

        if connection.access_key_id.is_some() != connection.secret_access_key.is_some() {
            return Err(Error::Config(
                "Connection string requires both AccessKeyId and SecretAccessKey when either is set"
                    .to_string(),
            ));
        }

        Ok(connection)
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub container_name: String,
    pub connection: StorageConnection,
    pub origin_prefix: Option<String>,
    pub allowed_sites: Vec<String>,
    pub cache_control: String,
    pub job_retention: Duration,
    pub max_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} not set", key)))
        };

        let job_retention_secs = match lookup("CDN_JOB_RETENTION_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("CDN_JOB_RETENTION_SECS must be a number of seconds, got '{}'", v))
            })?,
            None => DEFAULT_JOB_RETENTION_SECS,
        };

        let max_workers = match lookup("CDN_MAX_WORKERS") {
            Some(v) => match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "CDN_MAX_WORKERS must be a positive integer, got '{}'",
                        v
                    )))
                }
            },
            None => DEFAULT_MAX_WORKERS,
        };

        Ok(Self {
            enabled: lookup("CDN_SYNC_ENABLED")
                .map(|v| parse_enabled(&v))
                .unwrap_or(false),
            container_name: required("CDN_CONTAINER_NAME")?,
            connection: StorageConnection::parse(&required("CDN_STORAGE_CONNECTION_STRING")?)?,
            origin_prefix: lookup("CDN_ORIGIN_PREFIX").filter(|v| !v.trim().is_empty()),
            allowed_sites: lookup("CDN_SITES")
                .map(|v| parse_sites(&v))
                .unwrap_or_default(),
            cache_control: lookup("CDN_CACHE_CONTROL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CACHE_CONTROL.to_string()),
            job_retention: Duration::from_secs(job_retention_secs),
            max_workers,
        })
    }
}

/// Only a case-insensitive `yes` switches synchronization on.
pub fn parse_enabled(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes")
}

/// Split a comma- or pipe-delimited site list, dropping empty entries.
pub fn parse_sites(value: &str) -> Vec<String> {
    value
        .split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CONNECTION: &str = "Endpoint=http://localhost:9000;AccessKeyId=key;SecretAccessKey=secret";

    #[test]
    fn test_enabled_flag_is_case_insensitive_yes() {
        assert!(parse_enabled("yes"));
        assert!(parse_enabled("YES"));
        assert!(parse_enabled("Yes"));
        assert!(!parse_enabled("no"));
        assert!(!parse_enabled("true"));
        assert!(!parse_enabled(""));
        assert!(!parse_enabled(" yes"));
    }

    #[test]
    fn test_parse_sites_accepts_comma_and_pipe() {
        assert_eq!(parse_sites("website|shop, blog,,|"), vec!["website", "shop", "blog"]);
        assert!(parse_sites("").is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("CDN_CONTAINER_NAME", "media"),
            ("CDN_STORAGE_CONNECTION_STRING", CONNECTION),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.container_name, "media");
        assert_eq!(config.cache_control, DEFAULT_CACHE_CONTROL);
        assert_eq!(config.job_retention, Duration::from_secs(5));
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert!(config.origin_prefix.is_none());
        assert!(config.allowed_sites.is_empty());
    }

    #[test]
    fn test_config_reads_all_settings() {
        let config = Config::from_lookup(lookup_from(&[
            ("CDN_SYNC_ENABLED", "Yes"),
            ("CDN_CONTAINER_NAME", "media"),
            ("CDN_STORAGE_CONNECTION_STRING", CONNECTION),
            ("CDN_ORIGIN_PREFIX", "https://cdn.example.com/"),
            ("CDN_SITES", "website|shop"),
            ("CDN_CACHE_CONTROL", "public, max-age=60"),
            ("CDN_JOB_RETENTION_SECS", "3600"),
            ("CDN_MAX_WORKERS", "8"),
        ]))
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.origin_prefix.as_deref(), Some("https://cdn.example.com/"));
        assert_eq!(config.allowed_sites, vec!["website", "shop"]);
        assert_eq!(config.cache_control, "public, max-age=60");
        assert_eq!(config.job_retention, Duration::from_secs(3600));
        assert_eq!(config.max_workers, 8);
    }

    #[test]
    fn test_config_missing_container_fails_fast() {
        let err = Config::from_lookup(lookup_from(&[("CDN_STORAGE_CONNECTION_STRING", CONNECTION)]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("CDN_CONTAINER_NAME"));
    }

    #[test]
    fn test_config_rejects_zero_workers() {
        let err = Config::from_lookup(lookup_from(&[
            ("CDN_CONTAINER_NAME", "media"),
            ("CDN_STORAGE_CONNECTION_STRING", CONNECTION),
            ("CDN_MAX_WORKERS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_connection_string_parsing() {
        let connection = StorageConnection::parse(
            "Endpoint=https://nyc3.digitaloceanspaces.com; Region=nyc3;AccessKeyId=abc;SecretAccessKey=xyz;ForcePathStyle=true;",
        )
        .unwrap();

        assert_eq!(connection.endpoint.as_deref(), Some("https://nyc3.digitaloceanspaces.com"));
        assert_eq!(connection.region(), "nyc3");
        assert_eq!(connection.access_key_id.as_deref(), Some("abc"));
        assert!(connection.force_path_style);
        assert!(!format!("{:?}", connection).contains("xyz"));
    }

    #[test]
    fn test_connection_string_errors() {
        assert!(StorageConnection::parse("Endpoint").is_err());
        assert!(StorageConnection::parse("Bucket=media").is_err());
        assert!(StorageConnection::parse("AccessKeyId=abc").is_err());
        assert!(StorageConnection::parse("ForcePathStyle=maybe").is_err());

        let ambient = StorageConnection::parse("Region=eu-west-1").unwrap();
        assert!(ambient.access_key_id.is_none());
        assert_eq!(ambient.region(), "eu-west-1");
    }

    #[test]
    fn test_media_asset_content_checks() {
        let asset = MediaAsset::new("{1}", "/images/logo", "logo");
        assert!(!asset.has_content());

        let empty = asset.clone().with_content(ContentSource::Memory(Vec::new()));
        assert!(!empty.has_content());

        let missing = asset
            .clone()
            .with_content(ContentSource::File(PathBuf::from("/nonexistent/logo.png")));
        assert!(!missing.has_content());

        let full = asset.with_content(ContentSource::Memory(vec![1, 2, 3]));
        assert!(full.has_content());
    }

    #[test]
    fn test_item_media_detection() {
        let plain = Item::new("{2}", "Home", "en");
        assert!(!plain.is_media_item());

        let media = Item::from_media(MediaAsset::new("{1}", "/images/logo", "logo").with_language("de"));
        assert!(media.is_media_item());
        assert_eq!(media.language, "de");
        assert_eq!(media.as_media().unwrap().id, "{1}");
    }
}
