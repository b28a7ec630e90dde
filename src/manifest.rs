//! Publish manifests
//!
//! A JSON description of one publish run: the items on the source and target
//! side, the target languages and the events the pipeline emitted. A loaded
//! manifest acts as the [`PublishHelper`] for replaying that run.

use crate::mime::detect_media_mime;
use crate::models::{ContentSource, Item, MediaAsset, PublishAction};
use crate::publisher::{PublishEvent, PublishHelper};
use crate::{Error, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Logical path in the media tree, ending in the display name.
    pub path: String,
    pub language: String,
    #[serde(default = "default_media")]
    pub media: bool,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub revision: String,
    /// Media content, relative to the manifest's directory.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_media() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEvent {
    pub item_id: String,
    pub action: PublishAction,
    /// Language of the version being published; defaults to the item's own.
    #[serde(default)]
    pub version_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishManifest {
    pub site: String,
    pub languages: Vec<String>,
    #[serde(default)]
    pub source: Vec<ManifestItem>,
    #[serde(default)]
    pub target: Vec<ManifestItem>,
    pub events: Vec<ManifestEvent>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl PublishManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&json, base_dir)
    }

    pub fn from_json(json: &str, base_dir: PathBuf) -> Result<Self> {
        let mut manifest: PublishManifest = serde_json::from_str(json)?;
        manifest.base_dir = base_dir;
        Ok(manifest)
    }

    /// The pipeline's notifications, with the published version resolved.
    pub fn events(&self) -> Vec<PublishEvent> {
        self.events
            .iter()
            .map(|event| {
                let language = event.version_language.clone().or_else(|| {
                    self.source
                        .iter()
                        .chain(self.target.iter())
                        .find(|entry| entry.id == event.item_id)
                        .map(|entry| entry.language.clone())
                });

                let version = language.and_then(|language| {
                    find(&self.source, &event.item_id, Some(language.as_str()))
                        .or_else(|| find(&self.target, &event.item_id, Some(language.as_str())))
                        .map(|entry| self.to_item(entry))
                });

                PublishEvent {
                    item_id: event.item_id.clone(),
                    action: event.action,
                    version_to_publish: version,
                    site: self.site.clone(),
                }
            })
            .collect()
    }

    fn to_item(&self, entry: &ManifestItem) -> Item {
        if !entry.media {
            return Item::new(&entry.id, &entry.name, &entry.language);
        }

        let file = entry.file.as_ref().map(|file| self.base_dir.join(file));
        let mime_type = match &entry.mime_type {
            Some(mime_type) => mime_type.clone(),
            None => sniff_mime(file.as_deref(), &entry.extension).to_string(),
        };

        let mut asset = MediaAsset::new(&entry.id, &entry.path, &entry.name)
            .with_display_name(entry.display_name.as_deref().unwrap_or(&entry.name))
            .with_extension(&entry.extension)
            .with_mime_type(mime_type)
            .with_language(&entry.language)
            .with_revision(&entry.revision);
        if let Some(file) = file {
            asset = asset.with_content(ContentSource::File(file));
        }

        Item::from_media(asset)
    }
}

fn find<'a>(entries: &'a [ManifestItem], id: &str, language: Option<&str>) -> Option<&'a ManifestItem> {
    entries.iter().find(|entry| {
        entry.id == id
            && language
                .map(|language| entry.language.eq_ignore_ascii_case(language))
                .unwrap_or(true)
    })
}

fn sniff_mime(path: Option<&Path>, extension: &str) -> &'static str {
    let mut head = [0u8; 16];
    let read = path
        .and_then(|path| std::fs::File::open(path).ok())
        .and_then(|mut file| file.read(&mut head).ok())
        .unwrap_or(0);
    detect_media_mime(&head[..read], extension)
}

impl PublishHelper for PublishManifest {
    fn source_item(&self, item_id: &str) -> Result<Option<Item>> {
        Ok(find(&self.source, item_id, None).map(|entry| self.to_item(entry)))
    }

    fn target_item(&self, item_id: &str) -> Result<Option<Item>> {
        Ok(find(&self.target, item_id, None).map(|entry| self.to_item(entry)))
    }

    fn target_item_in_language(&self, item_id: &str, language: &str) -> Result<Option<Item>> {
        if !self.languages.iter().any(|l| l.eq_ignore_ascii_case(language)) {
            return Err(Error::Classification(format!(
                "Language '{}' is not configured in the target store",
                language
            )));
        }
        Ok(find(&self.target, item_id, Some(language)).map(|entry| self.to_item(entry)))
    }

    fn target_languages(&self) -> Result<Vec<String>> {
        Ok(self.languages.clone())
    }
}
