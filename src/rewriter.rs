//! Media URL rewriting
//!
//! Points generated media delivery URLs at the CDN origin instead of the
//! repository, with a revision token for cache busting.

use crate::key::derive_key;
use crate::models::{Config, MediaAsset};

/// Path segment that introduces a media item in repository delivery URLs.
pub const MEDIA_URL_MARKER: &str = "-/media/";

/// Database serving the administrative interface; its URLs are never rewritten.
pub const ADMIN_DATABASE: &str = "core";

/// Where a URL is being generated.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub site: &'a str,
    pub database: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct MediaUrlRewriter {
    origin_prefix: Option<String>,
    allowed_sites: Vec<String>,
}

impl MediaUrlRewriter {
    pub fn new(origin_prefix: Option<String>, allowed_sites: Vec<String>) -> Self {
        Self {
            origin_prefix: origin_prefix.filter(|p| !p.is_empty()),
            allowed_sites,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.origin_prefix.clone(), config.allowed_sites.clone())
    }

    /// An empty allow-list admits no site.
    pub fn is_site_allowed(&self, site: &str) -> bool {
        self.allowed_sites
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(site))
    }

    /// Rewrite `url`, generated for `asset`, to go through the CDN origin.
    ///
    /// The URL is returned unchanged for the administrative database, for
    /// sites outside the allow-list and when no origin prefix is configured.
    /// The origin prefix is joined to the remainder after the media marker
    /// as-is, so it should normally end with a slash.
    pub fn rewrite(&self, url: &str, asset: &MediaAsset, context: &RequestContext<'_>) -> String {
        if context.database.eq_ignore_ascii_case(ADMIN_DATABASE) || !self.is_site_allowed(context.site)
        {
            return url.to_string();
        }

        let Some(prefix) = &self.origin_prefix else {
            return url.to_string();
        };

        // ASCII lowering keeps byte offsets aligned with the original URL.
        let mut rewritten = match url.to_ascii_lowercase().rfind(MEDIA_URL_MARKER) {
            Some(position) => format!("{}{}", prefix, &url[position + MEDIA_URL_MARKER.len()..]),
            None => url.to_string(),
        };

        if let Some(query) = rewritten.find('?') {
            rewritten.truncate(query);
        }

        format!("{}?rv={}", rewritten, asset.revision)
    }

    /// Direct CDN URL of an uploaded asset.
    pub fn media_url(&self, asset: &MediaAsset, extension: &str) -> Option<String> {
        self.origin_prefix
            .as_ref()
            .map(|prefix| format!("{}{}?rv={}", prefix, derive_key(asset, extension), asset.revision))
    }
}
