//! Blob key derivation
//!
//! Maps a media asset onto the object key it is stored under. Upload and
//! delete must agree on the key, so derivation is a pure function of the
//! asset's path, name and extension.

use crate::models::MediaAsset;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped in an encoded item name: everything that is unsafe in a
/// URL path segment or a file name.
const NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Escape an item name into a URL and filesystem safe token.
pub fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_ENCODE_SET).to_string()
}

/// Derive the canonical, lower-cased storage key for `asset`.
pub fn derive_key(asset: &MediaAsset, extension: &str) -> String {
    let file_name = format!("{}.{}", encode_name(&asset.name), extension);
    let path = asset.logical_path.trim_start_matches('/');

    let key = if asset.display_name.is_empty() {
        path.to_string()
    } else {
        path.replace(&asset.display_name, &file_name)
    };

    key.to_lowercase()
}
