/// Detect the content type of a media file from its leading bytes, falling
/// back to the file extension.
pub fn detect_media_mime(head: &[u8], extension: &str) -> &'static str {
    match head {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, ..] => "image/png",
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => "image/webp",
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf",
        _ => mime_for_extension(extension),
    }
}

pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "css" => "text/css",
        "js" => "application/javascript",
        "txt" => "text/plain",
        other => {
            tracing::warn!(
                "Unrecognized media extension '{}', falling back to application/octet-stream",
                other
            );
            "application/octet-stream"
        }
    }
}
