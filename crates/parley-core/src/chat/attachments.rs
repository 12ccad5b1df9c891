//! Attachment filtering for multimodal user turns.

use parley_types::chat::Attachment;

/// Extensions the completion endpoint accepts as image input.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "gif", "png"];

/// Whether `url` points at a supported image, ignoring any query string.
pub fn is_supported_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let Some((_, ext)) = path.rsplit_once('.') else {
        return false;
    };
    if ext.contains('/') {
        return false;
    }
    IMAGE_EXTENSIONS
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed))
}

/// URLs of the attachments that can be sent as image parts.
pub fn image_urls(attachments: &[Attachment]) -> Vec<String> {
    attachments
        .iter()
        .filter(|a| {
            let supported = is_supported_image(&a.url);
            if !supported {
                tracing::debug!(filename = %a.filename, "ignoring unsupported attachment");
            }
            supported
        })
        .map(|a| a.url.clone())
        .collect()
}
