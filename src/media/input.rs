//! User image inputs and multipart user-turn assembly.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::budget::{ImageBudget, ImageBudgeter, JPEG_MIME};
use crate::error::Result;
use crate::session::{Content, ContentPart};

/// An image attached to a user request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    /// Raw bytes with their MIME type
    Bytes { data: Vec<u8>, mime: String },
    /// Base64 payload, bare or as a `data:` URL
    Base64(String),
    /// Remote URL, forwarded to the backend as-is
    Url(String),
}

impl ImageInput {
    /// Read an image file, guessing the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        Ok(Self::Bytes {
            data,
            mime: guess_mime(path).to_string(),
        })
    }

    /// Classify a free-form string: `http(s)://` is a URL, anything else base64.
    pub fn from_reference(reference: &str) -> Self {
        let trimmed = reference.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Base64(trimmed.to_string())
        }
    }
}

/// MIME type for an image path; unknown extensions are treated as JPEG.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        _ => JPEG_MIME,
    }
}

/// Encode bytes as a `data:` URL.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Split a `data:<mime>;base64,<payload>` URL, or treat the input as a bare payload.
fn split_data_url(value: &str) -> (Option<&str>, &str) {
    if let Some(rest) = value.strip_prefix("data:") {
        if let Some((meta, payload)) = rest.split_once(',') {
            let mime = meta.strip_suffix(";base64").unwrap_or(meta);
            return (Some(mime).filter(|m| !m.is_empty()), payload);
        }
    }
    (None, value)
}

/// Build the content of a user turn: budgeted images first, then the text.
///
/// At most `budget.max_images` images are kept. Base64 input that does not
/// decode is forwarded untouched (wrapped as a JPEG `data:` URL when bare).
/// Image re-encoding is CPU bound; call this from a blocking context.
pub fn build_user_content(
    text: &str,
    images: &[ImageInput],
    budget: &ImageBudget,
    budgeter: &ImageBudgeter,
) -> Content {
    if images.is_empty() || budget.max_images == 0 {
        return Content::Text(text.trim().to_string());
    }

    if images.len() > budget.max_images {
        debug!(
            supplied = images.len(),
            kept = budget.max_images,
            "Dropping images beyond budget"
        );
    }

    let mut parts: Vec<ContentPart> = images
        .iter()
        .take(budget.max_images)
        .map(|image| ContentPart::image_url(image_url_for(image, budget, budgeter)))
        .collect();

    let text = text.trim();
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
    Content::Multipart(parts)
}

fn image_url_for(image: &ImageInput, budget: &ImageBudget, budgeter: &ImageBudgeter) -> String {
    match image {
        ImageInput::Url(url) => url.clone(),
        ImageInput::Bytes { data, mime } => {
            let fitted = budgeter.fit(data, mime, budget.max_megapixels, budget.max_bytes);
            data_url(&fitted.mime, &fitted.bytes)
        }
        ImageInput::Base64(encoded) => {
            let (mime, payload) = split_data_url(encoded.trim());
            match STANDARD.decode(payload.trim()) {
                Ok(data) => {
                    let mime = mime.unwrap_or(JPEG_MIME);
                    let fitted = budgeter.fit(&data, mime, budget.max_megapixels, budget.max_bytes);
                    data_url(&fitted.mime, &fitted.bytes)
                }
                Err(e) => {
                    warn!(error = %e, "Image payload is not valid base64, forwarding as-is");
                    if encoded.trim().starts_with("data:") {
                        encoded.trim().to_string()
                    } else {
                        format!("data:{};base64,{}", JPEG_MIME, encoded.trim())
                    }
                }
            }
        }
    }
}
