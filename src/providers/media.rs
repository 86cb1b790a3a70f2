//! Image payloads: format detection, MIME mapping and base64 encoding.
//!
//! Vision endpoints (OpenAI, Qwen, Anthropic, Gemini, Ollama) all accept the
//! page raster inline in the JSON request body as standard base64, either
//! bare or wrapped in a `data:` URI. Page images arrive already rendered, so
//! nothing here decodes pixels; the `image` crate is only asked to recognise
//! the format from magic bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// MIME type used when a vendor does not accept the given format.
pub const DEFAULT_MIME: &str = "image/png";

/// Raster formats accepted by `vision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Parse a format name (`png`, `jpg`, `jpeg`, `gif`, `webp`).
    ///
    /// Never fails: unknown names fall back to PNG.
    pub fn from_name(name: &str) -> Self {
        match name.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => ImageFormat::Png,
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            "gif" => ImageFormat::Gif,
            "webp" => ImageFormat::Webp,
            other => {
                debug!("Unknown image format '{}', assuming png", other);
                ImageFormat::Png
            }
        }
    }

    /// Detect the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match ::image::guess_format(bytes).ok()? {
            ::image::ImageFormat::Png => Some(ImageFormat::Png),
            ::image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            ::image::ImageFormat::Gif => Some(ImageFormat::Gif),
            ::image::ImageFormat::WebP => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// MIME type if `supported` contains this format, else [`DEFAULT_MIME`].
    pub fn mime_type_within(self, supported: &[ImageFormat]) -> &'static str {
        if supported.contains(&self) {
            self.mime_type()
        } else {
            DEFAULT_MIME
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Standard base64 of the raw image bytes.
pub fn encode_base64(bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image: {} bytes → {} bytes base64", bytes.len(), b64.len());
    b64
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data.trim())
}

/// `data:{mime};base64,{payload}` URI as used by OpenAI-style image parts.
pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, encode_base64(bytes))
}

/// Split a base64 data URI back into its MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    let bytes = decode_base64(payload).ok()?;
    Some((mime.to_string(), bytes))
}
