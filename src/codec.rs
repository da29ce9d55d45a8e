//! Conversions between raw image bytes and the self-describing encoded form
//! (`data:<mime>;base64,<payload>`) that the session and frames carry around.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::error::{Error, Result};

/// Mime type assumed when an encoded image does not declare one.
pub const FALLBACK_MIME: &str = "image/png";

/// Self-describing image string, suitable for direct embedding in a UI.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage(String);

/// Raw bytes plus mime type recovered from an [`EncodedImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl EncodedImage {
    /// Wrap bytes with an explicit mime type.
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self(format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)))
    }

    /// Wrap a base64 payload that the caller already holds, e.g. a provider response part.
    pub fn from_base64(payload: &str, mime_type: &str) -> Self {
        Self(format!("data:{mime_type};base64,{payload}"))
    }

    /// Accept an existing encoded string verbatim. Bare base64 without a
    /// `data:` header is allowed and decodes with [`FALLBACK_MIME`].
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Declared mime type, if the header carries a well-formed one.
    pub fn declared_mime(&self) -> Option<&str> {
        let (header, _) = split_header(&self.0)?;
        let candidate = header.split(';').next()?;
        is_mime(candidate).then_some(candidate)
    }
}

// The payload can be megabytes long; keep logs readable.
impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime", &self.declared_mime().unwrap_or("<undeclared>"))
            .field("len", &self.0.len())
            .finish()
    }
}

/// Encode image bytes, sniffing the mime type from the content.
///
/// # Errors
/// [`Error::Decode`] when the input is empty or not a recognizable image.
pub fn encode_bytes(bytes: &[u8]) -> Result<EncodedImage> {
    encode_with_hint(bytes, None)
}

/// Read a local file and encode it.
pub fn encode_file(path: impl AsRef<Path>) -> Result<EncodedImage> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|err| Error::Decode(format!("unable to read {}: {err}", path.display())))?;
    encode_bytes(&bytes)
}

/// Fetch a remote image and encode it.
///
/// # Errors
/// [`Error::Fetch`] on network failure or a non-2xx status, [`Error::Decode`]
/// when the body is not an image.
pub async fn encode_from_url(client: &reqwest::Client, url: &str) -> Result<EncodedImage> {
    let fetch_err = |reason: String| Error::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| fetch_err(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_err(format!("HTTP {status}")));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
    let body = response
        .bytes()
        .await
        .map_err(|err| fetch_err(err.to_string()))?;
    debug!(url, bytes = body.len(), "fetched remote image");
    encode_with_hint(&body, content_type.as_deref())
}

/// Strip the header and return raw bytes plus mime type.
///
/// # Errors
/// [`Error::Decode`] when the payload is not valid base64 or is empty.
pub fn decode(image: &EncodedImage) -> Result<DecodedImage> {
    let raw = image.as_str();
    let payload = match split_header(raw) {
        Some((_, payload)) => payload,
        None => raw,
    };
    let mime_type = image.declared_mime().unwrap_or(FALLBACK_MIME).to_string();

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| Error::Decode(format!("invalid base64 payload: {err}")))?;
    if bytes.is_empty() {
        return Err(Error::Decode("empty image payload".to_string()));
    }
    Ok(DecodedImage { bytes, mime_type })
}

fn encode_with_hint(bytes: &[u8], hint: Option<&str>) -> Result<EncodedImage> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty image data".to_string()));
    }
    let mime_type = match image::guess_format(bytes) {
        Ok(format) => format.to_mime_type(),
        Err(_) => match hint {
            Some(mime) if mime.starts_with("image/") && is_mime(mime) => mime,
            _ => return Err(Error::Decode("unrecognized image format".to_string())),
        },
    };
    Ok(EncodedImage::from_bytes(bytes, mime_type))
}

/// Split `data:<header>,<payload>` into its two halves.
fn split_header(raw: &str) -> Option<(&str, &str)> {
    raw.strip_prefix("data:")?.split_once(',')
}

/// `type/subtype`, where type is alphanumeric and subtype also allows `-.+`.
fn is_mime(candidate: &str) -> bool {
    let Some((kind, subtype)) = candidate.split_once('/') else {
        return false;
    };
    !kind.is_empty()
        && kind.chars().all(|c| c.is_ascii_alphanumeric())
        && !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '+'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn sample(format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8 * 40, y as u8 * 90, 7, 255]));
        let mut out = Cursor::new(Vec::new());
        match format {
            ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(img)
                .to_rgb8()
                .write_to(&mut out, format)
                .unwrap(),
            _ => img.write_to(&mut out, format).unwrap(),
        }
        out.into_inner()
    }

    #[test]
    fn png_survives_encode_then_decode() {
        let bytes = sample(ImageFormat::Png);
        let encoded = encode_bytes(&bytes).unwrap();
        assert!(encoded.as_str().starts_with("data:image/png;base64,"));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.bytes, bytes);
        assert_eq!(decoded.mime_type, "image/png");
    }

    #[test]
    fn jpeg_keeps_its_declared_mime() {
        let bytes = sample(ImageFormat::Jpeg);
        let decoded = decode(&encode_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(decoded.bytes, bytes);
        assert_eq!(decoded.mime_type, "image/jpeg");
    }

    #[test]
    fn undeclared_mime_falls_back_to_png() {
        let encoded = EncodedImage::from_string(STANDARD.encode(b"\x89PNGfake"));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.mime_type, FALLBACK_MIME);
        assert_eq!(decoded.bytes, b"\x89PNGfake");

        let odd_header = EncodedImage::from_string(format!("data:;base64,{}", STANDARD.encode(b"abc")));
        assert_eq!(decode(&odd_header).unwrap().mime_type, FALLBACK_MIME);
    }

    #[test]
    fn gif_and_svg_style_mimes_are_recognized() {
        let gif = EncodedImage::from_base64("R0lG", "image/gif");
        assert_eq!(gif.declared_mime(), Some("image/gif"));
        let svg = EncodedImage::from_base64("PHN2Zz4=", "image/svg+xml");
        assert_eq!(svg.declared_mime(), Some("image/svg+xml"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(encode_bytes(b""), Err(Error::Decode(_))));
        assert!(matches!(encode_bytes(b"plain text, no image"), Err(Error::Decode(_))));
        let bad = EncodedImage::from_string("data:image/png;base64,@@@not-base64@@@");
        assert!(matches!(decode(&bad), Err(Error::Decode(_))));
        let empty = EncodedImage::from_string("data:image/png;base64,");
        assert!(matches!(decode(&empty), Err(Error::Decode(_))));
    }

    #[test]
    fn unreadable_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(encode_file(&missing), Err(Error::Decode(_))));

        let present = dir.path().join("hero.png");
        std::fs::write(&present, sample(ImageFormat::Png)).unwrap();
        assert_eq!(encode_file(&present).unwrap().declared_mime(), Some("image/png"));
    }

    #[test]
    fn debug_output_omits_payload() {
        let encoded = EncodedImage::from_bytes(&[1, 2, 3], "image/webp");
        let rendered = format!("{encoded:?}");
        assert!(rendered.contains("image/webp"));
        assert!(!rendered.contains("AQID"));
    }
}
