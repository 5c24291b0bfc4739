use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use sha2::{Digest, Sha256};

const ACCEPTED_UPLOAD_MIMES: &[&str] = &["image/png", "image/jpeg"];

/// Base64 payload of an upload plus its content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub encoded: String,
    pub fingerprint: String,
}

impl EncodedImage {
    pub fn data_url(&self, mime: &str) -> String {
        format!("data:{mime};base64,{}", self.encoded)
    }
}

/// Encodes raw upload bytes. Absent or zero-length input yields `None`.
pub fn encode(raw: Option<&[u8]>) -> Option<EncodedImage> {
    let bytes = raw.filter(|bytes| !bytes.is_empty())?;
    Some(EncodedImage {
        encoded: BASE64.encode(bytes),
        fingerprint: fingerprint(bytes),
    })
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Image bytes as they arrive at the upload boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, mime: &str) -> Result<Self> {
        let mime = normalize_mime(mime);
        if !ACCEPTED_UPLOAD_MIMES.contains(&mime.as_str()) {
            bail!(
                "unsupported upload type '{mime}' (expected one of: {})",
                ACCEPTED_UPLOAD_MIMES.join(", ")
            );
        }
        Ok(Self { bytes, mime })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime = sniff_mime(&bytes)
            .or_else(|| mime_for_path(path))
            .with_context(|| format!("cannot determine image type of {}", path.display()))?;
        Self::new(bytes, mime)
    }

    pub fn encode(&self) -> Option<EncodedImage> {
        encode(Some(self.bytes.as_slice()))
    }
}

fn normalize_mime(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn encode_is_deterministic() {
        let first = encode(Some(&b"worksheet"[..])).unwrap();
        let second = encode(Some(&b"worksheet"[..])).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.encoded, BASE64.encode(b"worksheet"));
        assert_eq!(first.fingerprint.len(), 64);
    }

    #[test]
    fn different_bytes_have_different_fingerprints() {
        let a = encode(Some(&b"problem one"[..])).unwrap();
        let b = encode(Some(&b"problem two"[..])).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn absent_or_empty_input_is_none() {
        assert_eq!(encode(None), None);
        assert_eq!(encode(Some(Vec::<u8>::new().as_slice())), None);
    }

    #[test]
    fn data_url_embeds_mime_and_payload() {
        let encoded = encode(Some(&b"abc"[..])).unwrap();
        assert_eq!(encoded.data_url("image/png"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn upload_normalizes_jpg_and_rejects_other_types() {
        let upload = ImageUpload::new(vec![1, 2, 3], "IMAGE/JPG").unwrap();
        assert_eq!(upload.mime, "image/jpeg");
        assert!(ImageUpload::new(vec![1, 2, 3], "image/gif").is_err());
        assert!(ImageUpload::new(vec![1, 2, 3], "text/plain").is_err());
    }

    #[test]
    fn from_path_sniffs_bytes_before_extension() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let misnamed = temp.path().join("problem.jpg");
        fs::write(&misnamed, PNG_MAGIC)?;
        let upload = ImageUpload::from_path(&misnamed)?;
        assert_eq!(upload.mime, "image/png");
        assert_eq!(upload.bytes, PNG_MAGIC);
        Ok(())
    }

    #[test]
    fn from_path_falls_back_to_extension() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("scan.JPEG");
        fs::write(&path, b"not really an image")?;
        assert_eq!(ImageUpload::from_path(&path)?.mime, "image/jpeg");

        let unknown = temp.path().join("notes.txt");
        fs::write(&unknown, b"2+2")?;
        assert!(ImageUpload::from_path(&unknown).is_err());
        Ok(())
    }
}
