use bytes::Bytes;
use image::ImageReader;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

use crate::buffer::{BufferStore, Handle};
use crate::error::{Result, TransformError};
use crate::geometry::Size;

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

const KNOWN_TYPES: [(&str, MediaKind, &str); 12] = [
    ("mp4", MediaKind::Video, "video/mp4"),
    ("m4v", MediaKind::Video, "video/mp4"),
    ("mov", MediaKind::Video, "video/quicktime"),
    ("mkv", MediaKind::Video, "video/x-matroska"),
    ("webm", MediaKind::Video, "video/webm"),
    ("avi", MediaKind::Video, "video/x-msvideo"),
    ("png", MediaKind::Image, "image/png"),
    ("jpg", MediaKind::Image, "image/jpeg"),
    ("jpeg", MediaKind::Image, "image/jpeg"),
    ("webp", MediaKind::Image, "image/webp"),
    ("bmp", MediaKind::Image, "image/bmp"),
    ("gif", MediaKind::Image, "image/gif"),
];

/// Classify by extension first, then by declared MIME type.
/// Returns the kind, the canonical extension and MIME type.
pub fn classify(name: &str, mime: Option<&str>) -> Option<(MediaKind, &'static str, &'static str)> {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if let Some(ext) = ext {
        if let Some((e, kind, m)) = KNOWN_TYPES.iter().find(|(e, _, _)| *e == ext) {
            return Some((*kind, *e, *m));
        }
    }
    let mime = mime?.to_lowercase();
    KNOWN_TYPES
        .iter()
        .find(|(_, _, m)| *m == mime)
        .map(|(e, kind, m)| (*kind, *e, *m))
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    KNOWN_TYPES
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, _, m)| *m)
        .unwrap_or("application/octet-stream")
}

/// Natural dimensions of an encoded image, read from its header only.
pub fn probe_image(bytes: &[u8]) -> Option<Size> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(Size::new(width, height))
}

/// What the engine reports about an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub fps: Option<f64>,
}

// ============================================================================
// MediaAsset
// ============================================================================

/// A user-selected file. Owns the display handle of its bytes.
#[derive(Debug)]
pub struct MediaAsset {
    name: String,
    kind: MediaKind,
    extension: &'static str,
    mime: &'static str,
    natural: Option<Size>,
    duration: Option<f64>,
    size_bytes: usize,
    handle: Handle,
}

impl MediaAsset {
    pub fn open(store: &BufferStore, name: &str, mime: Option<&str>, bytes: impl Into<Bytes>) -> Result<Self> {
        let (kind, extension, mime) = classify(name, mime)
            .ok_or_else(|| TransformError::InvalidSpec(format!("unsupported file type: {}", name)))?;
        let bytes = bytes.into();
        let natural = match kind {
            MediaKind::Image => {
                let size = probe_image(&bytes);
                if size.is_none() {
                    warn!("could not read image header of {}", name);
                }
                size
            }
            MediaKind::Video => None,
        };
        info!("opened {} ({:?}, {} bytes)", name, kind, bytes.len());

        Ok(Self {
            name: name.to_string(),
            kind,
            extension,
            mime,
            natural,
            duration: None,
            size_bytes: bytes.len(),
            handle: store.register(bytes),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn natural(&self) -> Option<Size> {
        self.natural
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn set_natural(&mut self, size: Size) {
        self.natural = Some(size).filter(|s| !s.is_empty());
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.duration = Some(seconds).filter(|d| d.is_finite() && *d > 0.0);
    }

    pub fn apply_probe(&mut self, probe: &MediaInfo) {
        if let (Some(w), Some(h)) = (probe.width, probe.height) {
            self.set_natural(Size::new(w, h));
        }
        if let Some(d) = probe.duration_seconds {
            self.set_duration(d);
        }
    }

    pub fn bytes(&self, store: &BufferStore) -> Result<Bytes> {
        store.get(&self.handle)
    }

    pub fn discard(self, store: &BufferStore) {
        store.revoke(self.handle);
    }
}

// ============================================================================
// OutputArtifact
// ============================================================================

#[derive(Debug)]
pub struct OutputArtifact {
    pub name: String,
    pub mime: &'static str,
    pub size_bytes: usize,
    pub handle: Handle,
}

impl OutputArtifact {
    pub fn new(store: &BufferStore, name: String, mime: &'static str, bytes: Bytes) -> Self {
        Self {
            name,
            mime,
            size_bytes: bytes.len(),
            handle: store.register(bytes),
        }
    }

    pub fn bytes(&self, store: &BufferStore) -> Result<Bytes> {
        store.get(&self.handle)
    }

    pub fn discard(self, store: &BufferStore) {
        store.revoke(self.handle);
    }
}

/// `<strategy>-<originalStem>.<ext>`
pub fn artifact_name(strategy: &str, original: &str, ext: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    format!("{}-{}.{}", strategy, stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_extension_is_case_insensitive() {
        let (kind, ext, mime) = classify("Holiday.MOV", None).unwrap();
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(ext, "mov");
        assert_eq!(mime, "video/quicktime");
    }

    #[test]
    fn classify_falls_back_to_mime() {
        let (kind, ext, _) = classify("upload", Some("image/png")).unwrap();
        assert_eq!(kind, MediaKind::Image);
        assert_eq!(ext, "png");
        assert!(classify("notes.txt", Some("text/plain")).is_none());
    }

    #[test]
    fn image_dimensions_come_from_header() {
        let img = image::RgbImage::new(7, 5);
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();

        let store = BufferStore::new();
        let asset = MediaAsset::open(&store, "dot.png", None, png).unwrap();
        assert_eq!(asset.natural(), Some(Size::new(7, 5)));
        asset.discard(&store);
        assert_eq!(store.stats().live, 0);
    }

    #[test]
    fn artifact_name_uses_strategy_prefix() {
        assert_eq!(artifact_name("cropped", "clip.final.mov", "mp4"), "cropped-clip.final.mp4");
        assert_eq!(artifact_name("fit", "", "png"), "fit-output.png");
    }

    #[test]
    fn zero_probe_values_are_not_natural_sizes() {
        let store = BufferStore::new();
        let mut asset = MediaAsset::open(&store, "a.mp4", None, vec![0u8; 8]).unwrap();
        asset.apply_probe(&MediaInfo { width: Some(0), height: Some(0), duration_seconds: Some(f64::NAN), fps: None });
        assert_eq!(asset.natural(), None);
        assert_eq!(asset.duration(), None);
    }
}
