//! Image Binding - Declared Images To Uploaded Files
//!
//! Images are declared in the payload as `{"id": ..., "filename": ...}` and
//! bound to uploads by original filename. Ids are unique across the whole
//! payload tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{ImageRequest, InjectedImage, RenderCallbacks};
use crate::schema::Payload;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("Duplicate image IDs detected: {}", .0.join(", "))]
    DuplicateIds(Vec<String>),
}

/// An uploaded file accompanying a render request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub original_filename: String,
    pub mime_type: String,
    #[serde(rename = "dataBase64", with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(original_filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// An image reference as declared in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataImage {
    pub id: String,
    pub filename: String,
}

/// Upload bytes bound to a declared image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundFile {
    pub data: Vec<u8>,
    /// Lowercase, with leading dot (`.png`).
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image: DataImage,
    pub file: Option<BoundFile>,
}

impl ResolvedImage {
    pub fn is_bound(&self) -> bool {
        self.file.is_some()
    }
}

/// Depth-first collection of every image declaration in the payload.
pub fn collect_images(payload: &Payload) -> Vec<DataImage> {
    let mut found = vec![];
    for value in payload.values() {
        collect_from(value, &mut found);
    }
    found
}

fn collect_from(value: &Value, found: &mut Vec<DataImage>) {
    match value {
        Value::Object(map) => {
            if let (Some(id), Some(filename)) = (map.get("id"), map.get("filename")) {
                found.push(DataImage {
                    id: as_text(id),
                    filename: as_text(filename),
                });
                return;
            }

            if let Some(fields) = map.get("fields").and_then(Value::as_object) {
                fields.values().for_each(|v| collect_from(v, found));
                return;
            }

            if let Some(items) = map.get("items").and_then(Value::as_array) {
                items.iter().for_each(|v| collect_from(v, found));
                return;
            }

            map.values().for_each(|v| collect_from(v, found));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_from(v, found)),
        _ => {}
    }
}

/// Non-string ids still take part in duplicate detection, keyed by their JSON text.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bind every declared image to its upload.
///
/// Unmatched declarations pass through unbound; rejecting them is the
/// validator's job.
pub fn resolve_images(payload: &Payload, attachments: &[Attachment]) -> Result<Vec<ResolvedImage>, ImageError> {
    let images = collect_images(payload);

    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = vec![];
    for image in &images {
        if !seen.insert(image.id.as_str()) && !duplicates.contains(&image.id) {
            duplicates.push(image.id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ImageError::DuplicateIds(duplicates));
    }

    Ok(images
        .into_iter()
        .map(|image| {
            let file = attachments
                .iter()
                .find(|a| a.original_filename == image.filename)
                .map(|a| BoundFile {
                    data: a.data.clone(),
                    extension: extension_of(&image.filename),
                });
            ResolvedImage { image, file }
        })
        .collect())
}

fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => ".jpg".to_string(),
    }
}

// --- Sizing ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePreset {
    Small,
    #[default]
    Medium,
    Large,
}

impl ImagePreset {
    /// Fixed dimensions in centimetres.
    pub fn size(&self) -> ImageSize {
        match self {
            Self::Small => ImageSize { width: 5.0, height: 5.0 },
            Self::Medium => ImageSize { width: 10.0, height: 10.0 },
            Self::Large => ImageSize { width: 15.0, height: 15.0 },
        }
    }
}

impl FromStr for ImagePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(format!("unknown image preset '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

/// Explicit dimensions win only when both are given, finite and non-zero.
pub fn resolve_size(width: Option<f64>, height: Option<f64>, preset: Option<ImagePreset>) -> ImageSize {
    match (width, height) {
        (Some(width), Some(height)) if usable(width) && usable(height) => ImageSize { width, height },
        _ => preset.unwrap_or_default().size(),
    }
}

fn usable(dimension: f64) -> bool {
    dimension.is_finite() && dimension != 0.0
}

// --- Format normalization ---

fn needs_normalization(extension: &str) -> bool {
    extension.eq_ignore_ascii_case(".gif")
}

/// Rewrite formats that convert poorly (GIF) to PNG. Falls back to the
/// original bytes when decoding or encoding fails.
pub fn normalize_format(data: &[u8], extension: &str) -> (Vec<u8>, String) {
    if !needs_normalization(extension) {
        return (data.to_vec(), extension.to_string());
    }

    let converted = image::load_from_memory_with_format(data, image::ImageFormat::Gif).and_then(|decoded| {
        let mut out = Cursor::new(Vec::new());
        decoded.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    });

    match converted {
        Ok(png) => (png, ".png".to_string()),
        Err(e) => {
            warn!(error = %e, "failed to convert GIF to PNG, using original bytes");
            (data.to_vec(), extension.to_string())
        }
    }
}

// --- Injection ---

/// Resolved images keyed by id, answering the renderer's image callbacks.
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    images: HashMap<String, ResolvedImage>,
}

impl ImageIndex {
    pub fn new(images: Vec<ResolvedImage>) -> Self {
        Self {
            images: images.into_iter().map(|r| (r.image.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ResolvedImage> {
        self.images.get(id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn inject(&self, request: &ImageRequest) -> Option<InjectedImage> {
        let Some(resolved) = self.images.get(&request.id) else {
            debug!(id = %request.id, "image id not declared in payload");
            return None;
        };
        let file = resolved.file.as_ref()?;

        let preset = request.preset.as_deref().and_then(|p| match p.parse::<ImagePreset>() {
            Ok(preset) => Some(preset),
            Err(e) => {
                debug!(id = %request.id, "{e}, using medium");
                None
            }
        });
        let size = resolve_size(request.width, request.height, preset);
        let (data, extension) = normalize_format(&file.data, &file.extension);

        Some(InjectedImage {
            width: size.width,
            height: size.height,
            data,
            extension,
            caption: request.caption.clone().unwrap_or_default(),
        })
    }
}

impl RenderCallbacks for ImageIndex {
    fn inject_image(&self, request: &ImageRequest) -> Option<InjectedImage> {
        self.inject(request)
    }
}
