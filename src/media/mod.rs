//! Attachment correlation, selection and encoding.

pub mod correlate;
pub mod encode;
pub mod select;

use serde::Serialize;
use std::path::Path;

pub use correlate::{correlate, Attachment};
pub use encode::{check_ffmpeg_available, EncodedMedium, MediaEncoder};
pub use select::select_media;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "3gp", "m4v", "mkv", "webm", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    /// Classify a file by its extension.
    pub fn from_filename(name: &str) -> Self {
        let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return MediaKind::Unsupported;
        };
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unsupported
        }
    }
}
