//! Still-image encoding for selected attachments.
//!
//! Images are validated by decoding them and are sent untouched when they
//! already fit the bounds. Everything else is downscaled and re-encoded as
//! JPEG. Videos contribute one frame, extracted with ffmpeg.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Attachment, MediaKind};
use crate::config::MediaConfig;
use crate::error::{MediaError, ParseWarning};

const JPEG_QUALITY: u8 = 85;
const MIN_DIMENSION: u32 = 64;
const MAX_SHRINK_ATTEMPTS: usize = 5;
/// Formats every supported summarization service accepts verbatim.
const PASSTHROUGH_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
];

/// The unit actually transmitted to the summarization service.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedMedium {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(skip_serializing)]
    pub base64_payload: String,
    /// Filename of the attachment this medium was produced from
    pub source: String,
    pub encoded_bytes: usize,
}

pub struct MediaEncoder {
    max_dimension: u32,
    max_bytes: u64,
    ffmpeg: String,
    ffprobe: String,
}

impl MediaEncoder {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            max_dimension: config.max_dimension.max(MIN_DIMENSION),
            max_bytes: config.max_bytes,
            ffmpeg: config
                .ffmpeg_path
                .clone()
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe: config
                .ffprobe_path
                .clone()
                .unwrap_or_else(|| "ffprobe".to_string()),
        }
    }

    /// Encode every attachment, skipping failures with a warning. `progress`
    /// receives `(done, total)` after each medium.
    pub fn encode_all<F>(
        &self,
        selected: &[&Attachment],
        scratch: &Path,
        mut progress: F,
    ) -> (Vec<EncodedMedium>, Vec<ParseWarning>)
    where
        F: FnMut(usize, usize),
    {
        let total = selected.len();
        let mut encoded = Vec::with_capacity(total);
        let mut warnings = Vec::new();

        for (index, attachment) in selected.iter().enumerate() {
            match self.encode(attachment, scratch, index) {
                Ok(medium) => {
                    debug!(
                        "Encoded {} as {} ({} bytes)",
                        medium.source, medium.mime_type, medium.encoded_bytes
                    );
                    encoded.push(medium);
                }
                Err(err) => {
                    let warning = ParseWarning::UndecodableMedia {
                        filename: attachment.filename.clone(),
                        reason: err.to_string(),
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
            progress(index + 1, total);
        }

        info!("Encoded {}/{} selected media", encoded.len(), total);
        (encoded, warnings)
    }

    pub fn encode(
        &self,
        attachment: &Attachment,
        scratch: &Path,
        index: usize,
    ) -> Result<EncodedMedium, MediaError> {
        let path = attachment
            .resolved_path
            .as_deref()
            .ok_or(MediaError::Missing)?;

        let (mime_type, bytes) = match attachment.kind {
            MediaKind::Image => self.encode_image(path)?,
            MediaKind::Video => {
                let frame = self.extract_frame(path, scratch, index)?;
                let result = self.encode_image(&frame);
                let _ = std::fs::remove_file(&frame);
                result?
            }
            MediaKind::Unsupported => return Err(MediaError::Unsupported),
        };

        Ok(EncodedMedium {
            kind: attachment.kind,
            mime_type: mime_type.to_string(),
            encoded_bytes: bytes.len(),
            base64_payload: STANDARD.encode(&bytes),
            source: attachment.filename.clone(),
        })
    }

    /// Decode the file and return a payload that respects the bounds.
    pub fn encode_image(&self, path: &Path) -> Result<(&'static str, Vec<u8>), MediaError> {
        let bytes = std::fs::read(path)?;
        let reader = ImageReader::new(Cursor::new(&bytes)).with_guessed_format()?;
        let format = reader.format();
        let image = reader.decode()?;

        let fits = image.width().max(image.height()) <= self.max_dimension
            && bytes.len() as u64 <= self.max_bytes;
        if let Some(format) = format.filter(|f| PASSTHROUGH_FORMATS.contains(f)) {
            if fits {
                return Ok((format.to_mime_type(), bytes));
            }
        }

        self.shrink_to_jpeg(&image).map(|jpeg| ("image/jpeg", jpeg))
    }

    fn shrink_to_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>, MediaError> {
        let mut bound = self.max_dimension;
        for _ in 0..MAX_SHRINK_ATTEMPTS {
            let scaled = if image.width().max(image.height()) > bound {
                image.resize(bound, bound, FilterType::Lanczos3)
            } else {
                image.clone()
            };

            let mut buffer = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            scaled.to_rgb8().write_with_encoder(encoder)?;

            if buffer.len() as u64 <= self.max_bytes {
                return Ok(buffer);
            }
            debug!(
                "JPEG at {}px is {} bytes, above {}; halving",
                bound,
                buffer.len(),
                self.max_bytes
            );
            bound /= 2;
            if bound < MIN_DIMENSION {
                break;
            }
        }
        Err(MediaError::TooLarge {
            max_bytes: self.max_bytes,
        })
    }

    /// Pull one frame out of `video`: the temporal midpoint when the duration
    /// is known, otherwise the first decodable frame.
    fn extract_frame(&self, video: &Path, scratch: &Path, index: usize) -> Result<PathBuf, MediaError> {
        which::which(&self.ffmpeg).map_err(|_| MediaError::ToolMissing(self.ffmpeg.clone()))?;

        let output = scratch.join(format!("frame-{index}.jpg"));
        let midpoint = self.probe_duration(video).map(|d| d / 2.0);

        if let Some(seek) = midpoint {
            match self.run_ffmpeg(video, &output, Some(seek)) {
                Ok(()) => return Ok(output),
                Err(err) => debug!("Midpoint frame failed for {}: {}", video.display(), err),
            }
        }

        self.run_ffmpeg(video, &output, None)?;
        Ok(output)
    }

    fn probe_duration(&self, video: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(video)
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    fn run_ffmpeg(&self, video: &Path, output: &Path, seek: Option<f64>) -> Result<(), MediaError> {
        let mut command = Command::new(&self.ffmpeg);
        command.args(["-v", "error"]);
        // -ss before -i: fast input seek
        if let Some(seconds) = seek {
            command.args(["-ss", &format!("{seconds:.3}")]);
        }
        let result = command
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1"])
            .args(["-q:v", "2"])
            .arg("-y")
            .arg(output)
            .output()
            .map_err(|e| MediaError::Frame(format!("failed to run {}: {e}", self.ffmpeg)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MediaError::Frame(stderr.trim().to_string()));
        }

        // ffmpeg exits cleanly without writing anything when seeking past the end
        match std::fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::Frame("ffmpeg produced no frame".to_string())),
        }
    }
}

/// Check that the configured ffmpeg binary runs.
pub fn check_ffmpeg_available(config: &MediaConfig) -> Result<(), MediaError> {
    let ffmpeg = config.ffmpeg_path.as_deref().unwrap_or("ffmpeg");
    let ok = Command::new(ffmpeg)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(MediaError::ToolMissing(ffmpeg.to_string()))
    }
}
