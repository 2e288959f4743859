//! Fixture archives and a scripted summarization service.

#![allow(dead_code)]

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chat_digest::error::ServiceError;
use chat_digest::request::{SummaryRequest, SummaryResponse};
use chat_digest::summarizer::SummarizationService;
use image::{ImageFormat, Rgb, RgbImage};
use zip::write::SimpleFileOptions;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([20, 120, 200]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in members {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Returns a fixed summary and remembers every request it saw.
#[derive(Default)]
pub struct RecordingService {
    pub requests: Mutex<Vec<SummaryRequest>>,
}

#[async_trait]
impl SummarizationService for RecordingService {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(SummaryResponse {
            summary_text: "Alice greeted everyone and Bob shared a photo.".to_string(),
        })
    }
}

/// Never answers.
pub struct StalledService;

#[async_trait]
impl SummarizationService for StalledService {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn summarize(&self, _request: &SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        std::future::pending().await
    }
}

/// Always fails with the given HTTP status.
pub struct FailingService(pub u16);

#[async_trait]
impl SummarizationService for FailingService {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn summarize(&self, _request: &SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        Err(ServiceError::from_status("failing", self.0, "service said no"))
    }
}
