//! End-to-end run: extract, parse, correlate, window, encode, assemble and
//! optionally summarize.
//!
//! Blocking work runs on the blocking pool; cancellation is observed between
//! steps and while the service call is in flight. The extraction directory
//! lives inside the run and is gone once `run` returns, on every path.

pub mod job;
pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::ArchiveExtractor;
use crate::config::{ArchiveConfig, Config, MediaConfig, ParserConfig, SummaryConfig};
use crate::error::{ParseError, ParseWarning, PipelineError};
use crate::media::{correlate, select_media, Attachment, EncodedMedium, MediaEncoder};
use crate::request::{assemble, SummaryRequest, SummaryResponse};
use crate::summarizer::SummarizationService;
use crate::transcript::{read_transcript, TranscriptParser};
use crate::window::{select_window, WindowAnchor, WindowDuration};

pub use job::{JobPhase, JobResult, JobRunner, JobStatus, JobStatusHandle};
pub use progress::{ProgressReporter, RunStage};

/// Per-run knobs; everything else comes from [`Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub archive_path: PathBuf,
    pub verbosity: f32,
    pub window: WindowDuration,
    pub anchor: WindowAnchor,
    pub include_media: bool,
    pub max_media_count: usize,
    /// Reference time for [`WindowAnchor::Now`]
    pub now: NaiveDateTime,
}

impl RunOptions {
    pub fn from_config(archive_path: PathBuf, summary: &SummaryConfig) -> Self {
        Self {
            archive_path,
            verbosity: summary.verbosity,
            window: summary.window,
            anchor: summary.anchor,
            include_media: summary.include_media,
            max_media_count: summary.max_media_count,
            now: Local::now().naive_local(),
        }
    }
}

/// What a run found, independent of whether a summary was requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub transcript_member: String,
    pub timestamp_format: String,
    pub total_messages: usize,
    pub window_messages: usize,
    pub cutoff: Option<NaiveDateTime>,
    pub first_in_window: Option<NaiveDateTime>,
    pub last_message: Option<NaiveDateTime>,
    pub attachment_refs: usize,
    pub unresolved_refs: usize,
    pub media: Vec<EncodedMedium>,
    pub warnings: Vec<ParseWarning>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The chat parsed but nothing falls inside the selected window.
    WindowEmpty { report: RunReport },
    /// Request assembled; no service was configured for this run.
    Prepared {
        request: SummaryRequest,
        report: RunReport,
    },
    Summarized {
        summary: SummaryResponse,
        report: RunReport,
    },
}

impl PipelineOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            PipelineOutcome::WindowEmpty { report }
            | PipelineOutcome::Prepared { report, .. }
            | PipelineOutcome::Summarized { report, .. } => report,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineOutcome::WindowEmpty { .. } => "window_empty",
            PipelineOutcome::Prepared { .. } => "prepared",
            PipelineOutcome::Summarized { .. } => "summarized",
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    archive: ArchiveConfig,
    parser: ParserConfig,
    media: MediaConfig,
    service: Option<Arc<dyn SummarizationService>>,
}

impl Pipeline {
    pub fn new(config: &Config, service: Option<Arc<dyn SummarizationService>>) -> Self {
        Self {
            archive: config.archive.clone(),
            parser: config.parser.clone(),
            media: config.media.clone(),
            service,
        }
    }

    pub async fn run(
        &self,
        options: RunOptions,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        progress.set(RunStage::Extracting);
        let extractor = ArchiveExtractor::new(&self.archive);
        let archive_path = options.archive_path.clone();
        let archive = spawn_blocking(move || extractor.extract(&archive_path)).await??;
        report.transcript_member = archive.transcript.name.clone();
        report.warnings.extend(archive.warnings.iter().cloned());
        checkpoint(&cancel, "extraction")?;

        progress.set(RunStage::Parsing);
        let parser =
            TranscriptParser::new(self.parser.format_sample_lines).map_err(ParseError::from)?;
        let transcript_path = archive.transcript.path.clone();
        let transcript =
            spawn_blocking(move || read_transcript(&transcript_path, &parser)).await??;
        report.timestamp_format = transcript.format.to_string();
        report.total_messages = transcript.messages.len();
        report.last_message = transcript.messages.last().map(|m| m.timestamp);
        report.warnings.extend(transcript.warnings.iter().cloned());
        checkpoint(&cancel, "parsing")?;

        progress.set(RunStage::Selecting);
        let (attachments, correlate_warnings) = correlate(&transcript.messages, &archive.members);
        report.attachment_refs = attachments.len();
        report.unresolved_refs = correlate_warnings.len();
        report.warnings.extend(correlate_warnings);

        let window = select_window(
            &transcript.messages,
            options.window,
            options.anchor,
            options.now,
        );
        report.window_messages = window.len();
        report.cutoff = window.cutoff;
        report.first_in_window = window.messages.first().map(|m| m.timestamp);
        info!(
            "Window {} ({:?} anchor) keeps {}/{} messages",
            options.window,
            options.anchor,
            window.len(),
            transcript.messages.len()
        );

        if window.is_empty() {
            report.elapsed_ms = started.elapsed().as_millis();
            return Ok(PipelineOutcome::WindowEmpty { report });
        }

        let selected: Vec<Attachment> = select_media(
            &attachments,
            &window,
            options.include_media,
            options.max_media_count,
        )
        .into_iter()
        .cloned()
        .collect();
        debug!("Selected {} media for encoding", selected.len());

        let (encoded, media_warnings) = if selected.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let encoder = MediaEncoder::new(&self.media);
            let scratch = archive
                .scratch_dir()
                .map_err(|e| PipelineError::Media(format!("scratch directory: {e}")))?;
            let reporter = progress.clone();
            progress.set(RunStage::Encoding {
                done: 0,
                total: selected.len(),
            });
            spawn_blocking(move || {
                let refs: Vec<&Attachment> = selected.iter().collect();
                encoder.encode_all(&refs, &scratch, |done, total| {
                    reporter.set(RunStage::Encoding { done, total })
                })
            })
            .await?
        };
        report.warnings.extend(media_warnings);
        checkpoint(&cancel, "media encoding")?;

        let request = assemble(window.messages, &encoded, options.verbosity);
        report.media = encoded;

        // Everything needed from disk is in memory now.
        if let Err(err) = archive.close() {
            warn!("Failed to remove extraction directory: {}", err);
        }

        let Some(service) = self.service.as_ref() else {
            report.elapsed_ms = started.elapsed().as_millis();
            return Ok(PipelineOutcome::Prepared { request, report });
        };

        progress.set(RunStage::Summarizing);
        info!(
            "Requesting {} summary from {} with {} media",
            request.verbosity_hint.label.as_str(),
            service.name(),
            request.media.len()
        );
        let summary = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Run cancelled while waiting for {}", service.name());
                return Err(PipelineError::Cancelled);
            }
            result = service.summarize(&request) => result?,
        };

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            "Summary received: {} chars in {}ms",
            summary.summary_text.len(),
            report.elapsed_ms
        );
        Ok(PipelineOutcome::Summarized { summary, report })
    }
}

fn checkpoint(cancel: &CancellationToken, step: &str) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        info!("Run cancelled after {}", step);
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}
