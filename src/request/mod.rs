//! Request assembly: window text, encoded media and verbosity folded into
//! the payload handed to a summarization service.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::media::EncodedMedium;
use crate::transcript::Message;

const MIN_WORDS: f32 = 80.0;
const MAX_WORDS: f32 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbosityLabel {
    Brief,
    Balanced,
    Detailed,
}

impl VerbosityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerbosityLabel::Brief => "brief",
            VerbosityLabel::Balanced => "balanced",
            VerbosityLabel::Detailed => "detailed",
        }
    }
}

/// Position on the brief..detailed scale plus what it means in words.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerbosityHint {
    pub level: f32,
    pub label: VerbosityLabel,
    pub target_words: u32,
}

impl VerbosityHint {
    pub fn new(level: f32) -> Self {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        let label = if level < 0.34 {
            VerbosityLabel::Brief
        } else if level < 0.67 {
            VerbosityLabel::Balanced
        } else {
            VerbosityLabel::Detailed
        };
        let target_words = (MIN_WORDS + (MAX_WORDS - MIN_WORDS) * level).round() as u32;
        Self {
            level,
            label,
            target_words,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaPart {
    pub mime_type: String,
    #[serde(skip_serializing)]
    pub base64_payload: String,
}

/// Everything a [`crate::summarizer::SummarizationService`] needs for one call.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub prompt_text: String,
    pub verbosity_hint: VerbosityHint,
    pub media: Vec<MediaPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary_text: String,
}

/// One line per message, continuation lines kept underneath.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let stamp = message.timestamp.format("%Y-%m-%d %H:%M");
        let _ = match (&message.sender, message.is_system) {
            (Some(sender), false) => write!(out, "[{stamp}] {sender}:"),
            _ => write!(out, "[{stamp}] [notice]"),
        };
        if !message.body.is_empty() {
            out.push(' ');
            out.push_str(&message.body);
        }
        for name in &message.attachment_refs {
            let _ = write!(out, " [attachment: {name}]");
        }
        out.push('\n');
    }
    out
}

pub fn build_prompt(transcript: &str, hint: &VerbosityHint, media_count: usize) -> String {
    let mut prompt = format!(
        "Please provide a {} summary of the following group chat conversation. \
         Write an overview paragraph of about {} words, followed by key bullet points.",
        hint.label.as_str(),
        hint.target_words
    );

    if media_count > 0 {
        let _ = write!(
            prompt,
            " {media_count} image(s) from the conversation are attached, most recent first. \
             In addition to the text, describe the content and context of the images and \
             integrate those descriptions into the overall summary."
        );
    }

    prompt.push_str("\n\n--- CHAT LOG ---\n");
    prompt.push_str(transcript);
    if !transcript.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("--- END CHAT LOG ---\n");
    prompt
}

/// Combine window messages and encoded media into a request. Performs no I/O.
pub fn assemble(messages: &[Message], media: &[EncodedMedium], verbosity: f32) -> SummaryRequest {
    let hint = VerbosityHint::new(verbosity);
    let transcript = render_transcript(messages);

    SummaryRequest {
        prompt_text: build_prompt(&transcript, &hint, media.len()),
        verbosity_hint: hint,
        media: media
            .iter()
            .map(|m| MediaPart {
                mime_type: m.mime_type.clone(),
                base64_payload: m.base64_payload.clone(),
            })
            .collect(),
    }
}
