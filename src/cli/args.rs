use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::SummaryConfig;
use crate::window::{WindowAnchor, WindowDuration};

pub const DEFAULT_PORT: u16 = 3747;

#[derive(Parser, Debug)]
#[command(name = "chat-digest")]
#[command(about = "Summarize exported chat archives together with their recent media", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Summarize an exported chat archive
    Summarize(SummarizeCliArgs),
    /// Parse an archive and report what would be sent, without calling a service
    Inspect(InspectCliArgs),
    /// Show configuration or manage stored API keys
    Config(ConfigCliArgs),
    /// Run the local HTTP API
    Serve(ServeCliArgs),
    /// Print version information
    Version,
}

/// Options shared by every command that runs the pipeline.
#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Exported chat archive (.zip or .tar.gz)
    pub archive: PathBuf,
    /// Only consider messages from this recent period
    #[arg(short, long, value_enum)]
    pub window: Option<WindowDuration>,
    /// Measure the window from the last message or from the current time
    #[arg(long, value_enum)]
    pub anchor: Option<WindowAnchor>,
    /// 0.0 = brief, 1.0 = detailed
    #[arg(long)]
    pub verbosity: Option<f32>,
    /// Maximum number of images/video frames to attach
    #[arg(long)]
    pub max_media: Option<usize>,
    /// Send text only
    #[arg(long)]
    pub no_media: bool,
}

impl RunArgs {
    /// Fold the flags over the configured defaults.
    pub fn apply(&self, summary: &mut SummaryConfig) {
        if let Some(window) = self.window {
            summary.window = window;
        }
        if let Some(anchor) = self.anchor {
            summary.anchor = anchor;
        }
        if let Some(verbosity) = self.verbosity {
            summary.verbosity = verbosity.clamp(0.0, 1.0);
        }
        if let Some(max_media) = self.max_media {
            summary.max_media_count = max_media;
        }
        if self.no_media {
            summary.include_media = false;
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct SummarizeCliArgs {
    #[command(flatten)]
    pub run: RunArgs,
    /// Summarization provider (gemini, openai)
    #[arg(short, long)]
    pub provider: Option<String>,
    /// Model name override
    #[arg(short, long)]
    pub model: Option<String>,
    /// API key for this run (otherwise CHAT_DIGEST_API_KEY, the key store, or a prompt)
    #[arg(long)]
    pub api_key: Option<String>,
    /// Store the API key after a successful run
    #[arg(long)]
    pub save_key: bool,
    /// Copy the summary to the clipboard
    #[arg(short, long)]
    pub copy: bool,
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
    /// Hide the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct InspectCliArgs {
    #[command(flatten)]
    pub run: RunArgs,
    /// Also print the assembled prompt text
    #[arg(long)]
    pub show_prompt: bool,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration and credential file locations
    Path,
    /// Store an API key for a provider (prompts when KEY is omitted)
    SetKey {
        /// Provider the key belongs to (defaults to the configured provider)
        #[arg(short, long)]
        provider: Option<String>,
        key: Option<String>,
    },
    /// Remove a stored API key
    ClearKey {
        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct ServeCliArgs {
    /// Port to listen on (127.0.0.1 only)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
