//! CLI handlers that run the pipeline: `summarize` and `inspect`.

use anyhow::{bail, Context, Result};
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::args::{InspectCliArgs, RunArgs, SummarizeCliArgs};
use crate::clipboard;
use crate::config::Config;
use crate::credentials::{resolve_api_key, CredentialStore, API_KEY_ENV};
use crate::error::ServiceErrorKind;
use crate::pipeline::{JobPhase, JobResult, JobRunner, JobStatus, Pipeline, RunOptions};
use crate::summarizer::{build_service, ProviderSettings, SummarizationService};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn handle_summarize_command(args: SummarizeCliArgs) -> Result<()> {
    let mut config = Config::load()?;
    args.run.apply(&mut config.summary);
    if let Some(provider) = &args.provider {
        config.service.provider = provider.clone();
    }
    if let Some(model) = &args.model {
        config.service.model = Some(model.clone());
    }
    validate_archive(&args.run)?;

    let provider = config.service.provider.clone();
    let store = CredentialStore::open_default()?;
    let (api_key, source) = resolve_api_key(
        args.api_key.clone(),
        std::env::var(API_KEY_ENV).ok(),
        &store,
        &provider,
        || prompt_for_key(&provider),
    )?
    .with_context(|| {
        format!(
            "No API key for {provider}. Pass --api-key, set {API_KEY_ENV}, or run `chat-digest config set-key`"
        )
    })?;

    let service = build_service(
        &provider,
        ProviderSettings::from_config(&config.service, api_key.clone()),
    )?;

    let status = run_job(&config, &args.run, Some(service), !args.no_progress).await?;
    let result = finished_result(status)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_warnings(&result);
        match &result.summary_text {
            Some(summary) => println!("{}", summary.trim_end()),
            None => print_window_empty(&result),
        }
    }

    if args.save_key && source.is_unsaved() && result.summary_text.is_some() {
        store.set(&provider, &api_key)?;
        eprintln!("Saved {} API key to {}", provider, store.path().display());
    }

    if args.copy {
        if let Some(summary) = &result.summary_text {
            match clipboard::copy_text(summary) {
                Ok(backend) => eprintln!("Summary copied to clipboard ({backend})"),
                Err(err) => warn!("Failed to copy summary: {}", err),
            }
        }
    }

    Ok(())
}

pub async fn handle_inspect_command(args: InspectCliArgs) -> Result<()> {
    let mut config = Config::load()?;
    args.run.apply(&mut config.summary);
    validate_archive(&args.run)?;

    let status = run_job(&config, &args.run, None, false).await?;
    let result = finished_result(status)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let report = &result.report;
    println!("Transcript:        {}", report.transcript_member);
    println!("Timestamp format:  {}", report.timestamp_format);
    println!("Messages:          {}", report.total_messages);
    println!(
        "Window ({}):       {} message(s){}",
        config.summary.window,
        report.window_messages,
        report
            .cutoff
            .map(|c| format!(" since {}", c.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default()
    );
    println!(
        "Attachments:       {} referenced, {} unresolved",
        report.attachment_refs, report.unresolved_refs
    );
    for medium in &report.media {
        println!(
            "  - {} ({}, {} bytes)",
            medium.source, medium.mime_type, medium.encoded_bytes
        );
    }
    print_warnings(&result);

    if result.outcome == "window_empty" {
        print_window_empty(&result);
    } else if args.show_prompt {
        if let Some(prompt) = &result.prompt_text {
            println!("\n{prompt}");
        }
    }

    Ok(())
}

fn validate_archive(run: &RunArgs) -> Result<()> {
    if !run.archive.exists() {
        bail!("Archive not found: {}", run.archive.display());
    }
    if !run.archive.is_file() {
        bail!("Not a file: {}", run.archive.display());
    }
    Ok(())
}

/// Run the pipeline in the job slot, showing a spinner and honouring Ctrl-C.
async fn run_job(
    config: &Config,
    run: &RunArgs,
    service: Option<Arc<dyn SummarizationService>>,
    show_progress: bool,
) -> Result<JobStatus> {
    let pipeline = Pipeline::new(config, service);
    let options = RunOptions::from_config(run.archive.clone(), &config.summary);
    let runner = JobRunner::new();

    runner
        .start(move |cancel, progress| async move { pipeline.run(options, cancel, progress).await })
        .await;

    let pb = (show_progress && io::stderr().is_terminal()).then(create_spinner);
    let status_handle = runner.status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, cancelling run");
                if let Some(pb) = &pb {
                    pb.set_message("Cancelling...");
                }
                runner.cancel().await;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let status = status_handle.get().await;
        if status.phase != JobPhase::Running {
            break;
        }
        if let (Some(pb), Some(stage)) = (&pb, status.stage) {
            pb.set_message(stage.describe());
        }
    }

    let status = runner.wait().await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(status)
}

fn finished_result(status: JobStatus) -> Result<JobResult> {
    match status.phase {
        JobPhase::Completed => status
            .last_result
            .context("Run completed without a result"),
        JobPhase::Cancelled => bail!("Run cancelled"),
        JobPhase::Failed => {
            let message = status
                .last_error
                .unwrap_or_else(|| "unknown error".to_string());
            if status.error_kind == Some(ServiceErrorKind::Retryable) {
                bail!("{message}\nThe service reported a temporary failure; trying again later may succeed.");
            }
            bail!("{message}")
        }
        JobPhase::Idle | JobPhase::Running => bail!("Run did not finish"),
    }
}

fn print_warnings(result: &JobResult) {
    let warnings = &result.report.warnings;
    if warnings.is_empty() {
        return;
    }
    eprintln!("{} warning(s):", warnings.len());
    for warning in warnings {
        eprintln!("  - {warning}");
    }
}

fn print_window_empty(result: &JobResult) {
    let last = result
        .report
        .last_message
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "No messages fall inside the selected window ({} messages in the chat, last at {}). Try a wider --window.",
        result.report.total_messages, last
    );
}

fn prompt_for_key(provider: &str) -> Result<Option<String>> {
    if !io::stdin().is_terminal() {
        return Ok(None);
    }
    let value = Password::new()
        .with_prompt(format!("{provider} API key"))
        .allow_empty_password(true)
        .interact()?;
    Ok(Some(value))
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message("Starting...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
