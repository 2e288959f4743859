//! CLI handler for configuration display and API key management.

use anyhow::{anyhow, bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Password};
use std::io::{self, IsTerminal};

use crate::cli::args::{ConfigCliArgs, ConfigCommand};
use crate::config::Config;
use crate::credentials::{CredentialStore, API_KEY_ENV};
use crate::global;
use crate::summarizer::SUPPORTED_PROVIDERS;

pub fn handle_config_command(args: ConfigCliArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Show => handle_show(),
        ConfigCommand::Path => handle_path(),
        ConfigCommand::SetKey { provider, key } => handle_set_key(provider, key),
        ConfigCommand::ClearKey { provider } => handle_clear_key(provider),
    }
}

fn handle_show() -> Result<()> {
    let config = Config::load()?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", rendered.trim_end());
    println!();

    let store = CredentialStore::open_default()?;
    println!("API keys:");
    for provider in SUPPORTED_PROVIDERS {
        let state = match store.get(provider)? {
            Some(_) => "stored",
            None => "not stored",
        };
        println!("  {provider:<8} {state}");
    }
    if std::env::var(API_KEY_ENV).is_ok_and(|v| !v.trim().is_empty()) {
        println!("  ({API_KEY_ENV} is set and takes precedence over stored keys)");
    }
    Ok(())
}

fn handle_path() -> Result<()> {
    println!("Config:      {}", global::config_file()?.display());
    println!("Credentials: {}", global::credentials_file()?.display());
    Ok(())
}

fn handle_set_key(provider: Option<String>, key: Option<String>) -> Result<()> {
    let provider = resolve_provider(provider)?;
    let key = match key {
        Some(key) => key,
        None => {
            if !io::stdin().is_terminal() {
                bail!("No key given. Pass it as an argument when not running interactively.");
            }
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{provider} API key"))
                .interact()?
        }
    };
    if key.trim().is_empty() {
        bail!("API key cannot be empty");
    }

    let store = CredentialStore::open_default()?;
    store.set(&provider, &key)?;
    println!("Stored {} API key in {}", provider, store.path().display());
    Ok(())
}

fn handle_clear_key(provider: Option<String>) -> Result<()> {
    let provider = resolve_provider(provider)?;

    if io::stdin().is_terminal() {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Remove the stored {provider} API key?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Nothing removed.");
            return Ok(());
        }
    }

    let store = CredentialStore::open_default()?;
    if store.remove(&provider)? {
        println!("Removed stored {provider} API key");
    } else {
        println!("No stored {provider} API key");
    }
    Ok(())
}

fn resolve_provider(provider: Option<String>) -> Result<String> {
    let provider = match provider {
        Some(provider) => provider,
        None => Config::load()?.service.provider,
    };
    let provider = provider.trim().to_lowercase();
    if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
        return Err(anyhow!(
            "Unknown provider '{}'. Supported: {}",
            provider,
            SUPPORTED_PROVIDERS.join(", ")
        ));
    }
    Ok(provider)
}
