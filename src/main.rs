use anyhow::Result;
use chat_digest::{
    app,
    cli::{handle_config_command, handle_inspect_command, handle_summarize_command, Cli, CliCommand},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        CliCommand::Version => {
            println!("chat-digest {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Summarize(args) => handle_summarize_command(args).await,
        CliCommand::Inspect(args) => handle_inspect_command(args).await,
        CliCommand::Config(args) => handle_config_command(args),
        CliCommand::Serve(args) => app::run_server(args.port).await,
    }
}
