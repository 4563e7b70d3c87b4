mod cmd;

use clap::{Parser, Subcommand};
use cmd::config::{Effective, RunArgs};

#[derive(Parser)]
#[command(name = "logpipe", version, about = "Streams newline-delimited JSON logs into a broker topic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read the source to the end (or until Ctrl+C), publish, drain, exit.
    Run(RunArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let eff = match Effective::new(&args) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };

            match cmd::run::run(eff).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    tracing::error!(error = %e, "pipeline failed");
                    std::process::exit(e.exit_code());
                }
            }
        }
    }
}
