use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "fortitude")]
#[command(about = "HTTP/WebSocket load-balancing reverse proxy", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match fortitude::lifecycle::run(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fortitude failed");
            eprintln!("fortitude: {e}");
            ExitCode::FAILURE
        }
    }
}
