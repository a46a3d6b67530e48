use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "fortitude-ctl")]
#[command(about = "Control CLI for a running Fortitude proxy", long_about = None)]
struct Cli {
    /// Base URL of the proxy
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pools, algorithm and counters
    Status,
    /// Reload the proxy's configuration file
    Reload,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{base}/fortitude-status")).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: proxy returned status {status}");
                eprintln!("{}", res.text().await.unwrap_or_default());
                std::process::exit(1);
            }
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Reload => {
            let res = client.get(format!("{base}/fortitude-reload")).send().await?;
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            if status.is_success() {
                print!("{body}");
            } else {
                eprintln!("Reload failed ({status}): {}", body.trim_end());
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
