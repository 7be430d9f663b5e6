use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use drivesink::config::Settings;
use drivesink::progress::ProgressReporter;
use drivesink::{ExtensionFilter, SyncEngine};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "drivesink", version, about = "Sync directory trees with a cloud drive")]
struct Cli {
    /// Credential file (defaults to $DRIVESINK, then ~/.drivesink)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the token refresh service
    #[arg(short = 'd', long = "drivesink", global = true)]
    drivesink: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Never draw progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a local directory into a remote folder
    Upload(Transfer),
    /// Download a remote folder into a local directory
    Download(Transfer),
}

#[derive(Debug, Args)]
struct Transfer {
    source: String,
    destination: String,

    /// Comma-separated extensions to sync (defaults to common image formats)
    #[arg(short, long)]
    extensions: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::resolve(cli.config, cli.drivesink)?;
    let client = settings.build_client()?;
    let progress = if cli.no_progress {
        ProgressReporter::hidden()
    } else {
        ProgressReporter::terminal()
    };

    match cli.command {
        Command::Upload(args) => {
            let engine = SyncEngine::new(client)
                .with_filter(ExtensionFilter::from_list(args.extensions.as_deref()))
                .with_progress(progress);
            let report = engine
                .upload(&PathBuf::from(&args.source), &args.destination)
                .await
                .with_context(|| format!("upload of {} failed", args.source))?;
            tracing::info!(
                uploaded = report.transferred,
                unchanged = report.unchanged,
                skipped = report.filtered,
                "done"
            );
        }
        Command::Download(args) => {
            let engine = SyncEngine::new(client).with_progress(progress);
            let report = engine
                .download(&args.source, &PathBuf::from(&args.destination))
                .await
                .with_context(|| format!("download of {} failed", args.source))?;
            tracing::info!(
                downloaded = report.transferred,
                unchanged = report.unchanged,
                "done"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_with_extensions() {
        let cli = Cli::try_parse_from([
            "drivesink", "-v", "upload", "-e", "png,raw", "./pics", "Backup/Pics",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Command::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.source, "./pics");
        assert_eq!(args.destination, "Backup/Pics");
        assert_eq!(args.extensions.as_deref(), Some("png,raw"));
    }

    #[test]
    fn parses_download_with_global_flags() {
        let cli = Cli::try_parse_from([
            "drivesink",
            "download",
            "Photos",
            "/tmp/out",
            "-c",
            "/tmp/creds",
            "--drivesink",
            "http://localhost:8080",
            "--no-progress",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/creds")));
        assert_eq!(cli.drivesink.as_deref(), Some("http://localhost:8080"));
        assert!(cli.no_progress);
        assert!(matches!(cli.command, Command::Download(_)));
    }

    #[test]
    fn rejects_missing_destination() {
        assert!(Cli::try_parse_from(["drivesink", "upload", "./pics"]).is_err());
    }
}
