// Entrypoint for the backup uploader.
// - Parses the command line, loads settings and sets up logging.
// - Hands a service-account authenticator to `job::Job` and maps the
//   outcome to the process exit status (0 ok, 1 category failure, 2 fatal).

use anyhow::Context;
use clap::{Parser, Subcommand};
use drive_backup::auth::ServiceAccountAuth;
use drive_backup::config::Settings;
use drive_backup::job::{exit_code, Job, Phases};
use drive_backup::ui::{print_summary, UploadProgress};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload the newest backup archives to Google Drive and prune old ones")]
struct Args {
    /// Settings file (defaults to <config dir>/drive-backup/config.toml)
    #[arg(long, global = true, env = "DRIVE_BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Only process these categories (repeatable)
    #[arg(long = "category", global = true)]
    categories: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload the newest archives, then delete expired uploads (default)
    Run,
    /// Upload the newest archives only
    Upload,
    /// Delete expired uploads only
    Sweep {
        /// List what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    fn phases(&self) -> Phases {
        match self {
            Command::Run => Phases::default(),
            Command::Upload => Phases {
                sweep: false,
                ..Phases::default()
            },
            Command::Sweep { dry_run } => Phases {
                upload: false,
                dry_run: *dry_run,
                ..Phases::default()
            },
        }
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    settings.restrict_to(&args.categories)?;
    Ok(settings)
}

fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let phases = args.command.as_ref().unwrap_or(&Command::Run).phases();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };
    tracing::debug!(?settings, "loaded settings");

    let auth = ServiceAccountAuth::from_settings(&settings);
    let mut progress = UploadProgress::new();
    let result = Job::new(&settings, &auth, phases)
        .run(chrono::Utc::now(), &mut |name, pct| progress.update(name, pct));

    match &result {
        Ok(report) => print_summary(report),
        Err(e) => error!("backup run aborted: {e}"),
    }
    ExitCode::from(exit_code(&result))
}
