mod config;
mod logging;
mod stages;

use std::path::PathBuf;

use accelera_refine::Profile;
use anyhow::Result;
use clap::{Parser, Subcommand};

use config::{Config, DEFAULT_CONFIG_FILE};
use stages::{App, CollectStage};

#[derive(Parser)]
#[command(name = "accelera")]
#[command(about = "Clint CRM to Power BI pipeline: browser collection, silver, gold and publishing")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_HASH"), ")"))]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info", value_enum)]
    log_level: LogLevel,

    /// Use UTC timestamps instead of local time
    #[arg(long, global = true)]
    utc: bool,

    /// Also write daily-rolling log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Settings file (missing file = defaults)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Root of the bronze/silver/gold folders
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProfileArg {
    /// leads-forms-accelera export
    Leads,
    /// Closer team export
    Closer,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Leads => Profile::Leads,
            ProfileArg::Closer => Profile::Closer,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log into Clint and export deals to bronze CSV
    Collect {
        #[arg(long, value_enum, default_value = "all")]
        stage: CollectStage,

        /// Upload each bronze CSV to Cloud Storage
        #[arg(long)]
        upload: bool,
    },

    /// Refine a bronze CSV into silver Parquet
    Silver {
        #[arg(short, long, value_enum, default_value = "leads")]
        profile: ProfileArg,

        /// Bronze CSV (default: the profile's bronze path)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Silver Parquet (default: the profile's silver path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Upload the silver file to Cloud Storage
        #[arg(long)]
        upload: bool,
    },

    /// Build the gold star schema from silver
    Gold {
        /// Silver Parquet (default: leads silver)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Gold folder (default: <data-dir>/gold)
        #[arg(short = 'O', long)]
        output_dir: Option<PathBuf>,

        /// Upload the gold files to Cloud Storage
        #[arg(long)]
        upload: bool,
    },

    /// Check gold (and optionally silver) files for consistency
    Validate {
        #[arg(long)]
        gold_dir: Option<PathBuf>,

        /// Silver Parquet to check as well
        #[arg(long)]
        silver: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "leads")]
        profile: ProfileArg,
    },

    /// Check that the published files exist in the bucket
    VerifyRemote,

    /// Refresh the Power BI semantic model
    Refresh,

    /// collect → silver → gold → (upload) → (refresh)
    Run {
        /// Start from the existing bronze file
        #[arg(long)]
        skip_collect: bool,

        #[arg(long)]
        upload: bool,

        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Map log level, suppressing noisy HTML-parsing and HTTP crates at debug/trace
    let level = match cli.log_level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug,selectors=warn,html5ever=warn,hyper_util=info",
        LogLevel::Trace => "trace,selectors=warn,html5ever=warn,hyper_util=info",
    };
    let _guard = logging::init(level, cli.utc, cli.log_dir.as_deref())?;

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env: {e}"),
    }

    let app = App {
        config: Config::load(&cli.config)?,
        data_dir: cli.data_dir,
        http: reqwest::Client::new(),
        env: &config::process_env,
    };

    match cli.command {
        Commands::Collect { stage, upload } => {
            tracing::info!(?stage, upload, "Collecting from Clint");
            if let Some(report) = stages::collect(&app, stage, upload).await? {
                if report.succeeded() == 0 {
                    anyhow::bail!("No origin was collected");
                }
            }
        }
        Commands::Silver {
            profile,
            input,
            output,
            upload,
        } => {
            let profile = Profile::from(profile);
            tracing::info!(%profile, "Building silver");
            stages::silver(&app, profile, input, output, upload).await?;
        }
        Commands::Gold {
            input,
            output_dir,
            upload,
        } => {
            tracing::info!("Building gold");
            let stats = stages::gold(&app, input, output_dir, upload).await?;
            for (name, rows) in &stats.dimension_rows {
                tracing::info!(dimension = *name, rows = *rows, "Dimension");
            }
        }
        Commands::Validate {
            gold_dir,
            silver,
            profile,
        } => {
            let errors = stages::validate(&app, gold_dir, silver, profile.into())?;
            if errors > 0 {
                anyhow::bail!("{errors} validation errors");
            }
        }
        Commands::VerifyRemote => {
            let missing = stages::verify_remote(&app).await?;
            if !missing.is_empty() {
                anyhow::bail!("{} remote outputs missing: {}", missing.len(), missing.join(", "));
            }
            tracing::info!("All remote outputs present");
        }
        Commands::Refresh => {
            stages::refresh(&app).await?;
        }
        Commands::Run {
            skip_collect,
            upload,
            refresh,
        } => {
            stages::run(&app, skip_collect, upload, refresh).await?;
        }
    }

    Ok(())
}
