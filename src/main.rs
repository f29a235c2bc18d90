use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use callwatch::app::Config;
use callwatch::monitor::{CallMatcher, CallMonitor, CallerId, StopReason};
use callwatch::publish::{CallPublisher, ConsolePublisher, FirebaseCredentials, FirebasePublisher};

const RULE: &str = "══════════════════════════════════════════════════════════════════════";

/// callwatch - pushes incoming MicroSIP callers to the taxi dispatch popup
#[derive(Parser)]
#[command(name = "callwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Config file (defaults to ~/.config/callwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that override the config file
#[derive(Args)]
struct Overrides {
    /// MicroSIP log file to watch
    #[arg(long, env = "CALLWATCH_LOG_PATH", global = true)]
    log_path: Option<PathBuf>,

    /// Own number of the monitored line
    #[arg(long, env = "CALLWATCH_PHONE", global = true)]
    phone: Option<String>,

    /// Firebase Realtime Database URL
    #[arg(long, env = "CALLWATCH_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Database auth token (instead of the credentials file)
    #[arg(long, env = "CALLWATCH_AUTH_TOKEN", hide_env_values = true, global = true)]
    auth_token: Option<String>,

    /// Print call records instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the softphone log and publish incoming calls (default)
    Watch,
    /// Show which caller each given line would produce (reads stdin without arguments)
    Parse {
        lines: Vec<String>,
    },
    /// Look a number up in the customer database
    Lookup {
        number: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &cli.overrides);

    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, cli.log_file.as_deref())?;

    match cli.command {
        Some(Commands::Parse { lines }) => run_parse(&config, lines),
        Some(Commands::Lookup { number }) => run_lookup(&config, &cli.overrides, &number),
        Some(Commands::Watch) | None => run_watch(config, &cli.overrides),
    }
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(path) = &overrides.log_path {
        config.log.path = Some(path.clone());
    }
    if let Some(phone) = &overrides.phone {
        config.phone_number = phone.clone();
    }
    if let Some(url) = &overrides.database_url {
        config.publisher.database_url = url.clone();
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn build_publisher(config: &Config, overrides: &Overrides) -> Result<Arc<dyn CallPublisher>> {
    if overrides.dry_run {
        info!("Dry run: call records are printed, not sent");
        return Ok(Arc::new(ConsolePublisher::default()));
    }

    let publisher_config = &config.publisher;
    let (database_url, auth_token) = match &overrides.auth_token {
        Some(token) => (publisher_config.database_url.clone(), token.clone()),
        None => {
            let credentials = FirebaseCredentials::load(&publisher_config.credentials_path)?;
            // An explicit URL wins over the one stored with the credentials
            let url = if overrides.database_url.is_none() {
                credentials
                    .database_url
                    .unwrap_or_else(|| publisher_config.database_url.clone())
            } else {
                publisher_config.database_url.clone()
            };
            (url, credentials.auth_token)
        }
    };

    let publisher = FirebasePublisher::new(
        &database_url,
        auth_token,
        publisher_config.request_timeout(),
        publisher_config.recent_rides,
    )?;
    info!("Publishing to {}", publisher.database_url());
    Ok(Arc::new(publisher))
}

/// Ask the operator for the log path when nothing was found
fn ask_for_log_path(checked: &[PathBuf]) -> Result<Option<PathBuf>> {
    if !io::stdin().is_terminal() {
        return Ok(None);
    }

    println!("⚠️  MicroSIP log not found. Checked:");
    for path in checked {
        println!("   - {}", path.display());
    }
    print!("Path to log.txt: ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read log path from terminal")?;

    let answer = answer.trim().trim_matches('"');
    Ok((!answer.is_empty()).then(|| PathBuf::from(answer)))
}

fn run_watch(config: Config, overrides: &Overrides) -> Result<()> {
    println!("{}", RULE);
    println!("  📞 MicroSIP call monitor");
    println!("{}", RULE);

    let settings = config.monitor_settings()?;
    let matcher = CallMatcher::with_extra_patterns(&config.matcher.extra_patterns)?;
    let publisher = build_publisher(&config, overrides)?;
    let log_path = config.log.locate(ask_for_log_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let mut monitor = CallMonitor::start(&log_path, settings, matcher, publisher)?;

        println!("👂 Watching: {}", monitor.log_path().display());
        println!("⏰ Started: {}", chrono::Local::now().format("%d.%m.%Y %H:%M:%S"));
        println!("⌨️  Press Ctrl+C to stop");
        println!("{}", RULE);

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        anyhow::Ok(monitor.run_until(shutdown).await)
    })?;

    let stopped_at: chrono::DateTime<chrono::Local> = report.stopped_at.into();
    println!();
    println!("⏹️  Stopped: {}", stopped_at.format("%d.%m.%Y %H:%M:%S"));
    println!(
        "   {} calls published, {} repeats suppressed, {} failed",
        report.stats.published, report.stats.suppressed, report.stats.publish_failed
    );

    match report.reason {
        StopReason::Interrupted => Ok(()),
        StopReason::Failed(e) => Err(e.context(
            "Monitoring stopped because the log could not be read; \
             check that MicroSIP is running and start callwatch again",
        )),
    }
}

fn run_parse(config: &Config, lines: Vec<String>) -> Result<()> {
    let matcher = CallMatcher::with_extra_patterns(&config.matcher.extra_patterns)?;

    let lines = if lines.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read stdin")?
    } else {
        lines
    };

    for line in lines {
        match matcher.match_line(&line) {
            Some(caller) => println!("{}\t{}", caller, line),
            None => println!("no match\t{}", line),
        }
    }
    Ok(())
}

fn run_lookup(config: &Config, overrides: &Overrides, number: &str) -> Result<()> {
    let caller = CallerId::normalize(number)
        .with_context(|| format!("'{}' is not a phone number", number))?;
    let publisher = build_publisher(config, overrides)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let classification = runtime.block_on(publisher.lookup(&caller))?;

    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}
