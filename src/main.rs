use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};

use coin_shop::api::{self, AppState};
use coin_shop::audit::{FileAuditSink, TracingAuditSink};
use coin_shop::auth::AuthGate;
use coin_shop::config::AppConfig;
use coin_shop::domain::{AuditSink, Error, PaymentProvider};
use coin_shop::provider::PaypalClient;
use coin_shop::repository::SqliteRepository;

#[derive(Debug, Parser)]
#[command(name = "coin_shop", version, about = "PayPal coin shop backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        #[arg(short, long, default_value = "coin_shop.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file and print the catalog
    CheckConfig { config: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { config } => check_config(&config),
        Command::Serve { config } => match run(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "coin_shop stopped");
                eprintln!("coin_shop: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn check_config(path: &Path) -> ExitCode {
    let config = match AppConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("{}: ok", path.display());
    println!("currency {}", config.paypal.currency);
    for tier in config.catalog.list_tiers() {
        println!("  {}", tier);
    }
    match &config.receiver_email {
        Some(receiver) => println!("ipn listener enabled for {}", receiver),
        None => println!("ipn listener disabled"),
    }
    ExitCode::SUCCESS
}

fn init_tracing(log_level: &str) {
    let level = log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
    if !log_level.eq_ignore_ascii_case(level.as_str()) {
        warn!(log_level, "unknown log level, using info");
    }
}

async fn run(path: &Path) -> Result<(), Error> {
    let config = AppConfig::from_file(path)?;
    init_tracing(&config.server.log_level);

    let repository = Arc::new(SqliteRepository::open(&config.database.path)?);
    let audit: Arc<dyn AuditSink> = if config.audit.files {
        Arc::new(FileAuditSink::new(config.audit.dir.clone())?)
    } else {
        Arc::new(TracingAuditSink::default())
    };
    let provider: Arc<dyn PaymentProvider> = Arc::new(PaypalClient::new(config.paypal_settings())?);
    let auth = Arc::new(AuthGate::new(&config.shared_secret));

    let state = AppState::new(&config, provider, repository, audit, Arc::clone(&auth));
    info!(
        tiers = config.catalog.list_tiers().len(),
        sandbox = config.paypal.sandbox,
        database = %config.database.path.display(),
        "coin_shop configured"
    );

    #[cfg(unix)]
    spawn_reload_on_hangup(path.to_path_buf(), Arc::clone(&auth))?;

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let served = api::serve(listener, state, shutdown_signal()).await;

    auth.revoke();
    info!("coin_shop shut down");
    served
}

/// SIGHUP re-reads the configuration file and swaps in its shared secret.
/// Everything else needs a restart.
#[cfg(unix)]
fn spawn_reload_on_hangup(path: PathBuf, auth: Arc<AuthGate>) -> Result<(), Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match AppConfig::from_file(&path) {
                Ok(config) => auth.reload(&config.shared_secret),
                Err(e) => warn!(error = %e, "reload failed, keeping the current secret"),
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
