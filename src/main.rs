// Main entry point for PolicyShield.

use policyshield::api::{create_router, AppState};
use policyshield::auth::auth_middleware::AuthState;
use policyshield::config::Config;
use policyshield::engine::Engine;
use policyshield::rules;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// `<binary> server --rules <path> --port <n> --host <h>`. Flags override
/// their environment-variable equivalents; CLI subcommands beyond `server`
/// (init/validate/lint/test/replay/doctor/generate-rules) live in the
/// external tooling this binary does not implement.
#[derive(Parser, Debug)]
#[command(name = "policyshield")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the PolicyShield HTTP sidecar.
    Server {
        #[arg(long)]
        rules: Option<std::path::PathBuf>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let Command::Server { rules: rules_arg, port: port_arg, host: host_arg } = cli.command;

    // 1. Load configuration from the environment (before any logging).
    let mut config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });
    if let Some(rules) = rules_arg {
        config.rules_path = rules;
    }
    if let Some(port) = port_arg {
        config.port = port;
    }
    if let Some(host) = host_arg {
        config.bind_address = host;
    }

    // 1b. Validate the rules path now that `--rules` has had a chance to
    // supply it; `from_env` deliberately left it unvalidated for this reason.
    if let Err(e) = config.validate_rules_path() {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    }

    // 2. Initialize tracing. Must happen only once.
    init_tracing(&config)?;

    info!("starting PolicyShield");
    info!(bind_address = %config.bind_address, port = config.port, mode = ?config.mode, "configuration loaded");

    // 3. Load the initial rule set. A bad ruleset at startup is fatal.
    let rule_set = rules::load(&config.rules_path).map_err(|e| {
        error!(error = %e, path = ?config.rules_path, "failed to load rules");
        e
    })?;
    info!(
        shield_name = %rule_set.shield_name,
        rules_count = rule_set.rules.len(),
        rules_hash = %rule_set.rules_hash,
        "rules loaded"
    );

    let reload_poll_interval_ms = config.reload_poll_interval_ms;
    let rules_path = config.rules_path.clone();

    // 4. Build the engine.
    let engine = Arc::new(Engine::new(rule_set, config.clone())?);

    // 5. Auth state, only constructed when a token is configured.
    let auth_state = config
        .api_token
        .clone()
        .map(|api_token| Arc::new(AuthState { api_token: Some(api_token) }));

    // 6. Background hot-reload poller.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut last_mtime = std::fs::metadata(&rules_path).and_then(|m| m.modified()).ok();
            let mut interval = tokio::time::interval(Duration::from_millis(reload_poll_interval_ms));
            loop {
                interval.tick().await;
                let mtime = match std::fs::metadata(&rules_path).and_then(|m| m.modified()) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "could not stat rules file during reload poll");
                        continue;
                    }
                };
                if Some(mtime) == last_mtime {
                    continue;
                }
                match rules::load(&rules_path) {
                    Ok(new_rule_set) => {
                        info!(rules_hash = %new_rule_set.rules_hash, "rules file changed, reloaded");
                        engine.reload(new_rule_set);
                        last_mtime = Some(mtime);
                    }
                    Err(e) => {
                        warn!(error = %e, "rules file changed but failed to reload; keeping previous ruleset");
                        last_mtime = Some(mtime);
                    }
                }
            }
        });
    }

    // 7. Router.
    let shutdown_engine = engine.clone();
    let app_state = AppState { engine };
    let router = create_router(app_state, auth_state);

    // 8. Bind and serve with graceful shutdown.
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "failed to bind to address");
        e
    })?;
    info!(addr = %addr, "server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "server error");
            e
        })?;

    info!("server shutdown complete");

    // Exit code 2 signals the kill switch was engaged at shutdown time
    // rather than a clean operator-initiated stop (spec §6 exit codes).
    if shutdown_engine.is_killed() {
        std::process::exit(2);
    }
    Ok(())
}

/// Initializes the tracing subscriber from config (JSON or text format).
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let level = parse_log_level(&config.log_level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn parse_log_level(level: &str) -> Result<tracing::Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(format!("invalid log level: {level}")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("ctrl+c received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("sigterm received, starting graceful shutdown");
        },
    }
}
