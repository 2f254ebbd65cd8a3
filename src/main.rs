//! autohealer: closed-loop remediation controller
//!
//! `autohealer serve` exposes `POST /heal`; `autohealer heal <target>` runs
//! a single invocation from the command line.

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use autohealer::api::{create_router, AppState};
use autohealer::backend::{mock, Backends};
use autohealer::{Config, HealState, Orchestrator};

const DEMO_TARGET: &str = "user-api";

#[derive(Parser)]
#[command(name = "autohealer")]
#[command(about = "Closed-loop remediation controller: detect, predict, heal, verify")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "autohealer.toml", env = "AUTOHEALER_CONFIG")]
    config: String,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "AUTOHEALER_LISTEN")]
    listen: Option<String>,

    #[arg(long, env = "AUTOHEALER_METRICS_URL")]
    metrics_url: Option<String>,

    #[arg(long, env = "AUTOHEALER_PROBE_URL")]
    probe_url: Option<String>,

    #[arg(long, env = "AUTOHEALER_COMPUTE_URL")]
    compute_url: Option<String>,

    #[arg(long, env = "AUTOHEALER_COMPUTE_API_TOKEN", hide_env_values = true)]
    compute_api_token: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "AUTOHEALER_ORACLE_URL")]
    oracle_url: Option<String>,

    #[arg(long, env = "AUTOHEALER_ORACLE_MODEL")]
    oracle_model: Option<String>,

    #[arg(long, env = "AUTOHEALER_ORACLE_API_KEY", hide_env_values = true)]
    oracle_api_key: Option<String>,

    /// Use in-memory collaborators seeded with a degraded target
    #[arg(long)]
    demo: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "AUTOHEALER_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run one healing invocation and print the report
    Heal {
        target: String,
        /// Alert text passed to the oracle
        #[arg(long)]
        alert: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("autohealer=info".parse()?);
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let mut config = Config::load(&cli.config)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let command = cli.command.unwrap_or(Command::Serve);

    let backends = if cli.demo {
        let target = match &command {
            Command::Heal { target, .. } => target.as_str(),
            Command::Serve => DEMO_TARGET,
        };
        info!(target_id = target, "Demo mode: using in-memory collaborators");
        mock::demo_backends(target)
    } else {
        Backends::from_config(&config.backends)?
    };

    let orchestrator = Orchestrator::new(&config, backends);

    match command {
        Command::Serve => serve(&config, orchestrator).await,
        Command::Heal { target, alert } => {
            let report = orchestrator.heal(&target, alert.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.final_state == HealState::AbortedError {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    let backends = &mut config.backends;
    let overrides = [
        (&cli.metrics_url, &mut backends.metrics_url),
        (&cli.probe_url, &mut backends.probe_url),
        (&cli.compute_url, &mut backends.compute_url),
        (&cli.oracle_url, &mut backends.oracle_url),
        (&cli.oracle_model, &mut backends.oracle_model),
    ];
    for (value, slot) in overrides {
        if let Some(value) = value {
            *slot = value.clone();
        }
    }

    if let Some(listen) = &cli.listen {
        config.server.listen = listen.clone();
    }
    if cli.oracle_api_key.is_some() {
        config.backends.oracle_api_key = cli.oracle_api_key.clone();
    }
    if cli.compute_api_token.is_some() {
        config.backends.compute_api_token = cli.compute_api_token.clone();
    }
}

async fn serve(config: &Config, orchestrator: Orchestrator) -> anyhow::Result<()> {
    info!(
        oracle = %orchestrator.oracle_id(),
        deadline_ms = config.heal.total_deadline_ms,
        "Starting autohealer"
    );

    let app = create_router(AppState::new(orchestrator));
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
