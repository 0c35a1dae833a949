use std::time::Duration;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    portal_client::{ClientOptions, GatewayClient, WILDCARD},
    portal_config::PortalConfig,
};

#[derive(Parser)]
#[command(name = "portal", about = "Portal — gateway WebSocket client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway WebSocket URL (overrides the config file).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Auth token (overrides the config file).
    #[arg(long, global = true, env = "PORTAL_TOKEN")]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, print the gateway hello, and exit.
    Status,
    /// Invoke a gateway method once and print the response payload.
    Call {
        method: String,
        /// Request params as a JSON document.
        #[arg(default_value = "{}")]
        params: String,
    },
    /// Stream every gateway event to stdout until interrupted.
    Listen,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Merge config-file settings with CLI overrides.
fn build_options(cli: &Cli, config: &PortalConfig) -> ClientOptions {
    ClientOptions {
        url: cli.url.clone().unwrap_or_else(|| config.gateway.url.clone()),
        token: cli.token.clone().or_else(|| config.gateway.token.clone()),
        role: config.gateway.role.clone(),
        scopes: config.gateway.scopes.clone(),
        mode: "cli".into(),
        display_name: config.device.display_name.clone(),
        auto_reconnect: config.reconnect.enabled,
        max_reconnect_attempts: config.reconnect.max_attempts,
        reconnect_base: Duration::from_millis(config.reconnect.base_ms),
        reconnect_cap: Duration::from_millis(config.reconnect.cap_ms),
        heartbeat_interval: Duration::from_millis(config.heartbeat.interval_ms),
        heartbeat_timeout: Duration::from_millis(config.heartbeat.timeout_ms),
        ..ClientOptions::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = portal_config::discover_and_load();
    let client = GatewayClient::new(build_options(&cli, &config));

    match cli.command {
        Commands::Status => {
            let hello = client.connect().await?;
            println!("server   {}", hello.server.version);
            if let Some(hostname) = &hello.server.hostname {
                println!("host     {hostname}");
            }
            println!("protocol {}", hello.protocol);
            if !hello.features.is_empty() {
                println!("features {}", hello.features.join(", "));
            }
            client.disconnect().await;
            Ok(())
        },
        Commands::Call { method, params } => {
            let params: serde_json::Value = serde_json::from_str(&params)?;
            client.connect().await?;
            let result = client.request(&method, params).await;
            client.disconnect().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        },
        Commands::Listen => {
            client.on(WILDCARD, |envelope| {
                println!("{envelope}");
            });
            let hello = client.connect().await?;
            info!(server = %hello.server.version, "listening for events, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            client.disconnect().await;
            Ok(())
        },
    }
}
