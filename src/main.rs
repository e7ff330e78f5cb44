//! Process bootstrap: CLI parsing, config merge, lifecycle run

use clap::Parser;
use std::path::PathBuf;
use taskbeacon::logging::{self, LogFormat};
use taskbeacon::{AgentConfig, AgentLifecycle, AgentResult, MqttTransport};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "taskbeacon", version, about = "MQTT remote-tasking agent")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "TASKBEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Broker hostname (overrides [mqtt].endpoint)
    #[arg(long)]
    endpoint: Option<String>,

    /// Broker port (overrides [mqtt].port)
    #[arg(long)]
    port: Option<u16>,

    /// Client certificate path, PEM
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Client private key path, PEM
    #[arg(long)]
    key: Option<PathBuf>,

    /// Root CA certificate path, PEM
    #[arg(long)]
    root_ca: Option<PathBuf>,

    /// MQTT client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// File config overlaid with CLI flags; flags win.
fn merge_cli(mut config: AgentConfig, cli: &Cli) -> AgentConfig {
    if let Some(endpoint) = &cli.endpoint {
        config.mqtt.endpoint = endpoint.clone();
    }
    if let Some(port) = cli.port {
        config.mqtt.port = port;
    }
    if let Some(cert) = &cli.cert {
        config.mqtt.cert = Some(cert.clone());
    }
    if let Some(key) = &cli.key {
        config.mqtt.key = Some(key.clone());
    }
    if let Some(root_ca) = &cli.root_ca {
        config.mqtt.root_ca = Some(root_ca.clone());
    }
    if let Some(client_id) = &cli.client_id {
        config.agent.client_id = client_id.clone();
    }
    config
}

fn load_config(cli: &Cli) -> AgentResult<AgentConfig> {
    let base = match &cli.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::default(),
    };
    let config = merge_cli(base, cli);
    config.validate()?;
    Ok(config)
}

async fn run(config: AgentConfig) -> AgentResult<()> {
    let transport = MqttTransport::new(&config)?;
    let mut lifecycle = AgentLifecycle::new(config, transport);

    lifecycle.initialize().await?;
    lifecycle.start().await?;

    let outcome = lifecycle.run().await;
    lifecycle.shutdown().await?;
    outcome?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(
        logging::level_from_verbosity(cli.verbose),
        LogFormat::from_env(),
    );

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        client_id = %config.agent.client_id,
        endpoint = %config.mqtt.endpoint,
        port = config.mqtt.port,
        "Starting taskbeacon"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Agent terminated with error");
        std::process::exit(1);
    }
}
