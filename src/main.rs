//! iotlink - main entry point
//!
//! Loads the device configuration, applies command-line overrides, mints the
//! first token before any network activity and runs the selected flow.

use clap::{Parser, Subcommand};
use iotlink::auth::JwtTokenProvider;
use iotlink::config::{ConfigError, ConfigOverrides, DeviceConfig};
use iotlink::error::{SessionError, SessionResult};
use iotlink::observability::init_default_logging;
use iotlink::protocol::SessionIdentity;
use iotlink::session::{self, LoggingConsumer, SessionLoop};
use iotlink::transport::mqtt::{ConnectSettings, MqttSession};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Long-lived MQTT session client for telemetry devices and gateways
#[derive(Parser)]
#[command(name = "iotlink")]
#[command(about = "MQTT device and gateway session client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Flags that override the configuration file
#[derive(clap::Args)]
struct OverrideArgs {
    /// Cloud project id
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT", global = true)]
    project_id: Option<String>,
    /// Cloud region
    #[arg(long, global = true)]
    cloud_region: Option<String>,
    /// Device registry id
    #[arg(long, global = true)]
    registry_id: Option<String>,
    /// Device id (the bound device when --gateway-id is set)
    #[arg(long, global = true)]
    device_id: Option<String>,
    /// Run as this gateway on behalf of --device-id
    #[arg(long, global = true)]
    gateway_id: Option<String>,
    /// PEM private key used to sign tokens
    #[arg(long, value_name = "FILE", global = true)]
    private_key_file: Option<PathBuf>,
    /// RS256 or ES256
    #[arg(long, global = true)]
    algorithm: Option<String>,
    /// Minutes each token stays valid
    #[arg(long, global = true)]
    token_exp_minutes: Option<u64>,
    /// MQTT bridge hostname
    #[arg(long, global = true)]
    mqtt_bridge_hostname: Option<String>,
    /// MQTT bridge port
    #[arg(long, global = true)]
    mqtt_bridge_port: Option<u16>,
    /// event or state
    #[arg(long, global = true)]
    message_type: Option<String>,
    /// Number of messages to publish
    #[arg(long, global = true)]
    num_messages: Option<u32>,
    /// Seconds to keep listening after the last publish
    #[arg(long, global = true)]
    wait_time: Option<u64>,
    /// Payload for send-data
    #[arg(long, global = true)]
    telemetry_data: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            project_id: args.project_id,
            cloud_region: args.cloud_region,
            registry_id: args.registry_id,
            device_id: args.device_id,
            gateway_id: args.gateway_id,
            private_key_file: args.private_key_file,
            algorithm: args.algorithm,
            token_exp_minutes: args.token_exp_minutes,
            host: args.mqtt_bridge_hostname,
            port: args.mqtt_bridge_port,
            message_type: args.message_type,
            num_messages: args.num_messages,
            wait_time_secs: args.wait_time,
            telemetry_data: args.telemetry_data,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled publish session (default)
    Run,
    /// Gateway: publish --telemetry-data once on behalf of the bound device
    SendData,
    /// Gateway: listen for the bound device's config and commands
    ListenConfig,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting iotlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref(), cli.overrides.into()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_session(config).await,
        Commands::SendData => run_gateway_command(config, GatewayCommand::SendData).await,
        Commands::ListenConfig => run_gateway_command(config, GatewayCommand::ListenConfig).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match &result {
        Ok(()) => info!("Finished"),
        Err(SessionError::Cancelled) => info!("Cancelled while connecting"),
        Err(e) => error!("Command failed: {}", e),
    }

    let code = exit_code(&result);
    if code != 0 {
        process::exit(code);
    }
}

/// Cancellation is a clean exit; every other error is a failure
fn exit_code(result: &SessionResult<()>) -> i32 {
    match result {
        Ok(()) | Err(SessionError::Cancelled) => 0,
        Err(_) => 1,
    }
}

fn load_configuration(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> SessionResult<DeviceConfig> {
    let file_path = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => ["iotlink.toml", "config/iotlink.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    let config = match file_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let mut config = DeviceConfig::read_from_file(&path)?;
            overrides.apply(&mut config);
            config
        }
        None => {
            info!("No configuration file found, using command-line flags");
            overrides.into_config()?
        }
    };

    config.validate()?;
    Ok(config)
}

/// Key material is loaded before any connect, so a bad key fails fast
fn build_token_provider(config: &DeviceConfig) -> SessionResult<JwtTokenProvider> {
    Ok(JwtTokenProvider::from_key_file(
        config.device.project_id.clone(),
        &config.auth.private_key_file,
        config.auth_algorithm()?,
        config.auth.token_exp_minutes,
    )?)
}

fn build_transport(config: &DeviceConfig) -> SessionResult<MqttSession> {
    Ok(MqttSession::new(
        SessionIdentity::from_config(config)?,
        ConnectSettings::from(&config.broker),
    ))
}

/// Cancel the token on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        cancel.cancel();
    });
}

async fn run_session(config: DeviceConfig) -> SessionResult<()> {
    let tokens = build_token_provider(&config)?;
    let transport = build_transport(&config)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let report = SessionLoop::new(transport, Arc::new(tokens), &config, cancel)?
        .run()
        .await?;

    info!(
        published = report.published,
        token_refreshes = report.token_refreshes,
        cancelled = report.cancelled,
        "Session complete"
    );
    Ok(())
}

enum GatewayCommand {
    SendData,
    ListenConfig,
}

async fn run_gateway_command(config: DeviceConfig, command: GatewayCommand) -> SessionResult<()> {
    let tokens = build_token_provider(&config)?;
    let mut transport = build_transport(&config)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match command {
        GatewayCommand::SendData => {
            session::send_data_from_bound_device(&mut transport, &tokens, &config, &cancel).await
        }
        GatewayCommand::ListenConfig => {
            session::listen_for_config_messages(
                &mut transport,
                &tokens,
                &config,
                Arc::new(LoggingConsumer),
                &cancel,
            )
            .await
        }
    }
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> SessionResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_treats_cancellation_as_success() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(SessionError::Cancelled)), 0);
    }

    #[test]
    fn test_exit_code_fails_on_session_errors() {
        let budget = SessionError::ConnectionTimeoutExceeded {
            elapsed_ms: 900_000,
            attempts: 12,
        };
        assert_eq!(exit_code(&Err(budget)), 1);
        assert_eq!(
            exit_code(&Err(SessionError::AuthAlgorithmInvalid("HS256".to_string()))),
            1
        );
    }
}
