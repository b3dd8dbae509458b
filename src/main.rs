use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;
use vpnconnect::config::{Config, ConfigError};
use vpnconnect::controller::VpnController;
use vpnconnect::events::{EventBus, Subscription};
use vpnconnect::gateway::{self, TcpGateway};
use vpnconnect::profile::Credentials;
use vpnconnect::state::VpnState;
use vpnconnect::ui::ConsoleUi;

#[derive(Parser)]
#[command(name = "vpnconnect")]
#[command(about = "Client-side session control for an out-of-process VPN service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and hold the session until Ctrl+C
    Run {
        /// Username for VPN authentication
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Ask the service to tear the tunnel down
    Disconnect,
    /// Check the current connection state
    Status,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { user } => {
            let config = load_config(cli.config)?;
            run_session(config, user).await?;
        }
        Commands::Disconnect => {
            let config = load_config(cli.config)?;
            let Session {
                controller,
                subscription,
            } = Session::build(&config);

            controller.disconnect();
            // The outcome, reconciled or pushed, arrives as a state change.
            await_state_change(subscription, Duration::from_secs(3)).await;
        }
        Commands::Status => {
            let config = load_config(cli.config)?;
            let Session {
                controller,
                subscription,
            } = Session::build(&config);

            controller.check_status().await;
            await_state_change(subscription, Duration::from_secs(2)).await;
        }
        Commands::Init => {
            let config = Config::default();
            let path = PathBuf::from("vpnconnect.toml");
            config.save(&path)?;
            println!("Created default config: vpnconnect.toml");
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let path = path.or_else(Config::default_path);
    match path {
        Some(path) if path.exists() => Config::load(&path),
        _ => {
            info!("no config file found, using defaults");
            Ok(Config::default())
        }
    }
}

struct Session {
    controller: VpnController,
    subscription: Subscription,
}

impl Session {
    /// Wire the bus, the push-event pump, and the controller together.
    fn build(config: &Config) -> Self {
        let ui = Arc::new(ConsoleUi::new(config.ui.homepage.clone()));
        let (bus, intake) = EventBus::new(ui);
        let subscription = bus.subscribe();
        tokio::spawn(bus.run());

        let address = config.service.address.clone();
        let pump_intake = intake.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway::pump_events(&address, pump_intake).await {
                warn!("state-change stream unavailable: {e}");
            }
        });

        let controller = VpnController::new(
            config.profile.to_profile(),
            Arc::new(TcpGateway::new(config.service.address.clone())),
            intake,
            Duration::from_millis(config.service.status_timeout_ms),
        );

        Self {
            controller,
            subscription,
        }
    }
}

/// Wait for one state change to be presented, then tear the subscription
/// down. The change itself is printed by the UI collaborator.
async fn await_state_change(mut subscription: Subscription, window: Duration) {
    match tokio::time::timeout(window, subscription.next()).await {
        Ok(Some(_)) => {}
        _ => println!("No state change observed"),
    }
    subscription.unsubscribe();
}

async fn run_session(
    config: Config,
    user: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Session {
        controller,
        mut subscription,
    } = Session::build(&config);

    let username = match user {
        Some(username) => username,
        None => prompt_username()?,
    };
    let password = rpassword::prompt_password("VPN password: ")?;

    info!(
        "connecting profile {} to {}",
        controller.profile().name,
        controller.profile().server
    );
    controller.connect(Credentials::new(username, password));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("disconnecting");
                controller.disconnect();
                // Leave room for the disconnect, and any fallback status
                // check, to resolve before exiting.
                tokio::time::sleep(Duration::from_millis(1500)).await;
                break;
            }
            change = subscription.next() => {
                match change {
                    Some(change) if change.profile_name == controller.profile().name => {
                        if change.state == VpnState::Idle && change.error.is_some() {
                            warn!("session failed");
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    subscription.unsubscribe();
    Ok(())
}

fn prompt_username() -> std::io::Result<String> {
    use std::io::Write;
    print!("VPN username: ");
    std::io::stdout().flush()?;
    let mut username = String::new();
    std::io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}
