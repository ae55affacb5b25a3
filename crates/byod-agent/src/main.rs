use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use byod_agent::api::{AppState, create_router};
use byod_agent::auth::{AccountsApi, HttpAccountsClient};
use byod_agent::config::{APP_NAME, AgentConfig, default_config_file};
use byod_agent::context::{AgentContext, Remotes};
use byod_agent::db::Database;
use byod_agent::fleet::{HttpFleetClient, TunnelManager};
use byod_agent::paths::{AgentPaths, expand_path};
use byod_agent::tools::TunnelBinary;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(config: AgentConfig, cmd: ServeCommand) -> Result<()> {
    handle_serve(config, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let config_file = match &cli.common.config {
        Some(path) => match path.to_str() {
            Some(text) => expand_path(text)?,
            None => path.clone(),
        },
        None => default_config_file()?,
    };
    debug!("config: {}", config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_main(AgentConfig::load(&config_file)?, cmd),
        Command::Init { force } => {
            if config_file.exists() && !force {
                anyhow::bail!(
                    "config already exists at {} (use --force to overwrite)",
                    config_file.display()
                );
            }
            AgentConfig::write_default(&config_file)?;
            info!("Wrote {}", config_file.display());
            Ok(())
        }
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                let config = AgentConfig::load(&config_file)?;
                print!(
                    "{}",
                    toml::to_string_pretty(&config).context("serializing config to TOML")?
                );
                Ok(())
            }
            ConfigCommand::Path => {
                println!("{}", config_file.display());
                Ok(())
            }
        },
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "BYOD Agent - exposes locally attached mobile devices as WebDriver endpoints.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -v)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

impl CommonOpts {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.trace {
            LevelFilter::Trace
        } else if self.debug {
            LevelFilter::Debug
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the agent
    Serve(ServeCommand),
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Username of the host owner
    #[arg(long, env = "BYOD_AGENT_USER")]
    user: Option<String>,
    /// Access key of the host owner
    #[arg(long, env = "BYOD_AGENT_KEY", hide_env_values = true)]
    key: Option<String>,
    /// Tunnel environment (prod or stage)
    #[arg(long)]
    env: Option<String>,
    /// Path to the tunnel binary
    #[arg(long, value_name = "PATH")]
    tunnel: Option<String>,
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

impl ServeCommand {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(user) = self.user {
            config.account.user = user;
        }
        if let Some(key) = self.key {
            config.account.key = key;
        }
        if let Some(env) = self.env {
            config.tunnel.env = env;
        }
        if let Some(tunnel) = self.tunnel {
            config.tunnel.binary = tunnel;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

/// HTTP spans go through `tracing`, services log through `log`.
fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = common.log_level();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.to_string().to_lowercase();
        EnvFilter::new(format!("byod_agent={level},tower_http={level}"))
    });

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let ansi = env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(ansi))
            .try_init()
            .ok();
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_level(level)
        .try_init()
        .ok();
}

async fn handle_serve(mut config: AgentConfig, cmd: ServeCommand) -> Result<()> {
    cmd.apply(&mut config);
    let (user, key) = config.account.resolve()?;

    let paths = AgentPaths::new(expand_path(&config.paths.work_dir)?);
    paths.ensure()?;

    // Leases never survive a restart.
    let database = Database::recreate(&paths.lease_db())
        .await
        .context("resetting port registry")?;

    let accounts: Arc<dyn AccountsApi> = Arc::new(HttpAccountsClient::new(
        &config.auth.basic_url,
        config.auth.bearer_url.clone(),
        &user,
        &key,
        config.auth.request_timeout(),
    )?);
    let owner = accounts
        .validate_basic(&user, &key)
        .await
        .context("authenticating host owner")?;
    info!("Authenticated as {} (org {})", owner.username, owner.org_id());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("Listening on http://{}", addr);

    let tunnel = Arc::new(TunnelManager::new(
        TunnelBinary::new(expand_path(&config.tunnel.binary)?),
        config.tunnel.info_port,
        config.fleet.request_timeout(),
    )?);
    tunnel
        .launch(&user, &key, config.tunnel.env == "stage")
        .await?;
    tokio::time::sleep(config.tunnel.startup_delay()).await;

    let fleet = Arc::new(HttpFleetClient::for_owner(
        &config.fleet.sync_url,
        &owner,
        config.fleet.request_timeout(),
    )?);
    let remotes = Remotes {
        accounts,
        fleet,
        tunnel: tunnel.clone(),
    };
    let ctx = Arc::new(AgentContext::new(config, paths, &database, owner, remotes)?);

    ctx.fleet.announce_empty().await;
    ctx.spawn_background();
    let bootstrap = Arc::clone(&ctx);
    ctx.supervisor.spawn_once("ios-tunnel", async move {
        if let Err(e) = bootstrap.ios_tunnel.start().await {
            warn!("iOS tunnel not started: {:#}", e);
        }
        Ok(())
    });

    let app = create_router(AppState::from_context(&ctx));
    let server_stop = CancellationToken::new();
    let server = tokio::spawn({
        let stop = server_stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    shutdown_signal().await?;
    info!("Shutdown signal received");

    if !ctx.supervisor.shutdown(ctx.config.discovery.join_timeout()).await {
        warn!("Background tasks did not stop in time");
    }
    ctx.fleet.announce_empty().await;

    server_stop.cancel();
    match tokio::time::timeout(ctx.config.server.shutdown_grace(), server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => warn!("HTTP server error: {}", e),
        Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
        Err(_) => warn!("HTTP server did not stop within the grace period"),
    }

    ctx.processes.stop_all().await;
    ctx.ios_tunnel.kill().await;
    tunnel.kill().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("installing Ctrl+C handler")
    };

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("installing SIGTERM handler")?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    Ok(())
}
