//! Binary entrypoint for the wallpaper changer.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use rust_wallpaper_changer::api::HttpMetadataSource;
use rust_wallpaper_changer::catalog;
use rust_wallpaper_changer::config::{Configuration, ControlAction, DEFAULT_CONFIG_PATH};
use rust_wallpaper_changer::download::HttpDownloader;
use rust_wallpaper_changer::notify;
use rust_wallpaper_changer::platform::instance::InstanceLock;
use rust_wallpaper_changer::platform::wallpaper::CommandWallpaperSetter;
use rust_wallpaper_changer::tasks::control::{self, ControlRequest};
use rust_wallpaper_changer::WallpaperChanger;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const INSTANCE_LABEL: &str = "wallpaper-changer";

#[derive(Debug, Parser)]
#[command(
    name = "wallpaper-changer",
    version,
    about = "Rotates the desktop wallpaper through a cache of image-board images"
)]
struct Cli {
    /// Path to YAML config file (written with defaults when missing)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Send one command to a running daemon
    Ctl {
        /// Action name (next, prev, toggle-pause, save, exit, status, ...)
        #[arg(value_name = "ACTION", required_unless_present = "hotkey")]
        action: Option<String>,
        /// Trigger string bound in the `hotkeys` config section
        #[arg(long, value_name = "TRIGGER", conflicts_with = "action")]
        hotkey: Option<String>,
        /// Control socket; defaults to the configured one
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive(format!("rust_wallpaper_changer={level}").parse()?)
            .add_directive(format!("wallpaper_changer={level}").parse()?)
            .add_directive("reqwest=warn".parse()?)
            .add_directive("hyper=warn".parse()?),
    };
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_config(path: &Path) -> Result<Configuration> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let cfg = Configuration::load_or_init(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?
        .validated()
        .context("invalid configuration values")?
        .resolve_paths(&cwd);
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.config).await,
        Command::Ctl {
            action,
            hotkey,
            socket,
        } => ctl(&cli.config, action, hotkey, socket).await,
    }
}

async fn ctl(
    config: &Path,
    action: Option<String>,
    hotkey: Option<String>,
    socket: Option<PathBuf>,
) -> Result<()> {
    let socket = match socket {
        Some(socket) => socket,
        None => load_config(config)?.control_socket_path,
    };
    let request = match (action, hotkey) {
        (_, Some(trigger)) => ControlRequest::hotkey(trigger),
        (Some(action), None) => ControlRequest::command(action),
        (None, None) => bail!("an action or --hotkey is required"),
    };
    let reply = control::send(&socket, &request).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    if !reply.ok {
        bail!(
            "daemon rejected request: {}",
            reply.message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn run(config: &Path) -> Result<()> {
    let cfg = load_config(config)?;
    info!(config = %config.display(), "loaded configuration:\n{cfg:#?}");

    let _lock = InstanceLock::acquire(INSTANCE_LABEL)?;

    let notifier = notify::from_settings(cfg.show_toasts, cfg.desktop_notifications);
    let setter = Arc::new(
        CommandWallpaperSetter::new(cfg.wallpaper_command.clone())
            .context("invalid wallpaper command")?,
    );
    let source = HttpMetadataSource::new(cfg.search.api_url.clone())
        .context("failed to build metadata client")?;
    let downloader =
        HttpDownloader::new(cfg.download_timeout).context("failed to build download client")?;

    let catalog = catalog::load(&cfg.catalog_options(), &source, notifier.as_ref())
        .await
        .context("failed to load image cache")?;

    let shutdown = CancellationToken::new();
    let changer = Arc::new(WallpaperChanger::start(
        cfg.engine_settings(),
        catalog,
        downloader,
        setter,
        notifier,
        shutdown.clone(),
    ));
    info!(status = ?changer.status(), "wallpaper changer started");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            shutdown.cancel();
        });
    }

    #[cfg(unix)]
    spawn_signal_handlers(Arc::clone(&changer), shutdown.clone());

    let server = tokio::spawn(control::serve(
        cfg.control_socket_path.clone(),
        Arc::clone(&changer),
        cfg.hotkeys.resolve(),
        shutdown.clone(),
    ));

    shutdown.cancelled().await;
    info!("shutting down");
    changer.exit().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "control socket failed"),
        Err(err) => warn!(error = %err, "control socket task panicked"),
    }
    Ok(())
}

#[cfg(unix)]
fn spawn_signal_handlers(changer: Arc<WallpaperChanger>, shutdown: CancellationToken) {
    let bindings = [
        (SignalKind::terminate(), None),
        (SignalKind::user_defined1(), Some(ControlAction::Next)),
        (SignalKind::user_defined2(), Some(ControlAction::TogglePause)),
    ];
    for (kind, action) in bindings {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(?kind, "failed to register signal handler: {err}");
                continue;
            }
        };
        let changer = Arc::clone(&changer);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        match action {
                            Some(action) => {
                                info!(?kind, %action, "signal received");
                                changer.dispatch(action);
                            }
                            None => {
                                info!("SIGTERM received; initiating shutdown");
                                shutdown.cancel();
                            }
                        }
                    }
                }
            }
        });
    }
}
