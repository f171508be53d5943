mod core;
mod discovery;
mod display;
mod download;
mod http;
mod input;
mod library;
mod metadata;
mod player;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tunes_proto::config::{Config, UiMode};

use crate::core::{Coordinator, EngineEvent, EngineSettings, ShutdownReason};
use crate::display::UiHandle;
use crate::download::InFlightSet;
use crate::metadata::LoftyExtractor;
use crate::player::PlayerProcess;

#[derive(Parser, Debug, Clone)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    name = "tunes",
    about = "Download the daily tunes.io playlists and play them on a loop"
)]
struct Args {
    /// Show info-level log lines on the console or panel
    #[arg(short, long)]
    verbose: bool,

    /// Number of concurrent download workers
    #[arg(short = 't', long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Full-screen panel instead of plain console output
    #[arg(long)]
    panel: bool,

    /// Keep the library growing but never start the player
    #[arg(long)]
    download_only: bool,

    /// Library directory
    #[arg(long, value_name = "DIR")]
    library: Option<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if self.verbose {
            config.ui.verbose = true;
        }
        if let Some(threads) = self.threads {
            config.download.workers = threads;
        }
        if self.panel {
            config.ui.mode = UiMode::Panel;
        }
        if self.download_only {
            config.download.download_only = true;
        }
        if let Some(ref dir) = self.library {
            config.library.dir = dir.clone();
        }
    }
}

/// Forwards our own log events to the display.
struct DisplayLayer {
    ui: UiHandle,
    max_level: Level,
}

impl<S> tracing_subscriber::Layer<S> for DisplayLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level || !metadata.target().starts_with("tunes") {
            return;
        }

        let mut message = format!(
            "{} [{}] ",
            chrono::Local::now().format("%H:%M:%S"),
            metadata.level()
        );
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        self.ui.log(message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(ui: &UiHandle, verbose: bool) -> anyhow::Result<PathBuf> {
    let log_path = tunes_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let display_layer = DisplayLayer {
        ui: ui.clone(),
        max_level: if verbose { Level::INFO } else { Level::ERROR },
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(display_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,tunes=debug,hyper_util=warn,reqwest=warn")
            }),
        )
        .init();

    Ok(log_path)
}

/// On a panic: purge partial downloads right away, give the terminal back,
/// then ask the coordinator for a fault shutdown. A panic inside a tag lookup
/// is contained to that lookup.
fn install_panic_hook(
    in_flight: Arc<InFlightSet>,
    events: mpsc::Sender<EngineEvent>,
    panel: bool,
) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if metadata::in_tag_lookup() {
            warn!("Tag lookup panicked: {}", info);
            return;
        }
        for (path, _) in in_flight.drain() {
            download::remove_partial(&path);
        }
        if panel {
            display::restore_terminal();
        }
        error!("Panic: {}", info);
        let _ = events.try_send(EngineEvent::Shutdown(ShutdownReason::Fault(info.to_string())));
        default_hook(info);
    }));
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}

fn spawn_signal_listener(events: mpsc::Sender<EngineEvent>) {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        let _ = events
            .send(EngineEvent::Shutdown(ShutdownReason::Signal(name)))
            .await;
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    args.apply(&mut config);

    let (ui, ui_rx) = UiHandle::channel();
    let log_path = init_logging(&ui, config.ui.verbose)?;
    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", config_path);

    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);
    let settings = EngineSettings::from_config(&config, chrono::Local::now().date_naive());
    let mut coordinator = Coordinator::new(
        settings,
        ui.clone(),
        event_tx.clone(),
        Arc::new(LoftyExtractor),
    );
    if config.download.download_only {
        info!("Download-only mode, playback disabled");
    } else {
        coordinator = coordinator.with_player(PlayerProcess::spawn(&config.player)?);
    }

    let panel = config.ui.mode == UiMode::Panel;
    let renderer = display::spawn_renderer(display::create(config.ui.mode, config.ui.verbose)?, ui_rx);

    install_panic_hook(coordinator.in_flight(), event_tx.clone(), panel);
    spawn_signal_listener(event_tx.clone());

    let shutdown = coordinator.shutdown_token();
    if panel {
        input::spawn_panel_input(event_tx.clone(), ui.clone(), shutdown);
    } else {
        input::spawn_console_input(event_tx.clone(), shutdown);
    }

    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            event_tx.clone(),
        );
    }

    let reason = match coordinator.start() {
        Ok(()) => coordinator.run(event_rx).await,
        Err(e) => {
            error!("Unable to start: {:#}", e);
            let reason = ShutdownReason::Fault(e.to_string());
            coordinator.shutdown(&reason).await;
            reason
        }
    };

    info!("Exiting: {}", reason);
    ui.close();
    let _ = renderer.await;
    std::process::exit(reason.exit_code());
}
