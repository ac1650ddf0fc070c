//! Stdio host for the broadcaster.
//!
//! Reads operator commands and viewer signaling from stdin as JSON lines,
//! writes outgoing signaling to stdout as JSON lines, and logs engine events
//! to stderr.

mod commands;
mod config;

pub use commands::{parse_line, HostCommand, HostInput};
pub use config::{config_path, HostConfig, CONFIG_ENV};

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livecast_capture::SyntheticSource;
use livecast_engine::{service, Engine};
use livecast_ipc::{
    command_channel, event_channel, signal_channel, EngineCommand, EngineEvent, SignalMessage,
    StaticIdentity,
};
use livecast_transport::RtcTransportFactory;

/// Initialize logging. Stdout is reserved for signaling.
fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livecast_host=info,livecast_engine=debug,livecast_capture=info,livecast_transport=info,webrtc=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Run the host until stdin closes or `quit` is read.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    info!("Livecast host starting");

    let config = HostConfig::load(config_path().as_deref())?;

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let (signaling, outbound) = signal_channel();

    let engine = Engine::new(
        config.engine.clone(),
        Arc::new(SyntheticSource::new(config.capture())),
        Arc::new(RtcTransportFactory::new(config.engine.transport_config())),
        Arc::new(StaticIdentity(config.broadcaster_id.clone())),
        Arc::new(signaling),
        command_rx,
        event_tx,
    )
    .context("Failed to create engine")?;
    service::init(engine.controller().clone()).context("Failed to register service")?;

    let engine_thread = thread::Builder::new()
        .name("engine".into())
        .spawn(move || {
            let mut engine = engine;
            engine.run();
        })
        .context("Failed to spawn engine thread")?;

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
    let writer = spawn_signal_writer(outbound, done_rx)?;
    spawn_event_logger(event_rx)?;

    let result = read_input(&command_tx);

    service::shutdown();
    if command_tx.send(EngineCommand::Shutdown).is_err() {
        warn!("Engine already stopped");
    }
    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }

    drop(done_tx);
    if writer.join().is_err() {
        error!("Signal writer panicked");
    }

    info!("Livecast host stopped");
    result
}

/// Forward stdin lines to the engine until EOF or `quit`.
fn read_input(commands: &Sender<EngineCommand>) -> anyhow::Result<()> {
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;

        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                warn!("Ignoring input line: {:#}", e);
                continue;
            }
        };

        let command = match input {
            HostInput::Signal(message) => EngineCommand::Signal(message),
            HostInput::Command(HostCommand::Quit) => break,
            HostInput::Command(HostCommand::Status) => {
                log_status();
                continue;
            }
            HostInput::Command(command) => match command.to_engine() {
                Some(command) => command,
                None => continue,
            },
        };

        commands
            .send(command)
            .context("Engine stopped accepting commands")?;
    }

    Ok(())
}

fn log_status() {
    match service::get() {
        Some(controller) => {
            let snapshot = controller.snapshot();
            info!(
                phase = snapshot.phase.name(),
                session_id = snapshot.session_id.as_deref().unwrap_or("-"),
                viewers = snapshot.viewer_count,
                pending = snapshot.pending_viewers,
                compositing = snapshot.compositing,
                "Status"
            );
        }
        None => warn!("Broadcast service is not running"),
    }
}

/// Write outgoing signaling to stdout until `done` closes.
fn spawn_signal_writer(
    outbound: Receiver<SignalMessage>,
    done: Receiver<()>,
) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("signal-writer".into())
        .spawn(move || {
            let write = |message: SignalMessage| {
                if let Err(e) = write_line(&message) {
                    warn!("Failed to write {} message: {}", message.name(), e);
                }
            };

            loop {
                select! {
                    recv(outbound) -> message => match message {
                        Ok(message) => write(message),
                        Err(_) => break,
                    },
                    recv(done) -> _ => {
                        outbound.try_iter().for_each(write);
                        break;
                    }
                }
            }
            debug!("Signal writer stopped");
        })
        .context("Failed to spawn signal writer")
}

fn write_line(message: &SignalMessage) -> anyhow::Result<()> {
    let line = serde_json::to_string(message)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

fn spawn_event_logger(events: Receiver<EngineEvent>) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("event-logger".into())
        .spawn(move || {
            for event in events.iter() {
                log_event(&event);
            }
        })
        .context("Failed to spawn event logger")
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::PhaseChanged { previous, current } => {
            info!(from = previous.name(), to = current.name(), "Phase changed");
        }
        EngineEvent::Status(message) => info!("{}", message),
        EngineEvent::Error {
            category,
            message,
            viewer_id,
            fatal,
        } => error!(
            ?category,
            viewer_id = viewer_id.as_deref().unwrap_or("-"),
            fatal,
            "{}",
            message
        ),
        EngineEvent::ViewerConnected { viewer_id } => info!(viewer_id, "Viewer connected"),
        EngineEvent::ViewerDisconnected { viewer_id } => info!(viewer_id, "Viewer disconnected"),
        EngineEvent::Snapshot(snapshot) => debug!(?snapshot, "Snapshot"),
        EngineEvent::Ready => info!("Engine ready"),
        EngineEvent::Shutdown => info!("Engine shut down"),
    }
}
