//! Headless mode runner - display and controller event loops
//!
//! Each role loads settings, opens the record store, picks a relay, and then
//! runs until `quit` on stdin or Ctrl-C.
//!
//! Without a relay URL the display runs on an in-process relay that no other
//! process can reach. A controller cannot do anything useful that way, so it
//! refuses to start.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;

use slidesync_app::config::{load_settings, Settings};
use slidesync_app::{ControllerSession, DisplaySession, JsonFileStore};
use slidesync_core::prelude::*;
use slidesync_core::CommandKind;
use slidesync_relay::{ChannelManager, MemoryRelay, Relay, WsRelay};

use super::{HeadlessEvent, HeadlessObserver};

/// Capacity of the stdin line channel.
const STDIN_CHANNEL_CAPACITY: usize = 16;

/// Command-line inputs shared by both roles.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub session_id: String,
    /// JSON document read by [`JsonFileStore`]
    pub store_path: PathBuf,
    /// Overrides `relay.url` from the config file
    pub relay_url: Option<String>,
    /// Directory containing `.slidesync/config.toml`
    pub config_dir: PathBuf,
}

impl RunOptions {
    /// Relay URL from the command line, else from settings. `None` means
    /// the in-process relay.
    pub fn effective_relay_url(&self, settings: &Settings) -> Option<String> {
        self.relay_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| Some(settings.relay.url.clone()).filter(|url| !url.trim().is_empty()))
    }

    /// Relay URL for the controller, which has no in-process fallback.
    pub fn control_relay_url(&self, settings: &Settings) -> Result<String> {
        self.effective_relay_url(settings).ok_or_else(|| {
            Error::config(
                "control needs a hosted relay (--relay-url or relay.url); \
                 the in-process relay cannot reach a display in another process",
            )
        })
    }
}

/// One line of display input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayInput {
    /// Media ended; `None` means the current item
    Ended(Option<usize>),
    /// Media failed to play; `None` means the current item
    Failed(Option<usize>),
    Quit,
}

/// One line of controller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    Command(CommandKind),
    Quit,
}

/// Parse a display stdin line (`ended [index]`, `failed [index]`, `quit`).
pub fn parse_display_input(line: &str) -> Option<DisplayInput> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let index = match words.next() {
        Some(word) => Some(word.parse::<usize>().ok()?),
        None => None,
    };
    match verb {
        "ended" | "e" => Some(DisplayInput::Ended(index)),
        "failed" | "f" => Some(DisplayInput::Failed(index)),
        "quit" | "q" if index.is_none() => Some(DisplayInput::Quit),
        _ => None,
    }
}

/// Parse a controller stdin line: a command name or alias, or `quit`.
pub fn parse_control_input(line: &str) -> Option<ControlInput> {
    match line.trim() {
        "" => None,
        "quit" | "q" => Some(ControlInput::Quit),
        other => CommandKind::from_str(other).ok().map(ControlInput::Command),
    }
}

/// Run a display session until quit.
pub async fn run_display(options: &RunOptions) -> Result<()> {
    let settings = load_settings(&options.config_dir);
    let store = JsonFileStore::new(&options.store_path);
    info!(
        "Display for '{}' using store {}",
        options.session_id,
        options.store_path.display()
    );

    match options.effective_relay_url(&settings) {
        Some(url) => {
            let relay = connect_relay(&url, &settings).await?;
            let channels =
                ChannelManager::with_join_timeout(relay.clone(), settings.relay.join_timeout());
            let result = drive_display(channels, store, options, &settings).await;
            relay.disconnect().await;
            result
        }
        None => {
            warn!("No relay URL configured, using the in-process relay (single-process demo)");
            let channels =
                ChannelManager::with_join_timeout(MemoryRelay::new(), settings.relay.join_timeout());
            drive_display(channels, store, options, &settings).await
        }
    }
}

/// Run a controller session until quit.
pub async fn run_control(options: &RunOptions) -> Result<()> {
    let settings = load_settings(&options.config_dir);
    let store = JsonFileStore::new(&options.store_path);
    info!(
        "Controller for '{}' logging to {}",
        options.session_id,
        store.log_path().display()
    );

    let url = match options.control_relay_url(&settings) {
        Ok(url) => url,
        Err(e) => {
            HeadlessEvent::error(e.to_string(), true).emit();
            return Err(e);
        }
    };

    let relay = connect_relay(&url, &settings).await?;
    let channels = ChannelManager::with_join_timeout(relay.clone(), settings.relay.join_timeout());
    let result = drive_control(channels, store, options, &settings).await;
    relay.disconnect().await;
    result
}

async fn connect_relay(url: &str, settings: &Settings) -> Result<WsRelay> {
    match WsRelay::connect(url, &settings.relay.api_key, &settings.relay.topic_prefix).await {
        Ok(relay) => Ok(relay),
        Err(e) => {
            HeadlessEvent::error(format!("Relay connection failed: {e}"), true).emit();
            Err(e)
        }
    }
}

async fn drive_display<R>(
    channels: ChannelManager<R>,
    store: JsonFileStore,
    options: &RunOptions,
    settings: &Settings,
) -> Result<()>
where
    R: Relay + Clone + Sync + 'static,
{
    let session_id = options.session_id.as_str();
    let observer = Arc::new(HeadlessObserver::new(session_id));
    HeadlessEvent::session_started("display", session_id).emit();

    let display = match DisplaySession::start(channels, store, session_id, settings, observer).await
    {
        Ok(display) => display,
        Err(e) => {
            HeadlessEvent::error(format!("Display failed to start: {e}"), true).emit();
            return Err(e);
        }
    };

    let (input_tx, mut input_rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    std::thread::spawn(move || read_stdin_blocking(parse_display_input, input_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            input = input_rx.recv(), if stdin_open => match input {
                Some(DisplayInput::Ended(index)) => {
                    display.media_ended(index.unwrap_or(display.state().current_index));
                }
                Some(DisplayInput::Failed(index)) => {
                    display.media_failed(index.unwrap_or(display.state().current_index));
                }
                Some(DisplayInput::Quit) => break,
                None => {
                    info!("Stdin closed, running until Ctrl-C");
                    stdin_open = false;
                }
            },
            _ = &mut ctrl_c => {
                info!("Ctrl-C received");
                break;
            }
        }
    }

    display.shutdown();
    HeadlessEvent::session_ended(session_id).emit();
    Ok(())
}

async fn drive_control<R>(
    channels: ChannelManager<R>,
    store: JsonFileStore,
    options: &RunOptions,
    settings: &Settings,
) -> Result<()>
where
    R: Relay + Clone + Sync + 'static,
{
    let session_id = options.session_id.as_str();
    let observer = Arc::new(HeadlessObserver::new(session_id));
    HeadlessEvent::session_started("control", session_id).emit();

    let controller = ControllerSession::start(channels, store, session_id, settings, observer);

    let (input_tx, mut input_rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    std::thread::spawn(move || read_stdin_blocking(parse_control_input, input_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(ControlInput::Command(kind)) => {
                    info!("Stdin: {} requested", kind);
                    controller.send(kind, None);
                }
                Some(ControlInput::Quit) | None => break,
            },
            _ = &mut ctrl_c => {
                info!("Ctrl-C received");
                break;
            }
        }
    }

    controller.shutdown();
    HeadlessEvent::session_ended(session_id).emit();
    Ok(())
}

/// Read stdin lines on a plain thread and forward the parsed ones.
fn read_stdin_blocking<T>(parse: fn(&str) -> Option<T>, tx: mpsc::Sender<T>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse(trimmed) {
                    Some(input) => {
                        if tx.blocking_send(input).is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown stdin command: {}", trimmed),
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}
