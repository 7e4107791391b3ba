//! Slidesync - presentation display and controller sync
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use slidesync::RunOptions;

/// Slidesync - remote-controlled slideshow display and presenter sync
#[derive(Parser, Debug)]
#[command(name = "slidesync")]
#[command(about = "Remote-controlled slideshow display and presenter sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Play a session's slideshow and follow remote commands
    Display(SessionArgs),

    /// Send commands to a session's display and follow its status
    Control(SessionArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Session to attach to
    #[arg(long)]
    session: String,

    /// JSON record store holding sessions and their streams
    #[arg(long, value_name = "PATH", default_value = "slidesync.json")]
    store: PathBuf,

    /// Hosted relay URL (overrides relay.url in the config file).
    ///
    /// Required for `control`. Without it, `display` runs a single-process
    /// demo on an in-process relay that no other process can reach.
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Directory containing .slidesync/config.toml
    #[arg(long, value_name = "DIR")]
    config: Option<PathBuf>,
}

impl SessionArgs {
    fn into_options(self) -> RunOptions {
        let config_dir = self
            .config
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        RunOptions {
            session_id: self.session,
            store_path: self.store,
            relay_url: self.relay_url,
            config_dir,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.role {
        Role::Display(args) => {
            slidesync::core::logging::init("display")?;
            slidesync::run_display(&args.into_options()).await?;
        }
        Role::Control(args) => {
            slidesync::core::logging::init("control")?;
            slidesync::run_control(&args.into_options()).await?;
        }
    }

    Ok(())
}
