//! OpsDeck Console
//!
//! Follow an operations conversation from the terminal: history first,
//! then live replies, with commands typed on stdin.

mod input;
mod logging;
mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::info;

use opsdeck_sync::config::CONFIG_FILE_NAME;
use opsdeck_sync::{resolve_data_dir, Console, SessionActorHandle, SessionContext, SyncConfig};

use crate::input::{ConsoleInput, HELP};
use crate::logging::{LogFormat, LogOptions};

#[derive(Parser, Debug)]
#[command(name = "opsdeck", version, about = "Follow and drive an OpsDeck conversation")]
struct Cli {
    /// Conversation to open
    #[arg(short, long, env = "OPSDECK_CONVERSATION", conflicts_with = "new")]
    conversation: Option<String>,

    /// Start a new conversation
    #[arg(long)]
    new: bool,

    /// History service base URL
    #[arg(long)]
    history_url: Option<String>,

    /// Live channel WebSocket URL
    #[arg(long)]
    channel_url: Option<String>,

    /// Config file [default: <data-dir>/config.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for config and logs [default: ~/.opsdeck]
    #[arg(long, env = "OPSDECK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log filter directives [default: RUST_LOG, then info]
    #[arg(long, env = "OPSDECK_LOG_FILTER")]
    log_filter: Option<String>,

    /// Log file format
    #[arg(long, env = "OPSDECK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Cli {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            filter: self.log_filter.clone(),
            format: self.log_format,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = resolve_data_dir(cli.data_dir.as_deref())?;
    let logging = logging::init_logging(&data_dir, &cli.log_options())?;
    let config = load_config(&cli, &data_dir)?;

    info!(
        component = "cli",
        event = "cli.started",
        run_id = %logging.run_id,
        log_path = %logging.log_path.display(),
        history_url = %config.history_url,
        channel_url = %config.channel_url,
        "OpsDeck console starting"
    );

    let ctx = SessionContext::from_config(config).context("invalid configuration")?;
    let mut console = Console::new(ctx);

    let handle = match (&cli.conversation, cli.new) {
        (Some(id), false) => console.open(id).await,
        _ => console.start_new().await,
    };

    run(console, handle).await
}

/// Flag > `OPSDECK_*` env > config file > defaults
fn load_config(cli: &Cli, data_dir: &std::path::Path) -> anyhow::Result<SyncConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    let mut config = SyncConfig::load(&path)?;
    config.apply_env()?;
    if let Some(url) = &cli.history_url {
        config.history_url = url.clone();
    }
    if let Some(url) = &cli.channel_url {
        config.channel_url = url.clone();
    }
    Ok(config)
}

async fn run(mut console: Console, mut handle: SessionActorHandle) -> anyhow::Result<()> {
    let mut follower = follow(&handle).await;
    println!("{}", style("Type /help for commands.").dim());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let next = match ConsoleInput::parse(&line) {
            ConsoleInput::Quit => break,
            ConsoleInput::Help => {
                println!("{HELP}");
                None
            }
            ConsoleInput::New => Some(console.start_new().await),
            ConsoleInput::Open(id) => Some(console.open(&id).await),
            ConsoleInput::Reload => console.reload().await,
            ConsoleInput::Bottom => {
                handle.jump_to_latest().await;
                None
            }
            ConsoleInput::Unknown(command) => {
                println!("{} {command}", style("unknown command:").yellow());
                None
            }
            ConsoleInput::Submit(text) => {
                if let Err(err) = handle.submit(text).await {
                    println!("{}", render::fault_line(&err));
                }
                None
            }
        };

        if let Some(next) = next {
            if !next.same_session(&handle) {
                follower.abort();
                follower = follow(&next).await;
            }
            handle = next;
        }
    }

    follower.abort();
    console.leave().await;
    Ok(())
}

/// Print the current snapshot, then every update until the session ends.
/// Falling behind the update stream redraws from the latest snapshot.
async fn follow(handle: &SessionActorHandle) -> JoinHandle<()> {
    let subscription = handle.subscribe().await;
    let handle = handle.clone();
    tokio::spawn(async move {
        let Ok(mut subscription) = subscription else {
            return;
        };
        for line in render::snapshot_lines(&subscription.snapshot) {
            println!("{line}");
        }
        loop {
            match subscription.rx.recv().await {
                Ok(update) => {
                    for line in render::update_lines(&update) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    for line in render::resync_lines(&handle.snapshot(), skipped) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
