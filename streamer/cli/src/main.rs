//! Streamer - terminal client for a streaming text generator
//!
//! Sends each prompt over its own WebSocket connection and prints the reply
//! as it streams in.
//!
//! # Usage
//!
//! ```bash
//! # One prompt
//! streamer "explain ownership in one paragraph"
//!
//! # One request per stdin line
//! printf 'hello\nand again\n' | streamer
//!
//! # Another endpoint, final log as JSON
//! streamer --host gen.internal --port 9000 --json "hello"
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug streamer "hello"
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: Cancel the request in flight (closes the connection normally)

mod render;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use streamer_core::{
    create_connector, load_config, load_config_from_path, ConfigOverrides, FragmentSpacing,
    SessionSnapshot, StreamClient, SubmitRejected,
};

use render::PlainRenderer;

/// Streamer - stream generated replies into the terminal
#[derive(Parser, Debug)]
#[command(name = "streamer")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Prompt to send (reads one prompt per line from stdin when omitted)
    prompt: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "STREAMER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Endpoint host
    #[arg(long)]
    host: Option<String>,

    /// Endpoint port
    #[arg(long)]
    port: Option<u16>,

    /// Endpoint path
    #[arg(long)]
    path: Option<String>,

    /// Connect with TLS (wss://)
    #[arg(long)]
    secure: bool,

    /// Connection timeout in milliseconds
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// How long new messages stay provisional, in milliseconds
    #[arg(long, value_name = "MS")]
    provisional_ms: Option<u64>,

    /// Continuation fragment handling (preserve or trim)
    #[arg(long, value_name = "MODE")]
    fragment_spacing: Option<FragmentSpacing>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the final conversation as JSON instead of streaming text
    #[arg(long)]
    json: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref host) = self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(ref path) = self.path {
            overrides = overrides.with_path(path.clone());
        }
        if self.secure {
            overrides = overrides.with_secure(true);
        }
        if let Some(ms) = self.connect_timeout_ms {
            overrides = overrides.with_connect_timeout_ms(ms);
        }
        if let Some(ms) = self.provisional_ms {
            overrides = overrides.with_provisional_ms(ms);
        }
        if let Some(spacing) = self.fragment_spacing {
            overrides = overrides.with_fragment_spacing(spacing);
        }
        overrides
    }
}

/// Initialize logging on stderr; stdout carries the conversation
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("streamer={level}").parse()?)
        .add_directive(format!("streamer_core={level}").parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Renders snapshots as they change
struct View {
    snapshots: watch::Receiver<SessionSnapshot>,
    renderer: PlainRenderer,
    json: bool,
}

impl View {
    fn refresh(&mut self) -> Result<()> {
        if self.json || !self.snapshots.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let snapshot = self.snapshots.borrow_and_update().clone();
        let mut out = std::io::stdout().lock();
        self.renderer
            .render(&snapshot, &mut out)
            .context("Failed to write to stdout")
    }

    fn finish(&mut self, client: &StreamClient) -> Result<()> {
        let mut out = std::io::stdout().lock();
        if self.json {
            let snapshot = client.snapshot();
            serde_json::to_writer_pretty(&mut out, &snapshot)?;
            writeln!(out)?;
            return Ok(());
        }
        self.renderer
            .finish(&mut out)
            .context("Failed to write to stdout")
    }
}

/// Drive the client until the request has finished and the server closed
async fn drive(client: &mut StreamClient, view: &mut View) -> Result<()> {
    view.refresh()?;
    let mut cancelled = false;

    while client.is_active() {
        tokio::select! {
            progressed = client.next_event() => {
                if !progressed {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                warn!("Interrupted, cancelling request");
                client.cancel();
                cancelled = true;
            }
        }
        view.refresh()?;
    }

    Ok(())
}

async fn run_prompts_from_stdin(client: &mut StreamClient, view: &mut View) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match client.submit(&line) {
            Ok(()) => drive(client, view).await?,
            Err(SubmitRejected::EmptyPrompt) => {}
            Err(e) => eprintln!("streamer: {e}"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = match args.config {
        Some(ref path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        url = %config.transport.url(),
        source = %config.source(),
        "Configuration loaded"
    );

    let connector = create_connector(&config.transport).context("Failed to create transport")?;
    let mut client = StreamClient::new(connector, &config);
    let mut view = View {
        snapshots: client.subscribe(),
        renderer: PlainRenderer::new(),
        json: args.json,
    };

    match args.prompt {
        Some(ref prompt) => {
            client.submit(prompt).context("Prompt rejected")?;
            drive(&mut client, &mut view).await?;
        }
        None => run_prompts_from_stdin(&mut client, &mut view).await?,
    }

    if args.json {
        client.wait_settled().await;
    }
    view.finish(&client)
}
