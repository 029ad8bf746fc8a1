//! Inclusion client CLI
//!
//! Usage:
//!   inclusion-client check 0x3017...
//!   inclusion-client replay --input 0x3017... --frames frames.jsonl

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use inclusion_client::{ClientHandle, ScriptedTransport};
use inclusion_core::{encode, validate, ClientConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inclusion-client")]
#[command(about = "Submit identity commitments and correlate inclusion-proof responses")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Recipient address (base64)
    #[arg(long, global = true, env = "INCLUSION_RECIPIENT_ID")]
    recipient_id: Option<String>,

    /// Recipient public key (base64)
    #[arg(long, global = true, env = "INCLUSION_RECIPIENT_KEY")]
    recipient_key: Option<String>,

    /// Literal payload prefix
    #[arg(long, global = true, env = "INCLUSION_COMMAND_TAG")]
    command_tag: Option<String>,

    /// Base URL for round-tracking links
    #[arg(long, global = true)]
    dashboard_url: Option<String>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(id) = &self.recipient_id {
            config.recipient_id = id.clone();
        }
        if let Some(key) = &self.recipient_key {
            config.recipient_public_key = key.clone();
        }
        if let Some(tag) = &self.command_tag {
            config.command_tag = tag.clone();
        }
        if let Some(url) = &self.dashboard_url {
            config.round_dashboard_url = url.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a commitment and print the wire payload
    Check {
        /// Commitment: bare hex, JSON string, or {"identityCommitment": ...}
        input: String,
    },
    /// Run a full request against recorded response frames
    Replay {
        /// Commitment: bare hex, JSON string, or {"identityCommitment": ...}
        #[arg(long)]
        input: String,

        /// Newline-delimited raw response frames
        #[arg(long)]
        frames: PathBuf,

        /// Delay before each frame, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Inject a timeout if nothing resolves within this many milliseconds
        /// (defaults to the configured network wait)
        #[arg(long)]
        wait_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "inclusion_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.resolve()?;

    match cli.command {
        Command::Check { input } => check(&config, &input),
        Command::Replay {
            input,
            frames,
            delay_ms,
            wait_ms,
        } => replay(&config, &input, &frames, delay_ms, wait_ms).await,
    }
}

fn check(config: &ClientConfig, input: &str) -> Result<()> {
    let commitment = validate(input).context("Wrong format for identity commitment")?;
    let payload = encode(&commitment, &config.command_tag);

    tracing::info!(
        commitment = %commitment,
        payload_len = payload.len(),
        "Commitment is valid"
    );
    println!("{}", String::from_utf8_lossy(&payload));
    Ok(())
}

async fn replay(
    config: &ClientConfig,
    input: &str,
    frames_path: &Path,
    delay_ms: u64,
    wait_ms: Option<u64>,
) -> Result<()> {
    let content = std::fs::read_to_string(frames_path)
        .with_context(|| format!("reading frames from {}", frames_path.display()))?;
    let frames: Vec<Vec<u8>> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect();

    tracing::info!(frames = frames.len(), "Replaying response frames");

    let transport = ScriptedTransport::new(frames)
        .with_delay(Duration::from_millis(delay_ms))
        .with_follower_timeout(Duration::from_millis(config.network_follower_timeout_ms));
    let handle = ClientHandle::spawn(config, transport)?;

    let submitted = handle.submit(input).await;
    let generation = match submitted {
        Ok(generation) => generation,
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&*handle.snapshot())?);
            return Err(err.into());
        }
    };

    let wait_ms = wait_ms.unwrap_or(config.network_wait_timeout_ms);
    let finished = handle.wait_finished(generation);
    let snapshot = match tokio::time::timeout(Duration::from_millis(wait_ms), finished).await {
        Ok(snapshot) => snapshot?,
        Err(_) => {
            tracing::warn!(wait_ms, "No response in time, injecting timeout");
            handle.inject_timeout()?;
            handle.wait_finished(generation).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&*snapshot)?);

    if let Some(err) = snapshot.failure() {
        anyhow::bail!("request {} failed: {}", generation, err);
    }
    Ok(())
}
