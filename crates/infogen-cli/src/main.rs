//! `infogen` command line.
//!
//! ```text
//! infogen [--config FILE] generate --prompt "A blueprint of a pump" --output pump.png
//! infogen text --request body.json --model gemini-1.5-flash
//! infogen models
//! infogen check-config
//! ```

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use infogen_core::ModelChain;
use infogen_runtime::wire::{GenerateResponseBody, ResponseBody};
use infogen_runtime::{ChainKind, GenerationOptions, GenerationService, RuntimeConfig, WireResponse};

#[derive(Debug, Parser)]
#[command(
    name = "infogen",
    version,
    about = "Generate diagrams and text through a model fallback chain"
)]
struct Cli {
    /// Runtime configuration file (YAML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image, SVG diagram or text through the image chain
    Generate(GenerateArgs),

    /// Generate text through the text chain
    Text(GenerateArgs),

    /// List the models the configured credential can call
    Models,

    /// Validate the configuration and print it with defaults filled in
    CheckConfig,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Request body JSON file. Reads stdin when omitted or "-".
    #[arg(long, short)]
    request: Option<PathBuf>,

    /// Use a bare prompt instead of a request body
    #[arg(long, short, conflicts_with = "request")]
    prompt: Option<String>,

    /// Model to try, in priority order. Repeat to build a chain.
    #[arg(long = "model", short = 'm')]
    models: Vec<String>,

    /// Per-attempt timeout, e.g. "30s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Write the generated image, SVG or text to this file
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("infogen error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Generate(args) => run_generate(ChainKind::Image, args, config).await,
        Command::Text(args) => run_generate(ChainKind::Text, args, config).await,
        Command::Models => run_models(config).await,
        Command::CheckConfig => run_check_config(config),
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

async fn run_generate(kind: ChainKind, args: GenerateArgs, config: RuntimeConfig) -> Result<ExitCode> {
    let body = read_request(&args)?;
    let service = GenerationService::new(config).context("failed to set up generation service")?;

    let options = GenerationOptions {
        model_chain: (!args.models.is_empty())
            .then(|| ModelChain::new(args.models.iter().map(String::as_str))),
        per_attempt_timeout: args.timeout,
    };

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling generation");
                cancel.cancel();
            }
        })
    };

    let response = service.handle(kind, &body, &options, &cancel).await;
    interrupt.abort();

    println!(
        "{}",
        serde_json::to_string_pretty(&response.body).context("failed to render response")?
    );

    if let Some(path) = &args.output {
        write_output(path, &response)?;
    }

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_request(args: &GenerateArgs) -> Result<Value> {
    if let Some(prompt) = &args.prompt {
        return Ok(json!({ "prompt": prompt }));
    }

    let raw = match &args.request {
        Some(path) if path.as_os_str() != "-" => fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {}", path.display()))?,
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read request from stdin")?;
            buffer
        }
    };

    serde_json::from_str(&raw).context("request body is not valid JSON")
}

fn write_output(path: &Path, response: &WireResponse) -> Result<()> {
    let bytes = match &response.body {
        ResponseBody::Generate(GenerateResponseBody::Image { data, .. }) => BASE64
            .decode(data)
            .context("response image is not valid base64")?,
        ResponseBody::Generate(GenerateResponseBody::Svg { content, .. })
        | ResponseBody::Generate(GenerateResponseBody::Text { content }) => {
            content.clone().into_bytes()
        }
        ResponseBody::Text(body) => body.text.clone().into_bytes(),
        ResponseBody::Error(_) => {
            tracing::warn!(path = %path.display(), "Nothing generated, output not written");
            return Ok(());
        }
    };

    fs::write(path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "Wrote output");
    Ok(())
}

async fn run_models(config: RuntimeConfig) -> Result<ExitCode> {
    let service = GenerationService::new(config).context("failed to set up generation service")?;
    let models = service
        .list_models(None)
        .await
        .context("failed to list models")?;

    let names: Vec<&str> = models.iter().map(|m| m.as_str()).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "count": names.len(), "models": names }))?
    );
    Ok(ExitCode::SUCCESS)
}

fn run_check_config(config: RuntimeConfig) -> Result<ExitCode> {
    let service = GenerationService::new(config).context("configuration is invalid")?;
    print!("{}", service.config().to_yaml()?);
    Ok(ExitCode::SUCCESS)
}
