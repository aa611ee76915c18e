//! GPT-2 text generation CLI
//!
//! Loads a GPT-2 checkpoint and tokenizer and answers prompts.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gpt_gen::model::GptConfig;
use gpt_gen::service::{ChatError, ChatRequest, ChatService, ChatSettings};
use gpt_gen::tokenizer::HfTokenizer;
use gpt_gen::weights::loader as weights_loader;

/// Output format for replies.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON reply or error body
    Json,
}

/// GPT-2 generator - sample text from a pretrained decoder-only transformer.
#[derive(Debug, Parser)]
#[command(
    name = "gpt-gen",
    version,
    about = "Generate text with a GPT-2 style transformer",
    long_about = "Runs a GPT-2 decoder-only transformer on the CPU.\n\n\
                  Weights are read from a safetensors file in the HuggingFace GPT-2 layout."
)]
struct Cli {
    /// The prompt to continue
    #[arg(index = 1)]
    prompt: Option<String>,

    /// Path to model weights (.safetensors)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Model config (defaults to config.json next to the weights)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tokenizer file (defaults to tokenizer.json next to the weights)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Number of tokens to generate
    #[arg(short = 'n', long, default_value = "50")]
    max_new_tokens: usize,

    /// Top-k sampling (0 = disabled)
    #[arg(long, default_value = "50")]
    top_k: usize,

    /// Sampling temperature (0 = greedy, higher = more random)
    #[arg(short, long, default_value = "0.8")]
    temperature: f32,

    /// Random seed for reproducible generation
    #[arg(long)]
    seed: Option<u64>,

    /// Sliding context window (defaults to the model's context length)
    #[arg(long)]
    context_size: Option<usize>,

    /// Stop when the tokenizer's end-of-text token is produced
    #[arg(long)]
    stop_at_eos: bool,

    /// Interactive REPL mode
    #[arg(short, long)]
    interactive: bool,

    /// Print model info and exit
    #[arg(long)]
    info: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "plain")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    prompt: &'a str,
    reply: &'a str,
    generation_time_ms: u64,
    seed: Option<u64>,
    temperature: f32,
    top_k: usize,
    max_new_tokens: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.info {
        return print_model_info(&cli);
    }

    let service = load_service(&cli)?;

    if cli.interactive {
        return run_interactive_mode(&service, &cli);
    }

    let prompt = cli.prompt.as_deref().context(
        "No prompt provided. Usage: gpt-gen --weights model.safetensors \"Hello, I am\"\n\
         Or run interactive mode: gpt-gen --weights model.safetensors --interactive\n\
         Run gpt-gen --help for more options.",
    )?;

    let ok = respond(&service, &cli, prompt)?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "gpt_gen=debug" } else { "gpt_gen=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Print information about the model.
fn print_model_info(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;

    println!("GPT-2 Generator Model Info");
    println!("==========================");
    println!();
    println!("Configuration:");
    println!("  Vocabulary size: {} tokens", config.vocab_size);
    println!("  Context length:  {} tokens", config.context_length);
    println!("  Layers:          {}", config.n_layers);
    println!("  Attention heads: {}", config.n_heads);
    println!("  Embedding dim:   {}", config.emb_dim);
    println!("  Dropout:         {}", config.drop_rate);
    println!("  QKV bias:        {}", config.qkv_bias);
    println!();

    if let Some(weights_path) = &cli.weights {
        println!("Weights path: {}", weights_path.display());
        if weights_path.exists() {
            let metadata = std::fs::metadata(weights_path)?;
            println!("Weights size: {} MB", metadata.len() / (1024 * 1024));
            let model =
                weights_loader::load_pretrained(weights_path, config, &candle_core::Device::Cpu)
                    .context("Failed to load weights")?;
            println!("Parameters:   {}", model.num_parameters());
        } else {
            println!("Weights file not found at specified path");
        }
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<GptConfig> {
    let config = match (&cli.config, &cli.weights) {
        (Some(path), _) => weights_loader::load_config(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        (None, Some(weights)) => weights_loader::load_config_for_weights(weights)
            .context("Failed to read config next to weights")?,
        (None, None) => GptConfig::default(),
    };
    Ok(config)
}

fn load_service(cli: &Cli) -> Result<ChatService<HfTokenizer>> {
    let weights_path = cli
        .weights
        .as_deref()
        .context("No weights provided. Pass `--weights path/to/model.safetensors`.")?;
    if !weights_path.exists() {
        anyhow::bail!("Weights file not found: {}", weights_path.display());
    }

    let config = resolve_config(cli)?;
    tracing::debug!(path = %weights_path.display(), "loading weights");
    let model = weights_loader::load_pretrained(weights_path, config, &candle_core::Device::Cpu)
        .context("Failed to load weights")?;

    let tokenizer_path = tokenizer_path(cli, weights_path);
    let tokenizer = HfTokenizer::from_file(&tokenizer_path)
        .with_context(|| format!("Failed to load tokenizer {}", tokenizer_path.display()))?;

    let settings = ChatSettings {
        max_new_tokens: cli.max_new_tokens,
        top_k: (cli.top_k > 0).then_some(cli.top_k),
        temperature: cli.temperature,
        context_size: cli.context_size,
        seed: cli.seed,
        stop_at_eos: cli.stop_at_eos,
    };
    Ok(ChatService::new(model, tokenizer, settings))
}

fn tokenizer_path(cli: &Cli, weights_path: &Path) -> PathBuf {
    cli.tokenizer.clone().unwrap_or_else(|| {
        weights_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("tokenizer.json")
    })
}

fn run_interactive_mode(service: &ChatService<HfTokenizer>, cli: &Cli) -> Result<()> {
    println!("GPT-2 Generator - Interactive Mode");
    println!("Type a prompt and press Enter. Type 'quit' or 'exit' to leave.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        respond(service, cli, input)?;
        println!();
    }

    Ok(())
}

/// Answer one prompt and print the result. Returns `false` if the service reported an error.
fn respond(service: &ChatService<HfTokenizer>, cli: &Cli, prompt: &str) -> Result<bool> {
    let start = Instant::now();
    let result = service.handle(&ChatRequest {
        message: prompt.to_string(),
    });
    let generation_time_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

    match (&result, cli.format) {
        (Ok(reply), OutputFormat::Plain) => println!("{}", reply.reply),
        (Ok(reply), OutputFormat::Json) => {
            let payload = JsonOutput {
                prompt,
                reply: &reply.reply,
                generation_time_ms,
                seed: cli.seed,
                temperature: cli.temperature,
                top_k: cli.top_k,
                max_new_tokens: cli.max_new_tokens,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        (Err(err), OutputFormat::Plain) => eprintln!("Error: {err}"),
        (Err(err), OutputFormat::Json) => print_error_json(err)?,
    }

    Ok(result.is_ok())
}

fn print_error_json(err: &ChatError) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&err.body())?);
    Ok(())
}
