//! PromptTrim CLI binary.
//!
//! Token-saving gateway for LLM providers.
//!
//! # Commands
//!
//! - `serve` - Start the HTTP gateway
//! - `compress` - Compress a prompt toward a ratio
//! - `reduce` - Quality-controlled reduction of a response
//! - `count` - Count tokens for a provider/model
//! - `enforce` - Apply redaction, format and token-budget rules

use std::io::{self, Read};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use prompttrim::{
    compression::{ratio_for_level, CompressionLevel},
    inference::Backends,
    models::Encoding,
    orchestrator::{Orchestrator, ReduceRequest},
    rules::{OutputFormat, RulesConfig, RulesEnforcer},
    server, Config, Provider, TokenAccountant, VERSION,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "prompttrim")]
#[command(version = VERSION)]
#[command(about = "PromptTrim - token-saving gateway for LLM providers", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir, then environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Text source shared by every text command
#[derive(Args)]
struct InputArgs {
    /// Text input (or - for stdin)
    input: Option<String>,

    /// Input file path
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Compress a prompt
    Compress {
        #[command(flatten)]
        io: InputArgs,

        /// Provider whose token accounting applies
        #[arg(short, long, default_value = "openai")]
        provider: String,

        /// Level: minimal, moderate, aggressive
        #[arg(short, long)]
        level: Option<String>,

        /// Explicit ratio in (0, 1], overrides --level
        #[arg(short, long)]
        ratio: Option<f64>,
    },

    /// Reduce a response while keeping it similar to the original
    Reduce {
        #[command(flatten)]
        io: InputArgs,

        /// Summary bound in words
        #[arg(short, long)]
        max_length: Option<usize>,

        /// Similarity target in [0, 1]
        #[arg(short, long)]
        target: Option<f32>,
    },

    /// Count tokens
    Count {
        #[command(flatten)]
        io: InputArgs,

        /// Provider
        #[arg(short, long, default_value = "openai")]
        provider: String,

        /// Model (default: provider's default)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Apply output rules
    Enforce {
        #[command(flatten)]
        io: InputArgs,

        /// Output format: structured, list, free-form
        #[arg(long, default_value = "free-form")]
        format: String,

        /// Token budget
        #[arg(short = 't', long, default_value = "256")]
        max_tokens: usize,

        /// Provider whose token accounting applies
        #[arg(short, long, default_value = "openai")]
        provider: String,

        /// Model (default: provider's default)
        #[arg(short, long)]
        model: Option<String>,

        /// Skip PII redaction
        #[arg(long)]
        no_safety: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(config, host, port),
        Commands::Compress {
            io,
            provider,
            level,
            ratio,
        } => cmd_compress(&config, io, &provider, level, ratio),
        Commands::Reduce {
            io,
            max_length,
            target,
        } => cmd_reduce(&config, io, max_length, target),
        Commands::Count {
            io,
            provider,
            model,
        } => cmd_count(&config, io, &provider, model),
        Commands::Enforce {
            io,
            format,
            max_tokens,
            provider,
            model,
            no_safety,
        } => cmd_enforce(&config, io, &format, max_tokens, &provider, model, !no_safety),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cmd_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { server::serve(&config).await })?;
    Ok(())
}

fn orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let backends = Backends::from_config(&config.backends)?;
    Ok(Orchestrator::from_config(config, &backends)?)
}

fn cmd_compress(
    config: &Config,
    io: InputArgs,
    provider: &str,
    level: Option<String>,
    ratio: Option<f64>,
) -> anyhow::Result<()> {
    let text = read_input(io.input, io.file)?;
    let level = level.unwrap_or_else(|| config.compression.default_level.clone());
    if CompressionLevel::from_name(&level).is_none() {
        tracing::warn!("Unknown level '{}', using moderate ratio", level);
    }
    let ratio = ratio.unwrap_or_else(|| ratio_for_level(&level));
    if !(ratio > 0.0 && ratio <= 1.0) {
        anyhow::bail!("ratio must be within (0, 1], got {ratio}");
    }

    let orchestrator = orchestrator(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(orchestrator.compress_input(&text, ratio, provider))?;

    if io.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.compressed_text);
        eprintln!();
        eprintln!("Compression Statistics:");
        eprintln!("  Strategy:     {:?}", result.strategy);
        eprintln!("  Original:     {} tokens", result.original_token_count);
        eprintln!("  Compressed:   {} tokens", result.compressed_token_count);
        eprintln!("  Savings:      {:.1}%", result.savings_percent);
    }
    Ok(())
}

fn cmd_reduce(
    config: &Config,
    io: InputArgs,
    max_length: Option<usize>,
    target: Option<f32>,
) -> anyhow::Result<()> {
    let text = read_input(io.input, io.file)?;
    let orchestrator = orchestrator(config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(orchestrator.reduce_output(&ReduceRequest {
        text,
        max_length,
        target_similarity: target,
    }))?;

    if io.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.output);
        eprintln!();
        eprintln!("  Similarity:   {:.3}", report.similarity_to_original);
        eprintln!("  Iterations:   {}", report.iterations_used);
        eprintln!("  Words:        {} -> {}", report.original_tokens, report.compressed_tokens);
        eprintln!("  Reduction:    {:.2}%", report.reduction_percent);
    }
    Ok(())
}

fn cmd_count(config: &Config, io: InputArgs, provider: &str, model: Option<String>) -> anyhow::Result<()> {
    let text = read_input(io.input, io.file)?;
    let family: Provider = provider.parse()?;
    let model = model.unwrap_or_else(|| config.providers.get(family).model_for(family));

    let accountant = TokenAccountant::new().with_chars_per_token(config.compression.chars_per_token);
    let tokens = accountant.count(&text, family, &model)?;
    let encoding = Encoding::for_provider(family, &model);

    if io.json {
        let out = json!({
            "provider": family.id(),
            "model": model,
            "encoding": encoding.name(),
            "exact": encoding.is_exact(),
            "tokens": tokens,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{tokens}");
    }
    Ok(())
}

fn cmd_enforce(
    config: &Config,
    io: InputArgs,
    format: &str,
    max_tokens: usize,
    provider: &str,
    model: Option<String>,
    safety: bool,
) -> anyhow::Result<()> {
    let text = read_input(io.input, io.file)?;
    let family: Provider = provider.parse()?;
    let model = model.unwrap_or_else(|| config.providers.get(family).model_for(family));
    let Some(format) = OutputFormat::from_name(format) else {
        anyhow::bail!("Unknown format: {format}. Use: structured, list, free-form");
    };

    let rules = RulesConfig::new(format, max_tokens, safety)?;
    let accountant = TokenAccountant::new().with_chars_per_token(config.compression.chars_per_token);
    let output = RulesEnforcer::new(accountant).enforce(&text, &model, family, &rules);

    if io.json {
        let out = json!({
            "output": output,
            "format": format.name(),
            "max_tokens": max_tokens,
            "safety": safety,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{output}");
    }
    Ok(())
}

// Helper functions

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input.filter(|s| s != "-") {
        Ok(s)
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
