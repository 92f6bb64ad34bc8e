//! Command-line interface parsing and handling

pub mod chat;
pub mod replay;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::replay::run_replay;
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::core::pipeline::{MediaAttachment, RenderSnapshot};
use crate::core::providers::ProviderKind;
use crate::core::segmenter::Segmenter;
use crate::core::thinking::ThinkingExtractor;
use crate::utils::logging::init_tracing;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "inferx")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Stream chat completions from Ollama, OpenAI-compatible and Gemini endpoints")]
#[command(
    long_about = "InferX streams chat completions and rebuilds the markdown incrementally: \
text is flushed on a timer, structured content (math, HTML, diagrams, code) is \
segmented into placeholders, and a leading thinking section is split from the answer.\n\n\
Environment Variables:\n\
  INFERX_LOG        Log filter, e.g. inferx=debug (default: warn)\n\
  OPENAI_API_KEY    Key for the built-in openai provider\n\
  GEMINI_API_KEY    Key for the built-in gemini provider"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(short = 'l', long, global = true)]
    pub log: Option<PathBuf>,

    /// Read configuration from this file
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a captured response body through the stream pipeline
    Replay {
        /// File holding the raw response body (SSE or NDJSON)
        capture: PathBuf,
        /// Wire shape of the capture
        #[arg(short = 'k', long, value_enum, default_value_t = CaptureKind::Ollama)]
        kind: CaptureKind,
    },
    /// Stream one prompt from a live endpoint
    Chat {
        /// Prompt to send
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
        /// Provider id from the configuration
        #[arg(short = 'p', long)]
        provider: Option<String>,
        /// Model to request
        #[arg(short = 'm', long)]
        model: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CaptureKind {
    Ollama,
    Openai,
    Gemini,
}

impl From<CaptureKind> for ProviderKind {
    fn from(kind: CaptureKind) -> Self {
        match kind {
            CaptureKind::Ollama => ProviderKind::Ollama,
            CaptureKind::Openai => ProviderKind::OpenAi,
            CaptureKind::Gemini => ProviderKind::Gemini,
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref())?;

    let (config, config_path) = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Replay { capture, kind } => {
            let (segmenter, extractor) = build_pipeline_parts(&config)?;
            run_replay(&capture, kind.into(), &config, segmenter, extractor).await
        }
        Commands::Chat {
            prompt,
            provider,
            model,
        } => {
            let (segmenter, extractor) = build_pipeline_parts(&config)?;
            run_chat(
                &config,
                prompt.join(" "),
                provider.as_deref(),
                model,
                segmenter,
                extractor,
            )
            .await
        }
        Commands::Config => {
            print_config(&config, &config_path);
            Ok(())
        }
    }
}

fn print_config(config: &Config, path: &Path) {
    println!("Config file: {}", path_display(path));
    config.print_all();
}

/// Segmenter and thinking extractor shared by every stream of this process.
fn build_pipeline_parts(
    config: &Config,
) -> Result<(Arc<Segmenter>, ThinkingExtractor), Box<dyn Error>> {
    let emoji = config.load_emoji_table()?;
    let pairs = config.thinking_pairs()?;
    Ok((
        Arc::new(Segmenter::new(Arc::new(emoji))),
        ThinkingExtractor::new(pairs),
    ))
}

/// Final text of one message for a plain terminal.
pub(crate) fn print_snapshot(snapshot: &RenderSnapshot) {
    let source = &snapshot.source_thinking;
    if source.has_thinking() {
        if !source.think_text.is_empty() {
            println!("--- thinking ---");
            println!("{}", source.think_text);
            println!("--- answer ---");
        }
        println!("{}", source.real_text);
    } else {
        println!("{}", snapshot.completed.trim());
    }

    for media in &snapshot.media {
        match media {
            MediaAttachment::Inline { mime_type, data } => {
                println!("[media] {mime_type}, {} bytes inline", data.len())
            }
            MediaAttachment::File { mime_type, uri } => println!("[media] {mime_type} at {uri}"),
        }
    }

    let stats = &snapshot.stats;
    if let Some(rate) = stats.prompt_tokens_per_second() {
        eprintln!(
            "{} prompt tokens, {:.1} tokens/s",
            stats.prompt_eval_count.unwrap_or_default(),
            rate
        );
    }
    if let Some(rate) = stats.tokens_per_second() {
        eprintln!(
            "{} tokens, {:.1} tokens/s",
            stats.eval_count.unwrap_or_default(),
            rate
        );
    }
    let cache = &snapshot.processed.cache;
    if !cache.is_empty() {
        eprintln!("{} structured block(s) segmented", cache.len());
    }
}
