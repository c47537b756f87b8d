use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use subtide::config::Config;
use subtide::orchestrator::{Orchestrator, Session};
use subtide::pipeline::{default_output_path, translate_document};
use subtide::progress::{fmt_elapsed, ConsoleObserver};
use subtide::translate::context::ContextMode;
use subtide::translate::gemini::GeminiClient;
use subtide::translate::memory::TranslationMemory;
use subtide::translate::store::SqliteStore;
use subtide::translate::TranslateError;

#[derive(Parser, Debug)]
#[command(name = "subtide")]
#[command(about = "Translate ASS subtitle dialogue with a remote language model", long_about = None)]
struct Args {
    /// Config file (default: ./subtide.toml when present)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Log events as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate the dialogue of an .ass file
    Translate {
        #[arg(value_name = "ASS")]
        input: PathBuf,

        /// Output file (default: <input_stem>_persian.ass)
        #[arg(short, long, value_name = "ASS")]
        output: Option<PathBuf>,

        /// Number of chunks (1-5)
        #[arg(long)]
        chunks: Option<usize>,

        /// Context mode for the prompt
        #[arg(long, value_enum)]
        context: Option<ContextArg>,

        /// Target language code
        #[arg(long)]
        target_lang: Option<String>,

        /// Score translations and report averages
        #[arg(long)]
        quality_check: bool,

        /// No progress output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Manage the persisted translation memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum MemoryAction {
    /// Write the memory as pretty JSON (stdout when no path)
    Export {
        #[arg(value_name = "JSON")]
        path: Option<PathBuf>,
    },
    /// Replace the memory with a JSON array of entries
    Import {
        #[arg(value_name = "JSON")]
        path: PathBuf,
    },
    /// Remove every entry
    Clear,
    /// Entry count and capacity
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContextArg {
    Full,
    Limited,
}

impl From<ContextArg> for ContextMode {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Full => ContextMode::Full,
            ContextArg::Limited => ContextMode::Limited,
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> TranslateError {
    TranslateError::InvalidInput(format!("{}: {e}", path.display()))
}

fn open_memory(config: &Config) -> Result<TranslationMemory, TranslateError> {
    let store = SqliteStore::open(&config.memory.db_path)?;
    Ok(TranslationMemory::load(Arc::new(store), config.memory.capacity))
}

#[allow(clippy::too_many_arguments)]
async fn run_translate(
    mut config: Config,
    input: PathBuf,
    output: Option<PathBuf>,
    chunks: Option<usize>,
    context: Option<ContextArg>,
    target_lang: Option<String>,
    quality_check: bool,
    quiet: bool,
) -> Result<ExitCode, TranslateError> {
    if let Some(chunks) = chunks {
        config.run.chunk_count = chunks;
    }
    if let Some(mode) = context {
        config.context.mode = mode.into();
    }
    if let Some(lang) = target_lang {
        config.run.target_language = lang;
    }
    config.quality.quality_check |= quality_check;

    // Key problems surface before the input is even read.
    let client = GeminiClient::new(&config.api)?;
    let content = std::fs::read_to_string(&input).map_err(|e| io_error(&input, e))?;
    let output = output.unwrap_or_else(|| default_output_path(&input));

    let orchestrator = Orchestrator::new(Arc::new(client), config.run_settings());
    let mut session = Session::new(open_memory(&config)?);
    let observer = ConsoleObserver::new(!quiet);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let outcome = translate_document(&orchestrator, &mut session, &content, cancel, &observer).await?;
    std::fs::write(&output, &outcome.content).map_err(|e| io_error(&output, e))?;
    for stage in orchestrator.metrics().summary() {
        debug!(
            stage = stage.stage.as_str(),
            count = stage.count,
            p50_ms = stage.p50.as_millis() as u64,
            p95_ms = stage.p95.as_millis() as u64,
            max_ms = stage.max.as_millis() as u64,
            "stage_latency"
        );
    }

    info!(
        output = %output.display(),
        requested = outcome.requested,
        translated = outcome.translated,
        "output_written"
    );
    eprintln!(
        "{} of {} unique lines translated ({} from memory, {} remote calls, {} retries) in {} -> {}",
        outcome.translated,
        outcome.requested,
        outcome.summary.memory_hits,
        outcome.summary.remote_calls,
        outcome.summary.retry_count,
        fmt_elapsed(outcome.summary.elapsed.as_secs_f64()),
        output.display()
    );

    if outcome.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            missing = outcome.requested - outcome.translated,
            "some lines were left untranslated"
        );
        Ok(ExitCode::from(2))
    }
}

fn run_memory(config: &Config, action: MemoryAction) -> Result<ExitCode, TranslateError> {
    let mut memory = open_memory(config)?;
    match action {
        MemoryAction::Export { path } => {
            let json = memory.export_json()?;
            match path {
                Some(path) => {
                    std::fs::write(&path, json).map_err(|e| io_error(&path, e))?;
                    eprintln!("exported {} entries to {}", memory.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        MemoryAction::Import { path } => {
            let json = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            let count = memory.import_json(&json)?;
            eprintln!("imported {count} entries");
        }
        MemoryAction::Clear => {
            memory.clear()?;
            eprintln!("translation memory cleared");
        }
        MemoryAction::Stats => {
            println!("entries:  {}", memory.len());
            println!("capacity: {}", memory.capacity());
            println!("store:    {}", config.memory.db_path.display());
            if let Some(newest) = memory.recent(1).first() {
                println!("newest:   \"{}\" -> \"{}\"", newest.source, newest.target);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    subtide::init_tracing(args.log_json);

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "config load failed");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Translate {
            input,
            output,
            chunks,
            context,
            target_lang,
            quality_check,
            quiet,
        } => {
            run_translate(config, input, output, chunks, context, target_lang, quality_check, quiet).await
        }
        Command::Memory { action } => run_memory(&config, action),
    };

    match result {
        Ok(code) => code,
        Err(TranslateError::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            error!(error = %e, "subtide failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
