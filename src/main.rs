use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::File, path::PathBuf, sync::Arc};
use tabstream::{
    codec::{self, Format},
    queue::{spawn_workers, ChannelDispatcher, ContractRegistry, Worker},
    store::{DiskStore, FileStore},
    DataProcessor, Importable, Settings,
};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod sinks;

use sinks::{FileExport, JsonLinesImport, SinkOptions, JSONL_CONTRACT};

#[derive(Parser)]
#[command(name = "tabstream", version, about = "Stream large CSV and Parquet files in bounded batches")]
struct Cli {
    /// YAML settings file; DATA_PROCESSOR_* variables override it
    #[arg(long, global = true, env = "DATA_PROCESSOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count data rows (header excluded)
    Count { file: PathBuf },
    /// Split a file into header-prefixed chunk files
    Split {
        file: PathBuf,
        /// Data rows per chunk; defaults to the configured chunk size
        #[arg(long)]
        rows: Option<usize>,
        /// Chunk format; defaults to the source format
        #[arg(long)]
        format: Option<String>,
    },
    /// Rewrite a file in another format under the storage root
    Convert {
        input: PathBuf,
        /// Storage key of the output
        dest: String,
        #[arg(long)]
        format: String,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Import a file into a JSON-lines file
    Import {
        /// Local path or storage key
        file: String,
        #[arg(long)]
        out: PathBuf,
        /// Hand batches and chunks to this many workers
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Split inputs larger than this many bytes
        #[arg(long)]
        max_file_size: Option<u64>,
        #[arg(long)]
        chunk_rows: Option<usize>,
        /// Keep going past rejected rows
        #[arg(long)]
        skip_errors: bool,
        #[arg(long)]
        max_errors: Option<u64>,
        /// Validation as `field=rule|rule`, repeatable
        #[arg(long = "rule")]
        rules: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) settings + storage ───────────────────────────────────────
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let store: Arc<dyn FileStore> = Arc::new(DiskStore::from_settings(&settings));
    let start = Instant::now();

    match cli.command {
        Command::Count { file } => {
            let rows = tokio::task::spawn_blocking(move || codec::count_rows(&file)).await??;
            println!("{rows}");
        }

        Command::Split { file, rows, format } => {
            let processor = DataProcessor::new(settings, store);
            let rows = rows.unwrap_or(processor.settings().chunk_rows);
            let format = match format {
                Some(f) => f,
                None => Format::from_path(&file)?.extension().to_string(),
            };
            let chunks = tokio::task::spawn_blocking(move || -> Result<usize> {
                let mut written = 0;
                for chunk in processor.splitter().split(&file, rows, &format)? {
                    println!("{}", serde_json::to_string(&chunk?)?);
                    written += 1;
                }
                Ok(written)
            })
            .await??;
            info!(chunks, elapsed = ?start.elapsed(), "split done");
        }

        Command::Convert {
            input,
            dest,
            format,
            batch_size,
        } => {
            let processor = DataProcessor::new(settings, store);
            let stats = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut contract = FileExport::open(input, batch_size)?;
                Ok(processor.export(&mut contract, &dest, &format)?)
            })
            .await??;
            info!(elapsed = ?start.elapsed(), "convert done");
            println!("{}", serde_json::to_string(&stats)?);
        }

        Command::Import {
            file,
            out,
            workers,
            queue,
            batch_size,
            max_file_size,
            chunk_rows,
            skip_errors,
            max_errors,
            rules,
        } => {
            File::create(&out).with_context(|| format!("creating {}", out.display()))?;
            let options = SinkOptions {
                out,
                batch_size,
                max_file_size,
                chunk_rows,
                skip_errors,
                max_errors,
                rules,
                queue,
            };

            let Some(workers) = workers else {
                let processor = DataProcessor::new(settings, store);
                let mut contract = JsonLinesImport::new(options, false)?;
                let stats = tokio::task::spawn_blocking(move || processor.import(&mut contract, &file))
                    .await??;
                info!(elapsed = ?start.elapsed(), "import done");
                println!("{}", serde_json::to_string(&stats)?);
                return Ok(());
            };

            // ─── 3) worker pool ──────────────────────────────────────
            let registry = ContractRegistry::new().register(JSONL_CONTRACT, |params| {
                Ok(Box::new(JsonLinesImport::from_params(params)?) as Box<dyn Importable + Send>)
            });
            // workers process inline, so they get no dispatcher
            let worker = Arc::new(Worker::new(
                Arc::new(DataProcessor::new(settings.clone(), store.clone())),
                Arc::new(registry),
            ));
            let (dispatcher, rx) = ChannelDispatcher::channel();
            let pool = spawn_workers(rx, worker, workers);

            // ─── 4) read + submit; dropping the processor closes the channel
            let submitting = DataProcessor::new(settings, store).with_dispatcher(Arc::new(dispatcher));
            let mut contract = JsonLinesImport::new(options, true)?;
            let stats = tokio::task::spawn_blocking(move || submitting.import(&mut contract, &file))
                .await??;
            info!(rows = stats.total_rows, "all work submitted");

            let report = pool.await?;
            info!(
                completed = report.completed,
                failed = report.failed,
                processed = report.processed_rows,
                errors = report.error_count,
                elapsed = ?start.elapsed(),
                "import done"
            );
            println!("{}", serde_json::to_string(&stats)?);
            if report.failed > 0 {
                anyhow::bail!("{} of {} jobs failed", report.failed, report.completed + report.failed);
            }
        }
    }

    Ok(())
}
