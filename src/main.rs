//! filer -- command-line access to an object store through the Filer API.

use std::path::Path;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use bleepfiler::config::{self, FilerConfig, NoPrompt};
use bleepfiler::{Filer, ObjectStoreFiler, PathPredicate, Record, RegexPathPredicate};

/// Size of each stdin read fed to an upload.
const STDIN_CHUNK: usize = 64 * 1024;

/// Command-line arguments for the filer tool.
#[derive(Parser, Debug)]
#[command(
    name = "filer",
    version,
    about = "Filesystem-style access to S3-compatible object storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "filer.yaml")]
    config: String,

    /// Override the store URL (e.g. s3://bucket).
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List entries under a path prefix.
    Ls {
        path: String,
        /// Only show paths fully matching one of these regexes.
        #[arg(short, long = "match")]
        patterns: Vec<String>,
    },
    /// Show the record for a path.
    Stat { path: String },
    /// Write a file's content to stdout.
    Cat { path: String },
    /// Upload stdin to a path.
    Put { path: String },
    /// Delete a path.
    Rm { path: String },
    /// Create a directory marker.
    Mkdir { path: String },
    /// Set a path's modification time (epoch milliseconds).
    Touch { path: String, millis: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    bleepfiler::metrics::describe_metrics();

    let filer = ObjectStoreFiler::from_config(&config, &NoPrompt).await?;
    let outcome = run(&filer, cli.command).await;
    filer.close();
    outcome
}

/// Load the configuration file, or build one from `--url` alone when the
/// file does not exist.
fn resolve_config(cli: &Cli) -> anyhow::Result<FilerConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        info!("Loading configuration from {}", cli.config);
        config::load_config(&cli.config)?
    } else if let Some(url) = &cli.url {
        FilerConfig::from_url(url.clone())
    } else {
        anyhow::bail!(
            "configuration file {} not found and no --url given",
            cli.config
        );
    };
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    Ok(config)
}

async fn run(filer: &dyn Filer, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ls { path, patterns } => {
            let predicate = if patterns.is_empty() {
                None
            } else {
                Some(RegexPathPredicate::new(&patterns)?)
            };
            for record in filer.list_records(&path).await? {
                if predicate
                    .as_ref()
                    .map_or(true, |p| p.matches(Some(&record)))
                {
                    println!("{}", format_record(&record));
                }
            }
        }
        Command::Stat { path } => {
            let record = filer.get_record(&path).await?;
            if !record.exists() {
                anyhow::bail!("{path}: no such file");
            }
            println!("{}", format_record(&record));
        }
        Command::Cat { path } => {
            let mut reader = filer.read_file(&path).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Put { path } => {
            let mut sink = filer.write_file(&path)?;
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; STDIN_CHUNK];
            let mut total = 0u64;
            loop {
                let n = stdin.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                sink.write(&buf[..n]).await?;
                total += n as u64;
            }
            sink.close().await?;
            info!("Uploaded {} bytes to {}", total, path);
        }
        Command::Rm { path } => filer.delete_file(&path).await?,
        Command::Mkdir { path } => filer.create_dirs(&path).await?,
        Command::Touch { path, millis } => {
            let update = filer.set_file_time(&path, millis).await?;
            info!("Set modification time of {} ({:?})", path, update);
        }
    }
    Ok(())
}

/// One listing line: type, size, modification time, path.
fn format_record(record: &Record) -> String {
    let kind = if record.is_dir { 'd' } else { '-' };
    let modified = chrono::DateTime::from_timestamp_millis(record.last_modified)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| record.last_modified.to_string());
    format!(
        "{} {:>12} {} {}",
        kind,
        record.size,
        modified,
        record.path()
    )
}
