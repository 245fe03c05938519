use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crm_sync::codec::{self, FileFormat};
use crm_sync::contacts::export::parse_bound;
use crm_sync::contacts::{
    AggregateReport, ContactExporter, ContactImporter, ContactPurger, ExportPeriod, JobContext,
};
use crm_sync::crm::{BatchClient, CodecConfig, CrmConfig};

#[derive(Parser, Debug)]
#[command(
    name = "crm-sync",
    about = "Bulk import, export and delete CRM contacts"
)]
struct Cli {
    /// Base REST URL of the CRM, including webhook credentials.
    #[arg(long, env = "CRM_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Calls per batch request (at most 50).
    #[arg(long, env = "CRM_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Chunks allowed in flight at once.
    #[arg(long, env = "CRM_MAX_CONCURRENT_CHUNKS")]
    concurrency: Option<usize>,

    /// Per-request timeout in milliseconds.
    #[arg(long, env = "CRM_REQUEST_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create one contact per row of a CSV file.
    Import {
        /// Contact file to import.
        file: PathBuf,
    },
    /// Write contacts to a CSV file.
    Export {
        /// all, today, week, month or custom.
        #[arg(long, default_value = "all")]
        period: String,
        /// Lower creation bound, `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
        #[arg(long)]
        from: Option<String>,
        /// Upper creation bound, `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
        #[arg(long)]
        to: Option<String>,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete every contact in the CRM.
    DeleteAll {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

fn crm_config(cli: &Cli) -> CrmConfig {
    let mut config = CrmConfig::from_env();
    if let Some(url) = &cli.webhook_url {
        config.webhook_url = url.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(concurrency) = cli.concurrency {
        config = config.with_max_concurrent_chunks(concurrency);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.request_timeout = Duration::from_millis(timeout_ms);
    }
    config
}

/// Context that logs progress and trips on Ctrl-C.
fn job_context() -> JobContext {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping after the current chunk");
            signal_token.cancel();
        }
    });

    JobContext::new()
        .with_cancellation(token)
        .with_progress(Arc::new(|percent: u8, message: &str| {
            log::info!("[{percent:>3}%] {message}");
        }))
}

fn print_report(report: &AggregateReport) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(report)?;
    writeln!(io::stdout(), "{json}")?;
    Ok(())
}

fn exit_code(report: &AggregateReport) -> i32 {
    if report.cancelled {
        130
    } else if report.failed > 0 || !report.errors.is_empty() {
        2
    } else {
        0
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let client = BatchClient::from_config(crm_config(&cli))?;
    let codec_config = CodecConfig::from_env();

    match cli.command {
        Command::Import { file } => {
            let format = FileFormat::from_path(&file)?;
            let bytes = tokio::fs::read(&file).await?;
            let rows = codec::read_rows(format, &bytes, &codec_config)?;
            log::info!("read {} rows from {}", rows.len(), file.display());

            let report = ContactImporter::new(&client).run(&rows, &job_context()).await;
            print_report(&report)?;
            std::process::exit(exit_code(&report));
        }
        Command::Export {
            period,
            from,
            to,
            output,
        } => {
            let format = match &output {
                Some(path) => FileFormat::from_path(path)?,
                None => FileFormat::default(),
            };
            let Some(period) = ExportPeriod::parse(&period) else {
                writeln!(io::stderr(), "error: unknown period '{period}'")?;
                std::process::exit(1);
            };
            let from = match from.as_deref().map(|value| (value, parse_bound(value, false))) {
                Some((value, None)) => {
                    writeln!(io::stderr(), "error: cannot parse --from '{value}'")?;
                    std::process::exit(1);
                }
                Some((_, bound)) => bound,
                None => None,
            };
            let to = match to.as_deref().map(|value| (value, parse_bound(value, true))) {
                Some((value, None)) => {
                    writeln!(io::stderr(), "error: cannot parse --to '{value}'")?;
                    std::process::exit(1);
                }
                Some((_, bound)) => bound,
                None => None,
            };

            let range = period.date_range(Local::now().naive_local(), from, to)?;
            let rows = ContactExporter::new(&client)
                .run(&range, &job_context())
                .await?;
            let bytes = codec::write_rows(format, &rows, &codec_config)?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, &bytes).await?;
                    log::info!("wrote {} contacts to {}", rows.len(), path.display());
                }
                None => io::stdout().write_all(&bytes)?,
            }
        }
        Command::DeleteAll { yes } => {
            if !yes {
                writeln!(
                    io::stderr(),
                    "error: delete-all removes every contact in the CRM; pass --yes to confirm"
                )?;
                std::process::exit(1);
            }

            let report = ContactPurger::new(&client).run(&job_context()).await;
            print_report(&report)?;
            std::process::exit(exit_code(&report));
        }
    }

    Ok(())
}
