use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use cliprest::{clip_rest_correlation, CorrelationConfig, CorrelationPipeline, SubjectStore, WindowSpec};

#[derive(Parser)]
#[command(name = "tr_window_corr", about = "Clip / rest correlation matrices over TR windows")]
struct Args {
    /// Root holding <subject>/<mode>/activation_matrix.csv
    #[arg(long)]
    root: PathBuf,

    /// Subject ids; defaults to every directory under --root
    #[arg(long, value_delimiter = ',')]
    subjects: Vec<String>,

    /// Keep the test-retest clip in rearranged tables
    #[arg(long)]
    include_test_retest: bool,

    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand)]
enum Job {
    /// Per subject: windowed clip correlations joined with rest correlations
    Window {
        /// "first" or "last"
        #[arg(long, default_value = "first")]
        position: String,

        /// Window length in TRs
        #[arg(long, default_value_t = 19)]
        length: usize,

        /// Custom absolute window start (with --stop)
        #[arg(long, requires = "stop")]
        start: Option<i64>,

        #[arg(long, requires = "start")]
        stop: Option<i64>,
    },
    /// Subject-averaged last-TR vectors: clip × rest correlation table
    SingleTr {
        /// Output CSV for the full correlation table
        #[arg(long, default_value = "single_tr_corr.csv")]
        output: PathBuf,
    },
}

fn window_spec(position: &str, length: usize, start: Option<i64>, stop: Option<i64>) -> Result<WindowSpec> {
    if let (Some(start), Some(stop)) = (start, stop) {
        return Ok(WindowSpec::Custom { start, stop });
    }
    match position {
        "first" => Ok(WindowSpec::First(length)),
        "last" => Ok(WindowSpec::Last(length)),
        other => bail!("unknown window position {other:?} (expected first or last)"),
    }
}

fn list_subjects(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("listing {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out.sort();
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let subjects = if args.subjects.is_empty() { list_subjects(&args.root)? } else { args.subjects.clone() };
    info!(subjects = subjects.len(), root = %args.root.display(), "starting");

    let mut config = CorrelationConfig { include_test_retest: args.include_test_retest, ..CorrelationConfig::default() };

    match args.job {
        Job::Window { position, length, start, stop } => {
            config.clip_window = window_spec(&position, length, start, stop)?;
            let pipeline = CorrelationPipeline::new(config, SubjectStore::new(&args.root));
            let report = pipeline.compare_window_to_rest(&subjects);
            if report.completed.is_empty() {
                bail!("no subject completed");
            }
            if report.is_partial() {
                warn!(
                    completed = report.completed.len(),
                    failed = report.failed.len(),
                    "partial result set"
                );
            }
        }
        Job::SingleTr { output } => {
            let pipeline = CorrelationPipeline::new(config, SubjectStore::new(&args.root));
            let result = pipeline.single_tick_correlation(&subjects)?;
            if result.is_partial() {
                warn!(
                    completed = subjects.len().saturating_sub(result.skipped.len()),
                    failed = result.skipped.len(),
                    "partial result set"
                );
            }
            let corr = result.value;
            corr.write_csv(&output)?;
            info!("written {}", output.display());

            let pairs = clip_rest_correlation(&corr)?;
            for (clip, r) in pairs.row_labels.iter().zip(pairs.data.column(0)) {
                info!(clip = clip.as_str(), r, "clip / rest correlation");
            }
        }
    }
    Ok(())
}
