use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use cliprest::{results_path, save_results, ActivationTable, Mode, TrainConfig, TrainEvalLoop};

#[derive(Parser)]
#[command(name = "train_clips", about = "Train the LSTM clip classifier and score held-out subjects")]
struct Args {
    /// All-subject activation table (CSV with Subject, y, timepoint, features)
    #[arg(long)]
    input: PathBuf,

    /// Directory the results JSON is written to
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Run label used in the results file name
    #[arg(long, default_value = "lstm")]
    label: String,

    /// Condition the table was recorded under (clips, rest_between, rest_before)
    #[arg(long, default_value = "clips")]
    mode: Mode,

    /// Subjects used for training (sorted id order); the rest are tested
    #[arg(long, default_value_t = 100)]
    train_size: usize,

    #[arg(long, default_value_t = 150)]
    k_hidden: usize,

    #[arg(long, default_value_t = 1)]
    k_layers: usize,

    /// Number of clip classes, test-retest included
    #[arg(long, default_value_t = 15)]
    k_class: usize,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    #[arg(long, default_value_t = 50)]
    num_epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    lr: f32,

    #[arg(long, default_value_t = 330)]
    seed: u64,

    /// First TR kept from every clip
    #[arg(long, default_value_t = 0)]
    tr_start: i64,

    /// One past the last TR kept from every clip
    #[arg(long, default_value_t = 10)]
    tr_stop: i64,

    /// Keep whole clips (ignores --tr-start / --tr-stop)
    #[arg(long)]
    whole_clips: bool,

    /// Draw a fresh batch order every epoch
    #[arg(long)]
    reshuffle: bool,

    /// Also write test-set LSTM / linear activations (safetensors)
    #[arg(long)]
    save_activations: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let table = ActivationTable::load_csv(&args.input)?;
    info!(
        rows = table.n_rows(),
        features = table.n_features(),
        subjects = table.subject_ids().len(),
        "loaded {}",
        args.input.display()
    );

    let cfg = TrainConfig {
        train_size: args.train_size,
        k_hidden: args.k_hidden,
        k_layers: args.k_layers,
        k_class: args.k_class,
        batch_size: args.batch_size,
        num_epochs: args.num_epochs,
        learning_rate: args.lr,
        seed: args.seed,
        time_window: (!args.whole_clips).then_some(args.tr_start..args.tr_stop),
        reshuffle_each_epoch: args.reshuffle,
        save_activations: args.save_activations,
    };

    let run = TrainEvalLoop::new(cfg).run(&table).context("training run failed")?;

    let path = results_path(&args.results_dir, &args.label, args.mode);
    save_results(&run.record(args.mode), &path)?;
    info!(
        mean_test_accuracy = run.results.mean_test_accuracy(),
        steps = run.optimizer_steps,
        "written {}",
        path.display()
    );

    if let Some(acts) = &run.activations {
        let path = args
            .results_dir
            .join(format!("{} {} activations.safetensors", args.label, args.mode));
        acts.write(&path)?;
        info!("written {}", path.display());
    }

    Ok(())
}
