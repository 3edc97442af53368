//! Mamformer CLI Module
//!
//! Command-line interface for training, prediction, data inspection and
//! task management.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::architectures::ModelType;
use crate::data::Dataset;
use crate::inference::Predictor;
use crate::tasks::{
    DispatchMode, JobQueue, JsonTaskStore, RunOutcome, TaskLookup, TaskOrchestrator, TaskRecord,
};
use crate::training::{TrainingConfig, TrainingResult};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn bad(s: &str) -> ColoredString    { s.truecolor(230, 100, 100) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.4}", x)).unwrap_or_else(|| "n/a".to_string())
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mamformer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ensemble sequence-model forecasting for tabular time series")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train an ensemble on a CSV file
    Train {
        /// Input CSV file, rows in time order
        #[arg(short, long)]
        data: PathBuf,

        /// Target column name
        #[arg(short, long)]
        target: String,

        /// JSON training configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Architecture (mamformer, auto-mamformer)
        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        n_models: Option<usize>,

        /// Directory receiving the checkpoint
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Task store directory
        #[arg(long, default_value = "tasks")]
        store: PathBuf,

        /// Run through the background job queue
        #[arg(long)]
        queued: bool,
    },

    /// Forecast the next value from the last window of a CSV file
    Predict {
        #[arg(long, default_value = "model")]
        model_dir: PathBuf,

        /// Task id of the trained model
        #[arg(long)]
        task: String,

        #[arg(short, long)]
        data: PathBuf,
    },

    /// Show data information
    Info {
        #[arg(short, long)]
        data: PathBuf,
    },

    /// List tasks or show one task
    Tasks {
        #[arg(long, default_value = "tasks")]
        store: PathBuf,

        #[arg(long)]
        task: Option<String>,

        /// Delete the given task with its logs and checkpoint
        #[arg(long, requires = "task")]
        delete: bool,
    },
}

// ─── Train ─────────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn cmd_train(
    data_path: &Path,
    target: &str,
    config_path: Option<&Path>,
    model: Option<&str>,
    epochs: Option<usize>,
    n_models: Option<usize>,
    model_dir: Option<&Path>,
    store_dir: &Path,
    queued: bool,
) -> anyhow::Result<()> {
    section("Train");

    let mut config = match config_path {
        Some(p) => TrainingConfig::from_file(p)?,
        None => TrainingConfig::default(),
    };
    if let Some(m) = model {
        config.model_type = m.parse::<ModelType>()?;
    }
    if let Some(e) = epochs {
        config.epochs = e;
    }
    if let Some(n) = n_models {
        config.n_models = n;
    }
    if let Some(dir) = model_dir {
        config.model_dir = dir.to_path_buf();
    }
    config.validate()?;

    let store = JsonTaskStore::new(store_dir)?;
    let orchestrator = TaskOrchestrator::new(Arc::new(store));
    let record = orchestrator.submit(data_path, target, config)?;
    print_train_banner(&record, queued);

    step_run(&format!("Training {}", record.config.model_type.to_string().cyan()));
    let start = Instant::now();
    let outcome = if queued {
        let queue = JobQueue::new(orchestrator.clone(), 1);
        queue.submit(record.id).await??
    } else {
        let orch = orchestrator.clone();
        let id = record.id;
        tokio::task::spawn_blocking(move || orch.run(id, DispatchMode::Inline)).await??
    };
    step_done(&format!("{:.1}s", start.elapsed().as_secs_f64()));

    match outcome {
        RunOutcome::Completed(result) => print_result(&result),
        RunOutcome::Failed(message) => {
            println!("  {} {}", bad("✗"), message);
            println!();
            anyhow::bail!("task {} failed", record.id);
        }
        RunOutcome::NotFound => anyhow::bail!("task {} vanished from the store", record.id),
    }
    Ok(())
}

fn print_train_banner(record: &TaskRecord, queued: bool) {
    let c = &record.config;
    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "Mamformer".white().bold()));
    line_box_center(&format!("{}", dim(&format!("v{}", env!("CARGO_PKG_VERSION")))));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("Task    ", &record.id.to_string()));
    line_box(&kv("Data    ", &record.data_path.display().to_string()));
    line_box(&kv("Target  ", &record.target));
    line_box(&kv("Model   ", &c.model_type.to_string()));
    line_box(&kv("Ensemble", &format!("{} × {} epochs", c.n_models, c.epochs)));
    line_box(&kv("Window  ", &format!("{} steps, top {} features", c.seq_len, c.top_k)));
    line_box(&kv("Dispatch", if queued { "queued" } else { "inline" }));
    line_box_empty();
    line_box_bottom();
    println!();
}

fn print_result(result: &TrainingResult) {
    println!();
    println!("  {:<16} {}", muted("R²"), fmt_opt(result.metrics.r2).white().bold());
    println!("  {:<16} {}", muted("RMSE"), fmt_opt(result.metrics.rmse).white());
    println!("  {:<16} {}", muted("MAE"), fmt_opt(result.metrics.mae).white());
    println!("  {:<16} {}", muted("MAPE %"), fmt_opt(result.metrics.mape).white());
    println!("  {:<16} {}", muted("Test samples"), result.predictions.len());
    println!("  {:<16} {:.1}s", muted("Time"), result.duration_secs);
    println!("  {:<16} {}", muted("Checkpoint"), result.model_path.display());
    println!();

    println!("  {}", muted("Selected features"));
    for name in result.columns.iter().take(result.columns.len().saturating_sub(1)) {
        let score = result
            .feature_importance
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, s)| *s);
        println!("    {:<24} {}", name, dim(&fmt_opt(score)));
    }
    println!();
}

// ─── Predict ───────────────────────────────────────────────────────────────────

pub fn cmd_predict(model_dir: &Path, task_id: &str, data_path: &Path) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading model");
    let predictor = Predictor::load(model_dir, task_id)?;
    step_done(&format!("{}, window {}", predictor.meta().model_type, predictor.seq_len()));

    step_run("Loading data");
    let dataset = Dataset::from_csv(data_path)?;
    step_done(&format!("{} rows × {} cols", dataset.n_rows(), dataset.n_columns()));

    let forecast = predictor.forecast_dataset(&dataset)?;
    println!();
    println!(
        "  {:<16} {}",
        muted(&format!("Next {}", predictor.meta().target)),
        format!("{:.6}", forecast.value).white().bold()
    );
    println!(
        "  {:<16} [{:.6}, {:.6}]",
        muted("95% band"),
        forecast.interval.0,
        forecast.interval.1
    );
    println!("  {:<16} {}", muted("Features"), forecast.features.join(", "));
    println!();
    Ok(())
}

// ─── Info ──────────────────────────────────────────────────────────────────────

pub fn cmd_info(data_path: &Path) -> anyhow::Result<()> {
    section("Data Info");

    let dataset = Dataset::from_csv(data_path)?;

    println!("  {:<12} {}", muted("File"), data_path.display());
    println!("  {:<12} {}", muted("Rows"), dataset.n_rows());
    println!("  {:<12} {}", muted("Columns"), dataset.n_columns());
    println!();

    println!(
        "  {:<20} {:>12} {:>12} {:>12} {:>12}",
        muted("Column"), muted("Mean"), muted("Std"), muted("Min"), muted("Max")
    );
    println!("  {}", dim(&"─".repeat(72)));

    for col in dataset.summary() {
        println!(
            "  {:<20} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
            col.name, col.mean, col.std, col.min, col.max
        );
    }

    println!();
    Ok(())
}

// ─── Tasks ─────────────────────────────────────────────────────────────────────

pub fn cmd_tasks(store_dir: &Path, task: Option<&str>, delete: bool) -> anyhow::Result<()> {
    let orchestrator = TaskOrchestrator::new(Arc::new(JsonTaskStore::new(store_dir)?));

    let Some(id) = task else {
        section("Tasks");
        let records = orchestrator.store().list()?;
        if records.is_empty() {
            println!("  {}", dim("no tasks"));
        }
        for r in records {
            println!(
                "  {}  {:<10} {:<15} {}",
                r.id,
                r.status.to_string(),
                r.config.model_type.to_string(),
                dim(&r.created_at.format("%Y-%m-%d %H:%M:%S").to_string())
            );
        }
        println!();
        return Ok(());
    };

    if delete {
        match orchestrator.delete(id)? {
            TaskLookup::Found(()) => step_ok(&format!("deleted {}", id)),
            TaskLookup::NotFound => anyhow::bail!("task {} not found", id),
            TaskLookup::InvalidId => anyhow::bail!("invalid task id: {}", id),
        }
        return Ok(());
    }

    section("Task");
    let progress = match orchestrator.progress(id)? {
        TaskLookup::Found(p) => p,
        TaskLookup::NotFound => anyhow::bail!("task {} not found", id),
        TaskLookup::InvalidId => anyhow::bail!("invalid task id: {}", id),
    };
    println!("  {:<12} {}", muted("Id"), progress.id);
    println!("  {:<12} {}", muted("Status"), progress.status);
    println!("  {:<12} {:.1}%", muted("Progress"), progress.progress);
    if let Some(started) = progress.started_at {
        println!("  {:<12} {}", muted("Started"), started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(done) = progress.completed_at {
        println!("  {:<12} {}", muted("Finished"), done.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(err) = &progress.error {
        println!("  {:<12} {}", muted("Error"), bad(err));
    }
    if let Some(latest) = &progress.latest {
        println!(
            "  {:<12} epoch {}  train loss {}  val R² {}",
            muted("Latest"),
            latest.epoch,
            fmt_opt(latest.train_loss),
            fmt_opt(latest.metrics.val_r2)
        );
    }
    if let TaskLookup::Found(Some(result)) = orchestrator.result(id)? {
        print_result(&result);
    } else {
        println!();
    }
    Ok(())
}
