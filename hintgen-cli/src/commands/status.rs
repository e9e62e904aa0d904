use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use hintgen_core::store::HintStore;

use super::Workspace;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only this exercise
    pub exercise: Option<String>,

    /// Show recorded anomalies
    #[arg(long)]
    pub anomalies: bool,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let workspace = Workspace::open(&args.path)?;
    let store = &workspace.store;

    let mut exercises = store.list_exercises().await.context("Failed to list exercises")?;
    if let Some(name) = &args.exercise {
        exercises.retain(|e| &e.config.name == name);
        if exercises.is_empty() {
            anyhow::bail!("Unknown exercise: {name}");
        }
    }

    println!("hintgen status for {}", workspace.root.display());
    println!();
    let db = store.path().unwrap_or(Path::new(":memory:"));
    println!("  Database: {}", db.display());
    println!();

    if exercises.is_empty() {
        println!("  No exercises. Add one with `hintgen exercise <file.toml>`.");
        return Ok(());
    }

    println!(
        "  {:<24} {:>8} {:>8} {:>10} {:>8} {:>12} {:>10}",
        "exercise", "cleaned", "anon", "canonical", "correct", "submissions", "anomalies"
    );
    for exercise in &exercises {
        let stats = store.stats(exercise.id).await.context("Failed to read store stats")?;
        println!(
            "  {:<24} {:>8} {:>8} {:>10} {:>8} {:>12} {:>10}",
            exercise.config.name,
            stats.cleaned,
            stats.anon,
            stats.canonical,
            stats.correct_cleaned,
            stats.submissions,
            stats.anomalies
        );
    }

    if args.anomalies {
        println!();
        for exercise in &exercises {
            for anomaly in store.anomalies(Some(exercise.id)).await? {
                println!(
                    "  {} {:<12} {:<22} {}",
                    anomaly.created_at.format("%Y-%m-%d %H:%M:%S"),
                    exercise.config.name,
                    anomaly.kind.as_str(),
                    anomaly.detail
                );
            }
        }
    }
    Ok(())
}
