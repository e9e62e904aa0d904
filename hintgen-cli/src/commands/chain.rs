use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::warn;

use hintgen_core::chain::{ChainOutcome, validate_chains};
use hintgen_core::engine::HintEngine;
use hintgen_core::progress::{BarProgress, ChainProgress, SilentProgress};

use super::Workspace;

#[derive(Args, Debug)]
pub struct ChainArgs {
    /// Exercise name
    pub exercise: String,

    /// Glob of submission files, e.g. `submissions/*.py`
    pub pattern: String,

    /// Maximum hints applied per submission (default: from config)
    #[arg(long)]
    pub cutoff: Option<u32>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

fn collect_submissions(pattern: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut submissions = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let code = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read submission: {}", path.display()))?;
        submissions.push((path.display().to_string(), code));
    }
    submissions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(submissions)
}

pub async fn run(args: ChainArgs, quiet: bool) -> anyhow::Result<()> {
    let submissions = collect_submissions(&args.pattern)?;
    if submissions.is_empty() {
        anyhow::bail!("No submissions match {}", args.pattern);
    }

    let workspace = Workspace::open(&args.path)?;
    let runner = workspace.runner();
    let engine = HintEngine::new(&workspace.store, &runner, &workspace.config.engine);
    let exercise = engine.exercise(&args.exercise).await?;
    let cutoff = args.cutoff.unwrap_or(workspace.config.engine.chain_cutoff);

    let progress: Box<dyn ChainProgress> = if quiet || args.json {
        Box::new(SilentProgress)
    } else {
        Box::new(BarProgress::visible())
    };
    let summary = validate_chains(&engine, &exercise, &submissions, cutoff, progress.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Hint chains for {} ({} submissions)", exercise.config.name, submissions.len());
    println!();
    for (label, report) in &summary.reports {
        println!(
            "  {:<16} {label}  steps={} weight={} chars={}",
            report.outcome.as_str(),
            report.steps,
            report.edit_weight,
            report.chr_count
        );
    }
    println!();
    for (outcome, count) in &summary.outcomes {
        println!("  {:<16} {count:>5}", outcome.as_str());
    }
    let converged = summary.converged();
    println!();
    println!("  Converged: {converged}/{}", submissions.len());
    if summary.outcomes.contains_key(&ChainOutcome::EditBroke) {
        warn!("some hints produced unparseable code; see the anomaly log");
    }
    Ok(())
}
