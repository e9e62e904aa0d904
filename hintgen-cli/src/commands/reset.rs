use std::path::PathBuf;

use clap::Args;

use hintgen_core::engine::HintEngine;

use super::Workspace;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Exercise name
    pub exercise: String,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: ResetArgs) -> anyhow::Result<()> {
    let workspace = Workspace::open(&args.path)?;
    let runner = workspace.runner();
    let engine = HintEngine::new(&workspace.store, &runner, &workspace.config.engine);
    let exercise = engine.exercise(&args.exercise).await?;

    let deleted = engine.clear_solution_space(&exercise).await?;
    println!("Cleared {deleted} states from {}", exercise.config.name);
    Ok(())
}
