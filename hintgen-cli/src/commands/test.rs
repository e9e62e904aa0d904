use std::path::PathBuf;

use clap::Args;

use hintgen_core::engine::HintEngine;

use super::{Workspace, read_input};

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Exercise name
    pub exercise: String,

    /// Submission file (default: stdin)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: TestArgs) -> anyhow::Result<()> {
    let code = read_input(args.file.as_deref())?;
    let workspace = Workspace::open(&args.path)?;
    let runner = workspace.runner();
    let engine = HintEngine::new(&workspace.store, &runner, &workspace.config.engine);
    let exercise = engine.exercise(&args.exercise).await?;

    let outcome = engine.run_tests(&exercise, &code).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
