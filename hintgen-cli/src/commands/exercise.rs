use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use hintgen_core::config::ExerciseConfig;
use hintgen_core::engine::HintEngine;

use super::Workspace;

#[derive(Args, Debug)]
pub struct ExerciseArgs {
    /// Exercise definition (TOML)
    pub file: PathBuf,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: ExerciseArgs) -> anyhow::Result<()> {
    let workspace = Workspace::open(&args.path)?;
    let config = ExerciseConfig::load(&args.file)
        .with_context(|| format!("Cannot load exercise definition: {}", args.file.display()))?;

    let runner = workspace.runner();
    let engine = HintEngine::new(&workspace.store, &runner, &workspace.config.engine);
    let exercise = engine.setup_exercise(&config).await?;

    let report = serde_json::json!({
        "id": exercise.id,
        "name": exercise.config.name,
        "function": exercise.config.function_name(),
        "tests": exercise.config.tests.len(),
        "solution_state": exercise.solution_state,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
