use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;

use hintgen_core::engine::HintEngine;
use hintgen_core::types::{HintLevel, HintResponse};

use super::{Workspace, read_input};

#[derive(Args, Debug)]
pub struct HintArgs {
    /// Exercise name
    pub exercise: String,

    /// Submission file (default: stdin)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Student identifier; required unless the input is a JSON request
    #[arg(long)]
    pub student: Option<String>,

    /// Read the input as a `{ "student_id": ..., "code": ... }` request
    #[arg(long)]
    pub request: bool,

    /// Force a hint level instead of escalating
    #[arg(long, value_parser = parse_level)]
    pub level: Option<HintLevel>,

    /// Include the test score and feedback in the output
    #[arg(long)]
    pub with_feedback: bool,

    /// Workspace directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct HintRequest {
    student_id: String,
    code: String,
}

fn parse_level(s: &str) -> Result<HintLevel, String> {
    HintLevel::parse(s).ok_or_else(|| {
        format!("unknown hint level '{s}' (expected next_step, structure, half_steps, solution, examples)")
    })
}

pub async fn run(args: HintArgs) -> anyhow::Result<()> {
    let input = read_input(args.file.as_deref())?;
    let (student, code) = if args.request {
        let request: HintRequest = serde_json::from_str(&input).context("Cannot parse hint request")?;
        (request.student_id, request.code)
    } else {
        let student = args
            .student
            .context("--student is required unless --request is given")?;
        (student, input)
    };

    let workspace = Workspace::open(&args.path)?;
    let runner = workspace.runner();
    let engine = HintEngine::new(&workspace.store, &runner, &workspace.config.engine);
    let exercise = engine.exercise(&args.exercise).await?;
    let outcome = engine.hint_for(&exercise, &student, &code, args.level).await?;

    let response = HintResponse::from(&outcome.hint);
    let json = if args.with_feedback {
        let mut value = serde_json::to_value(&response)?;
        value["score"] = serde_json::json!(outcome.score);
        value["feedback"] = serde_json::json!(outcome.feedback);
        value
    } else {
        serde_json::to_value(&response)?
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
