pub mod chain;
pub mod exercise;
pub mod hint;
pub mod init;
pub mod reset;
pub mod status;
pub mod test;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;

use hintgen_core::config::HintgenConfig;
use hintgen_core::runner::InterpreterRunner;
use hintgen_core::store::SqliteStore;

pub const WORKSPACE_DIR: &str = ".hintgen";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a hintgen workspace (config and database)
    Init(init::InitArgs),
    /// Load an exercise definition and seed it with its solution
    Exercise(exercise::ExerciseArgs),
    /// Request a hint for a submission
    Hint(hint::HintArgs),
    /// Run an exercise's tests on a submission and add it to the corpus
    Test(test::TestArgs),
    /// Follow next-step hints from each submission and report convergence
    Chain(chain::ChainArgs),
    /// Show exercises and corpus statistics
    Status(status::StatusArgs),
    /// Delete an exercise's corpus, keeping only the instructor solution
    Reset(reset::ResetArgs),
}

pub async fn run(cmd: Command, quiet: bool) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::Exercise(args) => exercise::run(args).await,
        Command::Hint(args) => hint::run(args).await,
        Command::Test(args) => test::run(args).await,
        Command::Chain(args) => chain::run(args, quiet).await,
        Command::Status(args) => status::run(args).await,
        Command::Reset(args) => reset::run(args).await,
    }
}

/// An initialized workspace: its root, config, and open store.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: HintgenConfig,
    pub store: SqliteStore,
}

impl Workspace {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(path)
            .with_context(|| format!("Cannot resolve path: {}", path.display()))?;
        let config_path = root.join(WORKSPACE_DIR).join("config.toml");
        if !config_path.exists() {
            anyhow::bail!(
                "hintgen is not initialized in {}. Run `hintgen init` first.",
                root.display()
            );
        }
        let config = HintgenConfig::load(&config_path)
            .with_context(|| format!("Cannot parse config: {}", config_path.display()))?;

        let db_path = resolve_db_path(&root, &config);
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
        Ok(Self { root, config, store })
    }

    pub fn runner(&self) -> InterpreterRunner {
        InterpreterRunner::new(self.config.engine.interpreter_fuel)
    }
}

/// Database location: the configured path (relative to the workspace root)
/// or `.hintgen/hintgen.db`.
pub fn resolve_db_path(root: &Path, config: &HintgenConfig) -> PathBuf {
    match &config.store.path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => root.join(path),
        None => root.join(WORKSPACE_DIR).join("hintgen.db"),
    }
}

/// Submission text from a file, or stdin when no file is given.
pub fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read submission: {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Cannot read submission from stdin")?;
            Ok(text)
        }
    }
}
