use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use hintgen_core::config::{EngineSection, HintgenConfig, StoreSection};
use hintgen_core::store::SqliteStore;

use super::{WORKSPACE_DIR, resolve_db_path};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Custom database location
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Maximum hint applications in a chain
    #[arg(long)]
    pub chain_cutoff: Option<u32>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.path)
        .with_context(|| format!("Cannot create directory: {}", args.path.display()))?;
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let dir = root.join(WORKSPACE_DIR);
    let config_path = dir.join("config.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }
    std::fs::create_dir_all(&dir).with_context(|| format!("Cannot create {}", dir.display()))?;

    let mut engine = EngineSection::default();
    if let Some(cutoff) = args.chain_cutoff {
        engine.chain_cutoff = cutoff;
    }
    let config = HintgenConfig {
        engine,
        store: StoreSection { path: args.db_path },
    };
    let text = config.to_toml_string().context("Cannot serialize config")?;
    std::fs::write(&config_path, text)
        .with_context(|| format!("Cannot write config: {}", config_path.display()))?;

    let db_path = resolve_db_path(&root, &config);
    SqliteStore::open(&db_path).with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    info!(db = %db_path.display(), "workspace initialized");

    println!("Initialized hintgen workspace in {}", dir.display());
    println!("  Config:   {}", config_path.display());
    println!("  Database: {}", db_path.display());
    Ok(())
}
