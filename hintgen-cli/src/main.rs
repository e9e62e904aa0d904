use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "hintgen",
    version,
    about = "Data-driven next-step hints for programming exercises"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Map an error to the process exit code.
///
///   0 success
///   1 general error
///   2 configuration or exercise definition error
///   3 workspace not initialized
///   4 database error
///   5 unknown exercise
///   6 instructor solution fails its tests
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let lower = format!("{err:#}").to_lowercase();

    if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("unknown exercise") {
        5
    } else if lower.contains("does not pass its tests") {
        6
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else if lower.contains("config") || lower.contains("exercise definition") {
        2
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.quiet)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("hintgen is not initialized in /foo. Run `hintgen init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Cannot parse config: bad toml");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_database() {
        let err = anyhow::anyhow!("Cannot open database: /foo/.hintgen/hintgen.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_unknown_exercise() {
        let err = anyhow::anyhow!("Engine error: Unknown exercise: sumList");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_failing_solution() {
        let err = anyhow::anyhow!("Engine error: Solution for f does not pass its tests: 0 of 3 tests passed.");
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
