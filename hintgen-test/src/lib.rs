// Integration test utilities and exercise fixtures for hintgen.

use std::path::Path;

use hintgen_core::config::{EngineSection, ExerciseConfig};
use hintgen_core::engine::HintEngine;
use hintgen_core::runner::InterpreterRunner;
use hintgen_core::store::SqliteStore;
use hintgen_core::types::Exercise;

pub const CAN_DRINK_ALCOHOL: &str = r#"
version = 1
name = "canDrinkAlcohol"
solution_code = """
def canDrinkAlcohol(age, isDriving):
    return age >= 21 and not isDriving
"""

[arguments]
canDrinkAlcohol = ["int", "bool"]

[[tests]]
input = "(22, True)"
output = "False"

[[tests]]
input = "(20, False)"
output = "False"

[[tests]]
input = "(21, False)"
output = "True"

[[tests]]
input = "(35, False)"
output = "True"
"#;

pub const SUM_EVENS: &str = r#"
version = 1
name = "sumEvens"
solution_code = """
def sumEvens(nums):
    total = 0
    for n in nums:
        if n % 2 == 0:
            total += n
    return total
"""

[arguments]
sumEvens = ["list"]

[[tests]]
input = "[1, 2, 3, 4]"
output = "6"

[[tests]]
input = "[]"
output = "0"

[[tests]]
input = "[5, 7]"
output = "0"

[[tests]]
input = "[10, -2, 3]"
output = "8"
extra = "check_copy"
"#;

pub fn exercise_config(toml: &str) -> ExerciseConfig {
    ExerciseConfig::from_toml_str(toml).expect("fixture exercise parses")
}

/// A corpus in an on-disk database inside a temporary directory.
#[derive(Debug)]
pub struct TestCorpus {
    pub dir: tempfile::TempDir,
    pub store: SqliteStore,
    pub runner: InterpreterRunner,
    pub settings: EngineSection,
}

impl TestCorpus {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let store = SqliteStore::open(&dir.path().join("hintgen.db")).expect("open store");
        Self {
            dir,
            store,
            runner: InterpreterRunner::default(),
            settings: EngineSection::default(),
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("hintgen.db")
    }

    pub fn engine(&self) -> HintEngine<'_> {
        HintEngine::new(&self.store, &self.runner, &self.settings)
    }

    /// Reopen the database, as a new process would.
    pub fn reopen(&mut self) {
        self.store = SqliteStore::open(&self.db_path()).expect("reopen store");
    }

    /// Set up an exercise from a TOML fixture.
    pub async fn exercise(&self, toml: &str) -> Exercise {
        self.engine()
            .setup_exercise(&exercise_config(toml))
            .await
            .expect("set up exercise")
    }

    /// Feed submissions into the corpus without asking for hints.
    pub async fn seed(&self, exercise: &Exercise, submissions: &[&str]) {
        let engine = self.engine();
        for code in submissions {
            engine.run_tests(exercise, code).await.expect("run tests");
        }
    }
}

impl Default for TestCorpus {
    fn default() -> Self {
        Self::new()
    }
}

/// Write submissions as numbered `.py` files under `dir`.
pub fn write_submissions(dir: &Path, submissions: &[&str]) -> Vec<(String, String)> {
    submissions
        .iter()
        .enumerate()
        .map(|(i, code)| {
            let path = dir.join(format!("sub{i:03}.py"));
            std::fs::write(&path, code).expect("write submission");
            (path.display().to_string(), (*code).to_string())
        })
        .collect()
}
