use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Top-level hintgen configuration, matching `.hintgen/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HintgenConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Maximum hint applications before a chain is declared too long.
    pub chain_cutoff: u32,
    /// Relative slack when deciding whether a state lies between two others.
    pub between_slack: f64,
    /// Maximum states synthesized in one `next` computation.
    pub synthesized_step_limit: u32,
    /// Interpreter step budget per test run.
    pub interpreter_fuel: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chain_cutoff: 40,
            between_slack: 0.0,
            synthesized_step_limit: 8,
            interpreter_fuel: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    /// Database file; defaults to `.hintgen/hintgen.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl HintgenConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

// ── Exercise definitions ──────────────────────────────────────────

/// Type tag of a function parameter, used by canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Int,
    Float,
    Bool,
    Str,
    List,
    Dict,
    Any,
}

impl ArgType {
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "str" => Self::Str,
            "list" => Self::List,
            "dict" => Self::Dict,
            "any" => Self::Any,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

/// Function name to ordered parameter types.
pub type ArgumentTypes = BTreeMap<String, Vec<ArgType>>;

/// Extra check attached to a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestExtra {
    /// Also fail when the function mutates its arguments.
    CheckCopy,
}

/// One test: literal input expression (a tuple spreads into arguments) and
/// the literal expected result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<TestExtra>,
}

pub const EXERCISE_SCHEMA_VERSION: u32 = 1;

/// A single exercise, read from its TOML definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub version: u32,
    pub name: String,
    /// Function under test; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default)]
    pub given_code: String,
    pub solution_code: String,
    #[serde(default, deserialize_with = "lenient_arguments")]
    pub arguments: ArgumentTypes,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// Accept any TOML value for `[arguments]`; anything that is not a table of
/// type-tag arrays degrades to an empty map.
fn lenient_arguments<'de, D>(deserializer: D) -> Result<ArgumentTypes, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = toml::Value::deserialize(deserializer)?;
    Ok(arguments_from_value(&raw))
}

fn arguments_from_value(raw: &toml::Value) -> ArgumentTypes {
    let Some(table) = raw.as_table() else {
        warn!(target: "anomaly", "exercise arguments are not a mapping; ignoring them");
        return ArgumentTypes::new();
    };
    let mut types = ArgumentTypes::new();
    for (function, tags) in table {
        let Some(tags) = tags.as_array() else {
            warn!(target: "anomaly", function, "argument types are not a list; ignoring the map");
            return ArgumentTypes::new();
        };
        let parsed = tags
            .iter()
            .map(|tag| {
                let tag = tag.as_str().unwrap_or_default();
                ArgType::parse(tag).unwrap_or_else(|| {
                    warn!(target: "anomaly", function, tag, "unknown argument type; treating as any");
                    ArgType::Any
                })
            })
            .collect();
        types.insert(function.clone(), parsed);
    }
    types
}

impl ExerciseConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != EXERCISE_SCHEMA_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported exercise schema version {} (expected {EXERCISE_SCHEMA_VERSION})",
                self.version
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("exercise name is empty".to_string()));
        }
        if self.tests.is_empty() {
            return Err(ConfigError::Invalid(format!("exercise {} has no tests", self.name)));
        }
        Ok(())
    }

    /// Name of the function the tests call.
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.name)
    }

    /// Names anonymization must keep: declared functions, the tested
    /// function, and names the given code imports or defines.
    pub fn reserved_names(&self) -> std::collections::BTreeSet<String> {
        let mut reserved: std::collections::BTreeSet<String> = self.arguments.keys().cloned().collect();
        reserved.insert(self.function_name().to_string());
        if let Ok(tree) = hintgen_lang::parse(&self.given_code) {
            reserved.extend(hintgen_lang::names::imported_names(&tree));
            reserved.extend(hintgen_lang::names::defined_functions(&tree));
        }
        reserved
    }
}
