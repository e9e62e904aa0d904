use chrono::{DateTime, Utc};
use hintgen_lang::Node;
use serde::{Deserialize, Serialize};

use crate::config::ExerciseConfig;

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(ExerciseId);
typed_id!(StateId);
typed_id!(SubmissionId);

// ── Program states ─────────────────────────────────────────────────

/// Abstraction tier of a program state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// The submission as typed.
    Source,
    /// Reprinted from its parse tree.
    Cleaned,
    /// Non-reserved identifiers replaced by placeholders.
    Anon,
    /// Anonymized, then normalized by semantics-preserving rewrites.
    Canonical,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Cleaned => "cleaned",
            Self::Anon => "anon",
            Self::Canonical => "canonical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "source" => Self::Source,
            "cleaned" => Self::Cleaned,
            "anon" => Self::Anon,
            "canonical" => Self::Canonical,
            _ => return None,
        })
    }

    /// The other hint-bearing tier.
    pub fn alternate(self) -> Self {
        match self {
            Self::Anon => Self::Canonical,
            Self::Canonical => Self::Anon,
            other => other,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the goal set a state's `goal`/`next` were computed against.
/// Pointers are stale once the snapshot no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFingerprint {
    pub goals: i64,
    pub max_goal_count: i64,
}

/// A submission as typed, before deduplication.
#[derive(Debug, Clone)]
pub struct SourceState {
    pub code: String,
    pub tree: Option<Node>,
    pub score: f64,
    pub feedback: String,
}

/// A stored, deduplicated program state of one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: StateId,
    pub exercise_id: ExerciseId,
    pub tier: Tier,
    pub code: String,
    pub score: f64,
    pub feedback: String,
    pub count: i64,
    pub weight: u32,
    pub tree: Option<Node>,
    /// Pre-anonymization tree of the first submission that produced this state.
    pub orig_tree: Option<Node>,
    pub goal: Option<StateId>,
    pub next: Option<StateId>,
    /// Link to the next tier's state (cleaned → anon → canonical).
    pub derived: Option<StateId>,
    pub fingerprint: Option<CorpusFingerprint>,
}

impl StateRecord {
    /// A record not yet stored; `id` is assigned on upsert.
    pub fn new(exercise_id: ExerciseId, tier: Tier, code: String, tree: Node) -> Self {
        Self {
            id: StateId(0),
            exercise_id,
            tier,
            code,
            score: 0.0,
            feedback: String::new(),
            count: 1,
            weight: tree.weight(),
            tree: Some(tree),
            orig_tree: None,
            goal: None,
            next: None,
            derived: None,
            fingerprint: None,
        }
    }

    pub fn is_correct(&self) -> bool {
        is_full_score(self.score)
    }

    /// Tree of this state, re-parsed from its code when not stored.
    pub fn load_tree(&self) -> Option<Node> {
        self.tree.clone().or_else(|| hintgen_lang::parse(&self.code).ok())
    }
}

pub fn is_full_score(score: f64) -> bool {
    (score - 1.0).abs() < 1e-9
}

// ── Exercises, submissions, hints ──────────────────────────────────

#[derive(Debug, Clone)]
pub struct Exercise {
    pub id: ExerciseId,
    pub config: ExerciseConfig,
    /// Cleaned state of the instructor solution.
    pub solution_state: Option<StateId>,
}

/// Escalation level of a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintLevel {
    NextStep,
    Structure,
    HalfSteps,
    Solution,
    /// Terminal level for correct submissions.
    Examples,
}

impl HintLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NextStep => "next_step",
            Self::Structure => "structure",
            Self::HalfSteps => "half_steps",
            Self::Solution => "solution",
            Self::Examples => "examples",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "next_step" => Self::NextStep,
            "structure" => Self::Structure,
            "half_steps" => Self::HalfSteps,
            "solution" => Self::Solution,
            "examples" => Self::Examples,
            _ => return None,
        })
    }

    /// Level for an identical resubmission. `solution` is terminal.
    pub fn escalate(self) -> Self {
        match self {
            Self::NextStep => Self::Structure,
            Self::Structure => Self::HalfSteps,
            Self::HalfSteps | Self::Solution => Self::Solution,
            Self::Examples => Self::Examples,
        }
    }
}

impl std::fmt::Display for HintLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub message: String,
    pub level: HintLevel,
    pub line: usize,
    pub col: usize,
}

impl Hint {
    pub fn new(level: HintLevel, message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            level,
            line,
            col,
        }
    }
}

/// Wire shape of a hint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintResponse {
    pub hint_message: String,
    pub hint_type: HintLevel,
    pub line: usize,
    pub col: usize,
}

impl From<&Hint> for HintResponse {
    fn from(hint: &Hint) -> Self {
        Self {
            hint_message: hint.message.clone(),
            hint_type: hint.level,
            line: hint.line,
            col: hint.col,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub id: SubmissionId,
    pub student: String,
    pub exercise_id: ExerciseId,
    pub code: String,
    pub score: f64,
    pub feedback: String,
    pub hint: Option<Hint>,
    pub created_at: DateTime<Utc>,
}

// ── Anomalies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Adjacent tiers disagree on the score of the same program.
    ScoreMismatch,
    /// Reprinting a submission changed its test result.
    CleaningChangedScore,
    /// More than one stored state shares the same code.
    DuplicateState,
    /// An individualized edit does not apply to the student's tree.
    BrokenEdit,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScoreMismatch => "score_mismatch",
            Self::CleaningChangedScore => "cleaning_changed_score",
            Self::DuplicateState => "duplicate_state",
            Self::BrokenEdit => "broken_edit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "score_mismatch" => Self::ScoreMismatch,
            "cleaning_changed_score" => Self::CleaningChangedScore,
            "duplicate_state" => Self::DuplicateState,
            "broken_edit" => Self::BrokenEdit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub exercise_id: Option<ExerciseId>,
    pub kind: AnomalyKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn new(exercise_id: Option<ExerciseId>, kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            exercise_id,
            kind,
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

/// Per-exercise corpus statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    pub cleaned: u64,
    pub anon: u64,
    pub canonical: u64,
    pub correct_cleaned: u64,
    pub submissions: u64,
    pub anomalies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_is_monotonic_and_terminal() {
        let mut level = HintLevel::NextStep;
        let mut seen = vec![level];
        for _ in 0..5 {
            level = level.escalate();
            seen.push(level);
        }
        assert_eq!(
            seen,
            vec![
                HintLevel::NextStep,
                HintLevel::Structure,
                HintLevel::HalfSteps,
                HintLevel::Solution,
                HintLevel::Solution,
                HintLevel::Solution,
            ]
        );
    }

    #[test]
    fn names_roundtrip() {
        for tier in [Tier::Source, Tier::Cleaned, Tier::Anon, Tier::Canonical] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        for level in [HintLevel::NextStep, HintLevel::Examples] {
            assert_eq!(HintLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(
            serde_json::to_string(&HintLevel::HalfSteps).unwrap(),
            "\"half_steps\""
        );
    }

    #[test]
    fn alternate_tier() {
        assert_eq!(Tier::Anon.alternate(), Tier::Canonical);
        assert_eq!(Tier::Canonical.alternate(), Tier::Anon);
    }
}
