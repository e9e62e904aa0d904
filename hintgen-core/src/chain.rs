//! Offline validation: repeatedly apply `next_step` hints to a submission
//! and check that the chain reaches a correct program.

use std::collections::BTreeMap;

use hintgen_lang::{parse, print_tree};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::diff::{ChangeVector, apply_changes, edit_weight};
use crate::engine::{HintEdit, HintEngine};
use crate::error::Result;
use crate::progress::ChainProgress;
use crate::syntax::{self, SyntaxEdit};
use crate::types::{Exercise, HintLevel, is_full_score};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOutcome {
    /// The submission already passed every test.
    StartedCorrect,
    /// The chain reached a correct program.
    Success,
    /// No usable hint was produced.
    NoNextStep,
    /// Applying a hint produced code that does not parse.
    EditBroke,
    /// The cutoff was reached.
    TooLong,
    /// Any other failure to converge.
    Broken,
    /// A hint undid or repeated an earlier one.
    RepeatingEdits,
}

impl ChainOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartedCorrect => "Started Correct",
            Self::Success => "Success",
            Self::NoNextStep => "NO NEXT STEP",
            Self::EditBroke => "EDIT BROKE",
            Self::TooLong => "TOO LONG",
            Self::Broken => "BROKEN",
            Self::RepeatingEdits => "REPEATING EDITS",
        }
    }

    pub fn converged(self) -> bool {
        matches!(self, Self::StartedCorrect | Self::Success)
    }
}

impl std::fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    /// Hints applied.
    pub steps: u32,
    /// Total weight of the structural edits applied.
    pub edit_weight: u32,
    /// Total characters inserted or deleted by textual edits.
    pub chr_count: usize,
    pub final_code: String,
}

/// Emitted edits, for cycle detection.
#[derive(Default)]
struct History {
    structural: Vec<Vec<ChangeVector>>,
    textual: Vec<SyntaxEdit>,
}

impl History {
    fn repeats_structural(&self, changes: &[ChangeVector]) -> bool {
        self.structural.iter().any(|seen| {
            seen.len() == changes.len() && seen.iter().zip(changes).all(|(a, b)| a.same_edit(b))
        })
    }

    /// An edit that undoes the previous textual edit at the same place.
    fn undoes_textual(&self, edits: &[SyntaxEdit]) -> bool {
        edits.iter().any(|e| self.textual.iter().any(|prev| prev.reverses(e)))
    }
}

/// Follow `next_step` hints from `code` for at most `cutoff` steps.
#[instrument(skip_all, fields(exercise = %exercise.config.name, student))]
pub async fn do_hint_chain(
    engine: &HintEngine<'_>,
    exercise: &Exercise,
    student: &str,
    code: &str,
    cutoff: u32,
) -> Result<ChainReport> {
    let mut report = ChainReport {
        outcome: ChainOutcome::Broken,
        steps: 0,
        edit_weight: 0,
        chr_count: 0,
        final_code: code.to_string(),
    };
    let mut history = History::default();

    report.outcome = loop {
        let outcome = match engine
            .hint_for(exercise, student, &report.final_code, Some(HintLevel::NextStep))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, step = report.steps, "hint request failed");
                break ChainOutcome::Broken;
            }
        };
        if is_full_score(outcome.score) {
            break if report.steps == 0 {
                ChainOutcome::StartedCorrect
            } else {
                ChainOutcome::Success
            };
        }
        if report.steps >= cutoff {
            break ChainOutcome::TooLong;
        }

        let next_code = match outcome.edit {
            HintEdit::None => break ChainOutcome::NoNextStep,
            HintEdit::Structural { changes, tree } => {
                if history.repeats_structural(&changes) {
                    break ChainOutcome::RepeatingEdits;
                }
                let Ok(edited) = apply_changes(&tree, &changes) else {
                    break ChainOutcome::EditBroke;
                };
                report.edit_weight += edit_weight(&changes);
                history.structural.push(changes);
                let printed = print_tree(&edited);
                if parse(&printed).is_err() {
                    report.final_code = printed;
                    break ChainOutcome::EditBroke;
                }
                printed
            }
            HintEdit::Textual { edits } => {
                if edits.is_empty() {
                    break ChainOutcome::NoNextStep;
                }
                if history.undoes_textual(&edits) {
                    break ChainOutcome::RepeatingEdits;
                }
                report.chr_count += edits.iter().map(SyntaxEdit::chars).sum::<usize>();
                let applied = syntax::apply_changes(&report.final_code, &edits);
                history.textual = edits;
                applied
            }
        };

        report.steps += 1;
        if next_code == report.final_code {
            break ChainOutcome::Broken;
        }
        debug!(step = report.steps, "hint applied");
        report.final_code = next_code;
    };

    info!(outcome = %report.outcome, steps = report.steps, "chain finished");
    Ok(report)
}

/// Outcomes of a batch of chains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainSummary {
    pub reports: Vec<(String, ChainReport)>,
    pub outcomes: BTreeMap<ChainOutcome, usize>,
}

impl ChainSummary {
    pub fn converged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(o, _)| o.converged())
            .map(|(_, n)| n)
            .sum()
    }
}

/// Run a chain for each labelled submission. Each chain uses its own
/// student id so escalation state never carries between them.
pub async fn validate_chains(
    engine: &HintEngine<'_>,
    exercise: &Exercise,
    submissions: &[(String, String)],
    cutoff: u32,
    progress: &dyn ChainProgress,
) -> Result<ChainSummary> {
    progress.begin(u64::try_from(submissions.len()).unwrap_or(u64::MAX));
    let mut summary = ChainSummary::default();
    for (label, code) in submissions {
        let student = format!("chain:{label}");
        let report = do_hint_chain(engine, exercise, &student, code, cutoff).await?;
        progress.completed(label, &report);
        *summary.outcomes.entry(report.outcome).or_default() += 1;
        summary.reports.push((label.clone(), report));
    }
    progress.finish();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::{DerivedStates, generate_states};
    use crate::config::{ArgType, EngineSection, ExerciseConfig, TestCase};
    use crate::diff::{Change, diff};
    use crate::graph::fingerprint;
    use crate::progress::SilentProgress;
    use crate::runner::{InterpreterRunner, TestRunner};
    use crate::store::{HintStore, SqliteStore};
    use crate::types::{SourceState, Tier};

    const SOLUTION: &str = "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n";

    fn config() -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: "canDrinkAlcohol".to_string(),
            function: None,
            given_code: String::new(),
            solution_code: SOLUTION.to_string(),
            arguments: [("canDrinkAlcohol".to_string(), vec![ArgType::Int, ArgType::Bool])]
                .into_iter()
                .collect(),
            tests: [
                ("(22, True)", "False"),
                ("(20, False)", "False"),
                ("(21, False)", "True"),
                ("(30, False)", "True"),
            ]
            .iter()
            .map(|(i, o)| TestCase {
                input: (*i).to_string(),
                output: (*o).to_string(),
                extra: None,
            })
            .collect(),
        }
    }

    async fn chain(code: &str) -> ChainReport {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let exercise = engine.setup_exercise(&config()).await.unwrap();
        do_hint_chain(&engine, &exercise, "chain", code, 40).await.unwrap()
    }

    #[tokio::test]
    async fn correct_code_starts_correct() {
        let report = chain(SOLUTION).await;
        assert_eq!(report.outcome, ChainOutcome::StartedCorrect);
        assert_eq!(report.steps, 0);
    }

    #[tokio::test]
    async fn operator_fix_converges_in_one_step() {
        let report = chain("def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n").await;
        assert_eq!(report.outcome, ChainOutcome::Success);
        assert_eq!(report.steps, 1);
        assert_eq!(report.edit_weight, 1);
        assert_eq!(report.final_code, SOLUTION);
    }

    #[tokio::test]
    async fn missing_clause_converges() {
        let report = chain("def canDrinkAlcohol(age, isDriving):\n    return age >= 21\n").await;
        assert_eq!(report.outcome, ChainOutcome::Success, "{report:?}");
        assert!(report.steps >= 1);
    }

    #[tokio::test]
    async fn syntax_error_is_repaired_textually() {
        let report = chain("def canDrinkAlcohol(age, isDriving:\n    return age >= 21 and not isDriving\n").await;
        assert_eq!(report.outcome, ChainOutcome::Success);
        assert_eq!(report.chr_count, 1);
    }

    #[tokio::test]
    async fn zero_cutoff_is_too_long() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let exercise = engine.setup_exercise(&config()).await.unwrap();
        let report = do_hint_chain(
            &engine,
            &exercise,
            "chain",
            "def canDrinkAlcohol(age, isDriving):\n    return age > 21\n",
            0,
        )
        .await
        .unwrap();
        assert_eq!(report.outcome, ChainOutcome::TooLong);
    }

    #[tokio::test]
    async fn batch_counts_outcomes() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let exercise = engine.setup_exercise(&config()).await.unwrap();
        let submissions = vec![
            ("a.py".to_string(), SOLUTION.to_string()),
            (
                "b.py".to_string(),
                "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n".to_string(),
            ),
        ];
        let summary = validate_chains(&engine, &exercise, &submissions, 40, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.reports.len(), 2);
        assert_eq!(summary.converged(), 2);
        assert_eq!(summary.outcomes.get(&ChainOutcome::StartedCorrect), Some(&1));
    }

    #[test]
    fn repeated_textual_edit_is_detected() {
        let history = History {
            structural: Vec::new(),
            textual: vec![SyntaxEdit {
                kind: syntax::SyntaxEditKind::Insert,
                line: 1,
                col: 4,
                text: ":".into(),
            }],
        };
        let undo = SyntaxEdit {
            kind: syntax::SyntaxEditKind::Delete,
            line: 1,
            col: 4,
            text: ":".into(),
        };
        assert!(history.undoes_textual(&[undo]));
    }

    #[test]
    fn repeated_structural_edit_is_detected() {
        let (a, b, c) = (
            parse("x = 1\n").unwrap(),
            parse("x = 2\n").unwrap(),
            parse("x = 3\n").unwrap(),
        );
        let history = History {
            structural: vec![diff(&a, &b)],
            textual: Vec::new(),
        };
        // Same change, computed again from a fresh tree.
        assert!(history.repeats_structural(&diff(&parse("x = 1\n").unwrap(), &b)));
        assert!(!history.repeats_structural(&diff(&a, &c)));
        assert!(!history.repeats_structural(&diff(&b, &a)));
        assert!(!history.repeats_structural(&[]));
        assert!(matches!(diff(&a, &b)[0].change, Change::Relabel { .. }));
    }

    async fn derive(store: &SqliteStore, runner: &InterpreterRunner, exercise: &Exercise, code: &str) -> DerivedStates {
        let outcome = runner.run(code, &exercise.config);
        let source = SourceState {
            code: code.to_string(),
            tree: parse(code).ok(),
            score: outcome.score,
            feedback: outcome.feedback,
        };
        generate_states(store, runner, exercise, &source, &exercise.config.reserved_names())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn alternating_next_pointers_repeat() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let exercise = engine.setup_exercise(&config()).await.unwrap();

        let above = "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n";
        let below = "def canDrinkAlcohol(age, isDriving):\n    return age < 21 and not isDriving\n";
        let a = derive(&store, &runner, &exercise, above).await;
        let b = derive(&store, &runner, &exercise, below).await;

        // Point each state's next at the other, with a fresh fingerprint so
        // the goal graph trusts the stored pointers.
        for tier in [Tier::Anon, Tier::Canonical] {
            let goals = store.goal_states(exercise.id, tier).await.unwrap();
            let (mut x, mut y) = (a.record(tier).clone(), b.record(tier).clone());
            for (state, next) in [(&mut x, b.record(tier).id), (&mut y, a.record(tier).id)] {
                state.goal = Some(goals[0].id);
                state.next = Some(next);
                state.fingerprint = Some(fingerprint(&goals));
                store.update_state(state).await.unwrap();
            }
        }

        let report = do_hint_chain(&engine, &exercise, "chain", above, 40).await.unwrap();
        assert_eq!(report.outcome, ChainOutcome::RepeatingEdits, "{report:?}");
        assert_eq!(report.steps, 2);
        assert!(report.final_code.contains("age > 21"), "{}", report.final_code);
    }
}
