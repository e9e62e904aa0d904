//! Hint engine: turns a student's submission into a hint.
//!
//! A submission that parses is abstracted into Cleaned/Anon/Canonical
//! states, the goal graph supplies the next state of whichever tier is
//! closer to its goal, and the edit to that state is individualized onto the
//! student's own tree and rendered at the escalation level. Unparseable
//! submissions get textual edits instead.

use chrono::Utc;
use hintgen_lang::{Node, parse, print_tree};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::abstraction::{DerivedStates, flag, generate_states};
use crate::config::{EngineSection, ExerciseConfig};
use crate::diff::{ChangeVector, apply_changes, diff};
use crate::error::{EngineError, Result};
use crate::format::{examples_hint, format_hints, no_hint, syntax_hint};
use crate::graph::{GoalGraph, state_distance};
use crate::individualize::map_edit;
use crate::runner::{TestOutcome, TestRunner};
use crate::store::HintStore;
use crate::syntax::{SyntaxEdit, syntax_edits};
use crate::types::{
    AnomalyKind, Exercise, Hint, HintLevel, SourceState, StateRecord, Submission, SubmissionId, Tier,
    is_full_score,
};

/// Most examples shown for a correct submission.
const MAX_EXAMPLES: usize = 3;

/// The edit behind a hint, in the form the chain driver applies.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HintEdit {
    /// Changes against `tree`, the submission's cleaned tree.
    Structural {
        changes: Vec<ChangeVector>,
        #[serde(skip)]
        tree: Node,
    },
    Textual { edits: Vec<SyntaxEdit> },
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct HintOutcome {
    pub hint: Hint,
    pub edit: HintEdit,
    pub score: f64,
    pub feedback: String,
}

pub struct HintEngine<'a> {
    store: &'a dyn HintStore,
    runner: &'a dyn TestRunner,
    settings: EngineSection,
}

impl std::fmt::Debug for HintEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> HintEngine<'a> {
    pub fn new(store: &'a dyn HintStore, runner: &'a dyn TestRunner, settings: &EngineSection) -> Self {
        Self {
            store,
            runner,
            settings: settings.clone(),
        }
    }

    // ── Exercises ──────────────────────────────────────────────────

    /// Store an exercise and seed its corpus with the instructor solution,
    /// which must pass every test.
    #[instrument(skip_all, fields(exercise = %config.name))]
    pub async fn setup_exercise(&self, config: &ExerciseConfig) -> Result<Exercise> {
        config.validate()?;
        let outcome = self.runner.run(&config.solution_code, config);
        if !outcome.is_correct() {
            return Err(EngineError::SolutionFails {
                exercise: config.name.clone(),
                feedback: outcome.feedback,
            }
            .into());
        }
        let tree = parse(&config.solution_code)?;

        self.store.upsert_exercise(config).await?;
        let mut exercise = self.exercise(&config.name).await?;
        let source = SourceState {
            code: config.solution_code.clone(),
            tree: Some(tree),
            score: outcome.score,
            feedback: outcome.feedback,
        };
        if let Some(derived) = self.derive(&exercise, &source).await? {
            self.store.set_solution_state(exercise.id, derived.cleaned.id).await?;
            exercise.solution_state = Some(derived.cleaned.id);
        }
        info!(id = %exercise.id, "exercise ready");
        Ok(exercise)
    }

    pub async fn exercise(&self, name: &str) -> Result<Exercise> {
        self.store
            .get_exercise(name)
            .await?
            .ok_or_else(|| EngineError::UnknownExercise(name.to_string()).into())
    }

    /// Delete every state and submission of an exercise except the
    /// instructor solution's states. Returns the number of states deleted.
    #[instrument(skip_all, fields(exercise = %exercise.config.name))]
    pub async fn clear_solution_space(&self, exercise: &Exercise) -> Result<u64> {
        let mut keep = Vec::new();
        let mut cursor = exercise.solution_state;
        while let Some(id) = cursor {
            keep.push(id);
            cursor = self.store.get_state(id).await?.and_then(|s| s.derived);
        }
        let deleted = self.store.delete_states(exercise.id, &keep).await?;
        let submissions = self.store.clear_submissions(exercise.id).await?;
        info!(deleted, submissions, kept = keep.len(), "solution space cleared");
        Ok(deleted)
    }

    // ── Submissions ────────────────────────────────────────────────

    fn source_state(&self, exercise: &Exercise, code: &str) -> SourceState {
        let outcome = self.runner.run(code, &exercise.config);
        SourceState {
            code: code.to_string(),
            tree: parse(code).ok(),
            score: outcome.score,
            feedback: outcome.feedback,
        }
    }

    async fn derive(&self, exercise: &Exercise, source: &SourceState) -> Result<Option<DerivedStates>> {
        generate_states(
            self.store,
            self.runner,
            exercise,
            source,
            &exercise.config.reserved_names(),
        )
        .await
    }

    /// Test a submission and add it to the corpus, without hinting.
    #[instrument(skip_all, fields(exercise = %exercise.config.name))]
    pub async fn run_tests(&self, exercise: &Exercise, code: &str) -> Result<TestOutcome> {
        let code = normalize_newlines(code);
        let source = self.source_state(exercise, &code);
        self.derive(exercise, &source).await?;
        Ok(TestOutcome {
            score: source.score,
            feedback: source.feedback,
        })
    }

    /// Hint for a student's submission, escalating when the student
    /// resubmits identical code. The submission is recorded.
    pub async fn get_hint(&self, exercise: &Exercise, student: &str, code: &str) -> Result<HintOutcome> {
        self.hint_for(exercise, student, code, None).await
    }

    /// Like [`get_hint`](Self::get_hint), but at `level` when one is given.
    #[instrument(skip_all, fields(exercise = %exercise.config.name, student))]
    pub async fn hint_for(
        &self,
        exercise: &Exercise,
        student: &str,
        code: &str,
        level: Option<HintLevel>,
    ) -> Result<HintOutcome> {
        let code = normalize_newlines(code);
        let source = self.source_state(exercise, &code);
        let level = match level {
            Some(level) => level,
            None => self.escalation(exercise, student, &code).await?,
        };

        let (hint, edit) = match self.derive(exercise, &source).await? {
            None => self.syntax_hint(exercise, &code, level).await?,
            Some(derived) if is_full_score(source.score) => {
                let examples = self.examples(exercise, &derived.cleaned, &code).await?;
                (examples_hint(&examples), HintEdit::None)
            }
            Some(derived) => self.structural_hint(exercise, &derived, level).await?,
        };
        debug!(level = %hint.level, line = hint.line, "hint ready");

        self.store
            .record_submission(&Submission {
                id: SubmissionId(0),
                student: student.to_string(),
                exercise_id: exercise.id,
                code,
                score: source.score,
                feedback: source.feedback.clone(),
                hint: Some(hint.clone()),
                created_at: Utc::now(),
            })
            .await?;

        Ok(HintOutcome {
            hint,
            edit,
            score: source.score,
            feedback: source.feedback,
        })
    }

    /// `next_step` unless the student's previous submission was this exact
    /// code, in which case one level above that submission's hint.
    async fn escalation(&self, exercise: &Exercise, student: &str, code: &str) -> Result<HintLevel> {
        let last = self.store.last_submission(student, exercise.id).await?;
        Ok(match last {
            Some(Submission { code: prev, hint: Some(hint), .. }) if prev == code => hint.level.escalate(),
            _ => HintLevel::NextStep,
        })
    }

    // ── Hints ──────────────────────────────────────────────────────

    async fn syntax_hint(&self, exercise: &Exercise, code: &str, level: HintLevel) -> Result<(Hint, HintEdit)> {
        let seen = self.store.states_for(exercise.id, Tier::Cleaned).await?;
        let edits = syntax_edits(code, seen.iter().map(|s| s.code.as_str()));
        debug!(edits = edits.len(), "syntax fallback");
        Ok((syntax_hint(&edits, level), HintEdit::Textual { edits }))
    }

    /// Up to three other correct solutions: the most common, the most
    /// different, and the most similar.
    async fn examples(&self, exercise: &Exercise, state: &StateRecord, code: &str) -> Result<Vec<StateRecord>> {
        let goals = self.store.goal_states(exercise.id, Tier::Cleaned).await?;
        let mut most_common: Option<&StateRecord> = None;
        let mut furthest: Option<(&StateRecord, f64)> = None;
        let mut closest: Option<(&StateRecord, f64)> = None;

        for goal in &goals {
            if goal.id == state.id || goal.code == code {
                continue;
            }
            let (d, _) = state_distance(state, goal, false)?;
            if d == 0.0 {
                continue;
            }
            if most_common.is_none_or(|m| goal.count > m.count) {
                most_common = Some(goal);
            }
            if furthest.is_none_or(|(_, f)| d > f) {
                furthest = Some((goal, d));
            }
            if closest.is_none_or(|(_, c)| d < c) {
                closest = Some((goal, d));
            }
        }

        let mut examples: Vec<StateRecord> = Vec::new();
        let picks = [most_common, furthest.map(|(g, _)| g), closest.map(|(g, _)| g)];
        for pick in picks.into_iter().flatten() {
            if examples.len() < MAX_EXAMPLES && examples.iter().all(|e| e.code != pick.code) {
                examples.push(pick.clone());
            }
        }
        Ok(examples)
    }

    /// Hint from the tier whose state is closer to its goal, falling back to
    /// the other tier once.
    async fn structural_hint(
        &self,
        exercise: &Exercise,
        derived: &DerivedStates,
        level: HintLevel,
    ) -> Result<(Hint, HintEdit)> {
        let (anon, anon_distance) = self.refresh(exercise, derived.record(Tier::Anon).clone()).await?;
        let (canonical, canonical_distance) = self.refresh(exercise, derived.record(Tier::Canonical).clone()).await?;
        let primary = if anon_distance <= canonical_distance { Tier::Anon } else { Tier::Canonical };
        debug!(anon_distance, canonical_distance, tier = %primary, "tier chosen");

        for tier in [primary, primary.alternate()] {
            let state = if tier == Tier::Anon { anon.clone() } else { canonical.clone() };
            match self.tier_edit(exercise, derived, state).await? {
                Some(changes) => {
                    let hint = format_hints(&changes, level, &derived.cleaned_tree);
                    let edit = HintEdit::Structural {
                        changes,
                        tree: derived.cleaned_tree.clone(),
                    };
                    return Ok((hint, edit));
                }
                None => debug!(tier = %tier, "no usable path"),
            }
        }
        Ok((no_hint(level), HintEdit::None))
    }

    /// Refresh the state's pointers and measure its distance to its goal.
    async fn refresh(&self, exercise: &Exercise, mut state: StateRecord) -> Result<(StateRecord, f64)> {
        let mut graph = GoalGraph::new(self.store, self.runner, exercise, &self.settings);
        graph.get_next_state(&mut state).await?;
        let goal = match state.goal {
            Some(id) => self.store.get_state(id).await?,
            None => None,
        };
        let distance = match goal {
            Some(goal) => state_distance(&state, &goal, true)?.0,
            None => f64::INFINITY,
        };
        Ok((state, distance))
    }

    /// Individualized edit along `tier`'s next pointers. Next states whose
    /// edit has no effect on the student's code are skipped.
    async fn tier_edit(
        &self,
        exercise: &Exercise,
        derived: &DerivedStates,
        mut state: StateRecord,
    ) -> Result<Option<Vec<ChangeVector>>> {
        let tier = state.tier;
        let mut graph = GoalGraph::new(self.store, self.runner, exercise, &self.settings);
        let mut normalized = derived.tree(tier).clone();

        for _ in 0..=self.settings.chain_cutoff {
            let Some(next) = graph.get_next_state(&mut state).await? else {
                return Ok(None);
            };
            let Some(target) = next.load_tree() else {
                return Ok(None);
            };
            let changes = diff(&normalized, &target);
            let mapped = match map_edit(&normalized, &derived.cleaned_tree, &changes, &derived.names) {
                Ok(mapped) => mapped,
                Err(e) => {
                    flag(self.store, exercise, AnomalyKind::BrokenEdit, format!("{tier} edit does not map: {e}")).await;
                    return Ok(None);
                }
            };

            if !mapped.is_empty() {
                if edit_breaks(&derived.cleaned_tree, &mapped) {
                    flag(
                        self.store,
                        exercise,
                        AnomalyKind::BrokenEdit,
                        format!("{tier} edit toward state {} breaks the submission", next.id),
                    )
                    .await;
                    return Ok(None);
                }
                return Ok(Some(mapped));
            }

            debug!(tier = %tier, state = %next.id, "edit has no effect; advancing");
            if next.is_correct() {
                return Ok(None);
            }
            normalized = apply_changes(&normalized, &changes)?;
            state = next;
        }
        warn!(tier = %tier, "next chain did not produce an edit");
        Ok(None)
    }
}

/// The individualized edit fails to apply or prints unparseable code.
fn edit_breaks(tree: &Node, changes: &[ChangeVector]) -> bool {
    match apply_changes(tree, changes) {
        Ok(edited) => parse(&print_tree(&edited)).is_err(),
        Err(e) => {
            debug!(error = %e, "edit failed to apply");
            true
        }
    }
}

fn normalize_newlines(code: &str) -> String {
    code.replace("\r\n", "\n").replace("\n\r", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArgType, TestCase};
    use crate::runner::InterpreterRunner;
    use crate::store::SqliteStore;

    const SOLUTION: &str = "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n";

    fn config(solution: &str) -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: "canDrinkAlcohol".to_string(),
            function: None,
            given_code: String::new(),
            solution_code: solution.to_string(),
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

    async fn setup(store: &SqliteStore, runner: &InterpreterRunner) -> Exercise {
        HintEngine::new(store, runner, &EngineSection::default())
            .setup_exercise(&config(SOLUTION))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn setup_seeds_solution_states() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        assert!(exercise.solution_state.is_some());
        let stats = store.stats(exercise.id).await.unwrap();
        assert_eq!((stats.cleaned, stats.anon, stats.canonical), (1, 1, 1));
        assert_eq!(store.goal_states(exercise.id, Tier::Anon).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_solution_is_rejected() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let err = engine
            .setup_exercise(&config("def canDrinkAlcohol(age, isDriving):\n    return True\n"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not pass its tests"));
    }

    #[tokio::test]
    async fn wrong_operator_gets_concrete_next_step() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());

        let outcome = engine
            .get_hint(
                &exercise,
                "s1",
                "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n",
            )
            .await
            .unwrap();
        assert!(outcome.score < 1.0);
        assert_eq!(outcome.hint.level, HintLevel::NextStep);
        assert_eq!(outcome.hint.message, "On line 2, replace `>` with `>=`.");
        assert_eq!(outcome.hint.line, 2);
        let HintEdit::Structural { changes, tree } = &outcome.edit else {
            panic!("expected a structural edit, got {:?}", outcome.edit);
        };
        let fixed = print_tree(&apply_changes(tree, changes).unwrap());
        assert_eq!(runner.run(&fixed, &exercise.config).score, 1.0);
    }

    #[tokio::test]
    async fn identical_resubmission_escalates_and_change_resets() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n";

        let mut levels = Vec::new();
        for _ in 0..5 {
            levels.push(engine.get_hint(&exercise, "s1", code).await.unwrap().hint.level);
        }
        assert_eq!(
            levels,
            vec![
                HintLevel::NextStep,
                HintLevel::Structure,
                HintLevel::HalfSteps,
                HintLevel::Solution,
                HintLevel::Solution,
            ]
        );

        let changed = "def canDrinkAlcohol(age, isDriving):\n    return age > 20 and not isDriving\n";
        let reset = engine.get_hint(&exercise, "s1", changed).await.unwrap();
        assert_eq!(reset.hint.level, HintLevel::NextStep);

        // Escalation is per student.
        let other = engine.get_hint(&exercise, "s2", code).await.unwrap();
        assert_eq!(other.hint.level, HintLevel::NextStep);
    }

    #[tokio::test]
    async fn correct_submission_gets_examples_not_edits() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let alternative = "def canDrinkAlcohol(age, isDriving):\n    if isDriving:\n        return False\n    return age >= 21\n";
        engine.run_tests(&exercise, alternative).await.unwrap();

        let outcome = engine.get_hint(&exercise, "s1", SOLUTION).await.unwrap();
        assert_eq!(outcome.hint.level, HintLevel::Examples);
        assert!(matches!(outcome.edit, HintEdit::None));
        assert!(outcome.hint.message.contains("if isDriving:"));
        assert!(!outcome.hint.message.contains(SOLUTION.trim_end()));
    }

    #[tokio::test]
    async fn unparseable_code_gets_textual_edits() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        let broken = "def canDrinkAlcohol(age, isDriving:\n    return age >= 21 and not isDriving\n";

        let outcome = engine.get_hint(&exercise, "s1", broken).await.unwrap();
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.hint.message.starts_with("Syntax error: on line 1"));
        let HintEdit::Textual { edits } = &outcome.edit else {
            panic!("expected textual edits");
        };
        assert_eq!(crate::syntax::apply_changes(broken, edits), SOLUTION);
    }

    #[tokio::test]
    async fn run_tests_grows_the_corpus() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());

        let outcome = engine
            .run_tests(&exercise, "def canDrinkAlcohol(a, b):\r\n    return a > 21\r\n")
            .await
            .unwrap();
        assert!(outcome.score > 0.0 && outcome.score < 1.0);
        assert!(outcome.feedback.contains("tests passed"));
        assert_eq!(store.stats(exercise.id).await.unwrap().cleaned, 2);
    }

    #[tokio::test]
    async fn clearing_keeps_only_the_solution() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let exercise = setup(&store, &runner).await;
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        engine
            .get_hint(&exercise, "s1", "def canDrinkAlcohol(age, isDriving):\n    return age > 21\n")
            .await
            .unwrap();

        let deleted = engine.clear_solution_space(&exercise).await.unwrap();
        assert!(deleted >= 3);
        let stats = store.stats(exercise.id).await.unwrap();
        assert_eq!((stats.cleaned, stats.anon, stats.canonical), (1, 1, 1));
        assert!(store.last_submission("s1", exercise.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_exercise_is_an_error() {
        let (store, runner) = (SqliteStore::in_memory().unwrap(), InterpreterRunner::default());
        let engine = HintEngine::new(&store, &runner, &EngineSection::default());
        assert!(engine.exercise("nope").await.is_err());
    }

    #[test]
    fn line_endings_normalize() {
        assert_eq!(normalize_newlines("a\r\nb\n\rc\rd\n"), "a\nb\nc\nd\n");
    }
}
