use std::collections::BTreeSet;

use hintgen_lang::{Node, print_tree};
use tracing::{debug, warn};

use crate::error::Result;
use crate::runner::TestRunner;
use crate::store::HintStore;
use crate::types::{Anomaly, AnomalyKind, Exercise, SourceState, StateRecord, Tier};

use super::{NameMap, anonymize, canonicalize};

/// The three normalized tiers of one submission.
///
/// The records are the stored, deduplicated states. The trees are derived
/// from this submission's own parse, carry its tree ids and spans, and are
/// what the hint path diffs against.
#[derive(Debug, Clone)]
pub struct DerivedStates {
    pub cleaned: StateRecord,
    pub anon: StateRecord,
    pub canonical: StateRecord,
    pub cleaned_tree: Node,
    pub anon_tree: Node,
    pub canonical_tree: Node,
    pub names: NameMap,
}

impl DerivedStates {
    pub fn record(&self, tier: Tier) -> &StateRecord {
        match tier {
            Tier::Canonical => &self.canonical,
            Tier::Anon => &self.anon,
            Tier::Source | Tier::Cleaned => &self.cleaned,
        }
    }

    pub fn tree(&self, tier: Tier) -> &Node {
        match tier {
            Tier::Canonical => &self.canonical_tree,
            Tier::Anon => &self.anon_tree,
            Tier::Source | Tier::Cleaned => &self.cleaned_tree,
        }
    }
}

/// Persist an anomaly and log it. Recording failures are logged, never
/// propagated.
pub async fn flag(store: &dyn HintStore, exercise: &Exercise, kind: AnomalyKind, detail: String) {
    warn!(target: "anomaly", exercise = %exercise.config.name, kind = kind.as_str(), "{detail}");
    if let Err(e) = store
        .record_anomaly(&Anomaly::new(Some(exercise.id), kind, detail))
        .await
    {
        warn!(error = %e, "failed to record anomaly");
    }
}

fn scores_differ(a: f64, b: f64) -> bool {
    (a - b).abs() > 1e-9
}

/// Look up a tier's state by printed code, flagging duplicates.
async fn existing(
    store: &dyn HintStore,
    exercise: &Exercise,
    tier: Tier,
    code: &str,
) -> Result<Option<StateRecord>> {
    let mut found = store.find_states(exercise.id, tier, code).await?;
    if found.len() > 1 {
        flag(
            store,
            exercise,
            AnomalyKind::DuplicateState,
            format!("{} {tier} states share the same code", found.len()),
        )
        .await;
    }
    Ok(if found.is_empty() {
        None
    } else {
        Some(found.swap_remove(0))
    })
}

/// Store the Anon or Canonical state derived from `parent`, reusing the
/// state `parent` already links to when it has one. Returns the stored
/// state and whether it was newly linked.
async fn derive(
    store: &dyn HintStore,
    exercise: &Exercise,
    parent: &mut StateRecord,
    tier: Tier,
    tree: &Node,
    orig_tree: &Node,
) -> Result<StateRecord> {
    let linked = match parent.derived {
        Some(id) => store.get_state(id).await?,
        None => None,
    };

    let code = match &linked {
        Some(state) => {
            debug!(tier = %tier, state = %state.id, "reusing linked state");
            state.code.clone()
        }
        None => print_tree(tree),
    };
    let prior = existing(store, exercise, tier, &code).await?;

    let mut record = StateRecord::new(exercise.id, tier, code, strip(tree));
    record.score = parent.score;
    record.feedback.clone_from(&parent.feedback);
    record.orig_tree = Some(strip(orig_tree));
    let stored = store.upsert_state(&record).await?;

    if let Some(prior) = prior {
        if scores_differ(prior.score, parent.score) {
            flag(
                store,
                exercise,
                AnomalyKind::ScoreMismatch,
                format!(
                    "{tier} state {} scores {} but its {} state {} scores {}",
                    prior.id, prior.score, parent.tier, parent.id, parent.score
                ),
            )
            .await;
        }
    }

    if parent.derived != Some(stored.id) {
        parent.derived = Some(stored.id);
        store.update_state(parent).await?;
    }
    Ok(stored)
}

/// Stored trees drop ids and spans; they belong to one submission.
fn strip(tree: &Node) -> Node {
    let mut copy = tree.clone();
    copy.for_each_mut(&mut |n| {
        n.id = None;
        n.span = None;
    });
    copy
}

/// Derive and store the Cleaned, Anon, and Canonical states of a parsed
/// submission. Returns `None` when the source did not parse.
///
/// The Cleaned tier re-runs the tests on the reprinted code every time, and
/// a stored score that disagrees is corrected; Anon and Canonical inherit
/// the Cleaned score. Every disagreement is flagged as an
/// anomaly and processing continues.
pub async fn generate_states(
    store: &dyn HintStore,
    runner: &dyn TestRunner,
    exercise: &Exercise,
    source: &SourceState,
    reserved: &BTreeSet<String>,
) -> Result<Option<DerivedStates>> {
    let Some(tree) = &source.tree else {
        return Ok(None);
    };
    let mut cleaned_tree = tree.clone();
    cleaned_tree.assign_ids();
    let cleaned_code = print_tree(&cleaned_tree);

    // ── Cleaned ──
    let prior = existing(store, exercise, Tier::Cleaned, &cleaned_code).await?;
    let outcome = runner.run(&cleaned_code, &exercise.config);
    if scores_differ(outcome.score, source.score) {
        flag(
            store,
            exercise,
            AnomalyKind::CleaningChangedScore,
            format!(
                "reprinting changed the score from {} to {}",
                source.score, outcome.score
            ),
        )
        .await;
    }
    if let Some(prior) = &prior {
        if scores_differ(prior.score, outcome.score) {
            flag(
                store,
                exercise,
                AnomalyKind::ScoreMismatch,
                format!(
                    "cleaned state {} is stored with score {} but now scores {}",
                    prior.id, prior.score, outcome.score
                ),
            )
            .await;
        }
    }
    let mut record = StateRecord::new(exercise.id, Tier::Cleaned, cleaned_code.clone(), strip(&cleaned_tree));
    record.score = outcome.score;
    record.feedback = outcome.feedback;
    let mut cleaned = store.upsert_state(&record).await?;
    if scores_differ(cleaned.score, record.score) {
        cleaned.score = record.score;
        cleaned.feedback = record.feedback;
        store.update_state(&cleaned).await?;
    }
    debug!(state = %cleaned.id, count = cleaned.count, "cleaned state");

    // ── Anon ──
    let (anon_tree, names) = anonymize(&cleaned_tree, reserved);
    let mut anon = derive(store, exercise, &mut cleaned, Tier::Anon, &anon_tree, &cleaned_tree).await?;
    debug!(state = %anon.id, count = anon.count, "anon state");

    // ── Canonical ──
    let canonical_tree = canonicalize(&anon_tree, &exercise.config.arguments);
    let canonical = derive(
        store,
        exercise,
        &mut anon,
        Tier::Canonical,
        &canonical_tree,
        &cleaned_tree,
    )
    .await?;
    debug!(state = %canonical.id, count = canonical.count, "canonical state");

    Ok(Some(DerivedStates {
        cleaned,
        anon,
        canonical,
        cleaned_tree,
        anon_tree,
        canonical_tree,
        names,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArgType, ExerciseConfig, TestCase};
    use crate::runner::{InterpreterRunner, TestOutcome};
    use crate::store::SqliteStore;

    fn exercise_config() -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: "canDrinkAlcohol".to_string(),
            function: None,
            given_code: String::new(),
            solution_code: "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n".to_string(),
            arguments: [("canDrinkAlcohol".to_string(), vec![ArgType::Int, ArgType::Bool])]
                .into_iter()
                .collect(),
            tests: [("(22, True)", "False"), ("(20, False)", "False"), ("(21, False)", "True")]
                .iter()
                .map(|(i, o)| TestCase {
                    input: (*i).to_string(),
                    output: (*o).to_string(),
                    extra: None,
                })
                .collect(),
        }
    }

    async fn setup() -> (SqliteStore, Exercise) {
        let store = SqliteStore::in_memory().unwrap();
        let config = exercise_config();
        let id = store.upsert_exercise(&config).await.unwrap();
        (store, Exercise { id, config, solution_state: None })
    }

    fn source(code: &str) -> SourceState {
        let outcome = InterpreterRunner::default().run(code, &exercise_config());
        SourceState {
            code: code.to_string(),
            tree: hintgen_lang::parse(code).ok(),
            score: outcome.score,
            feedback: outcome.feedback,
        }
    }

    async fn run(store: &SqliteStore, exercise: &Exercise, code: &str) -> Option<DerivedStates> {
        generate_states(
            store,
            &InterpreterRunner::default(),
            exercise,
            &source(code),
            &exercise.config.reserved_names(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn differently_formatted_submissions_collapse() {
        let (store, exercise) = setup().await;
        let a = run(&store, &exercise, "def canDrinkAlcohol(age, isDriving):\n    return age>21 # hmm\n").await.unwrap();
        let b = run(&store, &exercise, "def canDrinkAlcohol( age,isDriving ):\n  return (age > 21)\n").await.unwrap();

        assert_eq!(a.cleaned.id, b.cleaned.id);
        assert_eq!(a.anon.id, b.anon.id);
        assert_eq!(a.canonical.id, b.canonical.id);
        assert_eq!(b.cleaned.count, 2);
        assert_eq!(b.anon.count, 2);
        assert_eq!(b.canonical.count, 2);
        assert_eq!(b.cleaned.derived, Some(b.anon.id));
        assert_eq!(b.anon.derived, Some(b.canonical.id));
    }

    #[tokio::test]
    async fn renamed_submissions_share_anon_state() {
        let (store, exercise) = setup().await;
        let a = run(&store, &exercise, "def canDrinkAlcohol(age, d):\n    return age > 21\n").await.unwrap();
        let b = run(&store, &exercise, "def canDrinkAlcohol(years, d):\n    return years > 21\n").await.unwrap();
        assert_ne!(a.cleaned.id, b.cleaned.id);
        assert_eq!(a.anon.id, b.anon.id);
        assert_eq!(b.anon.count, 2);
        assert_eq!(b.names.original("v0"), Some("years"));
    }

    #[tokio::test]
    async fn tiers_inherit_cleaned_score_and_trees_keep_ids() {
        let (store, exercise) = setup().await;
        let derived = run(
            &store,
            &exercise,
            "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n",
        )
        .await
        .unwrap();
        assert!(derived.cleaned.is_correct());
        assert!(derived.anon.is_correct());
        assert!(derived.canonical.is_correct());
        assert_eq!(derived.canonical.code, "def canDrinkAlcohol(v0, v1):\n    return 21 <= v0 and not v1\n");
        assert!(derived.anon_tree.walk().all(|n| n.id.is_some()));
        assert!(derived.anon.tree.as_ref().unwrap().walk().all(|n| n.id.is_none()));
        assert!(store.anomalies(Some(exercise.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_source_yields_nothing() {
        let (store, exercise) = setup().await;
        assert!(run(&store, &exercise, "def canDrinkAlcohol(age:\n").await.is_none());
        assert_eq!(store.stats(exercise.id).await.unwrap().cleaned, 0);
    }

    #[tokio::test]
    async fn score_disagreement_is_flagged() {
        let (store, exercise) = setup().await;
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age > 21\n";
        let mut wrong = source(code);
        wrong.score = 1.0;
        generate_states(
            &store,
            &InterpreterRunner::default(),
            &exercise,
            &wrong,
            &exercise.config.reserved_names(),
        )
        .await
        .unwrap();
        let anomalies = store.anomalies(Some(exercise.id)).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::CleaningChangedScore);
    }

    /// Passes only code that still carries its `# ok` comment, so reprinting
    /// always changes the score.
    struct CommentRunner;

    impl TestRunner for CommentRunner {
        fn run(&self, code: &str, _exercise: &ExerciseConfig) -> TestOutcome {
            let score = if code.contains("# ok") { 1.0 } else { 0.0 };
            TestOutcome { score, feedback: String::new() }
        }
    }

    #[tokio::test]
    async fn cleaned_code_is_retested_when_already_stored() {
        let (store, exercise) = setup().await;
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age >= 21  # ok\n";
        let submitted = SourceState {
            code: code.to_string(),
            tree: hintgen_lang::parse(code).ok(),
            score: CommentRunner.run(code, &exercise.config).score,
            feedback: String::new(),
        };
        for _ in 0..2 {
            let derived = generate_states(&store, &CommentRunner, &exercise, &submitted, &exercise.config.reserved_names())
                .await
                .unwrap()
                .unwrap();
            assert!(!derived.cleaned.is_correct());
        }

        let anomalies = store.anomalies(Some(exercise.id)).await.unwrap();
        let changed = anomalies.iter().filter(|a| a.kind == AnomalyKind::CleaningChangedScore).count();
        assert_eq!(changed, 2);
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::ScoreMismatch));
    }

    #[tokio::test]
    async fn stale_stored_score_is_flagged() {
        let (store, exercise) = setup().await;
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n";
        let first = run(&store, &exercise, code).await.unwrap();
        let mut stale = first.cleaned.clone();
        stale.score = 0.0;
        store.update_state(&stale).await.unwrap();

        let second = run(&store, &exercise, code).await.unwrap();
        assert!(second.cleaned.is_correct());
        let stored = store.get_state(second.cleaned.id).await.unwrap().unwrap();
        assert!(stored.is_correct());

        let anomalies = store.anomalies(Some(exercise.id)).await.unwrap();
        assert!(anomalies.iter().any(|a| a.kind == AnomalyKind::ScoreMismatch));
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::CleaningChangedScore));
    }
}
