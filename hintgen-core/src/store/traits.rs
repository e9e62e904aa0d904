use crate::config::ExerciseConfig;
use crate::types::{
    Anomaly, CorpusStats, Exercise, ExerciseId, StateId, StateRecord, Submission, SubmissionId,
    Tier,
};

/// The persistence abstraction. The engine reads and writes all corpus
/// state through this trait.
#[async_trait::async_trait]
pub trait HintStore: Send + Sync {
    // ── Exercises ──────────────────────────────────────────────────

    /// Insert or replace an exercise definition by name. Returns its ID.
    async fn upsert_exercise(&self, config: &ExerciseConfig) -> crate::error::Result<ExerciseId>;

    /// Get an exercise by name.
    async fn get_exercise(&self, name: &str) -> crate::error::Result<Option<Exercise>>;

    /// All exercises, ordered by name.
    async fn list_exercises(&self) -> crate::error::Result<Vec<Exercise>>;

    /// Record the cleaned state of the instructor solution.
    async fn set_solution_state(
        &self,
        exercise: ExerciseId,
        state: StateId,
    ) -> crate::error::Result<()>;

    // ── States ─────────────────────────────────────────────────────

    /// Insert a state, or add its `count` to the existing state with the
    /// same (exercise, tier, code). Returns the stored record.
    async fn upsert_state(&self, state: &StateRecord) -> crate::error::Result<StateRecord>;

    /// Get a state by ID.
    async fn get_state(&self, id: StateId) -> crate::error::Result<Option<StateRecord>>;

    /// States of a tier whose printed code equals `code`.
    async fn find_states(
        &self,
        exercise: ExerciseId,
        tier: Tier,
        code: &str,
    ) -> crate::error::Result<Vec<StateRecord>>;

    /// Overwrite every mutable field of a stored state.
    async fn update_state(&self, state: &StateRecord) -> crate::error::Result<()>;

    /// All states of a tier for an exercise.
    async fn states_for(
        &self,
        exercise: ExerciseId,
        tier: Tier,
    ) -> crate::error::Result<Vec<StateRecord>>;

    /// All correct (score = 1) states of a tier for an exercise.
    async fn goal_states(
        &self,
        exercise: ExerciseId,
        tier: Tier,
    ) -> crate::error::Result<Vec<StateRecord>>;

    /// Delete an exercise's states except `keep`, clearing any handles that
    /// pointed at deleted rows. Returns count deleted.
    async fn delete_states(
        &self,
        exercise: ExerciseId,
        keep: &[StateId],
    ) -> crate::error::Result<u64>;

    // ── Submissions ────────────────────────────────────────────────

    /// Append a submission (with the hint it received) to the history.
    async fn record_submission(&self, submission: &Submission)
    -> crate::error::Result<SubmissionId>;

    /// Most recent submission of a student for an exercise.
    async fn last_submission(
        &self,
        student: &str,
        exercise: ExerciseId,
    ) -> crate::error::Result<Option<Submission>>;

    /// Delete an exercise's submission history. Returns count deleted.
    async fn clear_submissions(&self, exercise: ExerciseId) -> crate::error::Result<u64>;

    // ── Anomalies ──────────────────────────────────────────────────

    /// Persist a consistency anomaly.
    async fn record_anomaly(&self, anomaly: &Anomaly) -> crate::error::Result<()>;

    /// Anomalies, optionally restricted to one exercise, oldest first.
    async fn anomalies(&self, exercise: Option<ExerciseId>) -> crate::error::Result<Vec<Anomaly>>;

    // ── Statistics ─────────────────────────────────────────────────

    /// Corpus statistics for an exercise.
    async fn stats(&self, exercise: ExerciseId) -> crate::error::Result<CorpusStats>;
}
