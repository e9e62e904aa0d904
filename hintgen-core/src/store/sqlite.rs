use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::ExerciseConfig;
use crate::error::{HintgenError, StoreError};
use crate::types::{
    Anomaly, AnomalyKind, CorpusFingerprint, CorpusStats, Exercise, ExerciseId, Hint, HintLevel,
    StateId, StateRecord, Submission, SubmissionId, Tier,
};

use super::HintStore;
use super::schema;

/// SQLite-backed implementation of `HintStore`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

const STATE_COLUMNS: &str = "id, exercise_id, tier, code, score, feedback, count, weight, tree, \
     orig_tree, goal_id, next_id, derived_id, fp_goals, fp_max_count";

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // Ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO hintgen_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn parse_time(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
    }

    fn tree_from_json(json: Option<String>) -> Option<hintgen_lang::Node> {
        json.and_then(|j| serde_json::from_str(&j).ok())
    }

    fn tree_to_json(tree: Option<&hintgen_lang::Node>) -> crate::error::Result<Option<String>> {
        tree.map(serde_json::to_string)
            .transpose()
            .map_err(|e| HintgenError::Store(StoreError::Serialization(e)))
    }

    /// Helper: read a full state from a row selected with `STATE_COLUMNS`.
    fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRecord> {
        let tier: String = row.get("tier")?;
        let fp_goals: Option<i64> = row.get("fp_goals")?;
        let fp_max: Option<i64> = row.get("fp_max_count")?;
        let weight: i64 = row.get("weight")?;
        Ok(StateRecord {
            id: StateId(row.get("id")?),
            exercise_id: ExerciseId(row.get("exercise_id")?),
            tier: Tier::parse(&tier).unwrap_or(Tier::Cleaned),
            code: row.get("code")?,
            score: row.get("score")?,
            feedback: row.get("feedback")?,
            count: row.get("count")?,
            weight: u32::try_from(weight).unwrap_or(0),
            tree: Self::tree_from_json(row.get("tree")?),
            orig_tree: Self::tree_from_json(row.get("orig_tree")?),
            goal: row.get::<_, Option<i64>>("goal_id")?.map(StateId),
            next: row.get::<_, Option<i64>>("next_id")?.map(StateId),
            derived: row.get::<_, Option<i64>>("derived_id")?.map(StateId),
            fingerprint: fp_goals.zip(fp_max).map(|(goals, max_goal_count)| CorpusFingerprint {
                goals,
                max_goal_count,
            }),
        })
    }

    fn row_to_exercise(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, Option<i64>)> {
        Ok((row.get("id")?, row.get("config")?, row.get("solution_state")?))
    }

    fn build_exercise(
        (id, config, solution): (i64, String, Option<i64>),
    ) -> crate::error::Result<Exercise> {
        let config: ExerciseConfig =
            serde_json::from_str(&config).map_err(StoreError::Serialization)?;
        Ok(Exercise {
            id: ExerciseId(id),
            config,
            solution_state: solution.map(StateId),
        })
    }

    fn row_to_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
        let level: Option<String> = row.get("hint_level")?;
        let hint = match level.as_deref().and_then(HintLevel::parse) {
            Some(level) => {
                let line: i64 = row.get::<_, Option<i64>>("hint_line")?.unwrap_or(0);
                let col: i64 = row.get::<_, Option<i64>>("hint_col")?.unwrap_or(0);
                Some(Hint {
                    message: row.get::<_, Option<String>>("hint_message")?.unwrap_or_default(),
                    level,
                    line: usize::try_from(line).unwrap_or(0),
                    col: usize::try_from(col).unwrap_or(0),
                })
            }
            None => None,
        };
        let created: String = row.get("created_at")?;
        Ok(Submission {
            id: SubmissionId(row.get("id")?),
            student: row.get("student")?,
            exercise_id: ExerciseId(row.get("exercise_id")?),
            code: row.get("code")?,
            score: row.get("score")?,
            feedback: row.get("feedback")?,
            hint,
            created_at: Self::parse_time(&created),
        })
    }

    fn query_states(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> crate::error::Result<Vec<StateRecord>> {
        let mut stmt = conn.prepare_cached(sql).map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params, Self::row_to_state)
            .map_err(StoreError::Sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)?;
        Ok(rows)
    }

    fn count(conn: &Connection, sql: &str, exercise: ExerciseId) -> crate::error::Result<u64> {
        let n: i64 = conn
            .query_row(sql, params![exercise.0], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl HintStore for SqliteStore {
    // ── Exercises ──────────────────────────────────────────────────

    async fn upsert_exercise(&self, config: &ExerciseConfig) -> crate::error::Result<ExerciseId> {
        let conn = self.lock();
        let json = serde_json::to_string(config).map_err(StoreError::Serialization)?;
        conn.execute(
            "INSERT INTO exercises (name, config, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                config = excluded.config,
                updated_at = excluded.updated_at",
            params![config.name, json, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::Sqlite)?;

        // last_insert_rowid() is stale after ON CONFLICT DO UPDATE
        let id: i64 = conn
            .query_row(
                "SELECT id FROM exercises WHERE name = ?1",
                params![config.name],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;
        Ok(ExerciseId(id))
    }

    async fn get_exercise(&self, name: &str) -> crate::error::Result<Option<Exercise>> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT id, config, solution_state FROM exercises WHERE name = ?1",
                params![name],
                Self::row_to_exercise,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        raw.map(Self::build_exercise).transpose()
    }

    async fn list_exercises(&self) -> crate::error::Result<Vec<Exercise>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, config, solution_state FROM exercises ORDER BY name")
            .map_err(StoreError::Sqlite)?;
        let raw = stmt
            .query_map([], Self::row_to_exercise)
            .map_err(StoreError::Sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)?;
        raw.into_iter().map(Self::build_exercise).collect()
    }

    async fn set_solution_state(
        &self,
        exercise: ExerciseId,
        state: StateId,
    ) -> crate::error::Result<()> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE exercises SET solution_state = ?1 WHERE id = ?2",
                params![state.0, exercise.0],
            )
            .map_err(StoreError::Sqlite)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("exercise {exercise}")).into());
        }
        Ok(())
    }

    // ── States ─────────────────────────────────────────────────────

    async fn upsert_state(&self, state: &StateRecord) -> crate::error::Result<StateRecord> {
        let tree = Self::tree_to_json(state.tree.as_ref())?;
        let orig_tree = Self::tree_to_json(state.orig_tree.as_ref())?;
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        tx.execute(
            "INSERT INTO states (exercise_id, tier, code, score, feedback, count, weight, tree, orig_tree)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(exercise_id, tier, code) DO UPDATE SET
                count = states.count + excluded.count,
                tree = COALESCE(states.tree, excluded.tree),
                orig_tree = COALESCE(states.orig_tree, excluded.orig_tree)",
            params![
                state.exercise_id.0,
                state.tier.as_str(),
                state.code,
                state.score,
                state.feedback,
                state.count,
                i64::from(state.weight),
                tree,
                orig_tree,
            ],
        )
        .map_err(StoreError::Sqlite)?;
        let stored = tx
            .query_row(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM states
                     WHERE exercise_id = ?1 AND tier = ?2 AND code = ?3"
                ),
                params![state.exercise_id.0, state.tier.as_str(), state.code],
                Self::row_to_state,
            )
            .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(stored)
    }

    async fn get_state(&self, id: StateId) -> crate::error::Result<Option<StateRecord>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {STATE_COLUMNS} FROM states WHERE id = ?1"),
            params![id.0],
            Self::row_to_state,
        )
        .optional()
        .map_err(StoreError::Sqlite)
        .map_err(HintgenError::Store)
    }

    async fn find_states(
        &self,
        exercise: ExerciseId,
        tier: Tier,
        code: &str,
    ) -> crate::error::Result<Vec<StateRecord>> {
        let conn = self.lock();
        Self::query_states(
            &conn,
            &format!(
                "SELECT {STATE_COLUMNS} FROM states
                 WHERE exercise_id = ?1 AND tier = ?2 AND code = ?3 ORDER BY id"
            ),
            params![exercise.0, tier.as_str(), code],
        )
    }

    async fn update_state(&self, state: &StateRecord) -> crate::error::Result<()> {
        let tree = Self::tree_to_json(state.tree.as_ref())?;
        let orig_tree = Self::tree_to_json(state.orig_tree.as_ref())?;
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE states SET
                    score = ?1, feedback = ?2, count = ?3, weight = ?4, tree = ?5,
                    orig_tree = ?6, goal_id = ?7, next_id = ?8, derived_id = ?9,
                    fp_goals = ?10, fp_max_count = ?11
                 WHERE id = ?12",
                params![
                    state.score,
                    state.feedback,
                    state.count,
                    i64::from(state.weight),
                    tree,
                    orig_tree,
                    state.goal.map(|s| s.0),
                    state.next.map(|s| s.0),
                    state.derived.map(|s| s.0),
                    state.fingerprint.map(|f| f.goals),
                    state.fingerprint.map(|f| f.max_goal_count),
                    state.id.0,
                ],
            )
            .map_err(StoreError::Sqlite)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("state {}", state.id)).into());
        }
        Ok(())
    }

    async fn states_for(
        &self,
        exercise: ExerciseId,
        tier: Tier,
    ) -> crate::error::Result<Vec<StateRecord>> {
        let conn = self.lock();
        Self::query_states(
            &conn,
            &format!(
                "SELECT {STATE_COLUMNS} FROM states
                 WHERE exercise_id = ?1 AND tier = ?2 ORDER BY id"
            ),
            params![exercise.0, tier.as_str()],
        )
    }

    async fn goal_states(
        &self,
        exercise: ExerciseId,
        tier: Tier,
    ) -> crate::error::Result<Vec<StateRecord>> {
        let conn = self.lock();
        Self::query_states(
            &conn,
            &format!(
                "SELECT {STATE_COLUMNS} FROM states
                 WHERE exercise_id = ?1 AND tier = ?2 AND score >= 1.0 ORDER BY id"
            ),
            params![exercise.0, tier.as_str()],
        )
    }

    async fn delete_states(
        &self,
        exercise: ExerciseId,
        keep: &[StateId],
    ) -> crate::error::Result<u64> {
        let keep_json =
            serde_json::to_string(&keep.iter().map(|s| s.0).collect::<Vec<_>>())
                .map_err(StoreError::Serialization)?;
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        let deleted = tx
            .execute(
                "DELETE FROM states WHERE exercise_id = ?1
                 AND id NOT IN (SELECT value FROM json_each(?2))",
                params![exercise.0, keep_json],
            )
            .map_err(StoreError::Sqlite)?;
        for column in ["goal_id", "next_id", "derived_id"] {
            tx.execute(
                &format!(
                    "UPDATE states SET {column} = NULL
                     WHERE exercise_id = ?1 AND {column} IS NOT NULL
                     AND {column} NOT IN (SELECT id FROM states)"
                ),
                params![exercise.0],
            )
            .map_err(StoreError::Sqlite)?;
        }
        // Surviving states recompute their pointers on next use.
        tx.execute(
            "UPDATE states SET fp_goals = NULL, fp_max_count = NULL WHERE exercise_id = ?1",
            params![exercise.0],
        )
        .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(deleted as u64)
    }

    // ── Submissions ────────────────────────────────────────────────

    async fn record_submission(
        &self,
        submission: &Submission,
    ) -> crate::error::Result<SubmissionId> {
        let conn = self.lock();
        let hint = submission.hint.as_ref();
        conn.execute(
            "INSERT INTO submissions
                (student, exercise_id, code, score, feedback, hint_level, hint_message,
                 hint_line, hint_col, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                submission.student,
                submission.exercise_id.0,
                submission.code,
                submission.score,
                submission.feedback,
                hint.map(|h| h.level.as_str()),
                hint.map(|h| h.message.as_str()),
                hint.and_then(|h| i64::try_from(h.line).ok()),
                hint.and_then(|h| i64::try_from(h.col).ok()),
                submission.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(SubmissionId(conn.last_insert_rowid()))
    }

    async fn last_submission(
        &self,
        student: &str,
        exercise: ExerciseId,
    ) -> crate::error::Result<Option<Submission>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM submissions WHERE student = ?1 AND exercise_id = ?2
             ORDER BY id DESC LIMIT 1",
            params![student, exercise.0],
            Self::row_to_submission,
        )
        .optional()
        .map_err(StoreError::Sqlite)
        .map_err(HintgenError::Store)
    }

    async fn clear_submissions(&self, exercise: ExerciseId) -> crate::error::Result<u64> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM submissions WHERE exercise_id = ?1",
                params![exercise.0],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(deleted as u64)
    }

    // ── Anomalies ──────────────────────────────────────────────────

    async fn record_anomaly(&self, anomaly: &Anomaly) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO anomalies (exercise_id, kind, detail, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                anomaly.exercise_id.map(|e| e.0),
                anomaly.kind.as_str(),
                anomaly.detail,
                anomaly.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn anomalies(&self, exercise: Option<ExerciseId>) -> crate::error::Result<Vec<Anomaly>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT exercise_id, kind, detail, created_at FROM anomalies
                 WHERE ?1 IS NULL OR exercise_id = ?1 ORDER BY id",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![exercise.map(|e| e.0)], |row| {
                let kind: String = row.get(1)?;
                let created: String = row.get(3)?;
                Ok(Anomaly {
                    exercise_id: row.get::<_, Option<i64>>(0)?.map(ExerciseId),
                    kind: AnomalyKind::parse(&kind).unwrap_or(AnomalyKind::ScoreMismatch),
                    detail: row.get(2)?,
                    created_at: Self::parse_time(&created),
                })
            })
            .map_err(StoreError::Sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)?;
        Ok(rows)
    }

    // ── Statistics ─────────────────────────────────────────────────

    async fn stats(&self, exercise: ExerciseId) -> crate::error::Result<CorpusStats> {
        let conn = self.lock();
        let tier_count = |tier: Tier| {
            Self::count(
                &conn,
                &format!(
                    "SELECT COUNT(*) FROM states WHERE exercise_id = ?1 AND tier = '{}'",
                    tier.as_str()
                ),
                exercise,
            )
        };
        Ok(CorpusStats {
            cleaned: tier_count(Tier::Cleaned)?,
            anon: tier_count(Tier::Anon)?,
            canonical: tier_count(Tier::Canonical)?,
            correct_cleaned: Self::count(
                &conn,
                "SELECT COUNT(*) FROM states WHERE exercise_id = ?1 AND tier = 'cleaned' AND score >= 1.0",
                exercise,
            )?,
            submissions: Self::count(
                &conn,
                "SELECT COUNT(*) FROM submissions WHERE exercise_id = ?1",
                exercise,
            )?,
            anomalies: Self::count(
                &conn,
                "SELECT COUNT(*) FROM anomalies WHERE exercise_id = ?1",
                exercise,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use hintgen_lang::parse;

    use super::*;

    fn exercise_config(name: &str) -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: name.to_string(),
            function: None,
            given_code: String::new(),
            solution_code: format!("def {name}(x):\n    return x\n"),
            arguments: [(name.to_string(), vec![crate::config::ArgType::Int])]
                .into_iter()
                .collect(),
            tests: vec![crate::config::TestCase {
                input: "1".to_string(),
                output: "1".to_string(),
                extra: None,
            }],
        }
    }

    fn state(exercise: ExerciseId, tier: Tier, code: &str) -> StateRecord {
        StateRecord::new(exercise, tier, code.to_string(), parse(code).unwrap())
    }

    #[tokio::test]
    async fn upsert_and_get_exercise() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.upsert_exercise(&exercise_config("double")).await.unwrap();
        let again = store.upsert_exercise(&exercise_config("double")).await.unwrap();
        assert_eq!(id, again);

        let fetched = store.get_exercise("double").await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.config, exercise_config("double"));
        assert!(store.get_exercise("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_state_increments_count() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();

        let first = store.upsert_state(&state(ex, Tier::Cleaned, "x = 1\n")).await.unwrap();
        let second = store.upsert_state(&state(ex, Tier::Cleaned, "x = 1\n")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.count, 2);

        // Same code, different tier: a distinct record.
        let anon = store.upsert_state(&state(ex, Tier::Anon, "x = 1\n")).await.unwrap();
        assert_ne!(anon.id, first.id);
        assert_eq!(store.find_states(ex, Tier::Cleaned, "x = 1\n").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_state_persists_links_and_tree() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();
        let goal = store.upsert_state(&state(ex, Tier::Anon, "x = 2\n")).await.unwrap();
        let mut s = store.upsert_state(&state(ex, Tier::Anon, "x = 1\n")).await.unwrap();

        s.goal = Some(goal.id);
        s.next = Some(goal.id);
        s.score = 0.5;
        s.fingerprint = Some(CorpusFingerprint { goals: 1, max_goal_count: 1 });
        store.update_state(&s).await.unwrap();

        let fetched = store.get_state(s.id).await.unwrap().unwrap();
        assert_eq!(fetched.goal, Some(goal.id));
        assert_eq!(fetched.fingerprint, s.fingerprint);
        assert!((fetched.score - 0.5).abs() < f64::EPSILON);
        let tree = fetched.tree.unwrap();
        assert_eq!(hintgen_lang::print_tree(&tree), "x = 1\n");
    }

    #[tokio::test]
    async fn goal_states_filter_on_score() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();
        let mut correct = state(ex, Tier::Anon, "x = 2\n");
        correct.score = 1.0;
        store.upsert_state(&correct).await.unwrap();
        store.upsert_state(&state(ex, Tier::Anon, "x = 1\n")).await.unwrap();

        let goals = store.goal_states(ex, Tier::Anon).await.unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].code, "x = 2\n");
        assert_eq!(store.states_for(ex, Tier::Anon).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_states_keeps_listed_and_clears_dangling_links() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();
        let keep = store.upsert_state(&state(ex, Tier::Cleaned, "x = 2\n")).await.unwrap();
        let gone = store.upsert_state(&state(ex, Tier::Cleaned, "x = 1\n")).await.unwrap();
        let mut keep_linked = keep.clone();
        keep_linked.next = Some(gone.id);
        store.update_state(&keep_linked).await.unwrap();

        let deleted = store.delete_states(ex, &[keep.id]).await.unwrap();
        assert_eq!(deleted, 1);
        let fetched = store.get_state(keep.id).await.unwrap().unwrap();
        assert_eq!(fetched.next, None);
        assert!(store.get_state(gone.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submissions_track_last_hint() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();
        for (code, level) in [("a", HintLevel::NextStep), ("b", HintLevel::Structure)] {
            store
                .record_submission(&Submission {
                    id: SubmissionId(0),
                    student: "s1".to_string(),
                    exercise_id: ex,
                    code: code.to_string(),
                    score: 0.0,
                    feedback: String::new(),
                    hint: Some(Hint::new(level, "msg", 2, 4)),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let last = store.last_submission("s1", ex).await.unwrap().unwrap();
        assert_eq!(last.code, "b");
        assert_eq!(last.hint.unwrap().level, HintLevel::Structure);
        assert!(store.last_submission("s2", ex).await.unwrap().is_none());

        assert_eq!(store.stats(ex).await.unwrap().submissions, 2);
        assert_eq!(store.clear_submissions(ex).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn anomalies_are_persisted() {
        let store = SqliteStore::in_memory().unwrap();
        let ex = store.upsert_exercise(&exercise_config("f")).await.unwrap();
        store
            .record_anomaly(&Anomaly::new(Some(ex), AnomalyKind::ScoreMismatch, "anon 1 vs cleaned 0"))
            .await
            .unwrap();
        let all = store.anomalies(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, AnomalyKind::ScoreMismatch);
        assert_eq!(store.anomalies(Some(ExerciseId(999))).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hintgen.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_exercise(&exercise_config("f")).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.list_exercises().await.unwrap().len(), 1);
    }
}
