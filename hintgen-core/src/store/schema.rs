/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for the hintgen `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS hintgen_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Exercise definitions (config is the serialized exercise TOML schema)
CREATE TABLE IF NOT EXISTS exercises (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    config TEXT NOT NULL,
    solution_state INTEGER,
    updated_at TEXT NOT NULL
);

-- Deduplicated program states, one row per (exercise, tier, printed code).
-- goal/next/derived are plain handles into this table, not foreign keys.
CREATE TABLE IF NOT EXISTS states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exercise_id INTEGER NOT NULL REFERENCES exercises(id) ON DELETE CASCADE,
    tier TEXT NOT NULL,
    code TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 0,
    feedback TEXT NOT NULL DEFAULT '',
    count INTEGER NOT NULL DEFAULT 0,
    weight INTEGER NOT NULL DEFAULT 0,
    tree TEXT,
    orig_tree TEXT,
    goal_id INTEGER,
    next_id INTEGER,
    derived_id INTEGER,
    fp_goals INTEGER,
    fp_max_count INTEGER,
    UNIQUE(exercise_id, tier, code)
);
CREATE INDEX IF NOT EXISTS idx_states_exercise_tier ON states(exercise_id, tier);
CREATE INDEX IF NOT EXISTS idx_states_score ON states(exercise_id, tier, score);

-- Submission history; also the persisted escalation state machine
CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student TEXT NOT NULL,
    exercise_id INTEGER NOT NULL REFERENCES exercises(id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    score REAL NOT NULL,
    feedback TEXT NOT NULL DEFAULT '',
    hint_level TEXT,
    hint_message TEXT,
    hint_line INTEGER,
    hint_col INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student, exercise_id, id);

-- Consistency anomalies
CREATE TABLE IF NOT EXISTS anomalies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exercise_id INTEGER,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_anomalies_exercise ON anomalies(exercise_id);
";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        // Idempotent
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in ["anomalies", "exercises", "hintgen_meta", "states", "submissions"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }
}
