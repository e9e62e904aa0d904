//! Goal graph: for a normalized state, the nearest correct goal and the next
//! state one edit closer to it.
//!
//! Pointers are computed lazily and memoized on the state together with a
//! [`CorpusFingerprint`]; a changed goal set invalidates them. Paths are
//! found with A* over the states lying between a state and its goal, with
//! squared step cost so that several small steps beat one large one.
//! Between-ness and step costs use raw edit weights, which add up along a
//! path; goal choice uses the normalized distance. When no
//! stored state lies in between, an intermediate state is synthesized by
//! applying a prefix of the edit toward the goal.

use std::collections::{HashMap, HashSet};

use hintgen_lang::{Node, parse, print_tree};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info};

use crate::config::EngineSection;
use crate::diff::{ChangeVector, apply_changes, diff, distance_with_weights, edit_weight, subtree_weight};
use crate::error::{EngineError, Result};
use crate::runner::TestRunner;
use crate::store::HintStore;
use crate::types::{CorpusFingerprint, Exercise, StateId, StateRecord};

const EPSILON: f64 = 1e-9;

/// Candidates considered when searching for a path, nearest first.
const MAX_CANDIDATES: usize = 48;

/// Distance between two stored states. Cached weights are used unless
/// `force_reweight` is set or a cached weight is missing.
pub fn state_distance(
    a: &StateRecord,
    b: &StateRecord,
    force_reweight: bool,
) -> Result<(f64, Vec<ChangeVector>)> {
    let ta = a.load_tree().ok_or(EngineError::MissingTree(a.id))?;
    let tb = b.load_tree().ok_or(EngineError::MissingTree(b.id))?;
    let weight = |state: &StateRecord, tree: &Node| {
        if force_reweight || state.weight == 0 {
            subtree_weight(tree)
        } else {
            state.weight
        }
    };
    Ok(distance_with_weights(&ta, &tb, weight(a, &ta), weight(b, &tb)))
}

/// The goal picked for a state.
#[derive(Debug, Clone)]
pub struct GoalChoice {
    pub goal: StateRecord,
    pub distance: f64,
}

/// Nearest goal to `state`; ties go to the most frequently seen goal. A
/// `preferred` goal is kept unless another one is strictly closer. Goals of
/// another exercise or tier are ignored.
pub fn choose_goal(
    state: &StateRecord,
    goals: &[StateRecord],
    preferred: Option<StateId>,
) -> Result<Option<GoalChoice>> {
    let mut best: Option<GoalChoice> = None;
    let mut kept: Option<GoalChoice> = None;
    for goal in goals {
        if goal.exercise_id != state.exercise_id || goal.tier != state.tier {
            continue;
        }
        let (d, _) = state_distance(state, goal, false)?;
        let choice = GoalChoice {
            goal: goal.clone(),
            distance: d,
        };
        if Some(goal.id) == preferred {
            kept = Some(choice.clone());
        }
        let better = match &best {
            None => true,
            Some(b) => {
                d < b.distance - EPSILON
                    || ((d - b.distance).abs() <= EPSILON && goal.count > b.goal.count)
            }
        };
        if better {
            best = Some(choice);
        }
    }
    Ok(match (kept, best) {
        (Some(kept), Some(best)) if best.distance < kept.distance - EPSILON => Some(best),
        (Some(kept), _) => Some(kept),
        (None, best) => best,
    })
}

/// Fingerprint of a goal set.
pub fn fingerprint(goals: &[StateRecord]) -> CorpusFingerprint {
    CorpusFingerprint {
        goals: i64::try_from(goals.len()).unwrap_or(i64::MAX),
        max_goal_count: goals.iter().map(|g| g.count).max().unwrap_or(0),
    }
}

/// Computes and persists `goal`/`next` pointers for one exercise and tier.
pub struct GoalGraph<'a> {
    store: &'a dyn HintStore,
    runner: &'a dyn TestRunner,
    exercise: &'a Exercise,
    settings: &'a EngineSection,
    trees: HashMap<StateId, Node>,
    costs: HashMap<(StateId, StateId), u32>,
}

impl std::fmt::Debug for GoalGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalGraph")
            .field("exercise", &self.exercise.config.name)
            .field("cached_trees", &self.trees.len())
            .finish_non_exhaustive()
    }
}

impl<'a> GoalGraph<'a> {
    pub fn new(
        store: &'a dyn HintStore,
        runner: &'a dyn TestRunner,
        exercise: &'a Exercise,
        settings: &'a EngineSection,
    ) -> Self {
        Self {
            store,
            runner,
            exercise,
            settings,
            trees: HashMap::new(),
            costs: HashMap::new(),
        }
    }

    fn tree(&mut self, state: &StateRecord) -> Result<Node> {
        if let Some(tree) = self.trees.get(&state.id) {
            return Ok(tree.clone());
        }
        let tree = state.load_tree().ok_or(EngineError::MissingTree(state.id))?;
        self.trees.insert(state.id, tree.clone());
        Ok(tree)
    }

    /// Raw edit weight from `a` to `b`.
    fn cost(&mut self, a: &StateRecord, b: &StateRecord) -> Result<u32> {
        if a.id == b.id {
            return Ok(0);
        }
        if let Some(&c) = self.costs.get(&(a.id, b.id)) {
            return Ok(c);
        }
        let (ta, tb) = (self.tree(a)?, self.tree(b)?);
        let c = edit_weight(&diff(&ta, &tb));
        self.costs.insert((a.id, b.id), c);
        Ok(c)
    }

    fn between(&mut self, x: &StateRecord, from: &StateRecord, goal: &StateRecord) -> Result<bool> {
        let total = f64::from(self.cost(from, goal)?);
        let first = f64::from(self.cost(from, x)?);
        let rest = f64::from(self.cost(x, goal)?);
        Ok(first > 0.0
            && rest > 0.0
            && rest < total
            && first + rest <= total * (1.0 + self.settings.between_slack) + EPSILON)
    }

    /// Attach (or refresh) the goal and next pointers of `state` and return
    /// its next state. `None` when the state is correct or no goal exists.
    pub async fn get_next_state(&mut self, state: &mut StateRecord) -> Result<Option<StateRecord>> {
        let mut visited = HashSet::new();
        let next = self.next_for(state, &mut visited).await?;

        // Continue along synthesized states so the chain is stored ahead.
        let mut cursor = next.clone();
        let mut budget = self.settings.synthesized_step_limit;
        while let Some(mut current) = cursor {
            if budget == 0 || current.count > 0 || current.is_correct() {
                break;
            }
            budget -= 1;
            cursor = self.next_for(&mut current, &mut visited).await?;
        }
        Ok(next)
    }

    async fn next_for(
        &mut self,
        state: &mut StateRecord,
        visited: &mut HashSet<StateId>,
    ) -> Result<Option<StateRecord>> {
        visited.insert(state.id);
        if state.is_correct() {
            return Ok(None);
        }
        let goals = self.store.goal_states(self.exercise.id, state.tier).await?;
        if goals.is_empty() {
            if state.goal.is_some() || state.next.is_some() {
                state.goal = None;
                state.next = None;
                state.fingerprint = None;
                self.store.update_state(state).await?;
            }
            return Ok(None);
        }

        let current = fingerprint(&goals);
        if state.fingerprint == Some(current) {
            if let Some(next_id) = state.next {
                if let Some(next) = self.store.get_state(next_id).await? {
                    debug!(state = %state.id, next = %next.id, "next pointer is fresh");
                    return Ok(Some(next));
                }
            }
        }

        let Some(choice) = choose_goal(state, &goals, state.goal)? else {
            return Ok(None);
        };
        let goal = choice.goal;
        let next = match self.path_step(state, &goal, visited).await? {
            Some(hop) if hop.id != goal.id => hop,
            _ => self
                .synthesize(state, &goal, visited)
                .await?
                .unwrap_or_else(|| goal.clone()),
        };

        debug!(
            state = %state.id,
            goal = %goal.id,
            next = %next.id,
            distance = choice.distance,
            "next state computed"
        );
        state.goal = Some(goal.id);
        state.next = Some(next.id);
        state.fingerprint = Some(current);
        self.store.update_state(state).await?;
        Ok(Some(next))
    }

    /// First hop of the cheapest path from `state` to `goal` through stored
    /// states that lie between them.
    async fn path_step(
        &mut self,
        state: &StateRecord,
        goal: &StateRecord,
        visited: &HashSet<StateId>,
    ) -> Result<Option<StateRecord>> {
        let all = self.store.states_for(self.exercise.id, state.tier).await?;
        let mut candidates = Vec::new();
        for x in all {
            if x.id == state.id || x.id == goal.id || visited.contains(&x.id) {
                continue;
            }
            if self.between(&x, state, goal)? {
                let c = self.cost(state, &x)?;
                candidates.push((c, x));
            }
        }
        if candidates.is_empty() {
            return Ok(Some(goal.clone()));
        }
        candidates.sort_by_key(|(c, x)| (*c, x.id));
        candidates.truncate(MAX_CANDIDATES);

        let mut nodes: Vec<StateRecord> = Vec::with_capacity(candidates.len() + 2);
        nodes.push(state.clone());
        nodes.extend(candidates.into_iter().map(|(_, x)| x));
        nodes.push(goal.clone());

        let mut graph: DiGraph<usize, f64> = DiGraph::new();
        let indices: Vec<NodeIndex> = (0..nodes.len()).map(|i| graph.add_node(i)).collect();
        let goal_index = indices[nodes.len() - 1];
        for u in 0..nodes.len() - 1 {
            for v in 1..nodes.len() {
                if u == v {
                    continue;
                }
                let reachable = v == nodes.len() - 1 || {
                    let (from, to) = (nodes[u].clone(), nodes[v].clone());
                    self.between(&to, &from, goal)?
                };
                if reachable {
                    let (from, to) = (nodes[u].clone(), nodes[v].clone());
                    let step = f64::from(self.cost(&from, &to)?);
                    graph.add_edge(indices[u], indices[v], step * step);
                }
            }
        }

        let path = astar(&graph, indices[0], |n| n == goal_index, |e| *e.weight(), |_| 0.0);
        Ok(path.and_then(|(_, path)| path.get(1).map(|&hop| nodes[graph[hop]].clone())))
    }

    /// Store an intermediate state made by applying the shortest valid
    /// prefix of the edit from `state` toward `goal`.
    async fn synthesize(
        &mut self,
        state: &StateRecord,
        goal: &StateRecord,
        visited: &HashSet<StateId>,
    ) -> Result<Option<StateRecord>> {
        let from = self.tree(state)?;
        let to = self.tree(goal)?;
        let changes = diff(&from, &to);
        let total = edit_weight(&changes);
        if changes.len() < 2 {
            return Ok(None);
        }

        for prefix in 1..changes.len() {
            let Ok(candidate) = apply_changes(&from, &changes[..prefix]) else {
                continue;
            };
            let code = print_tree(&candidate);
            if code == state.code || code == goal.code {
                continue;
            }
            let Ok(reparsed) = parse(&code) else {
                continue;
            };
            if print_tree(&reparsed) != code {
                continue;
            }
            if edit_weight(&diff(&reparsed, &to)) >= total {
                continue;
            }

            let outcome = self.runner.run(&code, &self.exercise.config);
            let mut record = StateRecord::new(self.exercise.id, state.tier, code, reparsed);
            record.count = 0;
            record.score = outcome.score;
            record.feedback = outcome.feedback;
            let stored = self.store.upsert_state(&record).await?;
            if visited.contains(&stored.id) {
                continue;
            }
            info!(
                state = %state.id,
                synthesized = %stored.id,
                changes = prefix,
                "synthesized intermediate state"
            );
            return Ok(Some(stored));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArgType, ExerciseConfig, TestCase};
    use crate::runner::InterpreterRunner;
    use crate::store::SqliteStore;
    use crate::types::Tier;

    fn config() -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: "canDrinkAlcohol".to_string(),
            function: None,
            given_code: String::new(),
            solution_code: String::new(),
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
        let config = config();
        let id = store.upsert_exercise(&config).await.unwrap();
        (store, Exercise { id, config, solution_state: None })
    }

    async fn add(store: &SqliteStore, exercise: &Exercise, code: &str, count: i64) -> StateRecord {
        let outcome = InterpreterRunner::default().run(code, &exercise.config);
        let mut record = StateRecord::new(exercise.id, Tier::Anon, code.to_string(), parse(code).unwrap());
        record.score = outcome.score;
        record.count = count;
        store.upsert_state(&record).await.unwrap()
    }

    const GOAL: &str = "def canDrinkAlcohol(v0, v1):\n    return v0 >= 21 and not v1\n";

    #[tokio::test]
    async fn choose_goal_prefers_nearest_then_most_common() {
        let (store, exercise) = setup().await;
        let near = add(&store, &exercise, GOAL, 1).await;
        let far = add(
            &store,
            &exercise,
            "def canDrinkAlcohol(v0, v1):\n    if v1:\n        return False\n    return v0 >= 21\n",
            5,
        )
        .await;
        let state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 21 and not v1\n", 1).await;

        let goals = vec![near.clone(), far.clone()];
        let choice = choose_goal(&state, &goals, None).unwrap().unwrap();
        assert_eq!(choice.goal.id, near.id);
        // A preferred goal that is not strictly worse is kept.
        let kept = choose_goal(&state, &[far.clone()], Some(far.id)).unwrap().unwrap();
        assert_eq!(kept.goal.id, far.id);
        let switched = choose_goal(&state, &goals, Some(far.id)).unwrap().unwrap();
        assert_eq!(switched.goal.id, near.id);
    }

    #[tokio::test]
    async fn choose_goal_breaks_ties_by_count() {
        let (store, exercise) = setup().await;
        let a = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 >= 21 and not v1\n", 1).await;
        let b = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return not v1 and v0 >= 21\n", 3).await;
        let state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0\n", 1).await;
        let (da, _) = state_distance(&state, &a, false).unwrap();
        let (db, _) = state_distance(&state, &b, false).unwrap();
        assert!((da - db).abs() < EPSILON);
        let choice = choose_goal(&state, &[a, b.clone()], None).unwrap().unwrap();
        assert_eq!(choice.goal.id, b.id);
    }

    #[tokio::test]
    async fn next_is_goal_for_single_edit() {
        let (store, exercise) = setup().await;
        let goal = add(&store, &exercise, GOAL, 1).await;
        let mut state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 21 and not v1\n", 1).await;
        let settings = EngineSection::default();
        let runner = InterpreterRunner::default();
        let mut graph = GoalGraph::new(&store, &runner, &exercise, &settings);

        let next = graph.get_next_state(&mut state).await.unwrap().unwrap();
        assert_eq!(next.id, goal.id);
        let stored = store.get_state(state.id).await.unwrap().unwrap();
        assert_eq!(stored.goal, Some(goal.id));
        assert_eq!(stored.next, Some(goal.id));
        assert_eq!(stored.fingerprint, Some(CorpusFingerprint { goals: 1, max_goal_count: 1 }));
    }

    #[tokio::test]
    async fn path_goes_through_stored_intermediate() {
        let (store, exercise) = setup().await;
        let goal = add(&store, &exercise, GOAL, 1).await;
        let middle = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 >= 21 and v1\n", 2).await;
        let mut state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 21 and v1\n", 1).await;
        let settings = EngineSection::default();
        let runner = InterpreterRunner::default();
        let mut graph = GoalGraph::new(&store, &runner, &exercise, &settings);

        let next = graph.get_next_state(&mut state).await.unwrap().unwrap();
        assert_eq!(next.id, middle.id);
        assert_eq!(state.goal, Some(goal.id));
    }

    #[tokio::test]
    async fn synthesizes_intermediate_states() {
        let (store, exercise) = setup().await;
        add(&store, &exercise, GOAL, 1).await;
        let mut state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 20 and not v1\n", 1).await;
        state.orig_tree = Some(parse("def canDrinkAlcohol(age, d):\n    return age > 20 and not d\n").unwrap());
        store.update_state(&state).await.unwrap();
        let settings = EngineSection::default();
        let runner = InterpreterRunner::default();
        let mut graph = GoalGraph::new(&store, &runner, &exercise, &settings);

        let next = graph.get_next_state(&mut state).await.unwrap().unwrap();
        assert_eq!(next.count, 0);
        assert_ne!(next.code, state.code);
        assert_ne!(next.code, GOAL);
        // No submission stands behind a synthesized state.
        let stored = store.get_state(next.id).await.unwrap().unwrap();
        assert!(stored.orig_tree.is_none());

        // The chain from the synthesized state reaches the goal without cycles.
        let mut seen = HashSet::from([state.id]);
        let mut cursor = Some(next);
        while let Some(current) = cursor {
            assert!(seen.insert(current.id), "cycle at {}", current.id);
            if current.is_correct() {
                break;
            }
            let stored = store.get_state(current.id).await.unwrap().unwrap();
            cursor = match stored.next {
                Some(id) => store.get_state(id).await.unwrap(),
                None => None,
            };
        }
    }

    #[tokio::test]
    async fn fresh_fingerprint_skips_recomputation() {
        let (store, exercise) = setup().await;
        let goal = add(&store, &exercise, GOAL, 1).await;
        let mut state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 21 and not v1\n", 1).await;
        let settings = EngineSection::default();
        let runner = InterpreterRunner::default();
        GoalGraph::new(&store, &runner, &exercise, &settings)
            .get_next_state(&mut state)
            .await
            .unwrap();

        // A second goal changes the fingerprint and the goal is re-evaluated.
        let other = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 >= 21 and v1 == False\n", 4).await;
        let mut state = store.get_state(state.id).await.unwrap().unwrap();
        let next = GoalGraph::new(&store, &runner, &exercise, &settings)
            .get_next_state(&mut state)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.fingerprint, Some(CorpusFingerprint { goals: 2, max_goal_count: 4 }));
        assert_eq!(next.id, goal.id);
        assert_ne!(next.id, other.id);
    }

    #[tokio::test]
    async fn no_goals_means_no_next() {
        let (store, exercise) = setup().await;
        let mut state = add(&store, &exercise, "def canDrinkAlcohol(v0, v1):\n    return v0 > 21\n", 1).await;
        let settings = EngineSection::default();
        let runner = InterpreterRunner::default();
        let next = GoalGraph::new(&store, &runner, &exercise, &settings)
            .get_next_state(&mut state)
            .await
            .unwrap();
        assert!(next.is_none());
        assert_eq!(state.goal, None);
    }
}
