//! Test execution. The engine only sees the [`TestRunner`] trait; the default
//! [`InterpreterRunner`] runs submissions in the `hintgen-lang` interpreter.

use hintgen_lang::{Interpreter, LangError, Node, Value};
use serde::Serialize;
use tracing::debug;

use crate::config::{ExerciseConfig, TestCase, TestExtra};
use crate::types::is_full_score;

/// Result of running a submission against an exercise's tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    /// Fraction of tests passed, in `[0, 1]`.
    pub score: f64,
    pub feedback: String,
}

impl TestOutcome {
    pub fn is_correct(&self) -> bool {
        is_full_score(self.score)
    }

    fn failed(feedback: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            feedback: feedback.into(),
        }
    }
}

/// Runs a submission against an exercise's test cases. Must be deterministic.
pub trait TestRunner: Send + Sync {
    fn run(&self, code: &str, exercise: &ExerciseConfig) -> TestOutcome;
}

/// Runs tests in the tree-walking interpreter, one fresh interpreter per test.
#[derive(Debug, Clone)]
pub struct InterpreterRunner {
    fuel: u64,
}

impl InterpreterRunner {
    pub fn new(fuel: u64) -> Self {
        Self { fuel }
    }

    fn run_case(
        &self,
        program: &Node,
        given: Option<&Node>,
        exercise: &ExerciseConfig,
        case: &TestCase,
    ) -> Result<(), String> {
        let mut interp = Interpreter::new(self.fuel);
        if let Some(given) = given {
            interp.load(given).map_err(|e| format!("given code failed: {e}"))?;
        }
        interp.load(program).map_err(|e| describe_error(&e))?;

        let args = literal_arguments(&mut interp, &case.input)?;
        let expected = literal(&mut interp, &case.output)?;
        let snapshot: Vec<Value> = args.iter().map(Value::deep_copy).collect();

        let actual = interp
            .call(exercise.function_name(), args.clone())
            .map_err(|e| describe_error(&e))?;
        if !actual.py_eq(&expected) {
            return Err(format!("expected {}, got {}", expected.repr(), actual.repr()));
        }
        if case.extra == Some(TestExtra::CheckCopy)
            && args.iter().zip(&snapshot).any(|(after, before)| !after.py_eq(before))
        {
            return Err("the function modified its input".to_string());
        }
        Ok(())
    }
}

impl Default for InterpreterRunner {
    fn default() -> Self {
        Self::new(crate::config::EngineSection::default().interpreter_fuel)
    }
}

impl TestRunner for InterpreterRunner {
    fn run(&self, code: &str, exercise: &ExerciseConfig) -> TestOutcome {
        let program = match hintgen_lang::parse(code) {
            Ok(tree) => tree,
            Err(e) => return TestOutcome::failed(describe_error(&e)),
        };
        let given = if exercise.given_code.trim().is_empty() {
            None
        } else {
            match hintgen_lang::parse(&exercise.given_code) {
                Ok(tree) => Some(tree),
                Err(e) => return TestOutcome::failed(format!("given code does not parse: {e}")),
            }
        };
        if exercise.tests.is_empty() {
            return TestOutcome::failed("exercise has no tests");
        }

        let mut passed = 0usize;
        let mut failures = Vec::new();
        for case in &exercise.tests {
            match self.run_case(&program, given.as_ref(), exercise, case) {
                Ok(()) => passed += 1,
                Err(reason) => failures.push(format!(
                    "{}{}: {reason}",
                    exercise.function_name(),
                    call_suffix(&case.input)
                )),
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let score = passed as f64 / exercise.tests.len() as f64;
        debug!(passed, total = exercise.tests.len(), "tests run");
        let feedback = if failures.is_empty() {
            "All tests passed.".to_string()
        } else {
            format!(
                "{passed} of {} tests passed.\n{}",
                exercise.tests.len(),
                failures.join("\n")
            )
        };
        TestOutcome { score, feedback }
    }
}

fn literal(interp: &mut Interpreter, text: &str) -> Result<Value, String> {
    let expr = hintgen_lang::parse_expression(text)
        .map_err(|e| format!("malformed test value `{text}`: {e}"))?;
    interp
        .evaluate(&expr)
        .map_err(|e| format!("malformed test value `{text}`: {e}"))
}

/// A tuple literal spreads into positional arguments.
fn literal_arguments(interp: &mut Interpreter, text: &str) -> Result<Vec<Value>, String> {
    let expr = hintgen_lang::parse_expression(text)
        .map_err(|e| format!("malformed test input `{text}`: {e}"))?;
    if expr.kind == hintgen_lang::Kind::Tuple {
        expr.children
            .iter()
            .map(|arg| interp.evaluate(arg).map_err(|e| describe_error(&e)))
            .collect()
    } else {
        Ok(vec![interp.evaluate(&expr).map_err(|e| describe_error(&e))?])
    }
}

fn call_suffix(input: &str) -> String {
    let input = input.trim();
    if input.starts_with('(') {
        input.to_string()
    } else {
        format!("({input})")
    }
}

fn describe_error(err: &LangError) -> String {
    match err {
        LangError::OutOfFuel(_) => "the program took too long (infinite loop?)".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArgumentTypes;

    fn exercise(tests: &[(&str, &str)]) -> ExerciseConfig {
        ExerciseConfig {
            version: 1,
            name: "canDrinkAlcohol".to_string(),
            function: None,
            given_code: String::new(),
            solution_code: String::new(),
            arguments: ArgumentTypes::new(),
            tests: tests
                .iter()
                .map(|(input, output)| TestCase {
                    input: (*input).to_string(),
                    output: (*output).to_string(),
                    extra: None,
                })
                .collect(),
        }
    }

    fn drinking() -> ExerciseConfig {
        exercise(&[("(22, True)", "False"), ("(20, False)", "False"), ("(21, False)", "True")])
    }

    #[test]
    fn correct_solution_scores_one() {
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n";
        let outcome = InterpreterRunner::default().run(code, &drinking());
        assert!((outcome.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.feedback, "All tests passed.");
    }

    #[test]
    fn off_by_one_fails_a_test() {
        let code = "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n";
        let outcome = InterpreterRunner::default().run(code, &drinking());
        assert!((outcome.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(outcome.feedback.contains("canDrinkAlcohol(21, False): expected True, got False"));
    }

    #[test]
    fn syntax_error_scores_zero() {
        let outcome = InterpreterRunner::default().run("def f(:\n", &drinking());
        assert!(outcome.score.abs() < f64::EPSILON);
    }

    #[test]
    fn infinite_loop_runs_out_of_fuel() {
        let code = "def canDrinkAlcohol(age, isDriving):\n    while True:\n        pass\n";
        let outcome = InterpreterRunner::new(1_000).run(code, &drinking());
        assert!(outcome.score.abs() < f64::EPSILON);
        assert!(outcome.feedback.contains("took too long"));
    }

    #[test]
    fn single_argument_is_not_spread() {
        let mut ex = exercise(&[("[1, 2, 3]", "6"), ("5", "5")]);
        ex.name = "total".to_string();
        let code = "def total(x):\n    if isinstance(x, list):\n        return sum(x)\n    return x\n";
        let outcome = InterpreterRunner::default().run(code, &ex);
        assert!((outcome.score - 1.0).abs() < f64::EPSILON, "{}", outcome.feedback);
    }

    #[test]
    fn check_copy_catches_mutation() {
        let mut ex = exercise(&[("[3, 1, 2]", "[1, 2, 3]")]);
        ex.name = "ordered".to_string();
        ex.tests[0].extra = Some(TestExtra::CheckCopy);
        let mutating = "def ordered(xs):\n    xs.sort()\n    return xs\n";
        let pure = "def ordered(xs):\n    return sorted(xs)\n";
        let runner = InterpreterRunner::default();
        assert!(runner.run(mutating, &ex).score.abs() < f64::EPSILON);
        assert!((runner.run(pure, &ex).score - 1.0).abs() < f64::EPSILON);
    }
}
