//! Subscriber predicates.
//!
//! A predicate is a one-argument boolean expression supplied at registration,
//! e.g. `lambda pub: 'goal' in pub.get('msg', '').lower()`. Sources are
//! compiled into an expression tree once per cache refresh and evaluated per
//! publish. The grammar is closed: the only reachable value is the payload
//! itself, so there is no ambient state, I/O or environment to escape into.

mod eval;
mod lexer;
mod parser;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::PredicateError;
use parser::Expr;

/// Longest accepted predicate source, in bytes.
pub const MAX_SOURCE_LEN: usize = 2048;

/// Deepest accepted expression nesting.
pub const MAX_DEPTH: usize = 64;

/// A compiled predicate, ready to be evaluated against payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    expr: Expr,
}

impl Predicate {
    pub fn compile(source: &str) -> Result<Self, PredicateError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(PredicateError::TooLong(source.len()));
        }
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(&tokens, source.len())?;
        Ok(Self { expr })
    }

    /// Evaluate against a payload. Errors are the caller's to interpret.
    pub fn evaluate(&self, data: &Map<String, Value>) -> Result<bool, PredicateError> {
        eval::evaluate(&self.expr, data).map(|v| eval::truthy(&v))
    }
}

/// The per-subscriber slot held in a cache entry.
#[derive(Clone, PartialEq)]
pub enum CompiledPredicate {
    /// No predicate registered; every payload passes.
    Absent,
    Ready(Arc<Predicate>),
    /// The source did not compile; every payload is rejected.
    Invalid(PredicateError),
}

impl CompiledPredicate {
    /// Compile an optional source. Empty or whitespace-only sources mean no predicate.
    pub fn compile(source: Option<&str>) -> Self {
        match source.map(str::trim) {
            None | Some("") => CompiledPredicate::Absent,
            Some(src) => match Predicate::compile(src) {
                Ok(p) => CompiledPredicate::Ready(Arc::new(p)),
                Err(e) => CompiledPredicate::Invalid(e),
            },
        }
    }

    /// Whether the payload passes. Evaluation errors and invalid sources reject.
    pub fn admits(&self, data: &Map<String, Value>) -> Result<bool, PredicateError> {
        match self {
            CompiledPredicate::Absent => Ok(true),
            CompiledPredicate::Ready(p) => p.evaluate(data),
            CompiledPredicate::Invalid(e) => Err(e.clone()),
        }
    }
}

impl fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledPredicate::Absent => write!(f, "Absent"),
            CompiledPredicate::Ready(_) => write!(f, "Ready"),
            CompiledPredicate::Invalid(e) => write!(f, "Invalid({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn run(source: &str, data: Value) -> Result<bool, PredicateError> {
        Predicate::compile(source)?.evaluate(&payload(data))
    }

    #[test]
    fn test_registration_examples() {
        assert_eq!(
            run(
                "lambda pub: 'goal' in pub.get('msg','').lower()",
                json!({"msg": "What a GOAL!"})
            ),
            Ok(true)
        );
        assert_eq!(
            run(
                "lambda pub: 'goal' in pub.get('msg','').lower()",
                json!({"temp": 3})
            ),
            Ok(false)
        );
        assert_eq!(
            run("lambda pub: pub.get('temp',0) > 30", json!({"temp": 35})),
            Ok(true)
        );
        assert_eq!(run("lambda pub: pub.get('temp',0) > 30", json!({})), Ok(false));
    }

    #[test]
    fn test_without_lambda_header() {
        assert_eq!(run("data['level'] >= 2 and data['ok']", json!({"level": 2, "ok": true})), Ok(true));
        assert_eq!(run("len(data) == 0", json!({})), Ok(true));
    }

    #[test]
    fn test_arithmetic_and_builtins() {
        assert_eq!(run("lambda p: p['a'] * 2 + 1 == 7", json!({"a": 3})), Ok(true));
        assert_eq!(run("lambda p: p['a'] % 3 == 2", json!({"a": -1})), Ok(true));
        assert_eq!(run("lambda p: abs(p['a']) < 5", json!({"a": -4})), Ok(true));
        assert_eq!(run("lambda p: float(p['a']) > 1.5", json!({"a": "2.5"})), Ok(true));
        assert_eq!(run("lambda p: str(p['a']) == '12'", json!({"a": 12})), Ok(true));
        assert_eq!(run("lambda p: p['tags'][-1] == 'z'", json!({"tags": ["a", "z"]})), Ok(true));
        assert_eq!(run("lambda p: p['s'].strip().startswith('ab')", json!({"s": "  abc "})), Ok(true));
    }

    #[test]
    fn test_membership() {
        assert_eq!(run("lambda p: p['c'] in ['red', 'blue']", json!({"c": "blue"})), Ok(true));
        assert_eq!(run("lambda p: 'k' not in p", json!({"k": 1})), Ok(false));
        assert_eq!(run("lambda p: 3 in p['xs']", json!({"xs": [1, 3.0]})), Ok(true));
    }

    #[test]
    fn test_truthiness_of_result() {
        assert_eq!(run("lambda p: p.get('msg')", json!({"msg": ""})), Ok(false));
        assert_eq!(run("lambda p: p.get('msg')", json!({"msg": "x"})), Ok(true));
        assert_eq!(run("lambda p: p.get('n') or 0", json!({"n": 0})), Ok(false));
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(
            run("lambda p: p['missing'] > 1", json!({})),
            Err(PredicateError::KeyNotFound("missing".into()))
        );
        assert!(matches!(
            run("lambda p: p['a'] > 1", json!({"a": "text"})),
            Err(PredicateError::Type(_))
        ));
        assert_eq!(
            run("lambda p: 1 / p['a'] > 0", json!({"a": 0})),
            Err(PredicateError::DivisionByZero)
        );
        assert!(run("lambda p: p['a'].lower()", json!({"a": 1})).is_err());
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(run("lambda p: 'a' in p and p['a'] > 1", json!({})), Ok(false));
    }

    #[test]
    fn test_source_length_limit() {
        let source = format!("data or {}", "1 or ".repeat(MAX_SOURCE_LEN / 5) + "1");
        assert!(matches!(
            Predicate::compile(&source),
            Err(PredicateError::TooLong(_))
        ));
    }

    #[test]
    fn test_compiled_slots() {
        let data = payload(json!({"temp": 10}));

        assert_eq!(CompiledPredicate::compile(None).admits(&data), Ok(true));
        assert_eq!(CompiledPredicate::compile(Some("  ")).admits(&data), Ok(true));

        let ready = CompiledPredicate::compile(Some("lambda p: p['temp'] < 20"));
        assert!(matches!(ready, CompiledPredicate::Ready(_)));
        assert_eq!(ready.admits(&data), Ok(true));

        let broken = CompiledPredicate::compile(Some("lambda p: p['temp'] <"));
        assert!(matches!(broken, CompiledPredicate::Invalid(_)));
        assert!(broken.admits(&data).is_err());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let source = "lambda p: p.get('x', 0) > 1 and 'y' in p";
        assert_eq!(Predicate::compile(source), Predicate::compile(source));
        assert_eq!(
            CompiledPredicate::compile(Some("lambda p: ]")),
            CompiledPredicate::compile(Some("lambda p: ]"))
        );

        let p = Predicate::compile(source).unwrap();
        let data = payload(json!({"x": 2, "y": 0}));
        assert_eq!(p.evaluate(&data), p.evaluate(&data));
    }
}
