//! Sprint 5: Variable Trace End-to-End Tests
//!
//! Full tracer path against a scripted target: breakpoints derived from the
//! source model's executable lines, one test execution, and an ordered value
//! history including repeated loop visits and the uninitialized sentinel.

mod utils;

use culpa::config::Config;
use culpa::debug_client::DebugSession;
use culpa::element::CodeElementName;
use culpa::source_model::TextSourceModel;
use culpa::suspicious::SuspiciousVariable;
use culpa::variable_tracer::{TracedValue, VariableTracer, UNINITIALIZED};
use std::time::Duration;
use utils::{visit, ScriptedTarget, TestScript};

/// geo.counter#run, declared at line 8: x declared at 9, zeroed at 10,
/// incremented at 11 inside a loop, read at 13.
fn counter_model() -> TextSourceModel {
    let mut model = TextSourceModel::new();
    model.add_method(
        "geo.counter",
        "run",
        &[],
        8,
        "    let x = null;\n    x = 0;\n    x += 1;\n\n    check(x);\n",
    );
    model
}

fn entry(line: u32, value: &str) -> TracedValue {
    TracedValue {
        line,
        variable: "x".to_string(),
        value: value.to_string(),
    }
}

fn trace_against(
    target: &ScriptedTarget,
    model: &TextSourceModel,
    suspicious: &SuspiciousVariable,
) -> Vec<TracedValue> {
    let config = Config::default();
    let mut session = DebugSession::attach(target.addr(), Duration::from_secs(2)).unwrap();
    let tracer = VariableTracer::new(&config, model);
    let collection = tracer.trace_in_session(&mut session, suspicious).unwrap();
    session.close();
    collection.entries().to_vec()
}

#[test]
fn test_loop_trace_preserves_execution_order() {
    let model = counter_model();
    let target = ScriptedTarget::spawn(vec![TestScript::passing(
        "geo.CounterTest#testRun",
        vec![
            visit("geo.counter", "run", 9, &[("x", "null")]),
            visit("geo.counter", "run", 10, &[("x", "0")]),
            visit("geo.counter", "run", 11, &[("x", "0")]),
            visit("geo.counter", "run", 11, &[("x", "1")]),
            visit("geo.counter", "run", 11, &[("x", "2")]),
            visit("geo.counter", "run", 13, &[("x", "3")]),
        ],
    )]);
    let suspicious = SuspiciousVariable::new(
        "geo.CounterTest#testRun",
        CodeElementName::method("geo.counter", "run"),
        13,
        "x",
    );

    let entries = trace_against(&target, &model, &suspicious);
    assert_eq!(
        entries,
        vec![
            entry(9, "null"),
            entry(10, "0"),
            entry(11, "0"),
            entry(11, "1"),
            entry(11, "2"),
            entry(13, "3"),
        ]
    );
    target.join();
}

#[test]
fn test_out_of_scope_hits_are_skipped() {
    let model = counter_model();
    // The variable is absent from the first frame and present afterwards
    let target = ScriptedTarget::spawn(vec![TestScript::passing(
        "geo.CounterTest#testRun",
        vec![
            visit("geo.counter", "run", 9, &[("other", "1")]),
            visit("geo.counter", "run", 10, &[("x", "0")]),
        ],
    )]);
    let suspicious = SuspiciousVariable::new(
        "geo.CounterTest#testRun",
        CodeElementName::method("geo.counter", "run"),
        13,
        "x",
    );

    let entries = trace_against(&target, &model, &suspicious);
    assert_eq!(entries, vec![entry(10, "0")]);
    target.join();
}

#[test]
fn test_uninitialized_sentinel_recorded_verbatim() {
    let model = counter_model();
    let target = ScriptedTarget::spawn(vec![TestScript::passing(
        "geo.CounterTest#testRun",
        vec![visit("geo.counter", "run", 9, &[("x", UNINITIALIZED)])],
    )]);
    let suspicious = SuspiciousVariable::new(
        "geo.CounterTest#testRun",
        CodeElementName::method("geo.counter", "run"),
        13,
        "x",
    );

    let entries = trace_against(&target, &model, &suspicious);
    assert_eq!(entries, vec![entry(9, UNINITIALIZED)]);
    target.join();
}

#[test]
fn test_unknown_method_yields_empty_trace() {
    let model = counter_model();
    let target = ScriptedTarget::spawn(Vec::new());
    let suspicious = SuspiciousVariable::new(
        "geo.CounterTest#testRun",
        CodeElementName::method("geo.counter", "missing"),
        13,
        "x",
    );

    let entries = trace_against(&target, &model, &suspicious);
    assert!(entries.is_empty());
    target.join();
}

#[test]
fn test_failed_test_still_produces_the_trace() {
    let model = counter_model();
    let target = ScriptedTarget::spawn(vec![TestScript::failing(
        "geo.CounterTest#testRun",
        vec![
            visit("geo.counter", "run", 10, &[("x", "0")]),
            visit("geo.counter", "run", 13, &[("x", "-1")]),
        ],
        None,
    )]);
    let suspicious = SuspiciousVariable::new(
        "geo.CounterTest#testRun",
        CodeElementName::method("geo.counter", "run"),
        13,
        "x",
    );

    let entries = trace_against(&target, &model, &suspicious);
    assert_eq!(entries, vec![entry(10, "0"), entry(13, "-1")]);
    target.join();
}
