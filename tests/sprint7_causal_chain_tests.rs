//! Sprint 7: Causal Chain Integration Tests
//!
//! Backward search over multi-method sources parsed from plain text:
//! assignment chains, argument hops into the caller, return hops into the
//! callee, and the opaque boundary at the edge of the analyzed source set.

use culpa::backtracker::{CausalBacktracker, Terminal};
use culpa::element::CodeElementName;
use culpa::source_model::TextSourceModel;
use culpa::suspicious::{SuspiciousVariable, SuspiciousVariableFinder};

fn pricing_model() -> TextSourceModel {
    let mut model = TextSourceModel::new();
    model.add_class_text(
        "geo.pricing",
        "fn base_price() {\n    return 100\n}\n\nfn discounted(rate) {\n    let price = base_price();\n    let result = price;\n    return result;\n}\n",
    );
    model
}

fn start_for(model: &TextSourceModel, method: &CodeElementName, line: u32, variable: &str) -> culpa::suspicious::SuspiciousExpression {
    let target = SuspiciousVariable::new("geo.PricingTest#testTotal", method.clone(), line, variable);
    SuspiciousVariableFinder::new(model)
        .find(&target)
        .into_iter()
        .next()
        .expect("finder produced no candidate")
}

#[test]
fn test_chain_crosses_into_callee_return() {
    let model = pricing_model();
    let method = CodeElementName::method("geo.pricing", "discounted");
    let start = start_for(&model, &method, 8, "result");
    let chain = CausalBacktracker::new(&model, 16).resolve(start);

    assert_eq!(chain.terminal(), &Terminal::Literal("100".to_string()));
    let texts: Vec<&str> = chain.links().iter().map(|l| l.text()).collect();
    assert_eq!(
        texts,
        vec!["let result = price", "let price = base_price()", "return 100"]
    );
    assert_eq!(
        chain.implicated_location(),
        Some(CodeElementName::line("geo.pricing", "base_price", 2))
    );
    assert!(!chain.is_truncated());
}

#[test]
fn test_argument_chain_crosses_into_caller() {
    let mut model = TextSourceModel::new();
    model.add_class_text(
        "geo.tax",
        "fn apply(amount) {\n    return amount\n}\n",
    );
    model.add_class_text(
        "geo.checkout",
        "fn total() {\n    apply(42)\n}\n",
    );
    let method = CodeElementName::method("geo.tax", "apply");
    let start = start_for(&model, &method, 2, "amount");
    let chain = CausalBacktracker::new(&model, 16).resolve(start);

    assert_eq!(chain.terminal(), &Terminal::Literal("42".to_string()));
    assert_eq!(
        chain.implicated_location(),
        Some(CodeElementName::line("geo.tax", "apply", 1))
    );
}

#[test]
fn test_boundary_call_reports_site_and_expression() {
    let mut model = TextSourceModel::new();
    model.add_class_text(
        "geo.clock",
        "fn stamp() {\n    let now = current_millis();\n    return now;\n}\n",
    );
    let method = CodeElementName::method("geo.clock", "stamp");
    let start = start_for(&model, &method, 3, "now");
    let chain = CausalBacktracker::new(&model, 16).resolve(start);

    match chain.terminal() {
        Terminal::OpaqueBoundary { call, method, line } => {
            assert_eq!(call, "current_millis()");
            assert_eq!(method.canonical(), "geo.clock#stamp");
            assert_eq!(*line, 2);
        }
        other => panic!("expected opaque boundary, got {other:?}"),
    }
    // The last resolved link still implicates a concrete location
    assert_eq!(
        chain.implicated_location(),
        Some(CodeElementName::line("geo.clock", "stamp", 2))
    );
}

#[test]
fn test_depth_bound_truncates_long_chains() {
    let mut model = TextSourceModel::new();
    let mut body = String::new();
    body.push_str("    a0 = 1;\n");
    for i in 1..24 {
        body.push_str(&format!("    a{} = a{};\n", i, i - 1));
    }
    body.push_str("    return a23;\n");
    model.add_method("geo.chain", "walk", &[], 1, &body);
    let method = CodeElementName::method("geo.chain", "walk");
    let start = start_for(&model, &method, 26, "a23");

    let deep = CausalBacktracker::new(&model, 64).resolve(start.clone());
    assert_eq!(deep.terminal(), &Terminal::Literal("1".to_string()));

    let shallow = CausalBacktracker::new(&model, 4).resolve(start);
    assert!(shallow.is_truncated());
    assert_eq!(shallow.terminal(), &Terminal::DepthExceeded);
}

#[test]
fn test_chain_display_reads_top_down() {
    let model = pricing_model();
    let method = CodeElementName::method("geo.pricing", "discounted");
    let start = start_for(&model, &method, 8, "result");
    let chain = CausalBacktracker::new(&model, 16).resolve(start);

    let rendered = format!("{}", chain);
    assert!(rendered.contains("<- geo.pricing#discounted:7"));
    assert!(rendered.contains("<- geo.pricing#base_price:2"));
    assert!(rendered.ends_with("== literal 100"));
}
