//! Culpa - Spectrum-based fault localizer with remote debug probing
//!
//! This library ranks code elements by statistical suspiciousness derived
//! from test coverage, then refines the ranking on demand: a remote debug
//! session traces a designated variable's runtime value history, and a
//! static backward search resolves the observed value through
//! assignment/argument/return chains to its originating statement.

pub mod backtracker;
pub mod cli;
pub mod config;
pub mod coverage;
pub mod debug_client;
pub mod element;
pub mod error;
pub mod orchestrator;
pub mod ranker;
pub mod source_model;
pub mod suspicious;
pub mod test_runner;
pub mod variable_tracer;
pub mod wire;
