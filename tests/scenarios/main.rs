//! Scenario tests: whole pipelines driven through the engine with test doubles

mod helpers;

mod config_round_trip;
mod failure_handling;
mod output_bindings;
