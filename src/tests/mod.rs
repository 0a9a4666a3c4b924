//! Crate-level tests: end-to-end compiles and pipeline properties

mod scenario_tests;
