//! Statistical and end-to-end tests: seeded trial loops over the
//! models under `data/test_models/`, checked with χ² statistics where
//! a point assertion would be wrong.

mod allocation;
mod engine;
