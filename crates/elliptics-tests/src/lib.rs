//! Validation infrastructure for the elliptics client.
//!
//! `harness` wires the in-memory simulated cluster to a session; the other
//! modules hold end-to-end scenario tests and property-based tests over the
//! wire data model.

pub mod harness;
pub mod proptest_proto;
pub mod scenarios;

pub use harness::TestCluster;
