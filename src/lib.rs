//! fnprobe library surface.
//!
//! Identifies stripped functions by running them inside a sandbox against a
//! catalog of behavioral contracts. The probing core lives in `probe`; `sandbox`
//! holds the collaborator contracts and the in-process scripted engine used by
//! the self-check binary and the integration tests.

pub mod catalog;
pub mod error;
pub mod probe;
pub mod sandbox;
pub mod utils;
