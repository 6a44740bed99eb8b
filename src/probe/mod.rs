//! Probing core: contract trees, fixture synthesis, argument binding, rollback
//! and the scheduling loop.

pub mod binder;
pub mod case;
pub mod launcher;
pub mod runner;
pub mod snapshot;
pub mod synth;
pub mod tree;

pub use case::{SetupContext, TestCase, VerifyContext};
pub use launcher::{CampaignReport, CampaignStats, MatchSet, TestLauncher};
pub use tree::{TestLeaf, TestTree};
