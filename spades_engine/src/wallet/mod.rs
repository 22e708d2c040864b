//! Boundaries to the wallet ledger: stake tiers, settlement of finished
//! matches, and the frozen-account check that gates queue entry.
//!
//! The ledger itself lives outside this crate; the engine only talks to it
//! through [`Settlement`] and [`EligibilityCheck`].

pub mod eligibility;
pub mod models;
pub mod settlement;

pub use eligibility::{AllowAll, EligibilityCheck, PgEligibility};
pub use models::StakeTier;
pub use settlement::{NoopSettlement, PgSettlement, RecordingSettlement, Settlement};
