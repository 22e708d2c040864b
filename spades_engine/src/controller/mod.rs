//! Turn/concurrency controller and the capabilities it is built on.
//!
//! - [`TurnController`]: one action in flight per match, turn timeouts,
//!   disconnect grace periods, bot turns
//! - [`KeyedLock`]: expiring leases (in-memory or Postgres)
//! - [`KeyedScheduler`]: cancellable keyed timers
//!
//! Capabilities are injected so a multi-process deployment can swap the
//! in-memory lease for the Postgres one without touching engine code.

pub mod config;
pub mod lock;
pub mod scheduler;
pub mod turn;

pub use config::ControllerConfig;
pub use lock::{InMemoryKeyedLock, KeyedLock, LeaseToken, PgKeyedLock, acquire_with_retry};
pub use scheduler::{KeyedScheduler, ScheduledTask, TokioScheduler};
pub use turn::TurnController;
