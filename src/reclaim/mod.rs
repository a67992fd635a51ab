//! Reclamation
//!
//! Everything that takes memory back from the caches: the signal limiter
//! that throttles write triggers, the budget enforcer, the sweeper for
//! collected payloads and the background loops that drive them.

mod enforcer;
mod limiter;
mod scheduler;
mod sweeper;

pub use enforcer::{BudgetEnforcer, BudgetTrigger, SIGNAL_GAP};
pub use limiter::{SignalLimiter, MIN_GAP};
pub use scheduler::BackgroundTasks;
pub use sweeper::CollectedSweeper;
