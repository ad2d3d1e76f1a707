//! Application layer: the render-job scheduling and tracking subsystem.

pub mod error;
pub mod ledger;
pub mod queue;
pub mod scheduler;
pub mod worker;
