//! Healing executor and its building blocks
//!
//! - [`HealingAction`]: the `analyzing -> repairing -> completed | failed`
//!   state machine
//! - [`ErrorWindows`]: sliding-window loop detection
//! - [`EscalationTimers`]: cancellable degraded-to-failed escalation
//! - [`Remediator`]: host-supplied remediation routines

mod action;
mod atomic;
mod escalation;
mod executor;
mod loop_detector;
mod remediation;

#[cfg(test)]
mod tests;

pub use action::HealingAction;
pub use atomic::with_rollback;
pub use escalation::EscalationTimers;
pub use executor::{HealingConfig, HealingExecutor};
pub use loop_detector::ErrorWindows;
pub use remediation::{RemediationOutcome, Remediator};
