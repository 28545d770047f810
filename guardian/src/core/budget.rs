//! Run deadline helpers shared by the retry loops.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::error::GuardianError;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(GuardianError::cancelled("run deadline exceeded").into());
    }
    Ok(remaining)
}

/// Clamp a per-step timeout to what is left of the run, if the run has a deadline.
pub fn step_timeout(step: Duration, deadline: Option<Instant>) -> Result<Duration> {
    match deadline {
        Some(deadline) => Ok(step.min(remaining_budget(deadline)?)),
        None => Ok(step),
    }
}

/// True once the run deadline, if any, has passed.
pub fn deadline_reached(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
