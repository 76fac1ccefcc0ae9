//! The spinup finite state machine.
//!
//! Spinup drives each stand from zero pools to an approximate steady state
//! under a repeating historical disturbance regime, then through one last
//! disturbance and on to its declared inventory condition. This module
//! holds the vectorized state machine only; building and applying the
//! matrix operations for each phase is the model driver's job.
//!
//! Per inner iteration a stand is in exactly one phase, and the phase names
//! what happens to the stand *this* iteration: growing phases receive the
//! annual-process op sequence, disturbance phases receive only their
//! disturbance matrix.

use crate::errors::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// The possible spinup phases for a stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinupPhase {
    /// Annual dynamics within a historical rotation.
    AnnualProcess,
    /// The historical disturbance closing a rotation.
    HistoricalDisturbance,
    /// Annual dynamics after convergence, growing toward the last-pass
    /// event.
    GrowToFinalAge,
    /// The final disturbance before inventory conditions are established.
    LastPassDisturbance,
    /// Post-disturbance regeneration delay years (no growth).
    Delay,
    /// Annual dynamics growing the regenerated stand to its inventory age.
    GrowToFinalAge2,
    /// Spinup finished; further iterations are no-ops.
    End,
}

impl SpinupPhase {
    /// Phases whose iteration applies the annual-process op sequence.
    pub fn is_growing(self) -> bool {
        matches!(
            self,
            SpinupPhase::AnnualProcess
                | SpinupPhase::GrowToFinalAge
                | SpinupPhase::GrowToFinalAge2
                | SpinupPhase::Delay
        )
    }

    /// Phases whose iteration applies a disturbance matrix.
    pub fn is_disturbance(self) -> bool {
        matches!(
            self,
            SpinupPhase::HistoricalDisturbance | SpinupPhase::LastPassDisturbance
        )
    }
}

/// Per-stand parameters of the state machine, read-only during spinup.
#[derive(Debug, Clone)]
pub struct SpinupSchedule<'a> {
    /// Inventory age each stand is grown to after the last-pass event.
    pub final_age: &'a [i32],
    /// Regeneration delay years after the last-pass event.
    pub delay: &'a [i32],
    /// Years between historical disturbances.
    pub return_interval: &'a [i32],
    pub min_rotations: &'a [i32],
    pub max_rotations: &'a [i32],
    /// Relative slow-pool convergence tolerance.
    pub tolerance: f64,
}

/// Mutable per-stand state advanced by the state machine and the driver.
#[derive(Debug, Clone)]
pub struct SpinupCursor {
    pub phase: Vec<SpinupPhase>,
    pub age: Vec<i32>,
    pub delay_step: Vec<i32>,
    pub rotation: Vec<i32>,
    /// Slow-pool total recorded at the previous historical disturbance.
    pub last_rotation_slow: Vec<f64>,
    /// Current slow-pool total, updated by the driver after each iteration.
    pub this_rotation_slow: Vec<f64>,
    pub enabled: Vec<bool>,
    /// Set when the convergence test passed (as opposed to running out of
    /// rotations).
    pub converged: Vec<bool>,
}

impl SpinupCursor {
    pub fn new(n_stands: usize) -> Self {
        Self {
            phase: vec![SpinupPhase::AnnualProcess; n_stands],
            age: vec![0; n_stands],
            delay_step: vec![0; n_stands],
            rotation: vec![0; n_stands],
            last_rotation_slow: vec![0.0; n_stands],
            this_rotation_slow: vec![0.0; n_stands],
            enabled: vec![true; n_stands],
            converged: vec![false; n_stands],
        }
    }

    pub fn len(&self) -> usize {
        self.phase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }
}

fn small_slow_diff(last: f64, current: f64, tolerance: f64) -> bool {
    (current - last).abs() / current.abs().max(1e-10) < tolerance
}

/// Advance every stand's phase by one inner iteration.
///
/// Pure with respect to ages and pool values: the caller applies the ops
/// implied by the returned phases and then performs the end-of-iteration
/// bookkeeping (age increments, rotation counting, slow-pool recording).
/// Returns the number of stands that are finished.
pub fn advance_spinup_state(
    schedule: &SpinupSchedule<'_>,
    cursor: &mut SpinupCursor,
) -> CoreResult<usize> {
    let n = cursor.len();
    for (name, len) in [
        ("final_age", schedule.final_age.len()),
        ("delay", schedule.delay.len()),
        ("return_interval", schedule.return_interval.len()),
        ("min_rotations", schedule.min_rotations.len()),
        ("max_rotations", schedule.max_rotations.len()),
    ] {
        if len != n {
            return Err(CoreError::Dimension(format!(
                "spinup schedule column '{name}' has {len} entries for {n} stands"
            )));
        }
    }

    let mut finished = 0;
    for i in 0..n {
        if !cursor.enabled[i] {
            cursor.phase[i] = SpinupPhase::End;
            finished += 1;
            continue;
        }
        // Once the rotations are done the stand heads for the last-pass
        // event as soon as it reaches the age at which the event fires.
        let toward_last_pass = |age: i32| {
            if age >= schedule.final_age[i] - 1 {
                SpinupPhase::LastPassDisturbance
            } else {
                SpinupPhase::GrowToFinalAge
            }
        };
        let next = match cursor.phase[i] {
            SpinupPhase::AnnualProcess => {
                if cursor.age[i] >= schedule.return_interval[i] {
                    let converged = cursor.rotation[i] >= schedule.min_rotations[i]
                        && small_slow_diff(
                            cursor.last_rotation_slow[i],
                            cursor.this_rotation_slow[i],
                            schedule.tolerance,
                        );
                    if converged {
                        cursor.converged[i] = true;
                        toward_last_pass(cursor.age[i])
                    } else if cursor.rotation[i] >= schedule.max_rotations[i] {
                        toward_last_pass(cursor.age[i])
                    } else {
                        SpinupPhase::HistoricalDisturbance
                    }
                } else {
                    SpinupPhase::AnnualProcess
                }
            }
            SpinupPhase::HistoricalDisturbance => SpinupPhase::AnnualProcess,
            SpinupPhase::GrowToFinalAge => toward_last_pass(cursor.age[i]),
            SpinupPhase::LastPassDisturbance => {
                if schedule.delay[i] > 0 {
                    SpinupPhase::Delay
                } else if schedule.final_age[i] > 0 {
                    SpinupPhase::GrowToFinalAge2
                } else {
                    SpinupPhase::End
                }
            }
            SpinupPhase::Delay => {
                if cursor.delay_step[i] < schedule.delay[i] {
                    SpinupPhase::Delay
                } else if schedule.final_age[i] > 0 {
                    SpinupPhase::GrowToFinalAge2
                } else {
                    SpinupPhase::End
                }
            }
            SpinupPhase::GrowToFinalAge2 => {
                if cursor.age[i] < schedule.final_age[i] {
                    SpinupPhase::GrowToFinalAge2
                } else {
                    SpinupPhase::End
                }
            }
            SpinupPhase::End => SpinupPhase::End,
        };
        if next == SpinupPhase::End {
            finished += 1;
        }
        cursor.phase[i] = next;
    }
    Ok(finished)
}
