//! Fee computation. Pure functions over timestamps and rates — no I/O, no
//! clock reads; `now` always comes in as an argument.

use crate::model::{Amount, Ms};

pub const ONE_HOUR_MS: Ms = 3_600_000;
pub const ONE_DAY_IN_HOURS: i64 = 24;

/// Elapsed whole hours, any partial hour billed as a full hour. Clamped at
/// zero for inverted inputs.
fn hours_ceil(from: Ms, to: Ms) -> i64 {
    let diff = (to - from).max(0);
    (diff + ONE_HOUR_MS - 1) / ONE_HOUR_MS
}

/// Elapsed hours rounded to the nearest whole hour. Used only for the
/// grace-period comparison, which asks "close enough", not "billable".
fn hours_round(from: Ms, to: Ms) -> i64 {
    let diff = (to - from).max(0);
    (diff + ONE_HOUR_MS / 2) / ONE_HOUR_MS
}

/// Flat-rate component of a settlement.
///
/// Waived when the vehicle departed and is returning within
/// `grace_period_hours` (boundary inclusive). A vehicle with no recorded
/// departure — a first-ever visit — always pays the flat rate.
pub fn flat_rate(
    last_departed_at: Option<Ms>,
    grace_period_hours: i64,
    default_flat_rate: Amount,
    now: Ms,
) -> Amount {
    match last_departed_at {
        Some(departed) if hours_round(departed, now) <= grace_period_hours => 0,
        _ => default_flat_rate,
    }
}

/// Duration component of a settlement.
///
/// Under 24 hours: standard tier — the first `initial_free_hours` are free,
/// the rest bill hourly. At 24 hours or more: overnight tier — whole days at
/// `full_day_rate` plus remainder hours at `hourly_rate`. The overnight tier
/// is a distinct pricing mode and does not inherit the free window.
pub fn duration_charge(
    started_at: Ms,
    ended_at: Ms,
    hourly_rate: Amount,
    initial_free_hours: i64,
    full_day_rate: Amount,
) -> Amount {
    let hours = hours_ceil(started_at, ended_at);
    if hours >= ONE_DAY_IN_HOURS {
        let days = hours / ONE_DAY_IN_HOURS;
        let remainder = hours - days * ONE_DAY_IN_HOURS;
        days * full_day_rate + remainder * hourly_rate
    } else if hours <= initial_free_hours {
        0
    } else {
        (hours - initial_free_hours) * hourly_rate
    }
}
