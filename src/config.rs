use crate::model::{Amount, Size};

/// Pricing knobs, resolved once at startup and passed into the engine as an
/// immutable value. Nothing in the engine mutates these at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatesConfig {
    /// Fixed entry fee, charged once per visit unless waived by the grace
    /// period.
    pub flat: Amount,
    /// Price per full day in the overnight tier.
    pub full_day: Amount,
    pub per_hour_small: Amount,
    pub per_hour_medium: Amount,
    pub per_hour_large: Amount,
    /// Window after a vehicle's last charged departure during which a new
    /// flat rate is waived.
    pub grace_period_hours: i64,
    /// Hours included in the standard tier before hourly billing starts.
    pub initial_free_hours: i64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            flat: 40,
            full_day: 5000,
            per_hour_small: 20,
            per_hour_medium: 60,
            per_hour_large: 100,
            grace_period_hours: 1,
            initial_free_hours: 3,
        }
    }
}

impl RatesConfig {
    /// Hourly rate for a slot capacity. Tickets snapshot this at issuance.
    pub fn hourly(&self, capacity: Size) -> Amount {
        match capacity {
            Size::Small => self.per_hour_small,
            Size::Medium => self.per_hour_medium,
            Size::Large => self.per_hour_large,
        }
    }

    /// Read rates from `PARQ_*` environment variables, keeping the code
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            flat: env_i64("PARQ_FLAT_RATE", defaults.flat),
            full_day: env_i64("PARQ_FULL_DAY_RATE", defaults.full_day),
            per_hour_small: env_i64("PARQ_SMALL_RATE", defaults.per_hour_small),
            per_hour_medium: env_i64("PARQ_MEDIUM_RATE", defaults.per_hour_medium),
            per_hour_large: env_i64("PARQ_LARGE_RATE", defaults.per_hour_large),
            grace_period_hours: env_i64("PARQ_GRACE_PERIOD_HOURS", defaults.grace_period_hours),
            initial_free_hours: env_i64("PARQ_INITIAL_FREE_HOURS", defaults.initial_free_hours),
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
