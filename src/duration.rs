/// Seconds an event occupies the overlay when neither the content nor the
/// guild says otherwise.
pub const DEFAULT_DURATION_SECS: i64 = 5;

/// Longest a single event may hold the overlay.
pub const MAX_DURATION_SECS: i64 = 24 * 60 * 60;

/// Per-guild duration configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationLimits {
    pub default_secs: Option<i64>,
    pub max_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct DurationPolicy {
    fallback_secs: i64,
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            fallback_secs: DEFAULT_DURATION_SECS,
        }
    }
}

impl DurationPolicy {
    pub fn new(fallback_secs: i64) -> Self {
        Self {
            fallback_secs: if fallback_secs > 0 {
                fallback_secs.min(MAX_DURATION_SECS)
            } else {
                DEFAULT_DURATION_SECS
            },
        }
    }

    /// Effective on-screen seconds: raw duration, else the guild default,
    /// else the fallback, clamped to the guild maximum. Always within
    /// `1..=MAX_DURATION_SECS`.
    pub fn resolve(&self, raw: Option<i64>, limits: DurationLimits) -> i64 {
        let candidate = positive(raw)
            .or(positive(limits.default_secs))
            .unwrap_or(self.fallback_secs);

        let clamped = match positive(limits.max_secs) {
            Some(max) if candidate > max => max,
            _ => candidate,
        };

        clamped.clamp(1, MAX_DURATION_SECS)
    }
}

/// [`DurationPolicy::resolve`] with the built-in fallback.
pub fn resolve(raw: Option<i64>, limits: DurationLimits) -> i64 {
    DurationPolicy::default().resolve(raw, limits)
}

/// Rounds a media length up to whole seconds (a 4.2s clip plays for 5s).
pub fn ceil_secs(secs: f64) -> Option<i64> {
    if secs.is_finite() && secs > 0.0 {
        Some(secs.ceil().min(MAX_DURATION_SECS as f64) as i64)
    } else {
        None
    }
}

fn positive(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}
