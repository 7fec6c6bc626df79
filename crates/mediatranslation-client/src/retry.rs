//! Exponential backoff for establishing calls.

use std::time::Duration;

use rand::Rng;
use tonic::{Code, Status};

const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
const DEFAULT_MAXIMUM: Duration = Duration::from_secs(60);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Which failures to retry and how long to keep trying.
#[derive(Debug, Clone, PartialEq)]
pub struct Retry {
    pub initial: Duration,
    pub maximum: Duration,
    pub multiplier: f64,
    pub deadline: Duration,
    codes: Vec<Code>,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL,
            maximum: DEFAULT_MAXIMUM,
            multiplier: DEFAULT_MULTIPLIER,
            deadline: DEFAULT_DEADLINE,
            codes: vec![Code::Unavailable],
        }
    }
}

impl Retry {
    /// Retries only on the given status codes.
    #[must_use]
    pub fn on_codes(codes: impl IntoIterator<Item = Code>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    #[must_use]
    pub const fn with_maximum(mut self, maximum: Duration) -> Self {
        self.maximum = maximum;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    #[must_use]
    pub fn is_retryable(&self, status: &Status) -> bool {
        self.codes.contains(&status.code())
    }

    /// Jittered sleeps between attempts, averaging out to the nominal delay.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            delay: self.initial.as_secs_f64(),
            maximum: self.maximum,
            multiplier: self.multiplier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    delay: f64,
    maximum: Duration,
    multiplier: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let maximum = self.maximum.as_secs_f64();
        // `f64::min` also maps a NaN delay to the maximum.
        let upper = (self.delay * 2.0).min(maximum).max(0.0);
        let sleep = rand::thread_rng().gen_range(0.0..=upper);
        self.delay *= self.multiplier;
        let sleep = Duration::try_from_secs_f64(sleep).unwrap_or(self.maximum);
        Some(sleep.min(self.maximum))
    }
}

/// A per-call override of a method default.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Setting<T> {
    /// Use whatever the method was wrapped with.
    #[default]
    Default,
    /// Explicitly disable the setting for this call.
    Unset,
    Set(T),
}

impl<T: Clone> Setting<T> {
    #[must_use]
    pub fn resolve(&self, method_default: Option<&T>) -> Option<T> {
        match self {
            Self::Default => method_default.cloned(),
            Self::Unset => None,
            Self::Set(value) => Some(value.clone()),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Self::Set(value)
    }
}
