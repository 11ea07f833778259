//! Error backoff handling

use std::time::Duration;

/// Configuration for how to manage backoff when an error is encountered
#[derive(Clone, Copy, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u64,
    total_cap: Duration,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial error delay of 100 ms with a multiplier of 2 and a
    /// per-delay cap of 5 seconds. The whole retry sequence is bounded by
    /// a total elapsed time of 15 seconds.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(100),
            max_error_delay: Duration::from_secs(5),
            multiplier: 2,
            total_cap: Duration::from_secs(15),
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// When encountering an error for the first time, the backoff will be
    /// `initial_error_delay`. On subsequent errors, the backoff is
    /// multiplied by `multiplier`, with a per-delay cap of
    /// `max_error_delay`. Once `total_cap` of wall-clock time has elapsed,
    /// no further retries should be attempted.
    pub fn new(
        initial_error_delay: Duration,
        max_error_delay: Duration,
        multiplier: u64,
        total_cap: Duration,
    ) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
            total_cap,
        }
    }

    /// The bound on the total wall-clock time spent retrying
    pub fn total_cap(&self) -> Duration {
        self.total_cap
    }
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`]
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a success
    ///
    /// This resets the internal delay state.
    pub fn success(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns the expected backoff delay
    ///
    /// This will apply the values in the backoff configuration, increasing
    /// the backoff delay if required, and then report the expected next
    /// delay.
    pub fn error(&mut self) -> Duration {
        let new_delay = self
            .last_delay
            .map(|d: Duration| {
                (Duration::from_millis(d.as_millis() as u64 * self.config.multiplier))
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        new_delay
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}
