use core::time::Duration;

use crate::options::ReconnectOptions;

/// Multiplicative reconnect backoff.
///
/// [`next_delay`](Self::next_delay) hands out the current delay and grows it
/// for the following failure; [`reset`](Self::reset) goes back to the base.
/// The sequence of handed-out delays never decreases between resets.
#[derive(Debug, Clone)]
pub struct Backoff {
    options: ReconnectOptions,
    current_ms: u64,
}

impl Backoff {
    #[must_use]
    pub fn new(options: ReconnectOptions) -> Self {
        let mut backoff = Self {
            options,
            current_ms: 0,
        };
        backoff.reset();
        backoff
    }

    /// The delay the next failure will be scheduled with.
    #[must_use]
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = self.clamp(grow(delay, self.options.coefficient));
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.current_ms = self.clamp(duration_ms(self.options.delay));
    }

    #[must_use]
    pub fn options(&self) -> &ReconnectOptions {
        &self.options
    }

    fn clamp(&self, ms: u64) -> u64 {
        match self.options.max_delay {
            Some(max) => ms.min(duration_ms(max)),
            None => ms,
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn grow(ms: u64, coefficient: f64) -> u64 {
    let coefficient = if coefficient.is_nan() { 1.0 } else { coefficient.max(1.0) };
    let grown = (coefficient * ms as f64).ceil();
    if grown >= u64::MAX as f64 {
        u64::MAX
    } else {
        (grown as u64).max(ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
