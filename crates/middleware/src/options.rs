//! Caller retry options and dispatcher admission options.

use crate::error::{Error, Result};
use std::time::Duration;

/// Upper bound for any attempt budget.
pub const MAX_ATTEMPTS: usize = 100;

/// Upper bound for the delay between attempts on the registered address.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default in-flight limit of a dispatcher.
#[allow(clippy::cast_sign_loss)]
pub const DEFAULT_MAX_IN_FLIGHT: usize = i32::MAX as usize;

/// Retry and failover policy of a caller.
///
/// Retries happen in two phases. The first retries the registered address,
/// sleeping `delay_on_registered × n` before the n-th retry. The second walks
/// through alternates from the directory, one new address per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Retry against the registered address.
    pub retry_on_registered: bool,
    /// Retries against the registered address.
    pub attempts_on_registered: usize,
    /// Base delay between retries against the registered address.
    pub delay_on_registered: Duration,
    /// Fail over to other instances with the same identifier.
    pub retry_on_other: bool,
    /// Retries against other instances.
    pub attempts_on_other: usize,
    /// Rebind the caller to the instance that served a failed-over call.
    pub update_reference: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            retry_on_registered: false,
            attempts_on_registered: 1,
            delay_on_registered: Duration::ZERO,
            retry_on_other: false,
            attempts_on_other: 1,
            update_reference: false,
        }
    }
}

impl ProxyOptions {
    /// Enable retries against the registered address.
    #[must_use]
    pub const fn with_retry_on_registered(mut self, attempts: usize, delay: Duration) -> Self {
        self.retry_on_registered = true;
        self.attempts_on_registered = attempts;
        self.delay_on_registered = delay;
        self
    }

    /// Enable failover to other instances.
    #[must_use]
    pub const fn with_retry_on_other(mut self, attempts: usize) -> Self {
        self.retry_on_other = true;
        self.attempts_on_other = attempts;
        self
    }

    /// Rebind after a successful failover.
    #[must_use]
    pub const fn with_update_reference(mut self, update: bool) -> Self {
        self.update_reference = update;
        self
    }

    /// Whether any retry phase is enabled.
    #[must_use]
    pub const fn retries(&self) -> bool {
        self.retry_on_registered || self.retry_on_other
    }

    /// Check ranges of the enabled phases.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if a budget or delay is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.retry_on_registered {
            check_attempts("attempts_on_registered", self.attempts_on_registered)?;
            if self.delay_on_registered > MAX_RETRY_DELAY {
                return Err(Error::InvalidOptions(format!(
                    "delay_on_registered {:?} exceeds {MAX_RETRY_DELAY:?}",
                    self.delay_on_registered
                )));
            }
        }
        if self.retry_on_other {
            check_attempts("attempts_on_other", self.attempts_on_other)?;
        }
        Ok(())
    }
}

pub(crate) fn check_attempts(name: &str, attempts: usize) -> Result<()> {
    if (1..=MAX_ATTEMPTS).contains(&attempts) {
        Ok(())
    } else {
        Err(Error::InvalidOptions(format!(
            "{name} must be within 1..={MAX_ATTEMPTS}, got {attempts}"
        )))
    }
}

/// What a dispatcher does with a call that arrives at its in-flight limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionMode {
    /// Never refuse; the limit is ignored.
    NeverBlock,
    /// Wait until an in-flight call finishes.
    QueueAtMax,
    /// Answer with a capacity fault.
    BlockAtMax,
    /// Forward the call to another instance with the same identifier.
    ForwardAtMax,
}

/// Admission control settings of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionOptions {
    /// Behaviour at the limit.
    pub mode: AdmissionMode,
    /// In-flight limit.
    pub max_in_flight: usize,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        Self {
            mode: AdmissionMode::NeverBlock,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl AdmissionOptions {
    /// Admit everything.
    #[must_use]
    pub const fn never_block() -> Self {
        Self {
            mode: AdmissionMode::NeverBlock,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Queue calls beyond `max_in_flight`.
    #[must_use]
    pub const fn queue_at(max_in_flight: usize) -> Self {
        Self {
            mode: AdmissionMode::QueueAtMax,
            max_in_flight,
        }
    }

    /// Refuse calls beyond `max_in_flight`.
    #[must_use]
    pub const fn block_at(max_in_flight: usize) -> Self {
        Self {
            mode: AdmissionMode::BlockAtMax,
            max_in_flight,
        }
    }

    /// Forward calls beyond `max_in_flight`.
    #[must_use]
    pub const fn forward_at(max_in_flight: usize) -> Self {
        Self {
            mode: AdmissionMode::ForwardAtMax,
            max_in_flight,
        }
    }

    /// Check the limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the limit is zero or too large to
    /// queue on.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::InvalidOptions(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.mode == AdmissionMode::QueueAtMax
            && self.max_in_flight > tokio::sync::Semaphore::MAX_PERMITS
        {
            return Err(Error::InvalidOptions(format!(
                "max_in_flight {} exceeds {}",
                self.max_in_flight,
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_disables_retries() {
        let options = ProxyOptions::default();
        assert!(!options.retries());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_attempt_ranges() {
        assert!(
            ProxyOptions::default()
                .with_retry_on_registered(100, Duration::from_millis(100))
                .validate()
                .is_ok()
        );
        assert_matches!(
            ProxyOptions::default()
                .with_retry_on_registered(0, Duration::ZERO)
                .validate(),
            Err(Error::InvalidOptions(_))
        );
        assert_matches!(
            ProxyOptions::default()
                .with_retry_on_registered(1, Duration::from_millis(101))
                .validate(),
            Err(Error::InvalidOptions(_))
        );
        assert_matches!(
            ProxyOptions::default().with_retry_on_other(101).validate(),
            Err(Error::InvalidOptions(_))
        );
    }

    #[test]
    fn test_admission_limits() {
        assert!(AdmissionOptions::default().validate().is_ok());
        assert!(AdmissionOptions::block_at(1).validate().is_ok());
        assert_matches!(
            AdmissionOptions::forward_at(0).validate(),
            Err(Error::InvalidOptions(_))
        );
    }
}
