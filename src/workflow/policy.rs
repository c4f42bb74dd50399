//! Retry and catch policy

use crate::config::{ErrorKind, RetryConfig};
use crate::graph::{CatchRule, RetryRule};
use regex::Regex;
use std::time::Duration;

/// Matches errors by kind name and, optionally, by cause
#[derive(Debug, Clone)]
pub struct ErrorMatcher {
    names: Vec<String>,
    cause: Option<Regex>,
}

impl ErrorMatcher {
    /// `*` in `names` matches any kind
    pub fn new(names: Vec<String>, cause: Option<&str>) -> Result<Self, regex::Error> {
        let cause = cause.map(Regex::new).transpose()?;
        Ok(Self { names, cause })
    }

    pub fn any() -> Self {
        Self {
            names: vec!["*".into()],
            cause: None,
        }
    }

    pub fn matches(&self, kind: &ErrorKind) -> bool {
        let name_ok = self.names.iter().any(|n| n == "*" || n == kind.name());
        name_ok
            && self
                .cause
                .as_ref()
                .is_none_or(|re| re.is_match(&kind.cause()))
    }
}

/// Delay schedule of one retry rule
///
/// The n-th retry (0-based) waits `interval * rate^n`, capped at
/// `max_delay`, plus up to 25% jitter when enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub retries: u32,
    pub interval: Duration,
    pub rate: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

/// Cap used when a rule sets no `max_delay`
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            retries: config.max_attempts,
            interval: Duration::from_millis(config.interval),
            rate: config.backoff_rate,
            max_delay: config
                .max_delay
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_DELAY),
            jitter: config.jitter,
        }
    }

    /// Wait before retry number `retry`; never exceeds `max_delay` before jitter
    pub fn delay(&self, retry: u32) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let raw = self.interval.as_secs_f64() * self.rate.powi(retry.min(i32::MAX as u32) as i32);
        // NaN and negative products collapse to an immediate retry
        let secs = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, cap) };
        let secs = if self.jitter {
            secs + rand::random::<f64>() * 0.25 * secs
        } else {
            secs
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Per-rule retry counters for one task execution
#[derive(Debug, Default)]
pub struct RetryTracker {
    counts: Vec<u32>,
}

impl RetryTracker {
    pub fn new(rules: &[RetryRule]) -> Self {
        Self {
            counts: vec![0; rules.len()],
        }
    }

    /// Delay before the next attempt, or `None` when the error is final
    ///
    /// Only the first rule matching the error is consulted.
    pub fn next_delay(&mut self, rules: &[RetryRule], kind: &ErrorKind) -> Option<Duration> {
        let idx = rules.iter().position(|r| r.matcher.matches(kind))?;
        let used = self.counts.get_mut(idx)?;
        let backoff = &rules[idx].backoff;
        if *used >= backoff.retries {
            return None;
        }
        let delay = backoff.delay(*used);
        *used += 1;
        Some(delay)
    }

    /// Most retries any single rule allows; used for attempt reporting
    pub fn max_attempts(rules: &[RetryRule]) -> u32 {
        1 + rules
            .iter()
            .map(|r| r.backoff.retries)
            .max()
            .unwrap_or(0)
    }
}

/// First catch rule matching the error, in declaration order
pub fn select_catch<'a>(rules: &'a [CatchRule], kind: &ErrorKind) -> Option<&'a CatchRule> {
    rules.iter().find(|rule| rule.matcher.matches(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(names: &[&str], retries: u32) -> RetryRule {
        RetryRule {
            matcher: ErrorMatcher::new(names.iter().map(|s| s.to_string()).collect(), None)
                .unwrap(),
            backoff: Backoff::from_config(&RetryConfig {
                max_attempts: retries,
                interval: 10,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_matcher_by_name_and_wildcard() {
        let timeout = ErrorKind::Timeout {
            elapsed: Duration::from_secs(1),
        };
        let named = ErrorMatcher::new(vec!["Timeout".into()], None).unwrap();
        assert!(named.matches(&timeout));
        assert!(!named.matches(&ErrorKind::task_failed("boom")));
        assert!(ErrorMatcher::any().matches(&ErrorKind::task_failed("boom")));
    }

    #[test]
    fn test_matcher_cause_pattern() {
        let matcher = ErrorMatcher::new(vec!["*".into()], Some("quota|throttl")).unwrap();
        assert!(matcher.matches(&ErrorKind::task_failed("quota exceeded")));
        assert!(!matcher.matches(&ErrorKind::task_failed("disk full")));
        assert!(ErrorMatcher::new(vec!["*".into()], Some("(")).is_err());
    }

    fn backoff(interval: u64, rate: f64, max_delay: u64) -> Backoff {
        Backoff::from_config(&RetryConfig {
            interval,
            backoff_rate: rate,
            max_delay: Some(max_delay),
            ..Default::default()
        })
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let schedule = backoff(1000, 2.0, 30_000);
        assert_eq!(schedule.delay(0), Duration::from_secs(1));
        assert_eq!(schedule.delay(1), Duration::from_secs(2));
        assert_eq!(schedule.delay(3), Duration::from_secs(8));
        assert_eq!(schedule.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let mut schedule = backoff(1000, 2.0, 30_000);
        schedule.jitter = true;
        let delay = schedule.delay(0);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[test]
    fn test_backoff_from_config() {
        let schedule = Backoff::from_config(&RetryConfig {
            max_attempts: 5,
            interval: 200,
            max_delay: Some(1000),
            ..Default::default()
        });
        assert_eq!(schedule.retries, 5);
        assert_eq!(schedule.interval, Duration::from_millis(200));
        assert_eq!(schedule.delay(4), Duration::from_millis(1000));
        assert_eq!(
            Backoff::from_config(&RetryConfig::default()).max_delay,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_backoff_bad_rate_does_not_panic() {
        let negative = backoff(1000, -2.0, 30_000);
        assert_eq!(negative.delay(0), Duration::from_secs(1));
        assert_eq!(negative.delay(1), Duration::ZERO);
        assert_eq!(negative.delay(2), Duration::from_secs(4));

        assert_eq!(backoff(1000, f64::NAN, 30_000).delay(1), Duration::ZERO);
        assert_eq!(
            backoff(1000, f64::INFINITY, 30_000).delay(1),
            Duration::from_secs(30)
        );
        assert_eq!(backoff(1000, 2.0, 30_000).delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_tracker_counts_per_rule() {
        let rules = vec![rule(&["Timeout"], 1), rule(&["*"], 2)];
        let mut tracker = RetryTracker::new(&rules);
        let timeout = ErrorKind::Timeout {
            elapsed: Duration::from_secs(1),
        };
        let failed = ErrorKind::task_failed("boom");

        assert!(tracker.next_delay(&rules, &timeout).is_some());
        // Timeout rule exhausted; the wildcard rule is not consulted for it
        assert!(tracker.next_delay(&rules, &timeout).is_none());

        assert!(tracker.next_delay(&rules, &failed).is_some());
        assert!(tracker.next_delay(&rules, &failed).is_some());
        assert!(tracker.next_delay(&rules, &failed).is_none());
        assert_eq!(RetryTracker::max_attempts(&rules), 3);
    }
}
