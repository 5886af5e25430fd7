// Request pacing between portal calls
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// No pause between portal requests is ever shorter than this.
pub const DELAY_FLOOR: Duration = Duration::from_millis(300);

/// Upper bound for a configured pause.
pub const DELAY_CEILING: Duration = Duration::from_secs(3600);

/// Randomized pause bounds; the sampled delay never drops below [`DELAY_FLOOR`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl DelayPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Build from seconds, clamping each bound into `0..=DELAY_CEILING`.
    pub fn from_secs_f64(min: f64, max: f64) -> Self {
        Self::new(clamped_secs(min), clamped_secs(max))
    }

    fn bound(&self, sampled: Duration) -> Duration {
        sampled.min(self.max).max(self.min).max(DELAY_FLOOR)
    }
}

fn clamped_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(DELAY_CEILING)
        .min(DELAY_CEILING)
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3))
    }
}

pub trait DelaySource: Send + Sync {
    /// A duration within `[min, max]`
    fn sample(&self, min: Duration, max: Duration) -> Duration;
}

#[derive(Debug, Default)]
pub struct RandomDelay;

impl DelaySource for RandomDelay {
    fn sample(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct RequestThrottle {
    policy: DelayPolicy,
    source: Arc<dyn DelaySource>,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestThrottle {
    pub fn new(
        policy: DelayPolicy,
        source: Arc<dyn DelaySource>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            policy,
            source,
            sleeper,
        }
    }

    pub fn tokio(policy: DelayPolicy) -> Self {
        Self::new(policy, Arc::new(RandomDelay), Arc::new(TokioSleeper))
    }

    pub fn next_delay(&self) -> Duration {
        self.policy
            .bound(self.source.sample(self.policy.min, self.policy.max))
    }

    /// Sleep for one randomized interval and report how long it was.
    pub async fn pause(&self, reason: &str) -> Duration {
        let delay = self.next_delay();
        tracing::debug!("Sleeping {:.2} seconds before {}", delay.as_secs_f64(), reason);
        self.sleeper.sleep(delay).await;
        delay
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FixedDelay, ManualClock};
    use super::*;

    #[test]
    fn test_random_delay_stays_within_bounds() {
        let policy = DelayPolicy::default();
        let throttle = RequestThrottle::tokio(policy);
        for _ in 0..200 {
            let delay = throttle.next_delay();
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_floor_applies_to_tiny_policies() {
        let throttle = RequestThrottle::new(
            DelayPolicy::from_secs_f64(0.0, 0.1),
            Arc::new(FixedDelay(Duration::from_millis(50))),
            Arc::new(ManualClock::default()),
        );
        assert_eq!(throttle.next_delay(), DELAY_FLOOR);
    }

    #[test]
    fn test_inverted_bounds_are_swapped() {
        let policy = DelayPolicy::from_secs_f64(3.0, 1.0);
        assert_eq!(policy.min, Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(3));
    }

    #[test]
    fn test_out_of_range_seconds_are_clamped() {
        let policy = DelayPolicy::from_secs_f64(f64::NEG_INFINITY, f64::INFINITY);
        assert_eq!(policy.min, Duration::ZERO);
        assert_eq!(policy.max, DELAY_CEILING);

        let policy = DelayPolicy::from_secs_f64(f64::NAN, 1e300);
        assert_eq!(policy.min, Duration::ZERO);
        assert_eq!(policy.max, DELAY_CEILING);
    }

    #[tokio::test]
    async fn test_pause_advances_manual_clock() {
        let clock = Arc::new(ManualClock::default());
        let throttle = RequestThrottle::new(
            DelayPolicy::default(),
            Arc::new(FixedDelay(Duration::from_millis(1500))),
            clock.clone(),
        );

        throttle.pause("first").await;
        throttle.pause("second").await;

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500); 2]);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }
}
