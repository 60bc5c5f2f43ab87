use std::time::Duration;

/// Exponential backoff for re-dialing a dropped node channel.
///
/// The channel itself never retries; the pool runs this policy after a
/// `Closed` notice. Assignments of the dead node are invalidated up front so
/// guild operations re-balance immediately instead of waiting out the
/// backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt, or `None` once the budget is
    /// spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        Some((self.base_delay * factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(6), Some(Duration::from_secs(10)));
    }

    #[test]
    fn budget_is_bounded() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), None);
        assert!(policy.delay_for(3).is_some());
        assert_eq!(policy.delay_for(4), None);
    }
}
