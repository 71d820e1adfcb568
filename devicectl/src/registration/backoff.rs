use std::time::Duration;

/// Classification of the outcome of one registration attempt, fed into the back-off
/// state machine instead of switching on error kind ad hoc at every call site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Ok,
    NoNetwork,
    ClockSkew,
    OtherTransient,
    Fatal,
}

/// What the caller should do next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    Advance,
    RetrySoon(Duration),
    Abort,
}

const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_TENTATIVES: u32 = 15;

/// Scale factors applied to the base interval across tentative bands `<=5, <=10, <=15,
/// <=20`, to ride through unsynchronised real-time clocks during TLS validation.
const CLOCK_SKEW_BAND_SCALES: &[(u32, f64)] = &[(5, 0.5), (10, 1.0), (15, 2.0), (20, 4.0)];

/// Implements the registration machine's retry and timeout policy as a small state
/// machine: a tentative counter and the base interval are the only state.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base_interval: Duration,
    max_tentatives: u32,
    tentatives: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_INTERVAL,
            max_tentatives: DEFAULT_MAX_TENTATIVES,
            tentatives: 0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_interval: Duration, max_tentatives: u32) -> Self {
        Self {
            base_interval,
            max_tentatives,
            tentatives: 0,
        }
    }

    pub fn tentatives(&self) -> u32 {
        self.tentatives
    }

    /// Advances the policy given the outcome of the most recent attempt and returns what
    /// the caller should do next.
    pub fn step(&mut self, outcome: Outcome) -> Action {
        match outcome {
            Outcome::Ok => {
                self.tentatives = 0;
                Action::Advance
            }
            Outcome::NoNetwork => {
                // No-network errors reset the tentative counter and retry with half the
                // base interval, unbounded.
                self.tentatives = 0;
                Action::RetrySoon(self.base_interval / 2)
            }
            Outcome::ClockSkew => {
                self.tentatives += 1;
                if self.tentatives > self.max_tentatives {
                    return Action::Abort;
                }
                Action::RetrySoon(self.clock_skew_delay())
            }
            Outcome::OtherTransient => {
                self.tentatives += 1;
                if self.tentatives > self.max_tentatives {
                    return Action::Abort;
                }
                Action::RetrySoon(self.base_interval)
            }
            Outcome::Fatal => Action::Abort,
        }
    }

    fn clock_skew_delay(&self) -> Duration {
        let scale = CLOCK_SKEW_BAND_SCALES
            .iter()
            .find(|(band, _)| self.tentatives <= *band)
            .map(|(_, scale)| *scale)
            .unwrap_or_else(|| CLOCK_SKEW_BAND_SCALES.last().unwrap().1);
        self.base_interval.mul_f64(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_resets_counter() {
        let mut policy = BackoffPolicy::default();
        policy.step(Outcome::OtherTransient);
        policy.step(Outcome::OtherTransient);
        assert_eq!(policy.step(Outcome::Ok), Action::Advance);
        assert_eq!(policy.tentatives(), 0);
    }

    #[test]
    fn test_no_network_resets_and_halves_interval() {
        let mut policy = BackoffPolicy::default();
        policy.step(Outcome::OtherTransient);
        assert_eq!(
            policy.step(Outcome::NoNetwork),
            Action::RetrySoon(Duration::from_secs(30))
        );
        assert_eq!(policy.tentatives(), 0);
    }

    #[test]
    fn test_other_transient_bounded() {
        let mut policy = BackoffPolicy::new(Duration::from_secs(60), 2);
        assert_eq!(
            policy.step(Outcome::OtherTransient),
            Action::RetrySoon(Duration::from_secs(60))
        );
        assert_eq!(
            policy.step(Outcome::OtherTransient),
            Action::RetrySoon(Duration::from_secs(60))
        );
        assert_eq!(policy.step(Outcome::OtherTransient), Action::Abort);
    }

    #[test]
    fn test_clock_skew_band_scaling() {
        let mut policy = BackoffPolicy::new(Duration::from_secs(60), 20);
        for expected_scale in [0.5, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0] {
            let action = policy.step(Outcome::ClockSkew);
            assert_eq!(
                action,
                Action::RetrySoon(Duration::from_secs(60).mul_f64(expected_scale))
            );
        }
    }

    #[test]
    fn test_fatal_always_aborts() {
        let mut policy = BackoffPolicy::default();
        assert_eq!(policy.step(Outcome::Fatal), Action::Abort);
    }
}
