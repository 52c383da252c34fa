use crate::system::SystemState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    Off,
    On,
    /// Toggles every `half_period_ms`
    Blink { half_period_ms: u32 },
}

impl LedPattern {
    pub fn for_state(state: SystemState, landed: bool) -> Self {
        match state {
            SystemState::Calibrating => LedPattern::Blink { half_period_ms: 500 },
            SystemState::WaitingController => LedPattern::Blink { half_period_ms: 250 },
            SystemState::Flying => LedPattern::On,
            SystemState::Landing if landed => LedPattern::Off,
            SystemState::Landing => LedPattern::Blink { half_period_ms: 100 },
        }
    }

    pub fn is_lit(self, now_us: u64) -> bool {
        match self {
            LedPattern::Off => false,
            LedPattern::On => true,
            LedPattern::Blink { half_period_ms } => {
                let half = half_period_ms.max(1) as u64 * 1_000;
                (now_us / half) % 2 == 0
            }
        }
    }
}

/// LED level for `state` at `now_us`.
pub fn led_level(state: SystemState, landed: bool, now_us: u64) -> bool {
    LedPattern::for_state(state, landed).is_lit(now_us)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_per_state() {
        assert_eq!(
            LedPattern::for_state(SystemState::Calibrating, false),
            LedPattern::Blink { half_period_ms: 500 }
        );
        assert_eq!(LedPattern::for_state(SystemState::Flying, false), LedPattern::On);
        assert_eq!(LedPattern::for_state(SystemState::Landing, true), LedPattern::Off);
    }

    #[test]
    fn blink_toggles_on_half_period() {
        assert!(led_level(SystemState::Calibrating, false, 0));
        assert!(led_level(SystemState::Calibrating, false, 499_999));
        assert!(!led_level(SystemState::Calibrating, false, 500_000));
        assert!(led_level(SystemState::Calibrating, false, 1_000_000));

        assert!(!led_level(SystemState::WaitingController, false, 250_000));
        assert!(!led_level(SystemState::Landing, false, 100_000));
        assert!(led_level(SystemState::Flying, false, 123_456));
    }
}
