//! Linear fan ramp used to derive a target fan speed from core temperature.

use crate::config::Policy;

/// Speed commanded at and above the target temperature.
pub const MAX_SPEED: u8 = 100;

/// Floor of the ramp; fans never stop.
pub const MIN_SPEED: u8 = 20;

/// Temperature-to-speed ramp.
///
/// At or above `target_temperature` fans run flat out. Below it, every degree
/// removes `ratio` percent from 100, bottoming out at [`MIN_SPEED`].
///
/// # Example
///
/// ```
/// use gpu_thermald::fan_curve::FanRamp;
///
/// let ramp = FanRamp::new(70.0, 4.0);
/// assert_eq!(ramp.speed_for(75), 100);
/// assert_eq!(ramp.speed_for(60), 60);
/// assert_eq!(ramp.speed_for(20), 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanRamp {
    pub target_temperature: f64,
    pub ratio: f64,
}

impl FanRamp {
    pub const fn new(target_temperature: f64, ratio: f64) -> Self {
        Self {
            target_temperature,
            ratio,
        }
    }

    /// Desired fan speed percentage for `temperature` in °C.
    pub fn speed_for(&self, temperature: u32) -> u8 {
        let current = f64::from(temperature);
        if current >= self.target_temperature {
            return MAX_SPEED;
        }

        let speed = 100.0 - (self.target_temperature - current) * self.ratio;
        // Below the target the value is strictly under 100.
        (speed.max(0.0) as u8).max(MIN_SPEED)
    }
}

impl From<&Policy> for FanRamp {
    fn from(policy: &Policy) -> Self {
        Self::new(policy.target_temperature, policy.fan_speed_temperature_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn at_target_runs_full_speed() {
        assert_eq!(FanRamp::new(70.0, 4.0).speed_for(70), 100);
    }

    #[test]
    fn below_target_ramps_down_linearly() {
        let ramp = FanRamp::new(70.0, 4.0);
        assert_eq!(ramp.speed_for(69), 96);
        assert_eq!(ramp.speed_for(55), 40);
        assert_eq!(ramp.speed_for(50), 20);
    }

    #[test]
    fn low_and_negative_results_clamp_to_floor() {
        let ramp = FanRamp::new(70.0, 4.0);
        assert_eq!(ramp.speed_for(47), MIN_SPEED);
        assert_eq!(ramp.speed_for(44), MIN_SPEED);
        assert_eq!(ramp.speed_for(0), MIN_SPEED);
    }

    #[test]
    fn fractional_ratio_truncates() {
        let ramp = FanRamp::new(70.0, 2.5);
        // 100 - 3 * 2.5 = 92.5
        assert_eq!(ramp.speed_for(67), 92);
    }

    #[test]
    fn zero_ratio_keeps_fans_at_full_speed() {
        let ramp = FanRamp::new(70.0, 0.0);
        assert_eq!(ramp.speed_for(30), 100);
    }

    proptest! {
        #[test]
        fn hot_devices_always_get_full_speed(
            target in 0u32..120,
            over in 0u32..80,
            ratio in 0.0f64..20.0,
        ) {
            let ramp = FanRamp::new(f64::from(target), ratio);
            prop_assert_eq!(ramp.speed_for(target + over), 100);
        }

        #[test]
        fn cool_devices_follow_the_ramp(
            target in 1u32..120,
            ratio in 0.0f64..20.0,
            below in 1u32..120,
        ) {
            prop_assume!(below <= target);
            let current = target - below;
            let ramp = FanRamp::new(f64::from(target), ratio);

            let raw = 100.0 - f64::from(below) * ratio;
            let expected = (raw.max(0.0) as u8).max(MIN_SPEED);
            prop_assert_eq!(ramp.speed_for(current), expected);
            prop_assert!(ramp.speed_for(current) >= MIN_SPEED);
        }

        #[test]
        fn speed_never_increases_as_temperature_drops(
            target in 1u32..120,
            ratio in 0.0f64..20.0,
            a in 0u32..120,
            b in 0u32..120,
        ) {
            let ramp = FanRamp::new(f64::from(target), ratio);
            let (cool, warm) = if a <= b { (a, b) } else { (b, a) };
            prop_assume!(warm < target);
            prop_assert!(ramp.speed_for(cool) <= ramp.speed_for(warm));
        }
    }
}
