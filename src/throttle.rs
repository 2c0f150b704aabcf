//! Power-limit throttling with exponential back-off and temperature hysteresis.
//!
//! A device whose temperature reaches the policy limit has its power limit
//! cut by `10 * 2^(temp - limit)` watts below its desired value. It stays in
//! the [`ThrottleSet`] until it cools below the limit while still running
//! under the desired value, at which point the desired limit is restored.

use std::{
    collections::BTreeSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::warn;

use crate::device::{Device, DeviceId};

/// Watts removed at exactly the temperature limit; doubles every degree above.
pub const BASE_DEDUCTION: f64 = 10.0;

/// What the regulator wants done with a device's power limit this pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerDecision {
    /// Nothing to do.
    Hold,
    /// Lower the limit because the device is over the temperature limit.
    Throttle { limit: f64 },
    /// Device cooled down; put the desired limit back.
    Restore { limit: f64 },
    /// Forced pass: make the enforced limit match the desired one.
    Assert { limit: f64 },
}

impl PowerDecision {
    /// Limit to command, if any.
    pub fn limit(&self) -> Option<f64> {
        match *self {
            PowerDecision::Hold => None,
            PowerDecision::Throttle { limit }
            | PowerDecision::Restore { limit }
            | PowerDecision::Assert { limit } => Some(limit),
        }
    }
}

/// Devices currently running under a reduced power limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleSet(BTreeSet<DeviceId>);

impl ThrottleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.0.contains(&id)
    }

    /// Records the outcome of a successfully applied decision.
    pub fn commit(&mut self, id: DeviceId, decision: &PowerDecision) {
        match decision {
            PowerDecision::Throttle { .. } => {
                self.0.insert(id);
            }
            PowerDecision::Restore { .. } => {
                self.0.remove(&id);
            }
            PowerDecision::Hold | PowerDecision::Assert { .. } => {}
        }
    }
}

/// Penalty in watts for running `temperature` °C against `temperature_limit`.
pub fn deduction(temperature: f64, temperature_limit: f64) -> f64 {
    BASE_DEDUCTION * 2f64.powf(temperature - temperature_limit)
}

/// Decides the power-limit command for one device.
///
/// Pure: the caller issues the command and then calls
/// [`ThrottleSet::commit`] once it succeeded. Limits are compared at whole-watt
/// granularity, which is what the driver accepts.
pub fn plan_power_limit(
    device: &Device,
    desired_limit: f64,
    temperature_limit: f64,
    throttled: &ThrottleSet,
    force: bool,
) -> PowerDecision {
    let temperature = f64::from(device.temperature);
    let enforced = device.power_limit;

    if temperature >= temperature_limit {
        let limit = (desired_limit - deduction(temperature, temperature_limit))
            .max(device.min_power_limit);

        if whole_watts(limit) != whole_watts(enforced) {
            PowerDecision::Throttle { limit }
        } else {
            PowerDecision::Hold
        }
    } else if throttled.contains(device.id) && enforced < desired_limit {
        PowerDecision::Restore {
            limit: desired_limit,
        }
    } else if force && whole_watts(enforced) != whole_watts(desired_limit) {
        PowerDecision::Assert {
            limit: desired_limit,
        }
    } else {
        PowerDecision::Hold
    }
}

fn whole_watts(watts: f64) -> i64 {
    watts.trunc() as i64
}

/// Path of the optional per-device override file.
pub fn override_path(override_dir: &Path, id: DeviceId) -> PathBuf {
    override_dir.join(format!("{id}.powerlimit"))
}

/// Power limit the device should run at when not throttled.
///
/// An override file, if present and parseable, wins over the factory default.
/// The file is read on every call.
pub fn desired_power_limit(override_dir: &Path, device: &Device) -> Option<f64> {
    let path = override_path(override_dir, device.id);
    match fs::read_to_string(&path) {
        Ok(content) => match content.trim().parse::<f64>() {
            Ok(watts) if watts.is_finite() => return Some(watts),
            _ => warn!(
                "device {}: ignoring malformed power limit override in {}",
                device.id,
                path.display()
            ),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            "device {}: cannot read power limit override {}: {e}",
            device.id,
            path.display()
        ),
    }
    device.default_power_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(temperature: u32, power_limit: f64) -> Device {
        Device {
            temperature,
            power_limit,
            min_power_limit: 100.0,
            max_power_limit: 300.0,
            default_power_limit: Some(250.0),
            ..Device::new(0, "test")
        }
    }

    #[test]
    fn deduction_doubles_every_degree() {
        assert_eq!(deduction(80.0, 80.0), 10.0);
        assert_eq!(deduction(81.0, 80.0), 20.0);
        assert_eq!(deduction(83.0, 80.0), 80.0);
    }

    #[test]
    fn over_limit_throttles_by_deduction() {
        let decision = plan_power_limit(&device(83, 250.0), 250.0, 80.0, &ThrottleSet::new(), false);
        assert_eq!(decision, PowerDecision::Throttle { limit: 170.0 });
    }

    #[test]
    fn throttle_clamps_to_minimum_limit() {
        let decision = plan_power_limit(&device(90, 250.0), 250.0, 80.0, &ThrottleSet::new(), false);
        assert_eq!(decision, PowerDecision::Throttle { limit: 100.0 });
    }

    #[test]
    fn already_throttled_to_target_holds() {
        let mut set = ThrottleSet::new();
        set.commit(0, &PowerDecision::Throttle { limit: 170.0 });

        let decision = plan_power_limit(&device(83, 170.0), 250.0, 80.0, &set, false);
        assert_eq!(decision, PowerDecision::Hold);
    }

    #[test]
    fn cooled_throttled_device_is_restored() {
        let mut set = ThrottleSet::new();
        set.commit(0, &PowerDecision::Throttle { limit: 170.0 });

        let decision = plan_power_limit(&device(79, 170.0), 250.0, 80.0, &set, false);
        assert_eq!(decision, PowerDecision::Restore { limit: 250.0 });

        set.commit(0, &decision);
        assert!(!set.contains(0));
    }

    #[test]
    fn untracked_device_under_desired_is_left_alone() {
        let decision = plan_power_limit(&device(60, 200.0), 250.0, 80.0, &ThrottleSet::new(), false);
        assert_eq!(decision, PowerDecision::Hold);
    }

    #[test]
    fn forced_pass_asserts_desired_limit() {
        let decision = plan_power_limit(&device(60, 200.0), 250.0, 80.0, &ThrottleSet::new(), true);
        assert_eq!(decision, PowerDecision::Assert { limit: 250.0 });
    }

    #[test]
    fn forced_pass_compares_whole_watts() {
        let decision = plan_power_limit(&device(60, 250.4), 250.9, 80.0, &ThrottleSet::new(), true);
        assert_eq!(decision, PowerDecision::Hold);
    }

    #[test]
    fn assert_does_not_touch_throttle_set() {
        let mut set = ThrottleSet::new();
        set.commit(3, &PowerDecision::Assert { limit: 250.0 });
        assert!(!set.contains(3));
    }

    #[test]
    fn override_file_supersedes_default() {
        let dir = tempfile::tempdir().unwrap();
        let dev = device(60, 250.0);

        assert_eq!(desired_power_limit(dir.path(), &dev), Some(250.0));

        fs::write(override_path(dir.path(), 0), "180.5\n").unwrap();
        assert_eq!(desired_power_limit(dir.path(), &dev), Some(180.5));

        fs::write(override_path(dir.path(), 0), "lots").unwrap();
        assert_eq!(desired_power_limit(dir.path(), &dev), Some(250.0));
    }
}
