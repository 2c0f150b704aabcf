//! Fan command bookkeeping: control-state suppression and speed batching.

use std::collections::{BTreeMap, HashMap};

use crate::device::{DeviceId, DeviceMap};

/// Last commanded fan-control mode per device.
///
/// Lets callers skip commands that would not change anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanControlStates(HashMap<DeviceId, bool>);

impl FanControlStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DeviceId) -> Option<bool> {
        self.0.get(&id).copied()
    }

    /// True when a command is needed to reach `manual`.
    pub fn needs_change(&self, id: DeviceId, manual: bool) -> bool {
        self.get(id) != Some(manual)
    }

    /// Records a successfully applied mode.
    pub fn record(&mut self, id: DeviceId, manual: bool) {
        self.0.insert(id, manual);
    }
}

/// Fan speeds this process intends each device to run at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandedSpeeds(BTreeMap<DeviceId, u8>);

impl CommandedSpeeds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the cache from observed fan speeds.
    pub fn from_observed(devices: &DeviceMap) -> Self {
        Self(
            devices
                .values()
                .filter_map(|device| device.fan_speed.map(|speed| (device.id, speed)))
                .collect(),
        )
    }

    pub fn set(&mut self, id: DeviceId, speed: u8) {
        self.0.insert(id, speed);
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, u8)> + '_ {
        self.0.iter().map(|(id, speed)| (*id, *speed))
    }
}

/// Devices whose commanded speed differs from what was last observed.
///
/// Only devices present in `commanded` and equipped with a fan are
/// considered; the result is one batch covering every changed device.
pub fn plan_fan_changes(devices: &DeviceMap, commanded: &CommandedSpeeds) -> BTreeMap<DeviceId, u8> {
    commanded
        .iter()
        .filter(|(id, speed)| {
            devices
                .get(id)
                .is_some_and(|device| device.has_fan && device.fan_speed != Some(*speed))
        })
        .collect()
}
