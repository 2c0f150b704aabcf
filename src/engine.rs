//! Thermal/power control engine.
//!
//! Turns a device snapshot plus the active policy into hardware commands.
//! All mutable control state lives in [`ControlState`], which the caller
//! owns and passes in; nothing here is global.

use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::{
    config::Policy,
    device::{Device, DeviceId, DeviceMap},
    fan_control::{CommandedSpeeds, FanControlStates, plan_fan_changes},
    fan_curve::FanRamp,
    gateway::DeviceGateway,
    throttle::{PowerDecision, ThrottleSet, desired_power_limit, plan_power_limit},
};

/// Cross-tick state of the control loop.
#[derive(Debug, Clone, Default)]
pub struct ControlState {
    pub throttled: ThrottleSet,
    pub fan_states: FanControlStates,
    pub speeds: CommandedSpeeds,
}

impl ControlState {
    /// Starts with the commanded speeds equal to what the hardware reports.
    pub fn seeded(devices: &DeviceMap) -> Self {
        Self {
            speeds: CommandedSpeeds::from_observed(devices),
            ..Self::default()
        }
    }
}

/// Policy-derived values the engine reads every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub ramp: FanRamp,
    pub temperature_limit: f64,
    pub ignored: HashSet<DeviceId>,
    pub informative: bool,
    pub override_dir: PathBuf,
}

impl ControlSettings {
    pub fn from_policy(policy: &Policy, override_dir: impl Into<PathBuf>) -> Self {
        Self {
            ramp: FanRamp::from(policy),
            temperature_limit: policy.temperature_limit(),
            ignored: policy.ignored(),
            informative: policy.informative,
            override_dir: override_dir.into(),
        }
    }

    pub fn is_ignored(&self, id: DeviceId) -> bool {
        self.ignored.contains(&id)
    }
}

/// Commands issued during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub power: BTreeMap<DeviceId, PowerDecision>,
    pub fan_changes: BTreeMap<DeviceId, u8>,
}

/// Runs the power-limit state machine for one device and applies its decision.
///
/// The throttle set is only updated once the command went through.
pub async fn regulate_device(
    gateway: &mut dyn DeviceGateway,
    device: &Device,
    settings: &ControlSettings,
    state: &mut ControlState,
    force: bool,
) -> Result<PowerDecision> {
    let Some(desired) = desired_power_limit(&settings.override_dir, device) else {
        debug!("device {}: no desired power limit known, skipping", device.id);
        return Ok(PowerDecision::Hold);
    };

    let decision = plan_power_limit(
        device,
        desired,
        settings.temperature_limit,
        &state.throttled,
        force,
    );

    let limit = match decision {
        PowerDecision::Hold => return Ok(decision),
        PowerDecision::Throttle { limit } => {
            warn!(
                "device {}: temperature is at {}C, throttling power limit to {}W",
                device.id, device.temperature, limit as i64
            );
            limit
        }
        PowerDecision::Restore { limit } => {
            info!(
                "device {}: temperature is at {}C, restoring optimum power limit of {}W",
                device.id, device.temperature, limit as i64
            );
            limit
        }
        PowerDecision::Assert { limit } => {
            info!("device {}: setting power limit {}W", device.id, limit as i64);
            limit
        }
    };

    gateway
        .set_power_limit(device.id, limit)
        .await
        .with_context(|| format!("device {}: failed to set power limit to {limit}W", device.id))?;

    state.throttled.commit(device.id, &decision);
    Ok(decision)
}

/// Sends a fan-control-state command unless the cache says it is already set.
///
/// Returns whether a command was issued.
pub async fn ensure_fan_control(
    gateway: &mut dyn DeviceGateway,
    states: &mut FanControlStates,
    id: DeviceId,
    manual: bool,
) -> Result<bool> {
    if !states.needs_change(id, manual) {
        return Ok(false);
    }

    gateway
        .set_fan_control_state(id, manual)
        .await
        .with_context(|| format!("failed to toggle the fan control state for device: {id}"))?;
    states.record(id, manual);
    Ok(true)
}

/// Issues one batched command for every device whose fan drifted.
pub async fn adjust_fan_speeds(
    gateway: &mut dyn DeviceGateway,
    devices: &DeviceMap,
    settings: &ControlSettings,
    state: &ControlState,
) -> Result<BTreeMap<DeviceId, u8>> {
    let mut changes = plan_fan_changes(devices, &state.speeds);
    changes.retain(|id, _| !settings.is_ignored(*id));
    if changes.is_empty() {
        return Ok(changes);
    }

    if settings.informative {
        for (id, speed) in &changes {
            if let Some(device) = devices.get(id) {
                info!(
                    "{id}: device temp: {}  target temperature: {}  target fan speed: {speed}",
                    device.temperature, settings.ramp.target_temperature
                );
            }
        }
    }

    gateway
        .apply_fan_speed_changes(&changes)
        .await
        .context("Failed to apply fan speed changes")?;
    Ok(changes)
}

/// One steady-state control pass over a fresh snapshot.
///
/// A failing command is logged and does not stop the other devices; its
/// cached state stays untouched so the next tick tries again.
pub async fn run_tick(
    gateway: &mut dyn DeviceGateway,
    devices: &DeviceMap,
    settings: &ControlSettings,
    state: &mut ControlState,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    for device in devices.values() {
        if settings.is_ignored(device.id) {
            continue;
        }

        match regulate_device(gateway, device, settings, state, false).await {
            Ok(PowerDecision::Hold) => {}
            Ok(decision) => {
                outcome.power.insert(device.id, decision);
            }
            Err(e) => error!("{e:#}"),
        }

        if device.has_fan {
            state
                .speeds
                .set(device.id, settings.ramp.speed_for(device.temperature));

            if let Err(e) = ensure_fan_control(gateway, &mut state.fan_states, device.id, true).await
            {
                error!("{e:#}");
            }
        }
    }

    match adjust_fan_speeds(gateway, devices, settings, state).await {
        Ok(changes) => outcome.fan_changes = changes,
        Err(e) => error!("{e:#}"),
    }

    outcome
}
