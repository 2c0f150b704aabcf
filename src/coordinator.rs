//! Daemon lifecycle: single-instance lock, discovery, self-test, the
//! monitoring loop and the safe shutdown.

use std::{ops::ControlFlow, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::{self, MissedTickBehavior},
};
use tokio_stream::{StreamExt, wrappers::IntervalStream};

use crate::{
    config::{ConfigManager, RuntimePaths},
    device::DeviceMap,
    engine::{ControlSettings, ControlState, TickOutcome, ensure_fan_control, regulate_device, run_tick},
    event::Event,
    gateway::DeviceGateway,
    instance_lock::{PidFile, ProcessProbe},
    providers::GatewayProvider,
};

/// Time between two monitoring ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Every n-th tick also re-reads the fan speeds.
pub const FULL_REFRESH_EVERY: u64 = 10;

/// Fan speed every fan is left at when the daemon exits.
pub const SHUTDOWN_FAN_SPEED: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Discover,
    SelfTest,
    Monitoring,
    Shutdown,
}

/// Drives the daemon from startup to shutdown.
///
/// Owns the device gateway and all cross-tick control state. Events are only
/// looked at between ticks, so a tick always runs to completion.
pub struct SystemCoordinator {
    config: ConfigManager,
    paths: RuntimePaths,
    gateway_provider: GatewayProvider,
    probe: Box<dyn ProcessProbe>,
    state: LifecycleState,
    pid_file: Option<PidFile>,
    gateway: Option<Box<dyn DeviceGateway>>,
    devices: DeviceMap,
    settings: ControlSettings,
    control: ControlState,
}

impl SystemCoordinator {
    pub fn new(
        config: ConfigManager,
        paths: RuntimePaths,
        gateway_provider: GatewayProvider,
        probe: Box<dyn ProcessProbe>,
    ) -> Self {
        let settings = ControlSettings::from_policy(config.policy(), &paths.override_dir);
        Self {
            config,
            paths,
            gateway_provider,
            probe,
            state: LifecycleState::Init,
            pid_file: None,
            gateway: None,
            devices: DeviceMap::new(),
            settings,
            control: ControlState::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn control_state(&self) -> &ControlState {
        &self.control
    }

    /// Takes the instance lock, discovers devices and runs the self-test.
    ///
    /// Any failure is fatal. When the lock is held by another process no
    /// device is touched.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing SystemCoordinator...");
        self.state = LifecycleState::Init;
        self.pid_file = Some(PidFile::acquire(&self.paths.pid_file, self.probe.as_ref())?);

        if let Err(e) = self.bring_up().await {
            if let Some(pid_file) = self.pid_file.take() {
                pid_file.release();
            }
            return Err(e);
        }

        self.state = LifecycleState::Monitoring;
        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn bring_up(&mut self) -> Result<()> {
        self.state = LifecycleState::Discover;
        let mut gateway = self
            .gateway_provider
            .provide()
            .await
            .context("Failed to initialize device gateway")?;

        gateway.discover().await.context("Device discovery failed")?;
        self.devices = gateway
            .refresh(true)
            .await
            .context("Initial device refresh failed")?;
        self.control = ControlState::seeded(&self.devices);
        self.gateway = Some(gateway);

        self.state = LifecycleState::SelfTest;
        self.self_test().await
    }

    /// Takes manual fan control and asserts the desired power limit on every
    /// managed device.
    async fn self_test(&mut self) -> Result<()> {
        let gateway = self
            .gateway
            .as_deref_mut()
            .ok_or_else(|| anyhow!("Device gateway not initialized"))?;

        for device in self.devices.values() {
            if self.settings.is_ignored(device.id) {
                info!("device {}: ignored", device.id);
                continue;
            }

            ensure_fan_control(gateway, &mut self.control.fan_states, device.id, true)
                .await
                .context("Self-test failed")?;
            regulate_device(gateway, device, &self.settings, &mut self.control, true)
                .await
                .context("Self-test failed")?;
        }
        Ok(())
    }

    /// Ticks until a shutdown is requested.
    pub async fn run_main_loop(&mut self, mut events: UnboundedReceiver<Event>) -> Result<()> {
        let mut interval = time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);
        let mut index: u64 = 0;

        info!("Starting main event loop");
        loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("Event channel closed, shutting down");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_event(event).await?.is_break() {
                        break;
                    }
                }

                Some(_) = ticks.next() => {
                    self.tick(index).await;
                    index = index.wrapping_add(1);
                }
            }
        }

        info!("Main event loop terminated");
        Ok(())
    }

    /// Runs one monitoring pass. Returns `None` when the refresh failed.
    pub async fn tick(&mut self, index: u64) -> Option<TickOutcome> {
        let outcome = match self.gateway.as_deref_mut() {
            Some(gateway) => match gateway.refresh(index % FULL_REFRESH_EVERY == 0).await {
                Ok(devices) => {
                    self.devices = devices;
                    let outcome =
                        run_tick(gateway, &self.devices, &self.settings, &mut self.control).await;
                    debug!("tick {index}: {outcome:?}");
                    Some(outcome)
                }
                Err(e) => {
                    warn!("Skipping tick {index}: {e:#}");
                    None
                }
            },
            None => None,
        };

        if self.config.policy().automatically_reload_config_on_change {
            match self.config.reload_if_changed() {
                Ok(true) => self.apply_policy(),
                Ok(false) => {}
                Err(e) => error!("Failed to reload config, keeping the previous policy: {e:#}"),
            }
        }
        outcome
    }

    /// Handles one control event. `Break` ends the main loop.
    pub async fn handle_event(&mut self, event: Event) -> Result<ControlFlow<()>> {
        match event {
            Event::Reload => {
                info!("Processing Reload event");
                if let Err(e) = self.reload() {
                    error!("{e:#}");
                    self.shutdown().await;
                    return Err(e);
                }
                Ok(ControlFlow::Continue(()))
            }
            Event::Shutdown => {
                info!("Processing Shutdown event");
                self.shutdown().await;
                Ok(ControlFlow::Break(()))
            }
        }
    }

    /// Re-reads the policy file on request.
    pub fn reload(&mut self) -> Result<()> {
        self.config
            .reload()
            .context("Failed to reload configuration")?;
        self.apply_policy();
        Ok(())
    }

    fn apply_policy(&mut self) {
        let policy = self.config.policy();
        self.settings = ControlSettings::from_policy(policy, &self.paths.override_dir);
        if let Some(gateway) = self.gateway.as_deref_mut() {
            gateway.set_display(policy.xorg_display_no);
        }
        info!(
            "Policy applied: target {}C, ratio {}, limit {}C",
            policy.target_temperature,
            policy.fan_speed_temperature_ratio,
            policy.temperature_limit()
        );
    }

    /// Leaves the hardware in a safe state and releases the instance lock.
    ///
    /// Best effort: failures are logged and the remaining steps still run.
    pub async fn shutdown(&mut self) {
        info!("Shutting down, restoring safe defaults");
        self.state = LifecycleState::Shutdown;

        if let Some(gateway) = self.gateway.as_deref_mut() {
            if let Err(e) = gateway.set_all_fans(SHUTDOWN_FAN_SPEED).await {
                error!("Failed to set fans to {SHUTDOWN_FAN_SPEED}%: {e:#}");
            }

            for device in self.devices.values() {
                let Some(default) = device.default_power_limit else {
                    continue;
                };
                if let Err(e) = gateway.set_power_limit(device.id, default).await {
                    error!("device {}: failed to restore power limit: {e:#}", device.id);
                }
            }
        }

        if let Some(pid_file) = self.pid_file.take() {
            pid_file.release();
        }
    }
}
