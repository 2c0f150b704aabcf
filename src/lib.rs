//! # gpu_thermald
//!
//! A Linux daemon that keeps NVIDIA GPUs inside safe thermal bounds.
//!
//! ## Features
//!
//! - **Fan Ramp**: fan speed follows the distance to a target temperature
//! - **Power Throttling**: exponential power-limit back-off above a
//!   temperature limit, restored with hysteresis once the card cools down
//! - **Overrides**: per-device desired power limit from `<id>.powerlimit` files
//! - **Snapshots**: per-device YAML state files for external readers
//! - **Hot Reload**: SIGHUP or file modification re-reads the policy
//! - **Safe Shutdown**: SIGINT/SIGTERM leave fans at 85% and default limits
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - lifecycle and tick loop
//! - [`DeviceGateway`](gateway::DeviceGateway) - hardware boundary
//! - [`engine`] - per-tick control decisions over [`ControlState`](engine::ControlState)
//! - [`EventBus`](event::EventBus) - signals delivered to the loop between ticks
//!
//! ## Example
//!
//! ```no_run
//! use gpu_thermald::{application::Application, config::ConfigManager, event::EventBus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let (_bus, events) = EventBus::new();
//!     Application::builder()
//!         .with_config_manager(ConfigManager::load(None)?)
//!         .build()?
//!         .run(events)
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod drivers;
pub mod engine;
pub mod event;
pub mod fan_control;
pub mod fan_curve;
pub mod gateway;
pub mod instance_lock;
pub mod providers;
pub mod signals;
pub mod snapshot;
pub mod throttle;

#[cfg(test)]
mod testing;
