//! Application entry point and builder pattern implementation.

use anyhow::{Result, anyhow};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    config::{ConfigManager, RuntimePaths},
    coordinator::SystemCoordinator,
    event::Event,
    instance_lock::{ProcFs, ProcessProbe},
    providers::{GatewayProvider, NvidiaGatewayProvider},
};

/// Main application structure that wires the coordinator together.
///
/// # Example
///
/// ```no_run
/// use gpu_thermald::{application::Application, config::ConfigManager, event::EventBus};
///
/// # async fn example() -> anyhow::Result<()> {
/// let (bus, events) = EventBus::new();
/// let mut app = Application::builder()
///     .with_config_manager(ConfigManager::load(None)?)
///     .build()?;
///
/// app.run(events).await?;
/// # drop(bus);
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the daemon lifecycle until a shutdown event arrives.
    pub async fn run(&mut self, events: UnboundedReceiver<Event>) -> Result<()> {
        self.coordinator.initialize().await?;
        self.coordinator.run_main_loop(events).await
    }
}

/// Builder for [`Application`]. Only the configuration manager is required;
/// everything else defaults to the production components.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    paths: RuntimePaths,
    gateway_provider: Option<GatewayProvider>,
    probe: Option<Box<dyn ProcessProbe>>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
            paths: RuntimePaths::default(),
            gateway_provider: None,
            probe: None,
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn with_paths(mut self, paths: RuntimePaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_gateway_provider(mut self, provider: GatewayProvider) -> Self {
        self.gateway_provider = Some(provider);
        self
    }

    pub fn with_process_probe(mut self, probe: Box<dyn ProcessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;

        let gateway_provider = self.gateway_provider.unwrap_or_else(|| {
            Box::new(NvidiaGatewayProvider::new(
                config_manager.policy(),
                &self.paths,
            ))
        });
        let probe = self.probe.unwrap_or_else(|| Box::new(ProcFs::default()));

        Ok(Application {
            coordinator: SystemCoordinator::new(config_manager, self.paths, gateway_provider, probe),
        })
    }
}
