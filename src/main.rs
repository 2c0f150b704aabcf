use std::fs::File;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use gpu_thermald::{
    application::Application, cli::Cli, config::ConfigManager, event::EventBus,
    signals::SignalListener,
};

fn init_log(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "gpu_thermald".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/gpu_thermald.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn start(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config.clone())?;
    log::set_max_level(cli.log_level_for(config_manager.policy().debug));

    if cli.daemonize {
        into_daemon()?;
    }

    // The runtime and the signal thread must be created after the fork.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let (bus, events) = EventBus::new();
        let _signals = SignalListener::spawn(bus)?;

        Application::builder()
            .with_config_manager(config_manager)
            .with_paths(cli.runtime_paths())
            .build()?
            .run(events)
            .await
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.log_level())?;

    info!("gpu_thermald {} starting", env!("CARGO_PKG_VERSION"));
    start(cli).inspect_err(|e| error!("{e:#}"))
}
