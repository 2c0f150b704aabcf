use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::RuntimePaths;

/// gpu_thermald: fan and power-limit protection daemon for NVIDIA GPUs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML policy file (default: $GPU_THERMALD_CONFIG or /etc/gpustatd.conf)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Only log warnings and errors
    #[arg(short = 's', long = "silent", default_value = "false")]
    pub silent: bool,

    /// Single-instance pid file (default: /var/run/gpustatd/gpustatd.pid)
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Directory for per-device snapshots (default: /var/run/gpustatd)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Directory with `<id>.powerlimit` overrides (default: /var/run/minotaur)
    #[arg(long = "override-dir")]
    pub override_dir: Option<PathBuf>,
}

impl Cli {
    pub fn runtime_paths(&self) -> RuntimePaths {
        let defaults = RuntimePaths::default();
        RuntimePaths {
            pid_file: self.pid_file.clone().unwrap_or(defaults.pid_file),
            data_dir: self.data_dir.clone().unwrap_or(defaults.data_dir),
            override_dir: self.override_dir.clone().unwrap_or(defaults.override_dir),
        }
    }

    /// Log level before the policy is known.
    pub fn log_level(&self) -> LevelFilter {
        if self.silent {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }

    /// Log level once the policy has been read.
    pub fn log_level_for(&self, debug: bool) -> LevelFilter {
        match (self.silent, debug) {
            (true, _) => LevelFilter::Warn,
            (false, true) => LevelFilter::Debug,
            (false, false) => LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_runtime_paths() {
        let cli = Cli::try_parse_from(["gpu_thermald"]).unwrap();
        assert!(!cli.daemonize);
        assert_eq!(cli.runtime_paths(), RuntimePaths::default());
        assert_eq!(cli.log_level(), LevelFilter::Info);
    }

    #[test]
    fn paths_can_be_overridden() {
        let cli = Cli::try_parse_from([
            "gpu_thermald",
            "--config",
            "/tmp/policy.yml",
            "--pid-file",
            "/tmp/run/gt.pid",
            "--override-dir",
            "/tmp/overrides",
            "-d",
        ])
        .unwrap();

        let paths = cli.runtime_paths();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/policy.yml")));
        assert_eq!(paths.pid_file, PathBuf::from("/tmp/run/gt.pid"));
        assert_eq!(paths.data_dir, RuntimePaths::default().data_dir);
        assert_eq!(paths.override_dir, PathBuf::from("/tmp/overrides"));
        assert!(cli.daemonize);
    }

    #[test]
    fn silent_wins_over_debug() {
        let cli = Cli::try_parse_from(["gpu_thermald", "--silent"]).unwrap();
        assert_eq!(cli.log_level_for(true), LevelFilter::Warn);

        let cli = Cli::try_parse_from(["gpu_thermald"]).unwrap();
        assert_eq!(cli.log_level_for(true), LevelFilter::Debug);
    }
}
