use std::collections::{BTreeMap, BTreeSet};

use crate::device::DeviceId;

pub const NVIDIA_SETTINGS: &str = "/usr/bin/nvidia-settings";
pub const NVIDIA_SMI: &str = "/usr/bin/nvidia-smi";

const FAN_SPEED_ATTRIBUTE: &str = "GPUTargetFanSpeed";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    QueryFans,
    QueryFanSpeeds { fans: Vec<DeviceId> },
    SetFanControlState { gpu: DeviceId, manual: bool },
    SetFanSpeeds { speeds: BTreeMap<DeviceId, u8> },
    SetPowerLimit { gpu: DeviceId, watts: f64 },
}

impl Command {
    pub fn program(&self) -> &'static str {
        match self {
            Command::SetPowerLimit { .. } => NVIDIA_SMI,
            _ => NVIDIA_SETTINGS,
        }
    }

    /// nvidia-settings talks to the X server and needs `DISPLAY`.
    pub fn needs_display(&self) -> bool {
        self.program() == NVIDIA_SETTINGS
    }

    /// Queries are parsed, so their output is always captured.
    pub fn reads_output(&self) -> bool {
        matches!(self, Command::QueryFans | Command::QueryFanSpeeds { .. })
    }

    pub fn to_args(&self) -> Vec<String> {
        match self {
            Command::QueryFans => vec!["-q".into(), "fans".into()],
            Command::QueryFanSpeeds { fans } => fans
                .iter()
                .flat_map(|fan| ["-q".to_string(), format!("[fan:{fan}]/{FAN_SPEED_ATTRIBUTE}")])
                .collect(),
            Command::SetFanControlState { gpu, manual } => vec![
                "-a".into(),
                format!("[gpu:{gpu}]/GPUFanControlState={}", u8::from(*manual)),
            ],
            Command::SetFanSpeeds { speeds } => speeds
                .iter()
                .flat_map(|(fan, speed)| {
                    ["-a".to_string(), format!("[fan:{fan}]/{FAN_SPEED_ATTRIBUTE}={speed}")]
                })
                .collect(),
            Command::SetPowerLimit { gpu, watts } => vec![
                "-i".into(),
                gpu.to_string(),
                format!("--power-limit={}", watts.trunc() as i64),
            ],
        }
    }
}

/// GPUs owning a fan according to `nvidia-settings -q fans`.
///
/// Fan entries look like `[0] host:0[fan:0] (FAN-0)`, sometimes with the
/// `FAN-` label on the following line. Fan `N` belongs to GPU `N`.
pub fn parse_fan_owners(output: &str) -> BTreeSet<DeviceId> {
    let mut owners = BTreeSet::new();
    let mut current = None;

    for line in output.lines() {
        let trimmed = line.trim_start();
        if let Some(index) = leading_index(trimmed) {
            current = Some(index);
            if trimmed.contains("FAN-") {
                owners.insert(index);
            }
        } else if trimmed.starts_with("FAN-") {
            if let Some(index) = current {
                owners.insert(index);
            }
        }
    }
    owners
}

fn leading_index(line: &str) -> Option<DeviceId> {
    let rest = line.strip_prefix('[')?;
    let (digits, _) = rest.split_once(']')?;
    digits.parse().ok()
}

/// Fan speeds from a batch of `-q [fan:N]/GPUTargetFanSpeed` queries.
///
/// Each answer reads `Attribute 'GPUTargetFanSpeed' (host:0[fan:N]): 45.`;
/// answers without a `[fan:N]` tag are matched to `queried` by position.
pub fn parse_fan_speeds(output: &str, queried: &[DeviceId]) -> BTreeMap<DeviceId, u8> {
    output
        .split("Attribute")
        .filter(|chunk| chunk.contains(FAN_SPEED_ATTRIBUTE))
        .filter_map(|chunk| {
            let (head, tail) = chunk.split_once("):")?;
            let digits: String = tail
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            let speed = digits.parse::<u8>().ok()?;
            Some((fan_tag(head), speed))
        })
        .enumerate()
        .filter_map(|(position, (tag, speed))| {
            tag.or_else(|| queried.get(position).copied())
                .map(|fan| (fan, speed))
        })
        .collect()
}

fn fan_tag(head: &str) -> Option<DeviceId> {
    let (_, rest) = head.split_once("[fan:")?;
    let (digits, _) = rest.split_once(']')?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fan_speed_batch_args() {
        let cmd = Command::SetFanSpeeds {
            speeds: BTreeMap::from([(0, 60), (2, 35)]),
        };
        assert_eq!(
            cmd.to_args(),
            vec![
                "-a",
                "[fan:0]/GPUTargetFanSpeed=60",
                "-a",
                "[fan:2]/GPUTargetFanSpeed=35"
            ]
        );
        assert!(cmd.needs_display());
    }

    #[test]
    fn power_limit_args_truncate_watts() {
        let cmd = Command::SetPowerLimit { gpu: 1, watts: 170.9 };
        assert_eq!(cmd.program(), NVIDIA_SMI);
        assert_eq!(cmd.to_args(), vec!["-i", "1", "--power-limit=170"]);
        assert!(!cmd.needs_display());
    }

    #[test]
    fn control_state_args() {
        let cmd = Command::SetFanControlState { gpu: 3, manual: true };
        assert_eq!(cmd.to_args(), vec!["-a", "[gpu:3]/GPUFanControlState=1"]);
        assert!(!cmd.reads_output());
    }

    #[test]
    fn parse_fans_inline_and_split_labels() {
        let output = "\n2 Fans on host:0\n\n    [0] host:0[fan:0] (FAN-0)\n    [2]\n      FAN-2\n    [3] host:0[gpu:3]\n";
        assert_eq!(parse_fan_owners(output), BTreeSet::from([0, 2]));
    }

    #[test]
    fn parse_speeds_by_tag() {
        let output = "\n  Attribute 'GPUTargetFanSpeed' (host:0[fan:0]): 45.\n  Attribute 'GPUTargetFanSpeed' (host:0[fan:2]):\n    71.\n";
        assert_eq!(
            parse_fan_speeds(output, &[0, 2]),
            BTreeMap::from([(0, 45), (2, 71)])
        );
    }

    #[test]
    fn parse_speeds_by_position_without_tags() {
        let output = "Attribute 'GPUTargetFanSpeed' (host:0): 30.\nAttribute 'GPUTargetFanSpeed' (host:0): 55.\n";
        assert_eq!(
            parse_fan_speeds(output, &[1, 4]),
            BTreeMap::from([(1, 30), (4, 55)])
        );
    }

    #[test]
    fn parse_speeds_ignores_errors() {
        let output = "ERROR: Error querying attribute 'GPUTargetFanSpeed' specified in query '[fan:9]/GPUTargetFanSpeed'; 'GPUTargetFanSpeed' cannot be queried.\n";
        assert!(parse_fan_speeds(output, &[9]).is_empty());
    }
}
