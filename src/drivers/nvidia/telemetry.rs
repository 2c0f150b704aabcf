use anyhow::{Context, Result};
use nvml_wrapper::{
    Nvml,
    enum_wrappers::device::{Clock, PerformanceState, TemperatureSensor},
};

use crate::device::{Clocks, Device, DeviceMap, Utilization, short_name};

/// Source of per-device readings that need no X display.
pub trait TelemetrySource: Send + Sync + core::fmt::Debug {
    /// Enumerates devices with their static attributes filled in.
    fn enumerate(&self) -> Result<DeviceMap>;

    /// Updates temperature, power and auxiliary readings in place.
    fn sample(&self, device: &mut Device) -> Result<()>;
}

fn watts(milliwatts: u32) -> f64 {
    f64::from(milliwatts) / 1000.0
}

fn pstate_number(state: PerformanceState) -> Option<u32> {
    use PerformanceState::*;
    let n = match state {
        Zero => 0,
        One => 1,
        Two => 2,
        Three => 3,
        Four => 4,
        Five => 5,
        Six => 6,
        Seven => 7,
        Eight => 8,
        Nine => 9,
        Ten => 10,
        Eleven => 11,
        Twelve => 12,
        Thirteen => 13,
        Fourteen => 14,
        Fifteen => 15,
        Unknown => return None,
    };
    Some(n)
}

pub struct NvmlTelemetry {
    nvml: Nvml,
}

impl core::fmt::Debug for NvmlTelemetry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NvmlTelemetry").finish_non_exhaustive()
    }
}

impl NvmlTelemetry {
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init().context("Failed to initialize NVML")?;
        Ok(Self { nvml })
    }
}

impl TelemetrySource for NvmlTelemetry {
    fn enumerate(&self) -> Result<DeviceMap> {
        let count = self
            .nvml
            .device_count()
            .context("Failed to count NVML devices")?;

        (0..count)
            .map(|index| {
                let gpu = self
                    .nvml
                    .device_by_index(index)
                    .with_context(|| format!("Failed to open device {index}"))?;
                let constraints = gpu
                    .power_management_limit_constraints()
                    .with_context(|| format!("device {index}: power limit constraints unavailable"))?;

                let mut device = Device::new(index, short_name(&gpu.name()?));
                device.min_power_limit = watts(constraints.min_limit);
                device.max_power_limit = watts(constraints.max_limit);
                device.default_power_limit = gpu.power_management_limit_default().ok().map(watts);
                Ok((index, device))
            })
            .collect()
    }

    fn sample(&self, device: &mut Device) -> Result<()> {
        let gpu = self
            .nvml
            .device_by_index(device.id)
            .with_context(|| format!("Failed to open device {}", device.id))?;

        device.temperature = gpu.temperature(TemperatureSensor::Gpu)?;
        device.power_draw = watts(gpu.power_usage()?);
        device.power_limit = watts(gpu.enforced_power_limit()?);

        // Informational only; a card that hides these is still controllable.
        if let Ok(rates) = gpu.utilization_rates() {
            device.utilization = Utilization {
                gpu: rates.gpu,
                memory: rates.memory,
            };
        }
        device.clocks = Clocks {
            graphics_mhz: gpu.clock_info(Clock::Graphics).unwrap_or_default(),
            memory_mhz: gpu.clock_info(Clock::Memory).unwrap_or_default(),
        };
        device.performance_state = gpu.performance_state().ok().and_then(pstate_number);
        Ok(())
    }
}
