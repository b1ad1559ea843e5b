use candle_core::Device;
use localdex_core::config::DeviceChoice;
use tracing::{info, warn};

/// Device chosen for inference and how it was arrived at.
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub device: Device,
    pub description: String,
    /// Set when an accelerator was tried and failed to initialize.
    pub fallback_reason: Option<String>,
}

impl DeviceSelection {
    pub fn cpu(description: &str) -> Self {
        Self { device: Device::Cpu, description: description.to_string(), fallback_reason: None }
    }

    pub fn is_accelerator(&self) -> bool {
        !self.device.is_cpu()
    }
}

/// Tries the accelerators compiled into this build, then settles on the CPU.
pub fn select_device(choice: DeviceChoice) -> DeviceSelection {
    if choice == DeviceChoice::Cpu {
        return DeviceSelection::cpu("cpu (configured)");
    }
    let mut failures = Vec::new();
    if cfg!(feature = "metal") {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!("embedding device: metal");
                return DeviceSelection { device: dev, description: "metal".into(), fallback_reason: None };
            }
            Err(e) => failures.push(format!("metal: {e}")),
        }
    }
    if cfg!(feature = "cuda") {
        match Device::new_cuda(0) {
            Ok(dev) => {
                info!("embedding device: cuda");
                return DeviceSelection { device: dev, description: "cuda".into(), fallback_reason: None };
            }
            Err(e) => failures.push(format!("cuda: {e}")),
        }
    }
    if failures.is_empty() {
        return DeviceSelection::cpu("cpu");
    }
    let reason = failures.join("; ");
    warn!(reason = %reason, "accelerator unavailable, falling back to cpu");
    DeviceSelection { device: Device::Cpu, description: "cpu (fell back)".into(), fallback_reason: Some(reason) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_cpu_skips_probing() {
        let sel = select_device(DeviceChoice::Cpu);
        assert!(!sel.is_accelerator());
        assert!(sel.fallback_reason.is_none());
    }
}
