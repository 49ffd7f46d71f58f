use std::sync::Arc;
use tracing::{debug, info};

use super::backend::{AudioBackend, DeviceDescriptor};
use super::{CaptureError, CaptureResult};

/// How a caller asks for an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The host's default input device
    Default,
    /// Position in the host's device enumeration
    Index(usize),
    /// Case-insensitive fragment of the device name; first match wins
    Name(String),
}

/// Enumerates input devices and resolves selections against a backend.
///
/// Nothing is cached; every call queries the host again.
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceCatalog {
    /// Creates a catalog over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    /// Input-capable devices in enumeration order
    ///
    /// # Errors
    /// Returns error if the host cannot enumerate devices.
    pub fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        let inputs: Vec<DeviceDescriptor> = self
            .backend
            .devices()?
            .into_iter()
            .filter(DeviceDescriptor::is_input)
            .collect();
        info!("found {} input device(s)", inputs.len());
        Ok(inputs)
    }

    /// Device at `index`, which must exist and have input channels
    ///
    /// # Errors
    /// Returns `DeviceNotFound` for a missing or output-only device.
    pub fn resolve_by_index(&self, index: usize) -> CaptureResult<DeviceDescriptor> {
        let device = self
            .backend
            .devices()?
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("no device at index {index}")))?;

        if !device.is_input() {
            return Err(CaptureError::DeviceNotFound(format!(
                "device {index} ({}) is not an input device",
                device.name
            )));
        }
        Ok(device)
    }

    /// First input device whose name contains `fragment`, ignoring case
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if nothing matches.
    pub fn resolve_by_name(&self, fragment: &str) -> CaptureResult<DeviceDescriptor> {
        let needle = fragment.to_lowercase();
        self.enumerate()?
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
            .ok_or_else(|| {
                CaptureError::DeviceNotFound(format!("no microphone matching '{fragment}'"))
            })
    }

    /// The host's default input device
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if the host has no default input.
    pub fn resolve_default(&self) -> CaptureResult<DeviceDescriptor> {
        let index = self
            .backend
            .default_input_index()?
            .ok_or_else(|| CaptureError::DeviceNotFound("no default input device".to_owned()))?;
        debug!(index, "default input device");
        self.resolve_by_index(index)
    }

    /// Resolves any [`DeviceSelector`]
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if the selector matches no input device.
    pub fn resolve(&self, selector: &DeviceSelector) -> CaptureResult<DeviceDescriptor> {
        match selector {
            DeviceSelector::Default => self.resolve_default(),
            DeviceSelector::Index(index) => self.resolve_by_index(*index),
            DeviceSelector::Name(fragment) => self.resolve_by_name(fragment),
        }
    }
}

impl std::fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCatalog").finish_non_exhaustive()
    }
}
