// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::kernel::{Kernel, MemoryMode};
use crate::ResultStatus;
use serde::{Deserialize, Serialize};

/// Extra hardware a title asks for on the 4-core model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewHardwareCapabilities {
    pub enable_l2_cache: bool,
    pub enable_804mhz_cpu: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("application image is encrypted")]
    Encrypted,
    #[error("application image has an invalid format")]
    InvalidFormat,
    #[error("application is a GBA virtual console title")]
    GbaTitle,
    #[error("requested information is not present in the image")]
    NotPresent,
    #[error("{0}")]
    Other(String),
}

impl LoaderError {
    /// Status reported when the memory mode could not be determined.
    pub fn system_mode_status(&self) -> ResultStatus {
        match self {
            LoaderError::Encrypted => ResultStatus::ErrorLoaderEncrypted,
            LoaderError::InvalidFormat => ResultStatus::ErrorLoaderInvalidFormat,
            LoaderError::GbaTitle => ResultStatus::ErrorLoaderGbaTitle,
            _ => ResultStatus::ErrorSystemMode,
        }
    }

    /// Status reported when the application itself failed to load.
    pub fn load_status(&self) -> ResultStatus {
        match self {
            LoaderError::Encrypted => ResultStatus::ErrorLoaderEncrypted,
            LoaderError::InvalidFormat => ResultStatus::ErrorLoaderInvalidFormat,
            LoaderError::GbaTitle => ResultStatus::ErrorLoaderGbaTitle,
            _ => ResultStatus::ErrorLoader,
        }
    }
}

/// Reads an application image and installs it into a freshly built kernel.
pub trait AppLoader: Send {
    fn read_program_id(&mut self) -> Result<u64, LoaderError>;

    fn load_kernel_memory_mode(&mut self) -> Result<MemoryMode, LoaderError>;

    fn load_new_hardware_capabilities(&mut self) -> NewHardwareCapabilities {
        NewHardwareCapabilities::default()
    }

    /// Force the memory mode reported by [`AppLoader::load_kernel_memory_mode`].
    fn set_kernel_memory_mode_override(&mut self, mode: MemoryMode);

    fn load(&mut self, kernel: &mut Kernel) -> Result<(), LoaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            LoaderError::Encrypted.system_mode_status(),
            ResultStatus::ErrorLoaderEncrypted
        );
        assert_eq!(
            LoaderError::NotPresent.system_mode_status(),
            ResultStatus::ErrorSystemMode
        );
        assert_eq!(
            LoaderError::GbaTitle.load_status(),
            ResultStatus::ErrorLoaderGbaTitle
        );
        assert_eq!(
            LoaderError::Other("truncated".into()).load_status(),
            ResultStatus::ErrorLoader
        );
    }
}
