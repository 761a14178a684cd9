// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod frame_limiter;
pub mod kernel;
pub mod loader;
pub mod metrics;
pub mod scheduler;
pub mod services;
pub mod signals;
pub mod snapshot;
pub mod system;
pub mod timing;


pub use frame_limiter::FrameLimiter;
pub use kernel::{Kernel, MemoryMode, ThreadId, ThreadManager};
pub use loader::{AppLoader, LoaderError, NewHardwareCapabilities};
pub use scheduler::{IterationReport, SchedulePath, Scheduler};
pub use services::{DeliverArg, PluginLoaderContext, Services};
pub use signals::{Signal, SignalKind, SignalMailbox, SignalRejected, SignalSender};
pub use system::System;
pub use tandem_config::Settings;
pub use timing::{EventContext, EventType, Timer, Timing};

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("system is not powered on")]
    NotPoweredOn,
    #[error("save state slot {slot} is empty")]
    EmptySlot { slot: u32 },
    #[error("save state has {saved} cores but the running system has {current}")]
    CoreCountMismatch { saved: usize, current: usize },
    #[error("save state format version {saved} is not supported (expected {current})")]
    SnapshotVersion { saved: u32, current: u32 },
    #[error("save state belongs to program {saved:016X}, running program is {current:016X}")]
    ProgramMismatch { saved: u64, current: u64 },
    #[error("{0} does not support save states")]
    SavestateUnsupported(String),
    #[error("timing event type `{0}` is already registered")]
    DuplicateEventType(String),
    #[error("loader error while re-initializing: {0}")]
    Loader(#[from] LoaderError),
    #[error("save state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("save state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("{0}")]
    Collaborator(String),
}

pub type EmuResult<T> = Result<T, EmuError>;

/// Outcome reported to the host by [`System::run_loop`] and [`System::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    ShutdownRequested,
    ErrorGetLoader,
    ErrorSystemMode,
    ErrorLoader,
    ErrorLoaderEncrypted,
    ErrorLoaderInvalidFormat,
    ErrorLoaderGbaTitle,
    ErrorSavestate,
    ErrorUnknown,
}

impl ResultStatus {
    pub fn is_error(self) -> bool {
        !matches!(self, ResultStatus::Success | ResultStatus::ShutdownRequested)
    }
}

/// An emulated application core.
///
/// The instruction engine behind it is opaque to the scheduler; the only
/// contract is that `run` consumes the slice prepared on `timer` through
/// [`Timer::add_ticks`] and returns once the downcount is exhausted or the
/// guest yields.
pub trait CpuCore: Send {
    fn run(&mut self, timer: &mut Timer);

    /// Ask a running engine to leave its dispatch loop at the next opportunity.
    fn prepare_reschedule(&mut self) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore(&mut self, _state: &serde_json::Value) -> EmuResult<()> {
        Ok(())
    }
}

/// A non-CPU piece of emulated hardware (GPU, DSP, ...) owned by the session.
pub trait Subsystem: Send {
    fn name(&self) -> &str;

    fn snapshot(&self) -> EmuResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    fn restore(&mut self, _state: &serde_json::Value) -> EmuResult<()> {
        Ok(())
    }

    fn apply_settings(&mut self, _settings: &Settings) {}

    /// Called once a save state has been fully restored.
    fn sync(&mut self) {}
}

/// Hooks for a remote debugger stub.
pub trait DebugServer: Send {
    /// Arm the server so it starts listening once emulation begins.
    fn defer_start(&mut self);
    fn shutdown(&mut self);
    fn configure(&mut self, port: u16, enabled: bool);
}

/// Factory for the collaborators a session is built from.
pub trait Platform: Send {
    fn open_loader(&mut self, path: &Path) -> Option<Box<dyn AppLoader>>;
    fn create_cpu_core(&mut self, id: usize) -> Box<dyn CpuCore>;
    fn create_thread_manager(&mut self, id: usize) -> Box<dyn ThreadManager>;
    fn create_services(&mut self, timing: &mut Timing) -> EmuResult<Box<dyn Services>>;

    fn create_subsystems(
        &mut self,
        _timing: &mut Timing,
        _settings: &Settings,
    ) -> EmuResult<Vec<Box<dyn Subsystem>>> {
        Ok(Vec::new())
    }
}
