// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::loader::NewHardwareCapabilities;
use crate::snapshot::KernelSnapshot;
use crate::{EmuError, EmuResult};
use serde::{Deserialize, Serialize};

pub type ThreadId = u32;

/// Kernel memory layout selected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    #[default]
    Prod,
    Dev1,
    Dev2,
    Dev3,
    Dev4,
}

/// Guest thread scheduling for one application core.
pub trait ThreadManager: Send {
    /// The thread that would run if the core were entered now.
    fn current_thread(&self) -> Option<ThreadId>;

    /// Re-pick the current thread after wakeups or priority changes.
    fn reschedule(&mut self);

    /// Make blocked threads runnable, typically from a timing callback.
    fn wake(&mut self) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore(&mut self, _state: &serde_json::Value) -> EmuResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub program_id: u64,
    pub name: String,
}

/// The slice of kernel state the run loop depends on.
pub struct Kernel {
    thread_managers: Vec<Box<dyn ThreadManager>>,
    running_core: usize,
    memory_mode: MemoryMode,
    hardware: NewHardwareCapabilities,
    current_process: Option<ProcessInfo>,
}

impl Kernel {
    pub fn new(
        thread_managers: Vec<Box<dyn ThreadManager>>,
        memory_mode: MemoryMode,
        hardware: NewHardwareCapabilities,
    ) -> Self {
        Self {
            thread_managers,
            running_core: 0,
            memory_mode,
            hardware,
            current_process: None,
        }
    }

    pub fn num_cores(&self) -> usize {
        self.thread_managers.len()
    }

    pub fn running_core(&self) -> usize {
        self.running_core
    }

    pub fn set_running_core(&mut self, core: usize) {
        debug_assert!(core < self.thread_managers.len().max(1));
        self.running_core = core;
    }

    pub fn thread_manager(&self, core: usize) -> &dyn ThreadManager {
        self.thread_managers[core].as_ref()
    }

    pub fn thread_manager_mut(&mut self, core: usize) -> &mut dyn ThreadManager {
        self.thread_managers[core].as_mut()
    }

    pub fn has_ready_thread(&self, core: usize) -> bool {
        self.thread_managers
            .get(core)
            .is_some_and(|tm| tm.current_thread().is_some())
    }

    pub fn reschedule_all(&mut self) {
        for tm in &mut self.thread_managers {
            tm.reschedule();
        }
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.memory_mode
    }

    pub fn hardware_capabilities(&self) -> NewHardwareCapabilities {
        self.hardware
    }

    pub fn current_process(&self) -> Option<&ProcessInfo> {
        self.current_process.as_ref()
    }

    pub fn set_current_process(&mut self, process: ProcessInfo) {
        self.current_process = Some(process);
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            running_core: self.running_core,
            current_process: self.current_process.clone(),
            thread_managers: self
                .thread_managers
                .iter()
                .map(|tm| tm.snapshot())
                .collect(),
        }
    }

    pub fn restore(&mut self, state: &KernelSnapshot) -> EmuResult<()> {
        if state.thread_managers.len() != self.thread_managers.len() {
            return Err(EmuError::CoreCountMismatch {
                saved: state.thread_managers.len(),
                current: self.thread_managers.len(),
            });
        }
        for (tm, saved) in self.thread_managers.iter_mut().zip(&state.thread_managers) {
            tm.restore(saved)?;
        }
        self.running_core = state.running_core;
        self.current_process = state.current_process.clone();
        Ok(())
    }
}
