// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::kernel::ProcessInfo;
use crate::{EmuError, EmuResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub executed_ticks: u64,
    pub slice_length: u64,
    pub downcount: i64,
    pub idled_cycles: u64,
    pub downcount_hack: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EventSnapshot {
    pub time: u64,
    pub fifo_order: u64,
    pub userdata: u64,
    /// Registered name of the event type, resolved again on restore.
    pub event_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub timers: Vec<TimerSnapshot>,
    pub events: Vec<EventSnapshot>,
    pub event_fifo_id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KernelSnapshot {
    pub running_core: usize,
    pub current_process: Option<ProcessInfo>,
    pub thread_managers: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub version: u32,
    pub num_cores: usize,
    pub program_id: u64,
    pub timing: TimingSnapshot,
    pub kernel: KernelSnapshot,
    pub cores: Vec<serde_json::Value>,
    pub services: serde_json::Value,
    pub subsystems: BTreeMap<String, serde_json::Value>,
}

/// Backing storage for numbered save-state slots, per title.
pub trait SaveStateStore: Send {
    fn save(&self, title_id: u64, slot: u32, data: &[u8]) -> EmuResult<()>;

    /// Fails with [`EmuError::EmptySlot`] when nothing was saved to `slot`.
    fn load(&self, title_id: u64, slot: u32) -> EmuResult<Vec<u8>>;
}

/// In-memory slots. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<(u64, u32), Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, title_id: u64, slot: u32) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(title_id, slot))
    }
}

impl SaveStateStore for MemoryStore {
    fn save(&self, title_id: u64, slot: u32, data: &[u8]) -> EmuResult<()> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((title_id, slot), data.to_vec());
        Ok(())
    }

    fn load(&self, title_id: u64, slot: u32) -> EmuResult<Vec<u8>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(title_id, slot))
            .cloned()
            .ok_or(EmuError::EmptySlot { slot })
    }
}

/// One JSON file per slot: `<root>/<TITLE_ID>.<SLOT>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn slot_path(&self, title_id: u64, slot: u32) -> PathBuf {
        self.root.join(format!("{:016X}.{:02}.json", title_id, slot))
    }
}

impl SaveStateStore for DirectoryStore {
    fn save(&self, title_id: u64, slot: u32, data: &[u8]) -> EmuResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.slot_path(title_id, slot), data)?;
        Ok(())
    }

    fn load(&self, title_id: u64, slot: u32) -> EmuResult<Vec<u8>> {
        match std::fs::read(self.slot_path(title_id, slot)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EmuError::EmptySlot { slot }),
            Err(e) => Err(e.into()),
        }
    }
}
