// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::System;
use crate::snapshot::{SystemSnapshot, SNAPSHOT_VERSION};
use crate::{EmuError, EmuResult};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

impl System {
    /// Capture the running session.
    pub fn snapshot(&self) -> EmuResult<SystemSnapshot> {
        let session = self.session.as_ref().ok_or(EmuError::NotPoweredOn)?;

        let mut subsystems = BTreeMap::new();
        for subsystem in &session.subsystems {
            subsystems.insert(subsystem.name().to_string(), subsystem.snapshot()?);
        }

        Ok(SystemSnapshot {
            version: SNAPSHOT_VERSION,
            num_cores: session.cpu_cores.len(),
            program_id: self.title_id,
            timing: session.timing.snapshot(),
            kernel: session.kernel.snapshot(),
            cores: session.cpu_cores.iter().map(|core| core.snapshot()).collect(),
            services: session.services.snapshot(),
            subsystems,
        })
    }

    pub fn save_state(&mut self, slot: u32) -> EmuResult<()> {
        let snapshot = self.snapshot()?;
        let data = serde_json::to_vec_pretty(&snapshot)?;
        self.save_states.save(self.title_id, slot, &data)?;
        debug!(
            "Saved {} bytes for {:016X} to slot {}",
            data.len(),
            self.title_id,
            slot
        );
        Ok(())
    }

    pub fn load_state(&mut self, slot: u32) -> EmuResult<()> {
        if self.session.is_none() {
            return Err(EmuError::NotPoweredOn);
        }
        let data = self.save_states.load(self.title_id, slot)?;
        let snapshot: SystemSnapshot = serde_json::from_slice(&data)?;
        self.restore(&snapshot)
    }

    /// Rebuild the session from `snapshot`. Everything that can be checked
    /// without touching the running session is checked first. A failure after
    /// teardown leaves the system powered off.
    pub fn restore(&mut self, snapshot: &SystemSnapshot) -> EmuResult<()> {
        if !self.is_powered_on() {
            return Err(EmuError::NotPoweredOn);
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EmuError::SnapshotVersion {
                saved: snapshot.version,
                current: SNAPSHOT_VERSION,
            });
        }
        let current_cores = self.num_cores();
        let saved_counts = [
            snapshot.num_cores,
            snapshot.timing.timers.len(),
            snapshot.kernel.thread_managers.len(),
            snapshot.cores.len(),
        ];
        if let Some(&saved) = saved_counts.iter().find(|&&n| n != current_cores) {
            return Err(EmuError::CoreCountMismatch {
                saved,
                current: current_cores,
            });
        }
        if snapshot.program_id != self.title_id {
            return Err(EmuError::ProgramMismatch {
                saved: snapshot.program_id,
                current: self.title_id,
            });
        }
        let loader = self.app_loader.as_mut().ok_or(EmuError::NotPoweredOn)?;
        let memory_mode = loader.load_kernel_memory_mode()?;
        let hardware = loader.load_new_hardware_capabilities();

        self.shutdown_session(true);
        let restored = self
            .init(memory_mode, hardware, snapshot.num_cores)
            .and_then(|()| self.restore_session(snapshot));
        if let Err(e) = restored {
            error!("Save state restore failed after teardown: {}", e);
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    fn restore_session(&mut self, snapshot: &SystemSnapshot) -> EmuResult<()> {
        let session = self.session.as_mut().ok_or(EmuError::NotPoweredOn)?;

        session.timing.restore(&snapshot.timing)?;
        for (core, state) in session.cpu_cores.iter_mut().zip(&snapshot.cores) {
            core.restore(state)?;
        }
        session.kernel.restore(&snapshot.kernel)?;
        session.services.restore(&snapshot.services)?;
        for subsystem in &mut session.subsystems {
            match snapshot.subsystems.get(subsystem.name()) {
                Some(state) => subsystem.restore(state)?,
                None => warn!("Save state has no data for {}", subsystem.name()),
            }
        }

        session.timing.unlock_event_queue();
        for subsystem in &mut session.subsystems {
            subsystem.sync();
        }
        debug!(
            "Restored {:016X} at tick {}",
            snapshot.program_id,
            session.timing.global_ticks()
        );
        Ok(())
    }
}
