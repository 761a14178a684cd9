// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#![allow(dead_code)]

use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::kernel::ThreadId;
use tandem_core::loader::{AppLoader, LoaderError, NewHardwareCapabilities};
use tandem_core::services::{DeliverArg, PluginLoaderContext, Services};
use tandem_core::snapshot::MemoryStore;
use tandem_core::timing::{Timer, Timing};
use tandem_core::{
    CpuCore, DebugServer, EmuError, EmuResult, Kernel, MemoryMode, Platform, Settings, Subsystem,
    System, ThreadManager,
};

pub const MAX_CORES: usize = 4;
pub const GAME: &str = "/titles/game.cci";
pub const GAME_ID: u64 = 0x000400000FF40000;
pub const OTHER_GAME: &str = "/titles/other.cci";
pub const OTHER_GAME_ID: u64 = 0x000400000FF41000;

/// Cycles a mock core consumes per `add_ticks` call.
pub const RUN_CHUNK: u64 = 100;

#[derive(Debug, Default)]
pub struct MockState {
    /// Outstanding cycles per core. A core has a ready thread while this is non-zero.
    pub work: [u64; MAX_CORES],
    /// Cycles added to each core's work on every vblank.
    pub frame_work: [u64; MAX_CORES],
    pub executed: [u64; MAX_CORES],
    pub reschedules: [u32; MAX_CORES],
    pub vblanks: u64,
    pub deliver_arg: Option<DeliverArg>,
    pub plugin_context: Option<PluginLoaderContext>,
    pub memory_mode_override: Option<MemoryMode>,
    pub loads: u32,
    pub input_reloads: u32,
    pub subsystem_settings_applied: u32,
    pub synced: u32,
    pub refuse_savestate: bool,
    pub debug_calls: Vec<String>,
}

pub type SharedState = Arc<Mutex<MockState>>;

pub fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap()
}

pub struct MockThreadManager {
    core: usize,
    state: SharedState,
}

impl ThreadManager for MockThreadManager {
    fn current_thread(&self) -> Option<ThreadId> {
        (lock(&self.state).work[self.core] > 0).then_some(self.core as ThreadId + 1)
    }

    fn reschedule(&mut self) {
        lock(&self.state).reschedules[self.core] += 1;
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "work": lock(&self.state).work[self.core] })
    }

    fn restore(&mut self, state: &serde_json::Value) -> EmuResult<()> {
        let work = state["work"]
            .as_u64()
            .ok_or_else(|| EmuError::Collaborator("thread state without work".into()))?;
        lock(&self.state).work[self.core] = work;
        Ok(())
    }
}

/// Burns its outstanding work in `RUN_CHUNK` pieces until the slice ends.
pub struct MockCore {
    core: usize,
    state: SharedState,
}

impl CpuCore for MockCore {
    fn run(&mut self, timer: &mut Timer) {
        while timer.downcount() > 0 {
            let mut state = lock(&self.state);
            let chunk = state.work[self.core]
                .min(timer.downcount() as u64)
                .min(RUN_CHUNK);
            if chunk == 0 {
                break;
            }
            state.work[self.core] -= chunk;
            state.executed[self.core] += chunk;
            drop(state);
            timer.add_ticks(chunk);
        }
    }
}

pub fn core_parts(
    num_cores: usize,
    state: &SharedState,
) -> (Vec<Box<dyn ThreadManager>>, Vec<Box<dyn CpuCore>>) {
    let managers = (0..num_cores)
        .map(|core| {
            Box::new(MockThreadManager {
                core,
                state: Arc::clone(state),
            }) as Box<dyn ThreadManager>
        })
        .collect();
    let cores = (0..num_cores)
        .map(|core| {
            Box::new(MockCore {
                core,
                state: Arc::clone(state),
            }) as Box<dyn CpuCore>
        })
        .collect();
    (managers, cores)
}

/// Timing, kernel and cores wired to `state`, for driving a scheduler directly.
pub fn scheduler_parts(
    num_cores: usize,
    state: &SharedState,
) -> (Timing, Kernel, Vec<Box<dyn CpuCore>>) {
    let (managers, cores) = core_parts(num_cores, state);
    let kernel = Kernel::new(managers, MemoryMode::Prod, NewHardwareCapabilities::default());
    (Timing::new(num_cores, 100), kernel, cores)
}

#[derive(Debug, Clone)]
pub struct MockTitle {
    pub program_id: u64,
    pub memory_mode: Result<MemoryMode, LoaderError>,
    pub load_error: Option<LoaderError>,
}

impl MockTitle {
    pub fn new(program_id: u64) -> Self {
        Self {
            program_id,
            memory_mode: Ok(MemoryMode::Prod),
            load_error: None,
        }
    }
}

struct MockLoader {
    title: MockTitle,
    mode_override: Option<MemoryMode>,
    state: SharedState,
}

impl AppLoader for MockLoader {
    fn read_program_id(&mut self) -> Result<u64, LoaderError> {
        Ok(self.title.program_id)
    }

    fn load_kernel_memory_mode(&mut self) -> Result<MemoryMode, LoaderError> {
        let mode = self.title.memory_mode.clone()?;
        Ok(self.mode_override.unwrap_or(mode))
    }

    fn set_kernel_memory_mode_override(&mut self, mode: MemoryMode) {
        self.mode_override = Some(mode);
        lock(&self.state).memory_mode_override = Some(mode);
    }

    fn load(&mut self, kernel: &mut Kernel) -> Result<(), LoaderError> {
        if let Some(e) = &self.title.load_error {
            return Err(e.clone());
        }
        kernel.set_current_process(tandem_core::kernel::ProcessInfo {
            program_id: self.title.program_id,
            name: "mock".into(),
        });
        lock(&self.state).loads += 1;
        Ok(())
    }
}

struct MockServices {
    state: SharedState,
}

impl Services for MockServices {
    fn receive_deliver_arg(&mut self) -> Option<DeliverArg> {
        lock(&self.state).deliver_arg.take()
    }

    fn set_deliver_arg(&mut self, arg: DeliverArg) {
        lock(&self.state).deliver_arg = Some(arg);
    }

    fn plugin_loader_context(&self) -> Option<PluginLoaderContext> {
        lock(&self.state).plugin_context.clone()
    }

    fn set_plugin_loader_context(&mut self, context: PluginLoaderContext) {
        lock(&self.state).plugin_context = Some(context);
    }

    fn reload_input_devices(&mut self) {
        lock(&self.state).input_reloads += 1;
    }
}

/// Counts frames and refills every core's work on each vblank.
struct MockGpu {
    state: SharedState,
}

impl Subsystem for MockGpu {
    fn name(&self) -> &str {
        "gpu"
    }

    fn snapshot(&self) -> EmuResult<serde_json::Value> {
        let state = lock(&self.state);
        if state.refuse_savestate {
            return Err(EmuError::SavestateUnsupported("gpu".into()));
        }
        Ok(json!({ "vblanks": state.vblanks }))
    }

    fn restore(&mut self, saved: &serde_json::Value) -> EmuResult<()> {
        lock(&self.state).vblanks = saved["vblanks"].as_u64().unwrap_or(0);
        Ok(())
    }

    fn apply_settings(&mut self, _settings: &Settings) {
        lock(&self.state).subsystem_settings_applied += 1;
    }

    fn sync(&mut self) {
        lock(&self.state).synced += 1;
    }
}

pub struct MockDebugServer {
    state: SharedState,
}

impl DebugServer for MockDebugServer {
    fn defer_start(&mut self) {
        lock(&self.state).debug_calls.push("defer_start".into());
    }

    fn shutdown(&mut self) {
        lock(&self.state).debug_calls.push("shutdown".into());
    }

    fn configure(&mut self, port: u16, enabled: bool) {
        lock(&self.state)
            .debug_calls
            .push(format!("configure:{}:{}", port, enabled));
    }
}

pub struct MockPlatform {
    pub state: SharedState,
    pub titles: HashMap<PathBuf, MockTitle>,
    /// Period of the vblank event in ticks; no vblank when `None`.
    pub vblank_period: Option<u64>,
}

impl MockPlatform {
    pub fn new(state: SharedState) -> Self {
        let mut titles = HashMap::new();
        titles.insert(PathBuf::from(GAME), MockTitle::new(GAME_ID));
        titles.insert(PathBuf::from(OTHER_GAME), MockTitle::new(OTHER_GAME_ID));
        Self {
            state,
            titles,
            vblank_period: Some(4_000),
        }
    }
}

impl Platform for MockPlatform {
    fn open_loader(&mut self, path: &Path) -> Option<Box<dyn AppLoader>> {
        let title = self.titles.get(path)?.clone();
        Some(Box::new(MockLoader {
            title,
            mode_override: None,
            state: Arc::clone(&self.state),
        }))
    }

    fn create_cpu_core(&mut self, id: usize) -> Box<dyn CpuCore> {
        Box::new(MockCore {
            core: id,
            state: Arc::clone(&self.state),
        })
    }

    fn create_thread_manager(&mut self, id: usize) -> Box<dyn ThreadManager> {
        Box::new(MockThreadManager {
            core: id,
            state: Arc::clone(&self.state),
        })
    }

    fn create_services(&mut self, _timing: &mut Timing) -> EmuResult<Box<dyn Services>> {
        Ok(Box::new(MockServices {
            state: Arc::clone(&self.state),
        }))
    }

    fn create_subsystems(
        &mut self,
        timing: &mut Timing,
        _settings: &Settings,
    ) -> EmuResult<Vec<Box<dyn Subsystem>>> {
        if let Some(period) = self.vblank_period {
            let state = Arc::clone(&self.state);
            let vblank = timing.register_event("vblank", move |ctx, _, cycles_late| {
                {
                    let mut state = lock(&state);
                    state.vblanks += 1;
                    let refill = state.frame_work;
                    for (work, extra) in state.work.iter_mut().zip(refill) {
                        *work += extra;
                    }
                }
                if let Some(me) = ctx.timing.event_type("vblank") {
                    ctx.timing
                        .schedule_event(period.saturating_sub(cycles_late), &me, 0);
                }
                ctx.prepare_reschedule();
            })?;
            timing.schedule_event(period, &vblank, 0);
        }
        Ok(vec![Box::new(MockGpu {
            state: Arc::clone(&self.state),
        })])
    }
}

pub struct Harness {
    pub system: System,
    pub state: SharedState,
    pub store: MemoryStore,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        Self::with_platform(settings, |_| {})
    }

    pub fn with_platform(settings: Settings, configure: impl FnOnce(&mut MockPlatform)) -> Self {
        let state = SharedState::default();
        let mut platform = MockPlatform::new(Arc::clone(&state));
        configure(&mut platform);
        let store = MemoryStore::new();
        let system = System::new(Box::new(platform), settings)
            .with_save_state_store(Box::new(store.clone()))
            .with_debug_server(Box::new(MockDebugServer {
                state: Arc::clone(&state),
            }));
        Self {
            system,
            state,
            store,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    pub fn ticks(&self) -> Vec<u64> {
        self.system
            .timing()
            .map(|t| t.timers().iter().map(Timer::ticks).collect())
            .unwrap_or_default()
    }
}

pub fn new_hardware() -> Settings {
    Settings {
        new_hardware: true,
        ..Settings::default()
    }
}
