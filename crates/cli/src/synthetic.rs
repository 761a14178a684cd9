// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! A platform whose guest is described by a YAML title manifest.
//!
//! Every manifest thread is pinned to one core. It retires `cycles_per_run`
//! cycles per dispatch, `runs_per_frame` times, then blocks until the
//! periodic `vblank` event wakes it again. Cores without a thread idle.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tandem_core::kernel::ProcessInfo;
use tandem_core::timing::{Timer, Timing, BASE_CLOCK_RATE_ARM11};
use tandem_core::{
    AppLoader, CpuCore, DeliverArg, EmuError, EmuResult, Kernel, LoaderError, MemoryMode,
    NewHardwareCapabilities, Platform, PluginLoaderContext, Services, Settings, Subsystem,
    ThreadId, ThreadManager,
};
use tracing::{debug, warn};

pub const MAX_CORES: usize = 4;

/// One frame at 60 Hz on the base clock.
pub const DEFAULT_FRAME_PERIOD: u64 = BASE_CLOCK_RATE_ARM11 / 60;

pub fn parse_program_id(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid program id '{}': {}", s, e))
    } else {
        trimmed
            .parse::<u64>()
            .map_err(|e| format!("Invalid program id '{}': {}", s, e))
    }
}

fn deserialize_program_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) => parse_program_id(&text).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestLoadError {
    Encrypted,
    InvalidFormat,
    GbaTitle,
}

impl From<ManifestLoadError> for LoaderError {
    fn from(e: ManifestLoadError) -> Self {
        match e {
            ManifestLoadError::Encrypted => LoaderError::Encrypted,
            ManifestLoadError::InvalidFormat => LoaderError::InvalidFormat,
            ManifestLoadError::GbaTitle => LoaderError::GbaTitle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadSpec {
    pub core: usize,
    pub cycles_per_run: u64,
    #[serde(default = "default_runs_per_frame")]
    pub runs_per_frame: u64,
}

fn default_runs_per_frame() -> u64 {
    1
}

impl ThreadSpec {
    pub fn frame_budget(&self) -> u64 {
        self.cycles_per_run.saturating_mul(self.runs_per_frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleManifest {
    pub name: String,
    #[serde(deserialize_with = "deserialize_program_id")]
    pub program_id: u64,
    #[serde(default)]
    pub memory_mode: MemoryMode,
    #[serde(default)]
    pub new_hardware_capabilities: NewHardwareCapabilities,
    #[serde(default = "default_frame_period")]
    pub frame_period: u64,
    /// Parameter handed to the title on its first boot.
    #[serde(default)]
    pub deliver_arg: Option<String>,
    #[serde(default)]
    pub threads: Vec<ThreadSpec>,
    /// Make the loader fail the way a broken image would.
    #[serde(default)]
    pub load_error: Option<ManifestLoadError>,
}

fn default_frame_period() -> u64 {
    DEFAULT_FRAME_PERIOD
}

impl TitleManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read title manifest {:?}", path.as_ref()))?;
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse title manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_period == 0 {
            bail!("frame_period must be non-zero");
        }
        for (i, thread) in self.threads.iter().enumerate() {
            if thread.core >= MAX_CORES {
                bail!(
                    "thread {} is pinned to core {}, but only {} cores exist",
                    i,
                    thread.core,
                    MAX_CORES
                );
            }
            if thread.cycles_per_run == 0 {
                bail!("thread {} has a zero cycles_per_run", i);
            }
            if self.threads[..i].iter().any(|t| t.core == thread.core) {
                bail!("core {} has more than one thread", thread.core);
            }
        }
        Ok(())
    }

    pub fn thread_on(&self, core: usize) -> Option<&ThreadSpec> {
        self.threads.iter().find(|t| t.core == core)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CoreWork {
    budget: u64,
    executed: u64,
}

type SharedWork = Arc<Mutex<[CoreWork; MAX_CORES]>>;

fn lock(work: &SharedWork) -> MutexGuard<'_, [CoreWork; MAX_CORES]> {
    work.lock().unwrap_or_else(|e| e.into_inner())
}

struct SyntheticThreadManager {
    core: usize,
    thread: Option<ThreadSpec>,
    work: SharedWork,
}

impl ThreadManager for SyntheticThreadManager {
    fn current_thread(&self) -> Option<ThreadId> {
        (lock(&self.work)[self.core].budget > 0).then_some(self.core as ThreadId + 1)
    }

    fn reschedule(&mut self) {}

    fn wake(&mut self) {
        if let Some(thread) = &self.thread {
            lock(&self.work)[self.core].budget = thread.frame_budget();
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "budget": lock(&self.work)[self.core].budget })
    }

    fn restore(&mut self, state: &serde_json::Value) -> EmuResult<()> {
        let budget = state["budget"]
            .as_u64()
            .ok_or_else(|| EmuError::Collaborator("thread state without budget".into()))?;
        lock(&self.work)[self.core].budget = budget;
        Ok(())
    }
}

struct SyntheticCore {
    core: usize,
    cycles_per_run: u64,
    work: SharedWork,
}

impl CpuCore for SyntheticCore {
    fn run(&mut self, timer: &mut Timer) {
        while timer.downcount() > 0 {
            let mut work = lock(&self.work);
            let slot = &mut work[self.core];
            let chunk = slot
                .budget
                .min(self.cycles_per_run)
                .min(timer.downcount() as u64);
            if chunk == 0 {
                break;
            }
            slot.budget -= chunk;
            slot.executed += chunk;
            drop(work);
            timer.add_ticks(chunk);
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "executed": lock(&self.work)[self.core].executed })
    }

    fn restore(&mut self, state: &serde_json::Value) -> EmuResult<()> {
        lock(&self.work)[self.core].executed = state["executed"].as_u64().unwrap_or(0);
        Ok(())
    }
}

struct SyntheticLoader {
    manifest: TitleManifest,
    mode_override: Option<MemoryMode>,
}

impl AppLoader for SyntheticLoader {
    fn read_program_id(&mut self) -> Result<u64, LoaderError> {
        Ok(self.manifest.program_id)
    }

    fn load_kernel_memory_mode(&mut self) -> Result<MemoryMode, LoaderError> {
        Ok(self.mode_override.unwrap_or(self.manifest.memory_mode))
    }

    fn load_new_hardware_capabilities(&mut self) -> NewHardwareCapabilities {
        self.manifest.new_hardware_capabilities
    }

    fn set_kernel_memory_mode_override(&mut self, mode: MemoryMode) {
        self.mode_override = Some(mode);
    }

    fn load(&mut self, kernel: &mut Kernel) -> Result<(), LoaderError> {
        if let Some(e) = self.manifest.load_error {
            return Err(e.into());
        }
        kernel.set_current_process(ProcessInfo {
            program_id: self.manifest.program_id,
            name: self.manifest.name.clone(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct SyntheticServices {
    deliver_arg: Option<DeliverArg>,
    plugin_context: Option<PluginLoaderContext>,
}

impl Services for SyntheticServices {
    fn receive_deliver_arg(&mut self) -> Option<DeliverArg> {
        self.deliver_arg.take()
    }

    fn set_deliver_arg(&mut self, arg: DeliverArg) {
        self.deliver_arg = Some(arg);
    }

    fn plugin_loader_context(&self) -> Option<PluginLoaderContext> {
        self.plugin_context.clone()
    }

    fn set_plugin_loader_context(&mut self, context: PluginLoaderContext) {
        self.plugin_context = Some(context);
    }

    fn configure_plugin_loader(&mut self, enabled: bool, allow_game_change_state: bool) {
        let context = self.plugin_context.get_or_insert_with(Default::default);
        context.is_enabled = enabled;
        context.allow_game_change_state = allow_game_change_state;
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "deliver_arg": self.deliver_arg })
    }

    fn restore(&mut self, state: &serde_json::Value) -> EmuResult<()> {
        self.deliver_arg = serde_json::from_value(state["deliver_arg"].clone())?;
        Ok(())
    }
}

/// Counts vblanks so the host can pace its frame statistics.
struct Display {
    frames: Arc<AtomicU64>,
}

impl Subsystem for Display {
    fn name(&self) -> &str {
        "display"
    }

    fn snapshot(&self) -> EmuResult<serde_json::Value> {
        Ok(json!({ "frames": self.frames.load(Ordering::SeqCst) }))
    }

    fn restore(&mut self, state: &serde_json::Value) -> EmuResult<()> {
        let frames = state["frames"].as_u64().unwrap_or(0);
        self.frames.store(frames, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SyntheticPlatform {
    manifest_path: PathBuf,
    manifest: TitleManifest,
    work: SharedWork,
    frames: Arc<AtomicU64>,
    first_boot_arg: Option<DeliverArg>,
}

impl SyntheticPlatform {
    pub fn new(manifest_path: PathBuf, manifest: TitleManifest) -> Self {
        let first_boot_arg = manifest.deliver_arg.as_ref().map(|param| DeliverArg {
            param: param.as_bytes().to_vec(),
            hmac: Vec::new(),
            source_program_id: manifest.program_id,
        });
        Self {
            manifest_path,
            manifest,
            work: SharedWork::default(),
            frames: Arc::new(AtomicU64::new(0)),
            first_boot_arg,
        }
    }

    /// Number of vblanks the guest has seen.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }
}

impl Platform for SyntheticPlatform {
    fn open_loader(&mut self, path: &Path) -> Option<Box<dyn AppLoader>> {
        let manifest = if path == self.manifest_path {
            self.manifest.clone()
        } else {
            match TitleManifest::from_file(path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("No loader for {:?}: {:#}", path, e);
                    return None;
                }
            }
        };
        Some(Box::new(SyntheticLoader {
            manifest,
            mode_override: None,
        }))
    }

    fn create_cpu_core(&mut self, id: usize) -> Box<dyn CpuCore> {
        let cycles_per_run = self.manifest.thread_on(id).map_or(1, |t| t.cycles_per_run);
        Box::new(SyntheticCore {
            core: id,
            cycles_per_run,
            work: Arc::clone(&self.work),
        })
    }

    fn create_thread_manager(&mut self, id: usize) -> Box<dyn ThreadManager> {
        let thread = self.manifest.thread_on(id).cloned();
        lock(&self.work)[id] = CoreWork {
            budget: thread.as_ref().map_or(0, ThreadSpec::frame_budget),
            executed: 0,
        };
        Box::new(SyntheticThreadManager {
            core: id,
            thread,
            work: Arc::clone(&self.work),
        })
    }

    fn create_services(&mut self, _timing: &mut Timing) -> EmuResult<Box<dyn Services>> {
        Ok(Box::new(SyntheticServices {
            deliver_arg: self.first_boot_arg.take(),
            plugin_context: None,
        }))
    }

    fn create_subsystems(
        &mut self,
        timing: &mut Timing,
        _settings: &Settings,
    ) -> EmuResult<Vec<Box<dyn Subsystem>>> {
        self.frames.store(0, Ordering::SeqCst);
        let period = self.manifest.frame_period;
        let frames = Arc::clone(&self.frames);
        let vblank = timing.register_event("vblank", move |ctx, userdata, cycles_late| {
            let frame = frames.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("vblank {} ({} cycles late)", frame, cycles_late);
            for core in 0..ctx.kernel.num_cores() {
                ctx.kernel.thread_manager_mut(core).wake();
            }
            if let Some(me) = ctx.timing.event_type("vblank") {
                ctx.timing
                    .schedule_event(period.saturating_sub(cycles_late), &me, userdata);
            }
            ctx.prepare_reschedule();
        })?;
        timing.schedule_event(period, &vblank, 0);

        Ok(vec![Box::new(Display {
            frames: Arc::clone(&self.frames),
        })])
    }
}
