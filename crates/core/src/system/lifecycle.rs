// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Session, System};
use crate::kernel::{Kernel, MemoryMode, ThreadManager};
use crate::loader::{LoaderError, NewHardwareCapabilities};
use crate::metrics::{PerfResults, PerfStats};
use crate::scheduler::Scheduler;
use crate::timing::Timing;
use crate::{CpuCore, EmuResult, ResultStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_config::Settings;
use tracing::{debug, error, info, warn};

impl System {
    /// Load the application at `path` and bring up a fresh session for it.
    pub fn load(&mut self, path: impl AsRef<Path>) -> ResultStatus {
        let path = path.as_ref();
        if self.session.is_some() {
            warn!("Loading {:?} over a running session", path);
            self.shutdown_session(false);
        }

        let Some(mut loader) = self.platform.open_loader(path) else {
            error!("Failed to obtain loader for {:?}", path);
            return self.fail_load(
                ResultStatus::ErrorGetLoader,
                format!("no loader recognizes {}", path.display()),
            );
        };

        if let Some(ctx) = &self.restore_plugin_context {
            if ctx.is_enabled && ctx.use_user_load_parameters {
                let program_id = loader.read_program_id().unwrap_or(0);
                if ctx.forces_dev2_for(program_id) {
                    debug!("Plugin requested Dev2 memory layout for {:016X}", program_id);
                    loader.set_kernel_memory_mode_override(MemoryMode::Dev2);
                }
            }
        }

        let memory_mode = match loader.load_kernel_memory_mode() {
            Ok(mode) => mode,
            Err(e) => {
                error!("Failed to determine system mode: {}", e);
                return self.fail_load(e.system_mode_status(), e.to_string());
            }
        };

        let program_id = loader.read_program_id().unwrap_or_else(|e| {
            error!("Failed to find title id for {:?}: {}", path, e);
            0
        });

        let mut settings = self.base_settings.clone();
        self.overrides.apply(program_id, &mut settings);
        self.settings = settings;

        let hardware = loader.load_new_hardware_capabilities();
        let num_cores = self.settings.num_cores();
        if let Err(e) = self.init(memory_mode, hardware, num_cores) {
            error!("Failed to initialize system: {}", e);
            self.shutdown_session(false);
            return self.fail_load(ResultStatus::ErrorUnknown, e.to_string());
        }

        self.apply_carry_over();

        let loaded = match self.session.as_mut() {
            Some(session) => loader.load(&mut session.kernel),
            None => Err(LoaderError::Other("session was not initialized".into())),
        };
        if let Err(e) = loaded {
            error!("Failed to load {:?}: {}", path, e);
            self.shutdown_session(false);
            return self.fail_load(e.load_status(), e.to_string());
        }

        self.title_id = program_id;
        self.app_loader = Some(loader);
        self.perf_stats = Some(Arc::new(PerfStats::new(program_id)));
        self.status = ResultStatus::Success;
        self.status_details.clear();
        self.filepath = Some(path.to_path_buf());
        info!(
            "Loaded {:?} ({:016X}) on {} core(s)",
            path, program_id, num_cores
        );

        // Start the stats window at the first emulated frame.
        self.get_and_reset_perf_stats();
        if let Some(perf) = &self.perf_stats {
            perf.begin_system_frame();
        }
        self.status
    }

    fn fail_load(&mut self, status: ResultStatus, details: String) -> ResultStatus {
        self.status = status;
        self.status_details = details;
        status
    }

    /// Build timing, cores, kernel, services and subsystems for `num_cores`.
    pub(crate) fn init(
        &mut self,
        memory_mode: MemoryMode,
        hardware: NewHardwareCapabilities,
        num_cores: usize,
    ) -> EmuResult<()> {
        debug!("Initializing {} core(s) in {:?} mode", num_cores, memory_mode);
        let mut timing = Timing::new(num_cores, self.settings.cpu_clock_percentage);

        let thread_managers: Vec<Box<dyn ThreadManager>> = (0..num_cores)
            .map(|id| self.platform.create_thread_manager(id))
            .collect();
        let cpu_cores: Vec<Box<dyn CpuCore>> = (0..num_cores)
            .map(|id| self.platform.create_cpu_core(id))
            .collect();
        let mut kernel = Kernel::new(thread_managers, memory_mode, hardware);
        kernel.set_running_core(0);

        let mut services = self.platform.create_services(&mut timing)?;
        services.configure_plugin_loader(
            self.settings.plugin_loader.enabled,
            self.settings.plugin_loader.allow_game_change_state,
        );
        let subsystems = self.platform.create_subsystems(&mut timing, &self.settings)?;

        self.scheduler = Scheduler::new(num_cores);
        self.session = Some(Session {
            subsystems,
            services,
            kernel,
            cpu_cores,
            timing,
        });

        if self.settings.core_downcount_hack {
            self.set_cpu_usage_limit(true);
        }
        if let Some(debug_server) = self.debug_server.as_mut() {
            debug_server.configure(self.settings.gdbstub.port, self.settings.gdbstub.enabled);
            debug_server.defer_start();
        }

        debug!("Initialized OK");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.shutdown_session(false);
    }

    /// Tear the session down. A shutdown that precedes restoring a save state
    /// keeps the loader and the perf stats.
    pub(crate) fn shutdown_session(&mut self, is_deserializing: bool) {
        if self.perf_stats.is_some() {
            let results = self.get_and_reset_perf_stats();
            info!(
                "Performance: {:.1} system fps, {:.1} game fps, {:.2}% speed",
                results.system_fps,
                results.game_fps,
                results.emulation_speed * 100.0
            );
        }

        self.session = None;

        if !is_deserializing {
            if let Some(debug_server) = self.debug_server.as_mut() {
                debug_server.shutdown();
            }
            self.perf_stats = None;
            self.app_loader = None;
        }

        debug!("Shutdown OK");
    }

    pub fn get_and_reset_perf_stats(&self) -> PerfResults {
        let now_us = self.timing().map_or(0, Timing::global_time_us);
        self.perf_stats
            .as_ref()
            .map(|perf| perf.get_and_reset_stats(now_us))
            .unwrap_or_default()
    }

    /// Restart the current title (or the chainload target) from scratch.
    /// The deliver argument and plugin loader context survive.
    pub fn reset(&mut self) {
        self.capture_carry_over();
        self.shutdown_session(false);

        if let Some(path) = self.chainload_path.take() {
            self.filepath = Some(path);
        }
        let Some(path) = self.filepath.clone() else {
            warn!("Reset requested with no title loaded");
            return;
        };

        let result = self.load(&path);
        if result != ResultStatus::Success {
            warn!("Reset could not reload {:?}: {:?}", path, result);
        }
    }

    pub(crate) fn capture_carry_over(&mut self) {
        if let Some(session) = self.session.as_mut() {
            self.restore_deliver_arg = session.services.receive_deliver_arg();
            self.restore_plugin_context = session.services.plugin_loader_context();
        }
    }

    fn apply_carry_over(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(arg) = self.restore_deliver_arg.take() {
            session.services.set_deliver_arg(arg);
        }
        if let Some(ctx) = self.restore_plugin_context.take() {
            session.services.set_plugin_loader_context(ctx);
        }
    }

    /// Make the next reset load `path` instead of the current title.
    pub fn set_chainload_path(&mut self, path: impl Into<PathBuf>) {
        self.chainload_path = Some(path.into());
    }

    /// Replace the host settings. Title overrides for the running title are
    /// applied on top again.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.base_settings = settings;
        let mut effective = self.base_settings.clone();
        if self.session.is_some() {
            self.overrides.apply(self.title_id, &mut effective);
        }
        self.settings = effective;

        if let Some(debug_server) = self.debug_server.as_mut() {
            debug_server.configure(self.settings.gdbstub.port, self.settings.gdbstub.enabled);
        }

        if let Some(session) = self.session.as_mut() {
            session
                .timing
                .update_clock_speed(self.settings.cpu_clock_percentage);
            for subsystem in &mut session.subsystems {
                subsystem.apply_settings(&self.settings);
            }
            session.services.reload_input_devices();
            session.services.configure_plugin_loader(
                self.settings.plugin_loader.enabled,
                self.settings.plugin_loader.allow_game_change_state,
            );
        }
    }

    /// Throttle each core's slices by its configured divisor, or clear the throttle.
    pub fn set_cpu_usage_limit(&mut self, enabled: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for core in 0..session.timing.num_timers() {
            let hack = if enabled {
                self.settings.downcount_divisor(core)
            } else {
                0
            };
            session.timing.timer_mut(core).set_downcount_hack(hack);
        }
    }
}
