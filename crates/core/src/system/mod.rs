// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The emulated machine as seen by a host embedding.
//!
//! A [`System`] is constructed once from a [`Platform`] and then driven by
//! repeatedly calling [`System::run_loop`] on one thread. Other threads talk
//! to it only through the signal mailbox ([`System::signal_sender`]) and the
//! shared [`FrameLimiter`].

mod lifecycle;
mod state;

use crate::frame_limiter::FrameLimiter;
use crate::kernel::Kernel;
use crate::loader::AppLoader;
use crate::metrics::PerfStats;
use crate::scheduler::{IterationReport, Scheduler};
use crate::services::{DeliverArg, PluginLoaderContext, Services};
use crate::signals::{Signal, SignalMailbox, SignalSender};
use crate::snapshot::{MemoryStore, SaveStateStore};
use crate::timing::Timing;
use crate::{CpuCore, DebugServer, EmuError, Platform, ResultStatus, Subsystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_config::{Settings, TitleOverrides};
use tracing::{error, info, warn};

/// Everything built by `init` and torn down by `shutdown`.
///
/// Fields drop in declaration order.
pub(crate) struct Session {
    pub(crate) subsystems: Vec<Box<dyn Subsystem>>,
    pub(crate) services: Box<dyn Services>,
    pub(crate) kernel: Kernel,
    pub(crate) cpu_cores: Vec<Box<dyn CpuCore>>,
    pub(crate) timing: Timing,
}

pub struct System {
    platform: Box<dyn Platform>,
    /// Host settings before any title override.
    base_settings: Settings,
    /// Settings in effect for the loaded title.
    settings: Settings,
    overrides: TitleOverrides,

    session: Option<Session>,
    pub(crate) app_loader: Option<Box<dyn AppLoader>>,
    perf_stats: Option<Arc<PerfStats>>,
    frame_limiter: Arc<FrameLimiter>,
    scheduler: Scheduler,
    signals: Arc<SignalMailbox>,
    save_states: Box<dyn SaveStateStore>,
    debug_server: Option<Box<dyn DebugServer>>,

    status: ResultStatus,
    status_details: String,
    filepath: Option<PathBuf>,
    chainload_path: Option<PathBuf>,
    title_id: u64,

    restore_deliver_arg: Option<DeliverArg>,
    restore_plugin_context: Option<PluginLoaderContext>,
}

impl System {
    pub fn new(platform: Box<dyn Platform>, settings: Settings) -> Self {
        Self {
            platform,
            base_settings: settings.clone(),
            settings,
            overrides: TitleOverrides::builtin(),
            session: None,
            app_loader: None,
            perf_stats: None,
            frame_limiter: Arc::new(FrameLimiter::new()),
            scheduler: Scheduler::new(1),
            signals: Arc::new(SignalMailbox::new()),
            save_states: Box::new(MemoryStore::new()),
            debug_server: None,
            status: ResultStatus::Success,
            status_details: String::new(),
            filepath: None,
            chainload_path: None,
            title_id: 0,
            restore_deliver_arg: None,
            restore_plugin_context: None,
        }
    }

    pub fn with_overrides(mut self, overrides: TitleOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_save_state_store(mut self, store: Box<dyn SaveStateStore>) -> Self {
        self.save_states = store;
        self
    }

    pub fn with_debug_server(mut self, server: Box<dyn DebugServer>) -> Self {
        self.debug_server = Some(server);
        self
    }

    /// Run one scheduler iteration, then act on a pending control signal.
    ///
    /// # Panics
    ///
    /// If no title has ever been loaded.
    pub fn run_loop(&mut self) -> ResultStatus {
        match self.session.as_mut() {
            Some(session) => {
                self.scheduler.step(
                    &mut session.timing,
                    &mut session.kernel,
                    &mut session.cpu_cores,
                );
            }
            None => {
                assert!(
                    self.filepath.is_some(),
                    "run_loop called before a title was loaded"
                );
                warn!("No active session, only handling signals");
            }
        }
        self.dispatch_signal()
    }

    /// Alias for one [`System::run_loop`] iteration, for debugger front ends.
    pub fn single_step(&mut self) -> ResultStatus {
        self.run_loop()
    }

    fn dispatch_signal(&mut self) -> ResultStatus {
        // The mailbox lock is released before any long-running handler starts.
        let Some(signal) = self.signals.take() else {
            return self.status;
        };

        match signal {
            Signal::Reset => {
                self.reset();
                ResultStatus::Success
            }
            Signal::Shutdown => ResultStatus::ShutdownRequested,
            Signal::Load { slot } => {
                info!("Begin load of slot {}", slot);
                match self.load_state(slot) {
                    Ok(()) => {
                        info!("Load completed");
                        self.frame_limiter.wait_once();
                        ResultStatus::Success
                    }
                    Err(e) => self.savestate_failed("loading", e),
                }
            }
            Signal::Save { slot } => {
                info!("Begin save to slot {}", slot);
                match self.save_state(slot) {
                    Ok(()) => {
                        info!("Save completed");
                        self.frame_limiter.wait_once();
                        ResultStatus::Success
                    }
                    Err(e) => self.savestate_failed("saving", e),
                }
            }
        }
    }

    fn savestate_failed(&mut self, action: &str, e: EmuError) -> ResultStatus {
        error!("Error {}: {}", action, e);
        self.status_details = e.to_string();
        ResultStatus::ErrorSavestate
    }

    /// Post a control signal. Returns false when a different one is pending.
    pub fn send_signal(&self, signal: Signal) -> bool {
        self.signal_sender().send(signal)
    }

    pub fn signal_sender(&self) -> SignalSender {
        SignalSender::new(Arc::clone(&self.signals))
    }

    pub fn pending_signal(&self) -> Option<Signal> {
        self.signals.pending()
    }

    pub fn frame_limiter(&self) -> Arc<FrameLimiter> {
        Arc::clone(&self.frame_limiter)
    }

    pub fn is_powered_on(&self) -> bool {
        self.session.is_some()
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn status_details(&self) -> &str {
        &self.status_details
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base_settings(&self) -> &Settings {
        &self.base_settings
    }

    pub fn title_id(&self) -> u64 {
        self.title_id
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    pub fn chainload_path(&self) -> Option<&Path> {
        self.chainload_path.as_deref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn last_report(&self) -> &IterationReport {
        self.scheduler.last_report()
    }

    pub fn num_cores(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.cpu_cores.len())
    }

    pub fn running_core(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.kernel.running_core())
    }

    pub fn timing(&self) -> Option<&Timing> {
        self.session.as_ref().map(|s| &s.timing)
    }

    pub fn timing_mut(&mut self) -> Option<&mut Timing> {
        self.session.as_mut().map(|s| &mut s.timing)
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.session.as_ref().map(|s| &s.kernel)
    }

    pub fn kernel_mut(&mut self) -> Option<&mut Kernel> {
        self.session.as_mut().map(|s| &mut s.kernel)
    }

    pub fn services_mut(&mut self) -> Option<&mut (dyn Services + 'static)> {
        self.session.as_mut().map(|s| s.services.as_mut())
    }

    pub fn perf_stats(&self) -> Option<Arc<PerfStats>> {
        self.perf_stats.clone()
    }

    /// Deliver argument waiting to be re-applied by the next load.
    pub fn restore_deliver_arg(&self) -> Option<&DeliverArg> {
        self.restore_deliver_arg.as_ref()
    }

    /// Plugin loader context waiting to be re-applied by the next load.
    pub fn restore_plugin_context(&self) -> Option<&PluginLoaderContext> {
        self.restore_plugin_context.as_ref()
    }
}
