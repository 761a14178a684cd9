// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Cooperative run loop over per-core virtual clocks.
//!
//! All cores are driven from the calling thread. With a single core the
//! scheduler simply runs or idles it. With several cores every iteration
//! first measures how far each core lags behind global time; a core that
//! lags by more than [`MIN_DELAY`] ticks is caught up on its own, otherwise
//! all cores run one shared slice that no core's limit is exceeded by.

use crate::kernel::Kernel;
use crate::timing::{Timer, Timing, MAX_SLICE_LENGTH};
use crate::CpuCore;
use serde::Serialize;
use tracing::trace;

/// Drift, in ticks, tolerated before a lagging core is caught up on its own.
pub const MIN_DELAY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleCore,
    MultiCore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulePath {
    #[default]
    SingleCore,
    /// Only `core` ran, to close its gap to global time.
    CatchUp { core: usize },
    Synchronized,
}

/// What one scheduler step decided and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub path: SchedulePath,
    pub global_ticks_before: u64,
    pub max_delay: u64,
    /// Slice handed to the core(s) that ran.
    pub max_slice: u64,
    /// Largest number of ticks any core actually consumed in a synchronized step.
    pub observed_slice: u64,
    pub executed_cores: Vec<usize>,
    pub idled_cores: Vec<usize>,
    pub events_fired: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    strategy: Strategy,
    reschedule_pending: bool,
    iterations: u64,
    last: IterationReport,
}

impl Scheduler {
    pub fn new(num_cores: usize) -> Self {
        let strategy = if num_cores > 1 {
            Strategy::MultiCore
        } else {
            Strategy::SingleCore
        };
        Self {
            strategy,
            reschedule_pending: false,
            iterations: 0,
            last: IterationReport::default(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn last_report(&self) -> &IterationReport {
        &self.last
    }

    pub fn is_reschedule_pending(&self) -> bool {
        self.reschedule_pending
    }

    pub fn prepare_reschedule(&mut self) {
        self.reschedule_pending = true;
    }

    /// Let every thread manager pick its next thread, if anything asked for it.
    pub fn reschedule(&mut self, kernel: &mut Kernel) {
        if !self.reschedule_pending {
            return;
        }
        self.reschedule_pending = false;
        kernel.reschedule_all();
    }

    /// Run one iteration: execute cores, fire due events, reschedule.
    pub fn step(
        &mut self,
        timing: &mut Timing,
        kernel: &mut Kernel,
        cores: &mut [Box<dyn CpuCore>],
    ) -> &IterationReport {
        debug_assert_eq!(timing.num_timers(), cores.len());
        self.iterations += 1;

        let mut report = IterationReport {
            iteration: self.iterations,
            global_ticks_before: timing.global_ticks(),
            ..IterationReport::default()
        };
        match self.strategy {
            Strategy::SingleCore => self.step_single_core(timing, kernel, cores, &mut report),
            Strategy::MultiCore => self.step_multi_core(timing, kernel, cores, &mut report),
        }

        report.events_fired = timing.fire_due_events(kernel, &mut self.reschedule_pending);
        self.reschedule(kernel);

        self.last = report;
        &self.last
    }

    fn step_single_core(
        &mut self,
        timing: &mut Timing,
        kernel: &mut Kernel,
        cores: &mut [Box<dyn CpuCore>],
        report: &mut IterationReport,
    ) {
        report.path = SchedulePath::SingleCore;
        let timer = timing.timer_mut(0);
        if kernel.has_ready_thread(0) {
            timer.advance();
            report.max_slice = timer.slice_length();
            cores[0].run(timer);
            report.executed_cores.push(0);
        } else {
            trace!("Core 0 idling");
            timer.idle();
            timer.advance();
            report.max_slice = timer.slice_length();
            self.reschedule_pending = true;
            cores[0].prepare_reschedule();
            report.idled_cores.push(0);
        }
    }

    fn step_multi_core(
        &mut self,
        timing: &mut Timing,
        kernel: &mut Kernel,
        cores: &mut [Box<dyn CpuCore>],
        report: &mut IterationReport,
    ) {
        let global_ticks = report.global_ticks_before;

        let mut target = None;
        for (id, core) in cores.iter_mut().enumerate() {
            let delay = global_ticks.saturating_sub(timing.timer(id).ticks());
            if delay == 0 {
                continue;
            }
            kernel.set_running_core(id);
            timing.timer_mut(id).advance();
            core.prepare_reschedule();
            kernel.thread_manager_mut(id).reschedule();
            timing.timer_mut(id).set_next_slice(delay);
            if delay >= report.max_delay {
                report.max_delay = delay;
                target = Some(id);
            }
        }

        match target {
            Some(id) if report.max_delay > MIN_DELAY => {
                trace!("Core {} is {} ticks behind", id, report.max_delay);
                kernel.set_running_core(id);
                report.path = SchedulePath::CatchUp { core: id };
                let timer = timing.timer_mut(id);
                report.max_slice = timer.slice_length();
                self.run_or_idle(id, timer, kernel, cores[id].as_mut(), report);
            }
            _ => self.step_synchronized(timing, kernel, cores, report),
        }
    }

    fn step_synchronized(
        &mut self,
        timing: &mut Timing,
        kernel: &mut Kernel,
        cores: &mut [Box<dyn CpuCore>],
        report: &mut IterationReport,
    ) {
        report.path = SchedulePath::Synchronized;

        let mut max_slice = MAX_SLICE_LENGTH;
        for (id, core) in cores.iter_mut().enumerate() {
            kernel.set_running_core(id);
            timing.timer_mut(id).advance();
            core.prepare_reschedule();
            kernel.thread_manager_mut(id).reschedule();
            max_slice = max_slice.min(timing.timer(id).max_slice_length());
        }
        report.max_slice = max_slice;

        // Every core gets the final slice, so none runs past the most
        // constrained one.
        for (id, core) in cores.iter_mut().enumerate() {
            let timer = timing.timer_mut(id);
            timer.set_next_slice(max_slice);
            let start_ticks = timer.ticks();
            kernel.set_running_core(id);
            self.run_or_idle(id, timer, kernel, core.as_mut(), report);
            report.observed_slice = report.observed_slice.max(timer.ticks() - start_ticks);
        }
    }

    fn run_or_idle(
        &mut self,
        id: usize,
        timer: &mut Timer,
        kernel: &Kernel,
        core: &mut dyn CpuCore,
        report: &mut IterationReport,
    ) {
        if kernel.has_ready_thread(id) {
            core.run(timer);
            report.executed_cores.push(id);
        } else {
            trace!("Core {} idling", id);
            timer.idle();
            self.reschedule_pending = true;
            core.prepare_reschedule();
            report.idled_cores.push(id);
        }
    }
}
