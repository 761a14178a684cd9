// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Per-core virtual clocks and the global timing authority.
//!
//! Every application core owns a [`Timer`] that counts emulated ticks. A core
//! is handed a slice of ticks to execute; while it runs it burns the slice's
//! `downcount` through [`Timer::add_ticks`], and [`Timer::advance`] later
//! commits whatever was consumed. [`Timing`] owns the timers together with a
//! single event queue keyed by absolute tick, and defines global time as the
//! furthest any core has advanced.

use crate::kernel::Kernel;
use crate::snapshot::{EventSnapshot, TimerSnapshot, TimingSnapshot};
use crate::{EmuError, EmuResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Clock rate of the application cores, in Hz.
pub const BASE_CLOCK_RATE_ARM11: u64 = 268_111_856;

/// Longest slice a core may be handed, in ticks.
pub const MAX_SLICE_LENGTH: u64 = 20_000;

/// Callback invoked when an event comes due: `(context, userdata, cycles_late)`.
pub type TimedCallback = Arc<dyn Fn(&mut EventContext<'_>, u64, u64) + Send + Sync>;

pub struct EventType {
    name: String,
    callback: TimedCallback,
}

impl EventType {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Event {
    userdata: u64,
    event_type: Arc<EventType>,
}

/// What an event callback may touch while it runs.
pub struct EventContext<'a> {
    pub timing: &'a mut Timing,
    pub kernel: &'a mut Kernel,
    reschedule_pending: &'a mut bool,
}

impl EventContext<'_> {
    /// Request a thread-manager pass at the end of the current iteration.
    pub fn prepare_reschedule(&mut self) {
        *self.reschedule_pending = true;
    }
}

/// Virtual clock of one application core.
#[derive(Debug, Clone)]
pub struct Timer {
    id: usize,
    executed_ticks: u64,
    slice_length: u64,
    /// Ticks left in the current slice. Goes negative when a core overshoots.
    downcount: i64,
    idled_cycles: u64,
    downcount_hack: u32,
    clock_scale: f64,
    next_event: Option<u64>,
}

impl Timer {
    fn new(id: usize, clock_percentage: u32) -> Self {
        Self {
            id,
            executed_ticks: 0,
            slice_length: 0,
            downcount: 0,
            idled_cycles: 0,
            downcount_hack: 0,
            clock_scale: clock_scale(clock_percentage),
            next_event: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Ticks executed so far, including the consumed part of the current slice.
    pub fn ticks(&self) -> u64 {
        let consumed = self.slice_length as i64 - self.downcount;
        self.executed_ticks.saturating_add_signed(consumed)
    }

    pub fn downcount(&self) -> i64 {
        self.downcount
    }

    pub fn slice_length(&self) -> u64 {
        self.slice_length
    }

    /// Ticks skipped by [`Timer::idle`] since the last [`Timer::advance`].
    pub fn idled_cycles(&self) -> u64 {
        self.idled_cycles
    }

    pub fn downcount_hack(&self) -> u32 {
        self.downcount_hack
    }

    pub fn set_downcount_hack(&mut self, hack: u32) {
        self.downcount_hack = hack;
    }

    /// Charge `cycles` executed guest cycles against the current slice.
    pub fn add_ticks(&mut self, cycles: u64) {
        let scaled = (cycles as f64 * self.clock_scale) as i64;
        self.downcount -= scaled;
    }

    /// Skip the rest of the current slice without executing anything.
    pub fn idle(&mut self) {
        if self.downcount > 0 {
            self.idled_cycles += self.downcount as u64;
            self.downcount = 0;
        }
    }

    /// Commit the consumed slice and prepare a default one.
    pub fn advance(&mut self) {
        let consumed = self.slice_length as i64 - self.downcount;
        self.executed_ticks = self.executed_ticks.saturating_add_signed(consumed);
        self.idled_cycles = 0;
        self.slice_length = self.max_slice_length();
        self.downcount = self.slice_length as i64;
    }

    /// Replace the prepared slice. Must follow [`Timer::advance`], otherwise
    /// the unconsumed part of the previous slice is discarded.
    pub fn set_next_slice(&mut self, max_slice_length: u64) {
        self.slice_length = match self.next_event {
            Some(time) => time
                .saturating_sub(self.executed_ticks)
                .min(max_slice_length),
            None => max_slice_length,
        };
        self.downcount = self.slice_length as i64;
    }

    /// Longest slice this core may run before the next event, derated by the
    /// downcount hack.
    pub fn max_slice_length(&self) -> u64 {
        let base = match self.next_event {
            Some(time) => time
                .saturating_sub(self.executed_ticks)
                .min(MAX_SLICE_LENGTH),
            None => MAX_SLICE_LENGTH,
        };
        match self.downcount_hack {
            0 => base,
            hack => base.div_ceil(u64::from(hack)),
        }
    }

    /// Shrink the current slice so that at most `cycles` more ticks run.
    pub fn force_exception_check(&mut self, cycles: u64) {
        let cycles = i64::try_from(cycles).unwrap_or(i64::MAX);
        if self.downcount > cycles {
            self.slice_length -= (self.downcount - cycles) as u64;
            self.downcount = cycles;
        }
    }

    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            executed_ticks: self.executed_ticks,
            slice_length: self.slice_length,
            downcount: self.downcount,
            idled_cycles: self.idled_cycles,
            downcount_hack: self.downcount_hack,
        }
    }

    fn restore(&mut self, state: &TimerSnapshot) {
        self.executed_ticks = state.executed_ticks;
        self.slice_length = state.slice_length;
        self.downcount = state.downcount;
        self.idled_cycles = state.idled_cycles;
        self.downcount_hack = state.downcount_hack;
    }
}

fn clock_scale(percentage: u32) -> f64 {
    100.0 / f64::from(percentage.max(1))
}

/// Global timing authority: per-core timers plus the shared event queue.
pub struct Timing {
    timers: Vec<Timer>,
    event_types: HashMap<String, Arc<EventType>>,
    /// Keyed by (absolute tick, insertion order).
    events: BTreeMap<(u64, u64), Event>,
    event_fifo_id: u64,
    event_queue_locked: bool,
    clock_percentage: u32,
}

impl fmt::Debug for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timing")
            .field("timers", &self.timers)
            .field("pending_events", &self.events.len())
            .field("event_queue_locked", &self.event_queue_locked)
            .field("clock_percentage", &self.clock_percentage)
            .finish()
    }
}

impl Timing {
    pub fn new(num_cores: usize, clock_percentage: u32) -> Self {
        Self {
            timers: (0..num_cores)
                .map(|id| Timer::new(id, clock_percentage))
                .collect(),
            event_types: HashMap::new(),
            events: BTreeMap::new(),
            event_fifo_id: 0,
            event_queue_locked: false,
            clock_percentage,
        }
    }

    pub fn num_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn timers(&self) -> &[Timer] {
        &self.timers
    }

    pub fn timer(&self, core: usize) -> &Timer {
        &self.timers[core]
    }

    pub fn timer_mut(&mut self, core: usize) -> &mut Timer {
        &mut self.timers[core]
    }

    /// The furthest point in emulated time any core has reached.
    pub fn global_ticks(&self) -> u64 {
        self.timers.iter().map(Timer::ticks).max().unwrap_or(0)
    }

    pub fn global_time_us(&self) -> u64 {
        (u128::from(self.global_ticks()) * 1_000_000 / u128::from(BASE_CLOCK_RATE_ARM11)) as u64
    }

    pub fn clock_percentage(&self) -> u32 {
        self.clock_percentage
    }

    /// Rescale future tick accounting. Already recorded ticks are untouched.
    pub fn update_clock_speed(&mut self, percentage: u32) {
        self.clock_percentage = percentage;
        let scale = clock_scale(percentage);
        for timer in &mut self.timers {
            timer.clock_scale = scale;
        }
    }

    pub fn register_event<F>(&mut self, name: &str, callback: F) -> EmuResult<Arc<EventType>>
    where
        F: Fn(&mut EventContext<'_>, u64, u64) + Send + Sync + 'static,
    {
        if self.event_types.contains_key(name) {
            return Err(EmuError::DuplicateEventType(name.to_string()));
        }
        let event_type = Arc::new(EventType {
            name: name.to_string(),
            callback: Arc::new(callback),
        });
        self.event_types
            .insert(name.to_string(), Arc::clone(&event_type));
        Ok(event_type)
    }

    pub fn event_type(&self, name: &str) -> Option<Arc<EventType>> {
        self.event_types.get(name).cloned()
    }

    pub fn schedule_event(
        &mut self,
        cycles_into_future: u64,
        event_type: &Arc<EventType>,
        userdata: u64,
    ) {
        let time = self.global_ticks().saturating_add(cycles_into_future);
        self.schedule_event_at(time, event_type, userdata);
    }

    pub fn schedule_event_at(&mut self, time: u64, event_type: &Arc<EventType>, userdata: u64) {
        if self.event_queue_locked {
            trace!(
                "Event queue locked, dropping {} scheduled at {}",
                event_type.name,
                time
            );
            return;
        }
        let key = (time, self.event_fifo_id);
        self.event_fifo_id += 1;
        self.events.insert(
            key,
            Event {
                userdata,
                event_type: Arc::clone(event_type),
            },
        );
        // A core whose slice reaches past the new event must stop at it.
        for timer in &mut self.timers {
            let until_event = time.saturating_sub(timer.ticks());
            timer.force_exception_check(until_event);
        }
        self.sync_next_event();
    }

    pub fn unschedule_event(&mut self, event_type: &Arc<EventType>, userdata: u64) {
        self.events
            .retain(|_, e| !(Arc::ptr_eq(&e.event_type, event_type) && e.userdata == userdata));
        self.sync_next_event();
    }

    pub fn remove_event(&mut self, event_type: &Arc<EventType>) {
        self.events
            .retain(|_, e| !Arc::ptr_eq(&e.event_type, event_type));
        self.sync_next_event();
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.keys().next().map(|&(time, _)| time)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn is_event_queue_locked(&self) -> bool {
        self.event_queue_locked
    }

    /// Re-enable scheduling and firing after a save state has been restored.
    pub fn unlock_event_queue(&mut self) {
        self.event_queue_locked = false;
    }

    fn sync_next_event(&mut self) {
        let next = self.next_event_time();
        for timer in &mut self.timers {
            timer.next_event = next;
        }
    }

    /// Fire every event due at or before the current global tick, in order.
    pub fn fire_due_events(&mut self, kernel: &mut Kernel, reschedule_pending: &mut bool) -> usize {
        if self.event_queue_locked {
            return 0;
        }
        let now = self.global_ticks();
        let mut fired = 0;
        while let Some(entry) = self.events.first_entry() {
            let (time, _) = *entry.key();
            if time > now {
                break;
            }
            let event = entry.remove();
            self.sync_next_event();

            let callback = Arc::clone(&event.event_type.callback);
            trace!(
                "Firing {} ({} cycles late)",
                event.event_type.name,
                now - time
            );
            let mut ctx = EventContext {
                timing: &mut *self,
                kernel: &mut *kernel,
                reschedule_pending: &mut *reschedule_pending,
            };
            callback(&mut ctx, event.userdata, now - time);
            fired += 1;
        }
        fired
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            timers: self.timers.iter().map(Timer::snapshot).collect(),
            events: self
                .events
                .iter()
                .map(|(&(time, fifo_order), event)| EventSnapshot {
                    time,
                    fifo_order,
                    userdata: event.userdata,
                    event_type: event.event_type.name.clone(),
                })
                .collect(),
            event_fifo_id: self.event_fifo_id,
        }
    }

    /// Replace clocks and queue with saved state and lock the queue until
    /// [`Timing::unlock_event_queue`].
    pub fn restore(&mut self, state: &TimingSnapshot) -> EmuResult<()> {
        if state.timers.len() != self.timers.len() {
            return Err(EmuError::CoreCountMismatch {
                saved: state.timers.len(),
                current: self.timers.len(),
            });
        }
        self.event_queue_locked = true;
        for (timer, saved) in self.timers.iter_mut().zip(&state.timers) {
            timer.restore(saved);
        }

        self.events.clear();
        for saved in &state.events {
            match self.event_types.get(&saved.event_type) {
                Some(event_type) => {
                    self.events.insert(
                        (saved.time, saved.fifo_order),
                        Event {
                            userdata: saved.userdata,
                            event_type: Arc::clone(event_type),
                        },
                    );
                }
                None => warn!(
                    "Dropping saved event of unregistered type {}",
                    saved.event_type
                ),
            }
        }
        self.event_fifo_id = state.event_fifo_id;
        self.sync_next_event();
        Ok(())
    }
}
