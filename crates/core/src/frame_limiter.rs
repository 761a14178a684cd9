// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Frame pacing shared between the run loop and the host UI.
///
/// In frame-advance mode the run loop parks in [`FrameLimiter::wait_once`]
/// until the host calls [`FrameLimiter::advance_frame`].
#[derive(Debug, Default)]
pub struct FrameLimiter {
    frame_advancing: AtomicBool,
    advance_requested: Mutex<bool>,
    advance_cv: Condvar,
}

impl FrameLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frame_advancing(&self) -> bool {
        self.frame_advancing.load(Ordering::SeqCst)
    }

    pub fn set_frame_advancing(&self, enabled: bool) {
        self.frame_advancing.store(enabled, Ordering::SeqCst);
        if enabled {
            *self
                .advance_requested
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = false;
        } else {
            // Release a parked run loop.
            self.advance_frame();
        }
    }

    pub fn advance_frame(&self) {
        let mut requested = self
            .advance_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *requested = true;
        self.advance_cv.notify_all();
    }

    pub fn wait_once(&self) {
        if !self.is_frame_advancing() {
            return;
        }
        let mut requested = self
            .advance_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*requested && self.is_frame_advancing() {
            requested = self
                .advance_cv
                .wait(requested)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *requested = false;
    }
}
