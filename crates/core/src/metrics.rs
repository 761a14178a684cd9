// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerfResults {
    /// Emulated frames per wall-clock second.
    pub system_fps: f64,
    /// Frames presented by the guest per wall-clock second.
    pub game_fps: f64,
    /// Average wall-clock seconds spent per emulated frame.
    pub frametime: f64,
    /// Emulated time over wall-clock time; 1.0 is full speed.
    pub emulation_speed: f64,
}

#[derive(Debug)]
struct Window {
    reset_point: Instant,
    reset_point_system_us: u64,
    frame_begin: Option<Instant>,
    accumulated_frametime: Duration,
    last_stats: PerfResults,
}

/// Frame counters for one running title.
#[derive(Debug)]
pub struct PerfStats {
    title_id: u64,
    system_frames: AtomicU64,
    game_frames: AtomicU64,
    window: Mutex<Window>,
}

impl PerfStats {
    pub fn new(title_id: u64) -> Self {
        Self {
            title_id,
            system_frames: AtomicU64::new(0),
            game_frames: AtomicU64::new(0),
            window: Mutex::new(Window {
                reset_point: Instant::now(),
                reset_point_system_us: 0,
                frame_begin: None,
                accumulated_frametime: Duration::ZERO,
                last_stats: PerfResults::default(),
            }),
        }
    }

    pub fn title_id(&self) -> u64 {
        self.title_id
    }

    pub fn system_frames(&self) -> u64 {
        self.system_frames.load(Ordering::SeqCst)
    }

    pub fn game_frames(&self) -> u64 {
        self.game_frames.load(Ordering::SeqCst)
    }

    pub fn begin_system_frame(&self) {
        self.window().frame_begin = Some(Instant::now());
    }

    pub fn end_system_frame(&self) {
        let mut window = self.window();
        if let Some(begin) = window.frame_begin.take() {
            window.accumulated_frametime += begin.elapsed();
        }
        self.system_frames.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_game_frame(&self) {
        self.game_frames.fetch_add(1, Ordering::SeqCst);
    }

    /// Compute rates since the previous call and start a new window.
    pub fn get_and_reset_stats(&self, current_system_time_us: u64) -> PerfResults {
        let mut window = self.window();
        let now = Instant::now();
        let interval = now.duration_since(window.reset_point).as_secs_f64();
        let system_frames = self.system_frames.swap(0, Ordering::SeqCst);
        let game_frames = self.game_frames.swap(0, Ordering::SeqCst);

        let stats = if interval > 0.0 {
            let emulated_us = current_system_time_us.saturating_sub(window.reset_point_system_us);
            PerfResults {
                system_fps: system_frames as f64 / interval,
                game_fps: game_frames as f64 / interval,
                frametime: if system_frames > 0 {
                    window.accumulated_frametime.as_secs_f64() / system_frames as f64
                } else {
                    0.0
                },
                emulation_speed: emulated_us as f64 / 1_000_000.0 / interval,
            }
        } else {
            PerfResults::default()
        };

        window.reset_point = now;
        window.reset_point_system_us = current_system_time_us;
        window.accumulated_frametime = Duration::ZERO;
        window.last_stats = stats;
        stats
    }

    pub fn last_stats(&self) -> PerfResults {
        self.window().last_stats
    }

    fn window(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset_after_stats() {
        let stats = PerfStats::new(0x0004000000030800);
        stats.begin_system_frame();
        stats.end_system_frame();
        stats.end_game_frame();
        stats.end_game_frame();
        assert_eq!(stats.system_frames(), 1);
        assert_eq!(stats.game_frames(), 2);

        std::thread::sleep(Duration::from_millis(2));
        let results = stats.get_and_reset_stats(1_000);
        assert!(results.system_fps > 0.0);
        assert!(results.game_fps > results.system_fps);
        assert!(results.emulation_speed > 0.0);
        assert_eq!(stats.system_frames(), 0);
        assert_eq!(stats.last_stats(), results);
    }

    #[test]
    fn test_frametime_zero_without_frames() {
        let stats = PerfStats::new(1);
        std::thread::sleep(Duration::from_millis(1));
        let results = stats.get_and_reset_stats(0);
        assert_eq!(results.frametime, 0.0);
        assert_eq!(results.emulation_speed, 0.0);
    }
}
