use std::collections::VecDeque;
use std::time::Instant;

use crate::net::Frame;

const SAMPLE_COUNT: usize = 60;

/// Rolling frame and tick rates plus per-window frame totals.
#[derive(Debug, Default)]
pub struct FrameStats {
    frame_times: VecDeque<f32>,
    tick_times: VecDeque<Instant>,
    last_tick: Option<u32>,
    fps: f32,
    tick_rate: f32,
    frames: u32,
    animated: usize,
    culled: usize,
    deferred: usize,
}

/// Per-frame averages since the last [`FrameStats::take_window`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowAverages {
    pub frames: u32,
    pub animated: f32,
    pub culled: f32,
    pub deferred: f32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, dt: f32, frame: &Frame) {
        self.frames += 1;
        self.animated += frame.animated();
        self.culled += frame.culled;
        self.deferred += frame.deferred;

        if dt <= 0.0 {
            return;
        }
        if self.frame_times.len() >= SAMPLE_COUNT {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(dt);

        let avg_dt = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.fps = 1.0 / avg_dt;
    }

    /// Counts a tick arrival whenever the newest applied tick changes.
    pub fn observe_tick(&mut self, tick: Option<u32>) {
        if tick.is_none() || tick == self.last_tick {
            return;
        }
        self.last_tick = tick;

        let now = Instant::now();
        if self.tick_times.len() >= SAMPLE_COUNT {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);

        if let Some(oldest) = self.tick_times.front() {
            let elapsed = now.duration_since(*oldest).as_secs_f32();
            if elapsed > 0.0 {
                self.tick_rate = (self.tick_times.len() - 1) as f32 / elapsed;
            }
        }
    }

    pub fn take_window(&mut self) -> WindowAverages {
        let frames = self.frames.max(1) as f32;
        let averages = WindowAverages {
            frames: self.frames,
            animated: self.animated as f32 / frames,
            culled: self.culled as f32 / frames,
            deferred: self.deferred as f32 / frames,
        };
        self.frames = 0;
        self.animated = 0;
        self.culled = 0;
        self.deferred = 0;
        averages
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn tick_rate(&self) -> f32 {
        self.tick_rate
    }
}
