/// Turns variable frame deltas into a whole number of fixed simulation steps.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
    max_frame: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
            max_frame: 0.25,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Long stalls are clamped so the world never tries to catch up in one burst.
    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.clamp(0.0, self.max_frame);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn pending_ticks(&self) -> u32 {
        (self.accumulator / self.dt) as u32
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
