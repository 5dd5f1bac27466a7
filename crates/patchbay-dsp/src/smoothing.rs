/// Linear fade position generator for click-free bypass transitions.
///
/// Produces a 0..1 position that moves toward the current target over a
/// fixed time. The caller mixes dry/wet with the returned position.
#[derive(Clone, Copy, Debug)]
pub struct LinearRamp {
    position: f32,
    target: f32,
    step: f32,
}

impl LinearRamp {
    pub fn new(sample_rate: f32, time_ms: f32) -> Self {
        let mut ramp = Self {
            position: 1.0,
            target: 1.0,
            step: 1.0,
        };
        ramp.set_time_ms(sample_rate, time_ms);
        ramp
    }

    #[inline]
    pub fn set_time_ms(&mut self, sample_rate: f32, time_ms: f32) {
        let samples = (sample_rate.max(1.0) * time_ms.max(0.0) * 0.001).round();
        self.step = if samples < 1.0 { 1.0 } else { 1.0 / samples };
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target.clamp(0.0, 1.0);
    }

    /// Jumps straight to `value` without ramping.
    #[inline]
    pub fn snap(&mut self, value: f32) {
        self.position = value.clamp(0.0, 1.0);
        self.target = self.position;
    }

    /// Jumps to the current target, finishing any fade in flight.
    #[inline]
    pub fn settle(&mut self) {
        self.position = self.target;
    }

    #[inline]
    pub fn tick(&mut self) -> f32 {
        if self.position < self.target {
            self.position = (self.position + self.step).min(self.target);
        } else if self.position > self.target {
            self.position = (self.position - self.step).max(self.target);
        }
        self.position
    }

    #[inline]
    pub fn position(&self) -> f32 {
        self.position
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.position == self.target
    }
}

/// One-pole lowpass toward a target value, used for smoothed gain moves.
#[derive(Clone, Copy, Debug)]
pub struct OnePole {
    coeff: f32,
    state: f32,
    target: f32,
}

impl OnePole {
    pub fn new(sample_rate: f32, time_ms: f32) -> Self {
        let mut smoother = Self {
            coeff: 1.0,
            state: 0.0,
            target: 0.0,
        };
        smoother.set_time_ms(sample_rate, time_ms);
        smoother
    }

    #[inline]
    pub fn set_time_ms(&mut self, sample_rate: f32, time_ms: f32) {
        let tau = time_ms.max(0.01) * 0.001 * sample_rate.max(1.0);
        self.coeff = if tau <= 1.0 {
            1.0
        } else {
            (1.0 - (-1.0 / tau).exp()).clamp(0.0, 1.0)
        };
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.state = value;
        self.target = value;
    }

    #[inline]
    pub fn tick(&mut self) -> f32 {
        self.state += self.coeff * (self.target - self.state);
        self.state
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_target_within_time() {
        let mut ramp = LinearRamp::new(1000.0, 10.0);
        ramp.snap(0.0);
        ramp.set_target(1.0);
        for _ in 0..10 {
            ramp.tick();
        }
        assert!((ramp.position() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ramp_moves_both_directions() {
        let mut ramp = LinearRamp::new(1000.0, 4.0);
        ramp.snap(1.0);
        ramp.set_target(0.0);
        let first = ramp.tick();
        assert!(first < 1.0);
        ramp.set_target(1.0);
        let back = ramp.tick();
        assert!(back > first);
    }

    #[test]
    fn settle_finishes_a_fade_in_flight() {
        let mut ramp = LinearRamp::new(1000.0, 10.0);
        ramp.snap(1.0);
        ramp.set_target(0.0);
        ramp.tick();
        assert!(ramp.position() > 0.0);
        ramp.settle();
        assert_eq!(ramp.position(), 0.0);
        assert!(ramp.is_settled());
    }

    #[test]
    fn one_pole_converges() {
        let mut smoother = OnePole::new(48_000.0, 5.0);
        smoother.reset(0.0);
        smoother.set_target(1.0);
        let mut last = 0.0;
        for _ in 0..48_000 {
            last = smoother.tick();
        }
        assert!((last - 1.0).abs() < 1e-3);
    }
}
