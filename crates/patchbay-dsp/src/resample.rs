//! Integer-factor resampling for the oversampling container.
//!
//! Quality is intentionally modest (linear interpolation up, box
//! averaging down); the graph engine only cares that the child block
//! runs at `rate * factor` and that the round trip is stable across
//! block boundaries.

/// Upsamples by an integer factor with linear interpolation, carrying
/// the previous input sample across block boundaries.
#[derive(Clone, Debug)]
pub struct Upsampler {
    factor: usize,
    last: f32,
}

impl Upsampler {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            last: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.last = 0.0;
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// `output.len()` must be `input.len() * factor`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(output.len(), input.len() * self.factor);
        let step = 1.0 / self.factor as f32;
        let mut previous = self.last;
        for (frame, &sample) in input.iter().enumerate() {
            let base = frame * self.factor;
            for lane in 0..self.factor {
                let frac = (lane + 1) as f32 * step;
                output[base + lane] = previous + (sample - previous) * frac;
            }
            previous = sample;
        }
        self.last = previous;
    }
}

/// Downsamples by an integer factor, averaging each group of samples.
#[derive(Clone, Debug)]
pub struct Decimator {
    factor: usize,
}

impl Decimator {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
        }
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// `input.len()` must be `output.len() * factor`.
    pub fn process(&self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len() * self.factor);
        let scale = 1.0 / self.factor as f32;
        for (frame, out) in output.iter_mut().enumerate() {
            let base = frame * self.factor;
            let mut acc = 0.0;
            for lane in 0..self.factor {
                acc += input[base + lane];
            }
            *out = acc * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsample_constant_is_constant() {
        let mut up = Upsampler::new(4);
        up.reset();
        let input = [0.5f32; 8];
        let mut output = [0.0f32; 32];
        up.process(&input, &mut output);
        // After the initial approach from the zero history the signal
        // settles on the constant.
        assert!(output[31] - 0.5 < 1e-6);
        let mut second = [0.0f32; 32];
        up.process(&input, &mut second);
        assert!(second.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn round_trip_preserves_dc() {
        let mut up = Upsampler::new(2);
        let down = Decimator::new(2);
        let input = [1.0f32; 16];
        let mut wide = [0.0f32; 32];
        let mut back = [0.0f32; 16];
        up.process(&input, &mut wide);
        up.process(&input, &mut wide);
        down.process(&wide, &mut back);
        assert!(back.iter().all(|s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn decimator_averages_groups() {
        let down = Decimator::new(4);
        let input = [0.0, 1.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0];
        let mut output = [0.0f32; 2];
        down.process(&input, &mut output);
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!((output[1] - 2.0).abs() < 1e-6);
    }
}
