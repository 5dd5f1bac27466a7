//! Parameter range descriptions and the 0..1 mapping math used by
//! connections and macro parameters.

use serde::{Deserialize, Serialize};

fn default_max() -> f64 {
    1.0
}

fn default_skew() -> f64 {
    1.0
}

/// A value range with optional skew, step quantisation and inversion.
///
/// `skew` is an exponent applied in normalised space (1.0 = linear),
/// `step` snaps mapped values downward onto a grid anchored at `min`,
/// and `inverted` flips the normalised value before mapping. The
/// identity range (0..1, linear, no step, not inverted) is special: a
/// connection whose remap is the identity of its target collapses to a
/// direct binding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default = "default_skew")]
    pub skew: f64,
    #[serde(default)]
    pub step: f64,
    #[serde(default)]
    pub inverted: bool,
}

impl Default for ParamRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            skew: 1.0,
            step: 0.0,
            inverted: false,
        }
    }
}

impl ParamRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            ..Self::default()
        }
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = if skew > 0.0 { skew } else { 1.0 };
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.max(0.0);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.min == 0.0
            && self.max == 1.0
            && self.skew == 1.0
            && self.step == 0.0
            && !self.inverted
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min.min(self.max), self.max.max(self.min))
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        let lo = self.min.min(self.max);
        let hi = self.max.max(self.min);
        value >= lo && value <= hi
    }

    /// Maps a normalised 0..1 value into the range, applying inversion,
    /// skew and step snap in that order.
    pub fn from_0to1(&self, normalised: f64) -> f64 {
        let mut n = normalised.clamp(0.0, 1.0);
        if self.inverted {
            n = 1.0 - n;
        }
        if self.skew != 1.0 && n > 0.0 {
            n = n.powf(self.skew);
        }
        self.snap(self.min + self.span() * n)
    }

    /// Maps a range value back into normalised 0..1 space.
    pub fn to_0to1(&self, value: f64) -> f64 {
        let span = self.span();
        if span == 0.0 {
            return 0.0;
        }
        let mut n = ((self.clamp(value) - self.min) / span).clamp(0.0, 1.0);
        if self.skew != 1.0 && n > 0.0 {
            n = n.powf(1.0 / self.skew);
        }
        if self.inverted {
            n = 1.0 - n;
        }
        n
    }

    /// Snaps onto the step grid (downward, anchored at `min`).
    pub fn snap(&self, value: f64) -> f64 {
        if self.step <= 0.0 {
            return value;
        }
        let offset = value - self.min;
        self.clamp(value - offset.rem_euclid(self.step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_mapping_round_trips() {
        let range = ParamRange::new(0.5, 0.7);
        assert!((range.from_0to1(0.5) - 0.6).abs() < 1e-9);
        assert!((range.to_0to1(0.6) - 0.5).abs() < 1e-9);
        assert!((range.from_0to1(0.0) - 0.5).abs() < 1e-9);
        assert!((range.from_0to1(1.0) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn inversion_flips_normalised_space() {
        let range = ParamRange::new(0.0, 10.0).inverted();
        assert!((range.from_0to1(0.0) - 10.0).abs() < 1e-9);
        assert!((range.from_0to1(1.0) - 0.0).abs() < 1e-9);
        assert!((range.to_0to1(10.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn step_snaps_downward() {
        let range = ParamRange::new(0.0, 1.0).with_step(0.25);
        assert!((range.from_0to1(0.4) - 0.25).abs() < 1e-9);
        assert!((range.from_0to1(0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn skew_bends_the_curve() {
        let range = ParamRange::new(0.0, 1.0).with_skew(2.0);
        assert!((range.from_0to1(0.5) - 0.25).abs() < 1e-9);
        assert!((range.to_0to1(0.25) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn identity_detection() {
        assert!(ParamRange::default().is_identity());
        assert!(!ParamRange::new(0.0, 2.0).is_identity());
        assert!(!ParamRange::default().inverted().is_identity());
    }

    #[test]
    fn serde_defaults_fill_missing_fields() {
        let range: ParamRange = serde_json::from_str("{\"min\":0.0,\"max\":2.0}").unwrap();
        assert_eq!(range.skew, 1.0);
        assert_eq!(range.step, 0.0);
        assert!(!range.inverted);
    }
}
