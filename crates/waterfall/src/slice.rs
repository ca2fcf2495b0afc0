use crate::SliceIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time step of a spectrogram capture: power per frequency bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallSlice {
    pub index: SliceIndex,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub center_frequency_hz: f64,
    #[serde(default)]
    pub sample_rate_hz: f64,
    /// Power in dB, lowest frequency first.
    pub bins: Vec<f32>,
}

impl WaterfallSlice {
    pub fn new(index: SliceIndex, bins: Vec<f32>) -> Self {
        Self {
            index,
            timestamp: None,
            center_frequency_hz: 0.0,
            sample_rate_hz: 0.0,
            bins,
        }
    }

    /// `(min, max)` power across bins, `None` for an empty slice.
    pub fn power_range(&self) -> Option<(f32, f32)> {
        self.bins
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Bin index with the highest power.
    pub fn peak_bin(&self) -> Option<usize> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Frequency of bin `bin` assuming bins span `sample_rate_hz` around the center.
    pub fn bin_frequency_hz(&self, bin: usize) -> Option<f64> {
        if self.bins.is_empty() || bin >= self.bins.len() || self.sample_rate_hz <= 0.0 {
            return None;
        }
        let step = self.sample_rate_hz / self.bins.len() as f64;
        Some(self.center_frequency_hz - self.sample_rate_hz / 2.0 + step * (bin as f64 + 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_range_skips_non_finite() {
        let slice = WaterfallSlice::new(0, vec![-90.0, f32::NAN, -40.5, -70.0]);
        assert_eq!(slice.power_range(), Some((-90.0, -40.5)));
        assert_eq!(slice.peak_bin(), Some(2));
        assert_eq!(WaterfallSlice::new(1, vec![]).power_range(), None);
    }

    #[test]
    fn test_bin_frequency() {
        let mut slice = WaterfallSlice::new(0, vec![0.0; 4]);
        slice.center_frequency_hz = 100.0e6;
        slice.sample_rate_hz = 4.0e6;
        assert_eq!(slice.bin_frequency_hz(0), Some(98.5e6));
        assert_eq!(slice.bin_frequency_hz(3), Some(101.5e6));
        assert_eq!(slice.bin_frequency_hz(4), None);
    }

    #[test]
    fn test_deserialize_minimal_slice() {
        let slice: WaterfallSlice =
            serde_json::from_str(r#"{ "index": 3, "bins": [-80.0, -75.5] }"#).unwrap();
        assert_eq!(slice.index, 3);
        assert!(slice.timestamp.is_none());
        assert_eq!(slice.bins.len(), 2);
    }
}
