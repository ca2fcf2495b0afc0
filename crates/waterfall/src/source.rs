//! Slice sources: the fetch collaborator behind a waterfall session.

use crate::{SliceIndex, SliceRange, WaterfallSlice};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read capture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed capture file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("range {range} is outside capture of {total} slices")]
    OutOfRange { range: SliceRange, total: usize },
    #[error("slice source unavailable: {0}")]
    Unavailable(String),
}

/// Produces slice payloads for a capture. Implementations are shared with
/// fetch workers and must be thread-safe.
pub trait SliceSource: Send + Sync {
    fn capture_id(&self) -> &str;

    /// Total slice count according to the capture metadata.
    fn total_slices(&self) -> Result<usize, SourceError>;

    /// Payloads for `range` in index order. May return fewer than requested
    /// at the end of the capture.
    fn fetch(&self, range: SliceRange) -> Result<Vec<WaterfallSlice>, SourceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureFile {
    pub capture_id: String,
    #[serde(default)]
    pub total_slices: Option<usize>,
    pub slices: Vec<WaterfallSlice>,
}

/// Capture held in a JSON file, loaded once at open. Slices are keyed by
/// their own `index`, so files may skip indices.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    capture_id: String,
    total_slices: usize,
    slices: BTreeMap<SliceIndex, WaterfallSlice>,
}

impl JsonFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let capture: CaptureFile = serde_json::from_str(&text)?;
        let source = Self::from_capture(capture);
        info!(
            target: "waterfall::source",
            path = %path.display(),
            capture = %source.capture_id,
            slices = source.slices.len(),
            total = source.total_slices,
            "capture file loaded"
        );
        Ok(source)
    }

    pub fn from_capture(capture: CaptureFile) -> Self {
        let slices: BTreeMap<SliceIndex, WaterfallSlice> = capture
            .slices
            .into_iter()
            .map(|slice| (slice.index, slice))
            .collect();
        let total_slices = capture
            .total_slices
            .unwrap_or_else(|| slices.keys().next_back().map_or(0, |last| last + 1));
        Self {
            capture_id: capture.capture_id,
            total_slices,
            slices,
        }
    }

    pub fn save(capture: &CaptureFile, path: impl AsRef<Path>) -> Result<(), SourceError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(capture)?;
        fs::write(path, text).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SliceSource for JsonFileSource {
    fn capture_id(&self) -> &str {
        &self.capture_id
    }

    fn total_slices(&self) -> Result<usize, SourceError> {
        Ok(self.total_slices)
    }

    fn fetch(&self, range: SliceRange) -> Result<Vec<WaterfallSlice>, SourceError> {
        if range.start >= self.total_slices {
            return Err(SourceError::OutOfRange {
                range,
                total: self.total_slices,
            });
        }
        // Contiguous run from range.start; anything after a gap stays missing.
        let wanted = range.clamp_to(self.total_slices);
        let mut run = Vec::new();
        let present = self.slices.range(wanted.start..wanted.end);
        for (expected, (index, slice)) in wanted.iter().zip(present) {
            if *index != expected {
                break;
            }
            run.push(slice.clone());
        }
        Ok(run)
    }
}

/// Generated capture: a tone drifting across the band over a noise floor.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    capture_id: String,
    total_slices: usize,
    bins: usize,
    latency: Duration,
    started_at: DateTime<Utc>,
}

impl SyntheticSource {
    pub fn new(capture_id: impl Into<String>, total_slices: usize, bins: usize) -> Self {
        Self {
            capture_id: capture_id.into(),
            total_slices,
            bins: bins.max(1),
            latency: Duration::ZERO,
            started_at: Utc::now(),
        }
    }

    /// Sleeps this long per fetch, to mimic a remote gateway.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn slice(&self, index: usize) -> WaterfallSlice {
        let tone = (index * 7) % self.bins;
        let bins = (0..self.bins)
            .map(|b| {
                let distance = b as f32 - tone as f32;
                let peak = 50.0 * (-(distance * distance) / 2.0).exp();
                -90.0 + noise(index, b) * 6.0 + peak
            })
            .collect();
        WaterfallSlice {
            index,
            timestamp: Some(self.started_at + ChronoDuration::milliseconds(100 * index as i64)),
            center_frequency_hz: 915.0e6,
            sample_rate_hz: 10.0e6,
            bins,
        }
    }

    fn generate_batch(&self, range: SliceRange) -> Vec<WaterfallSlice> {
        range.clamp_to(self.total_slices).iter().map(|i| self.slice(i)).collect()
    }
}

impl SliceSource for SyntheticSource {
    fn capture_id(&self) -> &str {
        &self.capture_id
    }

    fn total_slices(&self) -> Result<usize, SourceError> {
        Ok(self.total_slices)
    }

    fn fetch(&self, range: SliceRange) -> Result<Vec<WaterfallSlice>, SourceError> {
        if range.start >= self.total_slices {
            return Err(SourceError::OutOfRange {
                range,
                total: self.total_slices,
            });
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        debug!(target: "waterfall::source", %range, "synthetic slices generated");
        Ok(self.generate_batch(range))
    }
}

// Cheap deterministic hash noise in [0, 1).
fn noise(index: usize, bin: usize) -> f32 {
    let mut x = (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (bin as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    (x >> 40) as f32 / (1u64 << 24) as f32
}
