//! Track selection
//!
//! Implements:
//! - Bandwidth estimation (EWMA over transfer samples)
//! - Adaptive format selection within a track group
//! - Selection constraints from [`TrackSelectorParameters`]

use crate::types::{Format, TrackGroup, TrackSelection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Estimate used before any transfer has been measured, 1 Mbps
pub const DEFAULT_INITIAL_BITRATE_ESTIMATE: u64 = 1_000_000;

/// Share of the estimated bandwidth an adaptive selection may use
pub const DEFAULT_BANDWIDTH_FRACTION: f64 = 0.7;

/// Transfer sample
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    pub bytes: usize,
    pub duration: Duration,
}

impl BandwidthSample {
    /// Throughput in bits per second
    pub fn throughput_bps(&self) -> u64 {
        if self.duration.as_secs_f64() > 0.0 {
            ((self.bytes as f64 * 8.0) / self.duration.as_secs_f64()) as u64
        } else {
            0
        }
    }
}

struct MeterState {
    history: VecDeque<BandwidthSample>,
    estimate: Option<u64>,
}

/// Bandwidth estimate shared by the loader and the track selector
pub struct BandwidthMeter {
    initial_estimate: u64,
    max_history: usize,
    state: Mutex<MeterState>,
}

impl BandwidthMeter {
    pub fn new(initial_estimate: u64) -> Self {
        Self {
            initial_estimate,
            max_history: 20,
            state: Mutex::new(MeterState {
                history: VecDeque::with_capacity(20),
                estimate: None,
            }),
        }
    }

    /// Record a completed transfer
    pub fn record(&self, bytes: usize, duration: Duration) {
        let sample = BandwidthSample { bytes, duration };
        let throughput = sample.throughput_bps();
        if throughput == 0 {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.history.len() >= self.max_history {
            state.history.pop_front();
        }
        state.history.push_back(sample);

        // EWMA with alpha = 0.2
        let estimate = match state.estimate {
            None => throughput,
            Some(current) => ((current as f64 * 0.8) + (throughput as f64 * 0.2)) as u64,
        };
        state.estimate = Some(estimate);

        debug!(
            bytes,
            duration_ms = duration.as_millis() as u64,
            throughput_kbps = throughput / 1000,
            estimate_kbps = estimate / 1000,
            "Bandwidth sample recorded"
        );
    }

    /// Current estimate in bits per second
    pub fn bitrate_estimate(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .estimate
            .unwrap_or(self.initial_estimate)
    }

    pub fn sample_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BITRATE_ESTIMATE)
    }
}

/// Constraints for track selection; the defaults leave everything to the selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSelectorParameters {
    /// Upper bound on audio bitrate in bps
    pub max_audio_bitrate: Option<u32>,
    /// Preferred audio language (BCP-47)
    pub preferred_audio_language: Option<String>,
    pub force_lowest_bitrate: bool,
    pub force_highest_supported_bitrate: bool,
    /// Share of the bandwidth estimate adaptive selections may use
    pub bandwidth_fraction: f64,
}

impl Default for TrackSelectorParameters {
    fn default() -> Self {
        Self {
            max_audio_bitrate: None,
            preferred_audio_language: None,
            force_lowest_bitrate: false,
            force_highest_supported_bitrate: false,
            bandwidth_fraction: DEFAULT_BANDWIDTH_FRACTION,
        }
    }
}

impl TrackSelectorParameters {
    pub fn builder() -> TrackSelectorParametersBuilder {
        TrackSelectorParametersBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackSelectorParametersBuilder {
    params: TrackSelectorParameters,
}

impl TrackSelectorParametersBuilder {
    pub fn set_max_audio_bitrate(mut self, bitrate: u32) -> Self {
        self.params.max_audio_bitrate = Some(bitrate);
        self
    }

    pub fn set_preferred_audio_language(mut self, language: impl Into<String>) -> Self {
        self.params.preferred_audio_language = Some(language.into());
        self
    }

    pub fn set_force_lowest_bitrate(mut self, force: bool) -> Self {
        self.params.force_lowest_bitrate = force;
        self
    }

    pub fn set_force_highest_supported_bitrate(mut self, force: bool) -> Self {
        self.params.force_highest_supported_bitrate = force;
        self
    }

    pub fn build(self) -> TrackSelectorParameters {
        self.params
    }
}

/// Picks one format per track group
#[derive(Debug, Clone, Default)]
pub struct DefaultTrackSelector {
    parameters: TrackSelectorParameters,
}

impl DefaultTrackSelector {
    pub fn new(parameters: TrackSelectorParameters) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &TrackSelectorParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: TrackSelectorParameters) {
        self.parameters = parameters;
    }

    /// Select a format from each non-empty group
    pub fn select(&self, groups: &[TrackGroup], bandwidth_estimate: u64) -> Vec<TrackSelection> {
        groups
            .iter()
            .enumerate()
            .filter_map(|(group_index, group)| {
                let format_index = self.select_format(group, bandwidth_estimate)?;
                Some(TrackSelection {
                    group_index,
                    format_index,
                    format: group.formats[format_index].clone(),
                })
            })
            .collect()
    }

    fn select_format(&self, group: &TrackGroup, bandwidth_estimate: u64) -> Option<usize> {
        if group.formats.is_empty() {
            return None;
        }

        // Restrict to the preferred language when the group offers it
        let mut candidates: Vec<usize> = (0..group.formats.len()).collect();
        if let Some(lang) = &self.parameters.preferred_audio_language {
            let matching: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| group.formats[i].language.as_deref() == Some(lang.as_str()))
                .collect();
            if !matching.is_empty() {
                candidates = matching;
            }
        }

        let bitrate = |i: &usize| group.formats[*i].bitrate.unwrap_or(0) as u64;
        let lowest = candidates.iter().copied().min_by_key(bitrate);

        if self.parameters.force_lowest_bitrate {
            return lowest;
        }

        let cap = self.parameters.max_audio_bitrate.map_or(u64::MAX, u64::from);
        let within_cap: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| bitrate(i) <= cap)
            .collect();
        if within_cap.is_empty() {
            return lowest;
        }

        if self.parameters.force_highest_supported_bitrate || !group.is_adaptive() {
            return within_cap.iter().copied().max_by_key(bitrate);
        }

        let allowed = (bandwidth_estimate as f64 * self.parameters.bandwidth_fraction) as u64;
        within_cap
            .iter()
            .copied()
            .filter(|i| bitrate(i) <= allowed)
            .max_by_key(bitrate)
            .or(lowest)
    }
}

/// Convenience for a single-format group
pub fn single_format_group(format: Format) -> TrackGroup {
    TrackGroup::new(vec![format])
}
