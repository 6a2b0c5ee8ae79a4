//! Buffering policy for playback
//!
//! Handles:
//! - Buffer duration thresholds (min/max, start and restart after rebuffer)
//! - Back buffer retention
//! - Byte budget for buffered media
//! - Load/playback start decisions derived from the thresholds

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default allocation unit for buffered media, 64 KiB
pub const DEFAULT_BUFFER_SEGMENT_SIZE: usize = 64 * 1024;

/// Memory allocator settings for buffered media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Release allocations when the engine resets
    pub trim_on_reset: bool,
    /// Size of each allocation in bytes
    pub segment_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            trim_on_reset: true,
            segment_size: DEFAULT_BUFFER_SEGMENT_SIZE,
        }
    }
}

/// Buffering policy handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPolicy {
    /// Keep loading at least until this much media is buffered
    pub min_buffer_ms: u64,
    /// Never buffer more than this much media
    pub max_buffer_ms: u64,
    /// Media required to start playback
    pub buffer_for_playback_ms: u64,
    /// Media required to resume playback after a rebuffer
    pub buffer_for_playback_after_rebuffer_ms: u64,
    /// Already played media kept behind the playhead
    pub back_buffer_ms: u64,
    /// Retain back buffer from the previous keyframe
    pub retain_back_buffer_from_keyframe: bool,
    /// Byte budget for buffered media
    pub target_buffer_bytes: usize,
    /// Duration thresholds take precedence over the byte budget
    pub prioritize_time_over_size: bool,
    /// Allocator settings
    pub allocator: AllocatorConfig,
}

impl BufferPolicy {
    pub fn builder() -> BufferPolicyBuilder {
        BufferPolicyBuilder::default()
    }

    /// Check the duration ordering and the byte budget
    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_ms > self.buffer_for_playback_ms {
            return Err(Error::InvalidConfig(format!(
                "min_buffer_ms ({}) must not exceed buffer_for_playback_ms ({})",
                self.min_buffer_ms, self.buffer_for_playback_ms
            )));
        }
        if self.buffer_for_playback_ms > self.buffer_for_playback_after_rebuffer_ms {
            return Err(Error::InvalidConfig(format!(
                "buffer_for_playback_ms ({}) must not exceed buffer_for_playback_after_rebuffer_ms ({})",
                self.buffer_for_playback_ms, self.buffer_for_playback_after_rebuffer_ms
            )));
        }
        if self.buffer_for_playback_after_rebuffer_ms > self.max_buffer_ms {
            return Err(Error::InvalidConfig(format!(
                "buffer_for_playback_after_rebuffer_ms ({}) must not exceed max_buffer_ms ({})",
                self.buffer_for_playback_after_rebuffer_ms, self.max_buffer_ms
            )));
        }
        if self.target_buffer_bytes == 0 {
            return Err(Error::InvalidConfig(
                "target_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.allocator.segment_size == 0 {
            return Err(Error::InvalidConfig(
                "allocator segment_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether enough media is buffered to start (or restart) playback
    pub fn should_start_playback(
        &self,
        buffered_ms: u64,
        buffered_bytes: usize,
        rebuffering: bool,
    ) -> bool {
        let required = if rebuffering {
            self.buffer_for_playback_after_rebuffer_ms
        } else {
            self.buffer_for_playback_ms
        };
        required == 0
            || buffered_ms >= required
            || (!self.prioritize_time_over_size && buffered_bytes >= self.target_buffer_bytes)
    }
}

impl Default for BufferPolicy {
    /// The demo buffering policy
    fn default() -> Self {
        Self {
            min_buffer_ms: 5_000,
            max_buffer_ms: 50 * 60 * 1000,
            buffer_for_playback_ms: 5_000,
            buffer_for_playback_after_rebuffer_ms: 5 * 60 * 1000,
            back_buffer_ms: 5 * 60 * 1000,
            retain_back_buffer_from_keyframe: false,
            target_buffer_bytes: 200 * 1024 * 1024,
            prioritize_time_over_size: true,
            allocator: AllocatorConfig::default(),
        }
    }
}

/// Builder mirroring the engine's load-control setters
#[derive(Debug, Clone, Default)]
pub struct BufferPolicyBuilder {
    policy: BufferPolicy,
}

impl BufferPolicyBuilder {
    pub fn set_allocator(mut self, allocator: AllocatorConfig) -> Self {
        self.policy.allocator = allocator;
        self
    }

    pub fn set_buffer_durations_ms(
        mut self,
        min_buffer_ms: u64,
        max_buffer_ms: u64,
        buffer_for_playback_ms: u64,
        buffer_for_playback_after_rebuffer_ms: u64,
    ) -> Self {
        self.policy.min_buffer_ms = min_buffer_ms;
        self.policy.max_buffer_ms = max_buffer_ms;
        self.policy.buffer_for_playback_ms = buffer_for_playback_ms;
        self.policy.buffer_for_playback_after_rebuffer_ms = buffer_for_playback_after_rebuffer_ms;
        self
    }

    pub fn set_buffer_durations(
        self,
        min: Duration,
        max: Duration,
        for_playback: Duration,
        after_rebuffer: Duration,
    ) -> Self {
        self.set_buffer_durations_ms(
            min.as_millis() as u64,
            max.as_millis() as u64,
            for_playback.as_millis() as u64,
            after_rebuffer.as_millis() as u64,
        )
    }

    pub fn set_back_buffer(mut self, back_buffer_ms: u64, retain_from_keyframe: bool) -> Self {
        self.policy.back_buffer_ms = back_buffer_ms;
        self.policy.retain_back_buffer_from_keyframe = retain_from_keyframe;
        self
    }

    pub fn set_target_buffer_bytes(mut self, bytes: usize) -> Self {
        self.policy.target_buffer_bytes = bytes;
        self
    }

    pub fn set_prioritize_time_over_size_thresholds(mut self, prioritize: bool) -> Self {
        self.policy.prioritize_time_over_size = prioritize;
        self
    }

    /// Validate and return the policy
    pub fn build(self) -> Result<BufferPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Stateful load decisions over a [`BufferPolicy`]
///
/// Between the min and max thresholds the previous decision is kept, so
/// loading does not flap around a single threshold.
#[derive(Debug, Clone)]
pub struct LoadController {
    policy: BufferPolicy,
    is_loading: bool,
}

impl LoadController {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            policy,
            is_loading: false,
        }
    }

    pub fn policy(&self) -> &BufferPolicy {
        &self.policy
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Decide whether the engine should keep fetching media
    pub fn should_continue_loading(&mut self, buffered_ms: u64, buffered_bytes: usize) -> bool {
        let target_reached = buffered_bytes >= self.policy.target_buffer_bytes;

        if buffered_ms < self.policy.min_buffer_ms {
            self.is_loading = self.policy.prioritize_time_over_size || !target_reached;
        } else if buffered_ms >= self.policy.max_buffer_ms || target_reached {
            self.is_loading = false;
        }

        debug!(
            buffered_ms,
            buffered_bytes,
            is_loading = self.is_loading,
            "Load decision"
        );

        self.is_loading
    }

    /// Forget the previous decision
    pub fn reset(&mut self) {
        self.is_loading = false;
    }
}
