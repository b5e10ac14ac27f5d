//! Frame Context
//!
//! [`FrameContext`] is the per-view state handed to the cull and update phases
//! of every frame. It owns the [`LightRegistry`], so independent views (or
//! worlds) each see only the lights culled for them.

use crate::renderer::modules::light::LightRegistry;

/// Frame number and simulation time of the frame being processed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStamp {
    pub frame_number: u64,
    pub time: f64,
}

#[derive(Debug, Default)]
pub struct FrameContext {
    pub stamp: FrameStamp,
    pub lights: LightRegistry,
}

impl FrameContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.stamp.frame_number
    }

    /// Starts the next frame.
    pub fn advance(&mut self, time: f64) -> FrameStamp {
        self.stamp.frame_number += 1;
        self.stamp.time = time;
        self.stamp
    }
}
