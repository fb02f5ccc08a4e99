//! Local timestamps and latency breakdown for received frames.

use serde::{Deserialize, Serialize};

use crate::domain::clock_sync::ClockSynchronizer;
use crate::protocol::messages::TimingInfo;

/// When a frame was captured, in local time, and where its latency went.
///
/// All values are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampAndLatency {
    /// Local time of camera mid-exposure.
    pub timestamp: f64,
    /// Camera mid-exposure to server transmit, measured on the server clock.
    pub system_latency: f64,
    /// Server transmit to local receive.
    pub transit_latency: f64,
    /// Local receive to callback dispatch.
    pub processing_latency: f64,
}

impl TimestampAndLatency {
    /// Computes the breakdown for a frame received at `received_at` and dispatched at `now`.
    ///
    /// Returns `None` if the frame lacks hardware timestamps (protocol < 3.0)
    /// or the clock has not been synchronised yet.
    pub fn calculate(
        timing: &TimingInfo,
        received_at: f64,
        now: f64,
        clock: &ClockSynchronizer,
    ) -> Option<Self> {
        let exposure = timing.camera_mid_exposure_timestamp?;
        let transmit = timing.transmit_timestamp?;

        let timestamp = clock.server_to_local_time(exposure)?;
        let transmitted_at = clock.server_to_local_time(transmit)?;

        Some(Self {
            timestamp,
            system_latency: clock.server_interval(exposure, transmit),
            transit_latency: received_at - transmitted_at,
            processing_latency: now - received_at,
        })
    }

    /// Camera mid-exposure to callback dispatch.
    pub fn latency(&self) -> f64 {
        self.system_latency + self.transit_latency + self.processing_latency
    }
}
