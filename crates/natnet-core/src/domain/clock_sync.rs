//! Server clock estimation using Cristian's algorithm.
//!
//! The server stamps each frame with ticks of its own high-resolution
//! counter.  To turn those into local times the client repeatedly measures
//! a round trip:
//!
//! ```text
//! client                         server
//!   |── EchoRequest(t_send) ──────▶|  stamps reception with ticks R
//!   |◀───── EchoResponse(t_send, R)|
//! t_recv
//! ```
//!
//! Assuming the two legs take equally long, the server clock read
//! `R + rtt / 2` at local time `t_recv`.  That pair becomes the sync point
//! from which every later conversion is extrapolated.
//!
//! # Filtering and skew
//!
//! Only echoes with a round trip close to the fastest one ever seen are
//! trusted; a slow echo most likely waited in a queue on one leg only.  The
//! acceptance threshold starts at the minimum RTT plus a small floor and
//! grows with the time since the last accepted echo, because an old sync
//! point becomes less accurate than a slightly slow fresh one.
//!
//! The two clocks also run at slightly different rates.  Each accepted echo
//! reveals how far the previous sync point's prediction had drifted; once
//! at least [`SKEW_MIN_INTERVAL`] separates the two points, that drift feeds
//! the skew estimate (halfway averaging after the first measurement).
//!
//! This type never reads a clock: every operation takes local times as
//! `f64` seconds from whatever monotonic source the caller uses.

use thiserror::Error;

use crate::protocol::messages::{EchoRequestMessage, EchoResponseMessage};

/// Constant part of the RTT acceptance margin, in seconds.
pub const RTT_ACCEPTANCE_FLOOR: f64 = 0.05e-3;

/// Extra RTT margin allowed per second since the last accepted sync.
pub const RTT_THRESHOLD_GROWTH: f64 = 10e-6;

/// Minimum sync point spacing, in seconds, for a drift measurement to count.
pub const SKEW_MIN_INTERVAL: f64 = 1.0;

/// Number of echoes exchanged right after connecting.
pub const INITIAL_SYNC_ECHOES: usize = 100;

/// Steady-state echo interval while sync is fresh.
pub const ECHO_INTERVAL: f64 = 0.5;
/// Echo interval once [`STALE_AFTER`] has passed without an accepted echo.
pub const STALE_ECHO_INTERVAL: f64 = 0.1;
/// Echo interval once [`LOST_AFTER`] has passed without an accepted echo.
pub const LOST_ECHO_INTERVAL: f64 = 0.01;
pub const STALE_AFTER: f64 = 5.0;
pub const LOST_AFTER: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum ClockSyncError {
    #[error("server clock frequency must be non-zero")]
    ZeroFrequency,

    /// An echo response that does not answer the outstanding request.
    #[error("echo response for request {received} does not match outstanding request {expected:?}")]
    ProtocolViolation {
        expected: Option<u64>,
        received: u64,
    },
}

/// A server time and the local time at which the server clock read it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPoint {
    pub server_time: f64,
    pub local_time: f64,
}

/// What a matched echo response did to the estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoOutcome {
    /// The first response; it established the sync point.
    Initialised { rtt: f64 },
    /// The sync point moved by `correction` seconds.
    Accepted { rtt: f64, correction: f64 },
    /// Too slow to trust; only the minimum RTT may have changed.
    Rejected { rtt: f64, threshold: f64 },
}

#[derive(Debug, Clone, Copy)]
struct PendingEcho {
    timestamp: u64,
    sent_at: f64,
}

#[derive(Debug, Clone)]
pub struct ClockSynchronizer {
    clock_frequency: u64,
    sync_point: Option<SyncPoint>,
    min_rtt: f64,
    skew: Option<f64>,
    echo_count: u64,
    pending: Option<PendingEcho>,
    last_echo_sent_at: Option<f64>,
}

impl ClockSynchronizer {
    /// Creates a synchroniser for a server clock ticking `clock_frequency` times per second.
    ///
    /// # Errors
    ///
    /// Returns [`ClockSyncError::ZeroFrequency`] for a zero frequency.
    pub fn new(clock_frequency: u64) -> Result<Self, ClockSyncError> {
        if clock_frequency == 0 {
            return Err(ClockSyncError::ZeroFrequency);
        }
        Ok(Self {
            clock_frequency,
            sync_point: None,
            min_rtt: f64::INFINITY,
            skew: None,
            echo_count: 0,
            pending: None,
            last_echo_sent_at: None,
        })
    }

    pub fn clock_frequency(&self) -> u64 {
        self.clock_frequency
    }

    pub fn sync_point(&self) -> Option<SyncPoint> {
        self.sync_point
    }

    pub fn is_synchronised(&self) -> bool {
        self.sync_point.is_some()
    }

    /// Smallest round trip seen so far; infinite before the first echo.
    pub fn min_rtt(&self) -> f64 {
        self.min_rtt
    }

    /// Relative rate difference applied when extrapolating; zero until measured.
    pub fn skew(&self) -> f64 {
        self.skew.unwrap_or(0.0)
    }

    /// Number of echo requests issued.
    pub fn echo_count(&self) -> u64 {
        self.echo_count
    }

    pub fn server_ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.clock_frequency as f64
    }

    /// Seconds between two server tick counts; negative if `to` precedes `from`.
    pub fn server_interval(&self, from: u64, to: u64) -> f64 {
        (to as f64 - from as f64) / self.clock_frequency as f64
    }

    /// Local time at which the server clock read `ticks`, or `None` before the first sync.
    pub fn server_to_local_time(&self, ticks: u64) -> Option<f64> {
        let sp = self.sync_point?;
        let elapsed_server = self.server_ticks_to_seconds(ticks) - sp.server_time;
        Some(sp.local_time + elapsed_server * (1.0 + self.skew()))
    }

    /// Server time (seconds) at local time `local_time`, or `None` before the first sync.
    pub fn local_to_server_time(&self, local_time: f64) -> Option<f64> {
        let sp = self.sync_point?;
        Some(sp.server_time + (local_time - sp.local_time) / (1.0 + self.skew()))
    }

    /// Records an echo sent at local time `now` and returns the request to send.
    ///
    /// Any earlier unanswered request is forgotten; its response will be
    /// rejected as a protocol violation.
    pub fn request_echo(&mut self, now: f64) -> EchoRequestMessage {
        let timestamp = (now * 1e9).round() as u64;
        self.pending = Some(PendingEcho {
            timestamp,
            sent_at: now,
        });
        self.last_echo_sent_at = Some(now);
        self.echo_count += 1;
        EchoRequestMessage { timestamp }
    }

    /// Feeds an echo response received at local time `received_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockSyncError::ProtocolViolation`] if the response does not
    /// carry the outstanding request's timestamp.  The outstanding request
    /// stays pending in that case.
    pub fn handle_echo_response(
        &mut self,
        response: &EchoResponseMessage,
        received_at: f64,
    ) -> Result<EchoOutcome, ClockSyncError> {
        let pending = match self.pending {
            Some(p) if p.timestamp == response.request_timestamp => p,
            other => {
                return Err(ClockSyncError::ProtocolViolation {
                    expected: other.map(|p| p.timestamp),
                    received: response.request_timestamp,
                })
            }
        };
        self.pending = None;

        let rtt = received_at - pending.sent_at;
        let server_reception = self.server_ticks_to_seconds(response.received_timestamp);
        let candidate = SyncPoint {
            server_time: server_reception + rtt / 2.0,
            local_time: received_at,
        };
        self.min_rtt = self.min_rtt.min(rtt);

        let Some(previous) = self.sync_point else {
            self.sync_point = Some(candidate);
            return Ok(EchoOutcome::Initialised { rtt });
        };

        let since_sync = received_at - previous.local_time;
        let threshold = self.min_rtt + RTT_ACCEPTANCE_FLOOR + RTT_THRESHOLD_GROWTH * since_sync;
        if rtt > threshold {
            return Ok(EchoOutcome::Rejected { rtt, threshold });
        }

        // `local_to_server_time` still extrapolates from `previous` here.
        let predicted = self.local_to_server_time(received_at).unwrap_or(candidate.server_time);
        let correction = candidate.server_time - predicted;
        if since_sync > SKEW_MIN_INTERVAL {
            let drift = correction / since_sync;
            self.skew = Some(match self.skew {
                None => -drift,
                Some(skew) => skew - drift / 2.0,
            });
        }
        self.sync_point = Some(candidate);
        Ok(EchoOutcome::Accepted { rtt, correction })
    }

    /// Whether a steady-state echo should be sent at local time `now`.
    ///
    /// The interval shrinks the longer no echo has been accepted, so a lost
    /// sync is recovered quickly without flooding the server while healthy.
    pub fn echo_due(&self, now: f64) -> bool {
        let Some(last_sent) = self.last_echo_sent_at else {
            return true;
        };
        let since_sync = self
            .sync_point
            .map_or(f64::INFINITY, |sp| now - sp.local_time);
        let interval = if since_sync > LOST_AFTER {
            LOST_ECHO_INTERVAL
        } else if since_sync > STALE_AFTER {
            STALE_ECHO_INTERVAL
        } else {
            ECHO_INTERVAL
        };
        now - last_sent >= interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQUENCY: u64 = 3_312_787;

    fn ticks(seconds: f64) -> u64 {
        (seconds * FREQUENCY as f64).round() as u64
    }

    /// Sends one echo at `sent_at` and answers it with `server_seconds` at `received_at`.
    fn exchange(
        sync: &mut ClockSynchronizer,
        sent_at: f64,
        server_seconds: f64,
        received_at: f64,
    ) -> EchoOutcome {
        let request = sync.request_echo(sent_at);
        let response = EchoResponseMessage {
            request_timestamp: request.timestamp,
            received_timestamp: ticks(server_seconds),
        };
        sync.handle_echo_response(&response, received_at).unwrap()
    }

    #[test]
    fn test_zero_frequency_is_rejected() {
        assert_eq!(
            ClockSynchronizer::new(0).err(),
            Some(ClockSyncError::ZeroFrequency)
        );
    }

    #[test]
    fn test_server_ticks_to_seconds() {
        let sync = ClockSynchronizer::new(1000).unwrap();

        assert_eq!(sync.server_ticks_to_seconds(2500), 2.5);
        assert_eq!(sync.server_interval(2500, 2000), -0.5);
    }

    #[test]
    fn test_conversions_unavailable_before_first_echo() {
        let sync = ClockSynchronizer::new(FREQUENCY).unwrap();

        assert_eq!(sync.server_to_local_time(12345), None);
        assert_eq!(sync.local_to_server_time(1.0), None);
    }

    #[test]
    fn test_first_echo_sets_sync_point_at_half_rtt() {
        // Arrange
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();

        // Act: 2 ms round trip, server received the request at 500 s
        let outcome = exchange(&mut sync, 10.0, 500.0, 10.002);

        // Assert
        assert!(matches!(outcome, EchoOutcome::Initialised { .. }));
        let sp = sync.sync_point().unwrap();
        assert!((sp.server_time - 500.001).abs() < 1e-6);
        assert_eq!(sp.local_time, 10.002);
        let local = sync.server_to_local_time(ticks(501.001)).unwrap();
        assert!((local - 11.002).abs() < 1e-6);
        assert!((sync.local_to_server_time(11.002).unwrap() - 501.001).abs() < 1e-6);
    }

    #[test]
    fn test_request_timestamp_is_local_nanoseconds() {
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();

        let request = sync.request_echo(1.5);

        assert_eq!(request.timestamp, 1_500_000_000);
        assert_eq!(sync.echo_count(), 1);
    }

    #[test]
    fn test_mismatched_response_is_protocol_violation() {
        // Arrange
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        let request = sync.request_echo(1.0);
        let stale = EchoResponseMessage {
            request_timestamp: request.timestamp - 1,
            received_timestamp: ticks(100.0),
        };

        // Act
        let result = sync.handle_echo_response(&stale, 1.001);

        // Assert: rejected, and the real response is still accepted afterwards
        assert_eq!(
            result,
            Err(ClockSyncError::ProtocolViolation {
                expected: Some(request.timestamp),
                received: request.timestamp - 1,
            })
        );
        assert!(!sync.is_synchronised());
        let matching = EchoResponseMessage {
            request_timestamp: request.timestamp,
            received_timestamp: ticks(100.0),
        };
        assert!(sync.handle_echo_response(&matching, 1.001).is_ok());
    }

    #[test]
    fn test_response_without_request_is_protocol_violation() {
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        let response = EchoResponseMessage {
            request_timestamp: 7,
            received_timestamp: 0,
        };

        let result = sync.handle_echo_response(&response, 1.0);

        assert_eq!(
            result,
            Err(ClockSyncError::ProtocolViolation {
                expected: None,
                received: 7
            })
        );
    }

    #[test]
    fn test_slow_echo_is_rejected_but_tracks_min_rtt() {
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        exchange(&mut sync, 0.0, 100.0, 0.001);
        let before = sync.sync_point();

        let outcome = exchange(&mut sync, 1.0, 101.0, 1.005);

        assert!(matches!(outcome, EchoOutcome::Rejected { .. }));
        assert_eq!(sync.sync_point(), before);
        assert!((sync.min_rtt() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_grows_with_time_since_last_sync() {
        // 1.2 ms against a 1 ms minimum: too slow after 1 s, acceptable after 30 s.
        let mut early = ClockSynchronizer::new(FREQUENCY).unwrap();
        exchange(&mut early, 0.0, 100.0, 0.001);
        let outcome = exchange(&mut early, 1.0, 101.0, 1.0012);
        assert!(matches!(outcome, EchoOutcome::Rejected { .. }));

        let mut late = ClockSynchronizer::new(FREQUENCY).unwrap();
        exchange(&mut late, 0.0, 100.0, 0.001);
        let outcome = exchange(&mut late, 30.0, 130.0, 30.0012);
        assert!(matches!(outcome, EchoOutcome::Accepted { .. }));
    }

    #[test]
    fn test_first_drift_measurement_initialises_skew() {
        // Server runs 100 ppm fast; symmetric 1 ms round trips.
        let rate = 1e-4;
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        exchange(&mut sync, 0.0, 100.0 + 0.0005, 0.001);

        let outcome = exchange(&mut sync, 10.0, 100.0 + 10.0005 * (1.0 + rate), 10.001);

        let EchoOutcome::Accepted { correction, .. } = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert!((correction - 10.0 * rate).abs() < 1e-6);
        assert!((sync.skew() + rate).abs() < 1e-6);
    }

    #[test]
    fn test_short_interval_does_not_touch_skew() {
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        exchange(&mut sync, 0.0, 100.0, 0.001);

        exchange(&mut sync, 0.5, 100.5002, 0.501);

        assert_eq!(sync.skew(), 0.0);
    }

    #[test]
    fn test_echo_interval_shrinks_when_sync_is_stale() {
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();
        assert!(sync.echo_due(0.0));
        exchange(&mut sync, 0.0, 100.0, 0.0);

        assert!(!sync.echo_due(0.4));
        assert!(sync.echo_due(0.5));

        sync.request_echo(5.95);
        assert!(!sync.echo_due(6.0));
        assert!(sync.echo_due(6.06));

        sync.request_echo(10.995);
        assert!(!sync.echo_due(11.0));
        assert!(sync.echo_due(11.006));
    }

    /// Deterministic xorshift generator for reproducible jitter.
    struct Jitter(u64);

    impl Jitter {
        /// Uniform in `[0, max)`.
        fn next(&mut self, max: f64) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f64 / (1u64 << 53) as f64 * max
        }
    }

    #[test]
    fn test_converges_under_jitter_and_skew() {
        // Arrange: server clock 1000 s ahead and 50 ppm fast; each leg
        // takes 0.25 ms plus up to 0.1 ms of jitter.
        let offset = 1000.0;
        let rate = 5e-5;
        let server_at = |local: f64| offset + local * (1.0 + rate);
        let mut jitter = Jitter(0x9E37_79B9_7F4A_7C15);
        let mut sync = ClockSynchronizer::new(FREQUENCY).unwrap();

        // Act: 200 echoes at the steady-state interval
        for i in 0..200 {
            let sent_at = 1.0 + f64::from(i) * ECHO_INTERVAL;
            let outbound = 0.25e-3 + jitter.next(0.1e-3);
            let inbound = 0.25e-3 + jitter.next(0.1e-3);
            let request = sync.request_echo(sent_at);
            let response = EchoResponseMessage {
                request_timestamp: request.timestamp,
                received_timestamp: ticks(server_at(sent_at + outbound)),
            };
            sync.handle_echo_response(&response, sent_at + outbound + inbound)
                .unwrap();
        }

        // Assert: prediction half a second past the last sync point
        let sp = sync.sync_point().unwrap();
        let local = sp.local_time + 0.5;
        let predicted = sync.server_to_local_time(ticks(server_at(local))).unwrap();
        assert!(
            (predicted - local).abs() < 0.25e-3,
            "prediction off by {} s",
            predicted - local
        );
        assert!((sync.skew() + rate).abs() < 1e-4, "skew {}", sync.skew());
        assert!(sync.min_rtt() > 0.49e-3);
    }
}
