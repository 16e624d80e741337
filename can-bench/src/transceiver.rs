//! Scheduled transceiver
//!
//! A bounded, single-threaded duty cycle: transmit on a fixed period, poll for
//! inbound frames with a short timeout in between, stop at the run deadline.
//!
//! Two deadlines drive the loop:
//! - `next_tx`: when the next tick fires. It is re-anchored to the time the
//!   tick fired (`now + period`), never to the post-send time, so send jitter
//!   does not accumulate into drift.
//! - `run_end`: start + duration. Checked every iteration together with the
//!   cancel token.
//!
//! Within one tick every produced frame is sent before that tick's receive
//! poll. The channel is wrapped in a [`ChannelGuard`] and closed on every exit
//! path, including faults.

use crate::bus::{BusChannel, ChannelGuard};
use crate::config::{self, TransceiverConfig};
use crate::types::{Frame, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop signal, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters collected over one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Transmit ticks fired
    pub ticks: usize,
    pub frames_sent: usize,
    pub frames_received: usize,
    /// Inbound frames rejected by the receive callback (reported, not fatal)
    pub frame_errors: usize,
    /// Time of each tick relative to the start of the run
    #[serde(skip)]
    pub tick_offsets: Vec<Duration>,
    pub elapsed: Duration,
    /// True if the run stopped on the cancel token before its deadline
    pub cancelled: bool,
}

/// Periodic transmit + best-effort receive loop
#[derive(Debug, Clone)]
pub struct ScheduledTransceiver {
    config: TransceiverConfig,
    cancel: CancelToken,
}

impl ScheduledTransceiver {
    /// Create a transceiver; fails with `InvalidConfig` on bad timing
    pub fn new(config: TransceiverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Builder method: stop early when `token` is cancelled
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &TransceiverConfig {
        &self.config
    }

    /// Run until the configured duration has elapsed.
    ///
    /// * `on_tick` produces the frames for one transmit tick; an error from it
    ///   or from `send` ends the run.
    /// * `on_frame` sees every inbound frame synchronously. Errors for which
    ///   [`HarnessError::is_per_frame`](crate::HarnessError::is_per_frame) holds are logged
    ///   and counted; any other error ends the run.
    ///
    /// The channel is closed before this returns, on success or failure.
    pub fn run<C, T, R>(&self, channel: C, mut on_tick: T, mut on_frame: R) -> Result<RunReport>
    where
        C: BusChannel,
        T: FnMut() -> Result<Vec<Frame>>,
        R: FnMut(&Frame) -> Result<()>,
    {
        let mut channel = ChannelGuard::new(channel);
        let period = self.config.period()?;
        let duration = self.config.duration()?;
        let recv_timeout = self.config.recv_timeout()?;

        let start = Instant::now();
        let run_end = config::deadline("duration", start, duration)?;
        let mut next_tx = start;
        let mut report = RunReport::default();

        log::info!(
            "Transceiver started: period {:?}, duration {:?}, recv timeout {:?}",
            period,
            duration,
            recv_timeout
        );

        loop {
            let now = Instant::now();
            if now >= run_end {
                break;
            }
            if self.cancel.is_cancelled() {
                log::info!("Transceiver cancelled after {:?}", now - start);
                report.cancelled = true;
                break;
            }

            if now >= next_tx {
                let frames = on_tick()?;
                for frame in &frames {
                    channel.send(frame)?;
                }
                report.frames_sent += frames.len();
                report.ticks += 1;
                report.tick_offsets.push(now - start);
                // a period that overflows can never tick again before run_end
                next_tx = now.checked_add(period).unwrap_or(run_end);
                log::trace!("Tick {} sent {} frame(s)", report.ticks, frames.len());
            }

            let timeout = recv_timeout.min(run_end.saturating_duration_since(Instant::now()));
            if let Some(frame) = channel.recv(timeout)? {
                report.frames_received += 1;
                match on_frame(&frame) {
                    Ok(()) => {}
                    Err(e) if e.is_per_frame() => {
                        report.frame_errors += 1;
                        log::warn!("Inbound frame 0x{:X} rejected: {}", frame.id, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        report.elapsed = start.elapsed();
        log::info!(
            "Transceiver stopped: {} ticks, {} sent, {} received, {} rejected",
            report.ticks,
            report.frames_sent,
            report.frames_received,
            report.frame_errors
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::VirtualBus;
    use crate::types::HarnessError;

    /// Channel whose transport is permanently faulted
    struct BusOffChannel {
        closed: Arc<AtomicBool>,
    }

    impl BusChannel for BusOffChannel {
        fn send(&mut self, _frame: &Frame) -> Result<()> {
            Err(HarnessError::Transmit("bus off".to_string()))
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
            Ok(None)
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn heartbeat() -> Result<Vec<Frame>> {
        Ok(vec![Frame::standard(0x100, vec![0x01])])
    }

    #[test]
    fn test_tick_count_and_spacing() {
        let (local, _peer) = VirtualBus::pair();
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 0.05)).unwrap();

        let report = transceiver.run(local, heartbeat, |_| Ok(())).unwrap();

        assert!(
            (4..=6).contains(&report.ticks),
            "expected 4-6 ticks, got {}",
            report.ticks
        );
        assert_eq!(report.tick_offsets.len(), report.ticks);
        assert!(report.tick_offsets[0] < Duration::from_millis(2));

        for pair in report.tick_offsets.windows(2) {
            assert!(pair[1] >= pair[0]);
            let spacing = (pair[1] - pair[0]).as_secs_f64();
            assert!(
                (0.008..=0.012).contains(&spacing),
                "tick spacing {:.4} s outside ±20% of 0.01 s",
                spacing
            );
        }
    }

    #[test]
    fn test_frames_sent_in_order_each_tick() {
        let (local, mut peer) = VirtualBus::pair();
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 0.035)).unwrap();

        let report = transceiver
            .run(
                local,
                || {
                    Ok(vec![
                        Frame::standard(0xA5, vec![1]),
                        Frame::standard(0xA7, vec![2]),
                        Frame::standard(0xA6, vec![3]),
                    ])
                },
                |_| Ok(()),
            )
            .unwrap();

        let sent = peer.drain();
        assert_eq!(sent.len(), report.frames_sent);
        assert_eq!(sent.len(), report.ticks * 3);
        for tick in sent.chunks(3) {
            let ids: Vec<u32> = tick.iter().map(|f| f.id).collect();
            assert_eq!(ids, vec![0xA5, 0xA7, 0xA6]);
        }
    }

    #[test]
    fn test_per_frame_errors_do_not_stop_schedule() {
        let (local, mut peer) = VirtualBus::pair();
        peer.send(&Frame::standard(0x50B, vec![0x00; 4])).unwrap();
        peer.send(&Frame::standard(0x50B, vec![0x00; 8])).unwrap();

        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 0.03)).unwrap();
        let mut good = 0;
        let report = transceiver
            .run(local, heartbeat, |frame| {
                if frame.data.len() != 8 {
                    return Err(HarnessError::FrameLength {
                        message: "VCU_LC_Status_A".to_string(),
                        expected: 8,
                        actual: frame.data.len(),
                    });
                }
                good += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(report.frames_received, 2);
        assert_eq!(report.frame_errors, 1);
        assert_eq!(good, 1);
        assert!(report.ticks >= 2);
    }

    #[test]
    fn test_transmit_fault_is_fatal_and_closes_channel() {
        let closed = Arc::new(AtomicBool::new(false));
        let channel = BusOffChannel {
            closed: Arc::clone(&closed),
        };
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 1.0)).unwrap();

        let start = Instant::now();
        let err = transceiver.run(channel, heartbeat, |_| Ok(())).unwrap_err();

        assert!(matches!(err, HarnessError::Transmit(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_receive_callback_fatal_error_closes_channel() {
        let (local, mut peer) = VirtualBus::pair();
        let closed = local.closed_flag();
        peer.send(&Frame::standard(0x512, vec![0; 8])).unwrap();

        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 1.0)).unwrap();
        let err = transceiver
            .run(local, heartbeat, |_| {
                Err(HarnessError::UnknownSignal {
                    message: "VCU_Power_Limit_Status_BMsg".to_string(),
                    signal: "Missing".to_string(),
                })
            })
            .unwrap_err();

        assert!(matches!(err, HarnessError::UnknownSignal { .. }));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_tick_error_closes_channel() {
        let (local, _peer) = VirtualBus::pair();
        let closed = local.closed_flag();
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 1.0)).unwrap();

        let err = transceiver
            .run(
                local,
                || Err(HarnessError::UnknownMessage("MCM_Current_Info".to_string())),
                |_| Ok(()),
            )
            .unwrap_err();

        assert!(matches!(err, HarnessError::UnknownMessage(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_token_stops_run() {
        let (local, _peer) = VirtualBus::pair();
        let closed = local.closed_flag();
        let token = CancelToken::new();
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 5.0))
            .unwrap()
            .with_cancel_token(token.clone());

        let mut ticks = 0;
        let report = transceiver
            .run(
                local,
                || {
                    ticks += 1;
                    if ticks == 3 {
                        token.cancel();
                    }
                    heartbeat()
                },
                |_| Ok(()),
            )
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.ticks, 3);
        assert!(report.elapsed < Duration::from_secs(1));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_channel_closed_after_normal_run() {
        let (local, _peer) = VirtualBus::pair();
        let closed = local.closed_flag();
        let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 0.02)).unwrap();
        transceiver.run(local, heartbeat, |_| Ok(())).unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 0.0)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));

        for duration_s in [1e20, f64::INFINITY] {
            let err = ScheduledTransceiver::new(TransceiverConfig::new(0.01, duration_s)).unwrap_err();
            assert!(matches!(err, HarnessError::InvalidConfig(_)));
        }
    }

    #[test]
    fn test_unreachable_run_end_fails_without_panic() {
        // converts to a Duration, but no Instant is that far away
        let config = TransceiverConfig::new(0.01, 1.5e19);
        let transceiver = ScheduledTransceiver::new(config).unwrap();
        let (local, _peer) = VirtualBus::pair();
        let closed = local.closed_flag();

        let err = transceiver.run(local, heartbeat, |_| Ok(())).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
        assert!(closed.load(Ordering::SeqCst));
    }
}
