//! Supervision engine.
//!
//! States:
//! - Idle: timer disarmed, no frames are sent
//! - Announcing: timer armed, HSRv0 only, fewer than three announces sent
//! - LifeChecking: timer armed, steady state
//!
//! Entering operational state Up resets the announce count and arms the
//! timer one announce interval out. Each firing builds one supervision
//! frame under the sequence lock, forwards it and re-arms itself with the
//! interval chosen by the protocol variant. Leaving Up disarms the timer.

use crate::device::HsrDevice;
use crate::error::{HsrError, Result};
use crate::external::ForwardingEngine;
use crate::frame::{FrameInfo, SupervisionFrame, Tagging, alloc_frame};
use crate::netdev::NetDevice;
use crate::types::{
    DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_LIFE_CHECK_INTERVAL, HSR_SEQNR_START, HSR_SUP_SEQNR_START,
    MAX_ANNOUNCE_COUNT, MacAddress, OperState, ProtocolVersion, SupervisionVlan, TC_PRIO_CONTROL,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Weak;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sequence counters and announce bookkeeping, guarded by the device's
/// sequence lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    /// Frame sequence number (also used by HSRv0 supervision frames).
    pub sequence_nr: u16,
    /// Supervision sequence number (HSRv1 and PRP).
    pub sup_sequence_nr: u16,
    /// Announce frames sent since the device last came up.
    pub announce_count: u8,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self {
            sequence_nr: HSR_SEQNR_START,
            sup_sequence_nr: HSR_SUP_SEQNR_START,
            announce_count: 0,
        }
    }
}

impl SequenceState {
    /// Returns the current frame sequence number and advances it.
    pub fn next_frame_seq(&mut self) -> u16 {
        let seq = self.sequence_nr;
        self.sequence_nr = seq.wrapping_add(1);
        seq
    }

    /// Returns the current supervision sequence number and advances it.
    pub fn next_sup_seq(&mut self) -> u16 {
        let seq = self.sup_sequence_nr;
        self.sup_sequence_nr = seq.wrapping_add(1);
        seq
    }
}

/// Supervision frame intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionTiming {
    #[serde(with = "humantime_serde")]
    pub announce_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub life_check_interval: Duration,
}

impl Default for SupervisionTiming {
    fn default() -> Self {
        Self {
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            life_check_interval: DEFAULT_LIFE_CHECK_INTERVAL,
        }
    }
}

/// Which counter numbers a supervision frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSource {
    Frame,
    Supervision,
}

/// Everything a protocol variant needs to emit one supervision frame.
pub struct SupervisionContext<'a> {
    pub version: ProtocolVersion,
    /// Supervision multicast address.
    pub dst: MacAddress,
    /// Address of the redundancy device.
    pub src: MacAddress,
    pub vlan: Option<SupervisionVlan>,
    pub enabled: bool,
    pub timing: SupervisionTiming,
    pub seq: &'a mut SequenceState,
    pub forwarder: &'a dyn ForwardingEngine,
}

impl SupervisionContext<'_> {
    /// Allocates, numbers and forwards `frame`. The sequence counter only
    /// advances once a buffer is available.
    pub fn emit(&mut self, mut frame: SupervisionFrame, source: SequenceSource) -> Result<SupervisionFrame> {
        if !self.enabled {
            return Err(HsrError::SupervisionDisabled);
        }

        let mut buf = alloc_frame(frame.unpadded_len().max(frame.min_len()))?;

        let seq = match source {
            SequenceSource::Frame => self.seq.next_frame_seq(),
            SequenceSource::Supervision => self.seq.next_sup_seq(),
        };
        frame.sequence_nr = seq;
        if let Some(tag) = frame.hsr_tag.as_mut() {
            tag.sequence_nr = seq;
        }

        frame.encode_into(&mut buf);

        let tagging = if frame.hsr_tag.is_some() {
            Tagging::HsrTag
        } else {
            Tagging::Standard
        };
        let priority = self.vlan.map(|v| v.pcp).unwrap_or(TC_PRIO_CONTROL);

        self.forwarder
            .forward(FrameInfo::supervision(Bytes::from(buf), seq, tagging, priority));

        Ok(frame)
    }
}

/// Outcome of one supervision cycle.
#[derive(Debug)]
pub struct SupervisionResult {
    /// Delay before the next cycle.
    pub interval: Duration,
    /// The frame handed to the forwarding engine.
    pub sent: Result<SupervisionFrame>,
}

/// Observable state of the supervision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisionPhase {
    Idle,
    Announcing,
    LifeChecking,
}

/// A single-instance task timer. Arming replaces any pending instance;
/// the task re-arms itself by looping.
#[derive(Debug, Default)]
pub(crate) struct TaskTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskTimer {
    pub(crate) fn arm<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        *handle = Some(tokio::spawn(task));
    }

    /// Cancels the pending instance. Returns whether one was pending.
    pub(crate) fn disarm(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Timer body: wait, send, re-arm while the master stays administratively up.
async fn announce_task(device: Weak<HsrDevice>, first_delay: Duration) {
    let mut delay = first_delay;
    loop {
        tokio::time::sleep(delay).await;

        let Some(device) = device.upgrade() else {
            return;
        };

        delay = device.send_supervision().await;

        if !device.master.is_admin_up() {
            debug!(device = %device.name, "Master down, supervision timer not re-armed");
            return;
        }
    }
}

impl HsrDevice {
    /// One supervision cycle. Returns the delay before the next one.
    pub(crate) async fn send_supervision(&self) -> Duration {
        let mut seq = self.seq.lock().await;
        let mut ctx = SupervisionContext {
            version: self.version,
            dst: self.supervision.multicast,
            src: self.master.mac(),
            vlan: self.supervision.vlan,
            enabled: self.supervision.enabled,
            timing: self.supervision.timing,
            seq: &mut seq,
            forwarder: self.env.forwarder.as_ref(),
        };
        let result = self.ops.send_supervision_frame(&mut ctx);
        drop(seq);

        let mut stats = self.stats.write().await;
        match &result.sent {
            Ok(frame) => {
                stats.tx_supervision += 1;
                debug!(
                    device = %self.name,
                    tlv = ?frame.tlv,
                    seq = frame.sequence_nr,
                    next_ms = result.interval.as_millis() as u64,
                    "Sent supervision frame"
                );
            }
            Err(HsrError::SupervisionDisabled) => {
                stats.tx_supervision_skipped += 1;
            }
            Err(e) => {
                stats.tx_supervision_skipped += 1;
                if !self.sup_failure_reported.swap(true, Ordering::Relaxed) {
                    warn!(device = %self.name, protocol = %self.version, error = %e, "Could not send supervision frame");
                } else {
                    debug!(device = %self.name, error = %e, "Could not send supervision frame");
                }
            }
        }

        result.interval
    }

    /// Arms or disarms the supervision timer on Up transitions.
    pub(crate) async fn check_announce(&self, old: OperState, new: OperState) {
        if new == OperState::Up && old != OperState::Up {
            self.seq.lock().await.announce_count = 0;
            self.announce_timer.arm(announce_task(
                self.weak_self.clone(),
                self.supervision.timing.announce_interval,
            ));
            self.stats.write().await.supervision_arms += 1;
            debug!(device = %self.name, "Supervision timer armed");
        }

        if new != OperState::Up && old == OperState::Up {
            self.announce_timer.disarm();
            self.stats.write().await.supervision_disarms += 1;
            debug!(device = %self.name, "Supervision timer disarmed");
        }
    }

    /// Current supervision engine state.
    pub async fn supervision_phase(&self) -> SupervisionPhase {
        if !self.announce_timer.is_armed() {
            return SupervisionPhase::Idle;
        }

        let announce_count = self.seq.lock().await.announce_count;
        if self.version == ProtocolVersion::HsrV0 && announce_count < MAX_ANNOUNCE_COUNT {
            SupervisionPhase::Announcing
        } else {
            SupervisionPhase::LifeChecking
        }
    }

    /// Snapshot of the sequence counters.
    pub async fn sequence_state(&self) -> SequenceState {
        self.seq.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_near_wrap() {
        let state = SequenceState::default();
        assert_eq!(state.sequence_nr, HSR_SEQNR_START);
        assert_eq!(state.sup_sequence_nr, HSR_SUP_SEQNR_START);
        assert_eq!(state.announce_count, 0);
    }

    #[test]
    fn test_counters_wrap() {
        let mut state = SequenceState {
            sequence_nr: u16::MAX,
            sup_sequence_nr: u16::MAX,
            announce_count: 0,
        };

        assert_eq!(state.next_frame_seq(), u16::MAX);
        assert_eq!(state.next_frame_seq(), 0);
        assert_eq!(state.next_sup_seq(), u16::MAX);
        assert_eq!(state.sup_sequence_nr, 0);
    }

    #[test]
    fn test_counter_after_n_operations() {
        let mut state = SequenceState::default();
        let n = 5000u32;
        for _ in 0..n {
            state.next_frame_seq();
        }
        let expected = ((u32::from(HSR_SEQNR_START) + n) % 65536) as u16;
        assert_eq!(state.sequence_nr, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timer_single_instance() {
        let timer = TaskTimer::default();
        assert!(!timer.is_armed());

        timer.arm(async { tokio::time::sleep(Duration::from_secs(10)).await });
        assert!(timer.is_armed());

        // Re-arming replaces the pending instance
        timer.arm(async { tokio::time::sleep(Duration::from_secs(10)).await });
        assert!(timer.is_armed());

        assert!(timer.disarm());
        assert!(!timer.is_armed());
        assert!(!timer.disarm());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timer_finished_is_not_armed() {
        let timer = TaskTimer::default();
        timer.arm(async {});
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!timer.is_armed());
    }
}
