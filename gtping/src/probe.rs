//! The probe loop.
//!
//! A single thread alternates between sending one echo request per interval
//! and waiting, always with a bounded timeout, for replies. The loop is a
//! three state machine:
//!
//! ```text
//!   Running --count reached--> Draining --wait expired--> Stopped
//!      |                          |
//!      +----stop flag / fatal error----------------------> Stopped
//! ```

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    clock::Clock,
    config::ProbeConfig,
    error::{
        is_soft_recv_error, is_soft_send_error, is_transient, ProbeError,
        Result,
    },
    packet::EchoPacket,
    report::{ReplyEvent, Reporter},
    transport::Transport,
    tracker::{ReplyClass, RttTracker, Summary},
};

/// Shortest readiness wait, keeps the loop from spinning right before a
/// deadline.
const MIN_WAIT: f64 = 0.001;

/// Large enough for replies carrying extra information elements.
const RECV_BUF_LEN: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// All requests sent, waiting out the reply timeout.
    Draining,
    Stopped,
}

/// Counters and timestamps of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: Phase,
    pub sent: u32,
    /// Fresh and stale replies. Duplicates are counted by the tracker.
    pub received: u32,
    /// Refused or unreachable, on send or receive.
    pub refused: u32,
    /// Current reply wait in seconds.
    pub wait: f64,
    pub start: f64,
    pub last_send: Option<f64>,
    pub last_recv: Option<f64>,
    /// Requests handed out so far, including refused ones.
    pub next_seq: u32,
}

impl RunState {
    fn new(wait: f64) -> Self {
        Self {
            phase: Phase::Running,
            sent: 0,
            received: 0,
            refused: 0,
            wait,
            start: 0.0,
            last_send: None,
            last_recv: None,
            next_seq: 0,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub target: String,
    pub sent: u32,
    pub received: u32,
    pub duplicates: u32,
    pub reorders: u32,
    pub refused: u32,
    /// Seconds from start to stop.
    pub elapsed: f64,
    pub loss_percent: f64,
    pub rtt: Option<Summary>,
}

impl RunReport {
    /// Exit status: success if anything at all came back.
    pub fn success(&self) -> bool {
        self.received > 0
    }
}

pub fn loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    100.0 * sent.saturating_sub(received) as f64 / sent as f64
}

pub struct Probe<T, C> {
    config: ProbeConfig,
    transport: T,
    clock: C,
    tracker: RttTracker,
    state: RunState,
}

impl<T: Transport, C: Clock> Probe<T, C> {
    pub fn new(config: ProbeConfig, transport: T, clock: C) -> Self {
        let state = RunState::new(config.initial_wait());
        Self {
            config,
            transport,
            clock,
            tracker: RttTracker::new(),
            state,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn tracker(&self) -> &RttTracker {
        &self.tracker
    }

    /// Run until the count is exhausted and drained, `stop` is raised, or a
    /// fatal error occurs.
    pub fn run(
        &mut self,
        stop: &AtomicBool,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        self.state.start = self.clock.now();
        reporter
            .start(&self.config.target, self.transport.peer())
            .map_err(ProbeError::Report)?;

        while self.state.phase != Phase::Stopped {
            if stop.load(Ordering::Relaxed) {
                debug!("stop requested");
                self.state.phase = Phase::Stopped;
                break;
            }
            self.step(reporter)?;
        }

        let report = self.report();
        reporter.finish(&report).map_err(ProbeError::Report)?;
        Ok(report)
    }

    /// One iteration: maybe send, maybe change phase, wait, maybe receive.
    pub fn step(&mut self, reporter: &mut dyn Reporter) -> Result<()> {
        let now = self.clock.now();
        if self.state.phase == Phase::Running
            && !self.count_reached()
            && self.send_due(now)
        {
            self.send_request(now, reporter)?;
        }

        if self.state.phase == Phase::Running && self.count_reached() {
            debug!(sent = self.state.sent, "count reached, draining");
            self.state.phase = Phase::Draining;
        }

        let now = self.clock.now();
        if self.state.phase == Phase::Draining && now > self.drain_deadline() {
            debug!(wait = self.state.wait, "no more replies expected");
            self.state.phase = Phase::Stopped;
            return Ok(());
        }

        let timeout = self.wait_budget(now);
        trace!(?timeout, "waiting for replies");
        match self.transport.wait_readable(timeout) {
            Ok(true) => self.receive_reply(reporter),
            Ok(false) => Ok(()),
            Err(err) if is_transient(&err) => Ok(()),
            Err(err) => Err(ProbeError::Wait(err)),
        }
    }

    fn count_reached(&self) -> bool {
        self.config.count != 0 && self.state.next_seq >= self.config.count
    }

    fn send_due(&self, now: f64) -> bool {
        match self.state.last_send {
            Some(last) => now > last + self.config.interval,
            None => true,
        }
    }

    fn drain_deadline(&self) -> f64 {
        let last = match (self.state.last_send, self.state.last_recv) {
            (Some(send), Some(recv)) => send.max(recv),
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => self.state.start,
        };
        last + self.state.wait
    }

    /// Half the time left until the next decision, never below MIN_WAIT.
    fn wait_budget(&self, now: f64) -> Duration {
        let until = match self.state.phase {
            Phase::Draining => self.drain_deadline(),
            _ => match self.state.last_send {
                Some(last) => last + self.config.interval,
                None => now,
            },
        };
        let budget = ((until - now) / 2.0).max(MIN_WAIT);
        let budget = if budget.is_finite() { budget } else { MIN_WAIT };
        Duration::from_secs_f64(budget)
    }

    fn send_request(
        &mut self,
        now: f64,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let seq = self.state.next_seq;
        self.state.next_seq = seq.wrapping_add(1);
        let packet =
            EchoPacket::request(self.config.teid, seq as u16).encode()?;
        debug!(seq, "sending GTP ping");

        self.tracker.record_send(seq, now);
        self.state.last_send = Some(now);
        match self.transport.send(&packet) {
            Ok(_) => {
                self.state.sent += 1;
                if self.config.flood {
                    reporter.mark_sent().map_err(ProbeError::Report)?;
                }
                Ok(())
            }
            Err(err) if is_soft_send_error(&err) => {
                debug!(seq, "send refused: {}", err);
                self.state.refused += 1;
                Ok(())
            }
            Err(err) => Err(ProbeError::Send(err)),
        }
    }

    fn receive_reply(&mut self, reporter: &mut dyn Reporter) -> Result<()> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let datagram = match self.transport.recv(&mut buf) {
            Ok(datagram) => datagram,
            Err(err) if is_transient(&err) => return Ok(()),
            Err(err) if is_soft_recv_error(&err) => {
                debug!("recv: {}", err);
                self.state.refused += 1;
                return reporter.unreachable().map_err(ProbeError::Report);
            }
            Err(err) => return Err(ProbeError::Recv(err)),
        };
        let now = self.clock.now();

        let packet = match EchoPacket::decode(&buf[..datagram.len]) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("ignoring datagram: {}", err);
                return Ok(());
            }
        };
        if !packet.is_reply() {
            warn!("Got non-EchoReply type of msg ({})", packet.msg_type);
            return Ok(());
        }
        // Responders are not consistent about echoing the TEID, accept any
        if packet.teid != self.config.teid {
            trace!(teid = packet.teid, "reply TEID differs from request");
        }

        let reply = self.tracker.observe_reply(packet.seq, now);
        let mut reordered = false;
        match reply.class {
            ReplyClass::Fresh => {
                self.state.received += 1;
                self.state.last_recv = Some(now);
                reordered = self.tracker.detect_reorder(reply.sequence);
                if self.config.adaptive() {
                    if let Some(mean) = self.tracker.mean() {
                        self.state.wait = 2.0 * mean;
                        trace!(wait = self.state.wait, "adaptive wait updated");
                    }
                }
            }
            ReplyClass::Stale => self.state.received += 1,
            ReplyClass::Duplicate => {}
        }

        if self.config.flood {
            return reporter.mark_received().map_err(ProbeError::Report);
        }
        reporter
            .reply(&ReplyEvent {
                bytes: datagram.len,
                from: self.transport.peer().ip(),
                seq: packet.seq,
                ttl: datagram.ttl,
                tos: datagram.tos,
                latency: reply.latency,
                class: reply.class,
                reordered,
            })
            .map_err(ProbeError::Report)
    }

    pub fn report(&self) -> RunReport {
        let elapsed = (self.clock.now() - self.state.start).max(0.0);
        RunReport {
            target: self.config.target.clone(),
            sent: self.state.sent,
            received: self.state.received,
            duplicates: self.tracker.duplicates(),
            reorders: self.tracker.reorders(),
            refused: self.state.refused,
            elapsed,
            loss_percent: loss_percent(self.state.sent, self.state.received),
            rtt: self.tracker.summary(),
        }
    }
}
