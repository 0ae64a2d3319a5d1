//! Rendering of probe events, either as ping-style text or as JSON lines.

use std::{
    io::{self, Write},
    net::{IpAddr, SocketAddr},
};

use serde::Serialize;

use crate::{packet::ECHO_LEN, probe::RunReport, tracker::ReplyClass};

/// One received echo reply, as handed to a [`Reporter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyEvent {
    pub bytes: usize,
    pub from: IpAddr,
    pub seq: u16,
    pub ttl: Option<u8>,
    pub tos: Option<u8>,
    /// Seconds, `None` for stale replies.
    pub latency: Option<f64>,
    pub class: ReplyClass,
    pub reordered: bool,
}

pub trait Reporter {
    fn start(&mut self, target: &str, peer: SocketAddr) -> io::Result<()>;

    fn reply(&mut self, event: &ReplyEvent) -> io::Result<()>;

    /// A refused or unreachable destination was reported by the network.
    fn unreachable(&mut self) -> io::Result<()>;

    /// Flood mode marker for a request going out.
    fn mark_sent(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Flood mode marker for a reply coming in.
    fn mark_received(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn finish(&mut self, report: &RunReport) -> io::Result<()>;
}

pub struct ConsoleReporter<W> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn start(&mut self, target: &str, peer: SocketAddr) -> io::Result<()> {
        writeln!(
            self.out,
            "GTPING {} ({}) {} bytes of data.",
            target,
            peer.ip(),
            ECHO_LEN
        )
    }

    fn reply(&mut self, event: &ReplyEvent) -> io::Result<()> {
        write!(
            self.out,
            "{} bytes from {}: seq={}",
            event.bytes, event.from, event.seq
        )?;
        if let Some(ttl) = event.ttl {
            write!(self.out, " ttl={}", ttl)?;
        }
        if let Some(tos) = event.tos {
            write!(self.out, " tos={}", tos)?;
        }
        match event.latency {
            Some(latency) => {
                write!(self.out, " time={:.2} ms", 1000.0 * latency)?
            }
            None => write!(self.out, " time=Inf")?,
        }
        if event.class == ReplyClass::Duplicate {
            write!(self.out, " (DUP!)")?;
        }
        if event.reordered {
            write!(self.out, " (out of order)")?;
        }
        writeln!(self.out)
    }

    fn unreachable(&mut self) -> io::Result<()> {
        writeln!(self.out, "ICMP destination unreachable")
    }

    fn mark_sent(&mut self) -> io::Result<()> {
        write!(self.out, ".")?;
        self.out.flush()
    }

    fn mark_received(&mut self) -> io::Result<()> {
        write!(self.out, "\x08 \x08")?;
        self.out.flush()
    }

    fn finish(&mut self, report: &RunReport) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "--- {} GTP ping statistics ---", report.target)?;
        writeln!(
            self.out,
            "{} packets transmitted, {} received, {}% packet loss, time {}ms",
            report.sent,
            report.received,
            report.loss_percent as u32,
            (1000.0 * report.elapsed) as u64
        )?;

        let mut extra = Vec::new();
        if report.reorders > 0 {
            extra.push(format!("{} out of order", report.reorders));
        }
        if report.duplicates > 0 {
            extra.push(format!("{} duplicates", report.duplicates));
        }
        if report.refused > 0 {
            extra.push(format!("{} connection refused", report.refused));
        }
        if !extra.is_empty() {
            writeln!(self.out, "{}", extra.join(", "))?;
        }

        if let Some(rtt) = &report.rtt {
            writeln!(self.out, "{}", rtt)?;
        }
        self.out.flush()
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Start { target: &'a str, address: IpAddr, bytes: usize },
    Reply(&'a ReplyEvent),
    Unreachable,
    Summary(&'a RunReport),
}

/// One JSON object per line, for feeding other tools.
pub struct JsonReporter<W> {
    out: W,
}

impl JsonReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &JsonEvent<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        writeln!(self.out)
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn start(&mut self, target: &str, peer: SocketAddr) -> io::Result<()> {
        self.emit(&JsonEvent::Start {
            target,
            address: peer.ip(),
            bytes: ECHO_LEN,
        })
    }

    fn reply(&mut self, event: &ReplyEvent) -> io::Result<()> {
        self.emit(&JsonEvent::Reply(event))
    }

    fn unreachable(&mut self) -> io::Result<()> {
        self.emit(&JsonEvent::Unreachable)
    }

    fn finish(&mut self, report: &RunReport) -> io::Result<()> {
        self.emit(&JsonEvent::Summary(report))?;
        self.out.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tracker::Summary;

    fn event() -> ReplyEvent {
        ReplyEvent {
            bytes: 12,
            from: "10.0.0.1".parse().unwrap(),
            seq: 3,
            ttl: Some(61),
            tos: None,
            latency: Some(0.010),
            class: ReplyClass::Fresh,
            reordered: false,
        }
    }

    fn report() -> RunReport {
        RunReport {
            target: "ggsn.example".into(),
            sent: 10,
            received: 7,
            duplicates: 1,
            reorders: 0,
            refused: 2,
            elapsed: 9.0014,
            loss_percent: 30.0,
            rtt: Some(Summary {
                count: 7,
                min: 0.001,
                max: 0.003,
                mean: 0.002,
                mdev: 0.0005,
            }),
        }
    }

    fn console(f: impl FnOnce(&mut ConsoleReporter<Vec<u8>>)) -> String {
        let mut reporter = ConsoleReporter::new(Vec::new());
        f(&mut reporter);
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn reply_line() {
        let out = console(|r| r.reply(&event()).unwrap());
        assert_eq!(out, "12 bytes from 10.0.0.1: seq=3 ttl=61 time=10.00 ms\n");
    }

    #[test]
    fn annotated_reply_lines() {
        let mut dup = event();
        dup.class = ReplyClass::Duplicate;
        dup.tos = Some(0);
        let mut stale = event();
        stale.latency = None;
        stale.ttl = None;
        stale.class = ReplyClass::Stale;
        let mut late = event();
        late.reordered = true;

        let out = console(|r| {
            r.reply(&dup).unwrap();
            r.reply(&stale).unwrap();
            r.reply(&late).unwrap();
        });
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "12 bytes from 10.0.0.1: seq=3 ttl=61 tos=0 time=10.00 ms (DUP!)",
                "12 bytes from 10.0.0.1: seq=3 time=Inf",
                "12 bytes from 10.0.0.1: seq=3 ttl=61 time=10.00 ms (out of order)",
            ]
        );
    }

    #[test]
    fn banner_and_summary() {
        let out = console(|r| {
            r.start("ggsn.example", "10.0.0.1:2123".parse().unwrap())
                .unwrap();
            r.finish(&report()).unwrap();
        });
        assert_eq!(
            out,
            "GTPING ggsn.example (10.0.0.1) 12 bytes of data.\n\
             \n\
             --- ggsn.example GTP ping statistics ---\n\
             10 packets transmitted, 7 received, 30% packet loss, time 9001ms\n\
             1 duplicates, 2 connection refused\n\
             rtt min/avg/max/mdev = 1.000/2.000/3.000/0.500 ms\n"
        );
    }

    #[test]
    fn summary_without_samples_has_no_rtt_line() {
        let mut report = report();
        report.rtt = None;
        report.duplicates = 0;
        report.refused = 0;
        let out = console(|r| r.finish(&report).unwrap());
        assert!(!out.contains("rtt"));
        assert!(out.ends_with("packet loss, time 9001ms\n"));
    }

    #[test]
    fn json_lines() {
        let mut reporter = JsonReporter::new(Vec::new());
        reporter.reply(&event()).unwrap();
        reporter.unreachable().unwrap();
        reporter.finish(&report()).unwrap();
        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "reply");
        assert_eq!(lines[0]["seq"], 3);
        assert_eq!(lines[0]["class"], "fresh");
        assert_eq!(lines[1]["event"], "unreachable");
        assert_eq!(lines[2]["event"], "summary");
        assert_eq!(lines[2]["loss_percent"], 30.0);
        assert_eq!(lines[2]["rtt"]["count"], 7);
    }
}
