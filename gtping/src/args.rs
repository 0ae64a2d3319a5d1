use clap::{ArgAction, Parser};
use common::Family;
use gtping::{
    config::{parse_tos, DEFAULT_INTERVAL, DEFAULT_PORT},
    ProbeConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Opts {
    /// Host name or address of the GTP-C peer
    pub target: String,
    /// Destination UDP port
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Time between pings in seconds
    #[arg(
        long,
        short = 'w',
        default_value_t = DEFAULT_INTERVAL,
        value_parser = parse_seconds
    )]
    pub interval: f64,
    /// Time to wait for replies after the last ping in seconds (default:
    /// 2 seconds, then twice the average RTT)
    #[arg(long, short = 't', value_parser = parse_seconds)]
    pub timeout: Option<f64>,
    /// Stop after sending count pings (0 = no limit)
    #[arg(long, short, default_value_t = 0)]
    pub count: u32,
    /// Flood ping output: print a dot per request and erase it per reply
    #[arg(long, short, action = ArgAction::SetTrue)]
    pub flood: bool,
    /// TEID to put in the echo requests
    #[arg(long, short = 'T', default_value_t = 0)]
    pub teid: u32,
    /// IP TTL / hop limit of outgoing pings
    #[arg(long, short = 'l')]
    pub ttl: Option<u32>,
    /// IP ToS / traffic class: a number or a name like lowdelay, ef, af41,
    /// cs3
    #[arg(long, short = 'O', value_parser = parse_tos)]
    pub tos: Option<u8>,
    /// Force IPv4
    #[arg(short = '4', conflicts_with = "ipv6", action = ArgAction::SetTrue)]
    pub ipv4: bool,
    /// Force IPv6
    #[arg(short = '6', action = ArgAction::SetTrue)]
    pub ipv6: bool,
    /// Interface to bind to
    #[arg(long, short = 'I')]
    pub iface: Option<String>,
    /// Print one JSON object per event instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
    /// Increase verbosity, may be repeated
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("not a number: {}", s))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!(
            "expected a non-negative number of seconds, got {}",
            s
        ));
    }
    Ok(secs)
}

impl Opts {
    pub fn family(&self) -> Family {
        match (self.ipv4, self.ipv6) {
            (true, _) => Family::V4,
            (_, true) => Family::V6,
            _ => Family::Any,
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            target: self.target.clone(),
            port: self.port,
            teid: self.teid,
            interval: self.interval,
            wait: self.timeout,
            flood: self.flood,
            count: self.count,
            family: self.family(),
            ttl: self.ttl,
            tos: self.tos,
            iface: self.iface.clone(),
        }
    }
}
