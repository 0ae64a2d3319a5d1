use common::Family;

/// GTP-C
pub const DEFAULT_PORT: u16 = 2123;
/// Seconds between requests.
pub const DEFAULT_INTERVAL: f64 = 1.0;
/// Seconds to wait for stragglers after the last request when no timeout
/// was given and no reply has been measured yet.
pub const DEFAULT_WAIT: f64 = 2.0;

/// Everything a run needs, fixed once parsed.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Host as given by the user.
    pub target: String,
    pub port: u16,
    /// TEID put into every request.
    pub teid: u32,
    /// Seconds between requests.
    pub interval: f64,
    /// Fixed reply wait in seconds, `None` for adaptive.
    pub wait: Option<f64>,
    pub flood: bool,
    /// Stop after this many requests, 0 for no limit.
    pub count: u32,
    pub family: Family,
    pub ttl: Option<u32>,
    pub tos: Option<u8>,
    pub iface: Option<String>,
}

impl ProbeConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port: DEFAULT_PORT,
            teid: 0,
            interval: DEFAULT_INTERVAL,
            wait: None,
            flood: false,
            count: 0,
            family: Family::Any,
            ttl: None,
            tos: None,
            iface: None,
        }
    }

    pub fn adaptive(&self) -> bool {
        self.wait.is_none()
    }

    pub fn initial_wait(&self) -> f64 {
        self.wait.unwrap_or(DEFAULT_WAIT)
    }
}

/// Named ToS values: the RFC 1349 bits and the DSCP code points, already
/// shifted into the ToS byte.
const TOS_NAMES: &[(&str, u8)] = &[
    ("lowdelay", 0x10),
    ("throughput", 0x08),
    ("reliability", 0x04),
    ("lowcost", 0x02),
    ("ef", 46 << 2),
];

/// Parse a ToS given by name (`lowdelay`, `ef`, `af21`, `cs5`, ...) or as a
/// decimal or `0x` prefixed number.
pub fn parse_tos(s: &str) -> Result<u8, String> {
    let name = s.trim().to_ascii_lowercase();
    if let Some(&(_, tos)) = TOS_NAMES.iter().find(|(n, _)| *n == name) {
        return Ok(tos);
    }
    if let Some(class) = name.strip_prefix("af") {
        // afXY: class X in 1..=4, drop precedence Y in 1..=3
        if let [x @ b'1'..=b'4', y @ b'1'..=b'3'] = class.as_bytes() {
            let dscp = 8 * (x - b'0') + 2 * (y - b'0');
            return Ok(dscp << 2);
        }
        return Err(format!("unknown assured forwarding class: {}", s));
    }
    if let Some(class) = name.strip_prefix("cs") {
        if let [x @ b'0'..=b'7'] = class.as_bytes() {
            return Ok((8 * (x - b'0')) << 2);
        }
        return Err(format!("unknown class selector: {}", s));
    }
    let parsed = match name.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => name.parse::<u8>(),
    };
    parsed.map_err(|_| {
        format!(
            "invalid ToS {:?}: expected 0-255 or a name like lowdelay, ef, \
             af11, cs5",
            s
        )
    })
}
