//! Structured parsing of ICE candidate lines
//!
//! A candidate line has six positional fields followed by `typ <type>` and
//! then any number of `<name> <value>` pairs in any order:
//!
//! ```text
//! candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 10.0.0.5 rport 46154 generation 0
//! ```

use std::fmt;
use std::str::FromStr;

use super::CandidateDescriptor;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpType {
    Active,
    Passive,
    SimultaneousOpen,
}

impl TransportProtocol {
    fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "udp",
            TransportProtocol::Tcp => "tcp",
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportProtocol::Udp),
            "tcp" => Ok(TransportProtocol::Tcp),
            _ => Err(()),
        }
    }
}

impl CandidateType {
    fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl FromStr for CandidateType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::ServerReflexive),
            "prflx" => Ok(CandidateType::PeerReflexive),
            "relay" => Ok(CandidateType::Relay),
            _ => Err(()),
        }
    }
}

impl TcpType {
    fn as_str(&self) -> &'static str {
        match self {
            TcpType::Active => "active",
            TcpType::Passive => "passive",
            TcpType::SimultaneousOpen => "so",
        }
    }
}

impl FromStr for TcpType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "active" => Ok(TcpType::Active),
            "passive" => Ok(TcpType::Passive),
            "so" => Ok(TcpType::SimultaneousOpen),
            _ => Err(()),
        }
    }
}

/// A parsed remote ICE candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: TransportProtocol,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
    /// Base address for reflexive and relay candidates
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<TcpType>,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    /// Attributes not interpreted here, kept in order (`generation`, `ufrag`, ...)
    pub extensions: Vec<(String, String)>,
}

fn field<'a>(line: &str, tokens: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<&'a str> {
    tokens
        .next()
        .ok_or_else(|| Error::candidate_parse(line, format!("missing {}", name)))
}

fn number<T: FromStr>(line: &str, value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::candidate_parse(line, format!("invalid {} {:?}", name, value)))
}

impl IceCandidate {
    /// Parse a bare candidate line, with or without the `candidate:` prefix
    pub fn parse(line: &str) -> Result<Self> {
        let body = line.trim();
        let body = body.strip_prefix("a=").unwrap_or(body);
        let body = body.strip_prefix("candidate:").unwrap_or(body);
        let mut tokens = body.split_ascii_whitespace();

        let foundation = field(line, &mut tokens, "foundation")?.to_string();
        let component: u16 = number(line, field(line, &mut tokens, "component")?, "component")?;
        if component == 0 {
            return Err(Error::candidate_parse(line, "component must be at least 1"));
        }
        let protocol_str = field(line, &mut tokens, "transport")?;
        let protocol: TransportProtocol = protocol_str.parse().map_err(|_| {
            Error::candidate_parse(line, format!("unknown transport {:?}", protocol_str))
        })?;
        let priority: u32 = number(line, field(line, &mut tokens, "priority")?, "priority")?;
        let address = field(line, &mut tokens, "address")?.to_string();
        let port: u16 = number(line, field(line, &mut tokens, "port")?, "port")?;

        if field(line, &mut tokens, "typ")? != "typ" {
            return Err(Error::candidate_parse(line, "expected \"typ\" keyword"));
        }
        let type_str = field(line, &mut tokens, "candidate type")?;
        let candidate_type: CandidateType = type_str.parse().map_err(|_| {
            Error::candidate_parse(line, format!("unknown candidate type {:?}", type_str))
        })?;

        let mut candidate = IceCandidate {
            foundation,
            component,
            protocol,
            priority,
            address,
            port,
            candidate_type,
            related_address: None,
            related_port: None,
            tcp_type: None,
            sdp_mid: None,
            sdp_mline_index: None,
            extensions: Vec::new(),
        };

        while let Some(name) = tokens.next() {
            let value = tokens
                .next()
                .ok_or_else(|| Error::candidate_parse(line, format!("{} has no value", name)))?;
            match name {
                "raddr" => candidate.related_address = Some(value.to_string()),
                "rport" => candidate.related_port = Some(number(line, value, "rport")?),
                "tcptype" => {
                    candidate.tcp_type = Some(value.parse().map_err(|_| {
                        Error::candidate_parse(line, format!("unknown tcptype {:?}", value))
                    })?)
                }
                _ => candidate
                    .extensions
                    .push((name.to_string(), value.to_string())),
            }
        }

        Ok(candidate)
    }

    /// Parse the descriptor's line and carry over its media-line association
    ///
    /// Returns `Ok(None)` for the end-of-candidates marker.
    pub fn from_descriptor(descriptor: &CandidateDescriptor) -> Result<Option<Self>> {
        if descriptor.is_end_of_candidates() {
            return Ok(None);
        }
        let mut candidate = Self::parse(&descriptor.candidate)?;
        candidate.sdp_mid = descriptor.sdp_mid.clone();
        candidate.sdp_mline_index = descriptor.sdp_mline_index;
        Ok(Some(candidate))
    }
}

impl fmt::Display for IceCandidate {
    /// Format back into a `candidate:` line
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol.as_str(),
            self.priority,
            self.address,
            self.port,
            self.candidate_type.as_str()
        )?;
        if let Some(raddr) = &self.related_address {
            write!(f, " raddr {}", raddr)?;
        }
        if let Some(rport) = self.related_port {
            write!(f, " rport {}", rport)?;
        }
        if let Some(tcp_type) = self.tcp_type {
            write!(f, " tcptype {}", tcp_type.as_str())?;
        }
        for (name, value) in &self.extensions {
            write!(f, " {} {}", name, value)?;
        }
        Ok(())
    }
}
