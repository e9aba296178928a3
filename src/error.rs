//! Error types shared by the frame path and the signaling surface

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Frame input is neither a pixel array nor a mapping holding one
    #[error("unsupported frame input: {0}")]
    UnsupportedInputType(String),

    /// The transport engine rejected one of the offer/answer steps
    #[error("negotiation with peer {peer_id} failed")]
    Negotiation {
        peer_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("negotiation with peer {peer_id} timed out after {timeout:?}")]
    NegotiationTimeout { peer_id: String, timeout: Duration },

    /// Candidate line could not be parsed into its structured fields
    #[error("malformed ICE candidate {candidate:?}: {reason}")]
    CandidateParse { candidate: String, reason: String },

    /// The transport engine refused a well-formed candidate
    #[error("peer {peer_id} rejected ICE candidate")]
    Candidate {
        peer_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// No peer reached `connected` before startup gave up
    #[error("no peer connected, aborting startup")]
    StartupAbort,

    #[error("frame slot closed")]
    SlotClosed,

    #[error("server is shut down")]
    ShutDown,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn negotiation(peer_id: &str, source: anyhow::Error) -> Self {
        Error::Negotiation {
            peer_id: peer_id.to_string(),
            source,
        }
    }

    pub(crate) fn candidate_parse(candidate: &str, reason: impl Into<String>) -> Self {
        Error::CandidateParse {
            candidate: candidate.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_keeps_source() {
        let err = Error::negotiation("peer-1", anyhow::anyhow!("bad sdp"));
        assert_eq!(err.to_string(), "negotiation with peer peer-1 failed");

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("bad sdp"));
    }

    #[test]
    fn test_candidate_parse_message() {
        let err = Error::candidate_parse("candidate:1", "missing component");
        assert!(err.to_string().contains("missing component"));
    }
}
