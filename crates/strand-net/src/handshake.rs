//! Version handshake.
//!
//! The first exchange on every raw connection, before any key material is sent. Each
//! side writes a varint-delimited record `{1: protocol_version, 2: agent_version}` and
//! reads the other's. Peers are compatible when their protocol versions share a major
//! component.

use crate::error::HandshakeError;
use crate::wire;
use strand_core::record::{RecordReader, RecordWriter};
use tokio::io::{AsyncRead, AsyncWrite};

const MAX_VERSION_MESSAGE: usize = 4096;

/// Versions advertised by one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Semantic version of the wire protocol
    pub protocol_version: String,
    /// Free-form implementation name
    pub agent_version: String,
}

impl VersionInfo {
    /// Version info for this build with the given agent string.
    #[must_use]
    pub fn local(agent_version: impl Into<String>) -> Self {
        Self {
            protocol_version: crate::config::PROTOCOL_VERSION.to_string(),
            agent_version: agent_version.into(),
        }
    }

    /// Record encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        RecordWriter::new()
            .string(1, &self.protocol_version)
            .string(2, &self.agent_version)
            .finish()
    }

    /// Decode a record. Unknown fields are skipped.
    ///
    /// # Errors
    ///
    /// Fails on a malformed record or a missing protocol version.
    pub fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        let mut protocol_version = None;
        let mut agent_version = String::new();
        for field in RecordReader::new(bytes) {
            match field? {
                (1, value) => protocol_version = Some(value.as_str()?.to_string()),
                (2, value) => agent_version = value.as_str()?.to_string(),
                _ => {}
            }
        }
        let protocol_version = protocol_version
            .ok_or(HandshakeError::Malformed("missing protocol version".into()))?;
        Ok(Self {
            protocol_version,
            agent_version,
        })
    }
}

/// Major component of a `MAJOR.MINOR.PATCH` version.
fn major(version: &str) -> Result<u64, HandshakeError> {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return Err(HandshakeError::Malformed(
            format!("invalid semver {version:?}").into(),
        ));
    }
    let mut numbers = parts.iter().map(|p| p.parse::<u64>());
    match (numbers.next(), numbers.next(), numbers.next()) {
        (Some(Ok(major)), Some(Ok(_)), Some(Ok(_))) => Ok(major),
        _ => Err(HandshakeError::Malformed(
            format!("invalid semver {version:?}").into(),
        )),
    }
}

/// Whether two protocol versions may talk to each other.
///
/// # Errors
///
/// `VersionMismatch` when the majors differ, `Malformed` when either side is not semver.
pub fn check_compatible(local: &str, remote: &str) -> Result<(), HandshakeError> {
    if major(local)? == major(remote)? {
        Ok(())
    } else {
        Err(HandshakeError::VersionMismatch {
            local: local.to_string(),
            remote: remote.to_string(),
        })
    }
}

/// Exchange version info over `io` and check compatibility.
///
/// # Errors
///
/// I/O failures, a malformed remote message or a `VersionMismatch`.
pub async fn version_handshake<S>(io: &mut S, local: &VersionInfo) -> Result<VersionInfo, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    wire::write_delimited(io, &local.encode()).await?;
    let remote = VersionInfo::decode(&wire::read_delimited(io, MAX_VERSION_MESSAGE).await?)?;

    check_compatible(&local.protocol_version, &remote.protocol_version).inspect_err(|e| {
        tracing::warn!(error = %e, remote_agent = %remote.agent_version, "version handshake failed");
    })?;
    tracing::trace!(
        protocol = %remote.protocol_version,
        agent = %remote.agent_version,
        "version handshake complete"
    );
    Ok(remote)
}
