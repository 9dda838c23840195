//! Miscellaneous data structures shared by transports and their children.


use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// Container for arbitrary data attached to entities, has no effect on routing.
#[derive(Debug, Clone)]
pub struct AppData(Arc<dyn Any + Send + Sync>);

impl Default for AppData {
    fn default() -> Self {
        Self::new(())
    }
}

impl Deref for AppData {
    type Target = Arc<dyn Any + Send + Sync>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppData {
    /// Wraps any value.
    pub fn new<T: Any + Send + Sync>(app_data: T) -> Self {
        Self(Arc::new(app_data))
    }
}

/// Network protocol.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

/// Range of ports to pick a listening port from.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct PortRange {
    /// Lowest port in the range.
    pub min: u16,
    /// Highest port in the range.
    pub max: u16,
}

/// UDP/TCP socket flags.
#[derive(
    Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct SocketFlags {
    /// Disable dual-stack support so only IPv6 is used (only if `ip` is IPv6).
    pub ipv6_only: bool,
    /// Make different transports bind to the same IP and port (only for UDP).
    pub udp_reuse_port: bool,
}

/// Where and how a transport or WebRTC server listens.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenInfo {
    /// Network protocol.
    pub protocol: Protocol,
    /// Listening IPv4 or IPv6.
    pub ip: IpAddr,
    /// Announced IPv4, IPv6 or hostname (useful when running behind NAT with private IP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_address: Option<String>,
    /// Listening port, random one if not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Listening port range. If given then `port` will be ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range: Option<PortRange>,
    /// Socket flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<SocketFlags>,
    /// Send buffer size (bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_buffer_size: Option<u32>,
    /// Recv buffer size (bytes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_buffer_size: Option<u32>,
}

impl ListenInfo {
    /// Listen on given protocol and address with everything else left to the engine.
    #[must_use]
    pub fn new(protocol: Protocol, ip: IpAddr) -> Self {
        Self {
            protocol,
            ip,
            announced_address: None,
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// Legacy way of specifying listening address, UDP is implied.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    /// Listening IPv4 or IPv6.
    pub ip: IpAddr,
    /// Announced IPv4 or IPv6 (useful when running behind NAT with private IP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<IpAddr>,
}

impl ListenIp {
    pub(crate) fn into_listen_info(self, port: Option<u16>) -> ListenInfo {
        ListenInfo {
            announced_address: self.announced_ip.map(|ip| ip.to_string()),
            port,
            ..ListenInfo::new(Protocol::Udp, self.ip)
        }
    }
}

/// ICE role.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceRole {
    /// The transport is the controlled agent.
    Controlled,
    /// The transport is the controlling agent.
    Controlling,
}

/// ICE parameters.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    /// ICE username fragment.
    pub username_fragment: String,
    /// ICE password.
    pub password: String,
    /// ICE Lite.
    #[serde(default)]
    pub ice_lite: Option<bool>,
}

/// ICE candidate type.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateType {
    /// Local host candidate, the only type the engine gathers.
    Host,
}

/// ICE candidate TCP type.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateTcpType {
    /// Passive.
    Passive,
}

/// ICE candidate.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Unique identifier that allows ICE to correlate candidates that appear on multiple
    /// transports.
    pub foundation: String,
    /// The assigned priority of the candidate.
    pub priority: u32,
    /// The IP address or hostname of the candidate.
    pub address: String,
    /// The protocol of the candidate.
    pub protocol: Protocol,
    /// The port for the candidate.
    pub port: u16,
    /// The type of candidate.
    pub r#type: IceCandidateType,
    /// The type of TCP candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<IceCandidateTcpType>,
}

/// ICE state.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    /// No ICE Binding Requests have been received yet.
    New,
    /// Valid ICE Binding Request have been received, but none with USE-CANDIDATE attribute.
    Connected,
    /// ICE Binding Request with USE_CANDIDATE attribute has been received.
    Completed,
    /// ICE was connected but the selected tuple has been lost.
    Disconnected,
    /// The transport was closed.
    Closed,
}

/// Transport tuple, local side is always known, remote side only once connected.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TransportTuple {
    /// Tuple with both local and remote side.
    #[serde(rename_all = "camelCase")]
    WithRemote {
        /// Local address.
        local_address: String,
        /// Local port.
        local_port: u16,
        /// Remote IP address.
        remote_ip: IpAddr,
        /// Remote port.
        remote_port: u16,
        /// Protocol.
        protocol: Protocol,
    },
    /// Tuple with local side only.
    #[serde(rename_all = "camelCase")]
    LocalOnly {
        /// Local address.
        local_address: String,
        /// Local port.
        local_port: u16,
        /// Protocol.
        protocol: Protocol,
    },
}

impl TransportTuple {
    /// Local address.
    pub fn local_address(&self) -> &str {
        let (Self::WithRemote { local_address, .. } | Self::LocalOnly { local_address, .. }) =
            self;
        local_address
    }

    /// Local port.
    pub fn local_port(&self) -> u16 {
        let (Self::WithRemote { local_port, .. } | Self::LocalOnly { local_port, .. }) = self;
        *local_port
    }

    /// Protocol.
    pub fn protocol(&self) -> Protocol {
        let (Self::WithRemote { protocol, .. } | Self::LocalOnly { protocol, .. }) = self;
        *protocol
    }

    /// Remote IP address, if known.
    pub fn remote_ip(&self) -> Option<IpAddr> {
        match self {
            Self::WithRemote { remote_ip, .. } => Some(*remote_ip),
            Self::LocalOnly { .. } => None,
        }
    }

    /// Remote port, if known.
    pub fn remote_port(&self) -> Option<u16> {
        match self {
            Self::WithRemote { remote_port, .. } => Some(*remote_port),
            Self::LocalOnly { .. } => None,
        }
    }
}

/// DTLS state.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsState {
    /// DTLS procedures not yet initiated.
    New,
    /// DTLS connecting.
    Connecting,
    /// DTLS successfully connected (SRTP keys already extracted).
    Connected,
    /// DTLS connection failed.
    Failed,
    /// DTLS state when the transport has been closed.
    Closed,
}

/// SCTP state.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SctpState {
    /// Initial state.
    New,
    /// SCTP procedures initiated.
    Connecting,
    /// SCTP successfully connected.
    Connected,
    /// SCTP connection failed.
    Failed,
    /// SCTP state when the transport has been closed.
    Closed,
}

/// DTLS role.
#[derive(
    Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    /// The DTLS role is determined based on the resolved ICE role.
    #[default]
    Auto,
    /// DTLS client role.
    Client,
    /// DTLS server role.
    Server,
}

/// Hash function algorithm used to produce a DTLS certificate fingerprint.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum DtlsFingerprintAlgorithm {
    /// sha-1
    #[serde(rename = "sha-1")]
    Sha1,
    /// sha-224
    #[serde(rename = "sha-224")]
    Sha224,
    /// sha-256
    #[serde(rename = "sha-256")]
    Sha256,
    /// sha-384
    #[serde(rename = "sha-384")]
    Sha384,
    /// sha-512
    #[serde(rename = "sha-512")]
    Sha512,
}

impl DtlsFingerprintAlgorithm {
    fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Fingerprint value doesn't match its algorithm.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DtlsFingerprintError {
    /// Value is not a colon-separated series of hex bytes.
    #[error("Failed to parse value {0} as series of hex bytes")]
    BadValue(String),
    /// Value has wrong number of bytes for the algorithm.
    #[error("Value doesn't have correct length for {algorithm:?}: {len} bytes")]
    WrongLength {
        /// Algorithm.
        algorithm: DtlsFingerprintAlgorithm,
        /// Actual number of bytes.
        len: usize,
    },
}

#[derive(Deserialize, Serialize)]
struct DtlsFingerprintRaw {
    algorithm: DtlsFingerprintAlgorithm,
    value: String,
}

/// The hash function algorithm and its corresponding certificate fingerprint value.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(try_from = "DtlsFingerprintRaw", into = "DtlsFingerprintRaw")]
pub struct DtlsFingerprint {
    algorithm: DtlsFingerprintAlgorithm,
    value: Vec<u8>,
}

impl fmt::Debug for DtlsFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsFingerprint")
            .field("algorithm", &self.algorithm)
            .field("value", &self.value_string())
            .finish()
    }
}

impl TryFrom<DtlsFingerprintRaw> for DtlsFingerprint {
    type Error = DtlsFingerprintError;

    fn try_from(raw: DtlsFingerprintRaw) -> Result<Self, Self::Error> {
        Self::parse(raw.algorithm, &raw.value)
    }
}

impl From<DtlsFingerprint> for DtlsFingerprintRaw {
    fn from(fingerprint: DtlsFingerprint) -> Self {
        Self {
            algorithm: fingerprint.algorithm,
            value: fingerprint.value_string(),
        }
    }
}

impl DtlsFingerprint {
    /// Parses colon-separated hex representation like `0D:88:5B:...`.
    pub fn parse(
        algorithm: DtlsFingerprintAlgorithm,
        value: &str,
    ) -> Result<Self, DtlsFingerprintError> {
        let bytes = value
            .split(':')
            .map(|byte| {
                if byte.len() == 2 {
                    u8::from_str_radix(byte, 16).ok()
                } else {
                    None
                }
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| DtlsFingerprintError::BadValue(value.to_string()))?;

        if bytes.len() != algorithm.digest_len() {
            return Err(DtlsFingerprintError::WrongLength {
                algorithm,
                len: bytes.len(),
            });
        }

        Ok(Self {
            algorithm,
            value: bytes,
        })
    }

    /// Hash function algorithm.
    pub fn algorithm(&self) -> DtlsFingerprintAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn value_string(&self) -> String {
        self.value
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// DTLS parameters.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct DtlsParameters {
    /// DTLS role.
    pub role: DtlsRole,
    /// DTLS fingerprints.
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Direction of a traced packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEventDirection {
    /// Incoming
    In,
    /// Outgoing
    Out,
}

/// SCTP payload protocol identifier doesn't denote a WebRTC message.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WebRtcMessageError {
    /// Unknown PPID.
    #[error("Unsupported PPID {0}")]
    UnsupportedPpid(u32),
    /// String message is not valid UTF-8.
    #[error("String message is not valid UTF-8")]
    InvalidString,
}

/// Data channel message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WebRtcMessage {
    /// String
    String(String),
    /// Binary
    Binary(Bytes),
    /// Empty string
    EmptyString,
    /// Empty binary
    EmptyBinary,
}

impl WebRtcMessage {
    // +------------------------------------+-----------+
    // | Value                              | SCTP PPID |
    // +------------------------------------+-----------+
    // | WebRTC String                      | 51        |
    // | WebRTC Binary                      | 53        |
    // | WebRTC String Empty                | 56        |
    // | WebRTC Binary Empty                | 57        |
    // +------------------------------------+-----------+

    pub(crate) fn new(ppid: u32, payload: Bytes) -> Result<Self, WebRtcMessageError> {
        match ppid {
            51 => String::from_utf8(payload.to_vec())
                .map(WebRtcMessage::String)
                .map_err(|_| WebRtcMessageError::InvalidString),
            53 => Ok(WebRtcMessage::Binary(payload)),
            56 => Ok(WebRtcMessage::EmptyString),
            57 => Ok(WebRtcMessage::EmptyBinary),
            ppid => Err(WebRtcMessageError::UnsupportedPpid(ppid)),
        }
    }

    pub(crate) fn into_ppid_and_payload(self) -> (u32, Bytes) {
        match self {
            WebRtcMessage::String(string) => (51_u32, Bytes::from(string)),
            WebRtcMessage::Binary(binary) => (53_u32, binary),
            WebRtcMessage::EmptyString => (56_u32, Bytes::from_static(b" ")),
            WebRtcMessage::EmptyBinary => (57_u32, Bytes::from(vec![0u8])),
        }
    }
}
