//! RTP parameters and capabilities exchanged with endpoints and the engine.
//!
//! The core doesn't interpret media, these structures only carry enough typing to validate what
//! producers send, derive what consumers may receive and pass everything through to the engine.


use crate::scalability_modes::ScalabilityMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::{NonZeroU32, NonZeroU8};
use std::str::FromStr;
use thiserror::Error;

/// Media kind
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio
    Audio,
    /// Video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// MIME type is not of `audio/*` or `video/*` form.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("Invalid MIME type {0}")]
pub struct ParseMimeTypeError(String);

/// Codec MIME type like `audio/opus` or `video/VP8`, compared case-insensitively.
#[derive(Clone, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct MimeType {
    kind: MediaKind,
    subtype: String,
}

impl MimeType {
    /// MIME type of given kind and subtype.
    pub fn new(kind: MediaKind, subtype: impl Into<String>) -> Self {
        Self {
            kind,
            subtype: subtype.into(),
        }
    }

    /// Media kind from the type part.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Subtype as given.
    #[must_use]
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Retransmission codec (`*/rtx`).
    #[must_use]
    pub fn is_rtx(&self) -> bool {
        self.subtype.eq_ignore_ascii_case("rtx")
    }
}

impl PartialEq for MimeType {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.subtype.eq_ignore_ascii_case(&other.subtype)
    }
}

impl Hash for MimeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.subtype.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Debug for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

impl FromStr for MimeType {
    type Err = ParseMimeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, subtype) = s
            .split_once('/')
            .filter(|(_, subtype)| !subtype.is_empty())
            .ok_or_else(|| ParseMimeTypeError(s.to_string()))?;

        let kind = if kind.eq_ignore_ascii_case("audio") {
            MediaKind::Audio
        } else if kind.eq_ignore_ascii_case("video") {
            MediaKind::Video
        } else {
            return Err(ParseMimeTypeError(s.to_string()));
        };

        Ok(Self::new(kind, subtype))
    }
}

impl TryFrom<String> for MimeType {
    type Error = ParseMimeTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MimeType> for String {
    fn from(mime_type: MimeType) -> Self {
        mime_type.to_string()
    }
}

/// Single value used in RTP codec parameters.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RtpCodecParametersParametersValue {
    /// Numerical value
    Number(u32),
    /// String value
    String(String),
}

impl From<u32> for RtpCodecParametersParametersValue {
    fn from(n: u32) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RtpCodecParametersParametersValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Codec specific parameters, some of them (like H264 `packetization-mode`) are critical for
/// codec matching.
pub type RtpCodecParametersParameters = BTreeMap<String, RtpCodecParametersParametersValue>;

/// Provides information on RTCP feedback messages for a specific codec.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RtcpFeedback {
    /// RTCP feedback type, like `nack` or `transport-cc`.
    pub r#type: String,
    /// RTCP feedback parameter, like `pli` for `nack`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

/// Codec capability of a router or an endpoint.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    /// Codec MIME type.
    pub mime_type: MimeType,
    /// Preferred RTP payload type, router picks one from the dynamic range if not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    /// Codec clock rate expressed in Hertz.
    pub clock_rate: NonZeroU32,
    /// Number of channels, audio only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NonZeroU8>,
    /// Codec specific parameters.
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
    /// Transport layer and codec-specific feedback messages for this codec.
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Capability for given codec and clock rate, everything else empty.
    pub fn new(mime_type: MimeType, clock_rate: NonZeroU32) -> Self {
        Self {
            mime_type,
            preferred_payload_type: None,
            clock_rate,
            channels: None,
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: Vec::new(),
        }
    }

    /// Media kind.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.mime_type.kind()
    }
}

/// Direction of RTP header extension.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RtpHeaderExtensionDirection {
    /// SendRecv
    #[default]
    SendRecv,
    /// SendOnly
    SendOnly,
    /// RecvOnly
    RecvOnly,
    /// Inactive
    Inactive,
}

/// Header extension capability.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    /// Media kind the extension applies to.
    pub kind: MediaKind,
    /// URI of the RTP header extension, as defined in RFC 5285.
    pub uri: String,
    /// The preferred numeric identifier that goes in the RTP packet. Must be unique.
    pub preferred_id: u16,
    /// If true, it is preferred that the value in the header be encrypted as per RFC 6904.
    #[serde(default)]
    pub preferred_encrypt: bool,
    /// Direction the extension is used in.
    #[serde(default)]
    pub direction: RtpHeaderExtensionDirection,
}

/// What a router or an endpoint can receive at media level.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    /// Supported media and RTX codecs.
    pub codecs: Vec<RtpCodecCapability>,
    /// Supported RTP header extensions.
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

/// Codec actually used in RTP parameters.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    /// Codec MIME type.
    pub mime_type: MimeType,
    /// The value that goes in the RTP Payload Type Field. Must be unique.
    pub payload_type: u8,
    /// Codec clock rate expressed in Hertz.
    pub clock_rate: NonZeroU32,
    /// Number of channels, audio only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NonZeroU8>,
    /// Codec-specific parameters available for signaling.
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
    /// Transport layer and codec-specific feedback messages for this codec.
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    /// Codec with given MIME type, payload type and clock rate, everything else empty.
    pub fn new(mime_type: MimeType, payload_type: u8, clock_rate: NonZeroU32) -> Self {
        Self {
            mime_type,
            payload_type,
            clock_rate,
            channels: None,
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: Vec::new(),
        }
    }

    pub(crate) fn is_rtx(&self) -> bool {
        self.mime_type.is_rtx()
    }

    /// Associated payload type of an RTX codec.
    pub(crate) fn apt(&self) -> Option<u8> {
        match self.parameters.get("apt") {
            Some(RtpCodecParametersParametersValue::Number(apt)) => u8::try_from(*apt).ok(),
            _ => None,
        }
    }
}

/// Header extension actually used in RTP parameters.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RtpHeaderExtensionParameters {
    /// URI of the RTP header extension, as defined in RFC 5285.
    pub uri: String,
    /// The numeric identifier that goes in the RTP packet. Must be unique.
    pub id: u16,
    /// If true, the value in the header is encrypted as per RFC 6904.
    #[serde(default)]
    pub encrypt: bool,
}

/// RTX stream information.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RtpEncodingParametersRtx {
    /// The RTX SSRC.
    pub ssrc: u32,
}

/// A media RTP stream and its associated RTX stream (if any).
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    /// The media SSRC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    /// The RID RTP extension value. Must be unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Codec payload type this encoding affects. If unset, first media codec is chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    /// RTX stream information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtpEncodingParametersRtx>,
    /// Whether discontinuous RTP transmission will be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    /// Number of spatial and temporal layers in the RTP stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<ScalabilityMode>,
    /// Maximum number of bits per second to allow a track encoded with this encoding to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// RTCP settings within RTP parameters.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    /// The Canonical Name (CNAME) used by RTCP (e.g. in SDES messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    /// Whether reduced size RTCP RFC 5506 is configured. Default true.
    #[serde(default = "default_true")]
    pub reduced_size: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
        }
    }
}

/// What a producer sends or a consumer receives.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    /// The MID RTP extension value as defined in the BUNDLE specification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    /// Media and RTX codecs in use.
    pub codecs: Vec<RtpCodecParameters>,
    /// RTP header extensions in use.
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    /// Transmitted RTP streams and their settings.
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    /// Parameters used for RTCP.
    #[serde(default)]
    pub rtcp: RtcpParameters,
}
