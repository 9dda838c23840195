//! Derivation of router capabilities and of producer/consumer RTP parameters.


use crate::producer::ProducerType;
use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpParameters, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpCodecParametersParameters, RtpCodecParametersParametersValue, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpHeaderExtensionDirection, RtpHeaderExtensionParameters,
    RtpParameters,
};
use crate::scalability_modes::ScalabilityMode;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

const DYNAMIC_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 96..=127;

#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RtpMappingCodec {
    pub(crate) payload_type: u8,
    pub(crate) mapped_payload_type: u8,
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RtpMappingEncoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) ssrc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scalability_mode: Option<ScalabilityMode>,
    pub(crate) mapped_ssrc: u32,
}

/// How payload types and SSRCs of a producer map into the router.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub(crate) struct RtpMapping {
    pub(crate) codecs: Vec<RtpMappingCodec>,
    pub(crate) encodings: Vec<RtpMappingEncoding>,
}

/// Malformed RTP parameters.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpParametersError {
    /// No codecs at all.
    #[error("Empty codecs")]
    EmptyCodecs,
    /// Codec kind doesn't match the producer kind.
    #[error("Codec {mime_type} doesn't match kind {kind}")]
    KindMismatch {
        /// Codec MIME type.
        mime_type: MimeType,
        /// Expected kind.
        kind: MediaKind,
    },
    /// Two codecs share a payload type.
    #[error("Duplicated codec payload type {0}")]
    DuplicatedPayloadType(u8),
    /// RTX codec without numeric `apt` parameter.
    #[error("Invalid codec apt parameter in RTX codec with payload type {0}")]
    InvalidAptParameter(u8),
    /// RTX codec refers to a payload type that is not there.
    #[error("Missing media codec for RTX payload type {0}")]
    MissingMediaCodecForRtx(u8),
    /// Only RTX codecs.
    #[error("No media codecs")]
    NoMediaCodecs,
    /// Encoding refers to a payload type that is not there.
    #[error("Encoding refers to unknown codec payload type {0}")]
    UnknownEncodingPayloadType(u8),
}

/// Validates RTP parameters of a producer.
pub(crate) fn validate_rtp_parameters(
    kind: MediaKind,
    rtp_parameters: &RtpParameters,
) -> Result<(), RtpParametersError> {
    if rtp_parameters.codecs.is_empty() {
        return Err(RtpParametersError::EmptyCodecs);
    }

    let mut payload_types = BTreeSet::new();
    for codec in &rtp_parameters.codecs {
        if codec.mime_type.kind() != kind {
            return Err(RtpParametersError::KindMismatch {
                mime_type: codec.mime_type.clone(),
                kind,
            });
        }
        if !payload_types.insert(codec.payload_type) {
            return Err(RtpParametersError::DuplicatedPayloadType(codec.payload_type));
        }
    }

    for codec in rtp_parameters.codecs.iter().filter(|codec| codec.is_rtx()) {
        let apt = codec
            .apt()
            .ok_or(RtpParametersError::InvalidAptParameter(codec.payload_type))?;
        let has_media_codec = rtp_parameters
            .codecs
            .iter()
            .any(|media_codec| !media_codec.is_rtx() && media_codec.payload_type == apt);
        if !has_media_codec {
            return Err(RtpParametersError::MissingMediaCodecForRtx(
                codec.payload_type,
            ));
        }
    }

    if rtp_parameters.codecs.iter().all(RtpCodecParameters::is_rtx) {
        return Err(RtpParametersError::NoMediaCodecs);
    }

    for encoding in &rtp_parameters.encodings {
        if let Some(codec_payload_type) = encoding.codec_payload_type {
            if !payload_types.contains(&codec_payload_type) {
                return Err(RtpParametersError::UnknownEncodingPayloadType(
                    codec_payload_type,
                ));
            }
        }
    }

    Ok(())
}

/// Producer type is derived from its encodings: several encodings is simulcast, a single
/// encoding with several spatial layers is SVC.
pub(crate) fn producer_type(rtp_parameters: &RtpParameters) -> ProducerType {
    match rtp_parameters.encodings.as_slice() {
        [] => ProducerType::Simple,
        [encoding] => {
            if encoding
                .scalability_mode
                .map_or(false, |mode| mode.spatial_layers().get() > 1)
            {
                ProducerType::Svc
            } else {
                ProducerType::Simple
            }
        }
        _ => ProducerType::Simulcast,
    }
}

/// Router media codecs can't be turned into capabilities.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpCapabilitiesError {
    /// RTX codecs are generated by the router itself.
    #[error("RTX codec {0} is not allowed in router media codecs")]
    RtxCodecNotAllowed(MimeType),
    /// Preferred payload type is out of the dynamic range or repeated.
    #[error("Invalid or duplicated preferred payload type {0}")]
    InvalidPreferredPayloadType(u8),
    /// Dynamic payload type range exhausted.
    #[error("Cannot allocate more dynamic payload types")]
    CannotAllocate,
}

/// Generates router RTP capabilities from its media codecs, assigning payload types where missing
/// and adding an RTX codec for every video codec.
pub(crate) fn generate_router_rtp_capabilities(
    media_codecs: Vec<RtpCodecCapability>,
) -> Result<RtpCapabilities, RtpCapabilitiesError> {
    let mut used_payload_types = BTreeSet::new();
    for codec in &media_codecs {
        if codec.mime_type.is_rtx() {
            return Err(RtpCapabilitiesError::RtxCodecNotAllowed(
                codec.mime_type.clone(),
            ));
        }
        if let Some(preferred_payload_type) = codec.preferred_payload_type {
            if !DYNAMIC_PAYLOAD_TYPES.contains(&preferred_payload_type)
                || !used_payload_types.insert(preferred_payload_type)
            {
                return Err(RtpCapabilitiesError::InvalidPreferredPayloadType(
                    preferred_payload_type,
                ));
            }
        }
    }

    let mut allocate = || {
        let payload_type = DYNAMIC_PAYLOAD_TYPES
            .clone()
            .find(|payload_type| !used_payload_types.contains(payload_type))
            .ok_or(RtpCapabilitiesError::CannotAllocate)?;
        used_payload_types.insert(payload_type);
        Ok(payload_type)
    };

    let mut codecs = Vec::with_capacity(media_codecs.len() * 2);
    for mut codec in media_codecs {
        let payload_type = match codec.preferred_payload_type {
            Some(payload_type) => payload_type,
            None => allocate()?,
        };
        codec.preferred_payload_type = Some(payload_type);
        let kind = codec.kind();
        let clock_rate = codec.clock_rate;
        codecs.push(codec);

        if kind == MediaKind::Video {
            let mut rtx_codec =
                RtpCodecCapability::new(MimeType::new(MediaKind::Video, "rtx"), clock_rate);
            rtx_codec.preferred_payload_type = Some(allocate()?);
            rtx_codec.parameters.insert(
                "apt".to_string(),
                RtpCodecParametersParametersValue::Number(u32::from(payload_type)),
            );
            codecs.push(rtx_codec);
        }
    }

    Ok(RtpCapabilities {
        codecs,
        header_extensions: Vec::new(),
    })
}

/// Producer RTP parameters can't be mapped into router capabilities.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpParametersMappingError {
    /// Router doesn't support codec.
    #[error("Unsupported codec [mimeType:{mime_type}, payloadType:{payload_type}]")]
    UnsupportedCodec {
        /// Codec MIME type.
        mime_type: MimeType,
        /// Codec payload type.
        payload_type: u8,
    },
    /// Router has no RTX codec for matched media codec.
    #[error("No RTX codec for capability codec payload type {0}")]
    UnsupportedRtxCodec(u8),
}

/// Maps producer payload types into router ones and assigns router SSRCs to every encoding.
pub(crate) fn get_producer_rtp_parameters_mapping(
    rtp_parameters: &RtpParameters,
    rtp_capabilities: &RtpCapabilities,
) -> Result<RtpMapping, RtpParametersMappingError> {
    let mut rtp_mapping = RtpMapping::default();

    for codec in rtp_parameters.codecs.iter().filter(|codec| !codec.is_rtx()) {
        let cap_codec = rtp_capabilities
            .codecs
            .iter()
            .find(|cap_codec| match_codec(codec, cap_codec))
            .ok_or_else(|| RtpParametersMappingError::UnsupportedCodec {
                mime_type: codec.mime_type.clone(),
                payload_type: codec.payload_type,
            })?;
        let mapped_payload_type = cap_codec.preferred_payload_type.unwrap_or_default();

        rtp_mapping.codecs.push(RtpMappingCodec {
            payload_type: codec.payload_type,
            mapped_payload_type,
        });

        if let Some(rtx_codec) = rtp_parameters
            .codecs
            .iter()
            .find(|rtx_codec| rtx_codec.is_rtx() && rtx_codec.apt() == Some(codec.payload_type))
        {
            let cap_rtx_codec = rtp_capabilities
                .codecs
                .iter()
                .find(|cap_rtx_codec| {
                    cap_rtx_codec.mime_type.is_rtx()
                        && matches!(
                            cap_rtx_codec.parameters.get("apt"),
                            Some(RtpCodecParametersParametersValue::Number(apt))
                                if *apt == u32::from(mapped_payload_type)
                        )
                })
                .ok_or(RtpParametersMappingError::UnsupportedRtxCodec(
                    mapped_payload_type,
                ))?;

            rtp_mapping.codecs.push(RtpMappingCodec {
                payload_type: rtx_codec.payload_type,
                mapped_payload_type: cap_rtx_codec.preferred_payload_type.unwrap_or_default(),
            });
        }
    }

    let mut rng = SmallRng::from_entropy();
    let mut mapped_ssrc: u32 = rng.gen_range(100_000_000..999_999_999);

    let encodings = if rtp_parameters.encodings.is_empty() {
        vec![RtpEncodingParameters::default()]
    } else {
        rtp_parameters.encodings.clone()
    };
    for encoding in encodings {
        rtp_mapping.encodings.push(RtpMappingEncoding {
            ssrc: encoding.ssrc,
            rid: encoding.rid,
            scalability_mode: encoding.scalability_mode,
            mapped_ssrc,
        });
        mapped_ssrc += 1;
    }

    Ok(rtp_mapping)
}

/// RTP parameters every consumer of a producer is derived from, expressed in router payload
/// types and SSRCs.
pub(crate) fn get_consumable_rtp_parameters(
    kind: MediaKind,
    rtp_parameters: &RtpParameters,
    rtp_capabilities: &RtpCapabilities,
    rtp_mapping: &RtpMapping,
) -> RtpParameters {
    let mut consumable_params = RtpParameters::default();

    for codec in rtp_parameters.codecs.iter().filter(|codec| !codec.is_rtx()) {
        let Some(mapped_payload_type) = rtp_mapping
            .codecs
            .iter()
            .find(|entry| entry.payload_type == codec.payload_type)
            .map(|entry| entry.mapped_payload_type)
        else {
            continue;
        };
        let Some(cap_codec) = rtp_capabilities
            .codecs
            .iter()
            .find(|cap_codec| cap_codec.preferred_payload_type == Some(mapped_payload_type))
        else {
            continue;
        };

        consumable_params.codecs.push(RtpCodecParameters {
            mime_type: cap_codec.mime_type.clone(),
            payload_type: mapped_payload_type,
            clock_rate: cap_codec.clock_rate,
            channels: cap_codec.channels,
            // Producer parameters win since they describe what is actually sent
            parameters: codec.parameters.clone(),
            rtcp_feedback: cap_codec.rtcp_feedback.clone(),
        });

        if let Some(cap_rtx_codec) = rtp_capabilities.codecs.iter().find(|cap_rtx_codec| {
            cap_rtx_codec.mime_type.is_rtx()
                && matches!(
                    cap_rtx_codec.parameters.get("apt"),
                    Some(RtpCodecParametersParametersValue::Number(apt))
                        if *apt == u32::from(mapped_payload_type)
                )
        }) {
            consumable_params.codecs.push(RtpCodecParameters {
                mime_type: cap_rtx_codec.mime_type.clone(),
                payload_type: cap_rtx_codec.preferred_payload_type.unwrap_or_default(),
                clock_rate: cap_rtx_codec.clock_rate,
                channels: None,
                parameters: cap_rtx_codec.parameters.clone(),
                rtcp_feedback: Vec::new(),
            });
        }
    }

    for cap_ext in &rtp_capabilities.header_extensions {
        if cap_ext.kind != kind
            || !matches!(
                cap_ext.direction,
                RtpHeaderExtensionDirection::SendRecv | RtpHeaderExtensionDirection::SendOnly
            )
        {
            continue;
        }

        consumable_params
            .header_extensions
            .push(RtpHeaderExtensionParameters {
                uri: cap_ext.uri.clone(),
                id: cap_ext.preferred_id,
                encrypt: cap_ext.preferred_encrypt,
            });
    }

    let source_encodings = if rtp_parameters.encodings.is_empty() {
        vec![RtpEncodingParameters::default()]
    } else {
        rtp_parameters.encodings.clone()
    };
    for (encoding, mapping) in source_encodings.into_iter().zip(&rtp_mapping.encodings) {
        consumable_params.encodings.push(RtpEncodingParameters {
            ssrc: Some(mapping.mapped_ssrc),
            rid: None,
            codec_payload_type: None,
            rtx: None,
            dtx: encoding.dtx,
            scalability_mode: encoding.scalability_mode,
            max_bitrate: encoding.max_bitrate,
        });
    }

    consumable_params.rtcp = RtcpParameters {
        cname: rtp_parameters.rtcp.cname.clone(),
        reduced_size: true,
    };

    consumable_params
}

/// Whether an endpoint with given capabilities can receive at least one media codec of the
/// consumable parameters.
pub(crate) fn can_consume(
    consumable_params: &RtpParameters,
    caps: &RtpCapabilities,
) -> bool {
    consumable_params
        .codecs
        .iter()
        .filter(|codec| !codec.is_rtx())
        .any(|codec| caps.codecs.iter().any(|cap_codec| match_codec(codec, cap_codec)))
}

/// Endpoint capabilities don't allow consuming.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConsumerRtpParametersError {
    /// No media codec in common.
    #[error("No compatible media codecs")]
    NoCompatibleMediaCodecs,
}

/// RTP parameters of a regular consumer: only codecs the endpoint supports and a single encoding
/// with a fresh SSRC, layered if the producer sends several streams.
pub(crate) fn get_consumer_rtp_parameters(
    consumable_params: &RtpParameters,
    caps: &RtpCapabilities,
) -> Result<RtpParameters, ConsumerRtpParametersError> {
    let mut consumer_params = RtpParameters {
        rtcp: consumable_params.rtcp.clone(),
        ..RtpParameters::default()
    };

    for codec in &consumable_params.codecs {
        if codec.is_rtx() {
            continue;
        }

        if let Some(cap_codec) = caps
            .codecs
            .iter()
            .find(|cap_codec| match_codec(codec, cap_codec))
        {
            let mut codec = codec.clone();
            codec.rtcp_feedback = cap_codec.rtcp_feedback.clone();
            consumer_params.codecs.push(codec);
        }
    }

    if consumer_params.codecs.is_empty() {
        return Err(ConsumerRtpParametersError::NoCompatibleMediaCodecs);
    }

    let media_payload_types = consumer_params
        .codecs
        .iter()
        .map(|codec| codec.payload_type)
        .collect::<Vec<_>>();
    let caps_have_rtx = caps.codecs.iter().any(|cap_codec| cap_codec.mime_type.is_rtx());
    if caps_have_rtx {
        for rtx_codec in consumable_params.codecs.iter().filter(|codec| codec.is_rtx()) {
            if rtx_codec
                .apt()
                .map_or(false, |apt| media_payload_types.contains(&apt))
            {
                consumer_params.codecs.push(rtx_codec.clone());
            }
        }
    }
    let has_rtx = consumer_params.codecs.iter().any(RtpCodecParameters::is_rtx);

    consumer_params.header_extensions = consumable_params
        .header_extensions
        .iter()
        .filter(|ext| {
            caps.header_extensions
                .iter()
                .any(|cap_ext| cap_ext.uri == ext.uri && cap_ext.preferred_id == ext.id)
        })
        .cloned()
        .collect();

    let mut rng = SmallRng::from_entropy();
    let ssrc = rng.gen_range(100_000_000..999_999_999);

    let temporal_layers = consumable_params
        .encodings
        .iter()
        .filter_map(|encoding| encoding.scalability_mode)
        .map(|mode| mode.temporal_layers().get())
        .max()
        .unwrap_or(1);
    let scalability_mode = match consumable_params.encodings.as_slice() {
        [] => None,
        [encoding] => encoding.scalability_mode,
        encodings => format!("S{}T{}", encodings.len(), temporal_layers)
            .parse::<ScalabilityMode>()
            .ok(),
    };

    consumer_params.encodings.push(RtpEncodingParameters {
        ssrc: Some(ssrc),
        rtx: has_rtx.then_some(RtpEncodingParametersRtx { ssrc: ssrc + 1 }),
        scalability_mode,
        max_bitrate: consumable_params
            .encodings
            .iter()
            .filter_map(|encoding| encoding.max_bitrate)
            .max(),
        ..RtpEncodingParameters::default()
    });

    Ok(consumer_params)
}

/// RTP parameters of a pipe consumer: every stream of the producer is forwarded verbatim.
pub(crate) fn get_pipe_consumer_rtp_parameters(
    consumable_params: &RtpParameters,
    enable_rtx: bool,
) -> RtpParameters {
    let mut consumer_params = RtpParameters {
        rtcp: consumable_params.rtcp.clone(),
        header_extensions: consumable_params.header_extensions.clone(),
        ..RtpParameters::default()
    };

    for codec in &consumable_params.codecs {
        if !enable_rtx && codec.is_rtx() {
            continue;
        }

        let mut codec = codec.clone();
        codec
            .rtcp_feedback
            .retain(|fb| fb.r#type != "transport-cc" && fb.r#type != "goog-remb");
        consumer_params.codecs.push(codec);
    }

    let mut rng = SmallRng::from_entropy();
    let mut rtx_ssrc: u32 = rng.gen_range(100_000_000..999_999_999);

    for encoding in &consumable_params.encodings {
        let mut encoding = encoding.clone();
        if enable_rtx {
            encoding.rtx = Some(RtpEncodingParametersRtx { ssrc: rtx_ssrc });
            rtx_ssrc += 1;
        }
        consumer_params.encodings.push(encoding);
    }

    consumer_params
}

fn match_codec(codec: &RtpCodecParameters, cap_codec: &RtpCodecCapability) -> bool {
    if codec.mime_type != cap_codec.mime_type || codec.clock_rate != cap_codec.clock_rate {
        return false;
    }

    if codec.mime_type.kind() == MediaKind::Audio
        && codec.channels.map_or(1, |channels| channels.get())
            != cap_codec.channels.map_or(1, |channels| channels.get())
    {
        return false;
    }

    // Packetization mode must match exactly for H264 (absent means 0)
    if codec.mime_type.subtype().eq_ignore_ascii_case("h264") {
        let packetization_mode =
            |parameters: &RtpCodecParametersParameters| match parameters.get("packetization-mode") {
                Some(RtpCodecParametersParametersValue::Number(mode)) => *mode,
                _ => 0,
            };

        if packetization_mode(&codec.parameters) != packetization_mode(&cap_codec.parameters) {
            return false;
        }
    }

    true
}
