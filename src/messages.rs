use crate::consumer::{
    ConsumerId, ConsumerLayers, ConsumerScore, ConsumerTraceEventType, ConsumerType,
};
use crate::data_consumer::{DataConsumerId, DataConsumerType};
use crate::data_producer::{DataProducerId, DataProducerType};
use crate::data_structures::{
    DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters, IceRole, IceState,
    ListenInfo, SctpState, TransportTuple,
};
use crate::ortc::RtpMapping;
use crate::producer::{ProducerId, ProducerTraceEventType, ProducerType};
use crate::router::RouterId;
use crate::rtp_parameters::{MediaKind, RtpEncodingParameters, RtpParameters};
use crate::sctp_parameters::{NumSctpStreams, SctpParameters, SctpStreamParameters};
use crate::srtp_parameters::{SrtpCryptoSuite, SrtpParameters};
use crate::transport::{TransportId, TransportTraceEventType};
use crate::webrtc_server::WebRtcServerId;
use crate::worker::{WorkerLogLevel, WorkerLogTag};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::net::IpAddr;

pub(crate) trait Request: Debug + Serialize {
    type Response: DeserializeOwned;

    fn as_method(&self) -> &'static str;
}

pub(crate) trait Notification: Debug + Serialize {
    fn as_event(&self) -> &'static str;
}

macro_rules! request_response {
    (
        $method: literal,
        $request_struct_name: ident $({
            $(
                $(#[$request_field_name_attributes: meta])*
                $request_field_name: ident: $request_field_type: ty,
            )*
        })?,
        $existing_response_type: ty $(,)?
    ) => {
        #[derive(Debug, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub(crate) struct $request_struct_name {
            $(
                $(
                    $(#[$request_field_name_attributes])*
                    pub(crate) $request_field_name: $request_field_type,
                )*
            )?
        }

        impl Request for $request_struct_name {
            type Response = $existing_response_type;

            fn as_method(&self) -> &'static str {
                $method
            }
        }
    };
}

macro_rules! notification {
    (
        $event: literal,
        $notification_struct_name: ident {
            $(
                $(#[$notification_field_name_attributes: meta])*
                $notification_field_name: ident: $notification_field_type: ty,
            )*
        } $(,)?
    ) => {
        #[derive(Debug, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub(crate) struct $notification_struct_name {
            $(
                $(#[$notification_field_name_attributes])*
                pub(crate) $notification_field_name: $notification_field_type,
            )*
        }

        impl Notification for $notification_struct_name {
            fn as_event(&self) -> &'static str {
                $event
            }
        }
    };
}

// Worker

request_response!("worker.dump", WorkerDumpRequest {}, Value);

request_response!(
    "worker.updateSettings",
    WorkerUpdateSettingsRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        log_level: Option<WorkerLogLevel>,
        #[serde(skip_serializing_if = "Option::is_none")]
        log_tags: Option<Vec<WorkerLogTag>>,
    },
    (),
);

request_response!(
    "worker.createRouter",
    WorkerCreateRouterRequest {
        router_id: RouterId,
    },
    (),
);

request_response!(
    "worker.closeRouter",
    WorkerCloseRouterRequest {
        router_id: RouterId,
    },
    (),
);

request_response!(
    "worker.createWebRtcServer",
    WorkerCreateWebRtcServerRequest {
        web_rtc_server_id: WebRtcServerId,
        listen_infos: Vec<ListenInfo>,
    },
    (),
);

request_response!(
    "worker.closeWebRtcServer",
    WorkerCloseWebRtcServerRequest {
        web_rtc_server_id: WebRtcServerId,
    },
    (),
);

// WebRtcServer

request_response!("webRtcServer.dump", WebRtcServerDumpRequest {}, Value);

// Router

request_response!("router.dump", RouterDumpRequest {}, Value);

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum WebRtcTransportListenData {
    #[serde(rename_all = "camelCase")]
    Individual { listen_infos: Vec<ListenInfo> },
    #[serde(rename_all = "camelCase")]
    Server { web_rtc_server_id: WebRtcServerId },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportData {
    pub(crate) ice_role: IceRole,
    pub(crate) ice_parameters: IceParameters,
    pub(crate) ice_candidates: Vec<IceCandidate>,
    pub(crate) ice_state: IceState,
    #[serde(default)]
    pub(crate) ice_selected_tuple: Option<TransportTuple>,
    pub(crate) dtls_parameters: DtlsParameters,
    pub(crate) dtls_state: DtlsState,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
}

request_response!(
    "router.createWebRtcTransport",
    RouterCreateWebRtcTransportRequest {
        transport_id: TransportId,
        #[serde(flatten)]
        listen: WebRtcTransportListenData,
        enable_udp: bool,
        enable_tcp: bool,
        prefer_udp: bool,
        prefer_tcp: bool,
        ice_consent_timeout: u8,
        initial_available_outgoing_bitrate: u32,
        enable_sctp: bool,
        num_sctp_streams: NumSctpStreams,
        max_sctp_message_size: u32,
        sctp_send_buffer_size: u32,
        is_data_channel: bool,
    },
    WebRtcTransportData,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportData {
    pub(crate) rtcp_mux: bool,
    pub(crate) comedia: bool,
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

request_response!(
    "router.createPlainTransport",
    RouterCreatePlainTransportRequest {
        transport_id: TransportId,
        listen_info: ListenInfo,
        #[serde(skip_serializing_if = "Option::is_none")]
        rtcp_listen_info: Option<ListenInfo>,
        rtcp_mux: bool,
        comedia: bool,
        enable_sctp: bool,
        num_sctp_streams: NumSctpStreams,
        max_sctp_message_size: u32,
        sctp_send_buffer_size: u32,
        is_data_channel: bool,
        enable_srtp: bool,
        srtp_crypto_suite: SrtpCryptoSuite,
    },
    PlainTransportData,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportData {
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) rtx: bool,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

request_response!(
    "router.createPipeTransport",
    RouterCreatePipeTransportRequest {
        transport_id: TransportId,
        listen_info: ListenInfo,
        enable_sctp: bool,
        num_sctp_streams: NumSctpStreams,
        max_sctp_message_size: u32,
        sctp_send_buffer_size: u32,
        is_data_channel: bool,
        enable_rtx: bool,
        enable_srtp: bool,
    },
    PipeTransportData,
);

request_response!(
    "router.createDirectTransport",
    RouterCreateDirectTransportRequest {
        transport_id: TransportId,
        direct: bool,
        max_message_size: u32,
    },
    (),
);

request_response!(
    "router.closeTransport",
    RouterCloseTransportRequest {
        transport_id: TransportId,
    },
    (),
);

// Transport

request_response!("transport.dump", TransportDumpRequest {}, Value);

request_response!("transport.getStats", TransportGetStatsRequest {}, Value);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportConnectWebRtcResponse {
    pub(crate) dtls_local_role: DtlsRole,
}

request_response!(
    "transport.connect",
    TransportConnectWebRtcRequest {
        dtls_parameters: DtlsParameters,
    },
    TransportConnectWebRtcResponse,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportConnectPlainResponse {
    #[serde(default)]
    pub(crate) tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

request_response!(
    "transport.connect",
    TransportConnectPlainRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        ip: Option<IpAddr>,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rtcp_port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        srtp_parameters: Option<SrtpParameters>,
    },
    TransportConnectPlainResponse,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportConnectPipeResponse {
    pub(crate) tuple: TransportTuple,
}

request_response!(
    "transport.connect",
    TransportConnectPipeRequest {
        ip: IpAddr,
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        srtp_parameters: Option<SrtpParameters>,
    },
    TransportConnectPipeResponse,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportRestartIceResponse {
    pub(crate) ice_parameters: IceParameters,
}

request_response!(
    "transport.restartIce",
    TransportRestartIceRequest {},
    TransportRestartIceResponse,
);

request_response!(
    "transport.setMaxIncomingBitrate",
    TransportSetMaxIncomingBitrateRequest { bitrate: u32, },
    (),
);

request_response!(
    "transport.setMaxOutgoingBitrate",
    TransportSetMaxOutgoingBitrateRequest { bitrate: u32, },
    (),
);

request_response!(
    "transport.setMinOutgoingBitrate",
    TransportSetMinOutgoingBitrateRequest { bitrate: u32, },
    (),
);

request_response!(
    "transport.enableTraceEvent",
    TransportEnableTraceEventRequest {
        types: Vec<TransportTraceEventType>,
    },
    (),
);

request_response!(
    "transport.produce",
    TransportProduceRequest {
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        rtp_mapping: RtpMapping,
        key_frame_request_delay: u32,
        paused: bool,
    },
    TransportProduceResponse,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportProduceResponse {
    #[serde(default)]
    pub(crate) r#type: Option<ProducerType>,
}

request_response!(
    "transport.consume",
    TransportConsumeRequest {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        r#type: ConsumerType,
        consumable_rtp_encodings: Vec<RtpEncodingParameters>,
        paused: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        preferred_layers: Option<ConsumerLayers>,
        ignore_dtx: bool,
    },
    TransportConsumeResponse,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportConsumeResponse {
    pub(crate) paused: bool,
    pub(crate) producer_paused: bool,
    pub(crate) score: ConsumerScore,
    #[serde(default)]
    pub(crate) preferred_layers: Option<ConsumerLayers>,
}

request_response!(
    "transport.produceData",
    TransportProduceDataRequest {
        data_producer_id: DataProducerId,
        r#type: DataProducerType,
        #[serde(skip_serializing_if = "Option::is_none")]
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
    },
    (),
);

request_response!(
    "transport.consumeData",
    TransportConsumeDataRequest {
        data_consumer_id: DataConsumerId,
        data_producer_id: DataProducerId,
        r#type: DataConsumerType,
        #[serde(skip_serializing_if = "Option::is_none")]
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
    },
    (),
);

request_response!(
    "transport.closeProducer",
    TransportCloseProducerRequest {
        producer_id: ProducerId,
    },
    (),
);

request_response!(
    "transport.closeConsumer",
    TransportCloseConsumerRequest {
        consumer_id: ConsumerId,
    },
    (),
);

request_response!(
    "transport.closeDataProducer",
    TransportCloseDataProducerRequest {
        data_producer_id: DataProducerId,
    },
    (),
);

request_response!(
    "transport.closeDataConsumer",
    TransportCloseDataConsumerRequest {
        data_consumer_id: DataConsumerId,
    },
    (),
);

notification!(
    "transport.sendRtcp",
    TransportSendRtcpNotification {
        rtcp_packet: Vec<u8>,
    },
);

// Producer

request_response!("producer.dump", ProducerDumpRequest {}, Value);

request_response!("producer.getStats", ProducerGetStatsRequest {}, Value);

request_response!("producer.pause", ProducerPauseRequest {}, ());

request_response!("producer.resume", ProducerResumeRequest {}, ());

request_response!(
    "producer.enableTraceEvent",
    ProducerEnableTraceEventRequest {
        types: Vec<ProducerTraceEventType>,
    },
    (),
);

notification!(
    "producer.send",
    ProducerSendNotification {
        rtp_packet: Vec<u8>,
    },
);

// Consumer

request_response!("consumer.dump", ConsumerDumpRequest {}, Value);

request_response!("consumer.getStats", ConsumerGetStatsRequest {}, Value);

request_response!("consumer.pause", ConsumerPauseRequest {}, ());

request_response!("consumer.resume", ConsumerResumeRequest {}, ());

request_response!(
    "consumer.setPreferredLayers",
    ConsumerSetPreferredLayersRequest {
        spatial_layer: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        temporal_layer: Option<u8>,
    },
    Option<ConsumerLayers>,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumerSetPriorityResponse {
    pub(crate) priority: u8,
}

request_response!(
    "consumer.setPriority",
    ConsumerSetPriorityRequest { priority: u8, },
    ConsumerSetPriorityResponse,
);

request_response!("consumer.requestKeyFrame", ConsumerRequestKeyFrameRequest {}, ());

request_response!(
    "consumer.enableTraceEvent",
    ConsumerEnableTraceEventRequest {
        types: Vec<ConsumerTraceEventType>,
    },
    (),
);

// DataProducer

request_response!("dataProducer.dump", DataProducerDumpRequest {}, Value);

request_response!("dataProducer.getStats", DataProducerGetStatsRequest {}, Value);

notification!(
    "dataProducer.send",
    DataProducerSendNotification {
        ppid: u32,
        payload: Vec<u8>,
    },
);

// DataConsumer

request_response!("dataConsumer.dump", DataConsumerDumpRequest {}, Value);

request_response!("dataConsumer.getStats", DataConsumerGetStatsRequest {}, Value);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataConsumerGetBufferedAmountResponse {
    pub(crate) buffered_amount: u32,
}

request_response!(
    "dataConsumer.getBufferedAmount",
    DataConsumerGetBufferedAmountRequest {},
    DataConsumerGetBufferedAmountResponse,
);

request_response!(
    "dataConsumer.setBufferedAmountLowThreshold",
    DataConsumerSetBufferedAmountLowThresholdRequest { threshold: u32, },
    (),
);
