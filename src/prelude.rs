//! mediaplane prelude.
//!
//! Re-exports commonly used traits and structs from this crate.
//!
//! # Examples
//!
//! Import the prelude with:
//!
//! ```
//! # #[allow(unused_imports)]
//! use mediaplane::prelude::*;
//! ```
pub use crate::worker_manager::WorkerManager;

pub use crate::worker::{
    CreateRouterError, CreateWebRtcServerError, EngineLink, NotificationError, RequestError,
    Worker, WorkerLogLevel, WorkerLogTag, WorkerSettings, WorkerUpdateSettings,
};

pub use crate::router::{
    NewTransport, PipeDataProducerToRouterError, PipeDataProducerToRouterPair,
    PipeProducerToRouterError, PipeProducerToRouterPair, PipeToRouterOptions, Router,
    RouterOptions, WeakRouter,
};

pub use crate::webrtc_server::{
    WebRtcServer, WebRtcServerId, WebRtcServerListenInfos, WebRtcServerOptions, WeakWebRtcServer,
};

pub use crate::direct_transport::{DirectTransport, DirectTransportOptions, WeakDirectTransport};
pub use crate::pipe_transport::{
    PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters, WeakPipeTransport,
};
pub use crate::plain_transport::{
    PlainTransport, PlainTransportListen, PlainTransportListenError, PlainTransportOptions,
    PlainTransportRemoteParameters, WeakPlainTransport,
};
pub use crate::transport::{
    ConsumeDataError, ConsumeError, ProduceDataError, ProduceError, Transport, TransportId,
    TransportType,
};
pub use crate::webrtc_transport::{
    EmptyListError, WeakWebRtcTransport, WebRtcTransport, WebRtcTransportListen,
    WebRtcTransportListenInfos, WebRtcTransportOptions, WebRtcTransportRemoteParameters,
};

pub use crate::consumer::{Consumer, ConsumerId, ConsumerLayers, ConsumerOptions, WeakConsumer};
pub use crate::data_consumer::{
    DataConsumer, DataConsumerId, DataConsumerOptions, WeakDataConsumer,
};
pub use crate::data_producer::{
    DataProducer, DataProducerId, DataProducerOptions, DirectDataProducer, RegularDataProducer,
    WeakDataProducer,
};
pub use crate::producer::{
    DirectProducer, Producer, ProducerId, ProducerOptions, RegularProducer, WeakProducer,
};

pub use crate::data_structures::{
    AppData, DtlsParameters, IceCandidate, IceParameters, ListenInfo, ListenIp, Protocol,
    WebRtcMessage,
};
pub use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpCapabilities, RtpCodecCapability,
    RtpCodecParametersParameters, RtpParameters,
};
pub use crate::sctp_parameters::SctpStreamParameters;
pub use crate::srtp_parameters::SrtpCryptoSuite;
