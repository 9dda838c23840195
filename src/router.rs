//! A router enables injection, selection and forwarding of media streams through
//! [`Transport`] instances created on it.
//!
//! Think of a router as if it was a "multi-party conference room", although routers are much
//! more low level than that and doesn't constrain themselves to specific high level use cases
//! (for instance, a "multi-party conference room" could involve various routers, even in
//! different physical hosts).

pub mod consumer;
pub mod data_consumer;
pub mod data_producer;
pub mod direct_transport;
pub mod pipe_transport;
pub mod plain_transport;
pub mod producer;
#[cfg(test)]
mod tests;
pub mod transport;
pub mod webrtc_transport;

use crate::consumer::{Consumer, ConsumerOptions};
use crate::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::data_producer::{DataProducer, DataProducerId, DataProducerOptions};
use crate::data_structures::{AppData, ListenInfo, Protocol, SctpState};
use crate::direct_transport::{DirectTransport, DirectTransportOptions};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    RouterCreateDirectTransportRequest, RouterCreatePipeTransportRequest,
    RouterCreatePlainTransportRequest, RouterCreateWebRtcTransportRequest, RouterDumpRequest,
    Request, WebRtcTransportListenData, WorkerCloseRouterRequest,
};
use crate::ortc;
use crate::pipe_transport::{PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters};
use crate::plain_transport::{PlainTransport, PlainTransportOptions};
use crate::producer::{Producer, ProducerId, ProducerOptions};
use crate::rtp_parameters::{RtpCapabilities, RtpCodecCapability};
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::transport::{
    ConsumeDataError, ConsumeError, ProduceDataError, ProduceError, Transport, TransportBase,
    TransportBaseAccess, TransportId, TransportType,
};
use crate::uuid_based_wrapper_type;
use crate::webrtc_transport::{WebRtcTransport, WebRtcTransportListen, WebRtcTransportOptions};
use crate::worker::{Channel, RequestError};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use futures_lite::future;
use hash_hasher::HashedMap;
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

uuid_based_wrapper_type!(
    /// [`Router`] identifier.
    RouterId
);

/// [`Router`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RouterOptions {
    /// Router media codecs.
    pub media_codecs: Vec<RtpCodecCapability>,
    /// Custom application data.
    pub app_data: AppData,
}

impl RouterOptions {
    /// Create router options with given list of declared media codecs.
    #[must_use]
    pub fn new(media_codecs: Vec<RtpCodecCapability>) -> Self {
        Self {
            media_codecs,
            app_data: AppData::default(),
        }
    }
}

/// Options used for piping media or data producer to another router on the same host.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PipeToRouterOptions {
    /// Target router instance.
    pub router: Router,
    /// Listening info for both pipe transports. Default `127.0.0.1` over UDP.
    pub listen_info: ListenInfo,
    /// Create a SCTP association. Default true.
    pub enable_sctp: bool,
    /// SCTP streams number.
    pub num_sctp_streams: NumSctpStreams,
    /// Enable RTX and NACK for RTP retransmission. Default false.
    pub enable_rtx: bool,
    /// Enable SRTP. Default false.
    pub enable_srtp: bool,
}

impl PipeToRouterOptions {
    /// Pipe to given router with default options.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self {
            router,
            listen_info: ListenInfo::new(Protocol::Udp, IpAddr::V4(Ipv4Addr::LOCALHOST)),
            enable_sctp: true,
            num_sctp_streams: NumSctpStreams::default(),
            enable_rtx: false,
            enable_srtp: false,
        }
    }

    fn pipe_transport_options(&self) -> PipeTransportOptions {
        let mut options = PipeTransportOptions::new(self.listen_info.clone());
        options.enable_sctp = self.enable_sctp;
        options.num_sctp_streams = self.num_sctp_streams;
        options.enable_rtx = self.enable_rtx;
        options.enable_srtp = self.enable_srtp;
        options
    }
}

/// Container for pipe consumer and pipe producer pair created by
/// [`Router::pipe_producer_to_router`].
#[derive(Debug)]
pub struct PipeProducerToRouterPair {
    /// The consumer created in the current router.
    pub pipe_consumer: Consumer,
    /// The producer created in the target router, it has the same id as the original producer.
    pub pipe_producer: Producer,
}

/// Error that caused [`Router::pipe_producer_to_router`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PipeProducerToRouterError {
    /// Destination router must be different.
    #[error("Destination router must be different")]
    SameRouter,
    /// Producer with specified id not found.
    #[error("Producer with id \"{0}\" not found")]
    ProducerNotFound(ProducerId),
    /// Failed to create or connect pipe transport.
    #[error("Failed to create or connect pipe transport: {0}")]
    TransportFailed(RequestError),
    /// Failed to consume.
    #[error("Failed to consume: {0}")]
    ConsumeFailed(ConsumeError),
    /// Failed to produce.
    #[error("Failed to produce: {0}")]
    ProduceFailed(ProduceError),
}

/// Container for pipe data consumer and pipe data producer pair created by
/// [`Router::pipe_data_producer_to_router`].
#[derive(Debug)]
pub struct PipeDataProducerToRouterPair {
    /// The data consumer created in the current router.
    pub pipe_data_consumer: DataConsumer,
    /// The data producer created in the target router, it has the same id as the original data
    /// producer.
    pub pipe_data_producer: DataProducer,
}

/// Error that caused [`Router::pipe_data_producer_to_router`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PipeDataProducerToRouterError {
    /// Destination router must be different.
    #[error("Destination router must be different")]
    SameRouter,
    /// Data producer with specified id not found.
    #[error("Data producer with id \"{0}\" not found")]
    DataProducerNotFound(DataProducerId),
    /// Failed to create or connect pipe transport.
    #[error("Failed to create or connect pipe transport: {0}")]
    TransportFailed(RequestError),
    /// Failed to consume.
    #[error("Failed to consume: {0}")]
    ConsumeFailed(ConsumeDataError),
    /// Failed to produce.
    #[error("Failed to produce: {0}")]
    ProduceFailed(ProduceDataError),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct RouterDump {
    pub id: RouterId,
    #[serde(default)]
    pub transport_ids: Vec<TransportId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// New transport that was just created.
#[derive(Debug)]
pub enum NewTransport<'a> {
    /// Direct transport
    Direct(&'a DirectTransport),
    /// Pipe transport
    Pipe(&'a PipeTransport),
    /// Plain transport
    Plain(&'a PlainTransport),
    /// WebRTC transport
    WebRtc(&'a WebRtcTransport),
}

impl<'a> Deref for NewTransport<'a> {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Direct(transport) => *transport as &Self::Target,
            Self::Pipe(transport) => *transport as &Self::Target,
            Self::Plain(transport) => *transport as &Self::Target,
            Self::WebRtc(transport) => *transport as &Self::Target,
        }
    }
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_transport: Bag<Arc<dyn Fn(NewTransport<'_>) + Send + Sync>>,
    worker_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct PrivateHandlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct ObserverHandlers {
    new_transport: Bag<Arc<dyn Fn(NewTransport<'_>) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    WorkerClosed,
}

#[derive(Clone)]
struct PipeTransportPair {
    local: PipeTransport,
    remote: PipeTransport,
}

type PipeTransportPairSlot = Arc<async_lock::Mutex<Option<PipeTransportPair>>>;

struct Inner {
    id: RouterId,
    rtp_capabilities: RtpCapabilities,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    /// Scope of transports and everything created on them.
    ids: IdRegistry,
    /// Scope of the worker, this router's own id lives there.
    worker_ids: IdRegistry,
    transports: Mutex<HashedMap<TransportId, Arc<TransportBase>>>,
    producers: Mutex<HashedMap<ProducerId, Producer>>,
    data_producers: Mutex<HashedMap<DataProducerId, DataProducer>>,
    mapped_pipe_transports: Mutex<HashedMap<RouterId, PipeTransportPairSlot>>,
    hub: EventHub<Handlers>,
    private: EventHub<PrivateHandlers>,
    observer: EventHub<ObserverHandlers>,
    app_data: Mutex<AppData>,
    closed: AtomicBool,
}

impl Inner {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}, cause:{:?}]", self.id, cause);

        self.worker_ids.release(self.id);

        let transports = std::mem::take(&mut *self.transports.lock());
        for transport in transports.into_values() {
            transport.router_closed();
        }
        self.producers.lock().clear();
        self.data_producers.lock().clear();
        self.mapped_pipe_transports.lock().clear();

        if cause == CloseCause::WorkerClosed {
            self.hub
                .emit(|handlers| handlers.worker_close.call_simple());
        }
        self.private.tear_down(|handlers| handlers.close.call_simple());
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let request = WorkerCloseRouterRequest { router_id: self.id };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request("", request).await {
                        error!("router closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A router enables injection, selection and forwarding of media streams through
/// [`Transport`] instances created on it.
#[derive(Clone)]
#[must_use = "Router stays open until closed explicitly or its worker is closed"]
pub struct Router {
    inner: Arc<Inner>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Router {
    pub(crate) fn new(
        id: RouterId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        rtp_capabilities: RtpCapabilities,
        worker_ids: IdRegistry,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            rtp_capabilities,
            executor,
            channel,
            ids: IdRegistry::default(),
            worker_ids,
            transports: Mutex::default(),
            producers: Mutex::default(),
            data_producers: Mutex::default(),
            mapped_pipe_transports: Mutex::default(),
            hub: EventHub::default(),
            private: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// Router id.
    #[must_use]
    pub fn id(&self) -> RouterId {
        self.inner.id
    }

    /// RTP capabilities of the router. These capabilities are typically needed by endpoints to
    /// negotiate what they can send and receive.
    #[must_use]
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.inner.rtp_capabilities
    }

    /// Custom application data.
    #[must_use]
    pub fn app_data(&self) -> AppData {
        self.inner.app_data.lock().clone()
    }

    /// Replace custom application data.
    pub fn set_app_data(&self, app_data: AppData) {
        *self.inner.app_data.lock() = app_data;
    }

    /// Whether router is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dump Router.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<RouterDump, RequestError> {
        debug!("dump()");

        let dump = self.request(RouterDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Create a [`DirectTransport`].
    pub async fn create_direct_transport(
        &self,
        direct_transport_options: DirectTransportOptions,
    ) -> Result<DirectTransport, RequestError> {
        debug!("create_direct_transport()");

        let DirectTransportOptions {
            max_message_size,
            app_data,
        } = direct_transport_options;
        let transport_id: TransportId = self.inner.ids.allocate();

        self.request_creation(
            transport_id,
            RouterCreateDirectTransportRequest {
                transport_id,
                direct: true,
                max_message_size,
            },
        )
        .await?;

        let base = self.transport_base(
            transport_id,
            TransportType::Direct,
            None,
            None,
            false,
            app_data,
        );
        let transport = DirectTransport::new(base);
        self.track_transport(transport.base());

        self.emit_new_transport(NewTransport::Direct(&transport));

        Ok(transport)
    }

    /// Create a [`WebRtcTransport`], either listening on its own sockets or through a
    /// [`WebRtcServer`](crate::webrtc_server::WebRtcServer).
    pub async fn create_webrtc_transport(
        &self,
        webrtc_transport_options: WebRtcTransportOptions,
    ) -> Result<WebRtcTransport, RequestError> {
        debug!("create_webrtc_transport()");

        let WebRtcTransportOptions {
            listen,
            enable_udp,
            enable_tcp,
            prefer_udp,
            prefer_tcp,
            ice_consent_timeout,
            initial_available_outgoing_bitrate,
            enable_sctp,
            num_sctp_streams,
            max_sctp_message_size,
            sctp_send_buffer_size,
            app_data,
        } = webrtc_transport_options;

        let (listen, webrtc_server) = match listen {
            WebRtcTransportListen::Individual { listen_infos } => (
                WebRtcTransportListenData::Individual {
                    listen_infos: listen_infos.into_vec(),
                },
                None,
            ),
            WebRtcTransportListen::Server { webrtc_server } => {
                if webrtc_server.closed() {
                    return Err(RequestError::EntityClosed);
                }
                (
                    WebRtcTransportListenData::Server {
                        web_rtc_server_id: webrtc_server.id(),
                    },
                    Some(webrtc_server),
                )
            }
        };
        let transport_id: TransportId = self.inner.ids.allocate();

        let data = self
            .request_creation(
                transport_id,
                RouterCreateWebRtcTransportRequest {
                    transport_id,
                    listen,
                    enable_udp,
                    enable_tcp,
                    prefer_udp,
                    prefer_tcp,
                    ice_consent_timeout,
                    initial_available_outgoing_bitrate,
                    enable_sctp,
                    num_sctp_streams,
                    max_sctp_message_size,
                    sctp_send_buffer_size,
                    is_data_channel: true,
                },
            )
            .await?;

        let base = self.transport_base(
            transport_id,
            TransportType::WebRtc,
            data.sctp_parameters,
            data.sctp_state,
            false,
            app_data,
        );
        let transport = WebRtcTransport::new(base, data);
        self.track_transport(transport.base());

        if let Some(webrtc_server) = webrtc_server {
            if !webrtc_server.handle_webrtc_transport(&transport) {
                return Err(RequestError::EntityClosed);
            }
        }

        self.emit_new_transport(NewTransport::WebRtc(&transport));

        Ok(transport)
    }

    /// Create a [`PlainTransport`].
    pub async fn create_plain_transport(
        &self,
        plain_transport_options: PlainTransportOptions,
    ) -> Result<PlainTransport, RequestError> {
        debug!("create_plain_transport()");

        let PlainTransportOptions {
            listen,
            rtcp_mux,
            comedia,
            enable_sctp,
            num_sctp_streams,
            max_sctp_message_size,
            sctp_send_buffer_size,
            enable_srtp,
            srtp_crypto_suite,
            app_data,
        } = plain_transport_options;
        let (listen_info, rtcp_listen_info) = listen.into_listen_infos();
        let transport_id: TransportId = self.inner.ids.allocate();

        let data = self
            .request_creation(
                transport_id,
                RouterCreatePlainTransportRequest {
                    transport_id,
                    listen_info,
                    rtcp_listen_info,
                    rtcp_mux,
                    comedia,
                    enable_sctp,
                    num_sctp_streams,
                    max_sctp_message_size,
                    sctp_send_buffer_size,
                    is_data_channel: false,
                    enable_srtp,
                    srtp_crypto_suite,
                },
            )
            .await?;

        let base = self.transport_base(
            transport_id,
            TransportType::Plain,
            data.sctp_parameters,
            data.sctp_state,
            false,
            app_data,
        );
        let transport = PlainTransport::new(base, data);
        self.track_transport(transport.base());

        self.emit_new_transport(NewTransport::Plain(&transport));

        Ok(transport)
    }

    /// Create a [`PipeTransport`].
    pub async fn create_pipe_transport(
        &self,
        pipe_transport_options: PipeTransportOptions,
    ) -> Result<PipeTransport, RequestError> {
        debug!("create_pipe_transport()");

        let PipeTransportOptions {
            listen_info,
            enable_sctp,
            num_sctp_streams,
            max_sctp_message_size,
            sctp_send_buffer_size,
            enable_rtx,
            enable_srtp,
            app_data,
        } = pipe_transport_options;
        let transport_id: TransportId = self.inner.ids.allocate();

        let data = self
            .request_creation(
                transport_id,
                RouterCreatePipeTransportRequest {
                    transport_id,
                    listen_info,
                    enable_sctp,
                    num_sctp_streams,
                    max_sctp_message_size,
                    sctp_send_buffer_size,
                    is_data_channel: false,
                    enable_rtx,
                    enable_srtp,
                },
            )
            .await?;

        let base = self.transport_base(
            transport_id,
            TransportType::Pipe,
            data.sctp_parameters,
            data.sctp_state,
            data.rtx,
            app_data,
        );
        let transport = PipeTransport::new(base, data);
        self.track_transport(transport.base());

        self.emit_new_transport(NewTransport::Pipe(&transport));

        Ok(transport)
    }

    /// Pipes [`Producer`] with the given `producer_id` into another [`Router`] on same host.
    ///
    /// The pipe transport pair between both routers is created on first use and reused
    /// afterwards. Closing the resulting pipe consumer closes the pipe producer and vice versa,
    /// pausing the original producer pauses the pipe producer.
    pub async fn pipe_producer_to_router(
        &self,
        producer_id: ProducerId,
        pipe_to_router_options: PipeToRouterOptions,
    ) -> Result<PipeProducerToRouterPair, PipeProducerToRouterError> {
        debug!("pipe_producer_to_router() [producer_id:{}]", producer_id);

        if pipe_to_router_options.router.id() == self.id() {
            return Err(PipeProducerToRouterError::SameRouter);
        }

        let producer = self
            .get_producer(&producer_id)
            .ok_or(PipeProducerToRouterError::ProducerNotFound(producer_id))?;

        let pipe_transport_pair = self
            .get_or_create_pipe_transport_pair(&pipe_to_router_options)
            .await
            .map_err(PipeProducerToRouterError::TransportFailed)?;

        let pipe_consumer = pipe_transport_pair
            .local
            .consume(ConsumerOptions::new(producer_id, RtpCapabilities::default()))
            .await
            .map_err(PipeProducerToRouterError::ConsumeFailed)?;

        let pipe_producer = {
            let mut producer_options = ProducerOptions::new_pipe_transport(
                producer_id,
                pipe_consumer.kind(),
                pipe_consumer.rtp_parameters().clone(),
            );
            producer_options.paused = pipe_consumer.producer_paused();
            producer_options.app_data = producer.app_data();

            match pipe_transport_pair.remote.produce(producer_options).await {
                Ok(pipe_producer) => pipe_producer,
                Err(error) => {
                    pipe_consumer.close();
                    return Err(PipeProducerToRouterError::ProduceFailed(error));
                }
            }
        };

        pipe_consumer
            .on_close({
                let pipe_producer_weak = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer_weak.upgrade() {
                        pipe_producer.close();
                    }
                }
            })
            .detach();
        pipe_consumer
            .on_producer_pause({
                let executor = Arc::clone(&self.inner.executor);
                let pipe_producer_weak = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer_weak.upgrade() {
                        executor
                            .spawn(async move {
                                if let Err(error) = pipe_producer.pause().await {
                                    error!("pipe producer pause failed: {}", error);
                                }
                            })
                            .detach();
                    }
                }
            })
            .detach();
        pipe_consumer
            .on_producer_resume({
                let executor = Arc::clone(&self.inner.executor);
                let pipe_producer_weak = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer_weak.upgrade() {
                        executor
                            .spawn(async move {
                                if let Err(error) = pipe_producer.resume().await {
                                    error!("pipe producer resume failed: {}", error);
                                }
                            })
                            .detach();
                    }
                }
            })
            .detach();
        pipe_producer
            .on_close({
                let pipe_consumer_weak = pipe_consumer.downgrade();

                move || {
                    if let Some(pipe_consumer) = pipe_consumer_weak.upgrade() {
                        pipe_consumer.close();
                    }
                }
            })
            .detach();

        Ok(PipeProducerToRouterPair {
            pipe_consumer,
            pipe_producer,
        })
    }

    /// Pipes [`DataProducer`] with the given `data_producer_id` into another [`Router`] on same
    /// host.
    pub async fn pipe_data_producer_to_router(
        &self,
        data_producer_id: DataProducerId,
        pipe_to_router_options: PipeToRouterOptions,
    ) -> Result<PipeDataProducerToRouterPair, PipeDataProducerToRouterError> {
        debug!(
            "pipe_data_producer_to_router() [data_producer_id:{}]",
            data_producer_id,
        );

        if pipe_to_router_options.router.id() == self.id() {
            return Err(PipeDataProducerToRouterError::SameRouter);
        }

        let data_producer = self.get_data_producer(&data_producer_id).ok_or(
            PipeDataProducerToRouterError::DataProducerNotFound(data_producer_id),
        )?;

        let pipe_transport_pair = self
            .get_or_create_pipe_transport_pair(&pipe_to_router_options)
            .await
            .map_err(PipeDataProducerToRouterError::TransportFailed)?;

        let pipe_data_consumer = pipe_transport_pair
            .local
            .consume_data(DataConsumerOptions::new_sctp(data_producer_id))
            .await
            .map_err(PipeDataProducerToRouterError::ConsumeFailed)?;

        let pipe_data_producer = {
            let mut data_producer_options = DataProducerOptions::new_pipe_transport(
                data_producer_id,
                pipe_data_consumer.sctp_stream_parameters(),
            );
            data_producer_options.label = pipe_data_consumer.label().clone();
            data_producer_options.protocol = pipe_data_consumer.protocol().clone();
            data_producer_options.app_data = data_producer.app_data();

            match pipe_transport_pair
                .remote
                .produce_data(data_producer_options)
                .await
            {
                Ok(pipe_data_producer) => pipe_data_producer,
                Err(error) => {
                    pipe_data_consumer.close();
                    return Err(PipeDataProducerToRouterError::ProduceFailed(error));
                }
            }
        };

        pipe_data_consumer
            .on_close({
                let pipe_data_producer_weak = pipe_data_producer.downgrade();

                move || {
                    if let Some(pipe_data_producer) = pipe_data_producer_weak.upgrade() {
                        pipe_data_producer.close();
                    }
                }
            })
            .detach();
        pipe_data_producer
            .on_close({
                let pipe_data_consumer_weak = pipe_data_consumer.downgrade();

                move || {
                    if let Some(pipe_data_consumer) = pipe_data_consumer_weak.upgrade() {
                        pipe_data_consumer.close();
                    }
                }
            })
            .detach();

        Ok(PipeDataProducerToRouterPair {
            pipe_data_consumer,
            pipe_data_producer,
        })
    }

    /// Check whether the given RTP capabilities are valid to consume the given producer.
    #[must_use]
    pub fn can_consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        match self.get_producer(producer_id) {
            Some(producer) => {
                ortc::can_consume(producer.consumable_rtp_parameters(), rtp_capabilities)
            }
            None => {
                error!("can_consume() | Producer with id \"{}\" not found", producer_id);
                false
            }
        }
    }

    /// Callback is called when a new transport is created.
    pub fn on_new_transport<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(NewTransport<'_>) + Send + Sync + 'static,
    {
        self.inner
            .hub
            .handlers()
            .new_transport
            .add(Arc::new(callback))
    }

    /// Callback is called when the worker this router belongs to is closed for whatever reason.
    /// The router itself is also closed.
    pub fn on_worker_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .worker_close
            .add(Box::new(callback))
    }

    /// Callback is called when the router is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if router is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.hub.handlers().close.add(Box::new(callback));
        if self.closed() {
            self.inner.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this router.
    #[must_use]
    pub fn observer(&self) -> RouterObserver {
        RouterObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Closes the router together with all of its transports.
    pub fn close(&self) {
        self.inner.close(CloseCause::Explicit);
    }

    /// Downgrade `Router` to [`WeakRouter`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakRouter {
        WeakRouter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn worker_closed(&self) {
        self.inner.close(CloseCause::WorkerClosed);
    }

    pub(crate) fn on_private_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.private.handlers().close.add(Box::new(callback));
        if self.closed() {
            self.inner.private.handlers().close.call_simple();
        }
        handler_id
    }

    pub(crate) fn get_producer(&self, producer_id: &ProducerId) -> Option<Producer> {
        self.inner.producers.lock().get(producer_id).cloned()
    }

    pub(crate) fn get_data_producer(
        &self,
        data_producer_id: &DataProducerId,
    ) -> Option<DataProducer> {
        self.inner
            .data_producers
            .lock()
            .get(data_producer_id)
            .cloned()
    }

    async fn request<R>(&self, request: R) -> Result<R::Response, RequestError>
    where
        R: Request,
    {
        self.inner
            .channel
            .request_while_open(&self.inner.closed, self.inner.id, request)
            .await
    }

    /// Sends creation request, releasing the pre-allocated id if it fails.
    async fn request_creation<R>(
        &self,
        transport_id: TransportId,
        request: R,
    ) -> Result<R::Response, RequestError>
    where
        R: Request,
    {
        let result = self.request(request).await;
        if result.is_err() {
            self.inner.ids.release(transport_id);
        }
        result
    }

    fn transport_base(
        &self,
        transport_id: TransportId,
        r#type: TransportType,
        sctp_parameters: Option<SctpParameters>,
        sctp_state: Option<SctpState>,
        consume_with_rtx: bool,
        app_data: AppData,
    ) -> Arc<TransportBase> {
        TransportBase::new(
            transport_id,
            r#type,
            self.inner.id,
            self.downgrade(),
            self.inner.ids.clone(),
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            sctp_parameters,
            sctp_state,
            consume_with_rtx,
            app_data,
        )
    }

    fn track_transport(&self, base: &Arc<TransportBase>) {
        let transport_id = base.id();
        self.inner
            .transports
            .lock()
            .insert(transport_id, Arc::clone(base));

        let inner_weak = Arc::downgrade(&self.inner);

        base.on_private_new_producer({
            let inner_weak = Weak::clone(&inner_weak);

            move |producer| {
                if let Some(inner) = inner_weak.upgrade() {
                    inner.producers.lock().insert(producer.id(), producer.clone());
                }
            }
        })
        .detach();
        base.on_private_producer_close({
            let inner_weak = Weak::clone(&inner_weak);

            move |producer_id| {
                if let Some(inner) = inner_weak.upgrade() {
                    let producer = inner.producers.lock().remove(producer_id);
                    drop(producer);
                }
            }
        })
        .detach();
        base.on_private_new_data_producer({
            let inner_weak = Weak::clone(&inner_weak);

            move |data_producer| {
                if let Some(inner) = inner_weak.upgrade() {
                    inner
                        .data_producers
                        .lock()
                        .insert(data_producer.id(), data_producer.clone());
                }
            }
        })
        .detach();
        base.on_private_data_producer_close({
            let inner_weak = Weak::clone(&inner_weak);

            move |data_producer_id| {
                if let Some(inner) = inner_weak.upgrade() {
                    let data_producer = inner.data_producers.lock().remove(data_producer_id);
                    drop(data_producer);
                }
            }
        })
        .detach();
        base.on_private_close(move || {
            if let Some(inner) = inner_weak.upgrade() {
                let transport = inner.transports.lock().remove(&transport_id);
                drop(transport);
            }
        })
        .detach();
    }

    fn emit_new_transport(&self, new_transport: NewTransport<'_>) {
        self.inner.hub.emit(|handlers| {
            handlers
                .new_transport
                .call(|callback| callback(new_transport_ref(&new_transport)));
        });
        self.inner.observer.emit(|handlers| {
            handlers
                .new_transport
                .call(|callback| callback(new_transport_ref(&new_transport)));
        });
    }

    async fn get_or_create_pipe_transport_pair(
        &self,
        pipe_to_router_options: &PipeToRouterOptions,
    ) -> Result<PipeTransportPair, RequestError> {
        let remote_router = &pipe_to_router_options.router;
        let slot = Arc::clone(
            self.inner
                .mapped_pipe_transports
                .lock()
                .entry(remote_router.id())
                .or_default(),
        );
        let mut slot = slot.lock().await;

        if let Some(pair) = slot.as_ref() {
            if !pair.local.closed() && !pair.remote.closed() {
                return Ok(pair.clone());
            }
        }

        let pipe_transport_options = pipe_to_router_options.pipe_transport_options();
        let (local, remote) = future::zip(
            self.create_pipe_transport(pipe_transport_options.clone()),
            remote_router.create_pipe_transport(pipe_transport_options),
        )
        .await;
        let (local, remote) = match (local, remote) {
            (Ok(local), Ok(remote)) => (local, remote),
            (Ok(transport), Err(error)) | (Err(error), Ok(transport)) => {
                transport.close();
                return Err(error);
            }
            (Err(error), Err(_)) => return Err(error),
        };

        let connected = future::zip(
            connect_pipe_transport(&local, &remote),
            connect_pipe_transport(&remote, &local),
        )
        .await;
        if let (Err(error), _) | (_, Err(error)) = connected {
            local.close();
            remote.close();
            return Err(error);
        }

        local
            .on_close(Box::new({
                let remote_weak = remote.downgrade();
                let inner_weak = Arc::downgrade(&self.inner);
                let remote_router_id = remote_router.id();

                move || {
                    if let Some(remote) = remote_weak.upgrade() {
                        remote.close();
                    }
                    if let Some(inner) = inner_weak.upgrade() {
                        let slot = inner.mapped_pipe_transports.lock().remove(&remote_router_id);
                        drop(slot);
                    }
                }
            }))
            .detach();
        remote
            .on_close(Box::new({
                let local_weak = local.downgrade();

                move || {
                    if let Some(local) = local_weak.upgrade() {
                        local.close();
                    }
                }
            }))
            .detach();

        let pair = PipeTransportPair { local, remote };
        slot.replace(pair.clone());

        Ok(pair)
    }
}

/// Connects `transport` to the local side of `other`.
async fn connect_pipe_transport(
    transport: &PipeTransport,
    other: &PipeTransport,
) -> Result<(), RequestError> {
    let tuple = other.tuple();
    let ip = tuple
        .local_address()
        .parse::<IpAddr>()
        .map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })?;

    let mut remote_parameters = PipeTransportRemoteParameters::new(ip, tuple.local_port());
    remote_parameters.srtp_parameters = other.srtp_parameters();

    transport.connect(remote_parameters).await
}

fn new_transport_ref<'a>(new_transport: &NewTransport<'a>) -> NewTransport<'a> {
    match new_transport {
        NewTransport::Direct(transport) => NewTransport::Direct(transport),
        NewTransport::Pipe(transport) => NewTransport::Pipe(transport),
        NewTransport::Plain(transport) => NewTransport::Plain(transport),
        NewTransport::WebRtc(transport) => NewTransport::WebRtc(transport),
    }
}

/// Observer of a [`Router`].
#[derive(Clone)]
pub struct RouterObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for RouterObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl RouterObserver {
    /// Callback is called when a new transport is created.
    pub fn on_new_transport<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(NewTransport<'_>) + Send + Sync + 'static,
    {
        self.inner
            .observer
            .handlers()
            .new_transport
            .add(Arc::new(callback))
    }

    /// Callback is called when the router is closed for whatever reason.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self
            .inner
            .observer
            .handlers()
            .close
            .add(Box::new(callback));
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.observer.handlers().close.call_simple();
        }
        handler_id
    }
}

/// [`WeakRouter`] doesn't own router instance on mediaplane side and can be upgraded back while
/// the router is alive.
#[derive(Clone)]
pub struct WeakRouter {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRouter").finish()
    }
}

impl WeakRouter {
    /// Attempts to upgrade `WeakRouter` to [`Router`] if last instance of one wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<Router> {
        let inner = self.inner.upgrade()?;

        Some(Router { inner })
    }
}
