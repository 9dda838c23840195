
use crate::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType};
use crate::data_consumer::{DataConsumer, DataConsumerId, DataConsumerOptions, DataConsumerType};
use crate::data_producer::{DataProducer, DataProducerId, DataProducerOptions, DataProducerType};
use crate::data_structures::{AppData, SctpState, TraceEventDirection};
use crate::event_hub::EventHub;
use crate::id_registry::{IdRegistry, IdTakenError};
use crate::messages::{
    Request, RouterCloseTransportRequest, TransportConsumeDataRequest, TransportConsumeRequest,
    TransportDumpRequest, TransportEnableTraceEventRequest, TransportGetStatsRequest,
    TransportProduceDataRequest, TransportProduceRequest, TransportSetMaxIncomingBitrateRequest,
    TransportSetMaxOutgoingBitrateRequest, TransportSetMinOutgoingBitrateRequest,
};
use crate::ortc::{
    self, ConsumerRtpParametersError, RtpParametersError, RtpParametersMappingError,
};
use crate::producer::{Producer, ProducerId, ProducerOptions};
use crate::router::{RouterId, WeakRouter};
use crate::sctp_parameters::SctpParameters;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError, SubscriptionHandler};
use async_executor::Executor;
use async_trait::async_trait;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use hash_hasher::HashedMap;
use log::{debug, error, warn};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

uuid_based_wrapper_type!(
    /// Transport identifier.
    TransportId
);

/// Kind of the transport.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// [`WebRtcTransport`](crate::webrtc_transport::WebRtcTransport)
    #[serde(rename = "webrtc")]
    WebRtc,
    /// [`PlainTransport`](crate::plain_transport::PlainTransport)
    Plain,
    /// [`PipeTransport`](crate::pipe_transport::PipeTransport)
    Pipe,
    /// [`DirectTransport`](crate::direct_transport::DirectTransport)
    Direct,
}

/// Valid types for "trace" event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportTraceEventType {
    /// RTP probation packet.
    Probation,
    /// Transport bandwidth estimation changed.
    Bwe,
}

/// "trace" event data.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransportTraceEventData {
    /// Trace event type.
    pub r#type: TransportTraceEventType,
    /// Event timestamp.
    pub timestamp: u64,
    /// Event direction.
    pub direction: TraceEventDirection,
    /// Per type information.
    #[serde(default)]
    pub info: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct TransportDump {
    pub id: TransportId,
    #[serde(default)]
    pub producer_ids: Vec<ProducerId>,
    #[serde(default)]
    pub consumer_ids: Vec<ConsumerId>,
    #[serde(default)]
    pub data_producer_ids: Vec<DataProducerId>,
    #[serde(default)]
    pub data_consumer_ids: Vec<DataConsumerId>,
    #[serde(default)]
    pub sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub sctp_state: Option<SctpState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTC statistics of the transport, fields specific to the transport kind end up in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub struct TransportStat {
    pub r#type: String,
    pub transport_id: TransportId,
    pub timestamp: u64,
    #[serde(default)]
    pub sctp_state: Option<SctpState>,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub recv_bitrate: u32,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub send_bitrate: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Error that caused [`Transport::produce`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProduceError {
    /// Transport is already closed.
    #[error("Transport is already closed")]
    TransportClosed,
    /// Producer with the same id already exists in the router.
    #[error("Producer id is already in use: {0}")]
    IdTaken(IdTakenError),
    /// Incorrect RTP parameters.
    #[error("Incorrect RTP parameters: {0}")]
    IncorrectRtpParameters(RtpParametersError),
    /// RTP parameters can't be mapped onto router capabilities.
    #[error("RTP mapping error: {0}")]
    FailedRtpParametersMapping(RtpParametersMappingError),
    /// Request to the engine failed.
    #[error("Request to engine failed: {0}")]
    Request(RequestError),
}

/// Error that caused [`Transport::consume`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConsumeError {
    /// Transport is already closed.
    #[error("Transport is already closed")]
    TransportClosed,
    /// Producer with specified id not found in the router.
    #[error("Producer with id \"{0}\" not found")]
    ProducerNotFound(ProducerId),
    /// Endpoint can't receive any codec of the producer.
    #[error("Bad consumer RTP parameters: {0}")]
    BadConsumerRtpParameters(ConsumerRtpParametersError),
    /// Request to the engine failed.
    #[error("Request to engine failed: {0}")]
    Request(RequestError),
}

/// Error that caused [`Transport::produce_data`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProduceDataError {
    /// Transport is already closed.
    #[error("Transport is already closed")]
    TransportClosed,
    /// Data producer with the same id already exists in the router.
    #[error("Data producer id is already in use: {0}")]
    IdTaken(IdTakenError),
    /// SCTP stream parameters are required for this transport.
    #[error("SCTP stream parameters are required for this transport")]
    SctpStreamParametersRequired,
    /// Request to the engine failed.
    #[error("Request to engine failed: {0}")]
    Request(RequestError),
}

/// Error that caused [`Transport::consume_data`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConsumeDataError {
    /// Transport is already closed.
    #[error("Transport is already closed")]
    TransportClosed,
    /// Data producer with specified id not found in the router.
    #[error("Data producer with id \"{0}\" not found")]
    DataProducerNotFound(DataProducerId),
    /// All SCTP streams of the transport are taken, or SCTP is not enabled.
    #[error("No free SCTP stream id available")]
    NoSctpStreamId,
    /// Request to the engine failed.
    #[error("Request to engine failed: {0}")]
    Request(RequestError),
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    new_consumer: Bag<Arc<dyn Fn(&Consumer) + Send + Sync>, Consumer>,
    new_data_producer: Bag<Arc<dyn Fn(&DataProducer) + Send + Sync>, DataProducer>,
    new_data_consumer: Bag<Arc<dyn Fn(&DataConsumer) + Send + Sync>, DataConsumer>,
    sctp_state_change: Bag<Arc<dyn Fn(SctpState) + Send + Sync>>,
    trace: Bag<Arc<dyn Fn(&TransportTraceEventData) + Send + Sync>, TransportTraceEventData>,
    router_close: BagOnce<Box<dyn FnOnce() + Send>>,
    listen_server_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

/// Router keeps its producer lookup in sync through these.
#[derive(Default)]
#[allow(clippy::type_complexity)]
struct PrivateHandlers {
    new_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    producer_close: Bag<Arc<dyn Fn(&ProducerId) + Send + Sync>, ProducerId>,
    new_data_producer: Bag<Arc<dyn Fn(&DataProducer) + Send + Sync>, DataProducer>,
    data_producer_close: Bag<Arc<dyn Fn(&DataProducerId) + Send + Sync>, DataProducerId>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct ObserverHandlers {
    new_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    new_consumer: Bag<Arc<dyn Fn(&Consumer) + Send + Sync>, Consumer>,
    new_data_producer: Bag<Arc<dyn Fn(&DataProducer) + Send + Sync>, DataProducer>,
    new_data_consumer: Bag<Arc<dyn Fn(&DataConsumer) + Send + Sync>, DataConsumer>,
    sctp_state_change: Bag<Arc<dyn Fn(SctpState) + Send + Sync>>,
    trace: Bag<Arc<dyn Fn(&TransportTraceEventData) + Send + Sync>, TransportTraceEventData>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    RouterClosed,
    ListenServerClosed,
}

/// Pool of SCTP stream ids handed to data consumers.
struct SctpStreamIds {
    used: Vec<bool>,
    next: usize,
}

impl SctpStreamIds {
    fn new(size: u16) -> Self {
        Self {
            used: vec![false; usize::from(size)],
            next: 0,
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let size = self.used.len();

        for offset in 0..size {
            let index = (self.next + offset) % size;
            if !self.used[index] {
                self.used[index] = true;
                self.next = (index + 1) % size;

                return u16::try_from(index).ok();
            }
        }

        None
    }

    fn release(&mut self, stream_id: u16) {
        if let Some(used) = self.used.get_mut(usize::from(stream_id)) {
            *used = false;
        }
    }
}

/// State and behavior shared by every transport kind.
#[doc(hidden)]
pub struct TransportBase {
    id: TransportId,
    r#type: TransportType,
    router_id: RouterId,
    router: WeakRouter,
    ids: IdRegistry,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    producers: Mutex<HashedMap<ProducerId, Producer>>,
    consumers: Mutex<HashedMap<ConsumerId, Consumer>>,
    data_producers: Mutex<HashedMap<DataProducerId, DataProducer>>,
    data_consumers: Mutex<HashedMap<DataConsumerId, DataConsumer>>,
    sctp_stream_ids: Mutex<SctpStreamIds>,
    next_mid_for_consumers: AtomicUsize,
    cname_for_producers: Mutex<Option<String>>,
    sctp_parameters: Option<SctpParameters>,
    sctp_state: Mutex<Option<SctpState>>,
    consume_with_rtx: bool,
    hub: EventHub<Handlers>,
    private: EventHub<PrivateHandlers>,
    observer: EventHub<ObserverHandlers>,
    app_data: Mutex<AppData>,
    closed: AtomicBool,
    command_lock: async_lock::Mutex<()>,
    subscription_handler: Mutex<Option<SubscriptionHandler>>,
}

impl fmt::Debug for TransportBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBase")
            .field("id", &self.id)
            .field("type", &self.r#type)
            .field("router_id", &self.router_id)
            .field("sctp_parameters", &self.sctp_parameters)
            .field("sctp_state", &self.sctp_state)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TransportBase {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TransportId,
        r#type: TransportType,
        router_id: RouterId,
        router: WeakRouter,
        ids: IdRegistry,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        sctp_parameters: Option<SctpParameters>,
        sctp_state: Option<SctpState>,
        consume_with_rtx: bool,
        app_data: AppData,
    ) -> Arc<Self> {
        debug!("new() [id:{}, type:{:?}]", id, r#type);

        let sctp_stream_ids =
            SctpStreamIds::new(sctp_parameters.map_or(0, |parameters| parameters.mis));

        Arc::new(Self {
            id,
            r#type,
            router_id,
            router,
            ids,
            executor,
            channel,
            producers: Mutex::default(),
            consumers: Mutex::default(),
            data_producers: Mutex::default(),
            data_consumers: Mutex::default(),
            sctp_stream_ids: Mutex::new(sctp_stream_ids),
            next_mid_for_consumers: AtomicUsize::new(0),
            cname_for_producers: Mutex::default(),
            sctp_parameters,
            sctp_state: Mutex::new(sctp_state),
            consume_with_rtx,
            hub: EventHub::default(),
            private: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
            command_lock: async_lock::Mutex::new(()),
            subscription_handler: Mutex::default(),
        })
    }

    pub(crate) fn id(&self) -> TransportId {
        self.id
    }

    pub(crate) fn router_id(&self) -> RouterId {
        self.router_id
    }

    pub(crate) fn r#type(&self) -> TransportType {
        self.r#type
    }

    pub(crate) fn executor(&self) -> &Arc<Executor<'static>> {
        &self.executor
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn command_lock(&self) -> &async_lock::Mutex<()> {
        &self.command_lock
    }

    pub(crate) fn set_subscription_handler(&self, subscription_handler: SubscriptionHandler) {
        if self.closed() {
            return;
        }
        self.subscription_handler
            .lock()
            .replace(subscription_handler);
    }

    pub(crate) async fn request<R: Request>(
        &self,
        request: R,
    ) -> Result<R::Response, RequestError> {
        self.channel
            .request_while_open(&self.closed, self.id, request)
            .await
    }

    /// Engine reported a new SCTP association state.
    pub(crate) fn sctp_state_changed(&self, sctp_state: SctpState) {
        self.sctp_state.lock().replace(sctp_state);

        self.hub.emit(|handlers| {
            handlers
                .sctp_state_change
                .call(|callback| callback(sctp_state));
        });
        self.observer.emit(|handlers| {
            handlers
                .sctp_state_change
                .call(|callback| callback(sctp_state));
        });
    }

    pub(crate) fn traced(&self, trace_event_data: &TransportTraceEventData) {
        self.hub
            .emit(|handlers| handlers.trace.call_simple(trace_event_data));
        self.observer
            .emit(|handlers| handlers.trace.call_simple(trace_event_data));
    }

    pub(crate) fn close(&self) {
        self.close_with(CloseCause::Explicit);
    }

    /// Router closed, the engine already released everything on its side.
    pub(crate) fn router_closed(&self) {
        self.close_with(CloseCause::RouterClosed);
    }

    /// WebRTC server this transport listens through was closed.
    pub(crate) fn listen_server_closed(&self) {
        self.close_with(CloseCause::ListenServerClosed);
    }

    fn close_with(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}, cause:{:?}]", self.id, cause);

        let subscription_handler = self.subscription_handler.lock().take();
        drop(subscription_handler);
        self.ids.release(self.id);

        {
            let mut sctp_state = self.sctp_state.lock();
            if sctp_state.is_some() {
                sctp_state.replace(SctpState::Closed);
            }
        }

        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers.into_values() {
            consumer.transport_closed();
        }
        let data_consumers = std::mem::take(&mut *self.data_consumers.lock());
        for data_consumer in data_consumers.into_values() {
            data_consumer.transport_closed();
        }
        let producers = std::mem::take(&mut *self.producers.lock());
        for producer in producers.into_values() {
            producer.transport_closed();
        }
        let data_producers = std::mem::take(&mut *self.data_producers.lock());
        for data_producer in data_producers.into_values() {
            data_producer.transport_closed();
        }

        match cause {
            CloseCause::Explicit => {}
            CloseCause::RouterClosed => {
                self.hub
                    .emit(|handlers| handlers.router_close.call_simple());
            }
            CloseCause::ListenServerClosed => {
                self.hub
                    .emit(|handlers| handlers.listen_server_close.call_simple());
            }
        }
        self.private.tear_down(|handlers| handlers.close.call_simple());
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let router_id = self.router_id;
            let request = RouterCloseTransportRequest {
                transport_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(router_id, request).await {
                        error!("transport closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }

    async fn produce(self: &Arc<Self>, options: ProducerOptions) -> Result<Producer, ProduceError> {
        debug!("produce()");

        if self.closed() {
            return Err(ProduceError::TransportClosed);
        }

        let ProducerOptions {
            id,
            kind,
            mut rtp_parameters,
            paused,
            key_frame_request_delay,
            app_data,
        } = options;

        let router = self.router.upgrade().ok_or(ProduceError::TransportClosed)?;

        ortc::validate_rtp_parameters(kind, &rtp_parameters)
            .map_err(ProduceError::IncorrectRtpParameters)?;

        let rtp_mapping =
            ortc::get_producer_rtp_parameters_mapping(&rtp_parameters, router.rtp_capabilities())
                .map_err(ProduceError::FailedRtpParametersMapping)?;

        {
            let mut cname_for_producers = self.cname_for_producers.lock();
            match (&rtp_parameters.rtcp.cname, cname_for_producers.as_ref()) {
                (Some(cname), None) => {
                    cname_for_producers.replace(cname.clone());
                }
                (None, Some(cname)) => {
                    rtp_parameters.rtcp.cname = Some(cname.clone());
                }
                (None, None) => {
                    let cname = SmallRng::from_entropy()
                        .sample_iter(&Alphanumeric)
                        .take(8)
                        .map(char::from)
                        .collect::<String>();
                    rtp_parameters.rtcp.cname = Some(cname.clone());
                    cname_for_producers.replace(cname);
                }
                (Some(_), Some(_)) => {}
            }
        }

        let consumable_rtp_parameters = ortc::get_consumable_rtp_parameters(
            kind,
            &rtp_parameters,
            router.rtp_capabilities(),
            &rtp_mapping,
        );
        let r#type = ortc::producer_type(&rtp_parameters);

        let producer_id = match id {
            Some(producer_id) => {
                self.ids
                    .register(producer_id)
                    .map_err(ProduceError::IdTaken)?;
                producer_id
            }
            None => self.ids.allocate(),
        };

        let response = self
            .request(TransportProduceRequest {
                producer_id,
                kind,
                rtp_parameters: rtp_parameters.clone(),
                rtp_mapping,
                key_frame_request_delay,
                paused,
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                self.ids.release(producer_id);
                return Err(ProduceError::Request(error));
            }
        };

        if let Some(engine_type) = response.r#type {
            if engine_type != r#type {
                warn!(
                    "producer type mismatch [local:{:?}, engine:{:?}]",
                    r#type, engine_type,
                );
            }
        }

        let producer = Producer::new(
            producer_id,
            kind,
            r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            key_frame_request_delay,
            paused,
            self.id,
            Arc::clone(&self.executor),
            self.channel.clone(),
            self.ids.clone(),
            app_data,
            self.r#type == TransportType::Direct,
        );

        producer
            .on_private_close({
                let base_weak = Arc::downgrade(self);

                move || {
                    if let Some(base) = base_weak.upgrade() {
                        let producer = base.producers.lock().remove(&producer_id);
                        drop(producer);
                        base.private.emit(|handlers| {
                            handlers.producer_close.call_simple(&producer_id);
                        });
                    }
                }
            })
            .detach();

        if !self.insert_child(&self.producers, producer_id, &producer) {
            producer.transport_closed();
            return Err(ProduceError::TransportClosed);
        }

        self.private
            .emit(|handlers| handlers.new_producer.call_simple(&producer));
        self.hub
            .emit(|handlers| handlers.new_producer.call_simple(&producer));
        self.observer
            .emit(|handlers| handlers.new_producer.call_simple(&producer));

        Ok(producer)
    }

    async fn consume(self: &Arc<Self>, options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        debug!("consume()");

        if self.closed() {
            return Err(ConsumeError::TransportClosed);
        }

        let ConsumerOptions {
            producer_id,
            rtp_capabilities,
            paused,
            mid,
            preferred_layers,
            ignore_dtx,
            pipe,
            app_data,
        } = options;

        let router = self.router.upgrade().ok_or(ConsumeError::TransportClosed)?;
        let producer = router
            .get_producer(&producer_id)
            .ok_or(ConsumeError::ProducerNotFound(producer_id))?;

        let (rtp_parameters, r#type) = if self.r#type == TransportType::Pipe {
            let rtp_parameters = ortc::get_pipe_consumer_rtp_parameters(
                producer.consumable_rtp_parameters(),
                self.consume_with_rtx,
            );

            (rtp_parameters, ConsumerType::Pipe)
        } else {
            let mut rtp_parameters = if pipe {
                ortc::get_pipe_consumer_rtp_parameters(producer.consumable_rtp_parameters(), true)
            } else {
                ortc::get_consumer_rtp_parameters(
                    producer.consumable_rtp_parameters(),
                    &rtp_capabilities,
                )
                .map_err(ConsumeError::BadConsumerRtpParameters)?
            };

            if pipe {
                (rtp_parameters, ConsumerType::Pipe)
            } else {
                rtp_parameters.mid = Some(mid.unwrap_or_else(|| {
                    let next_mid = self
                        .next_mid_for_consumers
                        .fetch_add(1, Ordering::SeqCst)
                        % 100_000_000;
                    next_mid.to_string()
                }));

                (rtp_parameters, ConsumerType::from(producer.r#type()))
            }
        };

        let consumer_id: ConsumerId = self.ids.allocate();

        let response = self
            .request(TransportConsumeRequest {
                consumer_id,
                producer_id,
                kind: producer.kind(),
                rtp_parameters: rtp_parameters.clone(),
                r#type,
                consumable_rtp_encodings: producer.consumable_rtp_parameters().encodings.clone(),
                paused,
                preferred_layers,
                ignore_dtx,
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                self.ids.release(consumer_id);
                return Err(ConsumeError::Request(error));
            }
        };

        let consumer = Consumer::new(
            consumer_id,
            &producer,
            r#type,
            rtp_parameters,
            response.paused,
            response.producer_paused,
            response.score,
            response.preferred_layers,
            self.id,
            Arc::clone(&self.executor),
            self.channel.clone(),
            self.ids.clone(),
            app_data,
        );

        consumer
            .on_private_close({
                let base_weak = Arc::downgrade(self);

                move || {
                    if let Some(base) = base_weak.upgrade() {
                        let consumer = base.consumers.lock().remove(&consumer_id);
                        drop(consumer);
                    }
                }
            })
            .detach();

        if !self.insert_child(&self.consumers, consumer_id, &consumer) {
            consumer.transport_closed();
            return Err(ConsumeError::TransportClosed);
        }

        self.hub
            .emit(|handlers| handlers.new_consumer.call_simple(&consumer));
        self.observer
            .emit(|handlers| handlers.new_consumer.call_simple(&consumer));

        Ok(consumer)
    }

    async fn produce_data(
        self: &Arc<Self>,
        options: DataProducerOptions,
    ) -> Result<DataProducer, ProduceDataError> {
        debug!("produce_data()");

        if self.closed() {
            return Err(ProduceDataError::TransportClosed);
        }

        let DataProducerOptions {
            id,
            sctp_stream_parameters,
            label,
            protocol,
            app_data,
        } = options;

        let (r#type, sctp_stream_parameters) = if self.r#type == TransportType::Direct {
            if sctp_stream_parameters.is_some() {
                warn!(
                    "sctp_stream_parameters are ignored when producing data on a DirectTransport",
                );
            }

            (DataProducerType::Direct, None)
        } else {
            let sctp_stream_parameters =
                sctp_stream_parameters.ok_or(ProduceDataError::SctpStreamParametersRequired)?;

            (DataProducerType::Sctp, Some(sctp_stream_parameters))
        };

        let data_producer_id = match id {
            Some(data_producer_id) => {
                self.ids
                    .register(data_producer_id)
                    .map_err(ProduceDataError::IdTaken)?;
                data_producer_id
            }
            None => self.ids.allocate(),
        };

        let result = self
            .request(TransportProduceDataRequest {
                data_producer_id,
                r#type,
                sctp_stream_parameters,
                label: label.clone(),
                protocol: protocol.clone(),
            })
            .await;

        if let Err(error) = result {
            self.ids.release(data_producer_id);
            return Err(ProduceDataError::Request(error));
        }

        let data_producer = DataProducer::new(
            data_producer_id,
            r#type,
            sctp_stream_parameters,
            label,
            protocol,
            self.id,
            Arc::clone(&self.executor),
            self.channel.clone(),
            self.ids.clone(),
            app_data,
        );

        data_producer
            .on_private_close({
                let base_weak = Arc::downgrade(self);

                move || {
                    if let Some(base) = base_weak.upgrade() {
                        let data_producer = base.data_producers.lock().remove(&data_producer_id);
                        drop(data_producer);
                        base.private.emit(|handlers| {
                            handlers.data_producer_close.call_simple(&data_producer_id);
                        });
                    }
                }
            })
            .detach();

        if !self.insert_child(&self.data_producers, data_producer_id, &data_producer) {
            data_producer.transport_closed();
            return Err(ProduceDataError::TransportClosed);
        }

        self.private
            .emit(|handlers| handlers.new_data_producer.call_simple(&data_producer));
        self.hub
            .emit(|handlers| handlers.new_data_producer.call_simple(&data_producer));
        self.observer
            .emit(|handlers| handlers.new_data_producer.call_simple(&data_producer));

        Ok(data_producer)
    }

    async fn consume_data(
        self: &Arc<Self>,
        options: DataConsumerOptions,
    ) -> Result<DataConsumer, ConsumeDataError> {
        debug!("consume_data()");

        if self.closed() {
            return Err(ConsumeDataError::TransportClosed);
        }

        let data_producer_id = options.data_producer_id();
        let router = self
            .router
            .upgrade()
            .ok_or(ConsumeDataError::TransportClosed)?;
        let data_producer = router
            .get_data_producer(&data_producer_id)
            .ok_or(ConsumeDataError::DataProducerNotFound(data_producer_id))?;

        let (r#type, sctp_stream_parameters) = if self.r#type == TransportType::Direct {
            (DataConsumerType::Direct, None)
        } else {
            let stream_id = self
                .sctp_stream_ids
                .lock()
                .allocate()
                .ok_or(ConsumeDataError::NoSctpStreamId)?;

            (
                DataConsumerType::Sctp,
                Some(options.sctp_stream_parameters(
                    stream_id,
                    data_producer.sctp_stream_parameters(),
                )),
            )
        };

        let data_consumer_id: DataConsumerId = self.ids.allocate();

        let result = self
            .request(TransportConsumeDataRequest {
                data_consumer_id,
                data_producer_id,
                r#type,
                sctp_stream_parameters,
                label: data_producer.label().clone(),
                protocol: data_producer.protocol().clone(),
            })
            .await;

        if let Err(error) = result {
            self.ids.release(data_consumer_id);
            if let Some(sctp_stream_parameters) = sctp_stream_parameters {
                self.sctp_stream_ids
                    .lock()
                    .release(sctp_stream_parameters.stream_id());
            }
            return Err(ConsumeDataError::Request(error));
        }

        let data_consumer = DataConsumer::new(
            data_consumer_id,
            &data_producer,
            r#type,
            sctp_stream_parameters,
            self.id,
            Arc::clone(&self.executor),
            self.channel.clone(),
            self.ids.clone(),
            options.app_data,
        );

        data_consumer
            .on_private_close({
                let base_weak = Arc::downgrade(self);

                move || {
                    if let Some(base) = base_weak.upgrade() {
                        let data_consumer = base.data_consumers.lock().remove(&data_consumer_id);
                        drop(data_consumer);
                        if let Some(sctp_stream_parameters) = sctp_stream_parameters {
                            base.sctp_stream_ids
                                .lock()
                                .release(sctp_stream_parameters.stream_id());
                        }
                    }
                }
            })
            .detach();

        if !self.insert_child(&self.data_consumers, data_consumer_id, &data_consumer) {
            data_consumer.transport_closed();
            return Err(ConsumeDataError::TransportClosed);
        }

        self.hub
            .emit(|handlers| handlers.new_data_consumer.call_simple(&data_consumer));
        self.observer
            .emit(|handlers| handlers.new_data_consumer.call_simple(&data_consumer));

        Ok(data_consumer)
    }

    /// Adds a freshly created child unless the transport closed while it was being created.
    /// `close_with` flips `closed` before taking the child maps under the same locks.
    fn insert_child<K, V>(&self, children: &Mutex<HashedMap<K, V>>, id: K, child: &V) -> bool
    where
        K: Eq + Hash,
        V: Clone,
    {
        let mut children = children.lock();
        if self.closed() {
            return false;
        }
        children.insert(id, child.clone());
        true
    }

    async fn set_bitrate<R>(&self, request: R) -> Result<(), RequestError>
    where
        R: Request<Response = ()> + Send,
    {
        if self.r#type == TransportType::Direct {
            return Err(RequestError::Unsupported(
                "bitrate limits are not available on direct transports",
            ));
        }

        let _command_guard = self.command_lock.lock().await;

        self.request(request).await
    }

    pub(crate) fn on_private_new_producer<F: Fn(&Producer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.private
            .handlers()
            .new_producer
            .add(Arc::new(callback))
    }

    pub(crate) fn on_private_producer_close<F: Fn(&ProducerId) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.private
            .handlers()
            .producer_close
            .add(Arc::new(callback))
    }

    pub(crate) fn on_private_new_data_producer<F: Fn(&DataProducer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.private
            .handlers()
            .new_data_producer
            .add(Arc::new(callback))
    }

    pub(crate) fn on_private_data_producer_close<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&DataProducerId) + Send + Sync + 'static,
    {
        self.private
            .handlers()
            .data_producer_close
            .add(Arc::new(callback))
    }

    /// Fires on every kind of close: explicit, router and WebRTC server cascades.
    pub(crate) fn on_private_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.private.handlers().close.add(Box::new(callback));
        if self.closed() {
            self.private.handlers().close.call_simple();
        }
        handler_id
    }

    pub(crate) fn on_listen_server_close<F: FnOnce() + Send + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.hub
            .handlers()
            .listen_server_close
            .add(Box::new(callback))
    }

    pub(crate) fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.hub
            .handlers()
            .sctp_state_change
            .add(Arc::new(callback))
    }
}

/// Access to the state shared by all transport kinds.
#[doc(hidden)]
pub trait TransportBaseAccess {
    /// Shared transport state.
    fn base(&self) -> &Arc<TransportBase>;
}

/// A transport connects an endpoint with a router and enables transmission of media in both
/// directions by means of [`Producer`], [`Consumer`], [`DataProducer`] and [`DataConsumer`]
/// instances created on it.
#[async_trait]
pub trait Transport: TransportBaseAccess + fmt::Debug + Send + Sync {
    /// Transport id.
    fn id(&self) -> TransportId {
        self.base().id
    }

    /// Router id.
    fn router_id(&self) -> RouterId {
        self.base().router_id
    }

    /// Kind of the transport.
    fn transport_type(&self) -> TransportType {
        self.base().r#type
    }

    /// Custom application data.
    fn app_data(&self) -> AppData {
        self.base().app_data.lock().clone()
    }

    /// Replace custom application data.
    fn set_app_data(&self, app_data: AppData) {
        *self.base().app_data.lock() = app_data;
    }

    /// Whether the transport is closed.
    fn closed(&self) -> bool {
        self.base().closed()
    }

    /// Local SCTP parameters, `None` if SCTP is not enabled.
    fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.base().sctp_parameters
    }

    /// Current SCTP state, `None` if SCTP is not enabled.
    fn sctp_state(&self) -> Option<SctpState> {
        *self.base().sctp_state.lock()
    }

    /// Live producers of this transport.
    fn producers(&self) -> Vec<Producer> {
        self.base().producers.lock().values().cloned().collect()
    }

    /// Live consumers of this transport.
    fn consumers(&self) -> Vec<Consumer> {
        self.base().consumers.lock().values().cloned().collect()
    }

    /// Live data producers of this transport.
    fn data_producers(&self) -> Vec<DataProducer> {
        self.base().data_producers.lock().values().cloned().collect()
    }

    /// Live data consumers of this transport.
    fn data_consumers(&self) -> Vec<DataConsumer> {
        self.base().data_consumers.lock().values().cloned().collect()
    }

    /// Instructs the router to receive audio or video RTP (or SRTP depending on the transport).
    /// This is the way to inject media into the router.
    async fn produce(&self, producer_options: ProducerOptions) -> Result<Producer, ProduceError> {
        self.base().produce(producer_options).await
    }

    /// Instructs the router to send audio or video RTP (or SRTP depending on the transport).
    /// This is the way to extract media from the router.
    ///
    /// # Notes on usage
    /// When creating a consumer it's recommended to set [`ConsumerOptions::paused`] to `true`,
    /// then transmit the consumer parameters to the consuming endpoint and, once the consuming
    /// endpoint has created its local side consumer, unpause the server side consumer using
    /// [`Consumer::resume`].
    async fn consume(&self, consumer_options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        self.base().consume(consumer_options).await
    }

    /// Instructs the router to receive data messages. Those messages can be delivered by an
    /// endpoint via SCTP protocol (AKA DataChannel in WebRTC) or can be directly sent from the
    /// application if the transport is a direct transport.
    async fn produce_data(
        &self,
        data_producer_options: DataProducerOptions,
    ) -> Result<DataProducer, ProduceDataError> {
        self.base().produce_data(data_producer_options).await
    }

    /// Instructs the router to send data messages to the endpoint via SCTP protocol (AKA
    /// DataChannel in WebRTC) or directly to the application if the transport is a direct
    /// transport.
    async fn consume_data(
        &self,
        data_consumer_options: DataConsumerOptions,
    ) -> Result<DataConsumer, ConsumeDataError> {
        self.base().consume_data(data_consumer_options).await
    }

    /// Set maximum incoming bitrate for media streams sent by the remote endpoint over this
    /// transport.
    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), RequestError> {
        debug!("set_max_incoming_bitrate() [bitrate:{}]", bitrate);

        self.base()
            .set_bitrate(TransportSetMaxIncomingBitrateRequest { bitrate })
            .await
    }

    /// Set maximum outgoing bitrate for media streams sent by the router over this transport.
    async fn set_max_outgoing_bitrate(&self, bitrate: u32) -> Result<(), RequestError> {
        debug!("set_max_outgoing_bitrate() [bitrate:{}]", bitrate);

        self.base()
            .set_bitrate(TransportSetMaxOutgoingBitrateRequest { bitrate })
            .await
    }

    /// Set minimum outgoing bitrate for media streams sent by the router over this transport.
    async fn set_min_outgoing_bitrate(&self, bitrate: u32) -> Result<(), RequestError> {
        debug!("set_min_outgoing_bitrate() [bitrate:{}]", bitrate);

        self.base()
            .set_bitrate(TransportSetMinOutgoingBitrateRequest { bitrate })
            .await
    }

    /// Instructs the transport to emit "trace" events. For monitoring purposes. Use with caution.
    async fn enable_trace_event(
        &self,
        types: Vec<TransportTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        let base = self.base();
        let _command_guard = base.command_lock.lock().await;

        base.request(TransportEnableTraceEventRequest { types })
            .await
    }

    /// Dump Transport.
    #[doc(hidden)]
    async fn dump(&self) -> Result<TransportDump, RequestError> {
        debug!("dump()");

        let dump = self.base().request(TransportDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns current RTC statistics of the transport.
    async fn get_stats(&self) -> Result<Vec<TransportStat>, RequestError> {
        debug!("get_stats()");

        let stats = self.base().request(TransportGetStatsRequest {}).await?;

        serde_json::from_value(stats).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Closes the transport together with every producer, consumer, data producer and data
    /// consumer created on it.
    fn close(&self) {
        self.base().close();
    }

    /// Callback is called when a new producer is created.
    fn on_new_producer(&self, callback: Arc<dyn Fn(&Producer) + Send + Sync>) -> HandlerId {
        self.base().hub.handlers().new_producer.add(callback)
    }

    /// Callback is called when a new consumer is created.
    fn on_new_consumer(&self, callback: Arc<dyn Fn(&Consumer) + Send + Sync>) -> HandlerId {
        self.base().hub.handlers().new_consumer.add(callback)
    }

    /// Callback is called when a new data producer is created.
    fn on_new_data_producer(
        &self,
        callback: Arc<dyn Fn(&DataProducer) + Send + Sync>,
    ) -> HandlerId {
        self.base().hub.handlers().new_data_producer.add(callback)
    }

    /// Callback is called when a new data consumer is created.
    fn on_new_data_consumer(
        &self,
        callback: Arc<dyn Fn(&DataConsumer) + Send + Sync>,
    ) -> HandlerId {
        self.base().hub.handlers().new_data_consumer.add(callback)
    }

    /// See [`Transport::enable_trace_event`] method.
    fn on_trace(
        &self,
        callback: Arc<dyn Fn(&TransportTraceEventData) + Send + Sync>,
    ) -> HandlerId {
        self.base().hub.handlers().trace.add(callback)
    }

    /// Callback is called when the router this transport belongs to is closed for whatever
    /// reason. The transport itself is also closed.
    fn on_router_close(&self, callback: Box<dyn FnOnce() + Send + 'static>) -> HandlerId {
        self.base().hub.handlers().router_close.add(callback)
    }

    /// Callback is called when the transport is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if transport is already closed.
    fn on_close(&self, callback: Box<dyn FnOnce() + Send + 'static>) -> HandlerId {
        let base = self.base();
        let handler_id = base.hub.handlers().close.add(callback);
        if base.closed() {
            base.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this transport.
    fn observer(&self) -> TransportObserver {
        TransportObserver {
            base: Arc::clone(self.base()),
        }
    }
}

/// Observer of any kind of transport, notified of the same events as regular listeners but
/// independently from them.
#[derive(Clone)]
pub struct TransportObserver {
    base: Arc<TransportBase>,
}

impl fmt::Debug for TransportObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportObserver")
            .field("id", &self.base.id)
            .finish()
    }
}

impl TransportObserver {
    /// Callback is called when a new producer is created.
    pub fn on_new_producer<F: Fn(&Producer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base
            .observer
            .handlers()
            .new_producer
            .add(Arc::new(callback))
    }

    /// Callback is called when a new consumer is created.
    pub fn on_new_consumer<F: Fn(&Consumer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base
            .observer
            .handlers()
            .new_consumer
            .add(Arc::new(callback))
    }

    /// Callback is called when a new data producer is created.
    pub fn on_new_data_producer<F: Fn(&DataProducer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base
            .observer
            .handlers()
            .new_data_producer
            .add(Arc::new(callback))
    }

    /// Callback is called when a new data consumer is created.
    pub fn on_new_data_consumer<F: Fn(&DataConsumer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base
            .observer
            .handlers()
            .new_data_consumer
            .add(Arc::new(callback))
    }

    /// Callback is called when the SCTP state changes.
    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base
            .observer
            .handlers()
            .sctp_state_change
            .add(Arc::new(callback))
    }

    /// Callback is called on every trace event.
    pub fn on_trace<F: Fn(&TransportTraceEventData) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.base.observer.handlers().trace.add(Arc::new(callback))
    }

    /// Callback is called when the transport is closed for whatever reason.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self
            .base
            .observer
            .handlers()
            .close
            .add(Box::new(callback));
        if self.base.closed() {
            self.base.observer.handlers().close.call_simple();
        }
        handler_id
    }
}

/// Weak handle to the shared state of a transport.
pub(crate) type WeakTransportBase = Weak<TransportBase>;
