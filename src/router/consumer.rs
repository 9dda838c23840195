
use crate::data_structures::{AppData, TraceEventDirection};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    ConsumerDumpRequest, ConsumerEnableTraceEventRequest, ConsumerGetStatsRequest,
    ConsumerPauseRequest, ConsumerRequestKeyFrameRequest, ConsumerResumeRequest,
    ConsumerSetPreferredLayersRequest, ConsumerSetPriorityRequest, Request,
    TransportCloseConsumerRequest,
};
use crate::producer::{Producer, ProducerId, ProducerType};
use crate::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use crate::transport::TransportId;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`Consumer`] identifier.
    ConsumerId
);

/// Spatial/temporal layers of the consumer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    /// The spatial layer index (from 0 to N).
    pub spatial_layer: u8,
    /// The temporal layer index (from 0 to N).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

/// Score of consumer and corresponding producer.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    /// Score of the RTP stream in the consumer (from 0 to 10) representing its transmission
    /// quality.
    pub score: u8,
    /// Score of the currently selected RTP stream in the associated producer (from 0 to 10)
    /// representing its transmission quality.
    pub producer_score: u8,
    /// The scores of all RTP streams in the producer ordered by encoding (just useful when the
    /// producer uses simulcast).
    #[serde(default)]
    pub producer_scores: Vec<u8>,
}

/// [`Consumer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsumerOptions {
    /// The id of the producer to consume.
    pub producer_id: ProducerId,
    /// RTP capabilities of the consuming endpoint.
    pub rtp_capabilities: RtpCapabilities,
    /// Whether the consumer must start in paused mode. Default false.
    ///
    /// When creating a video consumer, it's recommended to set paused to true, then transmit the
    /// consumer parameters to the consuming endpoint and, once the consuming endpoint has created
    /// its local side consumer, unpause the server side consumer using the resume() method.
    pub paused: bool,
    /// The MID for the consumer. If not specified, a sequentially growing number will be assigned.
    pub mid: Option<String>,
    /// Preferred spatial and temporal layer for simulcast or SVC media sources.
    /// If `None`, the highest ones are selected.
    pub preferred_layers: Option<ConsumerLayers>,
    /// Whether this consumer should ignore DTX packets (only valid for Opus codec).
    pub ignore_dtx: bool,
    /// Whether this consumer should consume all RTP streams generated by the producer.
    pub pipe: bool,
    /// Custom application data.
    pub app_data: AppData,
}

impl ConsumerOptions {
    /// Create consumer options with given producer ID and RTP capabilities.
    #[must_use]
    pub fn new(producer_id: ProducerId, rtp_capabilities: RtpCapabilities) -> Self {
        Self {
            producer_id,
            rtp_capabilities,
            paused: false,
            mid: None,
            preferred_layers: None,
            ignore_dtx: false,
            pipe: false,
            app_data: AppData::default(),
        }
    }
}

/// Consumer type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    /// A single RTP stream is sent with no spatial/temporal layers.
    Simple,
    /// Two or more RTP streams are sent, each of them with one or more temporal layers.
    Simulcast,
    /// A single RTP stream is sent with spatial/temporal layers.
    Svc,
    /// Special type for consumers created on a
    /// [`PipeTransport`](crate::pipe_transport::PipeTransport).
    Pipe,
}

impl From<ProducerType> for ConsumerType {
    fn from(producer_type: ProducerType) -> Self {
        match producer_type {
            ProducerType::Simple => ConsumerType::Simple,
            ProducerType::Simulcast => ConsumerType::Simulcast,
            ProducerType::Svc => ConsumerType::Svc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct ConsumerDump {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub producer_paused: bool,
    #[serde(default)]
    pub priority: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTC statistics of the consumer, optionally followed by those of the producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
#[non_exhaustive]
pub struct ConsumerStat {
    pub r#type: String,
    pub timestamp: u64,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub score: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Type of the trace events a consumer can emit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerTraceEventType {
    /// RTP packet.
    Rtp,
    /// RTP video keyframe packet.
    KeyFrame,
    /// RTCP NACK packet.
    Nack,
    /// RTCP PLI packet.
    Pli,
    /// RTCP FIR packet.
    Fir,
}

/// Trace event emitted by a consumer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsumerTraceEventData {
    /// Trace event type.
    pub r#type: ConsumerTraceEventType,
    /// Event timestamp.
    pub timestamp: u64,
    /// Event direction.
    pub direction: TraceEventDirection,
    /// Per type information.
    #[serde(default)]
    pub info: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(ConsumerTraceEventData),
    #[serde(rename_all = "camelCase")]
    Rtp {
        rtp_packet: Vec<u8>,
    },
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    rtp: Bag<Arc<dyn Fn(&[u8]) + Send + Sync>>,
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    score: Bag<Arc<dyn Fn(&ConsumerScore) + Send + Sync>, ConsumerScore>,
    layers_change: Bag<Arc<dyn Fn(&Option<ConsumerLayers>) + Send + Sync>, Option<ConsumerLayers>>,
    trace: Bag<Arc<dyn Fn(&ConsumerTraceEventData) + Send + Sync>, ConsumerTraceEventData>,
    producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct PrivateHandlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct ObserverHandlers {
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    score: Bag<Arc<dyn Fn(&ConsumerScore) + Send + Sync>, ConsumerScore>,
    layers_change: Bag<Arc<dyn Fn(&Option<ConsumerLayers>) + Send + Sync>, Option<ConsumerLayers>>,
    trace: Bag<Arc<dyn Fn(&ConsumerTraceEventData) + Send + Sync>, ConsumerTraceEventData>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    TransportClosed,
    ProducerClosed,
}

struct Inner {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    r#type: ConsumerType,
    rtp_parameters: RtpParameters,
    transport_id: TransportId,
    paused: AtomicBool,
    producer_paused: AtomicBool,
    priority: AtomicU8,
    score: Mutex<ConsumerScore>,
    preferred_layers: Mutex<Option<ConsumerLayers>>,
    current_layers: Mutex<Option<ConsumerLayers>>,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    ids: IdRegistry,
    hub: EventHub<Handlers>,
    private: EventHub<PrivateHandlers>,
    observer: EventHub<ObserverHandlers>,
    app_data: Mutex<AppData>,
    closed: AtomicBool,
    command_lock: async_lock::Mutex<()>,
    subscription_handler: Mutex<Option<SubscriptionHandler>>,
    producer_handlers: Mutex<Vec<HandlerId>>,
}

impl Inner {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}]", self.id);

        let subscription_handler = self.subscription_handler.lock().take();
        drop(subscription_handler);
        let producer_handlers = std::mem::take(&mut *self.producer_handlers.lock());
        drop(producer_handlers);
        self.ids.release(self.id);

        match cause {
            CloseCause::Explicit => {}
            CloseCause::TransportClosed => {
                self.hub
                    .emit(|handlers| handlers.transport_close.call_simple());
            }
            CloseCause::ProducerClosed => {
                self.hub
                    .emit(|handlers| handlers.producer_close.call_simple());
            }
        }
        self.private.tear_down(|handlers| handlers.close.call_simple());
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        // Engine closes the consumer on its own in every other case
        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let transport_id = self.transport_id;
            let request = TransportCloseConsumerRequest {
                consumer_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(transport_id, request).await {
                        error!("consumer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }

    fn set_producer_paused(&self, producer_paused: bool) {
        if self.producer_paused.swap(producer_paused, Ordering::SeqCst) == producer_paused {
            return;
        }

        let paused = self.paused.load(Ordering::SeqCst);

        if producer_paused {
            self.hub
                .emit(|handlers| handlers.producer_pause.call_simple());
            if !paused {
                self.observer.emit(|handlers| handlers.pause.call_simple());
            }
        } else {
            self.hub
                .emit(|handlers| handlers.producer_resume.call_simple());
            if !paused {
                self.observer.emit(|handlers| handlers.resume.call_simple());
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::ProducerClose => {
                self.close(CloseCause::ProducerClosed);
            }
            Notification::ProducerPause => {
                self.set_producer_paused(true);
            }
            Notification::ProducerResume => {
                self.set_producer_paused(false);
            }
            Notification::Score(score) => {
                *self.score.lock() = score.clone();

                self.hub
                    .emit(|handlers| handlers.score.call_simple(&score));
                self.observer
                    .emit(|handlers| handlers.score.call_simple(&score));
            }
            Notification::LayersChange(current_layers) => {
                *self.current_layers.lock() = current_layers;

                self.hub
                    .emit(|handlers| handlers.layers_change.call_simple(&current_layers));
                self.observer
                    .emit(|handlers| handlers.layers_change.call_simple(&current_layers));
            }
            Notification::Trace(trace_event_data) => {
                self.hub
                    .emit(|handlers| handlers.trace.call_simple(&trace_event_data));
                self.observer
                    .emit(|handlers| handlers.trace.call_simple(&trace_event_data));
            }
            Notification::Rtp { rtp_packet } => {
                self.hub.emit(|handlers| {
                    handlers.rtp.call(|callback| callback(rtp_packet.as_slice()));
                });
            }
        }
    }
}

/// A consumer represents an audio or video source being forwarded from a router to an endpoint.
/// It's created on top of a transport that defines how the media packets are carried.
#[derive(Clone)]
#[must_use = "Consumer is only closed explicitly or together with its transport or producer"]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.r#type)
            .field("paused", &self.inner.paused)
            .field("producer_paused", &self.inner.producer_paused)
            .field("priority", &self.inner.priority)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConsumerId,
        producer: &Producer,
        r#type: ConsumerType,
        rtp_parameters: RtpParameters,
        paused: bool,
        producer_paused: bool,
        score: ConsumerScore,
        preferred_layers: Option<ConsumerLayers>,
        transport_id: TransportId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        ids: IdRegistry,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            producer_id: producer.id(),
            kind: producer.kind(),
            r#type,
            rtp_parameters,
            transport_id,
            paused: AtomicBool::new(paused),
            producer_paused: AtomicBool::new(producer_paused),
            priority: AtomicU8::new(1),
            score: Mutex::new(score),
            preferred_layers: Mutex::new(preferred_layers),
            current_layers: Mutex::default(),
            executor,
            channel,
            ids,
            hub: EventHub::default(),
            private: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
            command_lock: async_lock::Mutex::new(()),
            subscription_handler: Mutex::default(),
            producer_handlers: Mutex::default(),
        });

        let subscription_handler = {
            let inner_weak = Arc::downgrade(&inner);

            inner
                .channel
                .subscribe_to_notifications(id.into(), move |notification| {
                    let Some(inner) = inner_weak.upgrade() else {
                        return;
                    };
                    match notification.parse::<Notification>() {
                        Ok(notification) => inner.handle_notification(notification),
                        Err(error) => {
                            error!("Failed to parse notification: {}", error);
                        }
                    }
                })
        };
        inner
            .subscription_handler
            .lock()
            .replace(subscription_handler);

        let producer_handlers = {
            let on_pause = producer.on_private_pause({
                let inner_weak = Arc::downgrade(&inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.set_producer_paused(true);
                    }
                }
            });
            let on_resume = producer.on_private_resume({
                let inner_weak = Arc::downgrade(&inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.set_producer_paused(false);
                    }
                }
            });
            let on_close = producer.on_private_close({
                let inner_weak = Arc::downgrade(&inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.close(CloseCause::ProducerClosed);
                    }
                }
            });

            vec![on_pause, on_resume, on_close]
        };
        if inner.closed.load(Ordering::SeqCst) {
            drop(producer_handlers);
        } else {
            *inner.producer_handlers.lock() = producer_handlers;
        }

        Self { inner }
    }

    /// Consumer id.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    /// Associated producer id.
    #[must_use]
    pub fn producer_id(&self) -> ProducerId {
        self.inner.producer_id
    }

    /// Id of the transport this consumer belongs to.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner.transport_id
    }

    /// Media kind.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Consumer RTP parameters.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Consumer type.
    #[must_use]
    pub fn r#type(&self) -> ConsumerType {
        self.inner.r#type
    }

    /// Whether the consumer is paused. It does not take into account whether the associated
    /// producer is paused.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Whether the associated producer is paused.
    #[must_use]
    pub fn producer_paused(&self) -> bool {
        self.inner.producer_paused.load(Ordering::SeqCst)
    }

    /// Whether media actually flows: neither the consumer nor its producer is paused.
    #[must_use]
    pub fn active(&self) -> bool {
        !self.paused() && !self.producer_paused()
    }

    /// Consumer priority (see [`Consumer::set_priority`] method).
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.inner.priority.load(Ordering::SeqCst)
    }

    /// The score of the RTP stream being sent, representing its transmission quality.
    #[must_use]
    pub fn score(&self) -> ConsumerScore {
        self.inner.score.lock().clone()
    }

    /// Preferred spatial and temporal layers (see [`Consumer::set_preferred_layers`] method).
    /// For simulcast and SVC consumers, `None` otherwise.
    #[must_use]
    pub fn preferred_layers(&self) -> Option<ConsumerLayers> {
        *self.inner.preferred_layers.lock()
    }

    /// Currently active spatial and temporal layers (for simulcast and SVC consumers only).
    /// It's `None` if no layers are being sent to the consuming endpoint at this time (or if the
    /// consumer is consuming from a simulcast or svc producer).
    #[must_use]
    pub fn current_layers(&self) -> Option<ConsumerLayers> {
        *self.inner.current_layers.lock()
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

    /// Whether the consumer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dump Consumer.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<ConsumerDump, RequestError> {
        debug!("dump()");

        let dump = self.request(ConsumerDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns current RTC statistics of the consumer as reported by the engine.
    pub async fn get_stats(&self) -> Result<Vec<ConsumerStat>, RequestError> {
        debug!("get_stats()");

        let stats = self.request(ConsumerGetStatsRequest {}).await?;

        serde_json::from_value(stats).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Pauses the consumer (no RTP is sent to the consuming endpoint).
    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        let _command_guard = self.inner.command_lock.lock().await;

        self.request(ConsumerPauseRequest {}).await?;

        let was_paused = self.inner.paused.swap(true, Ordering::SeqCst);

        if !was_paused {
            self.inner.hub.emit(|handlers| handlers.pause.call_simple());
            if !self.inner.producer_paused.load(Ordering::SeqCst) {
                self.inner
                    .observer
                    .emit(|handlers| handlers.pause.call_simple());
            }
        }

        Ok(())
    }

    /// Resumes the consumer (RTP is sent again to the consuming endpoint).
    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        let _command_guard = self.inner.command_lock.lock().await;

        self.request(ConsumerResumeRequest {}).await?;

        let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);

        if was_paused {
            self.inner.hub.emit(|handlers| handlers.resume.call_simple());
            if !self.inner.producer_paused.load(Ordering::SeqCst) {
                self.inner
                    .observer
                    .emit(|handlers| handlers.resume.call_simple());
            }
        }

        Ok(())
    }

    /// Sets the preferred (highest) spatial and temporal layers to be sent to the consuming
    /// endpoint. Just valid for simulcast and SVC consumers.
    pub async fn set_preferred_layers(
        &self,
        consumer_layers: ConsumerLayers,
    ) -> Result<(), RequestError> {
        debug!("set_preferred_layers()");

        let _command_guard = self.inner.command_lock.lock().await;

        let consumer_layers = self
            .request(ConsumerSetPreferredLayersRequest {
                spatial_layer: consumer_layers.spatial_layer,
                temporal_layer: consumer_layers.temporal_layer,
            })
            .await?;

        *self.inner.preferred_layers.lock() = consumer_layers;

        Ok(())
    }

    /// Sets the priority for this consumer. It affects how the estimated outgoing bitrate in the
    /// transport (obtained via transport-cc or REMB) is distributed among all video consumers, by
    /// prioritizing those with higher priority.
    pub async fn set_priority(&self, priority: u8) -> Result<(), RequestError> {
        debug!("set_priority()");

        let _command_guard = self.inner.command_lock.lock().await;

        let response = self.request(ConsumerSetPriorityRequest { priority }).await?;

        self.inner
            .priority
            .store(response.priority, Ordering::SeqCst);

        Ok(())
    }

    /// Unsets the priority for this consumer (it sets it to its default value `1`).
    pub async fn unset_priority(&self) -> Result<(), RequestError> {
        debug!("unset_priority()");

        self.set_priority(1).await
    }

    /// Request a key frame from associated producer. Just valid for video consumers.
    pub async fn request_key_frame(&self) -> Result<(), RequestError> {
        debug!("request_key_frame()");

        self.request(ConsumerRequestKeyFrameRequest {}).await
    }

    /// Instructs the consumer to emit "trace" events. For monitoring purposes. Use with caution.
    pub async fn enable_trace_event(
        &self,
        types: Vec<ConsumerTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        let _command_guard = self.inner.command_lock.lock().await;

        self.request(ConsumerEnableTraceEventRequest { types }).await
    }

    /// Callback is called when the consumer receives through its router an RTP packet from the
    /// associated producer. Only for consumers created on a direct transport.
    pub fn on_rtp<F: Fn(&[u8]) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.hub.handlers().rtp.add(Arc::new(callback))
    }

    /// Callback is called when the consumer or its associated producer is paused and, as result,
    /// the consumer becomes paused.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.hub.handlers().pause.add(Arc::new(callback))
    }

    /// Callback is called when the consumer is resumed.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.hub.handlers().resume.add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is paused.
    pub fn on_producer_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .producer_pause
            .add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is resumed.
    pub fn on_producer_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .producer_resume
            .add(Arc::new(callback))
    }

    /// Callback is called when the consumer score changes.
    pub fn on_score<F: Fn(&ConsumerScore) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.hub.handlers().score.add(Arc::new(callback))
    }

    /// Callback is called when the spatial/temporal layers being sent to the endpoint change.
    /// Just for simulcast or SVC consumers.
    pub fn on_layers_change<F: Fn(&Option<ConsumerLayers>) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .layers_change
            .add(Arc::new(callback))
    }

    /// See [`Consumer::enable_trace_event`] method.
    pub fn on_trace<F: Fn(&ConsumerTraceEventData) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.hub.handlers().trace.add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is closed for whatever reason. The consumer
    /// itself is also closed.
    pub fn on_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .producer_close
            .add(Box::new(callback))
    }

    /// Callback is called when the transport this consumer belongs to is closed for whatever
    /// reason. The consumer itself is also closed.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .transport_close
            .add(Box::new(callback))
    }

    /// Callback is called when the consumer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if consumer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.hub.handlers().close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this consumer. Its pause/resume events follow the effective state, combining
    /// consumer and producer pauses.
    #[must_use]
    pub fn observer(&self) -> ConsumerObserver {
        ConsumerObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Closes the consumer.
    pub fn close(&self) {
        self.inner.close(CloseCause::Explicit);
    }

    /// Downgrade `Consumer` to [`WeakConsumer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakConsumer {
        WeakConsumer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn transport_closed(&self) {
        self.inner.close(CloseCause::TransportClosed);
    }

    pub(crate) fn on_private_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self
            .inner
            .private
            .handlers()
            .close
            .add(Box::new(callback));
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.private.handlers().close.call_simple();
        }
        handler_id
    }

    async fn request<R: Request>(&self, request: R) -> Result<R::Response, RequestError> {
        self.inner
            .channel
            .request_while_open(&self.inner.closed, self.inner.id, request)
            .await
    }
}

/// Observer of a [`Consumer`].
#[derive(Clone)]
pub struct ConsumerObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConsumerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl ConsumerObserver {
    /// Callback is called when the consumer stops being active, either because it or its
    /// producer got paused.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.observer.handlers().pause.add(Arc::new(callback))
    }

    /// Callback is called when the consumer becomes active again.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.observer.handlers().resume.add(Arc::new(callback))
    }

    /// Callback is called when the consumer score changes.
    pub fn on_score<F: Fn(&ConsumerScore) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.observer.handlers().score.add(Arc::new(callback))
    }

    /// Callback is called when the layers being sent change.
    pub fn on_layers_change<F: Fn(&Option<ConsumerLayers>) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .layers_change
            .add(Arc::new(callback))
    }

    /// Callback is called on every trace event.
    pub fn on_trace<F: Fn(&ConsumerTraceEventData) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.observer.handlers().trace.add(Arc::new(callback))
    }

    /// Callback is called when the consumer is closed for whatever reason.
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

/// [`WeakConsumer`] doesn't keep the consumer alive.
///
/// [`WeakConsumer`] vs [`Consumer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakConsumer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConsumer").finish()
    }
}

impl WeakConsumer {
    /// Attempts to upgrade `WeakConsumer` to [`Consumer`] if it wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<Consumer> {
        let inner = self.inner.upgrade()?;

        Some(Consumer { inner })
    }
}
