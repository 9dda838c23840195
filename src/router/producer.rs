#[cfg(test)]
mod tests;

use crate::data_structures::{AppData, TraceEventDirection};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    ProducerDumpRequest, ProducerEnableTraceEventRequest, ProducerGetStatsRequest,
    ProducerPauseRequest, ProducerResumeRequest, ProducerSendNotification,
    TransportCloseProducerRequest,
};
use crate::rtp_parameters::{MediaKind, RtpParameters};
use crate::transport::TransportId;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, NotificationError, RequestError, SubscriptionHandler};
use async_executor::Executor;
use bytes::Bytes;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// Producer identifier.
    ProducerId
);

/// [`Producer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProducerOptions {
    /// Producer id, only specified explicitly when piping producers between routers.
    pub(crate) id: Option<ProducerId>,
    /// Media kind.
    pub kind: MediaKind,
    /// RTP parameters defining what the endpoint is sending.
    pub rtp_parameters: RtpParameters,
    /// Whether the producer must start in paused mode. Default false.
    pub paused: bool,
    /// Just for video. Time (in ms) before asking the sender for a new key frame after having
    /// asked a previous one. Default 0.
    pub key_frame_request_delay: u32,
    /// Custom application data.
    pub app_data: AppData,
}

impl ProducerOptions {
    /// Create producer options that will be used with a non-pipe transport.
    #[must_use]
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: AppData::default(),
        }
    }

    /// Create producer options with an explicit id, used on the receiving side of a pipe
    /// transport so that the producer keeps the id it has in the source router.
    #[must_use]
    pub fn new_pipe_transport(
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Self {
        Self {
            id: Some(producer_id),
            ..Self::new(kind, rtp_parameters)
        }
    }
}

/// Producer type, derived from its encodings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    /// A single RTP stream is received with no spatial/temporal layers.
    Simple,
    /// Two or more RTP streams are received, each of them with one or more temporal layers.
    Simulcast,
    /// A single RTP stream is received with spatial/temporal layers.
    Svc,
}

/// Score of an RTP stream the producer receives.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    /// Index of the RTP stream in the `rtp_parameters.encodings` array of the producer.
    pub encoding_idx: u32,
    /// RTP stream SSRC.
    pub ssrc: u32,
    /// RTP stream RID value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// RTP stream score (from 0 to 10) representing the transmission quality.
    pub score: u8,
}

/// As documented in
/// [WebRTC Video Processing and Codec Requirements](https://tools.ietf.org/html/rfc7742#section-4).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ProducerVideoOrientation {
    /// Whether the source is a video camera.
    pub camera: bool,
    /// Whether the video source is flipped.
    pub flip: bool,
    /// Rotation degrees (0, 90, 180 or 270).
    pub rotation: u16,
}

/// Type of the trace events a producer can emit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerTraceEventType {
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
    /// RTCP Sender Report.
    Sr,
}

/// Trace event emitted by a producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProducerTraceEventData {
    /// Trace event type.
    pub r#type: ProducerTraceEventType,
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
pub struct ProducerDump {
    pub id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub trace_event_types: Vec<ProducerTraceEventType>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTC statistics of the producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub struct ProducerStat {
    pub r#type: String,
    pub timestamp: u64,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub score: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Score(Vec<ProducerScore>),
    VideoOrientationChange(ProducerVideoOrientation),
    Trace(ProducerTraceEventData),
}

#[derive(Default)]
struct Handlers {
    score: Bag<Arc<dyn Fn(&[ProducerScore]) + Send + Sync>>,
    video_orientation_change: Bag<Arc<dyn Fn(ProducerVideoOrientation) + Send + Sync>>,
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    trace: Bag<Arc<dyn Fn(&ProducerTraceEventData) + Send + Sync>, ProducerTraceEventData>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

/// Signals consumed by the owning transport and by consumers of this producer.
#[derive(Default)]
struct PrivateHandlers {
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct ObserverHandlers {
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    score: Bag<Arc<dyn Fn(&[ProducerScore]) + Send + Sync>>,
    video_orientation_change: Bag<Arc<dyn Fn(ProducerVideoOrientation) + Send + Sync>>,
    trace: Bag<Arc<dyn Fn(&ProducerTraceEventData) + Send + Sync>, ProducerTraceEventData>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    TransportClosed,
}

struct Inner {
    id: ProducerId,
    kind: MediaKind,
    r#type: ProducerType,
    rtp_parameters: RtpParameters,
    consumable_rtp_parameters: RtpParameters,
    key_frame_request_delay: u32,
    transport_id: TransportId,
    direct: bool,
    paused: AtomicBool,
    score: Mutex<Vec<ProducerScore>>,
    video_orientation: Mutex<Option<ProducerVideoOrientation>>,
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
}

impl Inner {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}]", self.id);

        let subscription_handler = self.subscription_handler.lock().take();
        drop(subscription_handler);
        self.ids.release(self.id);

        if cause == CloseCause::TransportClosed {
            self.hub
                .emit(|handlers| handlers.transport_close.call_simple());
        }
        self.private.tear_down(|handlers| handlers.close.call_simple());
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let transport_id = self.transport_id;
            let request = TransportCloseProducerRequest {
                producer_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(transport_id, request).await {
                        error!("producer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::Score(score) => {
                *self.score.lock() = score.clone();

                self.hub.emit(|handlers| {
                    handlers.score.call(|callback| callback(score.as_slice()));
                });
                self.observer.emit(|handlers| {
                    handlers.score.call(|callback| callback(score.as_slice()));
                });
            }
            Notification::VideoOrientationChange(video_orientation) => {
                self.video_orientation.lock().replace(video_orientation);

                self.hub.emit(|handlers| {
                    handlers
                        .video_orientation_change
                        .call(|callback| callback(video_orientation));
                });
                self.observer.emit(|handlers| {
                    handlers
                        .video_orientation_change
                        .call(|callback| callback(video_orientation));
                });
            }
            Notification::Trace(trace_event_data) => {
                self.hub
                    .emit(|handlers| handlers.trace.call_simple(&trace_event_data));
                self.observer
                    .emit(|handlers| handlers.trace.call_simple(&trace_event_data));
            }
        }
    }
}

/// Producer created on a WebRTC, plain or pipe transport.
#[derive(Clone)]
#[must_use = "Producer is only closed explicitly or together with its transport"]
pub struct RegularProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for RegularProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularProducer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.r#type)
            .field("paused", &self.inner.paused)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl From<RegularProducer> for Producer {
    fn from(producer: RegularProducer) -> Self {
        Producer::Regular(producer)
    }
}

/// Producer created on a direct transport, the application injects RTP packets into it.
#[derive(Clone)]
#[must_use = "Producer is only closed explicitly or together with its transport"]
pub struct DirectProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectProducer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("paused", &self.inner.paused)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl From<DirectProducer> for Producer {
    fn from(producer: DirectProducer) -> Self {
        Producer::Direct(producer)
    }
}

/// A producer represents an audio or video source being injected into a router. It's created on
/// top of a transport that defines how the media packets are carried.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Producer {
    /// Producer created on a transport other than direct transport
    Regular(RegularProducer),
    /// Producer created on a direct transport
    Direct(DirectProducer),
}

impl Producer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ProducerId,
        kind: MediaKind,
        r#type: ProducerType,
        rtp_parameters: RtpParameters,
        consumable_rtp_parameters: RtpParameters,
        key_frame_request_delay: u32,
        paused: bool,
        transport_id: TransportId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        ids: IdRegistry,
        app_data: AppData,
        direct: bool,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            kind,
            r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            key_frame_request_delay,
            transport_id,
            direct,
            paused: AtomicBool::new(paused),
            score: Mutex::default(),
            video_orientation: Mutex::default(),
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

        if direct {
            Self::Direct(DirectProducer { inner })
        } else {
            Self::Regular(RegularProducer { inner })
        }
    }

    /// Producer id.
    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.inner().id
    }

    /// Id of the transport this producer belongs to.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner().transport_id
    }

    /// Media kind.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner().kind
    }

    /// RTP parameters of the producer.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner().rtp_parameters
    }

    /// Producer type.
    #[must_use]
    pub fn r#type(&self) -> ProducerType {
        self.inner().r#type
    }

    /// Whether the producer is paused.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner().paused.load(Ordering::SeqCst)
    }

    /// The score of each RTP stream being received, representing their transmission quality.
    #[must_use]
    pub fn score(&self) -> Vec<ProducerScore> {
        self.inner().score.lock().clone()
    }

    /// Last video orientation reported by the endpoint, if any.
    #[must_use]
    pub fn video_orientation(&self) -> Option<ProducerVideoOrientation> {
        *self.inner().video_orientation.lock()
    }

    /// Key frame request delay (in ms) the producer was created with.
    #[must_use]
    pub fn key_frame_request_delay(&self) -> u32 {
        self.inner().key_frame_request_delay
    }

    /// Custom application data.
    #[must_use]
    pub fn app_data(&self) -> AppData {
        self.inner().app_data.lock().clone()
    }

    /// Replace custom application data.
    pub fn set_app_data(&self, app_data: AppData) {
        *self.inner().app_data.lock() = app_data;
    }

    /// Whether the producer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner().closed.load(Ordering::SeqCst)
    }

    /// RTP parameters every consumer of this producer is derived from.
    #[must_use]
    pub fn consumable_rtp_parameters(&self) -> &RtpParameters {
        &self.inner().consumable_rtp_parameters
    }

    /// Dump Producer.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<ProducerDump, RequestError> {
        debug!("dump()");

        let dump = self.request(ProducerDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns current RTC statistics of the producer.
    pub async fn get_stats(&self) -> Result<Vec<ProducerStat>, RequestError> {
        debug!("get_stats()");

        let stats = self.request(ProducerGetStatsRequest {}).await?;

        serde_json::from_value(stats).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Pauses the producer (no RTP is sent to its associated consumers).
    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        let inner = self.inner();
        let _command_guard = inner.command_lock.lock().await;

        self.request(ProducerPauseRequest {}).await?;

        let was_paused = inner.paused.swap(true, Ordering::SeqCst);

        if !was_paused {
            inner.private.emit(|handlers| handlers.pause.call_simple());
            inner.hub.emit(|handlers| handlers.pause.call_simple());
            inner.observer.emit(|handlers| handlers.pause.call_simple());
        }

        Ok(())
    }

    /// Resumes the producer (RTP is sent to its associated consumers again).
    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        let inner = self.inner();
        let _command_guard = inner.command_lock.lock().await;

        self.request(ProducerResumeRequest {}).await?;

        let was_paused = inner.paused.swap(false, Ordering::SeqCst);

        if was_paused {
            inner.private.emit(|handlers| handlers.resume.call_simple());
            inner.hub.emit(|handlers| handlers.resume.call_simple());
            inner.observer.emit(|handlers| handlers.resume.call_simple());
        }

        Ok(())
    }

    /// Instructs the producer to emit "trace" events. For monitoring purposes. Use with caution.
    /// An empty list disables tracing.
    pub async fn enable_trace_event(
        &self,
        types: Vec<ProducerTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        let _command_guard = self.inner().command_lock.lock().await;

        self.request(ProducerEnableTraceEventRequest { types }).await
    }

    /// Callback is called when the producer score changes.
    pub fn on_score<F: Fn(&[ProducerScore]) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().hub.handlers().score.add(Arc::new(callback))
    }

    /// Callback is called when the video orientation changes. This is just possible if the
    /// `urn:3gpp:video-orientation` RTP extension has been negotiated in the producer RTP
    /// parameters.
    pub fn on_video_orientation_change<F: Fn(ProducerVideoOrientation) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner()
            .hub
            .handlers()
            .video_orientation_change
            .add(Arc::new(callback))
    }

    /// Callback is called when the producer is paused.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner().hub.handlers().pause.add(Arc::new(callback))
    }

    /// Callback is called when the producer is resumed.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner().hub.handlers().resume.add(Arc::new(callback))
    }

    /// See [`Producer::enable_trace_event`] method.
    pub fn on_trace<F: Fn(&ProducerTraceEventData) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().hub.handlers().trace.add(Arc::new(callback))
    }

    /// Callback is called when the transport this producer belongs to is closed for whatever
    /// reason. The producer itself is also closed.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner()
            .hub
            .handlers()
            .transport_close
            .add(Box::new(callback))
    }

    /// Callback is called when the producer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if producer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner().hub.handlers().close.add(Box::new(callback));
        if self.inner().closed.load(Ordering::SeqCst) {
            self.inner().hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this producer, notified of the same events independently of regular
    /// listeners.
    #[must_use]
    pub fn observer(&self) -> ProducerObserver {
        ProducerObserver {
            inner: Arc::clone(self.inner()),
        }
    }

    /// Closes the producer, all its consumers get closed too.
    pub fn close(&self) {
        self.inner().close(CloseCause::Explicit);
    }

    /// Downgrade `Producer` to [`WeakProducer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            inner: Arc::downgrade(self.inner()),
        }
    }

    pub(crate) fn transport_closed(&self) {
        self.inner().close(CloseCause::TransportClosed);
    }

    pub(crate) fn on_private_pause<F: Fn() + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().private.handlers().pause.add(Arc::new(callback))
    }

    pub(crate) fn on_private_resume<F: Fn() + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().private.handlers().resume.add(Arc::new(callback))
    }

    /// Fires on every kind of close, including cascades from the transport.
    pub(crate) fn on_private_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self
            .inner()
            .private
            .handlers()
            .close
            .add(Box::new(callback));
        if self.inner().closed.load(Ordering::SeqCst) {
            self.inner().private.handlers().close.call_simple();
        }
        handler_id
    }

    async fn request<R>(&self, request: R) -> Result<R::Response, RequestError>
    where
        R: crate::messages::Request,
    {
        let inner = self.inner();

        inner
            .channel
            .request_while_open(&inner.closed, inner.id, request)
            .await
    }

    fn inner(&self) -> &Arc<Inner> {
        match self {
            Producer::Regular(producer) => &producer.inner,
            Producer::Direct(producer) => &producer.inner,
        }
    }
}

impl DirectProducer {
    /// Sends an RTP packet from the application into the router.
    pub fn send(&self, rtp_packet: Bytes) -> Result<(), NotificationError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NotificationError::EntityClosed);
        }

        self.inner.channel.notify(
            self.inner.id,
            ProducerSendNotification {
                rtp_packet: rtp_packet.to_vec(),
            },
        )
    }
}

/// Observer of a [`Producer`].
#[derive(Clone)]
pub struct ProducerObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProducerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl ProducerObserver {
    /// Callback is called when the producer is paused.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.observer.handlers().pause.add(Arc::new(callback))
    }

    /// Callback is called when the producer is resumed.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.observer.handlers().resume.add(Arc::new(callback))
    }

    /// Callback is called when the producer score changes.
    pub fn on_score<F: Fn(&[ProducerScore]) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.observer.handlers().score.add(Arc::new(callback))
    }

    /// Callback is called when the video orientation changes.
    pub fn on_video_orientation_change<F: Fn(ProducerVideoOrientation) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .video_orientation_change
            .add(Arc::new(callback))
    }

    /// Callback is called on every trace event.
    pub fn on_trace<F: Fn(&ProducerTraceEventData) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.observer.handlers().trace.add(Arc::new(callback))
    }

    /// Callback is called when the producer is closed for whatever reason.
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

/// [`WeakProducer`] doesn't keep the producer alive.
///
/// [`WeakProducer`] vs [`Producer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakProducer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProducer").finish()
    }
}

impl WeakProducer {
    /// Attempts to upgrade `WeakProducer` to [`Producer`] if it wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<Producer> {
        let inner = self.inner.upgrade()?;

        let producer = if inner.direct {
            Producer::Direct(DirectProducer { inner })
        } else {
            Producer::Regular(RegularProducer { inner })
        };

        Some(producer)
    }
}
