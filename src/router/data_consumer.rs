
use crate::data_producer::{DataProducer, DataProducerId};
use crate::data_structures::{AppData, WebRtcMessage};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    DataConsumerDumpRequest, DataConsumerGetBufferedAmountRequest, DataConsumerGetStatsRequest,
    DataConsumerSetBufferedAmountLowThresholdRequest, Request, TransportCloseDataConsumerRequest,
};
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::TransportId;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError, SubscriptionHandler};
use async_executor::Executor;
use bytes::Bytes;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`DataConsumer`] identifier.
    DataConsumerId
);

/// [`DataConsumer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataConsumerOptions {
    /// The id of the data producer to consume.
    pub(crate) data_producer_id: DataProducerId,
    /// Just if consuming over SCTP.
    /// Whether data messages must be received in order. If true the messages will be sent
    /// reliably. Defaults to the value in the DataProducer if it has type `Sctp` or to `true` if
    /// it has type `Direct`.
    pub(crate) ordered: Option<bool>,
    /// Just if consuming over SCTP.
    /// When ordered is false indicates the time (in milliseconds) after which a SCTP packet will
    /// stop being retransmitted.
    pub(crate) max_packet_life_time: Option<u16>,
    /// Just if consuming over SCTP.
    /// When ordered is false indicates the maximum number of times a packet will be
    /// retransmitted.
    pub(crate) max_retransmits: Option<u16>,
    /// Custom application data.
    pub app_data: AppData,
}

impl DataConsumerOptions {
    /// Inherits parameters of corresponding data producer.
    #[must_use]
    pub fn new_sctp(data_producer_id: DataProducerId) -> Self {
        Self {
            data_producer_id,
            ordered: None,
            max_packet_life_time: None,
            max_retransmits: None,
            app_data: AppData::default(),
        }
    }

    /// For [`DirectTransport`](crate::direct_transport::DirectTransport).
    #[must_use]
    pub fn new_direct(data_producer_id: DataProducerId) -> Self {
        Self {
            data_producer_id,
            ordered: Some(true),
            max_packet_life_time: None,
            max_retransmits: None,
            app_data: AppData::default(),
        }
    }

    /// Messages will be sent reliably in order.
    #[must_use]
    pub fn new_sctp_ordered(data_producer_id: DataProducerId) -> Self {
        Self {
            ordered: Some(true),
            ..Self::new_sctp(data_producer_id)
        }
    }

    /// Messages will be sent unreliably with time (in milliseconds) after which a SCTP packet
    /// will stop being retransmitted.
    #[must_use]
    pub fn new_sctp_unordered_with_life_time(
        data_producer_id: DataProducerId,
        max_packet_life_time: u16,
    ) -> Self {
        Self {
            ordered: Some(false),
            max_packet_life_time: Some(max_packet_life_time),
            ..Self::new_sctp(data_producer_id)
        }
    }

    /// Messages will be sent unreliably with a limited number of retransmission attempts.
    #[must_use]
    pub fn new_sctp_unordered_with_retransmits(
        data_producer_id: DataProducerId,
        max_retransmits: u16,
    ) -> Self {
        Self {
            ordered: Some(false),
            max_retransmits: Some(max_retransmits),
            ..Self::new_sctp(data_producer_id)
        }
    }

    /// The id of the data producer to consume.
    #[must_use]
    pub fn data_producer_id(&self) -> DataProducerId {
        self.data_producer_id
    }

    /// Stream parameters for given stream id, taking unspecified reliability settings from the
    /// data producer ones.
    pub(crate) fn sctp_stream_parameters(
        &self,
        stream_id: u16,
        data_producer_parameters: Option<SctpStreamParameters>,
    ) -> SctpStreamParameters {
        let inherited = match data_producer_parameters {
            Some(parameters) => parameters.with_stream_id(stream_id),
            None => SctpStreamParameters::new_ordered(stream_id),
        };

        match self.ordered {
            None => inherited,
            Some(true) => SctpStreamParameters::new_ordered(stream_id),
            Some(false) => {
                if let Some(max_packet_life_time) = self.max_packet_life_time {
                    SctpStreamParameters::new_unordered_with_life_time(
                        stream_id,
                        max_packet_life_time,
                    )
                } else {
                    SctpStreamParameters::new_unordered_with_retransmits(
                        stream_id,
                        self.max_retransmits.unwrap_or_default(),
                    )
                }
            }
        }
    }
}

/// Data consumer type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConsumerType {
    /// The endpoint receives messages using the SCTP protocol.
    Sctp,
    /// Messages are received directly by the application by means of
    /// [`DataConsumer::on_message`].
    Direct,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct DataConsumerDump {
    pub id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub r#type: DataConsumerType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    #[serde(default)]
    pub buffered_amount_low_threshold: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTC statistics of the data consumer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub struct DataConsumerStat {
    pub r#type: String,
    pub timestamp: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub messages_sent: u64,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub buffered_amount: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    DataProducerClose,
    SctpSendBufferFull,
    #[serde(rename_all = "camelCase")]
    BufferedAmountLow {
        buffered_amount: u32,
    },
    Message {
        ppid: u32,
        payload: Vec<u8>,
    },
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    message: Bag<Arc<dyn Fn(&WebRtcMessage) + Send + Sync>, WebRtcMessage>,
    sctp_send_buffer_full: Bag<Arc<dyn Fn() + Send + Sync>>,
    buffered_amount_low: Bag<Arc<dyn Fn(u32) + Send + Sync>>,
    data_producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
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
    sctp_send_buffer_full: Bag<Arc<dyn Fn() + Send + Sync>>,
    buffered_amount_low: Bag<Arc<dyn Fn(u32) + Send + Sync>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    TransportClosed,
    DataProducerClosed,
}

struct Inner {
    id: DataConsumerId,
    data_producer_id: DataProducerId,
    r#type: DataConsumerType,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: String,
    protocol: String,
    transport_id: TransportId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    ids: IdRegistry,
    hub: EventHub<Handlers>,
    private: EventHub<PrivateHandlers>,
    observer: EventHub<ObserverHandlers>,
    app_data: Mutex<AppData>,
    closed: AtomicBool,
    subscription_handler: Mutex<Option<SubscriptionHandler>>,
    data_producer_close_handler: Mutex<Option<HandlerId>>,
}

impl Inner {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}]", self.id);

        let subscription_handler = self.subscription_handler.lock().take();
        drop(subscription_handler);
        let data_producer_close_handler = self.data_producer_close_handler.lock().take();
        drop(data_producer_close_handler);
        self.ids.release(self.id);

        match cause {
            CloseCause::Explicit => {}
            CloseCause::TransportClosed => {
                self.hub
                    .emit(|handlers| handlers.transport_close.call_simple());
            }
            CloseCause::DataProducerClosed => {
                self.hub
                    .emit(|handlers| handlers.data_producer_close.call_simple());
            }
        }
        self.private.tear_down(|handlers| handlers.close.call_simple());
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let transport_id = self.transport_id;
            let request = TransportCloseDataConsumerRequest {
                data_consumer_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(transport_id, request).await {
                        error!("data consumer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::DataProducerClose => {
                self.close(CloseCause::DataProducerClosed);
            }
            Notification::SctpSendBufferFull => {
                self.hub
                    .emit(|handlers| handlers.sctp_send_buffer_full.call_simple());
                self.observer
                    .emit(|handlers| handlers.sctp_send_buffer_full.call_simple());
            }
            Notification::BufferedAmountLow { buffered_amount } => {
                self.hub.emit(|handlers| {
                    handlers
                        .buffered_amount_low
                        .call(|callback| callback(buffered_amount));
                });
                self.observer.emit(|handlers| {
                    handlers
                        .buffered_amount_low
                        .call(|callback| callback(buffered_amount));
                });
            }
            Notification::Message { ppid, payload } => {
                match WebRtcMessage::new(ppid, Bytes::from(payload)) {
                    Ok(message) => {
                        self.hub
                            .emit(|handlers| handlers.message.call_simple(&message));
                    }
                    Err(error) => {
                        warn!("dropping data consumer message: {}", error);
                    }
                }
            }
        }
    }
}

/// A data consumer represents an endpoint capable of receiving data messages from a router.
#[derive(Clone)]
#[must_use = "Data consumer is only closed explicitly or together with its transport or data producer"]
pub struct DataConsumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumer")
            .field("id", &self.inner.id)
            .field("data_producer_id", &self.inner.data_producer_id)
            .field("type", &self.inner.r#type)
            .field("sctp_stream_parameters", &self.inner.sctp_stream_parameters)
            .field("label", &self.inner.label)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl DataConsumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: DataConsumerId,
        data_producer: &DataProducer,
        r#type: DataConsumerType,
        sctp_stream_parameters: Option<SctpStreamParameters>,
        transport_id: TransportId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        ids: IdRegistry,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            data_producer_id: data_producer.id(),
            r#type,
            sctp_stream_parameters,
            label: data_producer.label().clone(),
            protocol: data_producer.protocol().clone(),
            transport_id,
            executor,
            channel,
            ids,
            hub: EventHub::default(),
            private: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
            subscription_handler: Mutex::default(),
            data_producer_close_handler: Mutex::default(),
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

        let data_producer_close_handler = data_producer.on_private_close({
            let inner_weak = Arc::downgrade(&inner);

            move || {
                if let Some(inner) = inner_weak.upgrade() {
                    inner.close(CloseCause::DataProducerClosed);
                }
            }
        });
        if !inner.closed.load(Ordering::SeqCst) {
            inner
                .data_producer_close_handler
                .lock()
                .replace(data_producer_close_handler);
        }

        Self { inner }
    }

    /// Data consumer id.
    #[must_use]
    pub fn id(&self) -> DataConsumerId {
        self.inner.id
    }

    /// The associated data producer id.
    #[must_use]
    pub fn data_producer_id(&self) -> DataProducerId {
        self.inner.data_producer_id
    }

    /// Id of the transport this data consumer belongs to.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner.transport_id
    }

    /// The type of the data consumer.
    #[must_use]
    pub fn r#type(&self) -> DataConsumerType {
        self.inner.r#type
    }

    /// The SCTP stream parameters (just if the data consumer type is `Sctp`).
    #[must_use]
    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.inner.sctp_stream_parameters
    }

    /// The data consumer label.
    #[must_use]
    pub fn label(&self) -> &String {
        &self.inner.label
    }

    /// The data consumer sub-protocol.
    #[must_use]
    pub fn protocol(&self) -> &String {
        &self.inner.protocol
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

    /// Whether the data consumer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dump DataConsumer.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<DataConsumerDump, RequestError> {
        debug!("dump()");

        let dump = self.request(DataConsumerDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns current statistics of the data consumer.
    pub async fn get_stats(&self) -> Result<Vec<DataConsumerStat>, RequestError> {
        debug!("get_stats()");

        let stats = self.request(DataConsumerGetStatsRequest {}).await?;

        serde_json::from_value(stats).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns the number of bytes of data currently buffered to be sent over the underlying SCTP
    /// association.
    ///
    /// # Notes on usage
    /// The underlying SCTP association uses a common send buffer for all data consumers, hence
    /// the value given by this method indicates the data buffered for all data consumers in the
    /// transport.
    pub async fn get_buffered_amount(&self) -> Result<u32, RequestError> {
        debug!("get_buffered_amount()");

        let response = self
            .request(DataConsumerGetBufferedAmountRequest {})
            .await?;

        Ok(response.buffered_amount)
    }

    /// Whenever the underlying SCTP association buffered bytes drop to this value,
    /// `on_buffered_amount_low` callback is called.
    pub async fn set_buffered_amount_low_threshold(
        &self,
        threshold: u32,
    ) -> Result<(), RequestError> {
        debug!("set_buffered_amount_low_threshold() [threshold:{}]", threshold);

        self.request(DataConsumerSetBufferedAmountLowThresholdRequest { threshold })
            .await
    }

    /// Callback is called when a message has been received from the corresponding data producer.
    ///
    /// # Notes on usage
    /// Just available in direct transports, this is, those created via
    /// [`Router::create_direct_transport`](crate::router::Router::create_direct_transport).
    pub fn on_message<F: Fn(&WebRtcMessage) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.hub.handlers().message.add(Arc::new(callback))
    }

    /// Callback is called when a message could not be sent because the SCTP send buffer was full.
    pub fn on_sctp_send_buffer_full<F: Fn() + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .sctp_send_buffer_full
            .add(Arc::new(callback))
    }

    /// Emitted when the underlying SCTP association buffered bytes drop down to the value set
    /// with [`DataConsumer::set_buffered_amount_low_threshold`].
    ///
    /// # Notes on usage
    /// Only applicable for consumers of type `Sctp`.
    pub fn on_buffered_amount_low<F: Fn(u32) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .buffered_amount_low
            .add(Arc::new(callback))
    }

    /// Callback is called when the associated data producer is closed for whatever reason. The
    /// data consumer itself is also closed.
    pub fn on_data_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .data_producer_close
            .add(Box::new(callback))
    }

    /// Callback is called when the transport this data consumer belongs to is closed for
    /// whatever reason. The data consumer itself is also closed.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .transport_close
            .add(Box::new(callback))
    }

    /// Callback is called when the data consumer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if data consumer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.hub.handlers().close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this data consumer.
    #[must_use]
    pub fn observer(&self) -> DataConsumerObserver {
        DataConsumerObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Closes the data consumer.
    pub fn close(&self) {
        self.inner.close(CloseCause::Explicit);
    }

    /// Downgrade `DataConsumer` to [`WeakDataConsumer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakDataConsumer {
        WeakDataConsumer {
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

/// Observer of a [`DataConsumer`].
#[derive(Clone)]
pub struct DataConsumerObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for DataConsumerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumerObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl DataConsumerObserver {
    /// Callback is called when a message could not be sent because the SCTP send buffer was full.
    pub fn on_sctp_send_buffer_full<F: Fn() + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .sctp_send_buffer_full
            .add(Arc::new(callback))
    }

    /// Callback is called when buffered bytes drop down to the configured threshold.
    pub fn on_buffered_amount_low<F: Fn(u32) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .buffered_amount_low
            .add(Arc::new(callback))
    }

    /// Callback is called when the data consumer is closed for whatever reason.
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

/// [`WeakDataConsumer`] doesn't keep the data consumer alive.
///
/// [`WeakDataConsumer`] vs [`DataConsumer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakDataConsumer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakDataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDataConsumer").finish()
    }
}

impl WeakDataConsumer {
    /// Attempts to upgrade `WeakDataConsumer` to [`DataConsumer`] if it wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<DataConsumer> {
        let inner = self.inner.upgrade()?;

        Some(DataConsumer { inner })
    }
}
