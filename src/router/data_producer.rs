#[cfg(test)]
mod tests;

use crate::data_structures::{AppData, WebRtcMessage};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    DataProducerDumpRequest, DataProducerGetStatsRequest, DataProducerSendNotification, Request,
    TransportCloseDataProducerRequest,
};
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::TransportId;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, NotificationError, RequestError};
use async_executor::Executor;
use event_listener_primitives::{BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`DataProducer`] identifier.
    DataProducerId
);

/// [`DataProducer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataProducerOptions {
    /// Data producer id, only specified explicitly when piping data producers between routers.
    pub(crate) id: Option<DataProducerId>,
    /// SCTP parameters defining how the endpoint is sending the data.
    /// Required if SCTP/DataChannel is used.
    /// Must not be given if the data producer is created on a DirectTransport.
    pub(crate) sctp_stream_parameters: Option<SctpStreamParameters>,
    /// A label which can be used to distinguish this DataChannel from others.
    pub label: String,
    /// Name of the sub-protocol used by this DataChannel.
    pub protocol: String,
    /// Custom application data.
    pub app_data: AppData,
}

impl DataProducerOptions {
    /// For SCTP-capable transports (WebRTC, plain and pipe).
    #[must_use]
    pub fn new_sctp(sctp_stream_parameters: SctpStreamParameters) -> Self {
        Self {
            id: None,
            sctp_stream_parameters: Some(sctp_stream_parameters),
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }

    /// For [`DirectTransport`](crate::direct_transport::DirectTransport).
    #[must_use]
    pub fn new_direct() -> Self {
        Self {
            id: None,
            sctp_stream_parameters: None,
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }

    pub(crate) fn new_pipe_transport(
        data_producer_id: DataProducerId,
        sctp_stream_parameters: Option<SctpStreamParameters>,
    ) -> Self {
        Self {
            id: Some(data_producer_id),
            sctp_stream_parameters,
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }

    /// SCTP stream parameters, if any.
    #[must_use]
    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.sctp_stream_parameters
    }
}

/// Data producer type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProducerType {
    /// The endpoint sends messages using the SCTP protocol.
    Sctp,
    /// Messages are sent directly from the application by means of
    /// [`DirectDataProducer::send`].
    Direct,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct DataProducerDump {
    pub id: DataProducerId,
    pub r#type: DataProducerType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// RTC statistics of the data producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub struct DataProducerStat {
    pub r#type: String,
    pub timestamp: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub messages_received: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Default)]
struct Handlers {
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct PrivateHandlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct ObserverHandlers {
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    TransportClosed,
}

struct Inner {
    id: DataProducerId,
    r#type: DataProducerType,
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
}

impl Inner {
    fn close(&self, cause: CloseCause) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close() [id:{}]", self.id);

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
            let request = TransportCloseDataProducerRequest {
                data_producer_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(transport_id, request).await {
                        error!("data producer closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// Data producer created on a WebRTC, plain or pipe transport.
#[derive(Clone)]
#[must_use = "Data producer is only closed explicitly or together with its transport"]
pub struct RegularDataProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for RegularDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularDataProducer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl From<RegularDataProducer> for DataProducer {
    fn from(data_producer: RegularDataProducer) -> Self {
        DataProducer::Regular(data_producer)
    }
}

/// Data producer created on a direct transport, the application sends messages through it.
#[derive(Clone)]
#[must_use = "Data producer is only closed explicitly or together with its transport"]
pub struct DirectDataProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectDataProducer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl From<DirectDataProducer> for DataProducer {
    fn from(data_producer: DirectDataProducer) -> Self {
        DataProducer::Direct(data_producer)
    }
}

/// A data producer represents an endpoint capable of injecting data messages into a router.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DataProducer {
    /// Data producer created on a transport other than direct transport
    Regular(RegularDataProducer),
    /// Data producer created on a direct transport
    Direct(DirectDataProducer),
}

impl DataProducer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: DataProducerId,
        r#type: DataProducerType,
        sctp_stream_parameters: Option<SctpStreamParameters>,
        label: String,
        protocol: String,
        transport_id: TransportId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        ids: IdRegistry,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            r#type,
            sctp_stream_parameters,
            label,
            protocol,
            transport_id,
            executor,
            channel,
            ids,
            hub: EventHub::default(),
            private: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
        });

        match r#type {
            DataProducerType::Sctp => Self::Regular(RegularDataProducer { inner }),
            DataProducerType::Direct => Self::Direct(DirectDataProducer { inner }),
        }
    }

    /// Data producer id.
    #[must_use]
    pub fn id(&self) -> DataProducerId {
        self.inner().id
    }

    /// Id of the transport this data producer belongs to.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner().transport_id
    }

    /// The type of the data producer.
    #[must_use]
    pub fn r#type(&self) -> DataProducerType {
        self.inner().r#type
    }

    /// The SCTP stream parameters (just if the data producer type is `Sctp`).
    #[must_use]
    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.inner().sctp_stream_parameters
    }

    /// The data producer label.
    #[must_use]
    pub fn label(&self) -> &String {
        &self.inner().label
    }

    /// The data producer sub-protocol.
    #[must_use]
    pub fn protocol(&self) -> &String {
        &self.inner().protocol
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

    /// Whether the data producer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner().closed.load(Ordering::SeqCst)
    }

    /// Dump DataProducer.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<DataProducerDump, RequestError> {
        debug!("dump()");

        let dump = self.request(DataProducerDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Returns current statistics of the data producer.
    pub async fn get_stats(&self) -> Result<Vec<DataProducerStat>, RequestError> {
        debug!("get_stats()");

        let stats = self.request(DataProducerGetStatsRequest {}).await?;

        serde_json::from_value(stats).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Callback is called when the transport this data producer belongs to is closed for
    /// whatever reason. The data producer itself is also closed.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner()
            .hub
            .handlers()
            .transport_close
            .add(Box::new(callback))
    }

    /// Callback is called when the data producer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if data producer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner().hub.handlers().close.add(Box::new(callback));
        if self.inner().closed.load(Ordering::SeqCst) {
            self.inner().hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Callback is called on the observer side when the data producer is closed.
    pub fn on_observer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self
            .inner()
            .observer
            .handlers()
            .close
            .add(Box::new(callback));
        if self.inner().closed.load(Ordering::SeqCst) {
            self.inner().observer.handlers().close.call_simple();
        }
        handler_id
    }

    /// Closes the data producer, all its data consumers get closed too.
    pub fn close(&self) {
        self.inner().close(CloseCause::Explicit);
    }

    /// Downgrade `DataProducer` to [`WeakDataProducer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakDataProducer {
        WeakDataProducer {
            inner: Arc::downgrade(self.inner()),
        }
    }

    pub(crate) fn transport_closed(&self) {
        self.inner().close(CloseCause::TransportClosed);
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

    async fn request<R: Request>(&self, request: R) -> Result<R::Response, RequestError> {
        let inner = self.inner();

        inner
            .channel
            .request_while_open(&inner.closed, inner.id, request)
            .await
    }

    fn inner(&self) -> &Arc<Inner> {
        match self {
            DataProducer::Regular(data_producer) => &data_producer.inner,
            DataProducer::Direct(data_producer) => &data_producer.inner,
        }
    }
}

impl DirectDataProducer {
    /// Sends direct messages from the application into the router.
    pub fn send(&self, message: WebRtcMessage) -> Result<(), NotificationError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NotificationError::EntityClosed);
        }

        let (ppid, payload) = message.into_ppid_and_payload();

        self.inner.channel.notify(
            self.inner.id,
            DataProducerSendNotification {
                ppid,
                payload: payload.to_vec(),
            },
        )
    }
}

/// [`WeakDataProducer`] doesn't keep the data producer alive.
///
/// [`WeakDataProducer`] vs [`DataProducer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakDataProducer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDataProducer").finish()
    }
}

impl WeakDataProducer {
    /// Attempts to upgrade `WeakDataProducer` to [`DataProducer`] if it wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<DataProducer> {
        let inner = self.inner.upgrade()?;

        let data_producer = match inner.r#type {
            DataProducerType::Sctp => DataProducer::Regular(RegularDataProducer { inner }),
            DataProducerType::Direct => DataProducer::Direct(DirectDataProducer { inner }),
        };

        Some(data_producer)
    }
}
