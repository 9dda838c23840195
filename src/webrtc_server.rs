//! A WebRTC server brings the ability to listen on a single UDP/TCP port for multiple
//! `WebRtcTransport`s.
//!
//! A WebRTC server exists within the context of a [`Worker`](crate::worker::Worker), meaning that
//! if your app launches N workers it also needs to create N WebRTC servers listening on different
//! ports (to not collide).

#[cfg(test)]
mod tests;

use crate::data_structures::{AppData, ListenInfo};
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{WebRtcServerDumpRequest, WorkerCloseWebRtcServerRequest};
use crate::transport::{Transport, TransportBase, TransportBaseAccess, TransportId};
use crate::uuid_based_wrapper_type;
use crate::webrtc_transport::{EmptyListError, WeakWebRtcTransport, WebRtcTransport};
use crate::worker::{Channel, RequestError};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use hash_hasher::HashedMap;
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`WebRtcServer`] identifier.
    WebRtcServerId
);

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct WebRtcServerDump {
    pub id: WebRtcServerId,
    #[serde(default, rename = "webRtcTransportIds")]
    pub webrtc_transport_ids: Vec<TransportId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Struct that protects an invariant of having non-empty list of listen infos.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Vec<ListenInfo>")]
pub struct WebRtcServerListenInfos(Vec<ListenInfo>);

impl WebRtcServerListenInfos {
    /// Create WebRTC server listen infos with given info populated initially.
    #[must_use]
    pub fn new(listen_info: ListenInfo) -> Self {
        Self(vec![listen_info])
    }

    /// Insert another listen info.
    #[must_use]
    pub fn insert(mut self, listen_info: ListenInfo) -> Self {
        self.0.push(listen_info);
        self
    }
}

impl Deref for WebRtcServerListenInfos {
    type Target = Vec<ListenInfo>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<ListenInfo>> for WebRtcServerListenInfos {
    type Error = EmptyListError;

    fn try_from(listen_infos: Vec<ListenInfo>) -> Result<Self, Self::Error> {
        if listen_infos.is_empty() {
            Err(EmptyListError)
        } else {
            Ok(Self(listen_infos))
        }
    }
}

impl From<WebRtcServerListenInfos> for Vec<ListenInfo> {
    fn from(listen_infos: WebRtcServerListenInfos) -> Self {
        listen_infos.0
    }
}

/// [`WebRtcServer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WebRtcServerOptions {
    /// Listening infos in order of preference (first one is the preferred one).
    pub listen_infos: WebRtcServerListenInfos,
    /// Custom application data.
    pub app_data: AppData,
}

impl WebRtcServerOptions {
    /// Create [`WebRtcServer`] options with given listen infos.
    #[must_use]
    pub fn new(listen_infos: WebRtcServerListenInfos) -> Self {
        Self {
            listen_infos,
            app_data: AppData::default(),
        }
    }
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_webrtc_transport: Bag<Arc<dyn Fn(&WebRtcTransport) + Send + Sync>, WebRtcTransport>,
    worker_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct ObserverHandlers {
    webrtc_transport_handled: Bag<Arc<dyn Fn(&WebRtcTransport) + Send + Sync>, WebRtcTransport>,
    webrtc_transport_unhandled: Bag<Arc<dyn Fn(&WebRtcTransport) + Send + Sync>, WebRtcTransport>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

/// Registry entry, the router keeps the transport alive.
struct HandledWebRtcTransport {
    base: Weak<TransportBase>,
    webrtc_transport: WeakWebRtcTransport,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CloseCause {
    Explicit,
    WorkerClosed,
}

struct Inner {
    id: WebRtcServerId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    worker_ids: IdRegistry,
    webrtc_transports: Mutex<HashedMap<TransportId, HandledWebRtcTransport>>,
    hub: EventHub<Handlers>,
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

        let webrtc_transports = std::mem::take(&mut *self.webrtc_transports.lock());
        for handled in webrtc_transports.into_values() {
            if let Some(base) = handled.base.upgrade() {
                base.listen_server_closed();
            }
        }

        if cause == CloseCause::WorkerClosed {
            self.hub
                .emit(|handlers| handlers.worker_close.call_simple());
        }
        self.hub.tear_down(|handlers| handlers.close.call_simple());
        self.observer
            .tear_down(|handlers| handlers.close.call_simple());

        if cause == CloseCause::Explicit {
            let channel = self.channel.clone();
            let request = WorkerCloseWebRtcServerRequest {
                web_rtc_server_id: self.id,
            };

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request("", request).await {
                        error!("WebRTC server closing failed on drop: {}", error);
                    }
                })
                .detach();
        }
    }
}

/// A WebRTC server brings the ability to listen on a single UDP/TCP port for multiple
/// `WebRtcTransport`s.
///
/// Closing the server closes every WebRTC transport using it, each of them emits
/// [`WebRtcTransport::on_webrtc_server_close`]. Closing a transport leaves the server intact.
#[derive(Clone)]
#[must_use = "WebRTC server stays open until closed explicitly or its worker is closed"]
pub struct WebRtcServer {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebRtcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcServer")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl WebRtcServer {
    pub(crate) fn new(
        id: WebRtcServerId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        worker_ids: IdRegistry,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", id);

        let inner = Arc::new(Inner {
            id,
            executor,
            channel,
            worker_ids,
            webrtc_transports: Mutex::default(),
            hub: EventHub::default(),
            observer: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// WebRTC server id.
    #[must_use]
    pub fn id(&self) -> WebRtcServerId {
        self.inner.id
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

    /// Whether WebRTC server is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// WebRTC transports currently using this server.
    #[must_use]
    pub fn webrtc_transports(&self) -> Vec<WebRtcTransport> {
        self.inner
            .webrtc_transports
            .lock()
            .values()
            .filter_map(|handled| handled.webrtc_transport.upgrade())
            .collect()
    }

    /// Dump WebRTC server.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<WebRtcServerDump, RequestError> {
        debug!("dump()");

        let dump = self
            .inner
            .channel
            .request_while_open(&self.inner.closed, self.inner.id, WebRtcServerDumpRequest {})
            .await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Callback is called when the worker this WebRTC server belongs to is closed for whatever
    /// reason. The WebRTC server itself is also closed.
    pub fn on_worker_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .worker_close
            .add(Box::new(callback))
    }

    /// Callback is called when new [`WebRtcTransport`] is added that uses this WebRTC server.
    pub fn on_new_webrtc_transport<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&WebRtcTransport) + Send + Sync + 'static,
    {
        self.inner
            .hub
            .handlers()
            .new_webrtc_transport
            .add(Arc::new(callback))
    }

    /// Callback is called when the WebRTC server is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if WebRTC server is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.hub.handlers().close.add(Box::new(callback));
        if self.closed() {
            self.inner.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Observer of this WebRTC server.
    #[must_use]
    pub fn observer(&self) -> WebRtcServerObserver {
        WebRtcServerObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Closes the WebRTC server together with every WebRTC transport using it.
    pub fn close(&self) {
        self.inner.close(CloseCause::Explicit);
    }

    /// Downgrade `WebRtcServer` to [`WeakWebRtcServer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakWebRtcServer {
        WeakWebRtcServer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn worker_closed(&self) {
        self.inner.close(CloseCause::WorkerClosed);
    }

    /// Registers a transport listening through this server. Returns `false` and closes the
    /// transport if the server closed while the transport was being created.
    pub(crate) fn handle_webrtc_transport(&self, webrtc_transport: &WebRtcTransport) -> bool {
        let transport_id = webrtc_transport.id();

        {
            // `Inner::close` flips `closed` before taking the map under this lock
            let mut webrtc_transports = self.inner.webrtc_transports.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                drop(webrtc_transports);
                webrtc_transport.base().listen_server_closed();
                return false;
            }
            webrtc_transports.insert(
                transport_id,
                HandledWebRtcTransport {
                    base: Arc::downgrade(webrtc_transport.base()),
                    webrtc_transport: webrtc_transport.downgrade(),
                },
            );
        }

        webrtc_transport
            .base()
            .on_private_close({
                let inner_weak = Arc::downgrade(&self.inner);

                move || {
                    let Some(inner) = inner_weak.upgrade() else {
                        return;
                    };
                    let removed = inner.webrtc_transports.lock().remove(&transport_id);
                    if let Some(webrtc_transport) =
                        removed.and_then(|handled| handled.webrtc_transport.upgrade())
                    {
                        inner.observer.emit(|handlers| {
                            handlers
                                .webrtc_transport_unhandled
                                .call_simple(&webrtc_transport);
                        });
                    }
                }
            })
            .detach();

        self.inner.hub.emit(|handlers| {
            handlers.new_webrtc_transport.call_simple(webrtc_transport);
        });
        self.inner.observer.emit(|handlers| {
            handlers
                .webrtc_transport_handled
                .call_simple(webrtc_transport);
        });

        true
    }
}

/// Observer of a [`WebRtcServer`].
#[derive(Clone)]
pub struct WebRtcServerObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebRtcServerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcServerObserver")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl WebRtcServerObserver {
    /// Callback is called when a WebRTC transport starts using the server.
    pub fn on_webrtc_transport_handled<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&WebRtcTransport) + Send + Sync + 'static,
    {
        self.inner
            .observer
            .handlers()
            .webrtc_transport_handled
            .add(Arc::new(callback))
    }

    /// Callback is called when a WebRTC transport using the server is closed.
    pub fn on_webrtc_transport_unhandled<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&WebRtcTransport) + Send + Sync + 'static,
    {
        self.inner
            .observer
            .handlers()
            .webrtc_transport_unhandled
            .add(Arc::new(callback))
    }

    /// Callback is called when the WebRTC server is closed for whatever reason.
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

/// [`WeakWebRtcServer`] doesn't own the WebRTC server and can be upgraded back while the server
/// is alive.
#[derive(Clone)]
pub struct WeakWebRtcServer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakWebRtcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakWebRtcServer").finish()
    }
}

impl WeakWebRtcServer {
    /// Attempts to upgrade `WeakWebRtcServer` to [`WebRtcServer`] if last instance of one wasn't
    /// dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<WebRtcServer> {
        let inner = self.inner.upgrade()?;

        Some(WebRtcServer { inner })
    }
}
