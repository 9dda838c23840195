//! A worker represents a media engine the control plane talks to over an [`EngineLink`].
//!
//! Routers and WebRTC servers are created on a worker, closing the worker closes all of them.

mod channel;
mod common;
mod data_structures;
#[cfg(test)]
pub(crate) mod fake_engine;

use crate::data_structures::AppData;
use crate::event_hub::EventHub;
use crate::id_registry::IdRegistry;
use crate::messages::{
    WorkerCreateRouterRequest, WorkerCreateWebRtcServerRequest, WorkerDumpRequest,
    WorkerUpdateSettingsRequest,
};
use crate::ortc::{self, RtpCapabilitiesError};
use crate::router::{Router, RouterId, RouterOptions};
use crate::webrtc_server::{WebRtcServer, WebRtcServerId, WebRtcServerOptions};
use crate::worker_manager::WorkerManager;
use async_executor::Executor;
pub(crate) use channel::Channel;
pub use channel::{EngineLink, NotificationError, RequestError};
pub(crate) use common::SubscriptionHandler;
pub use common::SubscriptionTarget;
pub use data_structures::{WorkerLogLevel, WorkerLogTag};
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use hash_hasher::HashedMap;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Settings for worker to be created with.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WorkerSettings {
    /// Logging level for logs generated by the media engine.
    ///
    /// Default [`WorkerLogLevel::Error`].
    pub log_level: WorkerLogLevel,
    /// Log tags for debugging.
    pub log_tags: Vec<WorkerLogTag>,
    /// Base timeout for requests to the engine, each request already queued adds 100 ms on top.
    ///
    /// Default 15 seconds.
    pub request_timeout: Duration,
    /// Custom application data.
    pub app_data: AppData,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            log_level: WorkerLogLevel::default(),
            log_tags: Vec::new(),
            request_timeout: Duration::from_secs(15),
            app_data: AppData::default(),
        }
    }
}

/// Worker settings that can be updated in runtime.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WorkerUpdateSettings {
    /// Logging level for logs generated by the media engine.
    pub log_level: Option<WorkerLogLevel>,
    /// Log tags for debugging.
    pub log_tags: Option<Vec<WorkerLogTag>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct WorkerDump {
    #[serde(default)]
    pub router_ids: Vec<RouterId>,
    #[serde(default, rename = "webRtcServerIds")]
    pub webrtc_server_ids: Vec<WebRtcServerId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Error that caused [`Worker::create_router`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CreateRouterError {
    /// RTP capabilities generation error
    #[error("RTP capabilities generation error: {0}")]
    FailedRtpCapabilitiesGeneration(RtpCapabilitiesError),
    /// Request to the engine failed
    #[error("Request to the engine failed: {0}")]
    Request(RequestError),
}

/// Error that caused [`Worker::create_webrtc_server`] to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CreateWebRtcServerError {
    /// Request to the engine failed
    #[error("Request to the engine failed: {0}")]
    Request(RequestError),
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_router: Bag<Arc<dyn Fn(&Router) + Send + Sync>, Router>,
    new_webrtc_server: Bag<Arc<dyn Fn(&WebRtcServer) + Send + Sync>, WebRtcServer>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    executor: Arc<Executor<'static>>,
    channel: Channel,
    /// Scope of routers and WebRTC servers.
    ids: IdRegistry,
    routers: Mutex<HashedMap<RouterId, Router>>,
    webrtc_servers: Mutex<HashedMap<WebRtcServerId, WebRtcServer>>,
    hub: EventHub<Handlers>,
    app_data: Mutex<AppData>,
    closed: AtomicBool,
    // Make sure worker is not dropped until this worker manager is not dropped
    _worker_manager: WorkerManager,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("close()");

        let routers = std::mem::take(&mut *self.routers.lock());
        for router in routers.into_values() {
            router.worker_closed();
        }
        let webrtc_servers = std::mem::take(&mut *self.webrtc_servers.lock());
        for webrtc_server in webrtc_servers.into_values() {
            webrtc_server.worker_closed();
        }

        self.channel.close();

        self.hub.tear_down(|handlers| handlers.close.call_simple());
    }
}

/// A worker represents a media engine that handles routers and WebRTC servers.
#[derive(Clone)]
#[must_use = "Worker will be closed on drop, make sure to keep it around for as long as needed"]
pub struct Worker {
    inner: Arc<Inner>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("channel", &self.inner.channel)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Worker {
    pub(super) async fn new(
        executor: Arc<Executor<'static>>,
        link: EngineLink,
        worker_settings: WorkerSettings,
        worker_manager: WorkerManager,
    ) -> Result<Self, RequestError> {
        let WorkerSettings {
            log_level,
            log_tags,
            request_timeout,
            app_data,
        } = worker_settings;

        debug!("new()");

        let channel = Channel::new(&executor, link, request_timeout);

        let inner = Arc::new(Inner {
            executor,
            channel,
            ids: IdRegistry::default(),
            routers: Mutex::default(),
            webrtc_servers: Mutex::default(),
            hub: EventHub::default(),
            app_data: Mutex::new(app_data),
            closed: AtomicBool::new(false),
            _worker_manager: worker_manager,
        });

        let worker = Self { inner };

        worker
            .update_settings(WorkerUpdateSettings {
                log_level: Some(log_level),
                log_tags: Some(log_tags),
            })
            .await?;

        Ok(worker)
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

    /// Whether the worker is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Routers created on this worker and still open.
    #[must_use]
    pub fn routers(&self) -> Vec<Router> {
        self.inner.routers.lock().values().cloned().collect()
    }

    /// WebRTC servers created on this worker and still open.
    #[must_use]
    pub fn webrtc_servers(&self) -> Vec<WebRtcServer> {
        self.inner.webrtc_servers.lock().values().cloned().collect()
    }

    /// Dump Worker.
    #[doc(hidden)]
    pub async fn dump(&self) -> Result<WorkerDump, RequestError> {
        debug!("dump()");

        let dump = self.request(WorkerDumpRequest {}).await?;

        serde_json::from_value(dump).map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })
    }

    /// Updates the worker settings in runtime. Just a subset of the worker settings can be
    /// updated.
    pub async fn update_settings(&self, data: WorkerUpdateSettings) -> Result<(), RequestError> {
        debug!(
            "update_settings() [log_level:{:?}]",
            data.log_level.map(|log_level| log_level.as_str()),
        );

        self.request(WorkerUpdateSettingsRequest {
            log_level: data.log_level,
            log_tags: data.log_tags,
        })
        .await
    }

    /// Create a WebRTC server.
    pub async fn create_webrtc_server(
        &self,
        webrtc_server_options: WebRtcServerOptions,
    ) -> Result<WebRtcServer, CreateWebRtcServerError> {
        debug!("create_webrtc_server()");

        let WebRtcServerOptions {
            listen_infos,
            app_data,
        } = webrtc_server_options;

        let webrtc_server_id: WebRtcServerId = self.inner.ids.allocate();

        if let Err(error) = self
            .request(WorkerCreateWebRtcServerRequest {
                web_rtc_server_id: webrtc_server_id,
                listen_infos: listen_infos.into(),
            })
            .await
        {
            self.inner.ids.release(webrtc_server_id);
            return Err(CreateWebRtcServerError::Request(error));
        }

        let webrtc_server = WebRtcServer::new(
            webrtc_server_id,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            self.inner.ids.clone(),
            app_data,
        );

        self.inner
            .webrtc_servers
            .lock()
            .insert(webrtc_server_id, webrtc_server.clone());
        webrtc_server
            .on_close({
                let inner_weak = Arc::downgrade(&self.inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        let webrtc_server = inner.webrtc_servers.lock().remove(&webrtc_server_id);
                        drop(webrtc_server);
                    }
                }
            })
            .detach();

        self.inner
            .hub
            .emit(|handlers| handlers.new_webrtc_server.call_simple(&webrtc_server));

        Ok(webrtc_server)
    }

    /// Create a Router.
    pub async fn create_router(
        &self,
        router_options: RouterOptions,
    ) -> Result<Router, CreateRouterError> {
        debug!("create_router()");

        let RouterOptions {
            media_codecs,
            app_data,
        } = router_options;

        let rtp_capabilities = ortc::generate_router_rtp_capabilities(media_codecs)
            .map_err(CreateRouterError::FailedRtpCapabilitiesGeneration)?;

        let router_id: RouterId = self.inner.ids.allocate();

        if let Err(error) = self.request(WorkerCreateRouterRequest { router_id }).await {
            self.inner.ids.release(router_id);
            return Err(CreateRouterError::Request(error));
        }

        let router = Router::new(
            router_id,
            Arc::clone(&self.inner.executor),
            self.inner.channel.clone(),
            rtp_capabilities,
            self.inner.ids.clone(),
            app_data,
        );

        self.inner.routers.lock().insert(router_id, router.clone());
        router
            .on_private_close({
                let inner_weak = Arc::downgrade(&self.inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        let router = inner.routers.lock().remove(&router_id);
                        drop(router);
                    }
                }
            })
            .detach();

        self.inner
            .hub
            .emit(|handlers| handlers.new_router.call_simple(&router));

        Ok(router)
    }

    /// Callback is called when a new router is created.
    pub fn on_new_router<F: Fn(&Router) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.hub.handlers().new_router.add(Arc::new(callback))
    }

    /// Callback is called when a new WebRTC server is created.
    pub fn on_new_webrtc_server<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&WebRtcServer) + Send + Sync + 'static,
    {
        self.inner
            .hub
            .handlers()
            .new_webrtc_server
            .add(Arc::new(callback))
    }

    /// Callback is called when the worker is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if worker is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.hub.handlers().close.add(Box::new(callback));
        if self.closed() {
            self.inner.hub.handlers().close.call_simple();
        }
        handler_id
    }

    /// Closes the worker together with all of its routers and WebRTC servers.
    pub fn close(&self) {
        self.inner.close();
    }

    async fn request<R>(&self, request: R) -> Result<R::Response, RequestError>
    where
        R: crate::messages::Request,
    {
        self.inner
            .channel
            .request_while_open(&self.inner.closed, "", request)
            .await
    }
}
