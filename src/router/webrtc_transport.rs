#[cfg(test)]
mod tests;

use crate::data_structures::{
    AppData, DtlsParameters, DtlsState, IceCandidate, IceParameters, IceRole, IceState,
    ListenInfo, SctpState, TransportTuple,
};
use crate::event_hub::EventHub;
use crate::messages::{
    TransportConnectWebRtcRequest, TransportRestartIceRequest, WebRtcTransportData,
};
use crate::sctp_parameters::NumSctpStreams;
use crate::transport::{
    Transport, TransportBase, TransportBaseAccess, TransportObserver, TransportTraceEventData,
};
use crate::webrtc_server::WebRtcServer;
use crate::worker::RequestError;
use event_listener_primitives::{Bag, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Non-empty list of listen infos.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WebRtcTransportListenInfos(Vec<ListenInfo>);

impl WebRtcTransportListenInfos {
    /// Create listen infos with a single entry.
    #[must_use]
    pub fn new(listen_info: ListenInfo) -> Self {
        Self(vec![listen_info])
    }

    /// Append another listen info, entries earlier in the list have higher priority.
    #[must_use]
    pub fn insert(mut self, listen_info: ListenInfo) -> Self {
        self.0.push(listen_info);
        self
    }

    pub(crate) fn into_vec(self) -> Vec<ListenInfo> {
        self.0
    }
}

impl Deref for WebRtcTransportListenInfos {
    type Target = Vec<ListenInfo>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Empty list of listen infos provided, should have at least one element.
#[derive(Error, Debug, Eq, PartialEq)]
#[error("Empty list of listen infos provided, should have at least one element")]
pub struct EmptyListError;

impl TryFrom<Vec<ListenInfo>> for WebRtcTransportListenInfos {
    type Error = EmptyListError;

    fn try_from(listen_infos: Vec<ListenInfo>) -> Result<Self, Self::Error> {
        if listen_infos.is_empty() {
            Err(EmptyListError)
        } else {
            Ok(Self(listen_infos))
        }
    }
}

/// How a [`WebRtcTransport`] receives traffic: on its own sockets or through a shared
/// [`WebRtcServer`].
#[derive(Debug, Clone)]
pub enum WebRtcTransportListen {
    /// Listen on individual sockets of this transport.
    Individual {
        /// Listening infos in order of preference (first one is the preferred one).
        listen_infos: WebRtcTransportListenInfos,
    },
    /// Share sockets of a WebRTC server.
    Server {
        /// WebRTC server.
        webrtc_server: WebRtcServer,
    },
}

/// [`WebRtcTransport`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WebRtcTransportOptions {
    /// How the transport listens.
    pub listen: WebRtcTransportListen,
    /// Listen in UDP. Default true.
    pub enable_udp: bool,
    /// Listen in TCP. Default false.
    pub enable_tcp: bool,
    /// Prefer UDP. Default false.
    pub prefer_udp: bool,
    /// Prefer TCP. Default false.
    pub prefer_tcp: bool,
    /// ICE consent timeout (in seconds). If 0 it is disabled. Default 30.
    pub ice_consent_timeout: u8,
    /// Initial available outgoing bitrate (in bps). Default 600000.
    pub initial_available_outgoing_bitrate: u32,
    /// Create a SCTP association. Default false.
    pub enable_sctp: bool,
    /// SCTP streams number.
    pub num_sctp_streams: NumSctpStreams,
    /// Maximum allowed size for SCTP messages sent by DataProducers. Default 262144.
    pub max_sctp_message_size: u32,
    /// Maximum SCTP send buffer used by DataConsumers. Default 262144.
    pub sctp_send_buffer_size: u32,
    /// Custom application data.
    pub app_data: AppData,
}

impl WebRtcTransportOptions {
    /// Options for a transport listening on its own sockets.
    #[must_use]
    pub fn new(listen_infos: WebRtcTransportListenInfos) -> Self {
        Self::with_listen(WebRtcTransportListen::Individual { listen_infos })
    }

    /// Options for a transport listening through a WebRTC server.
    #[must_use]
    pub fn new_with_server(webrtc_server: WebRtcServer) -> Self {
        Self::with_listen(WebRtcTransportListen::Server { webrtc_server })
    }

    fn with_listen(listen: WebRtcTransportListen) -> Self {
        Self {
            listen,
            enable_udp: true,
            enable_tcp: false,
            prefer_udp: false,
            prefer_tcp: false,
            ice_consent_timeout: 30,
            initial_available_outgoing_bitrate: 600_000,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            app_data: AppData::default(),
        }
    }
}

/// Remote parameters for [`WebRtcTransport::connect`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WebRtcTransportRemoteParameters {
    /// Remote DTLS parameters.
    pub dtls_parameters: DtlsParameters,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    ice_state_change: Bag<Arc<dyn Fn(IceState) + Send + Sync>>,
    ice_selected_tuple_change: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
    dtls_state_change: Bag<Arc<dyn Fn(DtlsState) + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    IceStateChange { ice_state: IceState },
    #[serde(rename_all = "camelCase")]
    IceSelectedTupleChange { ice_selected_tuple: TransportTuple },
    #[serde(rename_all = "camelCase")]
    DtlsStateChange {
        dtls_state: DtlsState,
        #[serde(default)]
        dtls_remote_cert: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange { sctp_state: SctpState },
    Trace(TransportTraceEventData),
}

struct Inner {
    base: Arc<TransportBase>,
    ice_role: IceRole,
    ice_parameters: Mutex<IceParameters>,
    ice_candidates: Vec<IceCandidate>,
    ice_state: Mutex<IceState>,
    ice_selected_tuple: Mutex<Option<TransportTuple>>,
    dtls_parameters: Mutex<DtlsParameters>,
    dtls_state: Mutex<DtlsState>,
    dtls_remote_cert: Mutex<Option<String>>,
    hub: EventHub<Handlers>,
    observer: EventHub<Handlers>,
}

impl Inner {
    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::IceStateChange { ice_state } => {
                *self.ice_state.lock() = ice_state;

                for hub in [&self.hub, &self.observer] {
                    hub.emit(|handlers| {
                        handlers
                            .ice_state_change
                            .call(|callback| callback(ice_state));
                    });
                }
            }
            Notification::IceSelectedTupleChange { ice_selected_tuple } => {
                self.ice_selected_tuple
                    .lock()
                    .replace(ice_selected_tuple.clone());

                for hub in [&self.hub, &self.observer] {
                    hub.emit(|handlers| {
                        handlers
                            .ice_selected_tuple_change
                            .call_simple(&ice_selected_tuple);
                    });
                }
            }
            Notification::DtlsStateChange {
                dtls_state,
                dtls_remote_cert,
            } => {
                *self.dtls_state.lock() = dtls_state;
                if let Some(dtls_remote_cert) = dtls_remote_cert {
                    self.dtls_remote_cert.lock().replace(dtls_remote_cert);
                }

                for hub in [&self.hub, &self.observer] {
                    hub.emit(|handlers| {
                        handlers
                            .dtls_state_change
                            .call(|callback| callback(dtls_state));
                    });
                }
            }
            Notification::SctpStateChange { sctp_state } => {
                self.base.sctp_state_changed(sctp_state);
            }
            Notification::Trace(trace_event_data) => {
                self.base.traced(&trace_event_data);
            }
        }
    }

    fn closed(&self) {
        *self.ice_state.lock() = IceState::Closed;
        self.ice_selected_tuple.lock().take();
        *self.dtls_state.lock() = DtlsState::Closed;

        self.hub.tear_down(|_| {});
        self.observer.tear_down(|_| {});
    }
}

/// A WebRTC transport represents a network path negotiated by both, a WebRTC endpoint and
/// the router, via ICE and DTLS procedures.
///
/// A WebRTC transport may be used to receive media, to send media or to both receive and send.
/// There is no limitation in the engine. However, due to their design, WebRTC endpoints usually
/// use separate transports for sending and receiving.
#[derive(Clone)]
#[must_use = "Transport stays open until closed explicitly or its router is closed"]
pub struct WebRtcTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("base", &self.inner.base)
            .field("ice_role", &self.inner.ice_role)
            .field("ice_state", &self.inner.ice_state)
            .field("dtls_state", &self.inner.dtls_state)
            .finish()
    }
}

impl TransportBaseAccess for WebRtcTransport {
    fn base(&self) -> &Arc<TransportBase> {
        &self.inner.base
    }
}

impl Transport for WebRtcTransport {}

impl WebRtcTransport {
    pub(crate) fn new(base: Arc<TransportBase>, data: WebRtcTransportData) -> Self {
        let inner = Arc::new(Inner {
            base,
            ice_role: data.ice_role,
            ice_parameters: Mutex::new(data.ice_parameters),
            ice_candidates: data.ice_candidates,
            ice_state: Mutex::new(data.ice_state),
            ice_selected_tuple: Mutex::new(data.ice_selected_tuple),
            dtls_parameters: Mutex::new(data.dtls_parameters),
            dtls_state: Mutex::new(data.dtls_state),
            dtls_remote_cert: Mutex::default(),
            hub: EventHub::default(),
            observer: EventHub::default(),
        });

        let subscription_handler = {
            let inner_weak = Arc::downgrade(&inner);

            inner
                .base
                .channel()
                .subscribe_to_notifications(inner.base.id().into(), move |notification| {
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
        inner.base.set_subscription_handler(subscription_handler);

        inner
            .base
            .on_private_close({
                let inner_weak = Arc::downgrade(&inner);

                move || {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.closed();
                    }
                }
            })
            .detach();

        Self { inner }
    }

    /// Local ICE role. Due to the ICE Lite design, this is always `Controlled`.
    #[must_use]
    pub fn ice_role(&self) -> IceRole {
        self.inner.ice_role
    }

    /// Local ICE parameters.
    #[must_use]
    pub fn ice_parameters(&self) -> IceParameters {
        self.inner.ice_parameters.lock().clone()
    }

    /// Local ICE candidates.
    #[must_use]
    pub fn ice_candidates(&self) -> &Vec<IceCandidate> {
        &self.inner.ice_candidates
    }

    /// Current ICE state.
    #[must_use]
    pub fn ice_state(&self) -> IceState {
        *self.inner.ice_state.lock()
    }

    /// The selected transport tuple if ICE is in `Connected` or `Completed` state.
    #[must_use]
    pub fn ice_selected_tuple(&self) -> Option<TransportTuple> {
        self.inner.ice_selected_tuple.lock().clone()
    }

    /// Local DTLS parameters.
    #[must_use]
    pub fn dtls_parameters(&self) -> DtlsParameters {
        self.inner.dtls_parameters.lock().clone()
    }

    /// Current DTLS state.
    #[must_use]
    pub fn dtls_state(&self) -> DtlsState {
        *self.inner.dtls_state.lock()
    }

    /// The remote certificate in PEM format, set once DTLS is connected.
    #[must_use]
    pub fn dtls_remote_cert(&self) -> Option<String> {
        self.inner.dtls_remote_cert.lock().clone()
    }

    /// Provide the transport remote parameters.
    pub async fn connect(
        &self,
        remote_parameters: WebRtcTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let base = &self.inner.base;
        let _command_guard = base.command_lock().lock().await;

        let response = base
            .request(TransportConnectWebRtcRequest {
                dtls_parameters: remote_parameters.dtls_parameters,
            })
            .await?;

        self.inner.dtls_parameters.lock().role = response.dtls_local_role;

        Ok(())
    }

    /// Restarts the ICE layer by generating new local ICE parameters that must be signaled to
    /// the remote endpoint.
    pub async fn restart_ice(&self) -> Result<IceParameters, RequestError> {
        debug!("restart_ice()");

        let base = &self.inner.base;
        let _command_guard = base.command_lock().lock().await;

        let response = base.request(TransportRestartIceRequest {}).await?;

        *self.inner.ice_parameters.lock() = response.ice_parameters.clone();

        Ok(response.ice_parameters)
    }

    /// Callback is called when the transport ICE state changes.
    pub fn on_ice_state_change<F: Fn(IceState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .ice_state_change
            .add(Arc::new(callback))
    }

    /// Callback is called after ICE state becomes `Completed` and when the ICE selected tuple
    /// changes.
    pub fn on_ice_selected_tuple_change<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .ice_selected_tuple_change
            .add(Arc::new(callback))
    }

    /// Callback is called when the transport DTLS state changes.
    pub fn on_dtls_state_change<F: Fn(DtlsState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .hub
            .handlers()
            .dtls_state_change
            .add(Arc::new(callback))
    }

    /// Callback is called when the transport SCTP state changes.
    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.base.on_sctp_state_change(callback)
    }

    /// Callback is called when the WebRTC server this transport listens through is closed. The
    /// transport itself is also closed.
    pub fn on_webrtc_server_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.base.on_listen_server_close(callback)
    }

    /// Observer of this transport.
    #[must_use]
    pub fn observer(&self) -> WebRtcTransportObserver {
        WebRtcTransportObserver {
            inner: Arc::clone(&self.inner),
            transport: Transport::observer(self),
        }
    }

    /// Downgrade `WebRtcTransport` to [`WeakWebRtcTransport`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakWebRtcTransport {
        WeakWebRtcTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Observer of a [`WebRtcTransport`], extends [`TransportObserver`] with ICE and DTLS events.
#[derive(Clone)]
pub struct WebRtcTransportObserver {
    inner: Arc<Inner>,
    transport: TransportObserver,
}

impl fmt::Debug for WebRtcTransportObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransportObserver")
            .field("transport", &self.transport)
            .finish()
    }
}

impl Deref for WebRtcTransportObserver {
    type Target = TransportObserver;

    fn deref(&self) -> &Self::Target {
        &self.transport
    }
}

impl WebRtcTransportObserver {
    /// Callback is called when the transport ICE state changes.
    pub fn on_ice_state_change<F: Fn(IceState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .ice_state_change
            .add(Arc::new(callback))
    }

    /// Callback is called when the ICE selected tuple changes.
    pub fn on_ice_selected_tuple_change<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .ice_selected_tuple_change
            .add(Arc::new(callback))
    }

    /// Callback is called when the transport DTLS state changes.
    pub fn on_dtls_state_change<F: Fn(DtlsState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .dtls_state_change
            .add(Arc::new(callback))
    }
}

/// [`WeakWebRtcTransport`] doesn't own the transport and can be upgraded back while the
/// transport is alive.
#[derive(Clone)]
pub struct WeakWebRtcTransport {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakWebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakWebRtcTransport").finish()
    }
}

impl WeakWebRtcTransport {
    /// Attempts to upgrade `WeakWebRtcTransport` to [`WebRtcTransport`] if the last instance
    /// wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<WebRtcTransport> {
        let inner = self.inner.upgrade()?;

        Some(WebRtcTransport { inner })
    }
}
