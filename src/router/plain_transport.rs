
use crate::data_structures::{AppData, ListenInfo, ListenIp, SctpState, TransportTuple};
use crate::event_hub::EventHub;
use crate::messages::{PlainTransportData, TransportConnectPlainRequest};
use crate::sctp_parameters::NumSctpStreams;
use crate::srtp_parameters::{SrtpCryptoSuite, SrtpParameters};
use crate::transport::{
    Transport, TransportBase, TransportBaseAccess, TransportObserver, TransportTraceEventData,
};
use crate::worker::RequestError;
use event_listener_primitives::{Bag, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Listen configuration in the shape it comes from configuration files, where either the
/// `listen_info` or the legacy `listen_ip` form may be present.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainTransportListenConfig {
    /// Listening info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_info: Option<ListenInfo>,
    /// Optional listening info for RTCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp_listen_info: Option<ListenInfo>,
    /// Legacy listening IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_ip: Option<ListenIp>,
    /// Legacy fixed port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Plain transport listen configuration is ambiguous or missing.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum PlainTransportListenError {
    /// Both `listen_info` and `listen_ip` were given.
    #[error("Only one of listen_info and listen_ip may be given")]
    Both,
    /// Neither `listen_info` nor `listen_ip` was given.
    #[error("One of listen_info and listen_ip must be given")]
    Neither,
}

/// Where a [`PlainTransport`] listens.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(try_from = "PlainTransportListenConfig")]
pub enum PlainTransportListen {
    /// Listening info with optional separate RTCP listening info.
    Info {
        /// Listening info.
        listen_info: ListenInfo,
        /// Optional listening info for RTCP.
        rtcp_listen_info: Option<ListenInfo>,
    },
    /// Legacy listening IP over UDP.
    Ip {
        /// Listening IP.
        listen_ip: ListenIp,
        /// Fixed port, random one if not given.
        port: Option<u16>,
    },
}

impl TryFrom<PlainTransportListenConfig> for PlainTransportListen {
    type Error = PlainTransportListenError;

    fn try_from(config: PlainTransportListenConfig) -> Result<Self, Self::Error> {
        match (config.listen_info, config.listen_ip) {
            (Some(_), Some(_)) => Err(PlainTransportListenError::Both),
            (None, None) => Err(PlainTransportListenError::Neither),
            (Some(listen_info), None) => Ok(Self::Info {
                listen_info,
                rtcp_listen_info: config.rtcp_listen_info,
            }),
            (None, Some(listen_ip)) => Ok(Self::Ip {
                listen_ip,
                port: config.port,
            }),
        }
    }
}

impl PlainTransportListen {
    pub(crate) fn into_listen_infos(self) -> (ListenInfo, Option<ListenInfo>) {
        match self {
            Self::Info {
                listen_info,
                rtcp_listen_info,
            } => (listen_info, rtcp_listen_info),
            Self::Ip { listen_ip, port } => (listen_ip.into_listen_info(port), None),
        }
    }
}

/// [`PlainTransport`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PlainTransportOptions {
    /// Where to listen.
    pub listen: PlainTransportListen,
    /// Use RTCP-mux (RTP and RTCP in the same port). Default true.
    pub rtcp_mux: bool,
    /// Whether remote IP:port should be auto-detected based on first RTP/RTCP packet received.
    /// If enabled, connect() method must not be called unless SRTP is enabled. Default false.
    pub comedia: bool,
    /// Create a SCTP association. Default false.
    pub enable_sctp: bool,
    /// SCTP streams number.
    pub num_sctp_streams: NumSctpStreams,
    /// Maximum allowed size for SCTP messages sent by DataProducers. Default 262144.
    pub max_sctp_message_size: u32,
    /// Maximum SCTP send buffer used by DataConsumers. Default 262144.
    pub sctp_send_buffer_size: u32,
    /// Enable SRTP. Default false.
    pub enable_srtp: bool,
    /// The SRTP crypto suite to be used if `enable_srtp` is set.
    pub srtp_crypto_suite: SrtpCryptoSuite,
    /// Custom application data.
    pub app_data: AppData,
}

impl PlainTransportOptions {
    /// Options listening on given listen info.
    #[must_use]
    pub fn new(listen_info: ListenInfo) -> Self {
        Self::with_listen(PlainTransportListen::Info {
            listen_info,
            rtcp_listen_info: None,
        })
    }

    /// Options with explicit listen configuration.
    #[must_use]
    pub fn with_listen(listen: PlainTransportListen) -> Self {
        Self {
            listen,
            rtcp_mux: true,
            comedia: false,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            enable_srtp: false,
            srtp_crypto_suite: SrtpCryptoSuite::default(),
            app_data: AppData::default(),
        }
    }
}

/// Remote parameters for [`PlainTransport::connect`].
#[derive(Debug, Default, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct PlainTransportRemoteParameters {
    /// Remote IPv4 or IPv6. Required if `comedia` is not set.
    pub ip: Option<IpAddr>,
    /// Remote port. Required if `comedia` is not set.
    pub port: Option<u16>,
    /// Remote RTCP port. Required if `comedia` is not set and RTCP-mux is not enabled.
    pub rtcp_port: Option<u16>,
    /// SRTP parameters used by the remote endpoint to encrypt its RTP and RTCP. The SRTP
    /// crypto suite of the local `srtp_parameters` gets also updated after connect() resolves.
    /// Required if `enable_srtp` was set.
    pub srtp_parameters: Option<SrtpParameters>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    tuple: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
    rtcp_tuple: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Tuple {
        tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    RtcpTuple {
        rtcp_tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange {
        sctp_state: SctpState,
    },
    Trace(TransportTraceEventData),
}

struct Inner {
    base: Arc<TransportBase>,
    rtcp_mux: bool,
    comedia: bool,
    tuple: Mutex<TransportTuple>,
    rtcp_tuple: Mutex<Option<TransportTuple>>,
    srtp_parameters: Mutex<Option<SrtpParameters>>,
    hub: EventHub<Handlers>,
    observer: EventHub<Handlers>,
}

impl Inner {
    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::Tuple { tuple } => {
                *self.tuple.lock() = tuple.clone();

                for hub in [&self.hub, &self.observer] {
                    hub.emit(|handlers| handlers.tuple.call_simple(&tuple));
                }
            }
            Notification::RtcpTuple { rtcp_tuple } => {
                self.rtcp_tuple.lock().replace(rtcp_tuple.clone());

                for hub in [&self.hub, &self.observer] {
                    hub.emit(|handlers| handlers.rtcp_tuple.call_simple(&rtcp_tuple));
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
}

/// A plain transport represents a network path through which RTP, RTCP (optionally secured with
/// SRTP) and SCTP (DataChannel) is transmitted.
#[derive(Clone)]
#[must_use = "Transport stays open until closed explicitly or its router is closed"]
pub struct PlainTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTransport")
            .field("base", &self.inner.base)
            .field("rtcp_mux", &self.inner.rtcp_mux)
            .field("comedia", &self.inner.comedia)
            .field("tuple", &self.inner.tuple)
            .finish()
    }
}

impl TransportBaseAccess for PlainTransport {
    fn base(&self) -> &Arc<TransportBase> {
        &self.inner.base
    }
}

impl Transport for PlainTransport {}

impl PlainTransport {
    pub(crate) fn new(base: Arc<TransportBase>, data: PlainTransportData) -> Self {
        let inner = Arc::new(Inner {
            base,
            rtcp_mux: data.rtcp_mux,
            comedia: data.comedia,
            tuple: Mutex::new(data.tuple),
            rtcp_tuple: Mutex::new(data.rtcp_tuple),
            srtp_parameters: Mutex::new(data.srtp_parameters),
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
                        inner.hub.tear_down(|_| {});
                        inner.observer.tear_down(|_| {});
                    }
                }
            })
            .detach();

        Self { inner }
    }

    /// Whether RTCP-mux is used.
    #[must_use]
    pub fn rtcp_mux(&self) -> bool {
        self.inner.rtcp_mux
    }

    /// Whether remote address is detected from the first received packet.
    #[must_use]
    pub fn comedia(&self) -> bool {
        self.inner.comedia
    }

    /// The transport tuple. If RTCP-mux is enabled, this tuple refers to both RTP and RTCP.
    #[must_use]
    pub fn tuple(&self) -> TransportTuple {
        self.inner.tuple.lock().clone()
    }

    /// The transport tuple for RTCP. If RTCP-mux is enabled, its value is `None`.
    #[must_use]
    pub fn rtcp_tuple(&self) -> Option<TransportTuple> {
        self.inner.rtcp_tuple.lock().clone()
    }

    /// Local SRTP parameters representing the crypto suite and key material used to encrypt
    /// sending RTP and SRTP. `None` unless SRTP is enabled.
    #[must_use]
    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.srtp_parameters.lock().clone()
    }

    /// Provide the plain transport remote parameters.
    pub async fn connect(
        &self,
        remote_parameters: PlainTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let base = &self.inner.base;
        let _command_guard = base.command_lock().lock().await;

        let response = base
            .request(TransportConnectPlainRequest {
                ip: remote_parameters.ip,
                port: remote_parameters.port,
                rtcp_port: remote_parameters.rtcp_port,
                srtp_parameters: remote_parameters.srtp_parameters,
            })
            .await?;

        if let Some(tuple) = response.tuple {
            *self.inner.tuple.lock() = tuple;
        }
        if let Some(rtcp_tuple) = response.rtcp_tuple {
            self.inner.rtcp_tuple.lock().replace(rtcp_tuple);
        }
        if let Some(srtp_parameters) = response.srtp_parameters {
            self.inner.srtp_parameters.lock().replace(srtp_parameters);
        }

        Ok(())
    }

    /// Callback is called after the remote RTP origin has been discovered. Only if `comedia`
    /// mode was set.
    pub fn on_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.hub.handlers().tuple.add(Arc::new(callback))
    }

    /// Callback is called after the remote RTCP origin has been discovered. Only if `comedia`
    /// mode was set and `rtcp_mux` was not.
    pub fn on_rtcp_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.hub.handlers().rtcp_tuple.add(Arc::new(callback))
    }

    /// Callback is called when the transport SCTP state changes.
    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.base.on_sctp_state_change(callback)
    }

    /// Observer of this transport.
    #[must_use]
    pub fn observer(&self) -> PlainTransportObserver {
        PlainTransportObserver {
            inner: Arc::clone(&self.inner),
            transport: Transport::observer(self),
        }
    }

    /// Downgrade `PlainTransport` to [`WeakPlainTransport`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakPlainTransport {
        WeakPlainTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Observer of a [`PlainTransport`], extends [`TransportObserver`] with tuple events.
#[derive(Clone)]
pub struct PlainTransportObserver {
    inner: Arc<Inner>,
    transport: TransportObserver,
}

impl fmt::Debug for PlainTransportObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTransportObserver")
            .field("transport", &self.transport)
            .finish()
    }
}

impl Deref for PlainTransportObserver {
    type Target = TransportObserver;

    fn deref(&self) -> &Self::Target {
        &self.transport
    }
}

impl PlainTransportObserver {
    /// Callback is called after the remote RTP origin has been discovered.
    pub fn on_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.observer.handlers().tuple.add(Arc::new(callback))
    }

    /// Callback is called after the remote RTCP origin has been discovered.
    pub fn on_rtcp_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .observer
            .handlers()
            .rtcp_tuple
            .add(Arc::new(callback))
    }
}

/// [`WeakPlainTransport`] doesn't own the transport and can be upgraded back while the
/// transport is alive.
#[derive(Clone)]
pub struct WeakPlainTransport {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakPlainTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPlainTransport").finish()
    }
}

impl WeakPlainTransport {
    /// Attempts to upgrade `WeakPlainTransport` to [`PlainTransport`] if the last instance
    /// wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<PlainTransport> {
        let inner = self.inner.upgrade()?;

        Some(PlainTransport { inner })
    }
}
