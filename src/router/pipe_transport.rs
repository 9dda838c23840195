#[cfg(test)]
mod tests;

use crate::data_structures::{AppData, ListenInfo, SctpState, TransportTuple};
use crate::messages::{PipeTransportData, TransportConnectPipeRequest};
use crate::sctp_parameters::NumSctpStreams;
use crate::srtp_parameters::SrtpParameters;
use crate::transport::{Transport, TransportBase, TransportBaseAccess, TransportTraceEventData};
use crate::worker::RequestError;
use event_listener_primitives::HandlerId;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Weak};

/// [`PipeTransport`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PipeTransportOptions {
    /// Listening info.
    pub listen_info: ListenInfo,
    /// Create a SCTP association. Default false.
    pub enable_sctp: bool,
    /// SCTP streams number.
    pub num_sctp_streams: NumSctpStreams,
    /// Maximum allowed size for SCTP messages sent by DataProducers. Default 268435456.
    pub max_sctp_message_size: u32,
    /// Maximum SCTP send buffer used by DataConsumers. Default 268435456.
    pub sctp_send_buffer_size: u32,
    /// Enable RTX and NACK for RTP retransmission. Useful if both pipe transports run in
    /// different hosts. If enabled, the paired pipe transport must also enable this setting.
    /// Default false.
    pub enable_rtx: bool,
    /// Enable SRTP. If enabled, the paired pipe transport must also enable this setting.
    /// Default false.
    pub enable_srtp: bool,
    /// Custom application data.
    pub app_data: AppData,
}

impl PipeTransportOptions {
    /// Options listening on given listen info.
    #[must_use]
    pub fn new(listen_info: ListenInfo) -> Self {
        Self {
            listen_info,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 268_435_456,
            sctp_send_buffer_size: 268_435_456,
            enable_rtx: false,
            enable_srtp: false,
            app_data: AppData::default(),
        }
    }
}

/// Remote parameters for [`PipeTransport::connect`].
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct PipeTransportRemoteParameters {
    /// Remote IPv4 or IPv6.
    pub ip: IpAddr,
    /// Remote port.
    pub port: u16,
    /// SRTP parameters used by the paired pipe transport to encrypt its RTP and RTCP.
    pub srtp_parameters: Option<SrtpParameters>,
}

impl PipeTransportRemoteParameters {
    /// Remote parameters without SRTP.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            srtp_parameters: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    SctpStateChange { sctp_state: SctpState },
    Trace(TransportTraceEventData),
}

struct Inner {
    base: Arc<TransportBase>,
    tuple: Mutex<TransportTuple>,
    rtx: bool,
    srtp_parameters: Option<SrtpParameters>,
}

/// A pipe transport represents a network path through which RTP, RTCP (optionally secured with
/// SRTP) and SCTP (DataChannel) is transmitted. Pipe transports are intended to interconnect
/// two routers, possibly running in different hosts.
#[derive(Clone)]
#[must_use = "Transport stays open until closed explicitly or its router is closed"]
pub struct PipeTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("base", &self.inner.base)
            .field("tuple", &self.inner.tuple)
            .field("rtx", &self.inner.rtx)
            .finish()
    }
}

impl TransportBaseAccess for PipeTransport {
    fn base(&self) -> &Arc<TransportBase> {
        &self.inner.base
    }
}

impl Transport for PipeTransport {}

impl PipeTransport {
    pub(crate) fn new(base: Arc<TransportBase>, data: PipeTransportData) -> Self {
        let inner = Arc::new(Inner {
            base,
            tuple: Mutex::new(data.tuple),
            rtx: data.rtx,
            srtp_parameters: data.srtp_parameters,
        });

        let subscription_handler = {
            let base_weak = Arc::downgrade(&inner.base);

            inner
                .base
                .channel()
                .subscribe_to_notifications(inner.base.id().into(), move |notification| {
                    let Some(base) = base_weak.upgrade() else {
                        return;
                    };
                    match notification.parse::<Notification>() {
                        Ok(Notification::SctpStateChange { sctp_state }) => {
                            base.sctp_state_changed(sctp_state);
                        }
                        Ok(Notification::Trace(trace_event_data)) => {
                            base.traced(&trace_event_data);
                        }
                        Err(error) => {
                            error!("Failed to parse notification: {}", error);
                        }
                    }
                })
        };
        inner.base.set_subscription_handler(subscription_handler);

        Self { inner }
    }

    /// The transport tuple.
    #[must_use]
    pub fn tuple(&self) -> TransportTuple {
        self.inner.tuple.lock().clone()
    }

    /// Whether RTX is enabled for consumers created on this transport.
    #[must_use]
    pub fn rtx(&self) -> bool {
        self.inner.rtx
    }

    /// Local SRTP parameters, `None` unless SRTP is enabled.
    #[must_use]
    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.srtp_parameters.clone()
    }

    /// Provide the pipe transport remote parameters.
    pub async fn connect(
        &self,
        remote_parameters: PipeTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let base = &self.inner.base;
        let _command_guard = base.command_lock().lock().await;

        let response = base
            .request(TransportConnectPipeRequest {
                ip: remote_parameters.ip,
                port: remote_parameters.port,
                srtp_parameters: remote_parameters.srtp_parameters,
            })
            .await?;

        *self.inner.tuple.lock() = response.tuple;

        Ok(())
    }

    /// Callback is called when the transport SCTP state changes.
    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.base.on_sctp_state_change(callback)
    }

    /// Downgrade `PipeTransport` to [`WeakPipeTransport`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakPipeTransport {
        WeakPipeTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// [`WeakPipeTransport`] doesn't own the transport and can be upgraded back while the transport
/// is alive.
#[derive(Clone)]
pub struct WeakPipeTransport {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakPipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPipeTransport").finish()
    }
}

impl WeakPipeTransport {
    /// Attempts to upgrade `WeakPipeTransport` to [`PipeTransport`] if the last instance wasn't
    /// dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<PipeTransport> {
        let inner = self.inner.upgrade()?;

        Some(PipeTransport { inner })
    }
}
