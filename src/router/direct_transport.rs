
use crate::data_structures::AppData;
use crate::event_hub::EventHub;
use crate::messages::TransportSendRtcpNotification;
use crate::transport::{Transport, TransportBase, TransportBaseAccess, TransportTraceEventData};
use crate::worker::{NotificationError, RequestError};
use bytes::Bytes;
use event_listener_primitives::{Bag, HandlerId};
use log::error;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// [`DirectTransport`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DirectTransportOptions {
    /// Maximum allowed size for direct messages sent from DataProducers. Default 262144.
    pub max_message_size: u32,
    /// Custom application data.
    pub app_data: AppData,
}

impl Default for DirectTransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: 262_144,
            app_data: AppData::default(),
        }
    }
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    rtcp: Bag<Arc<dyn Fn(&Bytes) + Send + Sync>, Bytes>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    Rtcp { rtcp_packet: Vec<u8> },
    Trace(TransportTraceEventData),
}

struct Inner {
    base: Arc<TransportBase>,
    hub: EventHub<Handlers>,
}

/// A direct transport represents a direct connection between the application and the router.
/// RTP, RTCP and data messages are sent and received in-process instead of over the network.
///
/// Direct transports do not support bitrate limits, they are rejected with
/// [`RequestError::Unsupported`].
#[derive(Clone)]
#[must_use = "Transport stays open until closed explicitly or its router is closed"]
pub struct DirectTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectTransport")
            .field("base", &self.inner.base)
            .finish()
    }
}

impl TransportBaseAccess for DirectTransport {
    fn base(&self) -> &Arc<TransportBase> {
        &self.inner.base
    }
}

impl Transport for DirectTransport {}

impl DirectTransport {
    pub(crate) fn new(base: Arc<TransportBase>) -> Self {
        let inner = Arc::new(Inner {
            base,
            hub: EventHub::default(),
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
                        Ok(Notification::Rtcp { rtcp_packet }) => {
                            let rtcp_packet = Bytes::from(rtcp_packet);
                            inner
                                .hub
                                .emit(|handlers| handlers.rtcp.call_simple(&rtcp_packet));
                        }
                        Ok(Notification::Trace(trace_event_data)) => {
                            inner.base.traced(&trace_event_data);
                        }
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
                    }
                }
            })
            .detach();

        Self { inner }
    }

    /// Direct transports need no remote parameters, connecting always succeeds.
    pub async fn connect(&self) -> Result<(), RequestError> {
        Ok(())
    }

    /// Send a RTCP packet from the application.
    pub fn send_rtcp(&self, rtcp_packet: Bytes) -> Result<(), NotificationError> {
        let base = &self.inner.base;
        if base.closed() {
            return Err(NotificationError::EntityClosed);
        }

        base.channel().notify(
            base.id(),
            TransportSendRtcpNotification {
                rtcp_packet: rtcp_packet.to_vec(),
            },
        )
    }

    /// Callback is called when the direct transport receives a RTCP packet from its router.
    pub fn on_rtcp<F: Fn(&Bytes) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.hub.handlers().rtcp.add(Arc::new(callback))
    }

    /// Downgrade `DirectTransport` to [`WeakDirectTransport`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakDirectTransport {
        WeakDirectTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// [`WeakDirectTransport`] doesn't own the transport and can be upgraded back while the
/// transport is alive.
#[derive(Clone)]
pub struct WeakDirectTransport {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakDirectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDirectTransport").finish()
    }
}

impl WeakDirectTransport {
    /// Attempts to upgrade `WeakDirectTransport` to [`DirectTransport`] if the last instance
    /// wasn't dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<DirectTransport> {
        let inner = self.inner.upgrade()?;

        Some(DirectTransport { inner })
    }
}
