#[cfg(test)]
mod tests;

use crate::messages::{Notification, Request};
use crate::worker::common::{SubscriptionHandler, SubscriptionTable, SubscriptionTarget};
use async_executor::Executor;
use futures_lite::future;
use log::{debug, error, trace, warn};
use nohash_hasher::IntMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Bidirectional message link to the media engine.
///
/// Each message is a complete JSON document (or a log line starting with `D`, `W`, `E` or `X`),
/// framing on the actual pipe is up to whoever owns it.
#[derive(Debug, Clone)]
pub struct EngineLink {
    /// Messages from this process to the engine.
    pub sender: async_channel::Sender<Vec<u8>>,
    /// Messages from the engine to this process.
    pub receiver: async_channel::Receiver<Vec<u8>>,
}

impl EngineLink {
    /// Create link from a pair of message channels.
    pub fn new(
        sender: async_channel::Sender<Vec<u8>>,
        receiver: async_channel::Receiver<Vec<u8>>,
    ) -> Self {
        Self { sender, receiver }
    }
}

/// Error that caused request to the engine to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Channel already closed.
    #[error("Channel already closed")]
    ChannelClosed,
    /// Request timed out.
    #[error("Request timed out")]
    TimedOut,
    /// Engine rejected the request, reason is passed through verbatim.
    #[error("Received response error: {reason}")]
    Response {
        /// Error reason.
        reason: String,
    },
    /// Failed to parse response from engine.
    #[error("Failed to parse response from engine: {error}")]
    FailedToParse {
        /// Error message.
        error: String,
    },
    /// Engine did not return any data in response.
    #[error("Engine did not return any data in response")]
    NoData,
    /// Entity this request targets is already closed, any result is discarded.
    #[error("Entity is already closed")]
    EntityClosed,
    /// Operation is not supported by this kind of entity.
    #[error("Operation is not supported: {0}")]
    Unsupported(&'static str),
}

/// Error that caused notification to the engine to fail.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum NotificationError {
    /// Channel already closed.
    #[error("Channel already closed")]
    ChannelClosed,
    /// Entity this notification is sent from is already closed.
    #[error("Entity is already closed")]
    EntityClosed,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChannelReceiveMessage {
    #[serde(rename_all = "camelCase")]
    Notification {
        target_id: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
    ResponseSuccess {
        id: u32,
        #[allow(dead_code)]
        accepted: bool,
        #[serde(default)]
        data: Option<Value>,
    },
    ResponseError {
        id: u32,
        #[allow(dead_code)]
        #[serde(default)]
        error: Value,
        reason: String,
    },
}

enum EngineMessage {
    Json(ChannelReceiveMessage),
    Debug(String),
    Warn(String),
    Error(String),
    Dump(String),
    Unexpected(Vec<u8>),
}

fn deserialize_message(bytes: &[u8]) -> EngineMessage {
    let text = || String::from_utf8_lossy(&bytes[1..]).into_owned();

    match bytes.first() {
        Some(b'{') => match serde_json::from_slice(bytes) {
            Ok(message) => EngineMessage::Json(message),
            Err(error) => {
                warn!("failed to parse engine message: {}", error);
                EngineMessage::Unexpected(Vec::from(bytes))
            }
        },
        Some(b'D') => EngineMessage::Debug(text()),
        Some(b'W') => EngineMessage::Warn(text()),
        Some(b'E') => EngineMessage::Error(text()),
        Some(b'X') => EngineMessage::Dump(text()),
        _ => EngineMessage::Unexpected(Vec::from(bytes)),
    }
}

/// Notification from the engine that doesn't match what the addressed entity expects.
#[derive(Debug, Error)]
#[error("Failed to parse \"{event}\" notification: {error}")]
pub(crate) struct NotificationParseError {
    event: String,
    error: serde_json::Error,
}

/// Message an entity subscription receives from the engine.
#[derive(Debug, Clone)]
pub(crate) struct NotificationMessage {
    pub(crate) event: String,
    pub(crate) data: Value,
}

impl NotificationMessage {
    /// Parses into an enum tagged with `event` and carrying `data` as content.
    pub(crate) fn parse<T: DeserializeOwned>(self) -> Result<T, NotificationParseError> {
        let Self { event, data } = self;
        let mut object = serde_json::Map::with_capacity(2);
        object.insert("event".to_string(), Value::String(event.clone()));
        if !data.is_null() {
            object.insert("data".to_string(), data);
        }

        serde_json::from_value(Value::Object(object))
            .map_err(|error| NotificationParseError { event, error })
    }
}

#[derive(Default)]
struct RequestsContainer {
    next_id: u32,
    handlers: IntMap<u32, async_oneshot::Sender<Result<Option<Value>, String>>>,
}

struct Inner {
    sender: async_channel::Sender<Vec<u8>>,
    requests_container: Arc<Mutex<RequestsContainer>>,
    subscriptions: SubscriptionTable<NotificationMessage>,
    request_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sender.close();
        self.subscriptions.clear();
    }
}

/// Request/response channel to the engine with notification routing.
#[derive(Clone)]
pub(crate) struct Channel {
    inner: Arc<Inner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("request_timeout", &self.inner.request_timeout)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Channel {
    pub(super) fn new(
        executor: &Executor<'static>,
        link: EngineLink,
        request_timeout: Duration,
    ) -> Self {
        let requests_container = Arc::<Mutex<RequestsContainer>>::default();
        let subscriptions = SubscriptionTable::<NotificationMessage>::default();
        let closed = Arc::new(AtomicBool::new(false));
        let EngineLink { sender, receiver } = link;

        executor
            .spawn({
                let requests_container = Arc::clone(&requests_container);
                let subscriptions = subscriptions.clone();
                let closed = Arc::clone(&closed);

                async move {
                    while let Ok(bytes) = receiver.recv().await {
                        trace!("received raw message: {}", String::from_utf8_lossy(&bytes));

                        match deserialize_message(&bytes) {
                            EngineMessage::Json(ChannelReceiveMessage::ResponseSuccess {
                                id,
                                data,
                                ..
                            }) => {
                                let sender = requests_container.lock().handlers.remove(&id);
                                match sender {
                                    Some(mut sender) => {
                                        let _ = sender.send(Ok(data));
                                    }
                                    None => {
                                        warn!(
                                            "received success response does not match any sent request [id:{}]",
                                            id,
                                        );
                                    }
                                }
                            }
                            EngineMessage::Json(ChannelReceiveMessage::ResponseError {
                                id,
                                reason,
                                ..
                            }) => {
                                let sender = requests_container.lock().handlers.remove(&id);
                                match sender {
                                    Some(mut sender) => {
                                        let _ = sender.send(Err(reason));
                                    }
                                    None => {
                                        warn!(
                                            "received error response does not match any sent request [id:{}]",
                                            id,
                                        );
                                    }
                                }
                            }
                            EngineMessage::Json(ChannelReceiveMessage::Notification {
                                target_id,
                                event,
                                data,
                            }) => match Uuid::parse_str(&target_id) {
                                Ok(uuid) => {
                                    let target = SubscriptionTarget::Uuid(uuid);
                                    if !subscriptions
                                        .dispatch(&target, NotificationMessage { event, data })
                                    {
                                        debug!(
                                            "notification for unknown target [targetId:{}]",
                                            target_id,
                                        );
                                    }
                                }
                                Err(error) => {
                                    warn!(
                                        "notification with bad target id {}: {}",
                                        target_id, error,
                                    );
                                }
                            },
                            EngineMessage::Debug(text) => debug!("[engine] {}", text),
                            EngineMessage::Warn(text) => warn!("[engine] {}", text),
                            EngineMessage::Error(text) => error!("[engine] {}", text),
                            EngineMessage::Dump(text) => debug!("[engine dump] {}", text),
                            EngineMessage::Unexpected(data) => {
                                error!(
                                    "unexpected engine message: {}",
                                    String::from_utf8_lossy(&data),
                                );
                            }
                        }
                    }

                    debug!("engine link closed");

                    closed.store(true, Ordering::SeqCst);
                    // Dropping senders wakes up every pending request with `ChannelClosed`
                    let pending = std::mem::take(&mut requests_container.lock().handlers);
                    drop(pending);
                }
            })
            .detach();

        let inner = Arc::new(Inner {
            sender,
            requests_container,
            subscriptions,
            request_timeout,
            closed,
        });

        Self { inner }
    }

    pub(crate) fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.sender.close();
            let pending = std::mem::take(&mut self.inner.requests_container.lock().handlers);
            drop(pending);
        }
    }

    pub(crate) async fn request<R, HandlerId>(
        &self,
        handler_id: HandlerId,
        request: R,
    ) -> Result<R::Response, RequestError>
    where
        R: Request,
        HandlerId: fmt::Display,
    {
        let method = request.as_method();
        let data = serde_json::to_value(&request).map_err(|error| {
            RequestError::FailedToParse {
                error: error.to_string(),
            }
        })?;

        match self
            .request_internal(method, handler_id.to_string(), data)
            .await?
        {
            Some(data) => {
                serde_json::from_value(data).map_err(|error| RequestError::FailedToParse {
                    error: error.to_string(),
                })
            }
            // Works for `()` and optional responses
            None => serde_json::from_value(Value::Null).map_err(|_| RequestError::NoData),
        }
    }

    /// Like [`Channel::request`], but refuses to send for a closed entity and discards the result
    /// if the entity closed while the request was in flight.
    pub(crate) async fn request_while_open<R, HandlerId>(
        &self,
        closed: &AtomicBool,
        handler_id: HandlerId,
        request: R,
    ) -> Result<R::Response, RequestError>
    where
        R: Request,
        HandlerId: fmt::Display,
    {
        if closed.load(Ordering::SeqCst) {
            return Err(RequestError::EntityClosed);
        }

        let result = self.request(handler_id, request).await;

        if closed.load(Ordering::SeqCst) {
            debug!("entity closed while request was in flight, discarding result");

            return Err(RequestError::EntityClosed);
        }

        result
    }

    pub(crate) fn notify<N, HandlerId>(
        &self,
        handler_id: HandlerId,
        notification: N,
    ) -> Result<(), NotificationError>
    where
        N: Notification,
        HandlerId: fmt::Display,
    {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct NotificationMessagePrivate<'a, N> {
            event: &'static str,
            handler_id: String,
            data: &'a N,
        }

        let message = serde_json::to_vec(&NotificationMessagePrivate {
            event: notification.as_event(),
            handler_id: handler_id.to_string(),
            data: &notification,
        })
        .map_err(|error| {
            error!("failed to serialize notification: {}", error);
            NotificationError::ChannelClosed
        })?;

        self.inner
            .sender
            .try_send(message)
            .map_err(|_| NotificationError::ChannelClosed)
    }

    pub(crate) fn subscribe_to_notifications<F>(
        &self,
        target: SubscriptionTarget,
        callback: F,
    ) -> SubscriptionHandler
    where
        F: Fn(NotificationMessage) + Send + Sync + 'static,
    {
        self.inner.subscriptions.add(target, Arc::new(callback))
    }

    /// Non-generic method to avoid significant duplication in final binary
    async fn request_internal(
        &self,
        method: &'static str,
        handler_id: String,
        data: Value,
    ) -> Result<Option<Value>, RequestError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RequestMessagePrivate<'a> {
            id: u32,
            method: &'static str,
            handler_id: &'a str,
            data: Value,
        }

        if self.closed() {
            return Err(RequestError::ChannelClosed);
        }

        let id;
        let queue_len;
        let (result_sender, result_receiver) = async_oneshot::oneshot();

        {
            let mut requests_container = self.inner.requests_container.lock();

            id = requests_container.next_id;
            queue_len = requests_container.handlers.len();

            requests_container.next_id = requests_container.next_id.wrapping_add(1);
        }

        debug!("request() [method:{}, id:{}]", method, id);

        let serialized_message = serde_json::to_vec(&RequestMessagePrivate {
            id,
            method,
            handler_id: &handler_id,
            data,
        })
        .map_err(|error| RequestError::FailedToParse {
            error: error.to_string(),
        })?;

        // Registered only once there is something to send
        self.inner
            .requests_container
            .lock()
            .handlers
            .insert(id, result_sender);

        if self.inner.sender.send(serialized_message).await.is_err() {
            self.inner.requests_container.lock().handlers.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        let timeout = self.inner.request_timeout + Duration::from_millis(100) * queue_len as u32;
        let requests_container = &self.inner.requests_container;

        let result = future::or(
            async move {
                result_receiver
                    .await
                    .map_err(|_| RequestError::ChannelClosed)
            },
            async move {
                async_io::Timer::after(timeout).await;

                requests_container.lock().handlers.remove(&id);

                Err(RequestError::TimedOut)
            },
        )
        .await?;

        match result {
            Ok(data) => {
                debug!("request succeeded [method:{}, id:{}]", method, id);

                Ok(data)
            }
            Err(reason) => {
                debug!("request failed [method:{}, id:{}]: {}", method, id, reason);

                Err(RequestError::Response { reason })
            }
        }
    }
}
