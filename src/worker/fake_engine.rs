//! Scripted stand-in for the media engine used by unit tests.
//!
//! Answers every command over an [`EngineLink`] with plausible data, remembers what it was asked
//! and lets tests fail or hold chosen methods and inject notifications.

use crate::data_structures::{ListenInfo, Protocol};
use crate::producer::ProducerOptions;
use crate::router::{Router, RouterOptions};
use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpCodecCapability, RtpCodecParameters,
    RtpEncodingParameters, RtpParameters,
};
use crate::worker::{EngineLink, Worker, WorkerSettings};
use crate::worker_manager::WorkerManager;
use futures_lite::future;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request or notification as the engine saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) handler_id: String,
    pub(crate) data: Value,
}

#[derive(Default)]
struct State {
    requests: Vec<RecordedRequest>,
    notifications: Vec<RecordedRequest>,
    failures: HashMap<String, String>,
    overrides: HashMap<String, Value>,
    held_methods: HashSet<String>,
    held: Vec<(u32, RecordedRequest)>,
    transport_kinds: HashMap<String, &'static str>,
    producers: HashMap<String, (Value, bool)>,
    consumers: HashMap<String, Value>,
    data_producers: HashMap<String, Value>,
    data_consumers: HashMap<String, Value>,
    routers: Vec<String>,
    webrtc_servers: Vec<String>,
    next_port: u16,
}

struct Inner {
    state: Mutex<State>,
    to_client: async_channel::Sender<Vec<u8>>,
}

impl Inner {
    fn send(&self, message: &Value) {
        let _ = self.to_client.try_send(message.to_string().into_bytes());
    }

    fn answer(&self, id: u32, result: Result<Option<Value>, String>) {
        match result {
            Ok(Some(data)) => self.send(&json!({ "id": id, "accepted": true, "data": data })),
            Ok(None) => self.send(&json!({ "id": id, "accepted": true })),
            Err(reason) => self.send(&json!({ "id": id, "error": "Error", "reason": reason })),
        }
    }

    fn handle(&self, bytes: &[u8]) {
        let Ok(message) = serde_json::from_slice::<Value>(bytes) else {
            return;
        };
        let handler_id = message["handlerId"].as_str().unwrap_or_default().to_string();
        let data = message.get("data").cloned().unwrap_or(Value::Null);

        match message["id"].as_u64() {
            Some(id) => {
                let id = id as u32;
                let request = RecordedRequest {
                    method: message["method"].as_str().unwrap_or_default().to_string(),
                    handler_id,
                    data,
                };
                let result = {
                    let mut state = self.state.lock();
                    state.requests.push(request.clone());
                    if state.held_methods.contains(&request.method) {
                        state.held.push((id, request));
                        return;
                    }
                    state.respond(&request)
                };
                self.answer(id, result);
            }
            None => {
                self.state.lock().notifications.push(RecordedRequest {
                    method: message["event"].as_str().unwrap_or_default().to_string(),
                    handler_id,
                    data,
                });
            }
        }
    }
}

fn tuple(port: u16) -> Value {
    json!({ "localAddress": "127.0.0.1", "localPort": port, "protocol": "udp" })
}

fn sctp(data: &Value) -> (Value, Value) {
    if data["enableSctp"].as_bool() == Some(true) {
        (
            json!({
                "port": 5000,
                "OS": data["numSctpStreams"]["OS"].clone(),
                "MIS": data["numSctpStreams"]["MIS"].clone(),
                "maxMessageSize": data["maxSctpMessageSize"].clone(),
            }),
            json!("new"),
        )
    } else {
        (Value::Null, Value::Null)
    }
}

impl State {
    fn port(&mut self) -> u16 {
        self.next_port += 1;
        40000 + self.next_port
    }

    fn respond(&mut self, request: &RecordedRequest) -> Result<Option<Value>, String> {
        if let Some(reason) = self.failures.get(&request.method) {
            return Err(reason.clone());
        }
        if let Some(data) = self.overrides.get(&request.method) {
            return Ok(Some(data.clone()));
        }

        let handler_id = request.handler_id.as_str();
        let data = &request.data;
        let id_of = |key: &str| data[key].as_str().unwrap_or_default().to_string();

        let response = match request.method.as_str() {
            "worker.dump" => Some(json!({
                "pid": 0,
                "routerIds": self.routers,
                "webRtcServerIds": self.webrtc_servers,
            })),
            "worker.createRouter" => {
                self.routers.push(id_of("routerId"));
                None
            }
            "worker.closeRouter" => {
                let router_id = id_of("routerId");
                self.routers.retain(|id| *id != router_id);
                None
            }
            "worker.createWebRtcServer" => {
                self.webrtc_servers.push(id_of("webRtcServerId"));
                None
            }
            "worker.closeWebRtcServer" => {
                let webrtc_server_id = id_of("webRtcServerId");
                self.webrtc_servers.retain(|id| *id != webrtc_server_id);
                None
            }
            "webRtcServer.dump" => Some(json!({ "id": handler_id, "webRtcTransportIds": [] })),
            "router.dump" => Some(json!({ "id": handler_id, "transportIds": [] })),
            "router.createWebRtcTransport" => {
                self.transport_kinds.insert(id_of("transportId"), "webrtc");
                let port = self.port();
                let (sctp_parameters, sctp_state) = sctp(data);
                Some(json!({
                    "iceRole": "controlled",
                    "iceParameters": {
                        "usernameFragment": "ufrag0000",
                        "password": "password0000",
                        "iceLite": true,
                    },
                    "iceCandidates": [{
                        "foundation": "udpcandidate",
                        "priority": 1_076_302_079_u32,
                        "address": "127.0.0.1",
                        "protocol": "udp",
                        "port": port,
                        "type": "host",
                    }],
                    "iceState": "new",
                    "dtlsParameters": {
                        "role": "auto",
                        "fingerprints": [{
                            "algorithm": "sha-256",
                            "value": vec!["AB"; 32].join(":"),
                        }],
                    },
                    "dtlsState": "new",
                    "sctpParameters": sctp_parameters,
                    "sctpState": sctp_state,
                }))
            }
            "router.createPlainTransport" => {
                self.transport_kinds.insert(id_of("transportId"), "plain");
                let port = self.port();
                let rtcp_mux = data["rtcpMux"].as_bool().unwrap_or(true);
                let rtcp_tuple = if rtcp_mux {
                    Value::Null
                } else {
                    let rtcp_port = self.port();
                    tuple(rtcp_port)
                };
                let (sctp_parameters, sctp_state) = sctp(data);
                let srtp_parameters = if data["enableSrtp"].as_bool() == Some(true) {
                    json!({
                        "cryptoSuite": data["srtpCryptoSuite"].clone(),
                        "keyBase64": "ZnQ3eWJraDg0d3ZoYzM5cXN1Y2pnaHU5NWxrZTVv",
                    })
                } else {
                    Value::Null
                };
                Some(json!({
                    "rtcpMux": rtcp_mux,
                    "comedia": data["comedia"].as_bool().unwrap_or(false),
                    "tuple": tuple(port),
                    "rtcpTuple": rtcp_tuple,
                    "sctpParameters": sctp_parameters,
                    "sctpState": sctp_state,
                    "srtpParameters": srtp_parameters,
                }))
            }
            "router.createPipeTransport" => {
                self.transport_kinds.insert(id_of("transportId"), "pipe");
                let port = self.port();
                let (sctp_parameters, sctp_state) = sctp(data);
                let srtp_parameters = if data["enableSrtp"].as_bool() == Some(true) {
                    json!({
                        "cryptoSuite": "AEAD_AES_256_GCM",
                        "keyBase64": "YTdjcDBvY2JoMGY5YXNlNDc0eDJsdGgwaWRvNnJsamRrdG4wMmRmM2pmZ2tz",
                    })
                } else {
                    Value::Null
                };
                Some(json!({
                    "tuple": tuple(port),
                    "sctpParameters": sctp_parameters,
                    "sctpState": sctp_state,
                    "rtx": data["enableRtx"].as_bool().unwrap_or(false),
                    "srtpParameters": srtp_parameters,
                }))
            }
            "router.createDirectTransport" => {
                self.transport_kinds.insert(id_of("transportId"), "direct");
                None
            }
            "router.closeTransport" => {
                self.transport_kinds.remove(&id_of("transportId"));
                None
            }
            "transport.connect" => match self.transport_kinds.get(handler_id).copied() {
                Some("webrtc") => Some(json!({ "dtlsLocalRole": "client" })),
                Some("pipe") => Some(json!({
                    "tuple": {
                        "localAddress": "127.0.0.1",
                        "localPort": 40000,
                        "remoteIp": data["ip"].clone(),
                        "remotePort": data["port"].clone(),
                        "protocol": "udp",
                    },
                })),
                _ => {
                    let tuple = match (data.get("ip"), data.get("port")) {
                        (Some(ip), Some(port)) => json!({
                            "localAddress": "127.0.0.1",
                            "localPort": 40000,
                            "remoteIp": ip,
                            "remotePort": port,
                            "protocol": "udp",
                        }),
                        _ => Value::Null,
                    };
                    Some(json!({ "tuple": tuple }))
                }
            },
            "transport.restartIce" => Some(json!({
                "iceParameters": {
                    "usernameFragment": "ufrag1111",
                    "password": "password1111",
                    "iceLite": true,
                },
            })),
            "transport.dump" => Some(json!({ "id": handler_id })),
            "transport.produce" => {
                self.producers.insert(
                    id_of("producerId"),
                    (data["kind"].clone(), data["paused"].as_bool().unwrap_or(false)),
                );
                Some(json!({}))
            }
            "transport.consume" => {
                let producer_paused = self
                    .producers
                    .get(&id_of("producerId"))
                    .map_or(false, |(_, paused)| *paused);
                self.consumers.insert(id_of("consumerId"), data.clone());
                Some(json!({
                    "paused": data["paused"].as_bool().unwrap_or(false),
                    "producerPaused": producer_paused,
                    "score": { "score": 10, "producerScore": 10, "producerScores": [] },
                    "preferredLayers": data.get("preferredLayers").cloned().unwrap_or(Value::Null),
                }))
            }
            "transport.produceData" => {
                self.data_producers
                    .insert(id_of("dataProducerId"), data.clone());
                None
            }
            "transport.consumeData" => {
                self.data_consumers
                    .insert(id_of("dataConsumerId"), data.clone());
                None
            }
            "transport.closeProducer" => {
                self.producers.remove(&id_of("producerId"));
                None
            }
            "producer.pause" | "producer.resume" => {
                if let Some((_, paused)) = self.producers.get_mut(handler_id) {
                    *paused = request.method == "producer.pause";
                }
                None
            }
            "producer.dump" => {
                let (kind, paused) = self
                    .producers
                    .get(handler_id)
                    .cloned()
                    .unwrap_or((json!("audio"), false));
                Some(json!({ "id": handler_id, "kind": kind, "paused": paused }))
            }
            "consumer.dump" => {
                let consumer = self.consumers.get(handler_id).cloned().unwrap_or_default();
                Some(json!({
                    "id": handler_id,
                    "producerId": consumer["producerId"].clone(),
                    "kind": consumer["kind"].clone(),
                    "paused": consumer["paused"].clone(),
                    "priority": 1,
                }))
            }
            "dataProducer.dump" => {
                let data_producer = self
                    .data_producers
                    .get(handler_id)
                    .cloned()
                    .unwrap_or_default();
                Some(json!({
                    "id": handler_id,
                    "type": data_producer["type"].clone(),
                    "label": data_producer["label"].clone(),
                    "protocol": data_producer["protocol"].clone(),
                    "sctpStreamParameters": data_producer["sctpStreamParameters"].clone(),
                }))
            }
            "dataConsumer.dump" => {
                let data_consumer = self
                    .data_consumers
                    .get(handler_id)
                    .cloned()
                    .unwrap_or_default();
                Some(json!({
                    "id": handler_id,
                    "dataProducerId": data_consumer["dataProducerId"].clone(),
                    "type": data_consumer["type"].clone(),
                    "label": data_consumer["label"].clone(),
                    "protocol": data_consumer["protocol"].clone(),
                    "sctpStreamParameters": data_consumer["sctpStreamParameters"].clone(),
                }))
            }
            "consumer.setPreferredLayers" => Some(data.clone()),
            "consumer.setPriority" => Some(json!({ "priority": data["priority"].clone() })),
            "dataConsumer.getBufferedAmount" => Some(json!({ "bufferedAmount": 0 })),
            method if method.ends_with(".getStats") => Some(json!([{
                "type": method.trim_end_matches(".getStats"),
                "transportId": handler_id,
                "timestamp": 1,
            }])),
            _ => None,
        };

        Ok(response)
    }
}

/// Handle to a running fake engine.
#[derive(Clone)]
pub(crate) struct FakeEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeEngine").finish()
    }
}

impl FakeEngine {
    /// Starts the engine on its own thread, returns the link to give to a worker.
    pub(crate) fn start() -> (Self, EngineLink) {
        let (to_engine, from_client) = async_channel::unbounded::<Vec<u8>>();
        let (to_client, from_engine) = async_channel::unbounded::<Vec<u8>>();

        let inner = Arc::new(Inner {
            state: Mutex::default(),
            to_client,
        });

        {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || {
                future::block_on(async move {
                    while let Ok(bytes) = from_client.recv().await {
                        inner.handle(&bytes);
                    }
                });
            });
        }

        (Self { inner }, EngineLink::new(to_engine, from_engine))
    }

    /// Every following request with this method gets an error response with given reason.
    pub(crate) fn fail(&self, method: &str, reason: &str) {
        self.inner
            .state
            .lock()
            .failures
            .insert(method.to_string(), reason.to_string());
    }

    /// Every following request with this method gets given data as response.
    pub(crate) fn respond_with(&self, method: &str, data: Value) {
        self.inner
            .state
            .lock()
            .overrides
            .insert(method.to_string(), data);
    }

    /// Requests with this method stay unanswered until [`FakeEngine::release`].
    pub(crate) fn hold(&self, method: &str) {
        self.inner
            .state
            .lock()
            .held_methods
            .insert(method.to_string());
    }

    /// Answers held requests with this method and stops holding it.
    pub(crate) fn release(&self, method: &str) {
        let answers = {
            let mut state = self.inner.state.lock();
            state.held_methods.remove(method);
            let held = std::mem::take(&mut state.held);
            let (release, keep): (Vec<_>, Vec<_>) = held
                .into_iter()
                .partition(|(_, request)| request.method == method);
            state.held = keep;
            release
                .into_iter()
                .map(|(id, request)| (id, state.respond(&request)))
                .collect::<Vec<_>>()
        };

        for (id, result) in answers {
            self.inner.answer(id, result);
        }
    }

    /// Sends notification addressed to given entity.
    pub(crate) fn notify(&self, target_id: impl fmt::Display, event: &str, data: Value) {
        self.inner.send(&json!({
            "targetId": target_id.to_string(),
            "event": event,
            "data": data,
        }));
    }

    /// Sends raw log line, first byte is the severity.
    pub(crate) fn log(&self, line: &str) {
        let _ = self.inner.to_client.try_send(line.as_bytes().to_vec());
    }

    pub(crate) fn requests(&self, method: &str) -> Vec<RecordedRequest> {
        self.inner
            .state
            .lock()
            .requests
            .iter()
            .filter(|request| request.method == method)
            .cloned()
            .collect()
    }

    pub(crate) fn notifications(&self, event: &str) -> Vec<RecordedRequest> {
        self.inner
            .state
            .lock()
            .notifications
            .iter()
            .filter(|notification| notification.method == event)
            .cloned()
            .collect()
    }

    /// Waits until at least `count` requests with this method arrived.
    pub(crate) async fn wait_for_requests(
        &self,
        method: &str,
        count: usize,
    ) -> Vec<RecordedRequest> {
        wait_for(count, || self.requests(method)).await
    }

    /// Waits until at least `count` notifications with this event arrived.
    pub(crate) async fn wait_for_notifications(
        &self,
        event: &str,
        count: usize,
    ) -> Vec<RecordedRequest> {
        wait_for(count, || self.notifications(event)).await
    }
}

async fn wait_for<F>(count: usize, recorded: F) -> Vec<RecordedRequest>
where
    F: Fn() -> Vec<RecordedRequest>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let recorded = recorded();
        if recorded.len() >= count {
            return recorded;
        }
        if Instant::now() > deadline {
            panic!("Timed out waiting for {} messages", count);
        }
        async_io::Timer::after(Duration::from_millis(5)).await;
    }
}

pub(crate) fn init() {
    let mut builder = env_logger::builder();
    if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
        builder.filter_level(log::LevelFilter::Off);
    }
    let _ = builder.is_test(true).try_init();
}

pub(crate) fn media_codecs() -> Vec<RtpCodecCapability> {
    let mut opus = RtpCodecCapability::new(
        MimeType::new(MediaKind::Audio, "opus"),
        NonZeroU32::new(48000).unwrap(),
    );
    opus.channels = NonZeroU8::new(2);

    let mut vp8 = RtpCodecCapability::new(
        MimeType::new(MediaKind::Video, "VP8"),
        NonZeroU32::new(90000).unwrap(),
    );
    vp8.rtcp_feedback = vec![RtcpFeedback {
        r#type: "nack".to_string(),
        parameter: String::new(),
    }];

    vec![opus, vp8]
}

pub(crate) fn audio_producer_options() -> ProducerOptions {
    let mut opus = RtpCodecParameters::new(
        MimeType::new(MediaKind::Audio, "opus"),
        111,
        NonZeroU32::new(48000).unwrap(),
    );
    opus.channels = NonZeroU8::new(2);

    ProducerOptions::new(
        MediaKind::Audio,
        RtpParameters {
            mid: Some("AUDIO".to_string()),
            codecs: vec![opus],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(11_111_111),
                ..RtpEncodingParameters::default()
            }],
            ..RtpParameters::default()
        },
    )
}

pub(crate) fn video_producer_options() -> ProducerOptions {
    ProducerOptions::new(
        MediaKind::Video,
        RtpParameters {
            mid: Some("VIDEO".to_string()),
            codecs: vec![RtpCodecParameters::new(
                MimeType::new(MediaKind::Video, "VP8"),
                96,
                NonZeroU32::new(90000).unwrap(),
            )],
            encodings: vec![
                RtpEncodingParameters {
                    ssrc: Some(22_222_222),
                    ..RtpEncodingParameters::default()
                },
                RtpEncodingParameters {
                    ssrc: Some(22_222_223),
                    ..RtpEncodingParameters::default()
                },
            ],
            ..RtpParameters::default()
        },
    )
}

pub(crate) fn listen_info() -> ListenInfo {
    ListenInfo::new(Protocol::Udp, IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Worker connected to a fresh fake engine.
pub(crate) async fn create_worker() -> (Worker, FakeEngine) {
    init();

    let (engine, link) = FakeEngine::start();
    let worker = WorkerManager::new()
        .create_worker(link, WorkerSettings::default())
        .await
        .expect("Failed to create worker");

    (worker, engine)
}

/// Router on a worker connected to a fresh fake engine.
pub(crate) async fn create_router() -> (Worker, Router, FakeEngine) {
    let (worker, engine) = create_worker().await;
    let router = worker
        .create_router(RouterOptions::new(media_codecs()))
        .await
        .expect("Failed to create router");

    (worker, router, engine)
}
