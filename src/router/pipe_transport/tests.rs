use crate::consumer::{ConsumerOptions, ConsumerType};
use crate::data_consumer::{DataConsumerOptions, DataConsumerType};
use crate::data_producer::DataProducerOptions;
use crate::data_structures::SctpState;
use crate::pipe_transport::{PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters};
use crate::producer::Producer;
use crate::router::Router;
use crate::sctp_parameters::SctpStreamParameters;
use crate::srtp_parameters::SrtpCryptoSuite;
use crate::transport::{Transport, TransportType};
use crate::webrtc_transport::{WebRtcTransportListenInfos, WebRtcTransportOptions};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::Worker;
use futures_lite::future;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};

async fn init() -> (Worker, Router, Producer, FakeEngine) {
    let (worker, router, engine) = fake_engine::create_router().await;

    let transport = router
        .create_webrtc_transport(WebRtcTransportOptions::new(
            WebRtcTransportListenInfos::new(fake_engine::listen_info()),
        ))
        .await
        .expect("Failed to create WebRTC transport");

    let video_producer = transport
        .produce(fake_engine::video_producer_options())
        .await
        .expect("Failed to produce video");

    (worker, router, video_producer, engine)
}

async fn create_pipe_transport(router: &Router, enable_rtx: bool) -> PipeTransport {
    router
        .create_pipe_transport({
            let mut transport_options = PipeTransportOptions::new(fake_engine::listen_info());
            transport_options.enable_rtx = enable_rtx;
            transport_options.enable_sctp = true;
            transport_options
        })
        .await
        .expect("Failed to create pipe transport")
}

#[test]
fn create_succeeds() {
    future::block_on(async move {
        let (_worker, router, _video_producer, engine) = init().await;

        let transport = create_pipe_transport(&router, true).await;

        assert_eq!(transport.transport_type(), TransportType::Pipe);
        assert!(transport.rtx());
        assert_eq!(transport.srtp_parameters(), None);
        assert_eq!(transport.tuple().local_address(), "127.0.0.1");
        assert_eq!(transport.tuple().remote_port(), None);
        assert_eq!(transport.sctp_state(), Some(SctpState::New));

        let requests = engine.requests("router.createPipeTransport");
        assert_eq!(requests[0].data["enableRtx"], json!(true));
        assert_eq!(requests[0].data["enableSctp"], json!(true));
        assert_eq!(requests[0].data["maxSctpMessageSize"], json!(268_435_456));
    });
}

#[test]
fn create_with_srtp() {
    future::block_on(async move {
        let (_worker, router, _video_producer, _engine) = init().await;

        let transport = router
            .create_pipe_transport({
                let mut transport_options = PipeTransportOptions::new(fake_engine::listen_info());
                transport_options.enable_srtp = true;
                transport_options
            })
            .await
            .expect("Failed to create pipe transport");

        assert_eq!(
            transport
                .srtp_parameters()
                .map(|srtp_parameters| srtp_parameters.crypto_suite),
            Some(SrtpCryptoSuite::AeadAes256Gcm),
        );
    });
}

#[test]
fn connect_updates_tuple() {
    future::block_on(async move {
        let (_worker, router, _video_producer, engine) = init().await;

        let transport = create_pipe_transport(&router, false).await;

        transport
            .connect(PipeTransportRemoteParameters::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
                40_123,
            ))
            .await
            .expect("Failed to connect");

        assert_eq!(
            transport.tuple().remote_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
        );
        assert_eq!(transport.tuple().remote_port(), Some(40_123));

        let requests = engine.requests("transport.connect");
        assert_eq!(requests[0].data, json!({ "ip": "10.0.0.7", "port": 40_123 }));
    });
}

#[test]
fn consume_keeps_all_encodings() {
    future::block_on(async move {
        let (_worker, router, video_producer, _engine) = init().await;

        let transport = create_pipe_transport(&router, false).await;

        let consumer = transport
            .consume(ConsumerOptions::new(
                video_producer.id(),
                router.rtp_capabilities().clone(),
            ))
            .await
            .expect("Failed to consume video");

        assert_eq!(consumer.r#type(), ConsumerType::Pipe);
        assert_eq!(consumer.rtp_parameters().mid, None);
        assert_eq!(consumer.rtp_parameters().encodings.len(), 2);
        assert!(consumer
            .rtp_parameters()
            .codecs
            .iter()
            .all(|codec| !codec.is_rtx()));
        assert!(consumer
            .rtp_parameters()
            .encodings
            .iter()
            .all(|encoding| encoding.rtx.is_none()));
    });
}

#[test]
fn consume_with_rtx() {
    future::block_on(async move {
        let (_worker, router, video_producer, _engine) = init().await;

        let transport = create_pipe_transport(&router, true).await;

        let consumer = transport
            .consume(ConsumerOptions::new(
                video_producer.id(),
                router.rtp_capabilities().clone(),
            ))
            .await
            .expect("Failed to consume video");

        assert_eq!(consumer.r#type(), ConsumerType::Pipe);
        assert!(consumer
            .rtp_parameters()
            .codecs
            .iter()
            .any(|codec| codec.is_rtx()));
        assert!(consumer
            .rtp_parameters()
            .encodings
            .iter()
            .all(|encoding| encoding.rtx.is_some()));
    });
}

#[test]
fn data_over_pipe() {
    future::block_on(async move {
        let (_worker, router, _video_producer, _engine) = init().await;

        let transport = create_pipe_transport(&router, false).await;

        let data_producer = transport
            .produce_data(DataProducerOptions::new_sctp(
                SctpStreamParameters::new_ordered(7),
            ))
            .await
            .expect("Failed to produce data");

        let data_consumer = transport
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");

        assert_eq!(data_consumer.r#type(), DataConsumerType::Sctp);
        assert!(data_consumer.sctp_stream_parameters().is_some());
    });
}

#[test]
fn router_close_event() {
    future::block_on(async move {
        let (_worker, router, _video_producer, _engine) = init().await;

        let transport = create_pipe_transport(&router, false).await;

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = transport.on_close(Box::new(move || {
            let _ = close_tx.send(());
        }));

        let (mut router_close_tx, router_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = transport.on_router_close(Box::new(move || {
            let _ = router_close_tx.send(());
        }));

        router.close();

        router_close_rx
            .await
            .expect("Failed to receive router_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(transport.closed());
        assert_eq!(transport.sctp_state(), Some(SctpState::Closed));
    });
}
