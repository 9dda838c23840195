use crate::data_producer::{DataProducer, DataProducerOptions, DataProducerType};
use crate::data_structures::WebRtcMessage;
use crate::direct_transport::{DirectTransport, DirectTransportOptions};
use crate::router::Router;
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::{ProduceDataError, Transport};
use crate::webrtc_transport::{WebRtcTransport, WebRtcTransportListenInfos, WebRtcTransportOptions};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::{NotificationError, RequestError, Worker};
use bytes::Bytes;
use futures_lite::future;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn init() -> (Worker, Router, WebRtcTransport, DirectTransport, FakeEngine) {
    let (worker, router, engine) = fake_engine::create_router().await;

    let webrtc_transport = router
        .create_webrtc_transport({
            let mut transport_options = WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            );
            transport_options.enable_sctp = true;
            transport_options
        })
        .await
        .expect("Failed to create transport1");

    let direct_transport = router
        .create_direct_transport(DirectTransportOptions::default())
        .await
        .expect("Failed to create transport2");

    (worker, router, webrtc_transport, direct_transport, engine)
}

fn sctp_data_producer_options() -> DataProducerOptions {
    let mut options = DataProducerOptions::new_sctp(
        SctpStreamParameters::new_unordered_with_life_time(666, 5000),
    );
    options.label = "foo".to_string();
    options.protocol = "bar".to_string();
    options
}

#[test]
fn produce_data_succeeds() {
    future::block_on(async move {
        let (_worker, router, webrtc_transport, _direct_transport, engine) = init().await;

        let new_data_producers_count = Arc::new(AtomicUsize::new(0));
        webrtc_transport
            .on_new_data_producer(Arc::new({
                let new_data_producers_count = Arc::clone(&new_data_producers_count);

                move |_data_producer| {
                    new_data_producers_count.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .detach();

        let data_producer = webrtc_transport
            .produce_data(sctp_data_producer_options())
            .await
            .expect("Failed to produce data");

        assert_eq!(new_data_producers_count.load(Ordering::SeqCst), 1);
        assert_eq!(data_producer.r#type(), DataProducerType::Sctp);
        assert_eq!(data_producer.label(), "foo");
        assert_eq!(data_producer.protocol(), "bar");
        assert_eq!(data_producer.transport_id(), webrtc_transport.id());
        assert_eq!(
            data_producer.sctp_stream_parameters(),
            Some(SctpStreamParameters::new_unordered_with_life_time(666, 5000)),
        );
        assert_eq!(webrtc_transport.data_producers().len(), 1);
        assert!(router.get_data_producer(&data_producer.id()).is_some());

        let requests = engine.requests("transport.produceData");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].data["type"], json!("sctp"));
        assert_eq!(requests[0].data["sctpStreamParameters"]["streamId"], json!(666));

        let dump = data_producer.dump().await.expect("Failed to dump");
        assert_eq!(dump.id, data_producer.id());
        assert_eq!(dump.label, "foo");
    });
}

#[test]
fn produce_data_without_stream_parameters_fails() {
    future::block_on(async move {
        let (_worker, _router, webrtc_transport, _direct_transport, engine) = init().await;

        let result = webrtc_transport
            .produce_data(DataProducerOptions::new_direct())
            .await;

        assert!(matches!(
            result,
            Err(ProduceDataError::SctpStreamParametersRequired)
        ));
        assert!(webrtc_transport.data_producers().is_empty());
        assert!(engine.requests("transport.produceData").is_empty());
    });
}

#[test]
fn produce_data_rejected_by_engine_leaves_no_state() {
    future::block_on(async move {
        let (_worker, _router, webrtc_transport, _direct_transport, engine) = init().await;

        engine.fail("transport.produceData", "stream taken");

        let result = webrtc_transport
            .produce_data(sctp_data_producer_options())
            .await;

        assert_eq!(
            result.err(),
            Some(ProduceDataError::Request(RequestError::Response {
                reason: "stream taken".to_string(),
            })),
        );
        assert!(webrtc_transport.data_producers().is_empty());
    });
}

#[test]
fn direct_data_producer_sends_messages() {
    future::block_on(async move {
        let (_worker, _router, _webrtc_transport, direct_transport, engine) = init().await;

        let data_producer = direct_transport
            .produce_data(DataProducerOptions::new_direct())
            .await
            .expect("Failed to produce data");

        assert_eq!(data_producer.r#type(), DataProducerType::Direct);
        assert_eq!(data_producer.sctp_stream_parameters(), None);

        let DataProducer::Direct(direct_data_producer) = &data_producer else {
            panic!("Expected direct data producer");
        };

        direct_data_producer
            .send(WebRtcMessage::String("hello".to_string()))
            .expect("Failed to send message");
        direct_data_producer
            .send(WebRtcMessage::Binary(Bytes::from_static(&[1, 2, 3])))
            .expect("Failed to send message");

        let notifications = engine.wait_for_notifications("dataProducer.send", 2).await;
        assert_eq!(notifications[0].handler_id, data_producer.id().to_string());
        assert_eq!(notifications[0].data["ppid"], json!(51));
        assert_eq!(notifications[1].data["ppid"], json!(53));
        assert_eq!(notifications[1].data["payload"], json!([1, 2, 3]));

        data_producer.close();

        assert_eq!(
            direct_data_producer.send(WebRtcMessage::EmptyString),
            Err(NotificationError::EntityClosed),
        );
    });
}

#[test]
fn close_is_idempotent() {
    future::block_on(async move {
        let (_worker, router, webrtc_transport, _direct_transport, engine) = init().await;

        let data_producer = webrtc_transport
            .produce_data(sctp_data_producer_options())
            .await
            .expect("Failed to produce data");

        let close_count = Arc::new(AtomicUsize::new(0));
        data_producer
            .on_close({
                let close_count = Arc::clone(&close_count);

                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        data_producer.close();
        data_producer.close();

        assert!(data_producer.closed());
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert!(webrtc_transport.data_producers().is_empty());
        assert!(router.get_data_producer(&data_producer.id()).is_none());

        let requests = engine
            .wait_for_requests("transport.closeDataProducer", 1)
            .await;
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].data["dataProducerId"],
            json!(data_producer.id().to_string()),
        );

        assert_eq!(data_producer.dump().await.err(), Some(RequestError::EntityClosed));
    });
}

#[test]
fn transport_close_event() {
    future::block_on(async move {
        let (_worker, _router, webrtc_transport, _direct_transport, engine) = init().await;

        let data_producer = webrtc_transport
            .produce_data(sctp_data_producer_options())
            .await
            .expect("Failed to produce data");

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = data_producer.on_close(move || {
            let _ = close_tx.send(());
        });

        let (mut transport_close_tx, transport_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = data_producer.on_transport_close(move || {
            let _ = transport_close_tx.send(());
        });

        webrtc_transport.close();

        transport_close_rx
            .await
            .expect("Failed to receive transport_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(data_producer.closed());
        assert!(engine.requests("transport.closeDataProducer").is_empty());
    });
}

#[test]
fn get_stats_succeeds() {
    future::block_on(async move {
        let (_worker, _router, webrtc_transport, _direct_transport, _engine) = init().await;

        let data_producer = webrtc_transport
            .produce_data(sctp_data_producer_options())
            .await
            .expect("Failed to produce data");

        let stats = data_producer
            .get_stats()
            .await
            .expect("Failed to get stats");

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].r#type, "dataProducer");
    });
}
