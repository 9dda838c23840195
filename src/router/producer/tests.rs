use crate::producer::{ProducerOptions, ProducerScore, ProducerType};
use crate::router::Router;
use crate::rtp_parameters::MediaKind;
use crate::transport::{ProduceError, Transport};
use crate::webrtc_transport::{WebRtcTransport, WebRtcTransportListenInfos, WebRtcTransportOptions};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::{RequestError, Worker};
use futures_lite::future;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn init() -> (Worker, Router, WebRtcTransport, FakeEngine) {
    let (worker, router, engine) = fake_engine::create_router().await;

    let transport = router
        .create_webrtc_transport(WebRtcTransportOptions::new(WebRtcTransportListenInfos::new(
            fake_engine::listen_info(),
        )))
        .await
        .expect("Failed to create transport");

    (worker, router, transport, engine)
}

#[test]
fn produce_succeeds() {
    future::block_on(async move {
        let (_worker, router, transport, engine) = init().await;

        let new_producers_count = Arc::new(AtomicUsize::new(0));
        transport
            .on_new_producer(Arc::new({
                let new_producers_count = Arc::clone(&new_producers_count);

                move |_producer| {
                    new_producers_count.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .detach();

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        assert_eq!(new_producers_count.load(Ordering::SeqCst), 1);
        assert_eq!(audio_producer.kind(), MediaKind::Audio);
        assert_eq!(audio_producer.r#type(), ProducerType::Simple);
        assert_eq!(audio_producer.transport_id(), transport.id());
        assert!(!audio_producer.paused());
        assert!(audio_producer.score().is_empty());
        assert!(audio_producer
            .rtp_parameters()
            .rtcp
            .cname
            .as_ref()
            .is_some());
        assert_eq!(transport.producers().len(), 1);
        assert!(router.get_producer(&audio_producer.id()).is_some());

        let requests = engine.requests("transport.produce");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].handler_id, transport.id().to_string());
        assert_eq!(
            requests[0].data["producerId"],
            json!(audio_producer.id().to_string()),
        );

        let video_producer = transport
            .produce(fake_engine::video_producer_options())
            .await
            .expect("Failed to produce video");

        assert_eq!(video_producer.r#type(), ProducerType::Simulcast);
        assert_eq!(
            audio_producer.rtp_parameters().rtcp.cname,
            video_producer.rtp_parameters().rtcp.cname,
        );
        assert_eq!(new_producers_count.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn produce_with_taken_id_fails() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let options = fake_engine::audio_producer_options();
        let result = transport
            .produce(ProducerOptions::new_pipe_transport(
                audio_producer.id(),
                options.kind,
                options.rtp_parameters,
            ))
            .await;

        assert!(matches!(result, Err(ProduceError::IdTaken(_))));
        assert_eq!(transport.producers().len(), 1);
        assert_eq!(engine.requests("transport.produce").len(), 1);
    });
}

#[test]
fn produce_rejected_by_engine_leaves_no_state() {
    future::block_on(async move {
        let (_worker, router, transport, engine) = init().await;

        engine.fail("transport.produce", "boom");

        let new_producers_count = Arc::new(AtomicUsize::new(0));
        transport
            .on_new_producer(Arc::new({
                let new_producers_count = Arc::clone(&new_producers_count);

                move |_producer| {
                    new_producers_count.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .detach();

        let result = transport
            .produce(fake_engine::audio_producer_options())
            .await;

        assert_eq!(
            result.err(),
            Some(ProduceError::Request(RequestError::Response {
                reason: "boom".to_string(),
            })),
        );
        assert_eq!(new_producers_count.load(Ordering::SeqCst), 0);
        assert!(transport.producers().is_empty());

        // Id attempted above must be free again
        let requested_id = engine.requests("transport.produce")[0].data["producerId"]
            .as_str()
            .expect("Producer id missing")
            .parse()
            .expect("Producer id is not a UUID");
        assert!(router.get_producer(&requested_id).is_none());
    });
}

#[test]
fn produce_on_closed_transport_fails() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        transport.close();

        let result = transport
            .produce(fake_engine::audio_producer_options())
            .await;

        assert!(matches!(result, Err(ProduceError::TransportClosed)));
        assert!(engine.requests("transport.produce").is_empty());
    });
}

#[test]
fn pause_and_resume() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let pause_count = Arc::new(AtomicUsize::new(0));
        audio_producer
            .on_pause({
                let pause_count = Arc::clone(&pause_count);

                move || {
                    pause_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let resume_count = Arc::new(AtomicUsize::new(0));
        audio_producer
            .on_resume({
                let resume_count = Arc::clone(&resume_count);

                move || {
                    resume_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        audio_producer.pause().await.expect("Failed to pause");
        assert!(audio_producer.paused());

        // Already paused, engine is asked again but nothing is emitted
        audio_producer.pause().await.expect("Failed to pause");
        assert_eq!(pause_count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.requests("producer.pause").len(), 2);

        let dump = audio_producer.dump().await.expect("Failed to dump");
        assert!(dump.paused);

        audio_producer.resume().await.expect("Failed to resume");
        assert!(!audio_producer.paused());
        assert_eq!(resume_count.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn failed_pause_keeps_state() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        engine.fail("producer.pause", "nope");

        assert_eq!(
            audio_producer.pause().await,
            Err(RequestError::Response {
                reason: "nope".to_string()
            }),
        );
        assert!(!audio_producer.paused());
    });
}

#[test]
fn score_notification_replaces_score() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        let video_producer = transport
            .produce(fake_engine::video_producer_options())
            .await
            .expect("Failed to produce video");

        let (scores_tx, scores_rx) = async_channel::unbounded::<Vec<ProducerScore>>();
        video_producer
            .on_score(move |score| {
                let _ = scores_tx.try_send(score.to_vec());
            })
            .detach();

        engine.notify(
            video_producer.id(),
            "score",
            json!([
                { "encodingIdx": 0, "ssrc": 22_222_222, "score": 10 },
                { "encodingIdx": 1, "ssrc": 22_222_223, "score": 7 },
            ]),
        );
        let first = scores_rx.recv().await.expect("Failed to receive score");
        assert_eq!(first.len(), 2);

        engine.notify(
            video_producer.id(),
            "score",
            json!([{ "encodingIdx": 1, "ssrc": 22_222_223, "score": 3 }]),
        );
        let second = scores_rx.recv().await.expect("Failed to receive score");

        assert_eq!(
            second,
            vec![ProducerScore {
                encoding_idx: 1,
                ssrc: 22_222_223,
                rid: None,
                score: 3,
            }],
        );
        assert_eq!(video_producer.score(), second);
    });
}

#[test]
fn close_is_idempotent() {
    future::block_on(async move {
        let (_worker, router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let close_count = Arc::new(AtomicUsize::new(0));
        audio_producer
            .on_close({
                let close_count = Arc::clone(&close_count);

                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let transport_close_count = Arc::new(AtomicUsize::new(0));
        audio_producer
            .on_transport_close({
                let transport_close_count = Arc::clone(&transport_close_count);

                move || {
                    transport_close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        audio_producer.close();
        audio_producer.close();

        assert!(audio_producer.closed());
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert_eq!(transport_close_count.load(Ordering::SeqCst), 0);
        assert!(transport.producers().is_empty());
        assert!(router.get_producer(&audio_producer.id()).is_none());

        let requests = engine.wait_for_requests("transport.closeProducer", 1).await;
        assert_eq!(requests[0].handler_id, transport.id().to_string());

        // Closing after the fact calls handler in place
        let (mut late_close_tx, late_close_rx) = async_oneshot::oneshot::<()>();
        audio_producer
            .on_close(move || {
                let _ = late_close_tx.send(());
            })
            .detach();
        late_close_rx.await.expect("Failed to receive close event");

        assert_eq!(
            audio_producer.pause().await,
            Err(RequestError::EntityClosed),
        );
    });
}

#[test]
fn transport_close_event() {
    future::block_on(async move {
        let (_worker, router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = audio_producer.on_close(move || {
            let _ = close_tx.send(());
        });

        let (mut transport_close_tx, transport_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = audio_producer.on_transport_close(move || {
            let _ = transport_close_tx.send(());
        });

        router.close();

        transport_close_rx
            .await
            .expect("Failed to receive transport_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(audio_producer.closed());
        assert!(engine.requests("transport.closeProducer").is_empty());
    });
}

#[test]
fn stats_in_flight_during_close_are_discarded() {
    future::block_on(async move {
        let (_worker, _router, transport, engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        engine.hold("producer.getStats");

        let (result, ()) = future::zip(audio_producer.get_stats(), async {
            engine.wait_for_requests("producer.getStats", 1).await;
            audio_producer.close();
            engine.release("producer.getStats");
        })
        .await;

        assert!(matches!(result, Err(RequestError::EntityClosed)));
    });
}

#[test]
fn get_stats_succeeds() {
    future::block_on(async move {
        let (_worker, _router, transport, _engine) = init().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let stats = audio_producer
            .get_stats()
            .await
            .expect("Failed to get stats");

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].r#type, "producer");
    });
}
