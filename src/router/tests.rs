use crate::data_producer::DataProducerOptions;
use crate::router::{
    NewTransport, PipeDataProducerToRouterError, PipeProducerToRouterError, PipeToRouterOptions,
    Router, RouterOptions,
};
use crate::rtp_parameters::RtpCapabilities;
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::Transport;
use crate::webrtc_transport::{WebRtcTransport, WebRtcTransportListenInfos, WebRtcTransportOptions};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::{RequestError, Worker};
use futures_lite::future;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn create_transport(router: &Router) -> WebRtcTransport {
    router
        .create_webrtc_transport({
            let mut transport_options = WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            );
            transport_options.enable_sctp = true;
            transport_options
        })
        .await
        .expect("Failed to create WebRTC transport")
}

async fn init_pair() -> (Worker, Router, Router, WebRtcTransport, FakeEngine) {
    let (worker, router1, engine) = fake_engine::create_router().await;
    let router2 = worker
        .create_router(RouterOptions::new(fake_engine::media_codecs()))
        .await
        .expect("Failed to create router");
    let transport = create_transport(&router1).await;

    (worker, router1, router2, transport, engine)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met in time");
        async_io::Timer::after(Duration::from_millis(5)).await;
    }
}

#[test]
fn create_succeeds() {
    future::block_on(async move {
        let (worker, router, engine) = fake_engine::create_router().await;

        assert!(!router.closed());
        assert!(!router.rtp_capabilities().codecs.is_empty());
        assert_eq!(worker.routers().len(), 1);

        let requests = engine.requests("worker.createRouter");
        assert_eq!(requests[0].data["routerId"], json!(router.id().to_string()));

        let dump = router.dump().await.expect("Failed to dump router");
        assert_eq!(dump.id, router.id());
        assert!(dump.transport_ids.is_empty());
    });
}

#[test]
fn new_transport_event_reaches_observer() {
    future::block_on(async move {
        let (_worker, router, _engine) = fake_engine::create_router().await;

        let new_transports = Arc::new(AtomicUsize::new(0));
        router
            .observer()
            .on_new_transport({
                let new_transports = Arc::clone(&new_transports);

                move |transport| {
                    assert!(matches!(transport, NewTransport::WebRtc(_)));
                    new_transports.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let _transport = create_transport(&router).await;

        assert_eq!(new_transports.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn close_closes_transports() {
    future::block_on(async move {
        let (worker, router, engine) = fake_engine::create_router().await;

        let transport = create_transport(&router).await;
        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let close_count = Arc::new(AtomicUsize::new(0));
        router
            .on_close({
                let close_count = Arc::clone(&close_count);

                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();
        let (mut observer_close_tx, observer_close_rx) = async_oneshot::oneshot::<()>();
        router
            .observer()
            .on_close(move || {
                let _ = observer_close_tx.send(());
            })
            .detach();

        router.close();
        router.close();

        observer_close_rx
            .await
            .expect("Failed to receive observer close event");
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert!(router.closed());
        assert!(transport.closed());
        assert!(producer.closed());
        assert!(router.get_producer(&producer.id()).is_none());
        assert!(worker.routers().is_empty());

        let requests = engine.wait_for_requests("worker.closeRouter", 1).await;
        assert_eq!(requests[0].data["routerId"], json!(router.id().to_string()));

        assert_eq!(router.dump().await.err(), Some(RequestError::EntityClosed));
        assert_eq!(
            router
                .create_webrtc_transport(WebRtcTransportOptions::new(
                    WebRtcTransportListenInfos::new(fake_engine::listen_info()),
                ))
                .await
                .err(),
            Some(RequestError::EntityClosed),
        );
    });
}

#[test]
fn worker_close_event() {
    future::block_on(async move {
        let (worker, router, engine) = fake_engine::create_router().await;

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = router.on_close(move || {
            let _ = close_tx.send(());
        });

        let (mut worker_close_tx, worker_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = router.on_worker_close(move || {
            let _ = worker_close_tx.send(());
        });

        worker.close();

        worker_close_rx
            .await
            .expect("Failed to receive worker_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(router.closed());
        assert!(engine.requests("worker.closeRouter").is_empty());
    });
}

#[test]
fn can_consume() {
    future::block_on(async move {
        let (_worker, router, _engine) = fake_engine::create_router().await;

        let transport = create_transport(&router).await;
        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        assert!(router.can_consume(&producer.id(), router.rtp_capabilities()));
        assert!(!router.can_consume(&producer.id(), &RtpCapabilities::default()));

        producer.close();

        assert!(!router.can_consume(&producer.id(), router.rtp_capabilities()));
    });
}

#[test]
fn pipe_producer_to_router_succeeds() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, engine) = init_pair().await;

        let audio_producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let video_producer = transport
            .produce(fake_engine::video_producer_options())
            .await
            .expect("Failed to produce video");

        let new_transports = Arc::new(AtomicUsize::new(0));
        router2
            .on_new_transport({
                let new_transports = Arc::clone(&new_transports);

                move |transport| {
                    assert!(matches!(transport, NewTransport::Pipe(_)));
                    new_transports.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let audio_pair = router1
            .pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router2.clone()),
            )
            .await
            .expect("Failed to pipe audio producer");

        assert_eq!(audio_pair.pipe_producer.id(), audio_producer.id());
        assert_eq!(audio_pair.pipe_producer.kind(), audio_producer.kind());
        assert_eq!(audio_pair.pipe_consumer.producer_id(), audio_producer.id());
        assert!(router2.get_producer(&audio_producer.id()).is_some());

        let video_pair = router1
            .pipe_producer_to_router(
                video_producer.id(),
                PipeToRouterOptions::new(router2.clone()),
            )
            .await
            .expect("Failed to pipe video producer");

        // Both pipes share one transport pair
        assert_eq!(new_transports.load(Ordering::SeqCst), 1);
        assert_eq!(engine.requests("router.createPipeTransport").len(), 2);
        assert_eq!(engine.requests("transport.connect").len(), 2);
        assert_eq!(
            audio_pair.pipe_consumer.transport_id(),
            video_pair.pipe_consumer.transport_id(),
        );

        // Closing the pipe consumer takes the pipe producer with it
        audio_pair.pipe_consumer.close();
        assert!(audio_pair.pipe_producer.closed());
        assert!(router2.get_producer(&audio_producer.id()).is_none());
        assert!(!audio_producer.closed());

        // And the other way around
        video_pair.pipe_producer.close();
        assert!(video_pair.pipe_consumer.closed());
    });
}

#[test]
fn pipe_producer_pause_propagates() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, engine) = init_pair().await;

        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let pair = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router2.clone()))
            .await
            .expect("Failed to pipe producer");

        assert!(!pair.pipe_producer.paused());

        producer.pause().await.expect("Failed to pause producer");

        let requests = engine.wait_for_requests("producer.pause", 2).await;
        assert!(requests
            .iter()
            .all(|request| request.handler_id == producer.id().to_string()));
        assert!(pair.pipe_consumer.producer_paused());

        // The pipe producer pauses on a spawned task
        wait_until(|| pair.pipe_producer.paused()).await;

        producer.resume().await.expect("Failed to resume producer");
        engine.wait_for_requests("producer.resume", 2).await;
        wait_until(|| !pair.pipe_producer.paused()).await;
    });
}

#[test]
fn pipe_producer_to_same_router_fails() {
    future::block_on(async move {
        let (_worker, router1, _router2, transport, _engine) = init_pair().await;

        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let result = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router1.clone()))
            .await;

        assert!(matches!(result, Err(PipeProducerToRouterError::SameRouter)));
    });
}

#[test]
fn pipe_unknown_producer_fails() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, engine) = init_pair().await;

        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");
        producer.close();

        let result = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router2))
            .await;

        assert!(matches!(
            result,
            Err(PipeProducerToRouterError::ProducerNotFound(producer_id)) if producer_id == producer.id()
        ));
        assert!(engine.requests("router.createPipeTransport").is_empty());
    });
}

#[test]
fn failed_pipe_transport_creation_leaves_no_transports() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, engine) = init_pair().await;

        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        engine.fail("transport.connect", "unreachable");

        let result = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router2.clone()))
            .await;

        assert!(matches!(
            result,
            Err(PipeProducerToRouterError::TransportFailed(RequestError::Response { .. }))
        ));
        assert_eq!(
            engine.wait_for_requests("router.closeTransport", 2).await.len(),
            2,
        );
    });
}

#[test]
fn closing_pipe_transport_closes_its_pair() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, engine) = init_pair().await;

        let producer = transport
            .produce(fake_engine::audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let pair = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router2.clone()))
            .await
            .expect("Failed to pipe producer");

        router2.close();

        assert!(pair.pipe_producer.closed());
        assert!(pair.pipe_consumer.closed());

        // The stale pair is forgotten, a new one is attempted on next use
        let result = router1
            .pipe_producer_to_router(producer.id(), PipeToRouterOptions::new(router2.clone()))
            .await;
        assert!(matches!(
            result,
            Err(PipeProducerToRouterError::TransportFailed(RequestError::EntityClosed))
        ));
        assert_eq!(engine.requests("router.createPipeTransport").len(), 3);
    });
}

#[test]
fn pipe_data_producer_to_router_succeeds() {
    future::block_on(async move {
        let (_worker, router1, router2, transport, _engine) = init_pair().await;

        let data_producer = transport
            .produce_data({
                let mut options =
                    DataProducerOptions::new_sctp(SctpStreamParameters::new_ordered(3));
                options.label = "chat".to_string();
                options.protocol = "text".to_string();
                options
            })
            .await
            .expect("Failed to produce data");

        let pair = router1
            .pipe_data_producer_to_router(
                data_producer.id(),
                PipeToRouterOptions::new(router2.clone()),
            )
            .await
            .expect("Failed to pipe data producer");

        assert_eq!(pair.pipe_data_producer.id(), data_producer.id());
        assert_eq!(pair.pipe_data_producer.label(), "chat");
        assert_eq!(pair.pipe_data_producer.protocol(), "text");
        assert_eq!(
            pair.pipe_data_consumer.data_producer_id(),
            data_producer.id(),
        );

        data_producer.close();

        assert!(pair.pipe_data_consumer.closed());
        assert!(pair.pipe_data_producer.closed());
    });
}

#[test]
fn pipe_data_producer_to_same_router_fails() {
    future::block_on(async move {
        let (_worker, router1, _router2, transport, _engine) = init_pair().await;

        let data_producer = transport
            .produce_data(DataProducerOptions::new_sctp(
                SctpStreamParameters::new_ordered(3),
            ))
            .await
            .expect("Failed to produce data");

        let result = router1
            .pipe_data_producer_to_router(
                data_producer.id(),
                PipeToRouterOptions::new(router1.clone()),
            )
            .await;

        assert!(matches!(
            result,
            Err(PipeDataProducerToRouterError::SameRouter)
        ));
    });
}
