use crate::data_structures::{ListenInfo, Protocol};
use crate::router::Router;
use crate::transport::{Transport, TransportBaseAccess};
use crate::webrtc_server::{WebRtcServer, WebRtcServerListenInfos, WebRtcServerOptions};
use crate::webrtc_transport::{EmptyListError, WebRtcTransport, WebRtcTransportOptions};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::{CreateWebRtcServerError, RequestError, Worker};
use futures_lite::future;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn init() -> (Worker, Router, WebRtcServer, FakeEngine) {
    let (worker, router, engine) = fake_engine::create_router().await;

    let webrtc_server = worker
        .create_webrtc_server(WebRtcServerOptions::new(
            WebRtcServerListenInfos::new(fake_engine::listen_info()).insert({
                let mut listen_info =
                    ListenInfo::new(Protocol::Tcp, IpAddr::V4(Ipv4Addr::LOCALHOST));
                listen_info.port = Some(44_444);
                listen_info
            }),
        ))
        .await
        .expect("Failed to create WebRTC server");

    (worker, router, webrtc_server, engine)
}

async fn create_transport(router: &Router, webrtc_server: &WebRtcServer) -> WebRtcTransport {
    router
        .create_webrtc_transport(WebRtcTransportOptions::new_with_server(
            webrtc_server.clone(),
        ))
        .await
        .expect("Failed to create WebRTC transport")
}

#[test]
fn create_succeeds() {
    future::block_on(async move {
        let (worker, _router, webrtc_server, engine) = init().await;

        assert!(!webrtc_server.closed());
        assert_eq!(worker.webrtc_servers().len(), 1);

        let requests = engine.requests("worker.createWebRtcServer");
        assert_eq!(
            requests[0].data["webRtcServerId"],
            json!(webrtc_server.id().to_string()),
        );
        assert_eq!(
            requests[0].data["listenInfos"],
            json!([
                { "protocol": "udp", "ip": "127.0.0.1" },
                { "protocol": "tcp", "ip": "127.0.0.1", "port": 44_444 },
            ]),
        );

        let worker_dump = worker.dump().await.expect("Failed to dump worker");
        assert_eq!(worker_dump.webrtc_server_ids, vec![webrtc_server.id()]);

        let dump = webrtc_server.dump().await.expect("Failed to dump WebRTC server");
        assert_eq!(dump.id, webrtc_server.id());
    });
}

#[test]
fn empty_listen_infos_are_rejected() {
    assert_eq!(
        WebRtcServerListenInfos::try_from(Vec::<ListenInfo>::new()).err(),
        Some(EmptyListError),
    );
}

#[test]
fn create_rejected_by_engine() {
    future::block_on(async move {
        let (worker, engine) = fake_engine::create_worker().await;

        engine.fail("worker.createWebRtcServer", "address in use");

        let new_webrtc_servers = Arc::new(AtomicUsize::new(0));
        worker
            .on_new_webrtc_server({
                let new_webrtc_servers = Arc::clone(&new_webrtc_servers);

                move |_webrtc_server| {
                    new_webrtc_servers.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let result = worker
            .create_webrtc_server(WebRtcServerOptions::new(WebRtcServerListenInfos::new(
                fake_engine::listen_info(),
            )))
            .await;

        assert_eq!(
            result.err(),
            Some(CreateWebRtcServerError::Request(RequestError::Response {
                reason: "address in use".to_string(),
            })),
        );
        assert_eq!(new_webrtc_servers.load(Ordering::SeqCst), 0);
        assert!(worker.webrtc_servers().is_empty());
    });
}

#[test]
fn transports_are_tracked() {
    future::block_on(async move {
        let (_worker, router, webrtc_server, _engine) = init().await;

        let handled = Arc::new(AtomicUsize::new(0));
        let unhandled = Arc::new(AtomicUsize::new(0));
        webrtc_server
            .observer()
            .on_webrtc_transport_handled({
                let handled = Arc::clone(&handled);

                move |_transport| {
                    handled.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();
        webrtc_server
            .observer()
            .on_webrtc_transport_unhandled({
                let unhandled = Arc::clone(&unhandled);

                move |_transport| {
                    unhandled.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();
        let new_transports = Arc::new(AtomicUsize::new(0));
        webrtc_server
            .on_new_webrtc_transport({
                let new_transports = Arc::clone(&new_transports);

                move |_transport| {
                    new_transports.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let transport1 = create_transport(&router, &webrtc_server).await;
        let transport2 = create_transport(&router, &webrtc_server).await;

        assert_eq!(handled.load(Ordering::SeqCst), 2);
        assert_eq!(new_transports.load(Ordering::SeqCst), 2);
        assert_eq!(webrtc_server.webrtc_transports().len(), 2);

        // Closing a transport leaves the server alone
        transport1.close();

        assert_eq!(unhandled.load(Ordering::SeqCst), 1);
        assert!(!webrtc_server.closed());
        assert_eq!(webrtc_server.webrtc_transports().len(), 1);
        assert_eq!(webrtc_server.webrtc_transports()[0].id(), transport2.id());

        // Router closing closes transports through the same path
        router.close();

        assert!(transport2.closed());
        assert_eq!(unhandled.load(Ordering::SeqCst), 2);
        assert!(webrtc_server.webrtc_transports().is_empty());
        assert!(!webrtc_server.closed());
    });
}

#[test]
fn close_closes_transports() {
    future::block_on(async move {
        let (worker, router, webrtc_server, engine) = init().await;

        let transport = create_transport(&router, &webrtc_server).await;

        let unhandled = Arc::new(AtomicUsize::new(0));
        webrtc_server
            .observer()
            .on_webrtc_transport_unhandled({
                let unhandled = Arc::clone(&unhandled);

                move |_transport| {
                    unhandled.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let close_count = Arc::new(AtomicUsize::new(0));
        webrtc_server
            .on_close({
                let close_count = Arc::clone(&close_count);

                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        webrtc_server.close();
        webrtc_server.close();

        assert_eq!(close_count.load(Ordering::SeqCst), 1);
        assert!(transport.closed());
        assert!(!router.closed());
        assert_eq!(unhandled.load(Ordering::SeqCst), 0);
        assert!(worker.webrtc_servers().is_empty());

        let requests = engine
            .wait_for_requests("worker.closeWebRtcServer", 1)
            .await;
        assert_eq!(
            requests[0].data["webRtcServerId"],
            json!(webrtc_server.id().to_string()),
        );
        assert!(engine.requests("router.closeTransport").is_empty());

        assert_eq!(
            webrtc_server.dump().await.err(),
            Some(RequestError::EntityClosed),
        );
    });
}

#[test]
fn worker_close_event() {
    future::block_on(async move {
        let (worker, router, webrtc_server, engine) = init().await;

        let transport = create_transport(&router, &webrtc_server).await;

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = webrtc_server.on_close(move || {
            let _ = close_tx.send(());
        });

        let (mut worker_close_tx, worker_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = webrtc_server.on_worker_close(move || {
            let _ = worker_close_tx.send(());
        });

        worker.close();

        worker_close_rx
            .await
            .expect("Failed to receive worker_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(webrtc_server.closed());
        assert!(transport.closed());
        assert!(engine.requests("worker.closeWebRtcServer").is_empty());
    });
}

#[test]
fn late_close_handler_fires_in_place() {
    future::block_on(async move {
        let (_worker, _router, webrtc_server, _engine) = init().await;

        webrtc_server.close();

        let close_count = Arc::new(AtomicUsize::new(0));
        webrtc_server
            .on_close({
                let close_count = Arc::clone(&close_count);

                move || {
                    close_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn close_during_transport_creation_closes_transport() {
    future::block_on(async move {
        let (_worker, router, webrtc_server, engine) = init().await;

        let new_transports = Arc::new(AtomicUsize::new(0));
        router
            .on_new_transport({
                let new_transports = Arc::clone(&new_transports);

                move |_transport| {
                    new_transports.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        engine.hold("router.createWebRtcTransport");

        let (result, ()) = future::zip(
            router.create_webrtc_transport(WebRtcTransportOptions::new_with_server(
                webrtc_server.clone(),
            )),
            async {
                engine
                    .wait_for_requests("router.createWebRtcTransport", 1)
                    .await;
                webrtc_server.close();
                engine.release("router.createWebRtcTransport");
            },
        )
        .await;

        assert_eq!(result.err(), Some(RequestError::EntityClosed));
        assert!(webrtc_server.closed());
        assert!(webrtc_server.webrtc_transports().is_empty());
        assert_eq!(new_transports.load(Ordering::SeqCst), 0);
        assert!(engine.requests("router.closeTransport").is_empty());
    });
}

#[test]
fn close_reaches_transports_without_handles() {
    future::block_on(async move {
        let (_worker, router, webrtc_server, _engine) = init().await;

        let transport = create_transport(&router, &webrtc_server).await;
        let base = Arc::clone(transport.base());

        // Registry does not keep the transport handle alive
        drop(transport);
        assert!(webrtc_server.webrtc_transports().is_empty());

        webrtc_server.close();

        assert!(base.closed());
        assert!(!router.closed());
    });
}
