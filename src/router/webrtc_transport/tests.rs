use crate::data_structures::{
    DtlsFingerprint, DtlsFingerprintAlgorithm, DtlsParameters, DtlsRole, DtlsState,
    IceCandidateType, IceRole, IceState, ListenInfo, Protocol, SctpState, TransportTuple,
};
use crate::router::{NewTransport, Router};
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::transport::{Transport, TransportType};
use crate::webrtc_server::{WebRtcServerListenInfos, WebRtcServerOptions};
use crate::webrtc_transport::{
    EmptyListError, WebRtcTransportListenInfos, WebRtcTransportOptions,
    WebRtcTransportRemoteParameters,
};
use crate::worker::fake_engine::{self, FakeEngine};
use crate::worker::{RequestError, Worker};
use futures_lite::future;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn init() -> (Worker, Router, FakeEngine) {
    fake_engine::create_router().await
}

fn remote_dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Server,
        fingerprints: vec![DtlsFingerprint::parse(
            DtlsFingerprintAlgorithm::Sha256,
            "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57:AC:2D:65:E5:80:C4:B6:FB:AF:1A:A0:21:9F:6D:0C:AD",
        )
        .expect("Bad fingerprint")],
    }
}

#[test]
fn create_succeeds() {
    future::block_on(async move {
        let (_worker, router, engine) = init().await;

        let new_transports_count = Arc::new(AtomicUsize::new(0));
        router
            .on_new_transport({
                let new_transports_count = Arc::clone(&new_transports_count);

                move |transport| {
                    assert!(matches!(transport, NewTransport::WebRtc(_)));
                    assert_eq!(transport.transport_type(), TransportType::WebRtc);
                    new_transports_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let transport = router
            .create_webrtc_transport({
                let mut transport_options = WebRtcTransportOptions::new(
                    WebRtcTransportListenInfos::new(fake_engine::listen_info()).insert({
                        let mut listen_info = ListenInfo::new(
                            Protocol::Tcp,
                            IpAddr::V4(Ipv4Addr::LOCALHOST),
                        );
                        listen_info.announced_address = Some("9.9.9.1".to_string());
                        listen_info
                    }),
                );
                transport_options.enable_tcp = true;
                transport_options.enable_sctp = true;
                transport_options.num_sctp_streams = NumSctpStreams { os: 2048, mis: 2048 };
                transport_options.max_sctp_message_size = 1_000_000;
                transport_options
            })
            .await
            .expect("Failed to create WebRTC transport");

        assert_eq!(new_transports_count.load(Ordering::SeqCst), 1);
        assert!(!transport.closed());
        assert_eq!(transport.router_id(), router.id());
        assert_eq!(transport.ice_role(), IceRole::Controlled);
        assert_eq!(transport.ice_parameters().ice_lite, Some(true));
        assert_eq!(transport.ice_parameters().username_fragment, "ufrag0000");
        assert_eq!(transport.ice_candidates().len(), 1);
        assert_eq!(transport.ice_candidates()[0].r#type, IceCandidateType::Host);
        assert_eq!(transport.ice_state(), IceState::New);
        assert_eq!(transport.ice_selected_tuple(), None);
        assert_eq!(transport.dtls_parameters().role, DtlsRole::Auto);
        assert_eq!(
            transport.dtls_parameters().fingerprints[0].algorithm(),
            DtlsFingerprintAlgorithm::Sha256,
        );
        assert_eq!(transport.dtls_state(), DtlsState::New);
        assert_eq!(transport.dtls_remote_cert(), None);
        assert_eq!(
            transport.sctp_parameters(),
            Some(SctpParameters {
                port: 5000,
                os: 2048,
                mis: 2048,
                max_message_size: 1_000_000,
            }),
        );
        assert_eq!(transport.sctp_state(), Some(SctpState::New));

        let requests = engine.requests("router.createWebRtcTransport");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].handler_id, router.id().to_string());
        assert_eq!(
            requests[0].data["transportId"],
            json!(transport.id().to_string()),
        );
        assert_eq!(
            requests[0].data["listenInfos"],
            json!([
                { "protocol": "udp", "ip": "127.0.0.1" },
                { "protocol": "tcp", "ip": "127.0.0.1", "announcedAddress": "9.9.9.1" },
            ]),
        );
        assert_eq!(requests[0].data["enableTcp"], json!(true));
        assert_eq!(requests[0].data["numSctpStreams"], json!({ "OS": 2048, "MIS": 2048 }));
    });
}

#[test]
fn create_without_sctp() {
    future::block_on(async move {
        let (_worker, router, _engine) = init().await;

        let transport = router
            .create_webrtc_transport(WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            ))
            .await
            .expect("Failed to create WebRTC transport");

        assert_eq!(transport.sctp_parameters(), None);
        assert_eq!(transport.sctp_state(), None);
    });
}

#[test]
fn empty_listen_infos_are_rejected() {
    assert_eq!(
        WebRtcTransportListenInfos::try_from(Vec::<ListenInfo>::new()).err(),
        Some(EmptyListError),
    );
}

#[test]
fn create_rejected_by_engine_leaves_no_state() {
    future::block_on(async move {
        let (_worker, router, engine) = init().await;

        engine.fail("router.createWebRtcTransport", "port in use");

        let new_transports_count = Arc::new(AtomicUsize::new(0));
        router
            .on_new_transport({
                let new_transports_count = Arc::clone(&new_transports_count);

                move |_transport| {
                    new_transports_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .detach();

        let result = router
            .create_webrtc_transport(WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            ))
            .await;

        assert_eq!(
            result.err(),
            Some(RequestError::Response {
                reason: "port in use".to_string(),
            }),
        );
        assert_eq!(new_transports_count.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn connect_and_restart_ice() {
    future::block_on(async move {
        let (_worker, router, engine) = init().await;

        let transport = router
            .create_webrtc_transport(WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            ))
            .await
            .expect("Failed to create WebRTC transport");

        transport
            .connect(WebRtcTransportRemoteParameters {
                dtls_parameters: remote_dtls_parameters(),
            })
            .await
            .expect("Failed to connect");

        assert_eq!(transport.dtls_parameters().role, DtlsRole::Client);

        let requests = engine.requests("transport.connect");
        assert_eq!(requests[0].handler_id, transport.id().to_string());
        assert_eq!(
            requests[0].data["dtlsParameters"]["role"],
            json!("server"),
        );

        let ice_parameters = transport.restart_ice().await.expect("Failed to restart ICE");

        assert_eq!(ice_parameters.username_fragment, "ufrag1111");
        assert_eq!(transport.ice_parameters(), ice_parameters);
    });
}

#[test]
fn engine_notifications_update_state() {
    future::block_on(async move {
        let (_worker, router, engine) = init().await;

        let transport = router
            .create_webrtc_transport({
                let mut transport_options = WebRtcTransportOptions::new(
                    WebRtcTransportListenInfos::new(fake_engine::listen_info()),
                );
                transport_options.enable_sctp = true;
                transport_options
            })
            .await
            .expect("Failed to create WebRTC transport");

        let (ice_tx, ice_rx) = async_channel::unbounded::<IceState>();
        transport
            .on_ice_state_change(move |ice_state| {
                let _ = ice_tx.try_send(ice_state);
            })
            .detach();
        let (tuple_tx, tuple_rx) = async_channel::unbounded::<TransportTuple>();
        transport
            .on_ice_selected_tuple_change(move |tuple| {
                let _ = tuple_tx.try_send(tuple.clone());
            })
            .detach();
        let (dtls_tx, dtls_rx) = async_channel::unbounded::<DtlsState>();
        transport
            .observer()
            .on_dtls_state_change(move |dtls_state| {
                let _ = dtls_tx.try_send(dtls_state);
            })
            .detach();
        let (sctp_tx, sctp_rx) = async_channel::unbounded::<SctpState>();
        transport
            .on_sctp_state_change(move |sctp_state| {
                let _ = sctp_tx.try_send(sctp_state);
            })
            .detach();

        engine.notify(
            transport.id(),
            "icestatechange",
            json!({ "iceState": "completed" }),
        );
        assert_eq!(ice_rx.recv().await.expect("No ICE state"), IceState::Completed);
        assert_eq!(transport.ice_state(), IceState::Completed);

        engine.notify(
            transport.id(),
            "iceselectedtuplechange",
            json!({
                "iceSelectedTuple": {
                    "localAddress": "127.0.0.1",
                    "localPort": 40001,
                    "remoteIp": "10.0.0.2",
                    "remotePort": 5555,
                    "protocol": "udp",
                },
            }),
        );
        let tuple = tuple_rx.recv().await.expect("No selected tuple");
        assert_eq!(tuple.remote_port(), Some(5555));
        assert_eq!(transport.ice_selected_tuple(), Some(tuple));

        engine.notify(
            transport.id(),
            "dtlsstatechange",
            json!({ "dtlsState": "connected", "dtlsRemoteCert": "CERT" }),
        );
        assert_eq!(dtls_rx.recv().await.expect("No DTLS state"), DtlsState::Connected);
        assert_eq!(transport.dtls_state(), DtlsState::Connected);
        assert_eq!(transport.dtls_remote_cert(), Some("CERT".to_string()));

        engine.notify(
            transport.id(),
            "sctpstatechange",
            json!({ "sctpState": "connected" }),
        );
        assert_eq!(sctp_rx.recv().await.expect("No SCTP state"), SctpState::Connected);
        assert_eq!(transport.sctp_state(), Some(SctpState::Connected));

        transport.close();

        assert_eq!(transport.ice_state(), IceState::Closed);
        assert_eq!(transport.ice_selected_tuple(), None);
        assert_eq!(transport.dtls_state(), DtlsState::Closed);
        assert_eq!(transport.sctp_state(), Some(SctpState::Closed));
    });
}

#[test]
fn router_close_event() {
    future::block_on(async move {
        let (_worker, router, _engine) = init().await;

        let transport = router
            .create_webrtc_transport(WebRtcTransportOptions::new(
                WebRtcTransportListenInfos::new(fake_engine::listen_info()),
            ))
            .await
            .expect("Failed to create WebRTC transport");

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
    });
}

#[test]
fn webrtc_server_close_event() {
    future::block_on(async move {
        let (worker, router, engine) = init().await;

        let webrtc_server = worker
            .create_webrtc_server(WebRtcServerOptions::new(WebRtcServerListenInfos::new(
                fake_engine::listen_info(),
            )))
            .await
            .expect("Failed to create WebRTC server");

        let transport = router
            .create_webrtc_transport(WebRtcTransportOptions::new_with_server(
                webrtc_server.clone(),
            ))
            .await
            .expect("Failed to create WebRTC transport");

        let requests = engine.requests("router.createWebRtcTransport");
        assert_eq!(
            requests[0].data["webRtcServerId"],
            json!(webrtc_server.id().to_string()),
        );
        assert!(requests[0].data.get("listenInfos").is_none());

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = transport.on_close(Box::new(move || {
            let _ = close_tx.send(());
        }));

        let (mut webrtc_server_close_tx, webrtc_server_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = transport.on_webrtc_server_close(move || {
            let _ = webrtc_server_close_tx.send(());
        });

        webrtc_server.close();

        webrtc_server_close_rx
            .await
            .expect("Failed to receive webrtc_server_close event");
        close_rx.await.expect("Failed to receive close event");

        assert!(transport.closed());
        assert!(!router.closed());
        assert!(engine.requests("router.closeTransport").is_empty());
    });
}

#[test]
fn create_on_closed_webrtc_server_fails() {
    future::block_on(async move {
        let (worker, router, engine) = init().await;

        let webrtc_server = worker
            .create_webrtc_server(WebRtcServerOptions::new(WebRtcServerListenInfos::new(
                fake_engine::listen_info(),
            )))
            .await
            .expect("Failed to create WebRTC server");

        webrtc_server.close();

        let result = router
            .create_webrtc_transport(WebRtcTransportOptions::new_with_server(webrtc_server))
            .await;

        assert_eq!(result.err(), Some(RequestError::EntityClosed));
        assert!(engine.requests("router.createWebRtcTransport").is_empty());
    });
}
