use super::*;
use crate::messages::WorkerDumpRequest;
use serde_json::json;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum TestNotification {
    #[serde(rename_all = "camelCase")]
    Score { producer_score: u8 },
    LayersChange(Option<u8>),
    ProducerClose,
}

#[test]
fn engine_messages_are_classified() {
    assert!(matches!(
        deserialize_message(br#"{"id":1,"accepted":true}"#),
        EngineMessage::Json(ChannelReceiveMessage::ResponseSuccess { id: 1, data: None, .. })
    ));
    assert!(matches!(
        deserialize_message(br#"{"id":2,"error":"TypeError","reason":"bad"}"#),
        EngineMessage::Json(ChannelReceiveMessage::ResponseError { id: 2, reason, .. }) if reason == "bad"
    ));
    assert!(matches!(
        deserialize_message(br#"{"targetId":"x","event":"close"}"#),
        EngineMessage::Json(ChannelReceiveMessage::Notification { data: Value::Null, .. })
    ));
    assert!(matches!(
        deserialize_message(b"Dhello"),
        EngineMessage::Debug(text) if text == "hello"
    ));
    assert!(matches!(deserialize_message(b"Wwarn"), EngineMessage::Warn(_)));
    assert!(matches!(deserialize_message(b"Eerror"), EngineMessage::Error(_)));
    assert!(matches!(deserialize_message(b"Xdump"), EngineMessage::Dump(_)));
    assert!(matches!(deserialize_message(b"?"), EngineMessage::Unexpected(_)));
    assert!(matches!(
        deserialize_message(b"{not json"),
        EngineMessage::Unexpected(_)
    ));
}

#[test]
fn notifications_parse_by_event() {
    let message = |event: &str, data: Value| NotificationMessage {
        event: event.to_string(),
        data,
    };

    assert_eq!(
        message("score", json!({ "producerScore": 7 }))
            .parse::<TestNotification>()
            .expect("Failed to parse"),
        TestNotification::Score { producer_score: 7 },
    );
    assert_eq!(
        message("layerschange", json!(2))
            .parse::<TestNotification>()
            .expect("Failed to parse"),
        TestNotification::LayersChange(Some(2)),
    );
    assert_eq!(
        message("producerclose", Value::Null)
            .parse::<TestNotification>()
            .expect("Failed to parse"),
        TestNotification::ProducerClose,
    );

    let error = message("unknown", Value::Null)
        .parse::<TestNotification>()
        .expect_err("Unknown event parsed");
    assert!(error.to_string().contains("\"unknown\""));
}

#[test]
fn failed_send_leaves_no_pending_request() {
    let executor = Executor::new();
    let (to_engine, engine_receiver) = async_channel::unbounded::<Vec<u8>>();
    let (_engine_sender, from_engine) = async_channel::unbounded::<Vec<u8>>();
    drop(engine_receiver);

    let channel = Channel::new(
        &executor,
        EngineLink::new(to_engine, from_engine),
        Duration::from_secs(1),
    );

    for _ in 0..2 {
        assert_eq!(
            future::block_on(channel.request("", WorkerDumpRequest {})).err(),
            Some(RequestError::ChannelClosed),
        );
    }

    let requests_container = channel.inner.requests_container.lock();
    assert!(requests_container.handlers.is_empty());
    assert_eq!(requests_container.next_id, 2);
}
