//! Wire-format tests for the realtime subscription protocol carried over
//! `POST /realtime`: a client posts a list of `Topic`s and reads back a
//! stream of tagged `SseEvent`s.

use headway_core::{OrderBy, ResourceType, SseEvent, Topic};
use serde_json::json;

#[test]
fn topic_list_deserializes_from_client_json() {
    let raw = json!([
        {
            "id": "t1",
            "resourceType": "collection",
            "resource": "posts",
            "orderBy": [{ "field": "createdAt", "descending": true }],
        }
    ]);

    let topics: Vec<Topic> = serde_json::from_value(raw).unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].id, "t1");
    assert_eq!(topics[0].resource_type, ResourceType::Collection);
    assert_eq!(topics[0].resource, "posts");
    assert_eq!(topics[0].order_by, vec![OrderBy { field: "createdAt".to_string(), descending: true }]);
    assert!(topics[0].where_.is_none());
    assert!(topics[0].with.is_none());
}

#[test]
fn topic_key_groups_collection_and_global_separately() {
    let collection_topic = Topic {
        id: "a".to_string(),
        resource_type: ResourceType::Collection,
        resource: "posts".to_string(),
        where_: None,
        with: None,
        order_by: vec![],
        pagination: Default::default(),
    };
    let global_topic = Topic {
        id: "b".to_string(),
        resource_type: ResourceType::Global,
        resource: "posts".to_string(),
        where_: None,
        with: None,
        order_by: vec![],
        pagination: Default::default(),
    };

    assert_ne!(collection_topic.key(), global_topic.key());
}

#[test]
fn sse_event_snapshot_serializes_with_event_tag() {
    let event = SseEvent::Snapshot {
        topic_id: "t1".to_string(),
        seq: 42,
        data: json!({ "docs": [] }),
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["event"], "snapshot");
    assert_eq!(value["topicId"], "t1");
    assert_eq!(value["seq"], 42);
}

#[test]
fn sse_event_error_round_trips() {
    let event = SseEvent::Error { topic_id: "t1".to_string(), message: "boom".to_string() };
    let raw = serde_json::to_string(&event).unwrap();
    let parsed: SseEvent = serde_json::from_str(&raw).unwrap();

    match parsed {
        SseEvent::Error { topic_id, message } => {
            assert_eq!(topic_id, "t1");
            assert_eq!(message, "boom");
        }
        other => panic!("expected Error event, got {other:?}"),
    }
}
