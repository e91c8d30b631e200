//! One logical event through every built-in decoder.
//!
//! The same `{name: John, age: 22, country: US}` event is published as
//! JSON, XML and key/value, and must come out as the same typed record
//! regardless of the wire format, both at the decoder level and through a
//! running source.

use std::sync::Arc;
use std::time::Duration;

use freshet_mq::broker::memory::MemoryBrokerProvider;
use freshet_mq::broker::{Payload, ProviderRegistry, RawMessage};
use freshet_mq::config::DestinationKind;
use freshet_mq::decode::DecoderRegistry;
use freshet_mq::record::{FieldType, Record, StreamField, Value};
use freshet_mq::testing::{CollectingSink, TestPublisher};
use freshet_mq::{ConnectorConfig, MqSource, MqSourceConfig, StreamSchema};

const JSON_BODY: &str = r#"{"name": "John", "age": 22, "country": "US"}"#;
const XML_BODY: &str =
    "<events><event><name>John</name><age>22</age><country>US</country></event></events>";
const KV_BODY: &str = "name: John\nage: 22\ncountry: US";

fn person_schema() -> Arc<StreamSchema> {
    Arc::new(StreamSchema::new(vec![
        StreamField::new("name", FieldType::String),
        StreamField::new("age", FieldType::Int),
        StreamField::new("country", FieldType::String),
    ]))
}

fn message(payload: Payload) -> RawMessage {
    RawMessage {
        message_id: "m-1".to_string(),
        destination: "orders".to_string(),
        payload,
        timestamp_ms: 0,
    }
}

fn expected_values() -> Vec<Value> {
    vec![
        Value::String("John".to_string()),
        Value::Int(22),
        Value::String("US".to_string()),
    ]
}

#[test]
fn test_decoders_agree_on_the_same_event() {
    let registry = DecoderRegistry::with_builtins();
    let schema = person_schema();

    let cases = [
        ("json", Payload::Text(JSON_BODY.to_string())),
        ("xml", Payload::Text(XML_BODY.to_string())),
        ("keyvalue", Payload::Text(KV_BODY.to_string())),
        (
            "keyvalue",
            Payload::Map(vec![
                ("name".to_string(), Value::String("John".into())),
                ("age".to_string(), Value::Int(22)),
                ("country".to_string(), Value::String("US".into())),
            ]),
        ),
    ];

    for (format, payload) in cases {
        let decoder = registry.instantiate(format, Arc::clone(&schema)).unwrap();
        let records = decoder.decode(&message(payload)).unwrap();
        assert_eq!(records.len(), 1, "{format} should yield one record");
        assert_eq!(
            records[0].values(),
            expected_values().as_slice(),
            "{format} decoded differently"
        );
    }
}

async fn run_pipeline(format: &str, publish: impl FnOnce(&TestPublisher)) -> Record {
    let provider = Arc::new(MemoryBrokerProvider::new());
    let registry = Arc::new(ProviderRegistry::new());
    registry.register("memory", Arc::clone(&provider) as _);

    let url = format!("vm://roundtrip-{format}");
    let config = ConnectorConfig::new("mq")
        .with("factory.initial", "memory")
        .with("provider.url", url.as_str())
        .with("destination", "orders")
        .with("format", format);

    let sink = Arc::new(CollectingSink::new());
    let source = MqSource::new(
        format!("roundtrip-{format}"),
        MqSourceConfig::from_config(&config).unwrap(),
        person_schema(),
        registry,
        Arc::new(DecoderRegistry::with_builtins()),
        Arc::clone(&sink) as _,
    );

    source.start().await.unwrap();
    publish(&TestPublisher::connect(&provider, &url));
    assert!(sink.wait_for(1, Duration::from_secs(5)).await);
    source.stop().await.unwrap();

    sink.records().remove(0)
}

#[tokio::test]
async fn test_pipeline_roundtrip_is_format_independent() {
    let from_json = run_pipeline("json", |p| {
        p.publish_text("orders", DestinationKind::Queue, JSON_BODY);
    })
    .await;
    let from_xml = run_pipeline("xml", |p| {
        p.publish_text("orders", DestinationKind::Queue, XML_BODY);
    })
    .await;
    let from_kv = run_pipeline("keyvalue", |p| {
        p.publish_map(
            "orders",
            DestinationKind::Queue,
            &[
                ("name", Value::String("John".into())),
                ("age", Value::Int(22)),
                ("country", Value::String("US".into())),
            ],
        );
    })
    .await;

    assert_eq!(from_json.values(), expected_values().as_slice());
    assert_eq!(from_json, from_xml);
    assert_eq!(from_json, from_kv);
}
