use std::{sync::Arc, time::Duration};

use forgelink_app::{
    FaultEvent, PipelineConfig, SignalType, StreamOrchestrator, SubscriptionConfig, TagMap,
    TagMapping, TelemetryRecord,
};
use forgelink_client::{
    channel::ChannelEventLoop, Event, Message, MessageKind, NodeMessage,
};
use forgelink_types::{
    payload::{metric, DataType, Metric, Payload},
    utils::timestamp,
};
use tokio::time::timeout;

fn tag_map() -> Arc<TagMap> {
    Arc::new(
        TagMap::new(vec![
            TagMapping {
                source_tag: "Line 1/Temp".into(),
                signal_type: SignalType::Process("process.temperature".into()),
                machine_id: "press-03".into(),
                line_id: "line-1".into(),
                site_id: "plant1".into(),
                scale: 2.0,
                offset: 0.0,
                unit: Some("degC".into()),
                deadband_absolute: None,
                deadband_percent: None,
                min_quality: 192,
            },
            TagMapping {
                source_tag: "Fault/Code".into(),
                signal_type: SignalType::FaultCode,
                machine_id: "press-03".into(),
                line_id: "line-1".into(),
                site_id: "plant1".into(),
                scale: 1.0,
                offset: 0.0,
                unit: None,
                deadband_absolute: None,
                deadband_percent: None,
                min_quality: 0,
            },
        ])
        .unwrap(),
    )
}

fn bdseq_metric() -> Metric {
    let mut m = Metric::new();
    m.set_name("bdseq".into())
        .set_value(metric::Value::LongValue(0))
        .set_timestamp(timestamp());
    m
}

fn birth_metric(name: &str, alias: u64, datatype: DataType, value: metric::Value) -> Metric {
    let mut m = Metric::new();
    m.set_name(name.into())
        .set_alias(alias)
        .set_datatype(datatype)
        .set_value(value)
        .set_timestamp(timestamp());
    m
}

fn birth_metric_null(name: &str, alias: u64, datatype: DataType) -> Metric {
    let mut m = Metric::new();
    m.set_name(name.into())
        .set_alias(alias)
        .set_datatype(datatype)
        .set_null()
        .set_timestamp(timestamp());
    m
}

fn alias_metric(alias: u64, value: metric::Value) -> Metric {
    let mut m = Metric::new();
    m.set_alias(alias).set_value(value).set_timestamp(timestamp());
    m
}

fn node_message(kind: MessageKind, seq: u64, metrics: Vec<Metric>) -> Event {
    Event::Node(NodeMessage {
        group_id: "plant1".into(),
        node_id: "gateway-a".into(),
        message: Message {
            kind,
            payload: Payload {
                timestamp: Some(timestamp()),
                metrics,
                seq: Some(seq),
            },
        },
    })
}

async fn next_telemetry(
    rx: &mut tokio::sync::mpsc::Receiver<TelemetryRecord>,
) -> TelemetryRecord {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for telemetry")
        .expect("telemetry channel closed")
}

#[tokio::test]
async fn decode_normalize_and_fault_flow() {
    let (eventloop, client, broker) = ChannelEventLoop::new();
    let (orchestrator, app_client, _handle, mut telemetry_rx, mut events_rx) =
        StreamOrchestrator::new(
            "scada-host",
            SubscriptionConfig::SingleGroup {
                group_id: "plant1".into(),
            },
            eventloop,
            client,
            tag_map(),
            PipelineConfig::default(),
        )
        .unwrap();
    let stats = orchestrator.stats();
    let run_task = tokio::spawn(orchestrator.run());

    broker.tx_event.send(Event::Online).unwrap();

    // birth declares the alias table and carries initial values
    broker
        .tx_event
        .send(node_message(
            MessageKind::Birth,
            0,
            vec![
                bdseq_metric(),
                birth_metric(
                    "Line 1/Temp",
                    10,
                    DataType::Double,
                    metric::Value::DoubleValue(20.0),
                ),
                birth_metric_null("Fault/Code", 11, DataType::String),
            ],
        ))
        .unwrap();

    // the birth's initial temperature flows through normalization
    match next_telemetry(&mut telemetry_rx).await {
        TelemetryRecord::Metric(m) => {
            assert_eq!(m.machine_id, "press-03");
            assert_eq!(m.value.as_f64(), Some(40.0)); // scale 2.0 applied
        }
        other => panic!("expected metric, got {other:?}"),
    }

    // alias-referenced data resolves against the birth
    broker
        .tx_event
        .send(node_message(
            MessageKind::Data,
            1,
            vec![alias_metric(10, metric::Value::DoubleValue(25.0))],
        ))
        .unwrap();
    match next_telemetry(&mut telemetry_rx).await {
        TelemetryRecord::Metric(m) => {
            assert_eq!(m.value.as_f64(), Some(50.0));
            assert_eq!(m.unit.as_deref(), Some("degC"));
        }
        other => panic!("expected metric, got {other:?}"),
    }

    // an unknown alias is dropped and counted, never guessed
    broker
        .tx_event
        .send(node_message(
            MessageKind::Data,
            2,
            vec![alias_metric(99, metric::Value::DoubleValue(1.0))],
        ))
        .unwrap();

    // a sequence jump is counted once and processing continues
    broker
        .tx_event
        .send(node_message(
            MessageKind::Data,
            5,
            vec![alias_metric(10, metric::Value::DoubleValue(30.0))],
        ))
        .unwrap();
    match next_telemetry(&mut telemetry_rx).await {
        TelemetryRecord::Metric(m) => assert_eq!(m.value.as_f64(), Some(60.0)),
        other => panic!("expected metric, got {other:?}"),
    }

    // a fault code raises exactly one fault on the events channel
    broker
        .tx_event
        .send(node_message(
            MessageKind::Data,
            6,
            vec![alias_metric(11, metric::Value::StringValue("2001".into()))],
        ))
        .unwrap();
    let fault_event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("timed out waiting for fault event")
        .expect("event channel closed");
    match fault_event {
        FaultEvent::Raised(fault) => {
            assert_eq!(fault.machine_id, "press-03");
            assert_eq!(fault.fault_code, "2001");
        }
        other => panic!("expected raised fault, got {other:?}"),
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.unresolved_aliases, 1);
    assert_eq!(snapshot.sequence_gaps, 1);
    assert_eq!(snapshot.births, 1);
    // bdseq has no tag mapping, as do fault-code birth placeholders
    assert!(snapshot.dropped_no_mapping >= 1);

    app_client.cancel().await;
    broker.tx_event.send(Event::Offline).unwrap();
    _ = timeout(Duration::from_secs(3), run_task).await;
}

#[tokio::test]
async fn alias_is_dead_after_node_death() {
    let (eventloop, client, broker) = ChannelEventLoop::new();
    let (orchestrator, app_client, _handle, mut telemetry_rx, _events_rx) =
        StreamOrchestrator::new(
            "scada-host",
            SubscriptionConfig::AllGroups,
            eventloop,
            client,
            tag_map(),
            PipelineConfig::default(),
        )
        .unwrap();
    let stats = orchestrator.stats();
    let run_task = tokio::spawn(orchestrator.run());

    broker.tx_event.send(Event::Online).unwrap();
    broker
        .tx_event
        .send(node_message(
            MessageKind::Birth,
            0,
            vec![
                bdseq_metric(),
                birth_metric(
                    "Line 1/Temp",
                    10,
                    DataType::Double,
                    metric::Value::DoubleValue(20.0),
                ),
            ],
        ))
        .unwrap();
    let _ = next_telemetry(&mut telemetry_rx).await;

    broker
        .tx_event
        .send(node_message(MessageKind::Death, 0, vec![bdseq_metric()]))
        .unwrap();

    // after death the alias no longer resolves
    broker
        .tx_event
        .send(node_message(
            MessageKind::Data,
            1,
            vec![alias_metric(10, metric::Value::DoubleValue(25.0))],
        ))
        .unwrap();

    // drive a sync point through the pipeline so the counter is visible
    broker
        .tx_event
        .send(node_message(
            MessageKind::Birth,
            0,
            vec![
                bdseq_metric(),
                birth_metric(
                    "Line 1/Temp",
                    10,
                    DataType::Double,
                    metric::Value::DoubleValue(99.0),
                ),
            ],
        ))
        .unwrap();
    let _ = next_telemetry(&mut telemetry_rx).await;

    assert_eq!(stats.snapshot().unresolved_aliases, 1);
    assert_eq!(stats.snapshot().deaths, 1);

    app_client.cancel().await;
    broker.tx_event.send(Event::Offline).unwrap();
    _ = timeout(Duration::from_secs(3), run_task).await;
}
