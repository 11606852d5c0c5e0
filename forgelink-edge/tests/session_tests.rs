use std::time::Duration;

use forgelink_client::{
    channel::{ChannelBroker, ChannelEventLoop, OutboundMessage},
    Event,
};
use forgelink_edge::{Delivery, EdgeNodeBuilder, MetricPublisher, PublishMetric};
use forgelink_types::{
    constants,
    payload::{metric::Value, Message as _, Payload},
    topic::QoS,
    MetricId, MetricValue,
};
use tokio::time::timeout;

async fn next_outbound(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(1), broker.rx_outbound.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("broker channel closed")
}

fn bdseq_value(payload: &Payload) -> i64 {
    for metric in &payload.metrics {
        if metric.name.as_deref() == Some(constants::BDSEQ) {
            if let Some(value) = &metric.value {
                return i64::try_from(MetricValue::from(value.clone())).unwrap();
            }
        }
    }
    panic!("payload did not contain a bdseq metric");
}

#[tokio::test]
async fn birth_on_online_with_sequence_zero() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, _handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    tokio::spawn(node.run());

    broker.tx_event.send(Event::Online).unwrap();

    let subscribe = next_outbound(&mut broker).await;
    assert!(matches!(subscribe, OutboundMessage::Subscribe(_)));

    let birth = next_outbound(&mut broker).await;
    match birth {
        OutboundMessage::NodeMessage { topic, payload } => {
            assert_eq!(topic.topic, "fglv1.0/plant1/NBIRTH/gateway-a");
            assert_eq!(topic.get_publish_quality_retain(), (QoS::AtLeastOnce, true));
            assert_eq!(payload.seq, Some(0));
            assert_eq!(bdseq_value(&payload), 0);
        }
        message => panic!("expected node birth, got {message:?}"),
    }

    // the last will registered before connecting is the death certificate
    let will = broker.last_will().unwrap();
    assert_eq!(will.topic, "fglv1.0/plant1/NDEATH/gateway-a");
    let will_payload = Payload::decode(will.payload.as_slice()).unwrap();
    assert_eq!(bdseq_value(&will_payload), 0);
}

#[tokio::test]
async fn data_publishes_increment_sequence() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    tokio::spawn(node.run());

    broker.tx_event.send(Event::Online).unwrap();
    let _subscribe = next_outbound(&mut broker).await;
    let _birth = next_outbound(&mut broker).await;

    for expected_seq in 1..=3u64 {
        let delivery = handle
            .publish_metric(PublishMetric::new_raw(
                MetricId::Name("Line 1/Counter/Good".into()),
                Some(MetricValue::from(expected_seq as f64)),
            ))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Sent);

        match next_outbound(&mut broker).await {
            OutboundMessage::NodeMessage { topic, payload } => {
                assert_eq!(topic.topic, "fglv1.0/plant1/NDATA/gateway-a");
                assert_eq!(payload.seq, Some(expected_seq));
            }
            message => panic!("expected node data, got {message:?}"),
        }
    }
}

#[tokio::test]
async fn offline_publishes_are_queued_and_replayed_in_order() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    tokio::spawn(node.run());

    // never been online: everything lands in the queue
    for n in 0..3u64 {
        let delivery = handle
            .publish_metric(PublishMetric::new_raw(
                MetricId::Name("tag".into()),
                Some(MetricValue::from(n as f64)),
            ))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Queued);
    }
    assert_eq!(handle.queue_depth(), 3);

    broker.tx_event.send(Event::Online).unwrap();
    let _subscribe = next_outbound(&mut broker).await;

    // birth goes out first, then the queued messages strictly in enqueue order
    match next_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, payload } => {
            assert!(topic.topic.contains("NBIRTH"));
            assert_eq!(payload.seq, Some(0));
        }
        message => panic!("expected birth, got {message:?}"),
    }

    let mut replayed_values = Vec::new();
    for _ in 0..3 {
        match next_outbound(&mut broker).await {
            OutboundMessage::NodeMessage { topic, payload } => {
                assert!(topic.topic.contains("NDATA"));
                match payload.metrics[0].value.as_ref().unwrap() {
                    Value::DoubleValue(v) => replayed_values.push(*v),
                    other => panic!("unexpected value {other:?}"),
                }
            }
            message => panic!("expected replayed data, got {message:?}"),
        }
    }
    assert_eq!(replayed_values, vec![0.0, 1.0, 2.0]);
    assert_eq!(handle.queue_depth(), 0);
}

#[tokio::test]
async fn device_birth_and_data_share_node_sequence() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    tokio::spawn(node.run());

    broker.tx_event.send(Event::Online).unwrap();
    let _subscribe = next_outbound(&mut broker).await;
    let _birth = next_outbound(&mut broker).await;

    let device = handle
        .register_device("press-03", forgelink_edge::NoMetricManager::new())
        .await
        .unwrap();
    device.enable().await;

    match next_outbound(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, payload } => {
            assert_eq!(topic.topic, "fglv1.0/plant1/DBIRTH/gateway-a/press-03");
            // device births draw from the node's sequence counter
            assert_eq!(payload.seq, Some(1));
        }
        message => panic!("expected device birth, got {message:?}"),
    }

    let delivery = device
        .publish_metric(PublishMetric::new_raw(
            MetricId::Name("Counter/Good".into()),
            Some(MetricValue::from(12u32)),
        ))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Sent);

    match next_outbound(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, payload } => {
            assert_eq!(topic.topic, "fglv1.0/plant1/DDATA/gateway-a/press-03");
            assert_eq!(payload.seq, Some(2));
        }
        message => panic!("expected device data, got {message:?}"),
    }

    // disabling the device publishes its death certificate
    device.disable().await;
    match next_outbound(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, .. } => {
            assert_eq!(topic.topic, "fglv1.0/plant1/DDEATH/gateway-a/press-03");
        }
        message => panic!("expected device death, got {message:?}"),
    }
}

#[tokio::test]
async fn offline_increments_bdseq_and_rebirths() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, _handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    tokio::spawn(node.run());

    broker.tx_event.send(Event::Online).unwrap();
    let _subscribe = next_outbound(&mut broker).await;
    let _birth = next_outbound(&mut broker).await;

    broker.tx_event.send(Event::Offline).unwrap();
    broker.tx_event.send(Event::Online).unwrap();

    let _subscribe = next_outbound(&mut broker).await;
    match next_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, payload } => {
            assert!(topic.topic.contains("NBIRTH"));
            assert_eq!(payload.seq, Some(0));
            // the session died once, so the birth/death counter moved on
            assert_eq!(bdseq_value(&payload), 1);
        }
        message => panic!("expected rebirth, got {message:?}"),
    }

    // the refreshed last will carries the new bdseq
    let will = broker.last_will().unwrap();
    let will_payload = Payload::decode(will.payload.as_slice()).unwrap();
    assert_eq!(bdseq_value(&will_payload), 1);
}

#[tokio::test]
async fn cancel_publishes_death_certificate() {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (node, handle) = EdgeNodeBuilder::new(eventloop, client)
        .with_group_id("plant1")
        .with_node_id("gateway-a")
        .build()
        .unwrap();
    let run_task = tokio::spawn(node.run());

    broker.tx_event.send(Event::Online).unwrap();
    let _subscribe = next_outbound(&mut broker).await;
    let _birth = next_outbound(&mut broker).await;

    handle.cancel().await;

    match next_outbound(&mut broker).await {
        OutboundMessage::NodeMessage { topic, .. } => {
            assert_eq!(topic.topic, "fglv1.0/plant1/NDEATH/gateway-a");
        }
        message => panic!("expected death certificate, got {message:?}"),
    }
    match next_outbound(&mut broker).await {
        OutboundMessage::Disconnect => (),
        message => panic!("expected disconnect, got {message:?}"),
    }

    broker.tx_event.send(Event::Offline).unwrap();
    _ = timeout(Duration::from_secs(1), run_task).await;
}
