use crate::{DeviceMessage, Event, Message, MessageError, MessageKind, NodeMessage, StatePayload};

use forgelink_types::{
    constants::STATE,
    payload::{Payload, StateBirthDeathCertificate},
};
use prost::Message as ProstMessage;

enum MessageProducer {
    Device,
    Node,
}

fn process_topic_message(
    message_part: &[u8],
    payload: &[u8],
) -> Result<(MessageProducer, Message), MessageError> {
    if message_part.len() < 2 {
        return Err(MessageError::InvalidTopic);
    }
    let producer = match message_part[0] {
        b'N' => MessageProducer::Node,
        b'D' => MessageProducer::Device,
        _ => return Err(MessageError::InvalidTopic),
    };

    let payload = match Payload::decode(payload) {
        Ok(payload) => payload,
        Err(e) => return Err(MessageError::DecodePayloadError(e)),
    };

    let kind = match &message_part[1..] {
        b"BIRTH" => MessageKind::Birth,
        b"DEATH" => MessageKind::Death,
        b"DATA" => MessageKind::Data,
        b"CMD" => MessageKind::Cmd,
        msg => MessageKind::Other(String::from_utf8(msg.into())?),
    };
    Ok((producer, Message { payload, kind }))
}

fn state_event(host_part: Option<&[u8]>, payload: &[u8]) -> Result<Event, MessageError> {
    let host_id = match host_part {
        Some(val) => String::from_utf8(val.to_vec())?,
        None => return Err(MessageError::InvalidTopic),
    };
    let certificate = StateBirthDeathCertificate::try_from(payload)
        .map_err(MessageError::StatePayloadJsonDecodeError)?;
    let payload = if certificate.online {
        StatePayload::Online {
            timestamp: certificate.timestamp,
        }
    } else {
        StatePayload::Offline {
            timestamp: certificate.timestamp,
        }
    };
    Ok(Event::State { host_id, payload })
}

fn parse_topic_and_payload(topic: &[u8], payload: &[u8]) -> Result<Event, MessageError> {
    let mut iter = topic.split(|c| *c == b'/');

    if iter.next().is_none() {
        return Err(MessageError::InvalidTopic);
    }

    let state_or_group_id = match iter.next() {
        Some(val) => val,
        None => return Err(MessageError::InvalidTopic),
    };

    if STATE.as_bytes().eq(state_or_group_id) {
        return state_event(iter.next(), payload);
    }

    let group_id = String::from_utf8(state_or_group_id.to_vec())?;

    let (message_producer, message) = match iter.next() {
        Some(val) => process_topic_message(val, payload)?,
        None => return Err(MessageError::InvalidTopic),
    };

    let node_id = match iter.next() {
        Some(val) => String::from_utf8(val.to_vec())?,
        None => return Err(MessageError::InvalidTopic),
    };

    let event = match message_producer {
        MessageProducer::Node => {
            if iter.next().is_some() {
                return Err(MessageError::InvalidTopic);
            }
            Event::Node(NodeMessage {
                group_id,
                node_id,
                message,
            })
        }
        MessageProducer::Device => {
            let device_id = match iter.next() {
                Some(val) => String::from_utf8(val.to_vec())?,
                None => return Err(MessageError::InvalidTopic),
            };
            if iter.next().is_some() {
                return Err(MessageError::InvalidTopic);
            }
            Event::Device(DeviceMessage {
                group_id,
                node_id,
                device_id,
                message,
            })
        }
    };
    Ok(event)
}

/// Decode a raw publish into an [Event]. Decode failures never
/// surface as errors to the event loop; they become
/// [Event::InvalidPublish] so the consumer can count and move on.
pub fn topic_and_payload_to_event(topic: Vec<u8>, payload: Vec<u8>) -> Event {
    match parse_topic_and_payload(&topic, &payload) {
        Ok(event) => event,
        Err(reason) => Event::InvalidPublish {
            reason,
            topic,
            payload,
        },
    }
}
