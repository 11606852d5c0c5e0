use forgelink_client::{DeviceMessage, MessageKind, NodeMessage};
use forgelink_types::{
    constants::BDSEQ,
    payload::{self, DataType, Payload},
    MetricId, MetricValue, Quality,
};
use log::debug;

use crate::NodeIdentifier;

/// Information about a metric provided from a birth message
#[derive(Debug, Clone)]
pub struct MetricBirthDetails {
    /// The name of the metric
    pub name: String,
    /// An optional alias. If set, future data messages refer to the
    /// metric with this value instead of the name.
    pub alias: Option<u64>,
    /// The datatype of the metric.
    pub datatype: DataType,
}

impl MetricBirthDetails {
    fn new(name: String, alias: Option<u64>, datatype: DataType) -> Self {
        Self {
            name,
            alias,
            datatype,
        }
    }
}

/// Information about a metric from a message
#[derive(Debug, Clone)]
pub struct MetricDetails {
    /// The value of the metric
    pub value: Option<MetricValue>,
    /// The timestamp associated with the value of the metric
    pub timestamp: u64,
    /// Quality code for the value
    pub quality: Quality,
}

fn metric_details_from_payload_metric(
    metric: &payload::Metric,
    payload_timestamp: u64,
) -> Result<MetricDetails, PayloadError> {
    let timestamp = metric.timestamp.unwrap_or(payload_timestamp);
    let value = if let Some(value) = &metric.value {
        Some(MetricValue::from(value.clone()))
    } else if let Some(true) = metric.is_null {
        None
    } else {
        return Err(PayloadError::MalformedMetric);
    };

    let quality = match metric.quality {
        Some(code) => Quality::try_from(code).map_err(|_| PayloadError::MalformedMetric)?,
        None => Quality::default(),
    };

    Ok(MetricDetails {
        value,
        timestamp,
        quality,
    })
}

pub(crate) fn get_metric_id_and_details_from_payload_metrics(
    metrics: Vec<payload::Metric>,
    payload_timestamp: u64,
) -> Result<Vec<(MetricId, MetricDetails)>, PayloadError> {
    let mut metric_id_details = Vec::with_capacity(metrics.len());
    for x in metrics {
        let details = metric_details_from_payload_metric(&x, payload_timestamp)?;
        let id = if let Some(alias) = x.alias {
            MetricId::Alias(alias)
        } else if let Some(name) = x.name {
            MetricId::Name(name)
        } else {
            return Err(PayloadError::MalformedMetric);
        };
        metric_id_details.push((id, details))
    }
    Ok(metric_id_details)
}

pub(crate) fn get_metric_birth_details_from_birth_metrics(
    metrics: Vec<payload::Metric>,
    payload_timestamp: u64,
) -> Result<Vec<(MetricBirthDetails, MetricDetails)>, PayloadError> {
    let mut results = Vec::with_capacity(metrics.len());

    for x in metrics {
        let details = metric_details_from_payload_metric(&x, payload_timestamp)?;
        let datatype = x
            .datatype
            .ok_or(PayloadError::MalformedMetric)?
            .try_into()
            .map_err(|_| PayloadError::MalformedMetric)?;
        let name = x.name.ok_or(PayloadError::MalformedMetric)?;
        let birth_details = MetricBirthDetails::new(name, x.alias, datatype);
        results.push((birth_details, details));
    }

    Ok(results)
}

fn bdseq_from_payload_metrics(metrics: &[payload::Metric]) -> Result<u8, PayloadError> {
    for x in metrics {
        match &x.name {
            Some(name) if name == BDSEQ => (),
            _ => continue,
        }
        let value = x.value.as_ref().ok_or(PayloadError::MissingBdseq)?;
        return match i64::try_from(MetricValue::from(value.clone())) {
            Ok(v) if (0..=u8::MAX as i64).contains(&v) => Ok(v as u8),
            Ok(v) => {
                debug!("Got invalid bdseq value = {v}");
                Err(PayloadError::MissingBdseq)
            }
            Err(_) => Err(PayloadError::MissingBdseq),
        };
    }
    Err(PayloadError::MissingBdseq)
}

/// Reasons a received payload could not be turned into an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    MissingSeq,
    MissingTimestamp,
    MissingBdseq,
    BirthSeqNotZero,
    MalformedMetric,
}

/// Details surrounding a payload that failed to decode into an event.
#[derive(Debug)]
pub struct PayloadErrorDetails {
    pub node_id: NodeIdentifier,
    pub device: Option<String>,
    pub error: PayloadError,
}

pub enum MessageTryFromError {
    PayloadError(PayloadErrorDetails),
    /// CMD and unknown verbs are not consumed by the application side.
    UnsupportedVerb,
}

#[derive(Debug)]
pub struct NBirth {
    pub bdseq: u8,
    pub timestamp: u64,
    pub metrics: Vec<(MetricBirthDetails, MetricDetails)>,
}

#[derive(Debug)]
pub struct NDeath {
    pub bdseq: u8,
}

#[derive(Debug)]
pub struct NData {
    pub seq: u8,
    pub timestamp: u64,
    pub metrics: Vec<(MetricId, MetricDetails)>,
}

#[derive(Debug)]
pub struct DBirth {
    pub seq: u8,
    pub timestamp: u64,
    pub metrics: Vec<(MetricBirthDetails, MetricDetails)>,
}

#[derive(Debug)]
pub struct DDeath {
    pub seq: u8,
    pub timestamp: u64,
}

#[derive(Debug)]
pub struct DData {
    pub seq: u8,
    pub timestamp: u64,
    pub metrics: Vec<(MetricId, MetricDetails)>,
}

#[derive(Debug)]
pub enum NodeEvent {
    Birth(NBirth),
    Death(NDeath),
    Data(NData),
}

#[derive(Debug)]
pub struct AppNodeEvent {
    pub id: NodeIdentifier,
    pub event: NodeEvent,
}

#[derive(Debug)]
pub enum DeviceEvent {
    Birth(DBirth),
    Death(DDeath),
    Data(DData),
}

#[derive(Debug)]
pub struct AppDeviceEvent {
    pub id: NodeIdentifier,
    pub device: String,
    pub event: DeviceEvent,
}

fn seq_and_timestamp(payload: &Payload) -> Result<(u8, u64), PayloadError> {
    let seq = payload.seq.ok_or(PayloadError::MissingSeq)? as u8;
    let timestamp = payload.timestamp.ok_or(PayloadError::MissingTimestamp)?;
    Ok((seq, timestamp))
}

impl TryFrom<NodeMessage> for AppNodeEvent {
    type Error = MessageTryFromError;

    fn try_from(message: NodeMessage) -> Result<Self, Self::Error> {
        let id = NodeIdentifier {
            group: message.group_id,
            node: message.node_id,
        };
        let payload = message.message.payload;

        let fail = |error: PayloadError, id: NodeIdentifier| {
            MessageTryFromError::PayloadError(PayloadErrorDetails {
                node_id: id,
                device: None,
                error,
            })
        };

        let event = match message.message.kind {
            MessageKind::Birth => {
                let (seq, timestamp) = match seq_and_timestamp(&payload) {
                    Ok(v) => v,
                    Err(e) => return Err(fail(e, id)),
                };
                if seq != 0 {
                    return Err(fail(PayloadError::BirthSeqNotZero, id));
                }
                let bdseq = match bdseq_from_payload_metrics(&payload.metrics) {
                    Ok(v) => v,
                    Err(e) => return Err(fail(e, id)),
                };
                let metrics =
                    match get_metric_birth_details_from_birth_metrics(payload.metrics, timestamp) {
                        Ok(v) => v,
                        Err(e) => return Err(fail(e, id)),
                    };
                NodeEvent::Birth(NBirth {
                    bdseq,
                    timestamp,
                    metrics,
                })
            }
            MessageKind::Death => {
                let bdseq = match bdseq_from_payload_metrics(&payload.metrics) {
                    Ok(v) => v,
                    Err(e) => return Err(fail(e, id)),
                };
                NodeEvent::Death(NDeath { bdseq })
            }
            MessageKind::Data => {
                let (seq, timestamp) = match seq_and_timestamp(&payload) {
                    Ok(v) => v,
                    Err(e) => return Err(fail(e, id)),
                };
                let metrics =
                    match get_metric_id_and_details_from_payload_metrics(payload.metrics, timestamp)
                    {
                        Ok(v) => v,
                        Err(e) => return Err(fail(e, id)),
                    };
                NodeEvent::Data(NData {
                    seq,
                    timestamp,
                    metrics,
                })
            }
            MessageKind::Cmd | MessageKind::Other(_) => {
                return Err(MessageTryFromError::UnsupportedVerb)
            }
        };

        Ok(AppNodeEvent { id, event })
    }
}

impl TryFrom<DeviceMessage> for AppDeviceEvent {
    type Error = MessageTryFromError;

    fn try_from(message: DeviceMessage) -> Result<Self, Self::Error> {
        let id = NodeIdentifier {
            group: message.group_id,
            node: message.node_id,
        };
        let device = message.device_id;
        let payload = message.message.payload;

        let fail = |error: PayloadError, id: NodeIdentifier, device: String| {
            MessageTryFromError::PayloadError(PayloadErrorDetails {
                node_id: id,
                device: Some(device),
                error,
            })
        };

        let (seq, timestamp) = match seq_and_timestamp(&payload) {
            Ok(v) => v,
            Err(e) => return Err(fail(e, id, device)),
        };

        let event = match message.message.kind {
            MessageKind::Birth => {
                let metrics =
                    match get_metric_birth_details_from_birth_metrics(payload.metrics, timestamp) {
                        Ok(v) => v,
                        Err(e) => return Err(fail(e, id, device)),
                    };
                DeviceEvent::Birth(DBirth {
                    seq,
                    timestamp,
                    metrics,
                })
            }
            MessageKind::Death => DeviceEvent::Death(DDeath { seq, timestamp }),
            MessageKind::Data => {
                let metrics =
                    match get_metric_id_and_details_from_payload_metrics(payload.metrics, timestamp)
                    {
                        Ok(v) => v,
                        Err(e) => return Err(fail(e, id, device)),
                    };
                DeviceEvent::Data(DData {
                    seq,
                    timestamp,
                    metrics,
                })
            }
            MessageKind::Cmd | MessageKind::Other(_) => {
                return Err(MessageTryFromError::UnsupportedVerb)
            }
        };

        Ok(AppDeviceEvent { id, device, event })
    }
}
