use serde::{Deserialize, Serialize};

pub use prost::Message;

/// A wire payload. One payload is published per topic message and
/// carries the payload timestamp, the per-node sequence number and a
/// batch of metrics.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    #[prost(uint64, optional, tag = "1")]
    pub timestamp: Option<u64>,
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
    #[prost(uint64, optional, tag = "3")]
    pub seq: Option<u64>,
}

/// A single metric inside a [Payload].
///
/// Birth messages carry `name`, `alias` and `datatype`; data messages
/// refer back to the birth via `alias` alone. `quality` is a 0-255
/// code where values >= 192 are good.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub alias: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "4")]
    pub datatype: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub quality: Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub is_null: Option<bool>,
    #[prost(oneof = "metric::Value", tags = "10, 11, 12, 13, 14, 15")]
    pub value: Option<metric::Value>,
}

pub mod metric {
    /// Scalar metric value. Signed integers are packed two's
    /// complement into the unsigned variants.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(uint32, tag = "10")]
        IntValue(u32),
        #[prost(uint64, tag = "11")]
        LongValue(u64),
        #[prost(float, tag = "12")]
        FloatValue(f32),
        #[prost(double, tag = "13")]
        DoubleValue(f64),
        #[prost(bool, tag = "14")]
        BooleanValue(bool),
        #[prost(string, tag = "15")]
        StringValue(String),
    }
}

impl Metric {
    pub fn new() -> Self {
        Self {
            name: None,
            alias: None,
            timestamp: None,
            datatype: None,
            quality: None,
            is_null: Some(true),
            value: None,
        }
    }

    pub fn set_name(&mut self, name: String) -> &mut Self {
        self.name = Some(name);
        self
    }

    pub fn set_alias(&mut self, alias: u64) -> &mut Self {
        self.alias = Some(alias);
        self
    }

    pub fn set_datatype(&mut self, datatype: DataType) -> &mut Self {
        self.datatype = Some(datatype as u32);
        self
    }

    pub fn set_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn set_quality(&mut self, quality: crate::Quality) -> &mut Self {
        self.quality = Some(quality.value() as u32);
        self
    }

    pub fn set_value(&mut self, value: metric::Value) -> &mut Self {
        self.value = Some(value);
        self.is_null = None;
        self
    }

    pub fn set_null(&mut self) -> &mut Self {
        self.value = None;
        self.is_null = Some(true);
        self
    }
}

impl From<Payload> for Vec<u8> {
    fn from(value: Payload) -> Self {
        value.encode_to_vec()
    }
}

/// Wire datatype codes carried in birth metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    Unknown = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
    DateTime = 13,
}

impl TryFrom<u32> for DataType {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            x if x == DataType::Unknown as u32 => Ok(DataType::Unknown),
            x if x == DataType::Int8 as u32 => Ok(DataType::Int8),
            x if x == DataType::Int16 as u32 => Ok(DataType::Int16),
            x if x == DataType::Int32 as u32 => Ok(DataType::Int32),
            x if x == DataType::Int64 as u32 => Ok(DataType::Int64),
            x if x == DataType::UInt8 as u32 => Ok(DataType::UInt8),
            x if x == DataType::UInt16 as u32 => Ok(DataType::UInt16),
            x if x == DataType::UInt32 as u32 => Ok(DataType::UInt32),
            x if x == DataType::UInt64 as u32 => Ok(DataType::UInt64),
            x if x == DataType::Float as u32 => Ok(DataType::Float),
            x if x == DataType::Double as u32 => Ok(DataType::Double),
            x if x == DataType::Boolean as u32 => Ok(DataType::Boolean),
            x if x == DataType::String as u32 => Ok(DataType::String),
            x if x == DataType::DateTime as u32 => Ok(DataType::DateTime),
            _ => Err(()),
        }
    }
}

/// JSON certificate published on STATE topics announcing a host
/// application coming online or going offline.
#[derive(Serialize, Deserialize)]
pub struct StateBirthDeathCertificate {
    pub timestamp: u64,
    pub online: bool,
}

impl TryFrom<StateBirthDeathCertificate> for Vec<u8> {
    type Error = String;
    fn try_from(value: StateBirthDeathCertificate) -> Result<Self, Self::Error> {
        match serde_json::to_vec(&value) {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl TryFrom<&[u8]> for StateBirthDeathCertificate {
    type Error = String;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match serde_json::from_slice::<StateBirthDeathCertificate>(value) {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let mut metric = Metric::new();
        metric
            .set_name("Line 1/Counter/Good".into())
            .set_alias(42)
            .set_datatype(DataType::UInt32)
            .set_timestamp(1000)
            .set_value(metric::Value::IntValue(950));

        let payload = Payload {
            timestamp: Some(1000),
            metrics: vec![metric],
            seq: Some(7),
        };

        let bytes: Vec<u8> = payload.clone().into();
        let decoded = Payload::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.seq, Some(7));
        assert_eq!(decoded.metrics[0].alias, Some(42));
    }

    #[test]
    fn null_metric_roundtrip() {
        let mut metric = Metric::new();
        metric.set_name("foo".into()).set_null();
        let payload = Payload {
            timestamp: Some(1),
            metrics: vec![metric],
            seq: Some(0),
        };
        let decoded = Payload::decode(Vec::<u8>::from(payload).as_slice()).unwrap();
        assert_eq!(decoded.metrics[0].is_null, Some(true));
        assert!(decoded.metrics[0].value.is_none());
    }
}
