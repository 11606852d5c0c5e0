use crate::payload::{metric, DataType};
use crate::traits;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FromValueTypeError {
    #[error("value held a different type than requested")]
    InvalidType,
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Wrapper around the wire value oneof.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue(pub metric::Value);

impl MetricValue {
    pub fn new(inner: metric::Value) -> Self {
        Self(inner)
    }

    /// Interpret the wire value as an f64, decoding signed integers
    /// according to the declared datatype. Strings do not coerce.
    pub fn to_f64(&self, datatype: DataType) -> Option<f64> {
        match &self.0 {
            metric::Value::IntValue(v) => Some(match datatype {
                DataType::Int8 => proto_to_i8(*v) as f64,
                DataType::Int16 => proto_to_i16(*v) as f64,
                DataType::Int32 => proto_to_i32(*v) as f64,
                _ => *v as f64,
            }),
            metric::Value::LongValue(v) => Some(match datatype {
                DataType::Int64 => proto_to_i64(*v) as f64,
                _ => *v as f64,
            }),
            metric::Value::FloatValue(v) => Some(*v as f64),
            metric::Value::DoubleValue(v) => Some(*v),
            metric::Value::BooleanValue(v) => Some(if *v { 1.0 } else { 0.0 }),
            metric::Value::StringValue(_) => None,
        }
    }
}

impl From<metric::Value> for MetricValue {
    fn from(value: metric::Value) -> Self {
        MetricValue(value)
    }
}

impl From<MetricValue> for metric::Value {
    fn from(value: MetricValue) -> Self {
        value.0
    }
}

/// Milliseconds since epoch (Jan 1, 1970)
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DateTime {
    pub date_time: u64,
}

impl DateTime {
    pub fn new(date_time: u64) -> Self {
        Self { date_time }
    }
}

fn i8_to_proto(val: i8) -> u32 {
    let b = val.to_le_bytes();
    u32::from_le_bytes([b[0], 0, 0, 0])
}
fn i16_to_proto(val: i16) -> u32 {
    let b = val.to_le_bytes();
    u32::from_le_bytes([b[0], b[1], 0, 0])
}
fn i32_to_proto(val: i32) -> u32 {
    u32::from_le_bytes(val.to_le_bytes())
}
fn i64_to_proto(val: i64) -> u64 {
    u64::from_le_bytes(val.to_le_bytes())
}

fn proto_to_i8(val: u32) -> i8 {
    let bytes = val.to_le_bytes();
    i8::from_le_bytes([bytes[0]])
}
fn proto_to_i16(val: u32) -> i16 {
    let bytes = val.to_le_bytes();
    i16::from_le_bytes([bytes[0], bytes[1]])
}
fn proto_to_i32(val: u32) -> i32 {
    i32::from_le_bytes(val.to_le_bytes())
}
fn proto_to_i64(val: u64) -> i64 {
    i64::from_le_bytes(val.to_le_bytes())
}

macro_rules! impl_value_conversions {
    ($ty:ty, $variant:ident, $to_proto:expr, $from_proto:expr, $($datatype:expr),+) => {
        impl From<$ty> for MetricValue {
            fn from(value: $ty) -> Self {
                MetricValue(metric::Value::$variant($to_proto(value)))
            }
        }

        impl TryFrom<MetricValue> for $ty {
            type Error = FromValueTypeError;

            fn try_from(value: MetricValue) -> Result<Self, Self::Error> {
                match value.0 {
                    metric::Value::$variant(v) => Ok($from_proto(v)),
                    _ => Err(FromValueTypeError::InvalidType),
                }
            }
        }

        impl traits::HasDataType for $ty {
            fn supported_datatypes() -> &'static [DataType] {
                &[$($datatype),+]
            }
        }

        impl traits::MetricValue for $ty {}
    };
}

impl_value_conversions!(i8, IntValue, i8_to_proto, proto_to_i8, DataType::Int8);
impl_value_conversions!(i16, IntValue, i16_to_proto, proto_to_i16, DataType::Int16);
impl_value_conversions!(i32, IntValue, i32_to_proto, proto_to_i32, DataType::Int32);
impl_value_conversions!(i64, LongValue, i64_to_proto, proto_to_i64, DataType::Int64);
impl_value_conversions!(u8, IntValue, |v| v as u32, |v: u32| v as u8, DataType::UInt8);
impl_value_conversions!(u16, IntValue, |v| v as u32, |v: u32| v as u16, DataType::UInt16);
impl_value_conversions!(u32, IntValue, |v| v, |v| v, DataType::UInt32);
impl_value_conversions!(u64, LongValue, |v| v, |v| v, DataType::UInt64);
impl_value_conversions!(f32, FloatValue, |v| v, |v| v, DataType::Float);
impl_value_conversions!(f64, DoubleValue, |v| v, |v| v, DataType::Double);
impl_value_conversions!(bool, BooleanValue, |v| v, |v| v, DataType::Boolean);
impl_value_conversions!(String, StringValue, |v| v, |v| v, DataType::String);
impl_value_conversions!(
    DateTime,
    LongValue,
    |v: DateTime| v.date_time,
    |v: u64| DateTime::new(v),
    DataType::DateTime
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_roundtrip() {
        let v = MetricValue::from(-5i32);
        assert_eq!(i32::try_from(v.clone()).unwrap(), -5);
        assert_eq!(v.to_f64(DataType::Int32), Some(-5.0));

        let v = MetricValue::from(-1i8);
        assert_eq!(i8::try_from(v.clone()).unwrap(), -1);
        assert_eq!(v.to_f64(DataType::Int8), Some(-1.0));

        let v = MetricValue::from(-123456789i64);
        assert_eq!(i64::try_from(v.clone()).unwrap(), -123456789);
        assert_eq!(v.to_f64(DataType::Int64), Some(-123456789.0));
    }

    #[test]
    fn type_mismatch() {
        let v = MetricValue::from(true);
        assert!(matches!(
            i32::try_from(v),
            Err(FromValueTypeError::InvalidType)
        ));
    }

    #[test]
    fn coercion() {
        assert_eq!(MetricValue::from(2.5f64).to_f64(DataType::Double), Some(2.5));
        assert_eq!(MetricValue::from(true).to_f64(DataType::Boolean), Some(1.0));
        assert_eq!(
            MetricValue::from("2001".to_string()).to_f64(DataType::String),
            None
        );
    }
}
