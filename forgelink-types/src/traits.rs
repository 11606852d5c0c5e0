use crate::payload::DataType;
use crate::value;

/// Trait used to query the wire datatype(s) that an implementing type supports
pub trait HasDataType {
    /// Get all the [crate::payload::DataType]'s the type supports
    fn supported_datatypes() -> &'static [DataType];

    /// Default [crate::payload::DataType] the type maps to
    fn default_datatype() -> DataType {
        let supported = Self::supported_datatypes();
        if supported.is_empty() {
            panic!("supported_datatypes result has to contain at least one element")
        }
        supported[0]
    }
}

/// Trait used to represent that a type can represent a [value::MetricValue]
pub trait MetricValue:
    TryFrom<value::MetricValue> + Into<value::MetricValue> + HasDataType
{
}
