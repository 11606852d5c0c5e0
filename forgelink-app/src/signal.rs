use serde::{Deserialize, Serialize};

/// The canonical signal vocabulary the pipeline derives metrics from.
///
/// Tag mappings translate raw source tags into one of these; the OEE
/// calculator and fault tracker dispatch on them. Anything outside the
/// known vocabulary flows through as a process value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalType {
    CounterGood,
    CounterTotal,
    CounterScrap,
    CycleTimeActual,
    CycleTimeIdeal,
    StateRun,
    StateDown,
    PlannedTime,
    FaultCode,
    FaultActive,
    FaultSeverity,
    Process(String),
}

impl SignalType {
    pub fn as_str(&self) -> &str {
        match self {
            SignalType::CounterGood => "counter.good",
            SignalType::CounterTotal => "counter.total",
            SignalType::CounterScrap => "counter.scrap",
            SignalType::CycleTimeActual => "cycle.time_actual",
            SignalType::CycleTimeIdeal => "cycle.time_ideal",
            SignalType::StateRun => "state.run",
            SignalType::StateDown => "state.down",
            SignalType::PlannedTime => "utilization.planned_time",
            SignalType::FaultCode => "fault.code",
            SignalType::FaultActive => "fault.active",
            SignalType::FaultSeverity => "fault.severity",
            SignalType::Process(name) => name,
        }
    }

    pub fn is_fault_signal(&self) -> bool {
        matches!(
            self,
            SignalType::FaultCode | SignalType::FaultActive | SignalType::FaultSeverity
        )
    }
}

impl From<String> for SignalType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "counter.good" => SignalType::CounterGood,
            "counter.total" => SignalType::CounterTotal,
            "counter.scrap" => SignalType::CounterScrap,
            "cycle.time_actual" => SignalType::CycleTimeActual,
            "cycle.time_ideal" => SignalType::CycleTimeIdeal,
            "state.run" => SignalType::StateRun,
            "state.down" => SignalType::StateDown,
            "utilization.planned_time" => SignalType::PlannedTime,
            "fault.code" => SignalType::FaultCode,
            "fault.active" => SignalType::FaultActive,
            "fault.severity" => SignalType::FaultSeverity,
            _ => SignalType::Process(value),
        }
    }
}

impl From<SignalType> for String {
    fn from(value: SignalType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        for name in [
            "counter.good",
            "counter.total",
            "cycle.time_ideal",
            "state.down",
            "utilization.planned_time",
            "fault.code",
        ] {
            let signal = SignalType::from(name.to_string());
            assert_eq!(signal.as_str(), name);
            assert!(!matches!(signal, SignalType::Process(_)));
        }

        let custom = SignalType::from("hydraulic.pressure".to_string());
        assert_eq!(custom, SignalType::Process("hydraulic.pressure".into()));
    }

    #[test]
    fn fault_signals() {
        assert!(SignalType::FaultCode.is_fault_signal());
        assert!(SignalType::FaultActive.is_fault_signal());
        assert!(!SignalType::CounterGood.is_fault_signal());
    }
}
