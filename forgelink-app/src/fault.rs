use std::{collections::HashMap, time::Duration};

use log::{debug, info};

use crate::{
    normalizer::{NormalizedMetric, SignalValue},
    signal::SignalType,
};

/// Fault lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    Active,
    Acknowledged,
    Resolved,
    Merged,
}

/// Severity bands derived from the fault-code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultSeverity {
    Info,
    Warning,
    Critical,
}

impl FaultSeverity {
    /// 1xxx codes are informational, 2xxx warnings, 3xxx and above
    /// critical. Non-numeric codes default to warning.
    fn from_code(code: &str) -> Self {
        match code.parse::<u32>() {
            Ok(n) if n < 2000 => FaultSeverity::Info,
            Ok(n) if n < 3000 => FaultSeverity::Warning,
            Ok(_) => FaultSeverity::Critical,
            Err(_) => FaultSeverity::Warning,
        }
    }

    fn from_level(level: f64) -> Self {
        if level <= 1.0 {
            FaultSeverity::Info
        } else if level < 3.0 {
            FaultSeverity::Warning
        } else {
            FaultSeverity::Critical
        }
    }
}

/// One fault lifecycle record.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub fault_id: String,
    pub machine_id: String,
    pub fault_code: String,
    pub severity: FaultSeverity,
    pub description: String,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub state: FaultState,
    pub occurrence_count: u32,
}

impl Fault {
    /// Duration in milliseconds, available once resolved.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|end| end.saturating_sub(self.start_time))
    }
}

/// Lifecycle transitions emitted onto the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultEvent {
    Raised(Fault),
    Updated(Fault),
    Resolved(Fault),
}

/// Configuration for the fault tracker.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Repeated detections of the same code inside this window merge
    /// into one fault.
    pub merge_window: Duration,
    /// How long resolved faults are kept before maintenance drops them.
    pub retention: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            merge_window: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
        }
    }
}

type DedupSignature = (String, String, u64);

/// Stateful fault lifecycle tracker with deduplication and
/// acknowledgement.
///
/// Faults rise on a non-empty, non-zero `fault.code` signal; repeats
/// inside the merge window increment the existing fault's occurrence
/// count instead of raising a new one. A falsy `fault.active` signal
/// resolves every ongoing fault for the machine.
pub struct FaultTracker {
    config: FaultConfig,
    descriptions: HashMap<String, String>,
    faults: HashMap<String, Fault>,
    dedup: HashMap<DedupSignature, String>,
    deduplicated: u64,
}

impl FaultTracker {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            descriptions: HashMap::new(),
            faults: HashMap::new(),
            dedup: HashMap::new(),
            deduplicated: 0,
        }
    }

    /// Install the fault-code description table.
    pub fn with_descriptions(mut self, descriptions: HashMap<String, String>) -> Self {
        self.descriptions = descriptions;
        self
    }

    /// Number of detections merged into existing faults.
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated
    }

    /// Ongoing (active or acknowledged) faults.
    pub fn active_faults(&self) -> impl Iterator<Item = &Fault> {
        self.faults
            .values()
            .filter(|f| matches!(f.state, FaultState::Active | FaultState::Acknowledged))
    }

    pub fn get(&self, fault_id: &str) -> Option<&Fault> {
        self.faults.get(fault_id)
    }

    fn merge_window_ms(&self) -> u64 {
        (self.config.merge_window.as_millis() as u64).max(1)
    }

    fn code_from_value(value: &SignalValue) -> Option<String> {
        let code = match value {
            SignalValue::Text(text) => text.trim().to_string(),
            SignalValue::Numeric(v) => {
                if *v == 0.0 {
                    return None;
                }
                format!("{}", *v as i64)
            }
            SignalValue::Bool(_) => return None,
        };
        if code.is_empty() || code == "0" {
            return None;
        }
        Some(code)
    }

    fn raise(&mut self, machine_id: &str, code: String, ts: u64) -> Option<FaultEvent> {
        let bucket = ts / self.merge_window_ms();
        let signature = (machine_id.to_string(), code.clone(), bucket);

        if let Some(existing_id) = self.dedup.get(&signature) {
            if let Some(fault) = self.faults.get_mut(existing_id) {
                if matches!(fault.state, FaultState::Active | FaultState::Acknowledged) {
                    fault.occurrence_count += 1;
                    self.deduplicated += 1;
                    debug!(
                        "Deduplicated fault {code} on {machine_id} (occurrence {})",
                        fault.occurrence_count
                    );
                    return None;
                }
            }
        }

        let fault_id = format!("{machine_id}:{code}:{ts}");
        let description = self
            .descriptions
            .get(&code)
            .cloned()
            .unwrap_or_else(|| "Unknown fault".to_string());
        let fault = Fault {
            fault_id: fault_id.clone(),
            machine_id: machine_id.to_string(),
            fault_code: code.clone(),
            severity: FaultSeverity::from_code(&code),
            description,
            start_time: ts,
            end_time: None,
            state: FaultState::Active,
            occurrence_count: 1,
        };
        info!("Fault {code} raised on {machine_id}");
        self.dedup.insert(signature, fault_id.clone());
        self.faults.insert(fault_id, fault.clone());
        Some(FaultEvent::Raised(fault))
    }

    fn resolve_machine(&mut self, machine_id: &str, ts: u64) -> Vec<FaultEvent> {
        let mut events = Vec::new();
        for fault in self.faults.values_mut() {
            if fault.machine_id != machine_id {
                continue;
            }
            if !matches!(fault.state, FaultState::Active | FaultState::Acknowledged) {
                continue;
            }
            fault.state = FaultState::Resolved;
            fault.end_time = Some(ts.max(fault.start_time));
            info!(
                "Fault {} resolved on {machine_id} after {}ms",
                fault.fault_code,
                fault.duration_ms().unwrap_or(0)
            );
            events.push(FaultEvent::Resolved(fault.clone()));
        }
        events
    }

    fn update_severity(&mut self, machine_id: &str, level: f64) -> Vec<FaultEvent> {
        let severity = FaultSeverity::from_level(level);
        let mut events = Vec::new();
        // the machine's most recent ongoing fault carries the update
        let current = self
            .faults
            .values_mut()
            .filter(|f| {
                f.machine_id == machine_id
                    && matches!(f.state, FaultState::Active | FaultState::Acknowledged)
            })
            .max_by_key(|f| f.start_time);
        if let Some(fault) = current {
            if fault.severity != severity {
                fault.severity = severity;
                events.push(FaultEvent::Updated(fault.clone()));
            }
        }
        events
    }

    /// Feed one normalized metric through the tracker. Only
    /// fault-class signals are considered.
    pub fn process(&mut self, metric: &NormalizedMetric) -> Vec<FaultEvent> {
        let machine_id = metric.machine_id.clone();
        let ts = metric.timestamp_utc;
        match &metric.signal_type {
            SignalType::FaultCode => match Self::code_from_value(&metric.value) {
                Some(code) => self.raise(&machine_id, code, ts).into_iter().collect(),
                None => Vec::new(),
            },
            SignalType::FaultActive => {
                if metric.value.is_truthy() {
                    Vec::new()
                } else {
                    self.resolve_machine(&machine_id, ts)
                }
            }
            SignalType::FaultSeverity => match metric.value.as_f64() {
                Some(level) => self.update_severity(&machine_id, level),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Acknowledge an ongoing fault by id, leaving lifecycle timing
    /// untouched.
    pub fn acknowledge(&mut self, fault_id: &str) -> Option<Fault> {
        let fault = self.faults.get_mut(fault_id)?;
        if fault.state != FaultState::Active {
            return None;
        }
        fault.state = FaultState::Acknowledged;
        Some(fault.clone())
    }

    /// Drop resolved faults past the retention window and expire stale
    /// dedup signatures. Returns the number of faults removed.
    pub fn maintain(&mut self, now: u64) -> usize {
        let retention_ms = self.config.retention.as_millis() as u64;
        let before = self.faults.len();
        self.faults.retain(|_, fault| match fault.end_time {
            Some(end) if fault.state == FaultState::Resolved => {
                now.saturating_sub(end) < retention_ms
            }
            _ => true,
        });
        let removed = before - self.faults.len();

        let current_bucket = now / self.merge_window_ms();
        self.dedup
            .retain(|(_, _, bucket), _| current_bucket.saturating_sub(*bucket) <= 1);

        removed
    }
}
