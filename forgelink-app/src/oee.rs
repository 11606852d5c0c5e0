use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use log::debug;

use crate::{
    normalizer::{NormalizedMetric, SignalValue},
    signal::SignalType,
};

/// Configuration for the rolling-window OEE engine.
#[derive(Debug, Clone)]
pub struct OeeConfig {
    /// Length of one aggregation window.
    pub window: Duration,
    /// How many downtime episodes feed the MTTR/MTBF averages.
    pub downtime_history: usize,
}

impl Default for OeeConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            downtime_history: 100,
        }
    }
}

/// One closed aggregation window for one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct OeeResult {
    pub machine_id: String,
    pub window_start: u64,
    pub window_end: u64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub planned_minutes: f64,
    pub runtime_minutes: f64,
    pub downtime_minutes: f64,
    pub good_count: u64,
    pub total_count: u64,
    pub scrap_count: u64,
    pub mttr_minutes: Option<f64>,
    pub mtbf_minutes: Option<f64>,
    /// True when neither unit counts nor cycle times were available
    /// and performance defaulted to 100.
    pub performance_estimated: bool,
}

struct MachineWindow {
    start: u64,
    end: u64,
    planned_minutes: Option<f64>,
    downtime_minutes: f64,
    good: f64,
    total: f64,
    scrap: f64,
    ideal_cycle_s: Option<f64>,
    actual_cycle_s: Option<f64>,
    down_since: Option<u64>,
    failures: u32,
}

impl MachineWindow {
    fn new(start: u64, window_ms: u64) -> Self {
        Self {
            start,
            end: start + window_ms,
            planned_minutes: None,
            downtime_minutes: 0.0,
            good: 0.0,
            total: 0.0,
            scrap: 0.0,
            ideal_cycle_s: None,
            actual_cycle_s: None,
            down_since: None,
            failures: 0,
        }
    }
}

fn minutes_between(from_ms: u64, to_ms: u64) -> f64 {
    to_ms.saturating_sub(from_ms) as f64 / 60_000.0
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Stateful per-machine OEE engine.
///
/// Windows are created lazily on the first metric for a machine and
/// closed when a subsequent metric's timestamp passes the window end;
/// closing emits one [OeeResult] and immediately opens the next
/// window. An open downtime episode carries across the boundary.
pub struct OeeCalculator {
    config: OeeConfig,
    windows: HashMap<String, MachineWindow>,
    downtime_history: HashMap<String, VecDeque<f64>>,
}

impl OeeCalculator {
    pub fn new(config: OeeConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            downtime_history: HashMap::new(),
        }
    }

    fn numeric_value(metric: &NormalizedMetric) -> Option<f64> {
        match metric.value.as_f64() {
            Some(v) => Some(v),
            None => {
                debug!(
                    "Non-numeric value for {} signal on machine {} - leaving window unchanged",
                    metric.signal_type.as_str(),
                    metric.machine_id
                );
                None
            }
        }
    }

    fn apply(
        window: &mut MachineWindow,
        history: &mut VecDeque<f64>,
        history_limit: usize,
        metric: &NormalizedMetric,
    ) {
        let ts = metric.timestamp_utc;
        match &metric.signal_type {
            SignalType::CounterGood => {
                if let Some(v) = Self::numeric_value(metric) {
                    window.good = v;
                    // good production sets the floor for total
                    window.total = window.total.max(window.good);
                }
            }
            SignalType::CounterTotal => {
                if let Some(v) = Self::numeric_value(metric) {
                    window.total = v.max(window.good);
                }
            }
            SignalType::CounterScrap => {
                if let Some(v) = Self::numeric_value(metric) {
                    window.scrap = v;
                }
            }
            SignalType::CycleTimeActual => {
                window.actual_cycle_s = Self::numeric_value(metric);
            }
            SignalType::CycleTimeIdeal => {
                window.ideal_cycle_s = Self::numeric_value(metric);
            }
            SignalType::StateDown | SignalType::StateRun => {
                let down = match &metric.signal_type {
                    SignalType::StateRun => !metric.value.is_truthy(),
                    _ => metric.value.is_truthy(),
                };
                if down {
                    // rising edge of a downtime episode
                    if window.down_since.is_none() {
                        window.down_since = Some(ts);
                        window.failures += 1;
                    }
                } else if let Some(down_since) = window.down_since.take() {
                    let minutes = minutes_between(down_since, ts);
                    window.downtime_minutes += minutes;
                    if history.len() == history_limit {
                        history.pop_front();
                    }
                    history.push_back(minutes);
                }
            }
            SignalType::PlannedTime => {
                window.planned_minutes = Self::numeric_value(metric);
            }
            _ => {}
        }
    }

    fn close(&mut self, machine_id: &str, mut window: MachineWindow) -> OeeResult {
        // an open downtime episode counts up to the window end; the
        // caller re-opens it in the next window
        if let Some(down_since) = window.down_since.take() {
            window.downtime_minutes += minutes_between(down_since, window.end);
        }

        let planned = window
            .planned_minutes
            .unwrap_or_else(|| minutes_between(window.start, window.end));
        let runtime = (planned - window.downtime_minutes).max(0.0);

        let availability = if planned > 0.0 {
            clamp_pct(runtime / planned * 100.0)
        } else {
            0.0
        };

        let mut performance_estimated = false;
        let performance = match (window.ideal_cycle_s, window.total) {
            // preferred: units-based performance
            (Some(ideal), total) if total > 0.0 && runtime > 0.0 => {
                let ideal_minutes = ideal * total / 60.0;
                clamp_pct(ideal_minutes / runtime * 100.0)
            }
            _ => match (window.ideal_cycle_s, window.actual_cycle_s) {
                (Some(ideal), Some(actual)) if actual > 0.0 => {
                    clamp_pct(ideal / actual * 100.0)
                }
                _ => {
                    performance_estimated = true;
                    100.0
                }
            },
        };

        let quality = if window.total > 0.0 {
            clamp_pct(window.good / window.total * 100.0)
        } else {
            100.0
        };

        let oee = availability * performance * quality / 10_000.0;

        let history = self.downtime_history.entry(machine_id.to_string()).or_default();
        let mttr = if history.is_empty() {
            None
        } else {
            Some(history.iter().sum::<f64>() / history.len() as f64)
        };
        let mtbf = if window.failures > 0 {
            Some(runtime / window.failures as f64)
        } else {
            None
        };

        OeeResult {
            machine_id: machine_id.to_string(),
            window_start: window.start,
            window_end: window.end,
            availability,
            performance,
            quality,
            oee,
            planned_minutes: planned,
            runtime_minutes: runtime,
            downtime_minutes: window.downtime_minutes,
            good_count: window.good.max(0.0).round() as u64,
            total_count: window.total.max(0.0).round() as u64,
            scrap_count: window.scrap.max(0.0).round() as u64,
            mttr_minutes: mttr,
            mtbf_minutes: mtbf,
            performance_estimated,
        }
    }

    /// Feed one normalized metric through the engine. Returns a closed
    /// window's result when the metric's timestamp passes the current
    /// window end for its machine.
    pub fn process(&mut self, metric: &NormalizedMetric) -> Option<OeeResult> {
        match metric.signal_type {
            SignalType::CounterGood
            | SignalType::CounterTotal
            | SignalType::CounterScrap
            | SignalType::CycleTimeActual
            | SignalType::CycleTimeIdeal
            | SignalType::StateRun
            | SignalType::StateDown
            | SignalType::PlannedTime => (),
            _ => return None,
        }

        let machine_id = metric.machine_id.clone();
        let ts = metric.timestamp_utc;
        let window_ms = self.config.window.as_millis() as u64;

        if !self.windows.contains_key(&machine_id) {
            self.windows
                .insert(machine_id.clone(), MachineWindow::new(ts, window_ms));
        }

        let mut result = None;
        let needs_close = ts > self.windows[&machine_id].end;
        if needs_close {
            let closing = self.windows.remove(&machine_id).unwrap();
            let was_down = closing.down_since.is_some();

            let mut fresh = MachineWindow::new(closing.end, window_ms);
            if ts > fresh.end {
                // a long quiet period: rebase onto the metric instead
                // of emitting a train of empty windows
                fresh = MachineWindow::new(ts, window_ms);
            }
            if was_down {
                fresh.down_since = Some(fresh.start);
                fresh.failures = 0;
            }

            result = Some(self.close(&machine_id, closing));
            self.windows.insert(machine_id.clone(), fresh);
        }

        let history = self.downtime_history.entry(machine_id.clone()).or_default();
        let window = self
            .windows
            .get_mut(&machine_id)
            .expect("window inserted above");
        Self::apply(window, history, self.config.downtime_history, metric);

        result
    }

    /// Number of machines with an open window.
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgelink_types::Quality;

    const MIN: u64 = 60_000;

    fn metric(signal: SignalType, value: SignalValue, ts: u64) -> NormalizedMetric {
        NormalizedMetric {
            machine_id: "press-03".into(),
            line_id: "line-1".into(),
            site_id: "plant1".into(),
            signal_type: signal,
            value,
            unit: None,
            timestamp_utc: ts,
            quality: Quality::GOOD,
            is_valid: true,
        }
    }

    fn numeric(signal: SignalType, value: f64, ts: u64) -> NormalizedMetric {
        metric(signal, SignalValue::Numeric(value), ts)
    }

    fn calculator() -> OeeCalculator {
        OeeCalculator::new(OeeConfig {
            window: Duration::from_secs(3600),
            downtime_history: 100,
        })
    }

    #[test]
    fn concrete_sixty_minute_window() {
        let mut calc = calculator();

        assert!(calc.process(&numeric(SignalType::PlannedTime, 60.0, 0)).is_none());
        assert!(calc
            .process(&numeric(SignalType::CycleTimeIdeal, 3.0, 1))
            .is_none());

        // one 10 minute downtime episode
        assert!(calc
            .process(&metric(SignalType::StateDown, SignalValue::Bool(true), 5 * MIN))
            .is_none());
        assert!(calc
            .process(&metric(SignalType::StateDown, SignalValue::Bool(false), 15 * MIN))
            .is_none());

        assert!(calc
            .process(&numeric(SignalType::CounterGood, 950.0, 50 * MIN))
            .is_none());
        assert!(calc
            .process(&numeric(SignalType::CounterTotal, 1000.0, 50 * MIN))
            .is_none());

        // a metric past the window end closes it
        let result = calc
            .process(&numeric(SignalType::CounterTotal, 1000.0, 60 * MIN + 1))
            .unwrap();

        assert_eq!(result.machine_id, "press-03");
        assert_eq!(result.planned_minutes, 60.0);
        assert_eq!(result.downtime_minutes, 10.0);
        assert_eq!(result.runtime_minutes, 50.0);
        assert!((result.availability - 83.33).abs() < 0.01);
        assert!((result.performance - 100.0).abs() < 0.01);
        assert!((result.quality - 95.0).abs() < 0.01);
        assert!((result.oee - 79.17).abs() < 0.01);
        assert_eq!(result.good_count, 950);
        assert_eq!(result.total_count, 1000);
        assert!(!result.performance_estimated);

        assert_eq!(result.mttr_minutes, Some(10.0));
        assert_eq!(result.mtbf_minutes, Some(50.0));

        // a fresh window opened immediately after
        assert_eq!(calc.open_windows(), 1);
    }

    #[test]
    fn wall_clock_fallback_for_planned_time() {
        let mut calc = calculator();
        assert!(calc
            .process(&numeric(SignalType::CounterGood, 10.0, 0))
            .is_none());
        let result = calc
            .process(&numeric(SignalType::CounterGood, 10.0, 60 * MIN + 1))
            .unwrap();
        // no explicit planned time: the window's wall-clock span is used
        assert_eq!(result.planned_minutes, 60.0);
        assert_eq!(result.availability, 100.0);
    }

    #[test]
    fn quality_is_hundred_with_no_units() {
        let mut calc = calculator();
        assert!(calc.process(&numeric(SignalType::PlannedTime, 60.0, 0)).is_none());
        let result = calc
            .process(&numeric(SignalType::PlannedTime, 60.0, 60 * MIN + 1))
            .unwrap();
        assert_eq!(result.quality, 100.0);
        assert_eq!(result.total_count, 0);
        assert!(result.performance_estimated);
    }

    #[test]
    fn cycle_time_ratio_fallback() {
        let mut calc = calculator();
        assert!(calc
            .process(&numeric(SignalType::CycleTimeIdeal, 2.0, 0))
            .is_none());
        assert!(calc
            .process(&numeric(SignalType::CycleTimeActual, 4.0, 1))
            .is_none());
        let result = calc
            .process(&numeric(SignalType::CycleTimeIdeal, 2.0, 60 * MIN + 1))
            .unwrap();
        assert!((result.performance - 50.0).abs() < 0.01);
        assert!(!result.performance_estimated);
    }

    #[test]
    fn good_counter_sets_total_floor() {
        let mut calc = calculator();
        assert!(calc
            .process(&numeric(SignalType::CounterTotal, 100.0, 0))
            .is_none());
        assert!(calc
            .process(&numeric(SignalType::CounterGood, 150.0, 1))
            .is_none());
        let result = calc
            .process(&numeric(SignalType::CounterGood, 150.0, 60 * MIN + 1))
            .unwrap();
        assert_eq!(result.total_count, 150);
        assert_eq!(result.quality, 100.0);
    }

    #[test]
    fn open_downtime_carries_across_window_boundary() {
        let mut calc = calculator();
        // the first metric opens the window at t=0
        assert!(calc.process(&numeric(SignalType::PlannedTime, 60.0, 0)).is_none());
        // goes down at 50 min and stays down past the window end
        assert!(calc
            .process(&metric(SignalType::StateDown, SignalValue::Bool(true), 50 * MIN))
            .is_none());

        // the close at 60 min counts the open episode up to the boundary
        let first = calc
            .process(&metric(SignalType::StateDown, SignalValue::Bool(false), 70 * MIN))
            .unwrap();
        assert!((first.downtime_minutes - 10.0).abs() < 1e-9);
        assert_eq!(first.mtbf_minutes, Some(50.0));

        // the falling edge lands in the second window: 10 more minutes
        let second = calc
            .process(&numeric(SignalType::CounterGood, 0.0, 121 * MIN))
            .unwrap();
        assert!((second.downtime_minutes - 10.0).abs() < 1e-9);
        // carried-over downtime is not a fresh failure
        assert_eq!(second.mtbf_minutes, None);
    }

    #[test]
    fn run_state_is_inverse_of_down_state() {
        let mut calc = calculator();
        assert!(calc
            .process(&metric(SignalType::StateRun, SignalValue::Bool(false), 0))
            .is_none());
        assert!(calc
            .process(&metric(SignalType::StateRun, SignalValue::Bool(true), 6 * MIN))
            .is_none());
        let result = calc
            .process(&numeric(SignalType::CounterGood, 1.0, 60 * MIN + 1))
            .unwrap();
        assert!((result.downtime_minutes - 6.0).abs() < 1e-9);
    }

    #[test]
    fn fault_signals_are_ignored() {
        let mut calc = calculator();
        assert!(calc
            .process(&metric(
                SignalType::FaultCode,
                SignalValue::Text("2001".into()),
                0
            ))
            .is_none());
        assert_eq!(calc.open_windows(), 0);
    }
}
