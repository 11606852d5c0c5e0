use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use log::{info, warn};

type TransitionCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Thresholds and anti-thrash settings for the [BackpressureController].
///
/// `engage_threshold` must be greater than `clear_threshold`; the gap
/// between them is the hysteresis band that stops the signal from
/// oscillating around a single threshold.
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub engage_threshold: usize,
    pub clear_threshold: usize,
    /// Minimum time between two transitions.
    pub min_dwell: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            engage_threshold: 800,
            clear_threshold: 200,
            min_dwell: Duration::from_secs(10),
        }
    }
}

struct ControllerInner {
    last_transition: Option<Instant>,
    callbacks: Vec<TransitionCallback>,
}

/// Watches the store-and-forward queue depth and derives a binary
/// congestion signal from it.
///
/// The engaged flag is written only by the task that calls
/// [observe](BackpressureController::observe) and read by any number
/// of samplers; registered callbacks fire exactly once per transition.
pub struct BackpressureController {
    config: BackpressureConfig,
    engaged: AtomicBool,
    inner: Mutex<ControllerInner>,
    engage_count: AtomicU64,
    clear_count: AtomicU64,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        let config = if config.engage_threshold <= config.clear_threshold {
            warn!(
                "Backpressure engage threshold {} must be greater than clear threshold {} - using defaults",
                config.engage_threshold, config.clear_threshold
            );
            BackpressureConfig {
                min_dwell: config.min_dwell,
                ..Default::default()
            }
        } else {
            config
        };
        Self {
            config,
            engaged: AtomicBool::new(false),
            inner: Mutex::new(ControllerInner {
                last_transition: None,
                callbacks: Vec::new(),
            }),
            engage_count: AtomicU64::new(0),
            clear_count: AtomicU64::new(0),
        }
    }

    /// Whether backpressure is currently engaged. Lock-free; samplers
    /// read this every tick.
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Relaxed)
    }

    pub fn engage_count(&self) -> u64 {
        self.engage_count.load(Ordering::Relaxed)
    }

    pub fn clear_count(&self) -> u64 {
        self.clear_count.load(Ordering::Relaxed)
    }

    /// Register a callback invoked with the new engaged state, exactly
    /// once per transition.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().callbacks.push(Box::new(callback));
    }

    /// Feed the controller the current queue depth. Called
    /// periodically by the monitor task that owns the signal.
    pub fn observe(&self, depth: usize) {
        let engaged = self.engaged.load(Ordering::Relaxed);
        let should_engage = !engaged && depth >= self.config.engage_threshold;
        let should_clear = engaged && depth <= self.config.clear_threshold;
        if !should_engage && !should_clear {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(last) = inner.last_transition {
            if last.elapsed() < self.config.min_dwell {
                return;
            }
        }
        inner.last_transition = Some(Instant::now());

        let new_state = should_engage;
        self.engaged.store(new_state, Ordering::Relaxed);
        if new_state {
            self.engage_count.fetch_add(1, Ordering::Relaxed);
            info!("Backpressure engaged at queue depth {depth}");
        } else {
            self.clear_count.fetch_add(1, Ordering::Relaxed);
            info!("Backpressure cleared at queue depth {depth}");
        }
        for callback in &inner.callbacks {
            callback(new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Arc};

    fn controller(engage: usize, clear: usize) -> BackpressureController {
        BackpressureController::new(BackpressureConfig {
            engage_threshold: engage,
            clear_threshold: clear,
            min_dwell: Duration::ZERO,
        })
    }

    #[test]
    fn hysteresis_engages_and_clears_once_per_crossing() {
        let ctl = controller(10, 3);
        let transitions = Arc::new(AtomicUsize::new(0));
        let seen = transitions.clone();
        ctl.on_transition(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // rising through the band does nothing until the engage threshold
        ctl.observe(5);
        ctl.observe(9);
        assert!(!ctl.is_engaged());

        ctl.observe(10);
        assert!(ctl.is_engaged());
        assert_eq!(ctl.engage_count(), 1);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        // staying high, or dipping below engage but above clear, changes nothing
        ctl.observe(50);
        ctl.observe(9);
        ctl.observe(4);
        assert!(ctl.is_engaged());
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        // must fall to the clear threshold
        ctl.observe(3);
        assert!(!ctl.is_engaged());
        assert_eq!(ctl.clear_count(), 1);
        assert_eq!(transitions.load(Ordering::SeqCst), 2);

        // and clearing again without re-engaging does nothing
        ctl.observe(0);
        assert_eq!(ctl.clear_count(), 1);
    }

    #[test]
    fn dwell_time_blocks_rapid_transitions() {
        let ctl = BackpressureController::new(BackpressureConfig {
            engage_threshold: 10,
            clear_threshold: 3,
            min_dwell: Duration::from_secs(60),
        });
        ctl.observe(10);
        assert!(ctl.is_engaged());
        // the clear crossing arrives inside the dwell window
        ctl.observe(0);
        assert!(ctl.is_engaged());
    }

    #[test]
    fn invalid_thresholds_fall_back_to_defaults() {
        let ctl = BackpressureController::new(BackpressureConfig {
            engage_threshold: 3,
            clear_threshold: 10,
            min_dwell: Duration::ZERO,
        });
        ctl.observe(BackpressureConfig::default().engage_threshold);
        assert!(ctl.is_engaged());
    }
}
