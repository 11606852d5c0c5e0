use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Pipeline counters and gauges exposed to the observability sink.
///
/// Dropped metrics, suppressed values and deduplicated faults are
/// observable only here, never as errors on the data path.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub messages_received: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub invalid_payloads: AtomicU64,
    pub unresolved_aliases: AtomicU64,
    pub sequence_gaps: AtomicU64,
    pub births: AtomicU64,
    pub deaths: AtomicU64,
    pub dropped_no_mapping: AtomicU64,
    pub dropped_low_quality: AtomicU64,
    pub dropped_no_value: AtomicU64,
    pub deadband_suppressed: AtomicU64,
    pub faults_raised: AtomicU64,
    pub faults_resolved: AtomicU64,
    pub faults_deduplicated: AtomicU64,
    pub oee_windows_closed: AtomicU64,
    pub aliases_evicted: AtomicU64,
    pub tracked_identities: AtomicUsize,
}

impl PipelineStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            invalid_payloads: self.invalid_payloads.load(Ordering::Relaxed),
            unresolved_aliases: self.unresolved_aliases.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            births: self.births.load(Ordering::Relaxed),
            deaths: self.deaths.load(Ordering::Relaxed),
            dropped_no_mapping: self.dropped_no_mapping.load(Ordering::Relaxed),
            dropped_low_quality: self.dropped_low_quality.load(Ordering::Relaxed),
            dropped_no_value: self.dropped_no_value.load(Ordering::Relaxed),
            deadband_suppressed: self.deadband_suppressed.load(Ordering::Relaxed),
            faults_raised: self.faults_raised.load(Ordering::Relaxed),
            faults_resolved: self.faults_resolved.load(Ordering::Relaxed),
            faults_deduplicated: self.faults_deduplicated.load(Ordering::Relaxed),
            oee_windows_closed: self.oee_windows_closed.load(Ordering::Relaxed),
            aliases_evicted: self.aliases_evicted.load(Ordering::Relaxed),
            tracked_identities: self.tracked_identities.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub invalid_payloads: u64,
    pub unresolved_aliases: u64,
    pub sequence_gaps: u64,
    pub births: u64,
    pub deaths: u64,
    pub dropped_no_mapping: u64,
    pub dropped_low_quality: u64,
    pub dropped_no_value: u64,
    pub deadband_suppressed: u64,
    pub faults_raised: u64,
    pub faults_resolved: u64,
    pub faults_deduplicated: u64,
    pub oee_windows_closed: u64,
    pub aliases_evicted: u64,
    pub tracked_identities: usize,
}
