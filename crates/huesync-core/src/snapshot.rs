// ── Snapshot cycle bookkeeping ──
//
// One cycle fetches every resource type once, staggered. Core types
// abort the cycle on failure; secondary types retry with a linearly
// growing delay and are recorded empty (and degraded) when retries run
// out. The fetcher holds no I/O: the engine asks it for a plan, feeds it
// results, and reads the assembled `Snapshot` once nothing is pending.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde_json::Value;

use huesync_api::ResourceType;

use crate::config::SyncTuning;

/// Order in which resource types are requested each cycle.
pub const SNAPSHOT_ORDER: [ResourceType; 13] = [
    ResourceType::Device,
    ResourceType::Room,
    ResourceType::Zone,
    ResourceType::Light,
    ResourceType::Motion,
    ResourceType::Temperature,
    ResourceType::LightLevel,
    ResourceType::DevicePower,
    ResourceType::Button,
    ResourceType::DeviceSoftwareUpdate,
    ResourceType::ZigbeeConnectivity,
    ResourceType::ZigbeeDeviceDiscovery,
    ResourceType::Scene,
];

/// Per-type resource arrays gathered by one cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    by_type: HashMap<ResourceType, Vec<Value>>,
    degraded: BTreeSet<ResourceType>,
}

impl Snapshot {
    pub fn resources(&self, resource_type: ResourceType) -> &[Value] {
        self.by_type
            .get(&resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn insert(&mut self, resource_type: ResourceType, resources: Vec<Value>) {
        self.by_type.insert(resource_type, resources);
    }

    pub fn mark_degraded(&mut self, resource_type: ResourceType) {
        self.by_type.insert(resource_type, Vec::new());
        self.degraded.insert(resource_type);
    }

    pub fn is_degraded(&self, resource_type: ResourceType) -> bool {
        self.degraded.contains(&resource_type)
    }

    pub fn degraded_types(&self) -> &BTreeSet<ResourceType> {
        &self.degraded
    }
}

/// What the engine should do with a fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchVerdict {
    Stored,
    Retry { delay: Duration, attempt: u32 },
    /// Secondary type exhausted its retries; recorded empty.
    Degraded { attempts: u32 },
    /// Core type failed; the cycle is over.
    Aborted,
    /// Result belongs to an earlier cycle or an unrequested type.
    Stale,
}

#[derive(Debug)]
pub struct SnapshotFetcher {
    cycle: u64,
    active: bool,
    pending: BTreeSet<ResourceType>,
    failures: HashMap<ResourceType, u32>,
    snapshot: Snapshot,
    stagger: Duration,
    button_delay: Duration,
    retry_step: Duration,
    max_retries: u32,
}

impl SnapshotFetcher {
    pub fn new(tuning: &SyncTuning) -> Self {
        Self {
            cycle: 0,
            active: false,
            pending: BTreeSet::new(),
            failures: HashMap::new(),
            snapshot: Snapshot::default(),
            stagger: tuning.snapshot_stagger,
            button_delay: tuning.button_snapshot_delay,
            retry_step: tuning.snapshot_retry_step,
            max_retries: tuning.snapshot_max_retries,
        }
    }

    /// Start a new cycle, returning its id and the staggered request plan.
    pub fn begin(&mut self) -> (u64, Vec<(ResourceType, Duration)>) {
        self.cycle += 1;
        self.active = true;
        self.pending = SNAPSHOT_ORDER.iter().copied().collect();
        self.failures.clear();
        self.snapshot = Snapshot::default();

        let plan = SNAPSHOT_ORDER
            .iter()
            .zip(0u32..)
            .map(|(rt, slot)| {
                let mut delay = self.stagger * slot;
                if *rt == ResourceType::Button {
                    delay += self.button_delay;
                }
                (*rt, delay)
            })
            .collect();
        (self.cycle, plan)
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Every type has a result (possibly degraded).
    pub fn is_ready(&self) -> bool {
        self.active && self.pending.is_empty()
    }

    pub fn is_pending(&self, cycle: u64, resource_type: ResourceType) -> bool {
        self.active && cycle == self.cycle && self.pending.contains(&resource_type)
    }

    pub fn record_success(
        &mut self,
        cycle: u64,
        resource_type: ResourceType,
        resources: Vec<Value>,
    ) -> FetchVerdict {
        if !self.is_pending(cycle, resource_type) {
            return FetchVerdict::Stale;
        }
        self.pending.remove(&resource_type);
        self.snapshot.insert(resource_type, resources);
        FetchVerdict::Stored
    }

    pub fn record_failure(&mut self, cycle: u64, resource_type: ResourceType) -> FetchVerdict {
        if !self.is_pending(cycle, resource_type) {
            return FetchVerdict::Stale;
        }
        if resource_type.is_core() {
            self.abort();
            return FetchVerdict::Aborted;
        }

        let failures = self.failures.entry(resource_type).or_insert(0);
        *failures += 1;
        let attempt = *failures;
        if attempt <= self.max_retries {
            return FetchVerdict::Retry {
                delay: self.retry_step * attempt,
                attempt,
            };
        }

        self.pending.remove(&resource_type);
        self.snapshot.mark_degraded(resource_type);
        FetchVerdict::Degraded { attempts: attempt }
    }

    /// The assembled snapshot. Complete once `is_ready()`.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Close the cycle after reconciliation.
    pub fn finish(&mut self) {
        self.active = false;
        self.pending.clear();
    }

    pub fn abort(&mut self) {
        self.finish();
        self.snapshot = Snapshot::default();
    }
}
