//! Simulation Events
//!
//! Typed events and the time-ordered queue the event handler drains. Events
//! with equal timestamps come out in insertion order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hardware::UnitId;

// =============================================================================
// Event Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Failure,
    Recovered,
    LatentDefect,
    LatentRecovered,
    EagerRecoveryStart,
    EagerRecoveryInstallment,
    UpgradeCheck,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Failure => "failure",
            EventKind::Recovered => "recovered",
            EventKind::LatentDefect => "latent_defect",
            EventKind::LatentRecovered => "latent_recovered",
            EventKind::EagerRecoveryStart => "eager_recovery_start",
            EventKind::EagerRecoveryInstallment => "eager_recovery_installment",
            EventKind::UpgradeCheck => "upgrade_check",
        };
        write!(f, "{}", name)
    }
}

/// Why a unit went down, or how its recovery was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Disks, latent errors and anything without a sub-kind
    Plain,
    /// Machine back within `fail_timeout`
    ShortTransient,
    /// Machine down longer than `fail_timeout`, data intact
    LongTransient,
    /// Machine gone, its blocks must be rebuilt
    Permanent,
    /// Outage inherited from the enclosing rack
    RackInduced,
    /// Recovery rescheduled after waiting for repair bandwidth
    QueuedRepair,
}

impl FailureKind {
    /// Blocks on the unit are destroyed rather than merely unreachable
    pub fn destroys_data(self) -> bool {
        matches!(self, FailureKind::Permanent | FailureKind::QueuedRepair)
    }
}

/// What an upgrade check repairs before the maintenance window opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CheckStyle {
    /// 1: single-block repair of lost blocks on one machine
    RepairLostOnMachine,
    /// 2: single-block repair of lost and unavailable blocks on one machine
    RepairDamagedOnMachine,
    /// 3: batch repair (lost only) of stripes hosted on one machine
    BatchLostOnMachine,
    /// 4: batch repair of stripes hosted on one machine
    BatchDamagedOnMachine,
    /// 5: batch repair (lost only) of every stripe
    BatchLostEverywhere,
    /// 6: batch repair of every stripe
    BatchDamagedEverywhere,
}

impl CheckStyle {
    pub fn is_system_wide(self) -> bool {
        matches!(
            self,
            CheckStyle::BatchLostEverywhere | CheckStyle::BatchDamagedEverywhere
        )
    }

    /// Unavailable blocks are left for the machine to bring back
    pub fn only_lost(self) -> bool {
        matches!(
            self,
            CheckStyle::RepairLostOnMachine
                | CheckStyle::BatchLostOnMachine
                | CheckStyle::BatchLostEverywhere
        )
    }
}

impl TryFrom<u8> for CheckStyle {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(CheckStyle::RepairLostOnMachine),
            2 => Ok(CheckStyle::RepairDamagedOnMachine),
            3 => Ok(CheckStyle::BatchLostOnMachine),
            4 => Ok(CheckStyle::BatchDamagedOnMachine),
            5 => Ok(CheckStyle::BatchLostEverywhere),
            6 => Ok(CheckStyle::BatchDamagedEverywhere),
            other => Err(Error::Config(format!(
                "upgrade check style must be 1-6, got {}",
                other
            ))),
        }
    }
}

impl From<CheckStyle> for u8 {
    fn from(style: CheckStyle) -> u8 {
        match style {
            CheckStyle::RepairLostOnMachine => 1,
            CheckStyle::RepairDamagedOnMachine => 2,
            CheckStyle::BatchLostOnMachine => 3,
            CheckStyle::BatchDamagedOnMachine => 4,
            CheckStyle::BatchLostEverywhere => 5,
            CheckStyle::BatchDamagedEverywhere => 6,
        }
    }
}

/// Stripes repaired together by one eager-recovery installment
#[derive(Debug, Clone, PartialEq)]
pub struct Installment {
    /// Machine whose outage started the eager recovery
    pub machine: UnitId,
    pub original_failure_time: f64,
    pub stripes: Vec<usize>,
    /// Bandwidth returned to the pool when this installment runs.
    /// Only the last installment of a sequence carries it.
    pub bandwidth_release: Option<f64>,
}

impl Installment {
    pub fn new(machine: UnitId, original_failure_time: f64) -> Self {
        Self {
            machine,
            original_failure_time,
            stripes: Vec::new(),
            bandwidth_release: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    Unit(UnitId),
    Installment(Installment),
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Unit(id) => write!(f, "unit {}", id),
            EventTarget::Installment(i) => write!(
                f,
                "installment of machine {} ({} stripes)",
                i.machine,
                i.stripes.len()
            ),
        }
    }
}

// =============================================================================
// Event
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub target: EventTarget,
    pub time: f64,
    pub cause: FailureKind,
    /// Set only on upgrade checks
    pub check: Option<CheckStyle>,
    /// When the failed unit is expected back
    pub next_recovery_time: f64,
    /// Fast-forwarded: generated but not simulated
    pub ignore: bool,
}

impl Event {
    pub fn new(kind: EventKind, unit: UnitId, time: f64) -> Self {
        Self {
            kind,
            target: EventTarget::Unit(unit),
            time,
            cause: FailureKind::Plain,
            check: None,
            next_recovery_time: f64::INFINITY,
            ignore: false,
        }
    }

    pub fn failure(unit: UnitId, time: f64, cause: FailureKind, next_recovery_time: f64) -> Self {
        Self {
            cause,
            next_recovery_time,
            ..Self::new(EventKind::Failure, unit, time)
        }
    }

    pub fn recovered(unit: UnitId, time: f64, cause: FailureKind) -> Self {
        Self {
            cause,
            ..Self::new(EventKind::Recovered, unit, time)
        }
    }

    pub fn upgrade_check(unit: UnitId, time: f64, style: CheckStyle) -> Self {
        Self {
            check: Some(style),
            ..Self::new(EventKind::UpgradeCheck, unit, time)
        }
    }

    pub fn installment(time: f64, installment: Installment) -> Self {
        Self {
            kind: EventKind::EagerRecoveryInstallment,
            target: EventTarget::Installment(installment),
            time,
            cause: FailureKind::Plain,
            check: None,
            next_recovery_time: f64::INFINITY,
            ignore: false,
        }
    }

    pub fn ignored(mut self, ignore: bool) -> Self {
        self.ignore = ignore;
        self
    }

    /// The hardware unit this event targets, if any
    pub fn unit(&self) -> Option<UnitId> {
        match self.target {
            EventTarget::Unit(id) => Some(id),
            EventTarget::Installment(_) => None,
        }
    }
}

// =============================================================================
// Event Queue
// =============================================================================

/// Totally ordered event time
#[derive(Debug, Clone, Copy)]
struct Timestamp(f64);

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Chronological queue, FIFO within a timestamp
#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<Timestamp, VecDeque<Event>>,
    len: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an event; negative, NaN and infinite times are rejected
    pub fn push(&mut self, event: Event) -> Result<()> {
        if !event.time.is_finite() || event.time < 0.0 {
            return Err(Error::InvalidTimestamp(event.time));
        }
        self.events
            .entry(Timestamp(event.time))
            .or_default()
            .push_back(event);
        self.len += 1;
        Ok(())
    }

    /// Earliest event
    pub fn pop(&mut self) -> Option<Event> {
        let mut entry = self.events.first_entry()?;
        let event = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if event.is_some() {
            self.len -= 1;
        }
        event
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.events.keys().next().map(|t| t.0)
    }

    /// Drops events strictly after `time` whose target matches
    pub fn remove_after<F>(&mut self, time: f64, mut matches: F) -> usize
    where
        F: FnMut(&Event) -> bool,
    {
        let mut removed = 0;
        let mut emptied = Vec::new();
        for (ts, events) in self.events.range_mut(Timestamp(time)..) {
            if ts.0 <= time {
                continue;
            }
            let before = events.len();
            events.retain(|e| !matches(e));
            removed += before - events.len();
            if events.is_empty() {
                emptied.push(*ts);
            }
        }
        for ts in emptied {
            self.events.remove(&ts);
        }
        self.len -= removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
