//! Failure Timeline Generation
//!
//! Walks the hardware tree once per run and draws every outage from the
//! per-unit generators. A unit's children only generate inside the unit's up
//! intervals, so a disk never fails while its machine is already down.
//!
//! The same walk feeds both simulation modes through [`TimelineSink`]: the
//! event queue turns outages into Failure/Recovered pairs, the duration queue
//! into `[start, end)` intervals.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, instrument, trace};

use crate::config::SimulationConfig;
use crate::duration::{DurationKind, DurationQueue, DurationUnit};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventQueue, FailureKind};
use crate::failure::{Generator, GeneratorSlots};
use crate::hardware::{Topology, UnitId, UnitKind};

/// Machine walks stop once recovery lands this close to the interval end
const END_SLACK: f64 = 1e-5;

/// Redraws from the last recovery before falling back to the interval start
const MAX_REDRAWS: usize = 1000;

// =============================================================================
// Sink
// =============================================================================

/// Eager rebuild started when a long machine outage times out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EagerWindow {
    /// `failure + fail_timeout`
    pub start: f64,
    /// When the rebuild over the node bandwidth would finish
    pub rebuilt: f64,
}

/// One classified machine outage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineOutage {
    pub failure: f64,
    pub recovery: f64,
    /// Permanent, short or long transient; `Plain` when fast-forwarded
    pub kind: FailureKind,
    pub eager: Option<EagerWindow>,
    pub ignore: bool,
}

/// Receives outages as the walk produces them
pub trait TimelineSink {
    fn rack_outage(&mut self, rack: UnitId, failure: f64, recovery: f64, ignore: bool)
        -> Result<()>;

    fn machine_outage(&mut self, machine: UnitId, outage: &MachineOutage) -> Result<()>;

    fn disk_failure(&mut self, disk: UnitId, failure: f64, recovery: f64) -> Result<()>;

    fn latent_error(&mut self, disk: UnitId, detected: f64, scrubbed: f64) -> Result<()>;
}

/// Pushes an event unless it falls at infinity, which is never simulated
fn push_finite(queue: &mut EventQueue, event: Event) -> Result<()> {
    if event.time.is_infinite() && event.time > 0.0 {
        return Ok(());
    }
    queue.push(event)
}

impl TimelineSink for EventQueue {
    fn rack_outage(
        &mut self,
        rack: UnitId,
        failure: f64,
        recovery: f64,
        ignore: bool,
    ) -> Result<()> {
        self.push(Event::failure(rack, failure, FailureKind::RackInduced, recovery).ignored(ignore))?;
        push_finite(
            self,
            Event::recovered(rack, recovery, FailureKind::RackInduced).ignored(ignore),
        )
    }

    fn machine_outage(&mut self, machine: UnitId, outage: &MachineOutage) -> Result<()> {
        self.push(
            Event::failure(machine, outage.failure, outage.kind, outage.recovery)
                .ignored(outage.ignore),
        )?;
        push_finite(
            self,
            Event::recovered(machine, outage.recovery, outage.kind).ignored(outage.ignore),
        )?;
        if let Some(eager) = outage.eager {
            let mut start = Event::new(EventKind::EagerRecoveryStart, machine, eager.start);
            start.next_recovery_time = outage.recovery;
            self.push(start.ignored(outage.ignore))?;
        }
        Ok(())
    }

    fn disk_failure(&mut self, disk: UnitId, failure: f64, recovery: f64) -> Result<()> {
        self.push(Event::failure(disk, failure, FailureKind::Plain, recovery))?;
        push_finite(self, Event::recovered(disk, recovery, FailureKind::Plain))
    }

    fn latent_error(&mut self, disk: UnitId, detected: f64, scrubbed: f64) -> Result<()> {
        let mut defect = Event::new(EventKind::LatentDefect, disk, detected);
        defect.next_recovery_time = scrubbed;
        self.push(defect)?;
        push_finite(self, Event::new(EventKind::LatentRecovered, disk, scrubbed))
    }
}

impl TimelineSink for DurationQueue {
    fn rack_outage(
        &mut self,
        rack: UnitId,
        failure: f64,
        recovery: f64,
        ignore: bool,
    ) -> Result<()> {
        let id = self.add(
            DurationKind::Unavailable,
            failure,
            recovery,
            DurationUnit::Unit(rack),
            Some(FailureKind::RackInduced),
        )?;
        if ignore {
            self.set_ignore(id);
        }
        Ok(())
    }

    fn machine_outage(&mut self, machine: UnitId, outage: &MachineOutage) -> Result<()> {
        let (kind, end) = match (outage.kind, outage.eager) {
            (FailureKind::Permanent, _) => (DurationKind::Loss, outage.recovery),
            // blocks are rebuilt elsewhere, the old copies count as gone
            (FailureKind::LongTransient, Some(eager)) => (DurationKind::Loss, eager.rebuilt),
            _ => (DurationKind::Unavailable, outage.recovery),
        };
        let id = self.add(
            kind,
            outage.failure,
            end,
            DurationUnit::Unit(machine),
            Some(outage.kind),
        )?;
        if outage.ignore {
            self.set_ignore(id);
        }
        Ok(())
    }

    fn disk_failure(&mut self, disk: UnitId, failure: f64, recovery: f64) -> Result<()> {
        self.add(
            DurationKind::Loss,
            failure,
            recovery,
            DurationUnit::Unit(disk),
            Some(FailureKind::Plain),
        )?;
        Ok(())
    }

    fn latent_error(&mut self, disk: UnitId, detected: f64, scrubbed: f64) -> Result<()> {
        self.add(
            DurationKind::Loss,
            detected,
            scrubbed,
            DurationUnit::Sector(disk),
            Some(FailureKind::Plain),
        )?;
        Ok(())
    }
}

// =============================================================================
// Regeneration Hook
// =============================================================================

/// Redraws disk timelines after a hard upgrade replaces the disks
pub trait DiskEventRegenerator {
    fn regenerate_disks(&mut self, queue: &mut EventQueue, from: f64, until: f64) -> Result<()>;
}

// =============================================================================
// Timeline
// =============================================================================

/// Which generator slot of a unit to use
#[derive(Debug, Clone, Copy)]
enum Role {
    Failure,
    Recovery,
    PermanentRecovery,
    LatentError,
    Scrub,
}

impl Role {
    fn slot(self, slots: &mut GeneratorSlots) -> &mut Option<Generator> {
        match self {
            Role::Failure => &mut slots.failure,
            Role::Recovery => &mut slots.recovery,
            Role::PermanentRecovery => &mut slots.permanent_recovery,
            Role::LatentError => &mut slots.latent_error,
            Role::Scrub => &mut slots.scrub,
        }
    }
}

pub struct Timeline<'a> {
    config: &'a SimulationConfig,
    topology: &'a Topology,
    /// Indexed by `UnitId`
    slots: Vec<GeneratorSlots>,
    /// Indexed by `UnitId`, meaningful for disks only
    last_recovery: Vec<f64>,
    disk_repair_time: f64,
    node_repair_time: f64,
    rng: StdRng,
}

impl<'a> Timeline<'a> {
    pub fn new(config: &'a SimulationConfig, topology: &'a Topology, rng: StdRng) -> Result<Self> {
        let mut slots = Vec::with_capacity(topology.len());
        for index in 0..topology.len() {
            let generators = match topology.kind(UnitId(index)) {
                UnitKind::Datacenter => GeneratorSlots::default(),
                UnitKind::Rack => config.rack.generators.instantiate()?,
                UnitKind::Machine => config.machine.generators.instantiate()?,
                UnitKind::Disk => config.disk.instantiate()?,
            };
            slots.push(generators);
        }

        Ok(Self {
            config,
            topology,
            slots,
            last_recovery: vec![0.0; topology.len()],
            disk_repair_time: config.disk_repair_time(),
            node_repair_time: config.node_repair_time(),
            rng,
        })
    }

    /// Generates every outage in `[start, end]`
    #[instrument(skip(self, sink))]
    pub fn generate<S: TimelineSink>(&mut self, sink: &mut S, start: f64, end: f64) -> Result<()> {
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::InvalidTimestamp(if start.is_finite() { end } else { start }));
        }
        let root = self.topology.root();
        self.walk(root, sink, start, end)?;
        debug!("Generated failure timeline");
        Ok(())
    }

    fn walk<S: TimelineSink>(
        &mut self,
        unit: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        match self.topology.kind(unit) {
            UnitKind::Datacenter => self.walk_children(unit, sink, start, end),
            UnitKind::Rack => self.walk_rack(unit, sink, start, end),
            UnitKind::Machine => self.walk_machine(unit, sink, start, end),
            UnitKind::Disk => self.walk_disk(unit, sink, start, end),
        }
    }

    fn walk_children<S: TimelineSink>(
        &mut self,
        unit: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        let topology = self.topology;
        for child in topology.children(unit) {
            self.walk(*child, sink, start, end)?;
        }
        Ok(())
    }

    /// Draws from one of the unit's generators
    fn draw(&mut self, unit: UnitId, role: Role, current: f64) -> Result<Option<f64>> {
        match role.slot(&mut self.slots[unit.0]) {
            Some(generator) => Ok(Some(generator.generate_next_event(current, &mut self.rng)?)),
            None => Ok(None),
        }
    }

    fn reset(&mut self, unit: UnitId, role: Role, current: f64) {
        if let Some(generator) = role.slot(&mut self.slots[unit.0]) {
            generator.reset(current);
        }
    }

    // =========================================================================
    // Racks
    // =========================================================================

    fn walk_rack<S: TimelineSink>(
        &mut self,
        rack: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        if self.slots[rack.0].failure.is_none() {
            return self.walk_children(rack, sink, start, end);
        }

        let mut current = start;
        let mut last_recover = start;
        loop {
            self.reset(rack, Role::Failure, current);
            let failure = self
                .draw(rack, Role::Failure, current)?
                .unwrap_or(f64::INFINITY);
            if failure > end {
                self.walk_children(rack, sink, last_recover, end)?;
                break;
            }

            self.reset(rack, Role::Recovery, failure);
            let recovery = self
                .draw(rack, Role::Recovery, failure)?
                .unwrap_or(failure);

            sink.rack_outage(rack, failure, recovery, self.config.rack.fast_forward)?;
            self.walk_children(rack, sink, last_recover, failure)?;

            current = recovery;
            if current > end {
                break;
            }
            last_recover = current;
        }
        Ok(())
    }

    // =========================================================================
    // Machines
    // =========================================================================

    fn walk_machine<S: TimelineSink>(
        &mut self,
        machine: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        if self.slots[machine.0].failure.is_none() {
            return self.walk_children(machine, sink, start, end);
        }

        let settings = &self.config.machine;
        let (fail_fraction, fail_timeout) = (settings.fail_fraction, settings.fail_timeout);
        let (fast_forward, eager_recovery) = (settings.fast_forward, settings.eager_recovery);

        let mut current = start;
        let mut last_recover = start;
        loop {
            self.reset(machine, Role::Failure, current);
            let failure = self
                .draw(machine, Role::Failure, current)?
                .unwrap_or(f64::INFINITY);
            if failure > end {
                self.walk_children(machine, sink, last_recover, end)?;
                break;
            }

            self.reset(machine, Role::Recovery, failure);
            let drawn = self
                .draw(machine, Role::Recovery, failure)?
                .unwrap_or(failure);
            self.walk_children(machine, sink, last_recover, failure)?;

            let mut recovery = drawn.min(end);
            let roll: f64 = self.rng.gen();
            let outage = if fast_forward {
                MachineOutage {
                    failure,
                    recovery,
                    kind: FailureKind::Plain,
                    eager: None,
                    ignore: true,
                }
            } else if roll < fail_fraction {
                let detected = self
                    .draw(machine, Role::PermanentRecovery, failure)?
                    .unwrap_or(failure);
                recovery = detected + self.node_repair_time;
                MachineOutage {
                    failure,
                    recovery,
                    kind: FailureKind::Permanent,
                    eager: None,
                    ignore: false,
                }
            } else if recovery - failure <= fail_timeout {
                MachineOutage {
                    failure,
                    recovery,
                    kind: FailureKind::ShortTransient,
                    eager: None,
                    ignore: false,
                }
            } else {
                let eager = eager_recovery.then(|| EagerWindow {
                    start: failure + fail_timeout,
                    rebuilt: failure + fail_timeout + self.node_repair_time,
                });
                MachineOutage {
                    failure,
                    recovery,
                    kind: FailureKind::LongTransient,
                    eager,
                    ignore: false,
                }
            };
            trace!(machine = %machine, failure, recovery, kind = ?outage.kind, "Machine outage");
            sink.machine_outage(machine, &outage)?;

            current = recovery;
            last_recover = current;
            if current >= end - END_SLACK {
                break;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Disks
    // =========================================================================

    fn walk_disk<S: TimelineSink>(
        &mut self,
        disk: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        if start == 0.0 {
            self.last_recovery[disk.0] = 0.0;
            self.reset(disk, Role::LatentError, 0.0);
        }

        let mut current = start;
        loop {
            let failure = self.next_disk_failure(disk, start)?;
            if failure > end {
                self.latent_errors(disk, sink, current, end)?;
                break;
            }

            self.reset(disk, Role::Recovery, failure);
            let detected = self
                .draw(disk, Role::Recovery, failure)?
                .unwrap_or(failure);
            // the recovery generator only covers detection, the rebuild comes on top
            let recovery = (detected + self.disk_repair_time).min(end);
            self.last_recovery[disk.0] = recovery;

            sink.disk_failure(disk, failure, recovery)?;
            self.latent_errors(disk, sink, current, failure)?;

            // latent error lifetime restarts with the rebuilt disk
            self.reset(disk, Role::LatentError, recovery);
            current = recovery;
        }
        Ok(())
    }

    /// Next failure at or after `start`, drawn from the last recovery so that
    /// an event discarded in an earlier interval is redrawn consistently
    fn next_disk_failure(&mut self, disk: UnitId, start: f64) -> Result<f64> {
        let from = self.last_recovery[disk.0];
        if from < 0.0 {
            return Err(Error::InvalidTimestamp(from));
        }

        for _ in 0..MAX_REDRAWS {
            match self.draw(disk, Role::Failure, from)? {
                None => return Ok(f64::INFINITY),
                Some(t) if t >= start => return Ok(t),
                Some(_) => {}
            }
        }

        // deterministic generators repeat themselves from `from`
        let t = self
            .draw(disk, Role::Failure, start)?
            .unwrap_or(f64::INFINITY);
        if t < start {
            return Err(Error::Internal(format!(
                "disk {} failure generator stuck at {} before {}",
                disk, t, start
            )));
        }
        Ok(t)
    }

    fn latent_errors<S: TimelineSink>(
        &mut self,
        disk: UnitId,
        sink: &mut S,
        start: f64,
        end: f64,
    ) -> Result<()> {
        let slots = &self.slots[disk.0];
        if slots.latent_error.is_none() || slots.scrub.is_none() {
            return Ok(());
        }

        let mut current = start;
        loop {
            let detected = self
                .draw(disk, Role::LatentError, current)?
                .unwrap_or(f64::INFINITY);
            if detected.is_infinite() || detected > end {
                break;
            }
            let scrubbed = self
                .draw(disk, Role::Scrub, detected)?
                .unwrap_or(f64::INFINITY);
            sink.latent_error(disk, detected, scrubbed)?;

            current = scrubbed;
            if current > end {
                break;
            }
            self.reset(disk, Role::Scrub, current);
        }
        Ok(())
    }

    // =========================================================================
    // Upgrades
    // =========================================================================

    /// Enqueues soft rolling upgrades and hard upgrade checks
    #[instrument(skip(self, queue))]
    pub fn schedule_upgrades(&mut self, queue: &mut EventQueue) -> Result<()> {
        let upgrades = match &self.config.upgrades {
            Some(upgrades) => upgrades,
            None => return Ok(()),
        };
        let total_time = self.config.total_time;
        let root = self.topology.root();

        if let Some(soft) = &upgrades.soft {
            let rollings = (total_time / soft.freq).floor() as usize;
            let offset = round2(self.rng.gen_range(0.0..=total_time % soft.freq));
            let machines = self.topology.machines();

            for rolling in 1..=rollings {
                let rolling_start = offset + rolling as f64 * soft.freq;
                if soft.check_style.is_system_wide() {
                    queue.push(Event::upgrade_check(root, rolling_start, soft.check_style))?;
                }
                for (batch, group) in machines.chunks(soft.machines_per_batch).enumerate() {
                    let begin = rolling_start + soft.downtime * batch as f64;
                    let back = begin + soft.downtime;
                    for machine in group {
                        if !soft.check_style.is_system_wide() {
                            queue.push(Event::upgrade_check(*machine, begin, soft.check_style))?;
                        }
                        queue.push(Event::failure(
                            *machine,
                            begin,
                            FailureKind::ShortTransient,
                            back,
                        ))?;
                        queue.push(Event::recovered(*machine, back, FailureKind::ShortTransient))?;
                    }
                }
            }
            info!(rollings, offset, "Scheduled soft upgrades");
        }

        if let Some(hard) = &upgrades.hard {
            let times = self.config.upgrade_times();
            for t in &times {
                queue.push(Event::upgrade_check(root, *t, hard.check_style))?;
            }
            info!(count = times.len(), "Scheduled hard upgrades");
        }
        Ok(())
    }
}

impl DiskEventRegenerator for Timeline<'_> {
    fn regenerate_disks(&mut self, queue: &mut EventQueue, from: f64, until: f64) -> Result<()> {
        let hard = self
            .config
            .upgrades
            .as_ref()
            .and_then(|u| u.hard.as_ref());
        let failure_override = hard
            .and_then(|h| h.disk_failure.as_ref())
            .map(|spec| spec.build())
            .transpose()?;
        let latent_override = hard
            .and_then(|h| h.latent_error.as_ref())
            .map(|spec| spec.build())
            .transpose()?;

        let topology = self.topology;
        for disk in topology.disks() {
            let slots = &mut self.slots[disk.0];
            if let Some(generator) = &failure_override {
                slots.failure = Some(generator.clone());
            }
            if let Some(generator) = &latent_override {
                slots.latent_error = Some(generator.clone());
            }
            if let Some(generator) = slots.failure.as_mut() {
                generator.reset(from);
            }
            if let Some(generator) = slots.latent_error.as_mut() {
                generator.reset(from);
            }
            self.last_recovery[disk.0] = from;
            self.walk_disk(*disk, queue, from + END_SLACK, until)?;
        }
        debug!(from, until, "Regenerated disk events");
        Ok(())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn config(yaml: &str) -> SimulationConfig {
        SimulationConfig::from_yaml_str(yaml).unwrap()
    }

    const BASE: &str = r#"
total_time: 1000
redundancy: RS_3_2
rack_count: 3
machines_per_rack: 2
disks_per_machine: 2
total_slices: 10
disk_repair_time: 1.0
node_repair_time: 2.0
"#;

    fn drain(queue: &mut EventQueue) -> Vec<Event> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    // =========================================================================
    // Disk Tests
    // =========================================================================

    #[test]
    fn test_disk_failures_follow_generators() {
        let cfg = config(&format!(
            "{}disk:\n  failure: {{kind: constant, freq: 100}}\n  recovery: {{kind: constant, freq: 4}}\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, 1000.0).unwrap();

        let disk = topology.disks()[0];
        let events: Vec<Event> = drain(&mut queue)
            .into_iter()
            .filter(|e| e.unit() == Some(disk))
            .collect();
        assert_eq!(events[0].kind, EventKind::Failure);
        assert_eq!(events[0].time, 100.0);
        assert_eq!(events[1].kind, EventKind::Recovered);
        // detection at 104 plus one hour of rebuild
        assert_eq!(events[1].time, 105.0);
        assert!(events.iter().all(|e| e.time <= 1000.0));
    }

    #[test]
    fn test_latent_errors_pair_with_scrubs() {
        let cfg = config(&format!(
            "{}disk:\n  latent_error: {{kind: constant, freq: 300}}\n  scrub: {{kind: constant, freq: 10}}\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut durations = DurationQueue::new();
        timeline.generate(&mut durations, 0.0, 1000.0).unwrap();

        let sectors: Vec<_> = durations
            .iter()
            .filter(|d| matches!(d.unit, DurationUnit::Sector(_)))
            .collect();
        assert!(!sectors.is_empty());
        assert!(sectors.iter().all(|d| d.kind == DurationKind::Loss));
        assert!(sectors.iter().all(|d| d.end >= d.start && d.start <= 1000.0));
        assert!(durations
            .iter()
            .all(|d| matches!(d.unit, DurationUnit::Sector(_))));
    }

    #[test]
    fn test_no_generators_no_events() {
        let cfg = config(BASE);
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, 1000.0).unwrap();
        assert!(queue.is_empty());
    }

    // =========================================================================
    // Machine Tests
    // =========================================================================

    #[test]
    fn test_short_machine_outage() {
        let cfg = config(&format!(
            "{}machine:\n  failure: {{kind: constant, freq: 400}}\n  recovery: {{kind: constant, freq: 0.1}}\n  fail_fraction: 0.0\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, 1000.0).unwrap();

        let machine = topology.machines()[0];
        let events: Vec<Event> = drain(&mut queue)
            .into_iter()
            .filter(|e| e.unit() == Some(machine))
            .collect();
        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .all(|e| e.cause == FailureKind::ShortTransient));
        assert_eq!(events[0].next_recovery_time, events[1].time);
    }

    #[test]
    fn test_long_outage_schedules_eager_recovery() {
        let cfg = config(&format!(
            "{}machine:\n  failure: {{kind: constant, freq: 400}}\n  recovery: {{kind: constant, freq: 5}}\n  fail_fraction: 0.0\n  eager_recovery: true\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, 1000.0).unwrap();

        let machine = topology.machines()[0];
        let eager: Vec<Event> = drain(&mut queue)
            .into_iter()
            .filter(|e| e.unit() == Some(machine) && e.kind == EventKind::EagerRecoveryStart)
            .collect();
        assert_eq!(eager.len(), 2);
        assert_eq!(eager[0].time, 400.25);
        assert_eq!(eager[0].next_recovery_time, 405.0);
    }

    #[test]
    fn test_permanent_machine_loss_duration() {
        let cfg = config(&format!(
            "{}machine:\n  failure: {{kind: constant, freq: 400}}\n  recovery: {{kind: constant, freq: 5}}\n  permanent_recovery: {{kind: constant, freq: 1}}\n  fail_fraction: 1.0\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(1)).unwrap();
        let mut durations = DurationQueue::new();
        timeline.generate(&mut durations, 0.0, 1000.0).unwrap();

        let machine = DurationUnit::Unit(topology.machines()[0]);
        let first = durations.iter().find(|d| d.unit == machine).unwrap();
        assert_eq!(first.kind, DurationKind::Loss);
        assert_eq!(first.cause, Some(FailureKind::Permanent));
        // detection is immediate, then two hours of rebuild
        assert_eq!((first.start, first.end), (400.0, 402.0));
    }

    #[test]
    fn test_disks_stay_quiet_while_machine_down() {
        let cfg = config(&format!(
            "{}machine:\n  failure: {{kind: constant, freq: 100}}\n  recovery: {{kind: constant, freq: 50}}\n  fail_fraction: 0.0\ndisk:\n  failure: {{kind: uniform, freq: 300}}\n  recovery: {{kind: constant, freq: 1}}\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(9)).unwrap();
        let mut durations = DurationQueue::new();
        timeline.generate(&mut durations, 0.0, 1000.0).unwrap();

        let machine = topology.machines()[0];
        let downs: Vec<(f64, f64)> = durations
            .iter()
            .filter(|d| d.unit == DurationUnit::Unit(machine))
            .map(|d| (d.start, d.end))
            .collect();
        for disk in topology.children(machine) {
            for d in durations.iter().filter(|d| d.unit == DurationUnit::Unit(*disk)) {
                assert!(
                    downs.iter().all(|(s, e)| d.start <= *s || d.start >= *e),
                    "disk failure at {} inside machine outage",
                    d.start
                );
            }
        }
    }

    // =========================================================================
    // Upgrade Tests
    // =========================================================================

    #[test]
    fn test_soft_upgrade_batches() {
        let cfg = config(&format!(
            "{}upgrades:\n  soft:\n    freq: 400\n    machines_per_batch: 2\n    downtime: 0.5\n    check_style: 1\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(3)).unwrap();
        let mut queue = EventQueue::new();
        timeline.schedule_upgrades(&mut queue).unwrap();

        let events = drain(&mut queue);
        let checks = events
            .iter()
            .filter(|e| e.kind == EventKind::UpgradeCheck)
            .count();
        // two rollings over six machines
        assert_eq!(checks, 12);
        let failures: Vec<&Event> = events
            .iter()
            .filter(|e| e.kind == EventKind::Failure)
            .collect();
        assert_eq!(failures.len(), 12);
        assert!(failures
            .iter()
            .all(|e| (e.next_recovery_time - e.time - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_hard_upgrade_regenerates_with_override() {
        let cfg = config(&format!(
            "{}disk:\n  failure: {{kind: no_failure}}\n  recovery: {{kind: constant, freq: 1}}\nupgrades:\n  hard:\n    freq: 500\n    disk_failure: {{kind: constant, freq: 10}}\n",
            BASE
        ));
        let topology = Topology::build(3, 2, 2);
        let mut timeline = Timeline::new(&cfg, &topology, StdRng::seed_from_u64(3)).unwrap();
        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, 1000.0).unwrap();
        timeline.schedule_upgrades(&mut queue).unwrap();
        assert_eq!(queue.len(), 1);

        timeline.regenerate_disks(&mut queue, 500.0, 1000.0).unwrap();
        let failures = drain(&mut queue)
            .into_iter()
            .filter(|e| e.kind == EventKind::Failure)
            .count();
        assert!(failures > 0);
    }
}
