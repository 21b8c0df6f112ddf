//! Recovered events.
//!
//! Transient machine returns bring unavailable blocks back. Permanent machine
//! and disk recoveries rebuild lost blocks of stripes that crossed the
//! recovery threshold; with the bandwidth queue enabled they first wait for
//! cross-rack bandwidth and come back as a queued-repair event.

use tracing::debug;

use super::EventHandler;
use crate::ec::BlockState;
use crate::error::{Error, Result};
use crate::event::{Event, EventQueue, FailureKind};
use crate::hardware::{UnitId, UnitKind};

impl EventHandler<'_> {
    pub(super) fn handle_recovery(
        &mut self,
        unit: UnitId,
        event: &Event,
        queue: &mut EventQueue,
    ) -> Result<()> {
        match self.topology.kind(unit) {
            UnitKind::Machine => self.machine_recovery(unit, event, queue),
            UnitKind::Disk => self.disk_recovery(unit, event, queue),
            UnitKind::Rack | UnitKind::Datacenter => {
                let topology = self.topology;
                for child in topology.children(unit) {
                    self.handle_recovery(*child, event, queue)?;
                }
                Ok(())
            }
        }
    }

    fn machine_recovery(
        &mut self,
        machine: UnitId,
        event: &Event,
        queue: &mut EventQueue,
    ) -> Result<()> {
        match event.cause {
            FailureKind::Permanent if !self.config.queue_disable => {
                self.defer_repair(machine, event.time, self.config.node_repair_time(), queue)
            }
            FailureKind::Permanent | FailureKind::QueuedRepair => {
                self.counters.machine_repairs += 1;
                let topology = self.topology;
                for disk in topology.children(machine) {
                    self.threshold_pass(*disk, event.time)?;
                }
                debug!(machine = %machine, time = event.time, "Rebuilt machine");
                Ok(())
            }
            _ => {
                self.counters.machine_repairs += 1;
                self.transient_return(machine, event)
            }
        }
    }

    fn disk_recovery(&mut self, disk: UnitId, event: &Event, queue: &mut EventQueue) -> Result<()> {
        if event.cause != FailureKind::QueuedRepair && !self.config.queue_disable {
            return self.defer_repair(disk, event.time, self.config.disk_repair_time(), queue);
        }
        self.counters.disk_repairs += 1;
        self.threshold_pass(disk, event.time)?;
        debug!(disk = %disk, time = event.time, "Rebuilt disk");
        Ok(())
    }

    /// Waits for bandwidth on the racks the rebuild reads from
    fn defer_repair(
        &mut self,
        unit: UnitId,
        time: f64,
        repair_time: f64,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let sources = self.scheme.repair_sources();
        let racks = self.topology.racks();
        let ledger = self
            .ledger
            .as_mut()
            .ok_or_else(|| Error::Internal("bandwidth queue is disabled".to_string()))?;

        // the rebuild was due to start `repair_time` before the recovery
        let completion = ledger.occupy(time - repair_time, racks, sources, repair_time);
        debug!(unit = %unit, time, completion, "Repair queued for bandwidth");
        queue.push(Event::recovered(unit, completion, FailureKind::QueuedRepair))
    }

    /// Unavailable blocks on the machine become readable again
    fn transient_return(&mut self, machine: UnitId, event: &Event) -> Result<()> {
        let time = event.time;
        let live = self.live_stripes(time);
        let (topology, placement) = (self.topology, self.placement);

        for disk in topology.children(machine) {
            for slot in placement.slots(*disk) {
                let stripe = slot.stripe;
                if stripe >= live || self.skip_lost(stripe, time) {
                    continue;
                }

                if self.status[stripe].available_count() < self.n {
                    let before = self.is_repairable(stripe)?;
                    if self.block(stripe, slot.block)? == BlockState::Unavailable {
                        self.set_block(stripe, slot.block, BlockState::Normal)?;
                    }
                    self.slice_recovered_availability(stripe);
                    self.track_transition(stripe, before, time)?;
                } else if event.cause == FailureKind::ShortTransient {
                    // something already rebuilt it while the machine was away
                    self.counters.anomalous_available += 1;
                }
            }
        }
        Ok(())
    }

    /// Rebuilds lost blocks on the disk for stripes at or below the threshold
    fn threshold_pass(&mut self, disk: UnitId, time: f64) -> Result<()> {
        let live = self.live_stripes(time);
        let placement = self.placement;

        for slot in placement.slots(disk) {
            let stripe = slot.stripe;
            if stripe >= live || self.skip_lost(stripe, time) {
                continue;
            }
            if !self.is_repairable(stripe)? {
                continue;
            }

            let threshold = self.actual_threshold(live);
            if !self.threshold_crossed(stripe, threshold) {
                continue;
            }

            if self.block(stripe, slot.block)?.is_lost() {
                let transferred = if self.config.lazy_recovery || self.config.parallel_repair {
                    self.batch_repair(stripe, false)?
                } else {
                    self.single_repair(stripe, slot.block)?
                };
                self.forget_latent_hit(disk, stripe);
                self.counters.repairs += 1;
                self.counters.repair_transfer_mb += transferred;
            }
            self.slice_recovered(stripe);
        }
        Ok(())
    }
}
