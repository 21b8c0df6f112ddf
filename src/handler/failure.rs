//! Failure events on disks, machines and racks.

use tracing::debug;

use super::EventHandler;
use crate::ec::BlockState;
use crate::error::Result;
use crate::event::{Event, FailureKind};
use crate::hardware::{UnitId, UnitKind};
use crate::report::LossCause;

impl EventHandler<'_> {
    pub(super) fn handle_failure(&mut self, unit: UnitId, event: &Event) -> Result<()> {
        match self.topology.kind(unit) {
            UnitKind::Machine => self.machine_failure(unit, event),
            UnitKind::Disk => self.disk_failure(unit, event.time),
            UnitKind::Rack | UnitKind::Datacenter => {
                let topology = self.topology;
                for child in topology.children(unit) {
                    self.handle_failure(*child, event)?;
                }
                Ok(())
            }
        }
    }

    fn machine_failure(&mut self, machine: UnitId, event: &Event) -> Result<()> {
        let time = event.time;
        self.counters.machine_failures += 1;

        let permanent = event.cause == FailureKind::Permanent;
        match event.cause {
            FailureKind::Permanent => self.counters.permanent_machine_failures += 1,
            FailureKind::ShortTransient => self.counters.short_temp_machine_failures += 1,
            FailureKind::LongTransient => self.counters.long_temp_machine_failures += 1,
            _ => {
                // inherited from the rack, classify by how long it stays down
                self.counters.machine_failures_due_to_rack += 1;
                if event.next_recovery_time - time <= self.config.machine.fail_timeout {
                    self.counters.short_temp_machine_failures += 1;
                } else {
                    self.counters.long_temp_machine_failures += 1;
                }
            }
        }

        let live = self.live_stripes(time);
        let (topology, placement) = (self.topology, self.placement);
        for disk in topology.children(machine) {
            for slot in placement.slots(*disk) {
                let stripe = slot.stripe;
                if stripe >= live || self.skip_lost(stripe, time) {
                    continue;
                }

                if permanent {
                    self.slice_degraded(stripe);
                } else {
                    self.slice_degraded_availability(stripe);
                }

                let before = self.is_repairable(stripe)?;
                let current = self.block(stripe, slot.block)?;
                if current == BlockState::LostDurability {
                    continue;
                }
                if permanent {
                    self.set_block(stripe, slot.block, BlockState::LostDurability)?;
                } else if current == BlockState::Normal {
                    self.set_block(stripe, slot.block, BlockState::Unavailable)?;
                }
                self.track_transition(stripe, before, time)?;

                if permanent && self.is_undurable(stripe)? {
                    self.mark_lost(stripe, time, LossCause::Machine(machine));
                }
            }
        }
        debug!(machine = %machine, time, cause = ?event.cause, "Machine failed");
        Ok(())
    }

    fn disk_failure(&mut self, disk: UnitId, time: f64) -> Result<()> {
        self.counters.disk_failures += 1;

        let live = self.live_stripes(time);
        let placement = self.placement;
        for slot in placement.slots(disk) {
            let stripe = slot.stripe;
            if stripe >= live || self.skip_lost(stripe, time) {
                continue;
            }

            self.slice_degraded(stripe);
            let before = self.is_repairable(stripe)?;
            if self.block(stripe, slot.block)? == BlockState::LostDurability {
                continue;
            }
            self.set_block(stripe, slot.block, BlockState::LostDurability)?;
            self.track_transition(stripe, before, time)?;

            if self.is_undurable(stripe)? {
                self.mark_lost(stripe, time, LossCause::Disk(disk));
            }
        }
        debug!(disk = %disk, time, "Disk failed");
        Ok(())
    }
}
