//! Upgrade checks.
//!
//! Before a machine goes down for maintenance its stripes are checked and
//! repaired so the planned outage doesn't compound existing damage. System-wide
//! styles sweep every stripe; a hard-upgrade sweep also regenerates the disk
//! timelines for the next campaign.

use tracing::{debug, info};

use super::EventHandler;
use crate::config::TIME_EPSILON;
use crate::ec::BlockState;
use crate::error::{Error, Result};
use crate::event::{CheckStyle, Event, EventQueue};
use crate::hardware::{UnitId, UnitKind};
use crate::timeline::DiskEventRegenerator;

impl EventHandler<'_> {
    pub(super) fn handle_upgrade_check(
        &mut self,
        unit: UnitId,
        event: &Event,
        queue: &mut EventQueue,
        regenerator: &mut dyn DiskEventRegenerator,
    ) -> Result<()> {
        let style = event
            .check
            .ok_or_else(|| Error::Internal("upgrade check without a style".to_string()))?;
        let time = event.time;

        match style {
            CheckStyle::RepairLostOnMachine | CheckStyle::RepairDamagedOnMachine => {
                self.require_machine(unit, event)?;
                self.check_blocks(unit, style, time)
            }
            CheckStyle::BatchLostOnMachine | CheckStyle::BatchDamagedOnMachine => {
                self.require_machine(unit, event)?;
                self.check_stripes(unit, style, time)
            }
            CheckStyle::BatchLostEverywhere | CheckStyle::BatchDamagedEverywhere => {
                self.check_everything(style, time)?;
                if self.is_upgrade_time(time) {
                    self.start_campaign(time, queue, regenerator)?;
                }
                Ok(())
            }
        }
    }

    fn require_machine(&self, unit: UnitId, event: &Event) -> Result<()> {
        if self.topology.kind(unit) != UnitKind::Machine {
            return Err(self.wrong_target(event, unit));
        }
        Ok(())
    }

    fn is_upgrade_time(&self, time: f64) -> bool {
        self.upgrade_times
            .iter()
            .any(|t| (t - time).abs() < TIME_EPSILON)
    }

    /// Counter bookkeeping after a repair that may have restored availability only
    fn settle(&mut self, stripe: usize, was_degraded: bool) {
        if was_degraded {
            self.slice_recovered(stripe);
        } else {
            self.slice_recovered_availability(stripe);
        }
    }

    fn needs_check(&self, stripe: usize, style: CheckStyle) -> bool {
        let state = &self.status[stripe];
        if style.only_lost() {
            state.durable_count() < self.n
        } else {
            state.available_count() < self.n
        }
    }

    /// Styles 1 and 2: rebuild the machine's own blocks one at a time
    fn check_blocks(&mut self, machine: UnitId, style: CheckStyle, time: f64) -> Result<()> {
        let live = self.live_stripes(time);
        let (topology, placement) = (self.topology, self.placement);
        let mut repaired = 0usize;

        for disk in topology.children(machine) {
            for slot in placement.slots(*disk) {
                let stripe = slot.stripe;
                if stripe >= live || self.skip_lost(stripe, time) {
                    continue;
                }
                if !self.is_repairable(stripe)? {
                    continue;
                }

                let block = self.block(stripe, slot.block)?;
                let damaged = block.is_lost()
                    || (!style.only_lost() && block == BlockState::Unavailable);
                if !damaged {
                    continue;
                }

                let was_degraded = self.status[stripe].durable_count() < self.n;
                let transferred = self.single_repair(stripe, slot.block)?;
                self.forget_latent_hit(*disk, stripe);
                self.counters.repairs += 1;
                self.counters.repair_transfer_mb += transferred;
                self.settle(stripe, was_degraded);
                repaired += 1;
            }
        }
        debug!(machine = %machine, time, repaired, "Upgrade check finished");
        Ok(())
    }

    /// Styles 3 and 4: batch repair every stripe the machine hosts
    fn check_stripes(&mut self, machine: UnitId, style: CheckStyle, time: f64) -> Result<()> {
        let live = self.live_stripes(time);
        let (topology, placement) = (self.topology, self.placement);
        let mut repaired = 0usize;

        for disk in topology.children(machine) {
            for slot in placement.slots(*disk) {
                if self.batch_check(slot.stripe, style, live, time)? {
                    repaired += 1;
                }
            }
        }
        debug!(machine = %machine, time, repaired, "Upgrade check finished");
        Ok(())
    }

    /// Styles 5 and 6: batch repair the whole stripe population
    fn check_everything(&mut self, style: CheckStyle, time: f64) -> Result<()> {
        let live = self.live_stripes(time);
        let mut repaired = 0usize;
        for stripe in 0..live.min(self.status.len()) {
            if self.batch_check(stripe, style, live, time)? {
                repaired += 1;
            }
        }
        // every latent error has been repaired or belongs to a lost stripe
        self.latent_hits.clear();
        info!(time, repaired, style = u8::from(style), "System-wide upgrade check finished");
        Ok(())
    }

    fn batch_check(&mut self, stripe: usize, style: CheckStyle, live: usize, time: f64) -> Result<bool> {
        if stripe >= live || self.skip_lost(stripe, time) {
            return Ok(false);
        }
        if !self.needs_check(stripe, style) || !self.is_repairable(stripe)? {
            return Ok(false);
        }

        let was_degraded = self.status[stripe].durable_count() < self.n;
        let transferred = self.batch_repair(stripe, style.only_lost())?;
        self.counters.repairs += 1;
        self.counters.repair_transfer_mb += transferred;
        self.settle(stripe, was_degraded);
        Ok(true)
    }

    /// Replaces the queued disk events with ones drawn for the new hardware
    fn start_campaign(
        &mut self,
        time: f64,
        queue: &mut EventQueue,
        regenerator: &mut dyn DiskEventRegenerator,
    ) -> Result<()> {
        let until = self
            .upgrade_times
            .iter()
            .copied()
            .find(|t| *t > time + TIME_EPSILON)
            .unwrap_or(self.config.total_time);

        let topology = self.topology;
        let removed = queue.remove_after(time, |event| {
            event
                .unit()
                .is_some_and(|unit| topology.kind(unit) == UnitKind::Disk)
        });
        regenerator.regenerate_disks(queue, time, until)?;
        info!(time, until, removed, "Hard upgrade regenerated disk events");
        Ok(())
    }
}
