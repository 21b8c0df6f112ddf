//! Latent sector errors and the scrubs that find them.

use tracing::debug;

use super::EventHandler;
use crate::ec::BlockState;
use crate::error::Result;
use crate::event::Event;
use crate::hardware::{UnitId, UnitKind};
use crate::report::LossCause;

impl EventHandler<'_> {
    pub(super) fn handle_latent_defect(&mut self, disk: UnitId, event: &Event) -> Result<()> {
        if self.topology.kind(disk) != UnitKind::Disk {
            return Err(self.wrong_target(event, disk));
        }
        let time = event.time;

        let slot = match self.placement.random_slot(disk, &mut self.rng) {
            Some(slot) => slot,
            None => return Ok(()),
        };
        let stripe = slot.stripe;
        if stripe >= self.live_stripes(time) {
            return Ok(());
        }
        if self.skip_lost(stripe, time) {
            self.counters.skipped_latent += 1;
            return Ok(());
        }

        let before = self.is_repairable(stripe)?;
        // a sector error can't hit a block that is already gone
        if self.block(stripe, slot.block)?.is_lost() {
            self.counters.skipped_latent += 1;
            return Ok(());
        }

        self.slice_degraded(stripe);
        self.set_block(stripe, slot.block, BlockState::LostLatent)?;
        self.latent_hits.entry(disk).or_default().push(slot);
        self.counters.latent_failures += 1;
        self.track_transition(stripe, before, time)?;

        if self.is_undurable(stripe)? {
            self.mark_lost(stripe, time, LossCause::LatentError(disk));
        }
        Ok(())
    }

    pub(super) fn handle_latent_recovered(&mut self, disk: UnitId, event: &Event) -> Result<()> {
        if self.topology.kind(disk) != UnitKind::Disk {
            return Err(self.wrong_target(event, disk));
        }
        let time = event.time;
        self.counters.scrubs += 1;

        let live = self.live_stripes(time);
        let hits = self.latent_hits.remove(&disk).unwrap_or_default();
        let mut repaired = 0usize;
        for slot in hits {
            let stripe = slot.stripe;
            if stripe >= live || self.skip_lost(stripe, time) {
                continue;
            }
            if !self.is_repairable(stripe)? {
                continue;
            }
            if self.block(stripe, slot.block)? != BlockState::LostLatent {
                continue;
            }

            let transferred = self.single_repair(stripe, slot.block)?;
            self.counters.scrub_repairs += 1;
            self.counters.repairs += 1;
            self.counters.repair_transfer_mb += transferred;
            self.slice_recovered(stripe);
            repaired += 1;
        }
        debug!(disk = %disk, time, repaired, "Scrub finished");
        Ok(())
    }
}
