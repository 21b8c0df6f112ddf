//! Eager recovery.
//!
//! Once a long machine outage passes its timeout, the stripes it hosts are
//! rebuilt ahead of the machine's return using whatever recovery bandwidth is
//! left. Work is cut into installments of roughly `installment_size` chunks,
//! each scheduled when its transfer would complete.

use tracing::{debug, warn};

use super::EventHandler;
use crate::ec::BlockState;
use crate::error::{Error, Result};
use crate::event::{Event, EventQueue, Installment};
use crate::hardware::UnitId;
use crate::report::LossCause;

impl EventHandler<'_> {
    pub(super) fn handle_eager_start(
        &mut self,
        machine: UnitId,
        event: &Event,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let time = event.time;
        self.counters.eager_machine_repairs += 1;

        let window = event.next_recovery_time - time;
        if window.is_nan() || window <= 0.0 {
            return Err(Error::Internal(format!(
                "eager recovery for {} starts after the machine is back",
                self.topology.name(machine)
            )));
        }

        let chunk_size = self.config.chunk_size;
        let mut rate = self.config.recovery_bandwidth_cross_rack - self.current_recovery_bandwidth;
        if rate <= 0.0 {
            return Ok(());
        }
        // a machine that never returns leaves no deadline to spread the work over
        let chunks_to_recover = if window.is_finite() {
            let chunks = (rate / chunk_size * window).floor() as usize;
            if chunks < 1 {
                return Ok(());
            }
            rate = chunks as f64 * chunk_size / window;
            chunks
        } else {
            usize::MAX
        };
        self.current_recovery_bandwidth += rate;
        self.counters.max_recovery_bandwidth = self
            .counters
            .max_recovery_bandwidth
            .max(self.current_recovery_bandwidth);

        let k = self.k;
        let installment_size = self.config.installment_size;
        let mut size = installment_size.min(chunks_to_recover);
        let mut installment = Installment::new(machine, time);
        let mut total_added = 0usize;
        let mut added = 0usize;
        let mut clock = time;
        let mut scheduled = 0usize;

        let live = self.live_stripes(time);
        let (topology, placement) = (self.topology, self.placement);
        for disk in topology.children(machine) {
            for slot in placement.slots(*disk) {
                let stripe = slot.stripe;
                if stripe >= live {
                    continue;
                }
                // the timeout is when the outage is first noticed
                if self.status[stripe].available_count() >= self.n {
                    self.counters.anomalous_available += 1;
                }
                if self.status[stripe].is_lost() {
                    continue;
                }

                let expected = clock + size as f64 * chunk_size / rate;
                let threshold = self.config.lazy_threshold(expected - time);
                if !self.threshold_crossed(stripe, threshold) {
                    continue;
                }

                let cost = k + self.status[stripe].count(BlockState::Unavailable) - 1;
                installment.stripes.push(stripe);
                total_added += cost;
                added += cost;

                if added + k >= size {
                    clock += added as f64 * chunk_size / rate;
                    if total_added + k >= chunks_to_recover {
                        installment.bandwidth_release = Some(rate);
                        queue.push(Event::installment(clock, installment))?;
                        debug!(machine = %machine, installments = scheduled + 1, "Eager recovery scheduled");
                        return Ok(());
                    }
                    let full = std::mem::replace(&mut installment, Installment::new(machine, time));
                    queue.push(Event::installment(clock, full))?;
                    scheduled += 1;

                    size = installment_size.min(chunks_to_recover - total_added);
                    added = 0;
                }
            }
        }

        if !installment.stripes.is_empty() {
            clock += added as f64 * chunk_size / rate;
            installment.bandwidth_release = Some(rate);
            queue.push(Event::installment(clock, installment))?;
            debug!(machine = %machine, installments = scheduled + 1, "Eager recovery scheduled");
            return Ok(());
        }

        // nothing left to rebuild, hand the bandwidth back
        self.counters.empty_installments += 1;
        self.release_bandwidth(rate);
        Ok(())
    }

    fn release_bandwidth(&mut self, rate: f64) {
        self.current_recovery_bandwidth -= rate;
        // float drift
        if self.current_recovery_bandwidth < 0.0 && self.current_recovery_bandwidth > -1.0 {
            self.current_recovery_bandwidth = 0.0;
        }
    }

    pub(super) fn handle_installment(&mut self, installment: &Installment, time: f64) -> Result<()> {
        if let Some(rate) = installment.bandwidth_release {
            self.release_bandwidth(rate);
        }

        let threshold = self
            .config
            .lazy_threshold(time - installment.original_failure_time);
        for &stripe in &installment.stripes {
            if self.skip_lost(stripe, time) {
                continue;
            }
            if !self.threshold_crossed(stripe, threshold) {
                continue;
            }
            if self.is_undurable(stripe)? {
                self.mark_lost(stripe, time, LossCause::Machine(installment.machine));
                continue;
            }
            if !self.is_repairable(stripe)? {
                continue;
            }

            self.counters.eager_slice_repairs += 1;
            let transferred = if self.config.lazy_recovery {
                self.batch_repair(stripe, false)?
            } else {
                let index = match self.status[stripe]
                    .blocks()
                    .and_then(|b| b.iter().position(|s| *s == BlockState::Unavailable))
                {
                    Some(index) => index,
                    None => {
                        warn!(stripe, "Eager repair found no unavailable block");
                        continue;
                    }
                };
                self.single_repair(stripe, index)?
            };
            self.counters.repair_transfer_mb += transferred;

            if self.status[stripe].durable_count() != self.n {
                self.slice_recovered(stripe);
            } else {
                self.slice_recovered_availability(stripe);
            }
        }
        Ok(())
    }
}
