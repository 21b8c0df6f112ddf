//! Event-Driven Stripe State Machine
//!
//! Applies each simulation event to the per-stripe block states. Every stripe
//! moves Healthy → Degraded → Lost; Lost is terminal. Handlers are split by
//! event family:
//!
//! - [`failure`]: disk, machine and rack failures
//! - [`recovery`]: transient returns and threshold-driven rebuilds
//! - [`latent`]: sector errors and scrubs
//! - [`eager`]: bandwidth-limited eager rebuilds in installments
//! - [`upgrade`]: pre-maintenance checks
//! - [`stats`]: end-of-run metrics

mod eager;
mod failure;
mod latent;
mod recovery;
mod stats;
mod upgrade;

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use tracing::{info, instrument, trace};

use crate::bandwidth::BandwidthLedger;
use crate::config::SimulationConfig;
use crate::ec::{BlockState, RedundancyScheme, StripeState};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventQueue, EventTarget};
use crate::hardware::{Placement, Slot, Topology, UnitId};
use crate::report::{HandlerCounters, LossCause, StripeLoss, UnavailabilityWindow};
use crate::timeline::DiskEventRegenerator;

pub struct EventHandler<'a> {
    config: &'a SimulationConfig,
    topology: &'a Topology,
    placement: &'a Placement,
    scheme: RedundancyScheme,
    n: usize,
    k: usize,

    status: Vec<StripeState>,
    /// Blocks hit by a latent error and not yet scrubbed, per disk
    latent_hits: HashMap<UnitId, Vec<Slot>>,
    windows: BTreeMap<usize, Vec<UnavailabilityWindow>>,
    losses: Vec<StripeLoss>,
    unavailable_count: u64,

    /// Stripes with at least one destroyed block
    degraded: i64,
    /// Stripes with at least one unreadable block
    avail_degraded: i64,

    ledger: Option<BandwidthLedger>,
    /// MB/hour committed to eager recovery
    current_recovery_bandwidth: f64,

    upgrade_times: Vec<f64>,
    counters: HandlerCounters,
    rng: StdRng,
}

impl<'a> EventHandler<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        topology: &'a Topology,
        placement: &'a Placement,
        rng: StdRng,
    ) -> Self {
        let scheme = config.redundancy;
        let n = scheme.n();
        let ledger = (!config.queue_disable).then(|| BandwidthLedger::new(topology.racks()));

        Self {
            config,
            topology,
            placement,
            scheme,
            n,
            k: scheme.k(),
            status: vec![StripeState::healthy(n); placement.stripe_count()],
            latent_hits: HashMap::new(),
            windows: BTreeMap::new(),
            losses: Vec::new(),
            unavailable_count: 0,
            degraded: 0,
            avail_degraded: 0,
            ledger,
            current_recovery_bandwidth: 0.0,
            upgrade_times: config.upgrade_times(),
            counters: HandlerCounters::default(),
            rng,
        }
    }

    /// Applies one event; ignored events are dropped
    #[instrument(level = "trace", skip_all, fields(kind = %event.kind, time = event.time))]
    pub fn handle(
        &mut self,
        event: Event,
        queue: &mut EventQueue,
        regenerator: &mut dyn DiskEventRegenerator,
    ) -> Result<()> {
        if event.ignore {
            return Ok(());
        }
        self.counters.events_handled += 1;
        trace!(target = %event.target, "Handling event");

        if event.kind == EventKind::EagerRecoveryInstallment {
            return match &event.target {
                EventTarget::Installment(installment) => {
                    self.handle_installment(installment, event.time)
                }
                EventTarget::Unit(unit) => Err(self.wrong_target(&event, *unit)),
            };
        }

        let unit = match event.target {
            EventTarget::Unit(unit) => unit,
            EventTarget::Installment(_) => {
                return Err(Error::InvalidEventTarget {
                    event: event.kind.to_string(),
                    unit: event.target.to_string(),
                })
            }
        };

        match event.kind {
            EventKind::Failure => self.handle_failure(unit, &event),
            EventKind::Recovered => self.handle_recovery(unit, &event, queue),
            EventKind::LatentDefect => self.handle_latent_defect(unit, &event),
            EventKind::LatentRecovered => self.handle_latent_recovered(unit, &event),
            EventKind::EagerRecoveryStart => self.handle_eager_start(unit, &event, queue),
            EventKind::UpgradeCheck => self.handle_upgrade_check(unit, &event, queue, regenerator),
            EventKind::EagerRecoveryInstallment => Ok(()),
        }
    }

    fn wrong_target(&self, event: &Event, unit: UnitId) -> Error {
        Error::InvalidEventTarget {
            event: event.kind.to_string(),
            unit: self.topology.name(unit),
        }
    }

    /// Stripes beyond the scaled population don't exist yet
    fn live_stripes(&self, time: f64) -> usize {
        self.config.current_total_slices(time) as usize
    }

    // =========================================================================
    // Stripe Predicates
    // =========================================================================

    fn is_repairable(&self, stripe: usize) -> Result<bool> {
        self.scheme.is_repairable(&self.status[stripe])
    }

    /// Lost once the durable blocks alone can't decode the stripe
    fn is_undurable(&self, stripe: usize) -> Result<bool> {
        let view = self.status[stripe].as_durable_view();
        Ok(!self.scheme.is_repairable(&view)?)
    }

    fn block(&self, stripe: usize, index: usize) -> Result<BlockState> {
        self.status[stripe]
            .block(index)
            .ok_or_else(|| Error::Internal(format!("stripe {} has no block {}", stripe, index)))
    }

    fn set_block(&mut self, stripe: usize, index: usize, state: BlockState) -> Result<()> {
        let blocks = self.status[stripe]
            .blocks_mut()
            .ok_or_else(|| Error::Internal(format!("stripe {} is lost", stripe)))?;
        let block = blocks
            .get_mut(index)
            .ok_or_else(|| Error::Internal(format!("stripe {} has no block {}", stripe, index)))?;
        *block = state;
        Ok(())
    }

    /// Crossed when few enough blocks survive that the stripe must be rebuilt
    fn threshold_crossed(&self, stripe: usize, threshold: usize) -> bool {
        let state = &self.status[stripe];
        state.durable_count() <= threshold
            || (self.config.availability_counts_for_recovery
                && state.available_count() <= threshold)
    }

    /// Recovery threshold, relaxed to `n - 1` while too many stripes are degraded
    fn actual_threshold(&self, live: usize) -> usize {
        let flooded = self.degraded as f64 >= self.config.max_degraded_slices * live as f64;
        if self.config.lazy_only_available && flooded {
            self.n - 1
        } else {
            self.config.recovery_threshold()
        }
    }

    // =========================================================================
    // Degraded Counters
    // =========================================================================

    /// Called before a block is destroyed
    fn slice_degraded(&mut self, stripe: usize) {
        if self.status[stripe].durable_count() == self.n {
            self.degraded += 1;
        }
        self.slice_degraded_availability(stripe);
    }

    /// Called before a block becomes unreadable
    fn slice_degraded_availability(&mut self, stripe: usize) {
        // replication is unaffected
        if self.k == 1 {
            return;
        }
        if self.status[stripe].available_count() == self.n {
            self.avail_degraded += 1;
        }
    }

    /// Called after a repair
    fn slice_recovered(&mut self, stripe: usize) {
        if self.status[stripe].durable_count() == self.n {
            self.degraded -= 1;
        }
        self.slice_recovered_availability(stripe);
    }

    fn slice_recovered_availability(&mut self, stripe: usize) {
        if self.k == 1 {
            return;
        }
        if self.status[stripe].available_count() == self.n {
            self.avail_degraded -= 1;
        }
    }

    // =========================================================================
    // Windows and Losses
    // =========================================================================

    fn open_window(&mut self, stripe: usize, time: f64) {
        self.unavailable_count += 1;
        self.windows
            .entry(stripe)
            .or_default()
            .push(UnavailabilityWindow { start: time, end: None });
    }

    fn close_window(&mut self, stripe: usize, time: f64) {
        if let Some(window) = self.windows.get_mut(&stripe).and_then(|w| w.last_mut()) {
            if window.end.is_none() {
                window.end = Some(time);
            }
        }
    }

    /// Opens a window when the stripe just stopped being decodable
    fn track_transition(&mut self, stripe: usize, before: bool, time: f64) -> Result<()> {
        let after = self.is_repairable(stripe)?;
        if before && !after {
            self.open_window(stripe, time);
        } else if !before && after {
            self.close_window(stripe, time);
        }
        Ok(())
    }

    fn mark_lost(&mut self, stripe: usize, time: f64, cause: LossCause) {
        info!(
            stripe,
            time,
            durable = self.status[stripe].durable_count(),
            cause = %cause,
            "Stripe lost"
        );
        self.status[stripe] = StripeState::Lost;
        self.losses.push(StripeLoss { stripe, time, cause });
    }

    /// Lost stripes only have their open window closed
    fn skip_lost(&mut self, stripe: usize, time: f64) -> bool {
        if self.status[stripe].is_lost() {
            self.close_window(stripe, time);
            return true;
        }
        false
    }

    // =========================================================================
    // Repairs
    // =========================================================================

    /// Rebuilds one block, returns MB transferred
    fn single_repair(&mut self, stripe: usize, index: usize) -> Result<f64> {
        let cost = self.scheme.repair(&mut self.status[stripe], index)?;
        if cost < self.scheme.repair_cost() {
            self.counters.optimal_repairs += 1;
        }
        Ok(cost * self.config.chunk_size)
    }

    /// Rebuilds every damaged block, returns MB transferred
    fn batch_repair(&mut self, stripe: usize, only_lost: bool) -> Result<f64> {
        let cost = self
            .scheme
            .parallel_repair(&mut self.status[stripe], only_lost)?;
        Ok(cost * self.config.chunk_size)
    }

    fn forget_latent_hit(&mut self, disk: UnitId, stripe: usize) {
        if let Some(hits) = self.latent_hits.get_mut(&disk) {
            hits.retain(|slot| slot.stripe != stripe);
        }
    }

    /// Current stripe states, indexed by stripe
    pub fn status(&self) -> &[StripeState] {
        &self.status
    }

    pub fn counters(&self) -> &HandlerCounters {
        &self.counters
    }
}
