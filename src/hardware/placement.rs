//! Stripe Placement
//!
//! Assigns each block of every stripe to a disk. Two strategies:
//!
//! - **Spread**: every block on a different rack, random disk within the rack.
//! - **Hierarchical**: blocks packed onto `r` distinct racks, `n / r` per rack
//!   (remainder to the first racks), each on a different machine.
//!
//! Disks that reach their chunk capacity are dropped from the candidate set.
//! Placement gives up after a fixed retry budget.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{Topology, UnitId};
use crate::error::{Error, Result};

/// Attempts per block before placement fails
pub const PLACEMENT_RETRIES: usize = 100;

/// A block hosted on a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub stripe: usize,
    pub block: usize,
}

/// How stripes are spread over racks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum PlacementStrategy {
    /// One block per rack
    Spread,
    /// Blocks grouped onto `distinct_racks` racks
    Hierarchical { distinct_racks: usize },
}

/// Stripe-to-disk mapping, immutable during a run
#[derive(Debug, Clone, Default)]
pub struct Placement {
    /// Disk of each block, indexed by stripe then block
    locations: Vec<Vec<UnitId>>,
    /// Blocks hosted by each disk
    slots: HashMap<UnitId, Vec<Slot>>,
}

impl Placement {
    /// Places `stripe_count` stripes of width `n`
    #[instrument(skip(topology, rng))]
    pub fn distribute<R: Rng + ?Sized>(
        topology: &Topology,
        n: usize,
        stripe_count: usize,
        max_chunks_per_disk: usize,
        strategy: PlacementStrategy,
        rng: &mut R,
    ) -> Result<Self> {
        let mut placement = Placement {
            locations: Vec::with_capacity(stripe_count),
            slots: HashMap::with_capacity(topology.disks().len()),
        };

        match strategy {
            PlacementStrategy::Spread => {
                placement.spread(topology, n, stripe_count, max_chunks_per_disk, rng)?
            }
            PlacementStrategy::Hierarchical { distinct_racks } => placement.hierarchical(
                topology,
                n,
                distinct_racks,
                stripe_count,
                max_chunks_per_disk,
                rng,
            )?,
        }

        info!(
            "Placed {} stripes of {} blocks on {} disks",
            stripe_count,
            n,
            placement.slots.len()
        );
        Ok(placement)
    }

    fn spread<R: Rng + ?Sized>(
        &mut self,
        topology: &Topology,
        n: usize,
        stripe_count: usize,
        max_chunks_per_disk: usize,
        rng: &mut R,
    ) -> Result<()> {
        // non-full disks of every rack
        let mut rack_disks: Vec<Vec<UnitId>> = topology
            .racks()
            .iter()
            .map(|r| topology.disks_under(*r))
            .collect();

        for stripe in 0..stripe_count {
            let mut candidates: Vec<usize> = (0..rack_disks.len())
                .filter(|r| !rack_disks[*r].is_empty())
                .collect();
            let mut location = Vec::with_capacity(n);
            let mut retries = 0;

            while location.len() < n {
                if candidates.is_empty() || retries > PLACEMENT_RETRIES {
                    warn!("Unable to place stripe {} after {} retries", stripe, retries);
                    return Err(Error::CapacityExhausted { stripe, retries });
                }
                retries += 1;

                let pick = rng.gen_range(0..candidates.len());
                let rack = candidates[pick];
                let disks = &mut rack_disks[rack];
                let d = rng.gen_range(0..disks.len());
                let disk = disks[d];

                if self.slots_on(disk) >= max_chunks_per_disk {
                    disks.swap_remove(d);
                    if disks.is_empty() {
                        debug!("Rack {} is full", rack);
                        candidates.swap_remove(pick);
                    }
                    continue;
                }

                candidates.swap_remove(pick);
                self.assign(disk, stripe, location.len());
                location.push(disk);
            }
            self.locations.push(location);
        }
        Ok(())
    }

    fn hierarchical<R: Rng + ?Sized>(
        &mut self,
        topology: &Topology,
        n: usize,
        distinct_racks: usize,
        stripe_count: usize,
        max_chunks_per_disk: usize,
        rng: &mut R,
    ) -> Result<()> {
        if distinct_racks == 0 || n / distinct_racks == 0 {
            return Err(Error::Config(format!(
                "distinct_racks={} is too large for n={}",
                distinct_racks, n
            )));
        }
        let mut per_rack = vec![n / distinct_racks; distinct_racks];
        for c in per_rack.iter_mut().take(n % distinct_racks) {
            *c += 1;
        }

        // machines of every rack that still have a non-full disk
        let mut rack_machines: Vec<Vec<UnitId>> = topology
            .racks()
            .iter()
            .map(|r| topology.children(*r).to_vec())
            .collect();

        for stripe in 0..stripe_count {
            let mut retries = 0;
            let chosen: Vec<usize> = loop {
                let open: Vec<usize> = (0..rack_machines.len())
                    .filter(|r| !rack_machines[*r].is_empty())
                    .collect();
                if open.len() < distinct_racks || retries > PLACEMENT_RETRIES {
                    return Err(Error::CapacityExhausted { stripe, retries });
                }
                let sample: Vec<usize> = open
                    .choose_multiple(rng, distinct_racks)
                    .copied()
                    .collect();
                if sample
                    .iter()
                    .zip(per_rack.iter())
                    .all(|(r, need)| rack_machines[*r].len() >= *need)
                {
                    break sample;
                }
                retries += 1;
            };

            let mut location = Vec::with_capacity(n);
            for (rack, need) in chosen.iter().zip(per_rack.iter()) {
                let machines: Vec<UnitId> = rack_machines[*rack]
                    .choose_multiple(rng, *need)
                    .copied()
                    .collect();
                for machine in machines {
                    let free: Vec<UnitId> = topology
                        .children(machine)
                        .iter()
                        .copied()
                        .filter(|d| self.slots_on(*d) < max_chunks_per_disk)
                        .collect();
                    let disk = *free.choose(rng).ok_or(Error::CapacityExhausted {
                        stripe,
                        retries,
                    })?;
                    self.assign(disk, stripe, location.len());
                    location.push(disk);

                    let machine_full = topology
                        .children(machine)
                        .iter()
                        .all(|d| self.slots_on(*d) >= max_chunks_per_disk);
                    if machine_full {
                        debug!("Machine {} is full", machine);
                        rack_machines[*rack].retain(|m| *m != machine);
                    }
                }
            }
            self.locations.push(location);
        }
        Ok(())
    }

    fn assign(&mut self, disk: UnitId, stripe: usize, block: usize) {
        self.slots
            .entry(disk)
            .or_default()
            .push(Slot { stripe, block });
    }

    fn slots_on(&self, disk: UnitId) -> usize {
        self.slots.get(&disk).map(Vec::len).unwrap_or(0)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Blocks hosted by a disk
    pub fn slots(&self, disk: UnitId) -> &[Slot] {
        self.slots.get(&disk).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Disks holding each block of a stripe
    pub fn location(&self, stripe: usize) -> &[UnitId] {
        self.locations
            .get(stripe)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stripe_count(&self) -> usize {
        self.locations.len()
    }

    /// A uniformly chosen block on the disk, as hit by a sector error
    pub fn random_slot<R: Rng + ?Sized>(&self, disk: UnitId, rng: &mut R) -> Option<Slot> {
        self.slots(disk).choose(rng).copied()
    }

    /// Builds a placement from explicit block locations
    pub fn from_locations(locations: Vec<Vec<UnitId>>) -> Self {
        let mut placement = Placement {
            locations: Vec::with_capacity(locations.len()),
            slots: HashMap::new(),
        };
        for (stripe, disks) in locations.into_iter().enumerate() {
            for (block, disk) in disks.iter().enumerate() {
                placement.assign(*disk, stripe, block);
            }
            placement.locations.push(disks);
        }
        placement
    }
}
