//! Simulation Runs
//!
//! A [`Simulation`] is one Monte Carlo iteration: a validated configuration,
//! the topology built from it and a stripe placement drawn from the run seed.
//! It can be played either as a stateful event simulation or as an interval
//! overlap analysis. Both modes are deterministic for a given seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument};

use crate::config::SimulationConfig;
use crate::duration::{DurationQueue, OverlapAnalyzer};
use crate::error::Result;
use crate::event::EventQueue;
use crate::handler::EventHandler;
use crate::hardware::{Placement, Topology};
use crate::report::{DurationRunReport, EventRunReport, RunMode, RunReport};
use crate::timeline::Timeline;

pub struct Simulation {
    config: SimulationConfig,
    topology: Topology,
    placement: Placement,
    seed: u64,
    timeline_seed: u64,
    handler_seed: u64,
    analyzer_seed: u64,
}

impl Simulation {
    /// Validates the configuration and places every stripe
    #[instrument(skip(config), fields(scheme = %config.redundancy))]
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self> {
        config.validate()?;

        let topology = Topology::build(
            config.rack_count,
            config.machines_per_rack,
            config.disks_per_machine,
        );
        let mut master = StdRng::seed_from_u64(seed);
        let placement = Placement::distribute(
            &topology,
            config.redundancy.n(),
            config.max_total_slices() as usize,
            config.max_chunks_per_disk(),
            config.placement_strategy(),
            &mut master,
        )?;
        debug!(
            disks = topology.disks().len(),
            stripes = placement.stripe_count(),
            "Placed stripes"
        );

        Ok(Self {
            timeline_seed: master.gen(),
            handler_seed: master.gen(),
            analyzer_seed: master.gen(),
            config,
            topology,
            placement,
            seed,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn run(&self, mode: RunMode) -> Result<RunReport> {
        match mode {
            RunMode::Events => self.run_events().map(RunReport::Events),
            RunMode::Durations => self.run_durations().map(RunReport::Durations),
        }
    }

    /// Plays the failure timeline through the stripe state machine
    #[instrument(skip(self), fields(seed = self.seed))]
    pub fn run_events(&self) -> Result<EventRunReport> {
        let total_time = self.config.total_time;
        let mut timeline = Timeline::new(
            &self.config,
            &self.topology,
            StdRng::seed_from_u64(self.timeline_seed),
        )?;

        let mut queue = EventQueue::new();
        timeline.generate(&mut queue, 0.0, total_time)?;
        timeline.schedule_upgrades(&mut queue)?;
        info!(events = queue.len(), "Generated event timeline");

        let mut handler = EventHandler::new(
            &self.config,
            &self.topology,
            &self.placement,
            StdRng::seed_from_u64(self.handler_seed),
        );
        while let Some(event) = queue.pop() {
            if event.time > total_time {
                break;
            }
            handler.handle(event, &mut queue, &mut timeline)?;
        }

        Ok(handler.end())
    }

    /// Looks for overlapping outages without tracking stripe state
    #[instrument(skip(self), fields(seed = self.seed))]
    pub fn run_durations(&self) -> Result<DurationRunReport> {
        let config = &self.config;
        let analyzer = OverlapAnalyzer::new(
            config.redundancy,
            &self.topology,
            &self.placement,
            config.disk_usage(),
        )?;
        let mut timeline = Timeline::new(
            config,
            &self.topology,
            StdRng::seed_from_u64(self.timeline_seed),
        )?;

        let mut durations = DurationQueue::new();
        timeline.generate(&mut durations, 0.0, config.total_time)?;
        let concurrency = analyzer.find_concurrent(&durations);

        let mut rng = StdRng::seed_from_u64(self.analyzer_seed);
        let lost = analyzer.process(&concurrency.lost, &mut rng)?;
        let unavailable = analyzer.process(&concurrency.all, &mut rng)?;

        let total_slices = config.total_slices() as f64;
        let final_slices = config.current_total_slices(config.total_time) as f64;
        let report = DurationRunReport {
            durations: durations.len(),
            concurrent_count: concurrency.concurrent_count,
            lost_concurrent_count: concurrency.lost_concurrent_count,
            lost_count: lost.failed_stripes,
            pdl: lost.failed_stripes as f64 / total_slices,
            pdlt: lost.failed_stripes as f64 / final_slices,
            unavailable_count: unavailable.failed_stripes,
            pua: unavailable.failed_period / config.total_time,
            puaw: unavailable.weighted_period / (config.total_time * total_slices),
        };
        info!(
            lost = report.lost_count,
            unavailable = report.unavailable_count,
            pdl = report.pdl,
            pua = report.pua,
            "Duration analysis finished"
        );
        Ok(report)
    }
}
