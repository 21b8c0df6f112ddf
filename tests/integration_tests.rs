//! Simulation Integration Tests
//!
//! End-to-end runs through the public API:
//! - Event mode: losses, transient outages, rolling upgrades
//! - Duration mode: overlapping outages
//! - Batches of concurrent iterations

use durasim::report::LossCause;
use durasim::{RunMode, RunReport, Simulation, SimulationConfig};

/// One RS(3,2) stripe, one disk per machine, one machine per rack
const TRIO: &str = r#"
total_time: 1000
redundancy: RS_3_2
rack_count: 3
machines_per_rack: 1
disks_per_machine: 1
total_slices: 1
disk_repair_time: 1.0
node_repair_time: 1.0
queue_disable: true
"#;

fn config(extra: &str) -> SimulationConfig {
    SimulationConfig::from_yaml_str(&format!("{}{}", TRIO, extra)).unwrap()
}

// =============================================================================
// Event Mode
// =============================================================================

mod event_tests {
    use super::*;

    #[test]
    fn test_simultaneous_disk_failures_lose_stripe() {
        let cfg = config(
            "disk:\n  failure: { kind: constant, freq: 100 }\n  recovery: { kind: constant, freq: 4 }\n",
        );
        let report = Simulation::new(cfg, 1).unwrap().run_events().unwrap();

        assert_eq!(report.undurable_count, 1);
        assert_eq!(report.losses[0].time, 100.0);
        assert!(matches!(report.losses[0].cause, LossCause::Disk(_)));
        assert_eq!(report.loss_details.by_disk, 1);
        assert_eq!(report.loss_details.disk_loss_events, 1);
        assert_eq!(report.pdl, 1.0);
        assert!(report.nomdl > 0.0);
    }

    #[test]
    fn test_short_transient_outages_never_lose_data() {
        let cfg = config(
            "machine:\n  failure: { kind: constant, freq: 100 }\n  recovery: { kind: constant, freq: 0.1 }\n  fail_fraction: 0.0\n",
        );
        let report = Simulation::new(cfg, 2).unwrap().run_events().unwrap();

        assert_eq!(report.undurable_count, 0);
        assert!(report.counters.short_temp_machine_failures >= 3);
        assert_eq!(report.counters.permanent_machine_failures, 0);
        assert!(report.unavailable_count > 0);

        let windows = &report.windows[&0];
        assert!(!windows.is_empty());
        for window in windows.iter().filter_map(|w| w.end.map(|end| end - w.start)) {
            assert!(window <= 0.1 + 1e-9);
        }
        assert!(report.pua > 0.0 && report.pua < 0.01);
    }

    #[test]
    fn test_rolling_upgrade_keeps_stripes_available() {
        let cfg = config("upgrades:\n  soft: { freq: 200, downtime: 0.5, check_style: 1 }\n");
        let report = Simulation::new(cfg, 3).unwrap().run_events().unwrap();

        // one machine down at a time never drops below k readable blocks
        assert!(report.counters.short_temp_machine_failures >= 12);
        assert!(report.counters.machine_repairs >= 12);
        assert_eq!(report.unavailable_count, 0);
        assert_eq!(report.undurable_count, 0);
        assert_eq!(report.counters.anomalous_available, 0);
    }

    #[test]
    fn test_seed_reproducibility() {
        let extra = "disk:\n  failure: { kind: weibull, lambda: 300, beta: 1 }\n  recovery: { kind: uniform, freq: 2 }\n";
        let a = Simulation::new(config(extra), 42).unwrap().run_events().unwrap();
        let b = Simulation::new(config(extra), 42).unwrap().run_events().unwrap();
        assert_eq!(a, b);
        assert!(a.counters.disk_failures > 0);
    }
}

// =============================================================================
// Duration Mode
// =============================================================================

mod duration_tests {
    use super::*;

    #[test]
    fn test_concurrent_machine_outages_are_unavailable() {
        let cfg = config(
            "machine:\n  failure: { kind: constant, freq: 100 }\n  recovery: { kind: constant, freq: 0.1 }\n  fail_fraction: 0.0\n",
        );
        let report = Simulation::new(cfg, 4).unwrap().run_durations().unwrap();

        assert!(report.durations >= 3);
        assert!(report.concurrent_count > 0);
        assert_eq!(report.lost_concurrent_count, 0);
        assert_eq!(report.lost_count, 0);
        assert!(report.unavailable_count > 0);
        assert!(report.pua > 0.0);
    }

    #[test]
    fn test_concurrent_disk_failures_are_lost() {
        let cfg = config(
            "disk:\n  failure: { kind: constant, freq: 100 }\n  recovery: { kind: constant, freq: 4 }\n",
        );
        let report = Simulation::new(cfg, 5).unwrap().run_durations().unwrap();

        assert!(report.lost_concurrent_count > 0);
        assert!(report.lost_count > 0);
        assert!(report.pdl > 0.0);
        assert_eq!(report.pdl, report.pdlt);
    }
}

// =============================================================================
// Batches
// =============================================================================

mod batch_tests {
    use super::*;
    use tokio::task::JoinSet;

    fn weibull_disks() -> SimulationConfig {
        config("disk:\n  failure: { kind: weibull, lambda: 400, beta: 1 }\n  recovery: { kind: constant, freq: 1 }\n")
    }

    #[tokio::test]
    async fn test_concurrent_iterations_match_sequential() {
        let cfg = weibull_disks();

        let mut set = JoinSet::new();
        for seed in 0..4u64 {
            let cfg = cfg.clone();
            set.spawn_blocking(move || {
                let report = Simulation::new(cfg, seed).unwrap().run(RunMode::Events).unwrap();
                (seed, report)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (seed, concurrent) = joined.unwrap();
            let sequential = Simulation::new(cfg.clone(), seed)
                .unwrap()
                .run(RunMode::Events)
                .unwrap();
            assert_eq!(concurrent, sequential);
        }
    }

    #[test]
    fn test_block_on_duration_batch() {
        let cfg = weibull_disks();
        let reports = tokio_test::block_on(async move {
            let mut handles = Vec::new();
            for seed in 0..3u64 {
                let cfg = cfg.clone();
                handles.push(tokio::task::spawn_blocking(move || {
                    Simulation::new(cfg, seed).unwrap().run(RunMode::Durations)
                }));
            }
            let mut reports = Vec::new();
            for handle in handles {
                reports.push(handle.await.unwrap().unwrap());
            }
            reports
        });

        assert_eq!(reports.len(), 3);
        assert!(reports
            .iter()
            .all(|r| matches!(r, RunReport::Durations(d) if d.pdl >= 0.0)));
    }
}
