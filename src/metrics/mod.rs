//! Prometheus Export
//!
//! Accumulates finished runs into a private [`Registry`] and renders it in the
//! text exposition format. The process-wide default registry is never used,
//! so several batches can be exported side by side.

use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};
use crate::report::{RunRecord, RunReport};

const NAMESPACE: &str = "durasim";

/// Metrics of a batch of simulation runs
pub struct RunMetrics {
    registry: Registry,
    runs: IntCounterVec,
    lost_stripes: IntCounterVec,
    unavailable_stripes: IntCounterVec,
    handler_events: IntCounterVec,
    repairs: IntCounterVec,
    repair_transfer_mb: GaugeVec,
    last_pdl: GaugeVec,
    last_pua: GaugeVec,
    pdl: Histogram,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let runs = IntCounterVec::new(Opts::new("runs_total", "Finished runs"), &["mode"])?;
        let lost_stripes = IntCounterVec::new(
            Opts::new("lost_stripes_total", "Stripes that became undurable"),
            &["mode"],
        )?;
        let unavailable_stripes = IntCounterVec::new(
            Opts::new("unavailable_stripes_total", "Stripes that became unavailable"),
            &["mode"],
        )?;
        let handler_events = IntCounterVec::new(
            Opts::new("handler_events_total", "Event handler counters by name"),
            &["counter"],
        )?;
        let repairs = IntCounterVec::new(
            Opts::new("repairs_total", "Stripe repairs by kind"),
            &["kind"],
        )?;
        let repair_transfer_mb = GaugeVec::new(
            Opts::new("repair_transfer_megabytes", "Data moved by repairs across all runs"),
            &["mode"],
        )?;
        let last_pdl = GaugeVec::new(
            Opts::new("last_pdl", "Probability of data loss of the latest run"),
            &["mode"],
        )?;
        let last_pua = GaugeVec::new(
            Opts::new("last_pua", "Probability of unavailability of the latest run"),
            &["mode"],
        )?;
        let pdl = Histogram::with_opts(
            HistogramOpts::new("pdl", "Probability of data loss per run")
                .buckets(prometheus::exponential_buckets(1e-9, 10.0, 10)?),
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(lost_stripes.clone()))?;
        registry.register(Box::new(unavailable_stripes.clone()))?;
        registry.register(Box::new(handler_events.clone()))?;
        registry.register(Box::new(repairs.clone()))?;
        registry.register(Box::new(repair_transfer_mb.clone()))?;
        registry.register(Box::new(last_pdl.clone()))?;
        registry.register(Box::new(last_pua.clone()))?;
        registry.register(Box::new(pdl.clone()))?;

        Ok(Self {
            registry,
            runs,
            lost_stripes,
            unavailable_stripes,
            handler_events,
            repairs,
            repair_transfer_mb,
            last_pdl,
            last_pua,
            pdl,
        })
    }

    /// Adds one finished run
    pub fn observe(&self, record: &RunRecord) {
        let mode = record.mode.to_string();
        let labels = [mode.as_str()];
        self.runs.with_label_values(&labels).inc();

        match &record.report {
            RunReport::Events(report) => {
                self.lost_stripes
                    .with_label_values(&labels)
                    .inc_by(report.undurable_count);
                self.unavailable_stripes
                    .with_label_values(&labels)
                    .inc_by(report.unavailable_count);
                self.last_pdl.with_label_values(&labels).set(report.pdl);
                self.last_pua.with_label_values(&labels).set(report.pua);
                self.pdl.observe(report.pdl);

                let c = &report.counters;
                self.repair_transfer_mb
                    .with_label_values(&labels)
                    .add(c.repair_transfer_mb);
                for (name, value) in [
                    ("disk_failures", c.disk_failures),
                    ("machine_failures", c.machine_failures),
                    ("permanent_machine_failures", c.permanent_machine_failures),
                    ("short_temp_machine_failures", c.short_temp_machine_failures),
                    ("long_temp_machine_failures", c.long_temp_machine_failures),
                    ("machine_failures_due_to_rack", c.machine_failures_due_to_rack),
                    ("latent_failures", c.latent_failures),
                    ("skipped_latent", c.skipped_latent),
                    ("scrubs", c.scrubs),
                    ("anomalous_available", c.anomalous_available),
                    ("empty_installments", c.empty_installments),
                    ("events_handled", c.events_handled),
                ] {
                    self.handler_events.with_label_values(&[name]).inc_by(value);
                }
                for (kind, value) in [
                    ("disk", c.disk_repairs),
                    ("machine", c.machine_repairs),
                    ("scrub", c.scrub_repairs),
                    ("eager_slice", c.eager_slice_repairs),
                    ("optimal", c.optimal_repairs),
                    ("all", c.repairs),
                ] {
                    self.repairs.with_label_values(&[kind]).inc_by(value);
                }
            }
            RunReport::Durations(report) => {
                self.lost_stripes
                    .with_label_values(&labels)
                    .inc_by(report.lost_count);
                self.unavailable_stripes
                    .with_label_values(&labels)
                    .inc_by(report.unavailable_count);
                self.last_pdl.with_label_values(&labels).set(report.pdl);
                self.last_pua.with_label_values(&labels).set(report.pua);
                self.pdl.observe(report.pdl);
            }
        }
    }

    /// Renders the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("metrics output is not UTF-8: {}", e)))
    }
}
