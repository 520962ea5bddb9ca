//! Prometheus metrics for the block producer.
//!
//! All metrics use the "veld_" prefix. The registry is per-instance so
//! tests can build as many producers as they like without name clashes.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder, Encoder};

pub struct MinerMetrics {
    registry: Registry,

    pub blocks_produced:  IntCounter,
    pub blocks_abandoned: IntCounter,
    pub blocks_rejected:  IntCounter,
    pub txs_per_block:    Histogram,
    pub fuel_per_block:   Histogram,
    pub fuel_rate:        IntGauge,
    pub mempool_size:     IntGauge,
}

impl MinerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        macro_rules! int_counter {
            ($name:expr, $help:expr) => {{
                let c = IntCounter::with_opts(Opts::new($name, $help))?;
                registry.register(Box::new(c.clone()))?;
                c
            }};
        }
        macro_rules! int_gauge {
            ($name:expr, $help:expr) => {{
                let g = IntGauge::with_opts(Opts::new($name, $help))?;
                registry.register(Box::new(g.clone()))?;
                g
            }};
        }
        macro_rules! histogram {
            ($name:expr, $help:expr, $buckets:expr) => {{
                let h = Histogram::with_opts(HistogramOpts::new($name, $help).buckets($buckets))?;
                registry.register(Box::new(h.clone()))?;
                h
            }};
        }

        Ok(Self {
            blocks_produced:  int_counter!("veld_blocks_produced_total", "Blocks produced and accepted"),
            blocks_abandoned: int_counter!("veld_blocks_abandoned_total", "Assembly cycles abandoned (stale tip, churn, timeout)"),
            blocks_rejected:  int_counter!("veld_blocks_rejected_total", "Own blocks rejected by the acceptance path"),
            txs_per_block:    histogram!("veld_txs_per_block", "User transactions per produced block",
                vec![0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
            fuel_per_block:   histogram!("veld_fuel_per_block", "Fuel charged per produced block",
                vec![0.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
            fuel_rate:        int_gauge!("veld_fuel_rate", "Fuel rate used for the block being assembled"),
            mempool_size:     int_gauge!("veld_mempool_size", "Mempool transaction count at snapshot time"),
            registry,
        })
    }

    /// Render this registry in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut out = Vec::new();
        encoder.encode(&metric_families, &mut out).unwrap_or_default();
        String::from_utf8(out).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_renders() {
        let m = MinerMetrics::new().unwrap();
        m.blocks_produced.inc();
        m.fuel_rate.set(110);
        let text = m.render();
        assert!(text.contains("veld_blocks_produced_total 1"));
        assert!(text.contains("veld_fuel_rate 110"));
    }

    #[test]
    fn independent_instances_coexist() {
        let a = MinerMetrics::new().unwrap();
        let b = MinerMetrics::new().unwrap();
        a.blocks_produced.inc();
        assert!(b.render().contains("veld_blocks_produced_total 0"));
    }
}
