//! Metrics export
//!
//! Flattens directory counters into name/value pairs for monitoring systems
//! (Prometheus text format or a JSON object).

use indexmap::IndexMap;
use parking_lot::Mutex;

/// DirMetrics - metrics exporter preserving insertion order
pub struct DirMetrics {
    metrics: Mutex<IndexMap<String, MetricValue>>,
}

impl DirMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(IndexMap::new()),
        }
    }

    pub fn add(&self, name: String, value: MetricValue) {
        self.metrics.lock().insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export to Prometheus format
    pub fn to_prometheus(&self) -> String {
        let metrics = self.metrics.lock();
        let mut output = String::new();

        for (name, value) in metrics.iter() {
            output.push_str(&format!("{} {}\n", name, value.as_f64()));
        }

        output
    }

    /// Export to JSON
    pub fn to_json(&self) -> serde_json::Value {
        let metrics = self.metrics.lock();
        let map: serde_json::Map<String, serde_json::Value> = metrics
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!(value.as_f64())))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Default for DirMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(u64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
            MetricValue::Histogram(v) => *v as f64,
        }
    }
}
