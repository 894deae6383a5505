use std::collections::HashMap;

pub mod influx;
pub mod json;

pub const DECISION_MEASUREMENT: &str = "optimizer_decision";

/// Parameters for encoding one optimizer decision
#[derive(Debug, Clone)]
pub struct DecisionMetricsParams<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub decision: u32,
    pub diff: i64,
    pub streams: u32,
    pub rationale: &'a str,
    pub success_rate: f64,
    pub ema: f64,
    pub throughput: f64,
    pub queue_size: u32,
    pub active_count: u32,
    pub cycle: u64,
    /// Nanoseconds since the epoch
    pub timestamp: i64,
    pub extra_labels: &'a HashMap<String, String>,
}

/// Field value for metrics
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UnsignedInteger(u64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Trait for encoding metrics in different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String;

    /// Encode a decision. Link endpoints become tags, everything else a field.
    fn encode_decision(&self, params: &DecisionMetricsParams) -> String {
        let mut tags = params.extra_labels.clone();
        tags.insert("source".to_string(), params.source.to_string());
        tags.insert("destination".to_string(), params.destination.to_string());

        let mut fields = HashMap::new();
        fields.insert("decision".to_string(), params.decision.into());
        fields.insert("diff".to_string(), params.diff.into());
        fields.insert("streams".to_string(), params.streams.into());
        fields.insert("rationale".to_string(), params.rationale.into());
        fields.insert("success_rate".to_string(), params.success_rate.into());
        fields.insert("ema".to_string(), params.ema.into());
        fields.insert("throughput".to_string(), params.throughput.into());
        fields.insert("queue".to_string(), params.queue_size.into());
        fields.insert("active".to_string(), params.active_count.into());
        fields.insert("cycle".to_string(), params.cycle.into());

        self.encode_metrics(DECISION_MEASUREMENT, &tags, &fields, params.timestamp)
    }
}

/// Concrete encoder without dynamic dispatch
pub enum Encoder {
    Json(json::JsonEncoder),
    Influx(influx::InfluxEncoder),
}

impl MetricsEncoder for Encoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        match self {
            Encoder::Json(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
            Encoder::Influx(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
        }
    }
}

/// Factory function to create encoders based on format string, influx unless "json"
pub fn create_encoder(format: &str) -> Encoder {
    match format.to_lowercase().as_str() {
        "json" => Encoder::Json(json::JsonEncoder),
        _ => Encoder::Influx(influx::InfluxEncoder),
    }
}
