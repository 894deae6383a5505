use std::collections::HashMap;

use influxdb_line_protocol::LineProtocolBuilder;

use super::FieldValue;
use super::MetricsEncoder;
use crate::metrics::BytesWrapper;

/// InfluxDB line protocol encoder
pub struct InfluxEncoder;

/// Appends one field, whatever the builder's current state.
macro_rules! with_field {
    ($builder:expr, $key:expr, $value:expr) => {
        match $value {
            FieldValue::String(s) => $builder.field($key, s.as_str()),
            FieldValue::Integer(i) => $builder.field($key, *i),
            FieldValue::UnsignedInteger(u) => $builder.field($key, *u),
            FieldValue::Float(f) => $builder.field($key, *f),
            FieldValue::Boolean(b) => $builder.field($key, *b),
        }
    };
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);

        // Sorted tags and fields keep lines byte-identical across runs
        let mut tags: Vec<_> = tags.iter().collect();
        tags.sort();
        for (key, value) in tags {
            builder = builder.tag(key, value);
        }

        let mut fields: Vec<_> = fields.iter().collect();
        fields.sort_by_key(|(key, _)| *key);

        let line = match fields.split_first() {
            Some(((first_key, first_value), rest)) => rest.iter().fold(
                with_field!(builder, first_key.as_str(), first_value),
                |line, (key, value)| with_field!(line, key.as_str(), value),
            ),
            // line protocol requires at least one field
            None => builder.field("_empty", true),
        };

        BytesWrapper::from(line.timestamp(timestamp).close_line().build()).to_string()
    }
}
