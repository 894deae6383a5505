use std::collections::HashMap;

use serde_json::json;
use serde_json::{Map, Number, Value};

use super::FieldValue;
use super::MetricsEncoder;

/// JSON encoder for metrics, one object per line
pub struct JsonEncoder;

fn to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Integer(i) => Value::Number(Number::from(*i)),
        FieldValue::UnsignedInteger(u) => Value::Number(Number::from(*u)),
        // NaN and infinities have no JSON representation
        FieldValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        FieldValue::Boolean(b) => Value::Bool(*b),
    }
}

impl MetricsEncoder for JsonEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &HashMap<String, FieldValue>,
        timestamp: i64,
    ) -> String {
        let fields: Map<String, Value> = fields
            .iter()
            .map(|(key, value)| (key.clone(), to_json(value)))
            .collect();

        let metrics = json!({
            "measure": measurement,
            "ts": timestamp,
            "tag": tags,
            "field": fields,
        });
        metrics.to_string() + "\n"
    }
}
