//! Payload construction for pending events.
//!
//! The content of a delivered event is built by a pluggable builder so
//! hosts can customize the wire shape per deployment. The default shape
//! puts the serialized source record under a `"record"` key and names the
//! subscriber's API contract when the subscription carries one.

use relay_core::models::{Record, Subscription};
use serde_json::{json, Value};

/// Builds the JSON content stored on a pending event.
pub trait PayloadBuilder: Send + Sync {
    /// Renders the payload for one (record, subscription) pair.
    fn build(&self, record: &Record, subscription: &Subscription) -> Value;
}

/// Default payload builder: `{"record": {...}}` with optional API shaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordPayloadBuilder;

impl RecordPayloadBuilder {
    /// Creates the default builder.
    pub fn new() -> Self {
        Self
    }
}

impl PayloadBuilder for RecordPayloadBuilder {
    fn build(&self, record: &Record, subscription: &Subscription) -> Value {
        let mut envelope = serde_json::Map::new();
        envelope.insert("record".to_string(), record_body(record));

        if let Some(api_name) = &subscription.api_name {
            let mut api = serde_json::Map::new();
            api.insert("name".to_string(), Value::String(api_name.clone()));
            if let Some(api_version) = &subscription.api_version {
                api.insert("version".to_string(), Value::String(api_version.clone()));
            }
            envelope.insert("api".to_string(), Value::Object(api));
        }

        Value::Object(envelope)
    }
}

/// Serializes a record's fields plus its id into one JSON object.
pub fn record_body(record: &Record) -> Value {
    let mut body = record.fields.clone();
    body.insert("id".to_string(), Value::String(record.id.clone()));
    Value::Object(body)
}

/// Envelope for ad-hoc and test events, which carry descriptive details
/// alongside an optional record body.
pub fn ad_hoc_envelope(details: Value, record: Value) -> Value {
    json!({
        "webhookEventDetails": details,
        "record": record,
    })
}

#[cfg(test)]
mod tests {
    use relay_core::models::EndpointId;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_builder_wraps_record_with_id() {
        let record = Record::new("person", "p-1")
            .with_field("firstName", json!("John"))
            .with_field("lastName", json!("Smith"));
        let subscription = Subscription::new(EndpointId::new(), "person-inserted");

        let payload = RecordPayloadBuilder::new().build(&record, &subscription);

        assert_eq!(payload["record"]["id"], json!("p-1"));
        assert_eq!(payload["record"]["firstName"], json!("John"));
        assert!(payload.get("api").is_none());
    }

    #[test]
    fn api_shaping_is_named_in_the_envelope() {
        let record = Record::new("person", "p-1");
        let mut subscription = Subscription::new(EndpointId::new(), "person-inserted");
        subscription.api_name = Some("partner".to_string());
        subscription.api_version = Some("v2".to_string());

        let payload = RecordPayloadBuilder::new().build(&record, &subscription);

        assert_eq!(payload["api"]["name"], json!("partner"));
        assert_eq!(payload["api"]["version"], json!("v2"));
    }

    #[test]
    fn ad_hoc_envelope_shape() {
        let payload = ad_hoc_envelope(json!({"reason": "probe"}), json!({"id": "x"}));

        assert_eq!(payload["webhookEventDetails"]["reason"], json!("probe"));
        assert_eq!(payload["record"]["id"], json!("x"));
    }
}
