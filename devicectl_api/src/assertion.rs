use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ModelAssertion;
use crate::serial::SerialAssertion;

/// A locally-verifiable envelope standing in for a real assertion database record: a
/// header map (the assertion's typed fields, serialized generically), an optional body,
/// and the signature bytes over both. Signature verification itself belongs to the
/// external assertion database; this type only carries the data that database would hold.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AssertionEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub headers: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub signature: Vec<u8>,
}

impl AssertionEnvelope {
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(Value::as_str)
    }

    pub fn for_model(model: &ModelAssertion, signature: Vec<u8>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("brand-id".into(), Value::String(model.brand_id.clone()));
        headers.insert("model".into(), Value::String(model.model_name.clone()));
        headers.insert("series".into(), Value::String(model.series.clone()));
        headers.insert("revision".into(), Value::from(model.revision));
        AssertionEnvelope {
            kind: "model".into(),
            headers,
            body: serde_json::to_string(model).ok(),
            signature,
        }
    }

    pub fn for_serial(serial: &SerialAssertion, signature: Vec<u8>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("brand-id".into(), Value::String(serial.brand_id.clone()));
        headers.insert("model".into(), Value::String(serial.model_name.clone()));
        headers.insert("serial".into(), Value::String(serial.serial.clone()));
        headers.insert(
            "device-key-sha3-384".into(),
            Value::String(serial.device_key_id.clone()),
        );
        AssertionEnvelope {
            kind: "serial".into(),
            headers,
            body: serde_json::to_string(serial).ok(),
            signature,
        }
    }

    pub fn revision(&self) -> Option<u32> {
        self.headers.get("revision").and_then(Value::as_u64).map(|v| v as u32)
    }
}

/// Stands in for "the assertion database" (an external collaborator per the system's
/// scope): an append-only store of envelopes, queryable by kind and header.
pub trait AssertionStore {
    fn add(&mut self, envelope: AssertionEnvelope) -> Result<(), anyhow::Error>;
    fn find(&self, kind: &str, headers: &[(&str, &str)]) -> Option<AssertionEnvelope>;
    fn find_all(&self, kind: &str) -> Vec<AssertionEnvelope>;
}

/// An in-memory `AssertionStore`, used for tests and as the save-partition assertion
/// database of the registration machine's finalisation step.
#[derive(Default)]
pub struct MemoryAssertionStore {
    envelopes: Vec<AssertionEnvelope>,
}

impl MemoryAssertionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssertionStore for MemoryAssertionStore {
    fn add(&mut self, envelope: AssertionEnvelope) -> Result<(), anyhow::Error> {
        self.envelopes.push(envelope);
        Ok(())
    }

    fn find(&self, kind: &str, headers: &[(&str, &str)]) -> Option<AssertionEnvelope> {
        self.envelopes
            .iter()
            .find(|e| {
                e.kind == kind
                    && headers
                        .iter()
                        .all(|(k, v)| e.header_str(k) == Some(*v))
            })
            .cloned()
    }

    fn find_all(&self, kind: &str) -> Vec<AssertionEnvelope> {
        self.envelopes
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> ModelAssertion {
        ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: "pc-model-20".into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: crate::model::Grade::Dangerous,
            base: Some("core20".into()),
            kernel: Some("pc-kernel".into()),
            gadget: Some("pc".into()),
            snaps: Vec::new(),
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        }
    }

    #[test]
    fn test_memory_store_add_and_find() {
        let mut store = MemoryAssertionStore::new();
        let envelope = AssertionEnvelope::for_model(&sample_model(), vec![1, 2, 3]);
        store.add(envelope.clone()).unwrap();

        let found = store
            .find("model", &[("brand-id", "canonical"), ("model", "pc-model-20")])
            .unwrap();
        assert_eq!(found, envelope);
        assert_eq!(found.revision(), Some(1));
    }

    #[test]
    fn test_memory_store_find_missing() {
        let store = MemoryAssertionStore::new();
        assert!(store.find("model", &[("brand-id", "canonical")]).is_none());
    }

    #[test]
    fn test_find_all_filters_by_kind() {
        let mut store = MemoryAssertionStore::new();
        store
            .add(AssertionEnvelope::for_model(&sample_model(), vec![1]))
            .unwrap();
        store
            .add(AssertionEnvelope::for_serial(
                &SerialAssertion {
                    brand_id: "canonical".into(),
                    model_name: "pc-model-20".into(),
                    serial: "s1".into(),
                    device_key_id: "k1".into(),
                    signing_authority: None,
                },
                vec![2],
            ))
            .unwrap();

        assert_eq!(store.find_all("model").len(), 1);
        assert_eq!(store.find_all("serial").len(), 1);
    }
}
