use serde::{Deserialize, Serialize};

/// Signed document binding `(brand-id, model-name, serial)` to a device public key;
/// optionally countersigned by a delegated authority listed in the model's
/// `serial-authority` field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerialAssertion {
    pub brand_id: String,
    pub model_name: String,
    pub serial: String,
    pub device_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_authority: Option<String>,
}

impl SerialAssertion {
    /// The authority that actually signed this assertion: the delegated authority if one
    /// is recorded, otherwise the assertion's own brand.
    pub fn effective_authority(&self) -> &str {
        self.signing_authority.as_deref().unwrap_or(&self.brand_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_authority_defaults_to_brand() {
        let serial = SerialAssertion {
            brand_id: "canonical".into(),
            model_name: "pc".into(),
            serial: "abc123".into(),
            device_key_id: "key1".into(),
            signing_authority: None,
        };
        assert_eq!(serial.effective_authority(), "canonical");
    }

    #[test]
    fn test_effective_authority_delegated() {
        let serial = SerialAssertion {
            brand_id: "canonical".into(),
            model_name: "pc".into(),
            serial: "abc123".into(),
            device_key_id: "key1".into(),
            signing_authority: Some("generic".into()),
        };
        assert_eq!(serial.effective_authority(), "generic");
    }
}
