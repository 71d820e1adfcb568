use serde::{Deserialize, Serialize};

/// Mutable record persisted in the state store. Created empty at first boot; `key_id` is
/// set after key generation; `serial` is set after successful registration;
/// `session_credential` is cleared on store switch.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DeviceStateRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_credential: Option<String>,
}

impl DeviceStateRecord {
    pub fn is_registered(&self) -> bool {
        self.serial.is_some()
    }

    pub fn has_model(&self) -> bool {
        self.brand.is_some() && self.model.is_some()
    }

    /// Clears the session credential, as happens on an artifact-store switch.
    pub fn clear_session(&mut self) {
        self.session_credential = None;
    }
}

/// Classification of a proposed model transition.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemodelClass {
    UpdateRemodel,
    StoreSwitchRemodel,
    ReregRemodel,
}

/// The kind of change currently in flight, used for exclusivity checks.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Remodel,
    CreateRecoverySystem,
    RemoveRecoverySystem,
}

impl ChangeKind {
    /// `remodel`, `create-recovery-system`, and `remove-recovery-system` are each marked
    /// exclusive against any other in-flight change of these kinds.
    pub fn is_exclusive(self) -> bool {
        true
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &str = match self {
            ChangeKind::Remodel => "remodel",
            ChangeKind::CreateRecoverySystem => "create-recovery-system",
            ChangeKind::RemoveRecoverySystem => "remove-recovery-system",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_and_has_model() {
        let mut record = DeviceStateRecord::default();
        assert!(!record.is_registered());
        assert!(!record.has_model());

        record.brand = Some("canonical".into());
        record.model = Some("pc-model-20".into());
        assert!(record.has_model());

        record.serial = Some("abc123".into());
        assert!(record.is_registered());
    }

    #[test]
    fn test_clear_session() {
        let mut record = DeviceStateRecord {
            session_credential: Some("tok".into()),
            ..Default::default()
        };
        record.clear_session();
        assert!(record.session_credential.is_none());
    }
}
