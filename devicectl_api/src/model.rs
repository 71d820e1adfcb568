use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Trust level governing allowed artifact origins and kernel-command-line overrides.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grade {
    #[default]
    Unset,
    Dangerous,
    Signed,
    Secured,
}

impl Grade {
    /// `grade=unset` implies a pre-modes image with no system seed modes; any other grade
    /// implies a modes-aware image with a run/recover/install/factory-reset operating mode.
    pub fn is_modes_aware(self) -> bool {
        self != Grade::Unset
    }
}

/// The role an artifact plays in a model.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapType {
    Snapd,
    Kernel,
    Gadget,
    Base,
    App,
    Os,
}

impl SnapType {
    pub fn is_essential(self) -> bool {
        matches!(
            self,
            SnapType::Snapd | SnapType::Kernel | SnapType::Base | SnapType::Gadget
        )
    }
}

/// Whether an artifact must be present on a self-contained device.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Presence {
    Required,
    Optional,
}

/// A single entry of the model's `snaps` list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: SnapType,
    pub default_channel: String,
    #[serde(default = "default_presence")]
    pub presence: Presence,
    #[serde(default)]
    pub components: Vec<String>,
}

fn default_presence() -> Presence {
    Presence::Optional
}

impl SnapEntry {
    pub fn is_required(&self) -> bool {
        matches!(self.presence, Presence::Required)
    }
}

/// Enforcement mode of a validation set reference.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationSetMode {
    Enforce,
    Monitor,
}

/// A reference to a validation set from a model's `validation-sets` list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationSetRef {
    pub account_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    pub mode: ValidationSetMode,
}

/// The root policy assertion for a device: series, brand/model identity, architecture,
/// essential/optional artifacts, and the validation sets it enforces.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelAssertion {
    pub series: String,
    pub brand_id: String,
    pub model_name: String,
    pub architecture: String,
    #[serde(default)]
    pub classic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(default)]
    pub grade: Grade,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gadget: Option<String>,
    #[serde(default)]
    pub snaps: Vec<SnapEntry>,
    #[serde(default)]
    pub validation_sets: Vec<ValidationSetRef>,
    #[serde(default)]
    pub serial_authority: Vec<String>,
    pub revision: u32,
}

impl ModelAssertion {
    /// True for a "core" model: no root filesystem artifact is named (core-boot systems
    /// compose their root from the kernel/gadget/base chain directly).
    pub fn is_core(&self) -> bool {
        self.base.is_none()
    }

    pub fn essential_snap(&self, kind: SnapType) -> Option<&SnapEntry> {
        self.snaps.iter().find(|s| s.kind == kind)
    }

    pub fn non_essential_snaps(&self) -> impl Iterator<Item = &SnapEntry> {
        self.snaps.iter().filter(|s| !s.kind.is_essential())
    }

    /// Essential snaps in installation order, skipping any the model omits, as required by
    /// the seed loader's enumeration order.
    pub fn essential_order(&self) -> Vec<&SnapEntry> {
        [SnapType::Snapd, SnapType::Kernel, SnapType::Base, SnapType::Gadget]
            .into_iter()
            .filter_map(|kind| self.essential_snap(kind))
            .collect()
    }
}

impl Display for ModelAssertion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.brand_id, self.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str, kind: SnapType, presence: Presence) -> SnapEntry {
        SnapEntry {
            name: name.to_string(),
            id: None,
            kind,
            default_channel: "stable".into(),
            presence,
            components: Vec::new(),
        }
    }

    #[test]
    fn test_essential_order_skips_missing() {
        let model = ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: "pc-model-20".into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: Grade::Dangerous,
            base: Some("core20".into()),
            kernel: Some("pc-kernel".into()),
            gadget: Some("pc".into()),
            snaps: vec![
                snap("pc-kernel", SnapType::Kernel, Presence::Required),
                snap("pc", SnapType::Gadget, Presence::Required),
            ],
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        };

        let order: Vec<&str> = model
            .essential_order()
            .into_iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(order, vec!["pc-kernel", "pc"]);
    }

    #[test]
    fn test_grade_modes_aware() {
        assert!(!Grade::Unset.is_modes_aware());
        assert!(Grade::Dangerous.is_modes_aware());
        assert!(Grade::Signed.is_modes_aware());
        assert!(Grade::Secured.is_modes_aware());
    }

    #[test]
    fn test_is_core() {
        let mut model = ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: "core20".into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: Grade::Signed,
            base: None,
            kernel: Some("pc-kernel".into()),
            gadget: Some("pc".into()),
            snaps: Vec::new(),
            validation_sets: Vec::new(),
            serial_authority: Vec::new(),
            revision: 1,
        };
        assert!(model.is_core());
        model.base = Some("core20".into());
        assert!(!model.is_core());
    }
}
