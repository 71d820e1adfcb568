use std::collections::HashMap;
use std::sync::Mutex;

use devicectl_api::{
    device::{DeviceStateRecord, RemodelClass},
    error::{DeviceError, NotFoundError, ReportError},
    model::ModelAssertion,
    modeenv::RunMode,
};

/// Read-only view over the device's current identity, as handed to peer managers. The
/// only behaviour that varies across the three kinds is `store()` and `for_remodeling()`;
/// everything else is a pure projection over the owned model assertion and captured
/// system mode.
#[derive(Clone, Debug)]
pub enum DeviceContext {
    /// No model is known yet: pre-seeding.
    Ground(GroundContext),
    Model(ModelContext),
    Remodel(RemodelContext),
}

#[derive(Clone, Debug, Default)]
pub struct GroundContext {
    pub system_mode: Option<RunMode>,
}

#[derive(Clone, Debug)]
pub struct ModelContext {
    pub model: ModelAssertion,
    pub system_mode: Option<RunMode>,
    pub store: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RemodelContext {
    pub old_model: ModelAssertion,
    pub new_model: ModelAssertion,
    pub class: RemodelClass,
    pub system_mode: Option<RunMode>,
    /// The artifact-store session opened for a store-switch remodel. Recorded here rather
    /// than on the global device record so a failure before `set-model` discards it
    /// cleanly instead of leaving a half-committed store switch.
    pub pending_store_session: Option<String>,
}

impl DeviceContext {
    pub fn model(&self) -> Option<&ModelAssertion> {
        match self {
            DeviceContext::Ground(_) => None,
            DeviceContext::Model(c) => Some(&c.model),
            DeviceContext::Remodel(c) => Some(&c.new_model),
        }
    }

    /// The model as it stood before any in-flight remodel; for ground/model contexts
    /// this is the same as `model()`.
    pub fn ground_context(&self) -> Option<&ModelAssertion> {
        match self {
            DeviceContext::Ground(_) => None,
            DeviceContext::Model(c) => Some(&c.model),
            DeviceContext::Remodel(c) => Some(&c.old_model),
        }
    }

    pub fn store(&self) -> Option<&str> {
        match self {
            DeviceContext::Ground(_) => None,
            DeviceContext::Model(c) => c.store.as_deref(),
            DeviceContext::Remodel(c) => c.pending_store_session.as_deref(),
        }
    }

    pub fn for_remodeling(&self) -> bool {
        matches!(self, DeviceContext::Remodel(_))
    }

    pub fn system_mode(&self) -> Option<RunMode> {
        match self {
            DeviceContext::Ground(c) => c.system_mode,
            DeviceContext::Model(c) => c.system_mode,
            DeviceContext::Remodel(c) => c.system_mode,
        }
    }

    pub fn classic(&self) -> bool {
        self.model().map(|m| m.classic).unwrap_or(false)
    }

    pub fn kernel(&self) -> Option<&str> {
        self.model().and_then(|m| m.kernel.as_deref())
    }

    pub fn base(&self) -> Option<&str> {
        self.model().and_then(|m| m.base.as_deref())
    }

    pub fn gadget(&self) -> Option<&str> {
        self.model().and_then(|m| m.gadget.as_deref())
    }

    pub fn run_mode(&self) -> Option<RunMode> {
        self.system_mode()
    }

    pub fn has_modeenv(&self) -> bool {
        self.model().map(|m| m.grade.is_modes_aware()).unwrap_or(false)
    }

    pub fn is_core_boot(&self) -> bool {
        self.model().map(|m| !m.classic).unwrap_or(false)
    }

    pub fn is_classic_boot(&self) -> bool {
        self.classic()
    }
}

/// Identifies a change for the purposes of caching its shadow remodel context.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChangeId(pub u64);

/// Remodel-context instances are cached per change id with lifetime tied to the change;
/// a cleanup task at change completion evicts them, per the device-context polymorphism
/// design note.
#[derive(Default)]
pub struct RemodelContextRegistry {
    contexts: Mutex<HashMap<ChangeId, RemodelContext>>,
}

impl RemodelContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, change: ChangeId, context: RemodelContext) {
        self.contexts.lock().unwrap().insert(change, context);
    }

    pub fn get(&self, change: ChangeId) -> Option<RemodelContext> {
        self.contexts.lock().unwrap().get(&change).cloned()
    }

    /// Evicts the cached context for a completed change. A no-op if none was cached,
    /// since not every change is a remodel.
    pub fn evict(&self, change: ChangeId) {
        self.contexts.lock().unwrap().remove(&change);
    }
}

/// Returns `provided` if set; otherwise, if `change` carries a cached remodel context,
/// returns that; otherwise constructs a model context from the current device record and
/// model assertion. Fails with `NotFoundError::NoModel` when no model is yet known.
pub fn device_context(
    state: &DeviceStateRecord,
    model: Option<&ModelAssertion>,
    registry: &RemodelContextRegistry,
    change: Option<ChangeId>,
    provided: Option<DeviceContext>,
) -> Result<DeviceContext, DeviceError> {
    if let Some(context) = provided {
        return Ok(context);
    }

    if let Some(change) = change {
        if let Some(remodel) = registry.get(change) {
            return Ok(DeviceContext::Remodel(remodel));
        }
    }

    if !state.has_model() {
        return None.structured(NotFoundError::NoModel);
    }

    let model = model
        .cloned()
        .structured(NotFoundError::NoModel)?;

    Ok(DeviceContext::Model(ModelContext {
        model,
        system_mode: None,
        store: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicectl_api::model::Grade;

    fn sample_model(name: &str) -> ModelAssertion {
        ModelAssertion {
            series: "16".into(),
            brand_id: "canonical".into(),
            model_name: name.into(),
            architecture: "amd64".into(),
            classic: false,
            distribution: None,
            grade: Grade::Dangerous,
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
    fn test_device_context_fails_without_model() {
        let state = DeviceStateRecord::default();
        let registry = RemodelContextRegistry::new();
        let err = device_context(&state, None, &registry, None, None).unwrap_err();
        assert!(matches!(
            err.kind(),
            devicectl_api::error::ErrorKind::NotFound(NotFoundError::NoModel)
        ));
    }

    #[test]
    fn test_device_context_builds_model_context() {
        let mut state = DeviceStateRecord::default();
        state.brand = Some("canonical".into());
        state.model = Some("pc-model-20".into());
        let model = sample_model("pc-model-20");
        let registry = RemodelContextRegistry::new();

        let context = device_context(&state, Some(&model), &registry, None, None).unwrap();
        assert!(!context.for_remodeling());
        assert_eq!(context.model().unwrap().model_name, "pc-model-20");
        assert_eq!(context.gadget(), Some("pc"));
    }

    #[test]
    fn test_device_context_prefers_cached_remodel_context() {
        let mut state = DeviceStateRecord::default();
        state.brand = Some("canonical".into());
        state.model = Some("pc-model-20".into());
        let model = sample_model("pc-model-20");

        let registry = RemodelContextRegistry::new();
        let change = ChangeId(1);
        registry.insert(
            change,
            RemodelContext {
                old_model: sample_model("pc-model-20"),
                new_model: sample_model("pc-model-21"),
                class: RemodelClass::UpdateRemodel,
                system_mode: None,
                pending_store_session: None,
            },
        );

        let context =
            device_context(&state, Some(&model), &registry, Some(change), None).unwrap();
        assert!(context.for_remodeling());
        assert_eq!(context.model().unwrap().model_name, "pc-model-21");
        assert_eq!(context.ground_context().unwrap().model_name, "pc-model-20");

        registry.evict(change);
        assert!(registry.get(change).is_none());
    }
}
