use devicectl_api::{
    device::RemodelClass,
    error::{DeviceError, PolicyError},
    model::{Grade, ModelAssertion},
};

/// Classifies a proposed transition and rejects forbidden ones before a single task is
/// synthesised. `old_store`/`new_store` are the artifact-store names in effect before and
/// after the remodel; they are session state, not part of the model assertion itself.
pub fn classify(
    old: &ModelAssertion,
    new: &ModelAssertion,
    old_store: Option<&str>,
    new_store: Option<&str>,
) -> Result<RemodelClass, DeviceError> {
    check_forbidden_transitions(old, new)?;

    if old.brand_id != new.brand_id || old.model_name != new.model_name {
        return Ok(RemodelClass::ReregRemodel);
    }

    if old_store != new_store {
        return Ok(RemodelClass::StoreSwitchRemodel);
    }

    Ok(RemodelClass::UpdateRemodel)
}

/// A classic model with no core-boot artifacts at all: the kind that cannot remodel
/// further. A classic model that also carries a kernel and gadget ("hybrid classic") is
/// not purely classic and may still remodel, though it never gets a recovery system
/// (§4.E.4 skips that insertion when the device has no system-seed).
fn is_purely_classic(model: &ModelAssertion) -> bool {
    model.classic && model.kernel.is_none() && model.gadget.is_none()
}

fn check_forbidden_transitions(old: &ModelAssertion, new: &ModelAssertion) -> Result<(), DeviceError> {
    if old.series != new.series {
        return Err(DeviceError::new(PolicyError::SeriesMismatch {
            old: old.series.clone(),
            new: new.series.clone(),
        }));
    }
    if old.architecture != new.architecture {
        return Err(DeviceError::new(PolicyError::ArchitectureMismatch {
            old: old.architecture.clone(),
            new: new.architecture.clone(),
        }));
    }
    if old.classic != new.classic {
        return Err(DeviceError::new(PolicyError::ClassicMismatch));
    }
    if old.grade == Grade::Unset && new.grade != Grade::Unset {
        return Err(DeviceError::new(PolicyError::GradeUnsetToGraded));
    }
    if old.grade != Grade::Unset && new.grade == Grade::Unset {
        return Err(DeviceError::new(PolicyError::GradedToGradeUnset));
    }
    if old.is_core() && !new.is_core() {
        return Err(DeviceError::new(PolicyError::CoreToBaseTransition));
    }
    if old.brand_id == new.brand_id && old.model_name == new.model_name && new.revision < old.revision {
        return Err(DeviceError::new(PolicyError::RevisionNotNewer {
            current: old.revision,
            new: new.revision,
        }));
    }
    if is_purely_classic(old) {
        return Err(DeviceError::new(PolicyError::PurelyClassicModel));
    }
    Ok(())
}

/// Whether a model has a system-seed partition: only non-classic, modes-aware devices
/// get one. Pure and hybrid classic devices alike boot through the classic bootloader and
/// never gain recovery systems via remodeling.
pub fn has_system_seed(model: &ModelAssertion) -> bool {
    !model.classic && model.grade.is_modes_aware()
}
