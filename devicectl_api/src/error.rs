use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Serialize};
use strum_macros::IntoStaticStr;

/// A transition or configuration that is forbidden outright: a different series or
/// architecture, a grade regression, an offline constraint violated, remodeling from a
/// purely-classic model, and similar policy decisions that are not retryable.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyError {
    #[error("cannot remodel across series: '{old}' -> '{new}'")]
    SeriesMismatch { old: String, new: String },
    #[error("cannot remodel across architecture: '{old}' -> '{new}'")]
    ArchitectureMismatch { old: String, new: String },
    #[error("cannot remodel between classic and non-classic models")]
    ClassicMismatch,
    #[error("cannot remodel from grade=unset to a graded model")]
    GradeUnsetToGraded,
    #[error("cannot remodel from a graded model to grade=unset")]
    GradedToGradeUnset,
    #[error("cannot remodel from a core model to a base model")]
    CoreToBaseTransition,
    #[error("new model revision {new} is not newer than the current revision {current}")]
    RevisionNotNewer { current: u32, new: u32 },
    #[error("cannot remodel a purely classic (non-hybrid) model")]
    PurelyClassicModel,
    #[error("no snap file provided for \"{name}\"")]
    OfflineSnapMissing { name: String },
    #[error("another change of kind '{kind}' is in flight, re-registration cannot proceed")]
    ReregistrationWithChangeInFlight { kind: String },
    #[error("recovery system \"{label}\" already exists")]
    RecoverySystemAlreadyExists { label: String },
    #[error("re-registration remodel requires network access and cannot proceed offline")]
    ReregRequiresNetwork,
}

/// Something the caller expected to find was absent: a model assertion, a serial
/// assertion, a gadget snap, a recovery system, a validation-set snap.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundError {
    #[error("seed must have a model assertion")]
    NoModelAssertion,
    #[error("seed has more than one model assertion")]
    MultipleModelAssertions,
    #[error("no device model known yet")]
    NoModel,
    #[error("no serial assertion known yet")]
    NoSerial,
    #[error("required artifact '{name}' is not present")]
    RequiredArtifactAbsent { name: String },
    #[error("gadget artifact '{name}' not found")]
    GadgetNotFound { name: String },
    #[error("recovery system '{label}' not found")]
    RecoverySystemNotFound { label: String },
    #[error("validation set snap '{name}' revision {revision} not found")]
    ValidationSetSnapNotFound { name: String, revision: u32 },
}

/// Another exclusive change is already in flight.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictError {
    #[error("change '{conflicting_id}' of kind '{conflicting_kind}' is already in flight")]
    ExclusiveChangeInFlight {
        conflicting_id: String,
        conflicting_kind: String,
    },
}

/// The new model references artifacts whose prerequisites (bases, default content
/// providers) are not satisfied.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
pub struct SelfContainmentError {
    pub missing: Vec<String>,
}

impl std::fmt::Display for SelfContainmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "cannot remodel to model that is not self contained")?;
        for item in &self.missing {
            writeln!(f, "  - {item}")?;
        }
        Ok(())
    }
}

/// A snap revision required by a validation set is absent or incompatible.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationSetError {
    #[error("validation set '{account_id}/{name}' requires '{snap}' at revision {revision}, which is absent")]
    RequiredRevisionAbsent {
        account_id: String,
        name: String,
        snap: String,
        revision: u32,
    },
    #[error("validation set '{account_id}/{name}' is incompatible with installed snap '{snap}'")]
    Incompatible {
        account_id: String,
        name: String,
        snap: String,
    },
}

/// A network error that should be retried with back-off, counted against the tentative
/// budget described in the registration machine's retry policy.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum TransientNetError {
    #[error("no network route to device-service endpoint")]
    NoNetwork,
    #[error("server returned transient status {status}")]
    ServerTransient { status: u16 },
    #[error("TLS certificate not yet valid or expired, possible clock skew")]
    ClockSkew,
}

/// An HTTP protocol violation or a non-retryable status.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum FatalNetError {
    #[error("device-service endpoint returned malformed response")]
    MalformedResponse,
    #[error("device-service endpoint returned non-retryable status {status}: {message}")]
    NonRetryableStatus { status: u16, message: String },
    #[error("registered identity ({brand_id}, {model_name}, {key_id}) does not match request")]
    IdentityMismatch {
        brand_id: String,
        model_name: String,
        key_id: String,
    },
    #[error("serial signing authority '{authority}' is not listed in model's serial-authority")]
    UnlistedSerialAuthority { authority: String },
    #[error("registration tentative budget exhausted after {tentatives} attempts")]
    TentativeBudgetExhausted { tentatives: u32 },
}

/// An invariant violation indicating a bug rather than an environmental condition.
#[derive(Debug, Eq, thiserror::Error, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("internal error: {0}")]
    Internal(&'static str),
    #[error("essential snap '{name}' not present")]
    EssentialSnapMissing { name: String },
    #[error("task graph invariant violated: {0}")]
    TaskGraphInvariant(String),
    #[error("failed to serialize device state")]
    SerializeState,
    #[error("failed to write to state store")]
    StateStoreWrite,
}

/// Each variant corresponds to a different category of error, as described in the error
/// handling design: categories are user-meaningful and route issues to the proper owner.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    SelfContainment(#[from] SelfContainmentError),

    #[error(transparent)]
    ValidationSet(#[from] ValidationSetError),

    #[error(transparent)]
    TransientNet(#[from] TransientNetError),

    #[error(transparent)]
    FatalNet(#[from] FatalNetError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct DeviceErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

/// A structured error carrying its category, call-site location, and an accumulated
/// context stack, so that a change's `err()` summary can concatenate every frame that
/// touched the error while preserving the most-specific policy message verbatim.
pub struct DeviceError(Box<DeviceErrorInner>);

impl DeviceError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        DeviceError(Box::new(DeviceErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Whether this error is a transient network condition that should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self.0.kind, ErrorKind::TransientNet(_))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Concatenates the call-site context stack with the most-specific kind message kept
    /// verbatim at the front, matching the change `err()` summary described in the error
    /// handling design.
    pub fn summary(&self) -> String {
        let mut out = self.0.kind.to_string();
        for (context, _) in &self.0.context {
            let _ = write!(out, "; {context}");
        }
        out
    }
}

pub trait ReportError<T, K> {
    fn structured(self, kind: K) -> Result<T, DeviceError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DeviceError> {
        match self {
            Some(t) => Ok(t),
            None => Err(DeviceError(Box::new(DeviceErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DeviceError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(DeviceError(Box::new(DeviceErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait DeviceResultExt<T> {
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, DeviceError>;
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> DeviceResultExt<T> for Result<T, DeviceError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, DeviceError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for DeviceError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("device-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Policy(ref e) => state.serialize_field("error", e)?,
            ErrorKind::NotFound(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Conflict(ref e) => state.serialize_field("error", e)?,
            ErrorKind::SelfContainment(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ValidationSet(ref e) => state.serialize_field("error", e)?,
            ErrorKind::TransientNet(ref e) => state.serialize_field("error", e)?,
            ErrorKind::FatalNet(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                write!(f, "{: >5}: {}", i, context)?;
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                writeln!(f, "{: >5}: {}", index, e)?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_and_message() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = result
            .structured(InternalError::Internal("test"))
            .message("while doing the test thing")
            .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Internal(_)));
        assert!(err.summary().contains("while doing the test thing"));
    }

    #[test]
    fn test_is_transient() {
        let err = DeviceError::new(TransientNetError::NoNetwork);
        assert!(err.is_transient());

        let err = DeviceError::new(InternalError::Internal("x"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_self_containment_display() {
        let err = SelfContainmentError {
            missing: vec!["base for 'foo'".into(), "content provider 'bar'".into()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("base for 'foo'"));
        assert!(rendered.contains("content provider 'bar'"));
    }
}
