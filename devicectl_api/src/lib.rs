pub mod assertion;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod modeenv;
pub mod recovery;
pub mod seeded;
pub mod serial;
pub mod task;

pub use device::{ChangeKind, DeviceStateRecord, RemodelClass};
pub use error::{DeviceError, DeviceResultExt, ErrorKind, ReportError};
pub use model::ModelAssertion;
pub use serial::SerialAssertion;
