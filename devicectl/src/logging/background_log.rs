use std::{fs::File, io::Write, path::Path, sync::Mutex};

use log::{LevelFilter, Log, Record};

use osutils::files;

use super::LogEntry;

/// A `log::Log` that mirrors every accepted record as one JSON line into a file, so an
/// operator can reconstruct a device's transition history without a live terminal.
pub struct BackgroundLog {
    target: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl BackgroundLog {
    pub fn new(target: impl AsRef<Path>) -> Self {
        let file = match files::create_file(target.as_ref()) {
            Ok(f) => Some(Mutex::new(f)),
            Err(err) => {
                eprintln!(
                    "Logging setup error: failed to create background log file: {:?}",
                    err
                );
                None
            }
        };

        Self {
            max_level: LevelFilter::Trace,
            target: file,
        }
    }

    pub fn with_max_level(self, max_level: log::LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        if let Some(file) = self.target.as_ref() {
            let mut serialized = serde_json::to_string(&LogEntry::from(record))?;
            serialized.push('\n');

            let mut file_lock = file.lock()?;
            file_lock.write_all(serialized.as_bytes())?;
            file_lock.flush()?;
        }

        Ok(())
    }
}

impl Log for BackgroundLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.target.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        let _ = self.write_entry(record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use std::fs;

    use log::Level;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_filter() {
        let test_dir = tempdir().unwrap();
        let target = test_dir.path().join("test.log");
        let log = BackgroundLog::new(target).with_max_level(LevelFilter::Info);
        let logger = log.into_logger();

        assert!(logger.enabled(&log::Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&log::Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_disabled_on_bad_target() {
        let test_dir = tempdir().unwrap();
        let log = BackgroundLog::new(test_dir.path());
        assert!(log.target.is_none());
        let logger = log.into_logger();
        assert!(!logger.enabled(&log::Metadata::builder().level(Level::Error).build()));
    }

    #[test]
    fn test_background_log_round_trip() {
        let test_dir = tempdir().unwrap();
        let target = test_dir.path().join("test.log");
        let log = BackgroundLog::new(&target);
        let logger = log.into_logger();

        let record = log::Record::builder()
            .args(format_args!("test_message"))
            .level(Level::Info)
            .target("test_target")
            .module_path(Some("test_module"))
            .file(Some(file!()))
            .line(Some(42))
            .build();

        assert!(logger.enabled(record.metadata()));
        logger.log(&record);
        logger.flush();

        let content = fs::read_to_string(target).unwrap();
        let entry: super::super::LogEntry = serde_json::from_str(&content).unwrap();
        assert_eq!(entry.message, "test_message");
        assert_eq!(entry.target, "test_target");
        assert_eq!(entry.line, 42);
    }
}
