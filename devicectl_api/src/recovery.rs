use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-task record created by the planner, consumed by the writer, and read by the
/// finaliser and set-model tasks.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecoverySystemSetupRecord {
    pub label: String,
    pub directory: PathBuf,
    pub snap_setup_task_ids: Vec<String>,
    #[serde(default)]
    pub local_snaps: Vec<PathBuf>,
    pub test_system: bool,
    pub mark_default: bool,
}

impl RecoverySystemSetupRecord {
    pub fn new(label: impl Into<String>, seed_root: &std::path::Path) -> Self {
        let label = label.into();
        let directory = osutils::path::join_relative(seed_root, format!("systems/{label}"));
        RecoverySystemSetupRecord {
            label,
            directory,
            snap_setup_task_ids: Vec::new(),
            local_snaps: Vec::new(),
            test_system: false,
            mark_default: false,
        }
    }
}

/// Picks the first of `base`, `base-1`, `base-2`, … not present in `existing`, matching the
/// label collision policy of the recovery-system writer.
pub fn pick_label(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|l| l == base) {
        return base.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !existing.iter().any(|l| l == &candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_label_no_collision() {
        assert_eq!(pick_label("20240115", &[]), "20240115");
    }

    #[test]
    fn test_pick_label_with_collisions() {
        let existing = vec!["20240115".to_string(), "20240115-1".to_string()];
        assert_eq!(pick_label("20240115", &existing), "20240115-2");
    }

    #[test]
    fn test_setup_record_directory() {
        let record = RecoverySystemSetupRecord::new("20240115", std::path::Path::new("/seed"));
        assert_eq!(record.directory, std::path::Path::new("/seed/systems/20240115"));
    }
}
