use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the seeded-systems log, ordered most-recent-first. One entry is appended
/// per successful seeding or successful remodel-with-recovery-system.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeededSystemEntry {
    pub label: String,
    pub model_name: String,
    pub brand_id: String,
    pub revision: u32,
    pub timestamp: DateTime<Utc>,
    pub seed_time: DateTime<Utc>,
}

/// Ordered sequence, most recent first.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SeededSystemsLog(Vec<SeededSystemEntry>);

impl SeededSystemsLog {
    pub fn push(&mut self, entry: SeededSystemEntry) {
        self.0.insert(0, entry);
    }

    pub fn entries(&self) -> &[SeededSystemEntry] {
        &self.0
    }

    pub fn latest(&self) -> Option<&SeededSystemEntry> {
        self.0.first()
    }
}
