use serde::Serialize;

use crate::utils::errors::EngineError;

/// Counters for one config's pass through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStats {
    pub snapshots: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum Outcome {
    Processed(ConfigStats),
    Failed(EngineError),
    Skipped,
}

/// Aggregate result of a backup run. Failures of single configs show up as
/// warnings; the run itself never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub configs: usize,
    pub snapshots: usize,
    pub unchanged: usize,
    pub pruned: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn record(&mut self, path: &str, outcome: Outcome) {
        self.configs += 1;
        match outcome {
            Outcome::Processed(stats) => {
                self.snapshots += stats.snapshots;
                self.unchanged += stats.unchanged;
                self.pruned += stats.pruned;
                self.warnings.extend(stats.warnings);
            }
            Outcome::Failed(e) if e.is_missing_path() => {
                self.skipped += 1;
                self.warnings.push(format!("{path}: does not exist, skipped"));
            }
            Outcome::Failed(e) => {
                self.skipped += 1;
                self.warnings.push(format!("{path}: {e}"));
            }
            Outcome::Skipped => {
                self.skipped += 1;
                self.warnings.push(format!("{path}: skipped due to shutdown"));
            }
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} configs: {} new backups, {} unchanged, {} pruned, {} skipped",
            self.configs, self.snapshots, self.unchanged, self.pruned, self.skipped
        )
    }
}
