use serde::{Deserialize, Serialize};

/// Scheduling behavior/configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on per-stage parallelism.
    ///
    /// `None` means one task per available compute worker. Singleton stages
    /// always run with parallelism 1 regardless of this setting.
    pub stage_parallelism: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stage_parallelism: None,
        }
    }
}
