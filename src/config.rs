use std::time::Duration;

/// Marker printed by the test suite when every test passed.
pub const SUCCESS_MARKER: &str = "All is well in the universe";

/// Marker printed by the kernel when a test failed and the system halts.
pub const FAILURE_MARKER: &str = "halting...";

/// Settings for a single run of the simulation.
///
/// Not exposed on the command line; the binary always uses the defaults and
/// tests inject their own values (mostly a short `timeout`).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wall-clock budget measured from spawn.
    pub timeout: Duration,
    /// File name of the executable inside the target directory.
    pub executable: String,
    pub success_marker: String,
    pub failure_marker: String,
}

impl RunnerConfig {
    /// Markers in priority order. Index 0 is success, index 1 is failure.
    pub fn markers(&self) -> [&str; 2] {
        [&self.success_marker, &self.failure_marker]
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 10),
            executable: "simulate".to_string(),
            success_marker: SUCCESS_MARKER.to_string(),
            failure_marker: FAILURE_MARKER.to_string(),
        }
    }
}
