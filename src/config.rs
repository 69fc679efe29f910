use std::path::PathBuf;
use std::time::Duration;

/// Engine tunables. The defaults mirror the production constants; tests
/// shrink the windows to keep runs fast.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// How long an accepted message id blocks re-acceptance.
    pub dedup_window: Duration,
    /// Fixed interval of the dedup sweep loop.
    pub dedup_sweep_interval: Duration,
    /// How long staged media stays retrievable.
    pub staging_retention: Duration,
    /// Fixed interval of the staging sweep loop.
    pub staging_sweep_interval: Duration,
    /// Interval of the batched broadcast flush.
    pub batch_flush_interval: Duration,
    /// Directory where voice-note payloads are spooled for the duration of
    /// a transport call.
    pub voice_spool_dir: PathBuf,
    /// Deadline for a single request to the session driver.
    pub driver_request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(5 * 60),
            dedup_sweep_interval: Duration::from_secs(60),
            staging_retention: Duration::from_secs(60 * 60),
            staging_sweep_interval: Duration::from_secs(30 * 60),
            batch_flush_interval: Duration::from_secs(1),
            voice_spool_dir: std::env::temp_dir(),
            driver_request_timeout: Duration::from_secs(120),
        }
    }
}
