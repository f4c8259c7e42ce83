//! Engine configuration

use std::time::Duration;

/// Tunable timeouts, retry bounds, and process parameters.
///
/// Defaults match the production bench procedure; override individual
/// values with the `with_*` builders.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wireless connect timeout per attempt
    pub connect_timeout: Duration,

    /// Endpoint discovery timeout
    pub discovery_timeout: Duration,

    /// Streaming subscription timeout
    pub subscription_timeout: Duration,

    /// Single command write/read timeout
    pub command_timeout: Duration,

    /// Attempts per metadata field during setup
    pub metadata_retries: u32,

    /// Delay between metadata attempts
    pub metadata_retry_delay: Duration,

    /// Whole-device setup attempts before marking the device failed
    pub setup_retries: u32,

    /// Delay between whole-device setup attempts
    pub setup_retry_delay: Duration,

    /// Delay between devices in the setup queue (shared radio medium)
    pub setup_inter_device_delay: Duration,

    /// Connectivity monitor polling period
    pub monitor_period: Duration,

    /// Attempts per calibration command before dropping the device
    pub command_retries: u32,

    /// Delay between devices within a calibration phase
    pub cal_inter_device_delay: Duration,

    /// Delay between calibration phases (device-side flash settle)
    pub inter_phase_delay: Duration,

    /// Shared sweep pressure: the upper calibration point and the top of
    /// the verification ladder
    pub sweep_pressure: f32,

    /// Settle time after the reference reports "at target"
    pub stabilization_delay: Duration,

    /// Certification tolerance on mean absolute discrepancy
    pub tolerance: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(15),
            subscription_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            metadata_retries: 3,
            metadata_retry_delay: Duration::from_secs(1),
            setup_retries: 3,
            setup_retry_delay: Duration::from_secs(2),
            setup_inter_device_delay: Duration::from_millis(1500),
            monitor_period: Duration::from_secs(2),
            command_retries: 3,
            cal_inter_device_delay: Duration::from_secs(1),
            inter_phase_delay: Duration::from_secs(2),
            sweep_pressure: 250.0,
            stabilization_delay: Duration::from_secs(3),
            tolerance: 1.5,
        }
    }
}

impl Config {
    pub fn with_sweep_pressure(mut self, pressure: f32) -> Self {
        self.sweep_pressure = pressure;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_setup_retries(mut self, retries: u32) -> Self {
        self.setup_retries = retries;
        self
    }

    pub fn with_command_retries(mut self, retries: u32) -> Self {
        self.command_retries = retries;
        self
    }

    pub fn with_monitor_period(mut self, period: Duration) -> Self {
        self.monitor_period = period;
        self
    }

    /// Collapse every delay to something suitable for bench-less tests
    pub fn with_fast_timings(mut self) -> Self {
        self.metadata_retry_delay = Duration::from_millis(10);
        self.setup_retry_delay = Duration::from_millis(10);
        self.setup_inter_device_delay = Duration::from_millis(10);
        self.cal_inter_device_delay = Duration::from_millis(10);
        self.inter_phase_delay = Duration::from_millis(10);
        self.stabilization_delay = Duration::from_millis(10);
        self
    }
}
