/// Timing and dispatch parameters of a simulation run.
///
/// Speeds and lengths share one unit system with the topology: a block's
/// `speed_limit` caps a train's speed in length units per second.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Movement ticks per second.
    pub movement_hz: f64,
    /// PLC scan cycles per second, per controller.
    pub scan_hz: f64,
    /// Step bound for authority walks; `None` means twice the block count
    /// plus one.
    pub authority_max_steps: Option<usize>,
    /// Speed used for trains spawned without an explicit one.
    pub default_speed: f64,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            movement_hz: 10.0,
            scan_hz: 4.0,
            authority_max_steps: None,
            default_speed: 10.0,
        }
    }
}

impl SimConfig {
    pub fn movement_period(&self) -> f64 { period(self.movement_hz) }
    pub fn scan_period(&self) -> f64 { period(self.scan_hz) }
}

/// A non-positive rate never repeats.
fn period(hz: f64) -> f64 {
    if hz > 0.0 { 1.0 / hz } else { 0.0 }
}

#[test]
fn test_periods() {
    let c = SimConfig::default();
    assert_eq!(c.movement_period(), 0.1);
    assert_eq!(c.scan_period(), 0.25);
    assert_eq!(SimConfig { scan_hz: 0.0, ..c }.scan_period(), 0.0);
}
