const MILLIS_PER_HOUR: f64 = 1000. * 60. * 60.;

/// Converts a stopwatch reading into the fractional hours stored on activities.
pub fn millis_to_hours(ms: i64) -> f64 {
    ms as f64 / MILLIS_PER_HOUR
}
