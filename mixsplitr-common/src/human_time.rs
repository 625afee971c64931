//! Clock-style time formatting for track names and progress output

use std::time::Duration;

/// Format seconds as `MM:SS`, or `H:MM:SS` from one hour up
///
/// Fractions are truncated so that a track starting at 12:45.9 is labelled
/// `12:45`. Negative and non-finite inputs format as `00:00`.
///
/// ```
/// use mixsplitr_common::human_time::format_clock;
///
/// assert_eq!(format_clock(0.0), "00:00");
/// assert_eq!(format_clock(765.4), "12:45");
/// assert_eq!(format_clock(3725.0), "1:02:05");
/// ```
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format an elapsed wall-clock duration (`1m 05.2s`, `4.31s`)
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:04.1}s", minutes as u64, secs - minutes * 60.0)
    }
}
