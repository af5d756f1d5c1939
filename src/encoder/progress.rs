//! Progress extraction from FFmpeg output lines.
//!
//! Understands the human-readable stats line on stderr (`time=`, `speed=`),
//! the input banner (`Duration:`) and the machine-readable `-progress pipe:1`
//! keys on stdout (`out_time=`, `speed=`).

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Progress accumulated over one conversion attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    /// Percentage complete (0-100).
    pub percent: u8,
    /// Throughput as a multiple of real time.
    pub speed: f32,
    /// Media duration from the input banner.
    pub total_duration: Option<Duration>,
    /// Media time processed so far.
    pub position: Option<Duration>,
}

impl ProgressState {
    /// Speed formatted the way FFmpeg prints it.
    pub fn speed_label(&self) -> String {
        format!("{:.2}x", self.speed)
    }
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d+):(\d{1,2}):(\d{1,2}(?:[.,]\d+)?)").expect("valid regex")
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s|_)time=\s*(\d+):(\d{1,2}):(\d{1,2}(?:[.,]\d+)?)").expect("valid regex")
    })
}

fn speed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").expect("valid regex"))
}

/// Updates `state` from one output line. Returns true if anything changed.
///
/// Unparseable values are ignored. The percentage is clamped to 100 and
/// never decreases within an attempt.
pub fn parse_progress_line(state: &mut ProgressState, line: &str) -> bool {
    let before = state.clone();

    if state.total_duration.map_or(true, |d| d.is_zero()) {
        if let Some(total) = duration_re().captures(line).and_then(|c| timestamp(&c)) {
            state.total_duration = Some(total);
        }
    }

    if let Some(position) = time_re().captures(line).and_then(|c| timestamp(&c)) {
        state.position = Some(position);
        if let Some(total) = state.total_duration.filter(|d| !d.is_zero()) {
            let ratio = position.as_secs_f64() / total.as_secs_f64() * 100.0;
            let percent = ratio.clamp(0.0, 100.0) as u8;
            state.percent = state.percent.max(percent);
        }
    }

    if let Some(speed) = speed_re()
        .captures(line)
        .and_then(|c| c[1].parse::<f32>().ok())
    {
        state.speed = speed;
    }

    *state != before
}

/// Converts `H:M:S(.frac)` captures into a duration; a comma decimal separator is accepted.
/// Values that overflow a `Duration` are rejected.
fn timestamp(caps: &regex::Captures<'_>) -> Option<Duration> {
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].replace(',', ".").parse().ok()?;
    let whole = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?;
    let fraction = Duration::try_from_secs_f64(seconds).ok()?;
    Duration::from_secs(whole).checked_add(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_stats_drive_percentage() {
        let mut state = ProgressState::default();
        assert!(parse_progress_line(
            &mut state,
            "  Duration: 00:02:00.00, start: 0.000000, bitrate: 1205 kb/s"
        ));
        assert_eq!(state.total_duration, Some(Duration::from_secs(120)));

        parse_progress_line(
            &mut state,
            "frame= 1440 fps=240 q=28.0 size=2048kB time=00:01:00.00 bitrate=279.6kbits/s speed=8.01x",
        );
        assert_eq!(state.percent, 50);
        assert!((state.speed - 8.01).abs() < f32::EPSILON);
        assert_eq!(state.speed_label(), "8.01x");
    }

    #[test]
    fn progress_pipe_keys_are_understood() {
        let mut state = ProgressState {
            total_duration: Some(Duration::from_secs(10)),
            ..ProgressState::default()
        };
        parse_progress_line(&mut state, "out_time=00:00:02.500000");
        assert_eq!(state.percent, 25);
        parse_progress_line(&mut state, "speed=1.5x");
        assert_eq!(state.speed, 1.5);
    }

    #[test]
    fn comma_decimal_separator_is_accepted() {
        let mut state = ProgressState::default();
        parse_progress_line(&mut state, "Duration: 00:00:10,00");
        assert_eq!(state.total_duration, Some(Duration::from_secs(10)));
    }

    #[test]
    fn percentage_is_clamped_and_monotonic() {
        let mut state = ProgressState {
            total_duration: Some(Duration::from_secs(10)),
            ..ProgressState::default()
        };
        parse_progress_line(&mut state, "time=00:00:30.00");
        assert_eq!(state.percent, 100);

        let mut state = ProgressState {
            total_duration: Some(Duration::from_secs(10)),
            percent: 60,
            ..ProgressState::default()
        };
        parse_progress_line(&mut state, "time=00:00:01.00");
        assert_eq!(state.percent, 60);
    }

    #[test]
    fn unknown_duration_and_garbage_leave_percent_alone() {
        let mut state = ProgressState::default();
        parse_progress_line(&mut state, "time=00:00:05.00");
        assert_eq!(state.percent, 0);
        assert_eq!(state.position, Some(Duration::from_secs(5)));

        let snapshot = state.clone();
        assert!(!parse_progress_line(&mut state, "time=N/A speed=N/A"));
        assert!(!parse_progress_line(&mut state, "out_time=-577014:32:22.775808"));
        assert_eq!(state, snapshot);
    }

    #[test]
    fn oversized_timestamps_are_ignored() {
        let mut state = ProgressState {
            total_duration: Some(Duration::from_secs(10)),
            position: Some(Duration::from_secs(4)),
            percent: 40,
            ..ProgressState::default()
        };
        let before = state.clone();

        assert!(!parse_progress_line(&mut state, "time=9999999999999999999:00:00.00"));
        assert!(!parse_progress_line(
            &mut state,
            "out_time=5124095576030431:59:00.00 speed=N/A"
        ));
        assert_eq!(state, before);

        let mut fresh = ProgressState::default();
        assert!(!parse_progress_line(&mut fresh, "Duration: 99999999999999999999:00:00.00"));
        assert_eq!(fresh.total_duration, None);
    }

    #[test]
    fn first_duration_wins() {
        let mut state = ProgressState::default();
        parse_progress_line(&mut state, "Duration: 00:01:00.00");
        parse_progress_line(&mut state, "Duration: 00:00:05.00");
        assert_eq!(state.total_duration, Some(Duration::from_secs(60)));
    }
}
