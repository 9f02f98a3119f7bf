// crates/jamcut-core/src/helpers/time.rs
//
// Musical/absolute time conversion shared by the project model and the
// compiler. BPM values arrive ×100 (120 BPM is stored as 12000) so that
// fractional tempi survive integer serialization.

/// Convert musical ticks to seconds.
///
/// ```
/// use jamcut_core::helpers::time::ticks_to_secs;
/// // 120 BPM (stored 12000), 960 PPQ: one beat = 960 ticks = 0.5 s.
/// assert!((ticks_to_secs(960.0, 12_000, 960) - 0.5).abs() < 1e-9);
/// assert!((ticks_to_secs(3840.0, 12_000, 960) - 2.0).abs() < 1e-9);
/// ```
pub fn ticks_to_secs(ticks: f64, bpm_x100: u32, ppq: u32) -> f64 {
    if bpm_x100 == 0 || ppq == 0 {
        return 0.0;
    }
    let beats = ticks / ppq as f64;
    beats * 60.0 / (bpm_x100 as f64 / 100.0)
}

/// Convert seconds to musical ticks — the inverse of [`ticks_to_secs`].
///
/// ```
/// use jamcut_core::helpers::time::secs_to_ticks;
/// assert!((secs_to_ticks(2.0, 12_000, 960) - 3840.0).abs() < 1e-6);
/// ```
pub fn secs_to_ticks(secs: f64, bpm_x100: u32, ppq: u32) -> f64 {
    secs * (bpm_x100 as f64 / 100.0) / 60.0 * ppq as f64
}

/// Format a time in seconds as `MM:SS.mmm` for log lines.
///
/// ```
/// use jamcut_core::helpers::time::format_secs;
/// assert_eq!(format_secs(61.25), "01:01.250");
/// ```
pub fn format_secs(s: f64) -> String {
    let m  = (s / 60.0) as u32;
    let sc = s % 60.0;
    format!("{m:02}:{sc:06.3}")
}
