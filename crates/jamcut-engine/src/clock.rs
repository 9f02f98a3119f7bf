// crates/jamcut-engine/src/clock.rs
//
// Transport clock the coordinator consumes. Wall-time based with pause
// support: accumulated position plus an Instant while running. Looping
// wraps the reported time modulo the timeline duration — the render loop
// detects the wrap by seeing time jump backwards.

use std::time::Instant;

pub struct TransportClock {
    /// Media position at the last play/seek, in seconds.
    base: f64,
    /// Set while running; `None` when paused.
    running_since: Option<Instant>,
    looping:  bool,
    duration: f64,
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClock {
    pub fn new() -> Self {
        Self {
            base: 0.0,
            running_since: None,
            looping: false,
            duration: 0.0,
        }
    }

    /// Derived from the compiled timeline; looping wraps at this point.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_playing(&self) -> bool {
        self.running_since.is_some()
    }

    /// Current transport time. While looping this is already wrapped into
    /// `[0, duration)`; when not looping the clock pauses itself at the
    /// end of the timeline.
    pub fn tick(&mut self) -> f64 {
        let raw = match self.running_since {
            Some(since) => self.base + since.elapsed().as_secs_f64(),
            None => self.base,
        };
        if self.duration <= 0.0 {
            return raw;
        }
        if self.looping {
            return raw % self.duration;
        }
        if raw >= self.duration && self.running_since.is_some() {
            self.base = self.duration;
            self.running_since = None;
        }
        raw.min(self.duration)
    }

    pub fn play(&mut self, at: Option<f64>) {
        if let Some(t) = at {
            self.base = t.max(0.0);
        } else if let Some(since) = self.running_since.take() {
            // Already running: fold the elapsed time into the base so the
            // restart below does not rewind.
            self.base += since.elapsed().as_secs_f64();
        }
        self.running_since = Some(Instant::now());
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.base += since.elapsed().as_secs_f64();
            if self.looping && self.duration > 0.0 {
                self.base %= self.duration;
            }
        }
    }

    pub fn seek(&mut self, t: f64) {
        self.base = t.max(0.0);
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        self.base = 0.0;
        self.running_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn paused_clock_holds_position() {
        let mut clock = TransportClock::new();
        clock.set_duration(10.0);
        assert_eq!(clock.tick(), 0.0);
        clock.seek(1.5);
        assert_eq!(clock.tick(), 1.5);
        sleep(Duration::from_millis(10));
        assert_eq!(clock.tick(), 1.5);
    }

    #[test]
    fn playing_clock_advances_and_pause_freezes() {
        let mut clock = TransportClock::new();
        clock.set_duration(10.0);
        clock.play(Some(0.0));
        sleep(Duration::from_millis(20));
        let t1 = clock.tick();
        assert!(t1 > 0.0);

        clock.pause();
        let frozen = clock.tick();
        sleep(Duration::from_millis(20));
        assert_eq!(clock.tick(), frozen);

        clock.play(None);
        sleep(Duration::from_millis(10));
        assert!(clock.tick() > frozen);
    }

    #[test]
    fn looping_clock_wraps_backwards() {
        let mut clock = TransportClock::new();
        clock.set_duration(0.03);
        clock.set_loop(true);
        clock.play(Some(0.0));
        sleep(Duration::from_millis(10));
        let before = clock.tick();
        sleep(Duration::from_millis(35));
        let after = clock.tick();
        // Wrapped into [0, duration) — a full lap has passed.
        assert!(after < clock.duration());
        assert!(after < before + 0.03);
    }

    #[test]
    fn non_looping_clock_parks_at_duration() {
        let mut clock = TransportClock::new();
        clock.set_duration(0.02);
        clock.play(Some(0.0));
        sleep(Duration::from_millis(40));
        assert_eq!(clock.tick(), 0.02);
        assert!(!clock.is_playing());
    }

    #[test]
    fn stop_resets_to_zero() {
        let mut clock = TransportClock::new();
        clock.set_duration(10.0);
        clock.play(Some(4.0));
        clock.stop();
        assert!(!clock.is_playing());
        assert_eq!(clock.tick(), 0.0);
    }
}
