// Path: crates/telemetry/src/time.rs
//! An RAII timer for latency metrics.

use std::time::Instant;

/// Reports the time between its creation and drop, in seconds.
pub struct Timer<F: FnMut(f64)> {
    start: Instant,
    observe: F,
}

impl<F: FnMut(f64)> Timer<F> {
    /// Starts timing.
    pub fn new(observe: F) -> Self {
        Self {
            start: Instant::now(),
            observe,
        }
    }
}

impl<F: FnMut(f64)> Drop for Timer<F> {
    fn drop(&mut self) {
        (self.observe)(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn reports_once_on_drop() {
        let seen = Cell::new(None);
        {
            let _t = Timer::new(|secs| seen.set(Some(secs)));
            assert!(seen.get().is_none());
        }
        assert!(seen.get().unwrap() >= 0.0);
    }
}
