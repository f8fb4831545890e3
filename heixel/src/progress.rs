//! Cooperative progress reporting and cancellation.
//!
//! Long-running operations call [`Progress::report`] at regular points with a
//! completion fraction in `0.0..=1.0`. Returning [`Signal::Cancel`] asks the
//! operation to stop at that point; work already committed is kept.

/// Answer given by a progress observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep working.
    Continue,
    /// Stop as soon as possible, keeping committed results.
    Cancel,
}

/// Observer polled by long-running operations.
pub trait Progress {
    /// Called with the completed fraction of the current operation.
    fn report(&mut self, fraction: f64) -> Signal;
}

/// Progress observer that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _fraction: f64) -> Signal {
        Signal::Continue
    }
}

impl<F> Progress for F
where
    F: FnMut(f64) -> Signal,
{
    fn report(&mut self, fraction: f64) -> Signal {
        self(fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_progress() {
        let mut seen = Vec::new();
        let mut observer = |f: f64| {
            seen.push(f);
            if f >= 0.5 {
                Signal::Cancel
            } else {
                Signal::Continue
            }
        };
        assert_eq!(observer.report(0.25), Signal::Continue);
        assert_eq!(observer.report(0.5), Signal::Cancel);
        assert_eq!(seen, vec![0.25, 0.5]);
    }

    #[test]
    fn test_no_progress() {
        assert_eq!(NoProgress.report(1.0), Signal::Continue);
    }
}
