//! Input capture for the predicting peer
//!
//! Each tick the predicting peer samples one input record from its
//! [`InputSource`] and records it in a tick-indexed history. Ticks without
//! input still get a record: the default "no input" value, so replay and the
//! server see exactly the same sequence of records.

use tickwise_core::{Tick, TickHistory};
use tracing::trace;

/// Produces the local input record for a tick
///
/// Closures `FnMut(Tick) -> Option<I>` implement this directly.
pub trait InputSource<I> {
    /// Sample the input for `tick`; `None` means no input this tick
    fn sample(&mut self, tick: Tick) -> Option<I>;
}

impl<I, F> InputSource<I> for F
where
    F: FnMut(Tick) -> Option<I>,
{
    fn sample(&mut self, tick: Tick) -> Option<I> {
        self(tick)
    }
}

/// Source that never produces input
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl<I> InputSource<I> for NoInput {
    fn sample(&mut self, _tick: Tick) -> Option<I> {
        None
    }
}

/// Samples a source once per tick and records the result
pub struct InputCapture<I> {
    source: Box<dyn InputSource<I> + Send>,
    /// Ticks captured
    captured: u64,
    /// Ticks where the source had nothing and the default was recorded
    defaulted: u64,
}

impl<I: Clone + Default> InputCapture<I> {
    /// Capture from `source`
    pub fn new(source: impl InputSource<I> + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            captured: 0,
            defaulted: 0,
        }
    }

    /// Sample the input of `tick` and record it in `history`
    ///
    /// Returns the recorded input (the default when the source had none).
    pub fn capture<H: TickHistory<I>>(&mut self, tick: Tick, history: &mut H) -> I {
        let input = match self.source.sample(tick) {
            Some(input) => input,
            None => {
                self.defaulted += 1;
                trace!(tick, "no input sampled, recording default");
                I::default()
            }
        };
        self.captured += 1;
        history.save(tick, input.clone());
        input
    }

    /// Replace the input source
    pub fn set_source(&mut self, source: impl InputSource<I> + Send + 'static) {
        self.source = Box::new(source);
    }

    /// Number of ticks captured
    pub fn captured(&self) -> u64 {
        self.captured
    }

    /// Number of captured ticks that used the default input
    pub fn defaulted(&self) -> u64 {
        self.defaulted
    }
}

impl<I: Clone + Default + 'static> Default for InputCapture<I> {
    fn default() -> Self {
        Self::new(NoInput)
    }
}

impl<I> std::fmt::Debug for InputCapture<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputCapture")
            .field("captured", &self.captured)
            .field("defaulted", &self.defaulted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwise_rollback_buffer::RollbackBuffer;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Stick {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_capture_records_every_tick() {
        let mut capture = InputCapture::new(|tick: Tick| {
            (tick % 2 == 0).then_some(Stick { x: 1.0, y: 0.0 })
        });
        let mut history = RollbackBuffer::new(8);

        for tick in 10..14 {
            capture.capture(tick, &mut history);
        }

        assert_eq!(history.len(), 4);
        assert_eq!(history.get(10), Some(&Stick { x: 1.0, y: 0.0 }));
        assert_eq!(history.get(11), Some(&Stick::default()));
        assert_eq!(capture.captured(), 4);
        assert_eq!(capture.defaulted(), 2);
    }

    #[test]
    fn test_no_input_source() {
        let mut capture: InputCapture<Stick> = InputCapture::default();
        let mut history = RollbackBuffer::new(4);
        assert_eq!(capture.capture(1, &mut history), Stick::default());
        assert_eq!(capture.defaulted(), 1);
    }

    #[test]
    fn test_set_source() {
        let mut capture: InputCapture<Stick> = InputCapture::default();
        let mut history = RollbackBuffer::new(4);
        capture.set_source(|_: Tick| Some(Stick { x: 0.0, y: -1.0 }));
        assert_eq!(capture.capture(1, &mut history).y, -1.0);
    }
}
