//! Visual smoothing
//!
//! Nothing here touches simulation state. [`CorrectionSmoother`] blends the
//! rendered state of a predicting entity out of a reconciliation jump over a
//! few ticks; [`Interpolator`] renders an observed entity between the two
//! most recent snapshots.

use tickwise_core::Tick;

/// Linear interpolation between two values
pub trait Lerp: Sized {
    /// Value at `t` between `self` (0.0) and `to` (1.0)
    fn lerp(&self, to: &Self, t: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        self + (to - self) * t
    }
}

impl Lerp for f64 {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        self + (to - self) * t as f64
    }
}

impl<T: Lerp + Copy, const N: usize> Lerp for [T; N] {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        let mut out = *self;
        for (o, (a, b)) in out.iter_mut().zip(self.iter().zip(to.iter())) {
            *o = a.lerp(b, t);
        }
        out
    }
}

impl<A: Lerp, B: Lerp> Lerp for (A, B) {
    fn lerp(&self, to: &Self, t: f32) -> Self {
        (self.0.lerp(&to.0, t), self.1.lerp(&to.1, t))
    }
}

/// Hides reconciliation jumps by blending from the pre-correction state
#[derive(Debug, Clone)]
pub struct CorrectionSmoother<S> {
    /// Rendered offset origin: the state shown before the correction
    from: Option<S>,
    /// Ticks elapsed since the correction
    elapsed: u32,
    /// Ticks over which the blend completes
    duration: u32,
}

impl<S: Lerp + Clone> CorrectionSmoother<S> {
    /// Blend corrections out over `duration_ticks`
    pub fn new(duration_ticks: u32) -> Self {
        Self {
            from: None,
            elapsed: 0,
            duration: duration_ticks.max(1),
        }
    }

    /// Start blending from `before`, the state shown prior to the correction
    pub fn begin(&mut self, before: S) {
        self.from = Some(before);
        self.elapsed = 0;
    }

    /// Advance the blend by one tick
    pub fn advance(&mut self) {
        if self.from.is_some() {
            self.elapsed += 1;
            if self.elapsed >= self.duration {
                self.from = None;
            }
        }
    }

    /// The state to render given the simulated `current` state
    pub fn view(&self, current: &S) -> S {
        match &self.from {
            Some(from) => {
                let t = self.elapsed as f32 / self.duration as f32;
                from.lerp(current, t)
            }
            None => current.clone(),
        }
    }

    /// Check if a blend is in progress
    pub fn is_active(&self) -> bool {
        self.from.is_some()
    }
}

/// Interpolator for observed entities
///
/// Stores the previous and current snapshots and interpolates between them
/// based on the render time.
#[derive(Debug, Clone)]
pub struct Interpolator<S> {
    prev_state: Option<(Tick, S)>,
    curr_state: Option<(Tick, S)>,
}

impl<S: Lerp + Clone> Interpolator<S> {
    /// Create an empty interpolator
    pub fn new() -> Self {
        Self {
            prev_state: None,
            curr_state: None,
        }
    }

    /// Push a newly applied snapshot
    pub fn push_state(&mut self, tick: Tick, state: S) {
        self.prev_state = self.curr_state.take();
        self.curr_state = Some((tick, state));
    }

    /// State at `alpha` between the previous (0.0) and current (1.0) snapshot
    pub fn interpolate(&self, alpha: f32) -> Option<S> {
        match (&self.prev_state, &self.curr_state) {
            (Some((_, prev)), Some((_, curr))) => Some(prev.lerp(curr, alpha.clamp(0.0, 1.0))),
            (None, Some((_, curr))) => Some(curr.clone()),
            (Some((_, prev)), None) => Some(prev.clone()),
            (None, None) => None,
        }
    }

    /// Tick of the current snapshot
    pub fn current_tick(&self) -> Option<Tick> {
        self.curr_state.as_ref().map(|(t, _)| *t)
    }

    /// Check if both states are present
    pub fn can_interpolate(&self) -> bool {
        self.prev_state.is_some() && self.curr_state.is_some()
    }

    /// Forget both states
    pub fn reset(&mut self) {
        self.prev_state = None;
        self.curr_state = None;
    }
}

impl<S: Lerp + Clone> Default for Interpolator<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp() {
        assert_eq!(0.0f32.lerp(&10.0, 0.25), 2.5);
        assert_eq!([0.0f32, 4.0].lerp(&[2.0, 8.0], 0.5), [1.0, 6.0]);
        assert_eq!((0.0f32, 1.0f64).lerp(&(1.0, 3.0), 0.5), (0.5, 2.0));
    }

    #[test]
    fn test_smoother_blends_out() {
        let mut smoother = CorrectionSmoother::new(4);
        assert_eq!(smoother.view(&8.0f32), 8.0);

        smoother.begin(0.0f32);
        assert_eq!(smoother.view(&8.0), 0.0);
        smoother.advance();
        assert_eq!(smoother.view(&8.0), 2.0);
        smoother.advance();
        smoother.advance();
        assert_eq!(smoother.view(&8.0), 6.0);
        smoother.advance();
        assert!(!smoother.is_active());
        assert_eq!(smoother.view(&8.0), 8.0);
    }

    #[test]
    fn test_interpolator() {
        let mut interpolator = Interpolator::new();
        assert!(interpolator.interpolate(0.5).is_none());

        interpolator.push_state(1, 0.0f32);
        assert!(!interpolator.can_interpolate());
        assert_eq!(interpolator.interpolate(0.5), Some(0.0));

        interpolator.push_state(2, 10.0);
        assert!(interpolator.can_interpolate());
        assert_eq!(interpolator.interpolate(0.5), Some(5.0));
        assert_eq!(interpolator.interpolate(2.0), Some(10.0));
        assert_eq!(interpolator.current_tick(), Some(2));
    }
}
