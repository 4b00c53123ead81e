//! Render step
//!
//! The only frame content is a full-window gray fill whose level oscillates
//! between black and white. Each window owns its own [`Brightness`]; windows
//! never share animation state.

use crate::backend::WindowResources;
use crate::error::WindowError;

/// Brightness change per rendered frame
pub const DEFAULT_STEP: f32 = 0.001;

/// Gray level in `[0, 1]` moving by a fixed step and reflecting at both
/// bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brightness {
    value: f32,
    step: f32,
}

impl Brightness {
    /// `initial` is clamped into `[0, 1]`. A zero or non-finite `step`
    /// falls back to [`DEFAULT_STEP`]; steps larger than 1 are capped.
    pub fn new(initial: f32, step: f32) -> Self {
        let value = if initial.is_finite() {
            initial.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let magnitude = if step.is_finite() && step != 0.0 {
            step.abs().min(1.0)
        } else {
            DEFAULT_STEP
        };
        Self {
            value,
            step: magnitude,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Signed step applied by the next [`advance`](Self::advance)
    pub fn step(&self) -> f32 {
        self.step
    }

    /// Move one step and return the new level.
    pub fn advance(&mut self) -> f32 {
        let next = self.value + self.step;
        if next >= 1.0 {
            self.value = 1.0;
            self.step = -self.step.abs();
        } else if next <= 0.0 {
            self.value = 0.0;
            self.step = self.step.abs();
        } else {
            self.value = next;
        }
        self.value
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_STEP)
    }
}

/// Advance `brightness` and present one frame at the new level.
///
/// Returns the gray level that was submitted. A present failure is
/// returned to the caller to be counted; it never stops the window.
pub fn render_frame<W: WindowResources + ?Sized>(
    resources: &mut W,
    brightness: &mut Brightness,
) -> Result<f32, WindowError> {
    let gray = brightness.advance();
    resources.present(gray)?;
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_brightness_reflects_at_upper_bound() {
        let mut b = Brightness::new(0.95, 0.1);
        assert_eq!(b.advance(), 1.0);
        assert!(b.step() < 0.0);
        let next = b.advance();
        assert!((next - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_brightness_reflects_at_lower_bound() {
        let mut b = Brightness::new(0.05, 0.1);
        b.step = -0.1;
        assert_eq!(b.advance(), 0.0);
        assert!(b.step() > 0.0);
        assert!((b.advance() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_brightness_sanitizes_inputs() {
        let b = Brightness::new(4.0, 0.0);
        assert_eq!(b.value(), 1.0);
        assert_eq!(b.step(), DEFAULT_STEP);

        let b = Brightness::new(f32::NAN, -0.25);
        assert_eq!(b.value(), 0.0);
        assert_eq!(b.step(), 0.25);
    }

    #[test]
    fn test_full_sweep_with_default_step() {
        let mut b = Brightness::default();
        let mut peaks = 0;
        for _ in 0..5_000 {
            if b.advance() == 1.0 {
                peaks += 1;
            }
        }
        // 1000 steps up, 1000 down: two full climbs in 5000 frames
        assert!(peaks >= 2, "peaks = {peaks}");
    }

    proptest! {
        #[test]
        fn prop_brightness_stays_in_unit_interval(
            initial in -2.0f32..3.0f32,
            step in -1.5f32..1.5f32,
            frames in 1usize..20_000,
        ) {
            let mut b = Brightness::new(initial, step);
            for _ in 0..frames {
                let v = b.advance();
                prop_assert!((0.0..=1.0).contains(&v), "value {} out of range", v);
            }
        }
    }
}
