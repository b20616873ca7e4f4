//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Linear interpolation between `a` and `b`, with `t = 0` giving `a` and `t = 1` giving `b`.
pub fn lerp<T: Float>(a: T, b: T, t: T) -> T {
    a + (b - a) * t
}

/// Clamp a value into the range `[min, max]`.
pub fn clamp<T: Float>(value: T, min: T, max: T) -> T {
    value.max(min).min(max)
}

/// Wrap an angle into the range `[-pi, pi)`.
pub fn wrap_to_pi<T: Float>(angle: T) -> T {
    let pi = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau = pi + pi;

    rem_euclid(angle + pi, tau) - pi
}

/// Return the angle equivalent to `angle` (modulo 2pi) which is closest to `reference`.
///
/// Used to unwrap a sequence of headings so that consecutive values never jump by 2pi.
pub fn unwrap_near<T: Float>(angle: T, reference: T) -> T {
    reference + wrap_to_pi(angle - reference)
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T: Float>(lhs: T, rhs: T) -> T {
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(0.5f64) - 0.5).abs() < EPS);
        assert!((wrap_to_pi(3.0 * PI / 2.0) + PI / 2.0).abs() < EPS);
        assert!((wrap_to_pi(-3.0 * PI / 2.0) - PI / 2.0).abs() < EPS);
        assert!((wrap_to_pi(4.0 * PI + 0.25) - 0.25).abs() < EPS);
    }

    #[test]
    fn test_unwrap_near() {
        // Just across the discontinuity should unwrap to just past pi
        let a = unwrap_near(-PI + 0.1, PI - 0.1);
        assert!((a - (PI + 0.1)).abs() < EPS);

        // Already close stays put
        assert!((unwrap_near(0.2f64, 0.1) - 0.2).abs() < EPS);
    }

    #[test]
    fn test_interp() {
        assert_eq!(lerp(1.0f64, 3.0, 0.25), 1.5);
        assert_eq!(clamp(5.0f64, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0f64, -1.0, 1.0), -1.0);
    }
}
