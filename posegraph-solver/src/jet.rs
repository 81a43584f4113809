//! Dual number (Jet) type for forward-mode automatic differentiation
//!
//! A `Jet<N>` carries an `f64` value together with its partial derivatives
//! with respect to `N` parameters. Residual code written against [`Real`]
//! runs unchanged on plain `f64` (evaluation only) or on jets (evaluation
//! plus Jacobian row).

use num_traits::{One, Zero};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A dual number containing a value and its derivatives
///
/// `N` is the number of parameters the derivatives are taken against. It is a
/// compile-time constant so jets stay `Copy` and live on the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jet<const N: usize> {
    /// The scalar value
    pub value: f64,
    /// Derivatives with respect to each parameter
    pub derivs: [f64; N],
}

impl<const N: usize> Jet<N> {
    /// Create a constant (zero derivatives)
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            derivs: [0.0; N],
        }
    }

    /// Create a variable with unit derivative at the given index
    pub fn variable(value: f64, index: usize) -> Self {
        let mut derivs = [0.0; N];
        derivs[index] = 1.0;
        Self { value, derivs }
    }

    /// Apply the chain rule for a unary function with value `value` and
    /// derivative `slope` at `self.value`.
    #[inline]
    fn chain(self, value: f64, slope: f64) -> Self {
        Self {
            value,
            derivs: std::array::from_fn(|i| slope * self.derivs[i]),
        }
    }

    /// True when the value and every derivative are finite
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.derivs.iter().all(|d| d.is_finite())
    }

    /// Sine: sin(a + da) = sin(a) + cos(a) * da
    pub fn sin(self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }

    /// Cosine: cos(a + da) = cos(a) - sin(a) * da
    pub fn cos(self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }

    /// Square root. The derivative is infinite at zero; callers keep the
    /// argument away from zero (see `math3d::Quat::log`).
    pub fn sqrt(self) -> Self {
        let root = self.value.sqrt();
        self.chain(root, 0.5 / root)
    }

    /// Absolute value (non-differentiable at 0, uses sign)
    pub fn abs(self) -> Self {
        self.chain(self.value.abs(), self.value.signum())
    }

    /// Two-argument arctangent of `self / x`
    ///
    /// d atan2(y, x) = (x dy - y dx) / (x² + y²)
    pub fn atan2(self, x: Self) -> Self {
        let denom = x.value * x.value + self.value * self.value;
        Self {
            value: self.value.atan2(x.value),
            derivs: std::array::from_fn(|i| {
                (x.value * self.derivs[i] - self.value * x.derivs[i]) / denom
            }),
        }
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

impl<const N: usize> Add for Jet<N> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
            derivs: std::array::from_fn(|i| self.derivs[i] + rhs.derivs[i]),
        }
    }
}

impl<const N: usize> Sub for Jet<N> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
            derivs: std::array::from_fn(|i| self.derivs[i] - rhs.derivs[i]),
        }
    }
}

/// (a + da) * (b + db) = ab + a*db + b*da
impl<const N: usize> Mul for Jet<N> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            value: self.value * rhs.value,
            derivs: std::array::from_fn(|i| {
                self.value * rhs.derivs[i] + rhs.value * self.derivs[i]
            }),
        }
    }
}

/// (a + da) / (b + db) = a/b + (da*b - a*db)/b²
impl<const N: usize> Div for Jet<N> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let b_squared = rhs.value * rhs.value;
        Self {
            value: self.value / rhs.value,
            derivs: std::array::from_fn(|i| {
                (self.derivs[i] * rhs.value - self.value * rhs.derivs[i]) / b_squared
            }),
        }
    }
}

impl<const N: usize> Neg for Jet<N> {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            value: -self.value,
            derivs: std::array::from_fn(|i| -self.derivs[i]),
        }
    }
}

impl<const N: usize> Zero for Jet<N> {
    fn zero() -> Self {
        Self::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.derivs.iter().all(|d| *d == 0.0)
    }
}

impl<const N: usize> One for Jet<N> {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

// ============================================================================
// Real trait for generic programming
// ============================================================================

/// Scalar operations shared by `f64` and `Jet<N>`
///
/// Residuals are written once against this trait and evaluated either with
/// `f64` (cost only) or with jets (cost and Jacobian).
pub trait Real:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Zero
    + One
{
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn atan2(self, x: Self) -> Self;

    /// Lift a plain constant (no derivatives)
    fn from_f64(value: f64) -> Self;

    /// The scalar part, used for branch decisions
    fn value(self) -> f64;
}

impl Real for f64 {
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
    fn atan2(self, x: Self) -> Self {
        f64::atan2(self, x)
    }
    fn from_f64(value: f64) -> Self {
        value
    }
    fn value(self) -> f64 {
        self
    }
}

impl<const N: usize> Real for Jet<N> {
    fn sin(self) -> Self {
        Jet::sin(self)
    }
    fn cos(self) -> Self {
        Jet::cos(self)
    }
    fn sqrt(self) -> Self {
        Jet::sqrt(self)
    }
    fn abs(self) -> Self {
        Jet::abs(self)
    }
    fn atan2(self, x: Self) -> Self {
        Jet::atan2(self, x)
    }
    fn from_f64(value: f64) -> Self {
        Jet::constant(value)
    }
    fn value(self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_addition() {
        let x = Jet::<2>::variable(3.0, 0);
        let y = Jet::<2>::variable(4.0, 1);

        let sum = x + y;
        assert_eq!(sum.value, 7.0);
        assert_eq!(sum.derivs, [1.0, 1.0]);
    }

    #[test]
    fn test_multiplication() {
        let x = Jet::<2>::variable(3.0, 0);
        let y = Jet::<2>::variable(4.0, 1);

        let product = x * y;
        assert_eq!(product.value, 12.0);
        assert_eq!(product.derivs, [4.0, 3.0]);
    }

    #[test]
    fn test_division() {
        let x = Jet::<2>::variable(3.0, 0);
        let y = Jet::<2>::variable(4.0, 1);

        let q = x / y;
        assert_abs_diff_eq!(q.value, 0.75);
        assert_abs_diff_eq!(q.derivs[0], 0.25);
        assert_abs_diff_eq!(q.derivs[1], -3.0 / 16.0);
    }

    #[test]
    fn test_atan2_matches_finite_difference() {
        let (y0, x0) = (0.3, -0.8);
        let y = Jet::<2>::variable(y0, 0);
        let x = Jet::<2>::variable(x0, 1);
        let angle = y.atan2(x);

        let h = 1e-6;
        let dy = (f64::atan2(y0 + h, x0) - f64::atan2(y0 - h, x0)) / (2.0 * h);
        let dx = (f64::atan2(y0, x0 + h) - f64::atan2(y0, x0 - h)) / (2.0 * h);
        assert_abs_diff_eq!(angle.value, f64::atan2(y0, x0));
        assert_abs_diff_eq!(angle.derivs[0], dy, epsilon = 1e-8);
        assert_abs_diff_eq!(angle.derivs[1], dx, epsilon = 1e-8);
    }

    #[test]
    fn test_sqrt_and_sin() {
        let x = Jet::<1>::variable(4.0, 0);
        let root = x.sqrt();
        assert_eq!(root.value, 2.0);
        assert_abs_diff_eq!(root.derivs[0], 0.25);

        let s = Jet::<1>::variable(0.5, 0).sin();
        assert_abs_diff_eq!(s.derivs[0], 0.5_f64.cos());
    }

    #[test]
    fn test_generic_function() {
        fn quadratic<T: Real>(x: T) -> T {
            x * x + x + T::one()
        }

        assert_eq!(quadratic(2.0), 7.0);

        let result = quadratic(Jet::<1>::variable(2.0, 0));
        assert_eq!(result.value, 7.0);
        assert_eq!(result.derivs[0], 5.0);
    }
}
