//! Tolerance-aware comparison of replicated values
//!
//! Floats compare within an epsilon; discrete values compare exactly. Used
//! by change detection (is it worth sending?) and by the determinism
//! diagnostic (did prediction diverge?).

/// Compare two values within a tolerance
pub trait Approx {
    /// Check if `self` and `other` are equal within `epsilon`
    ///
    /// Discrete types ignore `epsilon` and compare exactly.
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;

    /// Check if the values differ by more than `epsilon`
    fn differs(&self, other: &Self, epsilon: f32) -> bool {
        !self.approx_eq(other, epsilon)
    }
}

impl Approx for f32 {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        // Bitwise equal first so identical NaN payloads count as unchanged
        self.to_bits() == other.to_bits() || (self - other).abs() <= epsilon
    }
}

impl Approx for f64 {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.to_bits() == other.to_bits() || (self - other).abs() <= epsilon as f64
    }
}

macro_rules! exact_approx {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Approx for $ty {
                fn approx_eq(&self, other: &Self, _epsilon: f32) -> bool {
                    self == other
                }
            }
        )*
    };
}

exact_approx!(bool, char, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, String, ());

impl<T: Approx, const N: usize> Approx for [T; N] {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.iter()
            .zip(other.iter())
            .all(|(a, b)| a.approx_eq(b, epsilon))
    }
}

impl<T: Approx> Approx for Vec<T> {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.approx_eq(b, epsilon))
    }
}

impl<T: Approx> Approx for Option<T> {
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.approx_eq(b, epsilon),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! tuple_approx {
    ($(($($name:ident : $idx:tt),+)),* $(,)?) => {
        $(
            impl<$($name: Approx),+> Approx for ($($name,)+) {
                fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
                    $(self.$idx.approx_eq(&other.$idx, epsilon))&&+
                }
            }
        )*
    };
}

tuple_approx!(
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_epsilon() {
        assert!(1.0f32.approx_eq(&1.00001, 1e-4));
        assert!(1.0f32.differs(&1.1, 1e-4));
        assert!(f32::NAN.approx_eq(&f32::NAN, 0.0));
        assert!(2.0f64.approx_eq(&2.0, 0.0));
    }

    #[test]
    fn test_discrete_ignores_epsilon() {
        assert!(5u32.differs(&6, 10.0));
        assert!(true.approx_eq(&true, 0.0));
        assert!(String::from("a").differs(&String::from("b"), 1.0));
    }

    #[test]
    fn test_composites() {
        assert!([1.0f32, 2.0, 3.0].approx_eq(&[1.0, 2.00001, 3.0], 1e-3));
        assert!([1.0f32, 2.0].differs(&[1.0, 2.5], 1e-3));
        assert!((1.0f32, 7u8).approx_eq(&(1.0, 7), 0.0));
        assert!((1.0f32, 7u8).differs(&(1.0, 8), 0.5));
        assert!(Some(1.0f32).differs(&None, 1.0));
        assert!(vec![1u8, 2].differs(&vec![1u8], 0.0));
    }
}
