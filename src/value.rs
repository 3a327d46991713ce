//! Numeric values that can be reported and combined.
//!
//! [`ProgressValue`] is the bound every progress value satisfies. Beyond ordinary
//! addition it exposes exactly what the averaging pass in
//! [`CombinedProgress`](crate::CombinedProgress) needs:
//!
//! * **Exact counts:** [`ProgressValue::from_count`] converts the number of attached
//!   sources into the value type, returning `None` once that count can no longer be
//!   represented exactly (e.g. `128` for `i8`, `2^24 + 1` for `f32`).
//! * **Split division:** [`ProgressValue::div_rem`] divides into a quotient and a
//!   remainder. Integers truncate and carry the remainder, floats divide exactly and
//!   never carry.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
};

/// A numeric type usable as a progress value.
///
/// Implemented for every primitive integer and float type.
pub trait ProgressValue:
    Copy + Debug + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Send + Sync + 'static
{
    /// The additive identity.
    fn zero() -> Self;

    /// The multiplicative identity.
    fn one() -> Self;

    /// Converts a source count into `Self`, or `None` if `count` is not exactly representable.
    fn from_count(count: usize) -> Option<Self>;

    /// Splits `self / divisor` into a quotient and a remainder.
    ///
    /// `divisor` is always a value produced by [`from_count`](Self::from_count) and is
    /// never zero.
    #[must_use]
    fn div_rem(self, divisor: Self) -> (Self, Self);
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ProgressValue for $ty {
                #[inline]
                fn zero() -> Self {
                    0
                }

                #[inline]
                fn one() -> Self {
                    1
                }

                #[inline]
                fn from_count(count: usize) -> Option<Self> {
                    Self::try_from(count).ok()
                }

                #[inline]
                fn div_rem(self, divisor: Self) -> (Self, Self) {
                    (self / divisor, self % divisor)
                }
            }
        )*
    };
}

macro_rules! impl_float {
    ($($ty:ty => $exact:expr),* $(,)?) => {
        $(
            impl ProgressValue for $ty {
                #[inline]
                fn zero() -> Self {
                    0.0
                }

                #[inline]
                fn one() -> Self {
                    1.0
                }

                #[inline]
                #[allow(clippy::cast_precision_loss)]
                fn from_count(count: usize) -> Option<Self> {
                    // Integers above the mantissa width lose their low bits.
                    ((count as u128) <= $exact).then(|| count as Self)
                }

                #[inline]
                fn div_rem(self, divisor: Self) -> (Self, Self) {
                    (self / divisor, 0.0)
                }
            }
        )*
    };
}

impl_integer!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);
impl_float!(f32 => 1u128 << f32::MANTISSA_DIGITS, f64 => 1u128 << f64::MANTISSA_DIGITS);
