use std::ops::{Add, AddAssign, Sub};

use num::Complex;

/// A running sum with Kahan compensation.
///
/// Works for any value type whose addition is componentwise over `f64`, which covers both real
/// sums and [`Complex`] sums (the real and imaginary parts are compensated independently).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CompensatedSum<T> {
    sum: T,
    correction: T,
}

impl<T> CompensatedSum<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T>,
{
    /// Start a sum at `value`.
    pub fn new(value: T) -> Self {
        Self {
            sum: value,
            correction: T::default(),
        }
    }
    /// The accumulated sum.
    pub fn value(&self) -> T {
        self.sum
    }
    /// Add a value to the sum.
    pub fn add(&mut self, value: T) {
        let y = value - self.correction;
        let t = self.sum + y;
        self.correction = (t - self.sum) - y;
        self.sum = t;
    }
    /// Reset to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl<T> AddAssign<T> for CompensatedSum<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T>,
{
    fn add_assign(&mut self, rhs: T) {
        self.add(rhs);
    }
}

impl<T> AddAssign<CompensatedSum<T>> for CompensatedSum<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T>,
{
    fn add_assign(&mut self, rhs: CompensatedSum<T>) {
        self.add(rhs.sum);
        self.add(T::default() - rhs.correction);
    }
}

impl<T> std::iter::Sum<T> for CompensatedSum<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T>,
{
    fn sum<I: Iterator<Item = T>>(iter: I) -> Self {
        let mut acc = Self::default();
        iter.for_each(|v| acc.add(v));
        acc
    }
}

/// Compensated sum of an iterator of reals.
pub fn compensated_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values.into_iter().sum::<CompensatedSum<f64>>().value()
}

/// Compensated sum of an iterator of complex numbers.
pub fn compensated_complex_sum<I: IntoIterator<Item = Complex<f64>>>(values: I) -> Complex<f64> {
    values
        .into_iter()
        .sum::<CompensatedSum<Complex<f64>>>()
        .value()
}
