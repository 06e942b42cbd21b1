/// Trait for linearly interpolating between two values.
pub trait Lerp {
    /// Creates a value between `self` and `other` by linearly interpolating
    /// them, according to a t value.
    fn lerp(self, other: Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(self, other: Self, t: f64) -> Self {
        ((1.0 - t) * self) + (t * other)
    }
}

impl Lerp for f32 {
    fn lerp(self, other: Self, t: f64) -> Self {
        let t = t as f32;
        ((1.0 - t) * self) + (t * other)
    }
}

impl<T: Lerp + Copy, const N: usize> Lerp for [T; N] {
    fn lerp(self, other: Self, t: f64) -> Self {
        let mut result = self;
        for (r, o) in result.iter_mut().zip(other) {
            *r = r.lerp(o, t);
        }
        result
    }
}

/// Trait for types that can invert a linear interpolation.
pub trait InverseLerp {
    /// Inverse of [`Lerp::lerp`].
    fn inv_lerp(self, start: Self, end: Self) -> f64;
}

impl InverseLerp for f64 {
    fn inv_lerp(self, start: Self, end: Self) -> f64 {
        (self - start) / (end - start)
    }
}

impl InverseLerp for f32 {
    fn inv_lerp(self, start: Self, end: Self) -> f64 {
        (self as f64).inv_lerp(start as f64, end as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_lerp_undoes_lerp() {
        let v = 2.0f64.lerp(6.0, 0.25);
        assert_eq!(v, 3.0);
        assert_eq!(v.inv_lerp(2.0, 6.0), 0.25);

        let c = [0.0f32, 1.0].lerp([1.0, 0.0], 0.5);
        assert_eq!(c, [0.5, 0.5]);
    }
}
