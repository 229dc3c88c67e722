//! Reduction operators the scan engine can be instantiated with.
//!
//! A [`ScanOp`] ties together the host element type, its WGSL spelling, the
//! associative combine expression and the identity element.  The WGSL
//! strings are substituted verbatim into the generated kernels, while the
//! host functions drive the CPU oracle in [`crate::reference`] and the
//! identity fill of the auxiliary buffer.
//!
//! The operator must be associative and `identity()` must satisfy
//! `combine(identity(), x) == x` for every `x`.  Commutativity is not
//! required: every kernel combines as `combine(prefix, value)`.

use std::fmt::Debug;

use bytemuck::Pod;

/// An associative binary operator with an identity, expressed both in WGSL
/// and on the host.
pub trait ScanOp: 'static {
    /// Host representation of one element.  Its size is the element stride
    /// used for all capacity arithmetic.
    type Element: Pod + PartialEq + Debug + Send + Sync;

    /// WGSL type name of one element, e.g. `f32`.
    const WGSL_TYPE: &'static str;

    /// WGSL expression over `a` (left operand) and `b` (right operand).
    const WGSL_COMBINE: &'static str;

    /// WGSL literal of the identity element.
    const WGSL_IDENTITY: &'static str;

    /// WGSL placed ahead of the kernels, for struct element types or helper
    /// functions referenced by [`Self::WGSL_COMBINE`].
    const WGSL_HEADER: &'static str = "";

    /// Host value of the identity element.
    fn identity() -> Self::Element;

    /// Host mirror of [`Self::WGSL_COMBINE`].
    fn combine(a: Self::Element, b: Self::Element) -> Self::Element;
}

/// Addition over 32-bit floats, identity `0.0`.  The default operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddF32;

impl ScanOp for AddF32 {
    type Element = f32;
    const WGSL_TYPE: &'static str = "f32";
    const WGSL_COMBINE: &'static str = "a + b";
    const WGSL_IDENTITY: &'static str = "0.0";

    fn identity() -> f32 {
        0.0
    }

    fn combine(a: f32, b: f32) -> f32 {
        a + b
    }
}

/// Wrapping addition over unsigned 32-bit integers, identity `0`.
///
/// This is the operator for histogram compaction: scanning per-bucket
/// counts yields bucket offsets.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddU32;

impl ScanOp for AddU32 {
    type Element = u32;
    const WGSL_TYPE: &'static str = "u32";
    const WGSL_COMBINE: &'static str = "a + b";
    const WGSL_IDENTITY: &'static str = "0u";

    fn identity() -> u32 {
        0
    }

    // WGSL integer arithmetic wraps on overflow.
    fn combine(a: u32, b: u32) -> u32 {
        a.wrapping_add(b)
    }
}

/// Wrapping addition over signed 32-bit integers, identity `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddI32;

impl ScanOp for AddI32 {
    type Element = i32;
    const WGSL_TYPE: &'static str = "i32";
    const WGSL_COMBINE: &'static str = "a + b";
    const WGSL_IDENTITY: &'static str = "0i";

    fn identity() -> i32 {
        0
    }

    fn combine(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }
}

/// Running maximum over finite 32-bit floats.
///
/// WGSL has no infinity literal, so the identity is the lowest finite
/// `f32`.  Inputs of negative infinity or NaN are outside the contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxF32;

impl ScanOp for MaxF32 {
    type Element = f32;
    const WGSL_TYPE: &'static str = "f32";
    const WGSL_COMBINE: &'static str = "max(a, b)";
    const WGSL_IDENTITY: &'static str = "-3.40282347e+38";

    fn identity() -> f32 {
        f32::MIN
    }

    fn combine(a: f32, b: f32) -> f32 {
        a.max(b)
    }
}

/// Running minimum over unsigned 32-bit integers, identity `u32::MAX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinU32;

impl ScanOp for MinU32 {
    type Element = u32;
    const WGSL_TYPE: &'static str = "u32";
    const WGSL_COMBINE: &'static str = "min(a, b)";
    const WGSL_IDENTITY: &'static str = "4294967295u";

    fn identity() -> u32 {
        u32::MAX
    }

    fn combine(a: u32, b: u32) -> u32 {
        a.min(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_identity<Op: ScanOp>(samples: &[Op::Element]) {
        for &x in samples {
            assert_eq!(Op::combine(Op::identity(), x), x);
            assert_eq!(Op::combine(x, Op::identity()), x);
        }
    }

    #[test]
    fn identities_are_neutral() {
        assert_identity::<AddF32>(&[0.0, 1.5, -2.25, 1e6]);
        assert_identity::<AddU32>(&[0, 1, 7, u32::MAX]);
        assert_identity::<AddI32>(&[0, -1, 42, i32::MIN, i32::MAX]);
        assert_identity::<MaxF32>(&[0.0, -1.0, 3.5, f32::MIN, f32::MAX]);
        assert_identity::<MinU32>(&[0, 9, u32::MAX]);
    }

    #[test]
    fn integer_addition_wraps_like_wgsl() {
        assert_eq!(AddU32::combine(u32::MAX, 2), 1);
        assert_eq!(AddI32::combine(i32::MAX, 1), i32::MIN);
    }

    #[test]
    fn wgsl_identity_literals_match_host_values() {
        assert_eq!(MinU32::WGSL_IDENTITY.trim_end_matches('u').parse::<u32>().unwrap(), MinU32::identity());
        assert_eq!(MaxF32::WGSL_IDENTITY.parse::<f32>().unwrap(), MaxF32::identity());
    }
}
