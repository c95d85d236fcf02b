//! Lossy fixed-point compression of bounded floats.
//!
//! A value known to live in `[lo, hi]` rides the wire as an integer
//! code in `[0, 2^bits - 1]`. The maps are linear and the cast
//! truncates, so the reconstruction error is strictly below one code
//! step: `(hi - lo) / (2^bits - 1)`.
//!
//! Composite packers concatenate independently quantized components
//! into a single `u32` carrier. The bit budget is checked at compile
//! time; asking for more component bits than the carrier holds fails
//! the build, not the session.

use petri_shared::math::Vec2;

/// Quantizes `value` from `[lo, hi]` into a `bits`-wide code.
///
/// Out-of-range inputs are clamped first. `bits` must be in `1..=31`.
#[must_use]
pub fn pack_float(value: f32, lo: f32, hi: f32, bits: u32) -> u32 {
    debug_assert!(bits >= 1 && bits < 32);
    let steps = (1u32 << bits) - 1;
    let normalized = (value.clamp(lo, hi) - lo) / (hi - lo);
    (steps as f32 * normalized) as u32
}

/// Inverse of [`pack_float`]: maps a code back into `[lo, hi]`.
#[must_use]
pub fn unpack_float(code: u32, lo: f32, hi: f32, bits: u32) -> f32 {
    debug_assert!(bits >= 1 && bits < 32);
    let steps = (1u32 << bits) - 1;
    code as f32 / steps as f32 * (hi - lo) + lo
}

const fn component_mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

/// Two independently quantized components in one `u32`:
/// `x << BY | y`.
pub struct Packed2<const BX: u32, const BY: u32>;

impl<const BX: u32, const BY: u32> Packed2<BX, BY> {
    const FITS: () = assert!(BX + BY <= 32, "component bits exceed the u32 carrier");

    /// Packs both components of `value` over the per-axis bounds.
    #[must_use]
    pub fn pack(value: Vec2, lo: Vec2, hi: Vec2) -> u32 {
        let () = Self::FITS;
        (pack_float(value.x, lo.x, hi.x, BX) << BY) | pack_float(value.y, lo.y, hi.y, BY)
    }

    /// Unpacks a carrier word back into per-axis values.
    #[must_use]
    pub fn unpack(code: u32, lo: Vec2, hi: Vec2) -> Vec2 {
        let () = Self::FITS;
        Vec2::new(
            unpack_float((code >> BY) & component_mask(BX), lo.x, hi.x, BX),
            unpack_float(code & component_mask(BY), lo.y, hi.y, BY),
        )
    }
}

/// Three independently quantized components in one `u32`:
/// `x << (BY + BZ) | y << BZ | z`.
pub struct Packed3<const BX: u32, const BY: u32, const BZ: u32>;

impl<const BX: u32, const BY: u32, const BZ: u32> Packed3<BX, BY, BZ> {
    const FITS: () = assert!(BX + BY + BZ <= 32, "component bits exceed the u32 carrier");

    /// Packs three components over per-component bounds.
    #[must_use]
    pub fn pack(value: [f32; 3], lo: [f32; 3], hi: [f32; 3]) -> u32 {
        let () = Self::FITS;
        (pack_float(value[0], lo[0], hi[0], BX) << (BY + BZ))
            | (pack_float(value[1], lo[1], hi[1], BY) << BZ)
            | pack_float(value[2], lo[2], hi[2], BZ)
    }

    /// Unpacks a carrier word back into three components.
    #[must_use]
    pub fn unpack(code: u32, lo: [f32; 3], hi: [f32; 3]) -> [f32; 3] {
        let () = Self::FITS;
        [
            unpack_float((code >> (BY + BZ)) & component_mask(BX), lo[0], hi[0], BX),
            unpack_float((code >> BZ) & component_mask(BY), lo[1], hi[1], BY),
            unpack_float(code & component_mask(BZ), lo[2], hi[2], BZ),
        ]
    }
}
