//! Floating-point widths without native Rust types.

/// Converts the bits of an IEEE-754 binary16 value to `f32`.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 == 0 { 1.0 } else { -1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let fraction = f32::from(bits & 0x03ff);

    match exponent {
        // Subnormal, or signed zero.
        0 => sign * fraction * 2f32.powi(-24),
        0x1f if fraction == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + fraction / 1024.0) * 2f32.powi(exponent - 15),
    }
}

/// Converts the ten bytes of an 80-bit x87 extended precision value, sign and
/// exponent first, to `f64`.
///
/// AIFF stores its sample rate this way. Precision beyond 53 mantissa bits is lost.
pub fn f80_to_f64(raw: [u8; 10]) -> f64 {
    let sign_exp = u16::from_be_bytes([raw[0], raw[1]]);
    let mut mantissa_bytes = [0u8; 8];
    mantissa_bytes.copy_from_slice(&raw[2..]);
    let mantissa = u64::from_be_bytes(mantissa_bytes);

    let sign = if sign_exp & 0x8000 == 0 { 1.0 } else { -1.0 };
    let exponent = i32::from(sign_exp & 0x7fff);

    if exponent == 0 && mantissa == 0 {
        return sign * 0.0;
    }

    if exponent == 0x7fff {
        // The explicit integer bit is ignored: all-zero fraction means infinity.
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }

    // The mantissa carries an explicit integer bit, so it is scaled by 2^-63.
    // Split the scaling so that large and tiny exponents do not overflow early.
    let unbiased = exponent - 16383 - 63;
    let half = unbiased / 2;
    sign * (mantissa as f64) * 2f64.powi(half) * 2f64.powi(unbiased - half)
}
