//! GF(2^8) arithmetic for secret sharing
//!
//! Field defined by the AES reduction polynomial x^8 + x^4 + x^3 + x + 1 (0x11B).
//! Multiplication and inversion go through log/antilog tables computed at compile
//! time from the generator 0x03, so they are immutable and shared freely across threads.
//!
//! Table lookups are not constant-time.

/// Low byte of the reduction polynomial (full poly: 0x11B)
const POLY: u8 = 0x1B;

/// Generator of the multiplicative group under 0x11B
pub const GENERATOR: u8 = 0x03;

struct Tables {
    /// exp[i] = g^i, doubled in length so `log a + log b` never needs a modulo
    exp: [u8; 510],
    /// log[g^i] = i; log[0] is unused
    log: [u8; 256],
}

/// Multiply by x (0x02) modulo the reduction polynomial
const fn xtime(a: u8) -> u8 {
    let shifted = a << 1;
    if a & 0x80 != 0 {
        shifted ^ POLY
    } else {
        shifted
    }
}

const fn build_tables() -> Tables {
    let mut exp = [0u8; 510];
    let mut log = [0u8; 256];

    let mut x: u8 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x;
        log[x as usize] = i as u8;
        // x * 0x03 = x * 0x02 + x
        x = xtime(x) ^ x;
        i += 1;
    }
    while i < 510 {
        exp[i] = exp[i - 255];
        i += 1;
    }

    Tables { exp, log }
}

static TABLES: Tables = build_tables();

/// Field addition (and subtraction): XOR
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field multiplication
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let idx = TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize;
    TABLES.exp[idx]
}

/// Multiplicative inverse: `a^-1 = g^(255 - log a)`
///
/// Returns `None` for zero, which has no inverse.
#[inline]
pub fn inv(a: u8) -> Option<u8> {
    if a == 0 {
        return None;
    }
    Some(TABLES.exp[255 - TABLES.log[a as usize] as usize])
}

/// Field division `a / b`; `None` when `b` is zero
#[inline]
pub fn div(a: u8, b: u8) -> Option<u8> {
    inv(b).map(|b_inv| mul(a, b_inv))
}

/// Evaluate a polynomial with the given coefficients (constant term first) at `x`
/// using Horner's method
pub fn eval_poly(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| add(mul(acc, x), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-serial reference multiplication ("Russian peasant")
    fn slow_mul(mut a: u8, mut b: u8) -> u8 {
        let mut p = 0u8;
        while b != 0 {
            if b & 1 != 0 {
                p ^= a;
            }
            a = xtime(a);
            b >>= 1;
        }
        p
    }

    #[test]
    fn test_generator_is_primitive() {
        let mut seen = [false; 256];
        for i in 0..255 {
            let v = TABLES.exp[i];
            assert!(!seen[v as usize], "g^{} repeats", i);
            seen[v as usize] = true;
        }
        assert!(!seen[0]);
    }

    #[test]
    fn test_mul_matches_reference() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                assert_eq!(mul(a, b), slow_mul(a, b), "{} * {}", a, b);
            }
        }
    }

    #[test]
    fn test_known_aes_products() {
        // FIPS-197 section 4.2 example
        assert_eq!(mul(0x57, 0x83), 0xC1);
        assert_eq!(mul(0x57, 0x13), 0xFE);
    }

    #[test]
    fn test_inverse() {
        assert_eq!(inv(0), None);
        for a in 1..=255u8 {
            let a_inv = inv(a).unwrap();
            assert_eq!(mul(a, a_inv), 1, "inverse of {}", a);
        }
        // FIPS-197 section 5.1.1: {53}^-1 = {CA}
        assert_eq!(inv(0x53), Some(0xCA));
    }

    #[test]
    fn test_div() {
        assert_eq!(div(7, 0), None);
        for a in 0..=255u8 {
            for b in 1..=255u8 {
                let q = div(a, b).unwrap();
                assert_eq!(mul(q, b), a);
            }
        }
    }

    #[test]
    fn test_eval_poly() {
        // f(x) = 5 + 3x + 2x^2
        let coeffs = [5u8, 3, 2];
        for x in 0..=255u8 {
            let expected = 5 ^ mul(3, x) ^ mul(2, mul(x, x));
            assert_eq!(eval_poly(&coeffs, x), expected);
        }
        assert_eq!(eval_poly(&coeffs, 0), 5);
    }
}
