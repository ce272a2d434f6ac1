//! Mixed-radix digit extraction.
//!
//! Both the U4B payload and user-defined extended telemetry pack several
//! fields into one integer as digits of varying radix. A field is pulled
//! out as `floor(raw / divisor) mod modulus` and mapped to a physical value
//! with `offset + digit * slope`.

use serde::Serialize;

/// Exclusive upper bound of every opaque telemetry integer, and the largest
/// `divisor * modulus` product an extractor or filter may use.
pub const RAW_CEILING: u64 = 194_756_140_800;

/// `floor(raw / divisor) mod modulus`.
#[inline]
pub fn digit(raw: u64, divisor: u64, modulus: u64) -> u64 {
    (raw / divisor) % modulus
}

/// One field of a mixed-radix integer mapped to a physical value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extractor {
    pub divisor: u64,
    pub modulus: u64,
    pub offset: f64,
    pub slope: f64,
}

impl Extractor {
    pub const fn new(divisor: u64, modulus: u64, offset: f64, slope: f64) -> Self {
        Extractor {
            divisor,
            modulus,
            offset,
            slope,
        }
    }

    #[inline]
    pub fn digit(&self, raw: u64) -> u64 {
        digit(raw, self.divisor, self.modulus)
    }

    #[inline]
    pub fn value(&self, raw: u64) -> f64 {
        self.offset + self.digit(raw) as f64 * self.slope
    }

    /// Divisor implied for the next field in a chained decomposition.
    pub fn next_divisor(&self) -> u64 {
        self.divisor.saturating_mul(self.modulus)
    }
}

// ---------------------------------------------------------------------------
// Character digits
// ---------------------------------------------------------------------------

/// Alphabets used when reading digits out of callsigns and locators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    /// `0`-`9`, radix 10.
    Digits,
    /// `A`-`Z`, radix 26.
    Letters,
    /// `A`-`R`, radix 18 (Maidenhead field).
    Field,
    /// `0`-`9` then `A`-`Z`, radix 36.
    Alphanumeric,
}

impl Alphabet {
    pub const fn radix(self) -> u64 {
        match self {
            Alphabet::Digits => 10,
            Alphabet::Letters => 26,
            Alphabet::Field => 18,
            Alphabet::Alphanumeric => 36,
        }
    }

    /// Digit value of `c` in this alphabet. Case-insensitive.
    pub fn value(self, c: u8) -> Option<u64> {
        let c = c.to_ascii_uppercase();
        let v = match (self, c) {
            (Alphabet::Digits, b'0'..=b'9') => c - b'0',
            (Alphabet::Letters, b'A'..=b'Z') => c - b'A',
            (Alphabet::Field, b'A'..=b'R') => c - b'A',
            (Alphabet::Alphanumeric, b'0'..=b'9') => c - b'0',
            (Alphabet::Alphanumeric, b'A'..=b'Z') => c - b'A' + 10,
            _ => return None,
        };
        Some(v as u64)
    }
}

/// Fold digits, most significant first, into one integer.
///
/// Returns `None` if any digit is out of range for its radix.
pub fn compose(digits: &[(u64, u64)]) -> Option<u64> {
    digits.iter().try_fold(0u64, |acc, &(value, radix)| {
        if value >= radix {
            return None;
        }
        acc.checked_mul(radix)?.checked_add(value)
    })
}

/// Read the characters at `positions` of `text` as digits of the given
/// alphabets and fold them into one integer.
pub fn compose_chars(text: &str, layout: &[(usize, Alphabet)]) -> Option<u64> {
    let bytes = text.as_bytes();
    let digits = layout
        .iter()
        .map(|&(pos, alphabet)| {
            let c = *bytes.get(pos)?;
            Some((alphabet.value(c)?, alphabet.radix()))
        })
        .collect::<Option<Vec<_>>>()?;
    compose(&digits)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit() {
        assert_eq!(digit(1234, 1, 10), 4);
        assert_eq!(digit(1234, 10, 10), 3);
        assert_eq!(digit(1234, 1000, 10), 1);
    }

    #[test]
    fn test_extractor_value() {
        let temp = Extractor::new(6720, 90, -50.0, 1.0);
        assert_eq!(temp.value(6720 * 75), 25.0);
        assert_eq!(temp.next_divisor(), 604800);
    }

    #[test]
    fn test_alphabet_values() {
        assert_eq!(Alphabet::Alphanumeric.value(b'9'), Some(9));
        assert_eq!(Alphabet::Alphanumeric.value(b'a'), Some(10));
        assert_eq!(Alphabet::Field.value(b'R'), Some(17));
        assert_eq!(Alphabet::Field.value(b'S'), None);
        assert_eq!(Alphabet::Letters.value(b'5'), None);
        assert_eq!(Alphabet::Digits.value(b'X'), None);
    }

    #[test]
    fn test_compose() {
        assert_eq!(compose(&[(1, 10), (2, 10), (3, 10)]), Some(123));
        assert_eq!(compose(&[(1, 36), (0, 26)]), Some(26));
        assert_eq!(compose(&[(10, 10)]), None);
    }

    #[test]
    fn test_compose_chars() {
        let layout = [(0, Alphabet::Field), (1, Alphabet::Field), (2, Alphabet::Digits)];
        assert_eq!(compose_chars("BC7", &layout), Some((18 + 2) * 10 + 7));
        assert_eq!(compose_chars("BC", &layout), None);
        assert_eq!(compose_chars("SC7", &layout), None);
    }

    #[test]
    fn test_ceiling_is_largest_packed_value() {
        // 36 * 26^3 callsign values times 615600 locator/power values,
        // halved for the parity bit.
        assert_eq!(36 * 26 * 26 * 26 * 615_600 / 2, RAW_CEILING);
    }
}
