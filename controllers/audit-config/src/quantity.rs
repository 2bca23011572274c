//! Kubernetes resource quantity parsing
//!
//! Quantities are compared by value, not by spelling: `100m` and `0.1` are
//! the same CPU amount, `128Mi` and `134217728` the same memory amount.
//! Values are normalized to nano-units in an `i128`, which covers every
//! suffix up to `Ei` exactly. Precision below one nano-unit rounds up, as the
//! API server does.

use std::fmt;

const NANO: i128 = 1_000_000_000;

/// A parsed quantity, in nano-units of the base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i128);

/// A string that is not a valid quantity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityError(String);

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quantity '{}'", self.0)
    }
}

impl std::error::Error for QuantityError {}

impl Quantity {
    /// Zero of any resource
    pub const ZERO: Quantity = Quantity(0);

    /// Value in nano-units
    pub fn nanos(self) -> i128 {
        self.0
    }

    /// Parse the Kubernetes quantity grammar: an optionally signed decimal
    /// number followed by a binary suffix (`Ki`..`Ei`), a decimal suffix
    /// (`n`, `u`, `m`, `k`, `M`..`E`) or a decimal exponent (`e3`, `E-2`).
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let err = || QuantityError(input.to_string());
        let s = input.trim();
        if s.is_empty() {
            return Err(err());
        }

        let (negative, s) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(number_end);
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(err());
        }

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));

        // mantissa * 10^(exp10) * 2^(exp2), with mantissa holding all digits
        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(err)?;
        }
        let frac_digits = i32::try_from(frac_part.len()).map_err(|_| err())?;
        let (suffix_exp10, exp2) = suffix_exponents(suffix).ok_or_else(err)?;

        // shift to nano-units
        let exp10 = suffix_exp10 - frac_digits + 9;
        let mut value = mantissa;
        value = value.checked_mul(1_i128 << exp2).ok_or_else(err)?;
        if exp10 >= 0 {
            let scale = 10_i128.checked_pow(u32::try_from(exp10).map_err(|_| err())?).ok_or_else(err)?;
            value = value.checked_mul(scale).ok_or_else(err)?;
        } else {
            // round up anything finer than a nano-unit
            value = match 10_i128.checked_pow(u32::try_from(-exp10).map_err(|_| err())?) {
                Some(scale) => value / scale + i128::from(value % scale != 0),
                None => i128::from(value != 0),
            };
        }

        Ok(Quantity(if negative { -value } else { value }))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / NANO;
        let frac = (self.0 % NANO).abs();
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let digits = format!("{frac:09}");
            write!(f, "{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

/// (decimal exponent, binary exponent) for a suffix
fn suffix_exponents(suffix: &str) -> Option<(i32, u32)> {
    let pair = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        exp => {
            let digits = exp.strip_prefix('e').or_else(|| exp.strip_prefix('E'))?;
            let value: i32 = digits.parse().ok()?;
            if !(-18..=18).contains(&value) {
                return None;
            }
            (value, 0)
        }
    };
    Some(pair)
}

/// Compare two quantity strings by value. Missing values count as zero;
/// unparsable values only equal an identical string.
pub fn quantities_equal(a: Option<&str>, b: Option<&str>) -> bool {
    let parse = |v: Option<&str>| v.map_or(Ok(Quantity::ZERO), Quantity::parse);
    match (parse(a), parse(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.map(str::trim) == b.map(str::trim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    #[test]
    fn test_cpu_millis_equal_decimal() {
        assert_eq!(q("100m"), q("0.1"));
        assert_eq!(q("1"), q("1000m"));
        assert_eq!(q("1.5"), q("1500m"));
    }

    #[test]
    fn test_memory_binary_suffix_equal_bytes() {
        assert_eq!(q("128Mi"), q("134217728"));
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_eq!(q("1Ki"), q("1024"));
    }

    #[test]
    fn test_decimal_suffixes_and_exponents() {
        assert_eq!(q("1k"), q("1000"));
        assert_eq!(q("1M"), q("1e6"));
        assert_eq!(q("1G"), q("1E9"));
        assert_eq!(q("12e-3"), q("12m"));
        assert_eq!(q("500u"), q("500000n"));
    }

    #[test]
    fn test_binary_and_decimal_differ() {
        assert_ne!(q("1Mi"), q("1M"));
        assert!(q("1Mi") > q("1M"));
    }

    #[test]
    fn test_sub_nano_rounds_up() {
        assert_eq!(q("0.0000000001"), q("1n"));
    }

    #[test]
    fn test_very_long_fraction() {
        let tiny = format!("0.{}2", "0".repeat(47));
        assert_eq!(q(&tiny), q("1n"));
        assert_eq!(q(&format!("0.{}", "0".repeat(60))), Quantity::ZERO);
        assert!(!quantities_equal(Some(&tiny), Some("0")));
        assert!(quantities_equal(Some(&tiny), Some("1n")));
    }

    #[test]
    fn test_sign_and_whitespace() {
        assert_eq!(q(" +2 "), q("2"));
        assert_eq!(q("-1").nanos(), -NANO);
    }

    #[test]
    fn test_invalid() {
        for bad in ["", "m", "1.2.3", "1Xi", "abc", ".", "1e99", "--1"] {
            assert!(Quantity::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(q("100m").to_string(), "0.1");
        assert_eq!(q("2Ki").to_string(), "2048");
    }

    #[test]
    fn test_quantities_equal_handles_missing_and_garbage() {
        assert!(quantities_equal(Some("100m"), Some("0.1")));
        assert!(quantities_equal(None, Some("0")));
        assert!(!quantities_equal(None, Some("1")));
        assert!(quantities_equal(Some("junk"), Some("junk")));
        assert!(!quantities_equal(Some("junk"), Some("1")));
    }
}
