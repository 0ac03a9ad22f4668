//! Exact resource quantities
//!
//! Kubernetes quantities ("500m", "2Gi", "1.5", "3e2") are held as a signed
//! count of nano-units so repeated addition and subtraction never drift.
//! Values finer than one nano-unit are rounded up, the same way the API
//! server canonicalizes them. Arithmetic saturates instead of overflowing.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Decimal suffixes and their power-of-ten exponent, largest first
const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("E", 18),
    ("P", 15),
    ("T", 12),
    ("G", 9),
    ("M", 6),
    ("k", 3),
    ("", 0),
    ("m", -3),
    ("u", -6),
    ("n", -9),
];

/// Binary suffixes and their power-of-two exponent, largest first
const BINARY_SUFFIXES: &[(&str, u32)] = &[
    ("Ei", 60),
    ("Pi", 50),
    ("Ti", 40),
    ("Gi", 30),
    ("Mi", 20),
    ("Ki", 10),
];

/// How a quantity was written, and therefore how it is rendered back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantityFormat {
    /// Power-of-ten suffixes: m, k, M, G...
    #[default]
    DecimalSI,
    /// Power-of-two suffixes: Ki, Mi, Gi...
    BinarySI,
    /// Scientific notation: 1e3, 5E-3
    DecimalExponent,
}

/// A signed, exact resource amount
///
/// Equality, ordering and hashing look only at the numeric value, so
/// `1Gi == 1073741824` and `1 == 1000m`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceQuantity {
    nanos: i128,
    format: QuantityFormat,
}

impl ResourceQuantity {
    /// The zero quantity
    pub const ZERO: ResourceQuantity = ResourceQuantity {
        nanos: 0,
        format: QuantityFormat::DecimalSI,
    };

    /// Parse a quantity attached to a named resource, for error reporting
    pub fn parse_for(resource: &str, value: &str) -> Result<Self, Error> {
        parse(value).map_err(|msg| Error::invalid_quantity(resource, value, msg))
    }

    /// Convert from the Kubernetes wire type
    pub fn from_k8s(resource: &str, quantity: &Quantity) -> Result<Self, Error> {
        Self::parse_for(resource, &quantity.0)
    }

    /// Convert to the Kubernetes wire type using the canonical rendering
    pub fn to_k8s(&self) -> Quantity {
        Quantity(self.to_string())
    }

    /// The value in nano-units
    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    /// The rendering format
    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// True if the value is exactly zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// True if the value is below zero
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    fn with_nanos(self, other: &Self, nanos: i128) -> Self {
        // A zero left operand adopts the other side's format so that
        // 0 + 2Gi renders as 2Gi rather than 2147483648
        let format = if self.nanos == 0 {
            other.format
        } else {
            self.format
        };
        Self { nanos, format }
    }
}

impl PartialEq for ResourceQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for ResourceQuantity {}

impl Hash for ResourceQuantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl PartialOrd for ResourceQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Add for ResourceQuantity {
    type Output = ResourceQuantity;

    fn add(self, rhs: Self) -> Self::Output {
        self.with_nanos(&rhs, self.nanos.saturating_add(rhs.nanos))
    }
}

impl Sub for ResourceQuantity {
    type Output = ResourceQuantity;

    fn sub(self, rhs: Self) -> Self::Output {
        self.with_nanos(&rhs, self.nanos.saturating_sub(rhs.nanos))
    }
}

impl Neg for ResourceQuantity {
    type Output = ResourceQuantity;

    fn neg(self) -> Self::Output {
        Self {
            nanos: self.nanos.saturating_neg(),
            format: self.format,
        }
    }
}

impl FromStr for ResourceQuantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_for("quantity", s)
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        let sign = if self.nanos < 0 { "-" } else { "" };
        let abs = self.nanos.unsigned_abs();

        if self.format == QuantityFormat::BinarySI {
            if let Some((units, suffix)) = binary_repr(abs) {
                return write!(f, "{}{}{}", sign, units, suffix);
            }
        }

        // Largest power of ten (in steps of three) that keeps the mantissa integral
        for &(suffix, exp) in DECIMAL_SUFFIXES {
            let divisor = 10u128.pow((exp + 9) as u32);
            if abs % divisor == 0 {
                let mantissa = abs / divisor;
                return match self.format {
                    QuantityFormat::DecimalExponent if exp != 0 => {
                        write!(f, "{}{}e{}", sign, mantissa, exp)
                    }
                    _ => write!(f, "{}{}{}", sign, mantissa, suffix),
                };
            }
        }
        // Unreachable: every value is a whole number of nano-units
        write!(f, "{}{}n", sign, abs)
    }
}

/// Render a binary quantity, or `None` when it has to fall back to decimal
fn binary_repr(abs_nanos: u128) -> Option<(u128, &'static str)> {
    let nanos = NANOS_PER_UNIT as u128;
    if abs_nanos % nanos != 0 {
        return None;
    }
    let units = abs_nanos / nanos;
    if units < 1024 {
        return None;
    }
    for &(suffix, shift) in BINARY_SUFFIXES {
        let divisor = 1u128 << shift;
        if units % divisor == 0 {
            return Some((units / divisor, suffix));
        }
    }
    Some((units, ""))
}

fn parse(input: &str) -> Result<ResourceQuantity, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty quantity".to_string());
    }

    let (negative, rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_len);

    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err("missing numeric value".to_string());
    }
    if frac.contains('.') {
        return Err("more than one decimal point".to_string());
    }

    let digits = format!("{}{}", whole, frac);
    let digits = digits.trim_start_matches('0');
    let mantissa: u128 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| "numeric value is too large".to_string())?
    };
    let frac_len = frac.len() as i32;

    let (format, decimal_exp, binary_shift) = parse_suffix(suffix)?;

    // value = mantissa * 10^(decimal_exp - frac_len) * 2^binary_shift, in nano-units
    let scaled = mantissa
        .checked_mul(1u128 << binary_shift)
        .ok_or_else(|| "numeric value is too large".to_string())?;
    let abs = scale_pow10(scaled, decimal_exp - frac_len + 9)?;
    let nanos = i128::try_from(abs).map_err(|_| "numeric value is too large".to_string())?;

    Ok(ResourceQuantity {
        nanos: if negative { -nanos } else { nanos },
        format,
    })
}

fn parse_suffix(suffix: &str) -> Result<(QuantityFormat, i32, u32), String> {
    if let Some(&(_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((QuantityFormat::BinarySI, 0, shift));
    }
    if let Some(&(_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((QuantityFormat::DecimalSI, exp, 0));
    }
    // Bare "E" is exa and was matched above, so e/E followed by more is an exponent
    if let Some(exp) = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
    {
        let exp: i32 = exp
            .parse()
            .map_err(|_| format!("invalid exponent {:?}", suffix))?;
        return Ok((QuantityFormat::DecimalExponent, exp, 0));
    }
    Err(format!("unknown suffix {:?}", suffix))
}

/// Multiply by 10^exp, or divide rounding up when exp is negative
fn scale_pow10(value: u128, exp: i32) -> Result<u128, String> {
    if value == 0 {
        return Ok(0);
    }
    if exp >= 0 {
        let factor = 10u128
            .checked_pow(exp as u32)
            .ok_or_else(|| "numeric value is too large".to_string())?;
        value
            .checked_mul(factor)
            .ok_or_else(|| "numeric value is too large".to_string())
    } else {
        match 10u128.checked_pow(exp.unsigned_abs()) {
            Some(divisor) => Ok(value.div_ceil(divisor)),
            // Smaller than one nano-unit: rounds up to the smallest step
            None => Ok(1),
        }
    }
}
