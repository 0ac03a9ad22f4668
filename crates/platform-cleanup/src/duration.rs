//! Lifetime parsing

use std::time::Duration;

/// Parse a lifetime such as `30s`, `15m`, `24h`, `7d` or `1d12h`
///
/// Every number needs a unit. Returns a description of the problem on
/// failure.
pub fn parse_lifetime(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty lifetime".to_string());
    }

    let mut total: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit after {:?}", rest))?;
        if digits == 0 {
            return Err(format!("expected a number at {:?}", rest));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("number too large in {:?}", s))?;

        let unit_char = rest[digits..].chars().next().unwrap_or_default();
        let unit = match unit_char {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            other => return Err(format!("unknown unit {:?} (expected d, h, m or s)", other)),
        };
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("lifetime {:?} is too long", s))?;
        rest = &rest[digits + unit_char.len_utf8()..];
    }
    Ok(Duration::from_secs(total))
}
