// Numeric cell parsing shared by every stage that reads measurements.
// One grammar, no locale lookups, so two engines agree on what is a number.

/// Classification of a raw cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericCell {
    /// Null or blank after trimming. Not a defect.
    Absent,
    Value(f64),
    /// Text that is not a number under [`parse_numeric`]. Counted as a defect.
    Invalid,
}

impl NumericCell {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

pub fn classify(cell: Option<&str>) -> NumericCell {
    match cell.map(str::trim) {
        None | Some("") => NumericCell::Absent,
        Some(s) => match parse_numeric(s) {
            Some(v) => NumericCell::Value(v),
            None => NumericCell::Invalid,
        },
    }
}

/// Parse a measurement string:
/// - Trim whitespace; optional leading `+`/`-`
/// - `,` allowed only as a thousands separator in the integer part,
///   in groups of exactly three digits (`1,234.5`, `12,345,678`)
/// - Optional fraction and exponent (`2.5e-3`)
/// - Returns None for empty input, `inf`/`nan`, or anything else
pub fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (sign, body) = match trimmed.as_bytes()[0] {
        b'-' => ("-", &trimmed[1..]),
        b'+' => ("", &trimmed[1..]),
        _ => ("", trimmed),
    };

    // Split off exponent first so its digits are not mistaken for grouping.
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };

    let int_digits = strip_grouping(int_part)?;
    if let Some(frac) = frac_part {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if int_digits.is_empty() && frac.is_empty() {
            return None;
        }
    } else if int_digits.is_empty() {
        return None;
    }

    if let Some(exp) = exponent {
        let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let mut cleaned = String::with_capacity(trimmed.len());
    cleaned.push_str(sign);
    cleaned.push_str(&int_digits);
    if let Some(frac) = frac_part {
        cleaned.push('.');
        cleaned.push_str(frac);
    }
    if let Some(exp) = exponent {
        cleaned.push('e');
        cleaned.push_str(exp);
    }

    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Remove thousands separators; None if grouping is malformed or non-digits appear.
fn strip_grouping(int_part: &str) -> Option<String> {
    if !int_part.contains(',') {
        return int_part
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| int_part.to_string());
    }

    let mut groups = int_part.split(',');
    let head = groups.next()?;
    if head.is_empty() || head.len() > 3 || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut out = head.to_string();
    for group in groups {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}
