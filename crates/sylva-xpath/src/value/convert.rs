//! XPath 1.0 lexical conversions between strings and numbers.
use compact_str::{CompactString, format_compact};

fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// `number(string)`: optional whitespace, optional `-`, then `Digits ('.' Digits?)?`
/// or `'.' Digits`. Everything else, including the empty string, is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(is_xml_whitespace);
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `string(number)`: no exponent notation, integral values without a fraction.
pub fn number_to_string(n: f64) -> CompactString {
    if n.is_nan() {
        CompactString::const_new("NaN")
    } else if n.is_infinite() {
        if n > 0.0 {
            CompactString::const_new("Infinity")
        } else {
            CompactString::const_new("-Infinity")
        }
    } else if n == 0.0 {
        // Covers negative zero as well.
        CompactString::const_new("0")
    } else {
        // `Display` for f64 never switches to exponent notation.
        format_compact!("{n}")
    }
}

pub fn number_to_boolean(n: f64) -> bool {
    n != 0.0 && !n.is_nan()
}
