use super::{Field, Value};
use crate::error::{EdiError, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::iter::Peekable;
use std::str::Chars;

/// Largest printf width or precision accepted.
const MAX_FIELD: usize = 1024;

/// Render a field's value as text.
///
/// Without a format the canonical text is returned. Date fields take a
/// strftime pattern; every other type takes a printf-style pattern whose
/// conversions all render the same value. Null fields render as "".
pub fn format_value(format: Option<&str>, field: &Field) -> Result<String> {
    let Some(value) = field.value() else {
        return Ok(String::new());
    };
    match format {
        None => Ok(value.to_text()),
        Some(fmt) => match value {
            Value::Date(date) => format_date(fmt, date),
            _ => printf(fmt, value),
        },
    }
}

fn format_date(fmt: &str, date: &DateTime<Utc>) -> Result<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(EdiError::InvalidFormat(format!("bad date format '{fmt}'")));
    }
    let mut out = String::new();
    write!(out, "{}", date.format_with_items(items.iter()))
        .map_err(|_| EdiError::InvalidFormat(format!("cannot render date with '{fmt}'")))?;
    Ok(out)
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    conv: char,
}

fn printf(fmt: &str, value: &Value) -> Result<String> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let spec = parse_spec(&mut chars, fmt)?;
        out.push_str(&render(&spec, value)?);
    }
    Ok(out)
}

fn parse_spec(chars: &mut Peekable<Chars<'_>>, fmt: &str) -> Result<Spec> {
    let mut spec = Spec::default();

    while let Some(&c) = chars.peek() {
        match c {
            '-' => spec.left = true,
            '+' => spec.plus = true,
            ' ' => spec.space = true,
            '0' => spec.zero = true,
            '#' => spec.alt = true,
            _ => break,
        }
        chars.next();
    }
    spec.width = take_number(chars);
    if chars.peek() == Some(&'.') {
        chars.next();
        spec.precision = Some(take_number(chars));
    }
    if spec.width > MAX_FIELD || spec.precision.is_some_and(|p| p > MAX_FIELD) {
        return Err(EdiError::InvalidFormat(format!(
            "width or precision over {MAX_FIELD} in '{fmt}'"
        )));
    }

    match chars.next() {
        Some(c @ ('d' | 'i' | 'u' | 'x' | 'X' | 'o' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 's')) => {
            spec.conv = c;
            Ok(spec)
        }
        _ => Err(EdiError::InvalidFormat(format!("bad format spec in '{fmt}'"))),
    }
}

fn take_number(chars: &mut Peekable<Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n
}

fn render(spec: &Spec, value: &Value) -> Result<String> {
    let mismatch = || {
        EdiError::InvalidFormat(format!(
            "cannot format {} value with %{}",
            value.type_tag(),
            spec.conv
        ))
    };

    let (sign, prefix, body) = match spec.conv {
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
            let n = match value {
                Value::Int(i) => *i,
                Value::Float(f) => *f as i64,
                Value::Bool(b) => i64::from(*b),
                _ => return Err(mismatch()),
            };
            render_integer(spec, n)
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let f = value.as_f64().ok_or_else(mismatch)?;
            render_float(spec, f)
        }
        _ => {
            let text = value.to_text();
            let body = match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            };
            return Ok(pad(spec, "", "", body, false));
        }
    };

    let zero_ok = !(spec.precision.is_some() && matches!(spec.conv, 'd' | 'i' | 'u' | 'x' | 'X' | 'o'));
    Ok(pad(spec, sign, prefix, body, zero_ok))
}

fn sign_of(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn render_integer(spec: &Spec, n: i64) -> (&'static str, &'static str, String) {
    let (sign, prefix, mut digits) = match spec.conv {
        'x' => ("", if spec.alt && n != 0 { "0x" } else { "" }, format!("{:x}", n as u64)),
        'X' => ("", if spec.alt && n != 0 { "0X" } else { "" }, format!("{:X}", n as u64)),
        'o' => ("", if spec.alt && n != 0 { "0" } else { "" }, format!("{:o}", n as u64)),
        'u' => ("", "", (n as u64).to_string()),
        _ => (sign_of(spec, n < 0), "", n.unsigned_abs().to_string()),
    };
    if let Some(p) = spec.precision {
        if digits.len() < p {
            digits = format!("{}{digits}", "0".repeat(p - digits.len()));
        }
    }
    (sign, prefix, digits)
}

fn render_float(spec: &Spec, f: f64) -> (&'static str, &'static str, String) {
    let upper = spec.conv.is_ascii_uppercase();
    let sign = sign_of(spec, f.is_sign_negative() && !f.is_nan());
    let abs = f.abs();

    if !abs.is_finite() {
        let body = if abs.is_nan() { "nan" } else { "inf" };
        let body = if upper { body.to_uppercase() } else { body.to_string() };
        return (sign, "", body);
    }

    let precision = spec.precision.unwrap_or(6);
    let body = match spec.conv.to_ascii_lowercase() {
        'f' => {
            let mut s = format!("{abs:.precision$}");
            if spec.alt && precision == 0 {
                s.push('.');
            }
            s
        }
        'e' => c_exponent(abs, precision, spec.alt),
        _ => {
            let p = precision.max(1);
            let exp = decimal_exponent(abs, p - 1);
            let mut s = if exp < -4 || exp >= p as i32 {
                c_exponent(abs, p - 1, spec.alt)
            } else {
                let decimals = (p as i32 - 1 - exp).max(0) as usize;
                format!("{abs:.decimals$}")
            };
            if !spec.alt {
                s = strip_fraction_zeros(&s);
            }
            s
        }
    };
    let body = if upper { body.to_uppercase() } else { body };
    (sign, "", body)
}

/// Exponent of `x` once rounded to `precision` fractional mantissa digits.
fn decimal_exponent(x: f64, precision: usize) -> i32 {
    let precision = precision.min(MAX_FIELD);
    let s = format!("{x:.precision$e}");
    s.split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0)
}

/// C-style `%e`: mantissa, `e`, explicit sign, at least two exponent digits.
fn c_exponent(x: f64, precision: usize, alt: bool) -> String {
    let precision = precision.min(MAX_FIELD);
    let s = format!("{x:.precision$e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alt && precision == 0 { "." } else { "" };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{dot}e{exp_sign}{:02}", exp.unsigned_abs())
}

fn strip_fraction_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find('e') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{exp}")
}

fn pad(spec: &Spec, sign: &str, prefix: &str, body: String, zero_ok: bool) -> String {
    let len = sign.chars().count() + prefix.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{prefix}{body}");
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{sign}{prefix}{body}{}", " ".repeat(fill))
    } else if spec.zero && zero_ok {
        format!("{sign}{prefix}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{sign}{prefix}{body}", " ".repeat(fill))
    }
}
