// 🌎 Locale Value Parser
// Amounts and dates written in Brazilian or US conventions → Decimal / NaiveDate

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount '{0}'")]
    Invalid(String),
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Currency markers stripped before the numeric residue is inspected.
/// Longer markers first so "US$" is not left as "US".
const CURRENCY_MARKERS: [&str; 5] = ["US$", "R$", "BRL", "brl", "$"];

/// Parse an amount written as `1.234,56`, `1,234.56`, `-R$ 10,00`, `150,00 D`, `(45.10)`.
///
/// Separator rules:
/// - both `.` and `,` present: the right-most one is the decimal point
/// - only one kind present: it is decimal only when it occurs once and is
///   followed by 1-2 digits, otherwise it groups thousands (`1.234` → 1234)
///
/// Sign markers (leading `-`, parentheses, trailing `-`, trailing `D`) each flip
/// the sign; a trailing `C` is accepted and ignored.
pub fn parse_amount(text: &str) -> Result<Decimal, AmountError> {
    let original = text.trim();
    if original.is_empty() {
        return Err(AmountError::Empty);
    }

    let mut s = original.to_string();
    for marker in CURRENCY_MARKERS {
        s = s.replace(marker, "");
    }
    let mut s: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    let mut negative = false;

    if let Some(marker) = trailing_marker(&s) {
        if marker.eq_ignore_ascii_case(&'d') {
            negative = !negative;
        }
        s.pop();
    }

    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = !negative;
        s = s[1..s.len() - 1].to_string();
    }

    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_string();
    }

    if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest.to_string();
    }

    if s.is_empty() {
        return Err(AmountError::Invalid(original.to_string()));
    }
    if !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        || !s.chars().any(|c| c.is_ascii_digit())
    {
        return Err(AmountError::Invalid(original.to_string()));
    }

    let normalized = normalize_separators(&s).ok_or_else(|| AmountError::Invalid(original.to_string()))?;
    let value = Decimal::from_str(&normalized).map_err(|_| AmountError::Invalid(original.to_string()))?;

    Ok(if negative { -value } else { value })
}

/// A trailing D/C marker counts only when it follows a digit.
fn trailing_marker(s: &str) -> Option<char> {
    let mut chars = s.chars().rev();
    let last = chars.next()?;
    if !matches!(last, 'D' | 'd' | 'C' | 'c') {
        return None;
    }
    match chars.next() {
        Some(prev) if prev.is_ascii_digit() || prev == ')' => Some(last),
        _ => None,
    }
}

/// Rewrite to a plain `1234.56` string, or None when the separators make no sense.
fn normalize_separators(s: &str) -> Option<String> {
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');

    let decimal = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let decimal = if dot > comma { '.' } else { ',' };
            if s.matches(decimal).count() > 1 {
                return None;
            }
            Some(decimal)
        }
        (Some(_), None) => single_separator_decimal(s, '.'),
        (None, Some(_)) => single_separator_decimal(s, ','),
        (None, None) => None,
    };

    let mut out = String::with_capacity(s.len() + 1);
    for c in s.chars() {
        match c {
            '.' | ',' if Some(c) == decimal => out.push('.'),
            '.' | ',' => {}
            digit => out.push(digit),
        }
    }

    if out.starts_with('.') {
        out.insert(0, '0');
    }
    if out.ends_with('.') {
        out.pop();
    }
    Some(out)
}

fn single_separator_decimal(s: &str, sep: char) -> Option<char> {
    if s.matches(sep).count() != 1 {
        return None;
    }
    let digits_after = s.rsplit(sep).next().map(str::len).unwrap_or(0);
    if (1..=2).contains(&digits_after) {
        Some(sep)
    } else {
        None
    }
}

// ============================================================================
// DATES
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum FieldOrder {
    DayMonthYear,
    YearMonthDay,
}

#[derive(Debug, Clone, Copy)]
struct DateFormat {
    separator: char,
    order: FieldOrder,
    year_digits: usize,
}

/// Tried in order; the first format whose shape and calendar value both fit wins.
const DATE_FORMATS: [DateFormat; 5] = [
    // dd/MM/yyyy
    DateFormat { separator: '/', order: FieldOrder::DayMonthYear, year_digits: 4 },
    // dd/MM/yy
    DateFormat { separator: '/', order: FieldOrder::DayMonthYear, year_digits: 2 },
    // yyyy-MM-dd
    DateFormat { separator: '-', order: FieldOrder::YearMonthDay, year_digits: 4 },
    // dd-MM-yyyy
    DateFormat { separator: '-', order: FieldOrder::DayMonthYear, year_digits: 4 },
    // dd-MM-yy
    DateFormat { separator: '-', order: FieldOrder::DayMonthYear, year_digits: 2 },
];

impl DateFormat {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let parts: Vec<&str> = text.split(self.separator).collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
            return None;
        }

        let (day, month, year) = match self.order {
            FieldOrder::DayMonthYear => (parts[0], parts[1], parts[2]),
            FieldOrder::YearMonthDay => (parts[2], parts[1], parts[0]),
        };
        if day.len() > 2 || month.len() > 2 || year.len() != self.year_digits {
            return None;
        }

        let mut year: i32 = year.parse().ok()?;
        if self.year_digits == 2 {
            year += if year < 70 { 2000 } else { 1900 };
        }
        NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
    }
}

/// Parse a date in one of the supported layouts; None means "unparsable".
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS.iter().find_map(|format| format.parse(text))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_brazilian_and_us_conventions() {
        assert_eq!(parse_amount("1.234,56").unwrap(), d("1234.56"));
        assert_eq!(parse_amount("1,234.56").unwrap(), d("1234.56"));
        assert_eq!(parse_amount("1.234").unwrap(), d("1234"));
        assert_eq!(parse_amount("1.234.567,89").unwrap(), d("1234567.89"));
        assert_eq!(parse_amount("150,00").unwrap(), d("150.00"));
        assert_eq!(parse_amount("150.00").unwrap(), d("150.00"));
        assert_eq!(parse_amount("0,5").unwrap(), d("0.5"));
    }

    #[test]
    fn test_single_comma_ambiguity_resolves_to_thousands() {
        assert_eq!(parse_amount("1,234").unwrap(), d("1234"));
        assert_eq!(parse_amount("12,3").unwrap(), d("12.3"));
    }

    #[test]
    fn test_sign_markers() {
        assert_eq!(parse_amount("-150,00").unwrap(), d("-150.00"));
        assert_eq!(parse_amount("150,00 D").unwrap(), d("-150.00"));
        assert_eq!(parse_amount("150,00d").unwrap(), d("-150.00"));
        assert_eq!(parse_amount("150,00 C").unwrap(), d("150.00"));
        assert_eq!(parse_amount("(45.10)").unwrap(), d("-45.10"));
        assert_eq!(parse_amount("R$ -1.234,56").unwrap(), d("-1234.56"));
        assert_eq!(parse_amount("-R$ 10,00").unwrap(), d("-10.00"));
        assert_eq!(parse_amount("US$ 99.90").unwrap(), d("99.90"));
        assert_eq!(parse_amount("+20,00").unwrap(), d("20.00"));
    }

    #[test]
    fn test_sign_consistency() {
        for s in ["1.234,56", "1,234.56", "1.234", "0,01", "150.00", "42", "R$ 7,50", "9.999.999,99"] {
            let positive = parse_amount(s).unwrap();
            let negative = parse_amount(&format!("-{}", s)).unwrap();
            assert_eq!(negative, -positive, "sign mismatch for {}", s);
        }
    }

    #[test]
    fn test_invalid_amounts() {
        assert_eq!(parse_amount("   "), Err(AmountError::Empty));
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("12a,00").is_err());
        assert!(parse_amount("D").is_err());
        assert!(parse_amount("1,234,56.7.8").is_err());
        assert!(parse_amount("-").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("01/03/2024"), Some(expected));
        assert_eq!(parse_date("01/03/24"), Some(expected));
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("01-03-2024"), Some(expected));
        assert_eq!(parse_date("01-03-24"), Some(expected));
        assert_eq!(parse_date("1/3/2024"), Some(expected));
        assert_eq!(parse_date("15/06/85"), NaiveDate::from_ymd_opt(1985, 6, 15));
    }

    #[test]
    fn test_parse_date_rejects_wrong_shapes() {
        assert_eq!(parse_date("31/02/2024"), None);
        assert_eq!(parse_date("2024/03/01"), None);
        assert_eq!(parse_date("01/03/202"), None);
        assert_eq!(parse_date("01.03.2024"), None);
        assert_eq!(parse_date("20240301"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("aa/bb/cccc"), None);
    }

    #[test]
    fn test_parse_date_round_trip() {
        let mut date = NaiveDate::from_ymd_opt(2023, 12, 25).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        while date <= end {
            let formatted = date.format("%d/%m/%Y").to_string();
            assert_eq!(parse_date(&formatted), Some(date));
            date = date.succ_opt().unwrap();
        }
    }
}
