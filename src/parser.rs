//! # Filter Value Parser Module
//!
//! This module turns the free text a user types into a filter rule into a
//! normalized predicate descriptor: an optional comparison operator and up to two
//! bounds. The descriptor is later rendered into SQL by the rule compiler.
//!
//! ## Supported Forms
//!
//! - **Range**: `[lo;hi]`, whitespace allowed around every token.
//! - **Comparison**: an optional operator (`=`, `<`, `>`, `<=`, `>=`, `<>`)
//!   followed by a single value.
//!
//! Three value grammars are available:
//! - `parse_number`: signed decimal numbers (`42`, `-1`, `2.8`).
//! - `parse_exposure`: unsigned numbers or reciprocal shutter speeds (`1/250`, `2"`).
//! - `parse_datetime`: partial EXIF date-time literals (`2021`, `2021:06`,
//!   `2021:06:14 18:30`), optionally followed by a `%` wildcard.
//!
//! Parsing is lenient by contract: malformed input never produces an error, it
//! produces an empty [`OperatorSplit`] and the caller falls back to a substring
//! match.
//!
//! ## Example Usage
//!
//! ```rust
//! # use photocollect::parser::{parse_datetime, parse_number};
//! let split = parse_number(">=50");
//! assert_eq!(Some(">="), split.op.as_deref());
//! assert_eq!(Some("50"), split.bound1.as_deref());
//!
//! let split = parse_datetime("[2020;2021]");
//! assert_eq!(Some("2020:01:01 00:00:00"), split.bound1.as_deref());
//! assert_eq!(Some("2021:12:31 23:59:59"), split.bound2.as_deref());
//! ```

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while_m_n},
    character::complete::{char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::many_m_n,
    sequence::{delimited, preceded, separated_pair},
};

/// Operator text used for the `[lo;hi]` range form.
pub const RANGE_OPERATOR: &str = "[]";

/// A normalized `(operator, bound1, bound2)` triple.
///
/// For the numeric grammars every field is `None` when nothing matched.
/// For date-times `op` is always present (possibly empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorSplit {
    pub op: Option<String>,
    pub bound1: Option<String>,
    pub bound2: Option<String>,
}

impl OperatorSplit {
    fn range(lo: impl Into<String>, hi: impl Into<String>) -> Self {
        OperatorSplit {
            op: Some(RANGE_OPERATOR.to_string()),
            bound1: Some(lo.into()),
            bound2: Some(hi.into()),
        }
    }

    /// Returns `true` when the input was recognized as a `[lo;hi]` range.
    pub fn is_range(&self) -> bool {
        self.op.as_deref() == Some(RANGE_OPERATOR)
    }

    /// Returns `true` when neither bound could be extracted.
    pub fn is_empty(&self) -> bool {
        self.bound1.is_none() && self.bound2.is_none()
    }
}

/// Splits a numeric filter value into operator and bounds.
///
/// - `"[10;20]"` gives `("[]", "10", "20")`.
/// - `"<=5.6"` gives `("<=", "5.6", None)`.
/// - `"400"` gives `(None, "400", None)`, i.e. implicit equality.
/// - anything else gives all `None`.
pub fn parse_number(input: &str) -> OperatorSplit {
    if let Ok((_, (lo, hi))) = all_consuming(range(number)).parse(input) {
        return OperatorSplit::range(lo, hi);
    }

    comparison(number)
        .parse(input)
        .map(|(_, (op, value))| OperatorSplit {
            op: op.map(str::to_string),
            bound1: Some(value.to_string()),
            bound2: None,
        })
        .unwrap_or_default()
}

/// Splits an exposure-time filter value into operator and bounds.
///
/// Values may be written as reciprocals (`1/250`), which are rendered as SQL
/// divisions (`1.0/250`), and may carry a trailing seconds marker (`"`).
pub fn parse_exposure(input: &str) -> OperatorSplit {
    if let Ok((_, (lo, hi))) = all_consuming(range(exposure)).parse(input) {
        return OperatorSplit::range(lo, hi);
    }

    comparison(exposure)
        .parse(input)
        .map(|(_, (op, value))| OperatorSplit {
            op: op.map(str::to_string),
            bound1: Some(value),
            bound2: None,
        })
        .unwrap_or_default()
}

/// Splits a date-time filter value into operator and bounds.
///
/// Ranges normalize their lower bound to the earliest and their upper bound to
/// the latest instant the partial literal covers. Equality and exclusion keep the
/// raw literal with a trailing `%` so it can be used as a `LIKE` prefix; the other
/// comparators normalize the literal according to the operator.
pub fn parse_datetime(input: &str) -> OperatorSplit {
    if let Ok((_, (lo, hi))) = all_consuming(range(datetime_literal)).parse(input) {
        return OperatorSplit {
            op: Some(RANGE_OPERATOR.to_string()),
            bound1: normalize_datetime(">=", lo),
            bound2: normalize_datetime("<=", hi),
        };
    }

    let parsed = all_consuming((
        multispace0,
        opt(comparator),
        multispace0,
        datetime_literal,
        multispace0,
        opt(char('%')),
        multispace0,
    ))
    .parse(input);

    match parsed {
        Ok((_, (_, op, _, literal, _, _, _))) => {
            let op = op.unwrap_or_default();
            let bound1 = match op {
                "" | "=" | "<>" => Some(format!("{literal}%")),
                _ => normalize_datetime(op, literal),
            };

            OperatorSplit {
                op: Some(op.to_string()),
                bound1,
                bound2: None,
            }
        }
        Err(_) => OperatorSplit {
            op: Some(String::new()),
            ..OperatorSplit::default()
        },
    }
}

/// Completes a partial `YYYY[:MM[:DD[ HH[:MM[:SS]]]]]` literal into a canonical
/// `YYYY:MM:DD HH:MM:SS` timestamp.
///
/// Missing fields are filled with their maximum (`12`, `31`, `23`, `59`, `59`) when
/// the literal acts as an upper bound (`>` and `<=`), and with their minimum
/// otherwise. The conversion is purely lexical: `2014:02:31` is kept as is.
///
/// Returns `None` for literals shorter than four characters or literals that do
/// not carry enough fields for their length.
pub fn normalize_datetime(operator: &str, literal: &str) -> Option<String> {
    if literal.chars().count() < 4 {
        return None;
    }

    let mut fields: [u32; 6] = if operator == ">" || operator == "<=" {
        [0, 12, 31, 23, 59, 59]
    } else {
        [0, 1, 1, 0, 0, 0]
    };

    let precision = match literal.len() {
        0..=6 => 1,
        7..=9 => 2,
        10..=12 => 3,
        13..=15 => 4,
        16..=18 => 5,
        _ => 6,
    };

    let (_, parsed) = datetime_fields(literal).ok()?;
    if parsed.len() < precision {
        return None;
    }
    fields[..precision].copy_from_slice(&parsed[..precision]);

    let [year, month, day, hour, minute, second] = fields;
    Some(format!(
        "{year:04}:{month:02}:{day:02} {hour:02}:{minute:02}:{second:02}"
    ))
}

// <range>      ::= ws "[" ws <value> ws ";" ws <value> ws "]" ws
// <comparison> ::= ws [ <comparator> ] ws <value> ws
// <comparator> ::= "<=" | ">=" | "<>" | "=" | "<" | ">"
fn range<'a, O, F>(
    bound: F,
) -> impl Parser<&'a str, Output = (O, O), Error = nom::error::Error<&'a str>>
where
    F: Fn(&'a str) -> IResult<&'a str, O> + Copy,
{
    delimited(
        (multispace0, char('['), multispace0),
        separated_pair(bound, delimited(multispace0, char(';'), multispace0), bound),
        (multispace0, char(']'), multispace0),
    )
}

fn comparison<'a, O, F>(
    value: F,
) -> impl Parser<&'a str, Output = (Option<&'a str>, O), Error = nom::error::Error<&'a str>>
where
    F: Fn(&'a str) -> IResult<&'a str, O> + Copy,
{
    all_consuming(delimited(
        multispace0,
        (opt(comparator), preceded(multispace0, value)),
        multispace0,
    ))
}

fn comparator(input: &str) -> IResult<&str, &str> {
    alt((tag("<="), tag(">="), tag("<>"), tag("="), tag("<"), tag(">"))).parse(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize((opt(one_of("+-")), digit1, opt(char('.')), digit0)).parse(input)
}

fn exposure(input: &str) -> IResult<&str, String> {
    map(
        (
            opt(tag::<&str, &str, nom::error::Error<&str>>("1/")),
            recognize((digit1, opt(char('.')), digit0)),
            opt(char('"')),
        ),
        |(reciprocal, value, _)| match reciprocal {
            Some(_) => format!("1.0/{value}"),
            None => value.to_string(),
        },
    )
    .parse(input)
}

fn datetime_literal(input: &str) -> IResult<&str, &str> {
    map(
        recognize((
            take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
            take_while(|c: char| c.is_ascii_digit() || c == ':' || c == ' '),
        )),
        str::trim_end,
    )
    .parse(input)
}

fn datetime_fields(input: &str) -> IResult<&str, Vec<u32>> {
    let (input, year) = map_res(
        take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
        str::parse::<u32>,
    )
    .parse(input)?;

    let (input, rest) = many_m_n(
        0,
        5,
        preceded(one_of(": "), map_res(digit1, str::parse::<u32>)),
    )
    .parse(input)?;

    let mut fields = Vec::with_capacity(6);
    fields.push(year);
    fields.extend(rest);

    Ok((input, fields))
}

#[cfg(test)]
mod tests {
    use super::{
        OperatorSplit, normalize_datetime, parse_datetime, parse_exposure, parse_number,
    };

    fn split(op: Option<&str>, b1: Option<&str>, b2: Option<&str>) -> OperatorSplit {
        OperatorSplit {
            op: op.map(String::from),
            bound1: b1.map(String::from),
            bound2: b2.map(String::from),
        }
    }

    #[test]
    fn test_parse_number_comparison() {
        assert_eq!(split(Some("="), Some("50"), None), parse_number("=50"));
        assert_eq!(split(Some("<="), Some("5.6"), None), parse_number(" <= 5.6 "));
        assert_eq!(split(Some("<>"), Some("-1"), None), parse_number("<>-1"));
        assert_eq!(split(None, Some("400"), None), parse_number("400"));
    }

    #[test]
    fn test_parse_number_range() {
        assert_eq!(
            split(Some("[]"), Some("10"), Some("20")),
            parse_number("[10;20]")
        );
        assert_eq!(
            split(Some("[]"), Some("2.8"), Some("5.6")),
            parse_number("  [ 2.8 ; 5.6 ]  ")
        );
    }

    #[test]
    fn test_parse_number_rejects_text() {
        assert_eq!(OperatorSplit::default(), parse_number("foo"));
        assert_eq!(OperatorSplit::default(), parse_number(""));
        assert_eq!(OperatorSplit::default(), parse_number("[10;]"));
        assert_eq!(OperatorSplit::default(), parse_number("=>10"));
        assert_eq!(OperatorSplit::default(), parse_number("10mm"));
    }

    #[test]
    fn test_parse_exposure() {
        assert_eq!(
            split(Some("[]"), Some("1.0/250"), Some("2")),
            parse_exposure("[1/250;2\"]")
        );
        assert_eq!(split(Some(">"), Some("1.0/60"), None), parse_exposure(">1/60"));
        assert_eq!(split(None, Some("30"), None), parse_exposure("30\""));
        assert!(parse_exposure("fast").is_empty());
    }

    #[test]
    fn test_parse_datetime_range() {
        assert_eq!(
            split(
                Some("[]"),
                Some("2020:01:01 00:00:00"),
                Some("2021:12:31 23:59:59")
            ),
            parse_datetime("[2020;2021]")
        );
        assert_eq!(
            split(
                Some("[]"),
                Some("2020:06:01 00:00:00"),
                Some("2020:06:14 23:59:59")
            ),
            parse_datetime("[ 2020:06 ; 2020:06:14 ]")
        );
    }

    #[test]
    fn test_parse_datetime_comparison() {
        assert_eq!(split(Some(""), Some("2021:06%"), None), parse_datetime("2021:06"));
        assert_eq!(split(Some("="), Some("2021%"), None), parse_datetime("=2021%"));
        assert_eq!(split(Some("<>"), Some("2021:06:14%"), None), parse_datetime("<> 2021:06:14"));
        assert_eq!(
            split(Some(">"), Some("2021:06:31 23:59:59"), None),
            parse_datetime(">2021:06")
        );
        assert_eq!(
            split(Some(">="), Some("2021:06:01 00:00:00"), None),
            parse_datetime(">=2021:06")
        );
    }

    #[test]
    fn test_parse_datetime_unmatched_keeps_empty_operator() {
        assert_eq!(split(Some(""), None, None), parse_datetime("yesterday"));
        assert_eq!(split(Some(""), None, None), parse_datetime("21:06"));
        assert_eq!(split(Some(""), None, None), parse_datetime("2021.06"));
    }

    #[test]
    fn test_normalize_datetime() {
        assert_eq!(None, normalize_datetime(">=", "202"));
        assert_eq!(
            Some("2014:02:31 23:59:59".to_string()),
            normalize_datetime("<=", "2014:02:31")
        );
        assert_eq!(
            Some("2014:02:01 00:00:00".to_string()),
            normalize_datetime("<", "2014:02")
        );
        assert_eq!(
            Some("2014:02:03 04:05:06".to_string()),
            normalize_datetime(">", "2014:02:03 04:05:06")
        );
        assert_eq!(
            Some("2014:02:03 04:59:59".to_string()),
            normalize_datetime("<=", "2014:02:03 04")
        );
        assert_eq!(None, normalize_datetime(">=", "2014.02.03"));
        // long enough for a day but the day field is missing
        assert_eq!(None, normalize_datetime(">=", "2014:02   "));
    }

    /// Feeds pseudo-random printable ASCII (biased towards the grammar's own
    /// characters) through every entry point; none of them may panic and the
    /// numeric splits must be either fully empty or carry a first bound.
    #[test]
    fn test_parsers_are_total() {
        const ALPHABET: &[u8] = b"0123456789[];:<>=.%+-/\" abcxyz";
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 33) as usize
        };

        for _ in 0..5_000 {
            let len = next() % 24;
            let input: String = (0..len)
                .map(|_| ALPHABET[next() % ALPHABET.len()] as char)
                .collect();

            let number = parse_number(&input);
            assert!(number.is_empty() || number.bound1.is_some(), "{input:?}");
            if number.is_range() {
                assert!(number.bound2.is_some(), "{input:?}");
            }

            let exposure = parse_exposure(&input);
            assert!(exposure.is_empty() || exposure.bound1.is_some(), "{input:?}");

            assert!(parse_datetime(&input).op.is_some(), "{input:?}");
            let _ = normalize_datetime(">", &input);
        }
    }
}
