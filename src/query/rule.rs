//! Compilation of a single filter rule into an SQL predicate.
//!
//! Every property has its own predicate shape. The compiler is total: any text,
//! including half-typed or malformed values, yields a valid predicate, falling back
//! to a substring match or to the always-true `(1=1)`.

use super::camera::CameraLookup;
use crate::{
    dialect::{CurrentDialect, Dialect},
    parser::{OperatorSplit, parse_datetime, parse_exposure, parse_number},
};

/// The always-true predicate.
pub const MATCH_ALL: &str = "(1=1)";

/// Tolerance used when comparing stored exposure times for equality.
const EXPOSURE_EPSILON: &str = "1.0/100000";

/// A filterable image property.
///
/// The numeric code of each property is what gets persisted in the rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    FilmRoll,
    Folders,
    Camera,
    Lens,
    Aperture,
    Exposure,
    FocalLength,
    Iso,
    Day,
    Time,
    Geotagging,
    Tag,
    ColorLabel,
    Title,
    Description,
    Creator,
    Publisher,
    Rights,
    History,
    Filename,
    Rating,
    /// A code this version does not know; kept so it survives a round-trip.
    Unknown(i32),
}

impl Property {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Property::FilmRoll,
            1 => Property::Folders,
            2 => Property::Camera,
            3 => Property::Lens,
            4 => Property::Aperture,
            5 => Property::Exposure,
            6 => Property::FocalLength,
            7 => Property::Iso,
            8 => Property::Day,
            9 => Property::Time,
            10 => Property::Geotagging,
            11 => Property::Tag,
            12 => Property::ColorLabel,
            13 => Property::Title,
            14 => Property::Description,
            15 => Property::Creator,
            16 => Property::Publisher,
            17 => Property::Rights,
            18 => Property::History,
            19 => Property::Filename,
            20 => Property::Rating,
            other => Property::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Property::FilmRoll => 0,
            Property::Folders => 1,
            Property::Camera => 2,
            Property::Lens => 3,
            Property::Aperture => 4,
            Property::Exposure => 5,
            Property::FocalLength => 6,
            Property::Iso => 7,
            Property::Day => 8,
            Property::Time => 9,
            Property::Geotagging => 10,
            Property::Tag => 11,
            Property::ColorLabel => 12,
            Property::Title => 13,
            Property::Description => 14,
            Property::Creator => 15,
            Property::Publisher => 16,
            Property::Rights => 17,
            Property::History => 18,
            Property::Filename => 19,
            Property::Rating => 20,
            Property::Unknown(code) => code,
        }
    }

    /// Key id of the metadata field backing a text property, if any.
    fn metadata_key(self) -> Option<i32> {
        match self {
            Property::Creator => Some(0),
            Property::Publisher => Some(1),
            Property::Title => Some(2),
            Property::Description => Some(3),
            Property::Rights => Some(4),
            _ => None,
        }
    }
}

/// Compiles one rule into a parenthesized SQL predicate.
///
/// # Arguments
///
/// * `property` - The image property the rule filters on.
/// * `text` - The raw text the user typed; it is escaped before use.
/// * `cameras` - Resolves camera aliases for [`Property::Camera`].
pub fn compile(property: Property, text: &str, cameras: &dyn CameraLookup) -> String {
    let escaped = CurrentDialect::escape_literal(text);

    let predicate = match property {
        Property::FilmRoll => {
            let folder = if escaped.is_empty() { "%" } else { escaped.as_str() };
            format!("(film_id in (select id from film_rolls where folder like '{folder}'))")
        }
        Property::Folders => {
            format!("(film_id in (select id from film_rolls where folder like '{escaped}%'))")
        }
        Property::ColorLabel => color_label_predicate(text),
        Property::History => {
            let negate = if text == "altered" { "" } else { "not " };
            format!("(id {negate}in (select imgid from history))")
        }
        Property::Geotagging => {
            let negate = if text == "tagged" { "" } else { "not " };
            format!(
                "(id {negate}in (select id from images where (longitude is not null and latitude is not null)))"
            )
        }
        Property::Camera => camera_predicate(text, cameras),
        Property::Tag => format!(
            "(id in (select imgid from tagged_images join tags on tagid = tags.id where name like '{escaped}'))"
        ),
        Property::Lens => format!("(lens like '%{escaped}%')"),
        Property::Filename => format!("(filename like '%{escaped}%')"),
        Property::Title
        | Property::Description
        | Property::Creator
        | Property::Publisher
        | Property::Rights => match property.metadata_key() {
            Some(key) => format!(
                "(id in (select id from meta_data where key = {key} and value like '%{escaped}%'))"
            ),
            None => String::new(),
        },
        Property::FocalLength => numeric_predicate("focal_length", parse_number(text), &escaped),
        Property::Iso => numeric_predicate("iso", parse_number(text), &escaped),
        Property::Aperture => numeric_predicate("round(aperture,1)", parse_number(text), &escaped),
        Property::Exposure => exposure_predicate(parse_exposure(text), &escaped),
        Property::Rating => rating_predicate(parse_number(text)),
        Property::Day | Property::Time => datetime_predicate(parse_datetime(text), &escaped),
        Property::Unknown(code) => {
            tracing::debug!(code, "unknown filter property, matching everything");
            String::new()
        }
    };

    if predicate.is_empty() {
        MATCH_ALL.to_string()
    } else {
        predicate
    }
}

fn color_label_predicate(text: &str) -> String {
    if text.is_empty() || text == "%" {
        return "(id in (select imgid from color_labels where color is not null))".to_string();
    }

    let color = match text.to_lowercase().as_str() {
        "red" => 0,
        "yellow" => 1,
        "green" => 2,
        "blue" => 3,
        "purple" => 4,
        _ => 0,
    };

    format!("(id in (select imgid from color_labels where color = {color}))")
}

fn camera_predicate(text: &str, cameras: &dyn CameraLookup) -> String {
    if text.is_empty() || text == "%" {
        return MATCH_ALL.to_string();
    }

    // seeded with a false literal: no matching camera means no image
    let mut sql = String::from("((1=0)");
    for (maker, model) in cameras.lookup(text) {
        sql.push_str(&format!(
            " or (maker = '{}' and model = '{}')",
            CurrentDialect::escape_literal(&maker),
            CurrentDialect::escape_literal(&model)
        ));
    }
    sql.push(')');

    sql
}

fn numeric_predicate(column: &str, split: OperatorSplit, escaped: &str) -> String {
    match (split.op.as_deref(), split.bound1, split.bound2) {
        (Some("[]"), Some(lo), Some(hi)) => {
            format!("(({column} >= {lo}) and ({column} <= {hi}))")
        }
        (Some(op), Some(value), _) => format!("({column} {op} {value})"),
        (None, Some(value), _) => format!("({column} = {value})"),
        _ => format!("({column} like '%{escaped}%')"),
    }
}

fn exposure_predicate(split: OperatorSplit, escaped: &str) -> String {
    match (split.op.as_deref(), split.bound1, split.bound2) {
        (Some("[]"), Some(lo), Some(hi)) => format!(
            "((exposure >= {lo} - {EXPOSURE_EPSILON}) and (exposure <= {hi} + {EXPOSURE_EPSILON}))"
        ),
        (Some(op), Some(value), _) => format!("(exposure {op} {value})"),
        (None, Some(value), _) => format!(
            "((exposure >= {value} - {EXPOSURE_EPSILON}) and (exposure <= {value} + {EXPOSURE_EPSILON}))"
        ),
        _ => format!("(exposure like '%{escaped}%')"),
    }
}

/// Ratings are typed on the filter scale (1 = unstarred, 6 = five stars,
/// 7 = rejected) and stored one lower in the low bits of `flags`.
fn rating_predicate(split: OperatorSplit) -> String {
    let stored = |bound: Option<&str>| bound.and_then(|b| b.parse::<i64>().ok()).map(|r| r - 1);
    let lo = stored(split.bound1.as_deref());
    let hi = stored(split.bound2.as_deref());

    match (split.op.as_deref(), lo, hi) {
        (Some("[]"), Some(lo), Some(hi)) => {
            format!("(((flags & 7) >= {lo}) and ((flags & 7) <= {hi}))")
        }
        (Some("[]"), _, _) => MATCH_ALL.to_string(),
        (Some(op), Some(value), _) => format!("((flags & 7) {op} {value})"),
        (None, Some(value), _) => format!("((flags & 7) = {value})"),
        _ => MATCH_ALL.to_string(),
    }
}

fn datetime_predicate(split: OperatorSplit, escaped: &str) -> String {
    const COLUMN: &str = "datetime_taken";

    match (split.op.as_deref(), split.bound1.as_deref(), split.bound2.as_deref()) {
        (Some("[]"), Some(lo), Some(hi)) => {
            format!("(({COLUMN} >= '{lo}') and ({COLUMN} <= '{hi}'))")
        }
        (Some("" | "="), Some(value), _) => format!("({COLUMN} like '{value}')"),
        (Some("<>"), Some(value), _) => format!("({COLUMN} not like '{value}')"),
        (Some(op), Some(value), _) if op != "[]" => format!("({COLUMN} {op} '{value}')"),
        _ => format!("({COLUMN} like '%{escaped}%')"),
    }
}
