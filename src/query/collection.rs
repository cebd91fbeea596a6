//! # Collection Query Module
//!
//! Builds the statement that selects the ids of the current collection from the
//! filter parameters and the extended where.
//!
//! The final text is assembled from four parts:
//!
//! - **where** `W`: typed [`Term`]s joined with `and`, or the extended where alone
//!   when [`QueryFlags::USE_ONLY_WHERE_EXT`] is set.
//! - **select** `S`: chosen from the sort field and the query flags (sorting by
//!   color or path needs a join).
//! - **order** `O`: a fixed column list per sort field and direction.
//! - **limit** `L`: a two-argument `limit ?1, ?2` when [`QueryFlags::USE_LIMIT`] is set.
//!
//! ```rust
//! # use photocollect::query::{CollectionQuery, ExtendedWhere, FilterParams, QueryFlags};
//! let params = FilterParams {
//!     query_flags: QueryFlags::USE_ONLY_WHERE_EXT,
//!     ..FilterParams::default()
//! };
//! let extended = ExtendedWhere::FullQuery("where film_id=5".to_string());
//!
//! assert_eq!(
//!     "select distinct images.id from images where film_id=5 ",
//!     CollectionQuery::new(&params, &extended).to_sql()
//! );
//! ```

use crate::{
    ImageId,
    config::{ConfigStore, keys},
    dialect::{CurrentDialect, Dialect},
};
use bitflags::bitflags;

/// Image flag bit marking an image as pending removal.
pub const IMAGE_REMOVE_FLAG: i64 = 256;

/// Stored rating value of a rejected image.
pub const REJECTED_RATING: i64 = 6;

bitflags! {
    /// Selects which default predicates are part of the where clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterFlags: u32 {
        const FILM_ID = 1;
        const ATLEAST_RATING = 2;
        const EQUAL_RATING = 4;
        const ALTERED = 8;
        const UNALTERED = 16;
        const CUSTOM_COMPARE = 64;
    }
}

bitflags! {
    /// Structural options of the assembled statement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueryFlags: u32 {
        const USE_SORT = 1;
        const USE_LIMIT = 2;
        const USE_WHERE_EXT = 4;
        const USE_ONLY_WHERE_EXT = 8;

        const FULL = Self::USE_SORT.bits() | Self::USE_LIMIT.bits();
    }
}

/// Rating filter on the filter scale: `StarNo` is an unstarred image,
/// `Star1`..`Star5` the star ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatingFilter {
    All,
    #[default]
    StarNo,
    Star1,
    Star2,
    Star3,
    Star4,
    Star5,
    Reject,
    NotReject,
}

impl RatingFilter {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => RatingFilter::All,
            1 => RatingFilter::StarNo,
            2 => RatingFilter::Star1,
            3 => RatingFilter::Star2,
            4 => RatingFilter::Star3,
            5 => RatingFilter::Star4,
            6 => RatingFilter::Star5,
            7 => RatingFilter::Reject,
            8 => RatingFilter::NotReject,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        match self {
            RatingFilter::All => 0,
            RatingFilter::StarNo => 1,
            RatingFilter::Star1 => 2,
            RatingFilter::Star2 => 3,
            RatingFilter::Star3 => 4,
            RatingFilter::Star4 => 5,
            RatingFilter::Star5 => 6,
            RatingFilter::Reject => 7,
            RatingFilter::NotReject => 8,
        }
    }

    /// The value compared against `flags & 7`.
    pub fn stored(self) -> i64 {
        self.code() - 1
    }
}

/// Comparison used by the custom rating filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    Lt,
    Leq,
    Eq,
    #[default]
    Geq,
    Gt,
    Ne,
}

impl Comparator {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Comparator::Lt,
            1 => Comparator::Leq,
            2 => Comparator::Eq,
            3 => Comparator::Geq,
            4 => Comparator::Gt,
            5 => Comparator::Ne,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        match self {
            Comparator::Lt => 0,
            Comparator::Leq => 1,
            Comparator::Eq => 2,
            Comparator::Geq => 3,
            Comparator::Gt => 4,
            Comparator::Ne => 5,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Leq => "<=",
            Comparator::Eq => "=",
            Comparator::Geq => ">=",
            Comparator::Gt => ">",
            Comparator::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    None,
    Datetime,
    Rating,
    #[default]
    Filename,
    Id,
    Color,
    Group,
    Path,
}

impl SortField {
    /// Unknown codes sort by id.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SortField::Datetime,
            2 => SortField::Rating,
            3 => SortField::Filename,
            4 => SortField::Id,
            5 => SortField::Color,
            6 => SortField::Group,
            7 => SortField::Path,
            _ => SortField::None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            SortField::None => 0,
            SortField::Datetime => 1,
            SortField::Rating => 2,
            SortField::Filename => 3,
            SortField::Id => 4,
            SortField::Color => 5,
            SortField::Group => 6,
            SortField::Path => 7,
        }
    }

    /// Returns the `order by` column list for this field.
    ///
    /// Rating sorts best-first when ascending; its descending list carries no
    /// `desc` on the rating expression.
    pub fn columns(self, descending: bool) -> &'static str {
        match (self, descending) {
            (SortField::Datetime, false) => "datetime_taken, filename, version",
            (SortField::Datetime, true) => "datetime_taken desc, filename desc, version",
            (SortField::Rating, false) => "flags & 7 desc, filename, version",
            (SortField::Rating, true) => "flags & 7, filename, version",
            (SortField::Filename, false) => "filename, version",
            (SortField::Filename, true) => "filename desc, version",
            (SortField::Id, false) => "id",
            (SortField::Id, true) => "id desc",
            (SortField::Color, false) => "color desc, filename, version",
            (SortField::Color, true) => "color, filename desc, version",
            (SortField::Group, false) => "group_id, id-group_id != 0, id",
            (SortField::Group, true) => "group_id desc, id-group_id != 0, id desc",
            (SortField::Path, false) => "folder, filename, version",
            (SortField::Path, true) => "folder desc, filename desc, version",
            (SortField::None, _) => "id",
        }
    }
}

/// The filter state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    pub film_id: u32,
    pub rating: RatingFilter,
    pub comparator: Comparator,
    pub filter_flags: FilterFlags,
    pub query_flags: QueryFlags,
    pub sort: SortField,
    pub descending: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            film_id: 1,
            rating: RatingFilter::StarNo,
            comparator: Comparator::Geq,
            filter_flags: FilterFlags::FILM_ID | FilterFlags::ATLEAST_RATING,
            query_flags: QueryFlags::FULL,
            sort: SortField::Filename,
            descending: false,
        }
    }
}

impl FilterParams {
    /// Reads persisted parameters, using the defaults for absent or invalid keys.
    pub fn load(config: &dyn ConfigStore) -> Self {
        let defaults = Self::default();

        Self {
            film_id: config
                .get_int(keys::FILM_ID)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.film_id),
            rating: config
                .get_int(keys::RATING)
                .and_then(RatingFilter::from_code)
                .unwrap_or(defaults.rating),
            comparator: config
                .get_int(keys::RATING_COMPARATOR)
                .and_then(Comparator::from_code)
                .unwrap_or(defaults.comparator),
            filter_flags: config
                .get_int(keys::FILTER_FLAGS)
                .and_then(|v| u32::try_from(v).ok())
                .map(FilterFlags::from_bits_truncate)
                .unwrap_or(defaults.filter_flags),
            query_flags: config
                .get_int(keys::QUERY_FLAGS)
                .and_then(|v| u32::try_from(v).ok())
                .map(QueryFlags::from_bits_truncate)
                .unwrap_or(defaults.query_flags),
            sort: config
                .get_int(keys::SORT)
                .map(SortField::from_code)
                .unwrap_or(defaults.sort),
            descending: config
                .get_bool(keys::DESCENDING)
                .unwrap_or(defaults.descending),
        }
    }

    pub fn store(&self, config: &dyn ConfigStore) {
        config.set_int(keys::QUERY_FLAGS, self.query_flags.bits() as i64);
        config.set_int(keys::FILTER_FLAGS, self.filter_flags.bits() as i64);
        config.set_int(keys::FILM_ID, self.film_id as i64);
        config.set_int(keys::RATING, self.rating.code());
        config.set_int(keys::RATING_COMPARATOR, self.comparator.code());
        config.set_int(keys::SORT, self.sort.code());
        config.set_bool(keys::DESCENDING, self.descending);
    }
}

/// Caller-supplied SQL layered on top of, or instead of, the default filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedWhere {
    /// A boolean expression, ANDed into the where clause.
    Predicate(String),
    /// Everything after `from images`, used verbatim in only-extended mode.
    FullQuery(String),
}

impl Default for ExtendedWhere {
    fn default() -> Self {
        ExtendedWhere::Predicate(String::new())
    }
}

impl ExtendedWhere {
    pub fn is_empty(&self) -> bool {
        match self {
            ExtendedWhere::Predicate(s) | ExtendedWhere::FullQuery(s) => s.trim().is_empty(),
        }
    }

    /// Renders the `from images` tail used in only-extended mode.
    fn as_tail(&self) -> String {
        match self {
            ExtendedWhere::FullQuery(tail) => tail.clone(),
            ExtendedWhere::Predicate(p) if p.trim().is_empty() => String::new(),
            ExtendedWhere::Predicate(p) => format!("where {p}"),
        }
    }
}

/// One predicate of the where clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    FilmId(u32),
    NotRemoved,
    RatingCompare(Comparator, i64),
    RatingAtLeast(i64),
    RatingExact(i64),
    Altered(bool),
    Extended(String),
    Grouping(ImageId),
}

impl Term {
    pub fn to_sql(&self) -> String {
        match self {
            Term::FilmId(id) => format!("(film_id = {id})"),
            Term::NotRemoved => {
                format!("((flags & {IMAGE_REMOVE_FLAG}) != {IMAGE_REMOVE_FLAG})")
            }
            Term::RatingCompare(cmp, rating) => format!(
                "((flags & 7) {} {rating} and (flags & 7) != {REJECTED_RATING})",
                cmp.as_sql()
            ),
            Term::RatingAtLeast(rating) => {
                format!("((flags & 7) >= {rating} and (flags & 7) != {REJECTED_RATING})")
            }
            Term::RatingExact(rating) => format!("((flags & 7) = {rating})"),
            Term::Altered(true) => "(id in (select imgid from history))".to_string(),
            Term::Altered(false) => "(id not in (select imgid from history))".to_string(),
            Term::Extended(predicate) => predicate.clone(),
            Term::Grouping(group) => format!("(group_id = id or group_id = {group})"),
        }
    }
}

/// Builds the collection statement for one set of parameters.
#[derive(Debug, Clone)]
pub struct CollectionQuery<'a> {
    params: &'a FilterParams,
    extended: &'a ExtendedWhere,
    grouping: Option<ImageId>,
}

impl<'a> CollectionQuery<'a> {
    pub fn new(params: &'a FilterParams, extended: &'a ExtendedWhere) -> Self {
        Self {
            params,
            extended,
            grouping: None,
        }
    }

    /// Enables grouping: only group leaders are shown, except for the members
    /// of the expanded group `expanded`.
    pub fn with_grouping(mut self, expanded: Option<ImageId>) -> Self {
        self.grouping = expanded;
        self
    }

    fn only_extended(&self) -> bool {
        self.params
            .query_flags
            .contains(QueryFlags::USE_ONLY_WHERE_EXT)
    }

    /// Returns the where-clause terms in their fixed order.
    ///
    /// Empty in only-extended mode, where the extended where stands alone.
    pub fn terms(&self) -> Vec<Term> {
        if self.only_extended() {
            return Vec::new();
        }

        let params = self.params;
        let flags = params.filter_flags;
        let mut terms = Vec::new();

        if flags.contains(FilterFlags::FILM_ID) {
            terms.push(Term::FilmId(params.film_id));
        }

        terms.push(Term::NotRemoved);

        let rating = params.rating.stored();
        if flags.contains(FilterFlags::CUSTOM_COMPARE) {
            terms.push(Term::RatingCompare(params.comparator, rating));
        } else if flags.contains(FilterFlags::ATLEAST_RATING) {
            terms.push(Term::RatingAtLeast(rating));
        } else if flags.contains(FilterFlags::EQUAL_RATING) {
            terms.push(Term::RatingExact(rating));
        }

        if flags.contains(FilterFlags::ALTERED) {
            terms.push(Term::Altered(true));
        } else if flags.contains(FilterFlags::UNALTERED) {
            terms.push(Term::Altered(false));
        }

        if params.query_flags.contains(QueryFlags::USE_WHERE_EXT) {
            match self.extended {
                ExtendedWhere::Predicate(p) if !p.trim().is_empty() => {
                    terms.push(Term::Extended(p.clone()));
                }
                ExtendedWhere::Predicate(_) => {}
                ExtendedWhere::FullQuery(tail) => {
                    tracing::warn!(tail = %tail, "full extended query ignored outside only-extended mode");
                }
            }
        }

        if let Some(group) = self.grouping {
            terms.push(Term::Grouping(group));
        }

        terms
    }

    /// Returns `W`.
    pub fn where_clause(&self) -> String {
        if self.only_extended() {
            return self.extended.as_tail();
        }

        self.terms()
            .iter()
            .map(Term::to_sql)
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Returns `S`.
    pub fn select_clause(&self) -> String {
        select_clause(
            self.params.sort,
            self.params.query_flags,
            &self.where_clause(),
        )
    }

    /// Returns `O`, empty unless sorting is enabled outside only-extended mode.
    pub fn sort_clause(&self) -> String {
        let flags = self.params.query_flags;
        if flags.contains(QueryFlags::USE_SORT) && !self.only_extended() {
            format!("order by {}", self.params.sort.columns(self.params.descending))
        } else {
            String::new()
        }
    }

    /// Returns the complete statement text.
    pub fn to_sql(&self) -> String {
        let limit = if self.params.query_flags.contains(QueryFlags::USE_LIMIT) {
            CurrentDialect::limit_clause()
        } else {
            String::new()
        };

        format!("{} {}{}", self.select_clause(), self.sort_clause(), limit)
    }
}

fn select_clause(sort: SortField, flags: QueryFlags, where_clause: &str) -> String {
    let sorted = flags.contains(QueryFlags::USE_SORT);

    if flags.contains(QueryFlags::USE_ONLY_WHERE_EXT) {
        format!("select distinct images.id from images {where_clause}")
    } else if sort == SortField::Color && sorted {
        format!(
            "select distinct id from (select * from images where {where_clause}) as a left outer join color_labels as b on a.id=b.imgid"
        )
    } else if sort == SortField::Path && sorted {
        format!(
            "select distinct id from (select * from images where {where_clause}) join (select id as film_rolls_id, folder from film_rolls) on film_id=film_rolls_id"
        )
    } else {
        format!("select distinct id from images where {where_clause}")
    }
}

/// Derives the statement counting the rows of `query`.
///
/// # Returns
/// - `(String, Vec<i64>)`: the count statement and its bind values. When the
///   collection is paginated the window is bound to `(0, -1)` so the count always
///   covers the full filtered set.
pub fn count_query(query: &str, flags: QueryFlags, extended: &ExtendedWhere) -> (String, Vec<i64>) {
    if flags.contains(QueryFlags::USE_ONLY_WHERE_EXT) {
        return (
            format!("select count(distinct images.id) from images {}", extended.as_tail()),
            vec![],
        );
    }

    let binds = if flags.contains(QueryFlags::USE_LIMIT) {
        vec![0, -1]
    } else {
        vec![]
    };

    match query.find(" from ") {
        Some(pos) => (format!("select count(distinct id){}", &query[pos..]), binds),
        None => (format!("select count(*) from ({query})"), binds),
    }
}

/// Builds the unfiltered helper query over every image, ending in `limit ?1`.
pub fn all_query(sort: SortField, descending: bool, use_sort: bool) -> String {
    helper_query("1=1", sort, descending, use_sort)
}

/// Builds the helper query over the selected images, ending in `limit ?1`.
pub fn selected_query(sort: SortField, descending: bool, use_sort: bool) -> String {
    helper_query(
        "id in (select imgid from selected_images)",
        sort,
        descending,
        use_sort,
    )
}

fn helper_query(predicate: &str, sort: SortField, descending: bool, use_sort: bool) -> String {
    let flags = if use_sort {
        QueryFlags::USE_SORT
    } else {
        QueryFlags::empty()
    };

    let order = if use_sort {
        format!(" order by {}", sort.columns(descending))
    } else {
        String::new()
    };

    format!(
        "{}{}{}",
        select_clause(sort, flags, predicate),
        order,
        CurrentDialect::single_limit_clause()
    )
}
