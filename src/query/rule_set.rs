//! # Rule Set Module
//!
//! An ordered list of up to ten [`FilterRule`]s, folded into one parenthesized
//! boolean expression:
//!
//! ```text
//! (P1 and P2 or P3 and not P4)
//! ```
//!
//! where each `Pi` is the predicate compiled for rule `i` and each conjunction
//! comes from the rule it introduces. The first rule's conjunction is ignored.
//!
//! Rule lists are persisted either as individual config keys
//! (`plugins/lighttable/collect/{num_rules,mode<N>,item<N>,string<N>}`) or as a
//! single line:
//!
//! ```text
//! <num_rules>:<mode0>:<item0>:<string0>$<mode1>:<item1>:<string1>$...
//! ```
//!
//! An empty text is written as `%`, so text fields are never empty on disk.

use super::{
    camera::CameraLookup,
    rule::{self, MATCH_ALL, Property},
};
use crate::config::{ConfigStore, keys};
use nom::{
    IResult, Parser,
    bytes::complete::take_till1,
    character::complete::{char, digit1},
    combinator::{map, map_res, opt, recognize},
    sequence::terminated,
};

/// Upper bound on the number of rules in a list.
pub const MAX_RULES: usize = 10;

/// How a rule is joined to the rules before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
    AndNot,
}

impl Conjunction {
    /// Unknown codes fall back to `And`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Conjunction::Or,
            2 => Conjunction::AndNot,
            _ => Conjunction::And,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Conjunction::And => 0,
            Conjunction::Or => 1,
            Conjunction::AndNot => 2,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Conjunction::And => "and",
            Conjunction::Or => "or",
            Conjunction::AndNot => "and not",
        }
    }
}

/// One row of the user-editable rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub conjunction: Conjunction,
    pub property: Property,
    pub text: String,
}

impl FilterRule {
    pub fn new(conjunction: Conjunction, property: Property, text: impl Into<String>) -> Self {
        Self {
            conjunction,
            property,
            text: text.into(),
        }
    }
}

impl Default for FilterRule {
    /// Every film roll.
    fn default() -> Self {
        Self::new(Conjunction::And, Property::FilmRoll, "%")
    }
}

/// Folds `rules` into a single predicate.
///
/// Only the first [`MAX_RULES`] rules are used; an empty slice yields `(1=1)`.
pub fn compile(rules: &[FilterRule], cameras: &dyn CameraLookup) -> String {
    if rules.is_empty() {
        return MATCH_ALL.to_string();
    }

    let mut sql = String::from("(");
    for (idx, rule) in rules.iter().take(MAX_RULES).enumerate() {
        if idx > 0 {
            sql.push(' ');
            sql.push_str(rule.conjunction.as_sql());
            sql.push(' ');
        }
        sql.push_str(&rule::compile(rule.property, &rule.text, cameras));
    }
    sql.push(')');

    sql
}

/// Compiles the rule list currently stored in `config`.
pub fn compile_config(config: &dyn ConfigStore, cameras: &dyn CameraLookup) -> String {
    RuleList::load(config).compile(cameras)
}

/// An ordered list of at most [`MAX_RULES`] filter rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleList {
    rules: Vec<FilterRule>,
}

impl RuleList {
    /// Creates a list, dropping every rule past [`MAX_RULES`].
    pub fn new(mut rules: Vec<FilterRule>) -> Self {
        rules.truncate(MAX_RULES);
        Self { rules }
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn compile(&self, cameras: &dyn CameraLookup) -> String {
        compile(&self.rules, cameras)
    }

    /// Encodes the list as a single line.
    pub fn serialize(&self) -> String {
        let mut out = format!("{}:", self.rules.len());
        for rule in &self.rules {
            let text = if rule.text.is_empty() { "%" } else { rule.text.as_str() };
            out.push_str(&format!(
                "{}:{}:{}$",
                rule.conjunction.code(),
                rule.property.code(),
                text
            ));
        }
        out
    }

    /// Decodes a line produced by [`RuleList::serialize`].
    ///
    /// A malformed header or a zero rule count yields the single default rule.
    /// A rule that fails to parse ends the list at the rules decoded so far.
    pub fn deserialize(buf: &str) -> Self {
        let Ok((mut rest, count)) = header(buf) else {
            tracing::warn!(buf, "malformed rule list, falling back to default rule");
            return Self::fallback();
        };

        let mut rules = Vec::with_capacity(count.min(MAX_RULES));
        for idx in 0..count.min(MAX_RULES) {
            match serialized_rule(rest) {
                Ok((remaining, rule)) => {
                    rules.push(rule);
                    rest = remaining;
                }
                Err(_) => {
                    tracing::warn!(idx, count, "truncating malformed rule list");
                    break;
                }
            }
        }

        if rules.is_empty() {
            return Self::fallback();
        }

        Self { rules }
    }

    /// Reads the list from the per-rule config keys.
    ///
    /// `num_rules` is clamped to `1..=10`; reading stops at the first rule whose
    /// text key is missing.
    pub fn load(config: &dyn ConfigStore) -> Self {
        let count = config
            .get_int(keys::NUM_RULES)
            .unwrap_or(1)
            .clamp(1, MAX_RULES as i64) as usize;

        let mut rules = Vec::with_capacity(count);
        for idx in 0..count {
            let Some(text) = config.get_string(&keys::rule_string(idx)) else {
                break;
            };

            let mode = config.get_int(&keys::rule_mode(idx)).unwrap_or(0);
            let item = config.get_int(&keys::rule_item(idx)).unwrap_or(0);

            rules.push(FilterRule::new(
                Conjunction::from_code(mode as i32),
                Property::from_code(item as i32),
                text,
            ));
        }

        Self { rules }
    }

    /// Writes the list to the per-rule config keys.
    pub fn store(&self, config: &dyn ConfigStore) {
        config.set_int(keys::NUM_RULES, self.rules.len() as i64);

        for (idx, rule) in self.rules.iter().enumerate() {
            config.set_int(&keys::rule_mode(idx), rule.conjunction.code() as i64);
            config.set_int(&keys::rule_item(idx), rule.property.code() as i64);
            config.set_string(&keys::rule_string(idx), &rule.text);
        }
    }

    fn fallback() -> Self {
        Self {
            rules: vec![FilterRule::default()],
        }
    }
}

// <list> ::= <count> ":" { <mode> ":" <item> ":" <text> "$" }
fn header(input: &str) -> IResult<&str, usize> {
    terminated(map_res(digit1, str::parse::<usize>), char(':')).parse(input)
}

fn integer(input: &str) -> IResult<&str, i32> {
    map_res(recognize((opt(char('-')), digit1)), str::parse::<i32>).parse(input)
}

fn serialized_rule(input: &str) -> IResult<&str, FilterRule> {
    map(
        (
            terminated(integer, char(':')),
            terminated(integer, char(':')),
            terminated(take_till1(|c: char| c == '$'), opt(char('$'))),
        ),
        |(mode, item, text): (i32, i32, &str)| {
            FilterRule::new(Conjunction::from_code(mode), Property::from_code(item), text)
        },
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::{Conjunction, FilterRule, MAX_RULES, RuleList, compile, compile_config};
    use crate::{
        config::{ConfigStore, MemoryConfig, keys},
        query::{camera::CameraIndex, rule::Property},
    };

    fn rule(conjunction: Conjunction, property: Property, text: &str) -> FilterRule {
        FilterRule::new(conjunction, property, text)
    }

    #[test]
    fn test_compile_folds_conjunctions() {
        let rules = vec![
            rule(Conjunction::Or, Property::Iso, "400"),
            rule(Conjunction::And, Property::Lens, "50mm"),
            rule(Conjunction::Or, Property::History, "altered"),
            rule(Conjunction::AndNot, Property::ColorLabel, "red"),
        ];

        assert_eq!(
            "((iso = 400) and (lens like '%50mm%') or (id in (select imgid from history)) and not (id in (select imgid from color_labels where color = 0)))",
            compile(&rules, &CameraIndex::default())
        );
    }

    #[test]
    fn test_compile_is_idempotent() {
        let rules = vec![
            rule(Conjunction::And, Property::Day, "[2020;2021]"),
            rule(Conjunction::Or, Property::Tag, "holiday%"),
        ];
        let cameras = CameraIndex::default();

        assert_eq!(compile(&rules, &cameras), compile(&rules, &cameras));
    }

    #[test]
    fn test_compile_empty_and_oversized() {
        let cameras = CameraIndex::default();
        assert_eq!("(1=1)", compile(&[], &cameras));

        let rules = vec![rule(Conjunction::Or, Property::Iso, "100"); MAX_RULES + 3];
        let sql = compile(&rules, &cameras);
        assert_eq!(MAX_RULES, sql.matches("(iso = 100)").count());
    }

    #[test]
    fn test_serialize_encodes_empty_text() {
        let rules = RuleList::new(vec![
            rule(Conjunction::And, Property::FilmRoll, "abc"),
            rule(Conjunction::Or, Property::Tag, ""),
        ]);

        let buf = rules.serialize();
        assert_eq!("2:0:0:abc$1:11:%$", buf);

        let decoded = RuleList::deserialize(&buf);
        assert_eq!(2, decoded.len());
        assert_eq!("abc", decoded.rules()[0].text);
        assert_eq!("%", decoded.rules()[1].text);
        assert_eq!(Conjunction::Or, decoded.rules()[1].conjunction);
        assert_eq!(Property::Tag, decoded.rules()[1].property);
    }

    #[test]
    fn test_serialize_round_trip() {
        let rules = RuleList::new(vec![
            rule(Conjunction::And, Property::Camera, "Canon EOS: R5"),
            rule(Conjunction::AndNot, Property::Title, "it's [a] test"),
            rule(Conjunction::Or, Property::Unknown(77), "x"),
        ]);

        assert_eq!(rules, RuleList::deserialize(&rules.serialize()));
    }

    #[test]
    fn test_deserialize_recovers_from_garbage() {
        let fallback = RuleList::new(vec![FilterRule::default()]);

        assert_eq!(fallback, RuleList::deserialize(""));
        assert_eq!(fallback, RuleList::deserialize("0:"));
        assert_eq!(fallback, RuleList::deserialize("two:0:0:abc$"));
        assert_eq!(fallback, RuleList::deserialize("1:x:0:abc$"));
    }

    #[test]
    fn test_deserialize_truncates_at_malformed_rule() {
        let decoded = RuleList::deserialize("3:0:7:100$1:oops$0:8:2020$");

        assert_eq!(
            RuleList::new(vec![rule(Conjunction::And, Property::Iso, "100")]),
            decoded
        );
    }

    #[test]
    fn test_deserialize_tolerates_missing_trailing_separator() {
        let decoded = RuleList::deserialize("1:0:19:IMG_");

        assert_eq!(
            RuleList::new(vec![rule(Conjunction::And, Property::Filename, "IMG_")]),
            decoded
        );
    }

    #[test]
    fn test_store_and_load() {
        let config = MemoryConfig::new();
        let rules = RuleList::new(vec![
            rule(Conjunction::And, Property::Iso, "[100;400]"),
            rule(Conjunction::Or, Property::Lens, "35"),
        ]);

        rules.store(&config);

        assert_eq!(Some(2), config.get_int(keys::NUM_RULES));
        assert_eq!(rules, RuleList::load(&config));
    }

    #[test]
    fn test_load_stops_at_missing_text() {
        let config = MemoryConfig::new();
        config.set_int(keys::NUM_RULES, 3);
        config.set_int(&keys::rule_item(0), Property::Iso.code() as i64);
        config.set_string(&keys::rule_string(0), "200");
        config.set_int(&keys::rule_item(1), Property::Lens.code() as i64);
        config.set_int(&keys::rule_mode(2), Conjunction::Or.code() as i64);
        config.set_string(&keys::rule_string(2), "never reached");

        assert_eq!(
            "((iso = 200))",
            compile_config(&config, &CameraIndex::default())
        );
    }

    #[test]
    fn test_load_clamps_rule_count() {
        let config = MemoryConfig::new();
        config.set_int(keys::NUM_RULES, 0);
        config.set_string(&keys::rule_string(0), "%");
        config.set_string(&keys::rule_string(1), "%");

        assert_eq!(1, RuleList::load(&config).len());

        config.set_int(keys::NUM_RULES, 25);
        for idx in 0..25 {
            config.set_string(&keys::rule_string(idx), "%");
        }

        assert_eq!(MAX_RULES, RuleList::load(&config).len());
    }
}
