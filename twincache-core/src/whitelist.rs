//! Whitelist parsing.
//!
//! A whitelist is a comma separated list of tokens:
//!
//! ```text
//! tags.Building, tags.Group*, reported.Type, reported.Config.*
//! ```
//!
//! The category prefix (`tags.` / `reported.`) is matched case-insensitively.
//! A trailing `*` turns the token into a prefix rule; anything else is an
//! exact name. Tokens with no recognized category, or with nothing after
//! the category, are dropped without error.

use crate::record::NameSet;
use std::fmt;

const TAG_PREFIX: &str = "tags.";
const REPORTED_PREFIX: &str = "reported.";

/// Which name set a whitelist token applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameCategory {
    Tag,
    Reported,
}

impl fmt::Display for NameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameCategory::Tag => f.write_str("tags"),
            NameCategory::Reported => f.write_str("reported"),
        }
    }
}

/// How a whitelist token matches names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Exact,
    Prefix,
}

/// A classified whitelist token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistToken<'a> {
    pub category: NameCategory,
    pub kind: TokenKind,
    /// Name or prefix, with the category and any trailing `*` removed.
    pub value: &'a str,
}

/// Case-insensitive `strip_prefix` that never splits a UTF-8 character.
fn strip_prefix_ignore_case<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    let head = token.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        token.get(prefix.len()..)
    } else {
        None
    }
}

/// Classify one raw token. Returns `None` for tokens that are dropped.
pub fn classify_token(raw: &str) -> Option<WhitelistToken<'_>> {
    let token = raw.trim();

    let (category, rest) = if let Some(rest) = strip_prefix_ignore_case(token, TAG_PREFIX) {
        (NameCategory::Tag, rest)
    } else if let Some(rest) = strip_prefix_ignore_case(token, REPORTED_PREFIX) {
        (NameCategory::Reported, rest)
    } else {
        return None;
    };

    if rest.is_empty() {
        return None;
    }

    match rest.strip_suffix('*') {
        Some(prefix) => Some(WhitelistToken {
            category,
            kind: TokenKind::Prefix,
            value: prefix,
        }),
        None => Some(WhitelistToken {
            category,
            kind: TokenKind::Exact,
            value: rest,
        }),
    }
}

/// Parsed whitelist: exact names plus prefix rules, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    full_names: NameSet,
    prefixes: NameSet,
}

impl Whitelist {
    /// Parse a whitelist specification string.
    ///
    /// Each token lands in exactly one set, but the exact and prefix sets
    /// are not disjoint in general: `tags.x, tags.x*` puts `x` in both.
    pub fn parse(spec: &str) -> Self {
        let mut whitelist = Whitelist::default();

        for token in spec.split(',').filter_map(classify_token) {
            let target = match token.kind {
                TokenKind::Exact => &mut whitelist.full_names,
                TokenKind::Prefix => &mut whitelist.prefixes,
            };
            let set = match token.category {
                NameCategory::Tag => &mut target.tags,
                NameCategory::Reported => &mut target.reported_properties,
            };
            set.insert(token.value.to_string());
        }

        whitelist
    }

    /// Names that are always published, whatever upstream reports.
    pub fn full_names(&self) -> &NameSet {
        &self.full_names
    }

    /// Prefix rules applied to upstream registry names.
    pub fn prefixes(&self) -> &NameSet {
        &self.prefixes
    }

    /// Whether any prefix rule exists. Without one the device registry
    /// never needs to be queried.
    pub fn has_prefixes(&self) -> bool {
        !self.prefixes.is_empty()
    }

    /// Case-sensitive prefix test against the rules of one category.
    pub fn matches_prefix(&self, category: NameCategory, name: &str) -> bool {
        let rules = match category {
            NameCategory::Tag => &self.prefixes.tags,
            NameCategory::Reported => &self.prefixes.reported_properties,
        };
        rules.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Keep only the names of `all` matched by a prefix rule.
    pub fn filter_by_prefix(&self, all: &NameSet) -> NameSet {
        NameSet {
            tags: all
                .tags
                .iter()
                .filter(|name| self.matches_prefix(NameCategory::Tag, name))
                .cloned()
                .collect(),
            reported_properties: all
                .reported_properties
                .iter()
                .filter(|name| self.matches_prefix(NameCategory::Reported, name))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_mixed_whitelist() {
        let whitelist = Whitelist::parse("tags.Building, tags.Group, reported.Type, reported.Config.*");
        assert_eq!(
            whitelist.full_names(),
            &NameSet::new(["Building", "Group"], ["Type"])
        );
        assert_eq!(
            whitelist.prefixes(),
            &NameSet::new(Vec::<String>::new(), ["Config."])
        );
        assert!(whitelist.has_prefixes());
    }

    #[test]
    fn test_category_prefix_is_case_insensitive() {
        let whitelist = Whitelist::parse("TAGS.Floor,Reported.Firmware*");
        assert!(whitelist.full_names().tags.contains("Floor"));
        assert!(whitelist.prefixes().reported_properties.contains("Firmware"));
    }

    #[test]
    fn test_malformed_tokens_are_dropped() {
        let whitelist = Whitelist::parse("desired.Mode, Building, tags., , reported, tags");
        assert_eq!(whitelist, Whitelist::default());
    }

    #[test]
    fn test_empty_and_exact_only_have_no_prefixes() {
        assert!(!Whitelist::parse("").has_prefixes());
        assert!(!Whitelist::parse("tags.a, reported.b").has_prefixes());
    }

    #[test]
    fn test_star_alone_matches_everything_in_category() {
        let whitelist = Whitelist::parse("tags.*");
        assert!(whitelist.matches_prefix(NameCategory::Tag, "anything"));
        assert!(!whitelist.matches_prefix(NameCategory::Reported, "anything"));
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let whitelist = Whitelist::parse("reported.Config.*");
        assert!(whitelist.matches_prefix(NameCategory::Reported, "Config.Interval"));
        assert!(!whitelist.matches_prefix(NameCategory::Reported, "config.Interval"));
    }

    #[test]
    fn test_filter_by_prefix() {
        let whitelist = Whitelist::parse("tags.Bui*, reported.Config.*");
        let all = NameSet::new(["Building", "Group"], ["Type", "Config.Interval", "Other"]);
        assert_eq!(
            whitelist.filter_by_prefix(&all),
            NameSet::new(["Building"], ["Config.Interval"])
        );
    }

    #[test]
    fn test_classify_token_does_not_split_multibyte() {
        assert_eq!(classify_token("tagé.x"), None);
        assert_eq!(classify_token("ü"), None);
    }

    fn token_strategy() -> impl Strategy<Value = String> {
        let category = prop_oneof![
            Just("tags."),
            Just("TAGS."),
            Just("reported."),
            Just("Reported."),
            Just("desired."),
            Just(""),
        ];
        (category, "[A-Za-z][A-Za-z0-9.]{0,8}", any::<bool>())
            .prop_map(|(c, name, star)| format!("{}{}{}", c, name, if star { "*" } else { "" }))
    }

    #[test]
    fn test_exact_and_prefix_may_overlap() {
        let whitelist = Whitelist::parse("tags.x, tags.x*, reported.y*");
        assert!(whitelist.full_names().tags.contains("x"));
        assert!(whitelist.prefixes().tags.contains("x"));
        assert!(whitelist.full_names().reported_properties.is_empty());
        assert!(whitelist.prefixes().reported_properties.contains("y"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every token lands in exactly one category/kind, or is dropped.
        #[test]
        fn prop_every_token_classified_once(tokens in prop::collection::vec(token_strategy(), 0..12)) {
            let spec = tokens.join(", ");
            let whitelist = Whitelist::parse(&spec);

            for token in &tokens {
                let lower = token.to_ascii_lowercase();
                let recognized = ["tags.", "reported."]
                    .iter()
                    .any(|c| lower.starts_with(c) && lower.len() > c.len());
                match classify_token(token) {
                    None => prop_assert!(!recognized),
                    Some(t) => {
                        prop_assert!(recognized);
                        let (exact, prefix) = match t.category {
                            NameCategory::Tag => (&whitelist.full_names().tags, &whitelist.prefixes().tags),
                            NameCategory::Reported => (
                                &whitelist.full_names().reported_properties,
                                &whitelist.prefixes().reported_properties,
                            ),
                        };
                        match t.kind {
                            TokenKind::Exact => {
                                prop_assert!(!token.ends_with('*'));
                                prop_assert!(exact.contains(t.value));
                            }
                            TokenKind::Prefix => {
                                prop_assert!(token.ends_with('*'));
                                prop_assert!(prefix.contains(t.value));
                            }
                        }
                    }
                }
            }
        }

        /// Names listed only one way land only in that way's set.
        #[test]
        fn prop_single_kind_names_stay_in_their_set(
            exact in prop::collection::btree_set("[a-m][a-z]{0,5}", 0..6),
            prefixes in prop::collection::btree_set("[n-z][a-z]{0,5}", 0..6),
        ) {
            let mut tokens: Vec<String> = exact.iter().map(|n| format!("tags.{}", n)).collect();
            tokens.extend(prefixes.iter().map(|p| format!("tags.{}*", p)));
            tokens.extend(exact.iter().map(|n| format!("reported.{}", n)));
            tokens.extend(prefixes.iter().map(|p| format!("reported.{}*", p)));

            let whitelist = Whitelist::parse(&tokens.join(","));
            prop_assert!(whitelist.full_names().tags.is_disjoint(&whitelist.prefixes().tags));
            prop_assert!(whitelist
                .full_names()
                .reported_properties
                .is_disjoint(&whitelist.prefixes().reported_properties));
            prop_assert_eq!(&whitelist.full_names().tags, &exact);
            prop_assert_eq!(&whitelist.prefixes().reported_properties, &prefixes);
        }
    }
}
