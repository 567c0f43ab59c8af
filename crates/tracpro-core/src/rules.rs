//! Categorization rules extracted from RapidPro flow definitions.
//!
//! Each question carries an ordered list of [`Rule`]s, one per branch in the
//! flow's ruleset (the implicit catch-all "Other" branch is excluded at sync
//! time). [`categorize`] walks the rules in order and returns the category of
//! the first test that matches the raw answer value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::polls::QuestionType;

/// RapidPro's sentinel category meaning "no categorization"; stored as NULL.
pub const ALL_RESPONSES: &str = "All Responses";

/// Fallback category when no rule test matches.
pub const OTHER_CATEGORY: &str = "Other";

/// A category label from RapidPro: either a plain string or a
/// multi-language mapping of locale to label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryValue {
    Plain(String),
    Localized(BTreeMap<String, String>),
}

impl CategoryValue {
    /// Collapses to a single label: a plain string as-is, a localized
    /// mapping by preferring the `"base"` locale and falling back to the
    /// first entry in key order. Returns `None` only for an empty mapping.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            CategoryValue::Plain(s) => Some(s),
            CategoryValue::Localized(map) => map
                .get("base")
                .or_else(|| map.values().next())
                .map(String::as_str),
        }
    }
}

/// One test from a RapidPro ruleset rule, tagged by the `type` field of the
/// flow-definition JSON. Numeric comparison operands arrive as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleTest {
    /// Matches if any of the test words appears in the value.
    ContainsAny { test: CategoryValue },
    /// Matches if all of the test words appear in the value.
    Contains { test: CategoryValue },
    /// Matches if the value starts with the test phrase.
    #[serde(rename = "starts")]
    StartsWith { test: CategoryValue },
    /// Matches if the regex matches anywhere in the value.
    Regex { test: CategoryValue },
    /// Matches if the value contains a number.
    Number,
    /// Matches if the value's number equals the operand.
    Eq { test: String },
    /// Matches if the value's number is strictly below the operand.
    Lt { test: String },
    /// Matches if the value's number is strictly above the operand.
    Gt { test: String },
    /// Matches if the value's number is within `[min, max]`.
    Between { min: String, max: String },
}

impl RuleTest {
    /// Whether this test kind operates on the numeric value of the answer.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            RuleTest::Number
                | RuleTest::Eq { .. }
                | RuleTest::Lt { .. }
                | RuleTest::Gt { .. }
                | RuleTest::Between { .. }
        )
    }
}

/// One categorization rule: a test and the category it yields on a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub test: RuleTest,
    pub category: CategoryValue,
}

/// Returns the category of the first rule whose test matches `value`, or
/// [`OTHER_CATEGORY`] when none match.
#[must_use]
pub fn categorize(value: &str, rules: &[Rule]) -> String {
    for rule in rules {
        if passes_test(value, &rule.test) {
            return rule
                .category
                .label()
                .unwrap_or(OTHER_CATEGORY)
                .to_string();
        }
    }
    OTHER_CATEGORY.to_string()
}

/// Evaluates a single test against a raw answer value.
#[must_use]
pub fn passes_test(value: &str, test: &RuleTest) -> bool {
    match test {
        RuleTest::ContainsAny { test } => {
            let words = value_words(value);
            test_words(test).iter().any(|w| words.contains(w))
        }
        RuleTest::Contains { test } => {
            let words = value_words(value);
            let wanted = test_words(test);
            !wanted.is_empty() && wanted.iter().all(|w| words.contains(w))
        }
        RuleTest::StartsWith { test } => test.label().is_some_and(|phrase| {
            value
                .trim()
                .to_lowercase()
                .starts_with(&phrase.trim().to_lowercase())
        }),
        RuleTest::Regex { test } => test
            .label()
            .and_then(|pattern| regex::Regex::new(pattern).ok())
            .is_some_and(|re| re.is_match(value)),
        RuleTest::Number => extract_number(value).is_some(),
        RuleTest::Eq { test } => compare(value, test, |v, t| (v - t).abs() < f64::EPSILON),
        RuleTest::Lt { test } => compare(value, test, |v, t| v < t),
        RuleTest::Gt { test } => compare(value, test, |v, t| v > t),
        RuleTest::Between { min, max } => match (extract_number(value), parse(min), parse(max)) {
            (Some(v), Some(lo), Some(hi)) => lo <= v && v <= hi,
            _ => false,
        },
    }
}

/// Inspects the tests across a question's rules to infer its type.
///
/// No tests means open-ended; all-numeric tests mean numeric; any mix means
/// multiple choice. Runs once at question creation and is never applied to
/// a question whose type is already set.
#[must_use]
pub fn infer_question_type(rules: &[Rule]) -> QuestionType {
    if rules.is_empty() {
        QuestionType::Open
    } else if rules.iter().all(|r| r.test.is_numeric()) {
        QuestionType::Numeric
    } else {
        QuestionType::MultipleChoice
    }
}

fn compare(value: &str, operand: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    match (extract_number(value), parse(operand)) {
        (Some(v), Some(t)) => op(v, t),
        _ => false,
    }
}

fn parse(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Finds the first numeric token in a free-text value, tolerating
/// surrounding punctuation ("about 12." yields 12.0).
#[must_use]
pub fn extract_number(value: &str) -> Option<f64> {
    value
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '-' && c != '.'))
        .find_map(|token| token.parse::<f64>().ok())
}

fn value_words(value: &str) -> Vec<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn test_words(test: &CategoryValue) -> Vec<String> {
    test.label().map(value_words).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(test: RuleTest, category: &str) -> Rule {
        Rule {
            test,
            category: CategoryValue::Plain(category.to_string()),
        }
    }

    #[test]
    fn categorize_returns_first_matching_rule() {
        let rules = vec![
            rule(
                RuleTest::Gt {
                    test: "10".to_string(),
                },
                "High",
            ),
            rule(
                RuleTest::Gt {
                    test: "0".to_string(),
                },
                "Low",
            ),
        ];
        assert_eq!(categorize("15", &rules), "High");
        assert_eq!(categorize("5", &rules), "Low");
        assert_eq!(categorize("-1", &rules), "Other");
    }

    #[test]
    fn categorize_with_no_rules_is_other() {
        assert_eq!(categorize("anything", &[]), "Other");
    }

    #[test]
    fn contains_any_matches_single_word() {
        let test = RuleTest::ContainsAny {
            test: CategoryValue::Plain("yes yeah".to_string()),
        };
        assert!(passes_test("Yes, we do", &test));
        assert!(passes_test("yeah", &test));
        assert!(!passes_test("no", &test));
    }

    #[test]
    fn contains_requires_all_words() {
        let test = RuleTest::Contains {
            test: CategoryValue::Plain("clean water".to_string()),
        };
        assert!(passes_test("the water is clean here", &test));
        assert!(!passes_test("the water is dirty", &test));
    }

    #[test]
    fn starts_with_is_case_insensitive() {
        let test = RuleTest::StartsWith {
            test: CategoryValue::Plain("No".to_string()),
        };
        assert!(passes_test("  no way", &test));
        assert!(!passes_test("oh no", &test));
    }

    #[test]
    fn between_is_inclusive_on_both_ends() {
        let test = RuleTest::Between {
            min: "1".to_string(),
            max: "10".to_string(),
        };
        assert!(passes_test("1", &test));
        assert!(passes_test("10", &test));
        assert!(!passes_test("11", &test));
    }

    #[test]
    fn number_extraction_handles_embedded_values() {
        assert_eq!(extract_number("about 12."), Some(12.0));
        assert_eq!(extract_number("-3 degrees"), Some(-3.0));
        assert_eq!(extract_number("none"), None);
        let test = RuleTest::Number;
        assert!(passes_test("we counted 7 cases", &test));
        assert!(!passes_test("we counted none", &test));
    }

    #[test]
    fn localized_category_prefers_base_locale() {
        let mut map = BTreeMap::new();
        map.insert("eng".to_string(), "Yes".to_string());
        map.insert("base".to_string(), "Oui".to_string());
        assert_eq!(CategoryValue::Localized(map).label(), Some("Oui"));
    }

    #[test]
    fn localized_category_falls_back_to_first_entry() {
        let mut map = BTreeMap::new();
        map.insert("fra".to_string(), "Non".to_string());
        map.insert("eng".to_string(), "No".to_string());
        // BTreeMap iterates keys in order, so "eng" is first.
        assert_eq!(CategoryValue::Localized(map).label(), Some("No"));
    }

    #[test]
    fn empty_localized_category_has_no_label() {
        assert_eq!(CategoryValue::Localized(BTreeMap::new()).label(), None);
    }

    #[test]
    fn rules_deserialize_from_flow_definition_json() {
        let raw = r#"[
            {"test": {"type": "contains_any", "test": {"base": "yes"}},
             "category": {"base": "Yes"}},
            {"test": {"type": "between", "min": "1", "max": "5"},
             "category": "1-5"},
            {"test": {"type": "number"}, "category": "Numeric"}
        ]"#;
        let rules: Vec<Rule> = serde_json::from_str(raw).expect("valid rule JSON");
        assert_eq!(rules.len(), 3);
        assert!(matches!(rules[0].test, RuleTest::ContainsAny { .. }));
        assert!(rules[1].test.is_numeric());
        assert_eq!(rules[2].category.label(), Some("Numeric"));
    }

    #[test]
    fn question_type_inference() {
        assert_eq!(infer_question_type(&[]), QuestionType::Open);

        let numeric = vec![
            rule(RuleTest::Number, "Any"),
            rule(
                RuleTest::Lt {
                    test: "5".to_string(),
                },
                "Low",
            ),
        ];
        assert_eq!(infer_question_type(&numeric), QuestionType::Numeric);

        let mixed = vec![
            rule(RuleTest::Number, "Any"),
            rule(
                RuleTest::ContainsAny {
                    test: CategoryValue::Plain("yes".to_string()),
                },
                "Yes",
            ),
        ];
        assert_eq!(infer_question_type(&mixed), QuestionType::MultipleChoice);
    }
}
