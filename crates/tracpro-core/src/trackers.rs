//! Tracker domain: reporting periods, threshold configuration, and the
//! pure evaluation predicates the tracker engine applies to snapshots.

use std::fmt;

use thiserror::Error;

/// How often a tracker reports and resets its contact fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingPeriod {
    Daily,
    Weekly,
    Fortnightly,
    Monthly,
    Quarterly,
}

impl ReportingPeriod {
    pub const ALL: [ReportingPeriod; 5] = [
        ReportingPeriod::Daily,
        ReportingPeriod::Weekly,
        ReportingPeriod::Fortnightly,
        ReportingPeriod::Monthly,
        ReportingPeriod::Quarterly,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ReportingPeriod::Daily => "daily",
            ReportingPeriod::Weekly => "weekly",
            ReportingPeriod::Fortnightly => "fortnightly",
            ReportingPeriod::Monthly => "monthly",
            ReportingPeriod::Quarterly => "quarterly",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "daily" => Some(ReportingPeriod::Daily),
            "weekly" => Some(ReportingPeriod::Weekly),
            "fortnightly" => Some(ReportingPeriod::Fortnightly),
            "monthly" => Some(ReportingPeriod::Monthly),
            "quarterly" => Some(ReportingPeriod::Quarterly),
            _ => None,
        }
    }

    #[must_use]
    pub fn days(self) -> i64 {
        match self {
            ReportingPeriod::Daily => 1,
            ReportingPeriod::Weekly => 7,
            ReportingPeriod::Fortnightly => 14,
            ReportingPeriod::Monthly => 30,
            ReportingPeriod::Quarterly => 90,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ReportingPeriod::Daily => "Daily",
            ReportingPeriod::Weekly => "Weekly",
            ReportingPeriod::Fortnightly => "Fortnightly",
            ReportingPeriod::Monthly => "Monthly",
            ReportingPeriod::Quarterly => "Quarterly",
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Group-membership action a rule performs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Add,
    Remove,
}

impl RuleAction {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            RuleAction::Add => "add",
            RuleAction::Remove => "remove",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "add" => Some(RuleAction::Add),
            "remove" => Some(RuleAction::Remove),
            _ => None,
        }
    }
}

/// Comparison a group rule applies between a snapshot value and its
/// resolved threshold. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCondition {
    Greater,
    Less,
}

impl RuleCondition {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            RuleCondition::Greater => "greater",
            RuleCondition::Less => "less",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "greater" => Some(RuleCondition::Greater),
            "less" => Some(RuleCondition::Less),
            _ => None,
        }
    }

    #[must_use]
    pub fn matches(self, value: i64, threshold: i64) -> bool {
        match self {
            RuleCondition::Greater => value > threshold,
            RuleCondition::Less => value < threshold,
        }
    }
}

/// Which configured tracker threshold a group rule compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdSelector {
    GroupMaximum,
    GroupMinimum,
    ContactMaximum,
    ContactMinimum,
}

impl ThresholdSelector {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ThresholdSelector::GroupMaximum => "group_maximum",
            ThresholdSelector::GroupMinimum => "group_minimum",
            ThresholdSelector::ContactMaximum => "contact_maximum",
            ThresholdSelector::ContactMinimum => "contact_minimum",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "group_maximum" => Some(ThresholdSelector::GroupMaximum),
            "group_minimum" => Some(ThresholdSelector::GroupMinimum),
            "contact_maximum" => Some(ThresholdSelector::ContactMaximum),
            "contact_minimum" => Some(ThresholdSelector::ContactMinimum),
            _ => None,
        }
    }
}

/// A tracker's configured threshold values. Targets are required; the four
/// min/max bounds are optional but at least one must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub minimum_group: Option<i64>,
    pub target_group: i64,
    pub maximum_group: Option<i64>,
    pub minimum_contact: Option<i64>,
    pub target_contact: i64,
    pub maximum_contact: Option<i64>,
}

impl Thresholds {
    /// Resolves a selector to its configured value; `None` when that bound
    /// was not configured.
    #[must_use]
    pub fn resolve(&self, selector: ThresholdSelector) -> Option<i64> {
        match selector {
            ThresholdSelector::GroupMaximum => self.maximum_group,
            ThresholdSelector::GroupMinimum => self.minimum_group,
            ThresholdSelector::ContactMaximum => self.maximum_contact,
            ThresholdSelector::ContactMinimum => self.minimum_contact,
        }
    }

    /// Validates the configuration: at least one min/max bound set, each
    /// set minimum strictly below its target, each set maximum strictly
    /// above. Violations are reported per field so a form layer can attach
    /// them to inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdErrors`] listing every violated field.
    pub fn validate(&self) -> Result<(), ThresholdErrors> {
        let mut errors = Vec::new();

        if self.minimum_group.is_none()
            && self.maximum_group.is_none()
            && self.minimum_contact.is_none()
            && self.maximum_contact.is_none()
        {
            errors.push(FieldError {
                field: "thresholds",
                message: "at least one minimum or maximum threshold is required".to_string(),
            });
        }

        if self.minimum_group.is_some_and(|v| v >= self.target_group) {
            errors.push(FieldError {
                field: "minimum_group",
                message: "minimum group threshold must be less than the target".to_string(),
            });
        }
        if self.maximum_group.is_some_and(|v| v <= self.target_group) {
            errors.push(FieldError {
                field: "maximum_group",
                message: "maximum group threshold must be greater than the target".to_string(),
            });
        }
        if self.minimum_contact.is_some_and(|v| v >= self.target_contact) {
            errors.push(FieldError {
                field: "minimum_contact",
                message: "minimum contact threshold must be less than the target".to_string(),
            });
        }
        if self.maximum_contact.is_some_and(|v| v <= self.target_contact) {
            errors.push(FieldError {
                field: "maximum_contact",
                message: "maximum contact threshold must be greater than the target".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ThresholdErrors { errors })
        }
    }
}

/// One field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Threshold configuration violations, one entry per offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tracker thresholds: {}", .errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect::<Vec<_>>().join("; "))]
pub struct ThresholdErrors {
    pub errors: Vec<FieldError>,
}

/// A captured contact-field value, the tracker engine's unit of evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotValue {
    pub snapshot_id: i64,
    pub contact_id: i64,
    pub value: i64,
}

/// Snapshots at or below the contact minimum (inclusive boundary).
#[must_use]
pub fn snapshots_below_or_at_minimum<'a>(
    snapshots: &'a [SnapshotValue],
    thresholds: &Thresholds,
) -> Vec<&'a SnapshotValue> {
    match thresholds.minimum_contact {
        Some(min) => snapshots.iter().filter(|s| s.value <= min).collect(),
        None => Vec::new(),
    }
}

/// Snapshots at or above the contact maximum (inclusive boundary).
#[must_use]
pub fn snapshots_over_or_at_maximum<'a>(
    snapshots: &'a [SnapshotValue],
    thresholds: &Thresholds,
) -> Vec<&'a SnapshotValue> {
    match thresholds.maximum_contact {
        Some(max) => snapshots.iter().filter(|s| s.value >= max).collect(),
        None => Vec::new(),
    }
}

/// Sum of all snapshot values in the tracker's scope.
#[must_use]
pub fn total_group_sum(snapshots: &[SnapshotValue]) -> i64 {
    snapshots.iter().map(|s| s.value).sum()
}

/// Whether the group sum breaches the group minimum (inclusive).
#[must_use]
pub fn under_group_minimum(sum: i64, thresholds: &Thresholds) -> bool {
    thresholds.minimum_group.is_some_and(|min| sum <= min)
}

/// Whether the group sum breaches the group maximum (inclusive).
#[must_use]
pub fn over_group_maximum(sum: i64, thresholds: &Thresholds) -> bool {
    thresholds.maximum_group.is_some_and(|max| sum >= max)
}

/// Splits a stored recipient list ("a@x.org, b@y.org") into addresses.
#[must_use]
pub fn recipients(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds {
            minimum_group: Some(40),
            target_group: 50,
            maximum_group: Some(60),
            minimum_contact: Some(10),
            target_contact: 20,
            maximum_contact: Some(30),
        }
    }

    fn snap(contact_id: i64, value: i64) -> SnapshotValue {
        SnapshotValue {
            snapshot_id: contact_id,
            contact_id,
            value,
        }
    }

    #[test]
    fn reporting_period_codes_round_trip() {
        for period in ReportingPeriod::ALL {
            assert_eq!(ReportingPeriod::from_code(period.code()), Some(period));
        }
        assert_eq!(ReportingPeriod::Fortnightly.days(), 14);
    }

    #[test]
    fn selector_resolution_is_a_closed_mapping() {
        let t = thresholds();
        assert_eq!(t.resolve(ThresholdSelector::GroupMaximum), Some(60));
        assert_eq!(t.resolve(ThresholdSelector::GroupMinimum), Some(40));
        assert_eq!(t.resolve(ThresholdSelector::ContactMaximum), Some(30));
        assert_eq!(t.resolve(ThresholdSelector::ContactMinimum), Some(10));

        let unset = Thresholds {
            minimum_group: None,
            ..thresholds()
        };
        assert_eq!(unset.resolve(ThresholdSelector::GroupMinimum), None);
    }

    #[test]
    fn validation_requires_at_least_one_bound() {
        let t = Thresholds {
            minimum_group: None,
            maximum_group: None,
            minimum_contact: None,
            maximum_contact: None,
            ..thresholds()
        };
        let err = t.validate().unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].field, "thresholds");
    }

    #[test]
    fn validation_reports_each_bad_field() {
        let t = Thresholds {
            minimum_group: Some(50),  // not < target 50
            maximum_contact: Some(20), // not > target 20
            ..thresholds()
        };
        let err = t.validate().unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["minimum_group", "maximum_contact"]);
    }

    #[test]
    fn valid_configuration_passes() {
        assert!(thresholds().validate().is_ok());
    }

    #[test]
    fn contact_boundaries_are_inclusive() {
        let snaps = vec![snap(1, 10), snap(2, 11), snap(3, 30), snap(4, 29)];
        let t = thresholds();

        let low = snapshots_below_or_at_minimum(&snaps, &t);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].value, 10);

        let high = snapshots_over_or_at_maximum(&snaps, &t);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].value, 30);
    }

    #[test]
    fn unset_contact_bounds_flag_nothing() {
        let snaps = vec![snap(1, -100), snap(2, 100)];
        let t = Thresholds {
            minimum_contact: None,
            maximum_contact: None,
            ..thresholds()
        };
        assert!(snapshots_below_or_at_minimum(&snaps, &t).is_empty());
        assert!(snapshots_over_or_at_maximum(&snaps, &t).is_empty());
    }

    #[test]
    fn group_sum_scenario() {
        // Two contacts with values 5 and 40: sum 45, one below minimum,
        // one over maximum.
        let snaps = vec![snap(1, 5), snap(2, 40)];
        let t = Thresholds {
            minimum_group: Some(40),
            target_group: 50,
            maximum_group: Some(60),
            minimum_contact: Some(10),
            target_contact: 20,
            maximum_contact: Some(30),
        };

        assert_eq!(snapshots_below_or_at_minimum(&snaps, &t)[0].value, 5);
        assert_eq!(snapshots_over_or_at_maximum(&snaps, &t)[0].value, 40);

        let sum = total_group_sum(&snaps);
        assert_eq!(sum, 45);
        assert!(!under_group_minimum(sum, &t)); // 45 > 40
        assert!(!over_group_maximum(sum, &t)); // 45 < 60

        let tight = Thresholds {
            maximum_group: Some(45),
            ..t
        };
        assert!(over_group_maximum(sum, &tight)); // boundary counts
    }

    #[test]
    fn rule_conditions_are_strict() {
        assert!(RuleCondition::Greater.matches(11, 10));
        assert!(!RuleCondition::Greater.matches(10, 10));
        assert!(RuleCondition::Less.matches(9, 10));
        assert!(!RuleCondition::Less.matches(10, 10));
    }

    #[test]
    fn recipient_list_parsing() {
        assert_eq!(
            recipients("a@example.org, b@example.org"),
            vec!["a@example.org", "b@example.org"]
        );
        assert!(recipients("").is_empty());
        assert_eq!(recipients("solo@example.org"), vec!["solo@example.org"]);
    }
}
