use chrono::{DateTime, Utc};
use tracing::debug;

use super::{RuleSet, RuleSetStatus};
use crate::workflows::royalty::error::RoyaltyError;

/// Select the single ACTIVE rule set of `currency` covering `at`.
///
/// More than one match means the store's non-overlap invariant was broken;
/// that is reported rather than resolved by picking one.
pub fn resolve<'a>(
    rule_sets: &'a [RuleSet],
    currency: &str,
    at: DateTime<Utc>,
) -> Result<&'a RuleSet, RoyaltyError> {
    let mut candidates = rule_sets.iter().filter(|rule_set| {
        rule_set.status == RuleSetStatus::Active
            && rule_set.currency == currency
            && rule_set.covers(at)
    });

    let first = candidates
        .next()
        .ok_or_else(|| RoyaltyError::NoApplicableRuleSet {
            currency: currency.to_string(),
            at,
        })?;

    let rest: Vec<_> = candidates.map(|rule_set| rule_set.id).collect();
    if !rest.is_empty() {
        let mut ids = vec![first.id];
        ids.extend(rest);
        return Err(RoyaltyError::AmbiguousRuleSet {
            currency: currency.to_string(),
            at,
            candidates: ids,
        });
    }

    debug!(rule_set_id = %first.id, version = first.version, %currency, %at, "resolved rule set");
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::royalty::domain::RuleSetId;
    use crate::workflows::royalty::rules::OverridePolicy;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn rule_set(
        currency: &str,
        status: RuleSetStatus,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> RuleSet {
        RuleSet {
            id: RuleSetId::generate(),
            name: "resolver".to_string(),
            version: 1,
            currency: currency.to_string(),
            status,
            effective_from: from,
            effective_to: to,
            rates: BTreeMap::from([("NEWS".to_string(), Decimal::from(1000))]),
            multipliers: Vec::new(),
            media_fees: Vec::new(),
            policy: OverridePolicy {
                editor_override_max_percent: Decimal::from(10),
                manager_override_max_percent: Decimal::from(20),
                require_note_for_override: false,
                allow_manual_base_rate_override: false,
            },
            created_at: from,
            created_by_user_id: "system".to_string(),
            revision: 1,
        }
    }

    fn jan() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn jul() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn picks_the_range_containing_the_instant() {
        let first = rule_set("VND", RuleSetStatus::Active, jan(), Some(jul()));
        let second = rule_set("VND", RuleSetStatus::Active, jul(), None);
        let all = vec![first.clone(), second.clone()];

        let march = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();
        assert_eq!(resolve(&all, "VND", march).unwrap().id, first.id);
        assert_eq!(resolve(&all, "VND", jul()).unwrap().id, second.id);
    }

    #[test]
    fn ignores_inactive_and_foreign_currency() {
        let inactive = rule_set("VND", RuleSetStatus::Inactive, jan(), None);
        let usd = rule_set("USD", RuleSetStatus::Active, jan(), None);
        let all = vec![inactive, usd];

        match resolve(&all, "VND", jul()) {
            Err(RoyaltyError::NoApplicableRuleSet { currency, .. }) => assert_eq!(currency, "VND"),
            other => panic!("expected no applicable rule set, got {other:?}"),
        }
    }

    #[test]
    fn reports_ambiguity_instead_of_choosing() {
        let all = vec![
            rule_set("VND", RuleSetStatus::Active, jan(), None),
            rule_set("VND", RuleSetStatus::Active, jan(), Some(jul())),
        ];

        match resolve(&all, "VND", jan()) {
            Err(RoyaltyError::AmbiguousRuleSet { candidates, .. }) => {
                assert_eq!(candidates.len(), 2)
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn instant_before_start_is_not_covered() {
        let all = vec![rule_set("VND", RuleSetStatus::Active, jul(), None)];
        assert!(resolve(&all, "VND", jan()).is_err());
    }
}
