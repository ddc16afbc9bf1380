mod attributes;
mod snapshot;

pub use snapshot::{BaseSource, CalcSnapshot, MediaLine, SNAPSHOT_VERSION};

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{normalize_key, ArticleSnapshot, AuthorRef, Money};
use super::error::RoyaltyError;
use super::rules::RuleSet;
use attributes::ArticleAttributes;

/// Amounts produced for one article before any override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Calculation {
    pub base_amount: Money,
    pub multiplier_factor: Decimal,
    pub media_fee_total: Money,
    pub bonus_amount: Option<Money>,
    pub gross_amount: Money,
    pub final_amount: Money,
    pub snapshot: CalcSnapshot,
}

/// Stateless pricing: the same article and rule set always give the same output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculationEngine;

impl CalculationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(
        &self,
        article: &ArticleSnapshot,
        author: &AuthorRef,
        rule_set: &RuleSet,
    ) -> Result<Calculation, RoyaltyError> {
        let rate_key = normalize_key(&article.article_type);
        let (base_amount, base_source) = match rule_set.rate_for(&rate_key) {
            Some(rate) => (rate, BaseSource::RateTable),
            None => match article.manual_base_amount {
                Some(manual) if rule_set.policy.allow_manual_base_rate_override => {
                    if manual < Decimal::ZERO {
                        return Err(RoyaltyError::InvalidAmount(
                            "manualBaseAmount must not be negative".to_string(),
                        ));
                    }
                    (manual, BaseSource::Manual)
                }
                _ => {
                    return Err(RoyaltyError::UnknownArticleType {
                        article_type: article.article_type.clone(),
                        rule_set_id: rule_set.id,
                    })
                }
            },
        };

        let attributes = ArticleAttributes::derive(article, author);
        let mut applied_multipliers = BTreeMap::new();
        let mut multiplier_factor = Decimal::ONE;
        for rule in &rule_set.multipliers {
            if attributes.matches(rule.multiplier_type, &rule.key_name) {
                multiplier_factor = multiplier_factor
                    .checked_mul(rule.factor)
                    .ok_or_else(|| RoyaltyError::out_of_range("multiplier factor"))?;
                applied_multipliers.insert(normalize_key(&rule.key_name), rule.factor);
            }
        }

        let mut media_breakdown = BTreeMap::new();
        let mut media_fee_total = Decimal::ZERO;
        for (media_type, count) in article.media_by_type()? {
            if count == 0 {
                continue;
            }
            let Some(fee) = rule_set.media_fee_for(&media_type) else {
                continue;
            };
            let amount = fee.fee_for(count)?;
            media_fee_total = media_fee_total
                .checked_add(amount)
                .ok_or_else(|| RoyaltyError::out_of_range("media fee total"))?;
            media_breakdown.insert(media_type, MediaLine { count, amount });
        }

        let bonus_amount = match article.bonus_amount {
            Some(bonus) if bonus < Decimal::ZERO => {
                return Err(RoyaltyError::InvalidAmount(
                    "bonusAmount must not be negative".to_string(),
                ))
            }
            other => other,
        };

        let gross_amount = base_amount
            .checked_mul(multiplier_factor)
            .and_then(|amount| amount.checked_add(media_fee_total))
            .and_then(|amount| amount.checked_add(bonus_amount.unwrap_or_default()))
            .ok_or_else(|| RoyaltyError::out_of_range("grossAmount"))?;

        let snapshot = CalcSnapshot {
            version: SNAPSHOT_VERSION,
            rule_set_id: rule_set.id,
            rule_set_version: rule_set.version,
            currency: rule_set.currency.clone(),
            rate_key,
            base_source,
            base_amount,
            applied_multipliers,
            media_breakdown,
            bonus_amount,
        };

        Ok(Calculation {
            base_amount,
            multiplier_factor,
            media_fee_total,
            bonus_amount,
            gross_amount,
            final_amount: gross_amount,
            snapshot,
        })
    }
}
