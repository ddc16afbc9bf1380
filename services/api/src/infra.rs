use chrono::{TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use royalty_engine::error::AppError;
use royalty_engine::workflows::royalty::{
    Actor, ArticleCatalog, FeeMode, MediaFeeRule, MultiplierRule, MultiplierType,
    OverridePolicy, RoyaltyService, RoyaltyStore, RuleSet, RuleSetDraft, WILDCARD_PERMISSION,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Internal identity used for bootstrap writes.
pub(crate) fn system_actor() -> Actor {
    Actor::new("system", "royalty-engine@localhost", [WILDCARD_PERMISSION])
}

fn amount(units: i64) -> Decimal {
    Decimal::from(units)
}

/// Open-ended newsroom tariff used for local runs and the demo.
pub(crate) fn default_rule_set_draft(currency: &str) -> RuleSetDraft {
    let effective_from = Utc
        .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    RuleSetDraft {
        name: "newsroom-default".to_string(),
        currency: currency.to_string(),
        effective_from,
        effective_to: None,
        rates: BTreeMap::from([
            ("NEWS".to_string(), amount(300_000)),
            ("FEATURE".to_string(), amount(600_000)),
            ("INTERVIEW".to_string(), amount(500_000)),
            ("OPINION".to_string(), amount(400_000)),
        ]),
        multipliers: vec![
            MultiplierRule {
                multiplier_type: MultiplierType::Flag,
                key_name: "EXCLUSIVE".to_string(),
                factor: Decimal::new(15, 1),
            },
            MultiplierRule {
                multiplier_type: MultiplierType::Flag,
                key_name: "BREAKING".to_string(),
                factor: Decimal::new(12, 1),
            },
            MultiplierRule {
                multiplier_type: MultiplierType::Calendar,
                key_name: "NIGHT".to_string(),
                factor: Decimal::new(11, 1),
            },
        ],
        media_fees: vec![
            MediaFeeRule {
                media_type: "IMAGE".to_string(),
                fee_amount: amount(20_000),
                fee_mode: FeeMode::PerUnit,
                max_fee_amount: amount(100_000),
            },
            MediaFeeRule {
                media_type: "VIDEO".to_string(),
                fee_amount: amount(100_000),
                fee_mode: FeeMode::Flat,
                max_fee_amount: amount(100_000),
            },
        ],
        policy: OverridePolicy {
            editor_override_max_percent: amount(10),
            manager_override_max_percent: amount(30),
            require_note_for_override: true,
            allow_manual_base_rate_override: false,
        },
    }
}

/// Store and activate the default rule set unless one already exists.
pub(crate) fn seed_rule_set<S, C>(
    service: &RoyaltyService<S, C>,
) -> Result<Option<RuleSet>, AppError>
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    if !service.list_rule_sets()?.is_empty() {
        return Ok(None);
    }

    let actor = system_actor();
    let draft = default_rule_set_draft(&service.config().default_currency);
    let created = service.create_rule_set(&actor, draft)?;
    let active = service.activate_rule_set(&actor, created.id)?;
    info!(rule_set_id = %active.id, currency = %active.currency, "seeded default rule set");
    Ok(Some(active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use royalty_engine::config::RoyaltyConfig;
    use royalty_engine::workflows::royalty::{
        MemoryArticleCatalog, MemoryRoyaltyStore, RuleSetStatus,
    };

    #[test]
    fn seeding_is_idempotent() {
        let service = RoyaltyService::new(
            Arc::new(MemoryRoyaltyStore::default()),
            Arc::new(MemoryArticleCatalog::default()),
            RoyaltyConfig::default(),
        );

        let seeded = seed_rule_set(&service)
            .expect("seed succeeds")
            .expect("rule set created");
        assert_eq!(seeded.status, RuleSetStatus::Active);
        assert_eq!(seeded.currency, "VND");

        assert!(seed_rule_set(&service).expect("second seed").is_none());
        assert_eq!(service.list_rule_sets().expect("rule sets").len(), 1);
    }
}
