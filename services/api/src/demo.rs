use crate::infra::{seed_rule_set, system_actor};
use chrono::{DateTime, Utc};
use clap::Args;
use royalty_engine::config::RoyaltyConfig;
use royalty_engine::error::AppError;
use royalty_engine::workflows::royalty::{
    ArticleId, ArticleSnapshot, AuthorId, AuthorRef, MediaCount, MemoryArticleCatalog,
    MemoryRoyaltyStore, MonthKey, PublishedArticle, RoyaltyError, RoyaltyRecord, RoyaltyService,
};
use rust_decimal::Decimal;
use std::sync::Arc;

const ARTICLE_TYPES: [&str; 4] = ["NEWS", "FEATURE", "INTERVIEW", "OPINION"];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Month to publish into and batch (YYYY-MM). Defaults to the current month.
    #[arg(long, value_parser = parse_month)]
    pub(crate) month: Option<MonthKey>,
    /// Number of synthetic articles to publish (1-28).
    #[arg(long, default_value_t = 4)]
    pub(crate) articles: u32,
    /// Stop after the batch is approved instead of marking it paid.
    #[arg(long)]
    pub(crate) skip_payment: bool,
}

fn parse_month(raw: &str) -> Result<MonthKey, String> {
    raw.parse::<MonthKey>().map_err(|err| err.to_string())
}

fn published_at(month: MonthKey, day: u32) -> Result<DateTime<Utc>, AppError> {
    format!("{month}-{day:02}T10:30:00Z")
        .parse::<DateTime<Utc>>()
        .map_err(|_| AppError::Royalty(RoyaltyError::InvalidMonthKey(month.to_string())))
}

fn synthetic_article(month: MonthKey, index: u32) -> Result<PublishedArticle, AppError> {
    let author_id = format!("author-{}", index % 2 + 1);
    let article = ArticleSnapshot {
        article_id: ArticleId(format!("demo-{month}-{index:02}")),
        article_type: ARTICLE_TYPES[index as usize % ARTICLE_TYPES.len()].to_string(),
        word_count: 600 + index * 150,
        category_id: None,
        published_at: published_at(month, index + 1)?,
        tags: Vec::new(),
        flags: if index == 0 {
            vec!["EXCLUSIVE".to_string()]
        } else {
            Vec::new()
        },
        media: vec![MediaCount {
            media_type: "IMAGE".to_string(),
            count: index + 1,
        }],
        currency: None,
        bonus_amount: None,
        manual_base_amount: None,
    };
    Ok(PublishedArticle {
        article,
        author: AuthorRef {
            author_id: AuthorId(author_id.clone()),
            author_type: "STAFF".to_string(),
            email: format!("{author_id}@newsroom.example"),
        },
    })
}

fn render_record(record: &RoyaltyRecord) {
    println!(
        "  - {} {} by {} | base {} x {} + media {} = {} {}",
        record.article_id,
        record.article_type,
        record.author_id,
        record.base_amount,
        record.multiplier_factor,
        record.media_fee_total,
        record.final_amount,
        record.currency
    );
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        month,
        articles,
        skip_payment,
    } = args;
    let month = month.unwrap_or_else(|| MonthKey::of(Utc::now()));
    let articles = articles.clamp(1, 28);

    let service = Arc::new(RoyaltyService::new(
        Arc::new(MemoryRoyaltyStore::default()),
        Arc::new(MemoryArticleCatalog::default()),
        RoyaltyConfig::default(),
    ));
    let actor = system_actor();

    println!("Royalty engine demo for {month}");
    if let Some(rule_set) = seed_rule_set(&service)? {
        println!(
            "Rule set {} v{} active for {}",
            rule_set.name, rule_set.version, rule_set.currency
        );
    }

    println!("\nCalculated records");
    let mut records = Vec::with_capacity(articles as usize);
    for index in 0..articles {
        let record = service.record_published(&actor, synthetic_article(month, index)?)?;
        render_record(&record);
        records.push(record);
    }

    if let Some(first) = records.first() {
        let adjusted = first.final_amount * Decimal::new(105, 2);
        let updated =
            service.apply_override(&actor, first.id, adjusted, Some("demo adjustment: +5%"))?;
        println!(
            "\nOverride on {}: {} -> {}",
            updated.article_id, updated.gross_amount, updated.final_amount
        );
    }

    for record in &records {
        service.editor_confirm(&actor, record.id)?;
        service.manager_approve(&actor, record.id)?;
        service.finance_approve(&actor, record.id)?;
    }
    println!("\nAll {} records finance approved", records.len());

    let batch = service.create_batch(&actor, month)?;
    println!(
        "\nBatch {} for {}: {} items, total {} {}",
        batch.id, batch.month_key, batch.total_items, batch.total_amount, batch.currency
    );
    let batch = service.approve_batch(&actor, batch.id)?;
    println!("- status {}", batch.status);

    if !skip_payment {
        let payment_ref = format!("DEMO-{month}");
        let paid = service.mark_batch_paid(&actor, batch.id, &payment_ref)?;
        println!("- status {} (ref {payment_ref})", paid.status);
    }

    let (_, csv) = service.export_batch_csv(&actor, batch.id)?;
    println!("\nExport {}", batch.export_file_key);
    print!("{}", String::from_utf8_lossy(&csv));

    if let Some(first) = records.first() {
        println!("\nHistory for {}", first.article_id);
        for entry in service.history(first.id)? {
            println!(
                "  {:>2}. {} {} -> {} by {}",
                entry.sequence,
                entry.action_type,
                entry
                    .old_status
                    .map(|status| status.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                entry
                    .new_status
                    .map(|status| status.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                entry.actor_user_id
            );
        }
    }

    Ok(())
}
