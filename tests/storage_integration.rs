use std::env;
use uuid::Uuid;

use rust_leadgen_api::db::Database;
use rust_leadgen_api::kpi::SocialKpis;
use rust_leadgen_api::models::{
    ContactInfo, DeliveryRecord, GeneratedMessage, Lead, MessageStatus, RawRecord, SourcePlatform,
};
use rust_leadgen_api::storage::{DeliveryLog, LeadStore, PgStore};

/// Integration smoke test for the Postgres lead store and delivery log.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn lead_store_round_trip_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let store = PgStore::new(db.pool.clone());

    // Unique campaign so repeated runs never collide.
    let campaign = format!("smoke-{}", Uuid::new_v4());
    let record = RawRecord {
        title: "Smoke Test Trading".to_string(),
        place_id: Some("smoke-place".to_string()),
        raw_snippet: "Wholesale supplier".to_string(),
        ..Default::default()
    };
    let contacts = ContactInfo {
        emails: vec!["sales@smoke-test.ae".to_string()],
        ..Default::default()
    };
    let mut leads = vec![Lead::from_record(
        &campaign,
        SourcePlatform::GoogleMaps,
        &record,
        contacts,
        SocialKpis::default(),
    )];

    store
        .upsert_leads(&mut leads)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let first_id = leads[0].id;

    // Same identity on a second upsert keeps the stored id.
    let mut again = leads.clone();
    again[0].id = Uuid::new_v4();
    again[0].description = Some("Described".to_string());
    store
        .upsert_leads(&mut again)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(again[0].id, first_id);

    let stored = store
        .leads_for_campaign(&campaign)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].description.as_deref(), Some("Described"));
    assert_eq!(stored[0].emails, vec!["sales@smoke-test.ae".to_string()]);

    // A re-scrape without a description keeps the stored description and its score.
    let described_score = stored[0].lead_score;
    let mut rescraped = leads.clone();
    rescraped[0].description = None;
    rescraped[0].lead_score = described_score.saturating_sub(10);
    store
        .upsert_leads(&mut rescraped)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(rescraped[0].description.as_deref(), Some("Described"));
    assert_eq!(rescraped[0].lead_score, described_score);
    let stored = store
        .leads_for_campaign(&campaign)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(stored[0].lead_score, described_score);

    let mut message = GeneratedMessage::email(
        first_id,
        "sales@smoke-test.ae",
        "Hello".to_string(),
        "Body".to_string(),
    );
    store
        .save_messages(std::slice::from_ref(&message))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let pending = store
        .pending_messages(&campaign)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(pending.len(), 1);

    message
        .mark_sent(0)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    store
        .record(&DeliveryRecord::for_message(&message, 1))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let pending = store
        .pending_messages(&campaign)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(pending.is_empty());
    assert_eq!(message.status, MessageStatus::Sent);
    Ok(())
}
