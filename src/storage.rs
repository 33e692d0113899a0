use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::kpi::SocialKpis;
use crate::models::{
    Channel, ContactSource, DeliveryRecord, GeneratedMessage, Lead, MessageStatus, SocialPlatform,
    SourcePlatform,
};

/// Persistence for leads and their outreach messages.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Inserts or updates by `(campaign_id, source_url)`. Each lead's `id` is set to
    /// the stored row's id so messages always reference the persisted lead.
    async fn upsert_leads(&self, leads: &mut [Lead]) -> Result<(), AppError>;

    async fn leads_for_campaign(&self, campaign_id: &str) -> Result<Vec<Lead>, AppError>;

    /// Upserts by message id. A new pending message replaces any other pending
    /// message for the same lead and channel.
    async fn save_messages(&self, messages: &[GeneratedMessage]) -> Result<(), AppError>;

    async fn pending_messages(&self, campaign_id: &str)
        -> Result<Vec<GeneratedMessage>, AppError>;
}

/// Append-only delivery log. Written once per dispatched message.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, record: &DeliveryRecord) -> Result<(), AppError>;
}

// ============ In-memory ============

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    leads: RwLock<HashMap<(String, String), Lead>>,
    messages: RwLock<Vec<GeneratedMessage>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivery_records(&self) -> Vec<DeliveryRecord> {
        self.deliveries.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<GeneratedMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn upsert_leads(&self, leads: &mut [Lead]) -> Result<(), AppError> {
        let mut stored = self.leads.write().await;
        for lead in leads.iter_mut() {
            let key = (lead.campaign_id.clone(), lead.source_url.clone());
            if let Some(existing) = stored.get(&key) {
                lead.id = existing.id;
                lead.created_at = existing.created_at;
                // Score stays paired with the description it was computed from.
                if lead.description.is_none() && existing.description.is_some() {
                    lead.description = existing.description.clone();
                    lead.lead_score = existing.lead_score;
                }
            }
            stored.insert(key, lead.clone());
        }
        Ok(())
    }

    async fn leads_for_campaign(&self, campaign_id: &str) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .leads
            .read()
            .await
            .values()
            .filter(|lead| lead.campaign_id == campaign_id)
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(leads)
    }

    async fn save_messages(&self, messages: &[GeneratedMessage]) -> Result<(), AppError> {
        let mut stored = self.messages.write().await;
        for message in messages {
            if message.status == MessageStatus::Pending {
                stored.retain(|m| {
                    m.id == message.id
                        || !(m.lead_id == message.lead_id
                            && m.channel == message.channel
                            && m.status == MessageStatus::Pending)
                });
            }
            match stored.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message.clone(),
                None => stored.push(message.clone()),
            }
        }
        Ok(())
    }

    async fn pending_messages(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<GeneratedMessage>, AppError> {
        let lead_ids: Vec<Uuid> = self
            .leads
            .read()
            .await
            .values()
            .filter(|lead| lead.campaign_id == campaign_id)
            .map(|lead| lead.id)
            .collect();

        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.status == MessageStatus::Pending && lead_ids.contains(&m.lead_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn record(&self, record: &DeliveryRecord) -> Result<(), AppError> {
        self.deliveries.write().await.push(record.clone());
        Ok(())
    }
}

// ============ Postgres ============

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_channel(value: &str) -> Result<Channel, AppError> {
    match value {
        "email" => Ok(Channel::Email),
        "whatsapp" => Ok(Channel::WhatsApp),
        other => Err(AppError::InternalError(format!("Unknown channel '{}'", other))),
    }
}

fn parse_status(value: &str) -> Result<MessageStatus, AppError> {
    match value {
        "pending" => Ok(MessageStatus::Pending),
        "sent" => Ok(MessageStatus::Sent),
        "failed" => Ok(MessageStatus::Failed),
        other => Err(AppError::InternalError(format!("Unknown message status '{}'", other))),
    }
}

fn parse_contact_source(value: &str) -> ContactSource {
    match value {
        "scrape+website" => ContactSource::ScrapeAndWebsite,
        _ => ContactSource::ScrapeOnly,
    }
}

fn lead_from_row(row: &sqlx::postgres::PgRow) -> Result<Lead, AppError> {
    let platform: String = row.try_get("source_platform")?;
    let contact_source: String = row.try_get("contact_source")?;
    let emails: Json<Vec<String>> = row.try_get("emails")?;
    let phones: Json<Vec<String>> = row.try_get("phones")?;
    let social: Json<BTreeMap<SocialPlatform, String>> = row.try_get("social_links")?;
    let kpis: Json<SocialKpis> = row.try_get("kpis")?;
    let score: i16 = row.try_get("lead_score")?;

    Ok(Lead {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        source_platform: platform.parse::<SourcePlatform>()?,
        source_url: row.try_get("source_url")?,
        place_id: row.try_get("place_id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        emails: emails.0,
        phones: phones.0,
        whatsapp: row.try_get("whatsapp")?,
        website: row.try_get("website")?,
        social_links: social.0,
        description: row.try_get("description")?,
        lead_score: score.clamp(0, 100) as u8,
        contact_source: parse_contact_source(&contact_source),
        kpis: kpis.0,
        raw_snippet: row.try_get("raw_snippet")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> Result<GeneratedMessage, AppError> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(GeneratedMessage {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        channel: parse_channel(&channel)?,
        recipient: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status: parse_status(&status)?,
        sent_at: row.try_get("sent_at")?,
        error: row.try_get("error")?,
        retry_count: retry_count.max(0) as u32,
    })
}

#[async_trait]
impl LeadStore for PgStore {
    async fn upsert_leads(&self, leads: &mut [Lead]) -> Result<(), AppError> {
        for lead in leads.iter_mut() {
            let (id, description, score): (Uuid, Option<String>, i16) = sqlx::query_as(
                r#"
                INSERT INTO leads (
                    id, campaign_id, source_platform, source_url, place_id, name, address,
                    emails, phones, whatsapp, website, social_links, description,
                    lead_score, contact_source, kpis, raw_snippet, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                ON CONFLICT (campaign_id, source_url) DO UPDATE SET
                    emails = EXCLUDED.emails,
                    phones = EXCLUDED.phones,
                    whatsapp = EXCLUDED.whatsapp,
                    website = EXCLUDED.website,
                    social_links = EXCLUDED.social_links,
                    description = COALESCE(EXCLUDED.description, leads.description),
                    lead_score = CASE
                        WHEN EXCLUDED.description IS NULL AND leads.description IS NOT NULL
                        THEN leads.lead_score
                        ELSE EXCLUDED.lead_score
                    END,
                    contact_source = EXCLUDED.contact_source,
                    kpis = EXCLUDED.kpis,
                    updated_at = NOW()
                RETURNING id, description, lead_score
                "#,
            )
            .bind(lead.id)
            .bind(&lead.campaign_id)
            .bind(lead.source_platform.as_str())
            .bind(&lead.source_url)
            .bind(&lead.place_id)
            .bind(&lead.name)
            .bind(&lead.address)
            .bind(Json(&lead.emails))
            .bind(Json(&lead.phones))
            .bind(&lead.whatsapp)
            .bind(&lead.website)
            .bind(Json(&lead.social_links))
            .bind(&lead.description)
            .bind(i16::from(lead.lead_score))
            .bind(lead.contact_source.as_str())
            .bind(Json(&lead.kpis))
            .bind(&lead.raw_snippet)
            .bind(lead.created_at)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to upsert lead {}", lead.source_url))?;

            lead.id = id;
            lead.description = description;
            lead.lead_score = score.clamp(0, 100) as u8;
        }
        Ok(())
    }

    async fn leads_for_campaign(&self, campaign_id: &str) -> Result<Vec<Lead>, AppError> {
        let rows = sqlx::query("SELECT * FROM leads WHERE campaign_id = $1 ORDER BY created_at")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load campaign leads")?;

        rows.iter().map(lead_from_row).collect()
    }

    async fn save_messages(&self, messages: &[GeneratedMessage]) -> Result<(), AppError> {
        for message in messages {
            if message.status == MessageStatus::Pending {
                sqlx::query(
                    r#"
                    DELETE FROM generated_messages
                    WHERE lead_id = $1 AND channel = $2 AND status = 'pending' AND id <> $3
                    "#,
                )
                .bind(message.lead_id)
                .bind(message.channel.as_str())
                .bind(message.id)
                .execute(&self.pool)
                .await
                .context("Failed to replace pending message")?;
            }

            sqlx::query(
                r#"
                INSERT INTO generated_messages (
                    id, lead_id, channel, recipient, subject, body, status, sent_at, error, retry_count
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    sent_at = EXCLUDED.sent_at,
                    error = EXCLUDED.error,
                    retry_count = EXCLUDED.retry_count
                "#,
            )
            .bind(message.id)
            .bind(message.lead_id)
            .bind(message.channel.as_str())
            .bind(&message.recipient)
            .bind(&message.subject)
            .bind(&message.body)
            .bind(message.status.as_str())
            .bind(message.sent_at)
            .bind(&message.error)
            .bind(message.retry_count as i32)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to save message {}", message.id))?;
        }
        Ok(())
    }

    async fn pending_messages(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<GeneratedMessage>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT m.* FROM generated_messages m
            JOIN leads l ON l.id = m.lead_id
            WHERE l.campaign_id = $1 AND m.status = 'pending'
            ORDER BY m.created_at
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pending messages")?;

        rows.iter().map(message_from_row).collect()
    }
}

#[async_trait]
impl DeliveryLog for PgStore {
    async fn record(&self, record: &DeliveryRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_log (
                message_id, lead_id, channel, recipient, status, attempts, error, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.message_id)
        .bind(record.lead_id)
        .bind(record.channel.as_str())
        .bind(&record.recipient)
        .bind(record.status.as_str())
        .bind(record.attempts as i32)
        .bind(&record.error)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .context("Failed to write delivery record")?;

        // Keep the message row in step with the log
        sqlx::query(
            "UPDATE generated_messages SET status = $2, error = $3, retry_count = $4, \
             sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END WHERE id = $1",
        )
        .bind(record.message_id)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.attempts.saturating_sub(1) as i32)
        .execute(&self.pool)
        .await
        .context("Failed to update message status")?;

        Ok(())
    }
}
