use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::AppError;
use crate::kpi::SocialKpis;

/// Maximum number of emails kept on a lead for display.
pub const MAX_DISPLAY_EMAILS: usize = 3;
/// Maximum number of phone numbers kept on a lead for display.
pub const MAX_DISPLAY_PHONES: usize = 3;

// ============ Contact Extraction ============

/// Platform a raw record was scraped from. Used as a hint by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePlatform {
    GoogleMaps,
    #[serde(rename = "linkedin")]
    LinkedIn,
    Instagram,
    Website,
    Generic,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::GoogleMaps => "google_maps",
            SourcePlatform::LinkedIn => "linkedin",
            SourcePlatform::Instagram => "instagram",
            SourcePlatform::Website => "website",
            SourcePlatform::Generic => "generic",
        }
    }

    /// Domains owned by the platform itself. Never a lead's own website.
    pub fn own_domains(&self) -> &'static [&'static str] {
        match self {
            SourcePlatform::GoogleMaps => &["google.com", "goo.gl", "g.page", "maps.app.goo.gl"],
            SourcePlatform::LinkedIn => &["linkedin.com", "lnkd.in"],
            SourcePlatform::Instagram => &["instagram.com", "instagr.am"],
            SourcePlatform::Website | SourcePlatform::Generic => &[],
        }
    }
}

impl std::str::FromStr for SourcePlatform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google_maps" | "maps" | "google" => Ok(SourcePlatform::GoogleMaps),
            "linkedin" => Ok(SourcePlatform::LinkedIn),
            "instagram" => Ok(SourcePlatform::Instagram),
            "website" => Ok(SourcePlatform::Website),
            "generic" => Ok(SourcePlatform::Generic),
            other => Err(AppError::BadRequest(format!("Unknown source platform: {}", other))),
        }
    }
}

/// Social network a profile link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    LinkedIn,
    Instagram,
    Facebook,
    Twitter,
    TikTok,
    YouTube,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => "linkedin",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::TikTok => "tiktok",
            SocialPlatform::YouTube => "youtube",
        }
    }
}

/// Structured contact fields pulled out of free text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Validated, lowercased, deduplicated in discovery order.
    pub emails: Vec<String>,
    /// E.164-like (`+` and digits), deduplicated in discovery order.
    pub phones: Vec<String>,
    pub whatsapp: Option<String>,
    pub website: Option<String>,
    pub social: BTreeMap<SocialPlatform, String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
            && self.phones.is_empty()
            && self.whatsapp.is_none()
            && self.website.is_none()
            && self.social.is_empty()
    }

    /// Merges `other` into `self`. Existing single-valued fields win.
    pub fn merge(&mut self, other: ContactInfo) {
        for email in other.emails {
            if !self.emails.contains(&email) {
                self.emails.push(email);
            }
        }
        for phone in other.phones {
            if !self.phones.contains(&phone) {
                self.phones.push(phone);
            }
        }
        if self.whatsapp.is_none() {
            self.whatsapp = other.whatsapp;
        }
        if self.website.is_none() {
            self.website = other.website;
        }
        for (platform, link) in other.social {
            self.social.entry(platform).or_insert(link);
        }
    }
}

// ============ Scraper Records ============

/// A single result returned by a scraper collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    /// Free text around the result (snippet, bio, page excerpt).
    pub raw_snippet: String,
    pub source_url: Option<String>,
    pub place_id: Option<String>,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub reviews: Option<u64>,
}

impl RawRecord {
    /// All text the extractor should see for this record.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.title.as_str(), self.raw_snippet.as_str()];
        for field in [&self.address, &self.phone, &self.website, &self.category] {
            if let Some(value) = field {
                parts.push(value.as_str());
            }
        }
        parts.join("\n")
    }
}

// ============ Leads ============

/// Where a lead's contacts came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSource {
    #[serde(rename = "scrape_only")]
    ScrapeOnly,
    #[serde(rename = "scrape+website")]
    ScrapeAndWebsite,
}

impl ContactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactSource::ScrapeOnly => "scrape_only",
            ContactSource::ScrapeAndWebsite => "scrape+website",
        }
    }
}

/// A prospective business contact.
///
/// Identity fields (`source_platform`, `source_url`, `place_id`, `name`) are fixed at
/// creation; enrichment only touches `description`, `lead_score` and contact merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: String,
    pub source_platform: SourcePlatform,
    pub source_url: String,
    pub place_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub whatsapp: Option<String>,
    pub website: Option<String>,
    pub social_links: BTreeMap<SocialPlatform, String>,
    pub description: Option<String>,
    pub lead_score: u8,
    pub contact_source: ContactSource,
    pub kpis: SocialKpis,
    /// Snippet kept for scoring and prompt context.
    pub raw_snippet: String,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Builds a lead from a scraped record and the contacts extracted from it.
    pub fn from_record(
        campaign_id: &str,
        platform: SourcePlatform,
        record: &RawRecord,
        contacts: ContactInfo,
        kpis: SocialKpis,
    ) -> Self {
        let source_url = record
            .source_url
            .clone()
            .or_else(|| record.place_id.as_ref().map(|id| format!("place:{}", id)))
            .unwrap_or_else(|| format!("name:{}", record.title.trim().to_lowercase()));

        let mut lead = Self {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.to_string(),
            source_platform: platform,
            source_url,
            place_id: record.place_id.clone(),
            name: record.title.trim().to_string(),
            address: record.address.clone(),
            emails: Vec::new(),
            phones: Vec::new(),
            whatsapp: None,
            website: None,
            social_links: BTreeMap::new(),
            description: None,
            lead_score: 0,
            contact_source: ContactSource::ScrapeOnly,
            kpis,
            raw_snippet: record.raw_snippet.clone(),
            created_at: Utc::now(),
        };
        lead.merge_contacts(contacts);
        lead
    }

    /// Key used to deduplicate leads within and across runs.
    pub fn dedup_key(&self) -> &str {
        &self.source_url
    }

    /// Folds newly found contacts in, keeping display caps.
    pub fn merge_contacts(&mut self, contacts: ContactInfo) {
        let mut current = ContactInfo {
            emails: std::mem::take(&mut self.emails),
            phones: std::mem::take(&mut self.phones),
            whatsapp: self.whatsapp.take(),
            website: self.website.take(),
            social: std::mem::take(&mut self.social_links),
        };
        current.merge(contacts);

        current.emails.truncate(MAX_DISPLAY_EMAILS);
        current.phones.truncate(MAX_DISPLAY_PHONES);

        self.emails = current.emails;
        self.phones = current.phones;
        self.whatsapp = current.whatsapp;
        self.website = current.website;
        self.social_links = current.social;
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// WhatsApp target: explicit WhatsApp link first, otherwise the first phone.
    pub fn whatsapp_target(&self) -> Option<&str> {
        self.whatsapp
            .as_deref()
            .or_else(|| self.phones.first().map(String::as_str))
    }
}

// ============ Outreach Messages ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

/// An outreach message produced by the generation stage.
///
/// Created `Pending`, moved to `Sent` or `Failed` exactly once by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedMessage {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    /// Email address or E.164-like phone number.
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl GeneratedMessage {
    pub fn email(lead_id: Uuid, recipient: &str, subject: String, body: String) -> Self {
        Self::pending(lead_id, Channel::Email, recipient, Some(subject), body)
    }

    pub fn whatsapp(lead_id: Uuid, recipient: &str, body: String) -> Self {
        Self::pending(lead_id, Channel::WhatsApp, recipient, None, body)
    }

    fn pending(
        lead_id: Uuid,
        channel: Channel,
        recipient: &str,
        subject: Option<String>,
        body: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            channel,
            recipient: recipient.to_string(),
            subject,
            body,
            status: MessageStatus::Pending,
            sent_at: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn mark_sent(&mut self, retries: u32) -> Result<(), AppError> {
        self.ensure_pending()?;
        self.status = MessageStatus::Sent;
        self.sent_at = Some(Utc::now());
        self.retry_count = retries;
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String, retries: u32) -> Result<(), AppError> {
        self.ensure_pending()?;
        self.status = MessageStatus::Failed;
        self.retry_count = retries;
        self.error = Some(error);
        Ok(())
    }

    /// Explicitly returns a failed message to the queue. Sent messages are never reset.
    pub fn reset(&mut self) -> Result<(), AppError> {
        if self.status == MessageStatus::Sent {
            return Err(AppError::BadRequest(format!(
                "Message {} was already sent",
                self.id
            )));
        }
        self.status = MessageStatus::Pending;
        self.error = None;
        self.retry_count = 0;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), AppError> {
        if self.status != MessageStatus::Pending {
            return Err(AppError::InternalError(format!(
                "Message {} is {}, expected pending",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// One durable line in the delivery log, written after every send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: Uuid,
    pub lead_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub status: MessageStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn for_message(message: &GeneratedMessage, attempts: u32) -> Self {
        Self {
            message_id: message.id,
            lead_id: message.lead_id,
            channel: message.channel,
            recipient: message.recipient.clone(),
            status: message.status,
            attempts,
            error: message.error.clone(),
            recorded_at: Utc::now(),
        }
    }
}

// ============ Run Statistics ============

/// Per-run counters. Each stage only increments its own counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub leads_collected: usize,
    pub descriptions_generated: usize,
    pub emails_generated: usize,
    pub whatsapp_generated: usize,
    /// Delivered messages across both channels.
    pub emails_sent: usize,
    /// Failed deliveries across both channels.
    pub emails_failed: usize,
}

/// Outcome of one bulk dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Non-pending messages (already sent, or failed without reset) left untouched.
    pub skipped: usize,
    pub total: usize,
}

// ============ Lead Table Export ============

/// Column order of the exported lead table. Stable across releases.
pub const LEAD_TABLE_COLUMNS: [&str; 15] = [
    "name",
    "address",
    "source_platform",
    "source_url",
    "emails",
    "phones",
    "whatsapp",
    "website",
    "linkedin",
    "instagram",
    "facebook",
    "twitter",
    "description",
    "lead_score",
    "contact_source",
];

/// One row of the lead table, flattened for the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRow {
    pub name: String,
    pub address: String,
    pub source_platform: String,
    pub source_url: String,
    pub emails: String,
    pub phones: String,
    pub whatsapp: String,
    pub website: String,
    pub linkedin: String,
    pub instagram: String,
    pub facebook: String,
    pub twitter: String,
    pub description: String,
    pub lead_score: u8,
    pub contact_source: String,
}

impl From<&Lead> for LeadRow {
    fn from(lead: &Lead) -> Self {
        let social = |platform: SocialPlatform| {
            lead.social_links
                .get(&platform)
                .cloned()
                .unwrap_or_default()
        };
        Self {
            name: lead.name.clone(),
            address: lead.address.clone().unwrap_or_default(),
            source_platform: lead.source_platform.as_str().to_string(),
            source_url: lead.source_url.clone(),
            emails: lead.emails.join("; "),
            phones: lead.phones.join("; "),
            whatsapp: lead.whatsapp.clone().unwrap_or_default(),
            website: lead.website.clone().unwrap_or_default(),
            linkedin: social(SocialPlatform::LinkedIn),
            instagram: social(SocialPlatform::Instagram),
            facebook: social(SocialPlatform::Facebook),
            twitter: social(SocialPlatform::Twitter),
            description: lead.description.clone().unwrap_or_default(),
            lead_score: lead.lead_score,
            contact_source: lead.contact_source.as_str().to_string(),
        }
    }
}

impl LeadRow {
    fn cells(&self) -> [String; 15] {
        [
            self.name.clone(),
            self.address.clone(),
            self.source_platform.clone(),
            self.source_url.clone(),
            self.emails.clone(),
            self.phones.clone(),
            self.whatsapp.clone(),
            self.website.clone(),
            self.linkedin.clone(),
            self.instagram.clone(),
            self.facebook.clone(),
            self.twitter.clone(),
            self.description.clone(),
            self.lead_score.to_string(),
            self.contact_source.clone(),
        ]
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders leads as CSV with a header row in `LEAD_TABLE_COLUMNS` order.
pub fn leads_to_csv(leads: &[Lead]) -> String {
    let mut out = LEAD_TABLE_COLUMNS.join(",");
    out.push('\n');
    for lead in leads {
        let row = LeadRow::from(lead);
        let line: Vec<String> = row.cells().iter().map(|c| csv_cell(c)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RawRecord {
        RawRecord {
            title: " Acme Trading LLC ".to_string(),
            address: Some("Dubai, UAE".to_string()),
            place_id: Some("ChIJ123".to_string()),
            raw_snippet: "Import, export".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lead_from_record_uses_place_id_as_dedup_key() {
        let lead = Lead::from_record(
            "camp-1",
            SourcePlatform::GoogleMaps,
            &record(),
            ContactInfo::default(),
            SocialKpis::default(),
        );
        assert_eq!(lead.dedup_key(), "place:ChIJ123");
        assert_eq!(lead.name, "Acme Trading LLC");
        assert_eq!(lead.contact_source, ContactSource::ScrapeOnly);
    }

    #[test]
    fn test_merge_contacts_caps_display_counts() {
        let contacts = ContactInfo {
            emails: (0..6).map(|i| format!("user{}@acme.ae", i)).collect(),
            phones: (0..6).map(|i| format!("+97150123456{}", i)).collect(),
            ..Default::default()
        };
        let lead = Lead::from_record(
            "camp-1",
            SourcePlatform::GoogleMaps,
            &record(),
            contacts,
            SocialKpis::default(),
        );
        assert_eq!(lead.emails.len(), MAX_DISPLAY_EMAILS);
        assert_eq!(lead.phones.len(), MAX_DISPLAY_PHONES);
        assert_eq!(lead.whatsapp_target(), Some("+971501234560"));
    }

    #[test]
    fn test_message_transitions_exactly_once() {
        let mut msg = GeneratedMessage::whatsapp(Uuid::new_v4(), "+971501234567", "Hi".into());
        msg.mark_sent(0).unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.sent_at.is_some());
        assert!(msg.mark_failed("late".into(), 1).is_err());
        assert!(msg.reset().is_err());
    }

    #[test]
    fn test_failed_message_can_be_reset() {
        let mut msg = GeneratedMessage::email(
            Uuid::new_v4(),
            "sales@acme.ae",
            "Hello".into(),
            "Body".into(),
        );
        msg.mark_failed("smtp 421".into(), 3).unwrap();
        msg.reset().unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.retry_count, 0);
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_csv_export_quotes_and_orders_columns() {
        let mut lead = Lead::from_record(
            "camp-1",
            SourcePlatform::GoogleMaps,
            &record(),
            ContactInfo {
                emails: vec!["a@acme.ae".into(), "b@acme.ae".into()],
                ..Default::default()
            },
            SocialKpis::default(),
        );
        lead.description = Some("Trader, \"premium\" goods".to_string());
        lead.lead_score = 72;

        let csv = leads_to_csv(&[lead]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), LEAD_TABLE_COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("Acme Trading LLC,\"Dubai, UAE\",google_maps,place:ChIJ123,"));
        assert!(row.contains("a@acme.ae; b@acme.ae"));
        assert!(row.contains("\"Trader, \"\"premium\"\" goods\",72,scrape_only"));
    }
}
