use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::contact_extractor::ContactExtractor;
use crate::dispatcher::{BulkDispatcher, Sleeper, TokioSleeper};
use crate::errors::AppError;
use crate::generation::{ContentGenerator, DescriptionGenerator};
use crate::kpi::extract_kpis;
use crate::models::{
    Channel, ContactSource, EnrichmentStats, GeneratedMessage, Lead, SourcePlatform,
};
use crate::retry::{retry_transient, RetryPolicy};
use crate::scoring::LeadScorer;
use crate::scraper::{LeadSource, PageFetcher};
use crate::storage::LeadStore;
use crate::task_manager::CancelFlag;

/// Which stages a run executes. Stages always run in the fixed order
/// extract → describe → generate → send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageFlags {
    /// Search for new leads. When off, the campaign's stored leads are used.
    pub extract: bool,
    /// Second extraction pass over each lead's website.
    pub fetch_websites: bool,
    pub describe: bool,
    /// When off, sending uses the campaign's stored pending messages.
    pub generate: bool,
    pub send: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            extract: true,
            fetch_websites: false,
            describe: true,
            generate: true,
            send: false,
        }
    }
}

fn default_source() -> SourcePlatform {
    SourcePlatform::GoogleMaps
}

fn default_max_results() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::Email]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub campaign_id: String,
    pub query: String,
    #[serde(default = "default_source")]
    pub source: SourcePlatform,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub stages: StageFlags,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    /// What the outreach offers. Passed to the content prompts.
    #[serde(default)]
    pub pitch: String,
}

impl RunRequest {
    pub fn new(campaign_id: &str, query: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            query: query.to_string(),
            source: default_source(),
            max_results: default_max_results(),
            stages: StageFlags::default(),
            use_cache: true,
            channels: default_channels(),
            pitch: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub step: String,
    pub message: String,
    pub percent: u8,
}

/// Structured result of one run. Returned whether the run succeeded or not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    pub session_id: Uuid,
    pub success: bool,
    pub cancelled: bool,
    pub stages_completed: Vec<String>,
    pub stats: EnrichmentStats,
    pub leads: Vec<Lead>,
    /// Per-item failures. Never abort the run.
    pub errors: Vec<String>,
    /// The error that aborted the run, if any.
    pub error: Option<String>,
}

impl RunOutcome {
    fn failed(mut self, error: AppError) -> Self {
        tracing::error!("Enrichment run {} aborted: {}", self.session_id, error);
        self.success = false;
        self.error = Some(error.to_string());
        self
    }

    fn cancelled(mut self, leads: Vec<Lead>) -> Self {
        tracing::info!(
            "Enrichment run {} cancelled after stages {:?}",
            self.session_id,
            self.stages_completed
        );
        self.success = false;
        self.cancelled = true;
        self.error = Some(AppError::Cancelled.to_string());
        self.leads = leads;
        self
    }
}

const STAGE_SPAN: usize = 25;

fn stage_percent(stage: usize, done: usize, total: usize) -> u8 {
    let within = if total == 0 {
        STAGE_SPAN
    } else {
        STAGE_SPAN * done.min(total) / total
    };
    (STAGE_SPAN * stage + within).min(100) as u8
}

/// Forwards progress to the caller, never letting the percentage go backwards.
struct Progress<'a> {
    sink: &'a (dyn Fn(ProgressUpdate) + Send + Sync),
    last: AtomicU8,
}

impl<'a> Progress<'a> {
    fn new(sink: &'a (dyn Fn(ProgressUpdate) + Send + Sync)) -> Self {
        Self {
            sink,
            last: AtomicU8::new(0),
        }
    }

    fn report(&self, step: &str, message: impl Into<String>, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        (self.sink)(ProgressUpdate {
            step: step.to_string(),
            message: message.into(),
            percent: previous.max(percent),
        });
    }
}

/// Drives extract → describe → generate → send for one campaign run.
///
/// Each run is sequential. Counters, lead lists and the cancel flag belong to the
/// run; only the description cache is shared between runs.
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    source: Arc<dyn LeadSource>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    extractor: ContactExtractor,
    scorer: LeadScorer,
    describer: DescriptionGenerator,
    content: ContentGenerator,
    dispatcher: BulkDispatcher,
    store: Arc<dyn LeadStore>,
    /// Applied to the lead search call.
    search_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        source: Arc<dyn LeadSource>,
        describer: DescriptionGenerator,
        content: ContentGenerator,
        dispatcher: BulkDispatcher,
        store: Arc<dyn LeadStore>,
    ) -> Self {
        Self {
            source,
            fetcher: None,
            extractor: ContactExtractor::default(),
            scorer: LeadScorer::new(),
            describer,
            content,
            dispatcher,
            store,
            search_retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_search_retry(mut self, retry: RetryPolicy) -> Self {
        self.search_retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_extractor(mut self, extractor: ContactExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancelFlag,
        on_progress: &(dyn Fn(ProgressUpdate) + Send + Sync),
    ) -> RunOutcome {
        let progress = Progress::new(on_progress);
        let mut outcome = RunOutcome {
            session_id: Uuid::new_v4(),
            ..Default::default()
        };
        tracing::info!(
            "Starting enrichment run {} for campaign {} (query: '{}')",
            outcome.session_id,
            request.campaign_id,
            request.query
        );

        // ---- Extract ----
        let loaded = if request.stages.extract {
            self.extract_stage(request, cancel, &progress).await
        } else {
            progress.report("extract", "Loading stored leads", 0);
            self.store.leads_for_campaign(&request.campaign_id).await
        };
        let mut leads = match loaded {
            Ok(leads) => leads,
            Err(e) => return outcome.failed(e),
        };
        outcome.stats.leads_collected = leads.len();
        if cancel.is_cancelled() {
            return outcome.cancelled(leads);
        }
        if leads.is_empty() {
            return outcome.failed(AppError::NotFound(format!(
                "No leads found for query '{}'",
                request.query
            )));
        }
        outcome.stages_completed.push("extract".to_string());
        progress.report(
            "extract",
            format!("Collected {} leads", leads.len()),
            stage_percent(0, 1, 1),
        );

        // ---- Describe ----
        if request.stages.describe {
            self.describe_stage(request, &mut leads, cancel, &progress, &mut outcome)
                .await;
            if let Err(e) = self.store.upsert_leads(&mut leads).await {
                outcome.errors.push(format!("Failed to persist descriptions: {}", e));
            }
            if cancel.is_cancelled() {
                return outcome.cancelled(leads);
            }
            outcome.stages_completed.push("describe".to_string());
        }
        progress.report("describe", "Descriptions done", stage_percent(1, 1, 1));

        // ---- Generate ----
        let mut messages = Vec::new();
        if request.stages.generate {
            messages = self
                .generate_stage(request, &leads, cancel, &progress, &mut outcome)
                .await;
            if let Err(e) = self.store.save_messages(&messages).await {
                outcome.errors.push(format!("Failed to persist messages: {}", e));
            }
            if cancel.is_cancelled() {
                return outcome.cancelled(leads);
            }
            outcome.stages_completed.push("generate".to_string());
        }
        progress.report("generate", "Content generation done", stage_percent(2, 1, 1));

        // ---- Send ----
        if request.stages.send {
            if !request.stages.generate {
                match self.store.pending_messages(&request.campaign_id).await {
                    Ok(pending) => messages = pending,
                    Err(e) => return outcome.failed(e),
                }
            }
            progress.report(
                "send",
                format!("Sending {} messages", messages.len()),
                stage_percent(3, 0, 1),
            );

            let on_item = |done: usize, total: usize| {
                progress.report(
                    "send",
                    format!("Sent {}/{}", done, total),
                    stage_percent(3, done, total),
                );
            };
            let sent = self.dispatcher.send_all(&mut messages, cancel, &on_item).await;

            // Persist statuses even when the batch stopped early.
            if let Err(e) = self.store.save_messages(&messages).await {
                outcome.errors.push(format!("Failed to persist delivery status: {}", e));
            }
            match sent {
                Ok(summary) => {
                    outcome.stats.emails_sent += summary.sent;
                    outcome.stats.emails_failed += summary.failed;
                    outcome.errors.extend(
                        messages
                            .iter()
                            .filter_map(|m| m.error.as_ref().map(|e| (m, e)))
                            .map(|(m, e)| format!("send to {}: {}", m.recipient, e)),
                    );
                }
                Err(e) => {
                    outcome.leads = leads;
                    return outcome.failed(e);
                }
            }
            if cancel.is_cancelled() {
                return outcome.cancelled(leads);
            }
            outcome.stages_completed.push("send".to_string());
        }

        progress.report("done", "Run complete", 100);
        tracing::info!(
            "Enrichment run {} finished: {:?}",
            outcome.session_id,
            outcome.stats
        );
        outcome.success = true;
        outcome.leads = leads;
        outcome
    }

    async fn extract_stage(
        &self,
        request: &RunRequest,
        cancel: &CancelFlag,
        progress: &Progress<'_>,
    ) -> Result<Vec<Lead>, AppError> {
        progress.report("extract", format!("Searching for '{}'", request.query), 0);
        let search = retry_transient(&self.search_retry, self.sleeper.as_ref(), || {
            self.source.search(&request.query, request.max_results)
        })
        .await;
        if search.attempts > 1 {
            tracing::info!(
                "Search for '{}' finished after {} attempts",
                request.query,
                search.attempts
            );
        }
        let records = search.result?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let total = records.len();
        let mut seen = HashSet::new();
        let mut leads = Vec::with_capacity(total);

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let text = record.searchable_text();
            let contacts = self.extractor.extract(&text, request.source);
            let kpis = extract_kpis(&text);
            let mut lead =
                Lead::from_record(&request.campaign_id, request.source, record, contacts, kpis);
            lead.lead_score = self.scorer.score(&text);

            if !seen.insert(lead.dedup_key().to_string()) {
                tracing::debug!("Skipping duplicate lead {}", lead.dedup_key());
                continue;
            }

            if request.stages.fetch_websites {
                self.website_pass(&mut lead).await;
            }

            leads.push(lead);
            progress.report(
                "extract",
                format!("Processed {}/{} records", index + 1, total),
                stage_percent(0, index + 1, total),
            );
        }

        self.store.upsert_leads(&mut leads).await?;
        tracing::info!("Extracted {} leads from {} records", leads.len(), total);
        Ok(leads)
    }

    /// Merges contacts found on the lead's own website. Failures keep the lead as-is.
    async fn website_pass(&self, lead: &mut Lead) {
        let (Some(fetcher), Some(website)) = (&self.fetcher, lead.website.clone()) else {
            return;
        };

        match fetcher.fetch(&website).await {
            Ok(page) => {
                let contacts = self.extractor.extract(&page, SourcePlatform::Website);
                lead.merge_contacts(contacts);
                lead.contact_source = ContactSource::ScrapeAndWebsite;
            }
            Err(e) => {
                tracing::warn!("Website fetch failed for {} ({}): {}", lead.name, website, e);
            }
        }
    }

    async fn describe_stage(
        &self,
        request: &RunRequest,
        leads: &mut [Lead],
        cancel: &CancelFlag,
        progress: &Progress<'_>,
        outcome: &mut RunOutcome,
    ) {
        let total = leads.len();
        for (index, lead) in leads.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let mut context = lead.raw_snippet.clone();
            if let Some(address) = &lead.address {
                context.push_str(&format!("\nLocation: {}", address));
            }

            match self
                .describer
                .describe(&lead.name, &context, request.use_cache)
                .await
            {
                Ok(generated) => {
                    lead.description = Some(generated.description);
                    lead.lead_score = generated.score;
                    outcome.stats.descriptions_generated += 1;
                }
                Err(e) => {
                    tracing::warn!("Description failed for {}: {}", lead.name, e);
                    outcome.errors.push(format!("describe {}: {}", lead.name, e));
                }
            }

            progress.report(
                "describe",
                format!("Described {}/{}", index + 1, total),
                stage_percent(1, index + 1, total),
            );
        }
    }

    async fn generate_stage(
        &self,
        request: &RunRequest,
        leads: &[Lead],
        cancel: &CancelFlag,
        progress: &Progress<'_>,
        outcome: &mut RunOutcome,
    ) -> Vec<GeneratedMessage> {
        let total = leads.len();
        let mut messages = Vec::new();

        for (index, lead) in leads.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            for channel in &request.channels {
                match channel {
                    Channel::Email => {
                        let Some(recipient) = lead.primary_email() else {
                            continue;
                        };
                        match self.content.email(lead, &request.pitch).await {
                            Ok((subject, body)) => {
                                messages.push(GeneratedMessage::email(
                                    lead.id, recipient, subject, body,
                                ));
                                outcome.stats.emails_generated += 1;
                            }
                            Err(e) => {
                                tracing::warn!("Email generation failed for {}: {}", lead.name, e);
                                outcome.errors.push(format!("email {}: {}", lead.name, e));
                            }
                        }
                    }
                    Channel::WhatsApp => {
                        let Some(recipient) = lead.whatsapp_target() else {
                            continue;
                        };
                        match self.content.whatsapp(lead, &request.pitch).await {
                            Ok(body) => {
                                messages.push(GeneratedMessage::whatsapp(lead.id, recipient, body));
                                outcome.stats.whatsapp_generated += 1;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    "WhatsApp generation failed for {}: {}",
                                    lead.name,
                                    e
                                );
                                outcome.errors.push(format!("whatsapp {}: {}", lead.name, e));
                            }
                        }
                    }
                }
            }

            progress.report(
                "generate",
                format!("Generated content for {}/{}", index + 1, total),
                stage_percent(2, index + 1, total),
            );
        }

        messages
    }
}
