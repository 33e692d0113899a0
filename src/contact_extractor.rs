//! Contact extraction over unstructured scraped text.
//!
//! `ContactExtractor::extract` never fails: candidates that do not validate are
//! dropped and logged at debug level, so a single noisy record cannot abort a batch.

use once_cell::sync::Lazy;
use phonenumber::Mode;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::models::{ContactInfo, SocialPlatform, SourcePlatform};
use crate::patterns::{
    host_matches, host_of, ContactPatternSet, ContactRule, Validator, ASSET_EXTENSIONS,
    DEFAULT_SKIP_EMAIL_DOMAINS, FREE_MAIL_DOMAINS, MAX_PHONE_DIGITS, MIN_PHONE_DIGITS,
    NOREPLY_MARKERS, RESERVED_SOCIAL_SEGMENTS, SOCIAL_DOMAINS,
};

static EMAIL_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .unwrap()
});

/// Validate email address
///
/// Checks for:
/// - Basic email format (contains @ and .)
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - Minimum length requirements
/// - Valid domain structure
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::debug!("Rejected email (fake pattern '{}'): {}", pattern, email);
            return false;
        }
    }

    EMAIL_FORMAT.is_match(email)
}

/// Rules an email candidate must pass beyond basic format.
#[derive(Debug, Clone)]
pub struct EmailFilter {
    pub skip_domains: Vec<String>,
}

impl Default for EmailFilter {
    fn default() -> Self {
        Self {
            skip_domains: DEFAULT_SKIP_EMAIL_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl EmailFilter {
    pub fn accepts(&self, email: &str) -> bool {
        if email.matches('@').count() != 1 {
            return false;
        }
        if ASSET_EXTENSIONS.iter().any(|ext| email.ends_with(ext)) {
            tracing::debug!("Rejected email (asset filename): {}", email);
            return false;
        }
        if !is_valid_email(email) {
            return false;
        }

        let (local, domain) = match email.split_once('@') {
            Some(parts) => parts,
            None => return false,
        };
        if NOREPLY_MARKERS
            .iter()
            .any(|m| local.contains(m) || domain.contains(m))
        {
            tracing::debug!("Rejected email (automated mailbox): {}", email);
            return false;
        }
        let skip: Vec<&str> = self.skip_domains.iter().map(String::as_str).collect();
        if host_matches(domain, &skip) {
            tracing::debug!("Rejected email (skip-listed domain): {}", email);
            return false;
        }
        true
    }
}

/// Normalizes an email candidate: de-obfuscates `[at]`/`[dot]`, drops whitespace.
fn clean_email(candidate: &str) -> String {
    candidate
        .to_lowercase()
        .replace("[at]", "@")
        .replace("(at)", "@")
        .replace("[dot]", ".")
        .replace("(dot)", ".")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

/// E.164-like normalization: a leading `+` (or `00`) is kept as `+`, every other
/// non-digit is stripped. Returns `None` when the digit count is outside [9, 15].
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_PHONE_DIGITS || digits.len() > MAX_PHONE_DIGITS {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{}", digits))
    } else if let Some(rest) = digits.strip_prefix("00") {
        if rest.len() < MIN_PHONE_DIGITS {
            return None;
        }
        Some(format!("+{}", rest))
    } else {
        Some(digits)
    }
}

/// Normalizes a number for WhatsApp submission.
///
/// International numbers are run through libphonenumber and formatted as E.164
/// when valid; otherwise the E.164-like form from [`normalize_phone`] is used.
pub fn to_whatsapp_e164(raw: &str) -> Option<String> {
    let normalized = normalize_phone(raw)?;
    if normalized.starts_with('+') {
        if let Ok(number) = phonenumber::parse(None, &normalized) {
            if phonenumber::is_valid(&number) {
                return Some(number.format().mode(Mode::E164).to_string());
            }
        }
    }
    Some(normalized)
}

/// Digits without leading trunk zeros, used to spot the same number written
/// nationally and internationally.
fn significant_digits(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .trim_start_matches('0')
        .to_string()
}

/// Drops numbers that are a trailing fragment of a longer number in the set
/// (`501234567` next to `+971501234567`).
fn drop_fragment_phones(phones: Vec<String>) -> Vec<String> {
    let significant: Vec<String> = phones.iter().map(|p| significant_digits(p)).collect();
    phones
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let mine = &significant[*i];
            !significant
                .iter()
                .enumerate()
                .any(|(j, other)| {
                    j != *i && other.len() > mine.len() && other.ends_with(mine.as_str())
                })
        })
        .map(|(_, p)| p.clone())
        .collect()
}

/// Replaces the given byte spans with spaces so later rules cannot see them.
fn mask_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for &(start, end) in spans {
        for b in &mut bytes[start..end] {
            *b = b' ';
        }
    }
    // Spans come from regex matches on `text`, so they sit on char boundaries.
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}

/// Applies the contact pattern set to free text.
#[derive(Debug, Clone)]
pub struct ContactExtractor {
    patterns: &'static ContactPatternSet,
    email_filter: EmailFilter,
}

impl Default for ContactExtractor {
    fn default() -> Self {
        Self::new(EmailFilter::default())
    }
}

impl ContactExtractor {
    pub fn new(email_filter: EmailFilter) -> Self {
        Self {
            patterns: ContactPatternSet::shared(),
            email_filter,
        }
    }

    /// Extracts every contact category from `text`.
    pub fn extract(&self, text: &str, platform_hint: SourcePlatform) -> ContactInfo {
        let lowered = text.to_lowercase();

        let emails = self.extract_emails(&lowered);
        let phones = self.extract_phones(&lowered);
        let whatsapp = self
            .extract_whatsapp(&lowered)
            .or_else(|| phones.first().cloned());

        // Email domains must not be picked up as the lead's website.
        let email_spans: Vec<(usize, usize)> = self
            .patterns
            .email
            .iter()
            .flat_map(|rule| rule.spans(&lowered))
            .collect();
        let without_emails = mask_spans(&lowered, &email_spans);
        let website = self.extract_website(&without_emails, platform_hint);
        let social = self.extract_social(&lowered);

        ContactInfo {
            emails,
            phones,
            whatsapp,
            website,
            social,
        }
    }

    /// Runs `validator` over a raw candidate, returning the normalized value.
    fn validate(
        &self,
        validator: Validator,
        candidate: &str,
        platform_hint: SourcePlatform,
    ) -> Option<String> {
        match validator {
            Validator::Email => {
                let email = clean_email(candidate);
                self.email_filter.accepts(&email).then_some(email)
            }
            Validator::PhoneDigits => normalize_phone(candidate),
            Validator::Website => {
                let host = host_of(candidate)?;
                if host_matches(&host, SOCIAL_DOMAINS)
                    || host_matches(&host, FREE_MAIL_DOMAINS)
                    || host_matches(&host, platform_hint.own_domains())
                {
                    tracing::debug!("Skipped platform domain as website: {}", host);
                    return None;
                }
                let trimmed = candidate.trim_end_matches(['.', ',', ';', ':', ')', '/']);
                Some(if trimmed.starts_with("http") {
                    trimmed.to_string()
                } else {
                    format!("https://{}", trimmed)
                })
            }
            Validator::SocialHandle => {
                let handle = candidate.trim_end_matches(['.', '-']);
                let last = handle
                    .rsplit('/')
                    .next()
                    .unwrap_or(handle)
                    .trim_start_matches('@');
                if last.is_empty()
                    || last.chars().all(|c| c == '.' || c == '_')
                    || RESERVED_SOCIAL_SEGMENTS.contains(&last)
                {
                    return None;
                }
                Some(handle.to_string())
            }
        }
    }

    /// Union of every valid match across `rules`, deduplicated in discovery order.
    fn collect_all(
        &self,
        rules: &[ContactRule],
        text: &str,
        platform_hint: SourcePlatform,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for rule in rules {
            for candidate in rule.candidates(text) {
                match self.validate(rule.validator, candidate, platform_hint) {
                    Some(value) => {
                        if seen.insert(value.clone()) {
                            values.push(value);
                        }
                    }
                    None => tracing::debug!(
                        "Rejected candidate via {} ({} digits): {}",
                        rule.name,
                        digit_count(candidate),
                        candidate
                    ),
                }
            }
        }
        values
    }

    /// First valid match: rules are tried in order, the next rule only when the
    /// previous one yields nothing valid.
    fn first_valid(
        &self,
        rules: &[ContactRule],
        text: &str,
        platform_hint: SourcePlatform,
    ) -> Option<String> {
        rules.iter().find_map(|rule| {
            rule.candidates(text)
                .find_map(|candidate| self.validate(rule.validator, candidate, platform_hint))
        })
    }

    pub fn extract_emails(&self, lowered: &str) -> Vec<String> {
        self.collect_all(&self.patterns.email, lowered, SourcePlatform::Generic)
    }

    pub fn extract_phones(&self, text: &str) -> Vec<String> {
        let phones = self.collect_all(&self.patterns.phone, text, SourcePlatform::Generic);
        drop_fragment_phones(phones)
    }

    /// First explicit WhatsApp link, as `+<digits>`.
    pub fn extract_whatsapp(&self, lowered: &str) -> Option<String> {
        self.first_valid(&self.patterns.whatsapp, lowered, SourcePlatform::Generic)
            .map(|digits| format!("+{}", digits.trim_start_matches('+')))
    }

    pub fn extract_website(&self, lowered: &str, platform_hint: SourcePlatform) -> Option<String> {
        self.first_valid(&self.patterns.website, lowered, platform_hint)
    }

    pub fn extract_social(&self, lowered: &str) -> BTreeMap<SocialPlatform, String> {
        let mut social = BTreeMap::new();
        for social_rule in &self.patterns.social {
            let found = self.first_valid(
                std::slice::from_ref(&social_rule.rule),
                lowered,
                SourcePlatform::Generic,
            );
            if let Some(handle) = found {
                social.insert(
                    social_rule.platform,
                    format!("{}{}", social_rule.canonical_prefix, handle),
                );
            }
        }
        social
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_filter_rules() {
        let filter = EmailFilter::default();
        assert!(filter.accepts("sales@realcompany.ae"));
        assert!(!filter.accepts("info@example.com"));
        assert!(!filter.accepts("noreply@acme.ae"));
        assert!(!filter.accepts("logo@2x.png"));
        assert!(!filter.accepts("a@b@acme.ae"));
        assert!(!filter.accepts("errors@o123.ingest.sentry.io"));
    }

    #[test]
    fn test_custom_skip_domains() {
        let filter = EmailFilter {
            skip_domains: vec!["acme.ae".to_string()],
        };
        assert!(!filter.accepts("sales@acme.ae"));
        assert!(filter.accepts("info@example.com"));
    }

    #[test]
    fn test_obfuscated_labeled_email() {
        let extractor = ContactExtractor::default();
        let info = extractor.extract("E-mail: Info [at] Acme [dot] ae", SourcePlatform::Generic);
        assert_eq!(info.emails, vec!["info@acme.ae".to_string()]);
    }

    #[test]
    fn test_normalize_phone_bounds() {
        assert_eq!(normalize_phone("+971 50 123 4567").as_deref(), Some("+971501234567"));
        assert_eq!(normalize_phone("00971 50 123 4567").as_deref(), Some("+971501234567"));
        assert_eq!(normalize_phone("050-123-4567").as_deref(), Some("0501234567"));
        assert_eq!(normalize_phone("1234 5678"), None);
        assert_eq!(normalize_phone("1234567890123456"), None);
    }

    #[test]
    fn test_fragment_phones_are_dropped() {
        let phones = drop_fragment_phones(vec![
            "+971501234567".to_string(),
            "501234567".to_string(),
            "0501234567".to_string(),
            "+201001234567".to_string(),
        ]);
        assert_eq!(phones, vec!["+971501234567", "+201001234567"]);
    }

    #[test]
    fn test_whatsapp_link_preferred_over_phone() {
        let extractor = ContactExtractor::default();
        let info = extractor.extract(
            "Call +971 4 123 4567 or chat https://wa.me/971501112222",
            SourcePlatform::Generic,
        );
        assert_eq!(info.whatsapp.as_deref(), Some("+971501112222"));
    }

    #[test]
    fn test_whatsapp_falls_back_to_first_phone() {
        let extractor = ContactExtractor::default();
        let info = extractor.extract("Call +971 50 123 4567", SourcePlatform::Generic);
        assert_eq!(info.whatsapp.as_deref(), Some("+971501234567"));
    }

    #[test]
    fn test_website_skips_social_and_email_domains() {
        let extractor = ContactExtractor::default();
        let info = extractor.extract(
            "https://www.instagram.com/acme_ae/ mail sales@acme.ae visit https://acme-trading.ae/about.",
            SourcePlatform::Instagram,
        );
        assert_eq!(info.website.as_deref(), Some("https://acme-trading.ae/about"));
    }

    #[test]
    fn test_social_links_skip_reserved_segments() {
        let extractor = ContactExtractor::default();
        let info = extractor.extract(
            "https://www.linkedin.com/company/share https://www.linkedin.com/company/acme-trading \
             https://facebook.com/sharer.php https://facebook.com/AcmeTrading",
            SourcePlatform::Generic,
        );
        assert_eq!(
            info.social.get(&SocialPlatform::LinkedIn).map(String::as_str),
            Some("https://www.linkedin.com/company/acme-trading")
        );
        assert_eq!(
            info.social.get(&SocialPlatform::Facebook).map(String::as_str),
            Some("https://www.facebook.com/acmetrading")
        );
    }

    #[test]
    fn test_whatsapp_e164_formatting() {
        assert_eq!(
            to_whatsapp_e164("+971 (50) 123-4567").as_deref(),
            Some("+971501234567")
        );
        assert_eq!(to_whatsapp_e164("0501234567").as_deref(), Some("0501234567"));
        assert_eq!(to_whatsapp_e164("12345"), None);
    }
}
