//! Contact pattern rules.
//!
//! Every extraction category is an ordered list of [`ContactRule`]s: a compiled
//! regex plus the validator that candidate matches must pass. Rules are applied in
//! order, so earlier rules win when a category keeps only the first valid match
//! (WhatsApp, website, one link per social platform). Email and phone categories
//! union the valid matches of every rule.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::SocialPlatform;

/// Validation applied to a candidate before it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Exactly one `@`, domain not skip-listed, not an asset filename.
    Email,
    /// Digit-only length within [`MIN_PHONE_DIGITS`, `MAX_PHONE_DIGITS`].
    PhoneDigits,
    /// Host not owned by a social platform or the source platform.
    Website,
    /// Path segment is a profile handle rather than a reserved route.
    SocialHandle,
}

/// A single extraction rule. Capture group 1 holds the candidate when present,
/// otherwise the whole match is used.
#[derive(Debug)]
pub struct ContactRule {
    pub name: &'static str,
    pub regex: Regex,
    pub validator: Validator,
}

impl ContactRule {
    /// Byte ranges of every match, used to mask text between categories.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect()
    }

    fn new(name: &'static str, pattern: &str, validator: Validator) -> Self {
        Self {
            name,
            // Patterns are compile-time constants covered by the tests below.
            regex: Regex::new(pattern).expect("invalid contact pattern"),
            validator,
        }
    }

    /// Candidate strings matched by this rule, in text order.
    pub fn candidates<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.regex.captures_iter(text).filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str())
        })
    }
}

/// Social rule with the platform it yields.
#[derive(Debug)]
pub struct SocialRule {
    pub platform: SocialPlatform,
    pub rule: ContactRule,
    /// Prefix used to rebuild a canonical profile URL from the captured handle.
    pub canonical_prefix: &'static str,
}

pub const MIN_PHONE_DIGITS: usize = 9;
pub const MAX_PHONE_DIGITS: usize = 15;

/// Domains whose addresses are placeholders or automated senders.
pub const DEFAULT_SKIP_EMAIL_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "domain.com",
    "email.com",
    "test.com",
    "yourdomain.com",
    "sentry.io",
    "sentry-next.wixpress.com",
    "wixpress.com",
    "noreply.com",
    "no-reply.com",
];

/// Local parts / domain fragments that mark automated mailboxes.
pub const NOREPLY_MARKERS: &[&str] = &["noreply", "no-reply", "donotreply", "do-not-reply"];

/// Extensions that show a match is really an asset filename (`logo@2x.png`).
pub const ASSET_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".bmp", ".js", ".css", ".mjs",
    ".json", ".woff", ".woff2",
];

/// Hosts that are never a business's own website.
pub const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "instagram.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "youtube.com",
    "youtu.be",
    "wa.me",
    "whatsapp.com",
    "t.me",
    "telegram.me",
    "snapchat.com",
    "pinterest.com",
    "google.com",
    "goo.gl",
    "g.page",
    "gstatic.com",
    "googleapis.com",
    "googleusercontent.com",
    "schema.org",
    "w3.org",
];

/// Free mailbox providers. A bare mention of these is never a company website.
pub const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

/// Path segments that are platform routes rather than profile handles.
pub const RESERVED_SOCIAL_SEGMENTS: &[&str] = &[
    "share",
    "sharer",
    "sharer.php",
    "profile.php",
    "login",
    "signup",
    "register",
    "intent",
    "home",
    "explore",
    "p",
    "reel",
    "reels",
    "stories",
    "hashtag",
    "watch",
    "about",
    "privacy",
    "legal",
    "help",
    "policies",
    "accounts",
    "tr",
    "dialog",
    "plugins",
    "feed",
    "search",
    "pages",
    "groups",
    "events",
    "embed",
    "results",
    "settings",
];

/// Compiled rule set, shared across extractor instances.
#[derive(Debug)]
pub struct ContactPatternSet {
    pub email: Vec<ContactRule>,
    pub phone: Vec<ContactRule>,
    pub whatsapp: Vec<ContactRule>,
    pub website: Vec<ContactRule>,
    pub social: Vec<SocialRule>,
}

impl ContactPatternSet {
    fn build() -> Self {
        let email = vec![
            ContactRule::new(
                "email_bare",
                r"[a-z0-9][a-z0-9._%+-]*@[a-z0-9][a-z0-9.-]*\.[a-z]{2,}",
                Validator::Email,
            ),
            ContactRule::new(
                "email_labeled",
                r"(?:e-?mail|contact|mail)\s*[:：]\s*([a-z0-9][a-z0-9._%+-]*\s*(?:@|\[at\]|\(at\))\s*[a-z0-9][a-z0-9-]*(?:(?:\.|\s*\[dot\]\s*|\s*\(dot\)\s*)[a-z0-9-]+)*(?:\.|\s*\[dot\]\s*|\s*\(dot\)\s*)[a-z]{2,})",
                Validator::Email,
            ),
        ];

        let phone = vec![
            ContactRule::new(
                "phone_tel_uri",
                r"tel:\s*(\+?[\d][\d\s().-]{7,20}\d)",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "phone_uae",
                r"(?:\+971|00971|\b0)[\s-]?5\d[\s-]?\d{3}[\s-]?\d{4}\b",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "phone_egypt",
                r"(?:\+20|0020|\b0)[\s-]?1[0125][\s-]?\d{4}[\s-]?\d{4}\b",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "phone_saudi",
                r"(?:\+966|00966|\b0)[\s-]?5\d[\s-]?\d{3}[\s-]?\d{4}\b",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "phone_international",
                r"\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,4}\b",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "phone_national_grouped",
                r"\(?\b\d{2,4}\)?[\s.-]\d{3,4}[\s.-]\d{3,4}\b",
                Validator::PhoneDigits,
            ),
        ];

        let whatsapp = vec![
            ContactRule::new(
                "whatsapp_wa_me",
                r"wa\.me/\+?(\d{7,15})",
                Validator::PhoneDigits,
            ),
            ContactRule::new(
                "whatsapp_send_link",
                r"whatsapp\.com/send/?\?phone=\+?(\d{7,15})",
                Validator::PhoneDigits,
            ),
        ];

        let website = vec![
            ContactRule::new(
                "website_url",
                r#"https?://[a-z0-9][a-z0-9.-]*\.[a-z]{2,}(?::\d+)?(?:/[^\s"'<>()\]\[]*)?"#,
                Validator::Website,
            ),
            ContactRule::new(
                "website_www",
                r"\bwww\.[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.[a-z]{2,}\b",
                Validator::Website,
            ),
            ContactRule::new(
                "website_bare_domain",
                r"\b[a-z0-9][a-z0-9-]*\.(?:com|net|org|io|co|biz|info|ae|sa|eg|qa|kw|om|bh|uk)(?:\.[a-z]{2})?\b",
                Validator::Website,
            ),
        ];

        let social = vec![
            SocialRule {
                platform: SocialPlatform::LinkedIn,
                rule: ContactRule::new(
                    "social_linkedin",
                    r"\blinkedin\.com/((?:in|company)/[a-z0-9_%-]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://www.linkedin.com/",
            },
            SocialRule {
                platform: SocialPlatform::Instagram,
                rule: ContactRule::new(
                    "social_instagram",
                    r"\binstagram\.com/([a-z0-9_.]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://www.instagram.com/",
            },
            SocialRule {
                platform: SocialPlatform::Facebook,
                rule: ContactRule::new(
                    "social_facebook",
                    r"\b(?:facebook|fb)\.com/([a-z0-9_.-]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://www.facebook.com/",
            },
            SocialRule {
                platform: SocialPlatform::Twitter,
                rule: ContactRule::new(
                    "social_twitter",
                    r"\b(?:twitter|x)\.com/([a-z0-9_]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://x.com/",
            },
            SocialRule {
                platform: SocialPlatform::TikTok,
                rule: ContactRule::new(
                    "social_tiktok",
                    r"\btiktok\.com/(@[a-z0-9_.]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://www.tiktok.com/",
            },
            SocialRule {
                platform: SocialPlatform::YouTube,
                rule: ContactRule::new(
                    "social_youtube",
                    r"\byoutube\.com/((?:@|c/|channel/|user/)[a-z0-9_.-]+)",
                    Validator::SocialHandle,
                ),
                canonical_prefix: "https://www.youtube.com/",
            },
        ];

        Self {
            email,
            phone,
            whatsapp,
            website,
            social,
        }
    }

    /// The process-wide compiled rule set.
    pub fn shared() -> &'static ContactPatternSet {
        static PATTERNS: Lazy<ContactPatternSet> = Lazy::new(ContactPatternSet::build);
        &PATTERNS
    }
}

/// Host part of a URL or bare domain, lowercased, without `www.`.
pub fn host_of(candidate: &str) -> Option<String> {
    let without_scheme = candidate
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = without_scheme
        .split(['/', '?', '#', ':'])
        .next()?
        .trim_end_matches('.')
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.contains('.') {
        Some(host)
    } else {
        None
    }
}

/// Whether `host` equals or is a subdomain of any entry in `domains`.
pub fn host_matches(host: &str, domains: &[&str]) -> bool {
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}
