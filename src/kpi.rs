//! Follower / connection / engagement figures from free text.
//!
//! All parsers return 0 on no match or overflow instead of failing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number with optional thousands separators, decimal part and K/M suffix,
/// followed by a keyword. `{kw}` is substituted per keyword.
const COUNT_TEMPLATE: &str = r"(?i)(\d[\d,]*(?:\.\d+)?)\s*([km])?\+?\s*(?:{kw})\b";

static FOLLOWERS: Lazy<Regex> = Lazy::new(|| count_regex("followers?"));
static FOLLOWING: Lazy<Regex> = Lazy::new(|| count_regex("following"));
static POSTS: Lazy<Regex> = Lazy::new(|| count_regex("posts?"));
static CONNECTIONS: Lazy<Regex> = Lazy::new(|| count_regex("connections?"));

fn count_regex(keyword_pattern: &str) -> Regex {
    Regex::new(&COUNT_TEMPLATE.replace("{kw}", keyword_pattern)).unwrap()
}

/// Engagement tier by follower count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementCategory {
    Nano,
    Micro,
    Mid,
    Macro,
    Mega,
}

/// Social metrics parsed from a profile snippet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialKpis {
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    pub connections: u64,
}

impl SocialKpis {
    pub fn engagement_category(&self) -> EngagementCategory {
        estimate_engagement_category(self.followers)
    }
}

/// Converts `"12.4"` + `k` into 12400 without going through floating point.
fn scale(number: &str, suffix: Option<&str>) -> Option<u64> {
    let cleaned = number.replace(',', "");
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    let multiplier: u64 = match suffix.map(|s| s.to_ascii_lowercase()) {
        Some(ref s) if s == "k" => 1_000,
        Some(ref s) if s == "m" => 1_000_000,
        _ => 1,
    };

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(multiplier)?;

    // Fractional digits beyond the multiplier's precision are floored away.
    let mut place = multiplier / 10;
    for digit in fraction.chars() {
        if place == 0 {
            break;
        }
        let d = u64::from(digit.to_digit(10)?);
        value = value.checked_add(d * place)?;
        place /= 10;
    }
    Some(value)
}

fn first_count(regex: &Regex, text: &str) -> u64 {
    regex
        .captures(text)
        .and_then(|caps| {
            let number = caps.get(1)?.as_str();
            scale(number, caps.get(2).map(|m| m.as_str()))
        })
        .unwrap_or(0)
}

/// Follower count in `text` ("12.4K Followers" → 12400). 0 when absent.
pub fn parse_count(text: &str) -> u64 {
    first_count(&FOLLOWERS, text)
}

/// Count attached to an arbitrary keyword ("500+ connections", "1,204 posts").
pub fn parse_count_for(text: &str, keyword: &str) -> u64 {
    let pattern = COUNT_TEMPLATE.replace("{kw}", &regex::escape(keyword));
    match Regex::new(&pattern) {
        Ok(regex) => first_count(&regex, text),
        Err(e) => {
            tracing::warn!("Invalid KPI keyword '{}': {}", keyword, e);
            0
        }
    }
}

/// Every metric the profile snippets usually carry.
pub fn extract_kpis(text: &str) -> SocialKpis {
    SocialKpis {
        followers: first_count(&FOLLOWERS, text),
        following: first_count(&FOLLOWING, text),
        posts: first_count(&POSTS, text),
        connections: first_count(&CONNECTIONS, text),
    }
}

/// nano < 1K ≤ micro < 10K ≤ mid < 100K ≤ macro < 1M ≤ mega
pub fn estimate_engagement_category(followers: u64) -> EngagementCategory {
    match followers {
        0..=999 => EngagementCategory::Nano,
        1_000..=9_999 => EngagementCategory::Micro,
        10_000..=99_999 => EngagementCategory::Mid,
        100_000..=999_999 => EngagementCategory::Macro,
        _ => EngagementCategory::Mega,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(parse_count("12.4K Followers"), 12_400);
        assert_eq!(parse_count("1M followers"), 1_000_000);
        assert_eq!(parse_count("2.75m followers"), 2_750_000);
        assert_eq!(parse_count("1.2k Followers"), 1_200);
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(parse_count("1,234 followers"), 1_234);
        assert_eq!(parse_count("12,400,000 followers"), 12_400_000);
    }

    #[test]
    fn test_no_match_is_zero() {
        assert_eq!(parse_count("no number here"), 0);
        assert_eq!(parse_count("followers: many"), 0);
        assert_eq!(parse_count("99999999999999999999999 followers"), 0);
    }

    #[test]
    fn test_fraction_floor() {
        assert_eq!(parse_count("1.23456K followers"), 1_234);
        assert_eq!(parse_count("3.9 followers"), 3);
    }

    #[test]
    fn test_keyword_specific_counts() {
        assert_eq!(parse_count_for("500+ connections", "connections"), 500);
        let kpis = extract_kpis("1,204 posts · 12.4K followers · 310 following");
        assert_eq!(kpis.followers, 12_400);
        assert_eq!(kpis.following, 310);
        assert_eq!(kpis.posts, 1_204);
        assert_eq!(kpis.connections, 0);
    }

    #[test]
    fn test_engagement_buckets() {
        assert_eq!(estimate_engagement_category(999), EngagementCategory::Nano);
        assert_eq!(estimate_engagement_category(1_000), EngagementCategory::Micro);
        assert_eq!(estimate_engagement_category(10_000), EngagementCategory::Mid);
        assert_eq!(estimate_engagement_category(100_000), EngagementCategory::Macro);
        assert_eq!(estimate_engagement_category(1_000_000), EngagementCategory::Mega);
    }
}
