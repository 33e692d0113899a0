use once_cell::sync::Lazy;
use regex::Regex;

pub const BASE_SCORE: i32 = 50;
pub const MAX_SCORE: i32 = 100;
pub const MIN_SCORE: i32 = 0;

/// A category whose tiers are mutually exclusive: the first matching tier wins.
struct Tiered {
    tiers: Vec<(Regex, i32)>,
}

impl Tiered {
    fn points(&self, text: &str) -> i32 {
        self.tiers
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, points)| *points)
            .unwrap_or(0)
    }
}

/// Inflections accepted after a keyword ("awards", "emailed", "retailers").
const SUFFIXES: &str = r"(?:s|es|ed|er|ers|ing)?";

fn keyword_stem(word: &str) -> String {
    let escaped = regex::escape(word).replace(' ', r"\s+");
    // technology -> technologies
    match escaped.strip_suffix('y') {
        Some(stem) if stem.len() > 2 => format!("{}(?:y|ies)", stem),
        _ => escaped,
    }
}

/// Matches any keyword starting on a word boundary, in its plain or inflected form.
/// The suffix set is closed so "inc" never matches "incredible".
fn keywords(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| keyword_stem(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{}){}\b", alternation, SUFFIXES)).unwrap()
}

fn tiered(tiers: &[(&[&str], i32)]) -> Tiered {
    Tiered {
        tiers: tiers
            .iter()
            .map(|(words, points)| (keywords(words), *points))
            .collect(),
    }
}

static COMPANY_SIZE: Lazy<Tiered> = Lazy::new(|| {
    tiered(&[
        (&["fortune 500", "public", "nasdaq", "nyse"], 30),
        (&["enterprise", "corporation", "inc", "ltd"], 20),
        (&["startup", "small business", "founded"], 10),
    ])
});

static INDUSTRY: Lazy<Tiered> = Lazy::new(|| {
    tiered(&[
        (&["technology", "software", "healthcare", "finance", "consulting"], 15),
        (&["retail", "education", "manufacturing"], 5),
    ])
});

static NEGATIVE: Lazy<Tiered> = Lazy::new(|| {
    tiered(&[
        (&["closed", "bankruptcy", "out of business"], -20),
        (&["reviews", "complaints", "poor service"], -5),
    ])
});

/// Independent signals: every matching entry adds its points.
static INDEPENDENT: Lazy<Vec<(Regex, i32)>> = Lazy::new(|| {
    vec![
        (keywords(&["expanding", "growing"]), 10),
        (keywords(&["award", "recognized"]), 10),
        (keywords(&["contact", "email"]), 10),
        (keywords(&["phone", "call"]), 5),
        (keywords(&["linkedin"]), 5),
    ]
});

/// Heuristic point-based lead scoring over lowercased text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadScorer;

impl LeadScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score in `[0, 100]`, starting from 50. Pure function of the lowercased text.
    pub fn score(&self, text: &str) -> u8 {
        let text = text.to_lowercase();

        let mut score = BASE_SCORE;
        score += COMPANY_SIZE.points(&text);
        score += INDUSTRY.points(&text);
        score += INDEPENDENT
            .iter()
            .filter(|(regex, _)| regex.is_match(&text))
            .map(|(_, points)| *points)
            .sum::<i32>();
        score += NEGATIVE.points(&text);

        score.clamp(MIN_SCORE, MAX_SCORE) as u8
    }
}
