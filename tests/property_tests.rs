/// Property-based tests using proptest
/// Extraction, KPI parsing and scoring must hold up on arbitrary scraped text
use proptest::prelude::*;
use rust_leadgen_api::contact_extractor::{normalize_phone, ContactExtractor};
use rust_leadgen_api::kpi::parse_count;
use rust_leadgen_api::models::SourcePlatform;
use rust_leadgen_api::scoring::LeadScorer;

// Property: extraction never panics and never returns duplicates
proptest! {
    #[test]
    fn extraction_never_panics(text in "\\PC*") {
        let _ = ContactExtractor::default().extract(&text, SourcePlatform::Generic);
    }

    #[test]
    fn extracted_emails_are_unique_and_lowercase(
        local in "[a-z]{1,10}",
        domain in "[a-z]{2,10}",
        tld in "(ae|com|net|io)",
        repeats in 1usize..4
    ) {
        let email = format!("{}@{}.{}", local, domain, tld);
        let text = vec![email.to_uppercase(); repeats].join(" , ");
        let contacts = ContactExtractor::default().extract(&text, SourcePlatform::Generic);

        prop_assert!(contacts.emails.len() <= 1);
        for found in &contacts.emails {
            prop_assert_eq!(found, &found.to_lowercase());
        }
    }

    #[test]
    fn extracted_phones_respect_digit_bounds(text in "[0-9 +()-]{0,40}") {
        let contacts = ContactExtractor::default().extract(&text, SourcePlatform::Generic);
        for phone in &contacts.phones {
            let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
            prop_assert!((9..=15).contains(&digits), "{} has {} digits", phone, digits);
        }
    }
}

// Property: phone normalization keeps only digits and an optional leading '+'
proptest! {
    #[test]
    fn normalize_phone_never_panics(raw in "\\PC*") {
        let _ = normalize_phone(&raw);
    }

    #[test]
    fn normalized_phone_shape(digits in "[0-9]{1,20}", plus in proptest::bool::ANY) {
        let raw = if plus { format!("+{}", digits) } else { digits.clone() };
        match normalize_phone(&raw) {
            Some(normalized) => {
                let body = normalized.trim_start_matches('+');
                prop_assert!(body.chars().all(|c| c.is_ascii_digit()));
                prop_assert!((9..=15).contains(&body.len()));
            }
            None => {
                let short_after_prefix = !plus && digits.starts_with("00") && digits.len() < 11;
                prop_assert!(digits.len() < 9 || digits.len() > 15 || short_after_prefix);
            }
        }
    }
}

// Property: KPI parsing and scoring are total
proptest! {
    #[test]
    fn parse_count_never_panics(text in "\\PC*") {
        let _ = parse_count(&text);
    }

    #[test]
    fn parse_count_reads_plain_follower_counts(n in 0u64..1_000_000_000u64) {
        let text = format!("{} followers", n);
        prop_assert_eq!(parse_count(&text), n);
    }

    #[test]
    fn thousand_suffix_scales(n in 1u64..1000u64) {
        let text = format!("{}K Followers", n);
        prop_assert_eq!(parse_count(&text), n * 1_000);
    }

    #[test]
    fn score_always_in_range(text in "\\PC*") {
        let score = LeadScorer::new().score(&text);
        prop_assert!(score <= 100);
    }

    #[test]
    fn score_bounded_for_keyword_soup(
        words in proptest::collection::vec(
            "(fortune 500|enterprise|startup|award|growing|contact|email|linkedin|closed|bankrupt|small|tech|healthcare)",
            0..30
        )
    ) {
        let score = LeadScorer::new().score(&words.join(" "));
        prop_assert!(score <= 100);
    }
}
