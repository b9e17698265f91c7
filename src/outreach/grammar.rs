//! Small English helpers for filling message templates.
use once_cell::sync::Lazy;
use regex::Regex;

static CORPORATE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[,\s]+(?:l\.?l\.?c|inc|incorporated|ltd|limited|co|corp|corporation|p\.?l\.?l\.?c|l\.?l\.?p|plc)\.?$",
    )
    .expect("corporate suffix pattern is valid")
});

/// Industries named by a descriptor rather than a noun, with the
/// singular noun used for them.
const DESCRIPTOR_INDUSTRIES: &[(&str, &str, &str)] = &[
    ("dental", "dental practice", "dental practices"),
    ("medical", "medical practice", "medical practices"),
    ("legal", "law firm", "law firms"),
    ("law", "law firm", "law firms"),
    ("real estate", "real estate agency", "real estate agencies"),
    ("automotive", "auto shop", "auto shops"),
    ("accounting", "accounting firm", "accounting firms"),
    ("insurance", "insurance agency", "insurance agencies"),
    ("fitness", "fitness studio", "fitness studios"),
    ("hvac", "HVAC company", "HVAC companies"),
    ("construction", "construction company", "construction companies"),
    ("landscaping", "landscaping company", "landscaping companies"),
    ("roofing", "roofing company", "roofing companies"),
    ("cleaning", "cleaning service", "cleaning services"),
    ("beauty", "beauty salon", "beauty salons"),
    ("veterinary", "veterinary clinic", "veterinary clinics"),
    ("chiropractic", "chiropractic office", "chiropractic offices"),
    ("plumbing", "plumbing company", "plumbing companies"),
    ("electrical", "electrical contractor", "electrical contractors"),
];

const FALLBACK_NOUN: (&str, &str) = ("local business", "local businesses");

fn descriptor(industry: &str) -> Option<(&'static str, &'static str)> {
    let key = industry.trim().to_ascii_lowercase();
    DESCRIPTOR_INDUSTRIES
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, singular, plural)| (*singular, *plural))
}

fn pluralize_word(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let is_vowel = |b: u8| matches!(b, b'a' | b'e' | b'i' | b'o' | b'u');

    if lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
        // already plural
        return word.to_string();
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{word}es");
    }
    if bytes.len() >= 2 && lower.ends_with('y') && !is_vowel(bytes[bytes.len() - 2]) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    format!("{word}s")
}

fn singularize_word(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.len() > 3 && lower.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if ["sses", "shes", "ches", "xes", "zes"]
        .iter()
        .any(|s| lower.ends_with(s))
    {
        return word[..word.len() - 2].to_string();
    }
    if lower.ends_with('s') && !["ss", "us", "is"].iter().any(|s| lower.ends_with(s)) {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Singular noun for an industry, e.g. "dental" -> "dental practice".
/// Free-form plurals such as "Plumbers" singularize their last word.
pub fn industry_singular(industry: Option<&str>) -> String {
    let Some(industry) = industry.map(str::trim).filter(|s| !s.is_empty()) else {
        return FALLBACK_NOUN.0.to_string();
    };
    if let Some((singular, _)) = descriptor(industry) {
        return singular.to_string();
    }
    let lower = industry.to_lowercase();
    match lower.rsplit_once(' ') {
        Some((head, last)) => format!("{head} {}", singularize_word(last)),
        None => singularize_word(&lower),
    }
}

/// Plural noun for an industry. Multi-word names pluralize their last word.
pub fn industry_plural(industry: Option<&str>) -> String {
    let Some(industry) = industry.map(str::trim).filter(|s| !s.is_empty()) else {
        return FALLBACK_NOUN.1.to_string();
    };
    if let Some((_, plural)) = descriptor(industry) {
        return plural.to_string();
    }
    let lower = industry.to_lowercase();
    match lower.rsplit_once(' ') {
        Some((head, last)) => format!("{head} {}", pluralize_word(last)),
        None => pluralize_word(&lower),
    }
}

/// "a" or "an" followed by the noun.
pub fn with_article(noun: &str) -> String {
    let first_word = noun.split_whitespace().next().unwrap_or("");
    let lower = first_word.to_ascii_lowercase();
    let is_acronym = first_word.len() > 1 && first_word.chars().all(|c| c.is_ascii_uppercase());

    let an = if is_acronym {
        first_word
            .chars()
            .next()
            .is_some_and(|c| "AEFHILMNORSX".contains(c))
    } else if ["hour", "honest", "honor", "heir"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        true
    } else if ["uni", "use", "usu", "one", "eu"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        false
    } else {
        lower
            .chars()
            .next()
            .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
    };

    if an {
        format!("an {noun}")
    } else {
        format!("a {noun}")
    }
}

/// Business name as it would be said in conversation: corporate suffixes
/// such as LLC or Inc are dropped.
pub fn conversational_name(name: &str) -> String {
    let mut current = name.trim().to_string();
    loop {
        let stripped = CORPORATE_SUFFIX.replace(&current, "").into_owned();
        let stripped = stripped
            .trim_end_matches(|c: char| c == ',' || c == '&' || c.is_whitespace())
            .to_string();
        if stripped == current || stripped.is_empty() {
            return current;
        }
        current = stripped;
    }
}

/// Possessive form of the conversational name.
pub fn possessive(name: &str) -> String {
    let name = conversational_name(name);
    if name.ends_with('s') || name.ends_with('S') {
        format!("{name}'")
    } else {
        format!("{name}'s")
    }
}
