use std::sync::OnceLock;

use regex::Regex;

/// Provisional account/period guessed from a file name. Parser output supersedes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameMetadata {
    pub account: Option<String>,
    pub period: Option<String>,
}

fn year_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})-(0[1-9]|1[0-2])(?:\D|$)").unwrap())
}

fn day_month_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\D)(\d{2})\.(0[1-9]|1[0-2])\.((?:19|20)\d{2})(?:\D|$)").unwrap())
}

// Numeric month only when it sits right next to the year: 2023_7, 08_2022.
fn year_then_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\p{L}\p{N}])((?:19|20)\d{2})[_ ](0?[1-9]|1[0-2])(?:[^\p{L}\p{N})]|$)").unwrap()
    })
}

fn month_then_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\p{L}\p{N}(])(0?[1-9]|1[0-2])[_ ]((?:19|20)\d{2})(?:[^\p{L}\p{N}]|$)").unwrap()
    })
}

fn token_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap())
}

// Known account-code shapes, tried in order.
fn account_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            // Contract codes such as 4000T49 or S000T49.
            Regex::new(r"(?:^|[^\p{L}\p{N}])([0-9A-Z]\d{3}[A-Z]\d{2})(?:[^\p{L}\p{N}]|$)").unwrap(),
            Regex::new(r"(?i)(?:account|acc|счет|счёт)[-_ ]?(\d{4,12})(?:\D|$)").unwrap(),
        ]
    })
}

const ENGLISH_MONTHS: &[(&str, u32)] = &[
    ("january", 1), ("jan", 1),
    ("february", 2), ("feb", 2),
    ("march", 3), ("mar", 3),
    ("april", 4), ("apr", 4),
    ("may", 5),
    ("june", 6), ("jun", 6),
    ("july", 7), ("jul", 7),
    ("august", 8), ("aug", 8),
    ("september", 9), ("sept", 9), ("sep", 9),
    ("october", 10), ("oct", 10),
    ("november", 11), ("nov", 11),
    ("december", 12), ("dec", 12),
];

// Stems cover the nominative, genitive and prepositional forms.
const RUSSIAN_MONTH_STEMS: &[(&str, u32)] = &[
    ("январ", 1),
    ("феврал", 2),
    ("март", 3),
    ("апрел", 4),
    ("июн", 6),
    ("июл", 7),
    ("август", 8),
    ("сентябр", 9),
    ("октябр", 10),
    ("ноябр", 11),
    ("декабр", 12),
];

fn month_from_token(token: &str) -> Option<u32> {
    let lower = token.to_lowercase();
    if let Some((_, m)) = ENGLISH_MONTHS.iter().find(|(name, _)| *name == lower) {
        return Some(*m);
    }
    if matches!(lower.as_str(), "май" | "мая" | "мае") {
        return Some(5);
    }
    if let Some((_, m)) = RUSSIAN_MONTH_STEMS
        .iter()
        .find(|(stem, _)| lower.starts_with(stem) && lower.chars().count() <= stem.chars().count() + 3)
    {
        return Some(*m);
    }
    None
}

fn is_year_token(token: &str) -> bool {
    token.len() == 4
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token.starts_with("19") || token.starts_with("20"))
}

fn extract_period(stem: &str) -> Option<String> {
    if let Some(caps) = year_month_re().captures(stem) {
        return Some(format!("{}-{}", &caps[1], &caps[2]));
    }
    if let Some(caps) = day_month_year_re().captures(stem) {
        return Some(format!("{}-{}", &caps[3], &caps[2]));
    }
    if let Some(caps) = year_then_month_re().captures(stem) {
        return Some(format!("{}-{:02}", &caps[1], caps[2].parse::<u32>().ok()?));
    }
    if let Some(caps) = month_then_year_re().captures(stem) {
        return Some(format!("{}-{:02}", &caps[2], caps[1].parse::<u32>().ok()?));
    }

    let tokens: Vec<&str> = token_split_re().split(stem).filter(|t| !t.is_empty()).collect();
    let year_idx = tokens.iter().position(|t| is_year_token(t))?;
    let month = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != year_idx)
        .find_map(|(_, t)| month_from_token(t))?;
    Some(format!("{}-{:02}", tokens[year_idx], month))
}

fn extract_account(stem: &str) -> Option<String> {
    account_res()
        .iter()
        .find_map(|re| re.captures(stem).map(|caps| caps[1].to_uppercase()))
}

pub fn extract(file_name: &str) -> FilenameMetadata {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    FilenameMetadata {
        account: extract_account(stem),
        period: extract_period(stem),
    }
}
