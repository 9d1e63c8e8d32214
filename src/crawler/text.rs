//! Text helpers used by the extractor
//!
//! Content cleaning, date parsing (absolute formats, then relative phrases),
//! language detection and engagement-count parsing.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static RELATIVE_EN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(second|minute|min|hour|hr|day|week|month|year)s?\s+ago")
        .expect("relative time regex")
});
static RELATIVE_ZH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*(秒|分钟|小时|天|周|个月|月|年)前").expect("relative time regex")
});

static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)*)\s*([km万]?)\b").expect("count regex")
});

/// Formats carrying a time of day, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only formats, tried in order
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y年%m月%d日",
];

/// Strips markup tags, removes control characters, collapses whitespace
pub fn clean_text(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let printable: String = without_tags
        .chars()
        .map(|c| if c.is_control() && !c.is_whitespace() { ' ' } else { c })
        .collect();
    WHITESPACE_RE
        .replace_all(&printable, " ")
        .trim()
        .to_string()
}

/// Parses a publish date, relative phrases are computed against `now`
///
/// Returns `None` for anything unparsable.
pub fn parse_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = clean_text(raw);
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, format) {
            return Some(dt.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&s, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Some(dt.and_utc());
            }
        }
    }

    parse_relative(&s, now)
}

fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (amount, unit) = if let Some(caps) = RELATIVE_EN_RE.captures(s) {
        (caps.get(1)?.as_str(), caps.get(2)?.as_str().to_ascii_lowercase())
    } else {
        let caps = RELATIVE_ZH_RE.captures(s)?;
        (caps.get(1)?.as_str(), caps.get(2)?.as_str().to_string())
    };

    let n: i64 = amount.parse().ok()?;
    let delta = match unit.as_str() {
        "second" | "秒" => Duration::try_seconds(n)?,
        "minute" | "min" | "分钟" => Duration::try_minutes(n)?,
        "hour" | "hr" | "小时" => Duration::try_hours(n)?,
        "day" | "天" => Duration::try_days(n)?,
        "week" | "周" => Duration::try_weeks(n)?,
        "month" | "个月" | "月" => Duration::try_days(n.checked_mul(30)?)?,
        "year" | "年" => Duration::try_days(n.checked_mul(365)?)?,
        _ => return None,
    };

    now.checked_sub_signed(delta)
}

/// Guesses a language code from text by Unicode script ranges
///
/// Returns `None` when the text has no letters.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut han = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut arabic = 0usize;
    let mut cyrillic = 0usize;
    let mut latin = 0usize;

    for c in text.chars().take(4000) {
        match c {
            '\u{3040}'..='\u{30ff}' => kana += 1,
            '\u{ac00}'..='\u{d7af}' | '\u{1100}'..='\u{11ff}' => hangul += 1,
            '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' => han += 1,
            '\u{0600}'..='\u{06ff}' => arabic += 1,
            '\u{0400}'..='\u{04ff}' => cyrillic += 1,
            c if c.is_ascii_alphabetic() => latin += 1,
            _ => {}
        }
    }

    // Japanese text mixes kana with Han characters
    if kana > 0 && kana * 5 >= han {
        return Some("ja");
    }

    let scores = [
        ("zh", han),
        ("ko", hangul),
        ("ar", arabic),
        ("ru", cyrillic),
        ("en", latin),
    ];
    let (lang, count) = scores
        .iter()
        .copied()
        .fold(("", 0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if count == 0 {
        None
    } else if lang == "en" && han + hangul + arabic + cyrillic > 0 {
        // Latin letters are often noise (markup, brand names) in CJK pages
        let other = han.max(hangul).max(arabic).max(cyrillic);
        if other * 3 >= count {
            scores
                .iter()
                .filter(|(l, _)| *l != "en")
                .max_by_key(|(_, n)| *n)
                .map(|(l, _)| *l)
        } else {
            Some("en")
        }
    } else {
        Some(lang)
    }
}

/// Normalizes a `lang` attribute value (`en-US` becomes `en`)
pub fn normalize_lang_attr(raw: &str) -> Option<String> {
    let primary = raw.trim().split(['-', '_']).next()?.trim().to_ascii_lowercase();
    if primary.is_empty() || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        None
    } else {
        Some(primary)
    }
}

/// Parses an engagement count such as `1,234`, `12.5k`, `3M` or `2万`
pub fn parse_count(raw: &str) -> Option<u64> {
    let caps = COUNT_RE.captures(raw.trim())?;
    let number = caps.get(1)?.as_str();
    let suffix = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();

    let multiplier = match suffix.as_str() {
        "k" => 1_000.0,
        "m" => 1_000_000.0,
        "万" => 10_000.0,
        _ => 1.0,
    };

    let value: f64 = if multiplier > 1.0 {
        // "1,5k" uses a decimal comma; "1,234" without suffix is a thousands separator
        number.replace(',', ".").parse().ok()?
    } else {
        number.replace(',', "").parse().ok()?
    };

    if value.is_finite() && value >= 0.0 {
        Some((value * multiplier).round() as u64)
    } else {
        None
    }
}
