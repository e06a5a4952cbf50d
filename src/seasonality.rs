//! Seasonality classification for backend requests
//!
//! Maps a series resolution to the backend's seasonality period `s` and turns
//! the first label of a series into the compact start token `xs`, so the
//! backend can align seasonal phase when the series does not start at
//! period 1.

use crate::types::{ResolutionFamily, SeriesResolution};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Seasonality period: weekly 4, monthly 3, quarterly 2, yearly family 1
pub fn season_type(resolution: SeriesResolution) -> u8 {
    match resolution.family() {
        ResolutionFamily::Weekly => 4,
        ResolutionFamily::Monthly => 3,
        ResolutionFamily::Quarterly => 2,
        ResolutionFamily::Yearly => 1,
    }
}

/// Convert a display label into the backend start token.
///
/// `"2020 W01"` → `"2020W01"`, `"2020 Jan"` → `"2020-01"`,
/// `"2020 Q1"` → `"2020Q1"`, `"2019/20"` → `"2019"`, `"2020"` → `"2020"`.
/// Returns `None` when the label does not match the resolution.
pub fn label_to_xs_param(label: &str, resolution: SeriesResolution) -> Option<String> {
    let label = label.trim();
    match resolution {
        SeriesResolution::Yearly => parse_year(label).map(|y| y.to_string()),
        SeriesResolution::Fluseason | SeriesResolution::Midyear => parse_split_year(label),
        SeriesResolution::Quarterly => {
            let (year, rest) = split_year_prefix(label)?;
            let quarter = rest.strip_prefix(['Q', 'q'])?;
            let quarter = parse_small(quarter, 1, 4)?;
            Some(format!("{}Q{}", year, quarter))
        }
        SeriesResolution::Monthly => {
            let (year, rest) = split_year_prefix(label)?;
            let month = parse_month(rest)?;
            Some(format!("{}-{:02}", year, month))
        }
        SeriesResolution::Weekly
        | SeriesResolution::Weekly13wSma
        | SeriesResolution::Weekly26wSma
        | SeriesResolution::Weekly52wSma
        | SeriesResolution::Weekly104wSma => {
            let (year, rest) = split_year_prefix(label)?;
            let week = rest.strip_prefix(['W', 'w'])?;
            let week = parse_small(week, 1, 53)?;
            Some(format!("{}W{:02}", year, week))
        }
    }
}

fn parse_year(s: &str) -> Option<u16> {
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Split `"2020 Jan"` / `"2020-Jan"` into the year and the remainder
fn split_year_prefix(label: &str) -> Option<(u16, &str)> {
    let year = parse_year(label.get(..4)?)?;
    let rest = label[4..].trim_start_matches([' ', '-']);
    if rest.is_empty() {
        return None;
    }
    Some((year, rest))
}

fn parse_split_year(label: &str) -> Option<String> {
    let (first, second) = label.split_once(['/', '-'])?;
    let year = parse_year(first.trim())?;
    let second = second.trim();
    if second.is_empty() || !second.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(year.to_string())
}

fn parse_small(s: &str, min: u8, max: u8) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u8 = s.parse().ok()?;
    (min..=max).contains(&value).then_some(value)
}

fn parse_month(s: &str) -> Option<u8> {
    let s = s.trim();
    if let Some(numeric) = parse_small(s, 1, 12) {
        return Some(numeric);
    }
    let prefix = s.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|idx| idx as u8 + 1)
}
