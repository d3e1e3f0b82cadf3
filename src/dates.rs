//! Free-text date parsing for search filters
//!
//! Callers pass dates the way people write them ("2024-01-01", "March 3,
//! 2024", "last week", "3 days ago"). Relative forms are resolved against an
//! explicit `today` so results are deterministic.

use std::sync::LazyLock;

use chrono::{Days, Months, NaiveDate};
use regex::Regex;

/// Absolute formats tried in order
const ABSOLUTE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
];

static RELATIVE_AGO: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,4}|a|an|one) (day|week|month|year)s? ago$").ok()
});

/// Parse a human-written date
///
/// Returns `None` when the text matches no supported form; the caller
/// decides whether that is an error.
pub fn parse_human_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    match normalized.as_str() {
        "" => return None,
        "today" | "now" => return Some(today),
        "yesterday" => return today.pred_opt(),
        "tomorrow" => return today.succ_opt(),
        _ => {}
    }

    if let Some(unit) = normalized.strip_prefix("last ") {
        return shift_back(today, 1, unit);
    }

    if let Some(re) = RELATIVE_AGO.as_ref()
        && let Some(caps) = re.captures(&normalized)
    {
        let amount = match &caps[1] {
            "a" | "an" | "one" => 1,
            n => n.parse().ok()?,
        };
        return shift_back(today, amount, &caps[2]);
    }

    ABSOLUTE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&normalized, fmt).ok())
}

/// Step back `amount` units; month arithmetic clamps to the month's last day
fn shift_back(today: NaiveDate, amount: u32, unit: &str) -> Option<NaiveDate> {
    match unit.trim_end_matches('s') {
        "day" => today.checked_sub_days(Days::new(u64::from(amount))),
        "week" => today.checked_sub_days(Days::new(u64::from(amount) * 7)),
        "month" => today.checked_sub_months(Months::new(amount)),
        "year" => today.checked_sub_months(Months::new(amount.checked_mul(12)?)),
        _ => None,
    }
}
