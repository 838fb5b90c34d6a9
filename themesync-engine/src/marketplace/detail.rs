//! Picker summary line for a package.

use super::record::{DisplayDetail, ListingRecord, Statistics};

const SUFFIXES: [&str; 5] = ["", "K", "M", "B", "T"];

/// Format a count with three significant figures and a magnitude suffix.
///
/// `1234567` becomes `"1.23M"`, `999` stays `"999"`, `999_999` rounds up to `"1M"`.
pub fn human_format(value: u64) -> String {
    let mut num = round_significant(value as f64, 3);
    let mut magnitude = 0;
    while num.abs() >= 1000.0 && magnitude < SUFFIXES.len() - 1 {
        magnitude += 1;
        num /= 1000.0;
    }
    format!("{}{}", trim_decimal(num), SUFFIXES[magnitude])
}

fn round_significant(value: f64, digits: i32) -> f64 {
    if value == 0.0 {
        return 0.0;
    }
    let exponent = value.abs().log10().floor() as i32;
    let shift = digits - 1 - exponent;
    // Divide by an exact power of ten so small values stay representable.
    if shift >= 0 {
        let scale = 10f64.powi(shift);
        (value * scale).round() / scale
    } else {
        let scale = 10f64.powi(-shift);
        (value / scale).round() * scale
    }
}

fn trim_decimal(value: f64) -> String {
    let text = format!("{value:.6}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Build the detail string from the usable asset count and gallery statistics.
pub fn quick_pick_detail(theme_count: usize, statistics: &Statistics) -> String {
    let noun = if theme_count > 1 { "Themes" } else { "Theme" };
    let mut detail = format!("$(symbol-color) {theme_count} {noun}");

    if let Some(installs) = statistics.installs.filter(|n| *n > 0) {
        detail.push_str(&format!(
            " | $(extensions-install-count) {}",
            human_format(installs)
        ));
    }
    if let Some(rating) = statistics.rating.filter(|r| *r > 0.0) {
        detail.push_str(&format!(" | $(star-full) {rating:.1}"));
    }
    if let Some(count) = statistics.rating_count.filter(|n| *n > 0) {
        detail.push_str(&format!("/{}", human_format(count)));
    }

    detail
}

impl DisplayDetail {
    /// Recompute the summary for `record` with `theme_count` usable assets.
    pub fn for_record(record: &ListingRecord, theme_count: usize) -> Self {
        Self {
            label: record.display_name.clone(),
            description: record.publisher.display_name.clone(),
            detail: quick_pick_detail(theme_count, &record.statistics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::record::fixtures::listing;

    #[test]
    fn test_human_format() {
        assert_eq!(human_format(0), "0");
        assert_eq!(human_format(7), "7");
        assert_eq!(human_format(999), "999");
        assert_eq!(human_format(1000), "1K");
        assert_eq!(human_format(1234), "1.23K");
        assert_eq!(human_format(15_500), "15.5K");
        assert_eq!(human_format(1_234_567), "1.23M");
        assert_eq!(human_format(999_999), "1M");
        assert_eq!(human_format(2_000_000_000), "2B");
        assert_eq!(human_format(4_560_000_000_000), "4.56T");
    }

    #[test]
    fn test_detail_with_all_statistics() {
        let stats = Statistics {
            installs: Some(1_234_567),
            rating: Some(4.56),
            rating_count: Some(42),
        };
        assert_eq!(
            quick_pick_detail(3, &stats),
            "$(symbol-color) 3 Themes | $(extensions-install-count) 1.23M | $(star-full) 4.6/42"
        );
    }

    #[test]
    fn test_detail_singular_without_statistics() {
        assert_eq!(
            quick_pick_detail(1, &Statistics::default()),
            "$(symbol-color) 1 Theme"
        );
        assert_eq!(
            quick_pick_detail(0, &Statistics::default()),
            "$(symbol-color) 0 Theme"
        );
    }

    #[test]
    fn test_detail_skips_zero_statistics() {
        let stats = Statistics {
            installs: Some(0),
            rating: Some(5.0),
            rating_count: None,
        };
        assert_eq!(
            quick_pick_detail(2, &stats),
            "$(symbol-color) 2 Themes | $(star-full) 5.0"
        );
    }

    #[test]
    fn test_display_detail_for_record() {
        let record = listing("acme", "dark-pro", "1.2.0");
        let detail = DisplayDetail::for_record(&record, 1);
        assert_eq!(detail.label, "dark-pro theme");
        assert_eq!(detail.description, "ACME");
        assert!(detail.detail.starts_with("$(symbol-color) 1 Theme |"));
    }
}
