use crate::soap::ApiError;
use chrono::{Duration, NaiveDate};

// Format Tangier expects for date arguments.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(date: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|e| ApiError::Date(format!("'{}' is not a {} date: {}", date, DATE_FORMAT, e)))
}

// Split [start, end] into windows of at most eight weeks; Tangier rejects longer ranges
pub fn date_ranges(start_date: &str, end_date: &str) -> Result<Vec<(String, String)>, ApiError> {
    let mut start = parse_date(start_date)?;
    let end = parse_date(end_date)?;
    let window = Duration::weeks(8);

    let mut ranges = Vec::new();
    while let Some(window_end) = start.checked_add_signed(window).filter(|d| *d < end) {
        ranges.push((format_date(start), format_date(window_end)));
        start = window_end + Duration::days(1);
    }
    ranges.push((format_date(start), format_date(end)));
    Ok(ranges)
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
