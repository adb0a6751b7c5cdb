use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Calendar month key used by the hint trend buckets, `YYYY-MM`.
pub fn month_key(dt: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", dt.year(), dt.month())
}

/// First instant of the calendar month `months_back` months before `now`.
/// `months_back = 0` is the start of the current month.
pub fn month_floor(now: DateTime<Utc>, months_back: u32) -> DateTime<Utc> {
    let total = now.year() * 12 + now.month0() as i32 - months_back as i32;
    let year = total.div_euclid(12);
    let month0 = total.rem_euclid(12) as u32;
    Utc.with_ymd_and_hms(year, month0 + 1, 1, 0, 0, 0)
        .single()
        // Midnight on the 1st exists in every month of the proleptic calendar.
        .unwrap_or(now - Duration::days(31 * months_back as i64))
}
