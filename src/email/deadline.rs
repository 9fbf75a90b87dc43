use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc, Weekday};

/// Business days an insurer has to answer a PQRS.
pub const LEGAL_RESPONSE_BUSINESS_DAYS: u32 = 15;

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Moves forward `days` weekdays. A start on a weekend counts from the
/// following Monday.
pub fn add_business_days(start: NaiveDate, days: u32) -> NaiveDate {
    let mut date = start;
    let mut remaining = days;
    while remaining > 0 {
        date = date + Days::new(1);
        if is_business_day(date) {
            remaining -= 1;
        }
    }
    date
}

pub fn local_date(timestamp: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    timestamp.with_timezone(&offset).date_naive()
}

pub fn legal_deadline(created_at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    add_business_days(local_date(created_at, offset), LEGAL_RESPONSE_BUSINESS_DAYS)
}
