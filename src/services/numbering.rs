//! Daily sequential document numbers such as `RMA-20260315-0042`.

use crate::errors::ServiceError;
use chrono::NaiveDate;
use std::future::Future;
use tracing::warn;

/// Attempts made before a number collision is reported to the caller.
pub const MAX_NUMBERING_ATTEMPTS: u32 = 3;

/// `PREFIX-YYYYMMDD-`
pub fn daily_prefix(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}-", prefix, date.format("%Y%m%d"))
}

pub fn format_number(prefix: &str, date: NaiveDate, sequence: u32) -> String {
    format!("{}{:04}", daily_prefix(prefix, date), sequence)
}

/// The number following `latest`, the highest number already issued today.
/// Starts at 0001 when nothing was issued yet.
pub fn next_number(prefix: &str, date: NaiveDate, latest: Option<&str>) -> String {
    let day_prefix = daily_prefix(prefix, date);
    let last = latest
        .and_then(|n| n.strip_prefix(day_prefix.as_str()))
        .and_then(|seq| seq.parse::<u32>().ok())
        .unwrap_or(0);
    format_number(prefix, date, last + 1)
}

/// Runs `attempt` until it stops failing on a unique violation, at most
/// [`MAX_NUMBERING_ATTEMPTS`] times. Each attempt must read the latest number
/// again, since the collision means another request committed it first.
pub async fn retry_on_collision<T, F, Fut>(document: &str, mut attempt: F) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut made = 0;
    loop {
        made += 1;
        match attempt(made).await {
            Err(e) if e.is_unique_violation() && made < MAX_NUMBERING_ATTEMPTS => {
                warn!(attempt = made, document, "number collision, retrying");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    #[test]
    fn first_number_of_the_day() {
        assert_eq!(next_number("RMA", day(), None), "RMA-20260315-0001");
    }

    #[test]
    fn increments_latest() {
        assert_eq!(
            next_number("RMA", day(), Some("RMA-20260315-0041")),
            "RMA-20260315-0042"
        );
        assert_eq!(
            next_number("ORD", day(), Some("ORD-20260315-9999")),
            "ORD-20260315-10000"
        );
    }

    #[test]
    fn other_days_do_not_count() {
        assert_eq!(
            next_number("RMA", day(), Some("RMA-20260314-0007")),
            "RMA-20260315-0001"
        );
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), ServiceError> = retry_on_collision("order", |attempt| {
            calls += 1;
            async move { Err(ServiceError::InvalidInput(format!("attempt {}", attempt))) }
        })
        .await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(ServiceError::InvalidInput(msg)) if msg == "attempt 1"));
    }
}
