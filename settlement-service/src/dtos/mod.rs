pub mod payments;
pub mod services;

/// Dates arrive either as RFC 3339 timestamps or bare `YYYY-MM-DD` days;
/// bare days are pinned to midnight UTC.
pub(crate) mod flexible_date {
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => parse(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::flexible_date;

    #[test]
    fn parses_rfc3339_and_bare_days() {
        let full = flexible_date::parse("2026-03-02T15:04:05Z").unwrap();
        assert_eq!(full.to_rfc3339(), "2026-03-02T15:04:05+00:00");

        let day = flexible_date::parse("2026-03-02").unwrap();
        assert_eq!(day.to_rfc3339(), "2026-03-02T00:00:00+00:00");

        assert!(flexible_date::parse("yesterday").is_none());
    }
}
