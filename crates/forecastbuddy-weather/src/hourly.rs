//! Day bucketing for the five-day / 3-hour forecast.
//!
//! Provider entries are numbered by calendar day: the first entry's day is
//! bucket 1 and each calendar-day boundary crossed adds one. The first bucket
//! is labelled "Today" on the assumption that the provider starts from now.
//! If the first entry already falls on the next calendar day, that label is
//! off by one day.

use chrono::{NaiveDate, TimeZone};

use crate::types::{HourlyEntry, ProviderHourly};

/// Hourly entries belonging to one calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub day_bucket: u32,
    /// "Today" for the first bucket, weekday name otherwise
    pub label: String,
    pub entries: Vec<HourlyEntry>,
}

fn local_day<Tz: TimeZone>(entry_time: &chrono::DateTime<chrono::Utc>, tz: &Tz) -> NaiveDate {
    entry_time.with_timezone(tz).date_naive()
}

/// Sort provider entries by time and assign calendar-day buckets in `tz`.
pub fn assign_day_buckets<Tz: TimeZone>(
    mut entries: Vec<ProviderHourly>,
    tz: &Tz,
) -> Vec<HourlyEntry> {
    entries.sort_by_key(|e| e.timestamp);

    let mut bucket = 0u32;
    let mut last_day: Option<NaiveDate> = None;

    entries
        .into_iter()
        .map(|e| {
            let day = local_day(&e.timestamp, tz);
            if last_day != Some(day) {
                bucket += 1;
                last_day = Some(day);
            }
            HourlyEntry {
                timestamp: e.timestamp,
                day_bucket: bucket,
                icon: e.icon,
                temp_kelvin: e.temp_kelvin,
                description: e.description,
            }
        })
        .collect()
}

/// Group bucketed entries by day for display.
pub fn group_by_day<Tz>(entries: &[HourlyEntry], tz: &Tz) -> Vec<DayGroup>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut groups: Vec<DayGroup> = Vec::new();

    for entry in entries {
        match groups.last_mut() {
            Some(group) if group.day_bucket == entry.day_bucket => {
                group.entries.push(entry.clone());
            }
            _ => {
                let label = if entry.day_bucket == 1 {
                    "Today".to_string()
                } else {
                    entry.timestamp.with_timezone(tz).format("%A").to_string()
                };
                groups.push(DayGroup {
                    day_bucket: entry.day_bucket,
                    label,
                    entries: vec![entry.clone()],
                });
            }
        }
    }

    groups
}

/// Check the ordering invariant of a bucketed sequence.
///
/// Entries must be sorted by time, buckets must start at 1 and grow by
/// exactly one whenever the calendar day in `tz` changes (and only then).
pub fn is_well_formed<Tz: TimeZone>(entries: &[HourlyEntry], tz: &Tz) -> bool {
    let Some(first) = entries.first() else {
        return true;
    };
    if first.day_bucket != 1 {
        return false;
    }

    entries.windows(2).all(|pair| {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.timestamp < prev.timestamp {
            return false;
        }
        let day_changed = local_day(&prev.timestamp, tz) != local_day(&next.timestamp, tz);
        let expected = if day_changed {
            prev.day_bucket + 1
        } else {
            prev.day_bucket
        };
        next.day_bucket == expected
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, Utc};

    fn slot(rfc3339: &str) -> ProviderHourly {
        ProviderHourly {
            timestamp: DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
            icon: "10d".into(),
            temp_kelvin: 288.0,
            description: "light rain".into(),
        }
    }

    /// `count` consecutive 3-hour slots starting at `start`.
    fn three_hourly(start: DateTime<Utc>, count: usize) -> Vec<ProviderHourly> {
        (0..count)
            .map(|i| ProviderHourly {
                timestamp: start + chrono::Duration::hours(3 * i as i64),
                icon: "01d".into(),
                temp_kelvin: 280.0 + i as f64,
                description: "clear sky".into(),
            })
            .collect()
    }

    #[test]
    fn test_buckets_increment_per_calendar_day() {
        let entries = vec![
            slot("2024-03-01T18:00:00Z"),
            slot("2024-03-01T21:00:00Z"),
            slot("2024-03-02T00:00:00Z"),
            slot("2024-03-02T03:00:00Z"),
            slot("2024-03-03T00:00:00Z"),
        ];

        let buckets: Vec<u32> = assign_day_buckets(entries, &Utc)
            .iter()
            .map(|e| e.day_bucket)
            .collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn test_buckets_sort_unordered_input() {
        let entries = vec![
            slot("2024-03-02T00:00:00Z"),
            slot("2024-03-01T21:00:00Z"),
        ];

        let hourly = assign_day_buckets(entries, &Utc);
        assert_eq!(hourly[0].day_bucket, 1);
        assert_eq!(hourly[1].day_bucket, 2);
        assert!(hourly[0].timestamp < hourly[1].timestamp);
    }

    #[test]
    fn test_buckets_follow_local_timezone() {
        // 2024-03-02T03:00Z is still March 1st in UTC-8
        let pacific = FixedOffset::west_opt(8 * 3600).unwrap();
        let entries = vec![
            slot("2024-03-01T21:00:00Z"),
            slot("2024-03-02T03:00:00Z"),
            slot("2024-03-02T09:00:00Z"),
        ];

        let buckets: Vec<u32> = assign_day_buckets(entries, &pacific)
            .iter()
            .map(|e| e.day_bucket)
            .collect();
        assert_eq!(buckets, vec![1, 1, 2]);
    }

    #[test]
    fn test_five_day_forecast_is_well_formed() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T13:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let hourly = assign_day_buckets(three_hourly(start, 40), &Utc);

        assert_eq!(hourly.len(), 40);
        assert!(is_well_formed(&hourly, &Utc));
        assert_eq!(hourly.last().unwrap().day_bucket, 6);
    }

    #[test]
    fn test_malformed_sequences_are_rejected() {
        let mut hourly = assign_day_buckets(
            vec![slot("2024-03-01T21:00:00Z"), slot("2024-03-02T00:00:00Z")],
            &Utc,
        );
        hourly[1].day_bucket = 3;
        assert!(!is_well_formed(&hourly, &Utc));

        hourly[1].day_bucket = 1;
        assert!(!is_well_formed(&hourly, &Utc));

        hourly[0].day_bucket = 0;
        assert!(!is_well_formed(&hourly, &Utc));
    }

    #[test]
    fn test_empty_is_well_formed() {
        assert!(is_well_formed(&[], &Utc));
        assert!(group_by_day(&[], &Utc).is_empty());
    }

    #[test]
    fn test_group_labels() {
        // 2024-03-01 is a Friday
        let hourly = assign_day_buckets(
            vec![
                slot("2024-03-01T18:00:00Z"),
                slot("2024-03-01T21:00:00Z"),
                slot("2024-03-02T00:00:00Z"),
                slot("2024-03-03T00:00:00Z"),
            ],
            &Utc,
        );

        let groups = group_by_day(&hourly, &Utc);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["Today", "Saturday", "Sunday"]);
        assert_eq!(groups[0].entries.len(), 2);
        assert_eq!(groups[2].day_bucket, 3);
    }

    #[test]
    fn test_first_bucket_always_labelled_today() {
        // Provider output starting on a later day still gets "Today" for bucket 1
        let hourly = assign_day_buckets(vec![slot("2030-01-07T00:00:00Z")], &Utc);
        let groups = group_by_day(&hourly, &Utc);
        assert_eq!(groups[0].label, "Today");
    }
}
