use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Author label used for all-author totals in [`DailyCount`].
pub const ALL_AUTHORS: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditEvent {
    pub date: NaiveDate,
    pub author: String,
}

impl EditEvent {
    pub fn new(date: NaiveDate, author: impl Into<String>) -> Self {
        Self {
            date,
            author: author.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub author: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesMode {
    /// One count per day across all authors.
    Total,
    /// One count per day per author, plus the daily total.
    #[default]
    PerAuthor,
}

impl FromStr for SeriesMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "total" => Ok(SeriesMode::Total),
            "per-author" | "per_author" | "author" => Ok(SeriesMode::PerAuthor),
            other => Err(format!("expected 'total' or 'per-author', got '{other}'")),
        }
    }
}

impl fmt::Display for SeriesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesMode::Total => f.write_str("total"),
            SeriesMode::PerAuthor => f.write_str("per-author"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub total: u64,
    /// Indexed like [`DenseSeries::authors`]. Empty in [`SeriesMode::Total`].
    pub by_author: Vec<u64>,
}

/// A gap-free daily series from the earliest edit through the end date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenseSeries {
    pub mode: SeriesMode,
    pub authors: Vec<String>,
    pub points: Vec<SeriesPoint>,
}

impl Serialize for SeriesMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl DenseSeries {
    pub fn start(&self) -> Option<NaiveDate> {
        self.points.first().map(|point| point.date)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.points.last().map(|point| point.date)
    }

    pub fn total_edits(&self) -> u64 {
        self.points.iter().map(|point| point.total).sum()
    }

    pub fn author_index(&self, author: &str) -> Option<usize> {
        self.authors.binary_search_by(|name| name.as_str().cmp(author)).ok()
    }

    /// Flattens the series into dense [`DailyCount`] rows: one `"*"` row per
    /// day in total mode, one row per author per day otherwise.
    pub fn entries(&self) -> Vec<DailyCount> {
        match self.mode {
            SeriesMode::Total => self
                .points
                .iter()
                .map(|point| DailyCount {
                    date: point.date,
                    author: ALL_AUTHORS.to_string(),
                    count: point.total,
                })
                .collect(),
            SeriesMode::PerAuthor => self
                .points
                .iter()
                .flat_map(|point| {
                    self.authors
                        .iter()
                        .zip(&point.by_author)
                        .map(|(author, count)| DailyCount {
                            date: point.date,
                            author: author.clone(),
                            count: *count,
                        })
                })
                .collect(),
        }
    }
}

/// Distinct authors in lexicographic order.
pub fn author_set(events: &[EditEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| event.author.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Sparse counts for every `(date, author)` pair present in the input, followed by
/// the per-day totals under [`ALL_AUTHORS`]. Nothing is gap-filled here.
pub fn daily_counts(events: &[EditEvent]) -> Vec<DailyCount> {
    let pairs = count_pairs(events);
    let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for ((date, _), count) in &pairs {
        *totals.entry(*date).or_default() += count;
    }

    let mut rows: Vec<DailyCount> = pairs
        .into_iter()
        .map(|((date, author), count)| DailyCount {
            date,
            author: author.to_string(),
            count,
        })
        .collect();
    rows.extend(totals.into_iter().map(|(date, count)| DailyCount {
        date,
        author: ALL_AUTHORS.to_string(),
        count,
    }));
    rows
}

pub fn aggregate(events: &[EditEvent], mode: SeriesMode) -> Option<DenseSeries> {
    aggregate_at(Local::now().date_naive(), events, mode)
}

/// Returns `None` when there are no events, since there is no earliest date to
/// anchor the axis on.
pub fn aggregate_at(today: NaiveDate, events: &[EditEvent], mode: SeriesMode) -> Option<DenseSeries> {
    let earliest = events.iter().map(|event| event.date).min()?;
    let latest = events.iter().map(|event| event.date).max()?;
    // Events stamped after "today" (provider clock in another timezone) still
    // need a slot on the axis.
    let end = today.max(latest);

    let authors = author_set(events);
    let pairs = count_pairs(events);

    let mut points = Vec::with_capacity((end - earliest).num_days() as usize + 1);
    let mut date = earliest;
    while date <= end {
        let by_author: Vec<u64> = match mode {
            SeriesMode::Total => Vec::new(),
            SeriesMode::PerAuthor => authors
                .iter()
                .map(|author| pairs.get(&(date, author.as_str())).copied().unwrap_or(0))
                .collect(),
        };
        let total: u64 = match mode {
            SeriesMode::Total => pairs
                .range((date, "")..)
                .take_while(|((day, _), _)| *day == date)
                .map(|(_, count)| count)
                .sum(),
            SeriesMode::PerAuthor => by_author.iter().sum(),
        };
        points.push(SeriesPoint {
            date,
            total,
            by_author,
        });
        date += Duration::days(1);
    }

    Some(DenseSeries {
        mode,
        authors,
        points,
    })
}

fn count_pairs(events: &[EditEvent]) -> BTreeMap<(NaiveDate, &str), u64> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry((event.date, event.author.as_str())).or_insert(0u64) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Vec<EditEvent> {
        vec![
            EditEvent::new(day(2024, 1, 1), "Alice"),
            EditEvent::new(day(2024, 1, 3), "Bob"),
            EditEvent::new(day(2024, 1, 3), "Alice"),
        ]
    }

    fn assert_contiguous(series: &DenseSeries) {
        for pair in series.points.windows(2) {
            assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
        }
    }

    #[test]
    fn total_mode_fills_gaps_through_today() {
        let series = aggregate_at(day(2024, 1, 4), &sample(), SeriesMode::Total).unwrap();
        let totals: Vec<(NaiveDate, u64)> =
            series.points.iter().map(|p| (p.date, p.total)).collect();

        assert_eq!(
            totals,
            vec![
                (day(2024, 1, 1), 1),
                (day(2024, 1, 2), 0),
                (day(2024, 1, 3), 2),
                (day(2024, 1, 4), 0),
            ]
        );
        assert_eq!(series.authors, vec!["Alice", "Bob"]);
        assert!(series.points.iter().all(|p| p.by_author.is_empty()));
    }

    #[test]
    fn per_author_mode_counts_each_author() {
        let series = aggregate_at(day(2024, 1, 4), &sample(), SeriesMode::PerAuthor).unwrap();
        let by_author: Vec<Vec<u64>> = series.points.iter().map(|p| p.by_author.clone()).collect();

        assert_eq!(by_author, vec![vec![1, 0], vec![0, 0], vec![1, 1], vec![0, 0]]);
        assert_eq!(series.points[2].total, 2);
    }

    #[test]
    fn empty_input_has_no_series() {
        assert!(aggregate_at(day(2024, 1, 4), &[], SeriesMode::Total).is_none());
        assert!(aggregate_at(day(2024, 1, 4), &[], SeriesMode::PerAuthor).is_none());
    }

    #[test]
    fn unordered_input_produces_one_entry_per_day() {
        let events = vec![
            EditEvent::new(day(2024, 2, 27), "Zed"),
            EditEvent::new(day(2024, 2, 10), "Amy"),
            EditEvent::new(day(2024, 3, 1), "Amy"),
            EditEvent::new(day(2024, 2, 10), "Amy"),
        ];
        let today = day(2024, 3, 5);
        let series = aggregate_at(today, &events, SeriesMode::PerAuthor).unwrap();

        assert_eq!(series.start(), Some(day(2024, 2, 10)));
        assert_eq!(series.end(), Some(today));
        // 2024 is a leap year: Feb 10..=Mar 5 is 25 days.
        assert_eq!(series.points.len(), 25);
        assert_contiguous(&series);
    }

    #[test]
    fn counts_are_conserved() {
        let events = vec![
            EditEvent::new(day(2023, 12, 30), "Bob"),
            EditEvent::new(day(2024, 1, 2), "Alice"),
            EditEvent::new(day(2024, 1, 2), "Alice"),
            EditEvent::new(day(2024, 1, 2), "Bob"),
            EditEvent::new(day(2024, 1, 9), "Carol"),
        ];
        let today = day(2024, 1, 10);

        let total = aggregate_at(today, &events, SeriesMode::Total).unwrap();
        assert_eq!(total.total_edits(), events.len() as u64);

        let per_author = aggregate_at(today, &events, SeriesMode::PerAuthor).unwrap();
        for (idx, author) in per_author.authors.iter().enumerate() {
            let expected = events.iter().filter(|e| &e.author == author).count() as u64;
            let actual: u64 = per_author.points.iter().map(|p| p.by_author[idx]).sum();
            assert_eq!(actual, expected, "author {author}");
        }
    }

    #[test]
    fn days_without_events_are_zero() {
        let events = sample();
        let series = aggregate_at(day(2024, 1, 8), &events, SeriesMode::PerAuthor).unwrap();
        for point in &series.points {
            if !events.iter().any(|e| e.date == point.date) {
                assert_eq!(point.total, 0);
                assert!(point.by_author.iter().all(|count| *count == 0));
            }
        }
    }

    #[test]
    fn author_order_is_stable_across_input_order() {
        let mut events = sample();
        events.push(EditEvent::new(day(2024, 1, 2), "Aaron"));
        let first = aggregate_at(day(2024, 1, 4), &events, SeriesMode::PerAuthor).unwrap();
        events.reverse();
        let second = aggregate_at(day(2024, 1, 4), &events, SeriesMode::PerAuthor).unwrap();

        assert_eq!(first.authors, vec!["Aaron", "Alice", "Bob"]);
        assert_eq!(first, second);
        assert_eq!(first.author_index("Bob"), Some(2));
        assert_eq!(first.author_index("Nobody"), None);
    }

    #[test]
    fn future_dated_events_extend_the_axis() {
        let events = vec![
            EditEvent::new(day(2024, 1, 1), "Alice"),
            EditEvent::new(day(2024, 1, 6), "Alice"),
        ];
        let series = aggregate_at(day(2024, 1, 4), &events, SeriesMode::Total).unwrap();
        assert_eq!(series.end(), Some(day(2024, 1, 6)));
        assert_eq!(series.total_edits(), 2);
    }

    #[test]
    fn daily_counts_are_sparse_with_totals() {
        let rows = daily_counts(&sample());
        let alice_third = rows
            .iter()
            .find(|row| row.author == "Alice" && row.date == day(2024, 1, 3))
            .expect("missing row");
        assert_eq!(alice_third.count, 1);

        let totals: Vec<(NaiveDate, u64)> = rows
            .iter()
            .filter(|row| row.author == ALL_AUTHORS)
            .map(|row| (row.date, row.count))
            .collect();
        assert_eq!(totals, vec![(day(2024, 1, 1), 1), (day(2024, 1, 3), 2)]);
        assert!(rows.iter().all(|row| row.date != day(2024, 1, 2)));
    }

    #[test]
    fn entries_flatten_per_author_series() {
        let series = aggregate_at(day(2024, 1, 4), &sample(), SeriesMode::PerAuthor).unwrap();
        let entries = series.entries();
        assert_eq!(entries.len(), 4 * 2);
        assert_eq!(entries[0].author, "Alice");
        assert_eq!(entries[1].author, "Bob");

        let totals = aggregate_at(day(2024, 1, 4), &sample(), SeriesMode::Total)
            .unwrap()
            .entries();
        assert!(totals.iter().all(|row| row.author == ALL_AUTHORS));
        assert_eq!(totals.iter().map(|row| row.count).sum::<u64>(), 3);
    }

    #[test]
    fn series_mode_parses_from_config_text() {
        assert_eq!("total".parse::<SeriesMode>(), Ok(SeriesMode::Total));
        assert_eq!("Per-Author".parse::<SeriesMode>(), Ok(SeriesMode::PerAuthor));
        assert!("weekly".parse::<SeriesMode>().is_err());
    }
}
