//! Recorded MQTT flows: one `<time> <topic> <payload>` row per line.

use crate::errors::{FlowError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use std::time::Duration;

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub time: DateTime<Utc>,
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct Flow {
    pub records: Vec<FlowRecord>,
}

impl Flow {
    pub fn read(path: impl AsRef<Path>, delimiter: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FlowError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, delimiter)
    }

    /// Rows with fewer than three columns are skipped. The payload column
    /// keeps any further delimiters.
    pub fn parse(text: &str, delimiter: &str) -> Result<Self> {
        if delimiter.is_empty() {
            return Err(FlowError::EmptyDelimiter);
        }

        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let mut cols = line.trim().splitn(3, delimiter);
            let (Some(time), Some(topic), Some(payload)) = (cols.next(), cols.next(), cols.next())
            else {
                continue;
            };

            records.push(FlowRecord {
                time: parse_time(time).ok_or_else(|| FlowError::Time {
                    line: index + 1,
                    value: time.to_string(),
                })?,
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Offset of every record from the first one. Records older than the
    /// first get a zero offset.
    pub fn offsets(&self) -> impl Iterator<Item = (Duration, &FlowRecord)> {
        let first = self.records.first().map(|r| r.time);
        self.records.iter().map(move |record| {
            let offset = first
                .and_then(|first| (record.time - first).to_std().ok())
                .unwrap_or_default();
            (offset, record)
        })
    }
}

/// RFC 3339, or a naive timestamp read as UTC.
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, NAIVE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOW: &str = "\
2024-03-01T10:00:00 home/temp 21.5
2024-03-01T10:00:01.250 home/light {\"state\": \"on\", \"level\": 3}
not-enough-columns
2024-03-01T10:00:05+00:00 home/temp 22
";

    #[test]
    fn test_parse_skips_short_lines() {
        let flow = Flow::parse(FLOW, " ").unwrap();

        assert_eq!(flow.len(), 3);
        assert_eq!(flow.records[0].topic, "home/temp");
        assert_eq!(flow.records[0].payload, "21.5");
        assert_eq!(flow.records[1].payload, "{\"state\": \"on\", \"level\": 3}");
    }

    #[test]
    fn test_offsets_relative_to_first_row() {
        let flow = Flow::parse(FLOW, " ").unwrap();
        let offsets: Vec<Duration> = flow.offsets().map(|(offset, _)| offset).collect();

        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(1250),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn test_earlier_rows_do_not_go_negative() {
        let flow = Flow::parse(
            "2024-03-01T10:00:05 a 1\n2024-03-01T10:00:00 b 2\n",
            " ",
        )
        .unwrap();
        let offsets: Vec<Duration> = flow.offsets().map(|(offset, _)| offset).collect();
        assert_eq!(offsets, vec![Duration::ZERO, Duration::ZERO]);
    }

    #[test]
    fn test_custom_delimiter() {
        let flow = Flow::parse("2024-03-01T10:00:00;a/b;x;y\n", ";").unwrap();
        assert_eq!(flow.records[0].topic, "a/b");
        assert_eq!(flow.records[0].payload, "x;y");
    }

    #[test]
    fn test_bad_time_names_line() {
        let err = Flow::parse("2024-03-01T10:00:00 a 1\nlater b 2\n", " ").unwrap_err();
        assert!(matches!(err, FlowError::Time { line: 2, .. }));
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert!(matches!(Flow::parse("", ""), Err(FlowError::EmptyDelimiter)));
    }

    #[test]
    fn test_empty_flow() {
        let flow = Flow::parse("\n\n", " ").unwrap();
        assert_eq!(flow.len(), 0);
        assert_eq!(flow.offsets().count(), 0);
    }
}
