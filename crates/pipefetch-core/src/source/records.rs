//! CSV record parsing: header first, identifier in the first field.

use super::SourceError;
use crate::model::Identifier;
use std::collections::VecDeque;
use std::io::{self, Read};

/// Why a record did not yield an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No fields, or the first field is blank.
    Empty,
    /// The record could not be parsed (wrong field count, invalid UTF-8).
    Malformed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Empty => f.write_str("empty record"),
            SkipReason::Malformed(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Identifier(Identifier),
    Skipped { record: u64, reason: SkipReason },
}

/// Streams identifiers out of a CSV source. The header row is consumed by
/// [`IdentifierRecords::new`]; later rows must have the header's field count.
///
/// The CSV reader passes over blank lines without returning them. Each one is
/// still reported as a [`SkipReason::Empty`] record, worked out from how many
/// lines a read consumed. Records end at `\n` only; a `\r` before it is
/// trimmed away with the rest of the identifier's whitespace.
pub struct IdentifierRecords<R: Read> {
    reader: csv::Reader<NewlineTerminated<R>>,
    record: csv::StringRecord,
    fields: usize,
    pending: VecDeque<RecordOutcome>,
    next_index: u64,
    done: bool,
}

impl<R: Read> IdentifierRecords<R> {
    /// Reads and discards the header. Fails if the source has no readable first record.
    pub fn new(inner: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_reader(NewlineTerminated::new(inner));
        let mut header = csv::StringRecord::new();
        match reader.read_record(&mut header) {
            Ok(true) => {}
            Ok(false) => return Err(SourceError::MissingHeader("source is empty".to_string())),
            Err(e) => return Err(SourceError::MissingHeader(e.to_string())),
        }
        Ok(Self {
            reader,
            record: csv::StringRecord::new(),
            fields: header.len(),
            pending: VecDeque::new(),
            next_index: 1,
            done: false,
        })
    }

    /// Next identifier or skipped record; `None` at end of input or after an I/O error.
    pub fn next_record(&mut self) -> Option<RecordOutcome> {
        if let Some(outcome) = self.pending.pop_front() {
            return Some(outcome);
        }
        if self.done {
            return None;
        }
        let line_before = self.reader.position().line();
        let read = self.reader.read_record(&mut self.record);
        let lines = self.reader.position().line().saturating_sub(line_before);
        match read {
            Ok(false) => {
                // Trailing blank lines.
                self.done = true;
                self.queue_blank_lines(lines);
            }
            Ok(true) => {
                let own_lines = 1 + embedded_newlines(&self.record);
                self.queue_blank_lines(lines.saturating_sub(own_lines));
                let index = self.take_index();
                let value = self.record.get(0).map(str::trim).unwrap_or("");
                let reason = if value.is_empty() && self.record.len() <= 1 {
                    Some(SkipReason::Empty)
                } else if self.record.len() != self.fields {
                    Some(SkipReason::Malformed(format!(
                        "expected {} fields, found {}",
                        self.fields,
                        self.record.len()
                    )))
                } else if value.is_empty() {
                    Some(SkipReason::Empty)
                } else {
                    None
                };
                let outcome = match reason {
                    Some(reason) => RecordOutcome::Skipped {
                        record: index,
                        reason,
                    },
                    None => RecordOutcome::Identifier(Identifier::new(value, index)),
                };
                self.pending.push_back(outcome);
            }
            Err(e) if e.is_io_error() => {
                tracing::warn!(record = self.next_index, error = %e, "source read failed; ending stream");
                self.done = true;
            }
            Err(e) => {
                self.queue_blank_lines(lines.saturating_sub(1));
                let index = self.take_index();
                self.pending.push_back(RecordOutcome::Skipped {
                    record: index,
                    reason: SkipReason::Malformed(e.to_string()),
                });
            }
        }
        self.pending.pop_front()
    }

    fn take_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn queue_blank_lines(&mut self, count: u64) {
        for _ in 0..count {
            let record = self.take_index();
            self.pending.push_back(RecordOutcome::Skipped {
                record,
                reason: SkipReason::Empty,
            });
        }
    }
}

/// Appends a final `\n` to input that lacks one, so every record consumes
/// exactly one terminator.
struct NewlineTerminated<R> {
    inner: R,
    last: Option<u8>,
    finished: bool,
}

impl<R> NewlineTerminated<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            last: None,
            finished: false,
        }
    }
}

impl<R: Read> Read for NewlineTerminated<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.last = Some(buf[n - 1]);
            return Ok(n);
        }
        self.finished = true;
        match self.last {
            Some(b) if b != b'\n' => {
                buf[0] = b'\n';
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

/// Line breaks inside quoted fields; they advance the reader's line count too.
fn embedded_newlines(record: &csv::StringRecord) -> u64 {
    record
        .iter()
        .map(|field| field.matches('\n').count() as u64)
        .sum()
}

impl<R: Read> Iterator for IdentifierRecords<R> {
    type Item = RecordOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn outcomes(text: &str) -> Vec<RecordOutcome> {
        IdentifierRecords::new(Cursor::new(text.as_bytes().to_vec()))
            .unwrap()
            .collect()
    }

    fn ids(text: &str) -> Vec<String> {
        outcomes(text)
            .into_iter()
            .filter_map(|o| match o {
                RecordOutcome::Identifier(id) => Some(id.as_str().to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn header_is_discarded() {
        assert_eq!(
            ids("url\nhttp://example.com\nhttps://test.com"),
            vec!["http://example.com", "https://test.com"]
        );
    }

    #[test]
    fn empty_source_is_missing_header() {
        let err = IdentifierRecords::new(Cursor::new(Vec::new())).err().unwrap();
        assert!(matches!(err, SourceError::MissingHeader(_)));
    }

    #[test]
    fn header_only_yields_nothing() {
        assert!(outcomes("url\n").is_empty());
    }

    #[test]
    fn blank_first_field_is_skipped_as_empty() {
        let text = "url\nhttp://a\n\"\"\n  \nhttp://b\n";
        let skipped = outcomes(text)
            .into_iter()
            .filter(|o| matches!(o, RecordOutcome::Skipped { reason: SkipReason::Empty, .. }))
            .count();
        assert_eq!(skipped, 2);
        assert_eq!(ids(text), vec!["http://a", "http://b"]);
    }

    #[test]
    fn blank_lines_are_reported_as_empty_records() {
        let empty = |record| RecordOutcome::Skipped {
            record,
            reason: SkipReason::Empty,
        };
        assert_eq!(
            outcomes("url\nhttp://a\n\n\nhttp://b\n\n"),
            vec![
                RecordOutcome::Identifier(Identifier::new("http://a", 1)),
                empty(2),
                empty(3),
                RecordOutcome::Identifier(Identifier::new("http://b", 4)),
                empty(5),
            ]
        );
    }

    #[test]
    fn quoted_line_breaks_are_not_blank_lines() {
        let out = outcomes("url,note\nhttp://a,\"two\nlines\"\nhttp://b,x\n");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| matches!(o, RecordOutcome::Identifier(_))));
    }

    #[test]
    fn blank_line_before_unterminated_last_record() {
        let out = outcomes("url\nhttp://a\n\nhttp://b");
        assert_eq!(
            out,
            vec![
                RecordOutcome::Identifier(Identifier::new("http://a", 1)),
                RecordOutcome::Skipped {
                    record: 2,
                    reason: SkipReason::Empty
                },
                RecordOutcome::Identifier(Identifier::new("http://b", 3)),
            ]
        );
    }

    #[test]
    fn crlf_blank_line_in_multi_column_source_is_empty() {
        let out = outcomes("url,label\r\nhttp://a,A\r\n\r\nhttp://b,B\r\n");
        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[1],
            RecordOutcome::Skipped {
                record: 2,
                reason: SkipReason::Empty
            }
        ));
    }

    #[test]
    fn crlf_line_endings_count_blank_lines_once() {
        let out = outcomes("url\r\nhttp://a\r\n\r\nhttp://b\r\n");
        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[1],
            RecordOutcome::Skipped {
                record: 2,
                reason: SkipReason::Empty
            }
        ));
    }

    #[test]
    fn wrong_field_count_is_malformed_and_stream_continues() {
        let out = outcomes("url,label\nhttp://a,A\nhttp://b\nhttp://c,C\n");
        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[1],
            RecordOutcome::Skipped {
                record: 2,
                reason: SkipReason::Malformed(_)
            }
        ));
        assert_eq!(ids("url,label\nhttp://a,A\nhttp://b\nhttp://c,C\n"), vec!["http://a", "http://c"]);
    }

    #[test]
    fn identifiers_are_trimmed_and_numbered() {
        let out = outcomes("url\n  http://a  \nhttp://b\n");
        match &out[0] {
            RecordOutcome::Identifier(id) => {
                assert_eq!(id.as_str(), "http://a");
                assert_eq!(id.record(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &out[1] {
            RecordOutcome::Identifier(id) => assert_eq!(id.record(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
