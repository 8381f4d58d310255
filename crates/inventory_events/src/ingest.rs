use std::io::Read;

use serde_json::Value;
use thiserror::Error;

use crate::config::IngestLimits;
use crate::error::{LineRecord, LineRecordError};
use crate::reader::{BoundedLine, BoundedLineReader};
use crate::RawRecord;

/// Reads JSONL inventory output one record per line.
///
/// Blank lines are skipped. A line that is not a JSON object yields an error record for that
/// line and iteration continues; an I/O error yields one final error record.
pub struct RecordReader<R: Read> {
    lines: BoundedLineReader<R>,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R, limits: IngestLimits) -> Self {
        Self {
            lines: BoundedLineReader::new(reader, limits.max_line_bytes),
        }
    }

    fn error(line_number: usize, err: LineRecordError) -> LineRecord<RawRecord> {
        LineRecord {
            line_number,
            outcome: Err(err),
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = LineRecord<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                BoundedLine::IoError { line_number, error } => {
                    return Some(Self::error(
                        line_number,
                        LineRecordError::Io {
                            message: error.to_string(),
                        },
                    ));
                }
                BoundedLine::LineTooLong {
                    line_number,
                    observed_bytes,
                    max_line_bytes,
                } => {
                    return Some(Self::error(
                        line_number,
                        LineRecordError::LineTooLong {
                            observed_bytes,
                            max_line_bytes,
                        },
                    ));
                }
                BoundedLine::Line { line_number, bytes } => {
                    let Ok(raw_line) = String::from_utf8(bytes) else {
                        return Some(Self::error(line_number, LineRecordError::InvalidUtf8));
                    };
                    let line = raw_line.strip_suffix('\r').unwrap_or(&raw_line);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(LineRecord {
                        line_number,
                        outcome: parse_line(line),
                    });
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Result<RawRecord, LineRecordError> {
    // serde_json messages carry positions only, never the offending text.
    let value: Value = serde_json::from_str(line).map_err(|err| LineRecordError::JsonParse {
        summary: err.to_string(),
    })?;
    RawRecord::from_value(value)
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses a complete source output buffer.
///
/// Accepts a JSON array of objects (the usual `--format=json` list output), or a stream of
/// objects, compact one per line (JSONL) or pretty-printed back to back. For array documents
/// `line_number` is the 1-based element position; otherwise it is the line a record starts on.
///
/// Truncated output is a [`DocumentError`]. A syntax error in line-shaped output only costs
/// that line; in pretty-printed output it is a [`DocumentError`].
pub fn parse_document(
    bytes: &[u8],
    limits: IngestLimits,
) -> Result<Vec<LineRecord<RawRecord>>, DocumentError> {
    let Some(first) = bytes.iter().find(|b| !b.is_ascii_whitespace()) else {
        return Ok(Vec::new());
    };

    match first {
        b'[' => {
            let values: Vec<Value> = serde_json::from_slice(bytes)?;
            Ok(values
                .into_iter()
                .enumerate()
                .map(|(idx, value)| LineRecord {
                    line_number: idx + 1,
                    outcome: RawRecord::from_value(value),
                })
                .collect())
        }
        b'{' => parse_value_stream(bytes, limits),
        _ => Ok(RecordReader::new(bytes, limits).collect()),
    }
}

fn parse_value_stream(
    bytes: &[u8],
    limits: IngestLimits,
) -> Result<Vec<LineRecord<RawRecord>>, DocumentError> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    let mut records = Vec::new();
    let mut consumed = 0;
    let mut line_number = 1;
    let mut single_line_values = true;

    loop {
        let next = stream.next();
        let rest = &bytes[consumed..];
        let leading = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let start_line = line_number + count_newlines(&rest[..leading]);

        match next {
            None => return Ok(records),
            Some(Ok(value)) => {
                let end = stream.byte_offset();
                let body_newlines = count_newlines(&bytes[consumed + leading..end]);
                single_line_values &= body_newlines == 0;
                records.push(LineRecord {
                    line_number: start_line,
                    outcome: RawRecord::from_value(value),
                });
                line_number = start_line + body_newlines;
                consumed = end;
            }
            Some(Err(err)) => {
                let line_shaped = single_line_values
                    && (!records.is_empty() || err.line() == start_line);
                if err.is_eof() || !line_shaped {
                    return Err(err.into());
                }
                return Ok(RecordReader::new(bytes, limits).collect());
            }
        }
    }
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| **b == b'\n').count()
}
