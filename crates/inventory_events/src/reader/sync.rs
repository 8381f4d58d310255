use std::io::{self, Read};

const CHUNK_SIZE_BYTES: usize = 8192;

/// One physical line from a [`BoundedLineReader`].
#[derive(Debug)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
        error: io::Error,
    },
}

/// Splits a reader into `\n`-terminated lines without ever buffering more than
/// `max_line_bytes` of a single line. Oversized lines are reported and skipped.
pub struct BoundedLineReader<R: Read> {
    reader: R,
    max_line_bytes: usize,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    buffer_pos: usize,
    buffer_len: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    discarding: bool,
    line_number: usize,
    done: bool,
}

impl<R: Read> BoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            buffer_pos: 0,
            buffer_len: 0,
            current_line: Vec::new(),
            observed_bytes: 0,
            discarding: false,
            line_number: 0,
            done: false,
        }
    }

    fn fill_buffer(&mut self) -> io::Result<usize> {
        self.buffer_pos = 0;
        self.buffer_len = 0;
        loop {
            match self.reader.read(&mut self.buffer[..]) {
                Ok(n) => {
                    self.buffer_len = n;
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn finish_line(&mut self) -> BoundedLine {
        self.line_number += 1;
        let line_number = self.line_number;
        let observed_bytes = std::mem::take(&mut self.observed_bytes);

        if std::mem::take(&mut self.discarding) {
            self.current_line.clear();
            return BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes: self.max_line_bytes,
            };
        }

        BoundedLine::Line {
            line_number,
            bytes: std::mem::take(&mut self.current_line),
        }
    }

    fn append(&mut self, start: usize, end: usize) {
        self.observed_bytes = self.observed_bytes.saturating_add(end - start);
        if self.discarding {
            return;
        }
        if self.observed_bytes > self.max_line_bytes {
            self.discarding = true;
            self.current_line = Vec::new();
            return;
        }
        self.current_line
            .extend_from_slice(&self.buffer[start..end]);
    }
}

impl<R: Read> Iterator for BoundedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                match self.fill_buffer() {
                    Ok(0) => {
                        self.done = true;
                        if self.discarding || !self.current_line.is_empty() {
                            return Some(self.finish_line());
                        }
                        return None;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        self.done = true;
                        self.line_number += 1;
                        return Some(BoundedLine::IoError {
                            line_number: self.line_number,
                            error,
                        });
                    }
                }
            }

            let start = self.buffer_pos;
            let end = self.buffer_len;
            match self.buffer[start..end].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    self.append(start, start + offset);
                    self.buffer_pos = start + offset + 1;
                    return Some(self.finish_line());
                }
                None => {
                    self.append(start, end);
                    self.buffer_pos = end;
                }
            }
        }
    }
}
