//! Newline-delimited framing for the stream transport.
//!
//! The framer is pure: bytes go in, complete frames come out. It never
//! buffers more than the configured limit. A line that outgrows the limit is
//! reported once as [`Frame::Oversized`] and the rest of it is discarded up
//! to the next newline.

/// One unit produced by [`LineFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete non-blank line, without its terminator.
    Line(Vec<u8>),
    /// A line exceeded the size limit and was dropped.
    Oversized,
}

#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        while !chunk.is_empty() {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let (line, rest) = chunk.split_at(pos);
                    chunk = &rest[1..];

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if self.buffer.len() + line.len() > self.max_line {
                        self.buffer.clear();
                        frames.push(Frame::Oversized);
                        continue;
                    }
                    self.buffer.extend_from_slice(line);
                    if let Some(frame) = self.take_line() {
                        frames.push(frame);
                    }
                }
                None => {
                    if !self.discarding {
                        if self.buffer.len() + chunk.len() > self.max_line {
                            self.buffer.clear();
                            self.discarding = true;
                            frames.push(Frame::Oversized);
                        } else {
                            self.buffer.extend_from_slice(chunk);
                        }
                    }
                    chunk = &[];
                }
            }
        }

        frames
    }

    /// Flush a final unterminated line at end of input.
    pub fn finish(&mut self) -> Option<Frame> {
        self.discarding = false;
        self.take_line()
    }

    fn take_line(&mut self) -> Option<Frame> {
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(Frame::Line(line))
        }
    }
}
