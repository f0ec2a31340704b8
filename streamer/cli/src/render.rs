//! Plain-text rendering of session snapshots
//!
//! Snapshots always carry the whole visible log. The renderer remembers how
//! much of it has already been written and only emits the difference: new
//! messages get a role prefix on a fresh line, and growth of the last message
//! is appended in place, so a streamed reply appears fragment by fragment.

use std::io::{self, Write};

use streamer_core::SessionSnapshot;

/// Writes the new parts of successive snapshots
#[derive(Debug, Default)]
pub struct PlainRenderer {
    /// Bytes of content already written, per visible message
    written: Vec<usize>,
    /// A message line is open (no trailing newline yet)
    line_open: bool,
}

impl PlainRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write whatever `snapshot` adds to what was already rendered
    pub fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> io::Result<()> {
        for (idx, message) in snapshot.messages.iter().enumerate() {
            match self.written.get(idx).copied() {
                Some(done) => {
                    // Only the newest message can still be growing
                    let is_last = idx + 1 == self.written.len();
                    if is_last && message.content.len() > done {
                        if let Some(rest) = message.content.get(done..) {
                            out.write_all(rest.as_bytes())?;
                            self.written[idx] = message.content.len();
                        }
                    }
                }
                None => {
                    if self.line_open {
                        writeln!(out)?;
                    }
                    write!(out, "{}> {}", message.role.label(), message.content)?;
                    self.written.push(message.content.len());
                    self.line_open = true;
                }
            }
        }
        out.flush()
    }

    /// Terminate the open line, if any
    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.line_open {
            writeln!(out)?;
            self.line_open = false;
        }
        out.flush()
    }
}
