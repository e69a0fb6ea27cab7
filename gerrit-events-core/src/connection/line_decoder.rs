//! Line buffering for the stream-events channel
//!
//! Turns an arbitrarily chunked byte stream into trimmed text lines. Data is
//! read into a fixed-size buffer; complete lines are cut out of it and the
//! unterminated tail is compacted to the front so the next read appends
//! after it. A line that fills the whole buffer without a separator is moved
//! to a list of carry-over fragments and joined back together once its
//! terminator arrives, so lines may be longer than the buffer.

use crate::config::DEFAULT_RECEIVE_BUFFER_SIZE;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};

const LINE_SEPARATOR: u8 = b'\n';

/// Bounded line decoder
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Box<[u8]>,
    /// Bytes of `buffer` holding data; always below `buffer.len()` between calls
    filled: usize,
    /// Prefix of the filled region already known to contain no separator
    scanned: usize,
    fragments: Vec<Vec<u8>>,
    lines: VecDeque<String>,
}

impl LineDecoder {
    /// Create a decoder with the default receive buffer size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECEIVE_BUFFER_SIZE)
    }

    /// Create a decoder with a buffer of `capacity` bytes (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity.max(1)].into_boxed_slice(),
            filled: 0,
            scanned: 0,
            fragments: Vec::new(),
            lines: VecDeque::new(),
        }
    }

    /// Size of the working buffer
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk of stream data
    ///
    /// Chunks larger than the free buffer space are consumed in several
    /// fills, exactly as if they had arrived in several reads.
    pub fn feed(&mut self, mut chunk: &[u8]) {
        while !chunk.is_empty() {
            let room = self.buffer.len() - self.filled;
            let take = room.min(chunk.len());
            self.buffer[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
            self.filled += take;
            chunk = &chunk[take..];
            self.commit();
        }
    }

    /// Read once from `reader` straight into the free part of the buffer
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let n = reader.read(&mut self.buffer[self.filled..]).await?;
        self.filled += n;
        self.commit();
        Ok(n)
    }

    /// Take every complete line decoded so far, oldest first
    pub fn drain(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// Whether an unterminated line is being held back
    pub fn has_partial_line(&self) -> bool {
        self.filled > 0 || !self.fragments.is_empty()
    }

    fn commit(&mut self) {
        let mut start = 0;
        let mut from = self.scanned;

        while let Some(offset) = self.buffer[from..self.filled]
            .iter()
            .position(|&b| b == LINE_SEPARATOR)
        {
            let end = from + offset;
            let line = self.assemble(start, end);
            self.lines.push_back(line);
            start = end + 1;
            from = start;
        }

        if start > 0 {
            self.buffer.copy_within(start..self.filled, 0);
            self.filled -= start;
        }
        self.scanned = self.filled;

        if self.filled == self.buffer.len() {
            self.fragments.push(self.buffer.to_vec());
            self.filled = 0;
            self.scanned = 0;
        }
    }

    fn assemble(&mut self, start: usize, end: usize) -> String {
        let tail = &self.buffer[start..end];
        if self.fragments.is_empty() {
            return String::from_utf8_lossy(tail).trim().to_string();
        }

        let mut joined: Vec<u8> = self.fragments.drain(..).flatten().collect();
        joined.extend_from_slice(tail);
        String::from_utf8_lossy(&joined).trim().to_string()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
