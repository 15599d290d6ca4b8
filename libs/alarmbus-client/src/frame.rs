// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Exact-boundary framing over the subscriber stream.

use std::io::{self, Read};

use crate::record::FIXED_SIZE;

/// Outcome of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// A whole frame is buffered; fetch it with [`FrameReader::take_frame`].
    Complete,
    /// Some bytes arrived but the frame is not finished yet.
    Partial,
    /// The peer closed the stream.
    Closed,
}

/// Accumulates stream bytes into fixed-size frames.
///
/// Reads never ask for more than the remainder of the current frame, so a
/// short read only delays the frame and the next one still starts on its
/// own boundary.
pub(crate) struct FrameReader<R> {
    inner: R,
    buf: Box<[u8]>,
    filled: usize,
}

impl<R: Read> FrameReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; FIXED_SIZE].into_boxed_slice(),
            filled: 0,
        }
    }

    pub(crate) fn read_some(&mut self) -> io::Result<ReadStatus> {
        let n = self.inner.read(&mut self.buf[self.filled..])?;
        if n == 0 {
            return Ok(ReadStatus::Closed);
        }
        self.filled += n;
        if self.filled == FIXED_SIZE {
            Ok(ReadStatus::Complete)
        } else {
            Ok(ReadStatus::Partial)
        }
    }

    /// Hand out the completed frame and start the next one.
    pub(crate) fn take_frame(&mut self) -> &[u8] {
        self.filled = 0;
        &self.buf
    }

    /// Bytes of an unfinished frame.
    pub(crate) fn pending(&self) -> usize {
        self.filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields the queued chunks one `read` call at a time.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(out.len());
            out[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; FIXED_SIZE]
    }

    #[test]
    fn test_reassembles_split_frame() {
        let data = frame(7);
        let chunks = VecDeque::from(vec![
            data[..10].to_vec(),
            data[10..5000].to_vec(),
            data[5000..].to_vec(),
        ]);
        let mut reader = FrameReader::new(ChunkedReader { chunks });

        assert_eq!(reader.read_some().unwrap(), ReadStatus::Partial);
        assert_eq!(reader.pending(), 10);
        assert_eq!(reader.read_some().unwrap(), ReadStatus::Partial);
        assert_eq!(reader.read_some().unwrap(), ReadStatus::Complete);
        assert_eq!(reader.take_frame(), &data[..]);
        assert_eq!(reader.pending(), 0);
        assert_eq!(reader.read_some().unwrap(), ReadStatus::Closed);
    }

    #[test]
    fn test_keeps_alignment_across_coalesced_frames() {
        // Second frame's head arrives glued to the first frame's tail.
        let mut stream = frame(1);
        stream.extend(frame(2));
        let chunks = VecDeque::from(vec![
            stream[..100].to_vec(),
            stream[100..FIXED_SIZE + 50].to_vec(),
            stream[FIXED_SIZE + 50..].to_vec(),
        ]);
        let mut reader = FrameReader::new(ChunkedReader { chunks });

        let mut frames = Vec::new();
        loop {
            match reader.read_some().unwrap() {
                ReadStatus::Complete => frames.push(reader.take_frame().to_vec()),
                ReadStatus::Partial => continue,
                ReadStatus::Closed => break,
            }
        }
        assert_eq!(frames, vec![frame(1), frame(2)]);
    }
}
