//! Payload byte origins for a stream slot.
//!
//! The set of origins is closed (file handle or shared memory buffer), so it
//! is a tagged variant dispatched once per refill rather than a callback
//! indirection. The source owns the payload cursor; the cursor always lies in
//! `[data_offset, data_offset + data_length]` and is the only mutable state
//! here — the bounds are fixed at creation.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::wav::ContainerInfo;

enum Origin {
    File(File),
    Memory(Arc<[u8]>),
}

pub struct BackingSource {
    origin: Origin,
    pos: u64,
    start: u64,
    end: u64,
}

impl BackingSource {
    /// Wrap an open file, positioning its cursor at the payload start.
    pub fn from_file(mut file: File, info: &ContainerInfo) -> io::Result<Self> {
        file.seek(SeekFrom::Start(info.data_offset))?;
        Ok(Self {
            origin: Origin::File(file),
            pos: info.data_offset,
            start: info.data_offset,
            end: info.data_offset + info.data_length,
        })
    }

    /// Wrap a shared immutable buffer. A declared payload length running past
    /// the buffer end is clamped so reads can never leave the buffer.
    pub fn from_buffer(buf: Arc<[u8]>, info: &ContainerInfo) -> Self {
        let end = (info.data_offset + info.data_length).min(buf.len() as u64);
        Self {
            origin: Origin::Memory(buf),
            pos: info.data_offset.min(end),
            start: info.data_offset.min(end),
            end,
        }
    }

    /// Payload bytes left before the declared end.
    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    /// Rewind the cursor to the payload start (never to absolute zero).
    pub fn rewind(&mut self) -> io::Result<()> {
        if let Origin::File(file) = &mut self.origin {
            file.seek(SeekFrom::Start(self.start))?;
        }
        self.pos = self.start;
        Ok(())
    }

    /// Fill `dst` completely from the cursor, advancing it. Fails without a
    /// partial advance guarantee on I/O error; callers treat any failure as
    /// end-of-stream.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        if (dst.len() as u64) > self.remaining() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        match &mut self.origin {
            Origin::File(file) => file.read_exact(dst)?,
            Origin::Memory(buf) => {
                let at = self.pos as usize;
                dst.copy_from_slice(&buf[at..at + dst.len()]);
            }
        }
        self.pos += dst.len() as u64;
        Ok(())
    }
}
