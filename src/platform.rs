//! Storage façade.
//!
//! The engine is generic over anything that can read, write, seek and
//! truncate.  `std::fs::File` is the production backend; `Cursor<Vec<u8>>`
//! lets tests run fully in memory.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};

/// The descriptor operations the container engine needs.
pub trait Storage: Read + Write + Seek {
    /// Truncate the backing store to exactly `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Storage for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}
