//! Binary encode/decode primitives and a small random-access file wrapper,
//! grounded on the teacher's `io.rs` (`SmallFile`, `Encodeable`/`Decodeable`,
//! `SmallWriter`). This is the substrate the on-disk heap header, chain
//! record, and user-record wire format  are built on.

use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Cursor, Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::error::StoreError;
use crate::types::StoreResult;

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: Read>(reader: &mut R) -> Self;
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|_| panic!("io error, expected {} bytes", bytes_count));
    buffer
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, isize, usize);

impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        u8::decode_from(reader) == 1
    }
}

/// # Format
/// - 4 bytes: length
/// - n bytes: payload
impl Encodeable for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(4 + self.len());
        buffer.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buffer.extend_from_slice(self);
        buffer
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let len = u32::decode_from(reader) as usize;
        read_exact(reader, len)
    }
}

/// # Format
/// - 2 bytes: length
/// - n bytes: utf8 payload
impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(2 + self.len());
        buffer.extend_from_slice(&(self.len() as u16).to_le_bytes());
        buffer.extend_from_slice(self.as_bytes());
        buffer
    }
}

impl Decodeable for String {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let len = u16::decode_from(reader) as usize;
        let bytes = read_exact(reader, len);
        String::from_utf8(bytes).expect("classname bytes were not utf8")
    }
}

pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(&obj.encode());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();
        assert!(
            buf.len() <= size,
            "buffer size larger than requested: {} > {}",
            buf.len(),
            size
        );
        buf.resize(size, 0);
        buf
    }
}

impl Default for SmallWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn decode<T: Decodeable>(bytes: &[u8]) -> T {
    let mut cursor = Cursor::new(bytes);
    T::decode_from(&mut cursor)
}

/// Fixed-size random-access page file, one per heap/overflow/index file id,
/// grounded on the teacher's `io::SmallFile`.
pub struct SmallFile {
    file: File,
    page_size: usize,
}

impl SmallFile {
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| StoreError::recovery(format!("open file failed: {}", e)))?;
        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> StoreResult<usize> {
        let len = self
            .file
            .metadata()
            .map_err(|e| StoreError::recovery(format!("stat failed: {}", e)))?
            .len();
        Ok((len as usize) / self.page_size)
    }

    pub fn read_page(&mut self, index: usize) -> StoreResult<Vec<u8>> {
        let offset = (index * self.page_size) as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::recovery(format!("seek failed: {}", e)))?;
        let mut buf = vec![0u8; self.page_size];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| StoreError::recovery(format!("read failed: {}", e)))?;
        Ok(buf)
    }

    pub fn write_page(&mut self, index: usize, bytes: &[u8]) -> StoreResult<()> {
        assert_eq!(bytes.len(), self.page_size, "page write must be exactly page-sized");
        let offset = (index * self.page_size) as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::recovery(format!("seek failed: {}", e)))?;
        self.file
            .write_all(bytes)
            .map_err(|e| StoreError::recovery(format!("write failed: {}", e)))?;
        Ok(())
    }

    pub fn append_page(&mut self, bytes: &[u8]) -> StoreResult<usize> {
        let index = self.num_pages()?;
        self.write_page(index, bytes)?;
        Ok(index)
    }

    pub fn truncate_to(&mut self, num_pages: usize) -> StoreResult<()> {
        self.file
            .set_len((num_pages * self.page_size) as u64)
            .map_err(|e| StoreError::recovery(format!("set_len failed: {}", e)))
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.file
            .flush()
            .map_err(|e| StoreError::recovery(format!("flush failed: {}", e)))
    }
}
