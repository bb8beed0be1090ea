//! Read-only inspection of `.fts` level containers.
//!
//! Only the uncompressed prefix is decoded: a 280-byte primary header, then
//! `count` secondary headers of 768 bytes each. Everything after them is the
//! compressed scene payload, which is measured but not unpacked.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{RtError, RtResult};

pub const PATH_FIELD_LEN: usize = 256;
pub const PRIMARY_HEADER_LEN: usize = PATH_FIELD_LEN + 4 * 6;
pub const SECONDARY_HEADER_LEN: usize = PATH_FIELD_LEN + 512;
pub const MAX_SECONDARY_HEADERS: i32 = 64;

/// An uncompressed-size change beyond this many bytes usually means the
/// exporter dropped or duplicated scene data.
pub const LARGE_SIZE_DELTA: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelHeader {
    pub path: String,
    pub count: i32,
    pub version: f32,
    pub uncompressed_size: i32,
    pub secondary_paths: Vec<String>,
    /// Offset of the compressed payload.
    pub payload_offset: usize,
    pub payload_len: usize,
    pub file_len: usize,
}

impl LevelHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = ByteReader::new(bytes);
        let path = latin1_cstr(reader.take(PATH_FIELD_LEN)?);
        let count = reader.i32()?;
        let version = reader.f32()?;
        let uncompressed_size = reader.i32()?;
        reader.take(4 * 3)?;

        if !(0..=MAX_SECONDARY_HEADERS).contains(&count) {
            return Err(format!("secondary header count {count} out of range"));
        }
        if uncompressed_size < 0 {
            return Err(format!("negative uncompressed size {uncompressed_size}"));
        }

        let mut secondary_paths = Vec::with_capacity(count as usize);
        for index in 0..count {
            let header = reader
                .take(SECONDARY_HEADER_LEN)
                .map_err(|e| format!("secondary header {index}: {e}"))?;
            secondary_paths.push(latin1_cstr(&header[..PATH_FIELD_LEN]));
        }

        let payload_offset = reader.position();
        Ok(Self {
            path,
            count,
            version,
            uncompressed_size,
            secondary_paths,
            payload_offset,
            payload_len: bytes.len() - payload_offset,
            file_len: bytes.len(),
        })
    }

    pub fn read(path: &Path) -> RtResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes).map_err(|reason| RtError::InvalidLevelFile {
            path: path.to_path_buf(),
            reason,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelComparison {
    pub reference: PathBuf,
    pub candidate: PathBuf,
    pub reference_header: LevelHeader,
    pub candidate_header: LevelHeader,
    pub file_size_delta: i64,
    pub uncompressed_size_delta: i64,
    pub large_size_delta: bool,
    pub identical_bytes: bool,
}

impl LevelComparison {
    /// One-line summary for the run log.
    #[must_use]
    pub fn summary(&self) -> String {
        let verdict = if self.identical_bytes {
            "byte-identical to fixture"
        } else if self.large_size_delta {
            "LARGE size difference, possible data loss"
        } else {
            "differs from fixture"
        };
        format!(
            "{verdict}: file {:+} bytes, uncompressed {:+} bytes ({} -> {}), version {} -> {}",
            self.file_size_delta,
            self.uncompressed_size_delta,
            self.reference_header.uncompressed_size,
            self.candidate_header.uncompressed_size,
            self.reference_header.version,
            self.candidate_header.version,
        )
    }
}

/// Compare a freshly exported level against its reference.
pub fn compare(reference: &Path, candidate: &Path) -> RtResult<LevelComparison> {
    let reference_bytes = std::fs::read(reference)?;
    let candidate_bytes = std::fs::read(candidate)?;
    let invalid = |path: &Path| {
        let path = path.to_path_buf();
        move |reason: String| RtError::InvalidLevelFile { path, reason }
    };
    let reference_header = LevelHeader::parse(&reference_bytes).map_err(invalid(reference))?;
    let candidate_header = LevelHeader::parse(&candidate_bytes).map_err(invalid(candidate))?;

    let uncompressed_size_delta =
        i64::from(candidate_header.uncompressed_size) - i64::from(reference_header.uncompressed_size);
    Ok(LevelComparison {
        reference: reference.to_path_buf(),
        candidate: candidate.to_path_buf(),
        file_size_delta: candidate_bytes.len() as i64 - reference_bytes.len() as i64,
        uncompressed_size_delta,
        large_size_delta: uncompressed_size_delta.abs() > LARGE_SIZE_DELTA,
        identical_bytes: reference_bytes == candidate_bytes,
        reference_header,
        candidate_header,
    })
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(format!(
                "truncated at offset {}: need {len} bytes, {} left",
                self.pos,
                self.bytes.len() - self.pos
            )),
        }
    }

    fn array4(&mut self) -> Result<[u8; 4], String> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, String> {
        self.array4().map(i32::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32, String> {
        self.array4().map(f32::from_le_bytes)
    }
}

fn latin1_cstr(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}
