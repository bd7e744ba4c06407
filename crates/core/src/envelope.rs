use crate::error::{CoreError, Result};
use std::convert::TryInto;

/// Constant identifying a cache entry file. Represented in the wire
/// format as four bytes; §3/§6 of the original description express this
/// as a `u16` magic plus a second `u16` forming the ASCII text `cCaC` —
/// here it is simply the four literal bytes, which is bit-for-bit
/// identical on the wire either way.
const MAGIC: [u8; 4] = *b"cCaC";

pub const CURRENT_FORMAT_VERSION: u8 = 1;

/// 16-byte XXH3-128 epilogue appended after the (possibly compressed)
/// payload; covers the serialized header and the stored payload bytes.
const CHECKSUM_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EntryType {
    Result = 0,
    Manifest = 1,
}

impl EntryType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EntryType::Result),
            1 => Ok(EntryType::Manifest),
            _ => Err(CoreError::Corrupt("unknown entry_type")),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Zstd = 1,
}

impl CompressionType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            _ => Err(CoreError::Corrupt("unknown compression_type")),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CacheEntryHeader {
    pub format_version: u8,
    pub entry_type: EntryType,
    pub compression_type: CompressionType,
    pub compression_level: i8,
    pub self_contained: bool,
    pub creation_time: u64,
    pub ccache_version: String,
    pub namespace: String,
    /// Total on-disk size including the epilogue. Derived at serialize
    /// time; callers should not need to set it by hand.
    pub entry_size: u64,
}

impl CacheEntryHeader {
    pub fn new(entry_type: EntryType, ccache_version: impl Into<String>) -> Self {
        CacheEntryHeader {
            format_version: CURRENT_FORMAT_VERSION,
            entry_type,
            compression_type: CompressionType::None,
            compression_level: 0,
            self_contained: true,
            creation_time: 0,
            ccache_version: ccache_version.into(),
            namespace: String::new(),
            entry_size: 0,
        }
    }

    fn serialize_fixed(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.push(self.format_version);
        out.push(self.entry_type as u8);
        out.push(self.compression_type as u8);
        out.push(self.compression_level as u8);
        out.push(self.self_contained as u8);
        out.extend_from_slice(&self.creation_time.to_le_bytes());
        let version_bytes = self.ccache_version.as_bytes();
        out.push(version_bytes.len() as u8);
        out.extend_from_slice(version_bytes);
        let ns_bytes = self.namespace.as_bytes();
        out.push(ns_bytes.len() as u8);
        out.extend_from_slice(ns_bytes);
        out
    }
}

/// Clamps a requested zstd compression level to the range the linked
/// library actually supports.
pub fn clamp_compression_level(requested: i32) -> i32 {
    let max = zstd::compression_level_max();
    if requested > max {
        log::debug!(
            "requested compression level {requested} exceeds zstd max {max}, clamping"
        );
        max
    } else if requested < 1 {
        1
    } else {
        requested
    }
}

/// Writes header + (optionally compressed) payload + checksum epilogue.
pub fn serialize(mut header: CacheEntryHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let stored_payload = match header.compression_type {
        CompressionType::None => payload.to_vec(),
        CompressionType::Zstd => {
            let level = clamp_compression_level(header.compression_level as i32);
            header.compression_level = level as i8;
            zstd::bulk::compress(payload, level)
                .map_err(|e| CoreError::io(std::path::PathBuf::from("<zstd compress>"), e))?
        }
    };

    let header_bytes = header.serialize_fixed();
    header.entry_size = (header_bytes.len() + stored_payload.len() + CHECKSUM_SIZE) as u64;
    // entry_size changed, so the fixed header must be re-rendered before
    // the checksum is computed over the final bytes.
    let header_bytes = {
        let mut h = header.serialize_fixed();
        h.extend_from_slice(&header.entry_size.to_le_bytes());
        h
    };

    let mut out = Vec::with_capacity(header_bytes.len() + stored_payload.len() + CHECKSUM_SIZE);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&stored_payload);

    let checksum = xxhash_rust::xxh3::xxh3_128(&out);
    out.extend_from_slice(&checksum.to_le_bytes());

    Ok(out)
}

/// Parses and verifies an envelope, returning the header and the
/// decompressed payload. Fails with `CoreError::Corrupt` if the magic,
/// format version, or checksum do not match.
pub fn deserialize(bytes: &[u8]) -> Result<(CacheEntryHeader, Vec<u8>)> {
    if bytes.len() < MAGIC.len() + 1 {
        return Err(CoreError::Corrupt("entry too short"));
    }
    if &bytes[0..4] != &MAGIC {
        return Err(CoreError::Corrupt("bad magic"));
    }
    let mut pos = 4;
    let format_version = bytes[pos];
    pos += 1;
    if format_version != CURRENT_FORMAT_VERSION {
        return Err(CoreError::Corrupt("unsupported format_version"));
    }
    let entry_type = EntryType::from_u8(read_u8(bytes, &mut pos)?)?;
    let compression_type = CompressionType::from_u8(read_u8(bytes, &mut pos)?)?;
    let compression_level = read_u8(bytes, &mut pos)? as i8;
    let self_contained = read_u8(bytes, &mut pos)? != 0;
    let creation_time = read_u64(bytes, &mut pos)?;
    let ccache_version = read_short_string(bytes, &mut pos)?;
    let namespace = read_short_string(bytes, &mut pos)?;
    let entry_size = read_u64(bytes, &mut pos)?;

    if entry_size as usize != bytes.len() {
        return Err(CoreError::Corrupt("entry_size does not match file length"));
    }
    if bytes.len() < pos + CHECKSUM_SIZE {
        return Err(CoreError::Corrupt("entry too short for checksum"));
    }

    let payload_end = bytes.len() - CHECKSUM_SIZE;
    let stored_payload = &bytes[pos..payload_end];
    let checksum_bytes = &bytes[payload_end..];
    let expected = xxhash_rust::xxh3::xxh3_128(&bytes[..payload_end]);
    let actual = u128::from_le_bytes(checksum_bytes.try_into().unwrap());
    if expected != actual {
        return Err(CoreError::Corrupt("checksum mismatch"));
    }

    let payload = match compression_type {
        CompressionType::None => stored_payload.to_vec(),
        CompressionType::Zstd => zstd::bulk::decompress(stored_payload, 512 * 1024 * 1024)
            .map_err(|_| CoreError::Corrupt("zstd decompression failed"))?,
    };

    Ok((
        CacheEntryHeader {
            format_version,
            entry_type,
            compression_type,
            compression_level,
            self_contained,
            creation_time,
            ccache_version,
            namespace,
            entry_size,
        },
        payload,
    ))
}

/// Reads just the header fields (no checksum or payload decompression),
/// for callers that only need `namespace`/`creation_time` to decide
/// whether an entry is a candidate for eviction. Cheaper than a full
/// `deserialize` when the payload is large and irrelevant to the
/// decision; corruption is still caught later, at normal read time.
pub fn peek_header(bytes: &[u8]) -> Result<CacheEntryHeader> {
    if bytes.len() < MAGIC.len() + 1 {
        return Err(CoreError::Corrupt("entry too short"));
    }
    if bytes[0..4] != MAGIC {
        return Err(CoreError::Corrupt("bad magic"));
    }
    let mut pos = 4;
    let format_version = bytes[pos];
    pos += 1;
    if format_version != CURRENT_FORMAT_VERSION {
        return Err(CoreError::Corrupt("unsupported format_version"));
    }
    let entry_type = EntryType::from_u8(read_u8(bytes, &mut pos)?)?;
    let compression_type = CompressionType::from_u8(read_u8(bytes, &mut pos)?)?;
    let compression_level = read_u8(bytes, &mut pos)? as i8;
    let self_contained = read_u8(bytes, &mut pos)? != 0;
    let creation_time = read_u64(bytes, &mut pos)?;
    let ccache_version = read_short_string(bytes, &mut pos)?;
    let namespace = read_short_string(bytes, &mut pos)?;
    let entry_size = read_u64(bytes, &mut pos)?;

    Ok(CacheEntryHeader {
        format_version,
        entry_type,
        compression_type,
        compression_level,
        self_contained,
        creation_time,
        ccache_version,
        namespace,
        entry_size,
    })
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *bytes.get(*pos).ok_or(CoreError::Corrupt("truncated header"))?;
    *pos += 1;
    Ok(b)
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let slice = bytes
        .get(*pos..*pos + 8)
        .ok_or(CoreError::Corrupt("truncated header"))?;
    *pos += 8;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_short_string(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_u8(bytes, pos)? as usize;
    let slice = bytes
        .get(*pos..*pos + len)
        .ok_or(CoreError::Corrupt("truncated header"))?;
    *pos += len;
    String::from_utf8(slice.to_vec()).map_err(|_| CoreError::Corrupt("non-utf8 string field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> CacheEntryHeader {
        let mut h = CacheEntryHeader::new(EntryType::Result, "4.0");
        h.creation_time = 1_700_000_000;
        h
    }

    #[test]
    fn round_trip_uncompressed() {
        let header = sample_header();
        let payload = b"hello world".to_vec();
        let bytes = serialize(header.clone(), &payload).unwrap();
        let (parsed_header, parsed_payload) = deserialize(&bytes).unwrap();
        assert_eq!(parsed_payload, payload);
        assert_eq!(parsed_header.entry_type, header.entry_type);
        assert_eq!(parsed_header.ccache_version, header.ccache_version);
    }

    #[test]
    fn round_trip_zstd() {
        let mut header = sample_header();
        header.compression_type = CompressionType::Zstd;
        header.compression_level = 5;
        let payload = vec![b'x'; 4096];
        let bytes = serialize(header, &payload).unwrap();
        let (parsed_header, parsed_payload) = deserialize(&bytes).unwrap();
        assert_eq!(parsed_payload, payload);
        assert_eq!(parsed_header.compression_type, CompressionType::Zstd);
    }

    #[test]
    fn corrupting_a_byte_fails_checksum() {
        let header = sample_header();
        let mut bytes = serialize(header, b"payload bytes").unwrap();
        let last = bytes.len() - 1;
        bytes[last / 2] ^= 0xff;
        assert!(matches!(deserialize(&bytes), Err(CoreError::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let header = sample_header();
        let mut bytes = serialize(header, b"x").unwrap();
        bytes[0] = 0;
        assert!(matches!(deserialize(&bytes), Err(CoreError::Corrupt(_))));
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let header = sample_header();
        let mut bytes = serialize(header, b"x").unwrap();
        bytes[4] = 99;
        assert!(matches!(deserialize(&bytes), Err(CoreError::Corrupt(_))));
    }
}
