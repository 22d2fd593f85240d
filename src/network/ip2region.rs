//! IP geolocation backed by an ip2region `xdb` database
//!
//! The whole database is loaded into memory once and shared between clones,
//! so lookups never touch the filesystem.
//!
//! Layout (little-endian):
//! - 256 byte header: version, index policy, creation time, first and last
//!   segment index pointers
//! - vector index: 256 x 256 entries of `(start_ptr, end_ptr)` addressed by
//!   the first two octets of the address
//! - region data
//! - segment index: 14 byte entries `(start_ip, end_ip, data_len, data_ptr)`
//!
//! Region records are stored as `country|area|province|city|isp` with `0`
//! for unknown fields. [`GeoLocator::lookup`] renders them with a fixed six
//! character country header, e.g. `中国    山西省 太原市 电信`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::region::{GeoError, GeoLocator};

const HEADER_LEN: usize = 256;
const VECTOR_INDEX_COLS: usize = 256;
const VECTOR_INDEX_ENTRY_LEN: usize = 8;
const VECTOR_INDEX_LEN: usize = 256 * VECTOR_INDEX_COLS * VECTOR_INDEX_ENTRY_LEN;
const SEGMENT_INDEX_ENTRY_LEN: usize = 14;

const COUNTRY_HEADER_CHARS: usize = 6;

const XDB_VERSION: u16 = 2;
const INDEX_POLICY_VECTOR: u16 = 1;

/// ip2region database searcher
#[derive(Clone)]
pub struct Ip2RegionLocator {
    content: Arc<[u8]>,
}

impl Ip2RegionLocator {
    /// Load an xdb file into memory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GeoError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let locator = Self::from_bytes(bytes)?;

        info!(
            path = %path.display(),
            version = locator.version(),
            size = locator.content.len(),
            "loaded ip2region database"
        );

        Ok(locator)
    }

    /// Wrap an in-memory xdb image
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self, GeoError> {
        let content = bytes.into();
        if content.len() < HEADER_LEN + VECTOR_INDEX_LEN {
            return Err(GeoError::Malformed(format!(
                "database is {} bytes, expected at least {}",
                content.len(),
                HEADER_LEN + VECTOR_INDEX_LEN
            )));
        }

        Ok(Self { content })
    }

    /// Format version stored in the header
    pub fn version(&self) -> u16 {
        u16::from_le_bytes([self.content[0], self.content[1]])
    }

    /// Find the region text covering `ip`, or an empty string if none does
    pub fn search(&self, ip: Ipv4Addr) -> Result<String, GeoError> {
        let ip = u32::from(ip);
        let il0 = ((ip >> 24) & 0xFF) as usize;
        let il1 = ((ip >> 16) & 0xFF) as usize;
        let idx = HEADER_LEN
            + il0 * VECTOR_INDEX_COLS * VECTOR_INDEX_ENTRY_LEN
            + il1 * VECTOR_INDEX_ENTRY_LEN;

        let start_ptr = self.read_u32(idx)? as usize;
        let end_ptr = self.read_u32(idx + 4)? as usize;
        if start_ptr == 0 && end_ptr == 0 {
            return Ok(String::new());
        }
        if end_ptr < start_ptr {
            return Err(GeoError::Malformed(format!(
                "vector index entry {il0}.{il1} ends before it starts"
            )));
        }

        let mut low: i64 = 0;
        let mut high = ((end_ptr - start_ptr) / SEGMENT_INDEX_ENTRY_LEN) as i64;

        while low <= high {
            let mid = (low + high) >> 1;
            let p = start_ptr + mid as usize * SEGMENT_INDEX_ENTRY_LEN;

            let start_ip = self.read_u32(p)?;
            if ip < start_ip {
                high = mid - 1;
                continue;
            }

            let end_ip = self.read_u32(p + 4)?;
            if ip > end_ip {
                low = mid + 1;
                continue;
            }

            let data_len = self.read_u16(p + 8)? as usize;
            let data_ptr = self.read_u32(p + 10)? as usize;
            return self.read_region(data_ptr, data_len);
        }

        Ok(String::new())
    }

    fn read_region(&self, ptr: usize, len: usize) -> Result<String, GeoError> {
        let bytes = self.slice(ptr, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| GeoError::Malformed(format!("region data at {ptr} is not UTF-8")))
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], GeoError> {
        offset
            .checked_add(len)
            .and_then(|end| self.content.get(offset..end))
            .ok_or_else(|| {
                GeoError::Malformed(format!(
                    "read of {len} bytes at {offset} is outside the {} byte database",
                    self.content.len()
                ))
            })
    }

    fn read_u32(&self, offset: usize) -> Result<u32, GeoError> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u16(&self, offset: usize) -> Result<u16, GeoError> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

impl GeoLocator for Ip2RegionLocator {
    fn lookup(&self, ip: &str) -> Result<String, GeoError> {
        let addr = ip
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;

        let record = self.search(addr)?;
        debug!(%addr, %record, "ip2region lookup");
        Ok(normalize_record(&record))
    }
}

/// Render a raw `country|area|province|city|isp` record as an address
///
/// The country is padded or cut to a six character header and the remaining
/// known fields follow, space separated. The area field and `0` placeholders
/// are dropped. An empty record stays empty.
pub fn normalize_record(record: &str) -> String {
    if record.is_empty() {
        return String::new();
    }

    let mut fields = record.split('|');
    let country = fields.next().filter(|c| *c != "0").unwrap_or("");

    let mut address: String = country.chars().take(COUNTRY_HEADER_CHARS).collect();
    let pad = COUNTRY_HEADER_CHARS - address.chars().count();
    address.extend(std::iter::repeat(' ').take(pad));

    let rest: Vec<&str> = fields
        .skip(1)
        .filter(|f| !f.is_empty() && *f != "0")
        .collect();
    address.push_str(&rest.join(" "));

    address
}

/// Produces xdb images from a list of address ranges
///
/// Ranges are split on /16 boundaries so each segment belongs to exactly one
/// vector index entry.
#[derive(Debug, Default)]
pub struct Ip2RegionBuilder {
    segments: Vec<(u32, u32, String)>,
}

impl Ip2RegionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ip2region source listing
    ///
    /// One segment per line as `start_ip|end_ip|country|area|province|city|isp`.
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_source(source: &str) -> Result<Self, GeoError> {
        let mut builder = Self::new();

        for (n, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(3, '|');
            let (Some(start), Some(end), Some(region)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(GeoError::Malformed(format!(
                    "line {}: expected start_ip|end_ip|region",
                    n + 1
                )));
            };

            let parse = |ip: &str| {
                ip.trim()
                    .parse::<Ipv4Addr>()
                    .map_err(|_| GeoError::InvalidIp(format!("line {}: {}", n + 1, ip)))
            };
            builder = builder.segment(parse(start)?, parse(end)?, region)?;
        }

        Ok(builder)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Register `start..=end` as belonging to `region`
    pub fn segment(
        mut self,
        start: Ipv4Addr,
        end: Ipv4Addr,
        region: impl Into<String>,
    ) -> Result<Self, GeoError> {
        let (start, end) = (u32::from(start), u32::from(end));
        if start > end {
            return Err(GeoError::InvalidIp(format!(
                "segment {} - {} is reversed",
                Ipv4Addr::from(start),
                Ipv4Addr::from(end)
            )));
        }

        self.segments.push((start, end, region.into()));
        Ok(self)
    }

    pub fn build(mut self) -> Result<Vec<u8>, GeoError> {
        self.segments.sort_by_key(|(start, _, _)| *start);

        let mut chunks = Vec::new();
        for (start, end, region) in &self.segments {
            let mut s = *start;
            loop {
                let chunk_end = (s | 0xFFFF).min(*end);
                chunks.push((s, chunk_end, region.as_str()));
                if chunk_end == *end {
                    break;
                }
                s = chunk_end + 1;
            }
        }

        let mut buf = vec![0u8; HEADER_LEN + VECTOR_INDEX_LEN];

        let mut data_ptrs: HashMap<&str, u32> = HashMap::new();
        for (_, _, region) in &chunks {
            if data_ptrs.contains_key(region) {
                continue;
            }
            if region.len() > u16::MAX as usize {
                return Err(GeoError::Malformed(format!(
                    "region text of {} bytes exceeds the segment length field",
                    region.len()
                )));
            }
            data_ptrs.insert(*region, to_ptr(buf.len())?);
            buf.extend_from_slice(region.as_bytes());
        }

        let index_start = buf.len();
        let mut vector: HashMap<usize, (u32, u32)> = HashMap::new();
        for (s, e, region) in &chunks {
            let ptr = to_ptr(buf.len())?;
            buf.extend_from_slice(&s.to_le_bytes());
            buf.extend_from_slice(&e.to_le_bytes());
            buf.extend_from_slice(&(region.len() as u16).to_le_bytes());
            buf.extend_from_slice(&data_ptrs[region].to_le_bytes());

            let cell = (((s >> 24) & 0xFF) as usize) * VECTOR_INDEX_COLS
                + ((s >> 16) & 0xFF) as usize;
            vector
                .entry(cell)
                .and_modify(|(_, end_ptr)| *end_ptr = ptr)
                .or_insert((ptr, ptr));
        }

        for (cell, (start_ptr, end_ptr)) in vector {
            let offset = HEADER_LEN + cell * VECTOR_INDEX_ENTRY_LEN;
            buf[offset..offset + 4].copy_from_slice(&start_ptr.to_le_bytes());
            buf[offset + 4..offset + 8].copy_from_slice(&end_ptr.to_le_bytes());
        }

        let first_index = to_ptr(index_start)?;
        let last_index = if chunks.is_empty() {
            first_index
        } else {
            to_ptr(buf.len() - SEGMENT_INDEX_ENTRY_LEN)?
        };
        let created_at = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);

        buf[0..2].copy_from_slice(&XDB_VERSION.to_le_bytes());
        buf[2..4].copy_from_slice(&INDEX_POLICY_VECTOR.to_le_bytes());
        buf[4..8].copy_from_slice(&created_at.to_le_bytes());
        buf[8..12].copy_from_slice(&first_index.to_le_bytes());
        buf[12..16].copy_from_slice(&last_index.to_le_bytes());

        Ok(buf)
    }
}

fn to_ptr(offset: usize) -> Result<u32, GeoError> {
    u32::try_from(offset)
        .map_err(|_| GeoError::Malformed(format!("offset {offset} does not fit in 32 bits")))
}
