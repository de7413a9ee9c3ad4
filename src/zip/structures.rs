use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};
use crate::io::ByteWriter;

/// Value of a 16-bit field whose real value lives in the ZIP64 records.
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;
/// Value of a 32-bit field whose real value lives in a ZIP64 extra field.
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

pub const EXTRA_ZIP64: u16 = 0x0001;
pub const EXTRA_UNICODE_PATH: u16 = 0x7075;
pub const EXTRA_UNICODE_COMMENT: u16 = 0x6375;

/// DOS external attribute bit marking a directory.
pub const DOS_DIRECTORY: u8 = 0x10;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    Stored,
    #[default]
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::Stored => "Stored",
            CompressionMethod::Deflate => "Defl:N",
            CompressionMethod::Unknown(_) => "Unk",
        }
    }
}

/// Host system recorded in "version made by"; decides how external
/// attributes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Dos,
    Unix,
}

impl Platform {
    /// "Version made by": host in the high byte, APPNOTE version 2.0 in the low.
    pub fn version_made_by(self) -> u16 {
        match self {
            Platform::Dos => 0x0014,
            Platform::Unix => 0x0314,
        }
    }

    pub fn from_version_made_by(version: u16) -> Self {
        if version >> 8 == 3 {
            Platform::Unix
        } else {
            Platform::Dos
        }
    }
}

/// Date and time in the packed MS-DOS format used by ZIP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl Default for DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    fn default() -> Self {
        Self {
            date: (1 << 5) | 1,
            time: 0,
        }
    }
}

impl DosDateTime {
    pub fn from_raw(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Packs a calendar date and time, clamping the year to 1980..=2107.
    /// Seconds are stored with two-second resolution.
    pub fn from_parts(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = year.clamp(1980, 2107) - 1980;
        Self {
            date: (year << 9) | ((month as u16 & 0x0F) << 5) | (day as u16 & 0x1F),
            time: ((hour as u16 & 0x1F) << 11) | ((minute as u16 & 0x3F) << 5) | (second as u16 / 2),
        }
    }

    /// Converts seconds since the Unix epoch (UTC).
    pub fn from_unix(secs: u64) -> Self {
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (year, month, day) = civil_from_days(days);
        Self::from_parts(
            year.clamp(0, u16::MAX as i64) as u16,
            month,
            day,
            (rem / 3600) as u8,
            (rem % 3600 / 60) as u8,
            (rem % 60) as u8,
        )
    }

    /// Current time, UTC.
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::from_unix(secs)
    }

    /// (year, month, day)
    pub fn ymd(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// (hour, minute, second)
    pub fn hms(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

impl std::fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (y, mo, d) = self.ymd();
        let (h, mi, _) = self.hms();
        write!(f, "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}")
    }
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::data("invalid end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter, comment: &[u8]) {
        w.bytes(Self::SIGNATURE)
            .u16(self.disk_number)
            .u16(self.disk_with_cd)
            .u16(self.disk_entries)
            .u16(self.total_entries)
            .u32(self.cd_size)
            .u32(self.cd_offset)
            .u16(comment.len() as u16)
            .bytes(comment);
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_number == ZIP64_SENTINEL_16
            || self.disk_entries == ZIP64_SENTINEL_16
            || self.total_entries == ZIP64_SENTINEL_16
            || self.cd_size == ZIP64_SENTINEL_32
            || self.cd_offset == ZIP64_SENTINEL_32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::data("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.bytes(Self::SIGNATURE)
            .u32(self.disk_with_eocd64)
            .u64(self.eocd64_offset)
            .u32(self.total_disks);
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::data("invalid ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.bytes(Self::SIGNATURE)
            .u64(Self::MIN_SIZE as u64 - 12)
            .u16(self.version_made_by)
            .u16(self.version_needed)
            .u32(self.disk_number)
            .u32(self.disk_with_cd)
            .u64(self.disk_entries)
            .u64(self.total_entries)
            .u64(self.cd_size)
            .u64(self.cd_offset);
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor following streamed entry data.
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Parsed ZIP file entry information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipFileEntry {
    /// Decoded name: UTF-8 when flagged or carried by a Unicode path
    /// field, otherwise the raw bytes read leniently.
    pub file_name: String,
    pub raw_name: Vec<u8>,
    pub comment: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub modified: DosDateTime,
    pub flags: u16,
    pub version_made_by: u16,
    pub external_attributes: u32,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn platform(&self) -> Platform {
        Platform::from_version_made_by(self.version_made_by)
    }

    /// UNIX mode bits, for entries written on a UNIX host.
    pub fn unix_permissions(&self) -> Option<u32> {
        match self.platform() {
            Platform::Unix => Some(self.external_attributes >> 16).filter(|&m| m != 0),
            Platform::Dos => None,
        }
    }

    /// DOS attribute byte (read-only, hidden, system, directory, archive).
    pub fn dos_permissions(&self) -> u8 {
        (self.external_attributes & 0xFF) as u8
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        self.modified.ymd()
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        self.modified.hms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_time_round_trips_parts() {
        let t = DosDateTime::from_parts(2024, 2, 29, 23, 59, 58);
        assert_eq!(t.ymd(), (2024, 2, 29));
        assert_eq!(t.hms(), (23, 59, 58));
        assert_eq!(t.to_string(), "2024-02-29 23:59");
        // odd seconds lose their last bit
        assert_eq!(DosDateTime::from_parts(2000, 1, 1, 0, 0, 7).hms(), (0, 0, 6));
        assert_eq!(DosDateTime::from_parts(1970, 1, 1, 0, 0, 0).ymd().0, 1980);
    }

    #[test]
    fn dos_time_from_unix_epoch_seconds() {
        // 2021-03-04 05:06:08 UTC
        let t = DosDateTime::from_unix(1_614_834_368);
        assert_eq!(t.ymd(), (2021, 3, 4));
        assert_eq!(t.hms(), (5, 6, 8));
    }

    #[test]
    fn eocd_write_then_parse() {
        let eocd = EndOfCentralDirectory {
            disk_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 1000,
            comment_len: 2,
            ..Default::default()
        };
        let mut w = ByteWriter::new();
        eocd.write(&mut w, b"hi");
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE + 2);
        assert_eq!(EndOfCentralDirectory::from_bytes(&bytes).unwrap(), eocd);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn zip64_records_have_fixed_sizes() {
        let mut w = ByteWriter::new();
        Zip64EOCD {
            total_entries: 70_000,
            ..Default::default()
        }
        .write(&mut w);
        assert_eq!(w.len(), Zip64EOCD::MIN_SIZE);
        let parsed = Zip64EOCD::from_bytes(w.as_slice()).unwrap();
        assert_eq!(parsed.total_entries, 70_000);
        assert_eq!(parsed.eocd64_size, 44);

        let mut w = ByteWriter::new();
        Zip64EOCDLocator {
            eocd64_offset: 1 << 33,
            total_disks: 1,
            ..Default::default()
        }
        .write(&mut w);
        assert_eq!(w.len(), Zip64EOCDLocator::SIZE);
        assert_eq!(
            Zip64EOCDLocator::from_bytes(w.as_slice()).unwrap().eocd64_offset,
            1 << 33
        );
    }

    #[test]
    fn platform_and_permissions() {
        let mut entry = ZipFileEntry {
            file_name: "run.sh".into(),
            raw_name: b"run.sh".to_vec(),
            comment: String::new(),
            compression_method: CompressionMethod::Deflate,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            modified: DosDateTime::default(),
            flags: 0,
            version_made_by: Platform::Unix.version_made_by(),
            external_attributes: 0o100755 << 16,
            is_directory: false,
        };
        assert_eq!(entry.unix_permissions(), Some(0o100755));
        entry.version_made_by = Platform::Dos.version_made_by();
        entry.external_attributes = 0x01;
        assert_eq!(entry.unix_permissions(), None);
        assert_eq!(entry.dos_permissions(), 0x01);
        assert_eq!(entry.mod_date(), (1980, 1, 1));
    }
}
