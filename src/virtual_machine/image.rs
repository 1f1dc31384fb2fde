//! Executable image format and loader.
//!
//! An image file is one [`MainHeader`] followed by `memory_regions`
//! [`RegionHeader`] records, each 40 bytes and 8-byte aligned, all
//! little-endian. Loading validates every header before allocating guest
//! memory, then materialises each region that exists into a zero-initialised
//! buffer. The resulting [`LoadedImage`] hands the buffer to the thread
//! constructor; the loader keeps no reference.
//!
//! # Wire layout
//!
//! ```text
//! main header (40 bytes):
//!   0  magic          "Zenithvm"
//!   8  version        major << 48 | minor << 32 | patch
//!   16 memory_size
//!   24 entry_point
//!   32 memory_regions
//!
//! region record (40 bytes):
//!   0  magic          "mem_map!"
//!   8  start          byte offset in the file
//!   16 size           bytes
//!   24 offset         byte offset in guest memory
//!   32 flags          read | write | execute | clear | exists
//!   33 reserved       7 bytes of padding
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::types::encoding::Decode;
use crate::virtual_machine::errors::LoadError;
use supernova_derive::BinaryCodec;

/// Main header magic, "Zenithvm" read as a little-endian word.
pub const MASTER_MAGIC: u64 = 0x6D76_6874_696E_655A;

/// Region record magic, "mem_map!" read as a little-endian word.
pub const REGION_MAGIC: u64 = 0x2170_616D_5F6D_656D;

const VERSION_MAJOR: u64 = 0;
const VERSION_MINOR: u64 = 1;
const VERSION_PATCH: u64 = 0;

/// Runtime version packed the way image headers carry it.
pub const SNVM_VERSION: u64 =
    (VERSION_MAJOR << 48) | (VERSION_MINOR << 32) | VERSION_PATCH;

/// Patch bits of a packed version; differences there are tolerated.
const PATCH_MASK: u64 = 0xFFFF_FFFF;

/// Flags of a [`RegionHeader`].
pub mod region_flags {
    /// Region is readable.
    pub const READ: u8 = 0x01;
    /// Region is writable.
    pub const WRITE: u8 = 0x02;
    /// Region is executable.
    pub const EXECUTE: u8 = 0x04;
    /// Region is zero-filled instead of copied from the file.
    pub const CLEAR: u8 = 0x08;
    /// Region occupies guest memory at all; comment and debug sections
    /// leave this unset.
    pub const EXISTS: u8 = 0x10;
}

/// First header of an image file, coordinating the region table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct MainHeader {
    /// File magic, [`MASTER_MAGIC`].
    pub magic: u64,
    /// Producing runtime version.
    pub version: u64,
    /// Guest memory to allocate, in bytes.
    pub memory_size: u64,
    /// Code entry point, a byte offset into guest memory.
    pub entry_point: u64,
    /// Number of region records following the header.
    pub memory_regions: u64,
}

impl MainHeader {
    /// Encoded size in bytes.
    pub const SIZE: u64 = 40;
}

/// Map for one region of guest memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct RegionHeader {
    /// Record magic, [`REGION_MAGIC`].
    pub magic: u64,
    /// Start of the region bytes inside the file; ignored when `CLEAR` is
    /// set.
    pub start: u64,
    /// Size in bytes, both in the file and in guest memory.
    pub size: u64,
    /// Start of the region inside guest memory.
    pub offset: u64,
    /// Region flags, see [`region_flags`].
    pub flags: u8,
    /// Padding up to the 8-byte-aligned record size.
    pub reserved: [u8; 7],
}

impl RegionHeader {
    /// Encoded size in bytes.
    pub const SIZE: u64 = 40;

    /// Convenience constructor with zeroed padding.
    pub fn new(start: u64, size: u64, offset: u64, flags: u8) -> Self {
        Self {
            magic: REGION_MAGIC,
            start,
            size,
            offset,
            flags,
            reserved: [0; 7],
        }
    }
}

/// A successfully loaded image: the assembled guest memory and where to
/// start executing. The image structs themselves are discarded at this
/// point.
#[derive(Debug)]
pub struct LoadedImage {
    /// Guest memory, zero-initialised then populated region by region.
    pub memory: Vec<u8>,
    /// Length of `memory` in bytes.
    pub memory_size: u64,
    /// Entry point, a byte offset into `memory`.
    pub entry_point: u64,
}

/// Reads and materialises an image file.
pub fn load_image(path: impl AsRef<Path>) -> Result<LoadedImage, LoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => LoadError::FileNotFound(path.display().to_string()),
        _ => LoadError::FileError(err.to_string()),
    })?;
    parse_image(&bytes)
}

/// Validates image bytes and assembles the guest memory.
///
/// All headers are checked before any allocation happens, so a malformed
/// image never costs its declared memory size.
pub fn parse_image(bytes: &[u8]) -> Result<LoadedImage, LoadError> {
    let file_size = bytes.len() as u64;
    if file_size < MainHeader::SIZE {
        return Err(LoadError::InvalidHeader { size: file_size });
    }

    let mut input = bytes;
    let header = MainHeader::decode(&mut input)
        .map_err(|_| LoadError::InvalidHeader { size: file_size })?;

    if header.magic != MASTER_MAGIC {
        return Err(LoadError::MagicMismatch {
            expected: MASTER_MAGIC,
            found: header.magic,
        });
    }

    // Patch differences are tolerated; major and minor must be at least the
    // runtime's.
    if (header.version | PATCH_MASK) < (SNVM_VERSION | PATCH_MASK) {
        return Err(LoadError::VersionMismatch {
            found: header.version,
            expected: SNVM_VERSION,
        });
    }

    if header.entry_point > header.memory_size {
        return Err(LoadError::InvalidEntryPoint {
            entry_point: header.entry_point,
            memory_size: header.memory_size,
        });
    }

    let table_end = header
        .memory_regions
        .checked_mul(RegionHeader::SIZE)
        .and_then(|table| table.checked_add(MainHeader::SIZE))
        .ok_or(LoadError::InvalidHeader { size: file_size })?;
    if file_size < table_end {
        return Err(LoadError::InvalidHeader { size: file_size });
    }

    // Validate the whole region table before allocating guest memory.
    let mut regions = Vec::with_capacity(header.memory_regions as usize);
    for index in 0..header.memory_regions as usize {
        let region = RegionHeader::decode(&mut input)
            .map_err(|_| LoadError::InvalidHeader { size: file_size })?;

        if region.magic != REGION_MAGIC {
            return Err(LoadError::MagicMismatch {
                expected: REGION_MAGIC,
                found: region.magic,
            });
        }

        let fits_guest = region
            .offset
            .checked_add(region.size)
            .map_or(false, |end| end <= header.memory_size);
        let fits_file = region
            .start
            .checked_add(region.size)
            .map_or(false, |end| end <= file_size);
        if !fits_guest || !fits_file {
            return Err(LoadError::InvalidMemoryRegion { index });
        }

        regions.push(region);
    }

    let mut memory = vec![0u8; header.memory_size as usize];
    for region in &regions {
        if region.flags & region_flags::EXISTS == 0 {
            continue;
        }

        let dest = region.offset as usize..(region.offset + region.size) as usize;
        if region.flags & region_flags::CLEAR != 0 {
            memory[dest].fill(0);
            continue;
        }

        let src = region.start as usize..(region.start + region.size) as usize;
        memory[dest].copy_from_slice(&bytes[src]);
    }

    Ok(LoadedImage {
        memory,
        memory_size: header.memory_size,
        entry_point: header.entry_point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::Encode;

    /// Incrementally builds image bytes for loader tests.
    struct ImageBuilder {
        header: MainHeader,
        regions: Vec<RegionHeader>,
        payload: Vec<u8>,
    }

    impl ImageBuilder {
        fn new(memory_size: u64, entry_point: u64) -> Self {
            Self {
                header: MainHeader {
                    magic: MASTER_MAGIC,
                    version: SNVM_VERSION,
                    memory_size,
                    entry_point,
                    memory_regions: 0,
                },
                regions: Vec::new(),
                payload: Vec::new(),
            }
        }

        fn region(mut self, region: RegionHeader) -> Self {
            self.regions.push(region);
            self
        }

        /// Appends raw bytes after the headers, returning their file offset.
        fn payload(&mut self, bytes: &[u8]) -> u64 {
            let offset = MainHeader::SIZE
                + self.regions.len() as u64 * RegionHeader::SIZE
                + self.payload.len() as u64;
            self.payload.extend_from_slice(bytes);
            offset
        }

        fn build(mut self) -> Vec<u8> {
            self.header.memory_regions = self.regions.len() as u64;
            let mut out = Vec::new();
            self.header.encode(&mut out);
            for region in &self.regions {
                region.encode(&mut out);
            }
            out.extend_from_slice(&self.payload);
            out
        }
    }

    // ========== Header validation ==========

    #[test]
    fn header_roundtrips_at_forty_bytes() {
        let header = MainHeader {
            magic: MASTER_MAGIC,
            version: SNVM_VERSION,
            memory_size: 0x1000,
            entry_point: 0x10,
            memory_regions: 2,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len() as u64, MainHeader::SIZE);
        assert_eq!(MainHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn region_record_roundtrips_at_forty_bytes() {
        let region = RegionHeader::new(0x50, 0x20, 0x100, region_flags::EXISTS);
        let bytes = region.to_bytes();
        assert_eq!(bytes.len() as u64, RegionHeader::SIZE);
        assert_eq!(RegionHeader::from_bytes(&bytes).unwrap(), region);
    }

    #[test]
    fn short_file_is_invalid_header() {
        let err = parse_image(&[0u8; 39]).unwrap_err();
        assert!(matches!(err, LoadError::InvalidHeader { size: 39 }));

        let err = parse_image(&[]).unwrap_err();
        assert!(matches!(err, LoadError::InvalidHeader { size: 0 }));
    }

    #[test]
    fn wrong_master_magic_is_rejected() {
        let mut bytes = ImageBuilder::new(0x100, 0).build();
        bytes[0] ^= 0xFF;
        let err = parse_image(&bytes).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MagicMismatch {
                expected: MASTER_MAGIC,
                ..
            }
        ));
    }

    #[test]
    fn older_major_minor_is_version_mismatch() {
        let mut builder = ImageBuilder::new(0x100, 0);
        builder.header.version = 0;
        // Runtime is 0.1.0, so a 0.0.x image is too old.
        let err = parse_image(&builder.build()).unwrap_err();
        assert!(matches!(err, LoadError::VersionMismatch { .. }));
    }

    #[test]
    fn patch_difference_is_tolerated() {
        let mut builder = ImageBuilder::new(0x100, 0);
        builder.header.version = SNVM_VERSION + 7; // bump only the patch bits
        assert!(parse_image(&builder.build()).is_ok());
    }

    #[test]
    fn newer_minor_is_accepted() {
        let mut builder = ImageBuilder::new(0x100, 0);
        builder.header.version = SNVM_VERSION + (1 << 32);
        assert!(parse_image(&builder.build()).is_ok());
    }

    #[test]
    fn entry_point_past_memory_is_rejected() {
        let err = parse_image(&ImageBuilder::new(0x100, 0x101).build()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidEntryPoint {
                entry_point: 0x101,
                memory_size: 0x100
            }
        ));

        // The boundary itself is allowed.
        assert!(parse_image(&ImageBuilder::new(0x100, 0x100).build()).is_ok());
    }

    #[test]
    fn declared_regions_must_fit_in_file() {
        // A bare header claiming three region records that never follow.
        let header = MainHeader {
            magic: MASTER_MAGIC,
            version: SNVM_VERSION,
            memory_size: 0x100,
            entry_point: 0,
            memory_regions: 3,
        };
        let err = parse_image(&header.to_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidHeader { .. }));
    }

    // ========== Region validation ==========

    #[test]
    fn wrong_region_magic_is_rejected() {
        let mut region = RegionHeader::new(0, 0, 0, region_flags::EXISTS);
        region.magic = 0x1122_3344;
        let err = parse_image(&ImageBuilder::new(0x100, 0).region(region).build()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MagicMismatch {
                expected: REGION_MAGIC,
                found: 0x1122_3344
            }
        ));
    }

    #[test]
    fn region_past_guest_memory_is_rejected() {
        let region = RegionHeader::new(0, 0x20, 0xF0, region_flags::EXISTS);
        let err = parse_image(&ImageBuilder::new(0x100, 0).region(region).build()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidMemoryRegion { index: 0 }));
    }

    #[test]
    fn region_past_file_end_is_rejected() {
        let region = RegionHeader::new(0x10_0000, 0x20, 0, region_flags::EXISTS);
        let err = parse_image(&ImageBuilder::new(0x100, 0).region(region).build()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidMemoryRegion { index: 0 }));
    }

    #[test]
    fn region_overflow_is_rejected() {
        let region = RegionHeader::new(0, u64::MAX, 8, region_flags::EXISTS);
        let err = parse_image(&ImageBuilder::new(0x100, 0).region(region).build()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidMemoryRegion { index: 0 }));
    }

    // ========== Materialisation ==========

    #[test]
    fn exists_region_copies_file_bytes() {
        // A valid image with entry 0x10 and two payload bytes mapped there.
        let image = {
            let region = RegionHeader::new(0, 2, 0x10, region_flags::EXISTS);
            let mut builder = ImageBuilder::new(0x1000, 0x10).region(region);
            let start = builder.payload(&[0x55, 0xAA]);
            builder.regions[0].start = start;
            builder.build()
        };

        let loaded = parse_image(&image).unwrap();
        assert_eq!(loaded.memory_size, 0x1000);
        assert_eq!(loaded.entry_point, 0x10);
        assert_eq!(loaded.memory.len(), 0x1000);
        assert_eq!(&loaded.memory[0x10..0x12], &[0x55, 0xAA]);
        assert!(loaded.memory[..0x10].iter().all(|&b| b == 0));
        assert!(loaded.memory[0x12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn clear_region_zeroes_guest_range() {
        let mut builder = ImageBuilder::new(0x100, 0)
            .region(RegionHeader::new(0, 0x40, 0x20, region_flags::EXISTS | region_flags::CLEAR));
        builder.payload(&[0xFF; 8]);
        let loaded = parse_image(&builder.build()).unwrap();
        assert!(loaded.memory[0x20..0x60].iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_exists_flag_skips_region() {
        let image = {
            let region = RegionHeader::new(0, 4, 0x10, region_flags::READ);
            let mut builder = ImageBuilder::new(0x100, 0).region(region);
            let start = builder.payload(&[0xDE, 0xAD, 0xBE, 0xEF]);
            builder.regions[0].start = start;
            builder.build()
        };
        let loaded = parse_image(&image).unwrap();
        assert!(loaded.memory.iter().all(|&b| b == 0));
    }

    #[test]
    fn multiple_regions_assemble_together() {
        let image = {
            let code = RegionHeader::new(0, 2, 0x10, region_flags::EXISTS);
            let bss = RegionHeader::new(
                0,
                0x20,
                0x40,
                region_flags::EXISTS | region_flags::CLEAR,
            );
            let mut builder = ImageBuilder::new(0x200, 0x10).region(code).region(bss);
            let start = builder.payload(&[0x11, 0x22]);
            builder.regions[0].start = start;
            builder.build()
        };
        let loaded = parse_image(&image).unwrap();
        assert_eq!(&loaded.memory[0x10..0x12], &[0x11, 0x22]);
        assert!(loaded.memory[0x40..0x60].iter().all(|&b| b == 0));
    }

    // ========== File-level loading ==========

    #[test]
    fn missing_file_is_file_not_found() {
        let err = load_image("no-such-image.spn").unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound(_)));
        assert_eq!(err.status(), 1);
    }

    #[test]
    fn load_image_reads_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "snvm-image-test-{}.spn",
            std::process::id()
        ));
        let image = {
            let region = RegionHeader::new(0, 2, 0x10, region_flags::EXISTS);
            let mut builder = ImageBuilder::new(0x1000, 0x10).region(region);
            let start = builder.payload(&[0x55, 0xAA]);
            builder.regions[0].start = start;
            builder.build()
        };
        std::fs::write(&path, &image).unwrap();

        let loaded = load_image(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.entry_point, 0x10);
        assert_eq!(&loaded.memory[0x10..0x12], &[0x55, 0xAA]);
    }
}
