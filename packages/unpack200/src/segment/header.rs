//! The segment header: magic, versions, option flags, counts, and the band-header escape
//! stream.

use log::{debug, trace};
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};

/// The four-byte magic every segment begins with.
pub const SEGMENT_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xD0, 0x0D];

/// Bit positions within the archive options bitset, as defined by the format.
pub mod option_bits {
	pub const SPECIAL_FORMATS: u32 = 0;
	pub const CP_NUMBER_COUNTS: u32 = 1;
	pub const ALL_CODE_FLAGS: u32 = 2;
	pub const PER_FILE_HEADERS: u32 = 4;
	pub const DEFAULT_DEFLATE_HINT: u32 = 5;
	pub const FILE_MODTIME: u32 = 6;
	pub const FILE_OPTIONS: u32 = 7;
	pub const FILE_SIZE_HI: u32 = 8;
	pub const CLASS_FLAGS_HI: u32 = 9;
	pub const CODE_FIELD_FLAGS_HI: u32 = 10;
	pub const METHOD_FLAGS_HI: u32 = 11;

	/// Every bit position that this decoder recognizes; anything else set is rejected.
	pub const ALL_DEFINED: u32 = (1 << SPECIAL_FORMATS)
		| (1 << CP_NUMBER_COUNTS)
		| (1 << ALL_CODE_FLAGS)
		| (1 << PER_FILE_HEADERS)
		| (1 << DEFAULT_DEFLATE_HINT)
		| (1 << FILE_MODTIME)
		| (1 << FILE_OPTIONS)
		| (1 << FILE_SIZE_HI)
		| (1 << CLASS_FLAGS_HI)
		| (1 << CODE_FIELD_FLAGS_HI)
		| (1 << METHOD_FLAGS_HI);
}

/// Per-subpool element counts for the twelve constant-pool subarrays, in fixed archive
/// order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantPoolCounts {
	pub utf8: usize,
	pub int: usize,
	pub float: usize,
	pub long: usize,
	pub double: usize,
	pub string: usize,
	pub class: usize,
	pub signature: usize,
	pub descriptor: usize,
	pub field: usize,
	pub method: usize,
	pub imethod: usize
}

/// The fixed preamble of a segment: magic, versions, the options bitset, element counts
/// for every subsequent band family, and the band-header escape stream used by
/// meta-codecs.
#[derive(Debug, Clone)]
pub struct SegmentHeader {
	pub minor_version: u16,
	pub major_version: u16,
	pub options: u32,
	pub cp_counts: ConstantPoolCounts,
	pub class_count: usize,
	pub file_count: usize,
	pub default_class_major_version: u16,
	pub default_class_minor_version: u16,
	pub archive_size: u64,
	pub archive_modtime: i64,
	/// The raw band-header escape stream, carried in the segment header for meta-codecs
	/// to index into.
	pub band_headers: Vec<u8>
}

impl SegmentHeader {
	pub fn is_option_set(&self, bit: u32) -> bool {
		self.options & (1 << bit) != 0
	}

	/// Reads a segment header from `reader`, starting at `base_offset` bytes into the
	/// underlying stream (used only to build position hints).
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		trace!("Reading segment header");

		let mut magic = [0u8; 4];
		for byte in &mut magic {
			*byte = reader
				.read()
				.map_err(|e| DecodeError::from_bitstream(e, "header.magic", base_offset))?
				.ok_or_else(|| DecodeError::UnexpectedEof {
					position: DecodePosition::new("header.magic", base_offset)
				})?;
		}
		if magic != SEGMENT_MAGIC {
			return Err(DecodeError::BadMagic {
				position: DecodePosition::new("header.magic", base_offset),
				found: magic
			});
		}

		let minor_version = read_u16(reader, base_offset, "header.minor_version")?;
		let major_version = read_u16(reader, base_offset, "header.major_version")?;

		let options = read_u16(reader, base_offset, "header.options")? as u32;
		if options & !option_bits::ALL_DEFINED != 0 {
			return Err(DecodeError::UnsupportedOption {
				position: DecodePosition::new("header.options", base_offset),
				detail: format!("reserved option bits set: {options:#x}")
			});
		}

		let cp_counts = ConstantPoolCounts {
			utf8: decode_count(reader, base_offset, "header.cp_counts.utf8")?,
			int: decode_count(reader, base_offset, "header.cp_counts.int")?,
			float: decode_count(reader, base_offset, "header.cp_counts.float")?,
			long: decode_count(reader, base_offset, "header.cp_counts.long")?,
			double: decode_count(reader, base_offset, "header.cp_counts.double")?,
			string: decode_count(reader, base_offset, "header.cp_counts.string")?,
			class: decode_count(reader, base_offset, "header.cp_counts.class")?,
			signature: decode_count(reader, base_offset, "header.cp_counts.signature")?,
			descriptor: decode_count(reader, base_offset, "header.cp_counts.descriptor")?,
			field: decode_count(reader, base_offset, "header.cp_counts.field")?,
			method: decode_count(reader, base_offset, "header.cp_counts.method")?,
			imethod: decode_count(reader, base_offset, "header.cp_counts.imethod")?
		};

		let class_count = decode_count(reader, base_offset, "header.class_count")?;
		let default_class_minor_version =
			read_u16(reader, base_offset, "header.default_class_minor_version")?;
		let default_class_major_version =
			read_u16(reader, base_offset, "header.default_class_major_version")?;
		let file_count = decode_count(reader, base_offset, "header.file_count")?;

		let archive_size_hi = decode_count(reader, base_offset, "header.archive_size_hi")? as u64;
		let archive_size_lo = decode_count(reader, base_offset, "header.archive_size_lo")? as u64;
		let archive_size = (archive_size_hi << 32) | archive_size_lo;

		let archive_modtime = Codec::DELTA5
			.decode_one(reader, &mut 0)
			.map_err(|e| DecodeError::from_bitstream(e, "header.archive_modtime", base_offset))?;

		let band_header_count = decode_count(reader, base_offset, "header.band_header_count")?;
		let mut band_headers = Vec::with_capacity(band_header_count);
		for _ in 0..band_header_count {
			let byte = Codec::BYTE1
				.decode_one(reader, &mut 0)
				.map_err(|e| DecodeError::from_bitstream(e, "header.band_headers", base_offset))?;
			band_headers.push(byte as u8);
		}

		debug!(
			"Segment header: major.minor = {major_version}.{minor_version}, options = {options:#x}, \
			 class_count = {class_count}, file_count = {file_count}"
		);

		Ok(Self {
			minor_version,
			major_version,
			options,
			cp_counts,
			class_count,
			file_count,
			default_class_major_version,
			default_class_minor_version,
			archive_size,
			archive_modtime,
			band_headers
		})
	}
}

fn read_u16<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	base_offset: u64,
	band: &'static str
) -> Result<u16, DecodeError> {
	let hi = Codec::BYTE1
		.decode_one(reader, &mut 0)
		.map_err(|e| DecodeError::from_bitstream(e, band, base_offset))?;
	let lo = Codec::BYTE1
		.decode_one(reader, &mut 0)
		.map_err(|e| DecodeError::from_bitstream(e, band, base_offset))?;
	Ok(((hi as u16) << 8) | lo as u16)
}

/// Reads a non-negative count with `UNSIGNED5`, rejecting counts that overflow `usize` or
/// are implausibly large for a single segment.
fn decode_count<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	base_offset: u64,
	band: &'static str
) -> Result<usize, DecodeError> {
	let value = Codec::UNSIGNED5
		.decode_one(reader, &mut 0)
		.map_err(|e| DecodeError::from_bitstream(e, band, base_offset))?;
	usize::try_from(value).map_err(|_| DecodeError::OutOfRange {
		position: DecodePosition::new(band, base_offset),
		detail: format!("count {value} does not fit in usize")
	})
}
