//! File bands: the table of files carried by a segment, one entry per class plus one per
//! resource file.
//!
//! Class files never carry raw bytes here; their content is synthesized later by the
//! assembler from the class/field/method/attribute bands. Only resource files (anything
//! that isn't a class) draw from the trailing raw-byte band this module reads.

use log::trace;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;
use crate::segment::header::{option_bits, SegmentHeader};

/// Bit of a per-file options word that marks an explicit deflate-hint override.
const FO_DEFLATE_OVERRIDE: i64 = 0x1;
/// Bit of a per-file options word carrying the overridden deflate-hint value.
const FO_DEFLATE_VALUE: i64 = 0x2;
/// Bit of a per-file options word that marks this entry as a resource rather than a class;
/// in the absence of [`option_bits::FILE_OPTIONS`], the first `class_count` entries are
/// assumed to be the classes in declaration order instead (see `DESIGN.md`).
const FO_IS_RESOURCE: i64 = 0x4;

/// One file carried by the segment: either the shell of a class (whose bytes come from the
/// assembler) or a resource with its raw content already in hand.
#[derive(Debug, Clone)]
pub struct FileEntry {
	/// The file's name, or `None` when it must be derived from its class's name (classes
	/// only).
	pub name: Option<String>,
	pub size: u64,
	pub modtime: i64,
	pub deflate: bool,
	pub is_class: bool,
	/// `Some` for resources, `None` for classes.
	pub resource_bytes: Option<Vec<u8>>
}

/// The segment's file table.
#[derive(Debug, Clone, Default)]
pub struct FileBands {
	pub files: Vec<FileEntry>
}

impl FileBands {
	/// Reads the file table. `default_deflate` is the segment-wide deflate hint applied to
	/// entries that carry no explicit override.
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		header: &SegmentHeader,
		cp: &ConstantPool,
		default_deflate: bool,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		trace!("Reading file bands");

		let file_count = header.file_count;
		let has_per_file_headers = header.is_option_set(option_bits::PER_FILE_HEADERS);

		let names = if has_per_file_headers {
			Codec::UNSIGNED5
				.decode_band(reader, file_count)
				.map_err(|e| DecodeError::from_bitstream(e, "file.name", base_offset))?
		} else {
			vec![0; file_count]
		};

		let size_lo = Codec::UNSIGNED5
			.decode_band(reader, file_count)
			.map_err(|e| DecodeError::from_bitstream(e, "file.size_lo", base_offset))?;
		let size_hi = if header.is_option_set(option_bits::FILE_SIZE_HI) {
			Codec::UNSIGNED5
				.decode_band(reader, file_count)
				.map_err(|e| DecodeError::from_bitstream(e, "file.size_hi", base_offset))?
		} else {
			vec![0; file_count]
		};

		let modtime_deltas = if header.is_option_set(option_bits::FILE_MODTIME) {
			Codec::DELTA5
				.decode_band(reader, file_count)
				.map_err(|e| DecodeError::from_bitstream(e, "file.modtime", base_offset))?
		} else {
			vec![0; file_count]
		};

		let options = if header.is_option_set(option_bits::FILE_OPTIONS) {
			Codec::UNSIGNED5
				.decode_band(reader, file_count)
				.map_err(|e| DecodeError::from_bitstream(e, "file.options", base_offset))?
		} else {
			vec![0; file_count]
		};

		let mut files = Vec::with_capacity(file_count);
		for i in 0..file_count {
			let name = if names[i] == 0 {
				None
			} else {
				let idx = (names[i] - 1) as usize;
				Some(cp.utf8.get(idx).cloned().ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("file.name", base_offset),
					detail: format!("UTF-8 index {idx} out of range")
				})?)
			};

			let size = ((size_hi[i] as u64) << 32) | (size_lo[i] as u32 as u64);
			let modtime = header.archive_modtime + modtime_deltas[i];

			let option_word = options[i];
			let deflate = if option_word & FO_DEFLATE_OVERRIDE != 0 {
				option_word & FO_DEFLATE_VALUE != 0
			} else {
				default_deflate
			};

			let is_class = if header.is_option_set(option_bits::FILE_OPTIONS) {
				option_word & FO_IS_RESOURCE == 0
			} else {
				i < header.class_count
			};

			files.push(FileEntry {
				name,
				size,
				modtime,
				deflate,
				is_class,
				resource_bytes: None
			});
		}

		for file in &mut files {
			if file.is_class {
				continue;
			}
			let mut bytes = Vec::with_capacity(file.size as usize);
			for _ in 0..file.size {
				let byte = reader
					.read()
					.map_err(|e| DecodeError::from_bitstream(e, "file.bits", base_offset))?
					.ok_or(DecodeError::UnexpectedEof {
						position: DecodePosition::new("file.bits", base_offset)
					})?;
				bytes.push(byte);
			}
			file.resource_bytes = Some(bytes);
		}

		Ok(Self { files })
	}

	/// The file entries associated with classes, in declaration order; there is always one
	/// per class in [`super::class_bands::ClassBands`].
	pub fn class_entries(&self) -> impl Iterator<Item = &FileEntry> {
		self.files.iter().filter(|f| f.is_class)
	}

	/// The resource file entries, in declaration order.
	pub fn resource_entries(&self) -> impl Iterator<Item = &FileEntry> {
		self.files.iter().filter(|f| !f.is_class)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::segment::header::SegmentHeader;

	fn header_with(file_count: usize, class_count: usize, options: u32) -> SegmentHeader {
		SegmentHeader {
			minor_version: 0,
			major_version: 7,
			options,
			cp_counts: Default::default(),
			class_count,
			file_count,
			default_class_major_version: 50,
			default_class_minor_version: 0,
			archive_size: 0,
			archive_modtime: 1000,
			band_headers: Vec::new()
		}
	}

	#[test]
	fn first_class_count_entries_are_classes_without_file_options() {
		let header = header_with(2, 1, 0);
		let cp = ConstantPool::default();

		// No per-file headers: names all default (0), sizes 0/5, no modtime/options bands.
		let bytes = [
			0u8, // size_lo[0]
			5u8  // size_lo[1], then 5 raw resource bytes follow
		];
		let mut data = bytes.to_vec();
		data.extend_from_slice(&[1, 2, 3, 4, 5]);
		let mut reader = ByteReader::new(Cursor::new(data));

		let bands = FileBands::read(&mut reader, &header, &cp, false, 0).unwrap();
		assert!(bands.files[0].is_class);
		assert!(!bands.files[1].is_class);
		assert_eq!(bands.files[1].resource_bytes.as_deref(), Some(&[1, 2, 3, 4, 5][..]));
		assert!(bands.files[0].resource_bytes.is_none());
	}
}
