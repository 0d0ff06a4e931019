//! The segment-wide constant pool: twelve named subarrays, decoded independently, with a
//! derived mapping from `(subpool, local index)` to a flat global index.

use log::trace;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::header::ConstantPoolCounts;

/// A `Signature` constant-pool entry: a UTF-8 "form" (the descriptor with class names
/// stripped to bare `L` slots) plus the class references that fill those slots, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
	/// Index into the UTF-8 subarray for the form string.
	pub form: usize,
	/// Indices into the class subarray, one per `L` slot in the form, in order.
	pub classes: Vec<usize>
}

/// A `Descriptor` (name-and-type) constant-pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEntry {
	/// Index into the UTF-8 subarray for the member name.
	pub name: usize,
	/// Index into the signature subarray for the member type.
	pub descriptor_type: usize
}

/// A `Field`/`Method`/`InterfaceMethod` constant-pool entry: an owning class plus a
/// descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEntry {
	/// Index into the class subarray for the owner.
	pub class: usize,
	/// Index into the descriptor subarray.
	pub descriptor: usize
}

/// The running sum of subpool lengths, in fixed archive order, used to translate a
/// `(subpool, local index)` pair into a segment-global index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantPoolOffsets {
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
	pub imethod: usize,
	/// One past the last valid global index; the total pool size.
	pub total: usize
}

impl ConstantPoolOffsets {
	fn from_counts(counts: &ConstantPoolCounts) -> Self {
		let mut offset = 0;
		let utf8 = offset;
		offset += counts.utf8;
		let int = offset;
		offset += counts.int;
		let float = offset;
		offset += counts.float;
		let long = offset;
		offset += counts.long;
		let double = offset;
		offset += counts.double;
		let string = offset;
		offset += counts.string;
		let class = offset;
		offset += counts.class;
		let signature = offset;
		offset += counts.signature;
		let descriptor = offset;
		offset += counts.descriptor;
		let field = offset;
		offset += counts.field;
		let method = offset;
		offset += counts.method;
		let imethod = offset;
		offset += counts.imethod;

		Self {
			utf8,
			int,
			float,
			long,
			double,
			string,
			class,
			signature,
			descriptor,
			field,
			method,
			imethod,
			total: offset
		}
	}
}

/// The fully decoded segment constant pool.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
	pub utf8: Vec<String>,
	pub int: Vec<i32>,
	pub float: Vec<f32>,
	pub long: Vec<i64>,
	pub double: Vec<f64>,
	pub string: Vec<usize>,
	pub class: Vec<usize>,
	pub signature: Vec<SignatureEntry>,
	pub descriptor: Vec<DescriptorEntry>,
	pub field: Vec<RefEntry>,
	pub method: Vec<RefEntry>,
	pub imethod: Vec<RefEntry>,
	pub offsets: ConstantPoolOffsets
}

impl ConstantPool {
	/// Reads the twelve constant-pool subarrays and computes their offsets.
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		counts: &ConstantPoolCounts,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		trace!("Reading constant pool bands");

		let utf8 = read_utf8(reader, counts.utf8, base_offset)?;
		let int = Codec::UDELTA5
			.decode_band(reader, counts.int)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.int", base_offset))?
			.into_iter()
			.map(|v| v as i32)
			.collect();
		let float = Codec::UDELTA5
			.decode_band(reader, counts.float)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.float", base_offset))?
			.into_iter()
			.map(|v| f32::from_bits(v as u32))
			.collect();

		let long_hi = Codec::UDELTA5
			.decode_band(reader, counts.long)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.long_hi", base_offset))?;
		let long_lo = Codec::DELTA5
			.decode_band(reader, counts.long)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.long_lo", base_offset))?;
		let long = long_hi
			.into_iter()
			.zip(long_lo)
			.map(|(hi, lo)| ((hi as i64) << 32) | (lo as u32 as i64))
			.collect();

		let double_hi = Codec::UDELTA5
			.decode_band(reader, counts.double)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.double_hi", base_offset))?;
		let double_lo = Codec::DELTA5
			.decode_band(reader, counts.double)
			.map_err(|e| DecodeError::from_bitstream(e, "cp.double_lo", base_offset))?;
		let double = double_hi
			.into_iter()
			.zip(double_lo)
			.map(|(hi, lo)| f64::from_bits((((hi as i64) << 32) | (lo as u32 as i64)) as u64))
			.collect();

		let string = read_index_band(reader, counts.string, "cp.string", base_offset)?;
		let class = read_index_band(reader, counts.class, "cp.class", base_offset)?;

		let signature = read_signatures(reader, counts.signature, &utf8, base_offset)?;

		let descriptor_names = read_index_band(reader, counts.descriptor, "cp.descr_name", base_offset)?;
		let descriptor_types = read_index_band(reader, counts.descriptor, "cp.descr_type", base_offset)?;
		let descriptor = descriptor_names
			.into_iter()
			.zip(descriptor_types)
			.map(|(name, descriptor_type)| DescriptorEntry {
				name,
				descriptor_type
			})
			.collect();

		let field = read_ref_entries(reader, counts.field, "cp.field", base_offset)?;
		let method = read_ref_entries(reader, counts.method, "cp.method", base_offset)?;
		let imethod = read_ref_entries(reader, counts.imethod, "cp.imethod", base_offset)?;

		let offsets = ConstantPoolOffsets::from_counts(counts);

		Ok(Self {
			utf8,
			int,
			float,
			long,
			double,
			string,
			class,
			signature,
			descriptor,
			field,
			method,
			imethod,
			offsets
		})
	}

	/// Translates a `(subpool offset, local index)` pair into a segment-global index.
	pub const fn global_index(subpool_offset: usize, local_index: usize) -> usize {
		subpool_offset + local_index
	}
}

fn read_index_band<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	count: usize,
	band: &'static str,
	base_offset: u64
) -> Result<Vec<usize>, DecodeError> {
	Codec::UNSIGNED5
		.decode_band(reader, count)
		.map_err(|e| DecodeError::from_bitstream(e, band, base_offset))?
		.into_iter()
		.map(|value| {
			usize::try_from(value).map_err(|_| DecodeError::OutOfRange {
				position: DecodePosition::new(band, base_offset),
				detail: format!("negative index {value}")
			})
		})
		.collect()
}

fn read_ref_entries<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	count: usize,
	band: &'static str,
	base_offset: u64
) -> Result<Vec<RefEntry>, DecodeError> {
	let classes = read_index_band(reader, count, band, base_offset)?;
	let descriptors = read_index_band(reader, count, band, base_offset)?;
	Ok(classes
		.into_iter()
		.zip(descriptors)
		.map(|(class, descriptor)| RefEntry { class, descriptor })
		.collect())
}

/// Decodes the UTF-8 subarray: prefix/suffix-coded strings backed by a shared character
/// stream.
fn read_utf8<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	count: usize,
	base_offset: u64
) -> Result<Vec<String>, DecodeError> {
	if count == 0 {
		return Ok(Vec::new());
	}

	let remaining = count - 1;
	let prefixes = Codec::DELTA5
		.decode_band(reader, remaining)
		.map_err(|e| DecodeError::from_bitstream(e, "cp.utf8.prefix", base_offset))?;
	let raw_suffixes = Codec::UNSIGNED5
		.decode_band(reader, remaining)
		.map_err(|e| DecodeError::from_bitstream(e, "cp.utf8.suffix", base_offset))?;

	let big_suffix_count = raw_suffixes.iter().filter(|&&suffix| suffix == 0).count();
	let big_suffixes = Codec::UNSIGNED5
		.decode_band(reader, big_suffix_count)
		.map_err(|e| DecodeError::from_bitstream(e, "cp.utf8.big_suffix", base_offset))?;
	let mut big_suffixes = big_suffixes.into_iter();

	let resolved_suffixes: Vec<usize> = raw_suffixes
		.into_iter()
		.map(|suffix| {
			if suffix == 0 {
				big_suffixes.next().unwrap_or(0) as usize
			} else {
				suffix as usize
			}
		})
		.collect();

	let total_chars: usize = resolved_suffixes.iter().sum();
	let char_codes = Codec::CHAR3
		.decode_band(reader, total_chars)
		.map_err(|e| DecodeError::from_bitstream(e, "cp.utf8.chars", base_offset))?;
	let mut char_codes = char_codes.into_iter();

	let mut strings = Vec::with_capacity(count);
	strings.push(String::new());

	for (prefix, suffix_len) in prefixes.into_iter().zip(resolved_suffixes) {
		let previous = strings.last().expect("first entry always present");
		let prefix_len = prefix.max(0) as usize;
		let mut next: String = previous.chars().take(prefix_len).collect();

		for _ in 0..suffix_len {
			let code = char_codes.next().ok_or(DecodeError::UnexpectedEof {
				position: DecodePosition::new("cp.utf8.chars", base_offset)
			})?;
			next.push(char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
		}

		strings.push(next);
	}

	Ok(strings)
}

/// Decodes the `Signature` subarray: a form index plus, for each `L` slot in the form
/// string, a class index pulled from a shared classes band.
fn read_signatures<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	count: usize,
	utf8: &[String],
	base_offset: u64
) -> Result<Vec<SignatureEntry>, DecodeError> {
	let forms = read_index_band(reader, count, "cp.signature.form", base_offset)?;

	let slot_counts: Vec<usize> = forms
		.iter()
		.map(|&form| utf8.get(form).map(|s| s.matches('L').count()).unwrap_or(0))
		.collect();
	let total_slots: usize = slot_counts.iter().sum();

	let class_refs = read_index_band(reader, total_slots, "cp.signature.classes", base_offset)?;
	let mut class_refs = class_refs.into_iter();

	forms
		.into_iter()
		.zip(slot_counts)
		.map(|(form, slots)| {
			let classes = (0..slots)
				.map(|_| {
					class_refs.next().ok_or(DecodeError::UnexpectedEof {
						position: DecodePosition::new("cp.signature.classes", base_offset)
					})
				})
				.collect::<Result<Vec<_>, _>>()?;
			Ok(SignatureEntry { form, classes })
		})
		.collect()
}
