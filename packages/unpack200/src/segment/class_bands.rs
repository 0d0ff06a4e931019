//! Class bands: per-class flags, interfaces, and the flattened field/method tables that
//! make up the bulk of a segment.
//!
//! Attribute bodies are not materialized here; this module only reads the shape (counts,
//! descriptors, flags, and the `Code` shell for eligible methods) that later stages
//! (bytecode bands, then the new-attribute interpreter) need in order to know how many
//! values to pull from their own bands.

use log::trace;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::bytecode::{DecodedCode, MethodCodeRequest};
use crate::segment::constant_pool::ConstantPool;
use crate::segment::header::{option_bits, SegmentHeader};

/// Bit of a method's flag word that marks it `abstract`.
pub const ACC_ABSTRACT: u64 = 0x0400;
/// Bit of a method's flag word that marks it `native`.
pub const ACC_NATIVE: u64 = 0x0100;
/// Bit of a method's flag word that marks it `static`.
pub const ACC_STATIC: u64 = 0x0008;

/// One entry of a method's exception table, still expressed in instruction-index space;
/// translated to real byte offsets once the method's bytecode has been decoded.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
	pub start_instr: i64,
	pub end_instr: i64,
	pub handler_instr: i64,
	/// The segment-global class index of the catch type, or `None` for a `finally`
	/// handler (catch-type `0`).
	pub catch_type_global: Option<usize>
}

/// The `Code` shell for one non-abstract, non-native method: everything decoded ahead of
/// the method's packed bytecode, plus a slot for the [`DecodedCode`] once the bytecode
/// bands have run.
#[derive(Debug, Clone)]
pub struct CodeShape {
	pub max_stack: u16,
	pub max_locals_explicit: u16,
	pub handlers: Vec<ExceptionHandler>,
	/// This `Code` shell's own flag word: bit `n` set means the `Code`-context layout
	/// registered at bit `n` (see [`super::attribute_defs::AttributeDefinitions`]) has one
	/// occurrence on this shell. Zero when the segment never transmits per-`Code` flags
	/// (see [`ClassBands::read`]).
	pub attribute_flags: u64,
	/// Filled in by [`super::bytecode::decode_segment_code`] after this shell is read.
	pub decoded: Option<DecodedCode>
}

impl CodeShape {
	/// Whether nested attribute `bit` has an occurrence on this `Code` shell.
	pub fn has_attribute(&self, bit: u32) -> bool {
		bit < 64 && self.attribute_flags & (1u64 << bit) != 0
	}
}

/// One field or method: its descriptor and access flags.
#[derive(Debug, Clone)]
pub struct MemberRecord {
	/// Segment-global index into the `Descriptor` (name-and-type) subpool.
	pub descriptor_global: usize,
	pub flags: u64
}

/// One method: a [`MemberRecord`] plus, for non-abstract non-native methods, a
/// [`CodeShape`].
#[derive(Debug, Clone)]
pub struct MethodRecord {
	pub member: MemberRecord,
	pub code: Option<CodeShape>
}

/// One class: its identity, interfaces, and flattened member tables.
#[derive(Debug, Clone)]
pub struct ClassRecord {
	/// Segment-global index into the `Class` subpool.
	pub this_class_global: usize,
	/// Segment-global index into the `Class` subpool, or `None` for `java/lang/Object`.
	pub super_class_global: Option<usize>,
	pub interfaces_global: Vec<usize>,
	pub flags: u64,
	pub fields: Vec<MemberRecord>,
	pub methods: Vec<MethodRecord>
}

impl MethodRecord {
	pub fn is_code_eligible(flags: u64) -> bool {
		flags & ACC_ABSTRACT == 0 && flags & ACC_NATIVE == 0
	}
}

/// The segment's class bands: the per-class shape of every class in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ClassBands {
	pub classes: Vec<ClassRecord>
}

impl ClassBands {
	/// Reads every class's shape: flags, interfaces, and field/method tables (without
	/// attribute bodies, which are materialized in a later pass).
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		header: &SegmentHeader,
		cp: &ConstantPool,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		trace!("Reading class bands");

		let class_count = header.class_count;

		let this_refs = Codec::UDELTA5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.this", base_offset))?;
		let super_refs = Codec::UDELTA5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.super", base_offset))?;

		let flags_lo = Codec::UNSIGNED5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.flags_lo", base_offset))?;
		let flags_hi = if header.is_option_set(option_bits::CLASS_FLAGS_HI) {
			Codec::UNSIGNED5
				.decode_band(reader, class_count)
				.map_err(|e| DecodeError::from_bitstream(e, "class.flags_hi", base_offset))?
		} else {
			vec![0; class_count]
		};

		let interface_counts = Codec::UNSIGNED5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.interface_count", base_offset))?;
		let total_interfaces: usize = interface_counts.iter().map(|&c| c.max(0) as usize).sum();
		let interface_refs = Codec::UDELTA5
			.decode_band(reader, total_interfaces)
			.map_err(|e| DecodeError::from_bitstream(e, "class.interface", base_offset))?;
		let mut interface_refs = interface_refs.into_iter();

		let field_counts = Codec::UNSIGNED5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.field_count", base_offset))?;
		let method_counts = Codec::UNSIGNED5
			.decode_band(reader, class_count)
			.map_err(|e| DecodeError::from_bitstream(e, "class.method_count", base_offset))?;

		let total_fields: usize = field_counts.iter().map(|&c| c.max(0) as usize).sum();
		let total_methods: usize = method_counts.iter().map(|&c| c.max(0) as usize).sum();

		let field_members = read_members(
			reader,
			total_fields,
			header.is_option_set(option_bits::CODE_FIELD_FLAGS_HI),
			cp.offsets.descriptor,
			"field",
			base_offset
		)?;
		let method_members = read_members(
			reader,
			total_methods,
			header.is_option_set(option_bits::METHOD_FLAGS_HI),
			cp.offsets.descriptor,
			"method",
			base_offset
		)?;

		let code_eligible: Vec<bool> = method_members
			.iter()
			.map(|m| MethodRecord::is_code_eligible(m.flags))
			.collect();
		let code_count = code_eligible.iter().filter(|&&e| e).count();

		let max_stacks = Codec::UNSIGNED5
			.decode_band(reader, code_count)
			.map_err(|e| DecodeError::from_bitstream(e, "code.max_stack", base_offset))?;
		let max_locals = Codec::UNSIGNED5
			.decode_band(reader, code_count)
			.map_err(|e| DecodeError::from_bitstream(e, "code.max_locals", base_offset))?;
		let handler_counts = Codec::UNSIGNED5
			.decode_band(reader, code_count)
			.map_err(|e| DecodeError::from_bitstream(e, "code.handler_count", base_offset))?;
		let total_handlers: usize = handler_counts.iter().map(|&c| c.max(0) as usize).sum();

		let handler_start = Codec::UNSIGNED5
			.decode_band(reader, total_handlers)
			.map_err(|e| DecodeError::from_bitstream(e, "code.handler_start", base_offset))?;
		let handler_end = Codec::UNSIGNED5
			.decode_band(reader, total_handlers)
			.map_err(|e| DecodeError::from_bitstream(e, "code.handler_end", base_offset))?;
		let handler_pc = Codec::UNSIGNED5
			.decode_band(reader, total_handlers)
			.map_err(|e| DecodeError::from_bitstream(e, "code.handler_pc", base_offset))?;
		let handler_catch = Codec::UNSIGNED5
			.decode_band(reader, total_handlers)
			.map_err(|e| DecodeError::from_bitstream(e, "code.handler_catch", base_offset))?;

		// `ALL_CODE_FLAGS` means every code-eligible method's nested-attribute flag word is
		// transmitted explicitly; when it's clear, no `Code` in the segment carries nested
		// attributes and the flags band itself is omitted entirely (see `DESIGN.md`).
		let code_flags: Vec<u64> = if header.is_option_set(option_bits::ALL_CODE_FLAGS) {
			Codec::UNSIGNED5
				.decode_band(reader, code_count)
				.map_err(|e| DecodeError::from_bitstream(e, "code.flags", base_offset))?
				.into_iter()
				.map(|v| v as u64)
				.collect()
		} else {
			vec![0u64; code_count]
		};

		let mut handler_cursor = 0usize;
		let mut code_cursor = 0usize;
		let mut method_records = Vec::with_capacity(method_members.len());

		for (member, &eligible) in method_members.into_iter().zip(&code_eligible) {
			let code = if eligible {
				let handler_n = handler_counts[code_cursor].max(0) as usize;
				let mut handlers = Vec::with_capacity(handler_n);
				for _ in 0..handler_n {
					let catch = handler_catch[handler_cursor];
					handlers.push(ExceptionHandler {
						start_instr: handler_start[handler_cursor],
						end_instr: handler_end[handler_cursor],
						handler_instr: handler_pc[handler_cursor],
						catch_type_global: if catch == 0 {
							None
						} else {
							Some(cp.offsets.class + (catch - 1) as usize)
						}
					});
					handler_cursor += 1;
				}

				let shape = CodeShape {
					max_stack: max_stacks[code_cursor] as u16,
					max_locals_explicit: max_locals[code_cursor] as u16,
					handlers,
					attribute_flags: code_flags[code_cursor],
					decoded: None
				};
				code_cursor += 1;
				Some(shape)
			} else {
				None
			};

			method_records.push(MethodRecord { member, code });
		}

		let mut field_cursor = 0usize;
		let mut method_cursor = 0usize;
		let mut classes = Vec::with_capacity(class_count);

		for i in 0..class_count {
			let this_local = usize::try_from(this_refs[i]).map_err(|_| DecodeError::OutOfRange {
				position: DecodePosition::new("class.this", base_offset),
				detail: format!("negative class index {}", this_refs[i])
			})?;
			let super_ref = super_refs[i];
			let super_class_global = if super_ref == 0 {
				None
			} else {
				Some(cp.offsets.class + (super_ref - 1) as usize)
			};

			let flags = (flags_lo[i] as u64) | ((flags_hi[i] as u64) << 32);
			let interface_n = interface_counts[i].max(0) as usize;
			let interfaces_global = (0..interface_n)
				.map(|_| cp.offsets.class + interface_refs.next().unwrap_or(0) as usize)
				.collect();

			let field_n = field_counts[i].max(0) as usize;
			let method_n = method_counts[i].max(0) as usize;

			classes.push(ClassRecord {
				this_class_global: cp.offsets.class + this_local,
				super_class_global,
				interfaces_global,
				flags,
				fields: field_members[field_cursor..field_cursor + field_n].to_vec(),
				methods: method_records[method_cursor..method_cursor + method_n].to_vec()
			});

			field_cursor += field_n;
			method_cursor += method_n;
		}

		Ok(Self { classes })
	}

	/// Every code-eligible method's request for the bytecode bands, in class/method
	/// declaration order, matching the order [`Self::attach_code`] expects its results in.
	pub fn code_requests(&self, cp: &ConstantPool) -> Vec<MethodCodeRequest> {
		self.classes
			.iter()
			.enumerate()
			.flat_map(|(class_index, class)| {
				class.methods.iter().filter(|m| m.code.is_some()).map(move |m| MethodCodeRequest {
					class_index,
					this_class_global: class.this_class_global,
					super_class_global: class.super_class_global.unwrap_or(class.this_class_global),
					signature_index: cp.descriptor[m.member.descriptor_global - cp.offsets.descriptor].descriptor_type,
					is_static: m.member.flags & ACC_STATIC != 0
				})
			})
			.collect()
	}

	/// Distributes the results of [`super::bytecode::decode_segment_code`] (run over
	/// [`Self::code_requests`]) back onto each method's [`CodeShape`].
	pub fn attach_code(&mut self, decoded: Vec<DecodedCode>) -> Result<(), DecodeError> {
		let mut decoded = decoded.into_iter();
		for class in &mut self.classes {
			for method in &mut class.methods {
				if let Some(shape) = &mut method.code {
					shape.decoded = Some(decoded.next().ok_or(DecodeError::Inconsistent {
						position: DecodePosition::new("code.bytecode", 0),
						detail: "fewer decoded method bodies than code-eligible methods".to_string()
					})?);
				}
			}
		}
		Ok(())
	}
}

fn read_members<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	count: usize,
	hi_flags: bool,
	descriptor_offset: usize,
	band: &'static str,
	base_offset: u64
) -> Result<Vec<MemberRecord>, DecodeError> {
	let descriptor_band: &'static str = if band == "field" { "field.descr" } else { "method.descr" };
	let descriptors = Codec::UDELTA5
		.decode_band(reader, count)
		.map_err(|e| DecodeError::from_bitstream(e, descriptor_band, base_offset))?;

	let flags_lo_band: &'static str = if band == "field" { "field.flags_lo" } else { "method.flags_lo" };
	let flags_lo = Codec::UNSIGNED5
		.decode_band(reader, count)
		.map_err(|e| DecodeError::from_bitstream(e, flags_lo_band, base_offset))?;
	let flags_hi = if hi_flags {
		let flags_hi_band: &'static str = if band == "field" { "field.flags_hi" } else { "method.flags_hi" };
		Codec::UNSIGNED5
			.decode_band(reader, count)
			.map_err(|e| DecodeError::from_bitstream(e, flags_hi_band, base_offset))?
	} else {
		vec![0; count]
	};

	Ok(descriptors
		.into_iter()
		.zip(flags_lo)
		.zip(flags_hi)
		.map(|((descr, lo), hi)| MemberRecord {
			descriptor_global: descriptor_offset + descr as usize,
			flags: (lo as u64) | ((hi as u64) << 32)
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn code_eligibility_excludes_abstract_and_native() {
		assert!(MethodRecord::is_code_eligible(0));
		assert!(!MethodRecord::is_code_eligible(ACC_ABSTRACT));
		assert!(!MethodRecord::is_code_eligible(ACC_NATIVE));
		assert!(MethodRecord::is_code_eligible(ACC_STATIC));
	}
}
