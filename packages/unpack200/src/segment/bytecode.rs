//! The bytecode bands: a two-pass decoder that expands packed, pseudo-opcode-laden method
//! bodies into canonical JVM bytecode.
//!
//! Pass one (`scan`) walks the shared packed-code byte stream once per method, without
//! decoding any band values yet, recording which operand band each instruction will draw
//! from. This yields, for the whole segment, the element counts every BC sub-band needs.
//! Pass two (`assemble`) decodes those sub-bands now that their lengths are known, then
//! replays the same per-method instruction sequence, this time consuming band values and
//! emitting real bytecode bytes.
//!
//! Branch targets and the packed/real instruction boundary map are expressed in
//! *instruction-index* space: the `n`th decoded instruction of a method, not its packed
//! byte offset. This keeps relocation independent of how many bytes a pseudo-opcode
//! happened to occupy in the packed stream, and is the convention this decoder uses
//! throughout.

use std::collections::HashMap;

use strum_macros::EnumIter;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;
use crate::segment::descriptor::parameter_word_count;
use crate::segment::opcodes::{self, CpRefTag, ImplicitSink, PackedOpcode, RealOperandShape};

/// Which band an instruction's operand(s) are drawn from during the assemble pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum OperandKind {
	Byte,
	Short,
	Local,
	LocalWide,
	IincConst,
	IincConstWide,
	Label,
	CaseCount,
	CaseValue,
	ClassRef,
	FieldRef,
	MethodRef,
	ImethodRef,
	ThisField,
	ThisMethod,
	SuperField,
	SuperMethod,
	InitRef,
	EscRef,
	EscSize,
	EscByte,
	TypedInt,
	TypedFloat,
	TypedString,
	TypedClass
}

impl OperandKind {
	fn codec(self) -> Codec {
		use OperandKind::*;
		match self {
			Byte => Codec::BYTE1,
			Short | IincConst | IincConstWide | CaseValue => Codec::SIGNED5,
			Label => Codec::BRANCH5,
			Local | LocalWide | CaseCount | ClassRef | FieldRef | MethodRef | ImethodRef
			| ThisField | ThisMethod | SuperField | SuperMethod | InitRef | EscRef | EscSize
			| EscByte | TypedInt | TypedFloat | TypedString | TypedClass => Codec::UNSIGNED5
		}
	}
}

/// One instruction of a method's packed body, already classified by the scan pass.
#[derive(Debug, Clone, Copy)]
enum Site {
	Plain(u8),
	WithOperand(u8, RealOperandShape),
	Branch { op: u8, wide: bool },
	Wide { sub_opcode: u8 },
	Implicit { real_opcode: u8, sink: ImplicitSink, prefix_aload_0: bool },
	InitRef { real_opcode: u8 },
	TypedLdc { real_opcode: u8, tag: CpRefTag, wide: bool },
	RefEscape,
	ByteEscape,
	TableSwitch,
	LookupSwitch
}

/// A single method's packed instruction sequence, as recorded by the scan pass.
#[derive(Debug, Clone, Default)]
struct MethodSites {
	sites: Vec<Site>
}

/// Per-segment tallies of how many values each operand band must supply, plus the
/// per-method site lists needed to replay the scan during assembly.
#[derive(Debug, Clone, Default)]
struct ScanResult {
	counts: HashMap<OperandKind, usize>,
	methods: Vec<MethodSites>
}

fn bump(counts: &mut HashMap<OperandKind, usize>, kind: OperandKind, by: usize) {
	*counts.entry(kind).or_insert(0) += by;
}

/// Scans the packed code of `method_count` consecutive methods from the shared bytecode
/// reader, classifying every instruction without decoding any operand bands yet.
fn scan<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	method_count: usize,
	base_offset: u64
) -> Result<ScanResult, DecodeError> {
	let mut result = ScanResult::default();

	for _ in 0..method_count {
		let mut sites = Vec::new();
		loop {
			let raw = Codec::BYTE1
				.decode_one(reader, &mut 0)
				.map_err(|e| DecodeError::from_bitstream(e, "bc.codes", base_offset))?;
			let opcode = raw as u8;
			if opcode == opcodes::END_OF_METHOD {
				break;
			}

			if opcode == opcodes::WIDE {
				let sub_raw = Codec::BYTE1
					.decode_one(reader, &mut 0)
					.map_err(|e| DecodeError::from_bitstream(e, "bc.codes", base_offset))?;
				let sub_opcode = sub_raw as u8;
				if !opcodes::is_wide_eligible(sub_opcode) {
					return Err(DecodeError::Inconsistent {
						position: DecodePosition::new("bc.codes", base_offset),
						detail: format!("opcode {sub_opcode} cannot follow wide")
					});
				}
				bump(&mut result.counts, OperandKind::LocalWide, 1);
				if sub_opcode == opcodes::IINC {
					bump(&mut result.counts, OperandKind::IincConstWide, 1);
				}
				sites.push(Site::Wide { sub_opcode });
				continue;
			}

			if opcode == opcodes::TABLESWITCH || opcode == opcodes::LOOKUPSWITCH {
				bump(&mut result.counts, OperandKind::CaseCount, 1);
				// The number of case/label entries depends on a count we cannot read
				// until the assemble pass decodes `CaseCount`; the label and case-value
				// tallies for switches are therefore resolved after all `CaseCount`
				// values are known, in `reconcile_switch_tallies`.
				sites.push(if opcode == opcodes::TABLESWITCH {
					Site::TableSwitch
				} else {
					Site::LookupSwitch
				});
				continue;
			}

			match opcodes::classify(opcode) {
				PackedOpcode::Real(op) => {
					let shape = opcodes::real_operand_shape(op);
					// Branches are handled by their own `Site` variant rather than the
					// generic `WithOperand` path, since resolving their target requires
					// the whole method's instruction map and so is deferred to a second
					// pass over `pending_branches`, not decoded inline like other operands.
					if matches!(shape, RealOperandShape::Branch | RealOperandShape::WideBranch) {
						bump(&mut result.counts, OperandKind::Label, 1);
						sites.push(Site::Branch { op, wide: matches!(shape, RealOperandShape::WideBranch) });
					} else {
						tally_real_shape(&mut result.counts, shape);
						sites.push(Site::WithOperand(op, shape));
					}
				}
				PackedOpcode::ImplicitMember { real_opcode, sink, prefix_aload_0 } => {
					let kind = match sink {
						ImplicitSink::ThisField => OperandKind::ThisField,
						ImplicitSink::ThisMethod => OperandKind::ThisMethod,
						ImplicitSink::SuperField => OperandKind::SuperField,
						ImplicitSink::SuperMethod => OperandKind::SuperMethod,
						ImplicitSink::InitRef => OperandKind::InitRef
					};
					bump(&mut result.counts, kind, 1);
					sites.push(Site::Implicit { real_opcode, sink, prefix_aload_0 });
				}
				PackedOpcode::InitRef { real_opcode } => {
					bump(&mut result.counts, OperandKind::InitRef, 1);
					sites.push(Site::InitRef { real_opcode });
				}
				PackedOpcode::TypedLdc { real_opcode, tag, wide } => {
					let kind = match tag {
						CpRefTag::Int => OperandKind::TypedInt,
						CpRefTag::Float => OperandKind::TypedFloat,
						CpRefTag::String => OperandKind::TypedString,
						CpRefTag::Class => OperandKind::TypedClass
					};
					bump(&mut result.counts, kind, 1);
					sites.push(Site::TypedLdc { real_opcode, tag, wide });
				}
				PackedOpcode::RefEscape => {
					bump(&mut result.counts, OperandKind::EscRef, 1);
					sites.push(Site::RefEscape);
				}
				PackedOpcode::ByteEscape => {
					bump(&mut result.counts, OperandKind::EscSize, 1);
					sites.push(Site::ByteEscape);
				}
			}
		}
		result.methods.push(MethodSites { sites });
	}

	Ok(result)
}

fn tally_real_shape(counts: &mut HashMap<OperandKind, usize>, shape: RealOperandShape) {
	use RealOperandShape::*;
	match shape {
		None => {}
		Byte => bump(counts, OperandKind::Byte, 1),
		Short => bump(counts, OperandKind::Short, 1),
		LdcRef | CpRef => bump(counts, OperandKind::ClassRef, 1),
		FieldRef => bump(counts, OperandKind::FieldRef, 1),
		MethodRef => bump(counts, OperandKind::MethodRef, 1),
		InterfaceMethodRef => bump(counts, OperandKind::ImethodRef, 1),
		DynamicRef => {}
		Local => bump(counts, OperandKind::Local, 1),
		IncLocal => {
			bump(counts, OperandKind::Local, 1);
			bump(counts, OperandKind::IincConst, 1);
		}
		// Branches never reach this function; `scan` routes them to `Site::Branch` before
		// calling `tally_real_shape`, since resolving their target needs the full method.
		Branch | WideBranch => unreachable!("branch shapes are tallied in scan, not here"),
		TableSwitch | LookupSwitch => {}
		MultiANewArray => {
			bump(counts, OperandKind::ClassRef, 1);
			bump(counts, OperandKind::Byte, 1);
		}
	}
}

/// Cursors into the decoded operand bands, advanced in lockstep as the assemble pass
/// replays each method's site list.
///
/// Two bands cannot be sized purely from the scan pass's instruction tallies, because
/// their element counts are themselves data carried in an earlier band: `Label`/
/// `CaseValue` need each switch's `CaseCount` value, and `EscByte` needs the sum of every
/// `EscSize` value. `decode` resolves both dependencies by decoding `CaseCount` and
/// `EscSize` first and deriving the remaining counts from their values, before decoding
/// the rest of [`BAND_ORDER`] — still a single left-to-right pass over the shared reader,
/// just with two of its counts computed along the way instead of up front.
struct Bands {
	values: HashMap<OperandKind, Vec<i64>>,
	cursors: HashMap<OperandKind, usize>,
	/// Each table- or lookup-switch's resolved case count, in the order the switches
	/// appear in the segment; consumed one at a time as `assemble_method` reaches each
	/// switch site, instead of re-reading `CaseCount` out of `values`.
	switch_case_counts: Vec<i64>,
	switch_cursor: usize
}

/// The fixed order the BC sub-bands are laid out in the packed stream. Every band shares
/// one sequential reader, so this order — not the arbitrary order [`HashMap`] iteration
/// would give — is what `Bands::decode` must follow. `CaseCount` and `EscSize` are listed
/// for documentation but are actually decoded ahead of this loop, since later bands'
/// counts depend on their values.
const BAND_ORDER: &[OperandKind] = &[
	OperandKind::CaseCount,
	OperandKind::CaseValue,
	OperandKind::Label,
	OperandKind::Byte,
	OperandKind::Short,
	OperandKind::Local,
	OperandKind::LocalWide,
	OperandKind::IincConst,
	OperandKind::IincConstWide,
	OperandKind::ClassRef,
	OperandKind::FieldRef,
	OperandKind::MethodRef,
	OperandKind::ImethodRef,
	OperandKind::ThisField,
	OperandKind::ThisMethod,
	OperandKind::SuperField,
	OperandKind::SuperMethod,
	OperandKind::InitRef,
	OperandKind::TypedInt,
	OperandKind::TypedFloat,
	OperandKind::TypedString,
	OperandKind::TypedClass,
	OperandKind::EscRef,
	OperandKind::EscSize,
	OperandKind::EscByte
];

impl Bands {
	fn decode<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		counts: &HashMap<OperandKind, usize>,
		methods: &[MethodSites],
		base_offset: u64
	) -> Result<Self, DecodeError> {
		let mut values = HashMap::new();

		let case_count_total = counts.get(&OperandKind::CaseCount).copied().unwrap_or(0);
		let case_counts = OperandKind::CaseCount
			.codec()
			.decode_band(reader, case_count_total)
			.map_err(|e| DecodeError::from_bitstream(e, "bc.casecount", base_offset))?;

		let mut case_counts_iter = case_counts.iter().copied();
		let mut extra_labels = 0usize;
		let mut extra_case_values = 0usize;
		let mut switch_case_counts = Vec::with_capacity(case_counts.len());
		for method in methods {
			for site in &method.sites {
				let cc = match site {
					Site::TableSwitch | Site::LookupSwitch => case_counts_iter.next().unwrap_or(0),
					_ => continue
				};
				let cases = cc.max(0) as usize;
				extra_labels += 1 + cases;
				extra_case_values += if matches!(site, Site::TableSwitch) { 1 } else { cases };
				switch_case_counts.push(cc);
			}
		}
		values.insert(OperandKind::CaseCount, case_counts);

		let esc_size_total = counts.get(&OperandKind::EscSize).copied().unwrap_or(0);
		let esc_sizes = OperandKind::EscSize
			.codec()
			.decode_band(reader, esc_size_total)
			.map_err(|e| DecodeError::from_bitstream(e, "bc.escsize", base_offset))?;
		let esc_byte_total: usize = esc_sizes.iter().map(|&n| n.max(0) as usize).sum();

		for &kind in BAND_ORDER {
			if kind == OperandKind::CaseCount || kind == OperandKind::EscSize {
				continue;
			}
			let mut count = counts.get(&kind).copied().unwrap_or(0);
			if kind == OperandKind::Label {
				count += extra_labels;
			}
			if kind == OperandKind::CaseValue {
				count += extra_case_values;
			}
			if kind == OperandKind::EscByte {
				count = esc_byte_total;
			}
			let decoded = kind
				.codec()
				.decode_band(reader, count)
				.map_err(|e| DecodeError::from_bitstream(e, "bc.bands", base_offset))?;
			values.insert(kind, decoded);
		}
		values.insert(OperandKind::EscSize, esc_sizes);

		Ok(Self {
			values,
			cursors: HashMap::new(),
			switch_case_counts,
			switch_cursor: 0
		})
	}

	fn next(&mut self, kind: OperandKind, band: &'static str, base_offset: u64) -> Result<i64, DecodeError> {
		let cursor = self.cursors.entry(kind).or_insert(0);
		let value = self
			.values
			.get(&kind)
			.and_then(|v| v.get(*cursor))
			.copied()
			.ok_or(DecodeError::Inconsistent {
				position: DecodePosition::new(band, base_offset),
				detail: format!("operand band {kind:?} exhausted")
			})?;
		*cursor += 1;
		Ok(value)
	}

	fn next_switch_case_count(&mut self, base_offset: u64) -> Result<i64, DecodeError> {
		let value = self.switch_case_counts.get(self.switch_cursor).copied().ok_or(
			DecodeError::Inconsistent {
				position: DecodePosition::new("bc.casecount", base_offset),
				detail: "switch case-count queue exhausted".to_string()
			}
		)?;
		self.switch_cursor += 1;
		Ok(value)
	}
}

/// One fully assembled method body: real bytecode bytes, and the instruction-index to
/// real-byte-offset map exception/line-number/local-variable tables are translated
/// through. The map has one entry per instruction plus a trailing entry equal to the
/// code's total length, for "past-end" references.
#[derive(Debug, Clone)]
pub struct DecodedCode {
	pub max_locals_from_descriptor_and_flags: u32,
	pub code: Vec<u8>,
	pub instr_to_real: Vec<u32>
}

impl DecodedCode {
	/// Resolves an instruction index to its real byte offset, clamping indices at or past
	/// the instruction count to the code's total length.
	pub fn resolve(&self, instr_index: i64) -> u32 {
		if instr_index < 0 {
			return 0;
		}
		let idx = instr_index as usize;
		self.instr_to_real
			.get(idx)
			.copied()
			.unwrap_or_else(|| *self.instr_to_real.last().unwrap_or(&0))
	}

	pub fn code_length(&self) -> u32 {
		self.code.len() as u32
	}
}

/// Resolves a segment-global constant-pool index to the class-local `u16` index it will
/// occupy, fabricating the class-local entry (and any ancestor entries it needs) the
/// first time a given global index is seen.
pub type ResolveCpIndex<'a> = dyn FnMut(usize) -> Result<u16, DecodeError> + 'a;

/// Everything `decode_segment_code` needs to know about one method ahead of time: whether
/// it has code at all, and, if so, the class it belongs to (for implicit `this`/`super`
/// references) and the signature-subpool index of its descriptor (for `invokeinterface`
/// argument counting and `max_locals` derivation).
#[derive(Debug, Clone, Copy)]
pub struct MethodCodeRequest {
	/// The method's position among [`super::class_bands::ClassBands::classes`], so the
	/// caller's per-class constant-pool resolver can be selected for this method alone.
	pub class_index: usize,
	pub this_class_global: usize,
	pub super_class_global: usize,
	pub signature_index: usize,
	/// Whether the method is `static`; non-static methods reserve local slot 0 for `this`.
	pub is_static: bool
}

/// Decodes the packed code of every method in the segment that has one, in class/method
/// declaration order. `resolve_cp_index` is handed `(request.class_index, global_index)` for
/// every constant-pool reference a method's bytecode makes, so the caller can keep one
/// class-local resolver per class while this function walks methods across all of them.
#[allow(clippy::too_many_arguments)]
pub fn decode_segment_code<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	requests: &[MethodCodeRequest],
	cp: &ConstantPool,
	resolve_cp_index: &mut dyn FnMut(usize, usize) -> Result<u16, DecodeError>,
	base_offset: u64
) -> Result<Vec<DecodedCode>, DecodeError> {
	let scan_result = scan(reader, requests.len(), base_offset)?;
	let mut bands = Bands::decode(reader, &scan_result.counts, &scan_result.methods, base_offset)?;

	requests
		.iter()
		.zip(scan_result.methods.iter())
		.map(|(request, sites)| {
			let mut resolver = |global: usize| resolve_cp_index(request.class_index, global);
			assemble_method(sites, request, cp, &mut bands, &mut resolver, base_offset)
		})
		.collect()
}

#[allow(clippy::too_many_arguments)]
fn assemble_method(
	method_sites: &MethodSites,
	request: &MethodCodeRequest,
	cp: &ConstantPool,
	bands: &mut Bands,
	resolve_cp_index: &mut ResolveCpIndex<'_>,
	base_offset: u64
) -> Result<DecodedCode, DecodeError> {
	let mut out = Vec::new();
	let mut instr_to_real = Vec::with_capacity(method_sites.sites.len() + 1);
	let mut pending_branches: Vec<(usize, i64, u8, i64)> = Vec::new(); // (out_pos, target_instr, width, source_instr)

	for (instr_index, site) in method_sites.sites.iter().enumerate() {
		instr_to_real.push(out.len() as u32);

		match *site {
			Site::Plain(op) => out.push(op),
			Site::WithOperand(op, shape) => {
				out.push(op);
				emit_real_operand(&mut out, shape, cp, bands, resolve_cp_index, base_offset)?;
			}
			Site::Branch { op, wide } => {
				out.push(op);
				let target_delta = bands.next(OperandKind::Label, "bc.label", base_offset)?;
				let target_instr = instr_index as i64 + target_delta;
				let width: u8 = if wide { 4 } else { 2 };
				pending_branches.push((out.len(), target_instr, width, instr_index as i64));
				if wide {
					out.extend_from_slice(&0i32.to_be_bytes());
				} else {
					out.extend_from_slice(&0i16.to_be_bytes());
				}
			}
			Site::Wide { sub_opcode } => {
				out.push(opcodes::WIDE);
				out.push(sub_opcode);
				let local = bands.next(OperandKind::LocalWide, "bc.local", base_offset)?;
				out.extend_from_slice(&(local as u16).to_be_bytes());
				if sub_opcode == opcodes::IINC {
					let inc = bands.next(OperandKind::IincConstWide, "bc.iinc", base_offset)?;
					out.extend_from_slice(&(inc as i16).to_be_bytes());
				}
			}
			Site::Implicit { real_opcode, sink, prefix_aload_0 } => {
				if prefix_aload_0 {
					out.push(0x2A); // aload_0
				}
				out.push(real_opcode);
				// The synthesized reference always resolves against this/super's own
				// field or method subpool slice, so `request.this_class_global` /
				// `request.super_class_global` (the owning class) are only needed by
				// callers that must know which class an implicit reference targets,
				// not by the resolution performed here.
				let kind = match sink {
					ImplicitSink::ThisField => OperandKind::ThisField,
					ImplicitSink::ThisMethod => OperandKind::ThisMethod,
					ImplicitSink::SuperField => OperandKind::SuperField,
					ImplicitSink::SuperMethod => OperandKind::SuperMethod,
					ImplicitSink::InitRef => OperandKind::InitRef
				};
				let local_ref = bands.next(kind, "bc.member", base_offset)? as usize;
				let is_field = matches!(sink, ImplicitSink::ThisField | ImplicitSink::SuperField);
				let subpool_offset = if is_field { cp.offsets.field } else { cp.offsets.method };
				let resolved = resolve_cp_index(subpool_offset + local_ref)?;
				out.extend_from_slice(&resolved.to_be_bytes());
			}
			Site::InitRef { real_opcode } => {
				out.push(real_opcode);
				let local_ref = bands.next(OperandKind::InitRef, "bc.init", base_offset)? as usize;
				let resolved = resolve_cp_index(cp.offsets.method + local_ref)?;
				out.extend_from_slice(&resolved.to_be_bytes());
			}
			Site::TypedLdc { real_opcode, tag, wide } => {
				out.push(real_opcode);
				let kind = match tag {
					CpRefTag::Int => OperandKind::TypedInt,
					CpRefTag::Float => OperandKind::TypedFloat,
					CpRefTag::String => OperandKind::TypedString,
					CpRefTag::Class => OperandKind::TypedClass
				};
				let subpool_offset = match tag {
					CpRefTag::Int => cp.offsets.int,
					CpRefTag::Float => cp.offsets.float,
					CpRefTag::String => cp.offsets.string,
					CpRefTag::Class => cp.offsets.class
				};
				let local_ref = bands.next(kind, "bc.ldc", base_offset)? as usize;
				let resolved = resolve_cp_index(subpool_offset + local_ref)?;
				if wide {
					out.extend_from_slice(&resolved.to_be_bytes());
				} else {
					out.push(resolved as u8);
				}
			}
			Site::RefEscape => {
				// A reference escape carries no real opcode of its own; it exists to let
				// an encoder splice a raw class-pool reference into the instruction
				// stream outside of any opcode this decoder otherwise recognizes.
				let local_ref = bands.next(OperandKind::EscRef, "bc.escref", base_offset)? as usize;
				let resolved = resolve_cp_index(cp.offsets.class + local_ref)?;
				out.extend_from_slice(&resolved.to_be_bytes());
			}
			Site::ByteEscape => {
				let size = bands.next(OperandKind::EscSize, "bc.escsize", base_offset)?;
				for _ in 0..size {
					let byte = bands.next(OperandKind::EscByte, "bc.escbyte", base_offset)?;
					out.push(byte as u8);
				}
			}
			Site::TableSwitch => {
				out.push(opcodes::TABLESWITCH);
				emit_table_switch(&mut out, instr_index, bands, &mut pending_branches, base_offset)?;
			}
			Site::LookupSwitch => {
				out.push(opcodes::LOOKUPSWITCH);
				emit_lookup_switch(&mut out, instr_index, bands, &mut pending_branches, base_offset)?;
			}
		}
	}

	instr_to_real.push(out.len() as u32);

	for (out_pos, target_instr, width, source_instr) in pending_branches {
		let source_real = instr_to_real[source_instr as usize] as i64;
		let target_real = instr_to_real
			.get(target_instr.max(0) as usize)
			.copied()
			.unwrap_or_else(|| *instr_to_real.last().unwrap()) as i64;
		let delta = target_real - source_real;
		match width {
			2 => {
				let delta16 = i16::try_from(delta).map_err(|_| DecodeError::OutOfRange {
					position: DecodePosition::new("bc.branch", base_offset),
					detail: format!("branch delta {delta} does not fit in a 2-byte offset")
				})?;
				out[out_pos..out_pos + 2].copy_from_slice(&delta16.to_be_bytes());
			}
			_ => {
				let delta32 = delta as i32;
				out[out_pos..out_pos + 4].copy_from_slice(&delta32.to_be_bytes());
			}
		}
	}

	Ok(DecodedCode {
		// The transmitted `max_locals` band excludes the slots the method signature already
		// implies: the receiver, when not static, plus one slot per parameter word.
		max_locals_from_descriptor_and_flags: parameter_word_count(
			&cp.utf8[cp.signature[request.signature_index].form]
		) + u32::from(!request.is_static),
		code: out,
		instr_to_real
	})
}

fn emit_real_operand(
	out: &mut Vec<u8>,
	shape: RealOperandShape,
	cp: &ConstantPool,
	bands: &mut Bands,
	resolve_cp_index: &mut ResolveCpIndex<'_>,
	base_offset: u64
) -> Result<(), DecodeError> {
	use RealOperandShape::*;
	match shape {
		None => {}
		Byte => out.push(bands.next(OperandKind::Byte, "bc.byte", base_offset)? as u8),
		Short => out.extend_from_slice(&(bands.next(OperandKind::Short, "bc.short", base_offset)? as i16).to_be_bytes()),
		LdcRef | CpRef => {
			let local = bands.next(OperandKind::ClassRef, "bc.classref", base_offset)? as usize;
			let resolved = resolve_cp_index(cp.offsets.class + local)?;
			if matches!(shape, LdcRef) {
				out.push(resolved as u8);
			} else {
				out.extend_from_slice(&resolved.to_be_bytes());
			}
		}
		FieldRef => {
			let local = bands.next(OperandKind::FieldRef, "bc.fieldref", base_offset)? as usize;
			let resolved = resolve_cp_index(cp.offsets.field + local)?;
			out.extend_from_slice(&resolved.to_be_bytes());
		}
		MethodRef => {
			let local = bands.next(OperandKind::MethodRef, "bc.methodref", base_offset)? as usize;
			let resolved = resolve_cp_index(cp.offsets.method + local)?;
			out.extend_from_slice(&resolved.to_be_bytes());
		}
		InterfaceMethodRef => {
			let local = bands.next(OperandKind::ImethodRef, "bc.imethodref", base_offset)? as usize;
			let resolved = resolve_cp_index(cp.offsets.imethod + local)?;
			out.extend_from_slice(&resolved.to_be_bytes());
			let entry = cp.imethod[local];
			let descriptor = &cp.descriptor[entry.descriptor];
			let words = parameter_word_count(&cp.utf8[cp.signature[descriptor.descriptor_type].form]);
			out.push((words + 1) as u8);
			out.push(0);
		}
		DynamicRef => {
			return Err(DecodeError::UnsupportedOption {
				position: DecodePosition::new("bc.dynamicref", base_offset),
				detail: "invokedynamic is not representable in this Pack200 constant-pool model".to_string()
			});
		}
		Local => {
			let local = bands.next(OperandKind::Local, "bc.local", base_offset)?;
			out.push(local as u8);
		}
		IncLocal => {
			let local = bands.next(OperandKind::Local, "bc.local", base_offset)?;
			let inc = bands.next(OperandKind::IincConst, "bc.iinc", base_offset)?;
			out.push(local as u8);
			out.push(inc as i8 as u8);
		}
		Branch | WideBranch => {
			unreachable!("branch operands are emitted via Site::Branch, never WithOperand")
		}
		TableSwitch | LookupSwitch => unreachable!("switches have their own emit path"),
		MultiANewArray => {
			let local = bands.next(OperandKind::ClassRef, "bc.classref", base_offset)? as usize;
			let resolved = resolve_cp_index(cp.offsets.class + local)?;
			out.extend_from_slice(&resolved.to_be_bytes());
			let dims = bands.next(OperandKind::Byte, "bc.dims", base_offset)?;
			out.push(dims as u8);
		}
	}
	Ok(())
}

fn emit_table_switch(
	out: &mut Vec<u8>,
	instr_index: usize,
	bands: &mut Bands,
	pending: &mut Vec<(usize, i64, u8, i64)>,
	base_offset: u64
) -> Result<(), DecodeError> {
	let case_count = bands.next(OperandKind::CaseCount, "bc.casecount", base_offset)?;
	let low = bands.next(OperandKind::CaseValue, "bc.casevalue", base_offset)?;
	let high = low + case_count - 1;

	pad_to_word_boundary(out);

	let default_target = bands.next(OperandKind::Label, "bc.label", base_offset)?;
	pending.push((out.len(), instr_index as i64 + default_target, 4, instr_index as i64));
	out.extend_from_slice(&0i32.to_be_bytes());

	out.extend_from_slice(&(low as i32).to_be_bytes());
	out.extend_from_slice(&(high as i32).to_be_bytes());

	for _ in 0..case_count {
		let target = bands.next(OperandKind::Label, "bc.label", base_offset)?;
		pending.push((out.len(), instr_index as i64 + target, 4, instr_index as i64));
		out.extend_from_slice(&0i32.to_be_bytes());
	}
	Ok(())
}

fn emit_lookup_switch(
	out: &mut Vec<u8>,
	instr_index: usize,
	bands: &mut Bands,
	pending: &mut Vec<(usize, i64, u8, i64)>,
	base_offset: u64
) -> Result<(), DecodeError> {
	let case_count = bands.next(OperandKind::CaseCount, "bc.casecount", base_offset)?;

	pad_to_word_boundary(out);

	let default_target = bands.next(OperandKind::Label, "bc.label", base_offset)?;
	pending.push((out.len(), instr_index as i64 + default_target, 4, instr_index as i64));
	out.extend_from_slice(&0i32.to_be_bytes());

	out.extend_from_slice(&(case_count as i32).to_be_bytes());

	let mut pairs = Vec::with_capacity(case_count as usize);
	for _ in 0..case_count {
		let key = bands.next(OperandKind::CaseValue, "bc.casevalue", base_offset)?;
		let target = bands.next(OperandKind::Label, "bc.label", base_offset)?;
		pairs.push((key, instr_index as i64 + target));
	}
	pairs.sort_by_key(|&(key, _)| key);

	for (key, target) in pairs {
		out.extend_from_slice(&(key as i32).to_be_bytes());
		pending.push((out.len(), target, 4, instr_index as i64));
		out.extend_from_slice(&0i32.to_be_bytes());
	}
	Ok(())
}

fn pad_to_word_boundary(out: &mut Vec<u8>) {
	// The switch opcode itself occupies one byte; padding brings the following
	// fixed-size fields onto a 4-byte boundary measured from the start of the method.
	while (out.len()) % 4 != 0 {
		out.push(0);
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	fn cp_with_one_method() -> ConstantPool {
		let mut cp = ConstantPool::default();
		cp.utf8 = vec!["()V".into()];
		cp.signature = vec![crate::segment::constant_pool::SignatureEntry { form: 0, classes: vec![] }];
		cp.offsets = crate::segment::constant_pool::ConstantPoolOffsets::default();
		cp
	}

	#[test]
	fn renumbers_a_forward_goto() {
		// Packed method: goto(+2 instructions), nop, nop, end-of-method.
		// goto(167) [label delta=2], nop(0), nop(0), END_OF_METHOD
		let packed = [167u8, 2, 0, 0, opcodes::END_OF_METHOD];
		let mut reader = ByteReader::new(Cursor::new(packed));
		let cp = cp_with_one_method();
		let requests = [MethodCodeRequest {
			class_index: 0,
			this_class_global: 0,
			super_class_global: 0,
			signature_index: 0,
			is_static: true
		}];
		let mut resolver = |_class_index: usize, _global: usize| Ok(0u16);

		let decoded = decode_segment_code(&mut reader, &requests, &cp, &mut resolver, 0).unwrap();
		let method = &decoded[0];

		assert_eq!(method.code[0], 167);
		let target = i16::from_be_bytes([method.code[1], method.code[2]]);
		// goto is at real offset 0, target instruction index 2 (the second nop) is at
		// real offset 3 (1 byte goto + 2 bytes operand).
		assert_eq!(target, 3);
	}

	#[test]
	fn wide_prefixing_an_ineligible_opcode_is_inconsistent() {
		// wide(196), nop(0) is not one of the opcodes wide may legally prefix.
		let packed = [opcodes::WIDE, 0u8, opcodes::END_OF_METHOD];
		let mut reader = ByteReader::new(Cursor::new(packed));

		let err = scan(&mut reader, 1, 0).unwrap_err();
		assert!(matches!(err, DecodeError::Inconsistent { .. }));
	}

	#[test]
	fn wide_iload_is_accepted() {
		// wide(196), iload(21), end-of-method; the local-index operand itself is a band
		// value resolved later, not part of the packed-code byte stream scanned here.
		let packed = [opcodes::WIDE, 0x15, opcodes::END_OF_METHOD];
		let mut reader = ByteReader::new(Cursor::new(packed));

		let result = scan(&mut reader, 1, 0).unwrap();
		assert_eq!(result.methods[0].sites.len(), 1);
	}
}
