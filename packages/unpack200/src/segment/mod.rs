//! Orchestrates every band family into fully assembled class files and resources.
//!
//! [`Segment::decode`] runs the bands in the fixed order the format transmits them: the
//! header and constant pool, attribute definitions, inner-class tuples, class shapes,
//! packed bytecode, the new-attribute bands (per `Class`/`Field`/`Method`/`Code` context,
//! in that order), and finally the file table. [`crate::decode_archive`] repeats this for
//! every segment concatenated in the underlying stream.

pub mod assembler;
pub mod attribute_defs;
pub mod bytecode;
pub mod class_bands;
pub mod constant_pool;
pub mod descriptor;
pub mod file_bands;
pub mod header;
pub mod inner_classes;
pub mod layout;
pub mod opcodes;

use log::debug;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::jar::JarEntry;
use crate::settings::{DecodeSettings, DeflateHintOverride};
use assembler::{
	attribute_info, synthesize_inner_classes_attribute, synthesize_source_file_attribute, AssembledClass, ClassPoolBuilder,
	MemberBytes
};
use attribute_defs::{AttributeDefinitions, Context};
use bytecode::{decode_segment_code, DecodedCode};
use class_bands::{ClassBands, ClassRecord, CodeShape};
use constant_pool::ConstantPool;
use file_bands::FileBands;
use header::SegmentHeader;
use inner_classes::{IcTuple, InnerClassBands};

/// Bit index reserved for `SourceFile` on the `Class` context; materialized specially
/// rather than through the generic layout interpreter, since an absent (but still
/// transmitted) reference means the name must be inferred rather than left null.
const SOURCE_FILE_BIT: u32 = 16;
/// Bit index reserved for `InnerClasses` on the `Class` context; its occurrence is
/// consumed to keep the bands aligned but its body is discarded in favor of the
/// segment-wide IC tuple table, which is what actually drives what gets emitted.
const INNER_CLASSES_BIT: u32 = 17;

/// One decoded segment: its header, plus every class file and resource it carries,
/// already assembled and in file-table order.
#[derive(Debug, Clone)]
pub struct Segment {
	pub header: SegmentHeader,
	pub entries: Vec<JarEntry>
}

impl Segment {
	/// Decodes one segment from `reader`, which must be positioned at the segment's own
	/// magic number. The byte offset used in error position hints is read off `reader`
	/// itself, so this works whether the segment is the first or a later one in a
	/// multi-segment archive.
	pub fn decode<R: std::io::Read>(reader: &mut ByteReader<R>, settings: &DecodeSettings) -> Result<Self, DecodeError> {
		let base_offset = reader.position();
		debug!("Decoding segment at byte offset {base_offset}");

		let header = SegmentHeader::read(reader, base_offset)?;
		reader.set_band_headers(header.band_headers.clone());
		let cp = ConstantPool::read(reader, &header.cp_counts, base_offset)?;
		let attr_defs = AttributeDefinitions::read(reader, &cp, base_offset)?;
		let ic_bands = InnerClassBands::read(reader, &cp, base_offset)?;
		let mut class_bands = ClassBands::read(reader, &header, &cp, base_offset)?;

		let mut pools: Vec<ClassPoolBuilder> = class_bands.classes.iter().map(|_| ClassPoolBuilder::new(&cp)).collect();

		let requests = class_bands.code_requests(&cp);
		let decoded_code = decode_segment_code(
			reader,
			&requests,
			&cp,
			&mut |class_index, global| pools[class_index].resolve(global),
			base_offset
		)?;
		class_bands.attach_code(decoded_code)?;

		let class_names = class_bands
			.classes
			.iter()
			.map(|class| class_name_of(&cp, class.this_class_global, base_offset))
			.collect::<Result<Vec<_>, _>>()?;

		let mut class_attrs = read_class_attributes(
			reader,
			&cp,
			&attr_defs,
			&class_bands.classes,
			&class_names,
			&ic_bands.tuples,
			&mut pools,
			base_offset
		)?;
		let mut field_attrs = read_field_attributes(reader, &cp, &attr_defs, &class_bands.classes, &mut pools, base_offset)?;
		let mut method_attrs = read_method_attributes(reader, &cp, &attr_defs, &class_bands.classes, &mut pools, base_offset)?;
		let mut code_attrs = read_code_attributes(reader, &cp, &attr_defs, &class_bands.classes, &mut pools, base_offset)?;

		let default_deflate = header.is_option_set(header::option_bits::DEFAULT_DEFLATE_HINT);
		let file_bands = FileBands::read(reader, &header, &cp, default_deflate, base_offset)?;

		let mut field_cursor = 0usize;
		let mut method_cursor = 0usize;
		let mut code_cursor = 0usize;
		let mut assembled_classes = Vec::with_capacity(class_bands.classes.len());

		for (class_index, class) in class_bands.classes.iter().enumerate() {
			let (this_class, super_class, interfaces) = {
				let pool = &mut pools[class_index];
				let this_class = pool.resolve(class.this_class_global)?;
				let super_class = match class.super_class_global {
					Some(global) => pool.resolve(global)?,
					None => 0
				};
				let interfaces = class
					.interfaces_global
					.iter()
					.map(|&global| pool.resolve(global))
					.collect::<Result<Vec<_>, _>>()?;
				(this_class, super_class, interfaces)
			};

			let mut fields = Vec::with_capacity(class.fields.len());
			for member in &class.fields {
				let pool = &mut pools[class_index];
				let descr = &cp.descriptor[member.descriptor_global - cp.offsets.descriptor];
				let name_index = pool.resolve(cp.offsets.utf8 + descr.name)?;
				let descriptor_index = pool.resolve(cp.offsets.signature + descr.descriptor_type)?;
				fields.push(MemberBytes {
					access_flags: (member.flags & 0xFFFF) as u16,
					name_index,
					descriptor_index,
					attributes: std::mem::take(&mut field_attrs[field_cursor])
				});
				field_cursor += 1;
			}

			let mut methods = Vec::with_capacity(class.methods.len());
			for method in &class.methods {
				let member = &method.member;
				let pool = &mut pools[class_index];
				let descr = &cp.descriptor[member.descriptor_global - cp.offsets.descriptor];
				let name_index = pool.resolve(cp.offsets.utf8 + descr.name)?;
				let descriptor_index = pool.resolve(cp.offsets.signature + descr.descriptor_type)?;

				let mut attributes = std::mem::take(&mut method_attrs[method_cursor]);
				method_cursor += 1;

				if let Some(shape) = &method.code {
					let nested = std::mem::take(&mut code_attrs[code_cursor]);
					code_cursor += 1;
					attributes.push(build_code_attribute(pool, shape, &nested)?);
				}

				methods.push(MemberBytes {
					access_flags: (member.flags & 0xFFFF) as u16,
					name_index,
					descriptor_index,
					attributes
				});
			}

			let assembled = AssembledClass {
				minor_version: header.default_class_minor_version,
				major_version: header.default_class_major_version,
				access_flags: (class.flags & 0xFFFF) as u16,
				this_class,
				super_class,
				interfaces,
				fields,
				methods,
				attributes: std::mem::take(&mut class_attrs[class_index])
			};
			assembled_classes.push(assembled.write(&pools[class_index]));
		}

		let entries = emit_jar_entries(&file_bands, &assembled_classes, &class_names, settings, base_offset)?;

		Ok(Self { header, entries })
	}
}

fn class_name_of(cp: &ConstantPool, this_class_global: usize, base_offset: u64) -> Result<String, DecodeError> {
	let local = this_class_global - cp.offsets.class;
	let utf8_index = *cp.class.get(local).ok_or(DecodeError::OutOfRange {
		position: DecodePosition::new("class.this_class", base_offset),
		detail: format!("class index {local} out of range")
	})?;
	cp.utf8
		.get(utf8_index)
		.cloned()
		.ok_or(DecodeError::OutOfRange {
			position: DecodePosition::new("class.this_class", base_offset),
			detail: format!("UTF-8 index {utf8_index} out of range")
		})
}

/// Materializes every `Class`-context attribute occurrence, in bit-index then
/// class-declaration order, as finished `attribute_info` blocks per class.
#[allow(clippy::too_many_arguments)]
fn read_class_attributes<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	cp: &ConstantPool,
	attr_defs: &AttributeDefinitions,
	classes: &[ClassRecord],
	class_names: &[String],
	ic_tuples: &[IcTuple],
	pools: &mut [ClassPoolBuilder],
	base_offset: u64
) -> Result<Vec<Vec<Vec<u8>>>, DecodeError> {
	let mut per_class: Vec<Vec<Vec<u8>>> = vec![Vec::new(); classes.len()];

	for (bit, layout) in attr_defs.for_context(Context::Class) {
		let matching: Vec<usize> = classes
			.iter()
			.enumerate()
			.filter(|(_, class)| bit < 64 && class.flags & (1u64 << bit) != 0)
			.map(|(index, _)| index)
			.collect();
		if matching.is_empty() {
			continue;
		}

		if bit == SOURCE_FILE_BIT {
			for &class_index in &matching {
				let raw = Codec::UNSIGNED5
					.decode_one(reader, &mut 0)
					.map_err(|e| DecodeError::from_bitstream(e, "attr.class.source_file", base_offset))?;
				let pool = &mut pools[class_index];
				let attr = if raw == 0 {
					synthesize_source_file_attribute(pool, &class_names[class_index])?
				} else {
					let name_index = pool.resolve(cp.offsets.utf8 + (raw - 1) as usize)?;
					attribute_info(pool, "SourceFile", name_index.to_be_bytes().to_vec())?
				};
				per_class[class_index].push(attr);
			}
			continue;
		}

		// Columnar read: every class carrying this attribute has its band(s) read in full
		// before any of them is assembled, matching the transmission order.
		let columns = layout::read_columns(&layout.nodes, reader, matching.len(), "attr.class", base_offset)?;
		let mut cursors = layout::make_cursors(&columns);

		for &class_index in &matching {
			let pool = &mut pools[class_index];
			let mut cp_resolver = |global: usize| pool.resolve(global);
			let attr = if bit == INNER_CLASSES_BIT {
				layout::assemble_occurrence(
					&layout.nodes,
					&mut cursors,
					cp,
					&mut cp_resolver,
					None,
					"attr.class.inner_classes",
					base_offset
				)?;
				synthesize_inner_classes_attribute(pool, cp, &class_names[class_index], ic_tuples)?
			} else {
				let body =
					layout::assemble_occurrence(&layout.nodes, &mut cursors, cp, &mut cp_resolver, None, "attr.class", base_offset)?;
				attribute_info(pool, &layout.name, body)?
			};

			per_class[class_index].push(attr);
		}
	}

	Ok(per_class)
}

/// Materializes every `Field`-context attribute occurrence, in bit-index then
/// class-bands declaration order (classes outer, fields inner).
fn read_field_attributes<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	cp: &ConstantPool,
	attr_defs: &AttributeDefinitions,
	classes: &[ClassRecord],
	pools: &mut [ClassPoolBuilder],
	base_offset: u64
) -> Result<Vec<Vec<Vec<u8>>>, DecodeError> {
	let entities: Vec<(usize, u64)> = classes
		.iter()
		.enumerate()
		.flat_map(|(class_index, class)| class.fields.iter().map(move |field| (class_index, field.flags)))
		.collect();
	let mut per_entity: Vec<Vec<Vec<u8>>> = vec![Vec::new(); entities.len()];

	for (bit, layout) in attr_defs.for_context(Context::Field) {
		let matching: Vec<usize> = entities
			.iter()
			.enumerate()
			.filter(|(_, &(_, flags))| bit < 64 && flags & (1u64 << bit) != 0)
			.map(|(index, _)| index)
			.collect();
		if matching.is_empty() {
			continue;
		}

		let columns = layout::read_columns(&layout.nodes, reader, matching.len(), "attr.field", base_offset)?;
		let mut cursors = layout::make_cursors(&columns);

		for &entity_index in &matching {
			let (class_index, _) = entities[entity_index];
			let pool = &mut pools[class_index];
			let mut cp_resolver = |global: usize| pool.resolve(global);
			let body = layout::assemble_occurrence(&layout.nodes, &mut cursors, cp, &mut cp_resolver, None, "attr.field", base_offset)?;
			let attr = attribute_info(pool, &layout.name, body)?;
			per_entity[entity_index].push(attr);
		}
	}

	Ok(per_entity)
}

/// Materializes every `Method`-context attribute occurrence, in bit-index then
/// class-bands declaration order.
fn read_method_attributes<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	cp: &ConstantPool,
	attr_defs: &AttributeDefinitions,
	classes: &[ClassRecord],
	pools: &mut [ClassPoolBuilder],
	base_offset: u64
) -> Result<Vec<Vec<Vec<u8>>>, DecodeError> {
	let entities: Vec<(usize, u64)> = classes
		.iter()
		.enumerate()
		.flat_map(|(class_index, class)| class.methods.iter().map(move |method| (class_index, method.member.flags)))
		.collect();
	let mut per_entity: Vec<Vec<Vec<u8>>> = vec![Vec::new(); entities.len()];

	for (bit, layout) in attr_defs.for_context(Context::Method) {
		let matching: Vec<usize> = entities
			.iter()
			.enumerate()
			.filter(|(_, &(_, flags))| bit < 64 && flags & (1u64 << bit) != 0)
			.map(|(index, _)| index)
			.collect();
		if matching.is_empty() {
			continue;
		}

		let columns = layout::read_columns(&layout.nodes, reader, matching.len(), "attr.method", base_offset)?;
		let mut cursors = layout::make_cursors(&columns);

		for &entity_index in &matching {
			let (class_index, _) = entities[entity_index];
			let pool = &mut pools[class_index];
			let mut cp_resolver = |global: usize| pool.resolve(global);
			let body = layout::assemble_occurrence(&layout.nodes, &mut cursors, cp, &mut cp_resolver, None, "attr.method", base_offset)?;
			let attr = attribute_info(pool, &layout.name, body)?;
			per_entity[entity_index].push(attr);
		}
	}

	Ok(per_entity)
}

/// Materializes every `Code`-context attribute occurrence (the nested attributes of a
/// method's `Code` attribute, e.g. `LineNumberTable`), translating `P`/`O` tokens through
/// each method's own [`DecodedCode::resolve`].
fn read_code_attributes<R: std::io::Read>(
	reader: &mut ByteReader<R>,
	cp: &ConstantPool,
	attr_defs: &AttributeDefinitions,
	classes: &[ClassRecord],
	pools: &mut [ClassPoolBuilder],
	base_offset: u64
) -> Result<Vec<Vec<Vec<u8>>>, DecodeError> {
	struct CodeEntity<'a> {
		class_index: usize,
		flags: u64,
		decoded: &'a DecodedCode
	}

	let entities: Vec<CodeEntity<'_>> = classes
		.iter()
		.enumerate()
		.flat_map(|(class_index, class)| {
			class.methods.iter().filter_map(move |method| {
				method.code.as_ref().map(|shape| CodeEntity {
					class_index,
					flags: shape.attribute_flags,
					decoded: shape
						.decoded
						.as_ref()
						.expect("bytecode bands attach a DecodedCode to every CodeShape before attributes are read")
				})
			})
		})
		.collect();
	let mut per_entity: Vec<Vec<Vec<u8>>> = vec![Vec::new(); entities.len()];

	for (bit, layout) in attr_defs.for_context(Context::Code) {
		let matching: Vec<usize> = entities
			.iter()
			.enumerate()
			.filter(|(_, entity)| bit < 64 && entity.flags & (1u64 << bit) != 0)
			.map(|(index, _)| index)
			.collect();
		if matching.is_empty() {
			continue;
		}

		let columns = layout::read_columns(&layout.nodes, reader, matching.len(), "attr.code", base_offset)?;
		let mut cursors = layout::make_cursors(&columns);

		for &entity_index in &matching {
			let entity = &entities[entity_index];
			let pool = &mut pools[entity.class_index];
			let decoded = entity.decoded;
			let mut cp_resolver = |global: usize| pool.resolve(global);
			let mut bci_resolver = |instr: i64| decoded.resolve(instr);
			let body = layout::assemble_occurrence(
				&layout.nodes,
				&mut cursors,
				cp,
				&mut cp_resolver,
				Some(&mut bci_resolver),
				"attr.code",
				base_offset
			)?;
			let attr = attribute_info(pool, &layout.name, body)?;
			per_entity[entity_index].push(attr);
		}
	}

	Ok(per_entity)
}

/// Builds a method's `Code` attribute: its shape plus whatever nested attributes were
/// materialized for it by [`read_code_attributes`].
fn build_code_attribute(
	pool: &mut ClassPoolBuilder<'_>,
	shape: &CodeShape,
	nested_attrs: &[Vec<u8>]
) -> Result<Vec<u8>, DecodeError> {
	let decoded = shape
		.decoded
		.as_ref()
		.expect("bytecode bands attach a DecodedCode to every CodeShape before assembly");

	// The transmitted `max_locals` excludes the slots the descriptor already implies; see
	// `bytecode::assemble_method`.
	let max_locals = shape.max_locals_explicit as u32 + decoded.max_locals_from_descriptor_and_flags;

	let mut body = Vec::new();
	body.extend_from_slice(&shape.max_stack.to_be_bytes());
	body.extend_from_slice(&(max_locals as u16).to_be_bytes());
	body.extend_from_slice(&decoded.code_length().to_be_bytes());
	body.extend_from_slice(&decoded.code);

	body.extend_from_slice(&(shape.handlers.len() as u16).to_be_bytes());
	for handler in &shape.handlers {
		let start_pc = decoded.resolve(handler.start_instr) as u16;
		let end_pc = decoded.resolve(handler.end_instr) as u16;
		let handler_pc = decoded.resolve(handler.handler_instr) as u16;
		let catch_type = match handler.catch_type_global {
			Some(global) => pool.resolve(global)?,
			None => 0
		};
		body.extend_from_slice(&start_pc.to_be_bytes());
		body.extend_from_slice(&end_pc.to_be_bytes());
		body.extend_from_slice(&handler_pc.to_be_bytes());
		body.extend_from_slice(&catch_type.to_be_bytes());
	}

	body.extend_from_slice(&(nested_attrs.len() as u16).to_be_bytes());
	for attr in nested_attrs {
		body.extend_from_slice(attr);
	}

	attribute_info(pool, "Code", body)
}

/// Walks the file table in its own declaration order, pairing each class-marked entry
/// with the next assembled class file in turn, and applies the host's deflate-hint
/// override on top of whatever the archive/file bands computed.
fn emit_jar_entries(
	file_bands: &FileBands,
	assembled_classes: &[Vec<u8>],
	class_names: &[String],
	settings: &DecodeSettings,
	base_offset: u64
) -> Result<Vec<JarEntry>, DecodeError> {
	let mut class_cursor = 0usize;
	let mut entries = Vec::with_capacity(file_bands.files.len());

	for file in &file_bands.files {
		let deflate = match settings.deflate_hint_override {
			DeflateHintOverride::On => true,
			DeflateHintOverride::Off => false,
			DeflateHintOverride::Auto => file.deflate
		};
		let modtime_ms = 1000 * file.modtime;

		let (name, bytes) = if file.is_class {
			let class_index = class_cursor;
			class_cursor += 1;
			let bytes = assembled_classes.get(class_index).ok_or(DecodeError::Inconsistent {
				position: DecodePosition::new("file.class", base_offset),
				detail: "more class file-table entries than classes decoded in this segment".to_string()
			})?;
			let name = file
				.name
				.clone()
				.unwrap_or_else(|| format!("{}.class", class_names[class_index]));
			(name, bytes.clone())
		} else {
			let name = file.name.clone().ok_or(DecodeError::Inconsistent {
				position: DecodePosition::new("file.resource", base_offset),
				detail: "a resource file entry carried no name".to_string()
			})?;
			let bytes = file.resource_bytes.clone().unwrap_or_default();
			(name, bytes)
		};

		entries.push(JarEntry::new(name, modtime_ms, deflate, bytes));
	}

	Ok(entries)
}
