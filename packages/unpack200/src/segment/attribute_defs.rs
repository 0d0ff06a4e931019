//! Attribute layout registration: the twelve built-in attributes (plus the four runtime
//! annotation attributes) at fixed bit indices, and user-defined layouts transmitted via
//! the attribute-definition bands.

use indexmap::IndexMap;
use log::trace;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;
use crate::segment::layout::{parse_layout, LayoutNode};

/// The four contexts a layout can be bound to, matching the low two bits of a
/// user-defined layout's header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
	Class,
	Field,
	Method,
	Code
}

impl Context {
	const fn from_low_bits(bits: u8) -> Self {
		match bits & 0b11 {
			0 => Self::Class,
			1 => Self::Field,
			2 => Self::Method,
			_ => Self::Code
		}
	}
}

/// One registered attribute layout: a name, the context it binds to, the bit index of the
/// entity flag word that signals its presence, and its parsed layout body (`None` for the
/// handful of standard attributes with hand-coded fixed shapes).
#[derive(Debug, Clone)]
pub struct AttributeLayout {
	pub name: String,
	pub context: Context,
	pub bit_index: u32,
	pub layout_string: String,
	pub nodes: Vec<LayoutNode>
}

// Class/field/method bit indices start at 16: bits 0-15 of those entities' flag words are
// the real JVM access flags (see `assembler::access_flags_of`), and every legal ACC_* bit
// the JVM defines for any of the three falls at or below bit 15, so starting attribute
// presence bits at 16 guarantees they never alias an access flag. `Code`'s own flag word
// carries no access-flag meaning, so its builtins keep the low bits.
const CLASS_BUILTINS: &[(u32, &str, &str)] = &[
	(16, "SourceFile", "RUNH"),
	(17, "InnerClasses", "NH[RCHRCNHRUNHH]"),
	(18, "EnclosingMethod", "RCHRDNH"),
	(19, "Signature", "RSH"),
	(20, "Deprecated", ""),
	(21, "RuntimeVisibleAnnotations", "NH[RUH(1)]"),
	(22, "RuntimeInvisibleAnnotations", "NH[RUH(1)]"),
	(23, "RuntimeVisibleTypeAnnotations", "NH[B]"),
	(24, "RuntimeInvisibleTypeAnnotations", "NH[B]")
];

const FIELD_BUILTINS: &[(u32, &str, &str)] = &[
	(16, "ConstantValue", "KQH"),
	(17, "Signature", "RSH"),
	(18, "Deprecated", ""),
	(19, "RuntimeVisibleAnnotations", "NH[RUH(1)]"),
	(20, "RuntimeInvisibleAnnotations", "NH[RUH(1)]"),
	(21, "RuntimeVisibleTypeAnnotations", "NH[B]"),
	(22, "RuntimeInvisibleTypeAnnotations", "NH[B]")
];

const METHOD_BUILTINS: &[(u32, &str, &str)] = &[
	(16, "Exceptions", "NH[RCH]"),
	(17, "Signature", "RSH"),
	(18, "Deprecated", ""),
	(19, "RuntimeVisibleAnnotations", "NH[RUH(1)]"),
	(20, "RuntimeInvisibleAnnotations", "NH[RUH(1)]"),
	(21, "RuntimeVisibleParameterAnnotations", "B"),
	(22, "RuntimeInvisibleParameterAnnotations", "B"),
	(23, "AnnotationDefault", "B"),
	(24, "MethodParameters", "B"),
	(25, "RuntimeVisibleTypeAnnotations", "NH[B]"),
	(26, "RuntimeInvisibleTypeAnnotations", "NH[B]")
];

const CODE_BUILTINS: &[(u32, &str, &str)] = &[
	(0, "LineNumberTable", "NH[PHH]"),
	(1, "LocalVariableTable", "NH[PHOHRUHRUHH]"),
	(2, "LocalVariableTypeTable", "NH[PHOHRUHRSHH]")
];

/// The header bit assigned to the always-present `Code` attribute on methods; `Code` is
/// not transmitted through the layout interpreter at all (its shape is hand-coded in
/// `class_bands`), but still reserves a context+bit pair so user-defined layouts never
/// collide with it.
pub const CODE_ATTRIBUTE_BIT: u32 = 31;

/// The registered layouts for a single segment, keyed by `(context, bit_index)`.
#[derive(Debug, Clone, Default)]
pub struct AttributeDefinitions {
	layouts: IndexMap<(Context, u32), AttributeLayout>
}

impl AttributeDefinitions {
	/// Builds the table of built-in layouts, with no user-defined layouts registered yet.
	pub fn with_builtins() -> Result<Self, DecodeError> {
		let mut table = Self::default();
		for &(bit, name, layout) in CLASS_BUILTINS {
			table.insert_builtin(Context::Class, bit, name, layout)?;
		}
		for &(bit, name, layout) in FIELD_BUILTINS {
			table.insert_builtin(Context::Field, bit, name, layout)?;
		}
		for &(bit, name, layout) in METHOD_BUILTINS {
			table.insert_builtin(Context::Method, bit, name, layout)?;
		}
		for &(bit, name, layout) in CODE_BUILTINS {
			table.insert_builtin(Context::Code, bit, name, layout)?;
		}
		Ok(table)
	}

	fn insert_builtin(
		&mut self,
		context: Context,
		bit_index: u32,
		name: &str,
		layout_string: &str
	) -> Result<(), DecodeError> {
		let nodes = if layout_string.is_empty() {
			Vec::new()
		} else {
			parse_layout(layout_string, "attr_defs.builtin", 0)?
		};
		self.layouts.insert(
			(context, bit_index),
			AttributeLayout {
				name: name.to_string(),
				context,
				bit_index,
				layout_string: layout_string.to_string(),
				nodes
			}
		);
		Ok(())
	}

	/// Reads the user-defined attribute-definition bands, registering each layout
	/// transmitted by the segment on top of the built-in table.
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		cp: &ConstantPool,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		let mut table = Self::with_builtins()?;

		let attr_count = Codec::UNSIGNED5
			.decode_one(reader, &mut 0)
			.map_err(|e| DecodeError::from_bitstream(e, "attr_defs.count", base_offset))?;
		if attr_count == 0 {
			return Ok(table);
		}

		let header_bytes = Codec::BYTE1
			.decode_band(reader, attr_count as usize)
			.map_err(|e| DecodeError::from_bitstream(e, "attr_defs.header", base_offset))?;
		let name_refs = Codec::UNSIGNED5
			.decode_band(reader, attr_count as usize)
			.map_err(|e| DecodeError::from_bitstream(e, "attr_defs.name", base_offset))?;
		let layout_refs = Codec::UNSIGNED5
			.decode_band(reader, attr_count as usize)
			.map_err(|e| DecodeError::from_bitstream(e, "attr_defs.layout", base_offset))?;

		// Every context's overflow slots start at bit 32 regardless of whether that
		// context's own high-flags option is set; a user-defined layout landing past bit
		// 63 for a context whose high flags are disabled is simply unrepresentable, and
		// surfaces as an out-of-range flag word later rather than here.
		let mut next_overflow = [32u32; 4];

		for ((&header_byte, &name_ref), &layout_ref) in
			header_bytes.iter().zip(&name_refs).zip(&layout_refs)
		{
			let context = Context::from_low_bits(header_byte as u8);
			let high = (header_byte as u8) >> 2;

			let bit_index = if high == 0 {
				let slot = &mut next_overflow[context_slot(context)];
				let assigned = *slot;
				*slot += 1;
				assigned
			} else {
				(high as u32) - 1
			};

			let name = cp
				.utf8
				.get(name_ref as usize)
				.cloned()
				.ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("attr_defs.name", base_offset),
					detail: format!("attribute name index {name_ref} out of range")
				})?;
			let layout_string =
				cp.utf8
					.get(layout_ref as usize)
					.cloned()
					.ok_or(DecodeError::OutOfRange {
						position: DecodePosition::new("attr_defs.layout", base_offset),
						detail: format!("attribute layout index {layout_ref} out of range")
					})?;

			trace!("Registering user-defined attribute '{name}' at {context:?}:{bit_index} = \"{layout_string}\"");

			let nodes = parse_layout(&layout_string, "attr_defs.layout", base_offset)?;
			table.layouts.insert(
				(context, bit_index),
				AttributeLayout {
					name,
					context,
					bit_index,
					layout_string,
					nodes
				}
			);
		}

		Ok(table)
	}

	/// Every layout registered for `context`, in bit-index order, as `(bit, layout)` pairs.
	pub fn for_context(&self, context: Context) -> Vec<(u32, &AttributeLayout)> {
		let mut entries: Vec<_> = self
			.layouts
			.iter()
			.filter(|((ctx, _), _)| *ctx == context)
			.map(|((_, bit), layout)| (*bit, layout))
			.collect();
		entries.sort_by_key(|(bit, _)| *bit);
		entries
	}

	pub fn get(&self, context: Context, bit_index: u32) -> Option<&AttributeLayout> {
		self.layouts.get(&(context, bit_index))
	}
}

const fn context_slot(context: Context) -> usize {
	match context {
		Context::Class => 0,
		Context::Field => 1,
		Context::Method => 2,
		Context::Code => 3
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtins_cover_the_twelve_standard_attributes_and_runtime_annotations() {
		let table = AttributeDefinitions::with_builtins().unwrap();
		assert!(table.get(Context::Class, 16).is_some());
		assert_eq!(table.get(Context::Class, 16).unwrap().name, "SourceFile");
		assert!(table.get(Context::Field, 16).is_some());
		assert_eq!(table.get(Context::Field, 16).unwrap().name, "ConstantValue");
		assert!(table.get(Context::Method, 23).is_some());
		assert_eq!(table.get(Context::Method, 23).unwrap().name, "AnnotationDefault");
		assert!(table.get(Context::Code, 0).is_some());
		assert_eq!(table.get(Context::Code, 0).unwrap().name, "LineNumberTable");
	}

	#[test]
	fn for_context_returns_layouts_sorted_by_bit_index() {
		let table = AttributeDefinitions::with_builtins().unwrap();
		let class_layouts = table.for_context(Context::Class);
		let bits: Vec<u32> = class_layouts.iter().map(|(bit, _)| *bit).collect();
		let mut sorted = bits.clone();
		sorted.sort_unstable();
		assert_eq!(bits, sorted);
	}
}
