//! Assembles decoded segment state into real JVM class files.
//!
//! The hard part is the constant pool: each class gets its own pool, built lazily and in
//! resolution order as the bytecode and attribute bands reference segment-global indices,
//! rather than copying the segment's pool wholesale (most of it is irrelevant to any given
//! class). [`ClassPoolBuilder`] does that, memoizing each global index's assigned
//! class-local `u16` the first time something asks for it so that shared entries (a
//! `java/lang/Object` class reference, say) are only written once.

use indexmap::IndexMap;

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;

/// Which of the twelve segment subpools a global index falls into, with its local index
/// already extracted.
enum Subpool {
	Utf8(usize),
	Int(usize),
	Float(usize),
	Long(usize),
	Double(usize),
	StringRef(usize),
	ClassRef(usize),
	Signature(usize),
	Descriptor(usize),
	Field(usize),
	Method(usize),
	Imethod(usize)
}

fn locate(cp: &ConstantPool, global: usize) -> Subpool {
	let o = &cp.offsets;
	if global < o.int {
		Subpool::Utf8(global - o.utf8)
	} else if global < o.float {
		Subpool::Int(global - o.int)
	} else if global < o.long {
		Subpool::Float(global - o.float)
	} else if global < o.double {
		Subpool::Long(global - o.long)
	} else if global < o.string {
		Subpool::Double(global - o.double)
	} else if global < o.class {
		Subpool::StringRef(global - o.string)
	} else if global < o.signature {
		Subpool::ClassRef(global - o.class)
	} else if global < o.descriptor {
		Subpool::Signature(global - o.signature)
	} else if global < o.field {
		Subpool::Descriptor(global - o.descriptor)
	} else if global < o.method {
		Subpool::Field(global - o.field)
	} else if global < o.imethod {
		Subpool::Method(global - o.method)
	} else {
		Subpool::Imethod(global - o.imethod)
	}
}

/// Reconstructs a `Signature` subpool entry's full type string by substituting each `L`
/// placeholder in its form with the referenced class's binary name.
fn reconstruct_signature(cp: &ConstantPool, signature_local: usize) -> Result<String, DecodeError> {
	let entry = cp.signature.get(signature_local).ok_or(DecodeError::OutOfRange {
		position: DecodePosition::new("cp.signature", 0),
		detail: format!("signature index {signature_local} out of range")
	})?;
	let form = cp.utf8.get(entry.form).ok_or(DecodeError::OutOfRange {
		position: DecodePosition::new("cp.signature", 0),
		detail: format!("UTF-8 index {} out of range", entry.form)
	})?;

	let mut out = String::with_capacity(form.len() + entry.classes.len() * 8);
	let mut slot = 0;
	for c in form.chars() {
		if c == 'L' {
			let class_local = *entry.classes.get(slot).ok_or(DecodeError::Inconsistent {
				position: DecodePosition::new("cp.signature", 0),
				detail: "signature form names more class slots than it has class references".to_string()
			})?;
			slot += 1;
			let utf8_idx = *cp.class.get(class_local).ok_or(DecodeError::OutOfRange {
				position: DecodePosition::new("cp.signature", 0),
				detail: format!("class index {class_local} out of range")
			})?;
			let name = cp.utf8.get(utf8_idx).ok_or(DecodeError::OutOfRange {
				position: DecodePosition::new("cp.signature", 0),
				detail: format!("UTF-8 index {utf8_idx} out of range")
			})?;
			out.push('L');
			out.push_str(name);
			out.push(';');
		} else {
			out.push(c);
		}
	}
	Ok(out)
}

/// Builds one class's constant pool on demand, mapping segment-global indices (and
/// directly-supplied literal strings) to the `u16` index they end up at in the class file
/// being assembled.
pub struct ClassPoolBuilder<'cp> {
	cp: &'cp ConstantPool,
	memo: IndexMap<usize, u16>,
	literal_memo: IndexMap<String, u16>,
	class_name_memo: IndexMap<String, u16>,
	entries: Vec<Vec<u8>>,
	next_index: u16
}

impl<'cp> ClassPoolBuilder<'cp> {
	pub fn new(cp: &'cp ConstantPool) -> Self {
		Self {
			cp,
			memo: IndexMap::new(),
			literal_memo: IndexMap::new(),
			class_name_memo: IndexMap::new(),
			entries: Vec::new(),
			next_index: 1
		}
	}

	/// Resolves a segment-global constant-pool index to this class's local `u16` index,
	/// fabricating the entry (and recursively, anything it depends on) the first time it is
	/// asked for. Suitable for passing as a [`super::layout::eval::ResolveCpIndex`].
	pub fn resolve(&mut self, global: usize) -> Result<u16, DecodeError> {
		if let Some(&index) = self.memo.get(&global) {
			return Ok(index);
		}

		// A class reached by global index and one interned by bare literal name (see
		// `resolve_class_by_name`) must land on the same entry, so this case is resolved
		// through the name memo rather than falling into the generic push below.
		if let Subpool::ClassRef(local) = locate(self.cp, global) {
			let utf8_idx = *self.cp.class.get(local).ok_or(DecodeError::OutOfRange {
				position: DecodePosition::new("cp.class", 0),
				detail: format!("class index {local} out of range")
			})?;
			let name = self.cp.utf8.get(utf8_idx).ok_or(DecodeError::OutOfRange {
				position: DecodePosition::new("cp.class", 0),
				detail: format!("UTF-8 index {utf8_idx} out of range")
			})?;
			let index = self.resolve_class_by_name(name)?;
			self.memo.insert(global, index);
			return Ok(index);
		}

		let (tag, width, bytes) = match locate(self.cp, global) {
			Subpool::Utf8(local) => {
				let s = self.cp.utf8.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.utf8", 0),
					detail: format!("UTF-8 index {local} out of range")
				})?;
				(TAG_UTF8, 1, utf8_entry_body(s))
			}
			Subpool::Int(local) => {
				let v = *self.cp.int.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.int", 0),
					detail: format!("int index {local} out of range")
				})?;
				(TAG_INTEGER, 1, v.to_be_bytes().to_vec())
			}
			Subpool::Float(local) => {
				let v = *self.cp.float.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.float", 0),
					detail: format!("float index {local} out of range")
				})?;
				(TAG_FLOAT, 1, v.to_bits().to_be_bytes().to_vec())
			}
			Subpool::Long(local) => {
				let v = *self.cp.long.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.long", 0),
					detail: format!("long index {local} out of range")
				})?;
				(TAG_LONG, 2, v.to_be_bytes().to_vec())
			}
			Subpool::Double(local) => {
				let v = *self.cp.double.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.double", 0),
					detail: format!("double index {local} out of range")
				})?;
				(TAG_DOUBLE, 2, v.to_bits().to_be_bytes().to_vec())
			}
			Subpool::StringRef(local) => {
				let utf8_idx = *self.cp.string.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.string", 0),
					detail: format!("string index {local} out of range")
				})?;
				let utf8_index = self.resolve(self.cp.offsets.utf8 + utf8_idx)?;
				(TAG_STRING, 1, utf8_index.to_be_bytes().to_vec())
			}
			Subpool::ClassRef(_) => unreachable!("ClassRef is resolved through resolve_class_by_name above"),
			Subpool::Signature(local) => {
				let s = reconstruct_signature(self.cp, local)?;
				(TAG_UTF8, 1, utf8_entry_body(&s))
			}
			Subpool::Descriptor(local) => {
				let entry = self.cp.descriptor.get(local).ok_or(DecodeError::OutOfRange {
					position: DecodePosition::new("cp.descriptor", 0),
					detail: format!("descriptor index {local} out of range")
				})?;
				let name_index = self.resolve(self.cp.offsets.utf8 + entry.name)?;
				let type_index = self.resolve(self.cp.offsets.signature + entry.descriptor_type)?;
				let mut body = name_index.to_be_bytes().to_vec();
				body.extend_from_slice(&type_index.to_be_bytes());
				(TAG_NAME_AND_TYPE, 1, body)
			}
			Subpool::Field(local) => self.resolve_ref_entry(local, TAG_FIELDREF, "cp.field")?,
			Subpool::Method(local) => self.resolve_ref_entry(local, TAG_METHODREF, "cp.method")?,
			Subpool::Imethod(local) => self.resolve_ref_entry(local, TAG_INTERFACE_METHODREF, "cp.imethod")?
		};

		self.push_entry(tag, width, bytes, Some(global))
	}

	fn resolve_ref_entry(&mut self, local: usize, tag: u8, band: &'static str) -> Result<(u8, u16, Vec<u8>), DecodeError> {
		let refs = match tag {
			TAG_FIELDREF => &self.cp.field,
			TAG_METHODREF => &self.cp.method,
			_ => &self.cp.imethod
		};
		let entry = *refs.get(local).ok_or(DecodeError::OutOfRange {
			position: DecodePosition::new(band, 0),
			detail: format!("ref index {local} out of range")
		})?;

		let class_index = self.resolve(self.cp.offsets.class + entry.class)?;
		let descriptor_index = self.resolve(self.cp.offsets.descriptor + entry.descriptor)?;
		let mut body = class_index.to_be_bytes().to_vec();
		body.extend_from_slice(&descriptor_index.to_be_bytes());
		Ok((tag, 1, body))
	}

	/// Interns a class by its binary name, independent of any segment-global index,
	/// memoizing by name so that a class reached both this way (e.g. from an
	/// `InnerClasses` tuple) and by global index (via [`Self::resolve`]) still dedups to a
	/// single `Class` entry.
	pub fn resolve_class_by_name(&mut self, name: &str) -> Result<u16, DecodeError> {
		if let Some(&index) = self.class_name_memo.get(name) {
			return Ok(index);
		}
		let utf8_index = self.resolve_utf8_literal(name)?;
		let index = self.push_entry(TAG_CLASS, 1, utf8_index.to_be_bytes().to_vec(), None)?;
		self.class_name_memo.insert(name.to_string(), index);
		Ok(index)
	}

	/// Interns a literal UTF-8 string (an attribute name like `SourceFile`, or a
	/// synthesized descriptor) as a `Utf8` entry, independent of any segment-global index.
	pub fn resolve_utf8_literal(&mut self, s: &str) -> Result<u16, DecodeError> {
		if let Some(&index) = self.literal_memo.get(s) {
			return Ok(index);
		}
		let index = self.push_entry(TAG_UTF8, 1, utf8_entry_body(s), None)?;
		self.literal_memo.insert(s.to_string(), index);
		Ok(index)
	}

	fn push_entry(&mut self, tag: u8, width: u16, payload: Vec<u8>, global: Option<usize>) -> Result<u16, DecodeError> {
		let index = self.next_index;
		let mut entry = Vec::with_capacity(payload.len() + 1);
		entry.push(tag);
		entry.extend_from_slice(&payload);
		self.entries.push(entry);
		if let Some(global) = global {
			self.memo.insert(global, index);
		}
		self.next_index = self
			.next_index
			.checked_add(width)
			.ok_or(DecodeError::Inconsistent {
				position: DecodePosition::new("cp.assemble", 0),
				detail: "class constant pool overflowed 65535 entries".to_string()
			})?;
		Ok(index)
	}

	/// The final `constant_pool_count` (one more than the highest assigned index, per the
	/// class file format's off-by-one convention).
	pub fn count(&self) -> u16 {
		self.next_index
	}

	/// Serializes every entry created so far, in assignment order (which is also class-file
	/// index order).
	pub fn write_to(&self, out: &mut Vec<u8>) {
		for entry in &self.entries {
			out.extend_from_slice(entry);
		}
	}
}

fn utf8_entry_body(s: &str) -> Vec<u8> {
	let bytes = s.as_bytes();
	let mut body = Vec::with_capacity(bytes.len() + 2);
	body.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
	body.extend_from_slice(bytes);
	body
}

/// A fully materialized member (`field_info`/`method_info`): access flags, name, descriptor,
/// and pre-serialized `attribute_info` entries.
pub struct MemberBytes {
	pub access_flags: u16,
	pub name_index: u16,
	pub descriptor_index: u16,
	pub attributes: Vec<Vec<u8>>
}

impl MemberBytes {
	fn write_to(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.access_flags.to_be_bytes());
		out.extend_from_slice(&self.name_index.to_be_bytes());
		out.extend_from_slice(&self.descriptor_index.to_be_bytes());
		out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
		for attr in &self.attributes {
			out.extend_from_slice(attr);
		}
	}
}

/// A fully materialized class file, ready to be serialized.
pub struct AssembledClass {
	pub minor_version: u16,
	pub major_version: u16,
	pub access_flags: u16,
	pub this_class: u16,
	pub super_class: u16,
	pub interfaces: Vec<u16>,
	pub fields: Vec<MemberBytes>,
	pub methods: Vec<MemberBytes>,
	pub attributes: Vec<Vec<u8>>
}

impl AssembledClass {
	/// Serializes the class, prefixed by `pool`'s entries, into a complete `.class` file.
	pub fn write(&self, pool: &ClassPoolBuilder<'_>) -> Vec<u8> {
		let mut out = Vec::new();
		out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
		out.extend_from_slice(&self.minor_version.to_be_bytes());
		out.extend_from_slice(&self.major_version.to_be_bytes());

		out.extend_from_slice(&pool.count().to_be_bytes());
		pool.write_to(&mut out);

		out.extend_from_slice(&self.access_flags.to_be_bytes());
		out.extend_from_slice(&self.this_class.to_be_bytes());
		out.extend_from_slice(&self.super_class.to_be_bytes());

		out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
		for interface in &self.interfaces {
			out.extend_from_slice(&interface.to_be_bytes());
		}

		out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
		for field in &self.fields {
			field.write_to(&mut out);
		}

		out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
		for method in &self.methods {
			method.write_to(&mut out);
		}

		out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
		for attr in &self.attributes {
			out.extend_from_slice(attr);
		}

		out
	}
}

/// Builds a complete `attribute_info` entry (`name_index` + `attribute_length` + body).
pub fn attribute_info(pool: &mut ClassPoolBuilder<'_>, name: &str, body: Vec<u8>) -> Result<Vec<u8>, DecodeError> {
	let name_index = pool.resolve_utf8_literal(name)?;
	let mut out = Vec::with_capacity(body.len() + 6);
	out.extend_from_slice(&name_index.to_be_bytes());
	out.extend_from_slice(&(body.len() as u32).to_be_bytes());
	out.extend_from_slice(&body);
	Ok(out)
}

/// Builds the `SourceFile` attribute body for `class_name`, guessing the conventional
/// `<top-level-class>.java` source name.
pub fn synthesize_source_file_attribute(pool: &mut ClassPoolBuilder<'_>, class_name: &str) -> Result<Vec<u8>, DecodeError> {
	let simple = class_name.rsplit('/').next().unwrap_or(class_name);
	let top_level = simple.split('$').next().unwrap_or(simple);
	let source_name = format!("{top_level}.java");
	let utf8_index = pool.resolve_utf8_literal(&source_name)?;
	attribute_info(pool, "SourceFile", utf8_index.to_be_bytes().to_vec())
}

/// Builds the `InnerClasses` attribute body from every tuple relevant to `class_name`.
pub fn synthesize_inner_classes_attribute(
	pool: &mut ClassPoolBuilder<'_>,
	cp: &ConstantPool,
	class_name: &str,
	tuples: &[crate::segment::inner_classes::IcTuple]
) -> Result<Vec<u8>, DecodeError> {
	let relevant: Vec<_> = tuples.iter().filter(|t| t.is_relevant_to(class_name)).collect();

	let mut body = (relevant.len() as u16).to_be_bytes().to_vec();
	for tuple in relevant {
		// InnerClasses entries reference a Class, not a bare Utf8; these tuples don't carry
		// a segment-global index, so the Class entry is interned by name rather than routed
		// through `resolve`, but still dedups against it via `class_name_memo`.
		let class_index = resolve_class_literal(pool, &tuple.full_name)?;
		let outer_index = match tuple.outer_name() {
			Some(name) => resolve_class_literal(pool, name)?,
			None => 0
		};
		let name_index = match tuple.simple_name() {
			Some(name) if !tuple.is_anonymous() => pool.resolve_utf8_literal(name)?,
			_ => 0
		};

		body.extend_from_slice(&class_index.to_be_bytes());
		body.extend_from_slice(&outer_index.to_be_bytes());
		body.extend_from_slice(&name_index.to_be_bytes());
		body.extend_from_slice(&tuple.flags.to_be_bytes());
	}
	let _ = cp;
	attribute_info(pool, "InnerClasses", body)
}

fn resolve_class_literal(pool: &mut ClassPoolBuilder<'_>, name: &str) -> Result<u16, DecodeError> {
	pool.resolve_class_by_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::segment::constant_pool::{ConstantPoolOffsets, RefEntry};

	fn sample_pool() -> ConstantPool {
		let mut cp = ConstantPool::default();
		cp.utf8 = vec!["java/lang/Object".into(), "<init>".into(), "()V".into()];
		cp.class = vec![0];
		cp.signature = vec![crate::segment::constant_pool::SignatureEntry { form: 2, classes: vec![] }];
		cp.descriptor = vec![crate::segment::constant_pool::DescriptorEntry { name: 1, descriptor_type: 0 }];
		cp.method = vec![RefEntry { class: 0, descriptor: 0 }];
		cp.offsets = ConstantPoolOffsets {
			utf8: 0,
			int: 3,
			float: 3,
			long: 3,
			double: 3,
			string: 3,
			class: 3,
			signature: 4,
			descriptor: 5,
			field: 6,
			method: 6,
			imethod: 7,
			total: 7
		};
		cp
	}

	#[test]
	fn resolving_a_method_ref_pulls_in_its_whole_dependency_chain() {
		let cp = sample_pool();
		let mut pool = ClassPoolBuilder::new(&cp);
		let index = pool.resolve(cp.offsets.method).unwrap();
		assert_eq!(index, 4);
		assert_eq!(pool.count(), 5);
	}

	#[test]
	fn repeated_resolution_of_the_same_global_index_is_memoized() {
		let cp = sample_pool();
		let mut pool = ClassPoolBuilder::new(&cp);
		let a = pool.resolve(cp.offsets.class).unwrap();
		let b = pool.resolve(cp.offsets.class).unwrap();
		assert_eq!(a, b);
		assert_eq!(pool.count(), 3);
	}

	#[test]
	fn a_class_reached_by_name_and_by_global_index_resolves_to_one_entry() {
		let cp = sample_pool();
		let mut pool = ClassPoolBuilder::new(&cp);

		let by_name = resolve_class_literal(&mut pool, "java/lang/Object").unwrap();
		let by_index = pool.resolve(cp.offsets.class).unwrap();
		assert_eq!(by_name, by_index);

		// Resolving the same global index again still hits the memo, and doesn't fabricate
		// a second Class entry now that the name path already created one.
		let by_index_again = pool.resolve(cp.offsets.class).unwrap();
		assert_eq!(by_index_again, by_index);
		assert_eq!(pool.count(), 3);
	}
}
