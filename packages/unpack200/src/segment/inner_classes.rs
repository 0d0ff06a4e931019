//! The inner-class (IC) tuple table used to reconstruct `InnerClasses` attributes.
//!
//! Each tuple names one inner class, optionally together with its outer class and simple
//! name; when either is missing the decoder predicts it by splitting the full name on its
//! last `$`.

use log::trace;
use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;

/// The bit of an IC tuple's flag word that signals an explicit outer class and name were
/// transmitted for this tuple, rather than left to be predicted from the full name.
const LONG_FORM_BIT: u16 = 0x0001;

/// One inner-class tuple: a full binary name, access flags, and an outer class / simple
/// name pair that is either explicit or predicted from the full name.
///
/// Equality and hashing are defined by `(full_name, outer_name, simple_name)` only, per
/// the resolved Open Question in `DESIGN.md`: the source's hash combinator overwrites
/// rather than combines sub-hashes, which looks like a bug and is not reproduced here.
#[derive(Debug, Clone)]
pub struct IcTuple {
	/// The full binary name, e.g. `p/Outer$Inner`.
	pub full_name: String,
	/// Access flags for the inner class.
	pub flags: u16,
	/// The explicit outer class name, if one was transmitted.
	pub explicit_outer_name: Option<String>,
	/// The explicit simple name, if one was transmitted.
	pub explicit_simple_name: Option<String>
}

impl IcTuple {
	/// Whether this tuple's outer class or simple name had to be predicted from
	/// `full_name` because no explicit value was transmitted.
	pub fn is_predicted(&self) -> bool {
		self.explicit_outer_name.is_none() || self.explicit_simple_name.is_none()
	}

	/// The position of the last `$` in `full_name` that separates an outer class from a
	/// nested suffix, if any.
	fn last_dollar(&self) -> Option<usize> {
		self.full_name.rfind('$')
	}

	/// The outer class name: explicit if transmitted, otherwise everything before the
	/// last `$` in `full_name`.
	pub fn outer_name(&self) -> Option<&str> {
		if let Some(explicit) = &self.explicit_outer_name {
			return Some(explicit);
		}
		self.last_dollar().map(|at| &self.full_name[..at])
	}

	/// The simple name: explicit if transmitted, otherwise everything after the last `$`
	/// in `full_name`.
	pub fn simple_name(&self) -> Option<&str> {
		if let Some(explicit) = &self.explicit_simple_name {
			return Some(explicit);
		}
		self.last_dollar().map(|at| &self.full_name[at + 1..])
	}

	/// Whether this tuple names an anonymous class, i.e. its simple name is composed
	/// entirely of digits.
	pub fn is_anonymous(&self) -> bool {
		match self.simple_name() {
			Some(name) if !name.is_empty() => name.bytes().all(|b| b.is_ascii_digit()),
			_ => false
		}
	}

	/// Whether this tuple's full name names `class_name` or one of its enclosing classes,
	/// i.e. whether it is "relevant" to an `InnerClasses` attribute emitted for that class.
	pub fn is_relevant_to(&self, class_name: &str) -> bool {
		self.full_name == class_name || self.outer_name() == Some(class_name)
	}

	fn identity_key(&self) -> (&str, Option<&str>, Option<&str>) {
		(&self.full_name, self.outer_name(), self.simple_name())
	}
}

impl PartialEq for IcTuple {
	fn eq(&self, other: &Self) -> bool {
		self.identity_key() == other.identity_key()
	}
}

impl Eq for IcTuple {}

impl std::hash::Hash for IcTuple {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.identity_key().hash(state);
	}
}

/// The segment-wide table of IC tuples.
#[derive(Debug, Clone, Default)]
pub struct InnerClassBands {
	pub tuples: Vec<IcTuple>
}

impl InnerClassBands {
	/// Reads the IC tuple table: a count, a class reference and flag word per tuple, and,
	/// for tuples whose flags mark them "long form", an explicit outer class and simple
	/// name.
	pub fn read<R: std::io::Read>(
		reader: &mut ByteReader<R>,
		cp: &ConstantPool,
		base_offset: u64
	) -> Result<Self, DecodeError> {
		trace!("Reading inner class bands");

		let count = Codec::UNSIGNED5
			.decode_one(reader, &mut 0)
			.map_err(|e| DecodeError::from_bitstream(e, "ic.count", base_offset))?;
		if count <= 0 {
			return Ok(Self::default());
		}
		let count = count as usize;

		let class_refs = Codec::UDELTA5
			.decode_band(reader, count)
			.map_err(|e| DecodeError::from_bitstream(e, "ic.this_class", base_offset))?;
		let flag_words = Codec::UNSIGNED5
			.decode_band(reader, count)
			.map_err(|e| DecodeError::from_bitstream(e, "ic.flags", base_offset))?;

		let long_form_count = flag_words
			.iter()
			.filter(|&&flags| flags as u16 & LONG_FORM_BIT != 0)
			.count();

		let outer_refs = Codec::UNSIGNED5
			.decode_band(reader, long_form_count)
			.map_err(|e| DecodeError::from_bitstream(e, "ic.outer_class", base_offset))?;
		let name_refs = Codec::UNSIGNED5
			.decode_band(reader, long_form_count)
			.map_err(|e| DecodeError::from_bitstream(e, "ic.name", base_offset))?;

		let mut outer_refs = outer_refs.into_iter();
		let mut name_refs = name_refs.into_iter();

		let mut tuples = Vec::with_capacity(count);
		for (class_ref, flags) in class_refs.into_iter().zip(flag_words) {
			let class_local = usize::try_from(class_ref).map_err(|_| DecodeError::OutOfRange {
				position: DecodePosition::new("ic.this_class", base_offset),
				detail: format!("negative class index {class_ref}")
			})?;
			let full_name = resolve_class_name(cp, class_local, base_offset)?;

			let is_long_form = flags as u16 & LONG_FORM_BIT != 0;
			let (explicit_outer_name, explicit_simple_name) = if is_long_form {
				let outer_ref = outer_refs.next().ok_or(DecodeError::UnexpectedEof {
					position: DecodePosition::new("ic.outer_class", base_offset)
				})?;
				let name_ref = name_refs.next().ok_or(DecodeError::UnexpectedEof {
					position: DecodePosition::new("ic.name", base_offset)
				})?;

				let outer = if outer_ref == 0 {
					None
				} else {
					Some(resolve_class_name(cp, (outer_ref - 1) as usize, base_offset)?)
				};
				let name = if name_ref == 0 {
					None
				} else {
					let idx = (name_ref - 1) as usize;
					Some(cp.utf8.get(idx).cloned().ok_or(DecodeError::OutOfRange {
						position: DecodePosition::new("ic.name", base_offset),
						detail: format!("UTF-8 index {idx} out of range")
					})?)
				};
				(outer, name)
			} else {
				(None, None)
			};

			tuples.push(IcTuple {
				full_name,
				flags: flags as u16,
				explicit_outer_name,
				explicit_simple_name
			});
		}

		Ok(Self { tuples })
	}
}

fn resolve_class_name(cp: &ConstantPool, class_local: usize, base_offset: u64) -> Result<String, DecodeError> {
	let utf8_index = *cp.class.get(class_local).ok_or(DecodeError::OutOfRange {
		position: DecodePosition::new("ic.this_class", base_offset),
		detail: format!("class index {class_local} out of range")
	})?;
	cp.utf8
		.get(utf8_index)
		.cloned()
		.ok_or(DecodeError::OutOfRange {
			position: DecodePosition::new("ic.this_class", base_offset),
			detail: format!("UTF-8 index {utf8_index} out of range")
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tuple(full_name: &str) -> IcTuple {
		IcTuple {
			full_name: full_name.to_string(),
			flags: 0,
			explicit_outer_name: None,
			explicit_simple_name: None
		}
	}

	#[test]
	fn predicts_outer_and_simple_name_from_full_name() {
		let t = tuple("p/Outer$Inner");
		assert_eq!(t.outer_name(), Some("p/Outer"));
		assert_eq!(t.simple_name(), Some("Inner"));
		assert!(t.is_predicted());
	}

	#[test]
	fn anonymous_classes_have_all_digit_simple_names() {
		let t = tuple("p/Outer$1");
		assert!(t.is_anonymous());
		let t = tuple("p/Outer$Named");
		assert!(!t.is_anonymous());
	}

	#[test]
	fn explicit_names_override_prediction() {
		let mut t = tuple("p/Outer$Inner");
		t.explicit_outer_name = Some("p/SomethingElse".to_string());
		t.explicit_simple_name = Some("Renamed".to_string());
		assert!(!t.is_predicted());
		assert_eq!(t.outer_name(), Some("p/SomethingElse"));
		assert_eq!(t.simple_name(), Some("Renamed"));
	}

	#[test]
	fn relevance_matches_self_and_direct_members() {
		let t = tuple("p/Outer$Inner");
		assert!(t.is_relevant_to("p/Outer$Inner"));
		assert!(t.is_relevant_to("p/Outer"));
		assert!(!t.is_relevant_to("p/Unrelated"));
	}

	#[test]
	fn equality_ignores_flags() {
		let mut a = tuple("p/Outer$Inner");
		let mut b = tuple("p/Outer$Inner");
		a.flags = 0x10;
		b.flags = 0x20;
		assert_eq!(a, b);
	}
}
