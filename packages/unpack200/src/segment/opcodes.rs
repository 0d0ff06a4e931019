//! The packed bytecode alphabet: real JVM opcodes (0–201) plus the Pack200-specific
//! pseudo-opcodes (202–255) that stand in for "this"/"super" member references, typed
//! constant loads, and escapes.

/// The byte value this decoder treats as "end of this method's packed code". Real and
/// pseudo opcodes occupy 0–254; 255 is never assigned a meaning by the format, so it is
/// used as the per-method terminator for what the original `pack200` tooling documents
/// abstractly as "`read() == -1`".
pub const END_OF_METHOD: u8 = 255;

pub const WIDE: u8 = 196;
pub const TABLESWITCH: u8 = 170;
pub const LOOKUPSWITCH: u8 = 171;
pub const IINC: u8 = 0x84;

/// The real JVM opcodes `wide` may legally prefix: the five typed local loads, the five
/// typed local stores, `iinc`, and `ret`.
pub const fn is_wide_eligible(opcode: u8) -> bool {
	matches!(opcode, 0x15..=0x19 | 0x36..=0x3a | IINC | 0xa9)
}

/// Where a pseudo-opcode's implicit operand comes from; mirrors the "operand sink" each
/// pseudo-opcode maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplicitSink {
	ThisField,
	ThisMethod,
	SuperField,
	SuperMethod,
	InitRef
}

/// Classifies one packed byte as either a real JVM opcode (passed through verbatim) or a
/// pseudo-opcode that expands into a handful of real instructions referencing the current
/// class, its superclass, or an escape band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedOpcode {
	Real(u8),
	/// `202`–`229`: the `_this`/`_super` families, and their `aload_0_*` variants that
	/// additionally synthesize a leading `aload_0`.
	ImplicitMember {
		/// The real opcode to synthesize (`getstatic`, `invokevirtual`, ...).
		real_opcode: u8,
		sink: ImplicitSink,
		/// Whether an `aload_0` must be emitted ahead of the synthesized instruction.
		prefix_aload_0: bool
	},
	/// `230`–`232`: `invokespecial` against a fabricated `<init>` reference (this class,
	/// super class, or a freshly `new`'d class already on the stack).
	InitRef { real_opcode: u8 },
	/// `233`–`239`: typed constant loads (`ildc`, `cldc`, `fldc`, ...), some with `_w`
	/// widened forms.
	TypedLdc { real_opcode: u8, tag: CpRefTag, wide: bool },
	/// `253`: `ref_escape`, a constant-pool reference whose target kind is read from the
	/// escape ref band.
	RefEscape,
	/// `254`: `byte_escape`, an opaque sequence of raw bytes copied through verbatim.
	ByteEscape
}

/// The subpool a typed `ldc`-family pseudo-opcode resolves its constant against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpRefTag {
	Int,
	Float,
	String,
	Class
}

/// Classifies a packed byte. Returns `None` for [`END_OF_METHOD`], which callers must
/// check for separately before classifying.
pub fn classify(opcode: u8) -> PackedOpcode {
	match opcode {
		0..=201 => PackedOpcode::Real(opcode),
		202 => implicit(0xB2, ImplicitSink::ThisField, false), // getstatic
		203 => implicit(0xB3, ImplicitSink::ThisField, false), // putstatic
		204 => implicit(0xB4, ImplicitSink::ThisField, false), // getfield
		205 => implicit(0xB5, ImplicitSink::ThisField, false), // putfield
		206 => implicit(0xB6, ImplicitSink::ThisMethod, false), // invokevirtual
		207 => implicit(0xB7, ImplicitSink::ThisMethod, false), // invokespecial
		208 => implicit(0xB8, ImplicitSink::ThisMethod, false), // invokestatic
		209 => implicit(0xB2, ImplicitSink::ThisField, true),
		210 => implicit(0xB3, ImplicitSink::ThisField, true),
		211 => implicit(0xB4, ImplicitSink::ThisField, true),
		212 => implicit(0xB5, ImplicitSink::ThisField, true),
		213 => implicit(0xB6, ImplicitSink::ThisMethod, true),
		214 => implicit(0xB7, ImplicitSink::ThisMethod, true),
		215 => implicit(0xB8, ImplicitSink::ThisMethod, true),
		216 => implicit(0xB2, ImplicitSink::SuperField, false),
		217 => implicit(0xB3, ImplicitSink::SuperField, false),
		218 => implicit(0xB4, ImplicitSink::SuperField, false),
		219 => implicit(0xB5, ImplicitSink::SuperField, false),
		220 => implicit(0xB6, ImplicitSink::SuperMethod, false),
		221 => implicit(0xB7, ImplicitSink::SuperMethod, false),
		222 => implicit(0xB8, ImplicitSink::SuperMethod, false),
		223 => implicit(0xB2, ImplicitSink::SuperField, true),
		224 => implicit(0xB3, ImplicitSink::SuperField, true),
		225 => implicit(0xB4, ImplicitSink::SuperField, true),
		226 => implicit(0xB5, ImplicitSink::SuperField, true),
		227 => implicit(0xB6, ImplicitSink::SuperMethod, true),
		228 => implicit(0xB7, ImplicitSink::SuperMethod, true),
		229 => implicit(0xB8, ImplicitSink::SuperMethod, true),
		230 | 231 | 232 => PackedOpcode::InitRef { real_opcode: 0xB7 },
		233 => PackedOpcode::TypedLdc { real_opcode: 0x12, tag: CpRefTag::Int, wide: false }, // ildc -> ldc
		234 => PackedOpcode::TypedLdc { real_opcode: 0x12, tag: CpRefTag::Class, wide: false }, // cldc -> ldc
		235 => PackedOpcode::TypedLdc { real_opcode: 0x12, tag: CpRefTag::Float, wide: false }, // fldc -> ldc
		236 => PackedOpcode::TypedLdc { real_opcode: 0x13, tag: CpRefTag::Int, wide: true },    // ildc_w
		237 => PackedOpcode::TypedLdc { real_opcode: 0x13, tag: CpRefTag::Class, wide: true },  // cldc_w
		238 => PackedOpcode::TypedLdc { real_opcode: 0x13, tag: CpRefTag::Float, wide: true },  // fldc_w
		239 => PackedOpcode::TypedLdc { real_opcode: 0x13, tag: CpRefTag::String, wide: true }, // sldc_w
		253 => PackedOpcode::RefEscape,
		254 => PackedOpcode::ByteEscape,
		other => PackedOpcode::Real(other)
	}
}

const fn implicit(real_opcode: u8, sink: ImplicitSink, prefix_aload_0: bool) -> PackedOpcode {
	PackedOpcode::ImplicitMember {
		real_opcode,
		sink,
		prefix_aload_0
	}
}

/// The operand shape of a real (non-pseudo) JVM opcode, as relevant to a Pack200 decoder:
/// which kind of implicit band operand(s) it draws on, if any. Opcodes not listed here
/// (the bulk of the instruction set) take no operand at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealOperandShape {
	None,
	/// `bipush`/`newarray`: one immediate byte.
	Byte,
	/// `sipush`: one immediate signed short.
	Short,
	/// `ldc`: one-byte constant pool index (resolved through the class's constant pool,
	/// band-supplied as a typed ref; treated like the `_w` forms for band purposes since
	/// Pack200 always carries typed refs, not raw untyped CP indices).
	LdcRef,
	/// `ldc_w`/`ldc2_w`/anything else taking a two-byte CP index.
	CpRef,
	/// `getstatic`/`putstatic`/`getfield`/`putfield`.
	FieldRef,
	/// `invokevirtual`/`invokespecial`/`invokestatic`.
	MethodRef,
	/// `invokeinterface`: CP ref plus a count byte and a reserved zero byte.
	InterfaceMethodRef,
	/// `invokedynamic`: CP ref plus two reserved zero bytes.
	DynamicRef,
	/// Local variable index (`iload`, `istore`, ..., `ret`).
	Local,
	/// `iinc`: local index plus a signed immediate byte.
	IncLocal,
	/// Branch opcodes taking a two-byte offset.
	Branch,
	/// `goto_w`/`jsr_w`: a four-byte offset.
	WideBranch,
	/// `tableswitch`.
	TableSwitch,
	/// `lookupswitch`.
	LookupSwitch,
	/// `multianewarray`: CP ref plus a dimension count byte.
	MultiANewArray
}

/// Looks up the operand shape for a real opcode.
pub const fn real_operand_shape(opcode: u8) -> RealOperandShape {
	use RealOperandShape::*;
	match opcode {
		0x10 => Byte,                   // bipush
		0xBC => Byte,                   // newarray
		0x11 => Short,                  // sipush
		0x12 => LdcRef,                 // ldc
		0x13 | 0x14 => CpRef,           // ldc_w, ldc2_w
		0xB2..=0xB5 => FieldRef,        // getstatic..putfield
		0xB6..=0xB8 => MethodRef,       // invokevirtual..invokestatic
		0xB9 => InterfaceMethodRef,     // invokeinterface
		0xBA => DynamicRef,             // invokedynamic
		0xBB | 0xBD | 0xC0 | 0xC1 => CpRef, // new, anewarray, checkcast, instanceof
		0x15 | 0x17 | 0x19 | 0x16 | 0x18 // iload, fload, aload, lload, dload
		| 0x36 | 0x38 | 0x3A | 0x37 | 0x39 // istore, fstore, astore, lstore, dstore
		| 0xA9 => Local,                // ret
		0x84 => IncLocal,               // iinc
		0x99..=0xA7 => Branch,          // if*, goto, jsr
		0xC6 | 0xC7 => Branch,          // ifnull, ifnonnull
		0xA8 => Branch,                 // jsr (redundant w/ range above, kept for clarity)
		0xC8 => WideBranch,             // goto_w
		0xC9 => WideBranch,             // jsr_w
		0xAA => TableSwitch,
		0xAB => LookupSwitch,
		0xC5 => MultiANewArray,
		_ => None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_this_field_pseudo_opcodes() {
		match classify(202) {
			PackedOpcode::ImplicitMember { real_opcode, sink, prefix_aload_0 } => {
				assert_eq!(real_opcode, 0xB2);
				assert_eq!(sink, ImplicitSink::ThisField);
				assert!(!prefix_aload_0);
			}
			other => panic!("unexpected: {other:?}")
		}
	}

	#[test]
	fn classifies_aload_0_super_variant() {
		match classify(223) {
			PackedOpcode::ImplicitMember { sink, prefix_aload_0, .. } => {
				assert_eq!(sink, ImplicitSink::SuperField);
				assert!(prefix_aload_0);
			}
			other => panic!("unexpected: {other:?}")
		}
	}

	#[test]
	fn real_opcodes_pass_through() {
		assert_eq!(classify(0), PackedOpcode::Real(0));
		assert_eq!(classify(201), PackedOpcode::Real(201));
	}
}
