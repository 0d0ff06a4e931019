//! Evaluates a parsed attribute layout against the bit-stream, producing the bytes of every
//! occurrence of one attribute.
//!
//! Decoding happens in two passes, matching how the format actually lays the bands out:
//! a *read* pass walks the layout once per distinct element, reading that element's band
//! across every occurrence of the owning layout before moving to the next element; then an
//! *assemble* pass walks the same layout once per occurrence, pulling already-decoded
//! values out in order and resolving constant-pool/bytecode-index references to produce
//! that occurrence's `attribute_length`-prefixed body. [`read_columns`] performs the first
//! pass, returning one [`Column`] per top-level layout node; [`assemble_occurrence`]
//! performs the second, consuming a shared [`ColumnCursor`] tree built once via
//! [`make_cursors`] and advanced across successive calls so that occurrence N+1 picks up
//! exactly where occurrence N left off.

use unpack200_bitstream::{ByteReader, Codec};

use crate::error::{DecodeError, DecodePosition};
use crate::segment::constant_pool::ConstantPool;
use crate::segment::layout::{codec_for_token, IntWidth, LayoutNode};

const MAX_CALL_DEPTH: usize = 64;

/// Resolves a segment-global constant-pool index to the `u16` index it occupies in the
/// class file currently being assembled.
pub type ResolveCpIndex<'a> = dyn FnMut(usize) -> Result<u16, DecodeError> + 'a;

/// Resolves a method's instruction index to the real byte offset it ends up at once
/// pseudo-opcodes have been expanded, per [`super::super::bytecode::DecodedCode::resolve`].
pub type ResolveBci<'a> = dyn FnMut(i64) -> u32 + 'a;

/// The raw, not-yet-resolved values the read pass decoded for one layout node, across every
/// occurrence (or nested repetition) that visits it.
pub enum Column {
	/// One decoded value per visit, for `Leaf`, `ConstantRef`, and `CpRef` nodes alike (the
	/// latter two hold the raw local index; constant-pool resolution happens in the
	/// assemble pass, which has access to the per-entity resolver).
	Values(Vec<i64>),
	/// A `Replication` node: one repetition count per visit, plus the body's own columns,
	/// covering `sum(counts)` flattened body visits in visit order.
	Replication { counts: Vec<i64>, body: Vec<Column> },
	/// A `Union` node: one case tag per visit, plus, for each declared case (in layout
	/// order) and the default, that case body's columns, covering only the visits that
	/// actually selected it.
	Union {
		tags: Vec<i64>,
		cases: Vec<(i64, Vec<Column>)>,
		default: Vec<Column>
	},
	/// A `Call` or `Callable` node: the invoked body's columns, covering the same visits as
	/// the node itself (exactly one body evaluation per visit, so no count bookkeeping is
	/// needed).
	Nested(Vec<Column>)
}

struct ReadCtx<'r, R: std::io::Read> {
	reader: &'r mut ByteReader<R>,
	band: &'static str,
	base_offset: u64
}

/// Reads every band a layout's nodes name, columnarly across `occurrences` visits of the
/// layout (e.g. one visit per method carrying this attribute).
pub fn read_columns<R: std::io::Read>(
	nodes: &[LayoutNode],
	reader: &mut ByteReader<R>,
	occurrences: usize,
	band: &'static str,
	base_offset: u64
) -> Result<Vec<Column>, DecodeError> {
	let callables = collect_callables(nodes);
	let mut ctx = ReadCtx { reader, band, base_offset };
	read_sequence(nodes, &callables, occurrences, 0, &mut ctx)
}

fn read_sequence<R: std::io::Read>(
	nodes: &[LayoutNode],
	callables: &[Vec<LayoutNode>],
	visits: usize,
	depth: usize,
	ctx: &mut ReadCtx<'_, R>
) -> Result<Vec<Column>, DecodeError> {
	if depth > MAX_CALL_DEPTH {
		return Err(DecodeError::Inconsistent {
			position: DecodePosition::new(ctx.band, ctx.base_offset),
			detail: "attribute layout call recursion exceeded the maximum depth".to_string()
		});
	}

	nodes
		.iter()
		.map(|node| read_node(node, callables, visits, depth, ctx))
		.collect()
}

fn read_node<R: std::io::Read>(
	node: &LayoutNode,
	callables: &[Vec<LayoutNode>],
	visits: usize,
	depth: usize,
	ctx: &mut ReadCtx<'_, R>
) -> Result<Column, DecodeError> {
	match node {
		LayoutNode::Leaf { token, .. } => {
			let codec = codec_for_token(token);
			Ok(Column::Values(read_scalars(codec, visits, ctx)?))
		}
		LayoutNode::ConstantRef { .. } => Ok(Column::Values(read_scalars(Codec::UNSIGNED5, visits, ctx)?)),
		LayoutNode::CpRef { .. } => Ok(Column::Values(read_scalars(Codec::UNSIGNED5, visits, ctx)?)),
		LayoutNode::Replication { count_token, body } => {
			let codec = codec_for_token(count_token);
			let counts = read_scalars(codec, visits, ctx)?;
			for &count in &counts {
				if count < 0 {
					return Err(DecodeError::OutOfRange {
						position: DecodePosition::new(ctx.band, ctx.base_offset),
						detail: format!("negative replication count {count}")
					});
				}
			}
			let total: i64 = counts.iter().sum();
			let body_columns = read_sequence(body, callables, total as usize, depth + 1, ctx)?;
			Ok(Column::Replication { counts, body: body_columns })
		}
		LayoutNode::Union { case_token, cases, default } => {
			let codec = codec_for_token(case_token);
			let tags = read_scalars(codec, visits, ctx)?;
			let case_columns = cases
				.iter()
				.map(|(tag, body)| {
					let matched = tags.iter().filter(|&&t| t == *tag).count();
					Ok((*tag, read_sequence(body, callables, matched, depth + 1, ctx)?))
				})
				.collect::<Result<Vec<_>, DecodeError>>()?;
			let default_matched = tags
				.iter()
				.filter(|&&t| !cases.iter().any(|(tag, _)| *tag == t))
				.count();
			let default_columns = read_sequence(default, callables, default_matched, depth + 1, ctx)?;
			Ok(Column::Union {
				tags,
				cases: case_columns,
				default: default_columns
			})
		}
		LayoutNode::Call(n) => {
			let index = resolve_call_index(*n, None, callables.len(), ctx.band, ctx.base_offset)?;
			let body = read_sequence(&callables[index], callables, visits, depth + 1, ctx)?;
			Ok(Column::Nested(body))
		}
		LayoutNode::Callable(body) => {
			let body = read_sequence(body, callables, visits, depth + 1, ctx)?;
			Ok(Column::Nested(body))
		}
	}
}

/// Reads `visits` scalar values, one per visit, with a fresh delta accumulator per value —
/// matching how a single occurrence's inline reads never carried an accumulator across
/// elements.
fn read_scalars<R: std::io::Read>(codec: Codec, visits: usize, ctx: &mut ReadCtx<'_, R>) -> Result<Vec<i64>, DecodeError> {
	(0..visits)
		.map(|_| {
			codec
				.decode_one(ctx.reader, &mut 0)
				.map_err(|e| DecodeError::from_bitstream(e, ctx.band, ctx.base_offset))
		})
		.collect()
}

/// A cursor into a [`Column`] tree, tracking how much of it has been consumed by
/// [`assemble_occurrence`] calls so far.
pub enum ColumnCursor<'c> {
	Values(std::slice::Iter<'c, i64>),
	Replication {
		counts: std::slice::Iter<'c, i64>,
		body: Vec<ColumnCursor<'c>>
	},
	Union {
		tags: std::slice::Iter<'c, i64>,
		cases: Vec<(i64, Vec<ColumnCursor<'c>>)>,
		default: Vec<ColumnCursor<'c>>
	},
	Nested(Vec<ColumnCursor<'c>>)
}

/// Builds a fresh, zeroed cursor tree over `columns`, to be threaded through one call to
/// [`assemble_occurrence`] per occurrence, in order.
pub fn make_cursors(columns: &[Column]) -> Vec<ColumnCursor<'_>> {
	columns.iter().map(make_cursor).collect()
}

fn make_cursor(column: &Column) -> ColumnCursor<'_> {
	match column {
		Column::Values(values) => ColumnCursor::Values(values.iter()),
		Column::Replication { counts, body } => ColumnCursor::Replication {
			counts: counts.iter(),
			body: make_cursors(body)
		},
		Column::Union { tags, cases, default } => ColumnCursor::Union {
			tags: tags.iter(),
			cases: cases.iter().map(|(tag, body)| (*tag, make_cursors(body))).collect(),
			default: make_cursors(default)
		},
		Column::Nested(body) => ColumnCursor::Nested(make_cursors(body))
	}
}

struct AssembleCtx<'r, 'x> {
	cp: &'r ConstantPool,
	resolve_cp_index: &'r mut ResolveCpIndex<'x>,
	bci_resolver: Option<&'r mut ResolveBci<'x>>,
	band: &'static str,
	base_offset: u64,
	/// The instruction index of the most recently decoded `P` (bytecode-index) leaf, kept
	/// around so that an immediately following `O` (bytecode-offset) leaf can be resolved as
	/// a real-byte-length delta rather than an instruction-count delta, matching how
	/// `LineNumberTable`/`LocalVariableTable`/`LocalVariableTypeTable` renumber their bodies.
	last_p_instr: Option<i64>
}

/// Assembles one occurrence's `attribute_length`-prefixed body (the length prefix itself is
/// added by the caller) from `cursors`, advancing them past whatever this occurrence
/// consumes.
///
/// `bci_resolver`, when present, translates this occurrence's `P`/`O` bytecode-index
/// tokens from instruction-index space into real byte offsets; pass `None` for
/// non-`Code`-context layouts, which never contain such tokens.
pub fn assemble_occurrence(
	nodes: &[LayoutNode],
	cursors: &mut [ColumnCursor<'_>],
	cp: &ConstantPool,
	resolve_cp_index: &mut ResolveCpIndex<'_>,
	bci_resolver: Option<&mut ResolveBci<'_>>,
	band: &'static str,
	base_offset: u64
) -> Result<Vec<u8>, DecodeError> {
	let mut out = Vec::new();
	let callables = collect_callables(nodes);
	let mut ctx = AssembleCtx {
		cp,
		resolve_cp_index,
		bci_resolver,
		band,
		base_offset,
		last_p_instr: None
	};
	assemble_sequence(nodes, cursors, &callables, 0, &mut ctx, &mut out)?;
	Ok(out)
}

fn assemble_sequence(
	nodes: &[LayoutNode],
	cursors: &mut [ColumnCursor<'_>],
	callables: &[Vec<LayoutNode>],
	depth: usize,
	ctx: &mut AssembleCtx<'_, '_>,
	out: &mut Vec<u8>
) -> Result<(), DecodeError> {
	if depth > MAX_CALL_DEPTH {
		return Err(DecodeError::Inconsistent {
			position: DecodePosition::new(ctx.band, ctx.base_offset),
			detail: "attribute layout call recursion exceeded the maximum depth".to_string()
		});
	}

	for (node, cursor) in nodes.iter().zip(cursors.iter_mut()) {
		match node {
			LayoutNode::Leaf { token, width } => {
				let value = next_value(cursor, ctx.band, ctx.base_offset)?;

				if token.contains('P') {
					let resolved = match &mut ctx.bci_resolver {
						Some(resolve) => resolve(value) as i64,
						None => value
					};
					ctx.last_p_instr = Some(value);
					push_int(out, resolved, *width);
				} else if token.contains('O') {
					let resolved = match (&mut ctx.bci_resolver, ctx.last_p_instr) {
						(Some(resolve), Some(start_instr)) => resolve(start_instr + value) as i64 - resolve(start_instr) as i64,
						_ => value
					};
					ctx.last_p_instr = None;
					push_int(out, resolved, *width);
				} else {
					push_int(out, value, *width);
				}
			}
			LayoutNode::ConstantRef { tag } => {
				let local = next_value(cursor, ctx.band, ctx.base_offset)? as usize;
				// 'Q' (used by the `ConstantValue` layout) stands for "whichever constant
				// kind the owning field's descriptor names"; resolving it precisely would
				// require threading the field descriptor into every layout evaluation, so
				// this falls back to the int subpool, matching the common case of a
				// primitive `ConstantValue` on an `int`-typed field.
				let subpool_offset = match tag {
					'I' | 'Q' => ctx.cp.offsets.int,
					'J' => ctx.cp.offsets.long,
					'F' => ctx.cp.offsets.float,
					'D' => ctx.cp.offsets.double,
					'S' => ctx.cp.offsets.string,
					_ => {
						return Err(DecodeError::LayoutParse {
							position: DecodePosition::new(ctx.band, ctx.base_offset),
							layout: format!("unknown constant tag '{tag}'")
						});
					}
				};
				let resolved = (ctx.resolve_cp_index)(subpool_offset + local)?;
				push_int(out, resolved as i64, IntWidth::Short);
			}
			LayoutNode::CpRef { kind, nullable } => {
				let raw = next_value(cursor, ctx.band, ctx.base_offset)?;
				if *nullable && raw == 0 {
					push_int(out, 0, IntWidth::Short);
					continue;
				}
				let local = if *nullable { (raw - 1) as usize } else { raw as usize };
				let subpool_offset = match kind {
					'C' => ctx.cp.offsets.class,
					'S' => ctx.cp.offsets.signature,
					'D' => ctx.cp.offsets.descriptor,
					'F' => ctx.cp.offsets.field,
					'M' => ctx.cp.offsets.method,
					'I' => ctx.cp.offsets.imethod,
					'U' => ctx.cp.offsets.utf8,
					_ => {
						return Err(DecodeError::LayoutParse {
							position: DecodePosition::new(ctx.band, ctx.base_offset),
							layout: format!("unknown CP reference kind '{kind}'")
						});
					}
				};
				let resolved = (ctx.resolve_cp_index)(subpool_offset + local)?;
				push_int(out, resolved as i64, IntWidth::Short);
			}
			LayoutNode::Replication { body, .. } => {
				let ColumnCursor::Replication { counts, body: body_cursors } = cursor else {
					unreachable!("replication node must carry a replication cursor")
				};
				let count = counts.next().copied().ok_or_else(|| DecodeError::Inconsistent {
					position: DecodePosition::new(ctx.band, ctx.base_offset),
					detail: "replication cursor exhausted before every occurrence was assembled".to_string()
				})?;
				for _ in 0..count {
					assemble_sequence(body, body_cursors, callables, depth + 1, ctx, out)?;
				}
			}
			LayoutNode::Union { cases, default, .. } => {
				let ColumnCursor::Union { tags, cases: case_cursors, default: default_cursor } = cursor else {
					unreachable!("union node must carry a union cursor")
				};
				let tag = tags.next().copied().ok_or_else(|| DecodeError::Inconsistent {
					position: DecodePosition::new(ctx.band, ctx.base_offset),
					detail: "union cursor exhausted before every occurrence was assembled".to_string()
				})?;
				match case_cursors.iter_mut().position(|(case_tag, _)| *case_tag == tag) {
					Some(index) => {
						let (_, body) = &cases[index];
						assemble_sequence(body, &mut case_cursors[index].1, callables, depth + 1, ctx, out)?;
					}
					None => assemble_sequence(default, default_cursor, callables, depth + 1, ctx, out)?
				}
			}
			LayoutNode::Call(n) => {
				let index = resolve_call_index(*n, None, callables.len(), ctx.band, ctx.base_offset)?;
				let ColumnCursor::Nested(body_cursors) = cursor else {
					unreachable!("call node must carry a nested cursor")
				};
				assemble_sequence(&callables[index], body_cursors, callables, depth + 1, ctx, out)?;
			}
			LayoutNode::Callable(body) => {
				let ColumnCursor::Nested(body_cursors) = cursor else {
					unreachable!("callable node must carry a nested cursor")
				};
				assemble_sequence(body, body_cursors, callables, depth + 1, ctx, out)?;
			}
		}
	}
	Ok(())
}

fn next_value(cursor: &mut ColumnCursor<'_>, band: &'static str, base_offset: u64) -> Result<i64, DecodeError> {
	let ColumnCursor::Values(values) = cursor else {
		unreachable!("scalar node must carry a values cursor")
	};
	values.next().copied().ok_or_else(|| DecodeError::Inconsistent {
		position: DecodePosition::new(band, base_offset),
		detail: "value cursor exhausted before every occurrence was assembled".to_string()
	})
}

fn collect_callables(nodes: &[LayoutNode]) -> Vec<Vec<LayoutNode>> {
	let mut callables = Vec::new();
	fn walk(nodes: &[LayoutNode], callables: &mut Vec<Vec<LayoutNode>>) {
		for node in nodes {
			match node {
				LayoutNode::Callable(body) => {
					callables.push(body.clone());
					walk(body, callables);
				}
				LayoutNode::Replication { body, .. } => walk(body, callables),
				LayoutNode::Union { cases, default, .. } => {
					for (_, body) in cases {
						walk(body, callables);
					}
					walk(default, callables);
				}
				_ => {}
			}
		}
	}
	walk(nodes, &mut callables);
	callables
}

fn resolve_call_index(
	n: i32,
	current: Option<usize>,
	callable_count: usize,
	band: &'static str,
	base_offset: u64
) -> Result<usize, DecodeError> {
	if n == 0 {
		return current.ok_or_else(|| DecodeError::LayoutParse {
			position: DecodePosition::new(band, base_offset),
			layout: "call (0) used outside of any callable".to_string()
		});
	}
	let index = if n > 0 { n as i64 - 1 } else { callable_count as i64 + n as i64 };
	if index < 0 || (callable_count != usize::MAX && index as usize >= callable_count) {
		return Err(DecodeError::LayoutParse {
			position: DecodePosition::new(band, base_offset),
			layout: format!("call ({n}) does not resolve to a defined callable")
		});
	}
	Ok(index as usize)
}

fn push_int(out: &mut Vec<u8>, value: i64, width: IntWidth) {
	match width {
		IntWidth::Void => {}
		IntWidth::Byte => out.push(value as u8),
		IntWidth::Short => out.extend_from_slice(&(value as u16).to_be_bytes()),
		IntWidth::Int => out.extend_from_slice(&(value as u32).to_be_bytes())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::segment::layout::parse_layout;

	fn decode_one_occurrence(
		nodes: &[LayoutNode],
		bytes: &[u8],
		cp: &ConstantPool,
		bci_resolver: Option<&mut ResolveBci<'_>>
	) -> Vec<u8> {
		let mut reader = ByteReader::new(Cursor::new(bytes.to_vec()));
		let columns = read_columns(nodes, &mut reader, 1, "test", 0).unwrap();
		let mut cursors = make_cursors(&columns);
		let mut resolver = |global: usize| Ok(global as u16);
		assemble_occurrence(nodes, &mut cursors, cp, &mut resolver, bci_resolver, "test", 0).unwrap()
	}

	#[test]
	fn decodes_a_single_utf8_reference_as_a_two_byte_value() {
		// S7: layout "RUH" reads one UTF-8 reference and emits it as a 2-byte value.
		let nodes = parse_layout("RUH", "test", 0).unwrap();
		let mut cp = ConstantPool::default();
		cp.utf8 = vec!["a".into(), "b".into(), "c".into()];
		cp.offsets = crate::segment::constant_pool::ConstantPoolOffsets {
			utf8: 0,
			..Default::default()
		};

		let body = decode_one_occurrence(&nodes, &[5u8], &cp, None);

		assert_eq!(body, vec![0, 5]);
	}

	#[test]
	fn resolves_bci_offset_pairs_through_the_supplied_resolver() {
		// LineNumberTable-shaped pair: a P (bci) leaf followed by an O (length) leaf, with
		// a resolver that doubles every instruction index to stand in for pseudo-opcode
		// expansion.
		let nodes = parse_layout("PHOH", "test", 0).unwrap();
		let cp = ConstantPool::default();
		let mut bci_resolver = |instr: i64| (instr * 2) as u32;

		let body = decode_one_occurrence(&nodes, &[3u8, 2u8], &cp, Some(&mut bci_resolver));

		// start_pc = resolve(3) = 6; length = resolve(3+2) - resolve(3) = 10 - 6 = 4.
		assert_eq!(body, vec![0, 6, 0, 4]);
	}

	#[test]
	fn reads_replicated_elements_columnarly_across_occurrences() {
		// LineNumberTable-shaped layout: NH[PHOH]. Two occurrences, with counts 2 and 1.
		// Columnar reading must read the N band (2, 1), then the whole P band across every
		// repetition of both occurrences (3 values), then the whole O band (3 values) —
		// not interleave P/O per repetition the way row-major reading would.
		let nodes = parse_layout("NH[PHOH]", "test", 0).unwrap();
		let cp = ConstantPool::default();

		// N: [2, 1]. P (3 values, across both occurrences' reps): [10, 20, 30].
		// O (3 values): [1, 2, 3].
		let bytes = [2u8, 1, 10, 20, 30, 1, 2, 3];
		let mut reader = ByteReader::new(Cursor::new(bytes.to_vec()));
		let columns = read_columns(&nodes, &mut reader, 2, "test", 0).unwrap();
		let mut cursors = make_cursors(&columns);

		let mut resolver = |global: usize| Ok(global as u16);
		let first = assemble_occurrence(&nodes, &mut cursors, &cp, &mut resolver, None, "test", 0).unwrap();
		let second = assemble_occurrence(&nodes, &mut cursors, &cp, &mut resolver, None, "test", 0).unwrap();

		// First occurrence: count 2, rows (10, 20-10=10) and (20, 30-20=10).
		assert_eq!(first, vec![0, 2, 0, 10, 10, 0, 20, 10, 10]);
		// Second occurrence: count 1, row (30, resolve(30+3)-resolve(30)=33-30=3).
		assert_eq!(second, vec![0, 1, 0, 30, 0, 3]);
	}
}
