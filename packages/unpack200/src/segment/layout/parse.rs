//! Recursive-descent parser for attribute layout strings.

use crate::error::{DecodeError, DecodePosition};
use crate::segment::layout::{IntWidth, LayoutNode};

/// Parses a full layout string into its top-level element sequence.
///
/// `band` and `byte_offset` are only used to build a position hint if parsing fails.
pub fn parse_layout(layout: &str, band: &'static str, byte_offset: u64) -> Result<Vec<LayoutNode>, DecodeError> {
	let mut parser = Parser {
		chars: layout.chars().collect(),
		pos: 0,
		layout,
		band,
		byte_offset
	};
	let nodes = parser.parse_sequence(None)?;
	if parser.pos != parser.chars.len() {
		return Err(parser.error("trailing characters after top-level layout"));
	}
	Ok(nodes)
}

struct Parser<'a> {
	chars: Vec<char>,
	pos: usize,
	layout: &'a str,
	band: &'static str,
	byte_offset: u64
}

impl<'a> Parser<'a> {
	fn error(&self, detail: &str) -> DecodeError {
		DecodeError::LayoutParse {
			position: DecodePosition::new(self.band, self.byte_offset),
			layout: format!("{} ({detail})", self.layout)
		}
	}

	fn peek(&self) -> Option<char> {
		self.chars.get(self.pos).copied()
	}

	fn advance(&mut self) -> Option<char> {
		let c = self.peek();
		if c.is_some() {
			self.pos += 1;
		}
		c
	}

	fn expect(&mut self, expected: char) -> Result<(), DecodeError> {
		match self.advance() {
			Some(c) if c == expected => Ok(()),
			_ => Err(self.error(&format!("expected '{expected}'")))
		}
	}

	fn width_letter(&mut self) -> Result<IntWidth, DecodeError> {
		match self.advance() {
			Some('B') => Ok(IntWidth::Byte),
			Some('H') => Ok(IntWidth::Short),
			Some('I') => Ok(IntWidth::Int),
			Some('V') => Ok(IntWidth::Void),
			_ => Err(self.error("expected a width letter (B/H/I/V)"))
		}
	}

	/// Parses a sequence of elements until a terminating `]` (when `terminator` is
	/// `Some(']')`) or end of input.
	fn parse_sequence(&mut self, terminator: Option<char>) -> Result<Vec<LayoutNode>, DecodeError> {
		let mut nodes = Vec::new();
		loop {
			match self.peek() {
				None => break,
				Some(c) if Some(c) == terminator => break,
				_ => nodes.push(self.parse_element()?)
			}
		}
		Ok(nodes)
	}

	fn parse_element(&mut self) -> Result<LayoutNode, DecodeError> {
		match self.peek() {
			Some('B') | Some('H') | Some('I') | Some('V') => {
				let width = self.width_letter()?;
				let token = match width {
					IntWidth::Byte => "B",
					IntWidth::Short => "H",
					IntWidth::Int => "I",
					IntWidth::Void => "V"
				}
				.to_string();
				Ok(LayoutNode::Leaf { token, width })
			}
			Some('S') => {
				self.advance();
				let width = self.width_letter()?;
				Ok(LayoutNode::Leaf {
					token: format!("S{}", width_char(width)),
					width
				})
			}
			Some('F') => {
				self.advance();
				let width = self.width_letter()?;
				Ok(LayoutNode::Leaf {
					token: format!("F{}", width_char(width)),
					width
				})
			}
			Some('P') => {
				self.advance();
				let relative = self.peek() == Some('O');
				if relative {
					self.advance();
				}
				let width = self.width_letter()?;
				let token = if relative {
					format!("PO{}", width_char(width))
				} else {
					format!("P{}", width_char(width))
				};
				Ok(LayoutNode::Leaf { token, width })
			}
			Some('O') => {
				self.advance();
				let signed = self.peek() == Some('S');
				if signed {
					self.advance();
				}
				let width = self.width_letter()?;
				let token = if signed {
					format!("OS{}", width_char(width))
				} else {
					format!("O{}", width_char(width))
				};
				Ok(LayoutNode::Leaf { token, width })
			}
			Some('K') => {
				self.advance();
				match self.advance() {
					Some(tag @ ('I' | 'J' | 'F' | 'D' | 'S' | 'Q')) => {
						// Constant-pool references are always emitted as a 2-byte index; the
						// trailing 'H' is part of the token, not a separate element.
						self.expect('H')?;
						Ok(LayoutNode::ConstantRef { tag })
					}
					_ => Err(self.error("expected a constant tag after 'K' (I/J/F/D/S/Q)"))
				}
			}
			Some('R') => {
				self.advance();
				match self.advance() {
					Some(kind @ ('C' | 'S' | 'D' | 'F' | 'M' | 'I' | 'U')) => {
						let nullable = self.peek() == Some('N');
						if nullable {
							self.advance();
						}
						self.expect('H')?;
						Ok(LayoutNode::CpRef { kind, nullable })
					}
					_ => Err(self.error("expected a CP reference kind after 'R' (C/S/D/F/M/I/U)"))
				}
			}
			Some('N') => {
				self.advance();
				let width = self.width_letter()?;
				let count_token = format!("N{}", width_char(width));
				self.expect('[')?;
				let body = self.parse_sequence(Some(']'))?;
				self.expect(']')?;
				Ok(LayoutNode::Replication { count_token, body })
			}
			Some('T') => {
				self.advance();
				let width = self.width_letter()?;
				let case_token = format!("T{}", width_char(width));
				let mut cases = Vec::new();
				loop {
					self.expect('(')?;
					let mut tag = String::new();
					while self.peek().map(|c| c == '-' || c.is_ascii_digit()).unwrap_or(false) {
						tag.push(self.advance().unwrap());
					}
					self.expect(')')?;
					self.expect('[')?;
					let body = self.parse_sequence(Some(']'))?;
					self.expect(']')?;

					if tag.is_empty() {
						return Ok(LayoutNode::Union {
							case_token,
							cases,
							default: body
						});
					}
					let tag: i64 = tag
						.parse()
						.map_err(|_| self.error("malformed union case tag"))?;
					cases.push((tag, body));
				}
			}
			Some('(') => {
				self.advance();
				let mut number = String::new();
				while self.peek().map(|c| c == '-' || c.is_ascii_digit()).unwrap_or(false) {
					number.push(self.advance().unwrap());
				}
				self.expect(')')?;
				let n: i32 = number.parse().map_err(|_| self.error("malformed call index"))?;
				Ok(LayoutNode::Call(n))
			}
			Some('[') => {
				self.advance();
				let body = self.parse_sequence(Some(']'))?;
				self.expect(']')?;
				Ok(LayoutNode::Callable(body))
			}
			Some(other) => Err(self.error(&format!("unexpected layout character '{other}'"))),
			None => Err(self.error("unexpected end of layout string"))
		}
	}
}

const fn width_char(width: IntWidth) -> char {
	match width {
		IntWidth::Byte => 'B',
		IntWidth::Short => 'H',
		IntWidth::Int => 'I',
		IntWidth::Void => 'V'
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_integrals() {
		let nodes = parse_layout("BHIV", "test", 0).unwrap();
		assert_eq!(nodes.len(), 4);
	}

	#[test]
	fn parses_replication_and_cp_ref() {
		let nodes = parse_layout("NH[RUH]", "test", 0).unwrap();
		assert_eq!(nodes.len(), 1);
		match &nodes[0] {
			LayoutNode::Replication { count_token, body } => {
				assert_eq!(count_token, "NH");
				assert_eq!(body.len(), 1);
				assert!(matches!(body[0], LayoutNode::CpRef { kind: 'U', nullable: false }));
			}
			other => panic!("unexpected node: {other:?}")
		}
	}

	#[test]
	fn parses_union_with_default() {
		let nodes = parse_layout("TB(0)[B](1)[H]()[]", "test", 0).unwrap();
		match &nodes[0] {
			LayoutNode::Union { cases, default, .. } => {
				assert_eq!(cases.len(), 2);
				assert!(default.is_empty());
			}
			other => panic!("unexpected node: {other:?}")
		}
	}

	#[test]
	fn parses_call_tokens() {
		let nodes = parse_layout("[RUH](1)(0)(-1)", "test", 0).unwrap();
		assert!(matches!(nodes[0], LayoutNode::Callable(_)));
		assert!(matches!(nodes[1], LayoutNode::Call(1)));
		assert!(matches!(nodes[2], LayoutNode::Call(0)));
		assert!(matches!(nodes[3], LayoutNode::Call(-1)));
	}
}
