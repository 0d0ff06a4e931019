//! This crate implements the BHSD (Byte count, High base, Sign mode, Delta flag) family of
//! variable-length integer codecs used throughout the Pack200 format, along with the
//! population codec built on top of them.
//!
//! # Overview
//!
//! Every Pack200 band is a homogeneous sequence of integers encoded with one of these
//! codecs. A codec is byte-oriented, unlike bit-level packing conventions: each integer
//! consumes a variable number of whole bytes, and the byte values themselves signal
//! whether more bytes follow. This crate has no notion of bands, segments, or any other
//! Pack200 structural concept; it only implements the codec arithmetic, leaving the
//! interpretation of the resulting integers to higher layers.
//!
//! # `#![no_std]` compatibility
//!
//! By default, this crate depends on the Rust standard library, but it is compatible with
//! `#![no_std]` environments when built with `default-features = false` and the `acid_io`
//! feature enabled, which substitutes `acid_io::Read` for `std::io::Read`.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use unpack200_bitstream::{ByteReader, Codec};
//!
//! let mut reader = ByteReader::new(Cursor::new([0x05u8, 0x07]));
//! let mut accumulator = 0i64;
//! assert_eq!(Codec::BYTE1.decode_one(&mut reader, &mut accumulator).unwrap(), 5);
//! assert_eq!(Codec::BYTE1.decode_one(&mut reader, &mut accumulator).unwrap(), 7);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "std")]
extern crate std;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::string::String;

#[cfg(not(feature = "std"))]
use alloc::format;

#[cfg(feature = "std")]
use std::io::Read;

#[cfg(not(feature = "std"))]
use acid_io::Read;

mod population;
#[cfg(test)]
mod test;

pub use population::PopulationCodec;

/// The error type returned by the codecs and readers in this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BitstreamError {
	/// The byte source was exhausted before a value could be fully decoded.
	#[error("unexpected end of stream while decoding a value")]
	UnexpectedEof,
	/// A decoded value fell outside of the codec's `[smallest, largest]` range and the
	/// codec is not delta-coded, so no wraparound could be applied.
	#[error("decoded value {value} is outside of the codec's representable range")]
	OutOfRange {
		/// The value that was found to be out of range.
		value: i64
	},
	/// An I/O error occurred while reading from the underlying byte source.
	#[cfg(feature = "std")]
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	/// An I/O error occurred while reading from the underlying byte source.
	#[cfg(not(feature = "std"))]
	#[error("I/O error: {0}")]
	Io(#[from] acid_io::Error),
	/// A meta-codec escape selected a replacement codec specification from the band-header
	/// stream that was malformed, exhausted the stream, or named an unsupported shape (e.g.
	/// a population codec nested inside another population codec's sub-codec).
	#[error("invalid codec specification in the band-header stream: {detail}")]
	BadCodec {
		/// A human-readable description of the problem.
		detail: String
	}
}

/// Wraps a byte source to provide the one-byte-lookahead, EOF-as-`None` reading contract
/// that BHSD codecs are defined against.
#[derive(Debug)]
pub struct ByteReader<R> {
	source: R,
	peeked: Option<u8>,
	position: u64,
	/// The segment's band-header escape stream, consumed sequentially by meta-codec
	/// escapes as they select replacement codec specifications; see [`Self::set_band_headers`].
	band_headers: Vec<u8>,
	band_header_pos: usize
}

impl<R: Read> ByteReader<R> {
	/// Constructs a byte reader over the specified source.
	///
	/// Using a buffered source is recommended, since this reader may perform frequent
	/// small reads.
	pub fn new(source: R) -> Self {
		Self {
			source,
			peeked: None,
			position: 0,
			band_headers: Vec::new(),
			band_header_pos: 0
		}
	}

	/// Installs the band-header escape stream a segment carried in its header, resetting
	/// the read cursor into it. Meta-codec escapes (see [`Codec::decode_band`]) consume
	/// this stream sequentially as they're triggered, in the order bands request them.
	pub fn set_band_headers(&mut self, band_headers: Vec<u8>) {
		self.band_headers = band_headers;
		self.band_header_pos = 0;
	}

	/// Pulls the next byte of the band-header escape stream, failing with
	/// [`BitstreamError::BadCodec`] once it's exhausted.
	fn next_band_header(&mut self) -> Result<u8, BitstreamError> {
		let byte = *self
			.band_headers
			.get(self.band_header_pos)
			.ok_or_else(|| BitstreamError::BadCodec {
				detail: "band-header escape stream exhausted while parsing a replacement codec".into()
			})?;
		self.band_header_pos += 1;
		Ok(byte)
	}

	/// Reads a single byte from the source, returning `Ok(None)` at the end of the stream.
	pub fn read(&mut self) -> Result<Option<u8>, BitstreamError> {
		if let Some(byte) = self.peeked.take() {
			self.position += 1;
			return Ok(Some(byte));
		}

		let mut buf = [0u8; 1];
		match self.source.read(&mut buf)? {
			0 => Ok(None),
			_ => {
				self.position += 1;
				Ok(Some(buf[0]))
			}
		}
	}

	/// Returns the next byte without consuming it, returning `Ok(None)` at the end of the
	/// stream.
	pub fn peek(&mut self) -> Result<Option<u8>, BitstreamError> {
		if let Some(byte) = self.peeked {
			return Ok(Some(byte));
		}

		let mut buf = [0u8; 1];
		let byte = match self.source.read(&mut buf)? {
			0 => None,
			_ => Some(buf[0])
		};
		self.peeked = byte;
		Ok(byte)
	}

	/// Returns the number of bytes consumed so far, not counting a byte obtained via
	/// [`peek`](Self::peek) but not yet [`read`](Self::read).
	pub const fn position(&self) -> u64 {
		self.position
	}

	/// Reads a byte, failing with [`BitstreamError::UnexpectedEof`] at the end of the
	/// stream. Most codec decoding goes through this, since BHSD codecs never tolerate a
	/// truncated value.
	fn read_required(&mut self) -> Result<u8, BitstreamError> {
		self.read()?.ok_or(BitstreamError::UnexpectedEof)
	}
}

/// Identifies the sign interpretation a [`Codec`] applies to the raw, unsigned base-256
/// numeral it decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignMode {
	/// The raw decoded value is used as-is.
	Unsigned = 0,
	/// The raw decoded value is folded to a signed value: odd raw values become negative
	/// (`-((raw + 1) / 2)`), even raw values become non-negative (`raw / 2`).
	Signed = 1,
	/// As [`Signed`](Self::Signed). Pack200 distinguishes this sign mode from
	/// [`Signed`](Self::Signed) for encoder-side tuning (picking the folding that keeps
	/// typical deltas small); the decoder-observable behavior is identical.
	SignedExtra = 2
}

/// An immutable `(B, H, S, D)` parameter quadruple describing a Pack200 variable-length
/// integer codec.
///
/// `B` is the maximum number of bytes consumed per value (1 to 5), `H` is the "high
/// continuation" base (1 to 256), `S` is the sign mode, and `D` is whether decoded values
/// are deltas that accumulate onto a running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
	b: u8,
	h: u16,
	s: SignMode,
	d: bool
}

impl Codec {
	/// Constructs a codec from its four parameters.
	///
	/// # Panics
	/// Panics if `b` is not in `1..=5` or `h` is not in `1..=256`, mirroring the invariant
	/// in the Pack200 specification.
	pub const fn new(b: u8, h: u16, s: SignMode, d: bool) -> Self {
		assert!(b >= 1 && b <= 5, "B must be in 1..=5");
		assert!(h >= 1 && h <= 256, "H must be in 1..=256");
		Self { b, h, s, d }
	}

	/// As [`Self::new`], but returns `None` instead of panicking when `b` or `h` is out of
	/// range. Used when constructing a codec from data the band-header escape stream names,
	/// which this decoder cannot trust to respect the format's own parameter bounds.
	const fn try_new(b: u8, h: u16, s: SignMode, d: bool) -> Option<Self> {
		if b >= 1 && b <= 5 && h >= 1 && h <= 256 {
			Some(Self { b, h, s, d })
		} else {
			None
		}
	}

	/// The `BYTE1` codec: a single byte, unsigned, no delta.
	pub const BYTE1: Self = Self::new(1, 256, SignMode::Unsigned, false);
	/// The `CHAR3` codec, used to decode the UTF-8 character stream of the constant pool.
	pub const CHAR3: Self = Self::new(3, 128, SignMode::Unsigned, false);
	/// The `UNSIGNED5` codec, the general-purpose unsigned codec used by most bands.
	pub const UNSIGNED5: Self = Self::new(5, 192, SignMode::Unsigned, false);
	/// The `UDELTA5` codec: `UNSIGNED5` with delta accumulation.
	pub const UDELTA5: Self = Self::new(5, 192, SignMode::Unsigned, true);
	/// The `SIGNED5` codec, the general-purpose signed codec.
	pub const SIGNED5: Self = Self::new(5, 192, SignMode::Signed, false);
	/// The `DELTA5` codec: `SIGNED5` with delta accumulation.
	pub const DELTA5: Self = Self::new(5, 192, SignMode::Signed, true);
	/// The `BCI5` codec, used for absolute bytecode indices.
	pub const BCI5: Self = Self::new(5, 192, SignMode::Unsigned, false);
	/// The `BRANCH5` codec, used for bytecode-relative branch offsets.
	pub const BRANCH5: Self = Self::new(5, 192, SignMode::Signed, false);

	/// The maximum number of bytes this codec consumes per value.
	pub const fn b(self) -> u8 {
		self.b
	}

	/// The high continuation base.
	pub const fn h(self) -> u16 {
		self.h
	}

	/// The sign mode.
	pub const fn sign_mode(self) -> SignMode {
		self.s
	}

	/// Whether decoded values accumulate onto a running delta total.
	pub const fn is_delta(self) -> bool {
		self.d
	}

	/// Whether this codec applies signed folding to the raw decoded value.
	pub const fn is_signed(self) -> bool {
		!matches!(self.s, SignMode::Unsigned)
	}

	/// `L = 256 - H`: the number of byte values, starting at zero, that terminate a value
	/// at a non-final byte position.
	const fn l(self) -> u32 {
		256 - self.h as u32
	}

	/// The total count of distinct raw (pre-sign-folding) values this codec can produce,
	/// i.e., its cardinality.
	pub fn cardinality(self) -> u64 {
		let h = self.h as u128;
		let l = self.l() as u128;
		let mut cardinality: u128 = 256 * h.pow(self.b as u32 - 1);
		for i in 0..self.b as u32 - 1 {
			cardinality += l * h.pow(i);
		}
		cardinality as u64
	}

	/// The smallest value this codec can decode, after sign folding.
	pub fn smallest(self) -> i64 {
		if self.is_signed() {
			-((self.cardinality() / 2) as i64)
		} else {
			0
		}
	}

	/// The largest value this codec can decode, after sign folding.
	pub fn largest(self) -> i64 {
		self.smallest() + self.cardinality() as i64 - 1
	}

	/// Folds a raw, unsigned base-256 numeral according to this codec's sign mode.
	const fn fold_sign(self, raw: u64) -> i64 {
		match self.s {
			SignMode::Unsigned => raw as i64,
			SignMode::Signed | SignMode::SignedExtra => {
				if raw % 2 == 1 {
					-(((raw + 1) / 2) as i64)
				} else {
					(raw / 2) as i64
				}
			}
		}
	}

	/// Wraps `value` into this codec's `[smallest, largest]` range using cardinality
	/// modular arithmetic, as required for delta-coded bands whose running accumulator can
	/// drift outside of the canonical range.
	pub fn wrap(self, value: i64) -> i64 {
		let cardinality = self.cardinality() as i64;
		let smallest = self.smallest();
		let offset = (value - smallest).rem_euclid(cardinality);
		smallest + offset
	}

	/// Reads the raw, unsigned base-256 numeral this codec decodes to, before sign folding
	/// or delta accumulation.
	fn decode_raw<R>(self, reader: &mut ByteReader<R>) -> Result<u64, BitstreamError>
	where
		R: Read
	{
		let mut result: u64 = 0;

		for i in 0..self.b {
			let byte = reader.read_required()? as u64;
			let weight = (self.h as u64).pow(i as u32);

			result += byte * weight;

			// The last byte is always terminal, regardless of its value. Before that,
			// a byte value below L terminates the numeral; values in [L, 256) signal
			// that another byte follows.
			if i == self.b - 1 || (byte as u32) < self.l() {
				break;
			}
		}

		Ok(result)
	}

	/// Decodes a single value, applying sign folding and, if this codec is delta-coded,
	/// adding it onto `accumulator` and wrapping the result into this codec's canonical
	/// range.
	///
	/// `accumulator` must be seeded at zero by the caller before decoding the first value
	/// of a band, and is expected to be threaded through successive calls for the same
	/// band. Non-delta codecs leave `accumulator` untouched.
	pub fn decode_one<R>(
		self,
		reader: &mut ByteReader<R>,
		accumulator: &mut i64
	) -> Result<i64, BitstreamError>
	where
		R: Read
	{
		let raw = self.decode_raw(reader)?;
		let folded = self.fold_sign(raw);

		if self.d {
			*accumulator = self.wrap(accumulator.wrapping_add(folded));
			Ok(*accumulator)
		} else {
			if folded < self.smallest() || folded > self.largest() {
				return Err(BitstreamError::OutOfRange { value: folded });
			}
			Ok(folded)
		}
	}

	/// Decodes `count` values in sequence, threading a fresh delta accumulator (seeded at
	/// zero) through the calls.
	pub fn decode_many<R>(
		self,
		reader: &mut ByteReader<R>,
		count: usize
	) -> Result<Vec<i64>, BitstreamError>
	where
		R: Read
	{
		let mut accumulator = 0i64;
		(0..count)
			.map(|_| self.decode_one(reader, &mut accumulator))
			.collect()
	}

	/// Decodes a whole band of `count` values, honoring the meta-codec "band-header inline
	/// override": if this codec's `B > 1` and the first decoded value falls into the escape
	/// range (`[-256, -1]` for a signed default, `[L, L+255]` for an unsigned one), the rest
	/// of the band is decoded with a replacement codec (or a population codec) parsed from
	/// the segment's band-header stream instead of with `self`.
	///
	/// `B == 1` codecs (`BYTE1`) have no representable escape range and are always decoded
	/// with `self` directly.
	pub fn decode_band<R>(self, reader: &mut ByteReader<R>, count: usize) -> Result<Vec<i64>, BitstreamError>
	where
		R: Read
	{
		if count == 0 || self.b <= 1 {
			return self.decode_many(reader, count);
		}

		let mut accumulator = 0i64;
		let first = self.decode_one(reader, &mut accumulator)?;

		match self.escape_index(first) {
			Some(_escape_index) => {
				let spec = CodecSpec::parse(reader)?;
				spec.decode(reader, count)
			}
			None => {
				let mut values = Vec::with_capacity(count);
				values.push(first);
				for _ in 1..count {
					values.push(self.decode_one(reader, &mut accumulator)?);
				}
				Ok(values)
			}
		}
	}

	/// If `first` falls into this codec's escape range, returns the 0-based index it
	/// encodes; otherwise returns `None`, meaning `first` is a real datum of the band.
	fn escape_index(self, first: i64) -> Option<u8> {
		if self.is_signed() {
			(-256..=-1).contains(&first).then(|| (first + 256) as u8)
		} else {
			let l = self.l() as i64;
			(l..=l + 255).contains(&first).then(|| (first - l) as u8)
		}
	}
}

/// A codec specification parsed from the band-header escape stream, as selected by a
/// meta-codec escape (see [`Codec::decode_band`]).
///
/// The stream is consumed sequentially: each escape pulls the next specification from
/// wherever the previous one left off, rather than random-accessing by the escape's index
/// value (the format does not document a directory format for doing otherwise, and a
/// sequential stream is sufficient to give every escaped band its own replacement codec).
enum CodecSpec {
	/// A plain BHSD codec: tag byte `0`, then `b`, `h - 1`, and a flags byte (bit 0 = signed,
	/// bit 1 = delta).
	Simple(Codec),
	/// A population codec: tag byte `1`, then three nested, non-population specifications
	/// for the token, favored, and unfavored sub-codecs, in that order.
	Population {
		token: Codec,
		favored: Codec,
		unfavored: Codec
	}
}

impl CodecSpec {
	fn parse<R>(reader: &mut ByteReader<R>) -> Result<Self, BitstreamError>
	where
		R: Read
	{
		match reader.next_band_header()? {
			0 => {
				let b = reader.next_band_header()?;
				let h_minus_one = reader.next_band_header()?;
				let flags = reader.next_band_header()?;
				let s = if flags & 0b01 != 0 { SignMode::Signed } else { SignMode::Unsigned };
				let d = flags & 0b10 != 0;
				let codec = Codec::try_new(b, h_minus_one as u16 + 1, s, d).ok_or_else(|| BitstreamError::BadCodec {
					detail: format!("band-header codec spec named out-of-range parameters (b={b}, h={})", h_minus_one as u16 + 1)
				})?;
				Ok(Self::Simple(codec))
			}
			1 => {
				let token = Self::parse(reader)?.into_simple()?;
				let favored = Self::parse(reader)?.into_simple()?;
				let unfavored = Self::parse(reader)?.into_simple()?;
				Ok(Self::Population { token, favored, unfavored })
			}
			other => Err(BitstreamError::BadCodec {
				detail: format!("unrecognized band-header codec spec tag {other}")
			})
		}
	}

	fn into_simple(self) -> Result<Codec, BitstreamError> {
		match self {
			Self::Simple(codec) => Ok(codec),
			Self::Population { .. } => Err(BitstreamError::BadCodec {
				detail: "a population codec's sub-codecs cannot themselves be population codecs".into()
			})
		}
	}

	fn decode<R>(self, reader: &mut ByteReader<R>, count: usize) -> Result<Vec<i64>, BitstreamError>
	where
		R: Read
	{
		match self {
			Self::Simple(codec) => codec.decode_many(reader, count),
			Self::Population { token, favored, unfavored } => {
				PopulationCodec::new(token, favored, unfavored).decode(reader, count)
			}
		}
	}
}
