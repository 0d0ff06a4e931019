//! Errors produced while decoding a Pack200 segment.

use std::fmt;

use unpack200_bitstream::BitstreamError;

/// A byte offset into the segment currently being decoded, together with the name of the
/// band being read when an error occurred.
///
/// Attached to most [`DecodeError`] variants so that a host can report where in the
/// archive a failure happened without needing to instrument every call site itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePosition {
	/// Byte offset into the segment, counted from the segment's own magic number.
	pub byte_offset: u64,
	/// The name of the band being decoded when the error was raised, for diagnostics.
	pub band: &'static str
}

impl fmt::Display for DecodePosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "band '{}' at byte offset {}", self.band, self.byte_offset)
	}
}

impl DecodePosition {
	/// Builds a position hint for the specified band, at the specified byte offset.
	pub const fn new(band: &'static str, byte_offset: u64) -> Self {
		Self { band, byte_offset }
	}
}

/// The error type returned when decoding a Pack200 segment fails.
///
/// Every variant carries a [`DecodePosition`] describing where the failure occurred,
/// matching the taxonomy laid out for this decoder: a segment either decodes fully, or it
/// fails with one typed error and no partial output is committed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
	/// The byte stream ended before a value, band, or segment could be fully decoded.
	#[error("unexpected end of stream ({position})")]
	UnexpectedEof {
		/// Where the stream ran out.
		position: DecodePosition
	},

	/// The expected `CA FE D0 0D` segment magic was not found.
	#[error("bad segment magic ({position})")]
	BadMagic {
		/// Where the magic check failed.
		position: DecodePosition,
		/// The four bytes actually read.
		found: [u8; 4]
	},

	/// A reserved option bit was set, or a union/layout tag this decoder does not
	/// implement was encountered.
	#[error("unsupported option or tag: {detail} ({position})")]
	UnsupportedOption {
		/// Where the unsupported feature was found.
		position: DecodePosition,
		/// A human-readable description of what was unsupported.
		detail: String
	},

	/// A meta-codec escape referenced an invalid codec specification, or a codec's own
	/// `(B, H, S, D)` parameters were out of range.
	#[error("bad codec specification: {detail} ({position})")]
	BadCodec {
		/// Where the bad codec specification was read.
		position: DecodePosition,
		/// A human-readable description of the problem.
		detail: String
	},

	/// A decoded index fell outside its target subpool, a count was negative, or widening
	/// arithmetic overflowed.
	#[error("value out of range: {detail} ({position})")]
	OutOfRange {
		/// Where the out-of-range value was produced.
		position: DecodePosition,
		/// A human-readable description of the problem.
		detail: String
	},

	/// An attribute-layout string could not be parsed.
	#[error("malformed attribute layout '{layout}' ({position})")]
	LayoutParse {
		/// Where the layout string was being parsed.
		position: DecodePosition,
		/// The layout string that failed to parse.
		layout: String
	},

	/// Two bands that are supposed to agree on a count (or other derived quantity)
	/// disagreed.
	#[error("inconsistent counts: {detail} ({position})")]
	Inconsistent {
		/// Where the inconsistency was detected.
		position: DecodePosition,
		/// A human-readable description of the mismatch.
		detail: String
	},

	/// An error occurred in the underlying byte-oriented codec layer.
	#[error("codec error ({position}): {source}")]
	Bitstream {
		/// Where the codec error occurred.
		position: DecodePosition,
		/// The underlying codec error.
		#[source]
		source: BitstreamError
	},

	/// An I/O error occurred while reading the segment's byte source.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error)
}

impl DecodeError {
	/// Wraps a [`BitstreamError`] with a position hint, for use at call sites that decode
	/// bands through `unpack200_bitstream`.
	pub fn from_bitstream(source: BitstreamError, band: &'static str, byte_offset: u64) -> Self {
		match source {
			BitstreamError::UnexpectedEof => Self::UnexpectedEof {
				position: DecodePosition::new(band, byte_offset)
			},
			BitstreamError::BadCodec { detail } => Self::BadCodec {
				position: DecodePosition::new(band, byte_offset),
				detail
			},
			BitstreamError::Io(io) => Self::Io(io),
			other => Self::Bitstream {
				position: DecodePosition::new(band, byte_offset),
				source: other
			}
		}
	}
}
