use crate::{BitstreamError, ByteReader, Codec};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(feature = "std")]
use std::io::Read;

#[cfg(not(feature = "std"))]
use acid_io::Read;

/// A population codec splits a sequence of values into a small, sorted table of "favored"
/// values that recur often, encoded compactly by rank, and a residual "unfavored" stream
/// for everything else.
///
/// Decoding first reads `count` per-element tokens through `token`: a token of `0` marks
/// the corresponding output value as unfavored, drawn from the `unfavored` stream; a token
/// `N > 0` classifies it as the favored table's `N - 1`th entry. The favored table itself
/// is decoded through `favored` — sized to the largest token seen, since that's how many
/// distinct favored values the band can possibly name — and then sorted ascending, which
/// is what lets an encoder assign ranks by binary search against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationCodec {
	/// Decodes, per output element, which favored-table entry (if any) it selects.
	pub token: Codec,
	/// Decodes the favored table's entries.
	pub favored: Codec,
	/// Decodes the values for elements classified as unfavored.
	pub unfavored: Codec
}

impl PopulationCodec {
	/// Constructs a population codec from its three sub-codecs.
	pub const fn new(token: Codec, favored: Codec, unfavored: Codec) -> Self {
		Self {
			token,
			favored,
			unfavored
		}
	}

	/// Decodes `count` values.
	pub fn decode<R>(self, reader: &mut ByteReader<R>, count: usize) -> Result<Vec<i64>, BitstreamError>
	where
		R: Read
	{
		let mut token_accumulator = 0i64;
		let tokens: Vec<i64> = (0..count)
			.map(|_| self.token.decode_one(reader, &mut token_accumulator))
			.collect::<Result<_, _>>()?;

		let table_size = tokens.iter().copied().fold(0i64, |max, token| max.max(token)).max(0) as usize;
		let mut favored_table = self.favored.decode_many(reader, table_size)?;
		favored_table.sort_unstable();

		let unfavored_count = tokens.iter().filter(|&&token| token == 0).count();
		let unfavored_values = self.unfavored.decode_many(reader, unfavored_count)?;
		let mut unfavored_values = unfavored_values.into_iter();

		tokens
			.into_iter()
			.map(|token| {
				if token == 0 {
					unfavored_values.next().ok_or(BitstreamError::UnexpectedEof)
				} else {
					let rank = (token - 1) as usize;
					favored_table.get(rank).copied().ok_or(BitstreamError::OutOfRange { value: token })
				}
			})
			.collect()
	}
}
