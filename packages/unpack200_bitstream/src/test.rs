use std::io::Cursor;

use super::*;

fn reader_over(bytes: &[u8]) -> ByteReader<Cursor<&[u8]>> {
	ByteReader::new(Cursor::new(bytes))
}

#[test]
fn byte1_decodes_single_bytes() {
	let mut reader = reader_over(&[0x00, 0x05, 0xFF]);
	let mut accumulator = 0i64;

	assert_eq!(Codec::BYTE1.decode_one(&mut reader, &mut accumulator).unwrap(), 0);
	assert_eq!(Codec::BYTE1.decode_one(&mut reader, &mut accumulator).unwrap(), 5);
	assert_eq!(Codec::BYTE1.decode_one(&mut reader, &mut accumulator).unwrap(), 255);
}

#[test]
fn byte1_reports_eof() {
	let mut reader = reader_over(&[]);
	let mut accumulator = 0i64;

	assert!(matches!(
		Codec::BYTE1.decode_one(&mut reader, &mut accumulator),
		Err(BitstreamError::UnexpectedEof)
	));
}

#[test]
fn unsigned5_decodes_a_single_terminal_byte() {
	// L = 256 - 192 = 64. A byte below L terminates immediately.
	let mut reader = reader_over(&[5]);
	let mut accumulator = 0i64;

	assert_eq!(
		Codec::UNSIGNED5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		5
	);
}

#[test]
fn unsigned5_decodes_a_two_byte_continuation() {
	// byte0 = 64 (>= L, continuation, contributes 64 * 192^0 = 64)
	// byte1 = 3  (< L, terminal, contributes 3 * 192^1 = 576)
	let mut reader = reader_over(&[64, 3]);
	let mut accumulator = 0i64;

	assert_eq!(
		Codec::UNSIGNED5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		640
	);
}

#[test]
fn unsigned5_last_byte_is_always_terminal() {
	// Five continuation-range bytes: even though all five are >= L, the fifth byte always
	// terminates the value because B = 5.
	let mut reader = reader_over(&[200, 200, 200, 200, 200]);
	let mut accumulator = 0i64;

	let value = Codec::UNSIGNED5
		.decode_one(&mut reader, &mut accumulator)
		.unwrap();

	let expected = 200 + 200 * 192 + 200 * 192u64.pow(2) + 200 * 192u64.pow(3) + 200 * 192u64.pow(4);
	assert_eq!(value as u64, expected);
}

#[test]
fn signed5_folds_odd_and_even_raw_values() {
	// Raw 640 is even => 320. Raw 641 is odd => -321.
	let mut reader = reader_over(&[64, 3, 65, 3]);
	let mut accumulator = 0i64;

	assert_eq!(
		Codec::SIGNED5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		320
	);
	assert_eq!(
		Codec::SIGNED5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		-321
	);
}

#[test]
fn delta5_accumulates_across_values() {
	// Raw 2 folds to 1, raw 1 folds to -1. Delta accumulation: 0 + 1 = 1, then 1 + (-1) = 0.
	let mut reader = reader_over(&[2, 1]);
	let mut accumulator = 0i64;

	assert_eq!(
		Codec::DELTA5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		1
	);
	assert_eq!(accumulator, 1);
	assert_eq!(
		Codec::DELTA5
			.decode_one(&mut reader, &mut accumulator)
			.unwrap(),
		0
	);
	assert_eq!(accumulator, 0);
}

#[test]
fn byte1_cardinality_and_range() {
	assert_eq!(Codec::BYTE1.cardinality(), 256);
	assert_eq!(Codec::BYTE1.smallest(), 0);
	assert_eq!(Codec::BYTE1.largest(), 255);
}

#[test]
fn signed_single_byte_codec_range_is_centered_on_zero() {
	let codec = Codec::new(1, 256, SignMode::Signed, false);

	assert_eq!(codec.cardinality(), 256);
	assert_eq!(codec.smallest(), -128);
	assert_eq!(codec.largest(), 127);
}

#[test]
fn decode_many_reads_a_sequence() {
	let mut reader = reader_over(&[1, 2, 3]);
	let values = Codec::BYTE1.decode_many(&mut reader, 3).unwrap();
	assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn wrap_folds_values_back_into_range() {
	let codec = Codec::new(1, 256, SignMode::Signed, true);
	assert_eq!(codec.wrap(128), -128);
	assert_eq!(codec.wrap(-129), 127);
	assert_eq!(codec.wrap(0), 0);
}

#[test]
fn population_codec_classifies_by_rank_into_a_sorted_favored_table() {
	// Favored table (already sorted): [10, 20]. Tokens rank each output element: 1 and 2
	// select table entries 10 and 20, 0 pulls the next unfavored value.
	// Occurrence order: favored(10), unfavored(7), favored(20), unfavored(9), favored(10).
	let tokens = [1u8, 0, 2, 0, 1];
	let favored_table = [10u8, 20];
	let unfavored_stream = [7u8, 9];
	let bytes: Vec<u8> = tokens
		.into_iter()
		.chain(favored_table)
		.chain(unfavored_stream)
		.collect();
	let mut reader = reader_over(&bytes);

	let population = PopulationCodec::new(Codec::BYTE1, Codec::BYTE1, Codec::BYTE1);
	let decoded = population.decode(&mut reader, 5).unwrap();

	assert_eq!(decoded, vec![10, 7, 20, 9, 10]);
}

#[test]
fn population_codec_handles_all_unfavored() {
	let bytes = [0u8, 0, 0, 11, 22, 33];
	let mut reader = reader_over(&bytes);

	let population = PopulationCodec::new(Codec::BYTE1, Codec::BYTE1, Codec::BYTE1);
	let decoded = population.decode(&mut reader, 3).unwrap();

	assert_eq!(decoded, vec![11, 22, 33]);
}

#[test]
fn decode_band_uses_the_default_codec_when_the_first_value_is_not_an_escape() {
	let mut reader = reader_over(&[1, 2, 3]);
	let values = Codec::BYTE1.decode_band(&mut reader, 3).unwrap();
	assert_eq!(values, vec![1, 2, 3]);

	// UNSIGNED5's L is 64; a first byte of 5 is an ordinary in-range datum, not an escape.
	let mut reader = reader_over(&[5, 7]);
	let values = Codec::UNSIGNED5.decode_band(&mut reader, 2).unwrap();
	assert_eq!(values, vec![5, 7]);
}

#[test]
fn decode_band_escapes_to_a_replacement_codec_named_in_the_band_headers() {
	// UNSIGNED5's L = 64. Bytes [64, 0] decode to raw 64 (continuation byte 64, terminal
	// byte 0), which falls in [L, L+255] and so is treated as escape index 0, not a datum.
	// The replacement codec (BYTE1, named via the band headers) then decodes the single
	// requested value fresh from the next byte.
	let mut reader = reader_over(&[64, 0, 42]);
	reader.set_band_headers(vec![0, 1, 255, 0]); // Simple(b=1, h=256, unsigned, no delta)
	let values = Codec::UNSIGNED5.decode_band(&mut reader, 1).unwrap();
	assert_eq!(values, vec![42]);
}

#[test]
fn decode_band_escape_can_select_a_population_codec() {
	let mut reader = reader_over(&[64, 0, 1, 0, 10, 7]);
	reader.set_band_headers(vec![
		1, // population
		0, 1, 255, 0, // token: Simple(b=1, h=256, unsigned)
		0, 1, 255, 0, // favored: Simple(b=1, h=256, unsigned)
		0, 1, 255, 0 // unfavored: Simple(b=1, h=256, unsigned)
	]);
	let values = Codec::UNSIGNED5.decode_band(&mut reader, 2).unwrap();
	assert_eq!(values, vec![10, 7]);
}

#[test]
fn decode_band_reports_bad_codec_for_an_unrecognized_spec_tag() {
	let mut reader = reader_over(&[64, 0]);
	reader.set_band_headers(vec![9]);
	assert!(matches!(
		Codec::UNSIGNED5.decode_band(&mut reader, 1),
		Err(BitstreamError::BadCodec { .. })
	));
}

#[test]
fn population_codec_sorts_an_unsorted_favored_table() {
	// Favored table is transmitted as [20, 10]; decoding must sort it to [10, 20] before
	// ranks are meaningful, so rank 1 still means "10", not "20".
	let tokens = [1u8, 2];
	let favored_table = [20u8, 10];
	let bytes: Vec<u8> = tokens.into_iter().chain(favored_table).collect();
	let mut reader = reader_over(&bytes);

	let population = PopulationCodec::new(Codec::BYTE1, Codec::BYTE1, Codec::BYTE1);
	let decoded = population.decode(&mut reader, 2).unwrap();

	assert_eq!(decoded, vec![10, 20]);
}
