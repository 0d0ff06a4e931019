use unpack200::{decode_archive, DecodeSettings};

fn main() {
	afl::fuzz!(|data: &[u8]| {
		// Each fuzz run has to be pretty fast. Just check that no crashes happen
		decode_archive(data, &DecodeSettings::new()).ok();
	})
}
