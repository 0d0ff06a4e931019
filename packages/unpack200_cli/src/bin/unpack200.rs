use std::borrow::Cow;
use std::env;
use std::fs::File;
use std::io::{self, stdin, stdout, Cursor, Read, Write};
use std::process::exit;
use std::time::Instant;

use flate2::read::GzDecoder;
use getopts::{Matches, Options, ParsingStyle};
use log::info;
use stderrlog::ColorChoice;
use unpack200::{decode_archive, DecodeSettings, DeflateHintOverride, JarEntry};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, DateTime};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const PACK200_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xD0, 0x0D];
const JAR_MAGIC_PREFIX: [u8; 2] = [b'P', b'K'];

fn main() {
	exit(match run() {
		Ok(_) => 0,
		Err(err) => {
			eprintln!("{}", err);
			1
		}
	})
}

fn run() -> Result<(), Cow<'static, str>> {
	let mut options = Options::new();

	options
		.optflag(
			"h",
			"help",
			"Prints information about the accepted command line arguments and exits."
		)
		.optflag(
			"",
			"version",
			"Prints version and copyright information, then exits."
		)
		.optflag(
			"q",
			"quiet",
			"When enabled, the program will only print error messages, unless -h is specified."
		)
		.optflagmulti(
			"v",
			"verbose",
			"Increases the verbosity of the messages. Can be repeated several times."
		)
		.optopt(
			"",
			"deflate_hint",
			"Overrides whether emitted JAR entries are stored deflated or verbatim.\n\
			Available values: auto (honor the archive's own hint, the default), on, off",
			"VALUE"
		)
		.parsing_style(ParsingStyle::StopAtFirstFree);

	match options.parse(env::args().skip(1)) {
		Ok(matches) => {
			if matches.opt_present("h") {
				print_header();
				println!();
				println!("Usage:");
				print!(
					"    {} [OPTION]... <input file or -> <output file or ->",
					env!("CARGO_BIN_NAME")
				);
				println!("{}", options.usage(""));
			} else if matches.opt_present("version") {
				print_header();
			} else {
				let quiet_mode = matches.opt_present("q");

				if !quiet_mode {
					print_header();
					println!();
				}

				if matches.free.len() != 2 {
					return Err(format!(
						"Too many or few file arguments specified. Run {} -h to see command line argument help",
						env!("CARGO_BIN_NAME")
					))?;
				}

				init_logging(&matches, quiet_mode);

				let input_file_name = &*matches.free[0];
				let output_file_name = &*matches.free[1];

				let input_bytes = read_input(input_file_name)
					.map_err(|err| format!("Could not read input file: {}", err))?;

				let settings = build_settings(&matches)?;

				let unpack_begin = Instant::now();
				let jar_bytes = unpack(&input_bytes, &settings, input_file_name)?;

				info!(
					"Processed {} in {:.3} s, writing {} bytes to {}",
					input_file_name,
					unpack_begin.elapsed().as_secs_f64(),
					jar_bytes.len(),
					output_file_name
				);

				write_output(output_file_name, &jar_bytes)
					.map_err(|err| format!("Could not write output file: {}", err))?;
			}

			Ok(())
		}
		Err(parse_err) => Err(format!(
			"{}\nRun {} -h to see command line argument help",
			parse_err,
			env!("CARGO_BIN_NAME")
		))?
	}
}

fn build_settings(matches: &Matches) -> Result<DecodeSettings, Cow<'static, str>> {
	let mut settings = DecodeSettings::new();
	match matches.opt_str("deflate_hint").as_deref() {
		Some("auto") | None => {}
		Some("on") => settings.deflate_hint_override = DeflateHintOverride::On,
		Some("off") => settings.deflate_hint_override = DeflateHintOverride::Off,
		Some(other) => return Err(format!("Invalid value for deflate_hint option: {}", other))?
	}
	Ok(settings)
}

fn read_input(input_file_name: &str) -> io::Result<Vec<u8>> {
	let mut bytes = Vec::new();
	match input_file_name {
		"-" => stdin().lock().read_to_end(&mut bytes)?,
		path => File::open(path)?.read_to_end(&mut bytes)?
	};
	Ok(bytes)
}

fn write_output(output_file_name: &str, bytes: &[u8]) -> io::Result<()> {
	match output_file_name {
		"-" => stdout().lock().write_all(bytes),
		path => File::create(path)?.write_all(bytes)
	}
}

/// Unwraps an optional gzip envelope, then either decodes a Pack200 archive or passes a
/// plain JAR through unchanged, producing final JAR bytes either way.
fn unpack(raw: &[u8], settings: &DecodeSettings, input_file_name: &str) -> Result<Vec<u8>, Cow<'static, str>> {
	let unwrapped: Cow<'_, [u8]> = if raw.starts_with(&GZIP_MAGIC) {
		info!("{} looks gzip-compressed, decompressing before further sniffing", input_file_name);
		let mut decoded = Vec::new();
		GzDecoder::new(raw)
			.read_to_end(&mut decoded)
			.map_err(|err| format!("Could not decompress gzip envelope: {}", err))?;
		Cow::Owned(decoded)
	} else {
		Cow::Borrowed(raw)
	};

	if unwrapped.starts_with(&PACK200_MAGIC) {
		info!("Decoding {} as a Pack200 archive", input_file_name);
		let entries = decode_archive(Cursor::new(unwrapped.as_ref()), settings)
			.map_err(|err| format!("Error while decoding Pack200 archive: {}", err))?;
		write_jar(&entries)
	} else if unwrapped.starts_with(&JAR_MAGIC_PREFIX) {
		info!("{} is already a JAR, passing it through unchanged", input_file_name);
		Ok(unwrapped.into_owned())
	} else {
		Err("Input is neither a Pack200 archive nor a JAR file".to_string())?
	}
}

fn write_jar(entries: &[JarEntry]) -> Result<Vec<u8>, Cow<'static, str>> {
	let mut out = Vec::new();
	{
		let mut writer = ZipWriter::new(Cursor::new(&mut out));
		writer.set_comment(unpack200::jar::JAR_COMMENT);

		for entry in entries {
			let options = SimpleFileOptions::default()
				.compression_method(if entry.deflate {
					CompressionMethod::Deflated
				} else {
					CompressionMethod::Stored
				})
				.last_modified_time(zip_datetime_from_epoch_ms(entry.modtime_ms))
				.unix_permissions(0o644);

			writer
				.start_file(&entry.name, options)
				.map_err(|err| format!("Could not start JAR entry '{}': {}", entry.name, err))?;
			writer
				.write_all(&entry.bytes)
				.map_err(|err| format!("Could not write JAR entry '{}': {}", entry.name, err))?;
		}

		writer.finish().map_err(|err| format!("Could not finalize JAR archive: {}", err))?;
	}
	Ok(out)
}

/// Converts milliseconds since the Unix epoch into a zip `DateTime`, falling back to the
/// MS-DOS epoch (1980-01-01) for timestamps the zip format cannot represent.
fn zip_datetime_from_epoch_ms(modtime_ms: i64) -> DateTime {
	let (y, mo, d, h, mi, s) = civil_from_epoch_seconds(modtime_ms.div_euclid(1000));
	DateTime::from_date_and_time(y, mo, d, h, mi, s).unwrap_or_else(|_| DateTime::default())
}

/// Howard Hinnant's `civil_from_days` algorithm, extended with a time-of-day split; avoids
/// pulling in a full calendar crate for one conversion.
fn civil_from_epoch_seconds(epoch_seconds: i64) -> (u16, u8, u8, u8, u8, u8) {
	let days = epoch_seconds.div_euclid(86400);
	let time_of_day = epoch_seconds.rem_euclid(86400);
	let (hour, minute, second) = ((time_of_day / 3600) as u8, ((time_of_day / 60) % 60) as u8, (time_of_day % 60) as u8);

	let z = days + 719468;
	let era = if z >= 0 { z } else { z - 146096 } / 146097;
	let doe = (z - era * 146097) as u64;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
	let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
	let y = if m <= 2 { y + 1 } else { y };

	(y.clamp(1980, 2107) as u16, m, d, hour, minute, second)
}

fn init_logging(option_matches: &Matches, quiet_mode: bool) {
	let verbosity_level = option_matches.opt_count("v");

	stderrlog::new()
		.module("unpack200")
		.module(env!("CARGO_BIN_NAME"))
		.verbosity(2 + verbosity_level)
		.show_level(false)
		.quiet(quiet_mode)
		.color(ColorChoice::Never)
		.init()
		.unwrap();
}

fn print_header() {
	println!("{}", unpack200::UNPACK200_VERSION_TAG);
	println!("{}", env!("CARGO_PKG_DESCRIPTION"));
	println!("Copyright (C) {}", env!("CARGO_PKG_AUTHORS"));
}
