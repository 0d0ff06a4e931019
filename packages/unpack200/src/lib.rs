//! unpack200 is a Rust library for decoding Pack200-compressed Java archives back into
//! byte-exact JAR contents.
//!
//! Pack200 is the transfer format `pack200`/`unpack200` (JSR 200, retired in JDK 14) used
//! to shrink JAR files for distribution: rather than compressing class files as opaque
//! byte streams, it transposes their structure into column-oriented "bands" (one band per
//! kind of value across every class in the archive) and applies band-specific codecs, so
//! that values with low entropy within a column — constant-pool tags, access flags,
//! repeated descriptors — compress far better than they would interleaved. This crate
//! reverses that transform: it reads a Pack200 segment's bands and reassembles the class
//! files and resources they encode.
//!
//! # Entry points
//!
//! [`decode_archive`] is the entry point for a whole archive, which may be one or more
//! concatenated segments; it returns every [`JarEntry`] the archive carries, in their
//! original file-table order. [`Segment::decode`] decodes a single segment and is useful
//! to a caller that already knows it is dealing with one, or that wants to stream segments
//! one at a time rather than buffer a whole multi-segment archive's output at once.
//!
//! ```no_run
//! # fn main() -> Result<(), unpack200::DecodeError> {
//! use std::fs::File;
//! use unpack200::{decode_archive, DecodeSettings};
//!
//! let file = File::open("application.pack")?;
//! let entries = decode_archive(file, &DecodeSettings::new())?;
//! for entry in &entries {
//!     println!("{} ({} bytes)", entry.name, entry.bytes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Scope
//!
//! This crate decodes; it does not write a JAR (zip) container itself. [`JarEntry`] is the
//! hand-off boundary a host uses to drive whatever zip writer it prefers. It also does not
//! sniff or strip the gzip wrapper archives are commonly shipped in, or the `pack200`
//! encoder's own transmitted-order heuristics on the way in — those are concerns of the
//! command-line front end, not of the decoder itself.
//!
//! # Logging
//!
//! This crate uses the [`log`](https://crates.io/crates/log) crate for logging status and
//! diagnostic messages to any interested consumers. Executables can customize the
//! verbosity of this logging, and even compile it out, [as explained in the `log` crate
//! documentation](https://docs.rs/log/latest/log/).
//!
//! # Error handling
//!
//! Every fallible operation returns a [`DecodeError`], which carries a [`error::DecodePosition`]
//! pinpointing the band and byte offset a failure was detected at. Decoding a segment is
//! all-or-nothing: a segment either decodes fully, with no error, or a [`DecodeError`] is
//! returned and no partial output is committed for it.

#![forbid(unsafe_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![forbid(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![deny(non_ascii_idents)]
#![deny(clippy::print_stdout)]
#![deny(clippy::unimplemented)]
#![warn(explicit_outlives_requirements)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
#![warn(clippy::empty_enum)]
#![warn(clippy::enum_glob_use)]
#![warn(clippy::float_cmp_const)]
#![warn(clippy::invalid_upcast_comparisons)]
#![warn(clippy::multiple_inherent_impl)]
#![warn(clippy::use_self)]
#![warn(clippy::used_underscore_binding)]
#![warn(clippy::redundant_feature_names)]

use log::debug;
use unpack200_bitstream::ByteReader;

pub mod error;
pub mod jar;
pub mod segment;
pub mod settings;

pub use error::DecodeError;
pub use jar::JarEntry;
pub use segment::Segment;
pub use settings::{DecodeSettings, DeflateHintOverride};

/// A text tag that precisely identifies this unpack200 build.
pub static UNPACK200_VERSION_TAG: &str = concat!(
	"unpack200 ",
	env!("UNPACK200_VERSION"),
	env!("UNPACK200_BUILD_DATE_VERSION_SUFFIX")
);

/// Decodes every segment of a Pack200 archive, concatenating their file tables into one
/// list of entries.
///
/// Most archives carry exactly one segment; archives produced with `pack200`'s segment
/// splitting carry several, each a complete, independently decodable unit that picks up
/// where the last one's constant pool left off in numbering but not in content. This
/// function decodes them one after another from the same underlying stream and returns
/// their entries in order.
pub fn decode_archive<R: std::io::Read>(reader: R, settings: &DecodeSettings) -> Result<Vec<JarEntry>, DecodeError> {
	let mut br = ByteReader::new(reader);
	let mut entries = Vec::new();
	let mut segment_index = 0usize;

	loop {
		let more = br
			.peek()
			.map_err(|e| DecodeError::from_bitstream(e, "archive.segment", br.position()))?
			.is_some();
		if !more {
			break;
		}

		debug!("Decoding archive segment #{segment_index}");
		let segment = Segment::decode(&mut br, settings)?;
		entries.extend(segment.entries);
		segment_index += 1;
	}

	Ok(entries)
}
