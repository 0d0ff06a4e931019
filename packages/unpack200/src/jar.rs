//! The output shape produced by the decoder: a stream of JAR entries.

/// One file produced by decoding a segment, ready to be written into a JAR (zip)
/// container by the host.
///
/// The core never touches a zip writer itself; this type is the hand-off boundary to
/// whatever zip writer a host prefers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarEntry {
	/// The zip entry name, e.g. `p/A.class` or `META-INF/MANIFEST.MF`.
	pub name: String,
	/// Milliseconds since the Unix epoch, already scaled from the archive/file modtime
	/// fields (`1000 * (archive_modtime + file_modtime)`).
	pub modtime_ms: i64,
	/// Whether the host should store this entry deflated (`true`) or stored verbatim
	/// (`false`).
	pub deflate: bool,
	/// The entry's raw contents.
	pub bytes: Vec<u8>
}

impl JarEntry {
	/// Builds a new entry.
	pub const fn new(name: String, modtime_ms: i64, deflate: bool, bytes: Vec<u8>) -> Self {
		Self {
			name,
			modtime_ms,
			deflate,
			bytes
		}
	}
}

/// The literal comment every JAR produced by this decoder carries, matching the reference
/// packer's own behavior.
pub const JAR_COMMENT: &str = "PACK200";
