//! Host-configurable decoding behavior.

/// Forces or disables the per-file deflate hint, or leaves it to the archive/file bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflateHintOverride {
	/// Honor whatever the archive default and per-file options bands say.
	#[default]
	Auto,
	/// Always mark emitted entries as deflate-compressed.
	On,
	/// Always mark emitted entries as stored (uncompressed).
	Off
}

/// Settings that customize how [`crate::decode_archive`] and [`crate::Segment::decode`]
/// behave.
///
/// Keeps a container-agnostic settings struct separate from host-level concerns
/// (verbosity, log sinks): those live with the CLI, not here.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct DecodeSettings {
	/// Overrides the deflate hint computed from the archive default and per-file options.
	pub deflate_hint_override: DeflateHintOverride
}

impl DecodeSettings {
	/// Returns a settings value with every option at its default.
	pub fn new() -> Self {
		Self::default()
	}
}
