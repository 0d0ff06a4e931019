//! Small helpers for reasoning about JVM method descriptors without a full type parser.

/// The number of local variable slots a method's parameter list occupies, counting `J`
/// (`long`) and `D` (`double`) as two slots each.
pub fn parameter_word_count(descriptor: &str) -> u32 {
	let Some(params) = descriptor.strip_prefix('(').and_then(|rest| rest.split(')').next()) else {
		return 0;
	};

	let mut words = 0u32;
	let mut chars = params.chars().peekable();
	while let Some(c) = chars.next() {
		match c {
			'[' => {
				// An array is always a single reference slot, whatever its element type;
				// skip the element type entirely instead of falling into the `J`/`D`
				// double-width case below.
				while chars.next_if(|&c| c == '[').is_some() {}
				match chars.next() {
					Some('L') => {
						while chars.next_if(|&c| c != ';').is_some() {}
						chars.next();
					}
					_ => {}
				}
				words += 1;
			}
			'L' => {
				while chars.next_if(|&c| c != ';').is_some() {}
				chars.next();
				words += 1;
			}
			'J' | 'D' => words += 2,
			_ => words += 1
		}
	}
	words
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_arg_void_method() {
		assert_eq!(parameter_word_count("()V"), 0);
	}

	#[test]
	fn mixed_primitive_and_reference_args() {
		assert_eq!(parameter_word_count("(IJLjava/lang/String;D)V"), 5);
	}

	#[test]
	fn array_arguments_count_as_one_word() {
		assert_eq!(parameter_word_count("([I[Ljava/lang/String;)V"), 2);
	}

	#[test]
	fn array_of_long_still_counts_as_one_word() {
		assert_eq!(parameter_word_count("([J)V"), 1);
	}
}
