//! Thin text-protocol parser for the management surface described in
//! `spec.md` §6.3, kept alongside the typed [`crate::RamDiskNamespace`]
//! API rather than instead of it. Lines look like:
//!
//! ```text
//! attach 0 67108864
//! detach 0
//! resize 0 134217728
//! ```
//!
//! This module only parses; dispatching a parsed [`AdminCommand`] against
//! a namespace is the caller's job.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
	Attach { id: u32, size_bytes: u64 },
	Detach { id: u32 },
	Resize { id: u32, new_size_bytes: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
	#[error("empty command line")]
	Empty,

	#[error("unrecognized command {0:?}")]
	UnknownVerb(String),

	#[error("{verb} expects {expected} argument(s), got {got}")]
	WrongArity {
		verb: &'static str,
		expected: usize,
		got: usize,
	},

	#[error("{0:?} is not a valid integer")]
	NotAnInteger(String),
}

/// Parse one line of the text protocol into a typed command. Surrounding
/// whitespace is trimmed; blank lines and `#`-prefixed comment lines are
/// rejected as [`AdminError::Empty`] so callers can skip them uniformly.
pub fn parse_line(line: &str) -> Result<AdminCommand, AdminError> {
	let line = line.trim();
	if line.is_empty() || line.starts_with('#') {
		return Err(AdminError::Empty);
	}

	let mut parts = line.split_whitespace();
	let verb = parts.next().ok_or(AdminError::Empty)?;
	let args: Vec<&str> = parts.collect();

	match verb {
		"attach" => {
			let [id, size] = expect_args(verb, &args, 2)?;
			Ok(AdminCommand::Attach {
				id: parse_u32(id)?,
				size_bytes: parse_u64(size)?,
			})
		}
		"detach" => {
			let [id] = expect_args(verb, &args, 1)?;
			Ok(AdminCommand::Detach { id: parse_u32(id)? })
		}
		"resize" => {
			let [id, size] = expect_args(verb, &args, 2)?;
			Ok(AdminCommand::Resize {
				id: parse_u32(id)?,
				new_size_bytes: parse_u64(size)?,
			})
		}
		other => Err(AdminError::UnknownVerb(other.to_string())),
	}
}

fn expect_args<'a, const N: usize>(
	verb: &'static str,
	args: &'a [&'a str],
	expected: usize,
) -> Result<[&'a str; N], AdminError> {
	args.try_into().map_err(|_| AdminError::WrongArity {
		verb,
		expected,
		got: args.len(),
	})
}

fn parse_u32(s: &str) -> Result<u32, AdminError> {
	s.parse().map_err(|_| AdminError::NotAnInteger(s.to_string()))
}

fn parse_u64(s: &str) -> Result<u64, AdminError> {
	s.parse().map_err(|_| AdminError::NotAnInteger(s.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_attach() {
		assert_eq!(
			parse_line("attach 0 67108864").unwrap(),
			AdminCommand::Attach {
				id: 0,
				size_bytes: 67108864
			}
		);
	}

	#[test]
	fn parses_detach() {
		assert_eq!(
			parse_line("  detach 3  ").unwrap(),
			AdminCommand::Detach { id: 3 }
		);
	}

	#[test]
	fn parses_resize() {
		assert_eq!(
			parse_line("resize 3 134217728").unwrap(),
			AdminCommand::Resize {
				id: 3,
				new_size_bytes: 134217728
			}
		);
	}

	#[test]
	fn rejects_blank_and_comment_lines() {
		assert_eq!(parse_line(""), Err(AdminError::Empty));
		assert_eq!(parse_line("   "), Err(AdminError::Empty));
		assert_eq!(parse_line("# a comment"), Err(AdminError::Empty));
	}

	#[test]
	fn rejects_unknown_verb() {
		assert_eq!(
			parse_line("frobnicate 0"),
			Err(AdminError::UnknownVerb("frobnicate".to_string()))
		);
	}

	#[test]
	fn rejects_wrong_arity() {
		assert_eq!(
			parse_line("attach 0"),
			Err(AdminError::WrongArity {
				verb: "attach",
				expected: 2,
				got: 1
			})
		);
		assert_eq!(
			parse_line("detach 0 1"),
			Err(AdminError::WrongArity {
				verb: "detach",
				expected: 1,
				got: 2
			})
		);
	}

	#[test]
	fn rejects_non_integer_arguments() {
		assert_eq!(
			parse_line("attach zero 4096"),
			Err(AdminError::NotAnInteger("zero".to_string()))
		);
	}
}
