//! Shared error utilities used across the compilation pipeline.
//!
//! User-facing diagnostics point at the offending byte with a caret printed
//! under the source line that contains it.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("{source_line}\n{marker} {message}"))]
  WithLocation {
    source_line: String,
    marker: String,
    message: String,
  },

  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let mut safe_loc = loc.min(source.len());
    while !source.is_char_boundary(safe_loc) {
      safe_loc -= 1;
    }

    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    let column = source[line_start..safe_loc].chars().count();

    Self::WithLocation {
      source_line: source[line_start..line_end].to_string(),
      marker: format!("{}^", " ".repeat(column)),
      message: message.into(),
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn caret_points_at_offset() {
    let err = CompileError::at("1 + @", 4, "invalid token: '@'");
    assert_eq!(err.to_string(), "1 + @\n    ^ invalid token: '@'");
  }

  #[test]
  fn reports_only_the_failing_line() {
    let source = "a = 1;\nb = a +;\nreturn b;";
    let err = CompileError::at(source, 14, "expected an expression");
    assert_eq!(err.to_string(), "b = a +;\n       ^ expected an expression");
  }

  #[test]
  fn offset_past_end_is_clamped() {
    let err = CompileError::at("1 +", 10, "expected an expression, but got \"EOF\"");
    assert_eq!(
      err.to_string(),
      "1 +\n   ^ expected an expression, but got \"EOF\""
    );
  }

  #[test]
  fn internal_errors_are_labelled() {
    let err = CompileError::internal("register out of range: 6");
    assert_eq!(err.to_string(), "internal error: register out of range: 6");
  }
}
