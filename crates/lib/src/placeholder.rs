//! Placeholder parsing and substitution for installer command templates.
//!
//! Installer templates are written once in the manifest and rendered per
//! build step. This module parses the template and substitutes values that
//! depend on the step being executed.
//!
//! # Placeholder Formats
//!
//! - `$${requirements}` - shell-quoted requirement specifiers (`numpy==1.26.4`)
//! - `$${names}` - space-separated package names
//! - `$${names_csv}` - comma-separated package names
//! - `$${reinstall}` - the installer's reinstall flags on reinstall steps, empty otherwise
//! - `$${root}` - the working root the step installs into
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use abiforge_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("pip install $${requirements} --root $HOME").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("pip install ".to_string()),
//!     Segment::Placeholder(Placeholder::Requirements),
//!     Segment::Literal(" --root $HOME".to_string()),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Requirements,
  Names,
  NamesCsv,
  Reinstall,
  Root,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder '{0}' has no value in this context")]
  Unresolved(String),
}

/// Trait for resolving placeholder values while rendering a step command.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or names an unknown value.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            // "$$$": escape when followed by "{"
            chars.next();

            match chars.peek() {
              Some((_, '{')) => {
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;

            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_name(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder_name(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content {
    "requirements" => Ok(Placeholder::Requirements),
    "names" => Ok(Placeholder::Names),
    "names_csv" => Ok(Placeholder::NamesCsv),
    "reinstall" => Ok(Placeholder::Reinstall),
    "root" => Ok(Placeholder::Root),
    other => Err(PlaceholderError::Unknown(other.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(resolver.resolve(p)?),
    }
  }

  Ok(result)
}
