//! Shared error utilities used across the compilation pipeline.
//!
//! Grammar mismatches are not errors: productions report them as `Ok(false)`
//! and the parser backtracks. Everything in [`CompileError`] is fatal to the
//! current compilation unit. Diagnostics point at the offending column with a
//! caret under the source line.

use std::fmt;
use std::path::PathBuf;

use snafu::Snafu;

use crate::ty::Type;

pub type CompileResult<T> = Result<T, CompileError>;

/// 1-based position of a token inside the source, plus the line it sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
  pub line: usize,
  pub column: usize,
  excerpt: String,
}

impl Location {
  /// Resolve a byte offset into a line/column pair anchored in `source`.
  pub fn at(source: &str, loc: usize) -> Self {
    let mut safe_loc = loc.min(source.len());
    while !source.is_char_boundary(safe_loc) {
      safe_loc -= 1;
    }
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |idx| idx + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |idx| safe_loc + idx);
    let line = source[..line_start].matches('\n').count() + 1;
    let column = source[line_start..safe_loc].chars().count() + 1;
    Self {
      line,
      column,
      excerpt: source[line_start..line_end].trim_end_matches('\r').to_string(),
    }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let marker = format!("{}^", " ".repeat(self.column - 1));
    write!(
      f,
      "line {}, column {}\n  {}\n  {}",
      self.line, self.column, self.excerpt, marker
    )
  }
}

fn located(position: &Option<Location>) -> String {
  match position {
    Some(location) => format!(" at {location}"),
    None => String::new(),
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("undeclared identifier '{name}'{}", located(position)))]
  UndeclaredIdentifier {
    name: String,
    position: Option<Location>,
  },

  #[snafu(display("function '{name}' is not defined{}", located(position)))]
  UndefinedFunction {
    name: String,
    position: Option<Location>,
  },

  #[snafu(display("identifier '{name}' is already declared{}", located(position)))]
  DuplicateSymbol {
    name: String,
    position: Option<Location>,
  },

  #[snafu(display(
    "identifier '{name}' is declared as {declared} and cannot be redeclared as {requested}{}",
    located(position)
  ))]
  TypeConflict {
    name: String,
    declared: Type,
    requested: Type,
    position: Option<Location>,
  },

  #[snafu(display("only identifiers can enter the symbol table, got '{text}'"))]
  NonIdentifierInsertion { text: String },

  #[snafu(display("identifier '{name}' was declared without a type"))]
  UnresolvedType { name: String },

  #[snafu(display("no memory address left for '{name}'{}", located(position)))]
  AddressSpaceExhausted {
    name: String,
    position: Option<Location>,
  },

  #[snafu(display("'{name}' is not a token kind"))]
  UnknownTokenKind { name: String },

  #[snafu(display("illegal lexeme '{lexeme}' at {position}"))]
  LexicalError { lexeme: String, position: Location },

  #[snafu(display("{production}: unexpected {found} at {position}"))]
  SyntaxMismatch {
    production: String,
    found: String,
    position: Location,
  },

  #[snafu(display("cannot swap the last two instructions of a stream holding {len}"))]
  StreamTooShort { len: usize },

  #[snafu(display("could not access {}: {source}", path.display()))]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Anchor a semantic error at the token that triggered it, unless it
  /// already carries a location.
  pub fn located_at(mut self, at: Location) -> Self {
    match &mut self {
      Self::UndeclaredIdentifier { position, .. }
      | Self::UndefinedFunction { position, .. }
      | Self::DuplicateSymbol { position, .. }
      | Self::TypeConflict { position, .. }
      | Self::AddressSpaceExhausted { position, .. } => {
        position.get_or_insert(at);
      }
      _ => {}
    }
    self
  }

  /// True for errors raised by meaning rather than by shape.
  pub fn is_semantic(&self) -> bool {
    matches!(
      self,
      Self::UndeclaredIdentifier { .. }
        | Self::UndefinedFunction { .. }
        | Self::DuplicateSymbol { .. }
        | Self::TypeConflict { .. }
        | Self::NonIdentifierInsertion { .. }
        | Self::UnresolvedType { .. }
        | Self::AddressSpaceExhausted { .. }
    )
  }
}
