use std::fmt;

/// Declared type of a RAT24S identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
  Integer,
  Boolean,
  Real,
}

impl Type {
  /// Map a qualifier keyword (already lowercased by the tokenizer).
  pub fn from_keyword(keyword: &str) -> Option<Self> {
    match keyword {
      "integer" => Some(Self::Integer),
      "boolean" => Some(Self::Boolean),
      "real" => Some(Self::Real),
      _ => None,
    }
  }

  pub fn keyword(self) -> &'static str {
    match self {
      Self::Integer => "integer",
      Self::Boolean => "boolean",
      Self::Real => "real",
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.keyword())
  }
}
