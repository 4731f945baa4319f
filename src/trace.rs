//! Optional derivation trace: the productions the parser committed to,
//! interleaved with the tokens it consumed.
//!
//! Lines belong to the parser's transactional state. When an alternative
//! fails, the lines it produced are cut off again, so the trace only ever
//! shows the derivation that was kept.

use std::fmt;
use std::io::{self, Write};

use crate::tokenizer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
  Token { kind: TokenKind, lexeme: String },
  Rule(&'static str),
}

impl fmt::Display for TraceLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Token { kind, lexeme } => write!(f, "Token: {:<16}Lexeme: {}", kind.name(), lexeme),
      Self::Rule(rule) => write!(f, "  {rule}"),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
  enabled: bool,
  lines: Vec<TraceLine>,
}

impl Trace {
  pub fn new(enabled: bool) -> Self {
    Self {
      enabled,
      lines: Vec::new(),
    }
  }

  pub fn token(&mut self, token: &Token) {
    if self.enabled {
      self.lines.push(TraceLine::Token {
        kind: token.kind,
        lexeme: token.text.clone(),
      });
    }
  }

  pub fn rule(&mut self, rule: &'static str) {
    if self.enabled {
      self.lines.push(TraceLine::Rule(rule));
    }
  }

  /// Hold a place for a rule that is only known once the lines after it
  /// have been recorded. Returns the slot to hand to [`Trace::fill`].
  pub fn reserve(&mut self) -> usize {
    let slot = self.lines.len();
    if self.enabled {
      self.lines.push(TraceLine::Rule(""));
    }
    slot
  }

  pub fn fill(&mut self, slot: usize, rule: &'static str) {
    if let Some(TraceLine::Rule(reserved)) = self.lines.get_mut(slot) {
      *reserved = rule;
    }
  }

  pub fn len(&self) -> usize {
    self.lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn truncate(&mut self, len: usize) {
    self.lines.truncate(len);
  }

  pub fn lines(&self) -> &[TraceLine] {
    &self.lines
  }

  pub fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<()> {
    for line in &self.lines {
      writeln!(sink, "{line}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn disabled_trace_records_nothing() {
    let mut trace = Trace::new(false);
    trace.rule("<Empty> --> ε");
    trace.token(&Token::new(TokenKind::Separator, "$", 0));
    assert!(trace.is_empty());
  }

  #[test]
  fn lines_render_in_listing_format() {
    let mut trace = Trace::new(true);
    trace.token(&Token::new(TokenKind::Separator, "$", 0));
    trace.rule("<Opt Function Definitions> --> <Empty>");
    trace.token(&Token::new(TokenKind::Keyword, "print", 2));
    let mut out = Vec::new();
    trace.write_to(&mut out).unwrap();
    assert_eq!(
      String::from_utf8(out).unwrap(),
      "Token: separator       Lexeme: $\n  <Opt Function Definitions> --> <Empty>\nToken: keyword         Lexeme: print\n"
    );
    trace.truncate(1);
    assert_eq!(trace.len(), 1);
  }

  #[test]
  fn reserved_slot_keeps_its_place() {
    let mut trace = Trace::new(true);
    let slot = trace.reserve();
    trace.token(&Token::new(TokenKind::Identifier, "a", 0));
    trace.fill(slot, "<IDs> --> <Identifier>");
    assert_eq!(
      trace.lines(),
      [
        TraceLine::Rule("<IDs> --> <Identifier>"),
        TraceLine::Token {
          kind: TokenKind::Identifier,
          lexeme: "a".to_string(),
        },
      ]
    );

    let mut quiet = Trace::new(false);
    let slot = quiet.reserve();
    quiet.fill(slot, "<IDs> --> <Identifier>");
    assert!(quiet.is_empty());
  }
}
