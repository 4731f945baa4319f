//! Lexical analysis: turns the raw input string into a vector of tokens, and
//! the cursor the parser walks over them.
//!
//! Tokenization is total. Anything that fits no lexical class becomes an
//! `Illegal` token instead of an error; the parser reports it only when the
//! grammar actually asks for that position. Two-character operators are
//! matched before single-character ones to avoid ambiguity, and `[* ... *]`
//! comments vanish before classification.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use crate::error::{CompileError, CompileResult};

const KEYWORDS: [&str; 14] = [
  "function", "integer", "boolean", "real", "if", "else", "endif", "while", "endwhile",
  "return", "scan", "print", "true", "false",
];

const OPERATORS: [&str; 5] = ["==", "!=", "<=", ">=", "=>"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
  Identifier,
  Integer,
  Real,
  Keyword,
  Operator,
  Separator,
  Illegal,
}

impl TokenKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Identifier => "identifier",
      Self::Integer => "integer",
      Self::Real => "real",
      Self::Keyword => "keyword",
      Self::Operator => "operator",
      Self::Separator => "separator",
      Self::Illegal => "illegal",
    }
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for TokenKind {
  type Err = CompileError;

  fn from_str(name: &str) -> CompileResult<Self> {
    match name {
      "identifier" => Ok(Self::Identifier),
      "integer" => Ok(Self::Integer),
      "real" => Ok(Self::Real),
      "keyword" => Ok(Self::Keyword),
      "operator" => Ok(Self::Operator),
      "separator" => Ok(Self::Separator),
      "illegal" => Ok(Self::Illegal),
      _ => Err(CompileError::UnknownTokenKind {
        name: name.to_string(),
      }),
    }
  }
}

/// A classified lexeme. The text is lowercased on construction; the kind
/// was decided on the raw spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub loc: usize,
}

impl Token {
  pub fn new(kind: TokenKind, text: &str, loc: usize) -> Self {
    Self {
      kind,
      text: text.to_lowercase(),
      loc,
    }
  }

  /// Build a token from a kind name, failing for names outside the fixed set.
  pub fn classified(kind: &str, text: &str, loc: usize) -> CompileResult<Self> {
    Ok(Self::new(kind.parse()?, text, loc))
  }

  pub fn is(&self, kind: TokenKind, text: &str) -> bool {
    self.kind == kind && self.text == text
  }

  pub fn is_keyword(&self, keyword: &str) -> bool {
    self.is(TokenKind::Keyword, keyword)
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{}='{}'>", self.kind, self.text)
  }
}

/// Lex the input into a flat vector of tokens. Never fails.
pub fn tokenize(input: &str) -> Vec<Token> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if input[i..].starts_with("[*") {
      i = input[i + 2..]
        .find("*]")
        .map_or(input.len(), |end| i + 2 + end + 2);
      continue;
    }

    if is_word_byte(c) {
      let start = i;
      while i < bytes.len() && is_word_byte(bytes[i]) {
        i += 1;
      }
      let text = &input[start..i];
      tokens.push(Token::new(classify_word(text), text, start));
      continue;
    }

    if let Some(op) = OPERATORS.into_iter().find(|op| input[i..].starts_with(op)) {
      tokens.push(Token::new(TokenKind::Operator, op, i));
      i += op.len();
      continue;
    }

    let kind = match c {
      b'+' | b'-' | b'*' | b'/' | b'=' | b'<' | b'>' => TokenKind::Operator,
      b'$' | b'(' | b')' | b'{' | b'}' | b',' | b';' => TokenKind::Separator,
      _ => TokenKind::Illegal,
    };
    let width = input[i..].chars().next().map_or(1, char::len_utf8);
    tokens.push(Token::new(kind, &input[i..i + width], i));
    i += width;
  }

  tokens
}

fn is_word_byte(c: u8) -> bool {
  c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

fn classify_word(text: &str) -> TokenKind {
  if KEYWORDS.contains(&text) {
    TokenKind::Keyword
  } else if is_identifier(text) {
    TokenKind::Identifier
  } else if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
    TokenKind::Integer
  } else if is_real(text) {
    TokenKind::Real
  } else {
    TokenKind::Illegal
  }
}

fn is_identifier(text: &str) -> bool {
  let mut chars = text.chars();
  matches!(chars.next(), Some(first) if first.is_ascii_alphabetic())
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `d+.d+` and nothing else: `26.` and `.009` stay illegal.
fn is_real(text: &str) -> bool {
  match text.split_once('.') {
    Some((whole, fraction)) => {
      !whole.is_empty()
        && !fraction.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
    }
    None => false,
  }
}

/// Write one `<kind='lexeme'>` line per token.
pub fn write_listing<W: Write>(tokens: &[Token], sink: &mut W) -> io::Result<()> {
  for token in tokens {
    writeln!(sink, "{token}")?;
  }
  Ok(())
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => format!("{} '{}'", t.kind, t.text),
    None => "end of input".to_string(),
  }
}

/// Cursor over the token vector with one-step backtracking and explicit
/// checkpoints. Running off the end is not an error: `next` and `peek`
/// simply return `None`.
#[derive(Debug, Clone)]
pub struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  pub fn new(tokens: Vec<Token>) -> Self {
    Self { tokens, pos: 0 }
  }

  /// Consume and return the token under the cursor.
  pub fn next(&mut self) -> Option<&Token> {
    let token = self.tokens.get(self.pos)?;
    self.pos += 1;
    Some(token)
  }

  pub fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  /// Undo one `next`. Stays at zero.
  pub fn backtrack(&mut self) {
    self.pos = self.pos.saturating_sub(1);
  }

  /// The token just consumed. At position zero this is the first token.
  pub fn previous(&self) -> Option<&Token> {
    self.tokens.get(self.pos.saturating_sub(1))
  }

  pub fn save(&self) -> usize {
    self.pos
  }

  pub fn restore(&mut self, mark: usize) {
    self.pos = mark.min(self.tokens.len());
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn get(&self, index: usize) -> Option<&Token> {
    self.tokens.get(index)
  }

  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tokens.is_empty()
  }

  pub fn is_exhausted(&self) -> bool {
    self.pos >= self.tokens.len()
  }

  pub fn tokens(&self) -> &[Token] {
    &self.tokens
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lexemes(source: &str) -> Vec<(TokenKind, String)> {
    tokenize(source)
      .into_iter()
      .map(|token| (token.kind, token.text))
      .collect()
  }

  fn tok(kind: TokenKind, text: &str) -> (TokenKind, String) {
    (kind, text.to_string())
  }

  #[test]
  fn splits_function_header() {
    use TokenKind::*;
    assert_eq!(
      lexemes("$function convertx (fahr integer)"),
      vec![
        tok(Separator, "$"),
        tok(Keyword, "function"),
        tok(Identifier, "convertx"),
        tok(Separator, "("),
        tok(Identifier, "fahr"),
        tok(Keyword, "integer"),
        tok(Separator, ")"),
      ]
    );
  }

  #[test]
  fn comments_are_elided() {
    assert!(tokenize("[* This is a one line comment *]").is_empty());
    assert_eq!(
      lexemes("a [* spans\ntwo lines *] b"),
      vec![tok(TokenKind::Identifier, "a"), tok(TokenKind::Identifier, "b")]
    );
    assert_eq!(lexemes("x [* never closed"), vec![tok(TokenKind::Identifier, "x")]);
  }

  #[test]
  fn classifies_operators_longest_first() {
    let kinds: Vec<_> = tokenize("+ - * / == != > < <= >= => =")
      .into_iter()
      .map(|token| (token.kind, token.text))
      .collect();
    let expected: Vec<_> = ["+", "-", "*", "/", "==", "!=", ">", "<", "<=", ">=", "=>", "="]
      .into_iter()
      .map(|op| tok(TokenKind::Operator, op))
      .collect();
    assert_eq!(kinds, expected);
    assert_eq!(
      lexemes("a<=b"),
      vec![
        tok(TokenKind::Identifier, "a"),
        tok(TokenKind::Operator, "<="),
        tok(TokenKind::Identifier, "b"),
      ]
    );
  }

  #[test]
  fn separators_and_keywords() {
    assert!(
      tokenize("(){},;$")
        .iter()
        .all(|token| token.kind == TokenKind::Separator)
    );
    assert!(
      tokenize("boolean else endif endwhile")
        .iter()
        .all(|token| token.kind == TokenKind::Keyword)
    );
  }

  #[test]
  fn identifiers_are_case_folded() {
    assert_eq!(
      lexemes("abc123 testIdentifier variable_1 MyVar"),
      vec![
        tok(TokenKind::Identifier, "abc123"),
        tok(TokenKind::Identifier, "testidentifier"),
        tok(TokenKind::Identifier, "variable_1"),
        tok(TokenKind::Identifier, "myvar"),
      ]
    );
  }

  #[test]
  fn classification_happens_before_lowercasing() {
    assert_eq!(lexemes("While"), vec![tok(TokenKind::Identifier, "while")]);
  }

  #[test]
  fn reals_need_digits_on_both_sides() {
    use TokenKind::*;
    assert_eq!(
      lexemes("7 3.14 25.0 26. .009 1.2.3 _x 1abc"),
      vec![
        tok(Integer, "7"),
        tok(Real, "3.14"),
        tok(Real, "25.0"),
        tok(Illegal, "26."),
        tok(Illegal, ".009"),
        tok(Illegal, "1.2.3"),
        tok(Illegal, "_x"),
        tok(Illegal, "1abc"),
      ]
    );
  }

  #[test]
  fn stray_characters_become_illegal_tokens() {
    use TokenKind::*;
    assert_eq!(
      lexemes("a ! é"),
      vec![tok(Identifier, "a"), tok(Illegal, "!"), tok(Illegal, "é")]
    );
  }

  #[test]
  fn tokenizing_is_deterministic() {
    let source = "$ $ integer i; $ while (i < 10) i = i + 1; endwhile $";
    assert_eq!(tokenize(source), tokenize(source));
  }

  #[test]
  fn token_kind_names_round_trip_and_reject_unknowns() {
    for kind in ["identifier", "illegal", "integer", "keyword", "operator", "real", "separator"] {
      let token = Token::classified(kind, "Random Val", 0).unwrap();
      assert_eq!(token.kind.name(), kind);
      assert_eq!(token.text, "random val");
    }
    assert!(matches!(
      Token::classified("fake_type", "x", 0),
      Err(CompileError::UnknownTokenKind { .. })
    ));
  }

  #[test]
  fn stream_signals_exhaustion_with_none() {
    let mut stream = TokenStream::new(tokenize("a b"));
    assert_eq!(stream.previous().map(|t| t.text.as_str()), Some("a"));
    assert_eq!(stream.next().map(|t| t.text.clone()), Some("a".into()));
    assert_eq!(stream.next().map(|t| t.text.clone()), Some("b".into()));
    assert!(stream.next().is_none());
    assert!(stream.peek().is_none());
    assert_eq!(stream.position(), 2);
    stream.backtrack();
    assert_eq!(stream.peek().map(|t| t.text.as_str()), Some("b"));
    assert_eq!(stream.previous().map(|t| t.text.as_str()), Some("a"));

    let mark = stream.save();
    stream.next();
    stream.restore(mark);
    assert_eq!(stream.position(), 1);

    stream.restore(0);
    stream.backtrack();
    assert_eq!(stream.position(), 0);
  }

  #[test]
  fn listing_uses_kind_and_lexeme() {
    let mut out = Vec::new();
    write_listing(&tokenize("x = 1;"), &mut out).unwrap();
    assert_eq!(
      String::from_utf8(out).unwrap(),
      "<identifier='x'>\n<operator='='>\n<integer='1'>\n<separator=';'>\n"
    );
  }
}
