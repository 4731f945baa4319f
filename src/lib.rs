//! Crate root: wires together the RAT24S compilation pipeline.
//!
//! - `tokenizer` turns source text into a flat, total token list.
//! - `parser` recognises the grammar by backtracking recursive descent and
//!   drives code generation while it goes.
//! - `codegen` holds the stack-machine instruction listing.
//! - `symbol_table` maps identifiers to memory addresses and types.
//! - `trace` records the derivation for `--print-productions`.
//! - `error` centralises the diagnostics shared by the other modules.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod symbol_table;
pub mod tokenizer;
pub mod trace;
pub mod ty;

pub use codegen::{Instruction, InstructionStream};
pub use error::{CompileError, CompileResult, Location};
pub use parser::{FunctionUnit, Parser, Production, Verdict};
pub use symbol_table::{DEFAULT_BASE_ADDRESS, Symbol, SymbolTable};
pub use tokenizer::{Token, TokenKind, tokenize};
pub use trace::Trace;
pub use ty::Type;

/// Knobs for a single compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
  /// First memory address handed out by the symbol table.
  pub base_address: u32,
  /// Record the derivation trace.
  pub trace: bool,
}

impl Default for CompilerOptions {
  fn default() -> Self {
    Self {
      base_address: DEFAULT_BASE_ADDRESS,
      trace: false,
    }
  }
}

/// Everything one compilation produced, valid or not.
#[derive(Debug)]
pub struct Compilation {
  pub tokens: Vec<Token>,
  pub instructions: InstructionStream,
  pub symbols: SymbolTable,
  pub functions: Vec<FunctionUnit>,
  pub trace: Trace,
  pub verdict: Verdict,
}

impl Compilation {
  pub fn is_valid(&self) -> bool {
    self.verdict.is_valid()
  }
}

/// Tokenize and parse `source`, generating code along the way.
pub fn compile(source: &str, options: &CompilerOptions) -> Compilation {
  let tokens = tokenizer::tokenize(source);
  let mut parser = Parser::new(source, tokens.clone(), options);
  let verdict = parser.run();
  let (instructions, symbols, functions, trace) = parser.into_parts();
  Compilation {
    tokens,
    instructions,
    symbols,
    functions,
    trace,
    verdict,
  }
}
