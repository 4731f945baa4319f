//! Recursive-descent parser for RAT24S that generates stack-machine code as
//! it recognises the input.
//!
//! Every production is a method returning `Ok(true)` when it matched and
//! `Ok(false)` when it did not. A production that does not match leaves no
//! trace behind: [`Parser::attempt`] checkpoints the cursor, the emitted
//! code, the pending jumps, the derivation trace and the symbol tables, and
//! rolls all of them back on a mismatch. Semantic violations are `Err` and
//! abort the whole parse.
//!
//! The list productions (`<IDs>`, `<Parameter List>`, `<Declaration List>`,
//! `<Statement List>`, `<Function Definitions>`) share a FIRST set between
//! their two alternatives. [`Parser::list`] parses each item once, then peeks
//! at the token after it to pick the alternative. The rule line is reserved
//! before the item and filled in afterwards, so the trace reads as if the
//! right-recursive alternative had been chosen up front. Lists and the
//! expression tails loop instead of recursing, so only nesting deepens the
//! call stack.

use std::fmt;
use std::mem;

use tracing::{debug, trace, warn};

use crate::CompilerOptions;
use crate::codegen::{Instruction, InstructionStream};
use crate::error::{CompileError, CompileResult, Location};
use crate::symbol_table::{SymbolMark, SymbolTable};
use crate::tokenizer::{Token, TokenKind, TokenStream, describe_token};
use crate::trace::Trace;
use crate::ty::Type;

/// Grammar productions, used for failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Production {
  Program,
  OptFunctions,
  Functions,
  Function,
  OptParams,
  ParamList,
  Param,
  Qualifier,
  Body,
  OptDeclarations,
  DeclarationList,
  Declaration,
  IdList,
  StatementList,
  Statement,
  Compound,
  Assign,
  If,
  IfTail,
  Return,
  Print,
  Scan,
  While,
  Condition,
  Relop,
  Expression,
  ExpressionTail,
  Term,
  TermTail,
  Factor,
  Primary,
  Empty,
}

impl Production {
  pub fn name(self) -> &'static str {
    match self {
      Self::Program => "Rat24S",
      Self::OptFunctions => "Opt Function Definitions",
      Self::Functions => "Function Definitions",
      Self::Function => "Function",
      Self::OptParams => "Opt Parameter List",
      Self::ParamList => "Parameter List",
      Self::Param => "Parameter",
      Self::Qualifier => "Qualifier",
      Self::Body => "Body",
      Self::OptDeclarations => "Opt Declaration List",
      Self::DeclarationList => "Declaration List",
      Self::Declaration => "Declaration",
      Self::IdList => "IDs",
      Self::StatementList => "Statement List",
      Self::Statement => "Statement",
      Self::Compound => "Compound",
      Self::Assign => "Assign",
      Self::If => "If",
      Self::IfTail => "If Tail",
      Self::Return => "Return",
      Self::Print => "Print",
      Self::Scan => "Scan",
      Self::While => "While",
      Self::Condition => "Condition",
      Self::Relop => "Relop",
      Self::Expression => "Expression",
      Self::ExpressionTail => "Expression Tail",
      Self::Term => "Term",
      Self::TermTail => "Term Tail",
      Self::Factor => "Factor",
      Self::Primary => "Primary",
      Self::Empty => "Empty",
    }
  }
}

impl fmt::Display for Production {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{}>", self.name())
  }
}

/// Relational operators recognised by `<Relop>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
  Eq,
  Ne,
  Gt,
  Lt,
  Le,
  Ge,
}

impl RelOp {
  fn from_symbol(symbol: &str) -> Option<Self> {
    match symbol {
      "==" => Some(Self::Eq),
      "!=" => Some(Self::Ne),
      ">" => Some(Self::Gt),
      "<" => Some(Self::Lt),
      "<=" => Some(Self::Le),
      ">=" | "=>" => Some(Self::Ge),
      _ => None,
    }
  }

  fn rule(self) -> &'static str {
    match self {
      Self::Eq => "<Relop> --> ==",
      Self::Ne => "<Relop> --> !=",
      Self::Gt => "<Relop> --> >",
      Self::Lt => "<Relop> --> <",
      Self::Le => "<Relop> --> <=",
      Self::Ge => "<Relop> --> >=",
    }
  }

  pub fn instruction(self) -> Instruction {
    match self {
      Self::Eq => Instruction::Equ,
      Self::Ne => Instruction::Neq,
      Self::Gt => Instruction::Grt,
      Self::Lt => Instruction::Les,
      Self::Le => Instruction::Leq,
      Self::Ge => Instruction::Geq,
    }
  }
}

/// What `<IDs>` does with each identifier it recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdUsage {
  /// Insert into the symbol table, with the type if it is already known.
  Declare(Option<Type>),
  /// Read from input into the identifier: `SIN`, `POPM`.
  Scan,
  /// Push the identifier as a call argument.
  Argument,
}

/// A compiled function: its own symbols and its own listing.
#[derive(Debug, Clone)]
pub struct FunctionUnit {
  pub name: String,
  pub symbols: SymbolTable,
  pub instructions: InstructionStream,
}

/// Final word on a compilation unit.
#[derive(Debug)]
pub enum Verdict {
  Valid,
  Invalid {
    production: Production,
    error: CompileError,
  },
}

impl Verdict {
  pub fn is_valid(&self) -> bool {
    matches!(self, Self::Valid)
  }

  pub fn error(&self) -> Option<&CompileError> {
    match self {
      Self::Valid => None,
      Self::Invalid { error, .. } => Some(error),
    }
  }
}

/// Results a production can hand back through [`Parser::attempt`].
trait Outcome {
  fn matched(&self) -> bool;
}

impl Outcome for bool {
  fn matched(&self) -> bool {
    *self
  }
}

impl<T> Outcome for Option<T> {
  fn matched(&self) -> bool {
    self.is_some()
  }
}

struct Checkpoint {
  cursor: usize,
  code_len: usize,
  pending: Vec<usize>,
  trace_len: usize,
  symbols: SymbolMark,
  functions_len: usize,
  function_names_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Mismatch {
  position: usize,
  production: Production,
}

const RULE_PROGRAM: &str =
  "<Rat24S> --> $ <Opt Function Definitions> $ <Opt Declaration List> $ <Statement List> $";
const RULE_OPT_FUNCTIONS: &str = "<Opt Function Definitions> --> <Function Definitions>";
const RULE_OPT_FUNCTIONS_EMPTY: &str = "<Opt Function Definitions> --> <Empty>";
const RULE_FUNCTIONS_ONE: &str = "<Function Definitions> --> <Function>";
const RULE_FUNCTIONS_MORE: &str = "<Function Definitions> --> <Function> <Function Definitions>";
const RULE_FUNCTION: &str =
  "<Function> --> function <Identifier> ( <Opt Parameter List> ) <Opt Declaration List> <Body>";
const RULE_OPT_PARAMS: &str = "<Opt Parameter List> --> <Parameter List>";
const RULE_OPT_PARAMS_EMPTY: &str = "<Opt Parameter List> --> <Empty>";
const RULE_PARAMS_ONE: &str = "<Parameter List> --> <Parameter>";
const RULE_PARAMS_MORE: &str = "<Parameter List> --> <Parameter> , <Parameter List>";
const RULE_PARAM: &str = "<Parameter> --> <IDs> <Qualifier>";
const RULE_BODY: &str = "<Body> --> { <Statement List> }";
const RULE_OPT_DECLARATIONS: &str = "<Opt Declaration List> --> <Declaration List>";
const RULE_OPT_DECLARATIONS_EMPTY: &str = "<Opt Declaration List> --> <Empty>";
const RULE_DECLARATIONS_ONE: &str = "<Declaration List> --> <Declaration> ;";
const RULE_DECLARATIONS_MORE: &str = "<Declaration List> --> <Declaration> ; <Declaration List>";
const RULE_DECLARATION: &str = "<Declaration> --> <Qualifier> <IDs>";
const RULE_IDS_ONE: &str = "<IDs> --> <Identifier>";
const RULE_IDS_MORE: &str = "<IDs> --> <Identifier> , <IDs>";
const RULE_STATEMENTS_ONE: &str = "<Statement List> --> <Statement>";
const RULE_STATEMENTS_MORE: &str = "<Statement List> --> <Statement> <Statement List>";
const RULE_COMPOUND: &str = "<Compound> --> { <Statement List> }";
const RULE_ASSIGN: &str = "<Assign> --> <Identifier> = <Expression> ;";
const RULE_IF: &str = "<If> --> if ( <Condition> ) <Statement> <If Tail>";
const RULE_ENDIF: &str = "<If Tail> --> endif";
const RULE_ELSE: &str = "<If Tail> --> else <Statement> endif";
const RULE_RETURN: &str = "<Return> --> return ;";
const RULE_RETURN_VALUE: &str = "<Return> --> return <Expression> ;";
const RULE_PRINT: &str = "<Print> --> print ( <Expression> ) ;";
const RULE_SCAN: &str = "<Scan> --> scan ( <IDs> ) ;";
const RULE_WHILE: &str = "<While> --> while ( <Condition> ) <Statement> endwhile";
const RULE_CONDITION: &str = "<Condition> --> <Expression> <Relop> <Expression>";
const RULE_EXPRESSION: &str = "<Expression> --> <Term> <Expression Tail>";
const RULE_ADD: &str = "<Expression Tail> --> + <Term> <Expression Tail>";
const RULE_SUB: &str = "<Expression Tail> --> - <Term> <Expression Tail>";
const RULE_EXPRESSION_END: &str = "<Expression Tail> --> <Empty>";
const RULE_TERM: &str = "<Term> --> <Factor> <Term Tail>";
const RULE_MUL: &str = "<Term Tail> --> * <Factor> <Term Tail>";
const RULE_DIV: &str = "<Term Tail> --> / <Factor> <Term Tail>";
const RULE_TERM_END: &str = "<Term Tail> --> <Empty>";
const RULE_NEGATE: &str = "<Factor> --> - <Primary>";
const RULE_FACTOR: &str = "<Factor> --> <Primary>";
const RULE_CALL: &str = "<Primary> --> <Identifier> ( <IDs> )";
const RULE_IDENTIFIER: &str = "<Primary> --> <Identifier>";
const RULE_INTEGER: &str = "<Primary> --> <Integer>";
const RULE_PARENS: &str = "<Primary> --> ( <Expression> )";
const RULE_REAL: &str = "<Primary> --> <Real>";
const RULE_TRUE: &str = "<Primary> --> true";
const RULE_FALSE: &str = "<Primary> --> false";

const STATEMENT_KEYWORDS: [&str; 5] = ["if", "return", "print", "scan", "while"];

/// Whether `token` can open a `<Statement>`.
fn starts_statement(token: &Token) -> bool {
  match token.kind {
    TokenKind::Identifier => true,
    TokenKind::Separator => token.text == "{",
    TokenKind::Keyword => STATEMENT_KEYWORDS.contains(&token.text.as_str()),
    _ => false,
  }
}

pub struct Parser<'a> {
  source: &'a str,
  stream: TokenStream,
  symbols: SymbolTable,
  code: InstructionStream,
  /// Indices of jumps still waiting for their target, innermost last.
  pending: Vec<usize>,
  functions: Vec<FunctionUnit>,
  function_names: Vec<String>,
  trace: Trace,
  active: Vec<Production>,
  furthest: Option<Mismatch>,
  failed_in: Option<Production>,
}

impl<'a> Parser<'a> {
  pub fn new(source: &'a str, tokens: Vec<Token>, options: &CompilerOptions) -> Self {
    Self {
      source,
      stream: TokenStream::new(tokens),
      symbols: SymbolTable::new(options.base_address),
      code: InstructionStream::new(),
      pending: Vec::new(),
      functions: Vec::new(),
      function_names: Vec::new(),
      trace: Trace::new(options.trace),
      active: Vec::new(),
      furthest: None,
      failed_in: None,
    }
  }

  /// Parse the whole token stream as a `<Rat24S>` program.
  pub fn run(&mut self) -> Verdict {
    match self.program() {
      Ok(true) if self.stream.is_exhausted() => Verdict::Valid,
      Ok(true) => {
        let position = self.stream.position();
        Verdict::Invalid {
          production: Production::Program,
          error: self.syntax_error(position, Production::Program),
        }
      }
      Ok(false) => {
        let mismatch = self.furthest.unwrap_or(Mismatch {
          position: 0,
          production: Production::Program,
        });
        Verdict::Invalid {
          production: mismatch.production,
          error: self.syntax_error(mismatch.position, mismatch.production),
        }
      }
      Err(error) => {
        let production = self.failed_in.unwrap_or(Production::Program);
        warn!(%production, %error, "semantic error aborted the parse");
        let summary = error.to_string();
        let marker = summary.lines().next().unwrap_or_default().to_string();
        self.code.emit(Instruction::Error(marker));
        Verdict::Invalid { production, error }
      }
    }
  }

  pub fn position(&self) -> usize {
    self.stream.position()
  }

  pub fn is_exhausted(&self) -> bool {
    self.stream.is_exhausted()
  }

  pub fn instructions(&self) -> &InstructionStream {
    &self.code
  }

  pub fn symbols(&self) -> &SymbolTable {
    &self.symbols
  }

  pub fn function_units(&self) -> &[FunctionUnit] {
    &self.functions
  }

  pub fn trace(&self) -> &Trace {
    &self.trace
  }

  pub fn into_parts(self) -> (InstructionStream, SymbolTable, Vec<FunctionUnit>, Trace) {
    (self.code, self.symbols, self.functions, self.trace)
  }

  // ---------------------------------------------------------------------
  // Transactions
  // ---------------------------------------------------------------------

  fn checkpoint(&self) -> Checkpoint {
    Checkpoint {
      cursor: self.stream.save(),
      code_len: self.code.len(),
      pending: self.pending.clone(),
      trace_len: self.trace.len(),
      symbols: self.symbols.mark(),
      functions_len: self.functions.len(),
      function_names_len: self.function_names.len(),
    }
  }

  fn rollback(&mut self, checkpoint: Checkpoint) {
    self.stream.restore(checkpoint.cursor);
    self.code.truncate(checkpoint.code_len);
    self.pending = checkpoint.pending;
    self.trace.truncate(checkpoint.trace_len);
    self.symbols.rewind(checkpoint.symbols);
    self.functions.truncate(checkpoint.functions_len);
    self.function_names.truncate(checkpoint.function_names_len);
  }

  /// Run one production, undoing everything it did if it does not match.
  fn attempt<T: Outcome>(
    &mut self,
    production: Production,
    parse: impl FnOnce(&mut Self) -> CompileResult<T>,
  ) -> CompileResult<T> {
    let checkpoint = self.checkpoint();
    self.active.push(production);
    let result = parse(self);
    self.active.pop();

    match &result {
      Ok(outcome) if !outcome.matched() => {
        trace!(%production, position = checkpoint.cursor, "backtracked");
        self.rollback(checkpoint);
      }
      Err(_) => {
        self.failed_in.get_or_insert(production);
      }
      Ok(_) => {}
    }
    result
  }

  /// Try one alternative of the current production under its own checkpoint.
  fn alternative(
    &mut self,
    rule: &'static str,
    parse: impl FnOnce(&mut Self) -> CompileResult<bool>,
  ) -> CompileResult<bool> {
    let checkpoint = self.checkpoint();
    self.trace.rule(rule);
    let matched = parse(self)?;
    if !matched {
      self.rollback(checkpoint);
    }
    Ok(matched)
  }

  /// `<X> ::= <item> | <item> <X>`, parsed as a loop. `continues` runs after
  /// each item and consumes any separator; `more` or `last` is written to the
  /// rule slot reserved ahead of that item. Runs inside the caller's
  /// [`Parser::attempt`], which undoes the whole list if an item fails.
  fn list(
    &mut self,
    more: &'static str,
    last: &'static str,
    mut item: impl FnMut(&mut Self) -> CompileResult<bool>,
    mut continues: impl FnMut(&mut Self) -> bool,
  ) -> CompileResult<bool> {
    let mut items = 0usize;
    loop {
      let slot = self.trace.reserve();
      let matched = item(self).inspect_err(|_| self.trace.fill(slot, last))?;
      if !matched {
        trace!(items, position = self.stream.position(), "list item did not match");
        return Ok(false);
      }
      items += 1;
      if !continues(self) {
        self.trace.fill(slot, last);
        return Ok(true);
      }
      self.trace.fill(slot, more);
    }
  }

  // ---------------------------------------------------------------------
  // Terminals
  // ---------------------------------------------------------------------

  /// Consume the next token if `wanted` accepts it; otherwise record the
  /// mismatch and leave the cursor where it was.
  fn accept(&mut self, wanted: impl Fn(&Token) -> bool) -> Option<Token> {
    let position = self.stream.position();
    let consumed = self
      .stream
      .next()
      .map(|token| wanted(token).then(|| token.clone()));

    match consumed {
      Some(Some(token)) => {
        self.trace.token(&token);
        Some(token)
      }
      Some(None) => {
        self.stream.backtrack();
        self.record_mismatch(position);
        None
      }
      None => {
        self.record_mismatch(position);
        None
      }
    }
  }

  fn record_mismatch(&mut self, position: usize) {
    if self
      .furthest
      .is_some_and(|furthest| furthest.position >= position)
    {
      return;
    }
    self.furthest = Some(Mismatch {
      position,
      production: self.active.last().copied().unwrap_or(Production::Program),
    });
  }

  fn keyword(&mut self, keyword: &str) -> bool {
    self.accept(|token| token.is_keyword(keyword)).is_some()
  }

  fn separator(&mut self, separator: &str) -> bool {
    self
      .accept(|token| token.is(TokenKind::Separator, separator))
      .is_some()
  }

  fn operator(&mut self, operator: &str) -> bool {
    self
      .accept(|token| token.is(TokenKind::Operator, operator))
      .is_some()
  }

  fn identifier(&mut self) -> Option<Token> {
    self.accept(|token| token.kind == TokenKind::Identifier)
  }

  fn peek_is(&self, wanted: impl Fn(&Token) -> bool) -> bool {
    self.stream.peek().is_some_and(wanted)
  }

  fn location_of(&self, token: &Token) -> Location {
    Location::at(self.source, token.loc)
  }

  fn syntax_error(&self, position: usize, production: Production) -> CompileError {
    match self.stream.get(position) {
      Some(token) if token.kind == TokenKind::Illegal => CompileError::LexicalError {
        lexeme: token.text.clone(),
        position: self.location_of(token),
      },
      token => CompileError::SyntaxMismatch {
        production: production.to_string(),
        found: describe_token(token),
        position: token.map_or_else(
          || Location::at(self.source, self.source.len()),
          |token| self.location_of(token),
        ),
      },
    }
  }

  // ---------------------------------------------------------------------
  // Semantic actions
  // ---------------------------------------------------------------------

  fn emit(&mut self, instruction: Instruction) -> usize {
    self.code.emit(instruction)
  }

  /// Emit a `JUMP0` whose target is filled in by [`Parser::resolve_jump`].
  fn emit_pending_jump0(&mut self) {
    let line = self.emit(Instruction::Jump0(None));
    self.pending.push(line - 1);
  }

  /// Point the innermost pending jump at the next line to be emitted.
  fn resolve_jump(&mut self) {
    let line = self.code.next_line();
    match self.pending.pop() {
      Some(index) => {
        self.code.patch(index, line);
      }
      None => debug!(line, "no pending jump to resolve"),
    }
  }

  fn address_of(&self, token: &Token) -> CompileResult<u32> {
    self
      .symbols
      .address_of(&token.text)
      .map_err(|error| error.located_at(self.location_of(token)))
  }

  fn rule(&mut self, rule: &'static str) {
    self.trace.rule(rule);
  }

  // ---------------------------------------------------------------------
  // Productions
  // ---------------------------------------------------------------------

  /// `<Rat24S> ::= $ <Opt Function Definitions> $ <Opt Declaration List> $ <Statement List> $`
  pub fn program(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Program, |p| {
      p.rule(RULE_PROGRAM);
      Ok(p.separator("$")
        && p.opt_functions()?
        && p.separator("$")
        && p.opt_declarations()?
        && p.separator("$")
        && p.statement_list()?
        && p.separator("$"))
    })
  }

  pub fn opt_functions(&mut self) -> CompileResult<bool> {
    self.attempt(Production::OptFunctions, |p| {
      if p.alternative(RULE_OPT_FUNCTIONS, Self::functions)? {
        return Ok(true);
      }
      p.alternative(RULE_OPT_FUNCTIONS_EMPTY, Self::empty)
    })
  }

  pub fn functions(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Functions, |p| {
      p.list(RULE_FUNCTIONS_MORE, RULE_FUNCTIONS_ONE, Self::function, |p| {
        p.peek_is(|t| t.is_keyword("function"))
      })
    })
  }

  /// Parse one function into its own [`FunctionUnit`]. Its parameters and
  /// locals live in a private table whose addresses continue from the
  /// enclosing one.
  pub fn function(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Function, |p| {
      p.rule(RULE_FUNCTION);
      if !p.keyword("function") {
        return Ok(false);
      }
      let Some(name) = p.identifier() else {
        return Ok(false);
      };
      if p.function_names.contains(&name.text) {
        return Err(CompileError::DuplicateSymbol {
          name: name.text.clone(),
          position: Some(p.location_of(&name)),
        });
      }
      p.function_names.push(name.text.clone());

      let local = SymbolTable::new(p.symbols.next_address());
      let outer_symbols = mem::replace(&mut p.symbols, local);
      let outer_code = mem::take(&mut p.code);
      let outer_pending = mem::take(&mut p.pending);

      let matched = p.function_rest();

      let symbols = mem::replace(&mut p.symbols, outer_symbols);
      let instructions = mem::replace(&mut p.code, outer_code);
      p.pending = outer_pending;

      if !matched? {
        return Ok(false);
      }
      symbols.ensure_resolved()?;
      p.symbols.advance_to(symbols.next_address());
      debug!(name = %name.text, instructions = instructions.len(), "compiled function");
      p.functions.push(FunctionUnit {
        name: name.text,
        symbols,
        instructions,
      });
      Ok(true)
    })
  }

  fn function_rest(&mut self) -> CompileResult<bool> {
    Ok(self.separator("(")
      && self.opt_params()?
      && self.separator(")")
      && self.opt_declarations()?
      && self.body()?)
  }

  pub fn opt_params(&mut self) -> CompileResult<bool> {
    self.attempt(Production::OptParams, |p| {
      if p.alternative(RULE_OPT_PARAMS, Self::param_list)? {
        return Ok(true);
      }
      p.alternative(RULE_OPT_PARAMS_EMPTY, Self::empty)
    })
  }

  pub fn param_list(&mut self) -> CompileResult<bool> {
    self.attempt(Production::ParamList, |p| {
      p.list(RULE_PARAMS_MORE, RULE_PARAMS_ONE, Self::param, Self::comma)
    })
  }

  /// Consume a `,` only when one is next, so a list that simply ends records
  /// no mismatch.
  fn comma(&mut self) -> bool {
    self.peek_is(|t| t.is(TokenKind::Separator, ",")) && self.separator(",")
  }

  /// `<Parameter> ::= <IDs> <Qualifier>`: the identifiers go in untyped and
  /// receive the qualifier once it is seen.
  pub fn param(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Param, |p| {
      p.rule(RULE_PARAM);
      if !p.id_list(IdUsage::Declare(None))? {
        return Ok(false);
      }
      let Some(ty) = p.qualifier()? else {
        return Ok(false);
      };
      p.symbols.resolve_pending(ty);
      Ok(true)
    })
  }

  pub fn qualifier(&mut self) -> CompileResult<Option<Type>> {
    self.attempt(Production::Qualifier, |p| {
      let Some(token) = p.accept(|t| t.kind == TokenKind::Keyword && Type::from_keyword(&t.text).is_some())
      else {
        return Ok(None);
      };
      let ty = Type::from_keyword(&token.text);
      p.rule(match ty {
        Some(Type::Integer) => "<Qualifier> --> integer",
        Some(Type::Boolean) => "<Qualifier> --> boolean",
        Some(Type::Real) | None => "<Qualifier> --> real",
      });
      Ok(ty)
    })
  }

  pub fn body(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Body, |p| {
      p.rule(RULE_BODY);
      Ok(p.separator("{") && p.statement_list()? && p.separator("}"))
    })
  }

  pub fn opt_declarations(&mut self) -> CompileResult<bool> {
    self.attempt(Production::OptDeclarations, |p| {
      if p.alternative(RULE_OPT_DECLARATIONS, Self::declaration_list)? {
        return Ok(true);
      }
      p.alternative(RULE_OPT_DECLARATIONS_EMPTY, Self::empty)
    })
  }

  pub fn declaration_list(&mut self) -> CompileResult<bool> {
    self.attempt(Production::DeclarationList, |p| {
      p.list(
        RULE_DECLARATIONS_MORE,
        RULE_DECLARATIONS_ONE,
        |p| Ok(p.declaration()? && p.separator(";")),
        |p| p.peek_is(|t| t.kind == TokenKind::Keyword && Type::from_keyword(&t.text).is_some()),
      )
    })
  }

  pub fn declaration(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Declaration, |p| {
      p.rule(RULE_DECLARATION);
      let Some(ty) = p.qualifier()? else {
        return Ok(false);
      };
      p.id_list(IdUsage::Declare(Some(ty)))
    })
  }

  pub fn id_list(&mut self, usage: IdUsage) -> CompileResult<bool> {
    self.attempt(Production::IdList, |p| {
      p.list(RULE_IDS_MORE, RULE_IDS_ONE, |p| p.id_item(usage), Self::comma)
    })
  }

  fn id_item(&mut self, usage: IdUsage) -> CompileResult<bool> {
    let Some(token) = self.identifier() else {
      return Ok(false);
    };
    match usage {
      IdUsage::Declare(ty) => {
        self
          .symbols
          .insert(&token, ty)
          .map_err(|error| error.located_at(self.location_of(&token)))?;
      }
      IdUsage::Scan => {
        let address = self.address_of(&token)?;
        self.emit(Instruction::Sin);
        self.emit(Instruction::PopM(address));
      }
      IdUsage::Argument => {
        let address = self.address_of(&token)?;
        self.emit(Instruction::PushM(address));
      }
    }
    Ok(true)
  }

  pub fn statement_list(&mut self) -> CompileResult<bool> {
    self.attempt(Production::StatementList, |p| {
      p.list(RULE_STATEMENTS_MORE, RULE_STATEMENTS_ONE, Self::statement, |p| {
        p.peek_is(starts_statement)
      })
    })
  }

  pub fn statement(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Statement, |p| {
      let alternatives: [(&'static str, fn(&mut Self) -> CompileResult<bool>); 7] = [
        ("<Statement> --> <Compound>", Self::compound),
        ("<Statement> --> <Assign>", Self::assign),
        ("<Statement> --> <If>", Self::if_statement),
        ("<Statement> --> <Return>", Self::return_statement),
        ("<Statement> --> <Print>", Self::print),
        ("<Statement> --> <Scan>", Self::scan),
        ("<Statement> --> <While>", Self::while_loop),
      ];
      for (rule, parse) in alternatives {
        if p.alternative(rule, parse)? {
          return Ok(true);
        }
      }
      Ok(false)
    })
  }

  pub fn compound(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Compound, |p| {
      p.rule(RULE_COMPOUND);
      Ok(p.separator("{") && p.statement_list()? && p.separator("}"))
    })
  }

  /// The target's address is looked up only after the whole right-hand side
  /// has been recognised and emitted.
  pub fn assign(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Assign, |p| {
      p.rule(RULE_ASSIGN);
      let Some(target) = p.identifier() else {
        return Ok(false);
      };
      if !(p.operator("=") && p.expression()? && p.separator(";")) {
        return Ok(false);
      }
      let address = p.address_of(&target)?;
      p.emit(Instruction::PopM(address));
      Ok(true)
    })
  }

  pub fn if_statement(&mut self) -> CompileResult<bool> {
    self.attempt(Production::If, |p| {
      p.rule(RULE_IF);
      Ok(p.keyword("if")
        && p.separator("(")
        && p.condition()?
        && p.separator(")")
        && p.statement()?
        && p.if_tail()?)
    })
  }

  /// `endif` resolves the condition's `JUMP0` to the next line. `else` first
  /// emits a `JUMP` over the else branch, sends the `JUMP0` just past it, and
  /// resolves the `JUMP` after the branch.
  pub fn if_tail(&mut self) -> CompileResult<bool> {
    self.attempt(Production::IfTail, |p| {
      let closed = p.alternative(RULE_ENDIF, |p| {
        if !p.keyword("endif") {
          return Ok(false);
        }
        p.resolve_jump();
        Ok(true)
      })?;
      if closed {
        return Ok(true);
      }

      p.alternative(RULE_ELSE, |p| {
        if !p.keyword("else") {
          return Ok(false);
        }
        let skip = p.emit(Instruction::Jump(None)) - 1;
        p.resolve_jump();
        p.pending.push(skip);
        if !(p.statement()? && p.keyword("endif")) {
          return Ok(false);
        }
        p.resolve_jump();
        Ok(true)
      })
    })
  }

  pub fn return_statement(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Return, |p| {
      let bare = p.alternative(RULE_RETURN, |p| {
        Ok(p.keyword("return") && p.separator(";"))
      })?;
      if bare {
        return Ok(true);
      }
      p.alternative(RULE_RETURN_VALUE, |p| {
        Ok(p.keyword("return") && p.expression()? && p.separator(";"))
      })
    })
  }

  pub fn print(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Print, |p| {
      p.rule(RULE_PRINT);
      if !(p.keyword("print")
        && p.separator("(")
        && p.expression()?
        && p.separator(")")
        && p.separator(";"))
      {
        return Ok(false);
      }
      p.emit(Instruction::Sout);
      Ok(true)
    })
  }

  pub fn scan(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Scan, |p| {
      p.rule(RULE_SCAN);
      Ok(p.keyword("scan")
        && p.separator("(")
        && p.id_list(IdUsage::Scan)?
        && p.separator(")")
        && p.separator(";"))
    })
  }

  /// `LABEL`, the condition and its `JUMP0`, the body, then a `JUMP` back to
  /// the label. The `JUMP0` lands on the line after that back jump.
  pub fn while_loop(&mut self) -> CompileResult<bool> {
    self.attempt(Production::While, |p| {
      p.rule(RULE_WHILE);
      if !p.keyword("while") {
        return Ok(false);
      }
      let label = p.emit(Instruction::Label);
      if !(p.separator("(")
        && p.condition()?
        && p.separator(")")
        && p.statement()?
        && p.keyword("endwhile"))
      {
        return Ok(false);
      }
      p.emit(Instruction::Jump(Some(label)));
      p.resolve_jump();
      Ok(true)
    })
  }

  pub fn condition(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Condition, |p| {
      p.rule(RULE_CONDITION);
      if !p.expression()? {
        return Ok(false);
      }
      let Some(op) = p.relop()? else {
        return Ok(false);
      };
      if !p.expression()? {
        return Ok(false);
      }
      p.emit(op.instruction());
      p.emit_pending_jump0();
      Ok(true)
    })
  }

  pub fn relop(&mut self) -> CompileResult<Option<RelOp>> {
    self.attempt(Production::Relop, |p| {
      let op = p
        .accept(|t| t.kind == TokenKind::Operator && RelOp::from_symbol(&t.text).is_some())
        .and_then(|token| RelOp::from_symbol(&token.text));
      if let Some(op) = op {
        p.rule(op.rule());
      }
      Ok(op)
    })
  }

  pub fn expression(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Expression, |p| {
      p.rule(RULE_EXPRESSION);
      Ok(p.term()? && p.expression_tail()?)
    })
  }

  /// One `+`/`-` operand per pass; the closing `<Empty>` ends the loop.
  pub fn expression_tail(&mut self) -> CompileResult<bool> {
    self.attempt(Production::ExpressionTail, |p| {
      'operand: loop {
        for (rule, symbol, instruction) in [
          (RULE_ADD, "+", Instruction::Add),
          (RULE_SUB, "-", Instruction::Sub),
        ] {
          let matched = p.alternative(rule, |p| {
            if !(p.operator(symbol) && p.term()?) {
              return Ok(false);
            }
            p.emit(instruction);
            Ok(true)
          })?;
          if matched {
            continue 'operand;
          }
        }
        return p.alternative(RULE_EXPRESSION_END, Self::empty);
      }
    })
  }

  pub fn term(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Term, |p| {
      p.rule(RULE_TERM);
      Ok(p.factor()? && p.term_tail()?)
    })
  }

  pub fn term_tail(&mut self) -> CompileResult<bool> {
    self.attempt(Production::TermTail, |p| {
      'operand: loop {
        for (rule, symbol, instruction) in [
          (RULE_MUL, "*", Instruction::Mul),
          (RULE_DIV, "/", Instruction::Div),
        ] {
          let matched = p.alternative(rule, |p| {
            if !(p.operator(symbol) && p.factor()?) {
              return Ok(false);
            }
            p.emit(instruction);
            Ok(true)
          })?;
          if matched {
            continue 'operand;
          }
        }
        return p.alternative(RULE_TERM_END, Self::empty);
      }
    })
  }

  pub fn factor(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Factor, |p| {
      let negated = p.alternative(RULE_NEGATE, |p| {
        if !p.operator("-") {
          return Ok(false);
        }
        let start = p.code.len();
        if !p.primary()? {
          return Ok(false);
        }
        p.negate_since(start)?;
        Ok(true)
      })?;
      if negated {
        return Ok(true);
      }
      p.alternative(RULE_FACTOR, Self::primary)
    })
  }

  /// Negate the value produced by the instructions emitted from `start` on.
  fn negate_since(&mut self, start: usize) -> CompileResult<()> {
    if self.code.len() != start + 1 {
      self.emit(Instruction::PushI(-1));
      self.emit(Instruction::Mul);
      return Ok(());
    }
    match self.code.last().cloned() {
      Some(Instruction::PushI(value)) => self.code.replace_last(Instruction::PushI(-value)),
      Some(Instruction::PushR(value)) => {
        let negated = match value.strip_prefix('-') {
          Some(magnitude) => magnitude.to_string(),
          None => format!("-{value}"),
        };
        self.code.replace_last(Instruction::PushR(negated));
      }
      _ => {
        // 0 - operand
        self.emit(Instruction::PushI(0));
        self.code.swap_last_two()?;
        self.emit(Instruction::Sub);
      }
    }
    Ok(())
  }

  pub fn primary(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Primary, |p| {
      if p.alternative(RULE_CALL, Self::call)? {
        return Ok(true);
      }

      let variable = p.alternative(RULE_IDENTIFIER, |p| {
        let Some(token) = p.identifier() else {
          return Ok(false);
        };
        let address = p.address_of(&token)?;
        p.emit(Instruction::PushM(address));
        Ok(true)
      })?;
      if variable {
        return Ok(true);
      }

      let integer = p.alternative(RULE_INTEGER, |p| {
        let Some(token) = p.accept(|t| t.kind == TokenKind::Integer) else {
          return Ok(false);
        };
        let value = token
          .text
          .parse::<i64>()
          .map_err(|_| CompileError::LexicalError {
            lexeme: token.text.clone(),
            position: p.location_of(&token),
          })?;
        p.emit(Instruction::PushI(value));
        Ok(true)
      })?;
      if integer {
        return Ok(true);
      }

      let parenthesized = p.alternative(RULE_PARENS, |p| {
        Ok(p.separator("(") && p.expression()? && p.separator(")"))
      })?;
      if parenthesized {
        return Ok(true);
      }

      let real = p.alternative(RULE_REAL, |p| {
        let Some(token) = p.accept(|t| t.kind == TokenKind::Real) else {
          return Ok(false);
        };
        p.emit(Instruction::PushR(token.text));
        Ok(true)
      })?;
      if real {
        return Ok(true);
      }

      for (rule, keyword, value) in [(RULE_TRUE, "true", 1), (RULE_FALSE, "false", 0)] {
        let matched = p.alternative(rule, |p| {
          if !p.keyword(keyword) {
            return Ok(false);
          }
          p.emit(Instruction::PushI(value));
          Ok(true)
        })?;
        if matched {
          return Ok(true);
        }
      }
      Ok(false)
    })
  }

  /// `<Identifier> ( <IDs> )`: push every argument, then `CALL`.
  fn call(&mut self) -> CompileResult<bool> {
    let Some(callee) = self.identifier() else {
      return Ok(false);
    };
    if !self.separator("(") {
      return Ok(false);
    }
    if !self.function_names.contains(&callee.text) {
      return Err(CompileError::UndefinedFunction {
        name: callee.text.clone(),
        position: Some(self.location_of(&callee)),
      });
    }
    if !(self.id_list(IdUsage::Argument)? && self.separator(")")) {
      return Ok(false);
    }
    self.emit(Instruction::Call(callee.text));
    Ok(true)
  }

  /// `<Empty>` always matches and consumes nothing.
  pub fn empty(&mut self) -> CompileResult<bool> {
    self.attempt(Production::Empty, |_| Ok(true))
  }
}
