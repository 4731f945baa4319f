//! Code generation target: a linear listing for a simple stack machine.
//!
//! Every expression leaves one value on the machine stack; statements pop
//! it into memory (`POPM`), print it (`SOUT`) or test it (`JUMP0`). Jump
//! operands are 1-based line numbers into the listing. Forward jumps are
//! emitted with no target and patched once the target line is known.

use std::fmt;
use std::io::{self, Write};

use tracing::debug;

use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
  PushI(i64),
  PushR(String),
  PushM(u32),
  PopM(u32),
  Sout,
  Sin,
  Add,
  Sub,
  Mul,
  Div,
  Grt,
  Les,
  Equ,
  Neq,
  Geq,
  Leq,
  /// Jump when the popped value is zero. `None` until patched.
  Jump0(Option<usize>),
  Jump(Option<usize>),
  Label,
  Call(String),
  /// Visible marker for a semantic error.
  Error(String),
}

impl Instruction {
  pub fn is_placeholder(&self) -> bool {
    matches!(self, Self::Jump0(None) | Self::Jump(None))
  }

  fn with_target(&self, line: usize) -> Option<Self> {
    match self {
      Self::Jump0(_) => Some(Self::Jump0(Some(line))),
      Self::Jump(_) => Some(Self::Jump(Some(line))),
      _ => None,
    }
  }
}

fn target(line: &Option<usize>) -> String {
  line.map_or_else(|| "UNDEFINED".to_string(), |line| line.to_string())
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::PushI(value) => write!(f, "PUSHI {value}"),
      Self::PushR(value) => write!(f, "PUSHR {value}"),
      Self::PushM(address) => write!(f, "PUSHM {address}"),
      Self::PopM(address) => write!(f, "POPM {address}"),
      Self::Sout => f.write_str("SOUT"),
      Self::Sin => f.write_str("SIN"),
      Self::Add => f.write_str("A"),
      Self::Sub => f.write_str("S"),
      Self::Mul => f.write_str("M"),
      Self::Div => f.write_str("D"),
      Self::Grt => f.write_str("GRT"),
      Self::Les => f.write_str("LES"),
      Self::Equ => f.write_str("EQU"),
      Self::Neq => f.write_str("NEQ"),
      Self::Geq => f.write_str("GEQ"),
      Self::Leq => f.write_str("LEQ"),
      Self::Jump0(line) => write!(f, "JUMP0 {}", target(line)),
      Self::Jump(line) => write!(f, "JUMP {}", target(line)),
      Self::Label => f.write_str("LABEL"),
      Self::Call(name) => write!(f, "CALL {name}"),
      Self::Error(message) => write!(f, "ERROR {message}"),
    }
  }
}

/// Append-only instruction log with in-place patching of jump targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionStream {
  instructions: Vec<Instruction>,
}

impl InstructionStream {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append and return the 1-based line of the new instruction.
  pub fn emit(&mut self, instruction: Instruction) -> usize {
    self.instructions.push(instruction);
    self.instructions.len()
  }

  /// Line the next emitted instruction will occupy.
  pub fn next_line(&self) -> usize {
    self.instructions.len() + 1
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  pub fn last(&self) -> Option<&Instruction> {
    self.instructions.last()
  }

  pub fn get(&self, index: usize) -> Option<&Instruction> {
    self.instructions.get(index)
  }

  pub fn instructions(&self) -> &[Instruction] {
    &self.instructions
  }

  pub fn truncate(&mut self, len: usize) {
    self.instructions.truncate(len);
  }

  /// Replace the most recent instruction.
  pub fn replace_last(&mut self, instruction: Instruction) {
    if let Some(last) = self.instructions.last_mut() {
      *last = instruction;
    }
  }

  /// Exchange the two most recently emitted instructions.
  pub fn swap_last_two(&mut self) -> CompileResult<()> {
    let len = self.instructions.len();
    if len < 2 {
      return Err(CompileError::StreamTooShort { len });
    }
    self.instructions.swap(len - 1, len - 2);
    Ok(())
  }

  /// Point the jump at `index` (0-based) to `line`. Returns false when there
  /// is no jump at that index.
  pub fn patch(&mut self, index: usize, line: usize) -> bool {
    let Some(patched) = self
      .instructions
      .get(index)
      .and_then(|instruction| instruction.with_target(line))
    else {
      return false;
    };
    debug!(index, line, "patched jump");
    self.instructions[index] = patched;
    true
  }

  /// Scan backward for the newest instruction equal to `placeholder` and
  /// replace it. Returns the 0-based index that was replaced.
  pub fn patch_last_matching(
    &mut self,
    placeholder: &Instruction,
    replacement: Instruction,
  ) -> Option<usize> {
    let index = self
      .instructions
      .iter()
      .rposition(|instruction| instruction == placeholder)?;
    self.instructions[index] = replacement;
    Some(index)
  }

  /// 1-based line of the newest `LABEL`.
  pub fn find_last_label_line(&self) -> Option<usize> {
    self
      .instructions
      .iter()
      .rposition(|instruction| *instruction == Instruction::Label)
      .map(|index| index + 1)
  }

  /// Plain text of every instruction, in order.
  pub fn lines(&self) -> Vec<String> {
    self.instructions.iter().map(ToString::to_string).collect()
  }

  /// Write `<line>  <instruction>` rows.
  pub fn write_listing<W: Write>(&self, sink: &mut W) -> io::Result<()> {
    for (index, instruction) in self.instructions.iter().enumerate() {
      writeln!(sink, "{}  {}", index + 1, instruction)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_stack_machine_mnemonics() {
    let mut code = InstructionStream::new();
    code.emit(Instruction::PushI(-5));
    code.emit(Instruction::PushM(5000));
    code.emit(Instruction::Add);
    code.emit(Instruction::Jump0(None));
    code.emit(Instruction::Jump(Some(1)));
    code.emit(Instruction::PushR("3.14".into()));
    assert_eq!(
      code.lines(),
      ["PUSHI -5", "PUSHM 5000", "A", "JUMP0 UNDEFINED", "JUMP 1", "PUSHR 3.14"]
    );
  }

  #[test]
  fn emit_reports_lines() {
    let mut code = InstructionStream::new();
    assert_eq!(code.next_line(), 1);
    assert_eq!(code.emit(Instruction::Label), 1);
    assert_eq!(code.emit(Instruction::Sout), 2);
    assert_eq!(code.next_line(), 3);
  }

  #[test]
  fn swap_needs_two_instructions() {
    let mut code = InstructionStream::new();
    code.emit(Instruction::PushI(1));
    assert!(matches!(
      code.swap_last_two(),
      Err(CompileError::StreamTooShort { len: 1 })
    ));
    code.emit(Instruction::PushI(2));
    code.swap_last_two().unwrap();
    assert_eq!(code.lines(), ["PUSHI 2", "PUSHI 1"]);
  }

  #[test]
  fn patch_only_rewrites_jumps() {
    let mut code = InstructionStream::new();
    code.emit(Instruction::Les);
    code.emit(Instruction::Jump0(None));
    assert!(!code.patch(0, 9));
    assert!(!code.patch(7, 9));
    assert!(code.patch(1, 4));
    assert_eq!(code.get(1), Some(&Instruction::Jump0(Some(4))));
  }

  #[test]
  fn patch_last_matching_prefers_newest_placeholder() {
    let mut code = InstructionStream::new();
    code.emit(Instruction::Jump0(None));
    code.emit(Instruction::Sout);
    code.emit(Instruction::Jump0(None));
    let index = code.patch_last_matching(&Instruction::Jump0(None), Instruction::Jump0(Some(4)));
    assert_eq!(index, Some(2));
    assert_eq!(code.lines(), ["JUMP0 UNDEFINED", "SOUT", "JUMP0 4"]);
    assert!(code.instructions()[0].is_placeholder());
    assert_eq!(
      code.patch_last_matching(&Instruction::Label, Instruction::Sin),
      None
    );
  }

  #[test]
  fn finds_nearest_label() {
    let mut code = InstructionStream::new();
    assert_eq!(code.find_last_label_line(), None);
    code.emit(Instruction::Label);
    code.emit(Instruction::PushI(0));
    code.emit(Instruction::Label);
    code.emit(Instruction::Sout);
    assert_eq!(code.find_last_label_line(), Some(3));
  }

  #[test]
  fn listing_numbers_lines_from_one() {
    let mut code = InstructionStream::new();
    code.emit(Instruction::PushI(1));
    code.emit(Instruction::Sout);
    let mut out = Vec::new();
    code.write_listing(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "1  PUSHI 1\n2  SOUT\n");
  }
}
