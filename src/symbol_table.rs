//! Identifier bookkeeping for code generation.
//!
//! Every identifier gets the next free memory address when it is inserted.
//! Its type may arrive later: `a, b integer` parameter lists name the
//! identifiers before the qualifier, so entries are allowed to sit with no
//! type until the qualifier is parsed and back-filled onto them.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};
use crate::ty::Type;

pub const DEFAULT_BASE_ADDRESS: u32 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
  pub address: u32,
  pub declared_type: Option<Type>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
  entries: Vec<(String, Symbol)>,
  index: HashMap<String, usize>,
  next_address: u32,
  /// Slots still waiting for a type, oldest first.
  untyped: Vec<usize>,
  /// Slots that received a back-filled type, in order. Lets [`SymbolTable::rewind`]
  /// take a back-fill back.
  backfilled: Vec<usize>,
}

/// Cheap snapshot taken by [`SymbolTable::mark`]. Entries are append-only, so
/// lengths plus the untyped slots are enough to rewind.
#[derive(Debug, Clone)]
pub struct SymbolMark {
  len: usize,
  next_address: u32,
  untyped: Vec<usize>,
  backfilled: usize,
}

impl Default for SymbolTable {
  fn default() -> Self {
    Self::new(DEFAULT_BASE_ADDRESS)
  }
}

impl SymbolTable {
  pub fn new(base_address: u32) -> Self {
    Self {
      entries: Vec::new(),
      index: HashMap::new(),
      next_address: base_address,
      untyped: Vec::new(),
      backfilled: Vec::new(),
    }
  }

  pub fn exists(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  pub fn get(&self, name: &str) -> Option<&Symbol> {
    self.index.get(name).map(|&slot| &self.entries[slot].1)
  }

  pub fn address_of(&self, name: &str) -> CompileResult<u32> {
    self
      .get(name)
      .map(|symbol| symbol.address)
      .ok_or_else(|| CompileError::UndeclaredIdentifier {
        name: name.to_string(),
        position: None,
      })
  }

  /// Insert an identifier token, handing it the next address.
  ///
  /// A concrete `ty` is also back-filled onto every entry still waiting for
  /// its type. Re-inserting a name fails with `TypeConflict` when both types
  /// are known and differ, and with `DuplicateSymbol` otherwise.
  pub fn insert(&mut self, token: &Token, ty: Option<Type>) -> CompileResult<u32> {
    if token.kind != TokenKind::Identifier {
      return Err(CompileError::NonIdentifierInsertion {
        text: token.text.clone(),
      });
    }

    if let Some(existing) = self.get(&token.text) {
      return Err(match (existing.declared_type, ty) {
        (Some(declared), Some(requested)) if declared != requested => CompileError::TypeConflict {
          name: token.text.clone(),
          declared,
          requested,
          position: None,
        },
        _ => CompileError::DuplicateSymbol {
          name: token.text.clone(),
          position: None,
        },
      });
    }

    let address = self.next_address;
    let next_address = address
      .checked_add(1)
      .ok_or_else(|| CompileError::AddressSpaceExhausted {
        name: token.text.clone(),
        position: None,
      })?;

    let slot = self.entries.len();
    self.index.insert(token.text.clone(), slot);
    self.entries.push((
      token.text.clone(),
      Symbol {
        address,
        declared_type: ty,
      },
    ));
    self.next_address = next_address;
    debug!(name = %token.text, address, ty = ?ty, "inserted symbol");

    match ty {
      Some(ty) => {
        self.resolve_pending(ty);
      }
      None => self.untyped.push(slot),
    }
    Ok(address)
  }

  /// Give `ty` to every entry inserted without a type. Returns how many
  /// entries were updated.
  pub fn resolve_pending(&mut self, ty: Type) -> usize {
    let resolved = self.untyped.len();
    for slot in self.untyped.drain(..) {
      let (name, symbol) = &mut self.entries[slot];
      symbol.declared_type = Some(ty);
      self.backfilled.push(slot);
      debug!(name = %name, ty = %ty, "back-filled type");
    }
    resolved
  }

  /// Fail on the first entry still lacking a type.
  pub fn ensure_resolved(&self) -> CompileResult<()> {
    match self.untyped.first() {
      Some(&slot) => Err(CompileError::UnresolvedType {
        name: self.entries[slot].0.clone(),
      }),
      None => Ok(()),
    }
  }

  pub fn mark(&self) -> SymbolMark {
    SymbolMark {
      len: self.entries.len(),
      next_address: self.next_address,
      untyped: self.untyped.clone(),
      backfilled: self.backfilled.len(),
    }
  }

  /// Undo every insertion, back-fill and address move made since `mark`.
  pub fn rewind(&mut self, mark: SymbolMark) {
    for slot in self.backfilled.drain(mark.backfilled..) {
      if let Some((_, symbol)) = self.entries.get_mut(slot) {
        symbol.declared_type = None;
      }
    }
    for (name, _) in self.entries.drain(mark.len..) {
      self.index.remove(&name);
    }
    self.next_address = mark.next_address;
    self.untyped = mark.untyped;
  }

  pub fn next_address(&self) -> u32 {
    self.next_address
  }

  /// Move the address counter forward, never backward.
  pub fn advance_to(&mut self, address: u32) {
    self.next_address = self.next_address.max(address);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Entries ordered by address.
  pub fn symbols(&self) -> Vec<(&str, &Symbol)> {
    let mut symbols: Vec<_> = self
      .entries
      .iter()
      .map(|(name, symbol)| (name.as_str(), symbol))
      .collect();
    symbols.sort_by_key(|(_, symbol)| symbol.address);
    symbols
  }

  /// Write the table as fixed-width `Identifier | Memory Location | Type` rows.
  pub fn dump<W: Write>(&self, sink: &mut W) -> io::Result<()> {
    writeln!(sink, "{:<20}{:<20}Type", "Identifier", "Memory Location")?;
    for (name, symbol) in self.symbols() {
      let ty = symbol.declared_type.map_or("", Type::keyword);
      writeln!(sink, "{:<20}{:<20}{}", name, symbol.address, ty)?;
    }
    Ok(())
  }

  /// Dump into a file, either truncating it or continuing after whatever it
  /// already holds (an instruction listing, usually).
  pub fn save(&self, path: &Path, append: bool) -> io::Result<()> {
    let file = OpenOptions::new()
      .write(true)
      .create(true)
      .append(append)
      .truncate(!append)
      .open(path)?;
    let mut sink = BufWriter::new(file);
    self.dump(&mut sink)?;
    sink.flush()
  }
}
