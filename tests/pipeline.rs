//! End-to-end runs of `rat24s::compile` and the artifact writers.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use rat24s::{
  CompileError, CompilerOptions, Production, Type, Verdict, compile, tokenizer,
};

const SUM_PROGRAM: &str = "[* sums the numbers from 1 to max *]
$
function convert (fahr integer)
{
  return 5 * (fahr - 32) / 9;
}
$
  integer i, max, sum;
$
  sum = 0;
  i = 1;
  scan (max);
  while (i <= max) {
    sum = sum + i;
    i = i + 1;
  }
  endwhile
  if (sum > 100) print (convert(sum)); else print (sum); endif
$
";

#[test]
fn compiles_a_complete_program() {
  let compilation = compile(SUM_PROGRAM, &CompilerOptions::default());
  assert!(compilation.is_valid(), "{:?}", compilation.verdict);

  assert_eq!(
    compilation.instructions.lines(),
    [
      "PUSHI 0", "POPM 5003", "PUSHI 1", "POPM 5001", "SIN", "POPM 5002", "LABEL", "PUSHM 5001",
      "PUSHM 5002", "LEQ", "JUMP0 21", "PUSHM 5003", "PUSHM 5001", "A", "POPM 5003", "PUSHM 5001",
      "PUSHI 1", "A", "POPM 5001", "JUMP 7", "PUSHM 5003", "PUSHI 100", "GRT", "JUMP0 29",
      "PUSHM 5003", "CALL convert", "SOUT", "JUMP 31", "PUSHM 5003", "SOUT",
    ]
  );

  let [convert] = compilation.functions.as_slice() else {
    panic!("expected one function, got {}", compilation.functions.len());
  };
  assert_eq!(convert.name, "convert");
  assert_eq!(
    convert.instructions.lines(),
    ["PUSHI 5", "PUSHM 5000", "PUSHI 32", "S", "M", "PUSHI 9", "D"]
  );
  let fahr = convert.symbols.get("fahr").unwrap();
  assert_eq!((fahr.address, fahr.declared_type), (5000, Some(Type::Integer)));

  let globals: Vec<_> = compilation
    .symbols
    .symbols()
    .into_iter()
    .map(|(name, symbol)| (name.to_string(), symbol.address))
    .collect();
  assert_eq!(
    globals,
    [
      ("i".to_string(), 5001),
      ("max".to_string(), 5002),
      ("sum".to_string(), 5003),
    ]
  );
}

#[test]
fn base_address_is_configurable() {
  let options = CompilerOptions {
    base_address: 7000,
    ..CompilerOptions::default()
  };
  let compilation = compile("$ $ integer a, b; $ b = a; $", &options);
  assert!(compilation.is_valid());
  assert_eq!(compilation.instructions.lines(), ["PUSHM 7000", "POPM 7001"]);
}

#[test]
fn syntax_errors_name_the_failing_production() {
  let compilation = compile("$ $ $ print (true) $", &CompilerOptions::default());
  match &compilation.verdict {
    Verdict::Invalid { production, error } => {
      assert_eq!(*production, Production::Print);
      assert!(matches!(error, CompileError::SyntaxMismatch { .. }));
      assert!(!error.is_semantic());
    }
    Verdict::Valid => panic!("missing ';' was accepted"),
  }
  assert!(compilation.instructions.is_empty());
}

#[test]
fn semantic_errors_leave_a_marker() {
  let compilation = compile("$ $ integer x; $ x = y; $", &CompilerOptions::default());
  match &compilation.verdict {
    Verdict::Invalid { production, error } => {
      assert_eq!(*production, Production::Primary);
      assert!(matches!(error, CompileError::UndeclaredIdentifier { name, .. } if name == "y"));
      assert!(error.is_semantic());
      assert!(error.to_string().contains("line 1, column 22"));
    }
    Verdict::Valid => panic!("undeclared identifier was accepted"),
  }
  let lines = compilation.instructions.lines();
  assert_eq!(lines.len(), 1);
  assert!(lines[0].starts_with("ERROR undeclared identifier 'y'"));
}

#[test]
fn identifiers_are_case_insensitive() {
  let compilation = compile("$ $ integer Total; $ TOTAL = 1; $", &CompilerOptions::default());
  assert!(compilation.is_valid(), "{:?}", compilation.verdict);
  assert_eq!(compilation.instructions.lines(), ["PUSHI 1", "POPM 5000"]);
}

#[test]
fn trace_is_recorded_only_on_request() {
  let quiet = compile("$ $ $ print (1); $", &CompilerOptions::default());
  assert!(quiet.trace.is_empty());

  let traced = compile(
    "$ $ $ print (1); $",
    &CompilerOptions {
      trace: true,
      ..CompilerOptions::default()
    },
  );
  let rendered: Vec<String> = traced.trace.lines().iter().map(ToString::to_string).collect();
  assert!(rendered.contains(&"  <Primary> --> <Integer>".to_string()));
  assert!(rendered.contains(&"Token: integer         Lexeme: 1".to_string()));
  assert!(!rendered.iter().any(|line| line.contains("<Compound>")));
}

#[test]
fn artifacts_are_written_to_disk() {
  let dir = tempfile::tempdir().unwrap();
  let compilation = compile(
    SUM_PROGRAM,
    &CompilerOptions {
      trace: true,
      ..CompilerOptions::default()
    },
  );

  let tokens_path = dir.path().join("tokens.txt");
  let mut sink = BufWriter::new(File::create(&tokens_path).unwrap());
  tokenizer::write_listing(&compilation.tokens, &mut sink).unwrap();
  sink.flush().unwrap();
  drop(sink);
  let tokens = fs::read_to_string(&tokens_path).unwrap();
  assert_eq!(tokens.lines().next(), Some("<separator='$'>"));
  assert_eq!(tokens.lines().count(), compilation.tokens.len());

  let trace_path = dir.path().join("productions.txt");
  let mut sink = BufWriter::new(File::create(&trace_path).unwrap());
  compilation.trace.write_to(&mut sink).unwrap();
  sink.flush().unwrap();
  drop(sink);
  let productions = fs::read_to_string(&trace_path).unwrap();
  assert_eq!(productions.lines().count(), compilation.trace.len());
  assert!(productions.starts_with("  <Rat24S> -->"));

  let listing_path = dir.path().join("listing.txt");
  let mut sink = BufWriter::new(File::create(&listing_path).unwrap());
  compilation.instructions.write_listing(&mut sink).unwrap();
  writeln!(sink).unwrap();
  sink.flush().unwrap();
  drop(sink);
  compilation.symbols.save(&listing_path, true).unwrap();

  let listing = fs::read_to_string(&listing_path).unwrap();
  assert!(listing.starts_with("1  PUSHI 0\n2  POPM 5003\n"));
  assert!(listing.contains("30  SOUT\n\nIdentifier"));
  assert!(listing.trim_end().ends_with("integer"));
}

#[test]
fn saving_without_append_replaces_the_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("symbols.txt");
  fs::write(&path, "stale contents\n").unwrap();

  let compilation = compile("$ $ real r; $ r = 1.5; $", &CompilerOptions::default());
  compilation.symbols.save(&path, false).unwrap();

  let dump = fs::read_to_string(&path).unwrap();
  assert!(!dump.contains("stale"));
  assert_eq!(dump.lines().count(), 2);
  assert_eq!(dump.lines().nth(1), Some(format!("{:<20}{:<20}real", "r", 5000).as_str()));
}

#[test]
fn large_programs_compile() {
  let declarations: String = (0..2000).map(|i| format!("integer d{i};\n")).collect();
  let statements: String = (0..5000)
    .map(|i| format!("d{} = d{} + 1;\n", i % 2000, (i + 1) % 2000))
    .collect();
  let source = format!("$ $ {declarations} $ {statements} $");

  let compilation = compile(&source, &CompilerOptions::default());
  assert!(compilation.is_valid(), "{:?}", compilation.verdict);
  assert_eq!(compilation.symbols.len(), 2000);
  assert_eq!(compilation.instructions.len(), 5000 * 4);
  assert_eq!(
    compilation.instructions.lines().last().map(String::as_str),
    Some("POPM 5999")
  );
}

#[test]
fn running_out_of_addresses_is_reported() {
  let options = CompilerOptions {
    base_address: u32::MAX,
    ..CompilerOptions::default()
  };
  let compilation = compile("$ $ integer a; $ a = 1; $", &options);
  match &compilation.verdict {
    Verdict::Invalid { production, error } => {
      assert_eq!(*production, Production::IdList);
      assert!(matches!(error, CompileError::AddressSpaceExhausted { name, .. } if name == "a"));
      assert!(error.is_semantic());
      assert!(error.to_string().contains("line 1, column 13"));
    }
    Verdict::Valid => panic!("address past u32::MAX was handed out"),
  }
  let lines = compilation.instructions.lines();
  assert_eq!(lines.len(), 1);
  assert!(lines[0].starts_with("ERROR no memory address left for 'a'"));
}
