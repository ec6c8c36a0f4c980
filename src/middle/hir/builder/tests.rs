use std::path::PathBuf;

use super::build_module;
use crate::{
    error::{CompileError, Result},
    frontend::{SourceFile, intern::InternedSymbol, parser::Parser},
    middle::hir::{Environment, InstructionKind, ModuleIR, StoreKind, Terminal},
};

fn build(source: &str) -> Result<(Environment, ModuleIR)> {
    let module = Parser::parse_module(&SourceFile::from_memory(source))?;
    let mut env = Environment::new();
    let ir = build_module(&mut env, PathBuf::from("test.js"), &module)?;

    Ok((env, ir))
}

fn entry_instructions(ir: &ModuleIR) -> Vec<&InstructionKind> {
    let entry = ir.entry_function().unwrap();
    entry.blocks[&entry.entry]
        .instructions
        .iter()
        .map(|i| &i.kind)
        .collect()
}

#[test]
fn if_else_produces_a_diamond() {
    let (_, ir) = build("let x = 1; if (c) { x = 2; } else { x = 3; } log(x);").unwrap();
    let entry = ir.entry_function().unwrap();

    assert_eq!(entry.blocks.len(), 4);

    let Some(Terminal::Branch {
        consequent,
        alternate,
        fallthrough,
        ..
    }) = &entry.blocks[&entry.entry].terminal
    else {
        panic!("entry block should end in a branch");
    };

    assert_ne!(consequent, alternate);
    assert_eq!(
        entry.cfg.predecessors(*fallthrough).collect::<Vec<_>>(),
        vec![*consequent, *alternate]
    );
}

#[test]
fn if_without_else_branches_to_the_join_block() {
    let (_, ir) = build("if (c) { f(); } g();").unwrap();
    let entry = ir.entry_function().unwrap();

    let Some(Terminal::Branch {
        alternate,
        fallthrough,
        ..
    }) = &entry.blocks[&entry.entry].terminal
    else {
        panic!("entry block should end in a branch");
    };

    assert_eq!(alternate, fallthrough);
    assert_eq!(entry.blocks.len(), 3);
}

#[test]
fn while_loop_has_a_single_back_edge() {
    let (_, ir) = build("let i = 0; while (i < 10) { i = i + 1; }").unwrap();
    let entry = ir.entry_function().unwrap();

    let Some(Terminal::Jump { target: header }) = &entry.blocks[&entry.entry].terminal else {
        panic!("entry block should jump to the loop header");
    };

    let source = entry.cfg.back_edge(*header).unwrap();
    assert!(source.is_some());
    assert!(entry.cfg.dominates(*header, source.unwrap()));
}

#[test]
fn every_write_creates_a_version() {
    let (env, ir) = build("let x = 1; x = 2; x += 3;").unwrap();

    let stores: Vec<_> = entry_instructions(&ir)
        .into_iter()
        .filter_map(|kind| match kind {
            InstructionKind::StoreLocal { lval, kind, .. } => Some((*lval, *kind)),
            _ => None,
        })
        .collect();

    assert_eq!(stores.len(), 3);
    assert_eq!(stores[0].1, StoreKind::Let);
    assert_eq!(stores[1].1, StoreKind::Reassign);

    let declaration = stores[0].0.declaration();
    assert!(stores.iter().all(|(lval, _)| lval.declaration() == declaration));
    assert_eq!(env.decl_to_places[&declaration].len(), 3);
}

#[test]
fn lexical_reads_before_declaration_are_rejected() {
    let error = build("log(x); let x = 1;").unwrap_err();

    assert!(matches!(error, CompileError::UseBeforeDeclaration { name } if name == "x"));
}

#[test]
fn closures_may_mention_later_lexical_bindings() {
    let (env, _) = build("const read = () => x; let x = 1;").unwrap();

    assert_eq!(env.captured.len(), 1);
}

#[test]
fn function_declarations_are_hoisted() {
    let (env, ir) = build("f(); function f() { return 1; }").unwrap();

    let instructions = entry_instructions(&ir);
    assert!(matches!(
        instructions[0],
        InstructionKind::FunctionDeclaration { .. }
    ));
    assert_eq!(env.function_declarations.len(), 1);
    assert_eq!(ir.functions.len(), 2);
}

#[test]
fn classes_are_kept_as_unsupported_statements() {
    let (env, ir) = build("const base = 1; class A { get() { return base; } }").unwrap();

    let unsupported = entry_instructions(&ir)
        .into_iter()
        .find_map(|kind| match kind {
            InstructionKind::Unsupported { node, bindings } => Some((node.name(), bindings.clone())),
            _ => None,
        })
        .unwrap();

    assert_eq!(unsupported.0, "class declaration");
    assert_eq!(unsupported.1.len(), 1);
    assert_eq!(unsupported.1[0].0, InternedSymbol::new("base"));
    assert!(env.captured.contains(&unsupported.1[0].1.declaration()));
}

#[test]
fn continue_is_rejected() {
    let error = build("while (a) { continue; }").unwrap_err();

    assert!(matches!(error, CompileError::UnsupportedNode { .. }));
}

#[test]
fn exports_are_registered_by_name() {
    let (_, ir) = build("export const a = 1; const b = 2; export { b as c }; export default a;").unwrap();

    let names: Vec<_> = ir.exports.keys().map(|name| name.value()).collect();
    assert_eq!(names.len(), 3);
    for name in ["a", "c", "default"] {
        assert!(names.contains(&name), "missing export {name}");
    }
}

#[test]
fn unresolved_names_are_globals() {
    let (_, ir) = build("console.log(undefined);").unwrap();
    let instructions = entry_instructions(&ir);

    assert!(matches!(
        instructions[0],
        InstructionKind::LoadGlobal { name } if name.value() == "console"
    ));
    assert!(instructions.iter().any(|kind| matches!(
        kind,
        InstructionKind::Literal { value: crate::middle::hir::LiteralValue::Undefined }
    )));
}

#[test]
fn impure_logical_operands_stay_unsupported() {
    let (_, ir) = build("const a = x && f();").unwrap();

    assert!(
        entry_instructions(&ir)
            .iter()
            .any(|kind| matches!(kind, InstructionKind::Unsupported { .. }))
    );
}
