use std::path::PathBuf;

use super::{build_ssa, eliminate_ssa};
use crate::{
    frontend::{SourceFile, parser::Parser},
    middle::hir::{
        Environment, InstructionKind, ModuleIR, Terminal, Version, builder::build_module,
    },
};

fn build(source: &str) -> (Environment, ModuleIR) {
    let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
    let mut env = Environment::new();
    let mut ir = build_module(&mut env, PathBuf::from("test.js"), &module).unwrap();

    for function in ir.functions.values_mut() {
        build_ssa(function, &mut env).unwrap();
    }

    (env, ir)
}

#[test]
fn diamond_gets_a_single_phi_at_the_join() {
    let (env, ir) = build("let x = 1; if (c) { x = 2; } log(x);");
    let entry = ir.entry_function().unwrap();

    assert_eq!(entry.phis.len(), 1);

    let phi = &entry.phis[0];
    assert_eq!(env.declaration(phi.declaration).name.unwrap().value(), "x");
    assert_eq!(phi.operands.len(), 2);

    let Some(Terminal::Branch { fallthrough, .. }) = &entry.blocks[&entry.entry].terminal else {
        panic!("entry block should end in a branch");
    };
    assert_eq!(phi.block, *fallthrough);
}

#[test]
fn straight_line_code_needs_no_phis() {
    let (_, ir) = build("let x = 1; x = x + 1; log(x);");

    assert!(ir.entry_function().unwrap().phis.is_empty());
}

#[test]
fn loop_header_joins_the_entry_and_latch_versions() {
    let (_, ir) = build("let i = 0; while (i < 10) { i = i + 1; }");
    let entry = ir.entry_function().unwrap();

    let Some(Terminal::Jump { target: header }) = &entry.blocks[&entry.entry].terminal else {
        panic!("entry block should jump to the loop header");
    };

    let phi = entry
        .phis
        .iter()
        .find(|phi| phi.block == *header)
        .expect("loop header should have a phi");

    assert_eq!(phi.operands.len(), 2);
    assert!(phi.operands.contains_key(&entry.entry));
}

#[test]
fn phis_can_be_operands_of_other_phis() {
    let (_, ir) = build("let x = 0; while (a) { if (b) { x = 1; } } log(x);");
    let entry = ir.entry_function().unwrap();

    assert!(entry.phis.iter().any(|phi| {
        phi.operands
            .values()
            .any(|operand| matches!(operand.identifier.version, Version::Phi(_)))
    }));
}

#[test]
fn elimination_inserts_copies_and_redirects_reads() {
    let (mut env, mut ir) = build("let x = 1; if (c) { x = 2; } log(x);");
    let entry_id = ir.entry;
    let function = ir.functions.get_mut(&entry_id).unwrap();
    let phi = function.phis[0].clone();

    eliminate_ssa(function, &mut env).unwrap();
    assert!(function.phis.is_empty());

    for predecessor in phi.operands.keys() {
        let copies = function.blocks[predecessor]
            .instructions
            .iter()
            .filter(|instruction| {
                matches!(instruction.kind, InstructionKind::Copy { lval, .. } if lval == phi.place)
            })
            .count();
        assert_eq!(copies, 1, "missing copy in {predecessor}");
    }

    let join = &function.blocks[&phi.block];
    assert!(join.instructions.iter().any(|instruction| {
        matches!(instruction.kind, InstructionKind::LoadLocal { place } if place == phi.place)
    }));
}

#[test]
fn single_operand_phis_are_dropped() {
    let (mut env, mut ir) = build("while (a) { let y = 1; if (b) { y = 2; } log(y); }");
    let entry_id = ir.entry;
    let function = ir.functions.get_mut(&entry_id).unwrap();

    let copies_expected: usize = function
        .phis
        .iter()
        .filter(|phi| phi.operands.len() > 1)
        .map(|phi| phi.operands.len())
        .sum();

    eliminate_ssa(function, &mut env).unwrap();

    let copies = function
        .instructions()
        .filter(|instruction| matches!(instruction.kind, InstructionKind::Copy { .. }))
        .count();
    assert_eq!(copies, copies_expected);
}
