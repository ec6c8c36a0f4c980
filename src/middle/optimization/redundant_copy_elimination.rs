//! Removes stores that are overwritten before anything reads them.
//!
//! Each block is scanned forward keeping the latest unread store per
//! declaration. A second store to the same declaration with no read in
//! between makes the first one unobservable; it is deleted and the survivor
//! takes over its `let`/`const`/`var` keyword.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use tracing::trace;

use super::{Pass, read_counts};
use crate::{
    error::Result,
    middle::hir::{
        BasicBlock, DeclarationId, Environment, Identifier, InstructionKind, ModuleIR, StoreKind,
    },
};

pub struct RedundantCopyElimination;

impl Pass for RedundantCopyElimination {
    fn name(&self) -> &'static str {
        "redundant_copy_elimination"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let reads = read_counts(module);
        let mut changed = false;

        for function in module.functions.values_mut() {
            for block in function.blocks.values_mut() {
                changed |= eliminate_in_block(block, env, &reads);
            }
        }

        Ok(changed)
    }
}

fn eliminate_in_block(
    block: &mut BasicBlock,
    env: &Environment,
    reads: &HashMap<Identifier, usize>,
) -> bool {
    let unread = |identifier: &Identifier| reads.get(identifier).copied().unwrap_or(0) == 0;

    let mut pending: HashMap<DeclarationId, usize> = HashMap::new();
    let mut removed: HashSet<usize> = HashSet::new();
    let mut inherited: BTreeMap<usize, StoreKind> = BTreeMap::new();

    for (index, instruction) in block.instructions.iter().enumerate() {
        for place in instruction.reads() {
            pending.remove(&place.declaration());
        }

        match &instruction.kind {
            InstructionKind::StoreLocal { lval, kind, .. } => {
                let declaration = lval.declaration();
                if env.is_captured_mutable(declaration) {
                    continue;
                }

                if let Some(earlier) = pending.get(&declaration).copied() {
                    let previous = &block.instructions[earlier];

                    if let InstructionKind::StoreLocal {
                        lval: previous_lval,
                        kind: previous_kind,
                        ..
                    } = &previous.kind
                        && unread(&previous.place.identifier)
                        && unread(&previous_lval.identifier)
                    {
                        trace!(removed = %previous.id, kept = %instruction.id, "overwritten store");
                        removed.insert(earlier);

                        let keyword = inherited.remove(&earlier).unwrap_or(*previous_kind);
                        if keyword.is_declaration() && *kind == StoreKind::Reassign {
                            inherited.insert(index, keyword);
                        }
                    }
                }

                pending.insert(declaration, index);
            }
            InstructionKind::Copy { lval, .. } => {
                pending.remove(&lval.declaration());
            }
            InstructionKind::BindingIdentifier { .. } | InstructionKind::Destructure { .. } => {
                pending.remove(&instruction.place.declaration());
            }
            _ => {}
        }
    }

    if removed.is_empty() {
        return false;
    }

    for (index, keyword) in inherited {
        if let InstructionKind::StoreLocal { kind, .. } = &mut block.instructions[index].kind {
            *kind = keyword;
        }
    }

    let mut index = 0;
    block.instructions.retain(|_| {
        let keep = !removed.contains(&index);
        index += 1;
        keep
    });

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        hir::{FunctionIR, Place},
        optimization::{run_to_fixed_point, test_support::lower},
    };

    fn stores(function: &FunctionIR) -> Vec<(Place, StoreKind)> {
        function
            .instructions()
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::StoreLocal { lval, kind, .. } => Some((*lval, *kind)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn overwritten_store_is_removed_and_keyword_kept() {
        let (mut env, mut ir) = lower("function f() { let x = 1; x = 2; return x; }");

        assert!(run_to_fixed_point(&mut RedundantCopyElimination, &mut ir, &mut env, 16).unwrap());

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        let stores = stores(f);
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].1, StoreKind::Let);
    }

    #[test]
    fn stores_read_in_between_are_kept() {
        let (mut env, mut ir) = lower("function f() { let x = 1; log(x); x = 2; return x; }");

        assert!(!run_to_fixed_point(&mut RedundantCopyElimination, &mut ir, &mut env, 16).unwrap());

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        assert_eq!(stores(f).len(), 2);
    }
}
