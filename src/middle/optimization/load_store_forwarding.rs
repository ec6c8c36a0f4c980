//! Forwards values through single-use locals.
//!
//! Within one block, `t = X; L = load t; final = L` becomes `final = X` when
//! `t` is written once, read once and never observed by a closure. The store
//! and load left behind are dead and go away in DCE.

use hashbrown::HashMap;
use tracing::trace;

use super::{Pass, Site, definition_sites, read_counts};
use crate::{
    error::Result,
    middle::hir::{
        BasicBlock, DeclarationId, Environment, Identifier, InstructionKind, ModuleIR, Place,
    },
};

pub struct LoadStoreForwarding;

impl Pass for LoadStoreForwarding {
    fn name(&self) -> &'static str {
        "load_store_forwarding"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let definitions = definition_sites(module);
        let reads = read_counts(module);

        let forwardable = |lval: &Place, value: &Place| {
            definitions
                .get(&lval.identifier)
                .is_some_and(|sites: &Vec<Site>| sites.len() == 1)
                && reads.get(&lval.identifier) == Some(&1)
                && !env.is_captured_mutable(lval.declaration())
                // Named values are printed by name and may be stale by the
                // time the final store runs
                && env.is_temporary(value.declaration())
        };

        let mut changed = false;
        for function in module.functions.values_mut() {
            for block in function.blocks.values_mut() {
                changed |= forward_block(block, &forwardable);
            }
        }

        Ok(changed)
    }
}

fn forward_block(block: &mut BasicBlock, forwardable: &impl Fn(&Place, &Place) -> bool) -> bool {
    // Forwardable stores keyed by the stored identifier
    let mut stores: HashMap<Identifier, Place> = HashMap::new();
    // Loads of those stores keyed by the load's result: (stored value, source declaration)
    let mut loads: HashMap<Identifier, (Place, DeclarationId)> = HashMap::new();
    let mut rewrites = Vec::new();

    for (index, instruction) in block.instructions.iter().enumerate() {
        match &instruction.kind {
            InstructionKind::LoadLocal { place } => {
                if let Some(value) = stores.get(&place.identifier) {
                    loads.insert(instruction.place.identifier, (*value, place.declaration()));
                }
            }
            InstructionKind::StoreLocal { lval, value, .. } | InstructionKind::Copy { lval, value } => {
                let mut value = *value;

                if let Some((source, declaration)) = loads.get(&value.identifier) {
                    // Phi copies write back into the declaration they load from
                    if *declaration != lval.declaration() {
                        rewrites.push((index, *source));
                        value = *source;
                    }
                }

                if matches!(instruction.kind, InstructionKind::StoreLocal { .. })
                    && forwardable(lval, &value)
                {
                    stores.insert(lval.identifier, value);
                }
            }
            _ => {}
        }
    }

    let changed = !rewrites.is_empty();

    for (index, source) in rewrites {
        let instruction = &mut block.instructions[index];
        trace!(instruction = %instruction.id, %source, "forwarded stored value");

        if let InstructionKind::StoreLocal { value, .. } | InstructionKind::Copy { value, .. } =
            &mut instruction.kind
        {
            *value = source;
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        hir::{FunctionIR, Terminal},
        optimization::{run_to_fixed_point, test_support::lower},
    };

    fn stores(function: &FunctionIR) -> Vec<(Place, Place)> {
        function
            .instructions()
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::StoreLocal { lval, value, .. } => Some((*lval, *value)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn forwards_through_a_single_use_local() {
        let (mut env, mut ir) = lower("function f(a) { let t = a * 2; let r = t; return r; }");

        let changed = run_to_fixed_point(&mut LoadStoreForwarding, &mut ir, &mut env, 16).unwrap();
        assert!(changed);

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        let product = f
            .instructions()
            .find(|instruction| matches!(instruction.kind, InstructionKind::Binary { .. }))
            .unwrap()
            .place;

        let stores = stores(f);
        let (lval, value) = stores.last().unwrap();
        assert_eq!(env.declaration(lval.declaration()).name.unwrap().value(), "r");
        assert_eq!(*value, product);
    }

    #[test]
    fn locals_read_twice_are_left_alone() {
        let (mut env, mut ir) = lower("function f(a) { let t = a * 2; let r = t; return r + t; }");

        let before = stores(ir.functions.values().find(|f| f.name.is_some()).unwrap());
        run_to_fixed_point(&mut LoadStoreForwarding, &mut ir, &mut env, 16).unwrap();
        let after = stores(ir.functions.values().find(|f| f.name.is_some()).unwrap());

        assert_eq!(before, after);
    }

    #[test]
    fn phi_copies_keep_their_loads() {
        let (mut env, mut ir) = lower("let i = 0; while (i < 3) { i = i + 1; } log(i);");

        run_to_fixed_point(&mut LoadStoreForwarding, &mut ir, &mut env, 16).unwrap();

        let entry = ir.entry_function().unwrap();
        let loads: Vec<Identifier> = entry
            .instructions()
            .filter(|instruction| matches!(instruction.kind, InstructionKind::LoadLocal { .. }))
            .map(|instruction| instruction.place.identifier)
            .collect();

        for instruction in entry.instructions() {
            if let InstructionKind::Copy { value, .. } = &instruction.kind {
                assert!(loads.contains(&value.identifier));
            }
        }
        assert!(matches!(
            entry.blocks[&entry.entry].terminal,
            Some(Terminal::Jump { .. })
        ));
    }
}
