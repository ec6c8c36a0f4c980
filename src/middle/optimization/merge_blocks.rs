//! Merges a block into its predecessor when the two are joined by a plain
//! jump and nothing else enters the second block. Unreachable blocks are
//! dropped on the way.

use std::collections::BTreeSet;

use tracing::trace;

use super::Pass;
use crate::{
    error::Result,
    middle::hir::{BlockId, Environment, FunctionIR, ModuleIR, Terminal},
};

pub struct MergeBlocks;

impl Pass for MergeBlocks {
    fn name(&self) -> &'static str {
        "merge_blocks"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let mut changed = false;

        for function in module.functions.values_mut() {
            changed |= remove_unreachable(function);

            while let Some((into, from)) = find_mergeable(function) {
                let Some(merged) = function.blocks.remove(&from) else {
                    break;
                };

                if let Some(block) = function.blocks.get_mut(&into) {
                    block.instructions.extend(merged.instructions);
                    block.terminal = merged.terminal;
                }

                env.rehome_block(from, into);
                function.recompute_cfg();

                trace!(function = %function.id, %from, %into, "merged blocks");
                changed = true;
            }
        }

        Ok(changed)
    }
}

/// Blocks code generation places after a conditional
fn fallthroughs(function: &FunctionIR) -> BTreeSet<BlockId> {
    function
        .blocks
        .values()
        .filter_map(|block| match block.terminal {
            Some(Terminal::Branch { fallthrough, .. }) => Some(fallthrough),
            _ => None,
        })
        .collect()
}

fn find_mergeable(function: &FunctionIR) -> Option<(BlockId, BlockId)> {
    let fallthroughs = fallthroughs(function);

    function.blocks.values().find_map(|block| {
        let Some(Terminal::Jump { target }) = block.terminal else {
            return None;
        };

        let single_predecessor = function.cfg.predecessors(target).eq([block.id]);

        (target != block.id
            && target != function.entry
            && single_predecessor
            && !fallthroughs.contains(&target))
        .then_some((block.id, target))
    })
}

fn remove_unreachable(function: &mut FunctionIR) -> bool {
    let fallthroughs = fallthroughs(function);

    let unreachable: Vec<BlockId> = function
        .blocks
        .keys()
        .copied()
        .filter(|block| !function.cfg.is_reachable(*block) && !fallthroughs.contains(block))
        .collect();

    if unreachable.is_empty() {
        return false;
    }

    for block in &unreachable {
        function.blocks.remove(block);
    }
    function.recompute_cfg();

    trace!(function = %function.id, removed = unreachable.len(), "removed unreachable blocks");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::optimization::{run_to_fixed_point, test_support::lower};

    #[test]
    fn for_initializer_joins_the_entry_block() {
        let (mut env, mut ir) = lower("for (let i = 0; i < 3; i = i + 1) { log(i); }");
        let before = ir.entry_function().unwrap().blocks.len();

        assert!(run_to_fixed_point(&mut MergeBlocks, &mut ir, &mut env, 16).unwrap());

        let entry = ir.entry_function().unwrap();
        assert_eq!(entry.blocks.len(), before - 1);
        assert!(matches!(
            entry.blocks[&entry.entry].terminal,
            Some(Terminal::Jump { .. })
        ));

        // Every version recorded in the removed block now lives in a block
        // that still exists
        for versions in env.decl_to_places.values() {
            for version in versions {
                if env.declaration(version.place.declaration()).owner == entry.id {
                    assert!(entry.blocks.contains_key(&version.block));
                }
            }
        }
    }

    #[test]
    fn conditional_joins_are_kept() {
        let (mut env, mut ir) = lower("let x = 1; if (c) { x = 2; } log(x);");

        assert!(!run_to_fixed_point(&mut MergeBlocks, &mut ir, &mut env, 16).unwrap());
        assert_eq!(ir.entry_function().unwrap().blocks.len(), 3);
    }
}
