use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::{
    error::{CompileError, Result, invariant},
    middle::hir::{
        BlockId, Environment, FunctionIR, Identifier, InstructionKind, Phi, Place, StoreKind,
    },
};

/// Replaces every phi of the function with ordinary instructions:
///
/// 1. a store defining the phi from the declaration's first version, placed
///    right after that version's definition,
/// 2. reads of the operands in the region dominated by the phi block are
///    redirected to the phi,
/// 3. each predecessor copies its operand into the phi before leaving.
///
/// Step 2 runs before step 3 so the inserted copies keep reading their
/// operands. Phis are handled in reverse post-order of their blocks, which
/// lets an inner loop's phi pick up reads already redirected to an outer one.
pub fn eliminate_ssa(function: &mut FunctionIR, env: &mut Environment) -> Result<()> {
    let order: BTreeMap<BlockId, usize> = function
        .cfg
        .reverse_post_order()
        .into_iter()
        .enumerate()
        .map(|(index, block)| (block, index))
        .collect();

    let mut phis = std::mem::take(&mut function.phis);
    phis.sort_by_key(|phi| (order.get(&phi.block).copied().unwrap_or(usize::MAX), phi.id));

    let mut eliminated = 0;
    for phi in phis {
        if phi.operands.len() <= 1 {
            trace!(phi = %phi.id, "dropped phi with a single operand");
            continue;
        }

        store_initial_value(function, env, &phi)?;
        redirect_reads(function, env, &phi);
        insert_copies(function, env, &phi)?;
        eliminated += 1;
    }

    debug!(function = %function.id, eliminated, "eliminated SSA");
    Ok(())
}

fn store_initial_value(function: &mut FunctionIR, env: &mut Environment, phi: &Phi) -> Result<()> {
    let Some(original) = env.decl_to_places.get(&phi.declaration).and_then(|versions| {
        versions
            .iter()
            .find(|version| function.blocks.contains_key(&version.block))
            .copied()
    }) else {
        return Ok(());
    };

    let store = env.new_instruction(
        function.id,
        InstructionKind::StoreLocal {
            lval: phi.place,
            value: original.place,
            kind: StoreKind::Reassign,
        },
    );

    let Some(block) = function.blocks.get_mut(&original.block) else {
        return Err(invariant!("block {} of {} vanished", original.block, original.place));
    };

    let position = block
        .instructions
        .iter()
        .position(|instruction| instruction.defined_places().contains(&original.place))
        .map(|index| index + 1)
        .unwrap_or(block.instructions.len());

    block.instructions.insert(position, store);
    Ok(())
}

/// Where each operand version is defined, as `(block, index)`. Versions
/// defined in the header or by a phi sit before every instruction of their
/// block.
fn operand_definitions(
    function: &FunctionIR,
    env: &Environment,
    phi: &Phi,
) -> BTreeMap<Identifier, (BlockId, Option<usize>)> {
    let mut definitions = BTreeMap::new();

    let Some(versions) = env.decl_to_places.get(&phi.declaration) else {
        return definitions;
    };

    for operand in phi.operands.values() {
        let Some(version) = versions
            .iter()
            .find(|version| version.place.identifier == operand.identifier)
        else {
            continue;
        };

        let index = function.blocks.get(&version.block).and_then(|block| {
            block.instructions.iter().position(|instruction| {
                instruction
                    .defined_places()
                    .iter()
                    .any(|place| place.identifier == operand.identifier)
            })
        });

        definitions.insert(operand.identifier, (version.block, index));
    }

    definitions
}

fn redirect_reads(function: &mut FunctionIR, env: &Environment, phi: &Phi) {
    let definitions = operand_definitions(function, env, phi);
    let operands: BTreeSet<Identifier> = phi.operands.values().map(|p| p.identifier).collect();

    let region: Vec<BlockId> = function
        .blocks
        .keys()
        .copied()
        .filter(|block| function.cfg.dominates(phi.block, *block))
        .collect();

    // An operand defined inside the region keeps its reads wherever that
    // definition dominates them
    let shadowed = |operand: &Identifier, block: BlockId, index: usize| {
        let Some((def_block, def_index)) = definitions.get(operand) else {
            return false;
        };

        if !function.cfg.dominates(phi.block, *def_block) {
            return false;
        }

        if *def_block == block {
            def_index.is_none_or(|def_index| def_index < index)
        } else {
            function.cfg.strictly_dominates(*def_block, block)
        }
    };

    let mut rewrites: Vec<(BlockId, Option<usize>)> = Vec::new();

    for &block_id in &region {
        let block = &function.blocks[&block_id];

        for (index, instruction) in block.instructions.iter().enumerate() {
            let needs_rewrite = instruction.reads().iter().any(|read| {
                operands.contains(&read.identifier) && !shadowed(&read.identifier, block_id, index)
            });

            if needs_rewrite {
                rewrites.push((block_id, Some(index)));
            }
        }

        let terminal_index = block.instructions.len();
        let terminal_reads = block
            .terminal
            .as_ref()
            .map(|terminal| terminal.reads())
            .unwrap_or_default();

        if terminal_reads.iter().any(|read| {
            operands.contains(&read.identifier) && !shadowed(&read.identifier, block_id, terminal_index)
        }) {
            rewrites.push((block_id, None));
        }
    }

    let substitution: BTreeMap<Identifier, Place> = operands
        .iter()
        .map(|operand| (*operand, phi.place))
        .collect();

    for (block_id, index) in rewrites {
        let Some(block) = function.blocks.get_mut(&block_id) else {
            continue;
        };

        match index {
            Some(index) => {
                let instruction = &mut block.instructions[index];
                *instruction = instruction.rewrite(&substitution);
            }
            None => {
                if let Some(terminal) = &block.terminal {
                    block.terminal = Some(terminal.rewrite(&substitution));
                }
            }
        }
    }
}

fn insert_copies(function: &mut FunctionIR, env: &mut Environment, phi: &Phi) -> Result<()> {
    for (predecessor, operand) in &phi.operands {
        let load = env.new_instruction(function.id, InstructionKind::LoadLocal { place: *operand });
        let copy = env.new_instruction(
            function.id,
            InstructionKind::Copy {
                lval: phi.place,
                value: load.place,
            },
        );
        let statement = env.new_instruction(
            function.id,
            InstructionKind::ExpressionStatement {
                expression: copy.place,
            },
        );

        let Some(block) = function.blocks.get_mut(predecessor) else {
            return Err(CompileError::BlockNotFound {
                id: predecessor.to_string(),
            });
        };

        block.instructions.extend([load, copy, statement]);
    }

    Ok(())
}
