use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::{
    error::Result,
    middle::hir::{
        BlockId, DeclarationId, Environment, FunctionIR, Phi, Place, PlaceVersion, Version,
    },
};

/// Places phis for every declaration defined in more than one block of the
/// function, using the iterated dominance frontier of its definition blocks,
/// then fills in one operand per predecessor with a reaching definition.
pub fn build_ssa(function: &mut FunctionIR, env: &mut Environment) -> Result<()> {
    let blocks: BTreeSet<BlockId> = function.blocks.keys().copied().collect();

    let definitions: Vec<(DeclarationId, BTreeSet<BlockId>)> = env
        .decl_to_places
        .iter()
        .filter(|(declaration, _)| !env.is_temporary(**declaration))
        .map(|(declaration, versions)| {
            let sites = versions
                .iter()
                .map(|version| version.block)
                .filter(|block| blocks.contains(block))
                .collect();
            (*declaration, sites)
        })
        .filter(|(_, sites): &(DeclarationId, BTreeSet<BlockId>)| sites.len() > 1)
        .collect();

    let mut phis = Vec::new();

    for (declaration, sites) in definitions {
        let mut placed: BTreeSet<BlockId> = BTreeSet::new();
        let mut worklist: VecDeque<BlockId> = sites.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            let Some(frontier) = function.cfg.dominance_frontier.get(&block) else {
                continue;
            };

            for &join in frontier {
                if !placed.insert(join) {
                    continue;
                }

                let (id, place) = env.new_phi(declaration);
                env.record_place(declaration, join, place);
                trace!(%declaration, block = %join, phi = %id, "placed phi");

                phis.push(Phi {
                    id,
                    block: join,
                    place,
                    operands: BTreeMap::new(),
                    declaration,
                });

                if !sites.contains(&join) {
                    worklist.push_back(join);
                }
            }
        }
    }

    // Operands are looked up only once every phi is recorded, so a phi can
    // be the reaching definition of another
    for phi in &mut phis {
        let Some(versions) = env.decl_to_places.get(&phi.declaration) else {
            continue;
        };

        for predecessor in function.cfg.predecessors(phi.block) {
            if let Some(place) = reaching_definition(function, versions, predecessor) {
                phi.operands.insert(predecessor, place);
            }
        }
    }

    debug!(function = %function.id, phis = phis.len(), "built SSA");
    function.phis = phis;

    Ok(())
}

/// The version of a declaration live at the end of `block`: the last one
/// defined in the block, else the phi at its start, else whatever reaches its
/// immediate dominator.
fn reaching_definition(
    function: &FunctionIR,
    versions: &[PlaceVersion],
    block: BlockId,
) -> Option<Place> {
    let mut current = Some(block);

    while let Some(block) = current {
        let in_block = versions.iter().filter(|version| version.block == block);

        let defined = in_block
            .clone()
            .filter(|version| !matches!(version.place.identifier.version, Version::Phi(_)))
            .last()
            .or_else(|| in_block.last());

        if let Some(version) = defined {
            return Some(version.place);
        }

        current = function.cfg.immediate_dominator(block);
    }

    None
}
