//! Control flow facts derived from a function's blocks: predecessors,
//! dominators, immediate dominators, dominance frontiers and back edges.
//! Everything is keyed by `BlockId` and recomputed from scratch whenever the
//! block graph changes.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{CompileError, Result},
    middle::hir::{BasicBlock, BlockId},
};

#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    pub entry: BlockId,
    pub predecessors: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub successors: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub dominators: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub immediate_dominators: BTreeMap<BlockId, BlockId>,
    pub dominance_frontier: BTreeMap<BlockId, BTreeSet<BlockId>>,
    /// Back edge sources keyed by the loop header they jump to
    pub back_edges: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

impl ControlFlowGraph {
    pub fn compute(entry: BlockId, blocks: &BTreeMap<BlockId, BasicBlock>) -> Self {
        let predecessors = compute_predecessors(entry, blocks);
        let successors = transpose(&predecessors);
        let dominators = compute_dominators(entry, &predecessors);
        let immediate_dominators = compute_immediate_dominators(&dominators);
        let dominance_frontier = compute_dominance_frontier(&predecessors, &immediate_dominators);

        let mut back_edges: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        for (block, preds) in &predecessors {
            for pred in preds {
                if dominators[pred].contains(block) {
                    back_edges.entry(*block).or_default().insert(*pred);
                }
            }
        }

        Self {
            entry,
            predecessors,
            successors,
            dominators,
            immediate_dominators,
            dominance_frontier,
            back_edges,
        }
    }

    pub fn predecessors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.predecessors.get(&block).into_iter().flatten().copied()
    }

    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.successors.get(&block).into_iter().flatten().copied()
    }

    /// Whether every path from the entry to `b` passes through `a`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators
            .get(&b)
            .is_some_and(|dominators| dominators.contains(&a))
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.immediate_dominators.get(&block).copied()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        block == self.entry || self.predecessors(block).next().is_some()
    }

    /// The single block jumping back to `header`, if it heads a loop
    pub fn back_edge(&self, header: BlockId) -> Result<Option<BlockId>> {
        let Some(sources) = self.back_edges.get(&header) else {
            return Ok(None);
        };

        match sources.len() {
            0 => Ok(None),
            1 => Ok(sources.first().copied()),
            _ => Err(CompileError::MultipleBackEdges {
                block: header.to_string(),
            }),
        }
    }

    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges
            .get(&to)
            .is_some_and(|sources| sources.contains(&from))
    }

    /// Blocks in depth first post-order. The walk starts at the entry and then
    /// continues from every block not reached yet, so unreachable subgraphs
    /// are included after the reachable ones.
    pub fn post_order(&self) -> Vec<BlockId> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();

        let roots = std::iter::once(self.entry).chain(self.predecessors.keys().copied());
        for root in roots {
            if !visited.insert(root) {
                continue;
            }

            // Each entry holds the successors still to visit, reversed so
            // they are popped in order
            let mut stack = vec![(root, self.pending_successors(root))];
            while let Some((block, successors)) = stack.last_mut() {
                let block = *block;

                match successors.pop() {
                    Some(successor) => {
                        if visited.insert(successor) {
                            stack.push((successor, self.pending_successors(successor)));
                        }
                    }
                    None => {
                        order.push(block);
                        stack.pop();
                    }
                }
            }
        }

        order
    }

    fn pending_successors(&self, block: BlockId) -> Vec<BlockId> {
        let mut successors: Vec<BlockId> = self.successors(block).collect();
        successors.reverse();
        successors
    }

    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut order = self.post_order();
        order.reverse();
        order
    }
}

/// Walks the graph from the entry, expanding each block once but recording
/// every edge that reaches a block. Every block gets an entry, even ones the
/// walk never reaches.
fn compute_predecessors(
    entry: BlockId,
    blocks: &BTreeMap<BlockId, BasicBlock>,
) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
    let mut predecessors: BTreeMap<_, BTreeSet<_>> =
        blocks.keys().map(|id| (*id, BTreeSet::new())).collect();

    let mut visited = BTreeSet::new();
    let mut stack = vec![entry];

    while let Some(block_id) = stack.pop() {
        if !visited.insert(block_id) {
            continue;
        }

        let Some(block) = blocks.get(&block_id) else {
            continue;
        };

        for successor in block.successors() {
            predecessors.entry(successor).or_default().insert(block_id);

            if !visited.contains(&successor) {
                stack.push(successor);
            }
        }
    }

    predecessors
}

fn transpose(
    predecessors: &BTreeMap<BlockId, BTreeSet<BlockId>>,
) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
    let mut successors: BTreeMap<_, BTreeSet<_>> = predecessors
        .keys()
        .map(|id| (*id, BTreeSet::new()))
        .collect();

    for (block, preds) in predecessors {
        for pred in preds {
            successors.entry(*pred).or_default().insert(*block);
        }
    }

    successors
}

fn compute_dominators(
    entry: BlockId,
    predecessors: &BTreeMap<BlockId, BTreeSet<BlockId>>,
) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
    let all: BTreeSet<BlockId> = predecessors.keys().copied().collect();

    let mut dominators: BTreeMap<BlockId, BTreeSet<BlockId>> = predecessors
        .iter()
        .map(|(block, preds)| {
            if *block == entry || preds.is_empty() {
                (*block, BTreeSet::from([*block]))
            } else {
                (*block, all.clone())
            }
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;

        for (block, preds) in predecessors {
            if *block == entry || preds.is_empty() {
                continue;
            }

            let mut new_set = preds
                .iter()
                .map(|pred| &dominators[pred])
                .fold(None::<BTreeSet<BlockId>>, |acc, set| match acc {
                    None => Some(set.clone()),
                    Some(acc) => Some(acc.intersection(set).copied().collect()),
                })
                .unwrap_or_default();
            new_set.insert(*block);

            if new_set != dominators[block] {
                dominators.insert(*block, new_set);
                changed = true;
            }
        }
    }

    dominators
}

/// The strict dominators of a block form a chain, so the one with the largest
/// dominator set is the closest.
fn compute_immediate_dominators(
    dominators: &BTreeMap<BlockId, BTreeSet<BlockId>>,
) -> BTreeMap<BlockId, BlockId> {
    dominators
        .iter()
        .filter_map(|(block, doms)| {
            doms.iter()
                .filter(|candidate| *candidate != block)
                .max_by_key(|candidate| dominators[*candidate].len())
                .map(|idom| (*block, *idom))
        })
        .collect()
}

fn compute_dominance_frontier(
    predecessors: &BTreeMap<BlockId, BTreeSet<BlockId>>,
    immediate_dominators: &BTreeMap<BlockId, BlockId>,
) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
    let mut frontier: BTreeMap<BlockId, BTreeSet<BlockId>> = predecessors
        .keys()
        .map(|id| (*id, BTreeSet::new()))
        .collect();

    for (block, preds) in predecessors {
        if preds.len() < 2 {
            continue;
        }

        let idom = immediate_dominators.get(block).copied();

        for pred in preds {
            let mut runner = Some(*pred);

            while let Some(current) = runner {
                if Some(current) == idom {
                    break;
                }

                frontier.entry(current).or_default().insert(*block);
                runner = immediate_dominators.get(&current).copied();
            }
        }
    }

    frontier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::{IdentifierId, Identifier, Place, PlaceId, Terminal, Version};

    fn test_place() -> Place {
        Place {
            id: PlaceId(0),
            identifier: Identifier {
                id: IdentifierId(0),
                version: Version::Numbered(0),
                declaration: crate::middle::hir::DeclarationId(0),
            },
        }
    }

    fn graph(edges: &[(u32, Terminal)]) -> BTreeMap<BlockId, BasicBlock> {
        edges
            .iter()
            .map(|(id, terminal)| {
                let mut block = BasicBlock::new(BlockId(*id));
                block.terminal = Some(terminal.clone());
                (BlockId(*id), block)
            })
            .collect()
    }

    fn jump(target: u32) -> Terminal {
        Terminal::Jump {
            target: BlockId(target),
        }
    }

    fn branch(consequent: u32, alternate: u32, fallthrough: u32) -> Terminal {
        Terminal::Branch {
            test: test_place(),
            consequent: BlockId(consequent),
            alternate: BlockId(alternate),
            fallthrough: BlockId(fallthrough),
        }
    }

    fn ret() -> Terminal {
        Terminal::Return { value: None }
    }

    fn set(ids: &[u32]) -> BTreeSet<BlockId> {
        ids.iter().map(|id| BlockId(*id)).collect()
    }

    #[test]
    fn diamond() {
        let blocks = graph(&[(0, branch(1, 2, 3)), (1, jump(3)), (2, jump(3)), (3, ret())]);
        let cfg = ControlFlowGraph::compute(BlockId(0), &blocks);

        assert_eq!(cfg.predecessors[&BlockId(3)], set(&[1, 2]));
        assert_eq!(cfg.dominators[&BlockId(0)], set(&[0]));
        assert_eq!(cfg.dominators[&BlockId(3)], set(&[0, 3]));
        assert_eq!(cfg.immediate_dominator(BlockId(3)), Some(BlockId(0)));
        assert_eq!(cfg.dominance_frontier[&BlockId(1)], set(&[3]));
        assert_eq!(cfg.dominance_frontier[&BlockId(2)], set(&[3]));
        assert!(cfg.dominance_frontier[&BlockId(0)].is_empty());
        assert!(cfg.back_edges.is_empty());
    }

    #[test]
    fn while_loop() {
        // bb0 -> bb1 (test) -> bb2 (body) -> bb1, bb1 -> bb3 (exit)
        let blocks = graph(&[(0, jump(1)), (1, branch(2, 3, 3)), (2, jump(1)), (3, ret())]);
        let cfg = ControlFlowGraph::compute(BlockId(0), &blocks);

        assert_eq!(cfg.back_edge(BlockId(1)).unwrap(), Some(BlockId(2)));
        assert!(cfg.is_back_edge(BlockId(2), BlockId(1)));
        assert_eq!(cfg.dominance_frontier[&BlockId(2)], set(&[1]));
        assert_eq!(cfg.dominance_frontier[&BlockId(1)], set(&[1]));
        assert_eq!(cfg.post_order().last(), Some(&BlockId(0)));
    }

    #[test]
    fn unreachable_blocks_dominate_only_themselves() {
        let blocks = graph(&[(0, ret()), (1, jump(0))]);
        let cfg = ControlFlowGraph::compute(BlockId(0), &blocks);

        assert_eq!(cfg.dominators[&BlockId(1)], set(&[1]));
        assert!(!cfg.is_reachable(BlockId(1)));
        assert_eq!(cfg.post_order(), vec![BlockId(0), BlockId(1)]);
    }

    #[test]
    fn post_order_walks_deep_chains_without_recursing() {
        let depth = 200_000;
        let mut cfg = ControlFlowGraph::default();
        for id in 0..depth {
            cfg.successors.insert(BlockId(id), set(&[id + 1]));
        }

        let order = cfg.post_order();

        assert_eq!(order.len(), depth as usize + 1);
        assert_eq!(order.first(), Some(&BlockId(depth)));
        assert_eq!(order.last(), Some(&BlockId(0)));
    }

    #[test]
    fn two_back_edges_are_rejected() {
        // Both arms of the loop body jump straight back to the header
        let blocks = graph(&[
            (0, jump(1)),
            (1, branch(2, 5, 5)),
            (2, branch(3, 4, 1)),
            (3, jump(1)),
            (4, jump(1)),
            (5, ret()),
        ]);
        let cfg = ControlFlowGraph::compute(BlockId(0), &blocks);

        assert!(matches!(
            cfg.back_edge(BlockId(1)),
            Err(CompileError::MultipleBackEdges { .. })
        ));
    }

    #[test]
    fn dominance_is_transitive() {
        let blocks = graph(&[
            (0, jump(1)),
            (1, branch(2, 3, 4)),
            (2, jump(4)),
            (3, jump(4)),
            (4, jump(5)),
            (5, ret()),
        ]);
        let cfg = ControlFlowGraph::compute(BlockId(0), &blocks);

        for a in blocks.keys() {
            assert!(cfg.dominates(*a, *a));
            for b in blocks.keys() {
                for c in blocks.keys() {
                    if cfg.dominates(*a, *b) && cfg.dominates(*b, *c) {
                        assert!(cfg.dominates(*a, *c));
                    }
                }
            }
        }
        assert_eq!(cfg.immediate_dominator(BlockId(5)), Some(BlockId(4)));
    }
}
