//! Late dead code elimination.
//!
//! Read counts are collected over the whole module so a value used in a
//! later block (or a closure) keeps its definition. Blocks are visited in
//! post-order and each is scanned backwards; removing an instruction releases
//! its own reads, so whole chains of unused pure values fall away in a single
//! step.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use super::{Pass, read_counts};
use crate::{
    error::Result,
    middle::hir::{Environment, FunctionIR, Identifier, Instruction, InstructionKind, ModuleIR, Place},
};

pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let mut reads = read_counts(module);
        let mut removed = 0;

        for function in module.functions.values_mut() {
            let destructurings = Destructurings::collect(function);

            for block_id in function.cfg.post_order() {
                let Some(block) = function.blocks.get_mut(&block_id) else {
                    continue;
                };

                let mut index = block.instructions.len();
                while index > 0 {
                    index -= 1;

                    let instruction = &block.instructions[index];
                    if !is_dead(instruction, &reads, env, &destructurings) {
                        continue;
                    }

                    let instruction = block.instructions.remove(index);
                    trace!(instruction = %instruction.id, "removed dead instruction");

                    for place in instruction.reads() {
                        if let Some(count) = reads.get_mut(&place.identifier) {
                            *count = count.saturating_sub(1);
                        }
                    }
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(path = %module.path.display(), removed, "eliminated dead code");
        }

        Ok(removed > 0)
    }
}

/// Shapes needed to tell whether an array destructuring binds only values
/// which are already computed
#[derive(Default)]
struct Destructurings {
    patterns: HashMap<Identifier, Vec<Option<Place>>>,
    bindings: HashSet<Identifier>,
    /// Arrays without spread elements
    arrays: HashSet<Identifier>,
}

impl Destructurings {
    fn collect(function: &FunctionIR) -> Self {
        let mut shapes = Self::default();

        let spreads: HashSet<Identifier> = function
            .instructions()
            .filter(|instruction| matches!(instruction.kind, InstructionKind::Spread { .. }))
            .map(|instruction| instruction.place.identifier)
            .collect();

        for instruction in function.instructions() {
            let identifier = instruction.place.identifier;

            match &instruction.kind {
                InstructionKind::ArrayPattern { elements } => {
                    shapes.patterns.insert(identifier, elements.clone());
                }
                InstructionKind::BindingIdentifier { .. } => {
                    shapes.bindings.insert(identifier);
                }
                InstructionKind::Array { elements }
                    if !elements.iter().any(|e| spreads.contains(&e.identifier)) =>
                {
                    shapes.arrays.insert(identifier);
                }
                _ => {}
            }
        }

        shapes
    }
}

fn is_dead(
    instruction: &Instruction,
    reads: &HashMap<Identifier, usize>,
    env: &Environment,
    destructurings: &Destructurings,
) -> bool {
    let unread = |place: &Place| reads.get(&place.identifier).copied().unwrap_or(0) == 0;

    match &instruction.kind {
        // Phi copies are all that is left of a merge
        InstructionKind::Copy { .. } => false,
        InstructionKind::StoreLocal { lval, .. } => {
            unread(&instruction.place) && unread(lval) && !env.is_captured_mutable(lval.declaration())
        }
        InstructionKind::Destructure { pattern, value, .. } => {
            let Some(elements) = destructurings.patterns.get(&pattern.identifier) else {
                return false;
            };

            // Each binding is read once, by the pattern itself
            let bindings_unread = elements.iter().flatten().all(|element| {
                destructurings.bindings.contains(&element.identifier)
                    && reads.get(&element.identifier).copied().unwrap_or(0) <= 1
                    && !env.is_captured_mutable(element.declaration())
            });

            unread(&instruction.place)
                && destructurings.arrays.contains(&value.identifier)
                && bindings_unread
        }
        kind => kind.is_pure() && unread(&instruction.place),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::optimization::{
        ConstantPropagation, ProjectConstants, run_to_fixed_point, test_support::lower,
    };

    fn kinds(function: &FunctionIR) -> Vec<&InstructionKind> {
        function.blocks.values().flat_map(|b| &b.instructions).map(|i| &i.kind).collect()
    }

    #[test]
    fn folded_locals_disappear() {
        let (mut env, mut ir) = lower("function f() { let x = 1; let y = 2; return x + y; }");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();
        run_to_fixed_point(&mut DeadCodeElimination, &mut ir, &mut env, 64).unwrap();

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        assert_eq!(
            kinds(f),
            vec![&InstructionKind::Literal {
                value: crate::middle::hir::LiteralValue::Number(3.0)
            }]
        );
    }

    #[test]
    fn calls_survive_without_readers() {
        let (mut env, mut ir) = lower("function f() { let a = g(); }");

        run_to_fixed_point(&mut DeadCodeElimination, &mut ir, &mut env, 64).unwrap();

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        let kinds = kinds(f);
        assert!(kinds.iter().any(|kind| matches!(kind, InstructionKind::Call { .. })));
        assert!(kinds.iter().any(|kind| matches!(kind, InstructionKind::LoadGlobal { .. })));
        assert!(!kinds.iter().any(|kind| matches!(kind, InstructionKind::StoreLocal { .. })));
    }

    #[test]
    fn stores_to_captured_variables_are_kept() {
        let (mut env, mut ir) = lower("let x = 1; const read = () => x; x = 2; read();");

        run_to_fixed_point(&mut DeadCodeElimination, &mut ir, &mut env, 64).unwrap();

        let entry = ir.entry_function().unwrap();
        let stores_to_x = kinds(entry)
            .into_iter()
            .filter(|kind| match kind {
                InstructionKind::StoreLocal { lval, .. } => {
                    env.declaration(lval.declaration()).name.is_some_and(|n| n.value() == "x")
                }
                _ => false,
            })
            .count();

        assert_eq!(stores_to_x, 2);
    }

    #[test]
    fn unused_array_destructuring_is_removed() {
        let (mut env, mut ir) = lower("function f(a, b) { let [x, y] = [a, b]; }");

        run_to_fixed_point(&mut DeadCodeElimination, &mut ir, &mut env, 64).unwrap();

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        assert!(kinds(f).is_empty());
    }
}
