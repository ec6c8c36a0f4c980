//! Inlines calls to small module level functions.
//!
//! A callee qualifies when it is a function declaration at the top of the
//! module whose body runs straight through to a return, whose parameters
//! are plain identifiers, and which isn't part of a call graph cycle. The
//! body is cloned into the caller with fresh declarations and the arguments
//! are bound through one array destructuring, so every argument is evaluated
//! before any parameter is written.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use tracing::debug;

use super::Pass;
use crate::{
    error::{CompileError, Result, invariant},
    middle::hir::{
        BasicBlock, BlockId, DeclarationId, DeclarationKind, Environment, FunctionIR, FunctionId, FunctionKind,
        Identifier, Instruction, InstructionKind, LiteralValue, ModuleIR, Place, StoreKind,
        Terminal,
    },
};

#[derive(Debug, Default)]
pub struct FunctionInlining {
    /// Whether each function can reach itself through calls
    recursive: HashMap<FunctionId, bool>,
}

type CallGraph = BTreeMap<FunctionId, BTreeSet<FunctionId>>;

#[derive(Debug)]
struct CallSite {
    caller: FunctionId,
    block: BlockId,
    index: usize,
    callee: FunctionId,
}

impl Pass for FunctionInlining {
    fn name(&self) -> &'static str {
        "function_inlining"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let graph: CallGraph = module
            .functions
            .values()
            .map(|function| {
                let callees = direct_calls(function, env).into_iter().map(|(.., callee)| callee);
                (function.id, callees.collect())
            })
            .collect();

        let mut site = None;

        'search: for function in module.functions.values() {
            for (block, index, callee) in direct_calls(function, env) {
                if self.is_inlinable(module, env, &graph, callee) {
                    site = Some(CallSite {
                        caller: function.id,
                        block,
                        index,
                        callee,
                    });
                    break 'search;
                }
            }
        }

        let Some(site) = site else {
            return Ok(false);
        };

        debug!(caller = %site.caller, callee = %site.callee, "inlining call");
        inline(module, env, &site)?;

        Ok(true)
    }
}

impl FunctionInlining {
    fn is_inlinable(
        &mut self,
        module: &ModuleIR,
        env: &Environment,
        graph: &CallGraph,
        callee: FunctionId,
    ) -> bool {
        let Some(function) = module.functions.get(&callee) else {
            return false;
        };

        is_small_enough(function, module, env) && !self.is_recursive(graph, callee)
    }

    fn is_recursive(&mut self, graph: &CallGraph, function: FunctionId) -> bool {
        if let Some(recursive) = self.recursive.get(&function) {
            return *recursive;
        }

        let mut visited = BTreeSet::new();
        let mut stack: Vec<FunctionId> = graph.get(&function).into_iter().flatten().copied().collect();
        let mut recursive = false;

        while let Some(current) = stack.pop() {
            if current == function {
                recursive = true;
                break;
            }

            if visited.insert(current) {
                stack.extend(graph.get(&current).into_iter().flatten());
            }
        }

        self.recursive.insert(function, recursive);
        recursive
    }
}

/// Calls whose callee is a function declaration that is never reassigned,
/// as `(block, index, callee)`
fn direct_calls(function: &FunctionIR, env: &Environment) -> Vec<(BlockId, usize, FunctionId)> {
    let loads: HashMap<Identifier, DeclarationId> = function
        .instructions()
        .filter_map(|instruction| match &instruction.kind {
            InstructionKind::LoadLocal { place } => {
                Some((instruction.place.identifier, place.declaration()))
            }
            _ => None,
        })
        .collect();

    let mut calls = Vec::new();

    for block in function.blocks.values() {
        for (index, instruction) in block.instructions.iter().enumerate() {
            let InstructionKind::Call { callee, .. } = &instruction.kind else {
                continue;
            };

            let Some(declaration) = loads.get(&callee.identifier) else {
                continue;
            };

            let single_version = env
                .decl_to_places
                .get(declaration)
                .is_some_and(|versions| versions.len() == 1);

            if let Some(target) = env.function_declarations.get(declaration)
                && single_version
            {
                calls.push((block.id, index, *target));
            }
        }
    }

    calls
}

fn is_small_enough(function: &FunctionIR, module: &ModuleIR, env: &Environment) -> bool {
    if function.kind != FunctionKind::Declaration || function.parent != Some(module.entry) {
        return false;
    }

    if straight_line_body(function).is_none() {
        return false;
    }

    let simple_parameters = function
        .header
        .iter()
        .all(|instruction| matches!(instruction.kind, InstructionKind::BindingIdentifier { .. }))
        && function.params.iter().all(|param| {
            function
                .header
                .iter()
                .any(|instruction| instruction.place.identifier == param.identifier)
        });

    if !simple_parameters {
        return false;
    }

    function.instructions().all(|instruction| {
        let plain = match &instruction.kind {
            InstructionKind::Unsupported { .. } => false,
            InstructionKind::LoadGlobal { name } => name.value() != "arguments",
            kind => kind.functions().is_empty(),
        };

        // Writes to outer variables would need their versions tracked in the caller
        let writes_own_state = instruction
            .defined_places()
            .iter()
            .all(|place| env.declaration(place.declaration()).owner == function.id);

        plain && writes_own_state
    })
}

/// The reachable blocks of a function without control flow, in execution
/// order: a chain of jumps from the entry ending in a return. Blocks the
/// builder leaves behind a `return` are unreachable and ignored.
fn straight_line_body(function: &FunctionIR) -> Option<Vec<&BasicBlock>> {
    let mut chain: Vec<&BasicBlock> = Vec::new();
    let mut current = function.entry;

    loop {
        if chain.iter().any(|block| block.id == current) {
            return None;
        }

        let block = function.blocks.get(&current)?;
        chain.push(block);

        match &block.terminal {
            Some(Terminal::Jump { target }) => current = *target,
            Some(Terminal::Return { .. }) => break,
            _ => return None,
        }
    }

    let reachable = function
        .blocks
        .keys()
        .filter(|block| function.cfg.is_reachable(**block))
        .count();

    (reachable == chain.len()).then_some(chain)
}

/// Gives the callee's declarations fresh counterparts owned by the caller
struct Cloner<'a> {
    env: &'a mut Environment,
    caller: FunctionId,
    callee: FunctionId,
    declarations: HashMap<DeclarationId, DeclarationId>,
    places: HashMap<Identifier, Place>,
}

impl Cloner<'_> {
    fn place(&mut self, place: Place) -> Place {
        let declaration = place.declaration();

        if self.env.declaration(declaration).owner != self.callee {
            return place;
        }

        if let Some(mapped) = self.places.get(&place.identifier) {
            return *mapped;
        }

        let fresh = match self.declarations.get(&declaration) {
            Some(fresh) => *fresh,
            None => {
                let original = self.env.declaration(declaration);
                let kind = match original.kind {
                    DeclarationKind::Temporary => DeclarationKind::Temporary,
                    DeclarationKind::Const => DeclarationKind::Const,
                    _ => DeclarationKind::Let,
                };
                let name = original.name;

                let fresh = self.env.declare(name, kind, self.caller);
                self.declarations.insert(declaration, fresh);
                fresh
            }
        };

        let mapped = self.env.new_place(fresh);
        self.places.insert(place.identifier, mapped);
        mapped
    }

    fn instruction(&mut self, instruction: &Instruction) -> Instruction {
        let mut kind = instruction.kind.clone();

        kind.for_each_read_mut(|place| *place = self.place(*place));
        if let InstructionKind::StoreLocal { lval, .. } | InstructionKind::Copy { lval, .. } = &mut kind {
            *lval = self.place(*lval);
        }

        let place = self.place(instruction.place);
        let id = self.env.new_instruction_id();
        self.env.place_to_instruction.insert(place.id, id);

        Instruction {
            id,
            place,
            origin: instruction.origin,
            kind,
        }
    }
}

fn inline(module: &mut ModuleIR, env: &mut Environment, site: &CallSite) -> Result<()> {
    let Some(callee) = module.functions.get(&site.callee).cloned() else {
        return Err(invariant!("inlined function {} is missing", site.callee));
    };

    let Some(caller) = module.functions.get_mut(&site.caller) else {
        return Err(invariant!("caller {} is missing", site.caller));
    };

    let Some(block) = caller.blocks.get_mut(&site.block) else {
        return Err(CompileError::BlockNotFound {
            id: site.block.to_string(),
        });
    };

    let call = block.instructions[site.index].clone();
    let InstructionKind::Call { arguments, .. } = &call.kind else {
        return Err(invariant!("{} is not a call", call.id));
    };

    let mut cloner = Cloner {
        env,
        caller: site.caller,
        callee: site.callee,
        declarations: HashMap::new(),
        places: HashMap::new(),
    };

    let mut spliced = Vec::new();

    let arguments = cloner.env.new_instruction(
        site.caller,
        InstructionKind::Array {
            elements: arguments.clone(),
        },
    );
    let arguments_place = arguments.place;
    spliced.push(arguments);

    for instruction in &callee.header {
        spliced.push(cloner.instruction(instruction));
    }

    let parameters = callee.params.iter().map(|param| Some(cloner.place(*param))).collect();
    let pattern = cloner
        .env
        .new_instruction(site.caller, InstructionKind::ArrayPattern { elements: parameters });
    let destructure = cloner.env.new_instruction(
        site.caller,
        InstructionKind::Destructure {
            pattern: pattern.place,
            value: arguments_place,
            kind: StoreKind::Let,
        },
    );
    spliced.extend([pattern, destructure]);

    let body = straight_line_body(&callee)
        .ok_or_else(|| invariant!("inlined function {} has control flow", site.callee))?;
    for instruction in body.iter().flat_map(|block| &block.instructions) {
        spliced.push(cloner.instruction(instruction));
    }

    let returned = match body.last().and_then(|block| block.terminal.as_ref()) {
        Some(Terminal::Return { value: Some(value) }) => Some(cloner.place(*value)),
        _ => None,
    };

    if returned.is_none() {
        spliced.push(Instruction {
            kind: InstructionKind::Literal {
                value: LiteralValue::Undefined,
            },
            ..call.clone()
        });
    }

    for instruction in &spliced {
        for place in instruction.defined_places() {
            if !cloner.env.is_temporary(place.declaration()) {
                cloner.env.record_place(place.declaration(), site.block, place);
            }
        }
    }

    block.instructions.splice(site.index..=site.index, spliced);

    if let Some(returned) = returned {
        let substitution = BTreeMap::from([(call.place.identifier, returned)]);

        for block in caller.blocks.values_mut() {
            for instruction in &mut block.instructions {
                *instruction = instruction.rewrite(&substitution);
            }
            if let Some(terminal) = &block.terminal {
                block.terminal = Some(terminal.rewrite(&substitution));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::optimization::{
        ConstantPropagation, DeadCodeElimination, ProjectConstants, run_to_fixed_point,
        test_support::lower,
    };

    fn entry_kinds(ir: &ModuleIR) -> Vec<InstructionKind> {
        ir.entry_function()
            .unwrap()
            .instructions()
            .map(|instruction| instruction.kind.clone())
            .collect()
    }

    fn calls(ir: &ModuleIR) -> usize {
        entry_kinds(ir)
            .iter()
            .filter(|kind| matches!(kind, InstructionKind::Call { .. }))
            .count()
    }

    #[test]
    fn straight_line_functions_are_inlined() {
        let (mut env, mut ir) = lower("function add(a, b) { return a + b; } log(add(1, 2));");
        assert_eq!(calls(&ir), 2);

        let changed = run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();

        assert!(changed);
        assert_eq!(calls(&ir), 1);
        assert!(
            entry_kinds(&ir)
                .iter()
                .any(|kind| matches!(kind, InstructionKind::Destructure { kind: StoreKind::Let, .. }))
        );
    }

    #[test]
    fn inlined_constants_fold() {
        let (mut env, mut ir) = lower("function add(a, b) { return a + b; } log(add(1, 2));");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();
        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();
        run_to_fixed_point(&mut DeadCodeElimination, &mut ir, &mut env, 64).unwrap();

        let entry = ir.entry_function().unwrap();
        let argument = entry
            .instructions()
            .find_map(|instruction| match &instruction.kind {
                InstructionKind::Call { arguments, .. } => Some(arguments[0]),
                _ => None,
            })
            .unwrap();

        assert!(entry.instructions().any(|instruction| {
            instruction.place.identifier == argument.identifier
                && instruction.kind
                    == InstructionKind::Literal {
                        value: LiteralValue::Number(3.0),
                    }
        }));
    }

    #[test]
    fn recursive_functions_are_not_inlined() {
        let (mut env, mut ir) = lower(
            "function ping(n) { return pong(n); } function pong(n) { return ping(n); } ping(1);",
        );

        let changed = run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();

        assert!(!changed);
    }

    #[test]
    fn functions_with_control_flow_are_not_inlined() {
        let (mut env, mut ir) = lower("function pick(a) { if (a) { return 1; } return 2; } pick(x);");

        let changed = run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();

        assert!(!changed);
    }

    #[test]
    fn functions_reading_arguments_are_not_inlined() {
        let (mut env, mut ir) = lower("function first(a) { return arguments[0]; } log(first(1));");

        let changed = run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();

        assert!(!changed);
    }

    #[test]
    fn calls_without_a_return_value_become_undefined() {
        let (mut env, mut ir) = lower("function noop() { return; } const v = noop();");

        run_to_fixed_point(&mut FunctionInlining::default(), &mut ir, &mut env, 16).unwrap();

        assert_eq!(calls(&ir), 0);
        assert!(entry_kinds(&ir).contains(&InstructionKind::Literal {
            value: LiteralValue::Undefined
        }));
    }
}
