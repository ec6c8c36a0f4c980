//! Optimization passes over HIR after SSA elimination.
//!
//! Every pass implements [`Pass`] and is driven to its own fixed point; the
//! whole pipeline is then repeated until no pass changes anything. Both loops
//! are capped by `max_optimizer_iterations`.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace, warn};

use crate::{
    config::CompilerOptions,
    error::Result,
    middle::hir::{
        BlockId, Environment, FunctionIR, FunctionId, Identifier, Instruction, InstructionKind,
        ModuleIR,
    },
};

pub mod constant_propagation;
pub mod dead_code_elimination;
pub mod function_inlining;
pub mod load_store_forwarding;
pub mod merge_blocks;
pub mod redundant_copy_elimination;

pub use constant_propagation::{ConstantPropagation, ProjectConstants};
pub use dead_code_elimination::DeadCodeElimination;
pub use function_inlining::FunctionInlining;
pub use load_store_forwarding::LoadStoreForwarding;
pub use merge_blocks::MergeBlocks;
pub use redundant_copy_elimination::RedundantCopyElimination;

pub trait Pass {
    fn name(&self) -> &'static str;

    /// Runs one round of the pass, returning whether anything changed
    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool>;
}

/// Repeats `pass` until it stops changing the module. Returns whether any
/// round changed something.
pub fn run_to_fixed_point(
    pass: &mut dyn Pass,
    module: &mut ModuleIR,
    env: &mut Environment,
    max_iterations: usize,
) -> Result<bool> {
    let mut changed_any = false;

    for iteration in 0..max_iterations {
        let changed = pass.step(module, env)?;
        trace!(pass = pass.name(), iteration, changed, "pass step");

        if !changed {
            return Ok(changed_any);
        }
        changed_any = true;
    }

    warn!(
        pass = pass.name(),
        max_iterations, "pass did not reach a fixed point"
    );
    Ok(changed_any)
}

/// Runs every enabled pass over one module until the pipeline as a whole
/// stops changing it. Constants exported by the module are recorded in
/// `constants` for the modules importing it.
pub fn optimize_module(
    module: &mut ModuleIR,
    env: &mut Environment,
    options: &CompilerOptions,
    constants: &mut ProjectConstants,
) -> Result<()> {
    let mut passes: Vec<Box<dyn Pass + '_>> = Vec::new();

    if options.enable_function_inlining_pass {
        passes.push(Box::new(FunctionInlining::default()));
    }
    if options.enable_constant_propagation_pass {
        passes.push(Box::new(ConstantPropagation::new(constants)));
    }
    if options.enable_load_store_forwarding_pass {
        passes.push(Box::new(LoadStoreForwarding));
    }
    if options.enable_redundant_copy_elimination_pass {
        passes.push(Box::new(RedundantCopyElimination));
    }
    if options.enable_late_dead_code_elimination_pass {
        passes.push(Box::new(DeadCodeElimination));
    }
    if options.enable_merge_blocks_pass {
        passes.push(Box::new(MergeBlocks));
    }

    for round in 0..options.max_optimizer_iterations {
        let mut changed = false;

        for pass in &mut passes {
            changed |= run_to_fixed_point(
                pass.as_mut(),
                module,
                env,
                options.max_optimizer_iterations,
            )?;
        }

        debug!(path = %module.path.display(), round, changed, "optimizer round");
        if !changed {
            return Ok(());
        }
    }

    warn!(
        path = %module.path.display(),
        "optimizer did not reach a fixed point"
    );
    Ok(())
}

/// Position of an instruction. `block` is `None` for function headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Site {
    pub function: FunctionId,
    pub block: Option<BlockId>,
    pub index: usize,
}

impl Site {
    /// Whether an instruction at `self` always runs before one at `other`
    pub fn dominates(&self, other: &Site, function: &FunctionIR) -> bool {
        if self.function != other.function {
            return false;
        }

        match (self.block, other.block) {
            (None, None) => self.index < other.index,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) if a == b => self.index < other.index,
            (Some(a), Some(b)) => function.cfg.strictly_dominates(a, b),
        }
    }
}

/// Every instruction of every function together with its site
pub(crate) fn sites(module: &ModuleIR) -> impl Iterator<Item = (Site, &Instruction)> {
    module.functions.values().flat_map(|function| {
        let header = function.header.iter().enumerate().map(|(index, instruction)| {
            (
                Site {
                    function: function.id,
                    block: None,
                    index,
                },
                instruction,
            )
        });

        let blocks = function.blocks.values().flat_map(|block| {
            block
                .instructions
                .iter()
                .enumerate()
                .map(|(index, instruction)| {
                    (
                        Site {
                            function: function.id,
                            block: Some(block.id),
                            index,
                        },
                        instruction,
                    )
                })
        });

        header.chain(blocks)
    })
}

/// Where every identifier is written
pub(crate) fn definition_sites(module: &ModuleIR) -> HashMap<Identifier, Vec<Site>> {
    let mut definitions: HashMap<Identifier, Vec<Site>> = HashMap::new();

    for (site, instruction) in sites(module) {
        for place in instruction.defined_places() {
            definitions.entry(place.identifier).or_default().push(site);
        }
    }

    definitions
}

/// How often each identifier is read, terminals included
pub(crate) fn read_counts(module: &ModuleIR) -> HashMap<Identifier, usize> {
    let mut counts = HashMap::new();

    for function in module.functions.values() {
        for place in function.reads() {
            *counts.entry(place.identifier).or_default() += 1;
        }
    }

    counts
}

/// Loads feeding a copy or store back into the declaration they read. These
/// are the phi copies (`x = x` once identifiers are named after their
/// declaration) and must stay loads so code generation can drop them.
pub(crate) fn self_copy_loads(function: &FunctionIR) -> HashSet<Identifier> {
    let loads: HashMap<Identifier, Identifier> = function
        .instructions()
        .filter_map(|instruction| match &instruction.kind {
            InstructionKind::LoadLocal { place } => {
                Some((instruction.place.identifier, place.identifier))
            }
            _ => None,
        })
        .collect();

    function
        .instructions()
        .filter_map(|instruction| match &instruction.kind {
            InstructionKind::Copy { lval, value } | InstructionKind::StoreLocal { lval, value, .. } => {
                let loaded = loads.get(&value.identifier)?;
                (loaded.declaration == lval.declaration()).then_some(value.identifier)
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use crate::{
        frontend::{SourceFile, parser::Parser},
        middle::{
            hir::{Environment, ModuleIR, builder::build_module},
            ssa::{build_ssa, eliminate_ssa},
        },
    };

    /// Parses, builds and takes a module through SSA, ready for the passes
    pub fn lower(source: &str) -> (Environment, ModuleIR) {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        let mut env = Environment::new();
        let mut ir = build_module(&mut env, PathBuf::from("test.js"), &module).unwrap();

        for function in ir.functions.values_mut() {
            build_ssa(function, &mut env).unwrap();
            eliminate_ssa(function, &mut env).unwrap();
        }

        (env, ir)
    }
}
