//! Lowers the syntax tree of one module into HIR.
//!
//! Every function (the module's top level included) becomes a `FunctionIR`
//! whose blocks are filled statement by statement. Variables are resolved
//! through a lexical `ScopeStack` populated by a bindings pre-pass, and every
//! write creates a new version of the written declaration. The versions are
//! recorded in the environment's `decl_to_places` table which later drives phi
//! placement.

use std::{collections::BTreeMap, path::PathBuf, rc::Rc};

use hashbrown::HashSet;
use tracing::{debug, trace};

use self::{
    bindings::{LexicalBinding, lexical_bindings, var_names},
    scope::{ScopeKind, ScopeStack},
};
use super::{
    BasicBlock, BlockId, DeclarationId, DeclarationKind, Environment, FunctionId, FunctionIR,
    FunctionKind, ImportBinding, Instruction, InstructionId, InstructionKind, ModuleIR, Place,
    Terminal,
};
use crate::{
    error::{CompileError, Result, invariant},
    frontend::{
        ast::{self, NodeId, Statement, StatementKind},
        intern::InternedSymbol,
    },
};

mod bindings;
mod expressions;
pub mod scope;
mod statements;

type Versions = BTreeMap<DeclarationId, Place>;

struct LoopFrame {
    exit: BlockId,
    /// Variable versions at every `break` out of the loop
    breaks: Vec<Versions>,
}

/// State of one function while its body is being lowered
struct FunctionFrame {
    function: FunctionIR,
    /// The block instructions are currently appended to
    block: BasicBlock,
    /// Cleared after `return` or `break` until control flow joins again
    reachable: bool,
    /// Parameter bindings are lowered into the function header
    in_header: bool,
    /// Current version of every declaration visible in the function
    versions: Versions,
    /// Declarations whose pre-pass version hasn't been claimed by their
    /// declaring statement yet
    unclaimed: HashSet<DeclarationId>,
    /// Lexical declarations of this function read before their declaration
    /// statement raise an error
    uninitialized: HashSet<DeclarationId>,
    loops: Vec<LoopFrame>,
}

pub struct HirBuilder<'env> {
    env: &'env mut Environment,
    scopes: ScopeStack,
    frames: Vec<FunctionFrame>,
    functions: BTreeMap<FunctionId, FunctionIR>,
    globals: BTreeMap<InternedSymbol, ImportBinding>,
    exports: BTreeMap<InternedSymbol, InstructionId>,
}

/// Lowers a parsed module into HIR. The module's top level statements become
/// the entry function.
pub fn build_module(
    env: &mut Environment,
    path: PathBuf,
    module: &ast::Module,
) -> Result<ModuleIR> {
    let mut builder = HirBuilder {
        env,
        scopes: ScopeStack::new(),
        frames: Vec::new(),
        functions: BTreeMap::new(),
        globals: BTreeMap::new(),
        exports: BTreeMap::new(),
    };

    builder.register_imports(&module.body);

    let entry = builder.env.new_function_id();
    builder.begin_function(entry, None, None, FunctionKind::Module, None);
    builder.scopes.push(ScopeKind::Function);
    builder.declare_scope_bindings(&module.body, true)?;
    builder.lower_statements(&module.body)?;
    builder.scopes.pop();
    builder.end_function()?;

    debug!(
        path = %path.display(),
        functions = builder.functions.len(),
        exports = builder.exports.len(),
        "built module HIR"
    );

    Ok(ModuleIR {
        path,
        entry,
        functions: builder.functions,
        globals: builder.globals,
        exports: builder.exports,
    })
}

fn origin(id: NodeId) -> Option<NodeId> {
    (id != NodeId::SYNTHETIC).then_some(id)
}

/// Versions after control flow joins: every declaration changed on a
/// reachable incoming path takes the version from that path. Where several
/// paths changed it, the last one wins; phi elimination later redirects those
/// reads to the phi.
fn merge_versions(base: &Versions, paths: &[(Versions, bool)]) -> Versions {
    let mut merged = base.clone();

    for (versions, _) in paths.iter().filter(|(_, reachable)| *reachable) {
        for (declaration, place) in versions {
            if base.get(declaration) != Some(place) {
                merged.insert(*declaration, *place);
            }
        }
    }

    merged
}

impl HirBuilder<'_> {
    fn frame(&self) -> &FunctionFrame {
        self.frames.last().expect("no function is being built")
    }

    fn frame_mut(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().expect("no function is being built")
    }

    fn function_id(&self) -> FunctionId {
        self.frame().function.id
    }

    fn current_block(&self) -> BlockId {
        self.frame().block.id
    }

    fn register_imports(&mut self, statements: &[Statement]) {
        for statement in statements {
            let StatementKind::Import(import) = &statement.kind else {
                continue;
            };

            for specifier in &import.specifiers {
                self.globals.insert(
                    specifier.local.symbol,
                    ImportBinding {
                        source: import.source.clone(),
                        imported: specifier.kind.imported_name(),
                        resolved: None,
                    },
                );
            }
        }
    }

    fn begin_function(
        &mut self,
        id: FunctionId,
        name: Option<InternedSymbol>,
        parent: Option<FunctionId>,
        kind: FunctionKind,
        origin: Option<NodeId>,
    ) {
        let entry = self.env.new_block_id();
        let mut function = FunctionIR::new(id, name, parent, kind, entry);
        function.origin = origin;

        self.frames.push(FunctionFrame {
            function,
            block: BasicBlock::new(entry),
            reachable: true,
            in_header: false,
            versions: Versions::new(),
            unclaimed: HashSet::new(),
            uninitialized: HashSet::new(),
            loops: Vec::new(),
        });
    }

    fn end_function(&mut self) -> Result<FunctionId> {
        let Some(mut frame) = self.frames.pop() else {
            return Err(invariant!("ended a function which was never started"));
        };

        if frame.block.terminal.is_none() {
            frame.block.terminal = Some(Terminal::Return { value: None });
        }
        frame.function.blocks.insert(frame.block.id, frame.block);
        frame.function.recompute_cfg();

        let id = frame.function.id;
        trace!(
            function = %id,
            blocks = frame.function.blocks.len(),
            "finished function"
        );
        self.functions.insert(id, frame.function);

        Ok(id)
    }

    /// Completes the current block with `terminal` and continues in a new,
    /// empty block `next`
    fn finish_block(&mut self, terminal: Terminal, next: BlockId) {
        let frame = self.frame_mut();
        let mut block = std::mem::replace(&mut frame.block, BasicBlock::new(next));
        block.terminal = Some(terminal);
        frame.function.blocks.insert(block.id, block);
    }

    /// Completes the current block with a terminal control never falls out
    /// of. Anything lowered afterwards lands in an unreachable block.
    fn finish_unreachable(&mut self, terminal: Terminal) {
        let next = self.env.new_block_id();
        self.finish_block(terminal, next);
        self.frame_mut().reachable = false;
    }

    fn push_instruction(
        &mut self,
        place: Place,
        kind: InstructionKind,
        origin_id: NodeId,
    ) -> InstructionId {
        let id = self.env.new_instruction_id();
        self.env.place_to_instruction.insert(place.id, id);

        let instruction = Instruction {
            id,
            place,
            origin: origin(origin_id),
            kind,
        };

        let frame = self.frame_mut();
        if frame.in_header {
            frame.function.header.push(instruction);
        } else {
            frame.block.instructions.push(instruction);
        }

        id
    }

    /// Appends an instruction whose result is a fresh temporary
    fn emit(&mut self, kind: InstructionKind, origin_id: NodeId) -> Place {
        let owner = self.function_id();
        let place = self.env.new_temporary(owner);
        self.push_instruction(place, kind, origin_id);
        place
    }

    /// Creates the next version of a declaration, defined in the current block
    fn new_version(&mut self, declaration: DeclarationId) -> Place {
        let place = self.env.new_place(declaration);
        let block = self.current_block();
        self.env.record_place(declaration, block, place);

        if self.env.declaration(declaration).owner == self.function_id() {
            self.frame_mut().versions.insert(declaration, place);
        } else {
            self.env.captured.insert(declaration);
        }

        place
    }

    /// Registers the version a declaration starts with when its scope is
    /// entered
    fn declare(
        &mut self,
        name: ast::Identifier,
        kind: DeclarationKind,
        hoisted: bool,
    ) -> DeclarationId {
        let owner = self.function_id();
        let declaration = self.env.declare(Some(name.symbol), kind, owner);

        if hoisted {
            self.scopes.set_function_data(name.symbol, declaration);
        } else {
            self.scopes.set_data(name.symbol, declaration);
        }

        self.new_version(declaration);
        self.frame_mut().unclaimed.insert(declaration);

        declaration
    }

    /// The place a declaring occurrence binds. The version registered by the
    /// pre-pass is reused when nothing claimed it yet and it lives in the
    /// current block; otherwise the binding is a new version.
    fn binding_place(&mut self, declaration: DeclarationId) -> Place {
        let block = self.current_block();
        let frame = self.frame_mut();
        frame.uninitialized.remove(&declaration);

        if frame.unclaimed.remove(&declaration) {
            if let Some([only]) = self
                .env
                .decl_to_places
                .get(&declaration)
                .map(Vec::as_slice)
            {
                if only.block == block {
                    return only.place;
                }
            }
        }

        self.new_version(declaration)
    }

    /// Current version of a declaration as seen from the function being built
    fn read_version(&mut self, name: InternedSymbol, declaration: DeclarationId) -> Result<Place> {
        let owner = self.env.declaration(declaration).owner;

        if owner == self.function_id() {
            if self.frame().uninitialized.contains(&declaration) {
                return Err(CompileError::UseBeforeDeclaration {
                    name: name.value().to_string(),
                });
            }

            return self
                .frame()
                .versions
                .get(&declaration)
                .copied()
                .ok_or_else(|| invariant!("declaration `{name}` has no version in its own function"));
        }

        // Reading a variable of an enclosing function
        self.env.captured.insert(declaration);

        self.frames
            .iter()
            .rev()
            .find(|frame| frame.function.id == owner)
            .and_then(|frame| frame.versions.get(&declaration).copied())
            .or_else(|| self.env.latest_place(declaration))
            .ok_or_else(|| invariant!("captured declaration `{name}` has no version"))
    }

    /// Bindings pre-pass for a scope which was just pushed
    fn declare_scope_bindings(&mut self, statements: &[Statement], function_scope: bool) -> Result<()> {
        if function_scope {
            for name in var_names(statements) {
                // Parameters already bind the name
                if self.scopes.get_shallow_data(name.symbol).is_some() {
                    continue;
                }

                self.declare(name, DeclarationKind::Var, true);
            }
        }

        let mut functions = Vec::new();

        for binding in lexical_bindings(statements) {
            match binding {
                LexicalBinding::Variable { name, kind } => {
                    let declaration = self.declare(name, kind, false);
                    self.frame_mut().uninitialized.insert(declaration);
                }
                LexicalBinding::Function { name, function } => {
                    let owner = self.function_id();
                    let declaration =
                        self.env
                            .declare(Some(name.symbol), DeclarationKind::Function, owner);
                    self.scopes.set_data(name.symbol, declaration);
                    let place = self.new_version(declaration);
                    functions.push((declaration, place, function));
                }
            }
        }

        // Function declarations are hoisted to the start of their scope. They
        // are built only after every name of the scope is bound so they can
        // refer to each other.
        for (declaration, place, function) in functions {
            let id = self.build_function(&function, FunctionKind::Declaration)?;
            self.env.function_declarations.insert(declaration, id);
            self.push_instruction(place, InstructionKind::FunctionDeclaration { function: id }, function.id);
        }

        Ok(())
    }

    /// Builds a nested function and returns its id
    fn build_function(&mut self, function: &Rc<ast::Function>, kind: FunctionKind) -> Result<FunctionId> {
        let id = self.env.new_function_id();
        let parent = self.function_id();
        let name = function.name.map(|name| name.symbol);

        self.begin_function(id, name, Some(parent), kind, origin(function.id));
        self.scopes.push(ScopeKind::Function);

        // A named function expression can refer to itself by name
        if kind == FunctionKind::Expression {
            if let Some(name) = function.name {
                let declaration = self
                    .env
                    .declare(Some(name.symbol), DeclarationKind::Const, id);
                self.scopes.set_data(name.symbol, declaration);
                self.new_version(declaration);
            }
        }

        self.frame_mut().in_header = true;
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            params.push(self.lower_parameter(param)?);
        }
        self.frame_mut().in_header = false;
        self.frame_mut().function.params = params;

        match &function.body {
            ast::FunctionBody::Block(statements) => {
                self.declare_scope_bindings(statements, true)?;
                self.lower_statements(statements)?;
            }
            ast::FunctionBody::Expression(expression) => {
                let value = self.lower_expression(expression)?;
                self.frame_mut().function.concise_body = true;
                self.finish_unreachable(Terminal::Return { value: Some(value) });
            }
        }

        self.scopes.pop();
        self.end_function()
    }
}

#[cfg(test)]
mod tests;
