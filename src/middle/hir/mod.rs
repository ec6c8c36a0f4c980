//! HIR (High-level Intermediate Representation). Functions are graphs of basic
//! blocks holding flat instruction lists; every instruction defines a place and
//! reads other places. Variables are tracked per declaration and renamed into
//! SSA versions while the graph is built.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use crate::{
    frontend::{ast::NodeId, intern::InternedSymbol},
    middle::cfg::ControlFlowGraph,
};

pub mod builder;
pub mod environment;
pub mod id;
pub mod instruction;
pub mod pretty_print;

pub use environment::{Declaration, DeclarationKind, Environment, PlaceVersion};
pub use id::*;
pub use instruction::*;

/// Distinguishes the SSA-renamed instances of a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Numbered(u32),
    Phi(PhiId),
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Numbered(n) => write!(f, "{n}"),
            Version::Phi(phi) => write!(f, "{phi}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    pub id: IdentifierId,
    pub version: Version,
    pub declaration: DeclarationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Place {
    pub id: PlaceId,
    pub identifier: Identifier,
}

impl Place {
    pub fn declaration(&self) -> DeclarationId {
        self.identifier.declaration
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: InstructionId,
    /// The place this instruction defines
    pub place: Place,
    /// Backlink to the syntax node the instruction was lowered from
    pub origin: Option<NodeId>,
    pub kind: InstructionKind,
}

impl Instruction {
    /// Every place the instruction writes: its own place plus the binding
    /// places of stores and copies
    pub fn defined_places(&self) -> Vec<Place> {
        let mut places = vec![self.place];

        match &self.kind {
            InstructionKind::StoreLocal { lval, .. } | InstructionKind::Copy { lval, .. } => {
                places.push(*lval)
            }
            _ => {}
        }

        places
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Jump {
        target: BlockId,
    },
    Branch {
        test: Place,
        consequent: BlockId,
        alternate: BlockId,
        /// Nearest common successor of both arms. Code generation emits it
        /// once after the conditional instead of once per arm.
        fallthrough: BlockId,
    },
    Return {
        value: Option<Place>,
    },
}

impl Terminal {
    pub fn reads(&self) -> Vec<Place> {
        match self {
            Terminal::Jump { .. } | Terminal::Return { value: None } => Vec::new(),
            Terminal::Branch { test, .. } => vec![*test],
            Terminal::Return { value: Some(value) } => vec![*value],
        }
    }

    pub fn rewrite(&self, substitution: &BTreeMap<Identifier, Place>) -> Terminal {
        let replace = |place: &Place| substitution.get(&place.identifier).copied().unwrap_or(*place);

        match self {
            Terminal::Jump { target } => Terminal::Jump { target: *target },
            Terminal::Branch {
                test,
                consequent,
                alternate,
                fallthrough,
            } => Terminal::Branch {
                test: replace(test),
                consequent: *consequent,
                alternate: *alternate,
                fallthrough: *fallthrough,
            },
            Terminal::Return { value } => Terminal::Return {
                value: value.as_ref().map(replace),
            },
        }
    }

    /// Control flow edges leaving the block. The fallthrough of a branch is
    /// not an edge of its own.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminal::Jump { target } => vec![*target],
            Terminal::Branch {
                consequent,
                alternate,
                ..
            } => vec![*consequent, *alternate],
            Terminal::Return { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    /// `None` only while the block is under construction
    pub terminal: Option<Terminal>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            terminal: None,
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminal
            .as_ref()
            .map(Terminal::successors)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Top level statements of a module
    Module,
    Declaration,
    Expression,
    Arrow,
    Method,
}

/// A phi node joining the versions of one declaration at a block entry. Phis
/// only exist between SSA construction and SSA elimination.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub id: PhiId,
    pub block: BlockId,
    pub place: Place,
    pub operands: BTreeMap<BlockId, Place>,
    pub declaration: DeclarationId,
}

#[derive(Debug, Clone)]
pub struct FunctionIR {
    pub id: FunctionId,
    pub name: Option<InternedSymbol>,
    pub parent: Option<FunctionId>,
    pub kind: FunctionKind,
    pub origin: Option<NodeId>,
    pub entry: BlockId,
    pub blocks: BTreeMap<BlockId, BasicBlock>,
    /// Instructions binding the parameters. They run before the entry block.
    pub header: Vec<Instruction>,
    /// One pattern place per parameter, in order
    pub params: Vec<Place>,
    /// Set for arrow functions whose body was a single expression
    pub concise_body: bool,
    pub phis: Vec<Phi>,
    pub cfg: ControlFlowGraph,
}

impl FunctionIR {
    pub fn new(
        id: FunctionId,
        name: Option<InternedSymbol>,
        parent: Option<FunctionId>,
        kind: FunctionKind,
        entry: BlockId,
    ) -> Self {
        Self {
            id,
            name,
            parent,
            kind,
            origin: None,
            entry,
            blocks: BTreeMap::new(),
            header: Vec::new(),
            params: Vec::new(),
            concise_body: false,
            phis: Vec::new(),
            cfg: ControlFlowGraph::default(),
        }
    }

    /// Recomputes predecessors, dominance and back edges. Must be called after
    /// any change to block-to-block edges.
    pub fn recompute_cfg(&mut self) {
        self.cfg = ControlFlowGraph::compute(self.entry, &self.blocks);
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.header
            .iter()
            .chain(self.blocks.values().flat_map(|b| b.instructions.iter()))
    }

    /// All places read anywhere in the function, terminals included
    pub fn reads(&self) -> impl Iterator<Item = Place> + '_ {
        self.instructions().flat_map(|i| i.kind.reads()).chain(
            self.blocks
                .values()
                .filter_map(|b| b.terminal.as_ref())
                .flat_map(Terminal::reads),
        )
    }
}

/// A binding introduced by an import declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub source: String,
    /// `None` for namespace imports
    pub imported: Option<InternedSymbol>,
    /// Canonical path of the imported module, once resolved
    pub resolved: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModuleIR {
    pub path: PathBuf,
    /// The function holding the module's top level statements
    pub entry: FunctionId,
    pub functions: BTreeMap<FunctionId, FunctionIR>,
    /// Import bindings keyed by their local name
    pub globals: BTreeMap<InternedSymbol, ImportBinding>,
    /// Export instructions keyed by exported name
    pub exports: BTreeMap<InternedSymbol, InstructionId>,
}

impl ModuleIR {
    pub fn entry_function(&self) -> Option<&FunctionIR> {
        self.functions.get(&self.entry)
    }

    /// Places read by any instruction or terminal of any function
    pub fn used_identifiers(&self) -> BTreeSet<Identifier> {
        self.functions
            .values()
            .flat_map(|f| f.reads())
            .map(|p| p.identifier)
            .collect()
    }

    /// Functions in a parent-before-child order
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.functions.keys().copied().collect()
    }
}
