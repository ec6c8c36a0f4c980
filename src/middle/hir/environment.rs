use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use super::{
    BlockId, DeclarationId, FunctionId, Identifier, IdentifierId, Instruction, InstructionId,
    InstructionKind, PhiId, Place, PlaceId, Version,
};
use crate::{frontend::intern::InternedSymbol, index::IndexVec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Var,
    Let,
    Const,
    Function,
    Class,
    Parameter,
    /// Compiler generated value without a source name
    Temporary,
}

impl DeclarationKind {
    /// Whether the binding may be reassigned after initialization
    pub fn is_mutable(self) -> bool {
        !matches!(self, DeclarationKind::Const | DeclarationKind::Temporary)
    }
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: Option<InternedSymbol>,
    pub kind: DeclarationKind,
    /// Function whose scope the declaration lives in
    pub owner: FunctionId,
    next_version: u32,
}

/// One SSA version of a declaration together with the block that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceVersion {
    pub block: BlockId,
    pub place: Place,
}

/// Id allocation and per-declaration bookkeeping shared by every function of
/// one module. Ids are never reused.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    next_block_id: u32,
    next_place_id: u32,
    next_identifier_id: u32,
    next_instruction_id: u32,
    next_phi_id: u32,
    next_function_id: u32,
    pub declarations: IndexVec<DeclarationId, Declaration>,
    /// Every version ever created for a declaration, in program order
    pub decl_to_places: BTreeMap<DeclarationId, Vec<PlaceVersion>>,
    pub place_to_instruction: HashMap<PlaceId, InstructionId>,
    /// Declarations referenced from a nested function or an unsupported node
    pub captured: HashSet<DeclarationId>,
    /// Declarations bound by a function declaration statement
    pub function_declarations: HashMap<DeclarationId, FunctionId>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    pub fn new_instruction_id(&mut self) -> InstructionId {
        let id = InstructionId(self.next_instruction_id);
        self.next_instruction_id += 1;
        id
    }

    pub fn new_function_id(&mut self) -> FunctionId {
        let id = FunctionId(self.next_function_id);
        self.next_function_id += 1;
        id
    }

    fn new_place_id(&mut self) -> PlaceId {
        let id = PlaceId(self.next_place_id);
        self.next_place_id += 1;
        id
    }

    fn new_identifier_id(&mut self) -> IdentifierId {
        let id = IdentifierId(self.next_identifier_id);
        self.next_identifier_id += 1;
        id
    }

    pub fn declare(
        &mut self,
        name: Option<InternedSymbol>,
        kind: DeclarationKind,
        owner: FunctionId,
    ) -> DeclarationId {
        self.declarations.push(Declaration {
            name,
            kind,
            owner,
            next_version: 0,
        })
    }

    pub fn declaration(&self, id: DeclarationId) -> &Declaration {
        &self.declarations[id]
    }

    /// Creates the next numbered version of a declaration. The caller decides
    /// whether the version is recorded in `decl_to_places`.
    pub fn new_place(&mut self, declaration: DeclarationId) -> Place {
        let version = {
            let declaration = &mut self.declarations[declaration];
            let version = declaration.next_version;
            declaration.next_version += 1;
            version
        };

        let identifier = Identifier {
            id: self.new_identifier_id(),
            version: Version::Numbered(version),
            declaration,
        };

        Place {
            id: self.new_place_id(),
            identifier,
        }
    }

    /// A fresh single-use value owned by `owner`
    pub fn new_temporary(&mut self, owner: FunctionId) -> Place {
        let declaration = self.declare(None, DeclarationKind::Temporary, owner);
        self.new_place(declaration)
    }

    /// A compiler generated instruction defining a fresh temporary
    pub fn new_instruction(&mut self, owner: FunctionId, kind: InstructionKind) -> Instruction {
        let place = self.new_temporary(owner);
        let id = self.new_instruction_id();
        self.place_to_instruction.insert(place.id, id);

        Instruction {
            id,
            place,
            origin: None,
            kind,
        }
    }

    /// Another read site of an existing identifier
    pub fn new_place_for(&mut self, identifier: Identifier) -> Place {
        Place {
            id: self.new_place_id(),
            identifier,
        }
    }

    pub fn new_phi(&mut self, declaration: DeclarationId) -> (PhiId, Place) {
        let phi = PhiId(self.next_phi_id);
        self.next_phi_id += 1;

        let identifier = Identifier {
            id: self.new_identifier_id(),
            version: Version::Phi(phi),
            declaration,
        };

        let place = Place {
            id: self.new_place_id(),
            identifier,
        };

        (phi, place)
    }

    pub fn record_place(&mut self, declaration: DeclarationId, block: BlockId, place: Place) {
        self.decl_to_places
            .entry(declaration)
            .or_default()
            .push(PlaceVersion { block, place });
    }

    /// Most recently recorded version of a declaration
    pub fn latest_place(&self, declaration: DeclarationId) -> Option<Place> {
        self.decl_to_places
            .get(&declaration)
            .and_then(|versions| versions.last())
            .map(|version| version.place)
    }

    /// Captured declarations that can change after capture can't have their
    /// value tracked through loads and stores
    pub fn is_captured_mutable(&self, declaration: DeclarationId) -> bool {
        self.captured.contains(&declaration) && self.declarations[declaration].kind.is_mutable()
    }

    pub fn is_temporary(&self, declaration: DeclarationId) -> bool {
        self.declarations[declaration].kind == DeclarationKind::Temporary
    }

    /// Moves version records of a block which was merged into another one
    pub fn rehome_block(&mut self, from: BlockId, to: BlockId) {
        for versions in self.decl_to_places.values_mut() {
            for version in versions.iter_mut().filter(|v| v.block == from) {
                version.block = to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_share_the_declaration() {
        let mut env = Environment::new();
        let owner = env.new_function_id();
        let x = env.declare(Some("x".into()), DeclarationKind::Let, owner);

        let first = env.new_place(x);
        let second = env.new_place(x);

        assert_eq!(first.declaration(), second.declaration());
        assert_eq!(first.identifier.version, Version::Numbered(0));
        assert_eq!(second.identifier.version, Version::Numbered(1));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn rehoming_moves_records() {
        let mut env = Environment::new();
        let owner = env.new_function_id();
        let b0 = env.new_block_id();
        let b1 = env.new_block_id();
        let x = env.declare(Some("x".into()), DeclarationKind::Var, owner);
        let place = env.new_place(x);
        env.record_place(x, b1, place);

        env.rehome_block(b1, b0);

        assert_eq!(env.decl_to_places[&x][0].block, b0);
        assert_eq!(env.latest_place(x), Some(place));
    }

    #[test]
    fn captured_constants_stay_trackable() {
        let mut env = Environment::new();
        let owner = env.new_function_id();
        let k = env.declare(Some("k".into()), DeclarationKind::Const, owner);
        let v = env.declare(Some("v".into()), DeclarationKind::Let, owner);
        env.captured.extend([k, v]);

        assert!(!env.is_captured_mutable(k));
        assert!(env.is_captured_mutable(v));
    }
}
