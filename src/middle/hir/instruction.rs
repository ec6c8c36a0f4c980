use std::{collections::BTreeMap, rc::Rc};

use super::{FunctionId, Identifier, Instruction, Place};
use crate::frontend::{
    ast::{self, BinaryOperator, LogicalOperator, UnaryOperator, VariableKind},
    intern::InternedSymbol,
};

/// How a local store introduces its binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Let,
    Const,
    Var,
    /// Plain assignment to an existing binding
    Reassign,
}

impl StoreKind {
    pub fn is_declaration(self) -> bool {
        self != StoreKind::Reassign
    }

    pub fn keyword(self) -> Option<&'static str> {
        match self {
            StoreKind::Let => Some("let"),
            StoreKind::Const => Some("const"),
            StoreKind::Var => Some("var"),
            StoreKind::Reassign => None,
        }
    }
}

impl From<VariableKind> for StoreKind {
    fn from(value: VariableKind) -> Self {
        match value {
            VariableKind::Var => StoreKind::Var,
            VariableKind::Let => StoreKind::Let,
            VariableKind::Const => StoreKind::Const,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Identifier(InternedSymbol),
    String(String),
    Number(f64),
    Computed(Place),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProperty {
    KeyValue {
        key: ObjectKey,
        value: Place,
        shorthand: bool,
    },
    Method {
        key: ObjectKey,
        function: FunctionId,
    },
    Spread(Place),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatternProperty {
    KeyValue { key: ObjectKey, value: Place },
    Rest(Place),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    Default,
    Named(InternedSymbol),
    Namespace,
}

/// Syntax the builder doesn't lower, carried verbatim into the output
#[derive(Debug, Clone, PartialEq)]
pub enum UnsupportedNode {
    Statement(Rc<ast::Statement>),
    Expression(Rc<ast::Expression>),
}

impl UnsupportedNode {
    pub fn name(&self) -> &'static str {
        match self {
            UnsupportedNode::Statement(statement) => statement.kind.name(),
            UnsupportedNode::Expression(expression) => expression.kind.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCategory {
    Memory,
    Value,
    Pattern,
    Declaration,
    Module,
    Statement,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /* Memory */
    LoadLocal {
        place: Place,
    },
    StoreLocal {
        lval: Place,
        value: Place,
        kind: StoreKind,
    },
    LoadGlobal {
        name: InternedSymbol,
    },
    StoreGlobal {
        name: InternedSymbol,
        value: Place,
    },
    PropertyLoad {
        object: Place,
        property: InternedSymbol,
    },
    PropertyStore {
        object: Place,
        property: InternedSymbol,
        value: Place,
    },
    ComputedLoad {
        object: Place,
        property: Place,
    },
    ComputedStore {
        object: Place,
        property: Place,
        value: Place,
    },
    /// Copy inserted on a predecessor edge when a phi is eliminated
    Copy {
        lval: Place,
        value: Place,
    },

    /* Values */
    Literal {
        value: LiteralValue,
    },
    Binary {
        operator: BinaryOperator,
        left: Place,
        right: Place,
    },
    Unary {
        operator: UnaryOperator,
        argument: Place,
    },
    /// Only built when evaluating `right` eagerly has no observable effect
    Logical {
        operator: LogicalOperator,
        left: Place,
        right: Place,
    },
    /// Only built when evaluating both arms eagerly has no observable effect
    Conditional {
        test: Place,
        consequent: Place,
        alternate: Place,
    },
    Call {
        callee: Place,
        arguments: Vec<Place>,
    },
    New {
        callee: Place,
        arguments: Vec<Place>,
    },
    Array {
        elements: Vec<Place>,
    },
    Object {
        properties: Vec<ObjectProperty>,
    },
    FunctionExpression {
        function: FunctionId,
    },

    /* Patterns */
    BindingIdentifier {
        name: InternedSymbol,
    },
    ArrayPattern {
        elements: Vec<Option<Place>>,
    },
    ObjectPattern {
        properties: Vec<ObjectPatternProperty>,
    },
    AssignmentPattern {
        target: Place,
        default: Place,
    },
    Spread {
        argument: Place,
    },
    Rest {
        argument: Place,
    },
    /// Binds every identifier in `pattern` from `value`
    Destructure {
        pattern: Place,
        value: Place,
        kind: StoreKind,
    },

    /* Declarations */
    FunctionDeclaration {
        function: FunctionId,
    },

    /* Modules */
    ImportDeclaration {
        source: String,
        specifiers: Vec<Place>,
    },
    ImportSpecifier {
        kind: ImportKind,
        local: InternedSymbol,
    },
    ExportSpecifier {
        local: Place,
        exported: InternedSymbol,
    },
    ExportNamedDeclaration {
        specifiers: Vec<Place>,
    },
    ExportDefaultDeclaration {
        value: Place,
    },

    /// Marks a value which is evaluated for its effects only
    ExpressionStatement {
        expression: Place,
    },

    Unsupported {
        node: UnsupportedNode,
        /// Outer variables referenced by name inside the node
        bindings: Vec<(InternedSymbol, Place)>,
    },
}

impl InstructionKind {
    pub fn category(&self) -> InstructionCategory {
        use InstructionKind::*;

        match self {
            LoadLocal { .. }
            | StoreLocal { .. }
            | LoadGlobal { .. }
            | StoreGlobal { .. }
            | PropertyLoad { .. }
            | PropertyStore { .. }
            | ComputedLoad { .. }
            | ComputedStore { .. }
            | Copy { .. } => InstructionCategory::Memory,
            Literal { .. }
            | Binary { .. }
            | Unary { .. }
            | Logical { .. }
            | Conditional { .. }
            | Call { .. }
            | New { .. }
            | Array { .. }
            | Object { .. }
            | FunctionExpression { .. } => InstructionCategory::Value,
            BindingIdentifier { .. }
            | ArrayPattern { .. }
            | ObjectPattern { .. }
            | AssignmentPattern { .. }
            | Spread { .. }
            | Rest { .. }
            | Destructure { .. } => InstructionCategory::Pattern,
            FunctionDeclaration { .. } => InstructionCategory::Declaration,
            ImportDeclaration { .. }
            | ImportSpecifier { .. }
            | ExportSpecifier { .. }
            | ExportNamedDeclaration { .. }
            | ExportDefaultDeclaration { .. } => InstructionCategory::Module,
            ExpressionStatement { .. } => InstructionCategory::Statement,
            Unsupported { .. } => InstructionCategory::Unsupported,
        }
    }

    /// Whether the instruction can be dropped when nothing reads its result
    pub fn is_pure(&self) -> bool {
        use InstructionKind::*;

        match self {
            LoadLocal { .. }
            | StoreLocal { .. }
            | Copy { .. }
            | Literal { .. }
            | Logical { .. }
            | Conditional { .. }
            | Array { .. }
            | Object { .. }
            | FunctionExpression { .. }
            | BindingIdentifier { .. }
            | ArrayPattern { .. }
            | ObjectPattern { .. }
            | AssignmentPattern { .. }
            | Spread { .. }
            | Rest { .. } => true,
            Binary { operator, .. } => {
                !matches!(operator, BinaryOperator::In | BinaryOperator::Instanceof)
            }
            Unary { operator, .. } => *operator != UnaryOperator::Delete,
            LoadGlobal { .. }
            | StoreGlobal { .. }
            | PropertyLoad { .. }
            | PropertyStore { .. }
            | ComputedLoad { .. }
            | ComputedStore { .. }
            | Call { .. }
            | New { .. }
            | Destructure { .. }
            | FunctionDeclaration { .. }
            | ImportDeclaration { .. }
            | ImportSpecifier { .. }
            | ExportSpecifier { .. }
            | ExportNamedDeclaration { .. }
            | ExportDefaultDeclaration { .. }
            | ExpressionStatement { .. }
            | Unsupported { .. } => false,
        }
    }

    /// Whether executing the instruction can write to (or observe writes to)
    /// memory other than the instruction's own place
    pub fn has_memory_effects(&self) -> bool {
        use InstructionKind::*;

        matches!(
            self,
            StoreGlobal { .. }
                | PropertyStore { .. }
                | ComputedStore { .. }
                | Call { .. }
                | New { .. }
                | Destructure { .. }
                | Unsupported { .. }
        )
    }

    /// Applies `f` to every place the instruction reads
    pub fn for_each_read_mut(&mut self, mut f: impl FnMut(&mut Place)) {
        use InstructionKind::*;

        fn key(key: &mut ObjectKey, f: &mut impl FnMut(&mut Place)) {
            if let ObjectKey::Computed(place) = key {
                f(place);
            }
        }

        match self {
            LoadLocal { place } => f(place),
            StoreLocal { value, .. } | Copy { value, .. } | StoreGlobal { value, .. } => f(value),
            PropertyLoad { object, .. } => f(object),
            PropertyStore { object, value, .. } => {
                f(object);
                f(value);
            }
            ComputedLoad { object, property } => {
                f(object);
                f(property);
            }
            ComputedStore {
                object,
                property,
                value,
            } => {
                f(object);
                f(property);
                f(value);
            }
            Binary { left, right, .. } | Logical { left, right, .. } => {
                f(left);
                f(right);
            }
            Unary { argument, .. } | Spread { argument } | Rest { argument } => f(argument),
            Conditional {
                test,
                consequent,
                alternate,
            } => {
                f(test);
                f(consequent);
                f(alternate);
            }
            Call { callee, arguments } | New { callee, arguments } => {
                f(callee);
                arguments.iter_mut().for_each(&mut f);
            }
            Array { elements } => elements.iter_mut().for_each(&mut f),
            Object { properties } => {
                for property in properties {
                    match property {
                        ObjectProperty::KeyValue { key: k, value, .. } => {
                            key(k, &mut f);
                            f(value);
                        }
                        ObjectProperty::Method { key: k, .. } => key(k, &mut f),
                        ObjectProperty::Spread(place) => f(place),
                    }
                }
            }
            ArrayPattern { elements } => elements.iter_mut().flatten().for_each(&mut f),
            ObjectPattern { properties } => {
                for property in properties {
                    match property {
                        ObjectPatternProperty::KeyValue { key: k, value } => {
                            key(k, &mut f);
                            f(value);
                        }
                        ObjectPatternProperty::Rest(place) => f(place),
                    }
                }
            }
            AssignmentPattern { target, default } => {
                f(target);
                f(default);
            }
            Destructure { pattern, value, .. } => {
                f(pattern);
                f(value);
            }
            ImportDeclaration { specifiers, .. } | ExportNamedDeclaration { specifiers } => {
                specifiers.iter_mut().for_each(&mut f)
            }
            ExportSpecifier { local, .. } => f(local),
            ExportDefaultDeclaration { value } => f(value),
            ExpressionStatement { expression } => f(expression),
            Unsupported { bindings, .. } => bindings.iter_mut().for_each(|(_, p)| f(p)),
            LoadGlobal { .. }
            | Literal { .. }
            | FunctionExpression { .. }
            | BindingIdentifier { .. }
            | FunctionDeclaration { .. }
            | ImportSpecifier { .. } => {}
        }
    }

    pub fn reads(&self) -> Vec<Place> {
        let mut places = Vec::new();
        // Reads are collected through the mutable visitor on a scratch copy
        // of the operand list, so both stay in sync
        let mut scratch = self.clone();
        scratch.for_each_read_mut(|place| places.push(*place));
        places
    }

    pub fn rewrite(&self, substitution: &BTreeMap<Identifier, Place>) -> InstructionKind {
        let mut kind = self.clone();
        kind.for_each_read_mut(|place| {
            if let Some(replacement) = substitution.get(&place.identifier) {
                *place = *replacement;
            }
        });
        kind
    }

    /// Nested function referenced by the instruction, if any
    pub fn functions(&self) -> Vec<FunctionId> {
        match self {
            InstructionKind::FunctionExpression { function }
            | InstructionKind::FunctionDeclaration { function } => vec![*function],
            InstructionKind::Object { properties } => properties
                .iter()
                .filter_map(|p| match p {
                    ObjectProperty::Method { function, .. } => Some(*function),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Instruction {
    pub fn reads(&self) -> Vec<Place> {
        self.kind.reads()
    }

    pub fn rewrite(&self, substitution: &BTreeMap<Identifier, Place>) -> Instruction {
        Instruction {
            kind: self.kind.rewrite(substitution),
            ..self.clone()
        }
    }

    pub fn is_pure(&self) -> bool {
        self.kind.is_pure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::{DeclarationId, IdentifierId, PlaceId, Version};

    fn place(id: u32) -> Place {
        Place {
            id: PlaceId(id),
            identifier: Identifier {
                id: IdentifierId(id),
                version: Version::Numbered(0),
                declaration: DeclarationId(id),
            },
        }
    }

    #[test]
    fn reads_skip_store_targets() {
        let store = InstructionKind::StoreLocal {
            lval: place(1),
            value: place(2),
            kind: StoreKind::Let,
        };

        assert_eq!(store.reads(), vec![place(2)]);
        assert!(store.is_pure());
    }

    #[test]
    fn rewrite_substitutes_by_identifier() {
        let call = InstructionKind::Call {
            callee: place(1),
            arguments: vec![place(2), place(3), place(2)],
        };

        let substitution = BTreeMap::from([(place(2).identifier, place(9))]);
        let rewritten = call.rewrite(&substitution);

        assert_eq!(
            rewritten.reads(),
            vec![place(1), place(9), place(3), place(9)]
        );
        assert!(!rewritten.is_pure());
        // The original is untouched
        assert_eq!(call.reads()[1], place(2));
    }

    #[test]
    fn categories() {
        assert_eq!(
            InstructionKind::Copy {
                lval: place(1),
                value: place(2)
            }
            .category(),
            InstructionCategory::Memory
        );
        assert_eq!(
            InstructionKind::FunctionDeclaration {
                function: FunctionId(1)
            }
            .category(),
            InstructionCategory::Declaration
        );
        assert!(
            !InstructionKind::LoadGlobal {
                name: InternedSymbol::new("console")
            }
            .is_pure()
        );
    }
}
