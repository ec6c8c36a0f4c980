//! Syntax tree for the supported JavaScript/TypeScript subset. The parser
//! produces it, the HIR builder consumes it and the code generator produces a
//! fresh one which the printer turns back into text.

use std::rc::Rc;

use strum::{AsRefStr, EnumString};

use super::intern::InternedSymbol;
use crate::frontend::lexer::Span;

pub mod visit;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub span: Span,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Nodes synthesized after parsing (code generation) don't point back
    /// into any source file
    pub const SYNTHETIC: Self = Self(u32::MAX);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub symbol: InternedSymbol,
}

impl Identifier {
    pub fn synthetic(name: &str) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            span: Span::default(),
            symbol: InternedSymbol::new(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(Rc<Function>),
    ClassDeclaration(Rc<Class>),
    Return(Option<Expression>),
    If {
        test: Expression,
        consequent: Box<Statement>,
        alternate: Option<Box<Statement>>,
    },
    While {
        test: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        test: Expression,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expression>,
        update: Option<Expression>,
        body: Box<Statement>,
    },
    /// `for (left in right)` or `for (left of right)`
    ForEach {
        left: ForInit,
        is_of: bool,
        right: Expression,
        body: Box<Statement>,
    },
    Block(Vec<Statement>),
    Break(Option<Identifier>),
    Continue(Option<Identifier>),
    Throw(Expression),
    Expression(Expression),
    Import(ImportDeclaration),
    Export(ExportDeclaration),
    /// Empty statement (just a semicolon)
    Empty,
}

impl StatementKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::VariableDeclaration(_) => "variable declaration",
            StatementKind::FunctionDeclaration(_) => "function declaration",
            StatementKind::ClassDeclaration(_) => "class declaration",
            StatementKind::Return(_) => "return statement",
            StatementKind::If { .. } => "if statement",
            StatementKind::While { .. } => "while statement",
            StatementKind::DoWhile { .. } => "do-while statement",
            StatementKind::For { .. } => "for statement",
            StatementKind::ForEach { is_of: false, .. } => "for-in statement",
            StatementKind::ForEach { is_of: true, .. } => "for-of statement",
            StatementKind::Block(_) => "block statement",
            StatementKind::Break(_) => "break statement",
            StatementKind::Continue(_) => "continue statement",
            StatementKind::Throw(_) => "throw statement",
            StatementKind::Expression(_) => "expression statement",
            StatementKind::Import(_) => "import declaration",
            StatementKind::Export(_) => "export declaration",
            StatementKind::Empty => "empty statement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum VariableKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub kind: VariableKind,
    pub declarators: Vec<VariableDeclarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    pub id: NodeId,
    pub span: Span,
    pub target: Pattern,
    pub init: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Declaration(VariableDeclaration),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: NodeId,
    pub span: Span,
    pub name: Option<Identifier>,
    pub params: Vec<Pattern>,
    pub body: FunctionBody,
    pub is_arrow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Statement>),
    /// Concise arrow function body
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub id: NodeId,
    pub span: Span,
    pub name: Option<Identifier>,
    pub super_class: Option<Expression>,
    pub methods: Vec<ClassMethod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMethod {
    pub is_static: bool,
    pub key: PropertyKey,
    pub function: Rc<Function>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDeclaration {
    pub specifiers: Vec<ImportSpecifier>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpecifier {
    pub kind: ImportSpecifierKind,
    pub local: Identifier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSpecifierKind {
    /// `import local from "..."`
    Default,
    /// `import { imported as local } from "..."`
    Named { imported: InternedSymbol },
    /// `import * as local from "..."`
    Namespace,
}

impl ImportSpecifierKind {
    /// The name looked up in the exporting module, if any
    pub fn imported_name(&self) -> Option<InternedSymbol> {
        match self {
            ImportSpecifierKind::Default => Some(InternedSymbol::new("default")),
            ImportSpecifierKind::Named { imported } => Some(*imported),
            ImportSpecifierKind::Namespace => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportDeclaration {
    /// `export { local as exported }` with an optional re-export source
    Named {
        specifiers: Vec<ExportSpecifier>,
        source: Option<String>,
    },
    /// `export const x = ...` or `export function f() {}`
    Declaration(Box<Statement>),
    /// `export default <expression>`
    Default(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpecifier {
    pub local: Identifier,
    pub exported: InternedSymbol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
}

impl Expression {
    pub fn synthetic(kind: ExpressionKind) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            span: Span::default(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Identifier(Identifier),
    Literal(Literal),
    Array(Vec<ArrayElement>),
    Object(Vec<Property>),
    Function(Rc<Function>),
    Unary {
        operator: UnaryOperator,
        argument: Box<Expression>,
    },
    Update {
        operator: UpdateOperator,
        prefix: bool,
        argument: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logical {
        operator: LogicalOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Assignment {
        operator: AssignmentOperator,
        target: Box<Pattern>,
        value: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<ArrayElement>,
    },
    New {
        callee: Box<Expression>,
        arguments: Vec<ArrayElement>,
    },
    Member {
        object: Box<Expression>,
        property: MemberProperty,
    },
    Sequence(Vec<Expression>),
    This,
}

impl ExpressionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExpressionKind::Identifier(_) => "identifier",
            ExpressionKind::Literal(_) => "literal",
            ExpressionKind::Array(_) => "array expression",
            ExpressionKind::Object(_) => "object expression",
            ExpressionKind::Function(_) => "function expression",
            ExpressionKind::Unary { .. } => "unary expression",
            ExpressionKind::Update { .. } => "update expression",
            ExpressionKind::Binary { .. } => "binary expression",
            ExpressionKind::Logical { .. } => "logical expression",
            ExpressionKind::Assignment { .. } => "assignment expression",
            ExpressionKind::Conditional { .. } => "conditional expression",
            ExpressionKind::Call { .. } => "call expression",
            ExpressionKind::New { .. } => "new expression",
            ExpressionKind::Member { .. } => "member expression",
            ExpressionKind::Sequence(_) => "sequence expression",
            ExpressionKind::This => "this expression",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// An element of an array literal or an argument list
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElement {
    Expression(Expression),
    Spread(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    KeyValue {
        key: PropertyKey,
        value: Expression,
        shorthand: bool,
    },
    Method {
        key: PropertyKey,
        function: Rc<Function>,
    },
    Spread(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Identifier(InternedSymbol),
    String(String),
    Number(f64),
    Computed(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    Static(InternedSymbol),
    Computed(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub id: NodeId,
    pub span: Span,
    pub kind: PatternKind,
}

impl Pattern {
    pub fn synthetic(kind: PatternKind) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            span: Span::default(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Identifier(Identifier),
    /// `[a, , b, ...rest]`, holes are `None`
    Array(Vec<Option<Pattern>>),
    Object(Vec<ObjectPatternProperty>),
    /// `target = default`
    Assignment {
        target: Box<Pattern>,
        default: Box<Expression>,
    },
    Rest(Box<Pattern>),
    /// Member expressions are only valid as assignment targets
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatternProperty {
    KeyValue { key: PropertyKey, value: Pattern },
    Rest(Pattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
pub enum UnaryOperator {
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    BitwiseNot,
    #[strum(serialize = "typeof")]
    Typeof,
    #[strum(serialize = "void")]
    Void,
    #[strum(serialize = "delete")]
    Delete,
}

impl UnaryOperator {
    pub fn is_keyword(self) -> bool {
        matches!(self, Self::Typeof | Self::Void | Self::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
pub enum UpdateOperator {
    #[strum(serialize = "++")]
    Increment,
    #[strum(serialize = "--")]
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Remainder,
    #[strum(serialize = "**")]
    Exponent,
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[strum(serialize = ">>")]
    ShiftRight,
    #[strum(serialize = ">>>")]
    UnsignedShiftRight,
    #[strum(serialize = "&")]
    BitwiseAnd,
    #[strum(serialize = "|")]
    BitwiseOr,
    #[strum(serialize = "^")]
    BitwiseXor,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "===")]
    StrictEqual,
    #[strum(serialize = "!==")]
    StrictNotEqual,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqual,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqual,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "instanceof")]
    Instanceof,
}

impl BinaryOperator {
    /// Binding power used by both the parser and the printer. Higher binds
    /// tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::BitwiseOr => 6,
            Self::BitwiseXor => 7,
            Self::BitwiseAnd => 8,
            Self::Equal | Self::NotEqual | Self::StrictEqual | Self::StrictNotEqual => 9,
            Self::LessThan
            | Self::LessThanOrEqual
            | Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::In
            | Self::Instanceof => 10,
            Self::ShiftLeft | Self::ShiftRight | Self::UnsignedShiftRight => 11,
            Self::Add | Self::Subtract => 12,
            Self::Multiply | Self::Divide | Self::Remainder => 13,
            Self::Exponent => 14,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == Self::Exponent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
pub enum LogicalOperator {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "??")]
    NullishCoalescing,
}

impl LogicalOperator {
    pub fn precedence(self) -> u8 {
        match self {
            Self::NullishCoalescing => 3,
            Self::Or => 4,
            Self::And => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
pub enum AssignmentOperator {
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "+=")]
    AddAssign,
    #[strum(serialize = "-=")]
    SubtractAssign,
    #[strum(serialize = "*=")]
    MultiplyAssign,
    #[strum(serialize = "/=")]
    DivideAssign,
    #[strum(serialize = "%=")]
    RemainderAssign,
    #[strum(serialize = "**=")]
    ExponentAssign,
    #[strum(serialize = "<<=")]
    ShiftLeftAssign,
    #[strum(serialize = ">>=")]
    ShiftRightAssign,
    #[strum(serialize = ">>>=")]
    UnsignedShiftRightAssign,
    #[strum(serialize = "&=")]
    BitwiseAndAssign,
    #[strum(serialize = "|=")]
    BitwiseOrAssign,
    #[strum(serialize = "^=")]
    BitwiseXorAssign,
    #[strum(serialize = "&&=")]
    AndAssign,
    #[strum(serialize = "||=")]
    OrAssign,
    #[strum(serialize = "??=")]
    NullishAssign,
}

impl AssignmentOperator {
    /// The binary operator a compound assignment desugars to
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        Some(match self {
            Self::AddAssign => BinaryOperator::Add,
            Self::SubtractAssign => BinaryOperator::Subtract,
            Self::MultiplyAssign => BinaryOperator::Multiply,
            Self::DivideAssign => BinaryOperator::Divide,
            Self::RemainderAssign => BinaryOperator::Remainder,
            Self::ExponentAssign => BinaryOperator::Exponent,
            Self::ShiftLeftAssign => BinaryOperator::ShiftLeft,
            Self::ShiftRightAssign => BinaryOperator::ShiftRight,
            Self::UnsignedShiftRightAssign => BinaryOperator::UnsignedShiftRight,
            Self::BitwiseAndAssign => BinaryOperator::BitwiseAnd,
            Self::BitwiseOrAssign => BinaryOperator::BitwiseOr,
            Self::BitwiseXorAssign => BinaryOperator::BitwiseXor,
            _ => return None,
        })
    }

    /// Short-circuiting assignments (`&&=`, `||=`, `??=`)
    pub fn is_logical(self) -> bool {
        matches!(self, Self::AndAssign | Self::OrAssign | Self::NullishAssign)
    }
}
