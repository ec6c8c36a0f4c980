//! Rebuilds a syntax tree from the optimized block graph.
//!
//! Values are not given a statement of their own: a value read once is kept
//! as a pending expression and spliced into its reader, so `t0 = x; t1 = 1;
//! t2 = t0 + t1` prints as `x + 1`. Pending values are ordered against
//! statements through the declarations they read. A statement which writes a
//! declaration (or may write anything, like a call) first materializes every
//! pending value depending on it into a `const` temporary.
//!
//! Control flow is recovered from block shapes. A block with a back edge is
//! a loop header and prints as `while`; a branch prints as `if`/`else`
//! followed by its fallthrough block.

use std::{collections::BTreeSet, rc::Rc};

use hashbrown::{HashMap, HashSet};
use tracing::trace;

use super::naming::Names;
use crate::{
    error::{CompileError, Result, invariant},
    frontend::{
        ast::{
            self, ArrayElement, AssignmentOperator, ExpressionKind, FunctionBody, NodeId,
            PatternKind, StatementKind, VariableKind,
            visit::{self, MutVisitor},
        },
        intern::InternedSymbol,
        lexer::Span,
    },
    middle::{
        hir::{
            BasicBlock, BlockId, DeclarationId, DeclarationKind, Environment, FunctionIR,
            FunctionId, FunctionKind, Identifier, ImportKind, Instruction, InstructionKind,
            LiteralValue, ModuleIR, ObjectKey, ObjectPatternProperty, ObjectProperty, Place,
            StoreKind, Terminal, UnsupportedNode,
        },
        optimization::read_counts,
    },
};

/// State shared by every function of the module being generated
pub(super) struct ModuleCodegen<'hir> {
    module: &'hir ModuleIR,
    env: &'hir Environment,
    names: Names,
    reads: HashMap<Identifier, usize>,
}

impl<'hir> ModuleCodegen<'hir> {
    pub fn new(module: &'hir ModuleIR, env: &'hir Environment) -> Self {
        Self {
            module,
            env,
            names: Names::assign(module, env),
            reads: read_counts(module),
        }
    }

    pub fn generate(&mut self) -> Result<ast::Module> {
        let module = self.module;
        let entry = module
            .entry_function()
            .ok_or_else(|| invariant!("module {} has no entry function", module.path.display()))?;

        let (_, body) = self.function_body(entry)?;

        Ok(ast::Module {
            span: Span::default(),
            body,
        })
    }

    /// Generates a function, declaring up front every binding whose uses
    /// escape the block it was first assigned in
    fn function_body(&mut self, function: &'hir FunctionIR) -> Result<(Vec<ast::Pattern>, Vec<ast::Statement>)> {
        let mut hoisted = BTreeSet::new();

        loop {
            let mut codegen = FunctionCodegen::new(self, function, hoisted.clone());
            let generated = codegen.generate()?;
            let escaping = codegen.escaping_declarations();

            if escaping.is_subset(&hoisted) {
                return Ok(generated);
            }

            trace!(function = %function.id, escaping = escaping.len(), "hoisting declarations");
            hoisted.extend(escaping);
        }
    }

    fn nested_function(&mut self, id: FunctionId) -> Result<ast::Function> {
        let function = self
            .module
            .functions
            .get(&id)
            .ok_or_else(|| invariant!("function {id} not found"))?;

        let (params, body) = self.function_body(function)?;

        let body = match body.as_slice() {
            [
                ast::Statement {
                    kind: StatementKind::Return(Some(value)),
                    ..
                },
            ] if function.concise_body => FunctionBody::Expression(Box::new(value.clone())),
            _ => FunctionBody::Block(body),
        };

        Ok(ast::Function {
            id: NodeId::SYNTHETIC,
            span: Span::default(),
            name: function.name.map(identifier),
            params,
            body,
            is_arrow: function.kind == FunctionKind::Arrow,
        })
    }

    fn read_count(&self, place: Place) -> usize {
        self.reads.get(&place.identifier).copied().unwrap_or(0)
    }

    fn name(&self, declaration: DeclarationId) -> Result<InternedSymbol> {
        self.names
            .get(declaration, self.env)
            .ok_or_else(|| invariant!("declaration {declaration} has no name"))
    }
}

/// An expression waiting for its reader
#[derive(Debug, Clone)]
struct Pending {
    expression: ast::Expression,
    /// Declarations the expression reads by name
    names: BTreeSet<DeclarationId>,
    effects: bool,
    /// Reads a global by name. Only statements which may run arbitrary code
    /// can change what it evaluates to.
    reads_globals: bool,
    /// Literals and `const` temporaries are repeated at every reader
    duplicable: bool,
    /// Assignments print as a store when used as a statement
    store: Option<Store>,
    /// Writes a declaration into itself, which prints as nothing
    self_copy: bool,
    sequence: usize,
}

#[derive(Debug, Clone)]
struct Store {
    declaration: DeclarationId,
    kind: StoreKind,
    value: Box<Pending>,
}

impl Pending {
    fn pure(expression: ast::Expression) -> Self {
        Self {
            expression,
            names: BTreeSet::new(),
            effects: false,
            reads_globals: false,
            duplicable: false,
            store: None,
            self_copy: false,
            sequence: 0,
        }
    }

    fn effectful(expression: ast::Expression) -> Self {
        Self {
            effects: true,
            ..Self::pure(expression)
        }
    }

    /// The name of a materialized value. It is never written again, so it
    /// can be read any number of times.
    fn temporary(name: InternedSymbol) -> Self {
        Self {
            duplicable: true,
            ..Self::pure(name_expression(name))
        }
    }

    fn global(name: InternedSymbol) -> Self {
        Self {
            reads_globals: true,
            ..Self::pure(name_expression(name))
        }
    }

    fn reading<'p>(mut self, operands: impl IntoIterator<Item = &'p Pending>) -> Self {
        for operand in operands {
            self.names.extend(operand.names.iter().copied());
            self.effects |= operand.effects;
            self.reads_globals |= operand.reads_globals;
        }
        self
    }
}

/// What a statement may overwrite
enum Writes {
    Names(BTreeSet<DeclarationId>),
    Unknown,
}

impl Writes {
    fn none() -> Self {
        Writes::Names(BTreeSet::new())
    }

    fn of(value: &Pending, declaration: Option<DeclarationId>) -> Self {
        if value.effects {
            return Writes::Unknown;
        }
        Writes::Names(declaration.into_iter().collect())
    }
}

struct LoopContext {
    header: BlockId,
    exit: BlockId,
}

struct FunctionCodegen<'a, 'hir> {
    shared: &'a mut ModuleCodegen<'hir>,
    function: &'hir FunctionIR,
    values: HashMap<Identifier, Pending>,
    patterns: HashMap<Identifier, (ast::Pattern, Vec<DeclarationId>)>,
    spreads: HashMap<Identifier, Pending>,
    imports: HashMap<Identifier, ast::ImportSpecifier>,
    exports: HashMap<Identifier, ast::ExportSpecifier>,
    declared: HashSet<DeclarationId>,
    hoisted: BTreeSet<DeclarationId>,
    generated: HashSet<BlockId>,
    /// Blocks printed after the conditional that branches around them
    reserved: HashSet<BlockId>,
    loops: Vec<LoopContext>,
    /// Path of nested statement blocks the output currently is in
    region: Vec<usize>,
    next_region: usize,
    block_regions: HashMap<BlockId, Vec<usize>>,
    /// Region of the `let`/`const` declaring each binding
    first_declared: HashMap<DeclarationId, Vec<usize>>,
    sequence: usize,
}

impl<'a, 'hir> FunctionCodegen<'a, 'hir> {
    fn new(
        shared: &'a mut ModuleCodegen<'hir>,
        function: &'hir FunctionIR,
        hoisted: BTreeSet<DeclarationId>,
    ) -> Self {
        Self {
            shared,
            function,
            values: HashMap::new(),
            patterns: HashMap::new(),
            spreads: HashMap::new(),
            imports: HashMap::new(),
            exports: HashMap::new(),
            declared: hoisted.iter().copied().collect(),
            hoisted,
            generated: HashSet::new(),
            reserved: HashSet::new(),
            loops: Vec::new(),
            region: Vec::new(),
            next_region: 0,
            block_regions: HashMap::new(),
            first_declared: HashMap::new(),
            sequence: 0,
        }
    }

    fn generate(&mut self) -> Result<(Vec<ast::Pattern>, Vec<ast::Statement>)> {
        let function = self.function;
        let mut header = Vec::new();
        for instruction in &function.header {
            self.instruction(instruction, &mut header)?;
        }
        if !header.is_empty() {
            return Err(CompileError::unsupported("parameter default with side effects"));
        }

        let mut params = Vec::with_capacity(self.function.params.len());
        for param in &self.function.params {
            let (pattern, bindings) = self.take_pattern(*param)?;
            self.declared.extend(bindings);
            params.push(pattern);
        }

        let mut body = Vec::new();
        self.block(function.entry, &mut body)?;

        if !self.hoisted.is_empty() {
            let declarators = self
                .hoisted
                .iter()
                .map(|declaration| {
                    Ok(declarator(
                        pattern(PatternKind::Identifier(identifier(self.shared.name(*declaration)?))),
                        None,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            body.insert(
                0,
                statement(StatementKind::VariableDeclaration(ast::VariableDeclaration {
                    kind: VariableKind::Let,
                    declarators,
                })),
            );
        }

        Ok((params, body))
    }

    /* Blocks */

    fn block(&mut self, id: BlockId, out: &mut Vec<ast::Statement>) -> Result<()> {
        if !self.generated.insert(id) {
            return Ok(());
        }
        self.block_regions.insert(id, self.region.clone());

        let function = self.function;
        let block = function
            .blocks
            .get(&id)
            .ok_or_else(|| CompileError::BlockNotFound { id: id.to_string() })?;

        if function.cfg.back_edge(id)?.is_some() {
            return self.loop_statement(block, out);
        }

        for instruction in &block.instructions {
            self.instruction(instruction, out)?;
        }

        match &block.terminal {
            None => Err(invariant!("block {id} has no terminal")),
            Some(Terminal::Jump { target }) => {
                self.flush_all(out);
                self.jump(*target, out)
            }
            Some(Terminal::Branch {
                test,
                consequent,
                alternate,
                fallthrough,
            }) => {
                let test = self.take(*test)?.expression;
                self.flush_all(out);
                self.conditional(test, *consequent, *alternate, *fallthrough, out)
            }
            Some(Terminal::Return { value }) => {
                let value = match value {
                    Some(value) => Some(self.take(*value)?.expression),
                    None => None,
                };
                self.flush_all(out);

                let implicit = value.is_none()
                    && (self.region.is_empty() || function.kind == FunctionKind::Module);
                if !implicit {
                    out.push(statement(StatementKind::Return(value)));
                }
                Ok(())
            }
        }
    }

    fn jump(&mut self, target: BlockId, out: &mut Vec<ast::Statement>) -> Result<()> {
        if self.loops.last().is_some_and(|current| current.exit == target) {
            out.push(statement(StatementKind::Break(None)));
            return Ok(());
        }

        // Back edges and the end of an arm
        if self.loops.iter().any(|l| l.header == target || l.exit == target)
            || self.reserved.contains(&target)
        {
            return Ok(());
        }

        self.block(target, out)
    }

    fn conditional(
        &mut self,
        test: ast::Expression,
        consequent: BlockId,
        alternate: BlockId,
        fallthrough: BlockId,
        out: &mut Vec<ast::Statement>,
    ) -> Result<()> {
        let reserved = self.reserved.insert(fallthrough);

        let consequent_body = if consequent == fallthrough {
            Vec::new()
        } else {
            self.nested(|this, body| this.jump(consequent, body))?
        };
        let alternate_body = if alternate == fallthrough {
            None
        } else {
            Some(self.nested(|this, body| this.jump(alternate, body))?)
        };

        if reserved {
            self.reserved.remove(&fallthrough);
        }

        let (test, consequent_body, alternate_body) = match alternate_body {
            Some(alternate_body) if consequent_body.is_empty() => (negate(test), alternate_body, None),
            alternate_body => (test, consequent_body, alternate_body),
        };

        out.push(statement(StatementKind::If {
            test,
            consequent: Box::new(statement(StatementKind::Block(consequent_body))),
            alternate: alternate_body.map(|body| Box::new(statement(StatementKind::Block(body)))),
        }));

        if !reserved || self.loops.iter().any(|l| l.header == fallthrough || l.exit == fallthrough) {
            return Ok(());
        }

        // Both arms left the function
        let function = self.function;
        if !function.cfg.is_reachable(fallthrough)
            && function
                .blocks
                .get(&fallthrough)
                .is_some_and(|block| block.instructions.is_empty())
        {
            self.generated.insert(fallthrough);
            return Ok(());
        }

        self.jump(fallthrough, out)
    }

    /// `while (test) { body }`, or `while (true)` with an explicit exit when
    /// the header computes statements of its own before testing
    fn loop_statement(&mut self, header: &'hir BasicBlock, out: &mut Vec<ast::Statement>) -> Result<()> {
        let Some(Terminal::Branch {
            test,
            consequent,
            alternate,
            ..
        }) = &header.terminal
        else {
            return Err(CompileError::unsupported("loop without a condition"));
        };

        self.flush_all(out);
        self.loops.push(LoopContext {
            header: header.id,
            exit: *alternate,
        });

        let mut loop_test = None;
        let body = self.nested(|this, body| {
            for instruction in &header.instructions {
                this.instruction(instruction, body)?;
            }
            let mut test = this.take(*test)?.expression;
            this.flush_all(body);

            if !body.is_empty() {
                body.push(statement(StatementKind::If {
                    test: negate(test),
                    consequent: Box::new(statement(StatementKind::Block(vec![statement(
                        StatementKind::Break(None),
                    )]))),
                    alternate: None,
                }));
                test = literal(ast::Literal::Boolean(true));
            }
            loop_test = Some(test);

            this.jump(*consequent, body)
        });
        self.loops.pop();
        let body = body?;

        let test = loop_test.ok_or_else(|| invariant!("loop {} has no test", header.id))?;
        out.push(statement(StatementKind::While {
            test,
            body: Box::new(statement(StatementKind::Block(body))),
        }));

        self.jump(*alternate, out)
    }

    fn nested(
        &mut self,
        generate: impl FnOnce(&mut Self, &mut Vec<ast::Statement>) -> Result<()>,
    ) -> Result<Vec<ast::Statement>> {
        self.next_region += 1;
        self.region.push(self.next_region);

        let mut body = Vec::new();
        let result = generate(self, &mut body);
        self.region.pop();

        result.map(|()| body)
    }

    /// Bindings declared inside a nested block but referenced outside it
    fn escaping_declarations(&self) -> BTreeSet<DeclarationId> {
        let references = self.referencing_blocks();

        self.first_declared
            .iter()
            .filter(|(_, region)| !region.is_empty())
            .filter(|(declaration, region)| {
                references.get(*declaration).is_some_and(|blocks| {
                    blocks.iter().any(|block| {
                        self.block_regions
                            .get(block)
                            .is_some_and(|path| !path.starts_with(region))
                    })
                })
            })
            .map(|(declaration, _)| *declaration)
            .collect()
    }

    /// Blocks referring to each named declaration. Closures count as a
    /// reference from the block creating them.
    fn referencing_blocks(&self) -> HashMap<DeclarationId, BTreeSet<BlockId>> {
        let env = self.shared.env;
        let module = self.shared.module;
        let mut references: HashMap<DeclarationId, BTreeSet<BlockId>> = HashMap::new();

        for block in self.function.blocks.values() {
            let mut add = |declaration: DeclarationId| {
                if !env.is_temporary(declaration) {
                    references.entry(declaration).or_default().insert(block.id);
                }
            };

            for instruction in &block.instructions {
                for place in instruction.reads().into_iter().chain(instruction.defined_places()) {
                    add(place.declaration());
                }
                for function in instruction.kind.functions() {
                    for declaration in subtree_declarations(module, function) {
                        add(declaration);
                    }
                }
            }
            for place in block.terminal.iter().flat_map(Terminal::reads) {
                add(place.declaration());
            }
        }

        references.retain(|declaration, _| {
            !matches!(
                env.declaration(*declaration).kind,
                DeclarationKind::Function | DeclarationKind::Class | DeclarationKind::Var
            )
        });
        references
    }

    /* Pending values */

    fn define(&mut self, place: Place, mut value: Pending, out: &mut Vec<ast::Statement>) -> Result<()> {
        self.sequence += 1;
        value.sequence = self.sequence;

        match self.shared.read_count(place) {
            0 => self.expression_statement(value, out),
            1 => {
                self.values.insert(place.identifier, value);
                Ok(())
            }
            _ if value.duplicable || value.self_copy => {
                self.values.insert(place.identifier, value);
                Ok(())
            }
            _ => {
                let materialized = self.materialize(value, out);
                self.values.insert(place.identifier, materialized);
                Ok(())
            }
        }
    }

    fn take(&mut self, place: Place) -> Result<Pending> {
        if let Some(value) = self.values.get(&place.identifier)
            && value.duplicable
        {
            return Ok(value.clone());
        }
        if let Some(value) = self.values.remove(&place.identifier) {
            return Ok(value);
        }

        let declaration = place.declaration();
        if self.shared.env.is_temporary(declaration) {
            return Err(CompileError::PlaceNotFound {
                id: place.id.to_string(),
            });
        }
        self.read_name(declaration)
    }

    fn read_name(&self, declaration: DeclarationId) -> Result<Pending> {
        let name = self.shared.name(declaration)?;

        Ok(Pending {
            names: BTreeSet::from([declaration]),
            ..Pending::pure(name_expression(name))
        })
    }

    fn take_pattern(&mut self, place: Place) -> Result<(ast::Pattern, Vec<DeclarationId>)> {
        self.patterns
            .remove(&place.identifier)
            .ok_or_else(|| CompileError::PlaceNotFound {
                id: place.id.to_string(),
            })
    }

    /// Arguments and array elements, with spreads
    fn take_elements(&mut self, places: &[Place]) -> Result<(Vec<ArrayElement>, Vec<Pending>)> {
        let mut elements = Vec::with_capacity(places.len());
        let mut operands = Vec::with_capacity(places.len());

        for place in places {
            if let Some(spread) = self.spreads.remove(&place.identifier) {
                elements.push(ArrayElement::Spread(spread.expression.clone()));
                operands.push(spread);
            } else {
                let value = self.take(*place)?;
                elements.push(ArrayElement::Expression(value.expression.clone()));
                operands.push(value);
            }
        }

        Ok((elements, operands))
    }

    fn materialize(&mut self, value: Pending, out: &mut Vec<ast::Statement>) -> Pending {
        let name = self.shared.names.fresh_temporary();
        let writes = Writes::of(&value, None);

        self.statement(
            out,
            StatementKind::VariableDeclaration(ast::VariableDeclaration {
                kind: VariableKind::Const,
                declarators: vec![declarator(
                    pattern(PatternKind::Identifier(identifier(name))),
                    Some(value.expression),
                )],
            }),
            writes,
        );

        Pending::temporary(name)
    }

    /// Pushes a statement after materializing every pending value it could
    /// reorder with
    fn statement(&mut self, out: &mut Vec<ast::Statement>, kind: StatementKind, writes: Writes) {
        self.flush(out, |value| {
            value.effects
                || match &writes {
                    Writes::Unknown => !value.names.is_empty() || value.reads_globals,
                    Writes::Names(names) => !value.names.is_disjoint(names),
                }
        });
        out.push(statement(kind));
    }

    fn flush_all(&mut self, out: &mut Vec<ast::Statement>) {
        self.flush(out, |_| true);
    }

    fn flush(&mut self, out: &mut Vec<ast::Statement>, mut predicate: impl FnMut(&Pending) -> bool) {
        let mut flushed: Vec<(Identifier, Pending)> = self
            .values
            .iter()
            .filter(|(_, value)| !value.duplicable && !value.self_copy && predicate(value))
            .map(|(key, value)| (*key, value.clone()))
            .collect();
        flushed.sort_by_key(|(_, value)| value.sequence);

        for (key, value) in flushed {
            self.values.remove(&key);
            let name = self.shared.names.fresh_temporary();

            out.push(statement(StatementKind::VariableDeclaration(ast::VariableDeclaration {
                kind: VariableKind::Const,
                declarators: vec![declarator(
                    pattern(PatternKind::Identifier(identifier(name))),
                    Some(value.expression),
                )],
            })));
            self.values.insert(key, Pending::temporary(name));
        }
    }

    fn expression_statement(&mut self, value: Pending, out: &mut Vec<ast::Statement>) -> Result<()> {
        if value.self_copy {
            return Ok(());
        }
        if let Some(store) = value.store {
            return self.store(store.declaration, store.kind, *store.value, out);
        }
        // A lone global read still throws when the name is undefined
        if !value.effects && !value.reads_globals {
            return Ok(());
        }

        let writes = Writes::of(&value, None);
        self.statement(out, StatementKind::Expression(value.expression), writes);
        Ok(())
    }

    /* Stores */

    fn store(
        &mut self,
        declaration: DeclarationId,
        kind: StoreKind,
        value: Pending,
        out: &mut Vec<ast::Statement>,
    ) -> Result<()> {
        let name = self.shared.name(declaration)?;
        let writes = Writes::of(&value, Some(declaration));

        let Some(keyword) = self.declaration_keyword(declaration, kind) else {
            self.statement(
                out,
                StatementKind::Expression(assignment(name_pattern(name), value.expression)),
                writes,
            );
            return Ok(());
        };

        let init = match &value.expression.kind {
            ExpressionKind::Identifier(id)
                if id.symbol.value() == "undefined" && keyword != VariableKind::Const =>
            {
                None
            }
            _ => Some(value.expression),
        };

        self.mark_declared(declaration, keyword);
        self.statement(
            out,
            StatementKind::VariableDeclaration(ast::VariableDeclaration {
                kind: keyword,
                declarators: vec![declarator(name_pattern(name), init)],
            }),
            writes,
        );
        Ok(())
    }

    /// The keyword a store to `declaration` declares it with, or `None` when
    /// it is a plain assignment
    fn declaration_keyword(&self, declaration: DeclarationId, kind: StoreKind) -> Option<VariableKind> {
        let info = self.shared.env.declaration(declaration);
        if self.declared.contains(&declaration) || info.owner != self.function.id {
            return None;
        }

        Some(match kind {
            StoreKind::Let => VariableKind::Let,
            StoreKind::Const => VariableKind::Const,
            StoreKind::Var => VariableKind::Var,
            StoreKind::Reassign => match info.kind {
                DeclarationKind::Var => VariableKind::Var,
                DeclarationKind::Const => VariableKind::Const,
                _ => VariableKind::Let,
            },
        })
    }

    fn mark_declared(&mut self, declaration: DeclarationId, keyword: VariableKind) {
        self.declared.insert(declaration);
        if keyword != VariableKind::Var {
            self.first_declared.insert(declaration, self.region.clone());
        }
    }

    /// Declares a binding ahead of an assignment used as a value
    fn ensure_declared(&mut self, declaration: DeclarationId, out: &mut Vec<ast::Statement>) -> Result<()> {
        let keyword = match self.declaration_keyword(declaration, StoreKind::Reassign) {
            Some(VariableKind::Const) => VariableKind::Let,
            Some(keyword) => keyword,
            None => return Ok(()),
        };
        let name = self.shared.name(declaration)?;

        self.mark_declared(declaration, keyword);
        self.statement(
            out,
            StatementKind::VariableDeclaration(ast::VariableDeclaration {
                kind: keyword,
                declarators: vec![declarator(name_pattern(name), None)],
            }),
            Writes::none(),
        );
        Ok(())
    }

    fn local_store(
        &mut self,
        place: Place,
        lval: Place,
        value: Place,
        kind: StoreKind,
        out: &mut Vec<ast::Statement>,
    ) -> Result<()> {
        let stored = self.take(value)?;
        let declaration = lval.declaration();
        let name = self.shared.name(declaration)?;

        if matches!(&stored.expression.kind, ExpressionKind::Identifier(id) if id.symbol == name) {
            let pending = Pending {
                self_copy: true,
                ..self.read_name(declaration)?
            };
            return self.define(place, pending, out);
        }

        if self.shared.read_count(place) > 0 {
            self.ensure_declared(declaration, out)?;
        }

        let mut names = stored.names.clone();
        names.insert(declaration);
        let pending = Pending {
            names,
            store: Some(Store {
                declaration,
                kind,
                value: Box::new(stored.clone()),
            }),
            ..Pending::effectful(assignment(name_pattern(name), stored.expression))
        };

        self.define(place, pending, out)
    }

    /* Instructions */

    fn instruction(&mut self, instruction: &Instruction, out: &mut Vec<ast::Statement>) -> Result<()> {
        let place = instruction.place;

        match &instruction.kind {
            InstructionKind::LoadLocal { place: source } => {
                let value = self.take(*source)?;
                self.define(place, value, out)
            }
            InstructionKind::StoreLocal { lval, value, kind } => {
                self.local_store(place, *lval, *value, *kind, out)
            }
            InstructionKind::Copy { lval, value } => {
                self.local_store(place, *lval, *value, StoreKind::Reassign, out)
            }
            InstructionKind::LoadGlobal { name } => self.define(place, Pending::global(*name), out),
            InstructionKind::StoreGlobal { name, value } => {
                let value = self.take(*value)?;
                let expression = assignment(name_pattern(*name), value.expression.clone());
                self.define(place, Pending::effectful(expression).reading([&value]), out)
            }
            InstructionKind::PropertyLoad { object, property } => {
                let object = self.take(*object)?;
                let expression = member(object.expression.clone(), ast::MemberProperty::Static(*property));
                self.define(place, Pending::effectful(expression).reading([&object]), out)
            }
            InstructionKind::PropertyStore {
                object,
                property,
                value,
            } => {
                let object = self.take(*object)?;
                let value = self.take(*value)?;
                let target = member(object.expression.clone(), ast::MemberProperty::Static(*property));
                let expression = assignment(pattern(PatternKind::Expression(Box::new(target))), value.expression.clone());
                self.define(place, Pending::effectful(expression).reading([&object, &value]), out)
            }
            InstructionKind::ComputedLoad { object, property } => {
                let object = self.take(*object)?;
                let property = self.take(*property)?;
                let expression = member(
                    object.expression.clone(),
                    ast::MemberProperty::Computed(Box::new(property.expression.clone())),
                );
                self.define(place, Pending::effectful(expression).reading([&object, &property]), out)
            }
            InstructionKind::ComputedStore {
                object,
                property,
                value,
            } => {
                let object = self.take(*object)?;
                let property = self.take(*property)?;
                let value = self.take(*value)?;
                let target = member(
                    object.expression.clone(),
                    ast::MemberProperty::Computed(Box::new(property.expression.clone())),
                );
                let expression = assignment(pattern(PatternKind::Expression(Box::new(target))), value.expression.clone());
                let pending = Pending::effectful(expression).reading([&object, &property, &value]);
                self.define(place, pending, out)
            }

            InstructionKind::Literal { value } => {
                let pending = Pending {
                    duplicable: true,
                    ..Pending::pure(literal_value(value))
                };
                self.define(place, pending, out)
            }
            InstructionKind::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.take(*left)?;
                let right = self.take(*right)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Binary {
                    operator: *operator,
                    left: Box::new(left.expression.clone()),
                    right: Box::new(right.expression.clone()),
                });
                let mut pending = Pending::pure(expression).reading([&left, &right]);
                pending.effects |= !instruction.kind.is_pure();
                self.define(place, pending, out)
            }
            InstructionKind::Unary { operator, argument } => {
                let argument = self.take(*argument)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Unary {
                    operator: *operator,
                    argument: Box::new(argument.expression.clone()),
                });
                let mut pending = Pending::pure(expression).reading([&argument]);
                pending.effects |= !instruction.kind.is_pure();
                self.define(place, pending, out)
            }
            InstructionKind::Logical {
                operator,
                left,
                right,
            } => {
                let left = self.take(*left)?;
                let right = self.take(*right)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Logical {
                    operator: *operator,
                    left: Box::new(left.expression.clone()),
                    right: Box::new(right.expression.clone()),
                });
                self.define(place, Pending::pure(expression).reading([&left, &right]), out)
            }
            InstructionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.take(*test)?;
                let consequent = self.take(*consequent)?;
                let alternate = self.take(*alternate)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Conditional {
                    test: Box::new(test.expression.clone()),
                    consequent: Box::new(consequent.expression.clone()),
                    alternate: Box::new(alternate.expression.clone()),
                });
                let pending = Pending::pure(expression).reading([&test, &consequent, &alternate]);
                self.define(place, pending, out)
            }
            InstructionKind::Call { callee, arguments } | InstructionKind::New { callee, arguments } => {
                let callee = self.take(*callee)?;
                let (arguments, operands) = self.take_elements(arguments)?;
                let callee_expression = Box::new(callee.expression.clone());

                let expression = ast::Expression::synthetic(match &instruction.kind {
                    InstructionKind::New { .. } => ExpressionKind::New {
                        callee: callee_expression,
                        arguments,
                    },
                    _ => ExpressionKind::Call {
                        callee: callee_expression,
                        arguments,
                    },
                });
                let pending = Pending::effectful(expression)
                    .reading([&callee])
                    .reading(&operands);
                self.define(place, pending, out)
            }
            InstructionKind::Array { elements } => {
                let (elements, operands) = self.take_elements(elements)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Array(elements));
                self.define(place, Pending::pure(expression).reading(&operands), out)
            }
            InstructionKind::Object { properties } => {
                let mut generated = Vec::with_capacity(properties.len());
                let mut operands = Vec::new();

                for property in properties {
                    generated.push(match property {
                        ObjectProperty::KeyValue {
                            key,
                            value,
                            shorthand,
                        } => {
                            let key = self.property_key(key, &mut operands)?;
                            let value = self.take(*value)?;
                            let shorthand = *shorthand
                                && matches!(
                                    (&key, &value.expression.kind),
                                    (ast::PropertyKey::Identifier(k), ExpressionKind::Identifier(v)) if *k == v.symbol
                                );
                            let expression = value.expression.clone();
                            operands.push(value);

                            ast::Property::KeyValue {
                                key,
                                value: expression,
                                shorthand,
                            }
                        }
                        ObjectProperty::Method { key, function } => ast::Property::Method {
                            key: self.property_key(key, &mut operands)?,
                            function: Rc::new(self.shared.nested_function(*function)?),
                        },
                        ObjectProperty::Spread(argument) => {
                            let value = self.take(*argument)?;
                            let expression = value.expression.clone();
                            operands.push(value);
                            ast::Property::Spread(expression)
                        }
                    });
                }

                let expression = ast::Expression::synthetic(ExpressionKind::Object(generated));
                let pending = Pending::pure(expression).reading(&operands);
                self.define(place, pending, out)
            }
            InstructionKind::FunctionExpression { function } => {
                let function = self.shared.nested_function(*function)?;
                let expression = ast::Expression::synthetic(ExpressionKind::Function(Rc::new(function)));
                self.define(place, Pending::pure(expression), out)
            }

            InstructionKind::BindingIdentifier { .. } => {
                let declaration = place.declaration();
                let name = self.shared.name(declaration)?;
                self.patterns
                    .insert(place.identifier, (name_pattern(name), vec![declaration]));
                Ok(())
            }
            InstructionKind::ArrayPattern { elements } => {
                let mut generated = Vec::with_capacity(elements.len());
                let mut bindings = Vec::new();

                for element in elements {
                    generated.push(match element {
                        Some(element) => {
                            let (element, bound) = self.take_pattern(*element)?;
                            bindings.extend(bound);
                            Some(element)
                        }
                        None => None,
                    });
                }

                self.patterns
                    .insert(place.identifier, (pattern(PatternKind::Array(generated)), bindings));
                Ok(())
            }
            InstructionKind::ObjectPattern { properties } => {
                let mut generated = Vec::with_capacity(properties.len());
                let mut bindings = Vec::new();
                let mut keys = Vec::new();

                for property in properties {
                    generated.push(match property {
                        ObjectPatternProperty::KeyValue { key, value } => {
                            let key = self.property_key(key, &mut keys)?;
                            let (value, bound) = self.take_pattern(*value)?;
                            bindings.extend(bound);
                            ast::ObjectPatternProperty::KeyValue { key, value }
                        }
                        ObjectPatternProperty::Rest(rest) => {
                            let (rest, bound) = self.take_pattern(*rest)?;
                            bindings.extend(bound);
                            ast::ObjectPatternProperty::Rest(rest)
                        }
                    });
                }

                self.patterns
                    .insert(place.identifier, (pattern(PatternKind::Object(generated)), bindings));
                Ok(())
            }
            InstructionKind::AssignmentPattern { target, default } => {
                let default = self.take(*default)?;
                let (target, bindings) = self.take_pattern(*target)?;
                let generated = pattern(PatternKind::Assignment {
                    target: Box::new(target),
                    default: Box::new(default.expression),
                });
                self.patterns.insert(place.identifier, (generated, bindings));
                Ok(())
            }
            InstructionKind::Rest { argument } => {
                let (argument, bindings) = self.take_pattern(*argument)?;
                self.patterns
                    .insert(place.identifier, (pattern(PatternKind::Rest(Box::new(argument))), bindings));
                Ok(())
            }
            InstructionKind::Spread { argument } => {
                let value = self.take(*argument)?;
                self.spreads.insert(place.identifier, value);
                Ok(())
            }
            InstructionKind::Destructure {
                pattern: target,
                value,
                kind,
            } => self.destructure(place, *target, *value, *kind, out),

            InstructionKind::FunctionDeclaration { function } => {
                let declaration = place.declaration();
                let mut generated = self.shared.nested_function(*function)?;
                generated.name = Some(identifier(self.shared.name(declaration)?));

                self.declared.insert(declaration);
                self.statement(
                    out,
                    StatementKind::FunctionDeclaration(Rc::new(generated)),
                    Writes::none(),
                );
                Ok(())
            }

            InstructionKind::ImportDeclaration { source, specifiers } => {
                let specifiers = specifiers
                    .iter()
                    .map(|specifier| {
                        self.imports
                            .remove(&specifier.identifier)
                            .ok_or_else(|| CompileError::PlaceNotFound {
                                id: specifier.id.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;

                self.statement(
                    out,
                    StatementKind::Import(ast::ImportDeclaration {
                        specifiers,
                        source: source.clone(),
                    }),
                    Writes::none(),
                );
                Ok(())
            }
            InstructionKind::ImportSpecifier { kind, local } => {
                let kind = match kind {
                    ImportKind::Default => ast::ImportSpecifierKind::Default,
                    ImportKind::Named(imported) => ast::ImportSpecifierKind::Named { imported: *imported },
                    ImportKind::Namespace => ast::ImportSpecifierKind::Namespace,
                };
                self.imports.insert(
                    place.identifier,
                    ast::ImportSpecifier {
                        kind,
                        local: identifier(*local),
                    },
                );
                Ok(())
            }
            InstructionKind::ExportSpecifier { local, exported } => {
                let name = self.shared.name(local.declaration())?;
                self.exports.insert(
                    place.identifier,
                    ast::ExportSpecifier {
                        local: identifier(name),
                        exported: *exported,
                    },
                );
                Ok(())
            }
            InstructionKind::ExportNamedDeclaration { specifiers } => {
                let specifiers = specifiers
                    .iter()
                    .map(|specifier| {
                        self.exports
                            .remove(&specifier.identifier)
                            .ok_or_else(|| CompileError::PlaceNotFound {
                                id: specifier.id.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;

                self.statement(
                    out,
                    StatementKind::Export(ast::ExportDeclaration::Named {
                        specifiers,
                        source: None,
                    }),
                    Writes::none(),
                );
                Ok(())
            }
            InstructionKind::ExportDefaultDeclaration { value } => {
                let value = self.take(*value)?;
                let writes = Writes::of(&value, None);
                self.statement(
                    out,
                    StatementKind::Export(ast::ExportDeclaration::Default(value.expression)),
                    writes,
                );
                Ok(())
            }

            InstructionKind::ExpressionStatement { expression } => {
                let value = self.take(*expression)?;
                self.expression_statement(value, out)
            }

            InstructionKind::Unsupported { node, bindings } => {
                let mut renames = HashMap::new();
                let mut names = BTreeSet::new();

                for (symbol, binding) in bindings {
                    let declaration = binding.declaration();
                    let rendered = self.shared.name(declaration)?;
                    if rendered != *symbol {
                        renames.insert(*symbol, rendered);
                    }
                    names.insert(declaration);
                }

                let declaration = place.declaration();
                let defines = !self.shared.env.is_temporary(declaration);
                if defines {
                    if let Some(source_name) = self.shared.env.declaration(declaration).name {
                        let rendered = self.shared.name(declaration)?;
                        if rendered != source_name {
                            renames.insert(source_name, rendered);
                        }
                    }
                    self.declared.insert(declaration);
                }

                let mut renamer = Renamer(&renames);
                match node {
                    UnsupportedNode::Statement(node) => {
                        let mut node = ast::Statement::clone(node);
                        visit::walk_statement_mut(&mut renamer, &mut node);
                        self.statement(out, node.kind, Writes::Unknown);
                        Ok(())
                    }
                    UnsupportedNode::Expression(node) => {
                        let mut node = ast::Expression::clone(node);
                        visit::walk_expression_mut(&mut renamer, &mut node);
                        let pending = Pending {
                            names,
                            ..Pending::effectful(node)
                        };
                        self.define(place, pending, out)
                    }
                }
            }
        }
    }

    fn destructure(
        &mut self,
        place: Place,
        target: Place,
        value: Place,
        kind: StoreKind,
        out: &mut Vec<ast::Statement>,
    ) -> Result<()> {
        let value = self.take(value)?;
        let (target, bindings) = self.take_pattern(target)?;

        let declares = kind.is_declaration()
            && bindings.iter().all(|declaration| {
                !self.declared.contains(declaration)
                    && self.shared.env.declaration(*declaration).owner == self.function.id
            });

        if declares && self.shared.read_count(place) == 0 {
            let keyword = match kind {
                StoreKind::Const => VariableKind::Const,
                StoreKind::Var => VariableKind::Var,
                _ => VariableKind::Let,
            };
            for declaration in &bindings {
                self.mark_declared(*declaration, keyword);
            }

            self.statement(
                out,
                StatementKind::VariableDeclaration(ast::VariableDeclaration {
                    kind: keyword,
                    declarators: vec![declarator(target, Some(value.expression))],
                }),
                Writes::Unknown,
            );
            return Ok(());
        }

        for declaration in &bindings {
            self.ensure_declared(*declaration, out)?;
        }

        let mut names = value.names.clone();
        names.extend(bindings);
        let pending = Pending {
            names,
            ..Pending::effectful(assignment(target, value.expression))
        };
        self.define(place, pending, out)
    }

    fn property_key(&mut self, key: &ObjectKey, operands: &mut Vec<Pending>) -> Result<ast::PropertyKey> {
        Ok(match key {
            ObjectKey::Identifier(name) => ast::PropertyKey::Identifier(*name),
            ObjectKey::String(value) => ast::PropertyKey::String(value.clone()),
            ObjectKey::Number(value) => ast::PropertyKey::Number(*value),
            ObjectKey::Computed(place) => {
                let value = self.take(*place)?;
                let expression = value.expression.clone();
                operands.push(value);
                ast::PropertyKey::Computed(Box::new(expression))
            }
        })
    }
}

/// Declarations referenced anywhere inside `root` or the functions nested in it
fn subtree_declarations(module: &ModuleIR, root: FunctionId) -> BTreeSet<DeclarationId> {
    let inside = |mut id: Option<FunctionId>| {
        while let Some(current) = id {
            if current == root {
                return true;
            }
            id = module.functions.get(&current).and_then(|f| f.parent);
        }
        false
    };

    module
        .functions
        .values()
        .filter(|function| inside(Some(function.id)))
        .flat_map(|function| {
            function
                .instructions()
                .flat_map(|instruction| {
                    let mut places = instruction.reads();
                    places.extend(instruction.defined_places());
                    places
                })
                .chain(function.reads())
                .map(|place| place.declaration())
                .collect::<Vec<_>>()
        })
        .collect()
}

struct Renamer<'a>(&'a HashMap<InternedSymbol, InternedSymbol>);

impl MutVisitor for Renamer<'_> {
    fn visit_identifier_mut(&mut self, identifier: &mut ast::Identifier) {
        if let Some(renamed) = self.0.get(&identifier.symbol) {
            identifier.symbol = *renamed;
        }
    }
}

/* Syntax helpers */

fn statement(kind: StatementKind) -> ast::Statement {
    ast::Statement {
        id: NodeId::SYNTHETIC,
        span: Span::default(),
        kind,
    }
}

fn identifier(symbol: InternedSymbol) -> ast::Identifier {
    ast::Identifier {
        id: NodeId::SYNTHETIC,
        span: Span::default(),
        symbol,
    }
}

fn pattern(kind: PatternKind) -> ast::Pattern {
    ast::Pattern::synthetic(kind)
}

fn name_pattern(symbol: InternedSymbol) -> ast::Pattern {
    pattern(PatternKind::Identifier(identifier(symbol)))
}

fn name_expression(symbol: InternedSymbol) -> ast::Expression {
    ast::Expression::synthetic(ExpressionKind::Identifier(identifier(symbol)))
}

fn literal(value: ast::Literal) -> ast::Expression {
    ast::Expression::synthetic(ExpressionKind::Literal(value))
}

fn literal_value(value: &LiteralValue) -> ast::Expression {
    match value {
        LiteralValue::Number(number) if *number < 0.0 => {
            ast::Expression::synthetic(ExpressionKind::Unary {
                operator: ast::UnaryOperator::Minus,
                argument: Box::new(literal(ast::Literal::Number(-number))),
            })
        }
        LiteralValue::Number(number) => literal(ast::Literal::Number(*number)),
        LiteralValue::String(value) => literal(ast::Literal::String(value.clone())),
        LiteralValue::Boolean(value) => literal(ast::Literal::Boolean(*value)),
        LiteralValue::Null => literal(ast::Literal::Null),
        LiteralValue::Undefined => name_expression(InternedSymbol::new("undefined")),
    }
}

fn negate(test: ast::Expression) -> ast::Expression {
    ast::Expression::synthetic(ExpressionKind::Unary {
        operator: ast::UnaryOperator::Not,
        argument: Box::new(test),
    })
}

fn member(object: ast::Expression, property: ast::MemberProperty) -> ast::Expression {
    ast::Expression::synthetic(ExpressionKind::Member {
        object: Box::new(object),
        property,
    })
}

fn assignment(target: ast::Pattern, value: ast::Expression) -> ast::Expression {
    ast::Expression::synthetic(ExpressionKind::Assignment {
        operator: AssignmentOperator::Assign,
        target: Box::new(target),
        value: Box::new(value),
    })
}

fn declarator(target: ast::Pattern, init: Option<ast::Expression>) -> ast::VariableDeclarator {
    ast::VariableDeclarator {
        id: NodeId::SYNTHETIC,
        span: Span::default(),
        target,
        init,
    }
}
