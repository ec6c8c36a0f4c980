use std::rc::Rc;

use super::{
    HirBuilder, LoopFrame, merge_versions,
    bindings::{ReferencedNames, lexical_bindings, pattern_names},
    scope::ScopeKind,
};
use crate::{
    error::{CompileError, Result, invariant},
    frontend::{
        ast::{
            self, ExportDeclaration, ExpressionKind, ForInit, PatternKind,
            Statement, StatementKind, VariableDeclaration, VariableKind,
        },
        intern::InternedSymbol,
    },
    middle::hir::{
        DeclarationId, ImportKind, InstructionId, InstructionKind, LiteralValue, Place, StoreKind,
        Terminal, UnsupportedNode,
    },
};

impl HirBuilder<'_> {
    pub(super) fn lower_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.lower_statement(statement)?;
        }

        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::VariableDeclaration(declaration) => {
                self.lower_variable_declaration(declaration, statement.id)
            }
            // Hoisted by the bindings pre-pass
            StatementKind::FunctionDeclaration(_) => Ok(()),
            StatementKind::ClassDeclaration(class) => {
                self.lower_class_declaration(statement, class.name)
            }
            StatementKind::Return(value) => {
                let value = match value {
                    Some(value) => Some(self.lower_expression(value)?),
                    None => None,
                };

                self.finish_unreachable(Terminal::Return { value });
                Ok(())
            }
            StatementKind::If {
                test,
                consequent,
                alternate,
            } => self.lower_if(test, consequent, alternate.as_deref()),
            StatementKind::While { test, body } => self.lower_loop(Some(test), None, body),
            StatementKind::For {
                init,
                test,
                update,
                body,
            } => self.lower_for(init.as_ref(), test.as_ref(), update.as_ref(), body),
            StatementKind::Block(statements) => self.lower_block(statements),
            StatementKind::Break(None) => self.lower_break(),
            StatementKind::Break(Some(_)) => Err(CompileError::unsupported("labeled break statement")),
            StatementKind::Continue(_) => Err(CompileError::unsupported("continue statement")),
            StatementKind::Expression(expression) => self.lower_expression_statement(expression),
            StatementKind::Import(import) => {
                let mut specifiers = Vec::with_capacity(import.specifiers.len());

                for specifier in &import.specifiers {
                    let kind = match &specifier.kind {
                        ast::ImportSpecifierKind::Default => ImportKind::Default,
                        ast::ImportSpecifierKind::Named { imported } => ImportKind::Named(*imported),
                        ast::ImportSpecifierKind::Namespace => ImportKind::Namespace,
                    };

                    specifiers.push(self.emit(
                        InstructionKind::ImportSpecifier {
                            kind,
                            local: specifier.local.symbol,
                        },
                        statement.id,
                    ));
                }

                self.emit(
                    InstructionKind::ImportDeclaration {
                        source: import.source.clone(),
                        specifiers,
                    },
                    statement.id,
                );
                Ok(())
            }
            StatementKind::Export(export) => self.lower_export(statement, export),
            StatementKind::Empty => Ok(()),
            StatementKind::DoWhile { .. } | StatementKind::ForEach { .. } | StatementKind::Throw(_) => {
                self.lower_unsupported_statement(statement, None)
            }
        }
    }

    fn lower_variable_declaration(
        &mut self,
        declaration: &VariableDeclaration,
        origin: ast::NodeId,
    ) -> Result<()> {
        let kind = StoreKind::from(declaration.kind);

        for declarator in &declaration.declarators {
            match (&declarator.target.kind, &declarator.init) {
                (PatternKind::Identifier(name), init) => {
                    let value = match init {
                        Some(init) => self.lower_expression(init)?,
                        // `var x;` never resets an existing value
                        None if declaration.kind == VariableKind::Var => continue,
                        None => self.emit(
                            InstructionKind::Literal {
                                value: LiteralValue::Undefined,
                            },
                            declarator.id,
                        ),
                    };

                    let declaration = self.declared(name.symbol)?;
                    let lval = self.binding_place(declaration);
                    self.emit(InstructionKind::StoreLocal { lval, value, kind }, origin);
                }
                (_, Some(init)) => {
                    let value = self.lower_expression(init)?;
                    let pattern = self.lower_binding_pattern(&declarator.target)?;
                    self.emit(
                        InstructionKind::Destructure {
                            pattern,
                            value,
                            kind,
                        },
                        origin,
                    );
                }
                (_, None) => {
                    return Err(CompileError::unsupported(
                        "destructuring declaration without initializer",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Declaration registered for `name` by the pre-pass of an enclosing scope
    pub(super) fn declared(&self, name: InternedSymbol) -> Result<DeclarationId> {
        self.scopes
            .get_data(name)
            .ok_or_else(|| invariant!("`{name}` was not bound by the bindings pre-pass"))
    }

    /// Classes are kept verbatim. The class name becomes a new version
    /// defined by the unsupported instruction itself.
    fn lower_class_declaration(
        &mut self,
        statement: &Statement,
        name: Option<ast::Identifier>,
    ) -> Result<()> {
        let declaration = match name {
            Some(name) => Some(self.declared(name.symbol)?),
            None => None,
        };

        self.lower_unsupported_statement(statement, declaration)
    }

    pub(super) fn lower_unsupported_statement(
        &mut self,
        statement: &Statement,
        defines: Option<DeclarationId>,
    ) -> Result<()> {
        let names = ReferencedNames::of_statement(statement);
        let bindings = self.capture_bindings(&names, defines)?;
        let kind = InstructionKind::Unsupported {
            node: UnsupportedNode::Statement(Rc::new(statement.clone())),
            bindings,
        };

        match defines {
            Some(declaration) => {
                let place = self.binding_place(declaration);
                self.push_instruction(place, kind, statement.id);
            }
            None => {
                self.emit(kind, statement.id);
            }
        }

        Ok(())
    }

    /// Resolves the outer variables an unsupported node refers to. They are
    /// marked captured because the node may read or write them in ways the
    /// IR can't see.
    pub(super) fn capture_bindings(
        &mut self,
        names: &[InternedSymbol],
        exclude: Option<DeclarationId>,
    ) -> Result<Vec<(InternedSymbol, Place)>> {
        let mut bindings = Vec::new();

        for name in names {
            let Some(declaration) = self.scopes.get_data(*name) else {
                continue;
            };

            if Some(declaration) == exclude {
                continue;
            }

            self.env.captured.insert(declaration);

            let place = match self.read_version(*name, declaration) {
                Ok(place) => place,
                // Nodes kept verbatim may legitimately mention a binding
                // before its declaration (e.g. inside a nested closure)
                Err(CompileError::UseBeforeDeclaration { .. }) => self
                    .frame()
                    .versions
                    .get(&declaration)
                    .copied()
                    .ok_or_else(|| invariant!("declaration `{name}` has no version"))?,
                Err(error) => return Err(error),
            };

            bindings.push((*name, place));
        }

        Ok(bindings)
    }

    fn lower_block(&mut self, statements: &[Statement]) -> Result<()> {
        let block = self.env.new_block_id();
        self.finish_block(Terminal::Jump { target: block }, block);

        self.scopes.push(ScopeKind::Block);
        self.declare_scope_bindings(statements, false)?;
        let result = self.lower_statements(statements);
        self.scopes.pop();

        result
    }

    /// Lowers the body of an `if` arm or a loop. Blocks get their own scope,
    /// single statements are lowered in place.
    fn lower_nested(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::Block(statements) => {
                self.scopes.push(ScopeKind::Block);
                self.declare_scope_bindings(statements, false)?;
                let result = self.lower_statements(statements);
                self.scopes.pop();
                result
            }
            _ => self.lower_statement(statement),
        }
    }

    fn lower_if(
        &mut self,
        test: &ast::Expression,
        consequent: &Statement,
        alternate: Option<&Statement>,
    ) -> Result<()> {
        let test = self.lower_expression(test)?;

        let consequent_block = self.env.new_block_id();
        let join_block = self.env.new_block_id();
        let alternate_block = match alternate {
            Some(_) => self.env.new_block_id(),
            None => join_block,
        };

        self.finish_block(
            Terminal::Branch {
                test,
                consequent: consequent_block,
                alternate: alternate_block,
                fallthrough: join_block,
            },
            consequent_block,
        );

        let base = self.frame().versions.clone();
        let reachable = self.frame().reachable;

        self.lower_nested(consequent)?;
        let consequent_path = (self.frame().versions.clone(), self.frame().reachable);

        let alternate_path = match alternate {
            Some(alternate) => {
                self.finish_block(Terminal::Jump { target: join_block }, alternate_block);
                self.frame_mut().versions = base.clone();
                self.frame_mut().reachable = reachable;

                self.lower_nested(alternate)?;
                (self.frame().versions.clone(), self.frame().reachable)
            }
            None => (base.clone(), reachable),
        };

        self.finish_block(Terminal::Jump { target: join_block }, join_block);

        let frame = self.frame_mut();
        frame.reachable = consequent_path.1 || alternate_path.1;
        frame.versions = merge_versions(&base, &[consequent_path, alternate_path]);

        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&ast::Expression>,
        update: Option<&ast::Expression>,
        body: &Statement,
    ) -> Result<()> {
        self.scopes.push(ScopeKind::Block);
        let result = self.lower_for_in_scope(init, test, update, body);
        self.scopes.pop();

        result
    }

    fn lower_for_in_scope(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&ast::Expression>,
        update: Option<&ast::Expression>,
        body: &Statement,
    ) -> Result<()> {
        let init_block = self.env.new_block_id();
        self.finish_block(Terminal::Jump { target: init_block }, init_block);

        match init {
            Some(ForInit::Declaration(declaration)) => {
                let statement = Statement {
                    id: ast::NodeId::SYNTHETIC,
                    span: Default::default(),
                    kind: StatementKind::VariableDeclaration(declaration.clone()),
                };
                self.declare_scope_bindings(std::slice::from_ref(&statement), false)?;
                self.lower_variable_declaration(declaration, ast::NodeId::SYNTHETIC)?;
            }
            Some(ForInit::Expression(expression)) => self.lower_expression_statement(expression)?,
            None => {}
        }

        self.lower_loop(test, update, body)
    }

    /// `while` and `for` loops: a test block branching to the body or the
    /// exit, and a body whose end jumps back to the test.
    fn lower_loop(
        &mut self,
        test: Option<&ast::Expression>,
        update: Option<&ast::Expression>,
        body: &Statement,
    ) -> Result<()> {
        let test_block = self.env.new_block_id();
        let body_block = self.env.new_block_id();
        let exit_block = self.env.new_block_id();

        self.finish_block(Terminal::Jump { target: test_block }, test_block);

        let base = self.frame().versions.clone();
        let reachable = self.frame().reachable;

        let test = match test {
            Some(test) => self.lower_expression(test)?,
            None => self.emit(
                InstructionKind::Literal {
                    value: LiteralValue::Boolean(true),
                },
                ast::NodeId::SYNTHETIC,
            ),
        };

        self.finish_block(
            Terminal::Branch {
                test,
                consequent: body_block,
                alternate: exit_block,
                fallthrough: exit_block,
            },
            body_block,
        );

        self.frame_mut().loops.push(LoopFrame {
            exit: exit_block,
            breaks: Vec::new(),
        });

        self.lower_nested(body)?;

        if let Some(update) = update {
            self.lower_expression_statement(update)?;
        }

        let body_path = (self.frame().versions.clone(), self.frame().reachable);
        self.finish_block(Terminal::Jump { target: test_block }, exit_block);

        let Some(loop_frame) = self.frame_mut().loops.pop() else {
            return Err(invariant!("loop frame vanished while lowering its body"));
        };

        let mut paths = vec![body_path];
        paths.extend(loop_frame.breaks.into_iter().map(|versions| (versions, true)));

        let frame = self.frame_mut();
        frame.versions = merge_versions(&base, &paths);
        frame.reachable = reachable;

        Ok(())
    }

    fn lower_break(&mut self) -> Result<()> {
        let versions = self.frame().versions.clone();
        let reachable = self.frame().reachable;

        let Some(loop_frame) = self.frame_mut().loops.last_mut() else {
            return Err(CompileError::unsupported("break statement outside of a loop"));
        };

        if reachable {
            loop_frame.breaks.push(versions);
        }
        let exit = loop_frame.exit;

        self.finish_unreachable(Terminal::Jump { target: exit });
        Ok(())
    }

    /// Expression statements whose only effect is a store don't need their
    /// value afterwards
    pub(super) fn lower_expression_statement(&mut self, expression: &ast::Expression) -> Result<()> {
        match &expression.kind {
            ExpressionKind::Assignment {
                operator,
                target,
                value,
            } if !operator.is_logical() => {
                self.lower_assignment(expression, *operator, target, value)?;
            }
            ExpressionKind::Update {
                operator,
                prefix,
                argument,
            } => {
                self.lower_update(expression, *operator, *prefix, argument)?;
            }
            ExpressionKind::Sequence(expressions) => {
                for expression in expressions {
                    self.lower_expression_statement(expression)?;
                }
            }
            _ => {
                let value = self.lower_expression(expression)?;
                self.emit(
                    InstructionKind::ExpressionStatement { expression: value },
                    expression.id,
                );
            }
        }

        Ok(())
    }

    fn lower_export(&mut self, statement: &Statement, export: &ExportDeclaration) -> Result<()> {
        match export {
            ExportDeclaration::Named {
                specifiers,
                source: None,
            } => {
                let mut locals = Vec::with_capacity(specifiers.len());

                for specifier in specifiers {
                    match self.scopes.get_data(specifier.local.symbol) {
                        Some(declaration) => locals.push((declaration, specifier.exported)),
                        // Re-exporting an import or a global is kept verbatim
                        None => return self.lower_unsupported_statement(statement, None),
                    }
                }

                self.export_declarations(statement, &locals)
            }
            ExportDeclaration::Named { source: Some(_), .. } => {
                self.lower_unsupported_statement(statement, None)
            }
            ExportDeclaration::Declaration(inner) => {
                self.lower_statement(inner)?;

                let names = match &inner.kind {
                    StatementKind::VariableDeclaration(declaration) => declaration
                        .declarators
                        .iter()
                        .flat_map(|declarator| pattern_names(&declarator.target))
                        .collect(),
                    _ => lexical_bindings(std::slice::from_ref(inner.as_ref()))
                        .into_iter()
                        .map(|binding| match binding {
                            super::bindings::LexicalBinding::Variable { name, .. }
                            | super::bindings::LexicalBinding::Function { name, .. } => name,
                        })
                        .collect::<Vec<_>>(),
                };

                let mut locals = Vec::with_capacity(names.len());
                for name in names {
                    locals.push((self.declared(name.symbol)?, name.symbol));
                }

                self.export_declarations(statement, &locals)
            }
            ExportDeclaration::Default(expression) => {
                let value = self.lower_expression(expression)?;
                let id = self.emit_with_id(
                    InstructionKind::ExportDefaultDeclaration { value },
                    statement.id,
                );
                self.exports.insert(InternedSymbol::new("default"), id);
                Ok(())
            }
        }
    }

    /// Emits one export specifier per local binding plus the declaration
    /// grouping them. Exported bindings are observable by importers, so they
    /// are treated as captured.
    fn export_declarations(
        &mut self,
        statement: &Statement,
        locals: &[(DeclarationId, InternedSymbol)],
    ) -> Result<()> {
        let mut specifiers = Vec::with_capacity(locals.len());

        for (declaration, exported) in locals {
            let name = self
                .env
                .declaration(*declaration)
                .name
                .unwrap_or(*exported);
            let local = self.read_version(name, *declaration)?;
            self.env.captured.insert(*declaration);

            let owner = self.function_id();
            let place = self.env.new_temporary(owner);
            let id = self.push_instruction(
                place,
                InstructionKind::ExportSpecifier {
                    local,
                    exported: *exported,
                },
                statement.id,
            );
            self.exports.insert(*exported, id);
            specifiers.push(place);
        }

        self.emit(
            InstructionKind::ExportNamedDeclaration { specifiers },
            statement.id,
        );

        Ok(())
    }

    /// Like `emit` but returns the instruction id
    fn emit_with_id(
        &mut self,
        kind: InstructionKind,
        origin: ast::NodeId,
    ) -> InstructionId {
        let owner = self.function_id();
        let place = self.env.new_temporary(owner);
        self.push_instruction(place, kind, origin)
    }
}

/// Whether an assignment target can be lowered into HIR. Member expressions
/// inside destructuring patterns are kept verbatim.
pub(super) fn is_plain_pattern(pattern: &ast::Pattern) -> bool {
    match &pattern.kind {
        PatternKind::Identifier(_) => true,
        PatternKind::Array(elements) => elements.iter().flatten().all(is_plain_pattern),
        PatternKind::Object(properties) => properties.iter().all(|property| match property {
            ast::ObjectPatternProperty::KeyValue { value, .. } => is_plain_pattern(value),
            ast::ObjectPatternProperty::Rest(rest) => is_plain_pattern(rest),
        }),
        PatternKind::Assignment { target, .. } => is_plain_pattern(target),
        PatternKind::Rest(argument) => is_plain_pattern(argument),
        PatternKind::Expression(_) => false,
    }
}
