//! The bindings pre-pass. Before a scope's statements are lowered, every name
//! the scope declares is registered so that references (including ones that
//! appear before the declaration) resolve to the right declaration.

use std::rc::Rc;

use crate::frontend::{
    ast::{
        self, ExportDeclaration, ForInit, Function, ObjectPatternProperty, Pattern, PatternKind,
        Statement, StatementKind, VariableDeclaration, VariableKind,
        visit::Visitor,
    },
    intern::InternedSymbol,
};
use crate::middle::hir::DeclarationKind;

#[derive(Debug)]
pub(super) enum LexicalBinding {
    Variable {
        name: ast::Identifier,
        kind: DeclarationKind,
    },
    Function {
        name: ast::Identifier,
        function: Rc<Function>,
    },
}

/// Names declared with `let`, `const`, `class` or `function` directly in a
/// statement list
pub(super) fn lexical_bindings(statements: &[Statement]) -> Vec<LexicalBinding> {
    let mut bindings = Vec::new();

    for statement in statements {
        collect_lexical(statement, &mut bindings);
    }

    bindings
}

fn collect_lexical(statement: &Statement, bindings: &mut Vec<LexicalBinding>) {
    match &statement.kind {
        StatementKind::VariableDeclaration(declaration) if declaration.kind != VariableKind::Var => {
            let kind = match declaration.kind {
                VariableKind::Const => DeclarationKind::Const,
                _ => DeclarationKind::Let,
            };

            for declarator in &declaration.declarators {
                for name in pattern_names(&declarator.target) {
                    bindings.push(LexicalBinding::Variable { name, kind });
                }
            }
        }
        StatementKind::FunctionDeclaration(function) => {
            if let Some(name) = function.name {
                bindings.push(LexicalBinding::Function {
                    name,
                    function: function.clone(),
                });
            }
        }
        StatementKind::ClassDeclaration(class) => {
            if let Some(name) = class.name {
                bindings.push(LexicalBinding::Variable {
                    name,
                    kind: DeclarationKind::Class,
                });
            }
        }
        StatementKind::Export(ExportDeclaration::Declaration(inner)) => {
            collect_lexical(inner, bindings)
        }
        _ => {}
    }
}

/// Names declared with `var` anywhere in a function body, nested blocks and
/// loop heads included but nested functions excluded. Each name appears once.
pub(super) fn var_names(statements: &[Statement]) -> Vec<ast::Identifier> {
    let mut names: Vec<ast::Identifier> = Vec::new();

    for statement in statements {
        collect_vars(statement, &mut names);
    }

    names
}

fn collect_vars(statement: &Statement, names: &mut Vec<ast::Identifier>) {
    fn add_declaration(declaration: &VariableDeclaration, names: &mut Vec<ast::Identifier>) {
        if declaration.kind != VariableKind::Var {
            return;
        }

        for declarator in &declaration.declarators {
            for name in pattern_names(&declarator.target) {
                if !names.iter().any(|n| n.symbol == name.symbol) {
                    names.push(name);
                }
            }
        }
    }

    match &statement.kind {
        StatementKind::VariableDeclaration(declaration) => add_declaration(declaration, names),
        StatementKind::If {
            consequent,
            alternate,
            ..
        } => {
            collect_vars(consequent, names);
            if let Some(alternate) = alternate {
                collect_vars(alternate, names);
            }
        }
        StatementKind::While { body, .. } | StatementKind::DoWhile { body, .. } => {
            collect_vars(body, names)
        }
        StatementKind::For { init, body, .. } => {
            if let Some(ForInit::Declaration(declaration)) = init {
                add_declaration(declaration, names);
            }
            collect_vars(body, names);
        }
        StatementKind::ForEach { left, body, .. } => {
            if let ForInit::Declaration(declaration) = left {
                add_declaration(declaration, names);
            }
            collect_vars(body, names);
        }
        StatementKind::Block(statements) => {
            for statement in statements {
                collect_vars(statement, names);
            }
        }
        StatementKind::Export(ExportDeclaration::Declaration(inner)) => collect_vars(inner, names),
        _ => {}
    }
}

/// Identifiers bound by a pattern, in source order
pub(super) fn pattern_names(pattern: &Pattern) -> Vec<ast::Identifier> {
    fn collect(pattern: &Pattern, names: &mut Vec<ast::Identifier>) {
        match &pattern.kind {
            PatternKind::Identifier(identifier) => names.push(*identifier),
            PatternKind::Array(elements) => {
                for element in elements.iter().flatten() {
                    collect(element, names);
                }
            }
            PatternKind::Object(properties) => {
                for property in properties {
                    match property {
                        ObjectPatternProperty::KeyValue { value, .. } => collect(value, names),
                        ObjectPatternProperty::Rest(rest) => collect(rest, names),
                    }
                }
            }
            PatternKind::Assignment { target, .. } => collect(target, names),
            PatternKind::Rest(argument) => collect(argument, names),
            PatternKind::Expression(_) => {}
        }
    }

    let mut names = Vec::new();
    collect(pattern, &mut names);
    names
}

/// Every identifier name mentioned inside a subtree, nested functions
/// included, in first-occurrence order
#[derive(Default)]
pub(super) struct ReferencedNames {
    pub names: Vec<InternedSymbol>,
}

impl<'ast> Visitor<'ast> for ReferencedNames {
    fn visit_identifier(&mut self, identifier: &'ast ast::Identifier) {
        if !self.names.contains(&identifier.symbol) {
            self.names.push(identifier.symbol);
        }
    }
}

impl ReferencedNames {
    pub fn of_statement(statement: &Statement) -> Vec<InternedSymbol> {
        let mut collector = Self::default();
        collector.visit_statement(statement);
        collector.names
    }

    pub fn of_expression(expression: &ast::Expression) -> Vec<InternedSymbol> {
        let mut collector = Self::default();
        collector.visit_expression(expression);
        collector.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    fn parse(source: &str) -> ast::Module {
        Parser::parse_module(&SourceFile::from_memory(source)).unwrap()
    }

    fn symbols(names: Vec<ast::Identifier>) -> Vec<&'static str> {
        names.into_iter().map(|n| n.symbol.value()).collect()
    }

    #[test]
    fn vars_are_hoisted_out_of_blocks() {
        let module = parse(
            "var a = 1; if (c) { var b; let c2 = 3; } while (x) { var a; } function f() { var inner; }",
        );

        assert_eq!(symbols(var_names(&module.body)), vec!["a", "b"]);
    }

    #[test]
    fn lexical_bindings_only_cover_the_statement_list() {
        let module = parse("let [x, { y, z: w }] = v; const k = 1; class C {} function f() {} { let hidden; }");

        let names: Vec<_> = lexical_bindings(&module.body)
            .into_iter()
            .map(|binding| match binding {
                LexicalBinding::Variable { name, kind } => (name.symbol.value(), kind),
                LexicalBinding::Function { name, .. } => {
                    (name.symbol.value(), DeclarationKind::Function)
                }
            })
            .collect();

        assert_eq!(
            names,
            vec![
                ("x", DeclarationKind::Let),
                ("y", DeclarationKind::Let),
                ("w", DeclarationKind::Let),
                ("k", DeclarationKind::Const),
                ("C", DeclarationKind::Class),
                ("f", DeclarationKind::Function),
            ]
        );
    }

    #[test]
    fn referenced_names_include_nested_functions() {
        let module = parse("for (const item of list) { total = total + item; }");
        let names = ReferencedNames::of_statement(&module.body[0]);
        let names: Vec<_> = names.iter().map(|n| n.value()).collect();

        assert_eq!(names, vec!["item", "list", "total"]);
    }
}
