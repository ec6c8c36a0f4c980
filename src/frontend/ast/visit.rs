//! Visitor traits which walk the tree in DFS order. `Visitor` borrows the
//! tree, `MutVisitor` rewrites it in place (shared function nodes are cloned
//! on write).

use std::rc::Rc;

use super::{
    ArrayElement, Class, ExportDeclaration, Expression, ExpressionKind, ForInit, Function,
    FunctionBody, Identifier, MemberProperty, ObjectPatternProperty, Pattern, PatternKind,
    Property, PropertyKey, Statement, StatementKind, VariableDeclaration,
};

pub trait Visitor<'ast>: Sized {
    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }

    fn visit_pattern(&mut self, pattern: &'ast Pattern) {
        walk_pattern(self, pattern)
    }

    fn visit_function(&mut self, function: &'ast Function) {
        walk_function(self, function)
    }

    fn visit_class(&mut self, class: &'ast Class) {
        walk_class(self, class)
    }

    fn visit_identifier(&mut self, _identifier: &'ast Identifier) {}
}

pub fn walk_statement<'ast, V: Visitor<'ast>>(visitor: &mut V, statement: &'ast Statement) {
    match &statement.kind {
        StatementKind::VariableDeclaration(declaration) => {
            walk_variable_declaration(visitor, declaration)
        }
        StatementKind::FunctionDeclaration(function) => visitor.visit_function(function),
        StatementKind::ClassDeclaration(class) => visitor.visit_class(class),
        StatementKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expression(value);
            }
        }
        StatementKind::If {
            test,
            consequent,
            alternate,
        } => {
            visitor.visit_expression(test);
            visitor.visit_statement(consequent);
            if let Some(alternate) = alternate {
                visitor.visit_statement(alternate);
            }
        }
        StatementKind::While { test, body } | StatementKind::DoWhile { body, test } => {
            visitor.visit_expression(test);
            visitor.visit_statement(body);
        }
        StatementKind::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Declaration(declaration)) => {
                    walk_variable_declaration(visitor, declaration)
                }
                Some(ForInit::Expression(expression)) => visitor.visit_expression(expression),
                None => {}
            }
            if let Some(test) = test {
                visitor.visit_expression(test);
            }
            if let Some(update) = update {
                visitor.visit_expression(update);
            }
            visitor.visit_statement(body);
        }
        StatementKind::ForEach {
            left, right, body, ..
        } => {
            match left {
                ForInit::Declaration(declaration) => walk_variable_declaration(visitor, declaration),
                ForInit::Expression(expression) => visitor.visit_expression(expression),
            }
            visitor.visit_expression(right);
            visitor.visit_statement(body);
        }
        StatementKind::Block(statements) => {
            for statement in statements {
                visitor.visit_statement(statement);
            }
        }
        StatementKind::Throw(expression) | StatementKind::Expression(expression) => {
            visitor.visit_expression(expression)
        }
        StatementKind::Import(import) => {
            for specifier in &import.specifiers {
                visitor.visit_identifier(&specifier.local);
            }
        }
        StatementKind::Export(export) => match export {
            ExportDeclaration::Named { specifiers, source } => {
                // Re-exports don't reference local bindings
                if source.is_none() {
                    for specifier in specifiers {
                        visitor.visit_identifier(&specifier.local);
                    }
                }
            }
            ExportDeclaration::Declaration(statement) => visitor.visit_statement(statement),
            ExportDeclaration::Default(expression) => visitor.visit_expression(expression),
        },
        StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Empty => {}
    }
}

fn walk_variable_declaration<'ast, V: Visitor<'ast>>(
    visitor: &mut V,
    declaration: &'ast VariableDeclaration,
) {
    for declarator in &declaration.declarators {
        visitor.visit_pattern(&declarator.target);
        if let Some(init) = &declarator.init {
            visitor.visit_expression(init);
        }
    }
}

pub fn walk_expression<'ast, V: Visitor<'ast>>(visitor: &mut V, expression: &'ast Expression) {
    match &expression.kind {
        ExpressionKind::Identifier(identifier) => visitor.visit_identifier(identifier),
        ExpressionKind::Literal(_) | ExpressionKind::This => {}
        ExpressionKind::Array(elements) => walk_elements(visitor, elements),
        ExpressionKind::Object(properties) => {
            for property in properties {
                match property {
                    Property::KeyValue { key, value, .. } => {
                        walk_property_key(visitor, key);
                        visitor.visit_expression(value);
                    }
                    Property::Method { key, function } => {
                        walk_property_key(visitor, key);
                        visitor.visit_function(function);
                    }
                    Property::Spread(expression) => visitor.visit_expression(expression),
                }
            }
        }
        ExpressionKind::Function(function) => visitor.visit_function(function),
        ExpressionKind::Unary { argument, .. } | ExpressionKind::Update { argument, .. } => {
            visitor.visit_expression(argument)
        }
        ExpressionKind::Binary { left, right, .. } | ExpressionKind::Logical { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        ExpressionKind::Assignment { target, value, .. } => {
            visitor.visit_pattern(target);
            visitor.visit_expression(value);
        }
        ExpressionKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            visitor.visit_expression(test);
            visitor.visit_expression(consequent);
            visitor.visit_expression(alternate);
        }
        ExpressionKind::Call { callee, arguments } | ExpressionKind::New { callee, arguments } => {
            visitor.visit_expression(callee);
            walk_elements(visitor, arguments);
        }
        ExpressionKind::Member { object, property } => {
            visitor.visit_expression(object);
            if let MemberProperty::Computed(property) = property {
                visitor.visit_expression(property);
            }
        }
        ExpressionKind::Sequence(expressions) => {
            for expression in expressions {
                visitor.visit_expression(expression);
            }
        }
    }
}

fn walk_elements<'ast, V: Visitor<'ast>>(visitor: &mut V, elements: &'ast [ArrayElement]) {
    for element in elements {
        match element {
            ArrayElement::Expression(expression) | ArrayElement::Spread(expression) => {
                visitor.visit_expression(expression)
            }
        }
    }
}

fn walk_property_key<'ast, V: Visitor<'ast>>(visitor: &mut V, key: &'ast PropertyKey) {
    if let PropertyKey::Computed(expression) = key {
        visitor.visit_expression(expression);
    }
}

pub fn walk_pattern<'ast, V: Visitor<'ast>>(visitor: &mut V, pattern: &'ast Pattern) {
    match &pattern.kind {
        PatternKind::Identifier(identifier) => visitor.visit_identifier(identifier),
        PatternKind::Array(elements) => {
            for element in elements.iter().flatten() {
                visitor.visit_pattern(element);
            }
        }
        PatternKind::Object(properties) => {
            for property in properties {
                match property {
                    ObjectPatternProperty::KeyValue { key, value } => {
                        walk_property_key(visitor, key);
                        visitor.visit_pattern(value);
                    }
                    ObjectPatternProperty::Rest(pattern) => visitor.visit_pattern(pattern),
                }
            }
        }
        PatternKind::Assignment { target, default } => {
            visitor.visit_pattern(target);
            visitor.visit_expression(default);
        }
        PatternKind::Rest(pattern) => visitor.visit_pattern(pattern),
        PatternKind::Expression(expression) => visitor.visit_expression(expression),
    }
}

pub fn walk_function<'ast, V: Visitor<'ast>>(visitor: &mut V, function: &'ast Function) {
    if let Some(name) = &function.name {
        visitor.visit_identifier(name);
    }

    for param in &function.params {
        visitor.visit_pattern(param);
    }

    match &function.body {
        FunctionBody::Block(statements) => {
            for statement in statements {
                visitor.visit_statement(statement);
            }
        }
        FunctionBody::Expression(expression) => visitor.visit_expression(expression),
    }
}

pub fn walk_class<'ast, V: Visitor<'ast>>(visitor: &mut V, class: &'ast Class) {
    if let Some(name) = &class.name {
        visitor.visit_identifier(name);
    }

    if let Some(super_class) = &class.super_class {
        visitor.visit_expression(super_class);
    }

    for method in &class.methods {
        walk_property_key(visitor, &method.key);
        visitor.visit_function(&method.function);
    }
}

/// In-place counterpart of [`Visitor`]. Only identifiers can be hooked; every
/// other node is walked structurally.
pub trait MutVisitor: Sized {
    fn visit_identifier_mut(&mut self, _identifier: &mut Identifier) {}
}

pub fn walk_statement_mut<V: MutVisitor>(visitor: &mut V, statement: &mut Statement) {
    match &mut statement.kind {
        StatementKind::VariableDeclaration(declaration) => {
            walk_variable_declaration_mut(visitor, declaration)
        }
        StatementKind::FunctionDeclaration(function) => {
            walk_function_mut(visitor, Rc::make_mut(function))
        }
        StatementKind::ClassDeclaration(class) => {
            let class = Rc::make_mut(class);

            if let Some(name) = &mut class.name {
                visitor.visit_identifier_mut(name);
            }
            if let Some(super_class) = &mut class.super_class {
                walk_expression_mut(visitor, super_class);
            }
            for method in &mut class.methods {
                walk_property_key_mut(visitor, &mut method.key);
                walk_function_mut(visitor, Rc::make_mut(&mut method.function));
            }
        }
        StatementKind::Return(value) => {
            if let Some(value) = value {
                walk_expression_mut(visitor, value);
            }
        }
        StatementKind::If {
            test,
            consequent,
            alternate,
        } => {
            walk_expression_mut(visitor, test);
            walk_statement_mut(visitor, consequent);
            if let Some(alternate) = alternate {
                walk_statement_mut(visitor, alternate);
            }
        }
        StatementKind::While { test, body } | StatementKind::DoWhile { body, test } => {
            walk_expression_mut(visitor, test);
            walk_statement_mut(visitor, body);
        }
        StatementKind::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Declaration(declaration)) => {
                    walk_variable_declaration_mut(visitor, declaration)
                }
                Some(ForInit::Expression(expression)) => walk_expression_mut(visitor, expression),
                None => {}
            }
            if let Some(test) = test {
                walk_expression_mut(visitor, test);
            }
            if let Some(update) = update {
                walk_expression_mut(visitor, update);
            }
            walk_statement_mut(visitor, body);
        }
        StatementKind::ForEach {
            left, right, body, ..
        } => {
            match left {
                ForInit::Declaration(declaration) => {
                    walk_variable_declaration_mut(visitor, declaration)
                }
                ForInit::Expression(expression) => walk_expression_mut(visitor, expression),
            }
            walk_expression_mut(visitor, right);
            walk_statement_mut(visitor, body);
        }
        StatementKind::Block(statements) => {
            for statement in statements {
                walk_statement_mut(visitor, statement);
            }
        }
        StatementKind::Throw(expression) | StatementKind::Expression(expression) => {
            walk_expression_mut(visitor, expression)
        }
        StatementKind::Import(import) => {
            for specifier in &mut import.specifiers {
                visitor.visit_identifier_mut(&mut specifier.local);
            }
        }
        StatementKind::Export(export) => match export {
            ExportDeclaration::Named { specifiers, source } => {
                if source.is_none() {
                    for specifier in specifiers {
                        visitor.visit_identifier_mut(&mut specifier.local);
                    }
                }
            }
            ExportDeclaration::Declaration(statement) => walk_statement_mut(visitor, statement),
            ExportDeclaration::Default(expression) => walk_expression_mut(visitor, expression),
        },
        StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Empty => {}
    }
}

fn walk_variable_declaration_mut<V: MutVisitor>(
    visitor: &mut V,
    declaration: &mut VariableDeclaration,
) {
    for declarator in &mut declaration.declarators {
        walk_pattern_mut(visitor, &mut declarator.target);
        if let Some(init) = &mut declarator.init {
            walk_expression_mut(visitor, init);
        }
    }
}

pub fn walk_expression_mut<V: MutVisitor>(visitor: &mut V, expression: &mut Expression) {
    match &mut expression.kind {
        ExpressionKind::Identifier(identifier) => visitor.visit_identifier_mut(identifier),
        ExpressionKind::Literal(_) | ExpressionKind::This => {}
        ExpressionKind::Array(elements) => walk_elements_mut(visitor, elements),
        ExpressionKind::Object(properties) => {
            for property in properties {
                match property {
                    Property::KeyValue {
                        key,
                        value,
                        shorthand,
                    } => {
                        walk_property_key_mut(visitor, key);
                        walk_expression_mut(visitor, value);

                        // A renamed shorthand `{ x }` has to become `{ x: x_1 }`
                        if *shorthand
                            && !matches!((&*key, &value.kind), (PropertyKey::Identifier(k), ExpressionKind::Identifier(v)) if *k == v.symbol)
                        {
                            *shorthand = false;
                        }
                    }
                    Property::Method { key, function } => {
                        walk_property_key_mut(visitor, key);
                        walk_function_mut(visitor, Rc::make_mut(function));
                    }
                    Property::Spread(expression) => walk_expression_mut(visitor, expression),
                }
            }
        }
        ExpressionKind::Function(function) => walk_function_mut(visitor, Rc::make_mut(function)),
        ExpressionKind::Unary { argument, .. } | ExpressionKind::Update { argument, .. } => {
            walk_expression_mut(visitor, argument)
        }
        ExpressionKind::Binary { left, right, .. } | ExpressionKind::Logical { left, right, .. } => {
            walk_expression_mut(visitor, left);
            walk_expression_mut(visitor, right);
        }
        ExpressionKind::Assignment { target, value, .. } => {
            walk_pattern_mut(visitor, target);
            walk_expression_mut(visitor, value);
        }
        ExpressionKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            walk_expression_mut(visitor, test);
            walk_expression_mut(visitor, consequent);
            walk_expression_mut(visitor, alternate);
        }
        ExpressionKind::Call { callee, arguments } | ExpressionKind::New { callee, arguments } => {
            walk_expression_mut(visitor, callee);
            walk_elements_mut(visitor, arguments);
        }
        ExpressionKind::Member { object, property } => {
            walk_expression_mut(visitor, object);
            if let MemberProperty::Computed(property) = property {
                walk_expression_mut(visitor, property);
            }
        }
        ExpressionKind::Sequence(expressions) => {
            for expression in expressions {
                walk_expression_mut(visitor, expression);
            }
        }
    }
}

fn walk_elements_mut<V: MutVisitor>(visitor: &mut V, elements: &mut [ArrayElement]) {
    for element in elements {
        match element {
            ArrayElement::Expression(expression) | ArrayElement::Spread(expression) => {
                walk_expression_mut(visitor, expression)
            }
        }
    }
}

fn walk_property_key_mut<V: MutVisitor>(visitor: &mut V, key: &mut PropertyKey) {
    if let PropertyKey::Computed(expression) = key {
        walk_expression_mut(visitor, expression);
    }
}

pub fn walk_pattern_mut<V: MutVisitor>(visitor: &mut V, pattern: &mut Pattern) {
    match &mut pattern.kind {
        PatternKind::Identifier(identifier) => visitor.visit_identifier_mut(identifier),
        PatternKind::Array(elements) => {
            for element in elements.iter_mut().flatten() {
                walk_pattern_mut(visitor, element);
            }
        }
        PatternKind::Object(properties) => {
            for property in properties {
                match property {
                    ObjectPatternProperty::KeyValue { key, value } => {
                        walk_property_key_mut(visitor, key);
                        walk_pattern_mut(visitor, value);
                    }
                    ObjectPatternProperty::Rest(pattern) => walk_pattern_mut(visitor, pattern),
                }
            }
        }
        PatternKind::Assignment { target, default } => {
            walk_pattern_mut(visitor, target);
            walk_expression_mut(visitor, default);
        }
        PatternKind::Rest(pattern) => walk_pattern_mut(visitor, pattern),
        PatternKind::Expression(expression) => walk_expression_mut(visitor, expression),
    }
}

pub fn walk_function_mut<V: MutVisitor>(visitor: &mut V, function: &mut Function) {
    if let Some(name) = &mut function.name {
        visitor.visit_identifier_mut(name);
    }

    for param in &mut function.params {
        walk_pattern_mut(visitor, param);
    }

    match &mut function.body {
        FunctionBody::Block(statements) => {
            for statement in statements {
                walk_statement_mut(visitor, statement);
            }
        }
        FunctionBody::Expression(expression) => walk_expression_mut(visitor, expression),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{SourceFile, intern::InternedSymbol, parser::Parser};

    #[derive(Default)]
    struct Names(Vec<&'static str>);

    impl<'ast> Visitor<'ast> for Names {
        fn visit_identifier(&mut self, identifier: &'ast Identifier) {
            self.0.push(identifier.symbol.value());
        }
    }

    #[test]
    fn visits_identifiers_but_not_static_property_names() {
        let source = SourceFile::from_memory("class A { m(p) { return q.r + p; } }");
        let module = Parser::parse_module(&source).unwrap();

        let mut names = Names::default();
        for statement in &module.body {
            names.visit_statement(statement);
        }

        assert_eq!(names.0, vec!["A", "p", "q", "p"]);
    }

    struct Rename;

    impl MutVisitor for Rename {
        fn visit_identifier_mut(&mut self, identifier: &mut Identifier) {
            if identifier.symbol.value() == "x" {
                identifier.symbol = InternedSymbol::new("x_1");
            }
        }
    }

    #[test]
    fn renaming_expands_shorthand_properties() {
        let source = SourceFile::from_memory("f({ x, y });");
        let mut module = Parser::parse_module(&source).unwrap();

        walk_statement_mut(&mut Rename, &mut module.body[0]);

        let StatementKind::Expression(call) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExpressionKind::Call { arguments, .. } = &call.kind else {
            panic!("expected call");
        };
        let ArrayElement::Expression(object) = &arguments[0] else {
            panic!("expected object argument");
        };
        let ExpressionKind::Object(properties) = &object.kind else {
            panic!("expected object");
        };

        assert!(matches!(&properties[0], Property::KeyValue { shorthand: false, .. }));
        assert!(matches!(&properties[1], Property::KeyValue { shorthand: true, .. }));
    }
}
