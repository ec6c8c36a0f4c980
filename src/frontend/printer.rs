//! Renders a syntax tree back into source text. Parentheses are derived from
//! operator precedence so synthesized trees don't need explicit grouping.

use std::fmt::Write;

use itertools::Itertools;

use super::ast::{
    ArrayElement, BinaryOperator, Class, ExportDeclaration, Expression, ExpressionKind, ForInit,
    Function, FunctionBody, ImportDeclaration, ImportSpecifierKind, Literal, LogicalOperator,
    MemberProperty, Module, ObjectPatternProperty, Pattern, PatternKind, Property, PropertyKey,
    Statement, StatementKind, UnaryOperator, VariableDeclaration,
};

const INDENT: &str = "  ";

/* Binding powers for parenthesization, higher binds tighter */
const SEQUENCE: u8 = 1;
const ASSIGNMENT: u8 = 2;
const CONDITIONAL_TEST: u8 = 3;
const UNARY: u8 = 15;
const POSTFIX: u8 = 16;
const CALL: u8 = 17;
const PRIMARY: u8 = 18;

#[derive(Debug, Default)]
pub struct Printer {
    output: String,
    indent: usize,
}

impl Printer {
    pub fn print_module(module: &Module) -> String {
        Self::print_statements(&module.body)
    }

    pub fn print_statements(statements: &[Statement]) -> String {
        let mut printer = Self::default();

        for statement in statements {
            printer.print_statement(statement);
        }

        printer.output
    }

    pub fn print_expression(expression: &Expression) -> String {
        Self::default().expression(expression, SEQUENCE)
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.output.push_str(INDENT);
        }

        self.output.push_str(text);
        self.output.push('\n');
    }

    fn print_statement(&mut self, statement: &Statement) {
        let text = self.statement(statement);
        self.line(&text);
    }

    /// Renders a statement without leading indentation or trailing newline.
    /// Nested lines are indented relative to the current level.
    fn statement(&mut self, statement: &Statement) -> String {
        match &statement.kind {
            StatementKind::VariableDeclaration(declaration) => {
                format!("{};", self.variable_declaration(declaration))
            }
            StatementKind::FunctionDeclaration(function) => self.function(function, true),
            StatementKind::ClassDeclaration(class) => self.class(class),
            StatementKind::Return(None) => "return;".to_owned(),
            StatementKind::Return(Some(value)) => {
                format!("return {};", self.expression(value, SEQUENCE))
            }
            StatementKind::If {
                test,
                consequent,
                alternate,
            } => {
                let mut text = format!(
                    "if ({}){}",
                    self.expression(test, SEQUENCE),
                    self.body(consequent)
                );

                if let Some(alternate) = alternate {
                    if matches!(alternate.kind, StatementKind::If { .. }) {
                        let _ = write!(text, " else {}", self.statement(alternate));
                    } else {
                        let _ = write!(text, " else{}", self.body(alternate));
                    }
                }

                text
            }
            StatementKind::While { test, body } => {
                format!("while ({}){}", self.expression(test, SEQUENCE), self.body(body))
            }
            StatementKind::DoWhile { body, test } => {
                format!(
                    "do{} while ({});",
                    self.body(body),
                    self.expression(test, SEQUENCE)
                )
            }
            StatementKind::For {
                init,
                test,
                update,
                body,
            } => {
                let init = init
                    .as_ref()
                    .map(|init| self.for_init(init))
                    .unwrap_or_default();
                let test = test
                    .as_ref()
                    .map(|test| format!(" {}", self.expression(test, SEQUENCE)))
                    .unwrap_or_default();
                let update = update
                    .as_ref()
                    .map(|update| format!(" {}", self.expression(update, SEQUENCE)))
                    .unwrap_or_default();

                format!("for ({init};{test};{update}){}", self.body(body))
            }
            StatementKind::ForEach {
                left,
                is_of,
                right,
                body,
            } => format!(
                "for ({} {} {}){}",
                self.for_init(left),
                if *is_of { "of" } else { "in" },
                self.expression(right, ASSIGNMENT),
                self.body(body)
            ),
            StatementKind::Block(statements) => self.block(statements),
            StatementKind::Break(None) => "break;".to_owned(),
            StatementKind::Break(Some(label)) => format!("break {};", label.symbol),
            StatementKind::Continue(None) => "continue;".to_owned(),
            StatementKind::Continue(Some(label)) => format!("continue {};", label.symbol),
            StatementKind::Throw(value) => format!("throw {};", self.expression(value, SEQUENCE)),
            StatementKind::Expression(expression) => {
                let text = self.expression(expression, SEQUENCE);

                // These would be parsed as declarations or blocks
                if text.starts_with('{') || text.starts_with("function") || text.starts_with("class")
                {
                    format!("({text});")
                } else {
                    format!("{text};")
                }
            }
            StatementKind::Import(import) => self.import(import),
            StatementKind::Export(export) => self.export(export),
            StatementKind::Empty => ";".to_owned(),
        }
    }

    /// Body of a control statement, including the separating whitespace
    fn body(&mut self, statement: &Statement) -> String {
        if let StatementKind::Block(statements) = &statement.kind {
            return format!(" {}", self.block(statements));
        }

        self.indent += 1;
        let text = self.statement(statement);
        self.indent -= 1;

        format!("\n{}{}", INDENT.repeat(self.indent + 1), text)
    }

    fn block(&mut self, statements: &[Statement]) -> String {
        if statements.is_empty() {
            return "{}".to_owned();
        }

        let mut nested = Printer {
            output: String::new(),
            indent: self.indent + 1,
        };

        for statement in statements {
            nested.print_statement(statement);
        }

        format!("{{\n{}{}}}", nested.output, INDENT.repeat(self.indent))
    }

    fn for_init(&mut self, init: &ForInit) -> String {
        match init {
            ForInit::Declaration(declaration) => self.variable_declaration(declaration),
            ForInit::Expression(expression) => self.expression(expression, SEQUENCE),
        }
    }

    fn variable_declaration(&mut self, declaration: &VariableDeclaration) -> String {
        let declarators = declaration
            .declarators
            .iter()
            .map(|declarator| match &declarator.init {
                Some(init) => format!(
                    "{} = {}",
                    self.pattern(&declarator.target),
                    self.expression(init, ASSIGNMENT)
                ),
                None => self.pattern(&declarator.target),
            })
            .join(", ");

        format!("{} {declarators}", declaration.kind.as_ref())
    }

    fn function(&mut self, function: &Function, declaration: bool) -> String {
        let params = function.params.iter().map(|p| self.pattern(p)).join(", ");

        if function.is_arrow {
            let body = match &function.body {
                FunctionBody::Block(statements) => self.block(statements),
                FunctionBody::Expression(expression) => {
                    let text = self.expression(expression, ASSIGNMENT);
                    if text.starts_with('{') {
                        format!("({text})")
                    } else {
                        text
                    }
                }
            };

            return format!("({params}) => {body}");
        }

        let body = match &function.body {
            FunctionBody::Block(statements) => self.block(statements),
            FunctionBody::Expression(expression) => {
                format!("{{ return {}; }}", self.expression(expression, SEQUENCE))
            }
        };

        match (&function.name, declaration) {
            (Some(name), _) => format!("function {}({params}) {body}", name.symbol),
            (None, _) => format!("function({params}) {body}"),
        }
    }

    fn method(&mut self, key: &PropertyKey, function: &Function) -> String {
        let key = self.property_key(key);
        let params = function.params.iter().map(|p| self.pattern(p)).join(", ");
        let body = match &function.body {
            FunctionBody::Block(statements) => self.block(statements),
            FunctionBody::Expression(expression) => {
                format!("{{ return {}; }}", self.expression(expression, SEQUENCE))
            }
        };

        format!("{key}({params}) {body}")
    }

    fn class(&mut self, class: &Class) -> String {
        let mut text = "class".to_owned();

        if let Some(name) = &class.name {
            let _ = write!(text, " {}", name.symbol);
        }

        if let Some(super_class) = &class.super_class {
            let _ = write!(text, " extends {}", self.expression(super_class, CALL));
        }

        if class.methods.is_empty() {
            return format!("{text} {{}}");
        }

        self.indent += 1;
        let methods = class
            .methods
            .iter()
            .map(|method| {
                let prefix = if method.is_static { "static " } else { "" };
                format!(
                    "{}{prefix}{}",
                    INDENT.repeat(self.indent),
                    self.method(&method.key, &method.function)
                )
            })
            .collect::<Vec<_>>();
        self.indent -= 1;

        format!(
            "{text} {{\n{}\n{}}}",
            methods.join("\n"),
            INDENT.repeat(self.indent)
        )
    }

    fn import(&mut self, import: &ImportDeclaration) -> String {
        let source = quote_string(&import.source);

        if import.specifiers.is_empty() {
            return format!("import {source};");
        }

        let mut parts = Vec::new();
        let mut named = Vec::new();

        for specifier in &import.specifiers {
            match &specifier.kind {
                ImportSpecifierKind::Default => parts.push(specifier.local.symbol.to_string()),
                ImportSpecifierKind::Namespace => {
                    parts.push(format!("* as {}", specifier.local.symbol))
                }
                ImportSpecifierKind::Named { imported } if *imported == specifier.local.symbol => {
                    named.push(imported.to_string())
                }
                ImportSpecifierKind::Named { imported } => {
                    named.push(format!("{imported} as {}", specifier.local.symbol))
                }
            }
        }

        if !named.is_empty() {
            parts.push(format!("{{ {} }}", named.join(", ")));
        }

        format!("import {} from {source};", parts.join(", "))
    }

    fn export(&mut self, export: &ExportDeclaration) -> String {
        match export {
            ExportDeclaration::Named { specifiers, source } => {
                let specifiers = specifiers
                    .iter()
                    .map(|specifier| {
                        if specifier.local.symbol == specifier.exported {
                            specifier.local.symbol.to_string()
                        } else {
                            format!("{} as {}", specifier.local.symbol, specifier.exported)
                        }
                    })
                    .join(", ");

                let specifiers = if specifiers.is_empty() {
                    "{}".to_owned()
                } else {
                    format!("{{ {specifiers} }}")
                };

                match source {
                    Some(source) => format!("export {specifiers} from {};", quote_string(source)),
                    None => format!("export {specifiers};"),
                }
            }
            ExportDeclaration::Declaration(statement) => {
                format!("export {}", self.statement(statement))
            }
            ExportDeclaration::Default(expression) => match &expression.kind {
                ExpressionKind::Function(function) if !function.is_arrow => {
                    format!("export default {}", self.function(function, true))
                }
                _ => format!("export default {};", self.expression(expression, ASSIGNMENT)),
            },
        }
    }

    fn pattern(&mut self, pattern: &Pattern) -> String {
        match &pattern.kind {
            PatternKind::Identifier(identifier) => identifier.symbol.to_string(),
            PatternKind::Array(elements) => {
                let mut text = elements
                    .iter()
                    .map(|element| match element {
                        Some(element) => self.pattern(element),
                        None => String::new(),
                    })
                    .join(", ");

                // A trailing hole needs an explicit comma
                if elements.last().is_some_and(|e| e.is_none()) {
                    text.push(',');
                }

                format!("[{text}]")
            }
            PatternKind::Object(properties) => {
                if properties.is_empty() {
                    return "{}".to_owned();
                }

                let properties = properties
                    .iter()
                    .map(|property| match property {
                        ObjectPatternProperty::KeyValue { key, value } => {
                            if let PropertyKey::Identifier(name) = key {
                                match &value.kind {
                                    PatternKind::Identifier(identifier)
                                        if identifier.symbol == *name =>
                                    {
                                        return name.to_string();
                                    }
                                    PatternKind::Assignment { target, default } => {
                                        if let PatternKind::Identifier(identifier) = &target.kind {
                                            if identifier.symbol == *name {
                                                return format!(
                                                    "{name} = {}",
                                                    self.expression(default, ASSIGNMENT)
                                                );
                                            }
                                        }
                                    }
                                    _ => {}
                                }
                            }

                            format!("{}: {}", self.property_key(key), self.pattern(value))
                        }
                        ObjectPatternProperty::Rest(pattern) => {
                            format!("...{}", self.pattern(pattern))
                        }
                    })
                    .join(", ");

                format!("{{ {properties} }}")
            }
            PatternKind::Assignment { target, default } => {
                format!(
                    "{} = {}",
                    self.pattern(target),
                    self.expression(default, ASSIGNMENT)
                )
            }
            PatternKind::Rest(pattern) => format!("...{}", self.pattern(pattern)),
            PatternKind::Expression(expression) => self.expression(expression, CALL),
        }
    }

    fn property_key(&mut self, key: &PropertyKey) -> String {
        match key {
            PropertyKey::Identifier(name) => name.to_string(),
            PropertyKey::String(value) => quote_string(value),
            PropertyKey::Number(value) => format_number(*value),
            PropertyKey::Computed(expression) => {
                format!("[{}]", self.expression(expression, ASSIGNMENT))
            }
        }
    }

    fn elements(&mut self, elements: &[ArrayElement]) -> String {
        elements
            .iter()
            .map(|element| match element {
                ArrayElement::Expression(expression) => self.expression(expression, ASSIGNMENT),
                ArrayElement::Spread(expression) => {
                    format!("...{}", self.expression(expression, ASSIGNMENT))
                }
            })
            .join(", ")
    }

    /// Renders an expression, parenthesizing it when it binds looser than
    /// `min_precedence`
    fn expression(&mut self, expression: &Expression, min_precedence: u8) -> String {
        let (text, precedence) = self.expression_inner(expression);

        if precedence < min_precedence {
            format!("({text})")
        } else {
            text
        }
    }

    fn expression_inner(&mut self, expression: &Expression) -> (String, u8) {
        match &expression.kind {
            ExpressionKind::Identifier(identifier) => (identifier.symbol.to_string(), PRIMARY),
            ExpressionKind::Literal(literal) => match literal {
                Literal::Number(value) if value.is_sign_negative() && *value != 0.0 => {
                    (format_number(*value), UNARY)
                }
                Literal::Number(value) => (format_number(*value), PRIMARY),
                Literal::String(value) => (quote_string(value), PRIMARY),
                Literal::Boolean(value) => (value.to_string(), PRIMARY),
                Literal::Null => ("null".to_owned(), PRIMARY),
            },
            ExpressionKind::Array(elements) => (format!("[{}]", self.elements(elements)), PRIMARY),
            ExpressionKind::Object(properties) => {
                if properties.is_empty() {
                    return ("{}".to_owned(), PRIMARY);
                }

                let properties = properties
                    .iter()
                    .map(|property| match property {
                        Property::KeyValue {
                            key,
                            value,
                            shorthand,
                        } => {
                            if *shorthand {
                                if let (PropertyKey::Identifier(name), ExpressionKind::Identifier(v)) =
                                    (key, &value.kind)
                                {
                                    if *name == v.symbol {
                                        return name.to_string();
                                    }
                                }
                            }

                            format!(
                                "{}: {}",
                                self.property_key(key),
                                self.expression(value, ASSIGNMENT)
                            )
                        }
                        Property::Method { key, function } => self.method(key, function),
                        Property::Spread(expression) => {
                            format!("...{}", self.expression(expression, ASSIGNMENT))
                        }
                    })
                    .join(", ");

                (format!("{{ {properties} }}"), PRIMARY)
            }
            ExpressionKind::Function(function) => {
                let precedence = if function.is_arrow { ASSIGNMENT } else { PRIMARY };
                (self.function(function, false), precedence)
            }
            ExpressionKind::Unary { operator, argument } => {
                let argument_text = self.expression(argument, UNARY);

                let text = if operator.is_keyword() {
                    format!("{} {argument_text}", operator.as_ref())
                } else if matches!(operator, UnaryOperator::Minus | UnaryOperator::Plus)
                    && argument_text.starts_with(operator.as_ref())
                {
                    // `- -x` must not turn into `--x`
                    format!("{} {argument_text}", operator.as_ref())
                } else {
                    format!("{}{argument_text}", operator.as_ref())
                };

                (text, UNARY)
            }
            ExpressionKind::Update {
                operator,
                prefix,
                argument,
            } => {
                if *prefix {
                    let argument = self.expression(argument, UNARY);
                    (format!("{}{argument}", operator.as_ref()), UNARY)
                } else {
                    let argument = self.expression(argument, POSTFIX + 1);
                    (format!("{argument}{}", operator.as_ref()), POSTFIX)
                }
            }
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => {
                let precedence = operator.precedence();
                let (left_min, right_min) = if operator.is_right_associative() {
                    (precedence + 1, precedence)
                } else {
                    (precedence, precedence + 1)
                };

                // `-a ** b` is a syntax error, the operand must be grouped
                let left_min = if *operator == BinaryOperator::Exponent {
                    left_min.max(POSTFIX)
                } else {
                    left_min
                };

                let left = self.expression(left, left_min);
                let right = self.expression(right, right_min);

                (format!("{left} {} {right}", operator.as_ref()), precedence)
            }
            ExpressionKind::Logical {
                operator,
                left,
                right,
            } => {
                let precedence = operator.precedence();
                let left = self.logical_operand(*operator, left, precedence);
                let right = self.logical_operand(*operator, right, precedence + 1);

                (format!("{left} {} {right}", operator.as_ref()), precedence)
            }
            ExpressionKind::Assignment {
                operator,
                target,
                value,
            } => {
                let target = self.pattern(target);
                let value = self.expression(value, ASSIGNMENT);

                (format!("{target} {} {value}", operator.as_ref()), ASSIGNMENT)
            }
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.expression(test, CONDITIONAL_TEST);
                let consequent = self.expression(consequent, ASSIGNMENT);
                let alternate = self.expression(alternate, ASSIGNMENT);

                (format!("{test} ? {consequent} : {alternate}"), ASSIGNMENT)
            }
            ExpressionKind::Call { callee, arguments } => {
                let callee = self.expression(callee, CALL);
                let arguments = self.elements(arguments);

                (format!("{callee}({arguments})"), CALL)
            }
            ExpressionKind::New { callee, arguments } => {
                let callee_text = if matches!(callee.kind, ExpressionKind::Call { .. }) {
                    format!("({})", self.expression(callee, SEQUENCE))
                } else {
                    self.expression(callee, CALL)
                };
                let arguments = self.elements(arguments);

                (format!("new {callee_text}({arguments})"), CALL)
            }
            ExpressionKind::Member { object, property } => {
                let object_text = if matches!(object.kind, ExpressionKind::Literal(Literal::Number(_)))
                {
                    format!("({})", self.expression(object, SEQUENCE))
                } else {
                    self.expression(object, CALL)
                };

                let text = match property {
                    MemberProperty::Static(name) => format!("{object_text}.{name}"),
                    MemberProperty::Computed(property) => {
                        format!("{object_text}[{}]", self.expression(property, SEQUENCE))
                    }
                };

                (text, CALL)
            }
            ExpressionKind::Sequence(expressions) => (
                expressions
                    .iter()
                    .map(|e| self.expression(e, ASSIGNMENT))
                    .join(", "),
                SEQUENCE,
            ),
            ExpressionKind::This => ("this".to_owned(), PRIMARY),
        }
    }

    /// `??` can't be mixed with `&&`/`||` without explicit grouping
    fn logical_operand(
        &mut self,
        operator: LogicalOperator,
        operand: &Expression,
        min_precedence: u8,
    ) -> String {
        if let ExpressionKind::Logical {
            operator: inner, ..
        } = &operand.kind
        {
            let mixes_nullish = (operator == LogicalOperator::NullishCoalescing)
                != (*inner == LogicalOperator::NullishCoalescing);

            if mixes_nullish {
                return format!("({})", self.expression(operand, SEQUENCE));
            }
        }

        self.expression(operand, min_precedence)
    }
}

/// Formats a number the way JavaScript's `Number.prototype.toString` would for
/// the common cases
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }

    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }

    if value == 0.0 {
        return "0".to_owned();
    }

    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{}", value as i128);
    }

    format!("{value}")
}

pub fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');

    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(quoted, "\\u{:04x}", c as u32);
            }
            c => quoted.push(c),
        }
    }

    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    fn round_trip(source: &str) -> String {
        let module = Parser::parse_module(&SourceFile::from_memory(source)).unwrap();
        Printer::print_module(&module)
    }

    #[test]
    fn prints_control_flow_with_two_space_indent() {
        let source = indoc! {"
            function f(a, b = 2) {
              let x = a;
              if (x > b) {
                x = b;
              } else if (x < 0) {
                x = 0;
              } else {
                x++;
              }
              while (x < 10) {
                x += 1;
              }
              return x;
            }
        "};

        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn parenthesizes_by_precedence() {
        assert_eq!(round_trip("(a + b) * c;"), "(a + b) * c;\n");
        assert_eq!(round_trip("a + (b * c);"), "a + b * c;\n");
        assert_eq!(round_trip("a - (b - c);"), "a - (b - c);\n");
        assert_eq!(round_trip("(a ** b) ** c;"), "(a ** b) ** c;\n");
        assert_eq!(round_trip("(-a) ** b;"), "(-a) ** b;\n");
        assert_eq!(round_trip("(a ?? b) || c;"), "(a ?? b) || c;\n");
        assert_eq!(round_trip("(a, b);"), "a, b;\n");
        assert_eq!(round_trip("f((a, b));"), "f((a, b));\n");
        assert_eq!(round_trip("- -a;"), "- -a;\n");
    }

    #[test]
    fn statement_level_object_and_function_expressions_are_wrapped() {
        assert_eq!(round_trip("({ a: 1 });"), "({ a: 1 });\n");
        assert_eq!(
            round_trip("(function () {})();"),
            "(function() {}());\n"
        );
        assert_eq!(round_trip("f(() => ({ a }));"), "f(() => ({ a }));\n");
    }

    #[test]
    fn modules_and_classes() {
        let source = indoc! {r#"
            import def, { a, b as c } from "./dep";
            export const K = 1;
            export { K as default, c };
            class A extends B {
              m(x) {
                return x;
              }
              static s() {}
            }
        "#};

        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(quote_string("a\"b\n"), "\"a\\\"b\\n\"");
    }
}
