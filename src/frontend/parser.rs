use std::{rc::Rc, str::FromStr};

use super::{
    ast::{
        ArrayElement, AssignmentOperator, BinaryOperator, Class, ClassMethod, ExportDeclaration,
        ExportSpecifier, Expression, ExpressionKind, ForInit, Function, FunctionBody, Identifier,
        ImportDeclaration, ImportSpecifier, ImportSpecifierKind, Literal, LogicalOperator,
        MemberProperty, Module, NodeId, ObjectPatternProperty, Pattern, PatternKind, Property,
        PropertyKey, Statement, StatementKind, UnaryOperator, UpdateOperator, VariableDeclaration,
        VariableDeclarator, VariableKind,
    },
    intern::InternedSymbol,
    lexer::{Keyword, Lexer, Span, Token, TokenKind, decode_string_literal, parse_number_literal},
};
use crate::{
    SourceFile,
    error::{CompileError, Result},
};

/// Recursive descent parser over the fully lexed token stream
#[derive(Debug)]
pub struct Parser<'source> {
    source: &'source SourceFile,
    tokens: Vec<Token>,
    position: usize,
    last_end: usize,
    next_node_id: u32,
    /// Set while parsing the head of a `for` statement so `in` isn't taken as
    /// a binary operator
    no_in: bool,
}

impl<'source> Parser<'source> {
    pub fn parse_module(source_file: &'source SourceFile) -> Result<Module> {
        let mut parser = Self {
            source: source_file,
            tokens: Lexer::tokenize(source_file)?,
            position: 0,
            last_end: 0,
            next_node_id: 0,
            no_in: false,
        };

        let mut body = Vec::new();

        while parser.peek().is_some() {
            body.push(parser.parse_statement()?);
        }

        Ok(Module {
            span: Span::new(0, source_file.contents.len()),
            body,
        })
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /* Token stream helpers */

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.position).copied()
    }

    fn peek_nth(&self, n: usize) -> Option<Token> {
        self.tokens.get(self.position + n).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.position += 1;
        self.last_end = token.span.end;
        Some(token)
    }

    fn text(&self, token: Token) -> &'source str {
        self.source.value_of_span(token.span)
    }

    fn start(&self) -> usize {
        self.peek()
            .map(|t| t.span.start)
            .unwrap_or(self.source.contents.len())
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.last_end.max(start))
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> CompileError {
        let (line, column) = self.source.line_and_column(position);

        CompileError::Syntax {
            message: message.into(),
            origin: self.source.origin.to_string(),
            line,
            column,
        }
    }

    fn unexpected(&self, expecting: &str) -> CompileError {
        match self.peek() {
            Some(token) => self.error_at(
                token.span.start,
                format!("expected {expecting} but found `{}`", self.text(token)),
            ),
            None => self.error_at(
                self.source.contents.len(),
                format!("expected {expecting} but reached end of file"),
            ),
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.check(TokenKind::Keyword(keyword))
    }

    fn check_operator(&self, operator: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Operator && self.text(t) == operator)
    }

    fn check_contextual(&self, word: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Identifier && self.text(t) == word)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.next();
            return true;
        }

        false
    }

    fn expect(&mut self, kind: TokenKind, expecting: &str) -> Result<Token> {
        if self.check(kind) {
            // `check` guarantees there is a token
            return self.next().ok_or_else(|| self.unexpected(expecting));
        }

        Err(self.unexpected(expecting))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token> {
        self.expect(TokenKind::Keyword(keyword), keyword.as_ref())
    }

    /// Consumes a statement terminator, applying automatic semicolon insertion
    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat(TokenKind::Semicolon) {
            return Ok(());
        }

        match self.peek() {
            None => Ok(()),
            Some(token) if token.kind == TokenKind::CloseBrace || token.newline_before => Ok(()),
            Some(_) => Err(self.unexpected("`;`")),
        }
    }

    fn at_statement_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(token) => {
                matches!(token.kind, TokenKind::Semicolon | TokenKind::CloseBrace)
                    || token.newline_before
            }
        }
    }

    /* Statements */

    fn statement(&mut self, start: usize, kind: StatementKind) -> Statement {
        Statement {
            id: self.create_node_id(),
            span: self.span_from(start),
            kind,
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.start();
        let Some(peeked) = self.peek() else {
            return Err(self.unexpected("statement"));
        };

        let kind = match peeked.kind {
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) => {
                let declaration = self.parse_variable_declaration()?;
                self.consume_semicolon()?;
                StatementKind::VariableDeclaration(declaration)
            }
            TokenKind::Keyword(Keyword::Function) => {
                StatementKind::FunctionDeclaration(Rc::new(self.parse_function(true)?))
            }
            TokenKind::Keyword(Keyword::Class) => {
                StatementKind::ClassDeclaration(Rc::new(self.parse_class()?))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.next();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                StatementKind::Return(value)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => {
                self.next();
                let test = self.parse_parenthesized()?;
                let body = Box::new(self.parse_statement()?);
                StatementKind::While { test, body }
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.next();
                let body = Box::new(self.parse_statement()?);
                self.expect_keyword(Keyword::While)?;
                let test = self.parse_parenthesized()?;
                // A semicolon after do-while is always optional
                self.eat(TokenKind::Semicolon);
                StatementKind::DoWhile { body, test }
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for()?,
            TokenKind::OpenBrace => StatementKind::Block(self.parse_block()?),
            TokenKind::Keyword(Keyword::Break | Keyword::Continue) => {
                self.next();
                let label = if self.check(TokenKind::Identifier) && !self.at_statement_end() {
                    Some(self.parse_identifier()?)
                } else {
                    None
                };
                self.consume_semicolon()?;
                if peeked.kind == TokenKind::Keyword(Keyword::Break) {
                    StatementKind::Break(label)
                } else {
                    StatementKind::Continue(label)
                }
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.next();
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                StatementKind::Throw(value)
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import()?,
            TokenKind::Keyword(Keyword::Export) => self.parse_export()?,
            TokenKind::Semicolon => {
                self.next();
                StatementKind::Empty
            }
            _ => {
                let expression = self.parse_expression()?;
                self.consume_semicolon()?;
                StatementKind::Expression(expression)
            }
        };

        Ok(self.statement(start, kind))
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>> {
        self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut statements = Vec::new();

        while !self.check(TokenKind::CloseBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("`}`"));
            }

            statements.push(self.parse_statement()?);
        }

        self.expect(TokenKind::CloseBrace, "`}`")?;

        Ok(statements)
    }

    fn parse_parenthesized(&mut self) -> Result<Expression> {
        self.expect(TokenKind::OpenParen, "`(`")?;
        let expression = self.parse_expression()?;
        self.expect(TokenKind::CloseParen, "`)`")?;
        Ok(expression)
    }

    // if (test) consequent else alternate
    fn parse_if(&mut self) -> Result<StatementKind> {
        self.expect_keyword(Keyword::If)?;

        let test = self.parse_parenthesized()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.check_keyword(Keyword::Else) {
            self.next();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(StatementKind::If {
            test,
            consequent,
            alternate,
        })
    }

    // for (init; test; update) body
    // for (left in|of right) body
    fn parse_for(&mut self) -> Result<StatementKind> {
        self.expect_keyword(Keyword::For)?;
        self.expect(TokenKind::OpenParen, "`(`")?;

        self.no_in = true;
        let init = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Semicolon) => Ok(None),
            Some(TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const)) => self
                .parse_variable_declaration()
                .map(|d| Some(ForInit::Declaration(d))),
            _ => self.parse_expression().map(|e| Some(ForInit::Expression(e))),
        };
        self.no_in = false;
        let init = init?;

        let is_in = self.check_keyword(Keyword::In);

        if is_in || self.check_contextual("of") {
            let Some(left) = init else {
                return Err(self.unexpected("`;`"));
            };

            self.next();
            let right = if is_in {
                self.parse_expression()?
            } else {
                self.parse_assignment()?
            };
            self.expect(TokenKind::CloseParen, "`)`")?;
            let body = Box::new(self.parse_statement()?);

            return Ok(StatementKind::ForEach {
                left,
                is_of: !is_in,
                right,
                body,
            });
        }

        self.expect(TokenKind::Semicolon, "`;`")?;
        let test = (!self.check(TokenKind::Semicolon))
            .then(|| self.parse_expression())
            .transpose()?;
        self.expect(TokenKind::Semicolon, "`;`")?;
        let update = (!self.check(TokenKind::CloseParen))
            .then(|| self.parse_expression())
            .transpose()?;
        self.expect(TokenKind::CloseParen, "`)`")?;

        let body = Box::new(self.parse_statement()?);

        Ok(StatementKind::For {
            init,
            test,
            update,
            body,
        })
    }

    // let a = 1, [b, c] = d
    fn parse_variable_declaration(&mut self) -> Result<VariableDeclaration> {
        let Some(keyword) = self.next() else {
            return Err(self.unexpected("declaration keyword"));
        };

        let kind = VariableKind::from_str(self.text(keyword))
            .map_err(|_| self.error_at(keyword.span.start, "expected `var`, `let` or `const`"))?;

        let mut declarators = Vec::new();

        loop {
            let start = self.start();
            let target = self.parse_binding_target()?;
            self.skip_type_annotation()?;

            let init = if self.check(TokenKind::Assignment) && self.check_assignment("=") {
                self.next();
                Some(self.parse_assignment()?)
            } else {
                None
            };

            declarators.push(VariableDeclarator {
                id: self.create_node_id(),
                span: self.span_from(start),
                target,
                init,
            });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        Ok(VariableDeclaration { kind, declarators })
    }

    fn check_assignment(&self, operator: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Assignment && self.text(t) == operator)
    }

    // function name(params): type { body }
    fn parse_function(&mut self, require_name: bool) -> Result<Function> {
        let start = self.start();
        self.expect_keyword(Keyword::Function)?;

        let name = if self.check(TokenKind::Identifier) {
            Some(self.parse_identifier()?)
        } else if require_name {
            return Err(self.unexpected("function name"));
        } else {
            None
        };

        self.skip_type_parameters()?;
        let params = self.parse_parameters()?;
        self.skip_type_annotation()?;
        let body = self.parse_block()?;

        Ok(Function {
            id: self.create_node_id(),
            span: self.span_from(start),
            name,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
        })
    }

    // (a, [b, c] = d, ...rest)
    fn parse_parameters(&mut self) -> Result<Vec<Pattern>> {
        self.expect(TokenKind::OpenParen, "`(`")?;

        let mut params = Vec::new();

        while !self.check(TokenKind::CloseParen) {
            let start = self.start();

            if self.eat(TokenKind::Ellipsis) {
                let target = self.parse_binding_target()?;
                self.skip_type_annotation()?;
                params.push(self.pattern(start, PatternKind::Rest(Box::new(target))));
            } else {
                let target = self.parse_binding_target()?;
                // Optional parameter marker `x?: T`
                self.eat(TokenKind::Question);
                self.skip_type_annotation()?;
                params.push(self.parse_pattern_default(start, target)?);
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseParen, "`)`")?;

        Ok(params)
    }

    fn pattern(&mut self, start: usize, kind: PatternKind) -> Pattern {
        Pattern {
            id: self.create_node_id(),
            span: self.span_from(start),
            kind,
        }
    }

    fn parse_pattern_default(&mut self, start: usize, target: Pattern) -> Result<Pattern> {
        if !self.check_assignment("=") {
            return Ok(target);
        }

        self.next();
        let default = Box::new(self.parse_assignment()?);

        Ok(self.pattern(
            start,
            PatternKind::Assignment {
                target: Box::new(target),
                default,
            },
        ))
    }

    /// Identifier, array pattern or object pattern in a binding position
    fn parse_binding_target(&mut self) -> Result<Pattern> {
        let start = self.start();

        match self.peek().map(|t| t.kind) {
            Some(TokenKind::Identifier) => {
                let identifier = self.parse_identifier()?;
                Ok(self.pattern(start, PatternKind::Identifier(identifier)))
            }
            Some(TokenKind::OpenBracket) => {
                self.next();
                let mut elements = Vec::new();

                while !self.check(TokenKind::CloseBracket) {
                    if self.eat(TokenKind::Comma) {
                        elements.push(None);
                        continue;
                    }

                    let element_start = self.start();
                    let element = if self.eat(TokenKind::Ellipsis) {
                        let target = self.parse_binding_target()?;
                        self.pattern(element_start, PatternKind::Rest(Box::new(target)))
                    } else {
                        let target = self.parse_binding_target()?;
                        self.parse_pattern_default(element_start, target)?
                    };
                    elements.push(Some(element));

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }

                self.expect(TokenKind::CloseBracket, "`]`")?;
                Ok(self.pattern(start, PatternKind::Array(elements)))
            }
            Some(TokenKind::OpenBrace) => {
                self.next();
                let mut properties = Vec::new();

                while !self.check(TokenKind::CloseBrace) {
                    if self.eat(TokenKind::Ellipsis) {
                        properties.push(ObjectPatternProperty::Rest(self.parse_binding_target()?));
                    } else {
                        let property_start = self.start();
                        let key = self.parse_property_key()?;

                        let value = if self.eat(TokenKind::Colon) {
                            let value_start = self.start();
                            let target = self.parse_binding_target()?;
                            self.parse_pattern_default(value_start, target)?
                        } else {
                            let PropertyKey::Identifier(symbol) = key else {
                                return Err(self.unexpected("`:`"));
                            };
                            let identifier = Identifier {
                                id: self.create_node_id(),
                                span: self.span_from(property_start),
                                symbol,
                            };
                            let target =
                                self.pattern(property_start, PatternKind::Identifier(identifier));
                            self.parse_pattern_default(property_start, target)?
                        };

                        properties.push(ObjectPatternProperty::KeyValue { key, value });
                    }

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }

                self.expect(TokenKind::CloseBrace, "`}`")?;
                Ok(self.pattern(start, PatternKind::Object(properties)))
            }
            _ => Err(self.unexpected("binding pattern")),
        }
    }

    // class Name extends Base { method() {} }
    fn parse_class(&mut self) -> Result<Class> {
        let start = self.start();
        self.expect_keyword(Keyword::Class)?;

        let name = self
            .check(TokenKind::Identifier)
            .then(|| self.parse_identifier())
            .transpose()?;

        let super_class = if self.check_keyword(Keyword::Extends) {
            self.next();
            Some(self.parse_call_member()?)
        } else {
            None
        };

        self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut methods = Vec::new();

        while !self.check(TokenKind::CloseBrace) {
            if self.eat(TokenKind::Semicolon) {
                continue;
            }

            let is_static = self.check_keyword(Keyword::Static)
                && self
                    .peek_nth(1)
                    .is_some_and(|t| t.kind != TokenKind::OpenParen);
            if is_static {
                self.next();
            }

            let method_start = self.start();
            let key = self.parse_property_key()?;

            if !self.check(TokenKind::OpenParen) {
                return Err(self.unexpected("method parameters (class fields are not supported)"));
            }

            let function = self.parse_method(method_start)?;
            methods.push(ClassMethod {
                is_static,
                key,
                function: Rc::new(function),
            });
        }

        self.expect(TokenKind::CloseBrace, "`}`")?;

        Ok(Class {
            id: self.create_node_id(),
            span: self.span_from(start),
            name,
            super_class,
            methods,
        })
    }

    fn parse_method(&mut self, start: usize) -> Result<Function> {
        let params = self.parse_parameters()?;
        self.skip_type_annotation()?;
        let body = self.parse_block()?;

        Ok(Function {
            id: self.create_node_id(),
            span: self.span_from(start),
            name: None,
            params,
            body: FunctionBody::Block(body),
            is_arrow: false,
        })
    }

    // import a, { b as c } from "./module"
    fn parse_import(&mut self) -> Result<StatementKind> {
        self.expect_keyword(Keyword::Import)?;

        let mut specifiers = Vec::new();

        if !self.check(TokenKind::StringLiteral) {
            if self.check(TokenKind::Identifier) {
                let local = self.parse_identifier()?;
                specifiers.push(ImportSpecifier {
                    kind: ImportSpecifierKind::Default,
                    local,
                });
                self.eat(TokenKind::Comma);
            }

            if self.check_operator("*") {
                self.next();
                self.expect_contextual("as")?;
                let local = self.parse_identifier()?;
                specifiers.push(ImportSpecifier {
                    kind: ImportSpecifierKind::Namespace,
                    local,
                });
            } else if self.eat(TokenKind::OpenBrace) {
                while !self.check(TokenKind::CloseBrace) {
                    let imported = self.parse_module_export_name()?;
                    let local = if self.check_contextual("as") {
                        self.next();
                        self.parse_identifier()?
                    } else {
                        Identifier {
                            id: self.create_node_id(),
                            span: self.span_from(self.last_end),
                            symbol: imported,
                        }
                    };

                    specifiers.push(ImportSpecifier {
                        kind: ImportSpecifierKind::Named { imported },
                        local,
                    });

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }

                self.expect(TokenKind::CloseBrace, "`}`")?;
            }

            self.expect_contextual("from")?;
        }

        let source = self.parse_string()?;
        self.consume_semicolon()?;

        Ok(StatementKind::Import(ImportDeclaration { specifiers, source }))
    }

    fn parse_export(&mut self) -> Result<StatementKind> {
        self.expect_keyword(Keyword::Export)?;

        if self.check_keyword(Keyword::Default) {
            self.next();

            let start = self.start();
            let expression = if self.check_keyword(Keyword::Function) {
                let function = self.parse_function(false)?;
                self.expression(start, ExpressionKind::Function(Rc::new(function)))
            } else {
                let expression = self.parse_assignment()?;
                self.consume_semicolon()?;
                expression
            };

            return Ok(StatementKind::Export(ExportDeclaration::Default(expression)));
        }

        if self.eat(TokenKind::OpenBrace) {
            let mut specifiers = Vec::new();

            while !self.check(TokenKind::CloseBrace) {
                let local = self.parse_identifier_or_keyword()?;
                let exported = if self.check_contextual("as") {
                    self.next();
                    self.parse_module_export_name()?
                } else {
                    local.symbol
                };

                specifiers.push(ExportSpecifier { local, exported });

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }

            self.expect(TokenKind::CloseBrace, "`}`")?;

            let source = if self.check_contextual("from") {
                self.next();
                Some(self.parse_string()?)
            } else {
                None
            };

            self.consume_semicolon()?;

            return Ok(StatementKind::Export(ExportDeclaration::Named {
                specifiers,
                source,
            }));
        }

        if self.check_operator("*") {
            return Err(CompileError::unsupported("export * declaration"));
        }

        let declaration = self.parse_statement()?;

        match declaration.kind {
            StatementKind::VariableDeclaration(_)
            | StatementKind::FunctionDeclaration(_)
            | StatementKind::ClassDeclaration(_) => Ok(StatementKind::Export(
                ExportDeclaration::Declaration(Box::new(declaration)),
            )),
            _ => Err(self.error_at(declaration.span.start, "expected declaration after `export`")),
        }
    }

    fn expect_contextual(&mut self, word: &str) -> Result<()> {
        if self.check_contextual(word) {
            self.next();
            return Ok(());
        }

        Err(self.unexpected(&format!("`{word}`")))
    }

    fn parse_string(&mut self) -> Result<String> {
        let token = self.expect(TokenKind::StringLiteral, "string literal")?;
        Ok(decode_string_literal(self.text(token)))
    }

    /// Names in import/export lists may be keywords (`default`) or strings
    fn parse_module_export_name(&mut self) -> Result<InternedSymbol> {
        if self.check(TokenKind::StringLiteral) {
            return Ok(InternedSymbol::new(&self.parse_string()?));
        }

        Ok(self.parse_identifier_or_keyword()?.symbol)
    }

    fn parse_identifier(&mut self) -> Result<Identifier> {
        let token = self.expect(TokenKind::Identifier, "identifier")?;

        Ok(Identifier {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(self.text(token)),
        })
    }

    fn parse_identifier_or_keyword(&mut self) -> Result<Identifier> {
        match self.peek() {
            Some(token) if matches!(token.kind, TokenKind::Identifier | TokenKind::Keyword(_)) => {
                self.next();

                Ok(Identifier {
                    id: self.create_node_id(),
                    span: token.span,
                    symbol: InternedSymbol::new(self.text(token)),
                })
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /* TypeScript annotations are parsed and thrown away */

    fn skip_type_annotation(&mut self) -> Result<()> {
        if self.eat(TokenKind::Colon) {
            self.skip_type()?;
        }

        Ok(())
    }

    fn skip_type_parameters(&mut self) -> Result<()> {
        if self.check_operator("<") {
            self.skip_balanced()?;
        }

        Ok(())
    }

    fn skip_type(&mut self) -> Result<()> {
        loop {
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::OpenParen | TokenKind::OpenBrace | TokenKind::OpenBracket) => {
                    self.skip_balanced()?;

                    if self.eat(TokenKind::Arrow) {
                        self.skip_type()?;
                    }
                }
                Some(
                    TokenKind::Identifier
                    | TokenKind::Keyword(_)
                    | TokenKind::StringLiteral
                    | TokenKind::NumberLiteral,
                ) => {
                    self.next();

                    while self.check(TokenKind::Dot) {
                        self.next();
                        self.parse_identifier_or_keyword()?;
                    }

                    self.skip_type_parameters()?;
                }
                _ => return Err(self.unexpected("type")),
            }

            // Array suffixes `T[]`
            while self.check(TokenKind::OpenBracket)
                && self
                    .peek_nth(1)
                    .is_some_and(|t| t.kind == TokenKind::CloseBracket)
            {
                self.next();
                self.next();
            }

            if self.check_operator("|") || self.check_operator("&") {
                self.next();
                continue;
            }

            return Ok(());
        }
    }

    /// Skips a bracketed token group, including the nested groups inside it
    fn skip_balanced(&mut self) -> Result<()> {
        let mut depth = 0usize;

        loop {
            let Some(token) = self.next() else {
                return Err(self.unexpected("closing bracket"));
            };

            let text = self.text(token);

            match token.kind {
                TokenKind::OpenParen | TokenKind::OpenBrace | TokenKind::OpenBracket => depth += 1,
                TokenKind::CloseParen | TokenKind::CloseBrace | TokenKind::CloseBracket => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Operator if text == "<" => depth += 1,
                TokenKind::Operator if text == ">" => depth = depth.saturating_sub(1),
                TokenKind::Operator if text == ">>" => depth = depth.saturating_sub(2),
                _ => {}
            }

            if depth == 0 {
                return Ok(());
            }
        }
    }

    /* Expressions */

    fn expression(&mut self, start: usize, kind: ExpressionKind) -> Expression {
        Expression {
            id: self.create_node_id(),
            span: self.span_from(start),
            kind,
        }
    }

    pub fn parse_expression(&mut self) -> Result<Expression> {
        let start = self.start();
        let first = self.parse_assignment()?;

        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }

        let mut expressions = vec![first];

        while self.eat(TokenKind::Comma) {
            expressions.push(self.parse_assignment()?);
        }

        Ok(self.expression(start, ExpressionKind::Sequence(expressions)))
    }

    fn parse_assignment(&mut self) -> Result<Expression> {
        let start = self.start();

        if let Some(arrow) = self.try_parse_arrow_function()? {
            return Ok(arrow);
        }

        let left = self.parse_conditional()?;

        let Some(token) = self.peek().filter(|t| t.kind == TokenKind::Assignment) else {
            return Ok(left);
        };

        let operator = AssignmentOperator::from_str(self.text(token))
            .map_err(|_| self.error_at(token.span.start, "unknown assignment operator"))?;

        let target = match operator {
            AssignmentOperator::Assign => self.expression_to_pattern(left)?,
            _ => match left.kind {
                ExpressionKind::Identifier(_) | ExpressionKind::Member { .. } => {
                    self.expression_to_pattern(left)?
                }
                _ => return Err(self.error_at(left.span.start, "invalid assignment target")),
            },
        };

        self.next();
        let value = Box::new(self.parse_assignment()?);

        Ok(self.expression(
            start,
            ExpressionKind::Assignment {
                operator,
                target: Box::new(target),
                value,
            },
        ))
    }

    /// Reinterprets an already parsed expression as an assignment target
    fn expression_to_pattern(&mut self, expression: Expression) -> Result<Pattern> {
        if matches!(expression.kind, ExpressionKind::Member { .. }) {
            return Ok(Pattern {
                id: expression.id,
                span: expression.span,
                kind: PatternKind::Expression(Box::new(expression)),
            });
        }

        let kind = match expression.kind {
            ExpressionKind::Identifier(identifier) => PatternKind::Identifier(identifier),
            ExpressionKind::Array(elements) => PatternKind::Array(
                elements
                    .into_iter()
                    .map(|element| match element {
                        ArrayElement::Expression(expression) => {
                            self.expression_to_pattern(expression).map(Some)
                        }
                        ArrayElement::Spread(expression) => {
                            let target = self.expression_to_pattern(expression)?;
                            Ok(Some(Pattern::synthetic(PatternKind::Rest(Box::new(target)))))
                        }
                    })
                    .collect::<Result<_>>()?,
            ),
            ExpressionKind::Object(properties) => PatternKind::Object(
                properties
                    .into_iter()
                    .map(|property| match property {
                        Property::KeyValue { key, value, .. } => {
                            Ok(ObjectPatternProperty::KeyValue {
                                key,
                                value: self.expression_to_pattern(value)?,
                            })
                        }
                        Property::Spread(expression) => Ok(ObjectPatternProperty::Rest(
                            self.expression_to_pattern(expression)?,
                        )),
                        Property::Method { .. } => {
                            Err(self.error_at(expression.span.start, "invalid assignment target"))
                        }
                    })
                    .collect::<Result<_>>()?,
            ),
            ExpressionKind::Assignment {
                operator: AssignmentOperator::Assign,
                target,
                value,
            } => PatternKind::Assignment {
                target,
                default: value,
            },
            _ => return Err(self.error_at(expression.span.start, "invalid assignment target")),
        };

        Ok(Pattern {
            id: expression.id,
            span: expression.span,
            kind,
        })
    }

    /// Arrow functions are detected by trying to parse a parameter list
    /// followed by `=>` and backtracking when that fails
    fn try_parse_arrow_function(&mut self) -> Result<Option<Expression>> {
        let start = self.start();

        let params = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Identifier)
                if self.peek_nth(1).is_some_and(|t| t.kind == TokenKind::Arrow) =>
            {
                let target = self.parse_binding_target()?;
                vec![target]
            }
            Some(TokenKind::OpenParen) => {
                let saved = (self.position, self.last_end, self.next_node_id);

                let params = self.parse_parameters().and_then(|params| {
                    self.skip_type_annotation()?;
                    Ok(params)
                });

                match params {
                    Ok(params) if self.check(TokenKind::Arrow) => params,
                    _ => {
                        (self.position, self.last_end, self.next_node_id) = saved;
                        return Ok(None);
                    }
                }
            }
            _ => return Ok(None),
        };

        self.expect(TokenKind::Arrow, "`=>`")?;

        let body = if self.check(TokenKind::OpenBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expression(Box::new(self.parse_assignment()?))
        };

        let function = Function {
            id: self.create_node_id(),
            span: self.span_from(start),
            name: None,
            params,
            body,
            is_arrow: true,
        };

        Ok(Some(self.expression(
            start,
            ExpressionKind::Function(Rc::new(function)),
        )))
    }

    fn parse_conditional(&mut self) -> Result<Expression> {
        let start = self.start();
        let test = self.parse_binary(0)?;

        if !self.eat(TokenKind::Question) {
            return Ok(test);
        }

        // `in` is allowed again between `?` and `:`
        let no_in = std::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment();
        self.no_in = no_in;
        let consequent = Box::new(consequent?);

        self.expect(TokenKind::Colon, "`:`")?;
        let alternate = Box::new(self.parse_assignment()?);

        Ok(self.expression(
            start,
            ExpressionKind::Conditional {
                test: Box::new(test),
                consequent,
                alternate,
            },
        ))
    }

    fn peek_binary_operator(&self) -> Option<BinaryOrLogical> {
        let token = self.peek()?;

        match token.kind {
            TokenKind::Operator => BinaryOperator::from_str(self.text(token))
                .ok()
                .map(BinaryOrLogical::Binary),
            TokenKind::Keyword(Keyword::In) if !self.no_in => {
                Some(BinaryOrLogical::Binary(BinaryOperator::In))
            }
            TokenKind::Keyword(Keyword::Instanceof) => {
                Some(BinaryOrLogical::Binary(BinaryOperator::Instanceof))
            }
            TokenKind::LogicalAnd => Some(BinaryOrLogical::Logical(LogicalOperator::And)),
            TokenKind::LogicalOr => Some(BinaryOrLogical::Logical(LogicalOperator::Or)),
            TokenKind::NullishCoalescing => Some(BinaryOrLogical::Logical(
                LogicalOperator::NullishCoalescing,
            )),
            _ => None,
        }
    }

    /// Precedence climbing over binary and logical operators
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression> {
        let start = self.start();
        let mut left = self.parse_unary()?;

        while let Some(operator) = self.peek_binary_operator() {
            let precedence = operator.precedence();

            if precedence < min_precedence {
                break;
            }

            self.next();

            let next_min = if operator.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let right = Box::new(self.parse_binary(next_min)?);
            let left_box = Box::new(left);

            let kind = match operator {
                BinaryOrLogical::Binary(operator) => ExpressionKind::Binary {
                    operator,
                    left: left_box,
                    right,
                },
                BinaryOrLogical::Logical(operator) => ExpressionKind::Logical {
                    operator,
                    left: left_box,
                    right,
                },
            };

            left = self.expression(start, kind);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let start = self.start();
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };

        let operator = match token.kind {
            TokenKind::Operator => UnaryOperator::from_str(self.text(token)).ok(),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOperator::Typeof),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOperator::Void),
            TokenKind::Keyword(Keyword::Delete) => Some(UnaryOperator::Delete),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.next();
                let argument = Box::new(self.parse_unary()?);
                let operator = if token.kind == TokenKind::PlusPlus {
                    UpdateOperator::Increment
                } else {
                    UpdateOperator::Decrement
                };

                return Ok(self.expression(
                    start,
                    ExpressionKind::Update {
                        operator,
                        prefix: true,
                        argument,
                    },
                ));
            }
            _ => None,
        };

        if let Some(operator) = operator {
            self.next();
            let argument = Box::new(self.parse_unary()?);
            return Ok(self.expression(start, ExpressionKind::Unary { operator, argument }));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let start = self.start();
        let expression = self.parse_call_member()?;

        let Some(token) = self.peek() else {
            return Ok(expression);
        };

        if token.newline_before
            || !matches!(token.kind, TokenKind::PlusPlus | TokenKind::MinusMinus)
        {
            return Ok(expression);
        }

        self.next();
        let operator = if token.kind == TokenKind::PlusPlus {
            UpdateOperator::Increment
        } else {
            UpdateOperator::Decrement
        };

        Ok(self.expression(
            start,
            ExpressionKind::Update {
                operator,
                prefix: false,
                argument: Box::new(expression),
            },
        ))
    }

    fn parse_call_member(&mut self) -> Result<Expression> {
        let start = self.start();

        let mut expression = if self.check_keyword(Keyword::New) {
            self.next();
            let callee = Box::new(self.parse_member_only()?);
            let arguments = if self.check(TokenKind::OpenParen) {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            self.expression(start, ExpressionKind::New { callee, arguments })
        } else {
            self.parse_primary()?
        };

        loop {
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::Dot) => {
                    self.next();
                    let property = self.parse_identifier_or_keyword()?;
                    expression = self.expression(
                        start,
                        ExpressionKind::Member {
                            object: Box::new(expression),
                            property: MemberProperty::Static(property.symbol),
                        },
                    );
                }
                Some(TokenKind::OpenBracket) => {
                    self.next();
                    let property = self.parse_expression()?;
                    self.expect(TokenKind::CloseBracket, "`]`")?;
                    expression = self.expression(
                        start,
                        ExpressionKind::Member {
                            object: Box::new(expression),
                            property: MemberProperty::Computed(Box::new(property)),
                        },
                    );
                }
                Some(TokenKind::OpenParen) => {
                    let arguments = self.parse_arguments()?;
                    expression = self.expression(
                        start,
                        ExpressionKind::Call {
                            callee: Box::new(expression),
                            arguments,
                        },
                    );
                }
                _ => return Ok(expression),
            }
        }
    }

    /// Callee of a `new` expression: member accesses but no calls
    fn parse_member_only(&mut self) -> Result<Expression> {
        let start = self.start();
        let mut expression = self.parse_primary()?;

        loop {
            if self.eat(TokenKind::Dot) {
                let property = self.parse_identifier_or_keyword()?;
                expression = self.expression(
                    start,
                    ExpressionKind::Member {
                        object: Box::new(expression),
                        property: MemberProperty::Static(property.symbol),
                    },
                );
            } else if self.eat(TokenKind::OpenBracket) {
                let property = self.parse_expression()?;
                self.expect(TokenKind::CloseBracket, "`]`")?;
                expression = self.expression(
                    start,
                    ExpressionKind::Member {
                        object: Box::new(expression),
                        property: MemberProperty::Computed(Box::new(property)),
                    },
                );
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<ArrayElement>> {
        self.expect(TokenKind::OpenParen, "`(`")?;

        let mut arguments = Vec::new();

        while !self.check(TokenKind::CloseParen) {
            if self.eat(TokenKind::Ellipsis) {
                arguments.push(ArrayElement::Spread(self.parse_assignment()?));
            } else {
                arguments.push(ArrayElement::Expression(self.parse_assignment()?));
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseParen, "`)`")?;

        Ok(arguments)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let start = self.start();
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };

        let kind = match token.kind {
            TokenKind::Identifier => ExpressionKind::Identifier(self.parse_identifier()?),
            TokenKind::NumberLiteral => {
                self.next();
                let value = parse_number_literal(self.text(token))
                    .ok_or_else(|| self.error_at(token.span.start, "invalid number literal"))?;
                ExpressionKind::Literal(Literal::Number(value))
            }
            TokenKind::StringLiteral => ExpressionKind::Literal(Literal::String(self.parse_string()?)),
            TokenKind::Keyword(Keyword::True) | TokenKind::Keyword(Keyword::False) => {
                self.next();
                ExpressionKind::Literal(Literal::Boolean(
                    token.kind == TokenKind::Keyword(Keyword::True),
                ))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.next();
                ExpressionKind::Literal(Literal::Null)
            }
            TokenKind::Keyword(Keyword::This) => {
                self.next();
                ExpressionKind::This
            }
            TokenKind::Keyword(Keyword::Function) => {
                ExpressionKind::Function(Rc::new(self.parse_function(false)?))
            }
            TokenKind::OpenParen => {
                self.next();
                let no_in = std::mem::replace(&mut self.no_in, false);
                let inner = self.parse_expression();
                self.no_in = no_in;
                let inner = inner?;
                self.expect(TokenKind::CloseParen, "`)`")?;
                return Ok(inner);
            }
            TokenKind::OpenBracket => self.parse_array_literal()?,
            TokenKind::OpenBrace => self.parse_object_literal()?,
            _ => return Err(self.unexpected("expression")),
        };

        Ok(self.expression(start, kind))
    }

    fn parse_array_literal(&mut self) -> Result<ExpressionKind> {
        self.expect(TokenKind::OpenBracket, "`[`")?;

        let mut elements = Vec::new();

        while !self.check(TokenKind::CloseBracket) {
            if self.check(TokenKind::Comma) {
                return Err(self.unexpected("array element (holes are not supported)"));
            }

            if self.eat(TokenKind::Ellipsis) {
                elements.push(ArrayElement::Spread(self.parse_assignment()?));
            } else {
                elements.push(ArrayElement::Expression(self.parse_assignment()?));
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseBracket, "`]`")?;

        Ok(ExpressionKind::Array(elements))
    }

    fn parse_object_literal(&mut self) -> Result<ExpressionKind> {
        self.expect(TokenKind::OpenBrace, "`{`")?;

        let mut properties = Vec::new();

        while !self.check(TokenKind::CloseBrace) {
            if self.eat(TokenKind::Ellipsis) {
                properties.push(Property::Spread(self.parse_assignment()?));
            } else {
                let start = self.start();
                let key_token = self.peek();
                let key = self.parse_property_key()?;

                if self.eat(TokenKind::Colon) {
                    let value = self.parse_assignment()?;
                    properties.push(Property::KeyValue {
                        key,
                        value,
                        shorthand: false,
                    });
                } else if self.check(TokenKind::OpenParen) {
                    let function = self.parse_method(start)?;
                    properties.push(Property::Method {
                        key,
                        function: Rc::new(function),
                    });
                } else {
                    // Shorthand `{ x }` is only valid for plain identifiers
                    let (PropertyKey::Identifier(symbol), Some(key_token)) = (&key, key_token)
                    else {
                        return Err(self.unexpected("`:`"));
                    };
                    if key_token.kind != TokenKind::Identifier {
                        return Err(self.unexpected("`:`"));
                    }

                    let identifier = Identifier {
                        id: self.create_node_id(),
                        span: key_token.span,
                        symbol: *symbol,
                    };
                    let value = self.expression(start, ExpressionKind::Identifier(identifier));

                    properties.push(Property::KeyValue {
                        key,
                        value,
                        shorthand: true,
                    });
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseBrace, "`}`")?;

        Ok(ExpressionKind::Object(properties))
    }

    fn parse_property_key(&mut self) -> Result<PropertyKey> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::StringLiteral) => Ok(PropertyKey::String(self.parse_string()?)),
            Some(TokenKind::NumberLiteral) => {
                let Some(token) = self.next() else {
                    return Err(self.unexpected("property key"));
                };
                let value = parse_number_literal(self.text(token))
                    .ok_or_else(|| self.error_at(token.span.start, "invalid number literal"))?;
                Ok(PropertyKey::Number(value))
            }
            Some(TokenKind::OpenBracket) => {
                self.next();
                let key = self.parse_assignment()?;
                self.expect(TokenKind::CloseBracket, "`]`")?;
                Ok(PropertyKey::Computed(Box::new(key)))
            }
            _ => Ok(PropertyKey::Identifier(
                self.parse_identifier_or_keyword()?.symbol,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryOrLogical {
    Binary(BinaryOperator),
    Logical(LogicalOperator),
}

impl BinaryOrLogical {
    fn precedence(self) -> u8 {
        match self {
            BinaryOrLogical::Binary(operator) => operator.precedence(),
            BinaryOrLogical::Logical(operator) => operator.precedence(),
        }
    }

    fn is_right_associative(self) -> bool {
        matches!(self, BinaryOrLogical::Binary(operator) if operator.is_right_associative())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(source: &str) -> Module {
        Parser::parse_module(&SourceFile::from_memory(source)).unwrap()
    }

    fn parse_expression(source: &str) -> Expression {
        let module = parse(source);
        match module.body.into_iter().next().map(|s| s.kind) {
            Some(StatementKind::Expression(expression)) => expression,
            other => panic!("expected expression statement, found {other:?}"),
        }
    }

    #[test]
    fn binary_precedence_and_associativity() {
        let expression = parse_expression("a + b * c ** d ** e;");

        let ExpressionKind::Binary {
            operator: BinaryOperator::Add,
            right,
            ..
        } = expression.kind
        else {
            panic!("expected addition at the root");
        };
        let ExpressionKind::Binary {
            operator: BinaryOperator::Multiply,
            right,
            ..
        } = right.kind
        else {
            panic!("expected multiplication");
        };
        let ExpressionKind::Binary {
            operator: BinaryOperator::Exponent,
            right,
            ..
        } = right.kind
        else {
            panic!("expected exponentiation");
        };
        assert!(matches!(
            right.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator::Exponent,
                ..
            }
        ));
    }

    #[test]
    fn automatic_semicolon_insertion() {
        let module = parse(indoc! {"
            let a = 1
            let b = a
            b++
            return_value(b)
        "});

        assert_eq!(module.body.len(), 4);
    }

    #[test]
    fn arrow_functions_and_parenthesized_expressions() {
        let arrow = parse_expression("(a: number, b = 2): number => a + b;");
        let ExpressionKind::Function(function) = arrow.kind else {
            panic!("expected arrow function");
        };
        assert!(function.is_arrow);
        assert_eq!(function.params.len(), 2);
        assert!(matches!(function.body, FunctionBody::Expression(_)));

        let grouped = parse_expression("(a + b) * c;");
        assert!(matches!(
            grouped.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn type_annotations_are_discarded() {
        let module = parse(indoc! {"
            function add(a: number, b: Array<string>[]): number | undefined {
                let total: number = a;
                return total;
            }
        "});

        let StatementKind::FunctionDeclaration(function) = &module.body[0].kind else {
            panic!("expected function");
        };
        assert_eq!(function.params.len(), 2);
    }

    #[test]
    fn destructuring_assignment_targets() {
        let expression = parse_expression("[a, b] = [b, a];");
        let ExpressionKind::Assignment { target, .. } = expression.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, PatternKind::Array(ref elements) if elements.len() == 2));
    }

    #[test]
    fn imports_and_exports() {
        let module = parse(indoc! {r#"
            import def, { a, b as c } from "./dep";
            import * as ns from "pkg";
            export const K = 1;
            export { K as default, c };
            export default 5;
        "#});

        let StatementKind::Import(import) = &module.body[0].kind else {
            panic!("expected import");
        };
        assert_eq!(import.source, "./dep");
        assert_eq!(import.specifiers.len(), 3);
        assert_eq!(import.specifiers[2].local.symbol.value(), "c");

        assert!(matches!(
            &module.body[1].kind,
            StatementKind::Import(ImportDeclaration { specifiers, .. })
                if specifiers[0].kind == ImportSpecifierKind::Namespace
        ));
        assert!(matches!(
            &module.body[2].kind,
            StatementKind::Export(ExportDeclaration::Declaration(_))
        ));
        assert!(matches!(
            &module.body[4].kind,
            StatementKind::Export(ExportDeclaration::Default(_))
        ));
    }

    #[test]
    fn for_statements() {
        let module = parse(indoc! {"
            for (let i = 0; i < 10; i++) {}
            for (const key in object) {}
            for (x of items) {}
        "});

        assert!(matches!(module.body[0].kind, StatementKind::For { .. }));
        assert!(matches!(
            module.body[1].kind,
            StatementKind::ForEach { is_of: false, .. }
        ));
        assert!(matches!(
            module.body[2].kind,
            StatementKind::ForEach { is_of: true, .. }
        ));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let error = Parser::parse_module(&SourceFile::from_memory("let x = ;")).unwrap_err();

        assert!(matches!(
            error,
            CompileError::Syntax {
                line: 1,
                column: 9,
                ..
            }
        ));
    }
}
