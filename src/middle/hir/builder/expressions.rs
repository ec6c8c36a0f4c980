use std::rc::Rc;

use super::{
    HirBuilder,
    bindings::{ReferencedNames, pattern_names},
    statements::is_plain_pattern,
};
use crate::{
    error::{CompileError, Result},
    frontend::ast::{
        self, ArrayElement, AssignmentOperator, BinaryOperator, ExpressionKind, MemberProperty,
        NodeId, Pattern, PatternKind, PropertyKey, UnaryOperator, UpdateOperator,
    },
    middle::hir::{
        DeclarationKind, FunctionKind, InstructionKind, LiteralValue, ObjectKey,
        ObjectPatternProperty, ObjectProperty, Place, StoreKind, UnsupportedNode,
    },
};

/// How identifiers inside a pattern are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternMode {
    /// `let`/`const`/`var` declarators: names were bound by the pre-pass
    Declaration,
    /// Function parameters: names are declared on the spot
    Parameter,
    /// Destructuring assignment to existing variables
    Assignment,
}

/// Expressions which can be evaluated eagerly without observable effects.
/// Logical and conditional expressions are only lowered into HIR when their
/// lazily evaluated operands are of this shape.
fn is_simple_pure(expression: &ast::Expression) -> bool {
    match &expression.kind {
        ExpressionKind::Identifier(_) | ExpressionKind::Literal(_) => true,
        ExpressionKind::Unary { operator, argument } => {
            *operator != UnaryOperator::Delete && is_simple_pure(argument)
        }
        ExpressionKind::Binary {
            operator,
            left,
            right,
        } => {
            !matches!(operator, BinaryOperator::In | BinaryOperator::Instanceof)
                && is_simple_pure(left)
                && is_simple_pure(right)
        }
        ExpressionKind::Logical { left, right, .. } => is_simple_pure(left) && is_simple_pure(right),
        _ => false,
    }
}

impl HirBuilder<'_> {
    pub(super) fn lower_expression(&mut self, expression: &ast::Expression) -> Result<Place> {
        let id = expression.id;

        let kind = match &expression.kind {
            ExpressionKind::Identifier(identifier) => return self.lower_identifier(identifier),
            ExpressionKind::Literal(literal) => InstructionKind::Literal {
                value: match literal {
                    ast::Literal::Number(value) => LiteralValue::Number(*value),
                    ast::Literal::String(value) => LiteralValue::String(value.clone()),
                    ast::Literal::Boolean(value) => LiteralValue::Boolean(*value),
                    ast::Literal::Null => LiteralValue::Null,
                },
            },
            ExpressionKind::Array(elements) => InstructionKind::Array {
                elements: self.lower_elements(elements)?,
            },
            ExpressionKind::Object(properties) => {
                let mut lowered = Vec::with_capacity(properties.len());

                for property in properties {
                    lowered.push(match property {
                        ast::Property::KeyValue {
                            key,
                            value,
                            shorthand,
                        } => {
                            let key = self.lower_key(key)?;
                            ObjectProperty::KeyValue {
                                key,
                                value: self.lower_expression(value)?,
                                shorthand: *shorthand,
                            }
                        }
                        ast::Property::Method { key, function } => {
                            let key = self.lower_key(key)?;
                            ObjectProperty::Method {
                                key,
                                function: self.build_function(function, FunctionKind::Method)?,
                            }
                        }
                        ast::Property::Spread(argument) => {
                            ObjectProperty::Spread(self.lower_expression(argument)?)
                        }
                    });
                }

                InstructionKind::Object {
                    properties: lowered,
                }
            }
            ExpressionKind::Function(function) => {
                let kind = if function.is_arrow {
                    FunctionKind::Arrow
                } else {
                    FunctionKind::Expression
                };

                InstructionKind::FunctionExpression {
                    function: self.build_function(function, kind)?,
                }
            }
            ExpressionKind::Unary { operator, .. } if *operator == UnaryOperator::Delete => {
                return self.lower_unsupported_expression(expression);
            }
            ExpressionKind::Unary { operator, argument } => InstructionKind::Unary {
                operator: *operator,
                argument: self.lower_expression(argument)?,
            },
            ExpressionKind::Update {
                operator,
                prefix,
                argument,
            } => return self.lower_update(expression, *operator, *prefix, argument),
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.lower_expression(left)?;
                InstructionKind::Binary {
                    operator: *operator,
                    left,
                    right: self.lower_expression(right)?,
                }
            }
            ExpressionKind::Logical {
                operator,
                left,
                right,
            } => {
                if !is_simple_pure(right) {
                    return self.lower_unsupported_expression(expression);
                }

                let left = self.lower_expression(left)?;
                InstructionKind::Logical {
                    operator: *operator,
                    left,
                    right: self.lower_expression(right)?,
                }
            }
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if !is_simple_pure(consequent) || !is_simple_pure(alternate) {
                    return self.lower_unsupported_expression(expression);
                }

                let test = self.lower_expression(test)?;
                let consequent = self.lower_expression(consequent)?;
                InstructionKind::Conditional {
                    test,
                    consequent,
                    alternate: self.lower_expression(alternate)?,
                }
            }
            ExpressionKind::Assignment {
                operator, target, value,
            } => {
                if operator.is_logical() {
                    return self.lower_unsupported_expression(expression);
                }

                return self.lower_assignment(expression, *operator, target, value);
            }
            ExpressionKind::Call { callee, arguments } => {
                let callee = self.lower_expression(callee)?;
                InstructionKind::Call {
                    callee,
                    arguments: self.lower_elements(arguments)?,
                }
            }
            ExpressionKind::New { callee, arguments } => {
                let callee = self.lower_expression(callee)?;
                InstructionKind::New {
                    callee,
                    arguments: self.lower_elements(arguments)?,
                }
            }
            ExpressionKind::Member { object, property } => {
                let object = self.lower_expression(object)?;
                match property {
                    MemberProperty::Static(property) => InstructionKind::PropertyLoad {
                        object,
                        property: *property,
                    },
                    MemberProperty::Computed(property) => InstructionKind::ComputedLoad {
                        object,
                        property: self.lower_expression(property)?,
                    },
                }
            }
            ExpressionKind::Sequence(expressions) => {
                let Some((last, rest)) = expressions.split_last() else {
                    return Err(CompileError::unsupported("empty sequence expression"));
                };

                for expression in rest {
                    self.lower_expression_statement(expression)?;
                }

                return self.lower_expression(last);
            }
            ExpressionKind::This => return self.lower_unsupported_expression(expression),
        };

        Ok(self.emit(kind, id))
    }

    fn lower_identifier(&mut self, identifier: &ast::Identifier) -> Result<Place> {
        let name = identifier.symbol;

        match self.scopes.get_data(name) {
            Some(declaration) => {
                let place = self.read_version(name, declaration)?;
                Ok(self.emit(InstructionKind::LoadLocal { place }, identifier.id))
            }
            None if name.value() == "undefined" && !self.globals.contains_key(&name) => Ok(self.emit(
                InstructionKind::Literal {
                    value: LiteralValue::Undefined,
                },
                identifier.id,
            )),
            None => Ok(self.emit(InstructionKind::LoadGlobal { name }, identifier.id)),
        }
    }

    fn lower_elements(&mut self, elements: &[ArrayElement]) -> Result<Vec<Place>> {
        let mut places = Vec::with_capacity(elements.len());

        for element in elements {
            places.push(match element {
                ArrayElement::Expression(expression) => self.lower_expression(expression)?,
                ArrayElement::Spread(argument) => {
                    let argument = self.lower_expression(argument)?;
                    self.emit(InstructionKind::Spread { argument }, NodeId::SYNTHETIC)
                }
            });
        }

        Ok(places)
    }

    fn lower_key(&mut self, key: &PropertyKey) -> Result<ObjectKey> {
        Ok(match key {
            PropertyKey::Identifier(name) => ObjectKey::Identifier(*name),
            PropertyKey::String(value) => ObjectKey::String(value.clone()),
            PropertyKey::Number(value) => ObjectKey::Number(*value),
            PropertyKey::Computed(expression) => ObjectKey::Computed(self.lower_expression(expression)?),
        })
    }

    pub(super) fn lower_unsupported_expression(&mut self, expression: &ast::Expression) -> Result<Place> {
        let names = ReferencedNames::of_expression(expression);
        let bindings = self.capture_bindings(&names, None)?;

        Ok(self.emit(
            InstructionKind::Unsupported {
                node: UnsupportedNode::Expression(Rc::new(expression.clone())),
                bindings,
            },
            expression.id,
        ))
    }

    /// Stores `value` into a new version of a local declaration, or into a
    /// global when the name isn't bound locally
    fn store_to_name(&mut self, name: &ast::Identifier, value: Place, origin: NodeId) -> Result<Place> {
        match self.scopes.get_data(name.symbol) {
            Some(declaration) => {
                if self.env.declaration(declaration).owner == self.function_id()
                    && self.frame().uninitialized.contains(&declaration)
                {
                    return Err(CompileError::UseBeforeDeclaration {
                        name: name.symbol.value().to_string(),
                    });
                }

                let lval = self.new_version(declaration);
                Ok(self.emit(
                    InstructionKind::StoreLocal {
                        lval,
                        value,
                        kind: StoreKind::Reassign,
                    },
                    origin,
                ))
            }
            None => Ok(self.emit(
                InstructionKind::StoreGlobal {
                    name: name.symbol,
                    value,
                },
                origin,
            )),
        }
    }

    pub(super) fn lower_assignment(
        &mut self,
        expression: &ast::Expression,
        operator: AssignmentOperator,
        target: &Pattern,
        value: &ast::Expression,
    ) -> Result<Place> {
        let id = expression.id;

        match &target.kind {
            PatternKind::Identifier(name) => {
                let value = match operator.binary_operator() {
                    Some(binary) => {
                        let current = self.lower_identifier(name)?;
                        let right = self.lower_expression(value)?;
                        self.emit(
                            InstructionKind::Binary {
                                operator: binary,
                                left: current,
                                right,
                            },
                            id,
                        )
                    }
                    None => self.lower_expression(value)?,
                };

                self.store_to_name(name, value, id)
            }
            PatternKind::Expression(member) => {
                let ExpressionKind::Member { object, property } = &member.kind else {
                    return self.lower_unsupported_expression(expression);
                };

                let object = self.lower_expression(object)?;
                let property = match property {
                    MemberProperty::Static(name) => Ok(*name),
                    MemberProperty::Computed(property) => Err(self.lower_expression(property)?),
                };

                let value = match operator.binary_operator() {
                    Some(binary) => {
                        let current = match property {
                            Ok(name) => self.emit(
                                InstructionKind::PropertyLoad {
                                    object,
                                    property: name,
                                },
                                id,
                            ),
                            Err(property) => {
                                self.emit(InstructionKind::ComputedLoad { object, property }, id)
                            }
                        };
                        let right = self.lower_expression(value)?;
                        self.emit(
                            InstructionKind::Binary {
                                operator: binary,
                                left: current,
                                right,
                            },
                            id,
                        )
                    }
                    None => self.lower_expression(value)?,
                };

                Ok(match property {
                    Ok(name) => self.emit(
                        InstructionKind::PropertyStore {
                            object,
                            property: name,
                            value,
                        },
                        id,
                    ),
                    Err(property) => self.emit(
                        InstructionKind::ComputedStore {
                            object,
                            property,
                            value,
                        },
                        id,
                    ),
                })
            }
            _ if operator == AssignmentOperator::Assign
                && is_plain_pattern(target)
                && pattern_names(target)
                    .iter()
                    .all(|name| self.scopes.get_data(name.symbol).is_some()) =>
            {
                let value = self.lower_expression(value)?;
                let pattern = self.lower_pattern(target, PatternMode::Assignment)?;

                Ok(self.emit(
                    InstructionKind::Destructure {
                        pattern,
                        value,
                        kind: StoreKind::Reassign,
                    },
                    id,
                ))
            }
            _ => self.lower_unsupported_expression(expression),
        }
    }

    /// `x++` and friends become a load, an add or subtract of one and a store.
    /// The result is the old value for postfix and the store for prefix.
    pub(super) fn lower_update(
        &mut self,
        expression: &ast::Expression,
        operator: UpdateOperator,
        prefix: bool,
        argument: &ast::Expression,
    ) -> Result<Place> {
        let id = expression.id;
        let binary = match operator {
            UpdateOperator::Increment => BinaryOperator::Add,
            UpdateOperator::Decrement => BinaryOperator::Subtract,
        };

        let one = |builder: &mut Self| {
            builder.emit(
                InstructionKind::Literal {
                    value: LiteralValue::Number(1.0),
                },
                NodeId::SYNTHETIC,
            )
        };

        match &argument.kind {
            ExpressionKind::Identifier(name) => {
                let old = self.lower_identifier(name)?;
                let one = one(self);
                let new = self.emit(
                    InstructionKind::Binary {
                        operator: binary,
                        left: old,
                        right: one,
                    },
                    id,
                );
                let store = self.store_to_name(name, new, id)?;

                Ok(if prefix { store } else { old })
            }
            ExpressionKind::Member { object, property } => {
                let object = self.lower_expression(object)?;

                match property {
                    MemberProperty::Static(name) => {
                        let old = self.emit(
                            InstructionKind::PropertyLoad {
                                object,
                                property: *name,
                            },
                            id,
                        );
                        let one = one(self);
                        let new = self.emit(
                            InstructionKind::Binary {
                                operator: binary,
                                left: old,
                                right: one,
                            },
                            id,
                        );
                        let store = self.emit(
                            InstructionKind::PropertyStore {
                                object,
                                property: *name,
                                value: new,
                            },
                            id,
                        );

                        Ok(if prefix { store } else { old })
                    }
                    MemberProperty::Computed(_) => self.lower_unsupported_expression(expression),
                }
            }
            _ => Err(CompileError::unsupported("update of a non-reference expression")),
        }
    }

    /// Pattern of a `let`/`const`/`var` declarator
    pub(super) fn lower_binding_pattern(&mut self, pattern: &Pattern) -> Result<Place> {
        self.lower_pattern(pattern, PatternMode::Declaration)
    }

    /// Parameters declare their names in the function scope and are lowered
    /// into the function header
    pub(super) fn lower_parameter(&mut self, pattern: &Pattern) -> Result<Place> {
        self.lower_pattern(pattern, PatternMode::Parameter)
    }

    fn lower_pattern(&mut self, pattern: &Pattern, mode: PatternMode) -> Result<Place> {
        let id = pattern.id;

        let kind = match &pattern.kind {
            PatternKind::Identifier(name) => {
                let place = self.pattern_target(name, mode)?;
                self.push_instruction(place, InstructionKind::BindingIdentifier { name: name.symbol }, id);
                return Ok(place);
            }
            PatternKind::Array(elements) => {
                let mut lowered = Vec::with_capacity(elements.len());

                for element in elements {
                    lowered.push(match element {
                        Some(element) => Some(self.lower_pattern(element, mode)?),
                        None => None,
                    });
                }

                InstructionKind::ArrayPattern { elements: lowered }
            }
            PatternKind::Object(properties) => {
                let mut lowered = Vec::with_capacity(properties.len());

                for property in properties {
                    lowered.push(match property {
                        ast::ObjectPatternProperty::KeyValue { key, value } => {
                            let key = self.lower_key(key)?;
                            ObjectPatternProperty::KeyValue {
                                key,
                                value: self.lower_pattern(value, mode)?,
                            }
                        }
                        ast::ObjectPatternProperty::Rest(rest) => {
                            ObjectPatternProperty::Rest(self.lower_pattern(rest, mode)?)
                        }
                    });
                }

                InstructionKind::ObjectPattern {
                    properties: lowered,
                }
            }
            PatternKind::Assignment { target, default } => {
                let default = self.lower_expression(default)?;
                InstructionKind::AssignmentPattern {
                    target: self.lower_pattern(target, mode)?,
                    default,
                }
            }
            PatternKind::Rest(argument) => InstructionKind::Rest {
                argument: self.lower_pattern(argument, mode)?,
            },
            PatternKind::Expression(_) => {
                return Err(CompileError::unsupported("member expression in a binding pattern"));
            }
        };

        Ok(self.emit(kind, id))
    }

    /// The version an identifier inside a pattern binds
    fn pattern_target(&mut self, name: &ast::Identifier, mode: PatternMode) -> Result<Place> {
        match mode {
            PatternMode::Declaration => {
                let declaration = self.declared(name.symbol)?;
                Ok(self.binding_place(declaration))
            }
            PatternMode::Parameter => {
                let owner = self.function_id();
                let declaration =
                    self.env
                        .declare(Some(name.symbol), DeclarationKind::Parameter, owner);
                self.scopes.set_data(name.symbol, declaration);
                Ok(self.new_version(declaration))
            }
            PatternMode::Assignment => {
                let declaration = self.declared(name.symbol)?;
                Ok(self.new_version(declaration))
            }
        }
    }
}
