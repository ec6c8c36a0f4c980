//! Folds instructions whose operands are all known literals.
//!
//! Values flow from `Literal` instructions through stores, array
//! destructuring and loads. Only identifiers with a single definition that
//! dominates the read are trusted, and captured variables that can still
//! change are never tracked. Exported constants are published in
//! [`ProjectConstants`] so imports of them fold in later modules.

use std::{collections::BTreeMap, path::PathBuf};

use hashbrown::HashMap;
use tracing::{debug, trace};

use super::{Pass, Site, definition_sites, self_copy_loads};
use crate::{
    error::Result,
    frontend::{
        ast::{BinaryOperator, LogicalOperator, UnaryOperator},
        intern::InternedSymbol,
    },
    middle::hir::{
        Environment, FunctionIR, Identifier, Instruction, InstructionKind, LiteralValue, ModuleIR,
        Place,
    },
};

/// Constant exports of every optimized module, keyed by module path and
/// exported name
#[derive(Debug, Default)]
pub struct ProjectConstants {
    modules: BTreeMap<PathBuf, BTreeMap<InternedSymbol, LiteralValue>>,
}

impl ProjectConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &PathBuf, name: InternedSymbol) -> Option<&LiteralValue> {
        self.modules.get(path).and_then(|exports| exports.get(&name))
    }

    pub fn exports_of(&self, path: &PathBuf) -> Option<&BTreeMap<InternedSymbol, LiteralValue>> {
        self.modules.get(path)
    }

    /// Returns whether the table changed
    pub fn insert(&mut self, path: PathBuf, name: InternedSymbol, value: LiteralValue) -> bool {
        let exports = self.modules.entry(path).or_default();

        if exports.get(&name) == Some(&value) {
            return false;
        }

        exports.insert(name, value);
        true
    }
}

pub struct ConstantPropagation<'a> {
    constants: &'a mut ProjectConstants,
}

impl<'a> ConstantPropagation<'a> {
    pub fn new(constants: &'a mut ProjectConstants) -> Self {
        Self { constants }
    }
}

type Definitions = HashMap<Identifier, Vec<Site>>;

impl Pass for ConstantPropagation<'_> {
    fn name(&self) -> &'static str {
        "constant_propagation"
    }

    fn step(&mut self, module: &mut ModuleIR, env: &mut Environment) -> Result<bool> {
        let definitions = definition_sites(module);
        let values = known_values(module, env, &definitions);

        let mut folds = Vec::new();

        for function in module.functions.values() {
            let guarded = self_copy_loads(function);

            for block in function.blocks.values() {
                for (index, instruction) in block.instructions.iter().enumerate() {
                    if matches!(instruction.kind, InstructionKind::Literal { .. }) {
                        continue;
                    }

                    let site = Site {
                        function: function.id,
                        block: Some(block.id),
                        index,
                    };

                    let value = match &instruction.kind {
                        InstructionKind::LoadLocal { place } => {
                            if guarded.contains(&instruction.place.identifier) {
                                continue;
                            }
                            self.fold_load(
                                env,
                                function,
                                &definitions,
                                &values,
                                place.identifier,
                                site,
                            )
                        }
                        InstructionKind::LoadGlobal { name } => self.fold_import(module, *name),
                        kind => fold_value(kind, &values),
                    };

                    if let Some(value) = value {
                        folds.push((site, value));
                    }
                }
            }
        }

        let changed = !folds.is_empty();

        for (site, value) in folds {
            let Some(block) = site.block else { continue };
            let Some(instruction) = module
                .functions
                .get_mut(&site.function)
                .and_then(|function| function.blocks.get_mut(&block))
                .and_then(|block| block.instructions.get_mut(site.index))
            else {
                continue;
            };

            trace!(instruction = %instruction.id, %value, "folded to literal");
            instruction.kind = InstructionKind::Literal { value };
        }

        let published = self.publish_exports(module, env, &definitions, &values);

        if changed || published {
            debug!(path = %module.path.display(), changed, published, "propagated constants");
        }

        Ok(changed || published)
    }
}

impl ConstantPropagation<'_> {
    fn fold_load(
        &self,
        env: &Environment,
        function: &FunctionIR,
        definitions: &Definitions,
        values: &HashMap<Identifier, LiteralValue>,
        identifier: Identifier,
        read: Site,
    ) -> Option<LiteralValue> {
        let value = values.get(&identifier)?;
        let [definition] = definitions.get(&identifier)?.as_slice() else {
            return None;
        };

        let trusted = if definition.function == read.function {
            definition.dominates(&read, function)
        } else {
            // Closures may run at any time, so only bindings which can never
            // change are safe to read across functions
            !env.declaration(identifier.declaration).kind.is_mutable()
        };

        trusted.then(|| value.clone())
    }

    fn fold_import(&self, module: &ModuleIR, name: InternedSymbol) -> Option<LiteralValue> {
        let binding = module.globals.get(&name)?;
        let path = binding.resolved.as_ref()?;

        self.constants.get(path, binding.imported?).cloned()
    }

    fn publish_exports(
        &mut self,
        module: &ModuleIR,
        env: &Environment,
        definitions: &Definitions,
        values: &HashMap<Identifier, LiteralValue>,
    ) -> bool {
        let instructions: HashMap<_, &Instruction> = module
            .functions
            .values()
            .flat_map(FunctionIR::instructions)
            .map(|instruction| (instruction.id, instruction))
            .collect();

        let mut changed = false;

        for (name, id) in &module.exports {
            let Some(instruction) = instructions.get(id) else {
                continue;
            };

            let value = match &instruction.kind {
                InstructionKind::ExportSpecifier { local, .. } => {
                    let single_definition = definitions
                        .get(&local.identifier)
                        .is_some_and(|sites| sites.len() == 1)
                        && env
                            .decl_to_places
                            .get(&local.declaration())
                            .is_some_and(|versions| versions.len() == 1);

                    single_definition
                        .then(|| values.get(&local.identifier))
                        .flatten()
                }
                InstructionKind::ExportDefaultDeclaration { value } => values.get(&value.identifier),
                _ => None,
            };

            if let Some(value) = value {
                changed |= self
                    .constants
                    .insert(module.path.clone(), *name, value.clone());
            }
        }

        changed
    }
}

/// Literal value of every identifier that provably holds one
fn known_values(
    module: &ModuleIR,
    env: &Environment,
    definitions: &Definitions,
) -> HashMap<Identifier, LiteralValue> {
    let mut values = HashMap::new();

    let trackable = |identifier: &Identifier| {
        definitions
            .get(identifier)
            .is_some_and(|sites| sites.len() == 1)
            && !env.is_captured_mutable(identifier.declaration)
    };

    for function in module.functions.values() {
        for instruction in function.instructions() {
            if let InstructionKind::Literal { value } = &instruction.kind {
                values.insert(instruction.place.identifier, value.clone());
            }
        }
    }

    for function in module.functions.values() {
        let kinds: HashMap<Identifier, &InstructionKind> = function
            .instructions()
            .map(|instruction| (instruction.place.identifier, &instruction.kind))
            .collect();

        for instruction in function.instructions() {
            match &instruction.kind {
                InstructionKind::StoreLocal { lval, value, .. } => {
                    let Some(known) = values.get(&value.identifier).cloned() else {
                        continue;
                    };

                    if trackable(&lval.identifier) {
                        values.insert(lval.identifier, known.clone());
                    }
                    values.insert(instruction.place.identifier, known);
                }
                InstructionKind::Destructure { pattern, value, .. } => {
                    let (
                        Some(InstructionKind::ArrayPattern { elements: targets }),
                        Some(InstructionKind::Array { elements: sources }),
                    ) = (kinds.get(&pattern.identifier), kinds.get(&value.identifier))
                    else {
                        continue;
                    };

                    if targets.len() != sources.len() {
                        continue;
                    }

                    for (target, source) in targets.iter().zip(sources) {
                        let Some(target) = target else { continue };

                        let is_binding = matches!(
                            kinds.get(&target.identifier),
                            Some(InstructionKind::BindingIdentifier { .. })
                        );
                        let is_spread = matches!(
                            kinds.get(&source.identifier),
                            Some(InstructionKind::Spread { .. })
                        );

                        if !is_binding || is_spread || !trackable(&target.identifier) {
                            continue;
                        }

                        if let Some(known) = values.get(&source.identifier).cloned() {
                            values.insert(target.identifier, known);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    values
}

fn fold_value(kind: &InstructionKind, values: &HashMap<Identifier, LiteralValue>) -> Option<LiteralValue> {
    let get = |place: &Place| values.get(&place.identifier);

    match kind {
        InstructionKind::Binary {
            operator,
            left,
            right,
        } => fold_binary(*operator, get(left)?, get(right)?),
        InstructionKind::Unary { operator, argument } => fold_unary(*operator, get(argument)?),
        InstructionKind::Logical {
            operator,
            left,
            right,
        } => {
            let (left, right) = (get(left)?, get(right)?);
            let pick_left = match operator {
                LogicalOperator::And => !is_truthy(left),
                LogicalOperator::Or => is_truthy(left),
                LogicalOperator::NullishCoalescing => {
                    !matches!(left, LiteralValue::Null | LiteralValue::Undefined)
                }
            };

            Some(if pick_left { left.clone() } else { right.clone() })
        }
        InstructionKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            let (consequent, alternate) = (get(consequent)?, get(alternate)?);

            Some(if is_truthy(get(test)?) {
                consequent.clone()
            } else {
                alternate.clone()
            })
        }
        _ => None,
    }
}

pub fn is_truthy(value: &LiteralValue) -> bool {
    match value {
        LiteralValue::Number(n) => *n != 0.0 && !n.is_nan(),
        LiteralValue::String(s) => !s.is_empty(),
        LiteralValue::Boolean(b) => *b,
        LiteralValue::Null | LiteralValue::Undefined => false,
    }
}

/// Numbers which print back as a plain literal
fn number(value: f64) -> Option<LiteralValue> {
    let negative_zero = value == 0.0 && value.is_sign_negative();
    (value.is_finite() && !negative_zero).then_some(LiteralValue::Number(value))
}

fn to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }

    value.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

fn to_uint32(value: f64) -> u32 {
    to_int32(value) as u32
}

fn strict_equals(left: &LiteralValue, right: &LiteralValue) -> bool {
    match (left, right) {
        (LiteralValue::Number(a), LiteralValue::Number(b)) => a == b,
        (LiteralValue::String(a), LiteralValue::String(b)) => a == b,
        (LiteralValue::Boolean(a), LiteralValue::Boolean(b)) => a == b,
        (LiteralValue::Null, LiteralValue::Null) => true,
        (LiteralValue::Undefined, LiteralValue::Undefined) => true,
        _ => false,
    }
}

/// `==` without any coercion beyond the null/undefined pair. Other mixed
/// type comparisons are left alone.
fn loose_equals(left: &LiteralValue, right: &LiteralValue) -> Option<bool> {
    use LiteralValue::*;

    match (left, right) {
        (Null | Undefined, Null | Undefined) => Some(true),
        (Null | Undefined, _) | (_, Null | Undefined) => Some(false),
        (Number(_), Number(_)) | (String(_), String(_)) | (Boolean(_), Boolean(_)) => {
            Some(strict_equals(left, right))
        }
        _ => None,
    }
}

pub fn fold_binary(
    operator: BinaryOperator,
    left: &LiteralValue,
    right: &LiteralValue,
) -> Option<LiteralValue> {
    use BinaryOperator::*;
    use LiteralValue::{Boolean, Number, String};

    match (operator, left, right) {
        (StrictEqual, _, _) => Some(Boolean(strict_equals(left, right))),
        (StrictNotEqual, _, _) => Some(Boolean(!strict_equals(left, right))),
        (Equal, _, _) => loose_equals(left, right).map(Boolean),
        (NotEqual, _, _) => loose_equals(left, right).map(|equal| Boolean(!equal)),

        (Add, String(a), String(b)) => Some(String(format!("{a}{b}"))),
        (LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual, String(a), String(b)) => {
            // JavaScript compares strings by UTF-16 code units
            let ordering = a.encode_utf16().cmp(b.encode_utf16());
            Some(Boolean(match operator {
                LessThan => ordering.is_lt(),
                LessThanOrEqual => ordering.is_le(),
                GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        (_, Number(a), Number(b)) => {
            let (a, b) = (*a, *b);

            match operator {
                Add => number(a + b),
                Subtract => number(a - b),
                Multiply => number(a * b),
                Divide => number(a / b),
                Remainder => number(a % b),
                Exponent => number(a.powf(b)),
                ShiftLeft => number(to_int32(a).wrapping_shl(to_uint32(b) & 31) as f64),
                ShiftRight => number(to_int32(a).wrapping_shr(to_uint32(b) & 31) as f64),
                UnsignedShiftRight => number(to_uint32(a).wrapping_shr(to_uint32(b) & 31) as f64),
                BitwiseAnd => number((to_int32(a) & to_int32(b)) as f64),
                BitwiseOr => number((to_int32(a) | to_int32(b)) as f64),
                BitwiseXor => number((to_int32(a) ^ to_int32(b)) as f64),
                LessThan => Some(Boolean(a < b)),
                LessThanOrEqual => Some(Boolean(a <= b)),
                GreaterThan => Some(Boolean(a > b)),
                GreaterThanOrEqual => Some(Boolean(a >= b)),
                _ => None,
            }
        }

        _ => None,
    }
}

pub fn fold_unary(operator: UnaryOperator, argument: &LiteralValue) -> Option<LiteralValue> {
    match (operator, argument) {
        (UnaryOperator::Not, value) => Some(LiteralValue::Boolean(!is_truthy(value))),
        (UnaryOperator::Void, _) => Some(LiteralValue::Undefined),
        (UnaryOperator::Typeof, value) => Some(LiteralValue::String(
            match value {
                LiteralValue::Number(_) => "number",
                LiteralValue::String(_) => "string",
                LiteralValue::Boolean(_) => "boolean",
                LiteralValue::Null => "object",
                LiteralValue::Undefined => "undefined",
            }
            .to_string(),
        )),
        (UnaryOperator::Minus, LiteralValue::Number(n)) => number(-n),
        (UnaryOperator::Plus, LiteralValue::Number(n)) => number(*n),
        (UnaryOperator::BitwiseNot, LiteralValue::Number(n)) => number(!to_int32(*n) as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::middle::{
        hir::{ImportBinding, Terminal},
        optimization::{run_to_fixed_point, test_support::lower},
    };

    fn literal_of(function: &FunctionIR, identifier: Identifier) -> Option<LiteralValue> {
        function.instructions().find_map(|instruction| match &instruction.kind {
            InstructionKind::Literal { value } if instruction.place.identifier == identifier => {
                Some(value.clone())
            }
            _ => None,
        })
    }

    #[test]
    fn binary_operators_follow_javascript_semantics() {
        use BinaryOperator::*;
        use LiteralValue::*;

        assert_eq!(fold_binary(Add, &Number(1.0), &Number(2.0)), Some(Number(3.0)));
        assert_eq!(fold_binary(Exponent, &Number(2.0), &Number(10.0)), Some(Number(1024.0)));
        assert_eq!(fold_binary(Remainder, &Number(-7.0), &Number(3.0)), Some(Number(-1.0)));
        assert_eq!(fold_binary(ShiftLeft, &Number(1.0), &Number(33.0)), Some(Number(2.0)));
        assert_eq!(
            fold_binary(UnsignedShiftRight, &Number(-1.0), &Number(0.0)),
            Some(Number(4294967295.0))
        );
        assert_eq!(fold_binary(ShiftRight, &Number(-8.0), &Number(1.0)), Some(Number(-4.0)));
        assert_eq!(fold_binary(StrictEqual, &Number(1.0), &String("1".into())), Some(Boolean(false)));
        assert_eq!(fold_binary(Equal, &Null, &Undefined), Some(Boolean(true)));
        assert_eq!(fold_binary(Equal, &Number(1.0), &String("1".into())), None);
        assert_eq!(fold_binary(Add, &String("a".into()), &String("b".into())), Some(String("ab".into())));
        assert_eq!(fold_binary(Add, &String("a".into()), &Number(1.0)), None);
    }

    #[test]
    fn non_finite_results_are_not_folded() {
        use LiteralValue::Number;

        assert_eq!(fold_binary(BinaryOperator::Divide, &Number(1.0), &Number(0.0)), None);
        assert_eq!(fold_binary(BinaryOperator::Subtract, &Number(0.0), &Number(0.0)), Some(Number(0.0)));
        assert_eq!(fold_unary(UnaryOperator::Minus, &Number(0.0)), None);
        assert_eq!(
            fold_unary(UnaryOperator::Typeof, &LiteralValue::Null),
            Some(LiteralValue::String("object".into()))
        );
    }

    #[test]
    fn folds_locals_through_stores_and_loads() {
        let (mut env, mut ir) = lower("function f() { let x = 1; let y = 2; return x + y; }");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();

        let f = ir.functions.values().find(|f| f.name.is_some()).unwrap();
        let Some(Terminal::Return { value: Some(value) }) = &f.blocks[&f.entry].terminal else {
            panic!("expected a return");
        };

        assert_eq!(literal_of(f, value.identifier), Some(LiteralValue::Number(3.0)));
    }

    #[test]
    fn values_merged_by_a_phi_are_not_folded() {
        let (mut env, mut ir) = lower("let x = 1; if (c) { x = 2; } log(x);");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();

        let entry = ir.entry_function().unwrap();
        let call_argument = entry
            .instructions()
            .find_map(|instruction| match &instruction.kind {
                InstructionKind::Call { arguments, .. } => Some(arguments[0]),
                _ => None,
            })
            .unwrap();

        assert_eq!(literal_of(entry, call_argument.identifier), None);
    }

    #[test]
    fn exported_constants_are_published_and_imported() {
        let (mut env, mut ir) = lower("export const K = 21 * 2;");
        ir.path = PathBuf::from("/a.js");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();
        assert_eq!(
            constants.get(&PathBuf::from("/a.js"), InternedSymbol::new("K")),
            Some(&LiteralValue::Number(42.0))
        );

        let (mut env, mut ir) = lower("import { K } from './a'; log(K + 1);");
        ir.globals.insert(
            InternedSymbol::new("K"),
            ImportBinding {
                source: "./a".to_string(),
                imported: Some(InternedSymbol::new("K")),
                resolved: Some(PathBuf::from("/a.js")),
            },
        );

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();

        let entry = ir.entry_function().unwrap();
        assert!(entry.instructions().any(|instruction| matches!(
            instruction.kind,
            InstructionKind::Literal { value: LiteralValue::Number(n) } if n == 43.0
        )));
    }

    #[test]
    fn reassigned_exports_are_not_published() {
        let (mut env, mut ir) = lower("export let K = 1; K = 2;");
        let mut constants = ProjectConstants::new();

        run_to_fixed_point(&mut ConstantPropagation::new(&mut constants), &mut ir, &mut env, 64).unwrap();

        assert!(constants.exports_of(&ir.path).is_none());
    }
}
