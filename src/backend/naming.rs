//! Output names for declarations.
//!
//! SSA versions and phis of a declaration all print under the declaration's
//! name. Names only change when two declarations would otherwise collide in
//! the same function (shadowed block scopes, inlined bodies) or when an
//! inner declaration would hide an outer one the function still refers to.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::{
        ast::{
            self,
            visit::{self, Visitor},
        },
        intern::InternedSymbol,
    },
    middle::hir::{
        DeclarationId, DeclarationKind, Environment, FunctionId, InstructionKind, ModuleIR,
        UnsupportedNode,
    },
};

#[derive(Debug, Default)]
pub struct Names {
    names: HashMap<DeclarationId, InternedSymbol>,
    /// Every name the output may contain: globals, names inside unsupported
    /// nodes and every assigned declaration name
    taken: HashSet<InternedSymbol>,
    next_temporary: usize,
}

impl Names {
    pub fn assign(module: &ModuleIR, env: &Environment) -> Self {
        let globals = global_names(module, env);
        let mut taken = globals.clone();
        let references = subtree_references(module, env);

        let mut names = HashMap::new();

        // Parents are created before their children, so outer names are
        // settled by the time an inner function is named
        for function in module.functions.keys() {
            let Some(referenced) = references.get(function) else {
                continue;
            };

            let mut in_scope = globals.clone();
            in_scope.extend(
                referenced
                    .iter()
                    .filter(|declaration| env.declaration(**declaration).owner != *function)
                    .filter_map(|declaration| names.get(declaration).copied()),
            );

            for declaration in referenced {
                let info = env.declaration(*declaration);
                if info.owner != *function || info.kind == DeclarationKind::Temporary {
                    continue;
                }
                let Some(base) = info.name else { continue };

                let mut candidate = base;
                let mut suffix = 1;
                while in_scope.contains(&candidate) {
                    candidate = InternedSymbol::new(&format!("{base}_{suffix}"));
                    suffix += 1;
                }

                in_scope.insert(candidate);
                taken.insert(candidate);
                names.insert(*declaration, candidate);
            }
        }

        Self {
            names,
            taken,
            next_temporary: 0,
        }
    }

    /// The printed name of a declaration. Declarations nobody refers to keep
    /// their source name.
    pub fn get(&self, declaration: DeclarationId, env: &Environment) -> Option<InternedSymbol> {
        self.names
            .get(&declaration)
            .copied()
            .or_else(|| env.declaration(declaration).name)
    }

    /// A name for a materialized temporary, distinct from everything else in
    /// the module
    pub fn fresh_temporary(&mut self) -> InternedSymbol {
        loop {
            let candidate = InternedSymbol::new(&format!("_t{}", self.next_temporary));
            self.next_temporary += 1;

            if self.taken.insert(candidate) {
                return candidate;
            }
        }
    }
}

#[derive(Default)]
struct IdentifierCollector {
    names: HashSet<InternedSymbol>,
}

impl<'ast> Visitor<'ast> for IdentifierCollector {
    fn visit_identifier(&mut self, identifier: &'ast ast::Identifier) {
        self.names.insert(identifier.symbol);
    }
}

/// Names the module uses without declaring them
fn global_names(module: &ModuleIR, env: &Environment) -> HashSet<InternedSymbol> {
    let mut collector = IdentifierCollector::default();
    collector.names.extend(module.globals.keys().copied());

    for function in module.functions.values() {
        for instruction in function.instructions() {
            match &instruction.kind {
                InstructionKind::LoadGlobal { name } | InstructionKind::StoreGlobal { name, .. } => {
                    collector.names.insert(*name);
                }
                InstructionKind::ImportSpecifier { local, .. } => {
                    collector.names.insert(*local);
                }
                InstructionKind::Unsupported { node, bindings } => {
                    let mut inner = IdentifierCollector::default();
                    match node {
                        UnsupportedNode::Statement(statement) => {
                            visit::walk_statement(&mut inner, statement)
                        }
                        UnsupportedNode::Expression(expression) => {
                            visit::walk_expression(&mut inner, expression)
                        }
                    }

                    // Names resolved to the module's own declarations are
                    // renamed along with them
                    let defined = instruction.place.declaration();
                    let own: HashSet<InternedSymbol> = bindings
                        .iter()
                        .map(|(symbol, _)| *symbol)
                        .chain(
                            env.declaration(defined)
                                .name
                                .filter(|_| !env.is_temporary(defined)),
                        )
                        .collect();

                    collector
                        .names
                        .extend(inner.names.difference(&own).copied());
                }
                _ => {}
            }
        }
    }

    collector.names
}

/// Declarations referenced by each function or any function nested in it
fn subtree_references(
    module: &ModuleIR,
    env: &Environment,
) -> BTreeMap<FunctionId, BTreeSet<DeclarationId>> {
    let mut references: BTreeMap<FunctionId, BTreeSet<DeclarationId>> = BTreeMap::new();

    for function in module.functions.values() {
        let mut direct = BTreeSet::new();

        for instruction in function.instructions() {
            let places = instruction.reads().into_iter().chain(instruction.defined_places());
            direct.extend(
                places
                    .map(|place| place.declaration())
                    .filter(|declaration| !env.is_temporary(*declaration)),
            );
        }
        for place in function.reads() {
            if !env.is_temporary(place.declaration()) {
                direct.insert(place.declaration());
            }
        }

        let mut current = Some(function.id);
        while let Some(id) = current {
            references.entry(id).or_default().extend(direct.iter().copied());
            current = module.functions.get(&id).and_then(|function| function.parent);
        }
    }

    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::optimization::test_support::lower;

    fn name_of(names: &Names, env: &Environment, source_name: &str) -> Vec<&'static str> {
        let mut found: Vec<_> = env
            .declarations
            .enumerate()
            .filter(|(_, declaration)| declaration.name.is_some_and(|n| n.value() == source_name))
            .filter_map(|(id, _)| names.names.get(&id))
            .map(|symbol| symbol.value())
            .collect();
        found.sort();
        found
    }

    #[test]
    fn shadowed_block_bindings_are_renamed() {
        let (env, ir) = lower("let x = 1; if (c) { let x = 2; log(x); } log(x);");
        let names = Names::assign(&ir, &env);

        assert_eq!(name_of(&names, &env, "x"), vec!["x", "x_1"]);
    }

    #[test]
    fn inner_functions_keep_names_they_do_not_hide() {
        let (env, ir) = lower("let a = 1; function f() { let a = 2; return a; } log(a);");
        let names = Names::assign(&ir, &env);

        assert_eq!(name_of(&names, &env, "a"), vec!["a", "a"]);
    }

    #[test]
    fn bindings_inside_verbatim_nodes_keep_their_names() {
        let (env, ir) = lower("var n = 0; do { n++; } while (n < 3); class A {} log(n, new A());");
        let names = Names::assign(&ir, &env);

        assert_eq!(name_of(&names, &env, "n"), vec!["n"]);
        assert_eq!(name_of(&names, &env, "A"), vec!["A"]);
    }

    #[test]
    fn globals_are_never_reused() {
        let (env, ir) = lower("function f() { let console = 1; return console; } console.log(f());");
        let names = Names::assign(&ir, &env);

        assert_eq!(name_of(&names, &env, "console"), vec!["console_1"]);
    }
}
