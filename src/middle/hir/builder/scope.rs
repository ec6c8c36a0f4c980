use std::collections::BTreeMap;

use crate::{frontend::intern::InternedSymbol, middle::hir::DeclarationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    bindings: BTreeMap<InternedSymbol, DeclarationId>,
}

/// Lexical scopes of the code being lowered. Inner scopes shadow outer ones.
/// Names not bound in any scope resolve to module globals (imports) or are
/// treated as free globals by the builder.
#[derive(Debug, Default)]
pub struct ScopeStack {
    stack: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.stack.push(Scope {
            kind,
            bindings: BTreeMap::new(),
        });
    }

    pub fn pop(&mut self) {
        assert!(
            self.stack.pop().is_some(),
            "attempted to pop a scope from an empty scope stack"
        );
    }

    /// Binds a name in the innermost scope
    pub fn set_data(&mut self, name: InternedSymbol, declaration: DeclarationId) {
        let scope = self
            .stack
            .last_mut()
            .expect("tried to bind a name without any scope");

        scope.bindings.insert(name, declaration);
    }

    /// Binds a name in the innermost function scope. Used for `var` and
    /// function declarations which ignore block scoping.
    pub fn set_function_data(&mut self, name: InternedSymbol, declaration: DeclarationId) {
        let scope = self
            .stack
            .iter_mut()
            .rev()
            .find(|scope| scope.kind == ScopeKind::Function)
            .expect("tried to bind a hoisted name outside of a function");

        scope.bindings.insert(name, declaration);
    }

    /// Looks up a name from the innermost scope outwards
    pub fn get_data(&self, name: InternedSymbol) -> Option<DeclarationId> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(&name).copied())
    }

    /// Looks up a name in the innermost scope only
    pub fn get_shallow_data(&self, name: InternedSymbol) -> Option<DeclarationId> {
        self.stack
            .last()
            .and_then(|scope| scope.bindings.get(&name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut scopes = ScopeStack::new();
        let x = InternedSymbol::new("x");

        scopes.push(ScopeKind::Function);
        scopes.set_data(x, DeclarationId(0));
        scopes.push(ScopeKind::Block);
        scopes.set_data(x, DeclarationId(1));

        assert_eq!(scopes.get_data(x), Some(DeclarationId(1)));

        scopes.pop();
        assert_eq!(scopes.get_data(x), Some(DeclarationId(0)));
        assert_eq!(scopes.get_data(InternedSymbol::new("y")), None);
    }

    #[test]
    fn hoisted_bindings_skip_block_scopes() {
        let mut scopes = ScopeStack::new();
        let v = InternedSymbol::new("v");

        scopes.push(ScopeKind::Function);
        scopes.push(ScopeKind::Block);
        scopes.set_function_data(v, DeclarationId(3));
        assert_eq!(scopes.get_shallow_data(v), None);

        scopes.pop();
        assert_eq!(scopes.get_shallow_data(v), Some(DeclarationId(3)));
    }
}
