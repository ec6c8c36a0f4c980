//! The backend turns optimized HIR back into source. Code generation
//! rebuilds a syntax tree from each function's blocks and the frontend's
//! printer renders it.
//!
//! Output names are decided once per module before any function is
//! generated, see [`naming`].

use crate::{
    error::Result,
    frontend::ast,
    middle::hir::{Environment, ModuleIR},
};

mod codegen;
mod naming;

/// Rebuilds the syntax tree of a module whose functions are out of SSA form
pub fn generate_module(module: &ModuleIR, env: &Environment) -> Result<ast::Module> {
    codegen::ModuleCodegen::new(module, env).generate()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::CompilerOptions,
        frontend::printer::Printer,
        middle::optimization::{ProjectConstants, optimize_module, test_support::lower},
    };

    fn unoptimized(source: &str) -> String {
        let (env, ir) = lower(source);
        Printer::print_module(&generate_module(&ir, &env).unwrap())
    }

    fn optimized(source: &str) -> String {
        let (mut env, mut ir) = lower(source);
        let mut constants = ProjectConstants::new();
        optimize_module(&mut ir, &mut env, &CompilerOptions::default(), &mut constants).unwrap();

        Printer::print_module(&generate_module(&ir, &env).unwrap())
    }

    #[test]
    fn conditional_assignment_keeps_its_shape() {
        let source = indoc! {"
            let x = 1;
            if (c) {
              x = 2;
            }
            log(x);
        "};

        assert_eq!(unoptimized(source), source);
        assert_eq!(optimized(source), source);
    }

    #[test]
    fn constants_fold_into_their_reader() {
        assert_eq!(
            optimized("const a = 1; const b = 2; console.log(a + b);"),
            "console.log(3);\n"
        );
    }

    #[test]
    fn loops_print_as_while() {
        let expected = indoc! {"
            let i = 0;
            while (i < 10) {
              i = i + 1;
            }
        "};

        assert_eq!(optimized("let i = 0; while (i < 10) { i = i + 1; }"), expected);
        assert_eq!(
            optimized("for (let i = 0; i < 10; i = i + 1) {}"),
            expected
        );
    }

    #[test]
    fn break_leaves_the_innermost_loop() {
        let expected = indoc! {"
            let i = 0;
            while (true) {
              if (i > 5) {
                break;
              }
              i = i + 1;
            }
        "};

        assert_eq!(
            unoptimized("let i = 0; while (true) { if (i > 5) { break; } i = i + 1; }"),
            expected
        );
    }

    #[test]
    fn shadowed_bindings_get_distinct_names() {
        let expected = indoc! {"
            let x = 1;
            if (c) {
              let x_1 = 2;
              log(x_1);
            }
            log(x);
        "};

        assert_eq!(
            unoptimized("let x = 1; if (c) { let x = 2; log(x); } log(x);"),
            expected
        );
    }

    #[test]
    fn else_only_conditionals_are_negated() {
        let expected = indoc! {"
            let x = 1;
            if (!c) {
              x = 2;
            }
            log(x);
        "};

        assert_eq!(
            unoptimized("let x = 1; if (c) {} else { x = 2; } log(x);"),
            expected
        );
    }

    #[test]
    fn calls_keep_their_order() {
        let expected = indoc! {"
            let a = f();
            g();
            log(a);
        "};

        assert_eq!(unoptimized("let a = f(); g(); log(a);"), expected);
    }

    #[test]
    fn values_read_twice_are_kept_in_a_temporary() {
        let expected = indoc! {"
            let x = 0;
            const _t0 = x;
            x = _t0 + 1;
            log(_t0);
            log(x);
        "};

        assert_eq!(unoptimized("let x = 0; log(x++); log(x);"), expected);
    }

    #[test]
    fn functions_and_arrows_are_rebuilt() {
        let source = indoc! {"
            function add(a, b) {
              return a + b;
            }
            const twice = (x) => x * 2;
            log(add(1, 2), twice(3));
        "};

        assert_eq!(unoptimized(source), source);
    }
}
