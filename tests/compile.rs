use std::path::Path;

use indoc::indoc;
use jsoptc::{
    CompileError, CompiledModule, CompilerOptions, MemoryResolver, Project, compile_project,
    project::dump_project_hir,
};
use pretty_assertions::assert_eq;

fn compile_files(files: &[(&str, &str)], entry: &str, options: &CompilerOptions) -> Result<Vec<CompiledModule>, CompileError> {
    let resolver = files
        .iter()
        .fold(MemoryResolver::new(), |resolver, (path, contents)| {
            resolver.with_file(*path, *contents)
        });

    let project = Project::load(Path::new(entry), &resolver)?;
    compile_project(&project, options)
}

fn compile(source: &str) -> String {
    let modules = compile_files(&[("/main.js", source)], "/main.js", &CompilerOptions::default()).unwrap();
    modules.into_iter().map(|module| module.code).collect()
}

#[test]
fn local_constants_fold_into_the_return() {
    let output = compile("function f(){ let x = 1; let y = 2; return x + y; }");

    assert_eq!(
        output,
        indoc! {"
            function f() {
              return 3;
            }
        "}
    );
}

#[test]
fn conditional_reassignment_round_trips_without_phi_artifacts() {
    let output = compile("let x = 1; if (cond) { x = 2; } console.log(x);");

    assert_eq!(
        output,
        indoc! {"
            let x = 1;
            if (cond) {
              x = 2;
            }
            console.log(x);
        "}
    );
}

#[test]
fn loops_are_emitted_as_a_single_while() {
    let output = compile("while (i < 10) { i = i + 1; }");

    assert_eq!(
        output,
        indoc! {"
            while (i < 10) {
              i = i + 1;
            }
        "}
    );
}

#[test]
fn unsupported_statements_are_carried_verbatim() {
    let source = indoc! {"
        class A {
          m() {
            return 1;
          }
        }
        log(new A());
    "};

    assert_eq!(compile(source), source);
}

#[test]
fn exported_constants_fold_across_modules() {
    let files = [
        ("/a.js", "export const K = 21 * 2;"),
        ("/b.js", "import { K } from \"./a\"; console.log(K + 1);"),
    ];

    let modules = compile_files(&files, "/b.js", &CompilerOptions::default()).unwrap();

    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0].path, Path::new("/a.js"));
    assert_eq!(
        modules[0].code,
        indoc! {"
            const K = 42;
            export { K };
        "}
    );
    assert_eq!(modules[1].path, Path::new("/b.js"));
    assert_eq!(
        modules[1].code,
        indoc! {r#"
            import { K } from "./a";
            console.log(43);
        "#}
    );
}

#[test]
fn imports_stay_unfolded_without_constant_propagation() {
    let files = [
        ("/a.js", "export const K = 42;"),
        ("/b.js", "import { K } from \"./a\"; console.log(K + 1);"),
    ];
    let options = CompilerOptions {
        enable_constant_propagation_pass: false,
        ..CompilerOptions::default()
    };

    let modules = compile_files(&files, "/b.js", &options).unwrap();

    assert!(modules[1].code.contains("console.log(K + 1);"));
}

#[test]
fn small_functions_are_inlined_at_their_call_sites() {
    let output = compile("function add(a, b) { return a + b; } console.log(add(1, 2));");

    assert_eq!(
        output,
        indoc! {"
            function add(a, b) {
              return a + b;
            }
            console.log(3);
        "}
    );
}

#[test]
fn recompiling_optimized_output_changes_nothing() {
    let sources = [
        "function f(){ let x = 1; let y = 2; return x + y; }",
        "let x = 1; if (cond) { x = 2; } console.log(x);",
        "let i = 0; while (i < 10) { if (i > 5) { break; } i = i + 1; } log(i);",
        "function add(a, b) { return a + b; } console.log(add(1, 2), add(x, 2));",
        "let x = 1; if (c) { let x = 2; log(x); } log(x);",
        "class A { m() { return 1; } } log(new A());",
        "var n = 0; do { n++; } while (n < 3); log(n);",
    ];

    for source in sources {
        let once = compile(source);
        let twice = compile(&once);

        assert_eq!(twice, once, "recompiling {source:?}");
    }
}

#[test]
fn bindings_used_by_verbatim_statements_keep_their_names() {
    let output = compile("var n = 0; do { n++; } while (n < 3); log(n);");

    assert!(output.starts_with("var n = 0;\n"));
    assert!(output.ends_with("log(n);\n"));
    assert!(!output.contains("n_1"));
}

#[test]
fn postfix_updates_used_as_values_compile() {
    let output = compile("let i = 0; while (i < 3) { log(i++); }");

    assert!(output.contains("while (i < 3) {"));
    assert!(output.contains("log(_t"));
}

#[test]
fn postfix_updates_keep_the_old_value() {
    let source = "let x = a(); let y = x++; log(x, y);";

    let modules = compile_files(&[("/main.js", source)], "/main.js", &CompilerOptions::unoptimized()).unwrap();

    assert_eq!(
        modules[0].code,
        indoc! {"
            let x = a();
            const _t0 = x;
            x = _t0 + 1;
            let y = _t0;
            log(x, y);
        "}
    );
}

#[test]
fn inlining_does_not_depend_on_merged_blocks() {
    let options = CompilerOptions {
        enable_merge_blocks_pass: false,
        ..CompilerOptions::default()
    };

    let modules = compile_files(
        &[("/main.js", "function f(a) { return a * 2; } log(f(21));")],
        "/main.js",
        &options,
    )
    .unwrap();

    assert_eq!(
        modules[0].code,
        indoc! {"
            function f(a) {
              return a * 2;
            }
            log(42);
        "}
    );
}

#[test]
fn unoptimized_output_keeps_every_statement() {
    let source = indoc! {"
        let x = 1;
        let y = x + 2;
        log(y);
    "};

    let modules = compile_files(&[("/main.js", source)], "/main.js", &CompilerOptions::unoptimized()).unwrap();

    assert_eq!(modules[0].code, source);
}

#[test]
fn continue_is_rejected_as_unsupported() {
    let error = compile_files(
        &[("/main.js", "while (a) { if (b) { continue; } f(); }")],
        "/main.js",
        &CompilerOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(error, CompileError::UnsupportedNode { .. }));
    assert!(error.is_user_error());
}

#[test]
fn missing_modules_are_reported() {
    let error = compile_files(
        &[("/main.js", "import { x } from \"./nowhere\"; log(x);")],
        "/main.js",
        &CompilerOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(error, CompileError::ModuleNotFound { .. }));
}

#[test]
fn hir_dump_lists_every_module() {
    let resolver = MemoryResolver::new()
        .with_file("/a.js", "export const K = 1;")
        .with_file("/main.js", "import { K } from \"./a\"; log(K);");
    let project = Project::load(Path::new("/main.js"), &resolver).unwrap();

    let dumped = dump_project_hir(&project, &CompilerOptions::default()).unwrap();
    let text: String = dumped
        .iter()
        .map(|module| strip_ansi_escapes::strip_str(&module.code))
        .collect();

    assert!(text.contains("module /a.js"));
    assert!(text.contains("module /main.js"));
    assert!(!text.contains('\u{1b}'));
}
