//! The module graph of a program and the driver compiling it.
//!
//! A project is loaded from its entry module by following relative import
//! specifiers. Modules are compiled producers first (a post-order over the
//! import graph) so constants a module exports are known by the time its
//! importers are optimized.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Component, Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    backend::generate_module,
    config::CompilerOptions,
    error::{CompileError, Result},
    frontend::{
        SourceFile, SourceFileOrigin,
        ast::{self, ExportDeclaration, StatementKind},
        parser::Parser,
        printer::Printer,
    },
    middle::{
        hir::{Environment, ModuleIR, builder::build_module, pretty_print::pretty_print_module},
        optimization::{ProjectConstants, optimize_module},
        ssa::{build_ssa, eliminate_ssa},
    },
};

/// Extensions tried, in order, when a specifier doesn't name a file exactly
const CANDIDATE_SUFFIXES: &[&str] = &["", ".ts", ".js", ".mjs", "/index.ts", "/index.js"];

pub trait ModuleResolver {
    /// Canonical path of the module a relative `specifier` written in
    /// `importer` refers to
    fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf>;

    fn read(&self, path: &Path) -> Result<String>;
}

/// Whether the specifier points into the project rather than at a package
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

fn candidates(specifier: &str, importer: &Path) -> impl Iterator<Item = PathBuf> {
    let base = importer
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(specifier);

    CANDIDATE_SUFFIXES.iter().map(move |suffix| {
        let mut candidate = base.clone().into_os_string();
        candidate.push(suffix);
        normalize(Path::new(&candidate))
    })
}

/// Removes `.` and `..` components without touching the file system
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component),
        }
    }

    normalized
}

fn not_found(specifier: &str, importer: &Path) -> CompileError {
    CompileError::ModuleNotFound {
        specifier: specifier.to_owned(),
        importer: importer.display().to_string(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemResolver;

impl ModuleResolver for FileSystemResolver {
    fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf> {
        let found = candidates(specifier, importer)
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| not_found(specifier, importer))?;

        fs::canonicalize(&found).map_err(|source| CompileError::Io { path: found, source })
    }

    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_owned(),
            source,
        })
    }
}

/// Resolves against a fixed set of in-memory files
#[derive(Debug, Default, Clone)]
pub struct MemoryResolver {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.insert(normalize(&path.into()), contents.into());
        self
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf> {
        candidates(specifier, importer)
            .find(|candidate| self.files.contains_key(candidate))
            .ok_or_else(|| not_found(specifier, importer))
    }

    fn read(&self, path: &Path) -> Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| CompileError::Io {
                path: path.to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}

#[derive(Debug)]
pub struct ProjectModule {
    pub path: PathBuf,
    pub source: SourceFile,
    pub ast: ast::Module,
    /// Resolved path of every relative specifier the module imports from
    pub imports: BTreeMap<String, PathBuf>,
}

#[derive(Debug)]
pub struct Project {
    entry: PathBuf,
    modules: BTreeMap<PathBuf, ProjectModule>,
}

impl Project {
    /// Parses the entry module and every module reachable from it through
    /// relative imports
    pub fn load(entry: &Path, resolver: &dyn ModuleResolver) -> Result<Self> {
        let entry = match resolver.resolve(&format!("./{}", file_name(entry)), entry) {
            Ok(path) => path,
            Err(_) => normalize(entry),
        };

        let mut modules = BTreeMap::new();
        let mut pending = vec![entry.clone()];

        while let Some(path) = pending.pop() {
            if modules.contains_key(&path) {
                continue;
            }

            let source = SourceFile {
                contents: resolver.read(&path)?,
                origin: SourceFileOrigin::File(path.clone()),
            };
            let ast = Parser::parse_module(&source)?;

            let mut imports = BTreeMap::new();
            for specifier in import_specifiers(&ast) {
                if !is_relative(&specifier) || imports.contains_key(&specifier) {
                    continue;
                }

                let resolved = resolver.resolve(&specifier, &path)?;
                pending.push(resolved.clone());
                imports.insert(specifier, resolved);
            }

            debug!(path = %path.display(), imports = imports.len(), "loaded module");
            modules.insert(
                path.clone(),
                ProjectModule {
                    path,
                    source,
                    ast,
                    imports,
                },
            );
        }

        Ok(Self { entry, modules })
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn module(&self, path: &Path) -> Option<&ProjectModule> {
        self.modules.get(path)
    }

    /// Module paths with every module after the modules it imports. Import
    /// cycles are cut where they close.
    pub fn post_order(&self) -> Vec<PathBuf> {
        let mut order = Vec::with_capacity(self.modules.len());
        let mut visited = BTreeSet::new();

        // Explicit stack of (module, whether its imports were pushed)
        let mut stack = vec![(self.entry.clone(), false)];
        while let Some((path, expanded)) = stack.pop() {
            if expanded {
                order.push(path);
                continue;
            }
            if !visited.insert(path.clone()) {
                continue;
            }

            stack.push((path.clone(), true));
            if let Some(module) = self.modules.get(&path) {
                for import in module.imports.values().rev() {
                    if !visited.contains(import) {
                        stack.push((import.clone(), false));
                    }
                }
            }
        }

        order
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Specifiers of `import ... from` and `export ... from` statements, in order
fn import_specifiers(module: &ast::Module) -> Vec<String> {
    module
        .body
        .iter()
        .filter_map(|statement| match &statement.kind {
            StatementKind::Import(import) => Some(import.source.clone()),
            StatementKind::Export(ExportDeclaration::Named {
                source: Some(source),
                ..
            }) => Some(source.clone()),
            _ => None,
        })
        .collect()
}

/// Output of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub path: PathBuf,
    pub code: String,
}

/// Compiles every module of the project, producers first. The entry module
/// comes last.
pub fn compile_project(project: &Project, options: &CompilerOptions) -> Result<Vec<CompiledModule>> {
    let mut constants = ProjectConstants::new();
    let mut compiled = Vec::new();

    for path in project.post_order() {
        let Some(module) = project.module(&path) else {
            continue;
        };

        let (env, ir) = lower_module(module, options, &mut constants)?;
        let code = Printer::print_module(&generate_module(&ir, &env)?);

        info!(path = %path.display(), bytes = code.len(), "compiled module");
        compiled.push(CompiledModule { path, code });
    }

    Ok(compiled)
}

/// Like [`compile_project`] but renders each module's optimized HIR instead
/// of code
pub fn dump_project_hir(project: &Project, options: &CompilerOptions) -> Result<Vec<CompiledModule>> {
    let mut constants = ProjectConstants::new();
    let mut dumped = Vec::new();

    for path in project.post_order() {
        let Some(module) = project.module(&path) else {
            continue;
        };

        let (_, ir) = lower_module(module, options, &mut constants)?;
        dumped.push(CompiledModule {
            path,
            code: pretty_print_module(&ir),
        });
    }

    Ok(dumped)
}

/// Builds, converts through SSA and optimizes one module
fn lower_module(
    module: &ProjectModule,
    options: &CompilerOptions,
    constants: &mut ProjectConstants,
) -> Result<(Environment, ModuleIR)> {
    let mut env = Environment::new();
    let mut ir = build_module(&mut env, module.path.clone(), &module.ast)?;

    for binding in ir.globals.values_mut() {
        binding.resolved = module.imports.get(&binding.source).cloned();
    }

    for function in ir.functions.values_mut() {
        build_ssa(function, &mut env)?;
        eliminate_ssa(function, &mut env)?;
    }

    if options.any_pass_enabled() {
        optimize_module(&mut ir, &mut env, options, constants)?;
    }

    Ok((env, ir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specifiers_try_extensions_and_index_files() {
        let resolver = MemoryResolver::new()
            .with_file("/src/main.ts", "")
            .with_file("/src/a.ts", "")
            .with_file("/src/lib/index.js", "");
        let importer = Path::new("/src/main.ts");

        assert_eq!(resolver.resolve("./a", importer).unwrap(), PathBuf::from("/src/a.ts"));
        assert_eq!(
            resolver.resolve("./lib", importer).unwrap(),
            PathBuf::from("/src/lib/index.js")
        );
        assert_eq!(
            resolver.resolve("../src/./a.ts", importer).unwrap(),
            PathBuf::from("/src/a.ts")
        );
        assert!(matches!(
            resolver.resolve("./missing", importer),
            Err(CompileError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn post_order_puts_producers_first() {
        let resolver = MemoryResolver::new()
            .with_file("/main.js", "import { b } from \"./b\"; import { a } from \"./a\"; log(a, b);")
            .with_file("/a.js", "export const a = 1;")
            .with_file("/b.js", "import { a } from \"./a\"; export const b = a;")
            .with_file("/unused.js", "export const u = 0;");

        let project = Project::load(Path::new("/main.js"), &resolver).unwrap();

        assert_eq!(
            project.post_order(),
            vec![
                PathBuf::from("/a.js"),
                PathBuf::from("/b.js"),
                PathBuf::from("/main.js")
            ]
        );
    }

    #[test]
    fn import_cycles_terminate() {
        let resolver = MemoryResolver::new()
            .with_file("/a.js", "import { b } from \"./b\"; export const a = 1;")
            .with_file("/b.js", "import { a } from \"./a\"; export const b = 2;");

        let project = Project::load(Path::new("/a.js"), &resolver).unwrap();

        assert_eq!(
            project.post_order(),
            vec![PathBuf::from("/b.js"), PathBuf::from("/a.js")]
        );
    }

    #[test]
    fn package_imports_are_left_alone() {
        let resolver =
            MemoryResolver::new().with_file("/main.js", "import React from \"react\"; log(React);");

        let project = Project::load(Path::new("/main.js"), &resolver).unwrap();

        assert!(project.module(Path::new("/main.js")).unwrap().imports.is_empty());
    }
}
