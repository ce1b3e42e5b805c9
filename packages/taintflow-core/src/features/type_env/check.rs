//! The diagnostic-producing layer
//!
//! Runs over one preprocessed module and emits the type-check diagnostic
//! categories the analysis surfaces: undefined names, unresolved imports,
//! strict-mode annotation requirements, malformed decorations, and
//! unawaited awaitables. Line-scoped suppressions and the module mode are
//! applied before anything is returned.

use super::environment::TypeEnvironment;
use crate::features::source_env::ast::{
    Expr, FunctionDef, ParsedSource, SourceMode, Stmt,
};
use crate::features::source_env::ProcessedSource;
use crate::shared::models::{Diagnostic, DiagnosticCode, Qualifier};
use rustc_hash::FxHashSet;
use std::path::Path;

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bin", "bool", "breakpoint", "bytearray", "bytes", "callable", "chr",
    "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate", "eval",
    "exec", "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash",
    "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list", "locals",
    "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
    "property", "range", "repr", "reversed", "round", "set", "setattr", "slice", "sorted",
    "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip", "__import__",
    "__name__", "__file__", "__doc__", "__all__", "BaseException", "Exception", "ArithmeticError",
    "AttributeError", "ImportError", "IndexError", "IOError", "KeyError", "KeyboardInterrupt",
    "NotImplementedError", "OSError", "OverflowError", "RuntimeError", "StopIteration",
    "TypeError", "ValueError", "ZeroDivisionError", "NotImplemented", "Ellipsis", "self", "cls",
];

/// Check one module; the caller memoizes.
pub fn check_source(
    processed: &ProcessedSource,
    path: &Path,
    env: &TypeEnvironment,
) -> Vec<Diagnostic> {
    let source = &processed.source;
    if source.mode == SourceMode::IgnoreAll {
        return Vec::new();
    }

    let mut diagnostics = Vec::new();
    let mut checker = Checker {
        processed,
        path,
        env,
        diagnostics: &mut diagnostics,
        strict: source.mode == SourceMode::Strict,
    };
    checker.check_module(source);

    apply_suppressions(source, diagnostics)
}

fn apply_suppressions(source: &ParsedSource, diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    if source.suppressions.is_empty() {
        return diagnostics;
    }
    diagnostics
        .into_iter()
        .filter(|d| {
            !source.suppressions.iter().any(|s| {
                s.line == d.location.line && (s.codes.is_empty() || s.codes.contains(&d.code.0))
            })
        })
        .collect()
}

struct Checker<'a> {
    processed: &'a ProcessedSource,
    path: &'a Path,
    env: &'a TypeEnvironment,
    diagnostics: &'a mut Vec<Diagnostic>,
    strict: bool,
}

impl<'a> Checker<'a> {
    fn check_module(&mut self, source: &ParsedSource) {
        self.check_imports(source);

        let module_scope: FxHashSet<String> = self
            .processed
            .toplevel_names
            .iter()
            .cloned()
            .chain(self.processed.import_aliases.keys().cloned())
            .collect();
        self.check_block(&source.statements, &mut vec![module_scope], true);
    }

    fn check_imports(&mut self, source: &ParsedSource) {
        if !self.strict {
            // Unknown imports fall back to Any in gradual mode.
            return;
        }
        for stmt in &source.statements {
            let (modules, span) = match stmt {
                Stmt::Import { names, span } => (
                    names
                        .iter()
                        .map(|n| n.name.clone())
                        .collect::<Vec<_>>(),
                    *span,
                ),
                Stmt::ImportFrom { module, span, .. } => (vec![module.as_str().to_string()], *span),
                _ => continue,
            };
            for module in modules {
                let qualifier = Qualifier::new(module.clone());
                if self.env.source_env().module_path(&qualifier).is_none() {
                    self.diagnostics.push(Diagnostic::error(
                        DiagnosticCode::UNDEFINED_IMPORT,
                        self.path,
                        span,
                        format!("Could not find a module corresponding to import `{module}`"),
                    ));
                }
            }
        }
    }

    fn check_block(
        &mut self,
        statements: &[Stmt],
        scopes: &mut Vec<FxHashSet<String>>,
        toplevel: bool,
    ) {
        for stmt in statements {
            self.check_statement(stmt, scopes, toplevel);
        }
    }

    fn check_statement(
        &mut self,
        stmt: &Stmt,
        scopes: &mut Vec<FxHashSet<String>>,
        toplevel: bool,
    ) {
        match stmt {
            Stmt::FunctionDef(def) => self.check_function(def, scopes),
            Stmt::ClassDef(class) => {
                for base in &class.bases {
                    self.check_expr(base, scopes);
                }
                let mut class_scope: FxHashSet<String> = FxHashSet::default();
                collect_assigned(&class.body, &mut class_scope);
                scopes.push(class_scope);
                self.check_block(&class.body, scopes, false);
                scopes.pop();
            }
            Stmt::Assign {
                targets,
                annotation,
                value,
                span,
            } => {
                if let Some(value) = value {
                    self.check_expr(value, scopes);
                }
                for target in targets {
                    self.bind_target(target, scopes);
                }
                if self.strict && toplevel && annotation.is_none() {
                    for target in targets {
                        if let Expr::Name { id, .. } = target {
                            if !id.starts_with('_') && value.is_some() {
                                self.diagnostics.push(Diagnostic::warning(
                                    DiagnosticCode::MISSING_GLOBAL_ANNOTATION,
                                    self.path,
                                    *span,
                                    format!("Globally accessible variable `{id}` has no type specified"),
                                ));
                            }
                        }
                    }
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                self.check_expr(value, scopes);
                self.check_expr(target, scopes);
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value, scopes);
                }
            }
            Stmt::Expr { value, span } => {
                self.check_expr(value, scopes);
                self.check_unawaited(value, *span);
            }
            Stmt::If {
                test, body, orelse, ..
            }
            | Stmt::While {
                test, body, orelse, ..
            } => {
                self.check_expr(test, scopes);
                self.check_block(body, scopes, toplevel);
                self.check_block(orelse, scopes, toplevel);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                self.check_expr(iter, scopes);
                self.bind_target(target, scopes);
                self.check_block(body, scopes, toplevel);
                self.check_block(orelse, scopes, toplevel);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                self.check_block(body, scopes, toplevel);
                for handler in handlers {
                    if let Some(exception) = &handler.exception {
                        self.check_expr(exception, scopes);
                    }
                    if let Some(name) = &handler.name {
                        scopes.last_mut().unwrap().insert(name.clone());
                    }
                    self.check_block(&handler.body, scopes, toplevel);
                }
                self.check_block(orelse, scopes, toplevel);
                self.check_block(finalbody, scopes, toplevel);
            }
            Stmt::With { items, body, .. } => {
                for (expr, alias) in items {
                    self.check_expr(expr, scopes);
                    if let Some(alias) = alias {
                        self.bind_target(alias, scopes);
                    }
                }
                self.check_block(body, scopes, toplevel);
            }
            Stmt::Raise { exception, .. } => {
                if let Some(exception) = exception {
                    self.check_expr(exception, scopes);
                }
            }
            Stmt::Global { names, .. } => {
                for name in names {
                    scopes.last_mut().unwrap().insert(name.clone());
                }
            }
            Stmt::Delete { targets, .. } => {
                for target in targets {
                    self.check_expr(target, scopes);
                }
            }
            Stmt::Assert { test, message, .. } => {
                self.check_expr(test, scopes);
                if let Some(message) = message {
                    self.check_expr(message, scopes);
                }
            }
            Stmt::Import { .. }
            | Stmt::ImportFrom { .. }
            | Stmt::Pass { .. }
            | Stmt::Break { .. }
            | Stmt::Continue { .. } => {}
        }
    }

    fn check_function(&mut self, def: &FunctionDef, scopes: &mut Vec<FxHashSet<String>>) {
        if self.strict && def.returns.is_none() && def.name != "__init__" {
            self.diagnostics.push(Diagnostic::warning(
                DiagnosticCode::MISSING_RETURN_ANNOTATION,
                self.path,
                def.span,
                format!("Function `{}` has no return annotation", def.name),
            ));
        }
        for decorator in &def.decorators {
            if decorator.as_dotted_name().is_none()
                && !matches!(decorator, Expr::Call { .. })
            {
                self.diagnostics.push(Diagnostic::error(
                    DiagnosticCode::INVALID_DECORATION,
                    self.path,
                    decorator.span(),
                    "Decorator is not a simple name and cannot be resolved".to_string(),
                ));
            } else {
                self.check_expr(decorator, scopes);
            }
        }
        for param in &def.params {
            if let Some(default) = &param.default {
                self.check_expr(default, scopes);
            }
        }

        let mut function_scope: FxHashSet<String> =
            def.params.iter().map(|p| p.name.clone()).collect();
        collect_assigned(&def.body, &mut function_scope);
        scopes.push(function_scope);
        self.check_block(&def.body, scopes, false);
        scopes.pop();
    }

    fn bind_target(&mut self, target: &Expr, scopes: &mut Vec<FxHashSet<String>>) {
        match target {
            Expr::Name { id, .. } => {
                scopes.last_mut().unwrap().insert(id.clone());
            }
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                for elt in elts {
                    self.bind_target(elt, scopes);
                }
            }
            Expr::Starred { value, .. } => self.bind_target(value, scopes),
            // Attribute/subscript writes read their base object.
            other => self.check_expr(other, scopes),
        }
    }

    fn check_expr(&mut self, expr: &Expr, scopes: &mut Vec<FxHashSet<String>>) {
        match expr {
            Expr::Name { id, span } => {
                let defined = scopes.iter().any(|s| s.contains(id))
                    || BUILTINS.contains(&id.as_str())
                    || self.processed.import_aliases.contains_key(id)
                    || self.processed.toplevel_names.contains(id);
                if !defined {
                    self.diagnostics.push(Diagnostic::error(
                        DiagnosticCode::UNDEFINED_NAME,
                        self.path,
                        *span,
                        format!("Undefined name `{id}`"),
                    ));
                }
            }
            Expr::Attribute { value, .. } => self.check_expr(value, scopes),
            Expr::Subscript { value, index, .. } => {
                self.check_expr(value, scopes);
                self.check_expr(index, scopes);
            }
            Expr::Call {
                func,
                args,
                keywords,
                ..
            } => {
                self.check_expr(func, scopes);
                for arg in args {
                    self.check_expr(arg, scopes);
                }
                for (_, value) in keywords {
                    self.check_expr(value, scopes);
                }
            }
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                for elt in elts {
                    self.check_expr(elt, scopes);
                }
            }
            Expr::Dict { keys, values, .. } => {
                for key in keys.iter().flatten() {
                    self.check_expr(key, scopes);
                }
                for value in values {
                    self.check_expr(value, scopes);
                }
            }
            Expr::BinOp { left, right, .. } => {
                self.check_expr(left, scopes);
                self.check_expr(right, scopes);
            }
            Expr::BoolOp { values, .. } => {
                for value in values {
                    self.check_expr(value, scopes);
                }
            }
            Expr::UnaryOp { operand, .. } => self.check_expr(operand, scopes),
            Expr::Compare {
                left, comparators, ..
            } => {
                self.check_expr(left, scopes);
                for comparator in comparators {
                    self.check_expr(comparator, scopes);
                }
            }
            Expr::Await { value, .. } | Expr::Starred { value, .. } => {
                self.check_expr(value, scopes)
            }
            Expr::Lambda { params, body, .. } => {
                let lambda_scope: FxHashSet<String> =
                    params.iter().map(|p| p.name.clone()).collect();
                scopes.push(lambda_scope);
                self.check_expr(body, scopes);
                scopes.pop();
            }
            Expr::FString { parts, .. } => {
                for part in parts {
                    self.check_expr(part, scopes);
                }
            }
            Expr::Ternary {
                test, body, orelse, ..
            } => {
                self.check_expr(test, scopes);
                self.check_expr(body, scopes);
                self.check_expr(orelse, scopes);
            }
            Expr::Constant { .. } | Expr::Unknown { .. } => {}
        }
    }

    /// A bare call of an async define is an awaitable that is never awaited.
    fn check_unawaited(&mut self, value: &Expr, span: crate::shared::models::Span) {
        let Expr::Call { func, .. } = value else {
            return;
        };
        let Some(dotted) = func.as_dotted_name() else {
            return;
        };
        let qualified = self.processed.qualify(&dotted);
        if let Some(signature) = self.env.signature_of(&qualified) {
            if signature.is_async {
                self.diagnostics.push(Diagnostic::warning(
                    DiagnosticCode::UNAWAITED_AWAITABLE,
                    self.path,
                    span,
                    format!("`{qualified}` is never awaited"),
                ));
            }
        }
    }
}

fn collect_assigned(statements: &[Stmt], out: &mut FxHashSet<String>) {
    for stmt in statements {
        match stmt {
            Stmt::FunctionDef(def) => {
                out.insert(def.name.clone());
            }
            Stmt::ClassDef(class) => {
                out.insert(class.name.clone());
            }
            Stmt::Assign { targets, .. } => {
                for target in targets {
                    collect_target_names(target, out);
                }
            }
            Stmt::AugAssign { target, .. } => collect_target_names(target, out),
            Stmt::For {
                target,
                body,
                orelse,
                ..
            } => {
                collect_target_names(target, out);
                collect_assigned(body, out);
                collect_assigned(orelse, out);
            }
            Stmt::If { body, orelse, .. } | Stmt::While { body, orelse, .. } => {
                collect_assigned(body, out);
                collect_assigned(orelse, out);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                collect_assigned(body, out);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        out.insert(name.clone());
                    }
                    collect_assigned(&handler.body, out);
                }
                collect_assigned(orelse, out);
                collect_assigned(finalbody, out);
            }
            Stmt::With { items, body, .. } => {
                for (_, alias) in items {
                    if let Some(alias) = alias {
                        collect_target_names(alias, out);
                    }
                }
                collect_assigned(body, out);
            }
            Stmt::Import { names, .. } => {
                for alias in names {
                    match &alias.alias {
                        Some(local) => {
                            out.insert(local.clone());
                        }
                        None => {
                            out.insert(
                                alias.name.split('.').next().unwrap_or(&alias.name).to_string(),
                            );
                        }
                    }
                }
            }
            Stmt::ImportFrom { names, .. } => {
                for alias in names {
                    out.insert(alias.alias.clone().unwrap_or_else(|| alias.name.clone()));
                }
            }
            Stmt::Global { names, .. } => {
                for name in names {
                    out.insert(name.clone());
                }
            }
            _ => {}
        }
    }
}

fn collect_target_names(target: &Expr, out: &mut FxHashSet<String>) {
    match target {
        Expr::Name { id, .. } => {
            out.insert(id.clone());
        }
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            for elt in elts {
                collect_target_names(elt, out);
            }
        }
        Expr::Starred { value, .. } => collect_target_names(value, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dependency::DependencyTracker;
    use crate::features::source_env::SourceEnvironment;
    use crate::shared::models::SearchRoot;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn check(files: &[(&str, &str)], module: &str) -> Vec<Diagnostic> {
        let tracker = Arc::new(DependencyTracker::new());
        let source = Arc::new(SourceEnvironment::new(
            vec![SearchRoot::new("/src", 0)],
            tracker,
        ));
        source.add_sources(
            files
                .iter()
                .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
        );
        let env = TypeEnvironment::new(source);
        env.check_module(&Qualifier::new(module)).as_ref().clone()
    }

    #[test]
    fn test_undefined_name() {
        let diags = check(&[("m.py", "def f():\n    return missing\n")], "m");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, DiagnosticCode::UNDEFINED_NAME);
        assert_eq!(diags[0].location.line, 2);
    }

    #[test]
    fn test_defined_names_pass() {
        let diags = check(
            &[(
                "m.py",
                "import os\nx = 1\ndef f(a):\n    b = a + x\n    return os.path\n",
            )],
            "m",
        );
        assert!(diags.is_empty(), "unexpected: {diags:?}");
    }

    #[test]
    fn test_strict_mode_missing_annotations() {
        let diags = check(
            &[(
                "m.py",
                "# taintflow: strict\nx = 1\ndef f():\n    return 1\n",
            )],
            "m",
        );
        let codes: Vec<u32> = diags.iter().map(|d| d.code.0).collect();
        assert!(codes.contains(&DiagnosticCode::MISSING_GLOBAL_ANNOTATION.0));
        assert!(codes.contains(&DiagnosticCode::MISSING_RETURN_ANNOTATION.0));
    }

    #[test]
    fn test_strict_mode_unknown_import() {
        let diags = check(
            &[("m.py", "# taintflow: strict\nimport ghost_module\n")],
            "m",
        );
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::UNDEFINED_IMPORT));
    }

    #[test]
    fn test_suppression_filters_by_line_and_code() {
        let diags = check(
            &[(
                "m.py",
                "def f():\n    return missing  # taintflow: ignore[18]\n",
            )],
            "m",
        );
        assert!(diags.is_empty(), "unexpected: {diags:?}");

        let kept = check(
            &[(
                "m.py",
                "def f():\n    return missing  # taintflow: ignore[6]\n",
            )],
            "m",
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_ignore_all_mode() {
        let diags = check(
            &[(
                "m.py",
                "# taintflow: ignore-all-errors\ndef f():\n    return missing\n",
            )],
            "m",
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_unawaited_awaitable() {
        let diags = check(
            &[(
                "m.py",
                "async def fetch():\n    return 1\n\ndef caller():\n    fetch()\n",
            )],
            "m",
        );
        assert!(diags
            .iter()
            .any(|d| d.code == DiagnosticCode::UNAWAITED_AWAITABLE));

        let awaited = check(
            &[(
                "m.py",
                "async def fetch():\n    return 1\n\nasync def caller():\n    await fetch()\n",
            )],
            "m",
        );
        assert!(!awaited
            .iter()
            .any(|d| d.code == DiagnosticCode::UNAWAITED_AWAITABLE));
    }
}
