//! Forward abstract interpreter
//!
//! Propagates source trees through one callable's body. Parameters start
//! with a synthetic marker kind alongside their declared sources; where a
//! marker meets a callee sink the flow becomes part of this callable's own
//! sink model, and where a real source meets a sink an issue is raised
//! against the active rules.
//!
//! Branches join; loop bodies run twice so loop-carried flows stabilize.

use super::AnalysisContext;
use crate::features::abstract_domain::{AccessPath, PathLabel};
use crate::features::call_graph::Define;
use crate::features::source_env::ast::{Constant, Expr, Stmt};
use crate::features::source_env::ProcessedSource;
use crate::features::taint::{
    SinkTaint, SinkTree, SourceKind, SourceTaint, SourceTree, TaintModel, TitoKind,
};
use crate::features::type_env::Signature;
use crate::shared::models::{
    Diagnostic, DiagnosticCode, Severity, Span, TaintTraceFrame, Target,
};
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

const MARKER_PREFIX: &str = "$param$";

/// Synthetic source kind standing for "the value of parameter `name`"
pub(crate) fn marker(name: &str) -> SourceKind {
    SourceKind::new(format!("{MARKER_PREFIX}{name}"))
}

/// The parameter a marker kind stands for, if it is one
pub(crate) fn marker_param(kind: &SourceKind) -> Option<&str> {
    kind.as_str().strip_prefix(MARKER_PREFIX)
}

/// Everything the pass learned about one callable
pub struct PassOutput {
    pub issues: Vec<Diagnostic>,

    /// Joined taint of every returned expression, markers included
    pub return_taint: SourceTree,

    /// Variable state at exit, markers included
    pub final_state: FxHashMap<String, SourceTree>,

    /// Parameter name → sinks its value transitively reaches
    pub collected_sinks: FxHashMap<String, SinkTree>,
}

pub(crate) fn run_pass(
    ctx: &AnalysisContext<'_>,
    target: &Target,
    define: &Define,
    previous: &TaintModel,
    get_callee_model: &super::GetCalleeModel<'_>,
) -> PassOutput {
    let processed = ctx
        .env
        .source_env()
        .get(&define.qualifier, None)
        .expect("analyzed module must parse");
    let path = ctx
        .env
        .source_env()
        .source_path(&define.qualifier)
        .unwrap_or_else(|| PathBuf::from(define.qualifier.as_str()));

    let mut interpreter = Interpreter {
        ctx,
        target,
        processed,
        path,
        get_callee_model,
        state: FxHashMap::default(),
        issues: Vec::new(),
        collected_sinks: FxHashMap::default(),
        return_taint: SourceTree::bottom(),
    };

    // Parameters carry their marker plus any declared source.
    for param in &define.def.params {
        let declared = previous.forward.read(&TaintModel::param_port(&param.name));
        let tree = SourceTree::leaf(SourceTaint::declared(marker(&param.name))).join(&declared);
        interpreter.state.insert(param.name.clone(), tree);
    }

    interpreter.exec_block(&define.def.body);

    PassOutput {
        issues: interpreter.issues,
        return_taint: interpreter.return_taint,
        final_state: interpreter.state,
        collected_sinks: interpreter.collected_sinks,
    }
}

struct Interpreter<'a, 'c> {
    ctx: &'a AnalysisContext<'c>,
    target: &'a Target,
    processed: Arc<ProcessedSource>,
    path: PathBuf,
    get_callee_model: &'a super::GetCalleeModel<'a>,

    state: FxHashMap<String, SourceTree>,
    issues: Vec<Diagnostic>,
    collected_sinks: FxHashMap<String, SinkTree>,
    return_taint: SourceTree,
}

impl<'a, 'c> Interpreter<'a, 'c> {
    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            self.exec_stmt(stmt);
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {
                // Nested defines are separate targets.
            }
            Stmt::Assign { targets, value, .. } => {
                let tree = match value {
                    Some(value) => self.eval(value),
                    None => SourceTree::bottom(),
                };
                for target in targets {
                    self.assign_target(target, &tree, false);
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                let tree = self.eval(value);
                self.assign_target(target, &tree, true);
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    let tree = self.eval(value);
                    self.return_taint = self.return_taint.join(&tree);
                }
            }
            Stmt::Expr { value, .. } => {
                self.eval(value);
            }
            Stmt::If {
                test, body, orelse, ..
            } => {
                self.eval(test);
                let before = self.state.clone();
                self.exec_block(body);
                let after_body = std::mem::replace(&mut self.state, before);
                self.exec_block(orelse);
                self.join_state(after_body);
            }
            Stmt::While {
                test, body, orelse, ..
            } => {
                self.eval(test);
                self.exec_loop(body);
                self.exec_block(orelse);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                let iter_tree = self.eval(iter);
                let element = iter_tree.read(&AccessPath::new(vec![PathLabel::AnyIndex]));
                self.assign_target(target, &element, true);
                self.exec_loop(body);
                self.exec_block(orelse);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                self.exec_block(body);
                let after_body = self.state.clone();
                for handler in handlers {
                    let before = std::mem::replace(&mut self.state, after_body.clone());
                    self.exec_block(&handler.body);
                    self.join_state(before);
                }
                self.exec_block(orelse);
                self.exec_block(finalbody);
            }
            Stmt::With { items, body, .. } => {
                for (expr, alias) in items {
                    let tree = self.eval(expr);
                    if let Some(alias) = alias {
                        self.assign_target(alias, &tree, false);
                    }
                }
                self.exec_block(body);
            }
            Stmt::Raise { exception, .. } => {
                if let Some(exception) = exception {
                    self.eval(exception);
                }
            }
            Stmt::Assert { test, message, .. } => {
                self.eval(test);
                if let Some(message) = message {
                    self.eval(message);
                }
            }
            Stmt::Delete { targets, .. } => {
                for target in targets {
                    if let Expr::Name { id, .. } = target {
                        self.state.remove(id);
                    }
                }
            }
            Stmt::Import { .. }
            | Stmt::ImportFrom { .. }
            | Stmt::Global { .. }
            | Stmt::Pass { .. }
            | Stmt::Break { .. }
            | Stmt::Continue { .. } => {}
        }
    }

    /// Two passes over the body so loop-carried assignments stabilize; the
    /// pre-loop state joins in since the body may not run.
    fn exec_loop(&mut self, body: &[Stmt]) {
        let before = self.state.clone();
        self.exec_block(body);
        self.exec_block(body);
        self.join_state(before);
    }

    fn join_state(&mut self, other: FxHashMap<String, SourceTree>) {
        for (var, tree) in other {
            match self.state.get_mut(&var) {
                Some(existing) => *existing = existing.join(&tree),
                None => {
                    self.state.insert(var, tree);
                }
            }
        }
    }

    /// Write `tree` into an assignment target
    fn assign_target(&mut self, target: &Expr, tree: &SourceTree, weak: bool) {
        match target {
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                // Distribute the collapsed element over the components.
                let element = tree.read(&AccessPath::new(vec![PathLabel::AnyIndex]));
                let whole = element.join(&SourceTree::leaf(tree.element().clone()));
                for elt in elts {
                    self.assign_target(elt, &whole, weak);
                }
            }
            Expr::Starred { value, .. } => self.assign_target(value, tree, weak),
            _ => {
                if let Some((head, path)) = self.target_path(target) {
                    let base = self.state.get(&head).cloned().unwrap_or_default();
                    let updated = base.assign(&path, tree, weak);
                    self.state.insert(head, updated);
                } else if let Some(dotted) = target.as_dotted_name() {
                    // Writing into a modeled global flows into its sinks.
                    let qualified = self.processed.qualify(&dotted);
                    if let Some(model) =
                        (self.get_callee_model)(&Target::object(qualified.clone()))
                    {
                        let sink_port = model.backward.sink_tree.read(&TaintModel::return_port());
                        self.check_against_sinks(tree, &sink_port, &qualified, target.span());
                    }
                }
            }
        }
    }

    /// A head variable plus the access path under it, for writable targets
    fn target_path(&self, expr: &Expr) -> Option<(String, AccessPath)> {
        match expr {
            Expr::Name { id, .. } => Some((id.clone(), AccessPath::root())),
            Expr::Attribute { value, attr, .. } => {
                let (head, path) = self.target_path(value)?;
                if !self.state.contains_key(&head) && path.is_root() {
                    return None;
                }
                Some((head, path.child(PathLabel::field(attr.clone()))))
            }
            Expr::Subscript { value, index, .. } => {
                let (head, path) = self.target_path(value)?;
                Some((head, path.child(index_label(index))))
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> SourceTree {
        match expr {
            Expr::Name { id, .. } => match self.state.get(id) {
                Some(tree) => tree.clone(),
                None => self.read_global(id, expr.span()),
            },
            Expr::Attribute { value, attr, span } => {
                // A dotted chain may name a modeled global; a local head
                // reads through the variable's tree.
                if let Some((head, path)) = self.value_path(expr) {
                    if let Some(tree) = self.state.get(&head) {
                        return tree.read(&path);
                    }
                }
                if let Some(dotted) = expr.as_dotted_name() {
                    return self.read_global(&dotted, *span);
                }
                let base = self.eval(value);
                base.read(&AccessPath::new(vec![PathLabel::field(attr.clone())]))
            }
            Expr::Subscript { value, index, .. } => {
                self.eval(index);
                let base = self.eval(value);
                base.read(&AccessPath::new(vec![index_label(index)]))
            }
            Expr::Call { .. } => self.eval_call(expr),
            Expr::Constant { .. } => SourceTree::bottom(),
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                let mut joined = SourceTree::bottom();
                for elt in elts {
                    joined = joined.join(&self.eval(elt));
                }
                joined
            }
            Expr::Dict { keys, values, .. } => {
                let mut key_taint = SourceTree::bottom();
                for key in keys.iter().flatten() {
                    key_taint = key_taint.join(&self.eval(key));
                }
                let mut value_taint = SourceTree::bottom();
                for value in values {
                    value_taint = value_taint.join(&self.eval(value));
                }
                let mut out = SourceTree::bottom();
                if !value_taint.is_bottom() {
                    out = out.assign(
                        &AccessPath::new(vec![PathLabel::AnyIndex]),
                        &value_taint,
                        true,
                    );
                }
                if !key_taint.is_bottom() {
                    out = out.assign(
                        &AccessPath::new(vec![PathLabel::DictionaryKeys]),
                        &key_taint,
                        true,
                    );
                }
                out
            }
            Expr::BinOp { left, right, .. } => {
                let left = self.eval(left);
                let right = self.eval(right);
                left.join(&right)
            }
            Expr::BoolOp { values, .. } => {
                let mut joined = SourceTree::bottom();
                for value in values {
                    joined = joined.join(&self.eval(value));
                }
                joined
            }
            Expr::UnaryOp { operand, .. } => self.eval(operand),
            Expr::Compare {
                left, comparators, ..
            } => {
                self.eval(left);
                for comparator in comparators {
                    self.eval(comparator);
                }
                // Comparison results are booleans, not data flows.
                SourceTree::bottom()
            }
            Expr::Await { value, .. } | Expr::Starred { value, .. } => self.eval(value),
            Expr::Lambda { .. } => SourceTree::bottom(),
            Expr::FString { parts, .. } => {
                let mut joined = SourceTree::bottom();
                for part in parts {
                    joined = joined.join(&self.eval(part));
                }
                // Formatting collapses structure into the string value.
                SourceTree::leaf(joined.collapse_all())
            }
            Expr::Ternary {
                test, body, orelse, ..
            } => {
                self.eval(test);
                let body = self.eval(body);
                let orelse = self.eval(orelse);
                body.join(&orelse)
            }
            Expr::Unknown { .. } => SourceTree::bottom(),
        }
    }

    /// Like `target_path` but for reads (requires the head to be a local)
    fn value_path(&self, expr: &Expr) -> Option<(String, AccessPath)> {
        match expr {
            Expr::Name { id, .. } if self.state.contains_key(id) => {
                Some((id.clone(), AccessPath::root()))
            }
            Expr::Attribute { value, attr, .. } => {
                let (head, path) = self.value_path(value)?;
                Some((head, path.child(PathLabel::field(attr.clone()))))
            }
            Expr::Subscript { value, index, .. } => {
                let (head, path) = self.value_path(value)?;
                Some((head, path.child(index_label(index))))
            }
            _ => None,
        }
    }

    /// Taint produced by reading a global name (modeled objects only)
    fn read_global(&self, dotted: &str, span: Span) -> SourceTree {
        let qualified = self.processed.qualify(dotted);
        let Some(model) = (self.get_callee_model)(&Target::object(qualified.clone())) else {
            return SourceTree::bottom();
        };
        let tree = model.forward.read(&TaintModel::return_port());
        if tree.is_bottom() {
            return tree;
        }
        tree.transform(&move |e: &SourceTaint| e.through_call(&qualified, span))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_call(&mut self, call: &Expr) -> SourceTree {
        let Expr::Call {
            func,
            args,
            keywords,
            span,
        } = call
        else {
            return SourceTree::bottom();
        };

        // Receiver of a method call participates as the `self` argument.
        let receiver: Option<&Expr> = match func.as_ref() {
            Expr::Attribute { value, .. } => Some(value.as_ref()),
            _ => None,
        };

        let callees: Vec<Target> = self
            .ctx
            .call_graph
            .callees_at(self.target, *span)
            .to_vec();

        // Argument taint, evaluated once in source order.
        let mut positional: Vec<(&Expr, SourceTree)> = Vec::new();
        for arg in args {
            let tree = self.eval(arg);
            positional.push((arg, tree));
        }
        let mut by_keyword: Vec<(String, &Expr, SourceTree)> = Vec::new();
        for (name, value) in keywords {
            let tree = self.eval(value);
            if let Some(name) = name {
                by_keyword.push((name.clone(), value, tree));
            }
        }

        let mut result = SourceTree::bottom();
        for callee in &callees {
            let callee_name = callee.qualified_name();
            let model = (self.get_callee_model)(callee).unwrap_or_default();
            let signature = self.callee_signature(callee);
            trace!(caller = %self.target, callee = %callee_name, "applying callee model");

            let method_like = matches!(
                callee,
                Target::Method { .. } | Target::Override { .. }
            );
            let mut arguments: Vec<(String, &Expr, &SourceTree)> = Vec::new();

            let receiver_tree;
            let mut offset = 0usize;
            if method_like {
                if let Some(receiver) = receiver {
                    receiver_tree = self.eval(receiver);
                    let name = param_name(signature.as_deref(), 0, "self");
                    arguments.push((name, receiver, &receiver_tree));
                    offset = 1;
                }
            }
            for (i, (expr, tree)) in positional.iter().enumerate() {
                let fallback = (i + offset).to_string();
                let name = param_name(signature.as_deref(), i + offset, &fallback);
                arguments.push((name, *expr, tree));
            }
            for (name, expr, tree) in &by_keyword {
                arguments.push((name.clone(), *expr, tree));
            }

            for (param, _expr, tree) in &arguments {
                let port = TaintModel::param_port(param);

                // Sinks on the parameter: issues for real sources, model
                // growth for markers. Issues anchor at the call site.
                let sink_port = model.backward.sink_tree.read(&port);
                self.check_against_sinks(tree, &sink_port, &callee_name, *span);

                // Taint-in-taint-out.
                let tito_port = model.backward.tito_tree.read(&port);
                if !tito_port.is_bottom() && !tree.is_bottom() {
                    let tito = tito_port.collapse_all();
                    for (kind, details) in tito.kinds() {
                        let carried = SourceTree::leaf(
                            tree.collapse_all()
                                .with_breadcrumbs(details.breadcrumbs.iter().cloned()),
                        );
                        match kind {
                            TitoKind::LocalReturn => {
                                result = result.join(&carried);
                            }
                            TitoKind::ParameterUpdate(updated) => {
                                let index = *updated as usize;
                                let target_expr: Option<&Expr> = if method_like && index == 0 {
                                    receiver
                                } else {
                                    let positional_index =
                                        index.checked_sub(offset).unwrap_or(index);
                                    positional.get(positional_index).map(|(e, _)| *e)
                                };
                                if let Some(target_expr) = target_expr {
                                    self.assign_target(target_expr, &carried, true);
                                }
                            }
                        }
                    }
                }
            }

            // Sources the callee produces at its return.
            let produced = model.forward.read(&TaintModel::return_port());
            if !produced.is_bottom() {
                let callee_name = callee_name.clone();
                let span = *span;
                result = result.join(&produced.transform(&move |e: &SourceTaint| {
                    e.through_call(&callee_name, span)
                }));
            }
        }

        result.collapse_to(self.ctx.boundary_depth)
    }

    fn callee_signature(&self, callee: &Target) -> Option<Arc<Signature>> {
        let name = match callee {
            Target::Function { name, .. } | Target::Object { name } => name.clone(),
            Target::Method { class, name, .. } | Target::Override { class, name, .. } => {
                format!("{class}.{name}")
            }
        };
        if let Some(signature) = self.ctx.env.signature_of(&name) {
            return Some(signature);
        }
        if !name.contains('.') {
            return self.ctx.env.signature_of(&format!("builtins.{name}"));
        }
        None
    }

    /// Check argument taint against a callee sink port: real kinds raise
    /// issues, marker kinds extend this callable's own sink model.
    fn check_against_sinks(
        &mut self,
        arg_tree: &SourceTree,
        sink_port: &SinkTree,
        callee_name: &str,
        span: Span,
    ) {
        if sink_port.is_bottom() || arg_tree.is_bottom() {
            return;
        }
        let sinks = sink_port.collapse_all();
        let sources = arg_tree.collapse_all();

        for (sink_kind, sink_details) in sinks.kinds() {
            for (source_kind, source_details) in sources.kinds() {
                if let Some(param) = marker_param(source_kind) {
                    let element = SinkTaint::singleton(sink_kind.clone(), sink_details.clone())
                        .through_call(callee_name, span);
                    let entry = self
                        .collected_sinks
                        .entry(param.to_string())
                        .or_insert_with(SinkTree::bottom);
                    *entry = entry.join(&SinkTree::leaf(element));
                    continue;
                }
                for rule in self.ctx.rules.matching(source_kind, sink_kind) {
                    let message = rule.render_message(source_kind, sink_kind);
                    let trace = vec![
                        TaintTraceFrame {
                            callable: source_details
                                .traces
                                .iter()
                                .find_map(|t| match t {
                                    crate::features::taint::TraceInfo::CallSite {
                                        callee, ..
                                    } => Some(callee.clone()),
                                    _ => None,
                                })
                                .unwrap_or_else(|| self.target.qualified_name()),
                            kind: "source".to_string(),
                            path: self.path.clone(),
                            span,
                        },
                        TaintTraceFrame {
                            callable: callee_name.to_string(),
                            kind: "sink".to_string(),
                            path: self.path.clone(),
                            span,
                        },
                    ];
                    self.issues.push(Diagnostic {
                        code: DiagnosticCode(rule.code),
                        severity: Severity::Error,
                        location: crate::shared::models::DiagnosticLocation::new(
                            self.path.clone(),
                            span,
                        ),
                        message,
                        taint_trace: Some(trace),
                    });
                }
            }
        }
    }
}

fn index_label(index: &Expr) -> PathLabel {
    match index {
        Expr::Constant {
            value: Constant::Str(s),
            ..
        } => PathLabel::field(s.clone()),
        Expr::Constant {
            value: Constant::Int(i),
            ..
        } => PathLabel::field(i.to_string()),
        _ => PathLabel::AnyIndex,
    }
}

fn param_name(signature: Option<&Signature>, position: usize, fallback: &str) -> String {
    signature
        .and_then(|s| s.params.get(position))
        .map(|p| p.name.clone())
        .unwrap_or_else(|| fallback.to_string())
}
