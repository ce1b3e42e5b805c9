//! Taint-expression interpretation
//!
//! Turns the annotation expressions of a model declaration
//! (`TaintSource[K]`, `TaintInTaintOut[Updates[self]]`, `AppliesTo[...]`,
//! `Via[...]`, `AttachToSink[...]`, ...) into their effect on a
//! `TaintModel` port.

use super::errors::{ModelError, ModelErrorKind};
use crate::features::abstract_domain::{AccessPath, PathLabel};
use crate::features::source_env::ast::{Constant, Expr};
use crate::features::taint::{
    Breadcrumb, SinkKind, SinkTaint, SourceKind, SourceTaint, TaintModel, TitoKind, TitoTaint,
};
use rustc_hash::FxHashMap;

/// The decomposed effect of one taint annotation
#[derive(Debug, Clone, Default)]
pub struct AnnotationParts {
    pub sources: Vec<SourceKind>,
    pub sinks: Vec<SinkKind>,
    pub titos: Vec<TitoKind>,

    /// Breadcrumbs attached to every kind declared alongside them
    pub features: Vec<Breadcrumb>,

    /// `AttachToX[...]` features, applied to matching taint after the
    /// whole declaration is assembled
    pub attach_source: Vec<Breadcrumb>,
    pub attach_sink: Vec<Breadcrumb>,
    pub attach_tito: Vec<Breadcrumb>,

    /// `AppliesTo[i, ...]` path suffix under the port
    pub applies_to: AccessPath,

    pub errors: Vec<ModelError>,
}

impl AnnotationParts {
    pub fn has_taint(&self) -> bool {
        !self.sources.is_empty() || !self.sinks.is_empty() || !self.titos.is_empty()
    }

    fn merge(&mut self, other: AnnotationParts) {
        self.sources.extend(other.sources);
        self.sinks.extend(other.sinks);
        self.titos.extend(other.titos);
        self.features.extend(other.features);
        self.attach_source.extend(other.attach_source);
        self.attach_sink.extend(other.attach_sink);
        self.attach_tito.extend(other.attach_tito);
        if self.applies_to.is_root() {
            self.applies_to = other.applies_to;
        }
        self.errors.extend(other.errors);
    }
}

fn render(expr: &Expr) -> String {
    expr.as_dotted_name().unwrap_or_else(|| "<expr>".to_string())
}

fn subscript_items(index: &Expr) -> Vec<&Expr> {
    match index {
        Expr::Tuple { elts, .. } => elts.iter().collect(),
        other => vec![other],
    }
}

fn kind_names(items: &[&Expr], out_errors: &mut Vec<ModelError>) -> Vec<String> {
    let mut names = Vec::new();
    for item in items {
        match item.as_dotted_name() {
            Some(name) => names.push(name),
            None => out_errors.push(ModelError::new(
                ModelErrorKind::InvalidTaintAnnotation {
                    annotation: render(item),
                },
                item.span(),
            )),
        }
    }
    names
}

/// Interpret one annotation expression.
///
/// `param_positions` maps parameter names to their positional index, for
/// `Updates[name]`.
pub fn interpret(expr: &Expr, param_positions: &FxHashMap<String, u32>) -> AnnotationParts {
    let mut parts = AnnotationParts::default();
    interpret_into(expr, param_positions, &mut parts);
    parts
}

fn interpret_into(
    expr: &Expr,
    param_positions: &FxHashMap<String, u32>,
    parts: &mut AnnotationParts,
) {
    let Expr::Subscript { value, index, span } = expr else {
        parts.errors.push(ModelError::new(
            ModelErrorKind::InvalidTaintAnnotation {
                annotation: render(expr),
            },
            expr.span(),
        ));
        return;
    };
    let Some(head) = value.as_dotted_name() else {
        parts.errors.push(ModelError::new(
            ModelErrorKind::InvalidTaintAnnotation {
                annotation: "<expr>".to_string(),
            },
            *span,
        ));
        return;
    };
    let items = subscript_items(index);

    match head.as_str() {
        "TaintSource" => {
            let mut errors = Vec::new();
            parts.sources.extend(
                kind_names(&items, &mut errors)
                    .into_iter()
                    .map(SourceKind::new),
            );
            parts.errors.extend(errors);
        }
        "TaintSink" => {
            let mut errors = Vec::new();
            parts
                .sinks
                .extend(kind_names(&items, &mut errors).into_iter().map(SinkKind::new));
            parts.errors.extend(errors);
        }
        "TaintInTaintOut" => {
            let before = parts.titos.len();
            for item in &items {
                match item {
                    Expr::Name { id, .. } if id == "LocalReturn" => {
                        parts.titos.push(TitoKind::LocalReturn);
                    }
                    Expr::Subscript {
                        value: inner_value,
                        index: inner_index,
                        ..
                    } if inner_value.as_dotted_name().as_deref() == Some("Updates") => {
                        for target in subscript_items(inner_index) {
                            match target
                                .as_dotted_name()
                                .and_then(|n| param_positions.get(&n).copied())
                            {
                                Some(position) => {
                                    parts.titos.push(TitoKind::ParameterUpdate(position))
                                }
                                None => parts.errors.push(ModelError::new(
                                    ModelErrorKind::InvalidTaintAnnotation {
                                        annotation: render(target),
                                    },
                                    target.span(),
                                )),
                            }
                        }
                    }
                    other => interpret_into(other, param_positions, parts),
                }
            }
            // `TaintInTaintOut[Via[x]]` and bare feature lists default to
            // a local return.
            if parts.titos.len() == before {
                parts.titos.push(TitoKind::LocalReturn);
            }
        }
        "AppliesTo" => {
            if items.len() < 2 {
                parts.errors.push(ModelError::new(
                    ModelErrorKind::InvalidTaintAnnotation {
                        annotation: "AppliesTo".to_string(),
                    },
                    *span,
                ));
                return;
            }
            let label = match items[0] {
                Expr::Constant {
                    value: Constant::Int(i),
                    ..
                } => Some(PathLabel::field(i.to_string())),
                Expr::Constant {
                    value: Constant::Str(s),
                    ..
                } => Some(PathLabel::field(s.clone())),
                _ => None,
            };
            match label {
                Some(label) => {
                    parts.applies_to = parts.applies_to.child(label);
                    for item in &items[1..] {
                        interpret_into(item, param_positions, parts);
                    }
                }
                None => parts.errors.push(ModelError::new(
                    ModelErrorKind::InvalidTaintAnnotation {
                        annotation: render(items[0]),
                    },
                    items[0].span(),
                )),
            }
        }
        "Union" => {
            for item in &items {
                interpret_into(item, param_positions, parts);
            }
        }
        "Via" => {
            let mut errors = Vec::new();
            parts.features.extend(
                kind_names(&items, &mut errors)
                    .into_iter()
                    .map(Breadcrumb::feature),
            );
            parts.errors.extend(errors);
        }
        "ViaValueOf" => {
            let mut errors = Vec::new();
            parts
                .features
                .extend(kind_names(&items, &mut errors).into_iter().map(|p| {
                    Breadcrumb::ViaValue {
                        parameter: p,
                        value: None,
                    }
                }));
            parts.errors.extend(errors);
        }
        "AttachToSource" | "AttachToSink" | "AttachToTito" => {
            let mut inner = AnnotationParts::default();
            for item in &items {
                interpret_into(item, param_positions, &mut inner);
            }
            let features = inner.features;
            parts.errors.extend(inner.errors);
            match head.as_str() {
                "AttachToSource" => parts.attach_source.extend(features),
                "AttachToSink" => parts.attach_sink.extend(features),
                _ => parts.attach_tito.extend(features),
            }
        }
        "CrossRepositoryTaint" => {
            // [taint, "id", ...extra metadata]; the id becomes provenance.
            let mut id = None;
            for item in &items {
                match item {
                    Expr::Constant {
                        value: Constant::Str(s),
                        ..
                    } if id.is_none() => id = Some(s.clone()),
                    Expr::Constant { .. } => {}
                    other => interpret_into(other, param_positions, parts),
                }
            }
            parts
                .features
                .push(Breadcrumb::CrossRepository(id.unwrap_or_default()));
        }
        other => parts.errors.push(ModelError::new(
            ModelErrorKind::InvalidTaintAnnotation {
                annotation: other.to_string(),
            },
            *span,
        )),
    }
}

/// Write the interpreted parts into a model at `port`
pub fn apply_to_model(model: &mut TaintModel, port: &AccessPath, parts: &AnnotationParts) {
    let mut path = port.clone();
    for label in parts.applies_to.labels() {
        path.push(label.clone());
    }
    let features: Vec<Breadcrumb> = parts.features.clone();

    for kind in &parts.sources {
        let element =
            SourceTaint::declared(kind.clone()).with_breadcrumbs(features.iter().cloned());
        model.forward = model.forward.assign(
            &path,
            &crate::features::taint::SourceTree::leaf(element),
            true,
        );
    }
    for kind in &parts.sinks {
        let element = SinkTaint::declared(kind.clone()).with_breadcrumbs(features.iter().cloned());
        model.backward.sink_tree = model.backward.sink_tree.assign(
            &path,
            &crate::features::taint::SinkTree::leaf(element),
            true,
        );
    }
    for kind in &parts.titos {
        let element = TitoTaint::declared(kind.clone()).with_breadcrumbs(features.iter().cloned());
        model.backward.tito_tree = model.backward.tito_tree.assign(
            &path,
            &crate::features::taint::TitoTree::leaf(element),
            true,
        );
    }
}

/// Apply `AttachToX` features to the taint already present at `port`
pub fn apply_attachments(model: &mut TaintModel, port: &AccessPath, parts: &AnnotationParts) {
    if !parts.attach_source.is_empty() {
        let features = parts.attach_source.clone();
        let subtree = model
            .forward
            .read(port)
            .transform(&move |e: &SourceTaint| e.with_breadcrumbs(features.iter().cloned()));
        model.forward = model.forward.assign(port, &subtree, false);
    }
    if !parts.attach_sink.is_empty() {
        let features = parts.attach_sink.clone();
        let subtree = model
            .backward
            .sink_tree
            .read(port)
            .transform(&move |e: &SinkTaint| e.with_breadcrumbs(features.iter().cloned()));
        model.backward.sink_tree = model.backward.sink_tree.assign(port, &subtree, false);
    }
    if !parts.attach_tito.is_empty() {
        let features = parts.attach_tito.clone();
        let subtree = model
            .backward
            .tito_tree
            .read(port)
            .transform(&move |e: &TitoTaint| e.with_breadcrumbs(features.iter().cloned()));
        model.backward.tito_tree = model.backward.tito_tree.assign(port, &subtree, false);
    }
}
