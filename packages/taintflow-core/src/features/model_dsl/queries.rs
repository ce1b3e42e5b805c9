//! ModelQuery rules
//!
//! `ModelQuery(name=..., find=..., where=[...], model=[...])` matches a
//! predicate against every function or method in the environment and
//! produces initial models for the matches, so whole API families can be
//! modeled without naming each member.

use super::annotation::{apply_to_model, interpret};
use super::errors::{ModelError, ModelErrorKind};
use crate::features::call_graph::DefineIndex;
use crate::features::source_env::ast::{Constant, Expr, ParamKind};
use crate::features::taint::TaintModel;
use crate::features::type_env::TypeEnvironment;
use crate::shared::models::{Span, Target};
use regex::Regex;
use rustc_hash::FxHashMap;

/// What kind of callables a query ranges over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindKind {
    Functions,
    Methods,
}

/// Annotation predicate used by return/parameter constraints
#[derive(Debug, Clone)]
pub enum AnnotationConstraint {
    IsAnnotatedType,
    Equals(String),
}

/// Class predicate for method queries
#[derive(Debug, Clone)]
pub enum ParentConstraint {
    Equals(String),
    Extends(String),
}

/// One `where` clause
#[derive(Debug, Clone)]
pub enum Constraint {
    Name(Regex),
    Return(AnnotationConstraint),
    AnyParameter(AnnotationConstraint),
    Parent(ParentConstraint),
    DecoratorName(String),
    AnyOf(Vec<Constraint>),
    AllOf(Vec<Constraint>),
    Not(Box<Constraint>),
}

/// One `model` production
#[derive(Debug, Clone)]
pub enum Production {
    ReturnTaint(Vec<Expr>),
    NamedParameterTaint { name: String, taint: Vec<Expr> },
    PositionalParameterTaint { index: usize, taint: Vec<Expr> },
    AllParametersTaint { exclude: Vec<String>, taint: Vec<Expr> },
}

/// A parsed ModelQuery rule
#[derive(Debug, Clone)]
pub struct ModelQuery {
    pub name: String,
    pub find: FindKind,
    pub constraints: Vec<Constraint>,
    pub productions: Vec<Production>,
    pub span: Span,
}

fn invalid(reason: impl Into<String>, span: Span) -> ModelError {
    ModelError::new(
        ModelErrorKind::InvalidModelQuery {
            reason: reason.into(),
        },
        span,
    )
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Constant {
            value: Constant::Str(s),
            ..
        } => Some(s.clone()),
        _ => None,
    }
}

fn list_items(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::List { elts, .. } | Expr::Tuple { elts, .. } => elts.iter().collect(),
        other => vec![other],
    }
}

/// Parse the keyword arguments of a `ModelQuery(...)` call
pub fn parse_query(
    keywords: &[(Option<String>, Expr)],
    span: Span,
) -> Result<ModelQuery, ModelError> {
    let mut name = None;
    let mut find = None;
    let mut constraints = Vec::new();
    let mut productions = Vec::new();

    for (key, value) in keywords {
        match key.as_deref() {
            Some("name") => name = string_literal(value),
            Some("find") => {
                find = match string_literal(value).as_deref() {
                    Some("functions") => Some(FindKind::Functions),
                    Some("methods") => Some(FindKind::Methods),
                    other => {
                        return Err(invalid(
                            format!("unknown find kind {other:?}"),
                            value.span(),
                        ))
                    }
                };
            }
            Some("where") => {
                for item in list_items(value) {
                    constraints.push(parse_constraint(item)?);
                }
            }
            Some("model") => {
                for item in list_items(value) {
                    productions.push(parse_production(item)?);
                }
            }
            _ => return Err(invalid("unknown keyword argument", value.span())),
        }
    }

    Ok(ModelQuery {
        name: name.unwrap_or_else(|| "<unnamed>".to_string()),
        find: find.ok_or_else(|| invalid("missing find=", span))?,
        constraints,
        productions,
        span,
    })
}

fn parse_constraint(expr: &Expr) -> Result<Constraint, ModelError> {
    let Expr::Call {
        func, args, span, ..
    } = expr
    else {
        return Err(invalid("constraint must be a call", expr.span()));
    };
    match func.as_dotted_name().as_deref() {
        Some("NameConstraint") => {
            let pattern = args
                .first()
                .and_then(string_literal)
                .ok_or_else(|| invalid("NameConstraint needs a pattern", *span))?;
            let regex = Regex::new(&pattern)
                .map_err(|e| invalid(format!("invalid regex: {e}"), *span))?;
            Ok(Constraint::Name(regex))
        }
        Some("ReturnConstraint") => Ok(Constraint::Return(parse_annotation_constraint(
            args.first(),
            *span,
        )?)),
        Some("AnyParameterConstraint") => {
            // AnyParameterConstraint(AnnotationConstraint(...))
            let inner = match args.first() {
                Some(Expr::Call {
                    func: inner_func,
                    args: inner_args,
                    span: inner_span,
                    ..
                }) if inner_func.as_dotted_name().as_deref() == Some("AnnotationConstraint") => {
                    parse_annotation_constraint(inner_args.first(), *inner_span)?
                }
                other => parse_annotation_constraint(other, *span)?,
            };
            Ok(Constraint::AnyParameter(inner))
        }
        Some("ParentConstraint") => {
            let Some(Expr::Call {
                func: inner_func,
                args: inner_args,
                span: inner_span,
                ..
            }) = args.first()
            else {
                return Err(invalid("ParentConstraint needs Equals/Extends", *span));
            };
            let class = inner_args
                .first()
                .and_then(string_literal)
                .ok_or_else(|| invalid("missing class name", *inner_span))?;
            match inner_func.as_dotted_name().as_deref() {
                Some("Equals") => Ok(Constraint::Parent(ParentConstraint::Equals(class))),
                Some("Extends") => Ok(Constraint::Parent(ParentConstraint::Extends(class))),
                _ => Err(invalid("ParentConstraint needs Equals/Extends", *inner_span)),
            }
        }
        Some("DecoratorNameConstraint") => {
            let name = args
                .first()
                .and_then(string_literal)
                .ok_or_else(|| invalid("DecoratorNameConstraint needs a name", *span))?;
            Ok(Constraint::DecoratorName(name))
        }
        Some("AnyOf") => Ok(Constraint::AnyOf(
            args.iter().map(parse_constraint).collect::<Result<_, _>>()?,
        )),
        Some("AllOf") => Ok(Constraint::AllOf(
            args.iter().map(parse_constraint).collect::<Result<_, _>>()?,
        )),
        Some("Not") => {
            let inner = args
                .first()
                .ok_or_else(|| invalid("Not needs a constraint", *span))?;
            Ok(Constraint::Not(Box::new(parse_constraint(inner)?)))
        }
        other => Err(invalid(format!("unknown constraint {other:?}"), *span)),
    }
}

fn parse_annotation_constraint(
    expr: Option<&Expr>,
    span: Span,
) -> Result<AnnotationConstraint, ModelError> {
    match expr {
        Some(Expr::Name { id, .. }) if id == "IsAnnotatedType" => {
            Ok(AnnotationConstraint::IsAnnotatedType)
        }
        Some(Expr::Call {
            func, args, span, ..
        }) if func.as_dotted_name().as_deref() == Some("Equals") => args
            .first()
            .and_then(string_literal)
            .map(AnnotationConstraint::Equals)
            .ok_or_else(|| invalid("Equals needs a string", *span)),
        _ => Err(invalid("unknown annotation constraint", span)),
    }
}

fn parse_production(expr: &Expr) -> Result<Production, ModelError> {
    let Expr::Call {
        func,
        args,
        keywords,
        span,
    } = expr
    else {
        return Err(invalid("production must be a call", expr.span()));
    };
    let keyword = |name: &str| {
        keywords
            .iter()
            .find(|(k, _)| k.as_deref() == Some(name))
            .map(|(_, v)| v)
    };
    let taint_list = |expr: Option<&Expr>| -> Vec<Expr> {
        expr.map(|e| list_items(e).into_iter().cloned().collect())
            .unwrap_or_default()
    };

    match func.as_dotted_name().as_deref() {
        Some("ReturnTaint") => Ok(Production::ReturnTaint(taint_list(
            args.first().or_else(|| keyword("taint")),
        ))),
        Some("NamedParameterTaint") => {
            let name = keyword("name")
                .and_then(string_literal)
                .ok_or_else(|| invalid("NamedParameterTaint needs name=", *span))?;
            Ok(Production::NamedParameterTaint {
                name,
                taint: taint_list(keyword("taint")),
            })
        }
        Some("PositionalParameterTaint") => {
            let index = match keyword("index") {
                Some(Expr::Constant {
                    value: Constant::Int(i),
                    ..
                }) => *i as usize,
                _ => return Err(invalid("PositionalParameterTaint needs index=", *span)),
            };
            Ok(Production::PositionalParameterTaint {
                index,
                taint: taint_list(keyword("taint")),
            })
        }
        Some("AllParametersTaint") => {
            let exclude = keyword("exclude")
                .map(|e| {
                    list_items(e)
                        .into_iter()
                        .filter_map(string_literal)
                        .collect()
                })
                .unwrap_or_default();
            Ok(Production::AllParametersTaint {
                exclude,
                taint: taint_list(args.first().or_else(|| keyword("taint"))),
            })
        }
        other => Err(invalid(format!("unknown production {other:?}"), *span)),
    }
}

impl ModelQuery {
    /// Evaluate against the environment, producing initial models
    pub fn evaluate(
        &self,
        env: &TypeEnvironment,
        index: &DefineIndex,
    ) -> Vec<(Target, TaintModel)> {
        let candidates: Vec<_> = match self.find {
            FindKind::Functions => index.functions().collect(),
            FindKind::Methods => index.methods().collect(),
        };

        let mut out = Vec::new();
        for define in candidates {
            let matched = self
                .constraints
                .iter()
                .all(|c| matches_constraint(c, env, define));
            if !matched {
                continue;
            }
            let model = self.produce(define);
            if !model.is_bottom() {
                out.push((define.target.clone(), model));
            }
        }
        out
    }

    fn produce(&self, define: &crate::features::call_graph::Define) -> TaintModel {
        let mut positions = FxHashMap::default();
        let mut position = 0u32;
        for param in &define.def.params {
            if matches!(
                param.kind,
                ParamKind::Positional | ParamKind::PositionalOnly
            ) {
                positions.insert(param.name.clone(), position);
                position += 1;
            }
        }

        let mut model = TaintModel::empty();
        for production in &self.productions {
            match production {
                Production::ReturnTaint(taint) => {
                    for annotation in taint {
                        let parts = interpret(annotation, &positions);
                        apply_to_model(&mut model, &TaintModel::return_port(), &parts);
                    }
                }
                Production::NamedParameterTaint { name, taint } => {
                    if define.def.params.iter().any(|p| &p.name == name) {
                        for annotation in taint {
                            let parts = interpret(annotation, &positions);
                            apply_to_model(&mut model, &TaintModel::param_port(name), &parts);
                        }
                    }
                }
                Production::PositionalParameterTaint { index, taint } => {
                    let param = define
                        .def
                        .params
                        .iter()
                        .filter(|p| {
                            matches!(
                                p.kind,
                                ParamKind::Positional | ParamKind::PositionalOnly
                            )
                        })
                        .nth(*index);
                    if let Some(param) = param {
                        for annotation in taint {
                            let parts = interpret(annotation, &positions);
                            apply_to_model(
                                &mut model,
                                &TaintModel::param_port(&param.name),
                                &parts,
                            );
                        }
                    }
                }
                Production::AllParametersTaint { exclude, taint } => {
                    for param in &define.def.params {
                        if exclude.contains(&param.name) {
                            continue;
                        }
                        for annotation in taint {
                            let parts = interpret(annotation, &positions);
                            apply_to_model(
                                &mut model,
                                &TaintModel::param_port(&param.name),
                                &parts,
                            );
                        }
                    }
                }
            }
        }
        model
    }
}

fn matches_constraint(
    constraint: &Constraint,
    env: &TypeEnvironment,
    define: &crate::features::call_graph::Define,
) -> bool {
    match constraint {
        Constraint::Name(regex) => regex.is_match(define.name()),
        Constraint::Return(inner) => match inner {
            AnnotationConstraint::IsAnnotatedType => define.def.returns.is_some(),
            AnnotationConstraint::Equals(expected) => define
                .def
                .returns
                .as_ref()
                .and_then(|r| r.as_dotted_name())
                .map(|r| &r == expected)
                .unwrap_or(false),
        },
        Constraint::AnyParameter(inner) => define.def.params.iter().any(|p| match inner {
            AnnotationConstraint::IsAnnotatedType => p.annotation.is_some(),
            AnnotationConstraint::Equals(expected) => p
                .annotation
                .as_ref()
                .and_then(|a| a.as_dotted_name())
                .map(|a| &a == expected)
                .unwrap_or(false),
        }),
        Constraint::Parent(inner) => {
            let Some(class) = &define.class else {
                return false;
            };
            match inner {
                ParentConstraint::Equals(expected) => class == expected,
                ParentConstraint::Extends(expected) => {
                    if class == expected {
                        return true;
                    }
                    // Walk the transitive bases.
                    let mut stack = env.class_bases(class);
                    let mut visited = rustc_hash::FxHashSet::default();
                    while let Some(current) = stack.pop() {
                        if current == *expected {
                            return true;
                        }
                        if visited.insert(current.clone()) {
                            stack.extend(env.class_bases(&current));
                        }
                    }
                    false
                }
            }
        }
        Constraint::DecoratorName(name) => define.def.decorators.iter().any(|d| {
            let dotted = match d {
                Expr::Call { func, .. } => func.as_dotted_name(),
                other => other.as_dotted_name(),
            };
            dotted
                .map(|d| d == *name || d.rsplit('.').next() == Some(name.as_str()))
                .unwrap_or(false)
        }),
        Constraint::AnyOf(inner) => inner.iter().any(|c| matches_constraint(c, env, define)),
        Constraint::AllOf(inner) => inner.iter().all(|c| matches_constraint(c, env, define)),
        Constraint::Not(inner) => !matches_constraint(inner, env, define),
    }
}
