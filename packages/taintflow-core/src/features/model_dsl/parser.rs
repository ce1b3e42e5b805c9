//! Model document parsing
//!
//! Model documents are syntactically the target language, so they go
//! through the regular parser; the only wrinkle is that signature models
//! name their targets with dotted paths (`def os.system(...)`), which the
//! grammar rejects. Those names are placeholdered before parsing and
//! restored during interpretation.

use super::annotation::{apply_attachments, apply_to_model, interpret, AnnotationParts};
use super::errors::{ModelError, ModelErrorKind};
use super::queries::{self, ModelQuery};
use super::rules::RuleSet;
use crate::features::source_env::ast::{Constant, Expr, FunctionDef, ParamKind, Stmt};
use crate::features::source_env::parser::{parse_module, ParseResult};
use crate::features::taint::{
    Mode, SanitizeFilter, Sanitizers, SinkKind, SourceKind, TaintModel,
};
use crate::features::type_env::{Signature, TypeEnvironment};
use crate::shared::models::{Qualifier, Span, Target, TargetKind};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Output of parsing one model document
#[derive(Debug, Default)]
pub struct ModelParseResult {
    pub models: Vec<(Target, TaintModel)>,
    pub queries: Vec<ModelQuery>,
    pub skip_overrides: FxHashSet<Target>,
    pub errors: Vec<ModelError>,
}

impl ModelParseResult {
    /// Join duplicate targets into one model each
    pub fn into_model_map(self) -> (FxHashMap<Target, TaintModel>, Vec<ModelError>) {
        let mut map: FxHashMap<Target, TaintModel> = FxHashMap::default();
        for (target, model) in self.models {
            match map.get_mut(&target) {
                Some(existing) => *existing = existing.join(&model),
                None => {
                    map.insert(target, model);
                }
            }
        }
        (map, self.errors)
    }

    /// Drop source/sink kinds not reachable by any rule in `rules`
    pub fn filter_to_rules(&mut self, rules: &RuleSet) {
        let sources = rules.used_source_kinds();
        let sinks = rules.used_sink_kinds();
        for (_, model) in self.models.iter_mut() {
            *model = model.restrict_to_kinds(&sources, &sinks);
        }
    }
}

static DOTTED_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\s*)def\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+)\s*\(")
        .unwrap()
});

/// Parse one model document against the environment
pub fn parse_models(text: &str, env: &TypeEnvironment) -> ModelParseResult {
    let mut result = ModelParseResult::default();

    // Placeholder dotted define names so the document parses.
    let mut originals: FxHashMap<String, String> = FxHashMap::default();
    let mut counter = 0usize;
    let rewritten = DOTTED_DEF.replace_all(text, |caps: &regex::Captures<'_>| {
        let placeholder = format!("__model_target_{counter}");
        counter += 1;
        originals.insert(placeholder.clone(), caps[2].to_string());
        format!("{}def {placeholder}(", &caps[1])
    });

    let parsed = match parse_module(Qualifier::new("<models>"), &rewritten) {
        ParseResult::Source(source) => source,
        ParseResult::Failure(failure) => {
            result.errors.push(ModelError::new(
                ModelErrorKind::Syntax {
                    message: failure.message,
                },
                failure.span,
            ));
            return result;
        }
    };

    for stmt in &parsed.statements {
        match stmt {
            Stmt::FunctionDef(def) => {
                let name = originals
                    .get(&def.name)
                    .cloned()
                    .unwrap_or_else(|| def.name.clone());
                signature_model(&name, def, env, &mut result);
            }
            Stmt::Assign {
                targets,
                annotation: Some(annotation),
                value,
                span,
            } => global_model(targets, annotation, value.as_ref(), *span, env, &mut result),
            Stmt::Expr {
                value: Expr::Call { func, keywords, .. },
                span,
            } if func.as_dotted_name().as_deref() == Some("ModelQuery") => {
                match queries::parse_query(keywords, *span) {
                    Ok(query) => result.queries.push(query),
                    Err(error) => result.errors.push(error),
                }
            }
            _ => {}
        }
    }

    result
}

/// Look up the signature a model declaration verifies against. Bare names
/// fall back to the builtins module, but the model registers under the
/// name as written, which is what call sites resolve to.
fn lookup_signature(env: &TypeEnvironment, name: &str) -> Option<Arc<Signature>> {
    if let Some(signature) = env.signature_of(name) {
        return Some(signature);
    }
    if !name.contains('.') {
        return env.signature_of(&format!("builtins.{name}"));
    }
    None
}

/// Target identity for a verified signature model
fn target_for(env: &TypeEnvironment, name: &str, signature: &Signature) -> Target {
    let kind = if signature.is_setter {
        TargetKind::PropertySetter
    } else {
        TargetKind::Normal
    };
    if let Some((qualifier, chain)) = env.locate(name) {
        if chain.len() >= 2 {
            let class = qualifier
                .child(&chain[..chain.len() - 1].join("."))
                .as_str()
                .to_string();
            if env.class_summary(&class).is_some() {
                return Target::Method {
                    class,
                    name: chain[chain.len() - 1].clone(),
                    kind,
                };
            }
        }
    }
    Target::Function {
        name: name.to_string(),
        kind,
    }
}

fn nearest_decorator_span(def: &FunctionDef) -> Span {
    def.decorators
        .first()
        .map(|d| d.span())
        .unwrap_or(def.span)
}

fn signature_model(
    name: &str,
    def: &FunctionDef,
    env: &TypeEnvironment,
    result: &mut ModelParseResult,
) {
    // Decorators first: they decide mode and override skipping, and an
    // unrecognized one rejects the declaration.
    let mut mode = Mode::Normal;
    let mut skip_overrides = false;
    for decorator in &def.decorators {
        match interpret_model_decorator(decorator) {
            Some(ModelDecorator::SkipAnalysis) => mode = mode.join(&Mode::SkipAnalysis),
            Some(ModelDecorator::SkipOverrides) => skip_overrides = true,
            Some(ModelDecorator::Sanitize(sanitizers)) => {
                mode = mode.join(&Mode::Sanitize(sanitizers))
            }
            None => {
                result.errors.push(ModelError::new(
                    ModelErrorKind::UnexpectedDecorators {
                        decorator: decorator
                            .as_dotted_name()
                            .unwrap_or_else(|| "<expression>".to_string()),
                    },
                    decorator.span(),
                ));
                return;
            }
        }
    }

    let Some(signature) = lookup_signature(env, name) else {
        result.errors.push(ModelError::new(
            ModelErrorKind::NotInEnvironment {
                name: name.to_string(),
            },
            nearest_decorator_span(def),
        ));
        return;
    };

    // Parameter-shape verification against the implementation.
    for param in &def.params {
        if matches!(param.kind, ParamKind::Vararg | ParamKind::Kwarg) {
            continue;
        }
        let Some(sig_param) = signature.param(&param.name) else {
            result.errors.push(ModelError::new(
                ModelErrorKind::MissingNamedParameter {
                    param: param.name.clone(),
                },
                def.span,
            ));
            return;
        };
        if sig_param.is_positional_only() {
            result.errors.push(ModelError::new(
                ModelErrorKind::UnexpectedPositionalOnlyParameter {
                    param: param.name.clone(),
                },
                def.span,
            ));
            return;
        }
        if matches!(param.kind, ParamKind::KeywordOnly) && !sig_param.accepts_keyword() {
            result.errors.push(ModelError::new(
                ModelErrorKind::UnexpectedNamedParameter {
                    param: param.name.clone(),
                },
                def.span,
            ));
            return;
        }
        if let Some(default) = &param.default {
            if !matches!(
                default,
                Expr::Constant {
                    value: Constant::Ellipsis,
                    ..
                }
            ) {
                result.errors.push(ModelError::new(
                    ModelErrorKind::InvalidDefaultValue {
                        param: param.name.clone(),
                    },
                    default.span(),
                ));
                return;
            }
        }
    }

    let target = target_for(env, name, &signature);
    if skip_overrides {
        result.skip_overrides.insert(target.clone());
    }

    let positions = param_positions(&signature);
    let mut model = TaintModel {
        mode,
        ..TaintModel::empty()
    };
    let mut attachments: Vec<(crate::features::abstract_domain::AccessPath, AnnotationParts)> =
        Vec::new();

    for param in &def.params {
        let Some(annotation) = &param.annotation else {
            continue;
        };
        let parts = interpret(annotation, &positions);
        result.errors.extend(parts.errors.iter().cloned());
        let port = TaintModel::param_port(&param.name);
        apply_to_model(&mut model, &port, &parts);
        attachments.push((port, parts));
    }
    if let Some(returns) = &def.returns {
        let parts = interpret(returns, &positions);
        result.errors.extend(parts.errors.iter().cloned());
        let port = TaintModel::return_port();
        apply_to_model(&mut model, &port, &parts);
        attachments.push((port, parts));
    }
    for (port, parts) in &attachments {
        apply_attachments(&mut model, port, parts);
    }

    result.models.push((target, model));
}

fn param_positions(signature: &Signature) -> FxHashMap<String, u32> {
    let mut positions = FxHashMap::default();
    let mut index = 0u32;
    for param in &signature.params {
        if matches!(
            param.kind,
            ParamKind::Positional | ParamKind::PositionalOnly
        ) {
            positions.insert(param.name.clone(), index);
            index += 1;
        }
    }
    positions
}

fn global_model(
    targets: &[Expr],
    annotation: &Expr,
    value: Option<&Expr>,
    span: Span,
    env: &TypeEnvironment,
    result: &mut ModelParseResult,
) {
    // Global models must end in `= ...`.
    if !matches!(
        value,
        Some(Expr::Constant {
            value: Constant::Ellipsis,
            ..
        })
    ) {
        result.errors.push(ModelError::new(
            ModelErrorKind::InvalidDefaultValue {
                param: "<global>".to_string(),
            },
            span,
        ));
        return;
    }
    let Some(name) = targets.first().and_then(|t| t.as_dotted_name()) else {
        result.errors.push(ModelError::new(
            ModelErrorKind::InvalidTaintAnnotation {
                annotation: "<target>".to_string(),
            },
            span,
        ));
        return;
    };

    // Verify: a module-level global, or a class attribute.
    let known = env.global_info(&name).is_some()
        || name
            .rsplit_once('.')
            .map(|(class, attr)| env.resolve_attribute(class, attr).is_some())
            .unwrap_or(false);
    if !known {
        result.errors.push(ModelError::new(
            ModelErrorKind::NotInEnvironment { name: name.clone() },
            span,
        ));
        return;
    }

    let parts = interpret(annotation, &FxHashMap::default());
    result.errors.extend(parts.errors.iter().cloned());
    let mut model = TaintModel::empty();
    let port = TaintModel::return_port();
    apply_to_model(&mut model, &port, &parts);
    apply_attachments(&mut model, &port, &parts);

    result.models.push((Target::object(name), model));
}

enum ModelDecorator {
    SkipAnalysis,
    SkipOverrides,
    Sanitize(Sanitizers),
}

fn interpret_model_decorator(decorator: &Expr) -> Option<ModelDecorator> {
    match decorator {
        Expr::Name { id, .. } => match id.as_str() {
            "SkipAnalysis" => Some(ModelDecorator::SkipAnalysis),
            "SkipOverrides" => Some(ModelDecorator::SkipOverrides),
            "Sanitize" => Some(ModelDecorator::Sanitize(Sanitizers::all())),
            _ => None,
        },
        Expr::Call { func, args, .. } if func.as_dotted_name().as_deref() == Some("Sanitize") => {
            let mut sanitizers = Sanitizers::default();
            for arg in args {
                match arg {
                    Expr::Name { id, .. } if id == "TaintSource" => {
                        sanitizers.sources = Some(SanitizeFilter::All);
                    }
                    Expr::Name { id, .. } if id == "TaintSink" => {
                        sanitizers.sinks = Some(SanitizeFilter::All);
                    }
                    Expr::Name { id, .. } if id == "TaintInTaintOut" => {
                        sanitizers.tito = Some(SanitizeFilter::All);
                    }
                    Expr::Subscript { value, index, .. } => {
                        let kinds: Vec<String> = match index.as_ref() {
                            Expr::Tuple { elts, .. } => {
                                elts.iter().filter_map(|e| e.as_dotted_name()).collect()
                            }
                            other => other.as_dotted_name().into_iter().collect(),
                        };
                        match value.as_dotted_name().as_deref() {
                            Some("TaintSource") => {
                                sanitizers.sources = Some(SanitizeFilter::Kinds(
                                    kinds.into_iter().map(SourceKind::new).collect(),
                                ));
                            }
                            Some("TaintSink") => {
                                sanitizers.sinks = Some(SanitizeFilter::Kinds(
                                    kinds.into_iter().map(SinkKind::new).collect(),
                                ));
                            }
                            _ => return None,
                        }
                    }
                    _ => return None,
                }
            }
            Some(ModelDecorator::Sanitize(sanitizers))
        }
        _ => None,
    }
}
