//! Concrete-syntax parsing
//!
//! Delegates lexing and grammar to tree-sitter, then converts the concrete
//! tree into the crate AST. A module that fails to parse yields a
//! `ParseResult::Failure` carrying the first error location; consumers
//! substitute the any-getattr stub for such modules.

use super::ast::*;
use crate::shared::models::{Qualifier, Span};
use tree_sitter::{Node as TSNode, Parser};

/// A located parse failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub span: Span,
    pub message: String,
}

/// Outcome of parsing one module
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Source(ParsedSource),
    Failure(ParseFailure),
}

impl ParseResult {
    pub fn source(&self) -> Option<&ParsedSource> {
        match self {
            ParseResult::Source(s) => Some(s),
            ParseResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ParseFailure> {
        match self {
            ParseResult::Source(_) => None,
            ParseResult::Failure(f) => Some(f),
        }
    }
}

/// Parse one module's text
pub fn parse_module(qualifier: Qualifier, content: &str) -> ParseResult {
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_python::language()).is_err() {
        return ParseResult::Failure(ParseFailure {
            span: Span::zero(),
            message: "grammar failed to load".to_string(),
        });
    }

    let Some(tree) = parser.parse(content, None) else {
        return ParseResult::Failure(ParseFailure {
            span: Span::zero(),
            message: "parser returned no tree".to_string(),
        });
    };

    let root = tree.root_node();
    if root.has_error() {
        let error_span = first_error_span(root).unwrap_or_else(Span::zero);
        return ParseResult::Failure(ParseFailure {
            span: error_span,
            message: "invalid syntax".to_string(),
        });
    }

    let (mode, suppressions) = scan_directives(content);
    let mut statements = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if let Some(stmt) = convert_statement(child, content) {
            statements.push(stmt);
        }
    }

    ParseResult::Source(ParsedSource {
        qualifier,
        statements,
        mode,
        suppressions,
    })
}

fn first_error_span(root: TSNode) -> Option<Span> {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(span_of(node));
        }
        if node.has_error() {
            for child in node.children(&mut cursor) {
                stack.push(child);
            }
        }
    }
    None
}

/// Header mode directive plus line-scoped suppressions.
///
/// The mode is taken from comments before the first code line; suppressions
/// can appear anywhere.
fn scan_directives(content: &str) -> (SourceMode, Vec<Suppression>) {
    let mut mode = SourceMode::default();
    let mut in_header = true;
    let mut suppressions = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if in_header {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                match trimmed.trim_start_matches('#').trim() {
                    "taintflow: strict" => mode = SourceMode::Strict,
                    "taintflow: unsafe" => mode = SourceMode::Unsafe,
                    "taintflow: ignore-all-errors" => mode = SourceMode::IgnoreAll,
                    _ => {}
                }
            } else {
                in_header = false;
            }
        }
        if let Some(pos) = line.find("# taintflow: ignore") {
            let rest = &line[pos + "# taintflow: ignore".len()..];
            let codes = rest
                .strip_prefix('[')
                .and_then(|r| r.split(']').next())
                .map(|inner| {
                    inner
                        .split(',')
                        .filter_map(|c| c.trim().parse::<u32>().ok())
                        .collect()
                })
                .unwrap_or_default();
            suppressions.push(Suppression {
                line: idx as u32 + 1,
                codes,
            });
        }
    }
    (mode, suppressions)
}

fn span_of(node: TSNode) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span::new(
        start.row as u32 + 1,
        start.column as u32,
        end.row as u32 + 1,
        end.column as u32,
    )
}

fn text<'a>(node: TSNode, src: &'a str) -> &'a str {
    &src[node.byte_range()]
}

fn convert_block(node: TSNode, src: &str) -> Vec<Stmt> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter_map(|child| convert_statement(child, src))
        .collect()
}

fn convert_statement(node: TSNode, src: &str) -> Option<Stmt> {
    let span = span_of(node);
    match node.kind() {
        "comment" => None,
        "decorated_definition" => {
            let mut cursor = node.walk();
            let mut decorators = Vec::new();
            let mut inner = None;
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "decorator" => {
                        if let Some(expr_node) = child.named_child(0) {
                            decorators.push(convert_expression(expr_node, src));
                        }
                    }
                    _ => {
                        if let Some(stmt) = convert_statement(child, src) {
                            inner = Some(stmt);
                        }
                    }
                }
            }
            match inner? {
                Stmt::FunctionDef(mut def) => {
                    def.decorators = decorators;
                    Some(Stmt::FunctionDef(def))
                }
                Stmt::ClassDef(mut def) => {
                    def.decorators = decorators;
                    Some(Stmt::ClassDef(def))
                }
                other => Some(other),
            }
        }
        "function_definition" => Some(Stmt::FunctionDef(convert_function(node, src))),
        "class_definition" => {
            let name = node
                .child_by_field_name("name")
                .map(|n| text(n, src).to_string())?;
            let bases = node
                .child_by_field_name("superclasses")
                .map(|args| {
                    let mut cursor = args.walk();
                    args.named_children(&mut cursor)
                        .filter(|c| c.kind() != "keyword_argument" && c.kind() != "comment")
                        .map(|c| convert_expression(c, src))
                        .collect()
                })
                .unwrap_or_default();
            let body = node
                .child_by_field_name("body")
                .map(|b| convert_block(b, src))
                .unwrap_or_default();
            Some(Stmt::ClassDef(ClassDef {
                name,
                bases,
                decorators: Vec::new(),
                body,
                span,
            }))
        }
        "expression_statement" => {
            let inner = node.named_child(0)?;
            match inner.kind() {
                "assignment" => convert_assignment(inner, src, span),
                "augmented_assignment" => {
                    let target = convert_expression(inner.child_by_field_name("left")?, src);
                    let op = inner
                        .child_by_field_name("operator")
                        .map(|o| text(o, src).to_string())
                        .unwrap_or_default();
                    let value = convert_expression(inner.child_by_field_name("right")?, src);
                    Some(Stmt::AugAssign {
                        target,
                        op,
                        value,
                        span,
                    })
                }
                _ => Some(Stmt::Expr {
                    value: convert_expression(inner, src),
                    span,
                }),
            }
        }
        "return_statement" => Some(Stmt::Return {
            value: node.named_child(0).map(|v| convert_expression(v, src)),
            span,
        }),
        "if_statement" => {
            let test = convert_expression(node.child_by_field_name("condition")?, src);
            let body = node
                .child_by_field_name("consequence")
                .map(|b| convert_block(b, src))
                .unwrap_or_default();
            let mut orelse = Vec::new();
            let mut cursor = node.walk();
            for alt in node.children_by_field_name("alternative", &mut cursor) {
                match alt.kind() {
                    "elif_clause" => {
                        if let Some(stmt) = convert_elif(alt, src) {
                            orelse.push(stmt);
                        }
                    }
                    "else_clause" => {
                        if let Some(block) = alt.child_by_field_name("body") {
                            orelse.extend(convert_block(block, src));
                        }
                    }
                    _ => {}
                }
            }
            Some(Stmt::If {
                test,
                body,
                orelse,
                span,
            })
        }
        "while_statement" => Some(Stmt::While {
            test: convert_expression(node.child_by_field_name("condition")?, src),
            body: node
                .child_by_field_name("body")
                .map(|b| convert_block(b, src))
                .unwrap_or_default(),
            orelse: else_clause_body(node, src),
            span,
        }),
        "for_statement" => Some(Stmt::For {
            target: convert_expression(node.child_by_field_name("left")?, src),
            iter: convert_expression(node.child_by_field_name("right")?, src),
            body: node
                .child_by_field_name("body")
                .map(|b| convert_block(b, src))
                .unwrap_or_default(),
            orelse: else_clause_body(node, src),
            span,
        }),
        "try_statement" => {
            let body = node
                .child_by_field_name("body")
                .map(|b| convert_block(b, src))
                .unwrap_or_default();
            let mut handlers = Vec::new();
            let mut orelse = Vec::new();
            let mut finalbody = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "except_clause" => handlers.push(convert_except(child, src)),
                    "else_clause" => {
                        if let Some(block) = child.child_by_field_name("body") {
                            orelse = convert_block(block, src);
                        }
                    }
                    "finally_clause" => {
                        let mut inner = child.walk();
                        for sub in child.named_children(&mut inner) {
                            if sub.kind() == "block" {
                                finalbody = convert_block(sub, src);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some(Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                span,
            })
        }
        "with_statement" => {
            let mut items = Vec::new();
            let mut cursor = node.walk();
            for clause in node.named_children(&mut cursor) {
                if clause.kind() != "with_clause" {
                    continue;
                }
                let mut inner = clause.walk();
                for item in clause.named_children(&mut inner) {
                    if item.kind() != "with_item" {
                        continue;
                    }
                    let Some(value) = item.child_by_field_name("value") else {
                        continue;
                    };
                    if value.kind() == "as_pattern" {
                        let expr = value
                            .named_child(0)
                            .map(|v| convert_expression(v, src))
                            .unwrap_or(Expr::Unknown { span });
                        let alias = value
                            .child_by_field_name("alias")
                            .map(|a| convert_expression(a, src));
                        items.push((expr, alias));
                    } else {
                        items.push((convert_expression(value, src), None));
                    }
                }
            }
            Some(Stmt::With {
                items,
                body: node
                    .child_by_field_name("body")
                    .map(|b| convert_block(b, src))
                    .unwrap_or_default(),
                span,
            })
        }
        "raise_statement" => Some(Stmt::Raise {
            exception: node.named_child(0).map(|v| convert_expression(v, src)),
            span,
        }),
        "import_statement" => {
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "dotted_name" => names.push(ImportAlias {
                        name: text(child, src).to_string(),
                        alias: None,
                    }),
                    "aliased_import" => {
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| text(n, src).to_string())
                            .unwrap_or_default();
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|a| text(a, src).to_string());
                        names.push(ImportAlias { name, alias });
                    }
                    _ => {}
                }
            }
            Some(Stmt::Import { names, span })
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|m| Qualifier::new(text(m, src).trim_start_matches('.')))
                .unwrap_or_else(Qualifier::empty);
            let mut names = Vec::new();
            let mut is_wildcard = false;
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "wildcard_import" => is_wildcard = true,
                    "dotted_name" if Some(child) != node.child_by_field_name("module_name") => {
                        names.push(ImportAlias {
                            name: text(child, src).to_string(),
                            alias: None,
                        });
                    }
                    "aliased_import" => {
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| text(n, src).to_string())
                            .unwrap_or_default();
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|a| text(a, src).to_string());
                        names.push(ImportAlias { name, alias });
                    }
                    _ => {}
                }
            }
            Some(Stmt::ImportFrom {
                module,
                names,
                is_wildcard,
                span,
            })
        }
        "global_statement" => {
            let mut cursor = node.walk();
            let names = node
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "identifier")
                .map(|c| text(c, src).to_string())
                .collect();
            Some(Stmt::Global { names, span })
        }
        "pass_statement" => Some(Stmt::Pass { span }),
        "break_statement" => Some(Stmt::Break { span }),
        "continue_statement" => Some(Stmt::Continue { span }),
        "delete_statement" => {
            let targets = node
                .named_child(0)
                .map(|t| match t.kind() {
                    "expression_list" => {
                        let mut cursor = t.walk();
                        t.named_children(&mut cursor)
                            .map(|c| convert_expression(c, src))
                            .collect()
                    }
                    _ => vec![convert_expression(t, src)],
                })
                .unwrap_or_default();
            Some(Stmt::Delete { targets, span })
        }
        "assert_statement" => {
            let test = node.named_child(0).map(|t| convert_expression(t, src))?;
            let message = node.named_child(1).map(|m| convert_expression(m, src));
            Some(Stmt::Assert {
                test,
                message,
                span,
            })
        }
        "future_import_statement" => None,
        _ => None,
    }
}

fn convert_assignment(node: TSNode, src: &str, span: Span) -> Option<Stmt> {
    let left = node.child_by_field_name("left")?;
    let annotation = node
        .child_by_field_name("type")
        .map(|t| convert_expression(t, src));

    // Chained assignment nests on the right: `a = b = 1` parses as
    // assignment(a, assignment(b, 1)).
    let mut targets = vec![convert_expression(left, src)];
    let mut value = None;
    let mut right = node.child_by_field_name("right");
    while let Some(v) = right {
        if v.kind() == "assignment" {
            if let Some(inner_left) = v.child_by_field_name("left") {
                targets.push(convert_expression(inner_left, src));
            }
            right = v.child_by_field_name("right");
        } else {
            value = Some(convert_expression(v, src));
            break;
        }
    }

    Some(Stmt::Assign {
        targets,
        annotation,
        value,
        span,
    })
}

fn convert_elif(node: TSNode, src: &str) -> Option<Stmt> {
    let span = span_of(node);
    Some(Stmt::If {
        test: convert_expression(node.child_by_field_name("condition")?, src),
        body: node
            .child_by_field_name("consequence")
            .map(|b| convert_block(b, src))
            .unwrap_or_default(),
        orelse: Vec::new(),
        span,
    })
}

fn else_clause_body(node: TSNode, src: &str) -> Vec<Stmt> {
    node.child_by_field_name("alternative")
        .and_then(|alt| alt.child_by_field_name("body"))
        .map(|b| convert_block(b, src))
        .unwrap_or_default()
}

fn convert_except(node: TSNode, src: &str) -> ExceptHandler {
    let mut exception = None;
    let mut name = None;
    let mut body = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "block" => body = convert_block(child, src),
            "as_pattern" => {
                exception = child.named_child(0).map(|e| convert_expression(e, src));
                name = child
                    .child_by_field_name("alias")
                    .map(|a| text(a, src).to_string());
            }
            "comment" => {}
            _ if exception.is_none() => exception = Some(convert_expression(child, src)),
            _ => {}
        }
    }
    ExceptHandler {
        exception,
        name,
        body,
    }
}

fn convert_function(node: TSNode, src: &str) -> FunctionDef {
    let span = span_of(node);
    let name = node
        .child_by_field_name("name")
        .map(|n| text(n, src).to_string())
        .unwrap_or_default();
    let params = node
        .child_by_field_name("parameters")
        .map(|p| convert_parameters(p, src))
        .unwrap_or_default();
    let returns = node
        .child_by_field_name("return_type")
        .map(|r| convert_expression(r, src));
    let body = node
        .child_by_field_name("body")
        .map(|b| convert_block(b, src))
        .unwrap_or_default();
    let is_async = (0..node.child_count())
        .filter_map(|i| node.child(i))
        .any(|c| c.kind() == "async");

    FunctionDef {
        name,
        params,
        returns,
        decorators: Vec::new(),
        body,
        is_async,
        span,
    }
}

fn convert_parameters(node: TSNode, src: &str) -> Vec<Parameter> {
    let mut params = Vec::new();
    let mut keyword_only = false;
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => params.push(Parameter {
                name: text(child, src).to_string(),
                annotation: None,
                default: None,
                kind: positional_kind(keyword_only),
            }),
            "typed_parameter" => {
                let name = child
                    .named_child(0)
                    .map(|n| text(n, src).to_string())
                    .unwrap_or_default();
                let annotation = child
                    .child_by_field_name("type")
                    .map(|t| convert_expression(t, src));
                params.push(Parameter {
                    name,
                    annotation,
                    default: None,
                    kind: positional_kind(keyword_only),
                });
            }
            "default_parameter" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| text(n, src).to_string())
                    .unwrap_or_default();
                let default = child
                    .child_by_field_name("value")
                    .map(|v| convert_expression(v, src));
                params.push(Parameter {
                    name,
                    annotation: None,
                    default,
                    kind: positional_kind(keyword_only),
                });
            }
            "typed_default_parameter" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| text(n, src).to_string())
                    .unwrap_or_default();
                let annotation = child
                    .child_by_field_name("type")
                    .map(|t| convert_expression(t, src));
                let default = child
                    .child_by_field_name("value")
                    .map(|v| convert_expression(v, src));
                params.push(Parameter {
                    name,
                    annotation,
                    default,
                    kind: positional_kind(keyword_only),
                });
            }
            "list_splat_pattern" => {
                params.push(Parameter {
                    name: child
                        .named_child(0)
                        .map(|n| text(n, src).to_string())
                        .unwrap_or_default(),
                    annotation: None,
                    default: None,
                    kind: ParamKind::Vararg,
                });
                keyword_only = true;
            }
            "dictionary_splat_pattern" => params.push(Parameter {
                name: child
                    .named_child(0)
                    .map(|n| text(n, src).to_string())
                    .unwrap_or_default(),
                annotation: None,
                default: None,
                kind: ParamKind::Kwarg,
            }),
            "keyword_separator" => keyword_only = true,
            "positional_separator" => {
                // Everything before `/` was positional-only.
                for param in params.iter_mut() {
                    if matches!(param.kind, ParamKind::Positional) {
                        param.kind = ParamKind::PositionalOnly;
                    }
                }
            }
            _ => {}
        }
    }
    params
}

fn positional_kind(keyword_only: bool) -> ParamKind {
    if keyword_only {
        ParamKind::KeywordOnly
    } else {
        ParamKind::Positional
    }
}

fn convert_expression(node: TSNode, src: &str) -> Expr {
    let span = span_of(node);
    match node.kind() {
        "identifier" => Expr::Name {
            id: text(node, src).to_string(),
            span,
        },
        "attribute" => {
            let value = node
                .child_by_field_name("object")
                .map(|o| convert_expression(o, src))
                .unwrap_or(Expr::Unknown { span });
            let attr = node
                .child_by_field_name("attribute")
                .map(|a| text(a, src).to_string())
                .unwrap_or_default();
            Expr::Attribute {
                value: Box::new(value),
                attr,
                span,
            }
        }
        "subscript" => {
            let value = node
                .child_by_field_name("value")
                .map(|v| convert_expression(v, src))
                .unwrap_or(Expr::Unknown { span });
            // `a[x, y]` carries one subscript field per element.
            let mut cursor = node.walk();
            let mut indices: Vec<Expr> = node
                .children_by_field_name("subscript", &mut cursor)
                .map(|s| convert_expression(s, src))
                .collect();
            let index = match indices.len() {
                0 => Expr::Unknown { span },
                1 => indices.pop().unwrap(),
                _ => Expr::Tuple { elts: indices, span },
            };
            Expr::Subscript {
                value: Box::new(value),
                index: Box::new(index),
                span,
            }
        }
        "call" => {
            let func = node
                .child_by_field_name("function")
                .map(|f| convert_expression(f, src))
                .unwrap_or(Expr::Unknown { span });
            let mut args = Vec::new();
            let mut keywords = Vec::new();
            if let Some(arguments) = node.child_by_field_name("arguments") {
                let mut cursor = arguments.walk();
                for arg in arguments.named_children(&mut cursor) {
                    match arg.kind() {
                        "keyword_argument" => {
                            let key = arg
                                .child_by_field_name("name")
                                .map(|n| text(n, src).to_string());
                            let value = arg
                                .child_by_field_name("value")
                                .map(|v| convert_expression(v, src))
                                .unwrap_or(Expr::Unknown { span });
                            keywords.push((key, value));
                        }
                        "list_splat" | "dictionary_splat" => {
                            let value = arg
                                .named_child(0)
                                .map(|v| convert_expression(v, src))
                                .unwrap_or(Expr::Unknown { span });
                            keywords.push((None, value));
                        }
                        "comment" => {}
                        _ => args.push(convert_expression(arg, src)),
                    }
                }
            }
            Expr::Call {
                func: Box::new(func),
                args,
                keywords,
                span,
            }
        }
        "string" | "concatenated_string" => {
            // Interpolations make the literal an f-string.
            let mut interpolations = Vec::new();
            collect_interpolations(node, src, &mut interpolations);
            if interpolations.is_empty() {
                Expr::Constant {
                    value: Constant::Str(string_literal_value(node, src)),
                    span,
                }
            } else {
                Expr::FString {
                    parts: interpolations,
                    span,
                }
            }
        }
        "integer" => Expr::Constant {
            value: text(node, src)
                .parse::<i64>()
                .map(Constant::Int)
                .unwrap_or(Constant::Float(text(node, src).to_string())),
            span,
        },
        "float" => Expr::Constant {
            value: Constant::Float(text(node, src).to_string()),
            span,
        },
        "true" => Expr::Constant {
            value: Constant::Bool(true),
            span,
        },
        "false" => Expr::Constant {
            value: Constant::Bool(false),
            span,
        },
        "none" => Expr::Constant {
            value: Constant::None,
            span,
        },
        "ellipsis" => Expr::Constant {
            value: Constant::Ellipsis,
            span,
        },
        "tuple" | "expression_list" | "pattern_list" | "tuple_pattern" => Expr::Tuple {
            elts: named_expressions(node, src),
            span,
        },
        "list" | "set" => Expr::List {
            elts: named_expressions(node, src),
            span,
        },
        "dictionary" => {
            let mut keys = Vec::new();
            let mut values = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "pair" => {
                        keys.push(
                            child
                                .child_by_field_name("key")
                                .map(|k| convert_expression(k, src)),
                        );
                        values.push(
                            child
                                .child_by_field_name("value")
                                .map(|v| convert_expression(v, src))
                                .unwrap_or(Expr::Unknown { span }),
                        );
                    }
                    "dictionary_splat" => {
                        keys.push(None);
                        values.push(
                            child
                                .named_child(0)
                                .map(|v| convert_expression(v, src))
                                .unwrap_or(Expr::Unknown { span }),
                        );
                    }
                    _ => {}
                }
            }
            Expr::Dict { keys, values, span }
        }
        "binary_operator" => Expr::BinOp {
            left: Box::new(
                node.child_by_field_name("left")
                    .map(|l| convert_expression(l, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            op: node
                .child_by_field_name("operator")
                .map(|o| text(o, src).to_string())
                .unwrap_or_default(),
            right: Box::new(
                node.child_by_field_name("right")
                    .map(|r| convert_expression(r, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        "boolean_operator" => {
            let op = node
                .child_by_field_name("operator")
                .map(|o| text(o, src).to_string())
                .unwrap_or_default();
            let values = ["left", "right"]
                .iter()
                .filter_map(|f| node.child_by_field_name(f))
                .map(|v| convert_expression(v, src))
                .collect();
            Expr::BoolOp { op, values, span }
        }
        "not_operator" => Expr::UnaryOp {
            op: "not".to_string(),
            operand: Box::new(
                node.child_by_field_name("argument")
                    .map(|a| convert_expression(a, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        "unary_operator" => Expr::UnaryOp {
            op: node
                .child_by_field_name("operator")
                .map(|o| text(o, src).to_string())
                .unwrap_or_default(),
            operand: Box::new(
                node.child_by_field_name("argument")
                    .map(|a| convert_expression(a, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        "comparison_operator" => {
            let mut exprs = named_expressions(node, src);
            if exprs.is_empty() {
                return Expr::Unknown { span };
            }
            let left = exprs.remove(0);
            Expr::Compare {
                left: Box::new(left),
                comparators: exprs,
                span,
            }
        }
        "await" => Expr::Await {
            value: Box::new(
                node.named_child(0)
                    .map(|v| convert_expression(v, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        "lambda" => Expr::Lambda {
            params: node
                .child_by_field_name("parameters")
                .map(|p| convert_parameters(p, src))
                .unwrap_or_default(),
            body: Box::new(
                node.child_by_field_name("body")
                    .map(|b| convert_expression(b, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        "conditional_expression" => {
            let mut exprs = named_expressions(node, src);
            if exprs.len() == 3 {
                let orelse = exprs.pop().unwrap();
                let test = exprs.pop().unwrap();
                let body = exprs.pop().unwrap();
                Expr::Ternary {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                    span,
                }
            } else {
                Expr::Unknown { span }
            }
        }
        "parenthesized_expression" => node
            .named_child(0)
            .map(|inner| convert_expression(inner, src))
            .unwrap_or(Expr::Unknown { span }),
        "list_splat" | "splat" => Expr::Starred {
            value: Box::new(
                node.named_child(0)
                    .map(|v| convert_expression(v, src))
                    .unwrap_or(Expr::Unknown { span }),
            ),
            span,
        },
        _ => Expr::Unknown { span },
    }
}

fn named_expressions(node: TSNode, src: &str) -> Vec<Expr> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .map(|c| convert_expression(c, src))
        .collect()
}

fn collect_interpolations(node: TSNode, src: &str, out: &mut Vec<Expr>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "interpolation" {
            if let Some(expr) = child.child_by_field_name("expression").or(child.named_child(0)) {
                out.push(convert_expression(expr, src));
            }
        } else if child.child_count() > 0 {
            collect_interpolations(child, src, out);
        }
    }
}

/// Literal text with the quotes and prefix stripped; escape sequences kept
/// verbatim since the analysis never evaluates strings.
fn string_literal_value(node: TSNode, src: &str) -> String {
    let raw = text(node, src);
    let trimmed = raw.trim_start_matches(|c: char| "rbfuRBFU".contains(c));
    trimmed
        .trim_start_matches("\"\"\"")
        .trim_end_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("'''")
        .trim_start_matches('"')
        .trim_end_matches('"')
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .to_string()
}
