//! Target-language AST
//!
//! One algebraic type per syntactic class, with explicit variant tags.
//! Nodes carry spans for reporting; semantic comparisons go through
//! [`ParsedSource::semantic_fingerprint`], which ignores locations, so a
//! whitespace-only edit does not count as a shape change.

use crate::shared::models::{Qualifier, Span};
use serde::Serialize;

/// Checking mode of one module, from its header directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SourceMode {
    /// Gradual: unannotated code is not checked strictly
    #[default]
    Unsafe,

    /// Everything must type-check
    Strict,

    /// All diagnostics suppressed for this module
    IgnoreAll,
}

/// A line-scoped suppression directive (`# taintflow: ignore[6, 9]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suppression {
    pub line: u32,

    /// Empty means every code is suppressed on that line
    pub codes: Vec<u32>,
}

/// Parsed module: ordered statements plus header metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSource {
    pub qualifier: Qualifier,
    pub statements: Vec<Stmt>,
    pub mode: SourceMode,
    pub suppressions: Vec<Suppression>,
}

impl ParsedSource {
    /// Location-insensitive fingerprint of the module shape.
    ///
    /// Spans are serde-skipped throughout the AST, so two parses differing
    /// only in positions hash identically.
    pub fn semantic_fingerprint(&self) -> blake3::Hash {
        let bytes = serde_json::to_vec(&self.statements).unwrap_or_default();
        blake3::hash(&bytes)
    }

    /// The synthetic module consumers substitute for a failed parse:
    /// everything it exports is `Any`.
    pub fn any_getattr_stub(qualifier: Qualifier) -> ParsedSource {
        ParsedSource {
            qualifier,
            statements: vec![Stmt::FunctionDef(FunctionDef {
                name: "__getattr__".to_string(),
                params: vec![Parameter {
                    name: "name".to_string(),
                    annotation: Some(Expr::Name {
                        id: "str".to_string(),
                        span: Span::zero(),
                    }),
                    default: None,
                    kind: ParamKind::Positional,
                }],
                returns: Some(Expr::Name {
                    id: "Any".to_string(),
                    span: Span::zero(),
                }),
                decorators: Vec::new(),
                body: vec![Stmt::Pass { span: Span::zero() }],
                is_async: false,
                span: Span::zero(),
            })],
            mode: SourceMode::Unsafe,
            suppressions: Vec::new(),
        }
    }
}

/// Parameter passing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    Positional,
    PositionalOnly,
    KeywordOnly,
    Vararg,
    Kwarg,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Parameter>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub is_async: bool,

    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Vec<Stmt>,

    #[serde(skip)]
    pub span: Span,
}

/// `import a.b as c` / `from m import a as c` element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportAlias {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptHandler {
    pub exception: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

/// Statement: the single recursive statement type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Assign {
        targets: Vec<Expr>,
        annotation: Option<Expr>,
        value: Option<Expr>,
        #[serde(skip)]
        span: Span,
    },
    AugAssign {
        target: Expr,
        op: String,
        value: Expr,
        #[serde(skip)]
        span: Span,
    },
    Return {
        value: Option<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Expr {
        value: Expr,
        #[serde(skip)]
        span: Span,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },
    With {
        items: Vec<(Expr, Option<Expr>)>,
        body: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },
    Raise {
        exception: Option<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Import {
        names: Vec<ImportAlias>,
        #[serde(skip)]
        span: Span,
    },
    ImportFrom {
        module: Qualifier,
        names: Vec<ImportAlias>,
        is_wildcard: bool,
        #[serde(skip)]
        span: Span,
    },
    Global {
        names: Vec<String>,
        #[serde(skip)]
        span: Span,
    },
    Pass {
        #[serde(skip)]
        span: Span,
    },
    Break {
        #[serde(skip)]
        span: Span,
    },
    Continue {
        #[serde(skip)]
        span: Span,
    },
    Delete {
        targets: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Assert {
        test: Expr,
        message: Option<Expr>,
        #[serde(skip)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::FunctionDef(d) => d.span,
            Stmt::ClassDef(c) => c.span,
            Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::With { span, .. }
            | Stmt::Raise { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::ImportFrom { span, .. }
            | Stmt::Global { span, .. }
            | Stmt::Pass { span }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Delete { span, .. }
            | Stmt::Assert { span, .. } => *span,
        }
    }
}

/// Literal constant payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constant {
    Str(String),
    Int(i64),
    Float(String),
    Bool(bool),
    None,
    Ellipsis,
    Bytes(Vec<u8>),
}

/// Expression: the single recursive expression type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Name {
        id: String,
        #[serde(skip)]
        span: Span,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        #[serde(skip)]
        span: Span,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<(Option<String>, Expr)>,
        #[serde(skip)]
        span: Span,
    },
    Constant {
        value: Constant,
        #[serde(skip)]
        span: Span,
    },
    Tuple {
        elts: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    List {
        elts: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    BinOp {
        left: Box<Expr>,
        op: String,
        right: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    BoolOp {
        op: String,
        values: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    UnaryOp {
        op: String,
        operand: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Compare {
        left: Box<Expr>,
        comparators: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Await {
        value: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Starred {
        value: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Lambda {
        params: Vec<Parameter>,
        body: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    FString {
        parts: Vec<Expr>,
        #[serde(skip)]
        span: Span,
    },
    Ternary {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
    /// Anything the converter does not model precisely
    Unknown {
        #[serde(skip)]
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Name { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Call { span, .. }
            | Expr::Constant { span, .. }
            | Expr::Tuple { span, .. }
            | Expr::List { span, .. }
            | Expr::Dict { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::BoolOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::Await { span, .. }
            | Expr::Starred { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::FString { span, .. }
            | Expr::Ternary { span, .. }
            | Expr::Unknown { span } => *span,
        }
    }

    /// Dotted-name rendering of `Name`/`Attribute` chains (`a.b.c`)
    pub fn as_dotted_name(&self) -> Option<String> {
        match self {
            Expr::Name { id, .. } => Some(id.clone()),
            Expr::Attribute { value, attr, .. } => {
                value.as_dotted_name().map(|base| format!("{base}.{attr}"))
            }
            _ => None,
        }
    }
}
