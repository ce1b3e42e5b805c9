//! Type-environment value domain
//!
//! The approximate type representations the taint analysis consumes. This
//! is deliberately a small oracle surface: precise subtyping, variance and
//! overload resolution live behind it and are not modeled here.

use crate::features::source_env::ast::ParamKind;
use crate::shared::models::Span;
use serde::{Deserialize, Serialize};

/// Approximate scalar type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    /// Gradual unknown: compatible with everything
    Any,

    /// Builtin primitive (`int`, `str`, `bool`, `float`, `bytes`, `None`)
    Primitive(String),

    /// Instance of a class, by fully qualified name
    Instance(String),

    /// A callable value
    Callable(String),

    /// `Awaitable[inner]`
    Awaitable(Box<ScalarType>),

    /// `Optional[inner]`
    Optional(Box<ScalarType>),
}

impl ScalarType {
    /// Parse a dotted annotation rendering into the approximate domain
    pub fn from_annotation(name: &str) -> ScalarType {
        match name {
            "Any" | "typing.Any" => ScalarType::Any,
            "int" | "str" | "bool" | "float" | "bytes" | "None" => {
                ScalarType::Primitive(name.to_string())
            }
            other => ScalarType::Instance(other.to_string()),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ScalarType::Any)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Any => write!(f, "Any"),
            ScalarType::Primitive(name) | ScalarType::Instance(name) => write!(f, "{name}"),
            ScalarType::Callable(name) => write!(f, "Callable[{name}]"),
            ScalarType::Awaitable(inner) => write!(f, "Awaitable[{inner}]"),
            ScalarType::Optional(inner) => write!(f, "Optional[{inner}]"),
        }
    }
}

/// One parameter of a signature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SigParam {
    pub name: String,
    pub annotation: Option<ScalarType>,
    pub has_default: bool,
    pub kind: ParamKind,
}

impl SigParam {
    pub fn is_positional_only(&self) -> bool {
        matches!(self.kind, ParamKind::PositionalOnly)
    }

    pub fn accepts_keyword(&self) -> bool {
        matches!(self.kind, ParamKind::Positional | ParamKind::KeywordOnly)
    }
}

/// Callable signature as the environment sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signature {
    /// Fully qualified name
    pub name: String,

    pub params: Vec<SigParam>,
    pub returns: Option<ScalarType>,
    pub is_async: bool,
    pub is_property: bool,
    pub is_setter: bool,
    pub is_staticmethod: bool,
    pub is_classmethod: bool,

    /// Dotted decorator names the environment did not recognize
    pub unrecognized_decorators: Vec<String>,

    #[serde(skip)]
    pub span: Span,
}

impl Signature {
    /// Parameter lookup by name
    pub fn param(&self, name: &str) -> Option<&SigParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameter lookup by positional index, skipping `*args`/`**kwargs`
    pub fn positional(&self, index: usize) -> Option<&SigParam> {
        self.params
            .iter()
            .filter(|p| {
                matches!(
                    p.kind,
                    ParamKind::Positional | ParamKind::PositionalOnly
                )
            })
            .nth(index)
    }

    /// The effective return type: async defs return awaitables
    pub fn effective_return(&self) -> ScalarType {
        let inner = self.returns.clone().unwrap_or(ScalarType::Any);
        if self.is_async {
            ScalarType::Awaitable(Box::new(inner))
        } else {
            inner
        }
    }
}

/// Class summary: bases, own methods, own attributes
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSummary {
    /// Fully qualified name
    pub name: String,

    /// Fully qualified base-class names, in declaration order
    pub bases: Vec<String>,

    /// Methods defined directly on the class
    pub methods: Vec<Signature>,

    /// Attributes assigned in the class body or on `self` in `__init__`
    pub attributes: Vec<(String, Option<ScalarType>)>,

    pub span: Span,
}

impl ClassSummary {
    pub fn method(&self, name: &str) -> Option<&Signature> {
        // Setter bodies share the getter's name; prefer the plain binding.
        self.methods
            .iter()
            .find(|m| m.name.rsplit('.').next() == Some(name) && !m.is_setter)
            .or_else(|| {
                self.methods
                    .iter()
                    .find(|m| m.name.rsplit('.').next() == Some(name))
            })
    }

    pub fn own_attribute(&self, name: &str) -> Option<&(String, Option<ScalarType>)> {
        self.attributes.iter().find(|(n, _)| n == name)
    }
}

/// Where an attribute resolution landed
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    /// Class that actually declares the attribute (after walking bases)
    pub declaring_class: String,

    pub name: String,
    pub annotation: Option<ScalarType>,

    /// Set when the attribute is a method rather than a data attribute
    pub is_method: bool,
}

/// Annotated module-level global
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInfo {
    /// Fully qualified name
    pub name: String,

    pub annotation: Option<ScalarType>,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_from_annotation() {
        assert_eq!(ScalarType::from_annotation("Any"), ScalarType::Any);
        assert_eq!(
            ScalarType::from_annotation("int"),
            ScalarType::Primitive("int".to_string())
        );
        assert_eq!(
            ScalarType::from_annotation("pkg.Model"),
            ScalarType::Instance("pkg.Model".to_string())
        );
    }

    #[test]
    fn test_signature_positional_lookup() {
        let sig = Signature {
            name: "m.f".to_string(),
            params: vec![
                SigParam {
                    name: "a".to_string(),
                    annotation: None,
                    has_default: false,
                    kind: ParamKind::Positional,
                },
                SigParam {
                    name: "args".to_string(),
                    annotation: None,
                    has_default: false,
                    kind: ParamKind::Vararg,
                },
                SigParam {
                    name: "k".to_string(),
                    annotation: None,
                    has_default: true,
                    kind: ParamKind::KeywordOnly,
                },
            ],
            returns: None,
            is_async: false,
            is_property: false,
            is_setter: false,
            is_staticmethod: false,
            is_classmethod: false,
            unrecognized_decorators: Vec::new(),
            span: Span::zero(),
        };

        assert_eq!(sig.positional(0).unwrap().name, "a");
        assert!(sig.positional(1).is_none());
        assert!(sig.param("k").unwrap().accepts_keyword());
    }

    #[test]
    fn test_async_effective_return() {
        let sig = Signature {
            name: "m.f".to_string(),
            params: Vec::new(),
            returns: Some(ScalarType::Primitive("int".to_string())),
            is_async: true,
            is_property: false,
            is_setter: false,
            is_staticmethod: false,
            is_classmethod: false,
            unrecognized_decorators: Vec::new(),
            span: Span::zero(),
        };

        assert_eq!(sig.effective_return().to_string(), "Awaitable[int]");
    }
}
