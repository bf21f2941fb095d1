use serde::{Deserialize, Serialize};

use super::{Expression, Type};
use crate::compiler::source::Location;

/// What a macro argument or expansion is: an expression or a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroSyntaxKind {
    Expression,
    Type,
}

impl std::fmt::Display for MacroSyntaxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroSyntaxKind::Expression => f.write_str("expression"),
            MacroSyntaxKind::Type => f.write_str("type"),
        }
    }
}

/// A piece of syntax handed to a macro or produced by one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroSyntax {
    Expression(Box<Expression>),
    Type(Type),
}

impl MacroSyntax {
    pub fn kind(&self) -> MacroSyntaxKind {
        match self {
            MacroSyntax::Expression(_) => MacroSyntaxKind::Expression,
            MacroSyntax::Type(_) => MacroSyntaxKind::Type,
        }
    }
}

/// One declared parameter of a macro. A `multiple` parameter accepts every
/// remaining argument of its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroArgument {
    pub kind: MacroSyntaxKind,
    #[serde(default)]
    pub multiple: bool,
}

/// One way of expanding a macro. With `varargs` set the last binding takes
/// all the arguments left over once the others are bound, at least one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroVariant {
    #[serde(default)]
    pub bindings: Vec<String>,
    #[serde(default)]
    pub varargs: bool,
    pub body: MacroSyntax,
}

impl MacroVariant {
    /// Whether this variant can bind exactly `count` arguments.
    pub fn accepts(&self, count: usize) -> bool {
        if self.varargs && !self.bindings.is_empty() {
            count >= self.bindings.len()
        } else {
            count == self.bindings.len()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<MacroArgument>,
    pub returns: MacroSyntaxKind,
    pub variants: Vec<MacroVariant>,
}

/// An invocation `#name(arguments...)`. The checker stores the expansion in
/// `result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMacro {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<MacroSyntax>,
    #[serde(default)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<MacroSyntax>>,
}

impl RunMacro {
    pub fn new(name: &str, arguments: Vec<MacroSyntax>) -> RunMacro {
        RunMacro {
            name: name.into(),
            arguments,
            location: Location::default(),
            result: None,
        }
    }

    pub fn expanded_expression(&self) -> Option<&Expression> {
        match self.result.as_deref() {
            Some(MacroSyntax::Expression(e)) => Some(e),
            _ => None,
        }
    }

    pub fn expanded_type(&self) -> Option<&Type> {
        match self.result.as_deref() {
            Some(MacroSyntax::Type(ty)) => Some(ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;

    #[test]
    fn variant_arity() {
        let fixed = MacroVariant {
            bindings: vec!["a".into(), "b".into()],
            varargs: false,
            body: MacroSyntax::Type(u8_ty()),
        };
        let tail = MacroVariant {
            varargs: true,
            ..fixed.clone()
        };
        let empty = MacroVariant {
            bindings: vec![],
            varargs: true,
            body: MacroSyntax::Type(u8_ty()),
        };
        for (variant, count, expected) in vec![
            (&fixed, 2, true),
            (&fixed, 1, false),
            (&fixed, 3, false),
            (&tail, 1, false),
            (&tail, 2, true),
            (&tail, 5, true),
            (&empty, 0, true),
            (&empty, 1, false),
        ] {
            assert_eq!(variant.accepts(count), expected, "{:?} with {}", variant.bindings, count);
        }
    }
}
