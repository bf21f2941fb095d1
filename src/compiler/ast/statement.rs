use serde::{Deserialize, Serialize};

use super::{Declaration, Expression, Type};
use crate::compiler::source::Location;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    #[serde(default)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
}

impl Statement {
    pub fn new(kind: StatementKind, location: Location) -> Statement {
        Statement {
            kind,
            location,
            directives: vec![],
        }
    }

    pub fn is_enabled(&self) -> bool {
        directives_enabled(&self.directives)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Expression(Expression),
    Declare {
        declarations: Vec<Declaration>,
        #[serde(default)]
        value: Option<Expression>,
    },
    Assign {
        targets: Vec<Expression>,
        value: Expression,
    },
    Return(Option<Expression>),
    While {
        condition: Expression,
        body: Expression,
    },
    Break,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    Linux,
    Windows,
    Macos,
}

/// Both backends emit Linux executables.
pub const TARGET_OS: OperatingSystem = OperatingSystem::Linux;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveCondition {
    Boolean(bool),
    Os {
        os: OperatingSystem,
        #[serde(default = "default_true")]
        equal: bool,
    },
    IsType {
        wanted: Type,
        given: Type,
    },
    Not(Box<DirectiveCondition>),
}

fn default_true() -> bool {
    true
}

impl DirectiveCondition {
    pub fn evaluate(&self) -> bool {
        match self {
            DirectiveCondition::Boolean(b) => *b,
            DirectiveCondition::Os { os, equal } => (*os == TARGET_OS) == *equal,
            DirectiveCondition::IsType { wanted, given } => wanted.matches(given),
            DirectiveCondition::Not(inner) => !inner.evaluate(),
        }
    }
}

/// Compile time directives attached to items and statements. A node whose
/// `#if` condition is false is invisible to the checker and both backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    If(DirectiveCondition),
}

pub fn directives_enabled(directives: &[Directive]) -> bool {
    directives.iter().all(|d| match d {
        Directive::If(condition) => condition.evaluate(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Primitive;

    #[test]
    fn directive_conditions() {
        for (condition, expected) in vec![
            (DirectiveCondition::Boolean(true), true),
            (DirectiveCondition::Boolean(false), false),
            (
                DirectiveCondition::Os {
                    os: OperatingSystem::Linux,
                    equal: true,
                },
                true,
            ),
            (
                DirectiveCondition::Os {
                    os: OperatingSystem::Windows,
                    equal: true,
                },
                false,
            ),
            (
                DirectiveCondition::Os {
                    os: OperatingSystem::Windows,
                    equal: false,
                },
                true,
            ),
            (
                DirectiveCondition::IsType {
                    wanted: Type::Primitive(Primitive::U8),
                    given: Type::Primitive(Primitive::U8),
                },
                true,
            ),
            (
                DirectiveCondition::Not(Box::new(DirectiveCondition::Boolean(true))),
                false,
            ),
        ] {
            assert_eq!(condition.evaluate(), expected, "{:?}", condition);
        }
    }

    #[test]
    fn all_directives_must_hold() {
        let on = Directive::If(DirectiveCondition::Boolean(true));
        let off = Directive::If(DirectiveCondition::Boolean(false));
        assert!(directives_enabled(&[]));
        assert!(directives_enabled(&[on.clone()]));
        assert!(!directives_enabled(&[on, off]));
    }
}
