use serde::{Deserialize, Serialize};

use super::{RunMacro, Statement, Type};
use crate::compiler::source::Location;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberValue {
    Integer(u64),
    Decimal(f64),
}

impl NumberValue {
    /// The bit pattern written to memory for this literal when it is used as
    /// a value of the given float-ness.
    pub fn bits(self, as_float: bool) -> u64 {
        match (self, as_float) {
            (NumberValue::Integer(v), false) => v,
            (NumberValue::Integer(v), true) => (v as f64).to_bits(),
            (NumberValue::Decimal(d), false) => d as u64,
            (NumberValue::Decimal(d), true) => d.to_bits(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulus
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
                | BinaryOperator::Less
                | BinaryOperator::LessEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        };
        f.write_str(op)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub kind: ExpressionKind,
    #[serde(default)]
    pub location: Location,
    /// Set by the type checker when the expression produces exactly one value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
}

impl Expression {
    pub fn new(kind: ExpressionKind, location: Location) -> Expression {
        Expression {
            kind,
            location,
            ty: None,
        }
    }

    /// Literal-like operands adopt the type of the other side of a binary
    /// operator, so the checker evaluates that side first.
    pub fn is_literal_like(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::Number(_) | ExpressionKind::SizeOf(_)
        )
    }

    /// Expressions whose storage has an address: the operand of `&` and the
    /// base of a field access or index on a non-pointer value.
    pub fn is_addressable(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::Identifier(_)
                | ExpressionKind::Field { .. }
                | ExpressionKind::Index { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    Block(Vec<Statement>),
    Number(NumberValue),
    Str(String),
    Char(u8),
    Boolean(bool),
    Null,
    Identifier(String),
    Field {
        parent: Box<Expression>,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_ty: Option<Type>,
        #[serde(default)]
        needs_reference: bool,
    },
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        array_ty: Option<Type>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        procedure_ty: Option<Type>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operand_ty: Option<Type>,
    },
    Not(Box<Expression>),
    If {
        condition: Box<Expression>,
        then: Box<Expression>,
        #[serde(default)]
        otherwise: Option<Box<Expression>>,
    },
    Multiple(Vec<Expression>),
    Reference(Box<Expression>),
    Cast {
        target: Type,
        operand: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_ty: Option<Type>,
    },
    Init(Type),
    Build {
        target: Type,
        arguments: Vec<Expression>,
    },
    SizeOf(Type),
    LengthOf(Type),
    RunMacro(RunMacro),
}

/// Number of register arguments a `@syscallN` builtin takes, not counting
/// the syscall number itself.
pub fn syscall_arity(name: &str) -> Option<usize> {
    let n = name.strip_prefix("@syscall")?;
    match n.parse::<usize>() {
        Ok(n) if n <= 6 => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_names() {
        for (name, expected) in vec![
            ("@syscall0", Some(0)),
            ("@syscall6", Some(6)),
            ("@syscall7", None),
            ("@syscall", None),
            ("syscall1", None),
        ] {
            assert_eq!(syscall_arity(name), expected, "{}", name);
        }
    }

    #[test]
    fn literal_bits() {
        assert_eq!(NumberValue::Integer(3).bits(false), 3);
        assert_eq!(NumberValue::Integer(3).bits(true), 3.0f64.to_bits());
        assert_eq!(NumberValue::Decimal(2.5).bits(true), 2.5f64.to_bits());
        assert_eq!(NumberValue::Decimal(2.5).bits(false), 2);
    }
}
