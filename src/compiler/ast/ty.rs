use serde::{Deserialize, Serialize};

use super::{Expression, RunMacro};
use crate::compiler::source::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    UInt,
    U64,
    U32,
    U16,
    U8,
    F64,
    Bool,
    Byte,
    Ptr,
}

impl Primitive {
    pub fn size(self) -> u64 {
        match self {
            Primitive::U8 | Primitive::Bool | Primitive::Byte => 1,
            Primitive::U16 => 2,
            Primitive::U32 => 4,
            Primitive::UInt | Primitive::U64 | Primitive::F64 | Primitive::Ptr => 8,
        }
    }

    /// Unsigned integer widths, including the pointer sized `uint`.
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Primitive::UInt | Primitive::U64 | Primitive::U32 | Primitive::U16 | Primitive::U8
        )
    }

    pub fn is_number(self) -> bool {
        self.is_unsigned() || self == Primitive::Byte || self == Primitive::F64
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Primitive::UInt => "uint",
            Primitive::U64 => "u64",
            Primitive::U32 => "u32",
            Primitive::U16 => "u16",
            Primitive::U8 => "u8",
            Primitive::F64 => "f64",
            Primitive::Bool => "bool",
            Primitive::Byte => "byte",
            Primitive::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// A name bound to a type: procedure arguments, locals and aggregate fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub location: Location,
}

impl Declaration {
    pub fn new(name: &str, ty: Type) -> Declaration {
        Declaration {
            name: name.into(),
            ty,
            location: Location::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Primitive(Primitive),
    Named(String),
    Pointer(Box<Type>),
    Array {
        element: Box<Type>,
        #[serde(default)]
        length: Option<u64>,
    },
    Struct(Vec<Declaration>),
    Union(Vec<Declaration>),
    Enum(Vec<String>),
    Procedure {
        arguments: Vec<Type>,
        returns: Vec<Type>,
    },
    TypeOf {
        expression: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolved: Option<Box<Type>>,
    },
    /// A macro invocation in type position, replaced by its expansion once
    /// checked.
    RunMacro(RunMacro),
}

impl Type {
    pub const UINT: Type = Type::Primitive(Primitive::UInt);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const BYTE: Type = Type::Primitive(Primitive::Byte);

    pub fn pointer_to(ty: Type) -> Type {
        Type::Pointer(Box::new(ty))
    }

    /// The type of string literals and `@file`: a pointer to an unsized byte
    /// array.
    pub fn string() -> Type {
        Type::pointer_to(Type::Array {
            element: Box::new(Type::BYTE),
            length: None,
        })
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_) | Type::Primitive(Primitive::Ptr))
    }

    /// Strips a resolved `typeof` wrapper or an expanded macro. Unresolved
    /// ones are returned as is.
    pub fn strip_type_of(&self) -> &Type {
        match self {
            Type::TypeOf {
                resolved: Some(ty), ..
            } => ty.strip_type_of(),
            Type::RunMacro(run) => match run.expanded_type() {
                Some(ty) => ty.strip_type_of(),
                None => self,
            },
            _ => self,
        }
    }

    pub fn contains_type_of(&self) -> bool {
        match self {
            Type::TypeOf { .. } => true,
            Type::Pointer(inner) => inner.contains_type_of(),
            Type::Array { element, .. } => element.contains_type_of(),
            Type::Struct(fields) | Type::Union(fields) => {
                fields.iter().any(|f| f.ty.contains_type_of())
            }
            Type::Procedure { arguments, returns } => arguments
                .iter()
                .chain(returns.iter())
                .any(|t| t.contains_type_of()),
            Type::RunMacro(run) => run
                .expanded_type()
                .map_or(false, |ty| ty.contains_type_of()),
            Type::Primitive(_) | Type::Named(_) | Type::Enum(_) => false,
        }
    }

    /// Checks whether a value of type `given` may be used where `self` is
    /// wanted. Named types compare by name. An unsized wanted array accepts
    /// an array of any length with a matching element type.
    pub fn matches(&self, given: &Type) -> bool {
        match (self.strip_type_of(), given.strip_type_of()) {
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::Named(a), Type::Named(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a.matches(b),
            (
                Type::Array {
                    element: we,
                    length: wl,
                },
                Type::Array {
                    element: ge,
                    length: gl,
                },
            ) => (wl.is_none() || wl == gl) && we.matches(ge),
            (Type::Struct(a), Type::Struct(b)) | (Type::Union(a), Type::Union(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a.ty.matches(&b.ty))
            }
            (Type::Enum(a), Type::Enum(b)) => a == b,
            (
                Type::Procedure {
                    arguments: wa,
                    returns: wr,
                },
                Type::Procedure {
                    arguments: ga,
                    returns: gr,
                },
            ) => {
                wa.len() == ga.len()
                    && wr.len() == gr.len()
                    && wa.iter().zip(ga.iter()).all(|(w, g)| w.matches(g))
                    && wr.iter().zip(gr.iter()).all(|(w, g)| w.matches(g))
            }
            _ => false,
        }
    }
}

fn write_fields(f: &mut std::fmt::Formatter<'_>, fields: &[Declaration]) -> std::fmt::Result {
    f.write_str("{ ")?;
    for field in fields {
        write!(f, "{}: {}; ", field.name, field.ty)?;
    }
    f.write_str("}")
}

fn write_list(f: &mut std::fmt::Formatter<'_>, types: &[Type]) -> std::fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

/// Renders a type in source syntax.
impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p),
            Type::Named(name) => f.write_str(name),
            Type::Pointer(inner) => write!(f, "*{}", inner),
            Type::Array {
                element,
                length: Some(n),
            } => write!(f, "[{}]{}", n, element),
            Type::Array {
                element,
                length: None,
            } => write!(f, "[]{}", element),
            Type::Struct(fields) => {
                f.write_str("struct ")?;
                write_fields(f, fields)
            }
            Type::Union(fields) => {
                f.write_str("union ")?;
                write_fields(f, fields)
            }
            Type::Enum(variants) => write!(f, "enum {{ {} }}", variants.join(", ")),
            Type::Procedure { arguments, returns } => {
                f.write_str("proc(")?;
                write_list(f, arguments)?;
                f.write_str(")")?;
                if !returns.is_empty() {
                    f.write_str(": ")?;
                    write_list(f, returns)?;
                }
                Ok(())
            }
            Type::TypeOf {
                resolved: Some(ty), ..
            } => write!(f, "{}", ty),
            Type::TypeOf { resolved: None, .. } => f.write_str("typeof(...)"),
            Type::RunMacro(run) => match run.expanded_type() {
                Some(ty) => write!(f, "{}", ty),
                None => write!(f, "#{}(...)", run.name),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(p: Primitive) -> Type {
        Type::Primitive(p)
    }

    #[test]
    fn renders_source_syntax() {
        for (ty, expected) in vec![
            (u(Primitive::U64), "u64"),
            (Type::string(), "*[]byte"),
            (
                Type::Array {
                    element: Box::new(u(Primitive::U8)),
                    length: Some(4),
                },
                "[4]u8",
            ),
            (
                Type::Struct(vec![
                    Declaration::new("x", u(Primitive::U8)),
                    Declaration::new("y", u(Primitive::U64)),
                ]),
                "struct { x: u8; y: u64; }",
            ),
            (
                Type::Procedure {
                    arguments: vec![u(Primitive::U64)],
                    returns: vec![u(Primitive::U64)],
                },
                "proc(u64): u64",
            ),
            (Type::Enum(vec!["a".into(), "b".into()]), "enum { a, b }"),
        ] {
            assert_eq!(ty.to_string(), expected);
        }
    }

    #[test]
    fn matching() {
        let sized = Type::Array {
            element: Box::new(Type::BYTE),
            length: Some(3),
        };
        let unsized_array = Type::Array {
            element: Box::new(Type::BYTE),
            length: None,
        };
        for (wanted, given, expected) in vec![
            (u(Primitive::U64), u(Primitive::U64), true),
            (u(Primitive::U64), u(Primitive::UInt), false),
            (unsized_array.clone(), sized.clone(), true),
            (sized.clone(), unsized_array.clone(), false),
            (Type::Named("A".into()), Type::Named("A".into()), true),
            (Type::Named("A".into()), Type::Named("B".into()), false),
            (
                Type::pointer_to(u(Primitive::U8)),
                Type::pointer_to(u(Primitive::U8)),
                true,
            ),
            (Type::pointer_to(u(Primitive::U8)), u(Primitive::Ptr), false),
        ] {
            assert_eq!(wanted.matches(&given), expected, "{} <- {}", wanted, given);
        }
    }
}
