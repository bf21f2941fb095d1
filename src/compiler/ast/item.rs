use serde::{Deserialize, Serialize};

use super::{
    directives_enabled, Declaration, Directive, Expression, ExpressionKind, Macro, NumberValue,
    StatementKind, Type,
};
use crate::compiler::source::Location;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Declaration>,
    #[serde(default)]
    pub returns: Vec<Type>,
    pub body: Expression,
    #[serde(default)]
    pub entry: bool,
    /// Where an implicit return is reported.
    #[serde(default)]
    pub end_location: Location,
}

impl Procedure {
    /// The type of the value a reference to this procedure produces.
    pub fn signature(&self) -> Type {
        Type::Procedure {
            arguments: self.arguments.iter().map(|a| a.ty.clone()).collect(),
            returns: self.returns.clone(),
        }
    }

    /// True when control can reach the end of the body without passing a
    /// `return` statement at its top level.
    pub fn has_implicit_return(&self) -> bool {
        match &self.body.kind {
            ExpressionKind::Block(statements) => !matches!(
                statements.iter().filter(|s| s.is_enabled()).last(),
                Some(s) if matches!(s.kind, StatementKind::Return(_))
            ),
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Procedure(Procedure),
    Global { name: String, ty: Type },
    Type { name: String, ty: Type },
    Constant { name: String, value: NumberValue },
    Macro(Macro),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKind,
    #[serde(default)]
    pub location: Location,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
}

impl Item {
    pub fn new(kind: ItemKind) -> Item {
        Item {
            kind,
            location: Location::default(),
            directives: vec![],
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            ItemKind::Procedure(p) => &p.name,
            ItemKind::Macro(m) => &m.name,
            ItemKind::Global { name, .. }
            | ItemKind::Type { name, .. }
            | ItemKind::Constant { name, .. } => name,
        }
    }

    pub fn is_enabled(&self) -> bool {
        directives_enabled(&self.directives)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A whole compilation unit. Forward references between items, and between
/// files, are allowed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub files: Vec<File>,
}

impl Program {
    /// Items whose directives hold, in file then declaration order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.files
            .iter()
            .flat_map(|f| f.items.iter())
            .filter(|i| i.is_enabled())
    }

    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.items().filter_map(|i| match &i.kind {
            ItemKind::Procedure(p) => Some(p),
            _ => None,
        })
    }
}
