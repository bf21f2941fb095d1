pub mod builder;
mod expression;
mod item;
mod macros;
mod statement;
mod ty;
mod walk;

pub use self::expression::{syscall_arity, BinaryOperator, Expression, ExpressionKind, NumberValue};
pub use self::item::{File, Item, ItemKind, Procedure, Program};
pub use self::macros::{Macro, MacroArgument, MacroSyntax, MacroSyntaxKind, MacroVariant, RunMacro};
pub use self::statement::{
    directives_enabled, Directive, DirectiveCondition, OperatingSystem, Statement, StatementKind,
    TARGET_OS,
};
pub use self::ty::{Declaration, Primitive, Type};
pub use self::walk::for_each_local;
