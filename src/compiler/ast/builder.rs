//! Shorthand constructors for building ASTs by hand, used by the tests and by
//! tools which generate programs without going through a parser.

use super::*;
use crate::compiler::source::Location;

pub const TEST_FILE: &str = "test.stk";

fn loc() -> Location {
    Location::new(TEST_FILE, 1, 1)
}

fn e(kind: ExpressionKind) -> Expression {
    Expression::new(kind, loc())
}

fn s(kind: StatementKind) -> Statement {
    Statement::new(kind, loc())
}

/// Moves an expression to the given line.
pub fn on_line(mut expression: Expression, line: u32) -> Expression {
    expression.location.line = line;
    expression
}

/// Moves a statement to the given line.
pub fn stmt_on_line(mut statement: Statement, line: u32) -> Statement {
    statement.location.line = line;
    statement
}

pub fn uint_ty() -> Type {
    Type::Primitive(Primitive::UInt)
}

pub fn u64_ty() -> Type {
    Type::Primitive(Primitive::U64)
}

pub fn u32_ty() -> Type {
    Type::Primitive(Primitive::U32)
}

pub fn u16_ty() -> Type {
    Type::Primitive(Primitive::U16)
}

pub fn u8_ty() -> Type {
    Type::Primitive(Primitive::U8)
}

pub fn f64_ty() -> Type {
    Type::Primitive(Primitive::F64)
}

pub fn bool_ty() -> Type {
    Type::Primitive(Primitive::Bool)
}

pub fn byte_ty() -> Type {
    Type::Primitive(Primitive::Byte)
}

pub fn ptr_ty() -> Type {
    Type::Primitive(Primitive::Ptr)
}

pub fn named(name: &str) -> Type {
    Type::Named(name.into())
}

pub fn pointer(ty: Type) -> Type {
    Type::pointer_to(ty)
}

pub fn array(element: Type, length: Option<u64>) -> Type {
    Type::Array {
        element: Box::new(element),
        length,
    }
}

fn fields(fs: Vec<(&str, Type)>) -> Vec<Declaration> {
    fs.into_iter().map(|(n, t)| Declaration::new(n, t)).collect()
}

pub fn structure(fs: Vec<(&str, Type)>) -> Type {
    Type::Struct(fields(fs))
}

pub fn union_of(fs: Vec<(&str, Type)>) -> Type {
    Type::Union(fields(fs))
}

pub fn enumeration(variants: Vec<&str>) -> Type {
    Type::Enum(variants.into_iter().map(String::from).collect())
}

pub fn type_of(expression: Expression) -> Type {
    Type::TypeOf {
        expression: Box::new(expression),
        resolved: None,
    }
}

pub fn num(v: u64) -> Expression {
    e(ExpressionKind::Number(NumberValue::Integer(v)))
}

pub fn decimal(v: f64) -> Expression {
    e(ExpressionKind::Number(NumberValue::Decimal(v)))
}

pub fn boolean(b: bool) -> Expression {
    e(ExpressionKind::Boolean(b))
}

pub fn string(text: &str) -> Expression {
    e(ExpressionKind::Str(text.into()))
}

pub fn character(c: u8) -> Expression {
    e(ExpressionKind::Char(c))
}

pub fn null() -> Expression {
    e(ExpressionKind::Null)
}

pub fn ident(name: &str) -> Expression {
    e(ExpressionKind::Identifier(name.into()))
}

pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
    e(ExpressionKind::Binary {
        operator,
        left: Box::new(left),
        right: Box::new(right),
        operand_ty: None,
    })
}

pub fn add(left: Expression, right: Expression) -> Expression {
    binary(BinaryOperator::Add, left, right)
}

pub fn not(operand: Expression) -> Expression {
    e(ExpressionKind::Not(Box::new(operand)))
}

pub fn call(callee: &str, arguments: Vec<Expression>) -> Expression {
    e(ExpressionKind::Call {
        callee: Box::new(ident(callee)),
        arguments,
        procedure_ty: None,
    })
}

pub fn field(parent: Expression, name: &str) -> Expression {
    e(ExpressionKind::Field {
        parent: Box::new(parent),
        name: name.into(),
        parent_ty: None,
        needs_reference: false,
    })
}

pub fn index(array: Expression, i: Expression) -> Expression {
    e(ExpressionKind::Index {
        array: Box::new(array),
        index: Box::new(i),
        array_ty: None,
    })
}

pub fn reference(operand: Expression) -> Expression {
    e(ExpressionKind::Reference(Box::new(operand)))
}

pub fn if_else(condition: Expression, then: Expression, otherwise: Option<Expression>) -> Expression {
    e(ExpressionKind::If {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: otherwise.map(Box::new),
    })
}

pub fn multiple(parts: Vec<Expression>) -> Expression {
    e(ExpressionKind::Multiple(parts))
}

pub fn cast(target: Type, operand: Expression) -> Expression {
    e(ExpressionKind::Cast {
        target,
        operand: Box::new(operand),
        input_ty: None,
    })
}

pub fn init(ty: Type) -> Expression {
    e(ExpressionKind::Init(ty))
}

pub fn build(target: Type, arguments: Vec<Expression>) -> Expression {
    e(ExpressionKind::Build { target, arguments })
}

pub fn size_of(ty: Type) -> Expression {
    e(ExpressionKind::SizeOf(ty))
}

pub fn length_of(ty: Type) -> Expression {
    e(ExpressionKind::LengthOf(ty))
}

pub fn expression_syntax(expression: Expression) -> MacroSyntax {
    MacroSyntax::Expression(Box::new(expression))
}

pub fn type_syntax(ty: Type) -> MacroSyntax {
    MacroSyntax::Type(ty)
}

pub fn run_macro(name: &str, arguments: Vec<MacroSyntax>) -> Expression {
    let mut run = RunMacro::new(name, arguments);
    run.location = loc();
    e(ExpressionKind::RunMacro(run))
}

pub fn run_macro_type(name: &str, arguments: Vec<MacroSyntax>) -> Type {
    let mut run = RunMacro::new(name, arguments);
    run.location = loc();
    Type::RunMacro(run)
}

pub fn block(statements: Vec<Statement>) -> Expression {
    e(ExpressionKind::Block(statements))
}

pub fn expr_stmt(expression: Expression) -> Statement {
    s(StatementKind::Expression(expression))
}

pub fn declare(names: Vec<(&str, Type)>, value: Option<Expression>) -> Statement {
    s(StatementKind::Declare {
        declarations: fields(names),
        value,
    })
}

pub fn assign(targets: Vec<Expression>, value: Expression) -> Statement {
    s(StatementKind::Assign { targets, value })
}

pub fn ret(value: Option<Expression>) -> Statement {
    s(StatementKind::Return(value))
}

pub fn while_loop(condition: Expression, body: Expression) -> Statement {
    s(StatementKind::While { condition, body })
}

pub fn brk() -> Statement {
    s(StatementKind::Break)
}

/// Attaches an always false `#if` to a statement.
pub fn disabled(mut statement: Statement) -> Statement {
    statement
        .directives
        .push(Directive::If(DirectiveCondition::Boolean(false)));
    statement
}

pub fn procedure(
    name: &str,
    arguments: Vec<(&str, Type)>,
    returns: Vec<Type>,
    body: Vec<Statement>,
) -> Item {
    Item::new(ItemKind::Procedure(Procedure {
        name: name.into(),
        arguments: fields(arguments),
        returns,
        body: block(body),
        entry: false,
        end_location: Location::new(TEST_FILE, 99, 1),
    }))
}

/// An entry procedure without arguments or returns.
pub fn entry(name: &str, body: Vec<Statement>) -> Item {
    let mut item = procedure(name, vec![], vec![], body);
    if let ItemKind::Procedure(p) = &mut item.kind {
        p.entry = true;
    }
    item
}

pub fn global(name: &str, ty: Type) -> Item {
    Item::new(ItemKind::Global {
        name: name.into(),
        ty,
    })
}

pub fn type_def(name: &str, ty: Type) -> Item {
    Item::new(ItemKind::Type {
        name: name.into(),
        ty,
    })
}

pub fn constant(name: &str, value: u64) -> Item {
    Item::new(ItemKind::Constant {
        name: name.into(),
        value: NumberValue::Integer(value),
    })
}

pub fn macro_argument(kind: MacroSyntaxKind, multiple: bool) -> MacroArgument {
    MacroArgument { kind, multiple }
}

pub fn macro_variant(bindings: Vec<&str>, varargs: bool, body: MacroSyntax) -> MacroVariant {
    MacroVariant {
        bindings: bindings.into_iter().map(String::from).collect(),
        varargs,
        body,
    }
}

pub fn macro_def(
    name: &str,
    arguments: Vec<MacroArgument>,
    returns: MacroSyntaxKind,
    variants: Vec<MacroVariant>,
) -> Item {
    Item::new(ItemKind::Macro(Macro {
        name: name.into(),
        arguments,
        returns,
        variants,
    }))
}

pub fn program(items: Vec<Item>) -> Program {
    Program {
        files: vec![File {
            path: TEST_FILE.into(),
            items,
        }],
    }
}
