use crate::compiler::{
    ast::{BinaryOperator, MacroSyntaxKind, Type},
    memory::LayoutError,
    CompilerErrorDisplay, ErrorKind,
};

fn render_types(types: &[Type]) -> String {
    let list: Vec<_> = types.iter().map(|t| t.to_string()).collect();
    format!("[{}]", list.join(", "))
}

/// Errors generated while type checking a program.
#[derive(Clone, Debug, PartialEq)]
pub enum SemanticError {
    NotDefined(String),
    TypeNotDefined(String),
    AlreadyDefined(String),
    NotAValue(String),
    UnknownField(Type, String),
    Mismatch {
        context: String,
        expected: Type,
        found: Type,
    },
    ExpectedBool(String, Type),
    InvalidOperands(BinaryOperator, Type, Type),
    NotCallable(Type),
    NotAnAggregate(Type),
    NotAnArray(Type),
    NotRegisterSized(String, Type),
    InvalidCast(Type, Type),
    CannotBuild(Type),
    IfArmsMismatch(Vec<Type>, Vec<Type>),
    OutOfValues(String),
    ExtraValues(String),
    IfWithoutElseProducesValues,
    BuildArity(Type, usize, usize),
    NotAddressable,
    NotAssignable,
    BreakOutsideLoop,
    TypeOfOutsideProcedure(String),
    NotAMacro(String),
    MacroKind {
        name: String,
        expected: MacroSyntaxKind,
        found: MacroSyntaxKind,
    },
    MacroArgumentKind {
        name: String,
        index: usize,
        expected: MacroSyntaxKind,
        found: MacroSyntaxKind,
    },
    MacroArity(String, usize),
    MisplacedMacroBinding(String, MacroSyntaxKind),
    MacroTooDeep(String),
    Layout(LayoutError),
}

impl From<LayoutError> for SemanticError {
    fn from(e: LayoutError) -> Self {
        SemanticError::Layout(e)
    }
}

impl CompilerErrorDisplay for SemanticError {
    fn format(&self) -> String {
        match self {
            SemanticError::NotDefined(name) => format!("Could not find definition for {}", name),
            SemanticError::TypeNotDefined(name) => format!("Could not find type {}", name),
            SemanticError::AlreadyDefined(name) => format!("{} is already defined", name),
            SemanticError::NotAValue(name) => format!("{} is a type or macro and cannot be used as a value", name),
            SemanticError::UnknownField(ty, name) => format!("{} has no field {}", ty, name),
            SemanticError::Mismatch {
                context,
                expected,
                found,
            } => format!(
                "Type mismatch in {}: expected {} but got {}",
                context, expected, found
            ),
            SemanticError::ExpectedBool(context, found) => {
                format!("Expected bool for {} but got {}", context, found)
            }
            SemanticError::InvalidOperands(op, l, r) => {
                format!("Operator {} cannot be applied to {} and {}", op, l, r)
            }
            SemanticError::NotCallable(ty) => format!("Cannot call a value of type {}", ty),
            SemanticError::NotAnAggregate(ty) => format!("{} is not a struct or union", ty),
            SemanticError::NotAnArray(ty) => format!("Cannot index into {}", ty),
            SemanticError::NotRegisterSized(name, ty) => {
                format!("{} arguments must fit in a register but got {}", name, ty)
            }
            SemanticError::InvalidCast(from, to) => format!("Cannot cast {} to {}", from, to),
            SemanticError::CannotBuild(ty) => format!("Cannot build a value of type {}", ty),
            SemanticError::IfArmsMismatch(then, otherwise) => format!(
                "If arms must produce the same values but got {} and {}",
                render_types(then),
                render_types(otherwise)
            ),
            SemanticError::OutOfValues(context) => format!("Ran out of values for {}", context),
            SemanticError::ExtraValues(context) => {
                format!("Extra values at the end of {}", context)
            }
            SemanticError::IfWithoutElseProducesValues => {
                "If without an else cannot produce values".into()
            }
            SemanticError::BuildArity(ty, expected, found) => format!(
                "Building {} needs {} values but got {}",
                ty, expected, found
            ),
            SemanticError::NotAddressable => "Only variables, fields and array elements have an address".into(),
            SemanticError::NotAssignable => "Expression cannot be assigned to".into(),
            SemanticError::BreakOutsideLoop => "Break is only allowed inside a loop".into(),
            SemanticError::TypeOfOutsideProcedure(name) => {
                format!("typeof cannot be used in the type of item {}", name)
            }
            SemanticError::NotAMacro(name) => format!("{} is not a macro", name),
            SemanticError::MacroKind {
                name,
                expected,
                found,
            } => format!(
                "Macro {} produces {} syntax where {} syntax is wanted",
                name, found, expected
            ),
            SemanticError::MacroArgumentKind {
                name,
                index,
                expected,
                found,
            } => format!(
                "Argument {} of macro {} must be {} syntax but got {} syntax",
                index, name, expected, found
            ),
            SemanticError::MacroArity(name, count) => {
                format!("Macro {} cannot be invoked with {} arguments", name, count)
            }
            SemanticError::MisplacedMacroBinding(binding, wanted) => {
                format!("Macro binding {} does not hold {} syntax here", binding, wanted)
            }
            SemanticError::MacroTooDeep(name) => {
                format!("Expanding macro {} nests too deeply", name)
            }
            SemanticError::Layout(e) => e.format(),
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            SemanticError::NotDefined(_)
            | SemanticError::TypeNotDefined(_)
            | SemanticError::UnknownField(..) => ErrorKind::UnresolvedSymbol,
            SemanticError::Mismatch { .. }
            | SemanticError::ExpectedBool(..)
            | SemanticError::InvalidOperands(..)
            | SemanticError::NotCallable(_)
            | SemanticError::NotAnAggregate(_)
            | SemanticError::NotAnArray(_)
            | SemanticError::NotRegisterSized(..)
            | SemanticError::InvalidCast(..)
            | SemanticError::IfArmsMismatch(..)
            | SemanticError::MacroKind { .. }
            | SemanticError::MacroArgumentKind { .. }
            | SemanticError::MisplacedMacroBinding(..) => ErrorKind::TypeMismatch,
            SemanticError::OutOfValues(_)
            | SemanticError::ExtraValues(_)
            | SemanticError::IfWithoutElseProducesValues
            | SemanticError::BuildArity(..)
            | SemanticError::MacroArity(..) => ErrorKind::Arity,
            SemanticError::AlreadyDefined(_)
            | SemanticError::NotAValue(_)
            | SemanticError::CannotBuild(_)
            | SemanticError::NotAddressable
            | SemanticError::NotAssignable
            | SemanticError::BreakOutsideLoop
            | SemanticError::TypeOfOutsideProcedure(_)
            | SemanticError::NotAMacro(_)
            | SemanticError::MacroTooDeep(_) => ErrorKind::Unsupported,
            SemanticError::Layout(e) => e.kind(),
        }
    }
}
