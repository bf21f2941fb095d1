use log::{debug, trace};
use stdext::function_name;

use crate::{
    compiler::{
        ast::*,
        error::AtLocation,
        memory::{Layout, LayoutError},
        source::Location,
        CompilerError,
    },
    diagnostics::config::TracingConfig,
};

use super::{
    macros::{self, MAX_MACRO_DEPTH},
    CheckedProgram, ItemSymbol, LocalScope, Resolved, SemanticError, SemanticResult, SymbolTable,
    TypeStack,
};

macro_rules! trace_checker {
    ($checker:expr, $location:expr) => {
        if $checker.tracing.includes($location.line) {
            trace!(
                "{} {}: {} value(s) on the stack",
                function_name!(),
                $location,
                $checker.stack.len()
            );
        }
    };
}

fn err<T>(location: &Location, e: SemanticError) -> SemanticResult<T> {
    Err(CompilerError::new(location.clone(), e))
}

/// Type checks a program and annotates it in place. Code generation only
/// accepts the result of this function.
pub fn check(program: Program) -> SemanticResult<CheckedProgram> {
    check_with_tracing(program, TracingConfig::Off)
}

pub fn check_with_tracing(
    mut program: Program,
    tracing: TracingConfig,
) -> SemanticResult<CheckedProgram> {
    debug!("Type checking {} file(s)", program.files.len());
    let macros = SymbolTable::macros_of(&program)?;
    expand_item_types(&mut program, &macros)?;
    let symbols = SymbolTable::from_program(&program)?;
    {
        let mut checker = TypeChecker::new(&symbols, tracing);
        for file in program.files.iter_mut() {
            debug!("Checking file {}", file.path);
            for item in file.items.iter_mut().filter(|i| i.is_enabled()) {
                checker.item(item)?;
            }
        }
    }
    Ok(CheckedProgram::new(program, symbols))
}

/// Item level types may invoke macros, which are expanded before the symbol
/// table is built from those types.
fn expand_item_types(program: &mut Program, macros: &SymbolTable) -> SemanticResult<()> {
    for item in program
        .files
        .iter_mut()
        .flat_map(|f| f.items.iter_mut())
        .filter(|i| i.is_enabled())
    {
        let location = item.location.clone();
        let types: Vec<&mut Type> = match &mut item.kind {
            ItemKind::Global { ty, .. } | ItemKind::Type { ty, .. } => vec![ty],
            ItemKind::Procedure(p) => p
                .arguments
                .iter_mut()
                .map(|a| &mut a.ty)
                .chain(p.returns.iter_mut())
                .collect(),
            ItemKind::Constant { .. } | ItemKind::Macro(_) => vec![],
        };
        for ty in types {
            macros::expand_types(ty, macros, 0).map_err(|e| CompilerError::new(location.clone(), e))?;
        }
    }
    Ok(())
}

/// Walks procedure bodies keeping a stack of the types of the values the
/// generated code will have on its stack at the same point.
struct TypeChecker<'a> {
    symbols: &'a SymbolTable,
    layout: Layout<'a>,
    stack: TypeStack,
    scope: LocalScope,
    arguments: Vec<Declaration>,
    returns: Vec<Type>,
    /// Set by `&` and consumed by the next retrieval.
    in_reference: bool,
    loop_depth: usize,
    /// Macro expansions currently being checked inside one another.
    macro_depth: usize,
    tracing: TracingConfig,
}

impl<'a> TypeChecker<'a> {
    fn new(symbols: &'a SymbolTable, tracing: TracingConfig) -> TypeChecker<'a> {
        TypeChecker {
            symbols,
            layout: Layout::new(symbols),
            stack: TypeStack::new(),
            scope: LocalScope::new(),
            arguments: vec![],
            returns: vec![],
            in_reference: false,
            loop_depth: 0,
            macro_depth: 0,
            tracing,
        }
    }

    fn size_of(&self, ty: &Type, location: &Location) -> SemanticResult<u64> {
        self.layout.size_of(ty).at(location)
    }

    fn resolve(&self, ty: &Type, location: &Location) -> SemanticResult<Type> {
        self.layout.resolve(ty).at(location)
    }

    fn take_in_reference(&mut self) -> bool {
        std::mem::replace(&mut self.in_reference, false)
    }

    /// Pushes `ty`, or a pointer to it when the retrieval is the operand of `&`.
    fn push_retrieved(&mut self, ty: Type, in_reference: bool) {
        if in_reference {
            self.stack.push(Type::pointer_to(ty))
        } else {
            self.stack.push(ty)
        }
    }

    fn pop_matching(&mut self, expected: &Type, location: &Location, context: &str) -> SemanticResult<()> {
        let found = self.stack.pop(location, context)?;
        if expected.matches(&found) {
            Ok(())
        } else {
            err(
                location,
                SemanticError::Mismatch {
                    context: context.into(),
                    expected: expected.clone(),
                    found,
                },
            )
        }
    }

    fn pop_bool(&mut self, location: &Location, context: &str) -> SemanticResult<()> {
        let found = self.stack.pop(location, context)?;
        if Type::BOOL.matches(&found) {
            Ok(())
        } else {
            err(location, SemanticError::ExpectedBool(context.into(), found))
        }
    }

    fn is_numeric(&self, ty: &Type) -> bool {
        matches!(self.layout.resolve(ty), Ok(Type::Primitive(p)) if p.is_number())
    }

    /// The wanted type when it is numeric, `uint` otherwise.
    fn numeric_or_uint(&self, wanted: Option<&Type>) -> Type {
        match wanted {
            Some(w) if self.is_numeric(w) => w.clone(),
            _ => Type::UINT,
        }
    }

    fn is_register_sized(&self, ty: &Type) -> bool {
        match self.layout.resolve(ty) {
            Ok(Type::Primitive(p)) => matches!(p, Primitive::UInt | Primitive::U64 | Primitive::Ptr),
            Ok(Type::Pointer(_)) => true,
            _ => false,
        }
    }

    fn item(&mut self, item: &mut Item) -> SemanticResult<()> {
        let location = item.location.clone();
        match &mut item.kind {
            ItemKind::Procedure(p) => self.procedure(p),
            ItemKind::Type { name, ty } => {
                self.resolve_type(ty, &location)?;
                match self.layout.size_of(&Type::Named(name.clone())) {
                    Err(e @ LayoutError::RecursiveType(_)) => err(&location, e.into()),
                    _ => Ok(()),
                }
            }
            ItemKind::Global { ty, .. } => {
                self.resolve_type(ty, &location)?;
                self.size_of(ty, &location).map(|_| ())
            }
            ItemKind::Constant { .. } | ItemKind::Macro(_) => Ok(()),
        }
    }

    fn procedure(&mut self, procedure: &mut Procedure) -> SemanticResult<()> {
        debug!("Checking procedure {}", procedure.name);
        let location = procedure.body.location.clone();
        for a in procedure.arguments.iter_mut() {
            let loc = a.location.clone();
            self.resolve_type(&mut a.ty, &loc)?;
            self.size_of(&a.ty, &loc)?;
        }
        for r in procedure.returns.iter_mut() {
            self.resolve_type(r, &location)?;
            self.size_of(r, &location)?;
        }

        self.arguments = procedure.arguments.clone();
        self.returns = procedure.returns.clone();
        self.scope = LocalScope::new();
        self.stack = TypeStack::new();
        self.in_reference = false;
        self.loop_depth = 0;
        self.macro_depth = 0;

        self.expression(&mut procedure.body, None)?;
        if procedure.has_implicit_return() {
            self.check_returns(&procedure.end_location)?;
        }
        Ok(())
    }

    /// Expands `run` in place unless an earlier pass already did.
    fn expand_macro(&self, run: &mut RunMacro, kind: MacroSyntaxKind, location: &Location) -> SemanticResult<()> {
        if run.result.is_some() {
            return Ok(());
        }
        if self.macro_depth >= MAX_MACRO_DEPTH {
            return err(location, SemanticError::MacroTooDeep(run.name.clone()));
        }
        debug!("Expanding macro {} at {}", run.name, location);
        let expanded = macros::expand_run(self.symbols, run, kind)
            .map_err(|e| CompilerError::new(location.clone(), e))?;
        run.result = Some(Box::new(expanded));
        Ok(())
    }

    /// Makes sure every named type inside `ty` exists and resolves the
    /// `typeof`s and macro invocations it contains.
    fn resolve_type(&mut self, ty: &mut Type, location: &Location) -> SemanticResult<()> {
        match ty {
            Type::Primitive(_) | Type::Enum(_) => Ok(()),
            Type::Named(name) => match self.symbols.lookup_type(name) {
                Some(_) => Ok(()),
                None => err(location, SemanticError::TypeNotDefined(name.clone())),
            },
            Type::Pointer(inner) | Type::Array { element: inner, .. } => {
                self.resolve_type(inner, location)
            }
            Type::Struct(fields) | Type::Union(fields) => {
                for f in fields.iter_mut() {
                    self.resolve_type(&mut f.ty, location)?;
                }
                Ok(())
            }
            Type::Procedure { arguments, returns } => {
                for t in arguments.iter_mut().chain(returns.iter_mut()) {
                    self.resolve_type(t, location)?;
                }
                Ok(())
            }
            Type::TypeOf {
                expression,
                resolved,
            } => {
                if resolved.is_some() {
                    return Ok(());
                }
                let mark = self.stack.len();
                let in_reference = self.take_in_reference();
                self.expression(expression, None)?;
                self.in_reference = in_reference;
                let produced = self.stack.since(mark).to_vec();
                self.stack.truncate(mark);
                match produced.as_slice() {
                    [single] => {
                        *resolved = Some(Box::new(single.clone()));
                        Ok(())
                    }
                    [] => err(location, SemanticError::OutOfValues("typeof".into())),
                    _ => err(location, SemanticError::ExtraValues("typeof".into())),
                }
            }
            Type::RunMacro(run) => {
                self.expand_macro(run, MacroSyntaxKind::Type, location)?;
                let name = run.name.clone();
                match run.result.as_deref_mut() {
                    Some(MacroSyntax::Type(inner)) => {
                        self.macro_depth += 1;
                        let resolved = self.resolve_type(inner, location);
                        self.macro_depth -= 1;
                        resolved
                    }
                    _ => err(
                        location,
                        SemanticError::MacroKind {
                            name,
                            expected: MacroSyntaxKind::Type,
                            found: MacroSyntaxKind::Expression,
                        },
                    ),
                }
            }
        }
    }

    fn statement(&mut self, statement: &mut Statement) -> SemanticResult<()> {
        if !statement.is_enabled() {
            return Ok(());
        }
        let location = statement.location.clone();
        trace_checker!(self, location);

        match &mut statement.kind {
            StatementKind::Expression(e) => {
                self.expression(e, None)?;
                self.stack.expect_empty(&location, "statement")
            }
            StatementKind::Declare {
                declarations,
                value,
            } => self.declare(declarations, value.as_mut(), &location),
            StatementKind::Assign { targets, value } => self.assign(targets, value, &location),
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    let returns = self.returns.clone();
                    self.positional(value, &returns)?;
                }
                self.check_returns(&location)
            }
            StatementKind::While { condition, body } => {
                self.expression(condition, None)?;
                self.pop_bool(&location, "while condition")?;
                self.loop_depth += 1;
                self.expression(body, None)?;
                self.loop_depth -= 1;
                self.stack.expect_empty(&location, "while body")
            }
            StatementKind::Break => {
                if self.loop_depth == 0 {
                    err(&location, SemanticError::BreakOutsideLoop)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Evaluates the value of a declaration, assignment or return. The parts
    /// of a multiple expression each want the type at the running value
    /// index, anything else wants the last type.
    fn positional(&mut self, value: &mut Expression, wanted: &[Type]) -> SemanticResult<()> {
        match &mut value.kind {
            ExpressionKind::Multiple(parts) => {
                let mut index = 0;
                for part in parts.iter_mut() {
                    let start = self.stack.len();
                    self.expression(part, wanted.get(index))?;
                    index += self.stack.len() - start;
                }
                Ok(())
            }
            _ => self.expression(value, wanted.last()),
        }
    }

    fn check_returns(&mut self, location: &Location) -> SemanticResult<()> {
        let returns = self.returns.clone();
        for r in returns.iter().rev() {
            self.pop_matching(r, location, "return")?;
        }
        self.stack.expect_empty(location, "return")
    }

    fn declare(
        &mut self,
        declarations: &mut Vec<Declaration>,
        value: Option<&mut Expression>,
        location: &Location,
    ) -> SemanticResult<()> {
        for d in declarations.iter_mut() {
            let loc = if d.location == Location::default() {
                location.clone()
            } else {
                d.location.clone()
            };
            self.resolve_type(&mut d.ty, &loc)?;
            self.size_of(&d.ty, &loc)?;
        }

        if let Some(value) = value {
            let wanted: Vec<Type> = declarations.iter().map(|d| d.ty.clone()).collect();
            self.positional(value, &wanted)?;
            for d in declarations.iter().rev() {
                self.pop_matching(&d.ty, location, "declaration assignment")
                    .map_err(|e| match e.inner() {
                        SemanticError::Mismatch {
                            expected, found, ..
                        } => CompilerError::new(
                            location.clone(),
                            SemanticError::Mismatch {
                                context: format!("declaration of {}", d.name),
                                expected,
                                found,
                            },
                        ),
                        other => CompilerError::new(location.clone(), other),
                    })?;
            }
        }

        for d in declarations.iter().rev() {
            self.scope.declare(d.clone());
        }
        self.stack.expect_empty(location, "declare statement")
    }

    fn assign(
        &mut self,
        targets: &mut Vec<Expression>,
        value: &mut Expression,
        location: &Location,
    ) -> SemanticResult<()> {
        let mut wanted = vec![];
        for target in targets.iter_mut() {
            wanted.push(self.target_type(target)?);
        }

        self.positional(value, &wanted)?;
        for ty in wanted.iter().rev() {
            self.pop_matching(ty, location, "assignment")?;
        }
        self.stack.expect_empty(location, "assign statement")
    }

    /// The type a value stored into `target` must have. The sub expressions
    /// of field and index targets are checked here.
    fn target_type(&mut self, target: &mut Expression) -> SemanticResult<Type> {
        let location = target.location.clone();
        let ty = match &mut target.kind {
            ExpressionKind::Identifier(name) => {
                match self.symbols.resolve(name, &self.scope, &self.arguments) {
                    Resolved::Local(d) | Resolved::Argument(d) => d.ty.clone(),
                    Resolved::Item(ItemSymbol::Global(ty)) => ty.clone(),
                    Resolved::Item(_) => return err(&location, SemanticError::NotAssignable),
                    Resolved::Unresolved => {
                        return err(&location, SemanticError::NotDefined(name.clone()))
                    }
                }
            }
            ExpressionKind::Field {
                parent,
                name,
                parent_ty,
                needs_reference,
            } => self.field_access(parent, name, parent_ty, needs_reference, &location)?,
            ExpressionKind::Index {
                array,
                index,
                array_ty,
            } => self.index_access(array, index, array_ty, &location)?,
            _ => return err(&location, SemanticError::NotAssignable),
        };
        if target.ty.is_none() {
            target.ty = Some(ty.clone());
        }
        Ok(ty)
    }

    /// Checks the parent of a field access and returns the field's type.
    fn field_access(
        &mut self,
        parent: &mut Expression,
        name: &str,
        parent_ty: &mut Option<Type>,
        needs_reference: &mut bool,
        location: &Location,
    ) -> SemanticResult<Type> {
        self.expression(parent, None)?;
        let base = self.stack.pop(location, "field access")?;
        let (aggregate, through_pointer) = match self.resolve(&base, location)? {
            Type::Pointer(pointee) => (*pointee, true),
            _ => (base.clone(), false),
        };
        if !through_pointer && !parent.is_addressable() {
            return err(location, SemanticError::NotAddressable);
        }

        let ty = match self.layout.field_type(&aggregate, name) {
            Ok(ty) => ty,
            Err(LayoutError::UnknownField(ty, name)) => {
                return err(location, SemanticError::UnknownField(ty, name))
            }
            Err(LayoutError::NotAnAggregate(ty)) => {
                return err(location, SemanticError::NotAnAggregate(ty))
            }
            Err(e) => return err(location, e.into()),
        };

        if parent_ty.is_none() {
            *parent_ty = Some(base);
        }
        *needs_reference = !through_pointer;
        Ok(ty)
    }

    /// Checks the array and index of an index expression and returns the
    /// element type.
    fn index_access(
        &mut self,
        array: &mut Expression,
        index: &mut Expression,
        array_ty: &mut Option<Type>,
        location: &Location,
    ) -> SemanticResult<Type> {
        self.expression(array, None)?;
        let base = self.stack.pop(location, "index")?;
        let through_pointer = matches!(self.resolve(&base, location)?, Type::Pointer(_));
        let element = match self.layout.element_of(&base) {
            Ok(element) => element,
            Err(_) => return err(location, SemanticError::NotAnArray(base)),
        };
        if !through_pointer && !array.is_addressable() {
            return err(location, SemanticError::NotAddressable);
        }

        self.expression(index, Some(&Type::UINT))?;
        self.pop_matching(&Type::UINT, location, "array index")?;

        if array_ty.is_none() {
            *array_ty = Some(base);
        }
        Ok(element)
    }

    /// Checks an expression, leaving the types of the values it produces on
    /// the stack. Expressions producing exactly one value are annotated with
    /// its type.
    fn expression(&mut self, expression: &mut Expression, wanted: Option<&Type>) -> SemanticResult<()> {
        let location = expression.location.clone();
        let start = self.stack.len();
        trace_checker!(self, location);

        match &mut expression.kind {
            ExpressionKind::Block(statements) => {
                self.scope.enter_block();
                for s in statements.iter_mut() {
                    self.statement(s)?;
                }
                self.scope.leave_block();
            }
            ExpressionKind::Number(NumberValue::Decimal(_)) if wanted.is_none() => {
                self.stack.push(Type::Primitive(Primitive::F64))
            }
            ExpressionKind::Number(_) => {
                let ty = self.numeric_or_uint(wanted);
                self.stack.push(ty)
            }
            ExpressionKind::Str(_) => self.stack.push(Type::string()),
            ExpressionKind::Char(_) => self.stack.push(Type::BYTE),
            ExpressionKind::Boolean(_) => self.stack.push(Type::BOOL),
            ExpressionKind::Null => {
                let ty = match wanted {
                    Some(w) if self.resolve(w, &location).map(|r| r.is_pointer()).unwrap_or(false) => {
                        w.clone()
                    }
                    _ => Type::UINT,
                };
                self.stack.push(ty)
            }
            ExpressionKind::Identifier(name) => self.identifier(name, wanted, &location)?,
            ExpressionKind::Field {
                parent,
                name,
                parent_ty,
                needs_reference,
            } => {
                let in_reference = self.take_in_reference();
                let ty = self.field_access(parent, name, parent_ty, needs_reference, &location)?;
                self.push_retrieved(ty, in_reference);
            }
            ExpressionKind::Index {
                array,
                index,
                array_ty,
            } => {
                let in_reference = self.take_in_reference();
                let ty = self.index_access(array, index, array_ty, &location)?;
                self.push_retrieved(ty, in_reference);
            }
            ExpressionKind::Call {
                callee,
                arguments,
                procedure_ty,
            } => self.call(callee, arguments, procedure_ty, &location)?,
            ExpressionKind::Binary {
                operator,
                left,
                right,
                operand_ty,
            } => self.binary(*operator, left, right, operand_ty, wanted, &location)?,
            ExpressionKind::Not(operand) => {
                self.expression(operand, None)?;
                self.pop_bool(&location, "not")?;
                self.stack.push(Type::BOOL);
            }
            ExpressionKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.expression(condition, None)?;
                self.pop_bool(&location, "if condition")?;

                let before = self.stack.len();
                self.expression(then, wanted)?;
                let middle = self.stack.len();
                match otherwise {
                    None => {
                        if middle != before {
                            return err(&location, SemanticError::IfWithoutElseProducesValues);
                        }
                    }
                    Some(otherwise) => {
                        self.expression(otherwise, wanted)?;
                        let then_types = self.stack.since(before)[..middle - before].to_vec();
                        let else_types = self.stack.since(middle).to_vec();
                        let same = then_types.len() == else_types.len()
                            && then_types
                                .iter()
                                .zip(else_types.iter())
                                .all(|(a, b)| a.matches(b));
                        if !same {
                            return err(
                                &location,
                                SemanticError::IfArmsMismatch(then_types, else_types),
                            );
                        }
                        self.stack.truncate(middle);
                    }
                }
            }
            ExpressionKind::Multiple(parts) => {
                for part in parts.iter_mut() {
                    self.expression(part, None)?;
                }
            }
            ExpressionKind::Reference(operand) => {
                if !operand.is_addressable() {
                    return err(&location, SemanticError::NotAddressable);
                }
                self.in_reference = true;
                self.expression(operand, None)?;
                self.in_reference = false;
            }
            ExpressionKind::Cast {
                target,
                operand,
                input_ty,
            } => {
                self.resolve_type(target, &location)?;
                self.expression(operand, None)?;
                let input = self.stack.pop(&location, "cast")?;
                if !self.can_cast(&input, target, &location)? {
                    return err(&location, SemanticError::InvalidCast(input, target.clone()));
                }
                if input_ty.is_none() {
                    *input_ty = Some(input);
                }
                self.stack.push(target.clone());
            }
            ExpressionKind::Init(ty) => {
                self.resolve_type(ty, &location)?;
                self.size_of(ty, &location)?;
                self.stack.push(ty.clone());
            }
            ExpressionKind::Build { target, arguments } => {
                self.resolve_type(target, &location)?;
                self.build(target, arguments, &location)?;
                self.stack.push(target.clone());
            }
            ExpressionKind::SizeOf(ty) => {
                self.resolve_type(ty, &location)?;
                self.size_of(ty, &location)?;
                let result = self.numeric_or_uint(wanted);
                self.stack.push(result);
            }
            ExpressionKind::LengthOf(ty) => {
                self.resolve_type(ty, &location)?;
                self.layout.length_of(ty).at::<SemanticError>(&location)?;
                let result = self.numeric_or_uint(wanted);
                self.stack.push(result);
            }
            ExpressionKind::RunMacro(run) => {
                self.expand_macro(run, MacroSyntaxKind::Expression, &location)?;
                let name = run.name.clone();
                match run.result.as_deref_mut() {
                    Some(MacroSyntax::Expression(expanded)) => {
                        self.macro_depth += 1;
                        let checked = self.expression(expanded, wanted);
                        self.macro_depth -= 1;
                        checked?
                    }
                    _ => {
                        return err(
                            &location,
                            SemanticError::MacroKind {
                                name,
                                expected: MacroSyntaxKind::Expression,
                                found: MacroSyntaxKind::Type,
                            },
                        )
                    }
                }
            }
        }

        if self.stack.len() == start + 1 && expression.ty.is_none() {
            expression.ty = self.stack.peek().cloned();
        }
        Ok(())
    }

    fn identifier(&mut self, name: &str, wanted: Option<&Type>, location: &Location) -> SemanticResult<()> {
        let in_reference = self.take_in_reference();
        match name {
            "@file" | "@line" if in_reference => return err(location, SemanticError::NotAddressable),
            "@file" => {
                self.stack.push(Type::string());
                return Ok(());
            }
            "@line" => {
                self.stack.push(Type::UINT);
                return Ok(());
            }
            _ => (),
        }

        let symbol = match self.symbols.resolve(name, &self.scope, &self.arguments) {
            Resolved::Local(d) | Resolved::Argument(d) => {
                let ty = d.ty.clone();
                self.push_retrieved(ty, in_reference);
                return Ok(());
            }
            Resolved::Item(symbol) => Some(symbol),
            Resolved::Unresolved => None,
        };

        if let Some(w) = wanted {
            if let Ok(Type::Enum(variants)) = self.layout.resolve(w) {
                if variants.iter().any(|v| v == name) {
                    if in_reference {
                        return err(location, SemanticError::NotAddressable);
                    }
                    self.stack.push(w.clone());
                    return Ok(());
                }
            }
        }

        // A global whose enum type has a variant of the same name reads as
        // that variant.
        if let Some(ItemSymbol::Global(ty)) = symbol {
            let own_variant = matches!(
                self.layout.resolve(ty),
                Ok(Type::Enum(variants)) if variants.iter().any(|v| v == name)
            );
            if own_variant {
                if in_reference {
                    return err(location, SemanticError::NotAddressable);
                }
                let ty = ty.clone();
                self.stack.push(ty);
                return Ok(());
            }
        }

        match symbol {
            Some(ItemSymbol::Procedure(signature)) => {
                if in_reference {
                    return err(location, SemanticError::NotAddressable);
                }
                self.stack.push(Type::pointer_to(signature.clone()));
            }
            Some(ItemSymbol::Global(ty)) => {
                let ty = ty.clone();
                self.push_retrieved(ty, in_reference);
            }
            Some(ItemSymbol::Constant(_)) => {
                if in_reference {
                    return err(location, SemanticError::NotAddressable);
                }
                let ty = self.numeric_or_uint(wanted);
                self.stack.push(ty);
            }
            Some(ItemSymbol::Type(_)) | Some(ItemSymbol::Macro(_)) => {
                return err(location, SemanticError::NotAValue(name.into()))
            }
            None => return err(location, SemanticError::NotDefined(name.into())),
        }
        Ok(())
    }

    fn call(
        &mut self,
        callee: &mut Expression,
        arguments: &mut Vec<Expression>,
        procedure_ty: &mut Option<Type>,
        location: &Location,
    ) -> SemanticResult<()> {
        if let ExpressionKind::Identifier(name) = &callee.kind {
            if let Some(count) = syscall_arity(name) {
                for a in arguments.iter_mut() {
                    self.expression(a, Some(&Type::UINT))?;
                }
                for _ in 0..=count {
                    let given = self.stack.pop(location, name)?;
                    if !self.is_register_sized(&given) {
                        return err(location, SemanticError::NotRegisterSized(name.clone(), given));
                    }
                }
                self.stack.push(Type::UINT);
                return Ok(());
            }
        }

        self.expression(callee, None)?;
        let callee_type = self.stack.pop(location, "invocation")?;
        let (parameters, returns) = match self.resolve(&callee_type, location)? {
            Type::Pointer(inner) => match self.resolve(&inner, location)? {
                Type::Procedure { arguments, returns } => (arguments, returns),
                _ => return err(location, SemanticError::NotCallable(callee_type)),
            },
            _ => return err(location, SemanticError::NotCallable(callee_type)),
        };

        let mut index = 0;
        for a in arguments.iter_mut() {
            let start = self.stack.len();
            self.expression(a, parameters.get(index))?;
            index += self.stack.len() - start;
        }
        for p in parameters.iter().rev() {
            self.pop_matching(p, location, "invocation")?;
        }

        if procedure_ty.is_none() {
            *procedure_ty = Some(Type::Procedure {
                arguments: parameters,
                returns: returns.clone(),
            });
        }
        for r in returns {
            self.stack.push(r);
        }
        Ok(())
    }

    fn binary(
        &mut self,
        operator: BinaryOperator,
        left: &mut Expression,
        right: &mut Expression,
        operand_ty: &mut Option<Type>,
        wanted: Option<&Type>,
        location: &Location,
    ) -> SemanticResult<()> {
        if operator.is_logical() {
            self.expression(left, None)?;
            self.pop_bool(location, "logical operator")?;
            self.expression(right, None)?;
            self.pop_bool(location, "logical operator")?;
            if operand_ty.is_none() {
                *operand_ty = Some(Type::BOOL);
            }
            self.stack.push(Type::BOOL);
            return Ok(());
        }

        let wanted = if operator.is_arithmetic() { wanted } else { None };
        let reversed = left.is_literal_like() && !right.is_literal_like();
        let (first, second) = if reversed { (right, left) } else { (left, right) };

        self.expression(first, wanted)?;
        let first_type = match self.stack.peek() {
            Some(ty) => ty.clone(),
            None => return err(location, SemanticError::OutOfValues(format!("operator {}", operator))),
        };
        self.expression(second, Some(&first_type))?;

        let top = self.stack.pop(location, &format!("operator {}", operator))?;
        let below = self.stack.pop(location, &format!("operator {}", operator))?;
        let (left_type, right_type) = if reversed { (top, below) } else { (below, top) };

        let pointer_offset = matches!(left_type, Type::Primitive(Primitive::Ptr))
            && matches!(right_type, Type::Primitive(Primitive::UInt));
        let same = left_type.matches(&right_type);
        let valid = if operator.is_arithmetic() {
            pointer_offset || (same && self.is_numeric(&left_type))
        } else {
            let scalar = matches!(
                self.layout.resolve(&left_type),
                Ok(Type::Primitive(_)) | Ok(Type::Pointer(_)) | Ok(Type::Enum(_))
            );
            same && scalar
        };
        if !valid {
            return err(location, SemanticError::InvalidOperands(operator, left_type, right_type));
        }

        if operand_ty.is_none() {
            *operand_ty = Some(left_type.clone());
        }
        if operator.is_arithmetic() {
            self.stack.push(left_type);
        } else {
            self.stack.push(Type::BOOL);
        }
        Ok(())
    }

    fn can_cast(&self, input: &Type, target: &Type, location: &Location) -> SemanticResult<bool> {
        let from = self.resolve(input, location)?;
        let to = self.resolve(target, location)?;
        Ok(match (&from, &to) {
            (Type::Primitive(a), Type::Primitive(b)) if a.is_unsigned() && b.is_unsigned() => true,
            (Type::Primitive(Primitive::F64), Type::Primitive(Primitive::U64)) => true,
            (Type::Primitive(Primitive::Ptr), Type::Pointer(_)) => true,
            (Type::Pointer(_), Type::Primitive(Primitive::Ptr)) => true,
            (Type::Primitive(Primitive::Byte), Type::Primitive(Primitive::U8)) => true,
            (Type::Primitive(Primitive::U8), Type::Primitive(Primitive::Byte)) => true,
            _ => false,
        })
    }

    fn build(&mut self, target: &Type, arguments: &mut Vec<Expression>, location: &Location) -> SemanticResult<()> {
        let element_types: Vec<Type> = match self.resolve(target, location)? {
            Type::Struct(fields) => fields.into_iter().map(|f| f.ty).collect(),
            Type::Array {
                element,
                length: Some(n),
            } => (0..n).map(|_| (*element).clone()).collect(),
            _ => return err(location, SemanticError::CannotBuild(target.clone())),
        };
        if element_types.len() != arguments.len() {
            return err(
                location,
                SemanticError::BuildArity(target.clone(), element_types.len(), arguments.len()),
            );
        }

        for (a, ty) in arguments.iter_mut().zip(element_types.iter()) {
            let arg_location = a.location.clone();
            self.expression(a, Some(ty))?;
            self.pop_matching(ty, &arg_location, "build")?;
        }
        Ok(())
    }
}
