/*!
Macro expansion. An invocation picks the first variant of the macro that can
bind its arguments, copies that variant's body, and replaces every use of a
binding with the syntax the invocation passed for it.

A binding is used by naming it: as an identifier where an expression is
expected, or as a named type where a type is expected. The last binding of a
varargs variant holds every remaining argument. Naming it as an argument of a
nested invocation passes all of them on, and naming it as an expression
produces them all in order.
*/

use crate::compiler::ast::{
    Declaration, Directive, DirectiveCondition, Expression, ExpressionKind, Macro, MacroSyntax,
    MacroSyntaxKind, RunMacro, Statement, StatementKind, Type,
};

use super::{SemanticError, SymbolTable};

/// How many macro expansions may nest inside one another.
pub const MAX_MACRO_DEPTH: usize = 64;

type ExpandResult<T> = std::result::Result<T, SemanticError>;

/// Expands `run` with the macro of that name in `symbols`.
pub fn expand_run(
    symbols: &SymbolTable,
    run: &RunMacro,
    wanted: MacroSyntaxKind,
) -> ExpandResult<MacroSyntax> {
    expand(symbols.lookup_macro(&run.name)?, run, wanted)
}

/// Produces the syntax `definition` expands to when invoked as `run` in a
/// position wanting `wanted`. Macros nested in the result are left for the
/// caller to expand.
pub fn expand(definition: &Macro, run: &RunMacro, wanted: MacroSyntaxKind) -> ExpandResult<MacroSyntax> {
    if definition.returns != wanted {
        return Err(SemanticError::MacroKind {
            name: definition.name.clone(),
            expected: wanted,
            found: definition.returns,
        });
    }
    check_arguments(definition, run)?;

    let count = run.arguments.len();
    let variant = definition
        .variants
        .iter()
        .find(|v| v.accepts(count))
        .ok_or_else(|| SemanticError::MacroArity(definition.name.clone(), count))?;
    if variant.body.kind() != wanted {
        return Err(SemanticError::MacroKind {
            name: definition.name.clone(),
            expected: wanted,
            found: variant.body.kind(),
        });
    }

    let substitution = Substitution {
        bindings: &variant.bindings,
        varargs: variant.varargs,
        values: &run.arguments,
    };
    let mut result = variant.body.clone();
    substitution.syntax(&mut result)?;
    Ok(result)
}

/// Matches the given arguments against the declared ones. A `multiple`
/// declaration takes every argument after it.
fn check_arguments(definition: &Macro, run: &RunMacro) -> ExpandResult<()> {
    let mut declared = 0;
    for (index, given) in run.arguments.iter().enumerate() {
        let argument = definition
            .arguments
            .get(declared)
            .ok_or_else(|| SemanticError::MacroArity(definition.name.clone(), run.arguments.len()))?;
        if argument.kind != given.kind() {
            return Err(SemanticError::MacroArgumentKind {
                name: definition.name.clone(),
                index,
                expected: argument.kind,
                found: given.kind(),
            });
        }
        if !argument.multiple {
            declared += 1;
        }
    }
    Ok(())
}

/// Expands every macro invocation inside an item level type, innermost
/// results included. These are expanded before the symbol table exists, so
/// only `macros` can be consulted.
pub fn expand_types(ty: &mut Type, macros: &SymbolTable, depth: usize) -> ExpandResult<()> {
    match ty {
        Type::RunMacro(run) => {
            if depth >= MAX_MACRO_DEPTH {
                return Err(SemanticError::MacroTooDeep(run.name.clone()));
            }
            if run.result.is_none() {
                let expanded = expand_run(macros, run, MacroSyntaxKind::Type)?;
                run.result = Some(Box::new(expanded));
            }
            match run.result.as_deref_mut() {
                Some(MacroSyntax::Type(inner)) => expand_types(inner, macros, depth + 1),
                _ => Ok(()),
            }
        }
        Type::Pointer(inner) | Type::Array { element: inner, .. } => {
            expand_types(inner, macros, depth)
        }
        Type::Struct(fields) | Type::Union(fields) => {
            for f in fields.iter_mut() {
                expand_types(&mut f.ty, macros, depth)?;
            }
            Ok(())
        }
        Type::Procedure { arguments, returns } => {
            for t in arguments.iter_mut().chain(returns.iter_mut()) {
                expand_types(t, macros, depth)?;
            }
            Ok(())
        }
        Type::Primitive(_) | Type::Named(_) | Type::Enum(_) | Type::TypeOf { .. } => Ok(()),
    }
}

/// The values bound by one variant for one invocation.
struct Substitution<'a> {
    bindings: &'a [String],
    varargs: bool,
    values: &'a [MacroSyntax],
}

impl<'a> Substitution<'a> {
    /// The values bound to `name`: one, or all the remaining ones for the
    /// varargs binding.
    fn values_of(&self, name: &str) -> Option<&'a [MacroSyntax]> {
        let position = self.bindings.iter().position(|b| b == name)?;
        if self.varargs && position + 1 == self.bindings.len() {
            Some(&self.values[position..])
        } else {
            self.values.get(position..position + 1)
        }
    }

    fn syntax(&self, syntax: &mut MacroSyntax) -> ExpandResult<()> {
        match syntax {
            MacroSyntax::Expression(e) => self.expression(e),
            MacroSyntax::Type(ty) => self.ty(ty),
        }
    }

    fn bound_expression(&self, name: &str, at: &Expression) -> ExpandResult<Option<Expression>> {
        let values = match self.values_of(name) {
            Some(values) => values,
            None => return Ok(None),
        };
        let mut parts = vec![];
        for value in values {
            match value {
                MacroSyntax::Expression(e) => parts.push((**e).clone()),
                MacroSyntax::Type(_) => {
                    return Err(SemanticError::MisplacedMacroBinding(
                        name.into(),
                        MacroSyntaxKind::Expression,
                    ))
                }
            }
        }
        if parts.len() == 1 {
            Ok(parts.pop())
        } else {
            Ok(Some(Expression::new(
                ExpressionKind::Multiple(parts),
                at.location.clone(),
            )))
        }
    }

    fn expression(&self, expression: &mut Expression) -> ExpandResult<()> {
        if let ExpressionKind::Identifier(name) = &expression.kind {
            if let Some(value) = self.bound_expression(name, expression)? {
                *expression = value;
            }
            return Ok(());
        }

        match &mut expression.kind {
            ExpressionKind::Block(statements) => {
                for s in statements.iter_mut() {
                    self.statement(s)?;
                }
            }
            ExpressionKind::Field { parent: inner, .. }
            | ExpressionKind::Not(inner)
            | ExpressionKind::Reference(inner) => self.expression(inner)?,
            ExpressionKind::Index { array, index, .. } => {
                self.expression(array)?;
                self.expression(index)?;
            }
            ExpressionKind::Call {
                callee, arguments, ..
            } => {
                self.expression(callee)?;
                for a in arguments.iter_mut() {
                    self.expression(a)?;
                }
            }
            ExpressionKind::Binary { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)?;
            }
            ExpressionKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.expression(condition)?;
                self.expression(then)?;
                if let Some(otherwise) = otherwise {
                    self.expression(otherwise)?;
                }
            }
            ExpressionKind::Multiple(parts) => {
                for p in parts.iter_mut() {
                    self.expression(p)?;
                }
            }
            ExpressionKind::Cast {
                target, operand, ..
            } => {
                self.ty(target)?;
                self.expression(operand)?;
            }
            ExpressionKind::Build { target, arguments } => {
                self.ty(target)?;
                for a in arguments.iter_mut() {
                    self.expression(a)?;
                }
            }
            ExpressionKind::Init(ty) | ExpressionKind::SizeOf(ty) | ExpressionKind::LengthOf(ty) => {
                self.ty(ty)?
            }
            ExpressionKind::RunMacro(run) => self.run_macro(run)?,
            ExpressionKind::Number(_)
            | ExpressionKind::Str(_)
            | ExpressionKind::Char(_)
            | ExpressionKind::Boolean(_)
            | ExpressionKind::Null
            | ExpressionKind::Identifier(_) => (),
        }
        Ok(())
    }

    fn statement(&self, statement: &mut Statement) -> ExpandResult<()> {
        for directive in statement.directives.iter_mut() {
            match directive {
                Directive::If(condition) => self.condition(condition)?,
            }
        }
        match &mut statement.kind {
            StatementKind::Expression(e) | StatementKind::Return(Some(e)) => self.expression(e),
            StatementKind::Declare {
                declarations,
                value,
            } => {
                self.declarations(declarations)?;
                match value {
                    Some(value) => self.expression(value),
                    None => Ok(()),
                }
            }
            StatementKind::Assign { targets, value } => {
                for t in targets.iter_mut() {
                    self.expression(t)?;
                }
                self.expression(value)
            }
            StatementKind::While { condition, body } => {
                self.expression(condition)?;
                self.expression(body)
            }
            StatementKind::Return(None) | StatementKind::Break => Ok(()),
        }
    }

    fn condition(&self, condition: &mut DirectiveCondition) -> ExpandResult<()> {
        match condition {
            DirectiveCondition::IsType { wanted, given } => {
                self.ty(wanted)?;
                self.ty(given)
            }
            DirectiveCondition::Not(inner) => self.condition(inner),
            DirectiveCondition::Boolean(_) | DirectiveCondition::Os { .. } => Ok(()),
        }
    }

    fn declarations(&self, declarations: &mut [Declaration]) -> ExpandResult<()> {
        for d in declarations.iter_mut() {
            self.ty(&mut d.ty)?;
        }
        Ok(())
    }

    fn ty(&self, ty: &mut Type) -> ExpandResult<()> {
        match ty {
            Type::Named(name) => match self.values_of(name) {
                Some([MacroSyntax::Type(value)]) => *ty = value.clone(),
                Some(_) => {
                    return Err(SemanticError::MisplacedMacroBinding(
                        name.clone(),
                        MacroSyntaxKind::Type,
                    ))
                }
                None => (),
            },
            Type::Pointer(inner) | Type::Array { element: inner, .. } => self.ty(inner)?,
            Type::Struct(fields) | Type::Union(fields) => self.declarations(fields)?,
            Type::Procedure { arguments, returns } => {
                for t in arguments.iter_mut().chain(returns.iter_mut()) {
                    self.ty(t)?;
                }
            }
            Type::TypeOf { expression, .. } => self.expression(expression)?,
            Type::RunMacro(run) => self.run_macro(run)?,
            Type::Primitive(_) | Type::Enum(_) => (),
        }
        Ok(())
    }

    /// Substitutes inside the arguments of a nested invocation. An argument
    /// naming the varargs binding is replaced by all of its values.
    fn run_macro(&self, run: &mut RunMacro) -> ExpandResult<()> {
        let mut arguments = Vec::with_capacity(run.arguments.len());
        for mut argument in run.arguments.drain(..) {
            let named = match &argument {
                MacroSyntax::Expression(e) => match &e.kind {
                    ExpressionKind::Identifier(name) => Some(name.clone()),
                    _ => None,
                },
                MacroSyntax::Type(Type::Named(name)) => Some(name.clone()),
                MacroSyntax::Type(_) => None,
            };
            match named.as_deref().and_then(|n| self.values_of(n)) {
                Some(values) => arguments.extend(values.iter().cloned()),
                None => {
                    self.syntax(&mut argument)?;
                    arguments.push(argument);
                }
            }
        }
        run.arguments = arguments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;
    use crate::compiler::ast::{Item, ItemKind, MacroArgument};

    fn definition(item: Item) -> Macro {
        match item.kind {
            ItemKind::Macro(m) => m,
            _ => panic!("not a macro"),
        }
    }

    fn invocation(name: &str, arguments: Vec<MacroSyntax>) -> RunMacro {
        RunMacro::new(name, arguments)
    }

    fn expression_args(count: usize) -> Vec<MacroArgument> {
        vec![macro_argument(MacroSyntaxKind::Expression, false); count]
    }

    fn sum() -> Macro {
        definition(macro_def(
            "sum",
            vec![macro_argument(MacroSyntaxKind::Expression, true)],
            MacroSyntaxKind::Expression,
            vec![
                macro_variant(vec!["x"], false, expression_syntax(ident("x"))),
                macro_variant(
                    vec!["x", "rest"],
                    true,
                    expression_syntax(add(
                        ident("x"),
                        run_macro("sum", vec![expression_syntax(ident("rest"))]),
                    )),
                ),
            ],
        ))
    }

    #[test]
    fn first_matching_variant_is_substituted() {
        let m = sum();
        assert_eq!(
            expand(&m, &invocation("sum", vec![expression_syntax(num(4))]), MacroSyntaxKind::Expression),
            Ok(expression_syntax(num(4)))
        );
    }

    #[test]
    fn varargs_binding_is_spliced_into_nested_invocations() {
        let m = sum();
        let run = invocation(
            "sum",
            vec![
                expression_syntax(num(1)),
                expression_syntax(num(2)),
                expression_syntax(num(3)),
            ],
        );
        let expected = add(
            num(1),
            run_macro(
                "sum",
                vec![expression_syntax(num(2)), expression_syntax(num(3))],
            ),
        );
        assert_eq!(
            expand(&m, &run, MacroSyntaxKind::Expression),
            Ok(expression_syntax(expected))
        );
    }

    #[test]
    fn bare_varargs_binding_produces_every_value() {
        let m = definition(macro_def(
            "all",
            vec![macro_argument(MacroSyntaxKind::Expression, true)],
            MacroSyntaxKind::Expression,
            vec![macro_variant(vec!["xs"], true, expression_syntax(ident("xs")))],
        ));
        let run = invocation("all", vec![expression_syntax(num(1)), expression_syntax(num(2))]);
        match expand(&m, &run, MacroSyntaxKind::Expression) {
            Ok(MacroSyntax::Expression(e)) => {
                assert_eq!(e.kind, ExpressionKind::Multiple(vec![num(1), num(2)]))
            }
            other => panic!("unexpected expansion {:?}", other),
        }
    }

    #[test]
    fn type_bindings_replace_named_types() {
        let m = definition(macro_def(
            "pair",
            vec![macro_argument(MacroSyntaxKind::Type, false)],
            MacroSyntaxKind::Type,
            vec![macro_variant(
                vec!["T"],
                false,
                type_syntax(structure(vec![("a", named("T")), ("b", pointer(named("T")))])),
            )],
        ));
        let run = invocation("pair", vec![type_syntax(u16_ty())]);
        assert_eq!(
            expand(&m, &run, MacroSyntaxKind::Type),
            Ok(type_syntax(structure(vec![("a", u16_ty()), ("b", pointer(u16_ty()))])))
        );
    }

    #[test]
    fn substitution_reaches_statements_and_types_in_a_body() {
        let m = definition(macro_def(
            "zeroed",
            vec![
                macro_argument(MacroSyntaxKind::Type, false),
                macro_argument(MacroSyntaxKind::Expression, false),
            ],
            MacroSyntaxKind::Expression,
            vec![macro_variant(
                vec!["T", "v"],
                false,
                expression_syntax(block(vec![
                    declare(vec![("tmp", named("T"))], Some(ident("v"))),
                    expr_stmt(size_of(named("T"))),
                ])),
            )],
        ));
        let run = invocation("zeroed", vec![type_syntax(u8_ty()), expression_syntax(num(9))]);
        assert_eq!(
            expand(&m, &run, MacroSyntaxKind::Expression),
            Ok(expression_syntax(block(vec![
                declare(vec![("tmp", u8_ty())], Some(num(9))),
                expr_stmt(size_of(u8_ty())),
            ])))
        );
    }

    #[test]
    fn invalid_invocations() {
        let m = sum();
        let fixed = definition(macro_def(
            "two",
            expression_args(2),
            MacroSyntaxKind::Expression,
            vec![macro_variant(vec!["a", "b"], false, expression_syntax(add(ident("a"), ident("b"))))],
        ));
        let mixed = definition(macro_def(
            "mixed",
            vec![
                macro_argument(MacroSyntaxKind::Type, false),
                macro_argument(MacroSyntaxKind::Expression, false),
            ],
            MacroSyntaxKind::Expression,
            vec![macro_variant(vec!["T", "v"], false, expression_syntax(ident("T")))],
        ));

        for (definition, run, wanted, expected) in vec![
            (
                &m,
                invocation("sum", vec![]),
                MacroSyntaxKind::Expression,
                SemanticError::MacroArity("sum".into(), 0),
            ),
            (
                &m,
                invocation("sum", vec![expression_syntax(num(1))]),
                MacroSyntaxKind::Type,
                SemanticError::MacroKind {
                    name: "sum".into(),
                    expected: MacroSyntaxKind::Type,
                    found: MacroSyntaxKind::Expression,
                },
            ),
            (
                &m,
                invocation("sum", vec![expression_syntax(num(1)), type_syntax(u8_ty())]),
                MacroSyntaxKind::Expression,
                SemanticError::MacroArgumentKind {
                    name: "sum".into(),
                    index: 1,
                    expected: MacroSyntaxKind::Expression,
                    found: MacroSyntaxKind::Type,
                },
            ),
            (
                &fixed,
                invocation(
                    "two",
                    vec![
                        expression_syntax(num(1)),
                        expression_syntax(num(2)),
                        expression_syntax(num(3)),
                    ],
                ),
                MacroSyntaxKind::Expression,
                SemanticError::MacroArity("two".into(), 3),
            ),
            (
                &fixed,
                invocation("two", vec![expression_syntax(num(1))]),
                MacroSyntaxKind::Expression,
                SemanticError::MacroArity("two".into(), 1),
            ),
            (
                &mixed,
                invocation("mixed", vec![type_syntax(u8_ty()), expression_syntax(num(1))]),
                MacroSyntaxKind::Expression,
                SemanticError::MisplacedMacroBinding("T".into(), MacroSyntaxKind::Expression),
            ),
        ] {
            assert_eq!(expand(definition, &run, wanted), Err(expected));
        }
    }

    #[test]
    fn item_types_expand_nested_invocations() {
        let macros = SymbolTable::macros_of(&program(vec![
            macro_def(
                "ptr",
                vec![macro_argument(MacroSyntaxKind::Type, false)],
                MacroSyntaxKind::Type,
                vec![macro_variant(vec!["T"], false, type_syntax(pointer(named("T"))))],
            ),
            macro_def(
                "ptrptr",
                vec![macro_argument(MacroSyntaxKind::Type, false)],
                MacroSyntaxKind::Type,
                vec![macro_variant(
                    vec!["T"],
                    false,
                    type_syntax(run_macro_type("ptr", vec![type_syntax(pointer(named("T")))])),
                )],
            ),
            macro_def(
                "forever",
                vec![],
                MacroSyntaxKind::Type,
                vec![macro_variant(vec![], false, type_syntax(run_macro_type("forever", vec![])))],
            ),
        ]))
        .unwrap();

        let mut ty = array(run_macro_type("ptrptr", vec![type_syntax(u8_ty())]), Some(2));
        assert_eq!(expand_types(&mut ty, &macros, 0), Ok(()));
        assert_eq!(ty.strip_type_of().to_string(), "[2]**u8");
        if let Type::Array { element, .. } = &ty {
            assert_eq!(element.strip_type_of(), &pointer(pointer(u8_ty())));
        }

        let mut endless = run_macro_type("forever", vec![]);
        assert_eq!(
            expand_types(&mut endless, &macros, 0),
            Err(SemanticError::MacroTooDeep("forever".into()))
        );

        let mut missing = run_macro_type("nope", vec![]);
        assert_eq!(
            expand_types(&mut missing, &macros, 0),
            Err(SemanticError::NotDefined("nope".into()))
        );
    }
}
