use super::{Declaration, Expression, ExpressionKind, Statement, StatementKind};

/// Visits every local declaration in `body` in the order the code generators
/// bind them: nested expressions in evaluation order, and the names of a
/// single declare statement right to left. Statements disabled by a directive
/// are skipped.
pub fn for_each_local<'a>(body: &'a Expression, visit: &mut dyn FnMut(&'a Declaration)) {
    walk_expression(body, visit)
}

fn walk_statement<'a>(statement: &'a Statement, visit: &mut dyn FnMut(&'a Declaration)) {
    if !statement.is_enabled() {
        return;
    }

    match &statement.kind {
        StatementKind::Expression(e) => walk_expression(e, visit),
        StatementKind::Declare {
            declarations,
            value,
        } => {
            if let Some(value) = value {
                walk_expression(value, visit);
            }
            for d in declarations.iter().rev() {
                visit(d);
            }
        }
        StatementKind::Assign { targets, value } => {
            walk_expression(value, visit);
            for t in targets.iter().rev() {
                walk_expression(t, visit);
            }
        }
        StatementKind::Return(Some(e)) => walk_expression(e, visit),
        StatementKind::Return(None) | StatementKind::Break => (),
        StatementKind::While { condition, body } => {
            walk_expression(condition, visit);
            walk_expression(body, visit);
        }
    }
}

fn walk_expression<'a>(expression: &'a Expression, visit: &mut dyn FnMut(&'a Declaration)) {
    match &expression.kind {
        ExpressionKind::Block(statements) => {
            for s in statements {
                walk_statement(s, visit);
            }
        }
        ExpressionKind::Call {
            callee, arguments, ..
        } => {
            for a in arguments {
                walk_expression(a, visit);
            }
            walk_expression(callee, visit);
        }
        ExpressionKind::Binary { left, right, .. } => {
            walk_expression(left, visit);
            walk_expression(right, visit);
        }
        ExpressionKind::Index { array, index, .. } => {
            walk_expression(array, visit);
            walk_expression(index, visit);
        }
        ExpressionKind::If {
            condition,
            then,
            otherwise,
        } => {
            walk_expression(condition, visit);
            walk_expression(then, visit);
            if let Some(otherwise) = otherwise {
                walk_expression(otherwise, visit);
            }
        }
        ExpressionKind::Multiple(parts) | ExpressionKind::Build { arguments: parts, .. } => {
            for p in parts {
                walk_expression(p, visit);
            }
        }
        ExpressionKind::Field { parent: inner, .. }
        | ExpressionKind::Not(inner)
        | ExpressionKind::Reference(inner)
        | ExpressionKind::Cast { operand: inner, .. } => walk_expression(inner, visit),
        ExpressionKind::RunMacro(run) => {
            if let Some(expanded) = run.expanded_expression() {
                walk_expression(expanded, visit)
            }
        }
        ExpressionKind::Number(_)
        | ExpressionKind::Str(_)
        | ExpressionKind::Char(_)
        | ExpressionKind::Boolean(_)
        | ExpressionKind::Null
        | ExpressionKind::Identifier(_)
        | ExpressionKind::Init(_)
        | ExpressionKind::SizeOf(_)
        | ExpressionKind::LengthOf(_) => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;
    use crate::compiler::ast::MacroSyntax;

    #[test]
    fn visits_nested_declarations_in_binding_order() {
        let body = block(vec![
            declare(vec![("a", u64_ty()), ("b", u8_ty())], None),
            while_loop(
                boolean(true),
                block(vec![declare(vec![("c", u16_ty())], None)]),
            ),
            disabled(declare(vec![("d", u64_ty())], None)),
        ]);

        let mut names = vec![];
        for_each_local(&body, &mut |d| names.push(d.name.clone()));
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn visits_declarations_inside_macro_expansions() {
        let mut invocation = run_macro("scoped", vec![]);
        if let ExpressionKind::RunMacro(run) = &mut invocation.kind {
            run.result = Some(Box::new(MacroSyntax::Expression(Box::new(block(vec![
                declare(vec![("inner", u64_ty())], None),
            ])))));
        }
        let body = block(vec![
            declare(vec![("outer", u8_ty())], None),
            expr_stmt(invocation),
        ]);

        let mut names = vec![];
        for_each_local(&body, &mut |d| names.push(d.name.clone()));
        assert_eq!(names, vec!["outer", "inner"]);
    }
}
