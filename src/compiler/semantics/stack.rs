use crate::compiler::{ast::Type, source::Location, CompilerError};

use super::{SemanticError, SemanticResult};

/// The types of the values an expression leaves behind, mirroring what the
/// generated code keeps on the machine stack.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeStack {
    types: Vec<Type>,
}

impl TypeStack {
    pub fn new() -> TypeStack {
        TypeStack::default()
    }

    pub fn push(&mut self, ty: Type) {
        self.types.push(ty)
    }

    /// Pops the top type. An empty stack means the surrounding construct
    /// received fewer values than it needs.
    pub fn pop(&mut self, location: &Location, context: &str) -> SemanticResult<Type> {
        self.types.pop().ok_or_else(|| {
            CompilerError::new(location.clone(), SemanticError::OutOfValues(context.into()))
        })
    }

    pub fn peek(&self) -> Option<&Type> {
        self.types.last()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types pushed since the stack had `len` entries.
    pub fn since(&self, len: usize) -> &[Type] {
        &self.types[len.min(self.types.len())..]
    }

    pub fn truncate(&mut self, len: usize) {
        self.types.truncate(len)
    }

    /// Fails if anything is left over at the end of `context`.
    pub fn expect_empty(&self, location: &Location, context: &str) -> SemanticResult<()> {
        if self.types.is_empty() {
            Ok(())
        } else {
            Err(CompilerError::new(
                location.clone(),
                SemanticError::ExtraValues(context.into()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;

    #[test]
    fn pop_from_empty_is_an_arity_error() {
        let mut stack = TypeStack::new();
        let loc = Location::new("t", 3, 1);
        let err = stack.pop(&loc, "return").unwrap_err();
        assert_eq!(err.location(), &loc);
        assert_eq!(err.inner(), SemanticError::OutOfValues("return".into()));
    }

    #[test]
    fn since_and_truncate() {
        let mut stack = TypeStack::new();
        stack.push(u8_ty());
        let mark = stack.len();
        stack.push(u16_ty());
        stack.push(u32_ty());
        assert_eq!(stack.since(mark), &[u16_ty(), u32_ty()]);
        stack.truncate(mark);
        assert_eq!(stack.peek(), Some(&u8_ty()));
        assert!(stack.expect_empty(&Location::default(), "statement").is_err());
    }
}
