use std::collections::HashMap;

use log::debug;

use crate::compiler::{
    ast::{Declaration, ItemKind, Macro, NumberValue, Program, Type},
    CompilerError,
};

use super::{SemanticError, SemanticResult};

/// What a file level item contributes to name resolution. Procedure bodies are
/// not part of it, so the table can be consulted while the bodies themselves
/// are being annotated.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemSymbol {
    /// The procedure's signature, a `Type::Procedure`.
    Procedure(Type),
    Global(Type),
    Type(Type),
    Constant(NumberValue),
    Macro(Macro),
}

/// Result of looking a name up from inside a procedure body.
#[derive(Debug, PartialEq)]
pub enum Resolved<'a> {
    Local(&'a Declaration),
    Argument(&'a Declaration),
    Item(&'a ItemSymbol),
    Unresolved,
}

/// The file level items of a program, keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolTable {
    items: HashMap<String, ItemSymbol>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Collects every enabled item of the program. Item names must be unique
    /// across all files and item level types cannot use `typeof`.
    pub fn from_program(program: &Program) -> SemanticResult<SymbolTable> {
        let mut table = SymbolTable::new();
        for item in program.items() {
            let symbol = match &item.kind {
                ItemKind::Procedure(p) => ItemSymbol::Procedure(p.signature()),
                ItemKind::Global { ty, .. } => ItemSymbol::Global(ty.clone()),
                ItemKind::Type { ty, .. } => ItemSymbol::Type(ty.clone()),
                ItemKind::Constant { value, .. } => ItemSymbol::Constant(*value),
                ItemKind::Macro(m) => ItemSymbol::Macro(m.clone()),
            };

            let uses_type_of = match &symbol {
                ItemSymbol::Procedure(ty) | ItemSymbol::Global(ty) | ItemSymbol::Type(ty) => {
                    ty.contains_type_of()
                }
                ItemSymbol::Constant(_) | ItemSymbol::Macro(_) => false,
            };
            if uses_type_of {
                return Err(CompilerError::new(
                    item.location.clone(),
                    SemanticError::TypeOfOutsideProcedure(item.name().into()),
                ));
            }

            table.add(item.name(), symbol).map_err(|e| CompilerError::new(item.location.clone(), e))?;
        }
        debug!("Symbol table holds {} items", table.items.len());
        Ok(table)
    }

    /// Collects only the macros of the program, which item level types may
    /// invoke before the full table can be built.
    pub fn macros_of(program: &Program) -> SemanticResult<SymbolTable> {
        let mut table = SymbolTable::new();
        for item in program.items() {
            if let ItemKind::Macro(m) = &item.kind {
                table
                    .add(&m.name, ItemSymbol::Macro(m.clone()))
                    .map_err(|e| CompilerError::new(item.location.clone(), e))?;
            }
        }
        Ok(table)
    }

    pub fn add(&mut self, name: &str, symbol: ItemSymbol) -> Result<(), SemanticError> {
        if self.items.contains_key(name) {
            return Err(SemanticError::AlreadyDefined(name.into()));
        }
        self.items.insert(name.into(), symbol);
        Ok(())
    }

    pub fn item(&self, name: &str) -> Option<&ItemSymbol> {
        self.items.get(name)
    }

    pub fn lookup_type(&self, name: &str) -> Option<&Type> {
        match self.items.get(name) {
            Some(ItemSymbol::Type(ty)) => Some(ty),
            _ => None,
        }
    }

    pub fn lookup_macro(&self, name: &str) -> Result<&Macro, SemanticError> {
        match self.items.get(name) {
            Some(ItemSymbol::Macro(m)) => Ok(m),
            Some(_) => Err(SemanticError::NotAMacro(name.into())),
            None => Err(SemanticError::NotDefined(name.into())),
        }
    }

    /// Searches the live locals latest first, then the arguments, then the
    /// file level items.
    pub fn resolve<'a>(
        &'a self,
        name: &str,
        scope: &'a LocalScope,
        arguments: &'a [Declaration],
    ) -> Resolved<'a> {
        if let Some(local) = scope.find(name) {
            return Resolved::Local(&local.declaration);
        }
        if let Some(arg) = arguments.iter().find(|a| a.name == name) {
            return Resolved::Argument(arg);
        }
        match self.items.get(name) {
            Some(item) => Resolved::Item(item),
            None => Resolved::Unresolved,
        }
    }
}

/// A local variable together with its storage slot. Slots are numbered in
/// declaration order across the whole procedure and are never reused.
#[derive(Clone, Debug, PartialEq)]
pub struct Local {
    pub declaration: Declaration,
    pub slot: usize,
}

/// The live local declarations of the procedure being walked, with block
/// scoping: leaving a block forgets everything declared inside it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalScope {
    locals: Vec<Local>,
    blocks: Vec<usize>,
    next_slot: usize,
}

impl LocalScope {
    pub fn new() -> LocalScope {
        LocalScope::default()
    }

    pub fn enter_block(&mut self) {
        self.blocks.push(self.locals.len());
    }

    pub fn leave_block(&mut self) {
        if let Some(len) = self.blocks.pop() {
            self.locals.truncate(len);
        }
    }

    /// Binds a new local and returns its slot.
    pub fn declare(&mut self, declaration: Declaration) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.locals.push(Local { declaration, slot });
        slot
    }

    pub fn find(&self, name: &str) -> Option<&Local> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.declaration.name == name)
    }

    /// Live locals in the order they were declared.
    pub fn locals(&self) -> &[Local] {
        &self.locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;
    use crate::compiler::ast::MacroSyntaxKind;

    #[test]
    fn resolution_order() {
        let table = SymbolTable::from_program(&program(vec![
            global("x", u8_ty()),
            global("y", u8_ty()),
            global("z", u8_ty()),
        ]))
        .unwrap();
        let arguments = vec![
            Declaration::new("x", u16_ty()),
            Declaration::new("y", u16_ty()),
        ];
        let mut scope = LocalScope::new();
        scope.declare(Declaration::new("x", u32_ty()));

        for (name, expected) in vec![
            ("x", Resolved::Local(&scope.locals()[0].declaration)),
            ("y", Resolved::Argument(&arguments[1])),
            ("z", Resolved::Item(&ItemSymbol::Global(u8_ty()))),
            ("w", Resolved::Unresolved),
        ] {
            assert_eq!(table.resolve(name, &scope, &arguments), expected);
        }
    }

    #[test]
    fn leaving_a_block_forgets_its_locals() {
        let mut scope = LocalScope::new();
        scope.declare(Declaration::new("a", u64_ty()));
        scope.enter_block();
        let shadow = scope.declare(Declaration::new("a", u8_ty()));
        assert_eq!(shadow, 1);
        assert_eq!(scope.find("a").unwrap().declaration.ty, u8_ty());
        scope.leave_block();
        assert_eq!(scope.find("a").unwrap().declaration.ty, u64_ty());
        assert_eq!(scope.declare(Declaration::new("b", u8_ty())), 2);
    }

    #[test]
    fn duplicate_items_are_rejected() {
        let result = SymbolTable::from_program(&program(vec![
            global("x", u8_ty()),
            type_def("x", u8_ty()),
        ]));
        assert_eq!(
            result.map_err(|e| e.inner()),
            Err(SemanticError::AlreadyDefined("x".into()))
        );
    }

    #[test]
    fn procedures_are_recorded_by_signature() {
        let table = SymbolTable::from_program(&program(vec![procedure(
            "f",
            vec![("a", u8_ty()), ("b", pointer(u64_ty()))],
            vec![u64_ty()],
            vec![ret(Some(num(0)))],
        )]))
        .unwrap();
        assert_eq!(
            table.item("f"),
            Some(&ItemSymbol::Procedure(Type::Procedure {
                arguments: vec![u8_ty(), pointer(u64_ty())],
                returns: vec![u64_ty()],
            }))
        );
    }

    #[test]
    fn macros_are_looked_up_by_name() {
        let items = vec![
            macro_def(
                "id",
                vec![macro_argument(MacroSyntaxKind::Expression, false)],
                MacroSyntaxKind::Expression,
                vec![macro_variant(vec!["x"], false, expression_syntax(ident("x")))],
            ),
            global("g", u8_ty()),
        ];
        let macros = SymbolTable::macros_of(&program(items.clone())).unwrap();
        assert!(macros.lookup_macro("id").is_ok());
        assert_eq!(macros.item("g"), None);

        let table = SymbolTable::from_program(&program(items)).unwrap();
        assert_eq!(table.lookup_macro("id").map(|m| m.name.as_str()), Ok("id"));
        assert_eq!(table.lookup_macro("g"), Err(SemanticError::NotAMacro("g".into())));
        assert_eq!(table.lookup_macro("h"), Err(SemanticError::NotDefined("h".into())));
    }

    #[test]
    fn item_types_cannot_use_type_of() {
        let result = SymbolTable::from_program(&program(vec![global("g", type_of(num(1)))]));
        assert_eq!(
            result.map_err(|e| e.inner()),
            Err(SemanticError::TypeOfOutsideProcedure("g".into()))
        );
    }
}
