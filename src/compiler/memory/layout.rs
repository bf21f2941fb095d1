/*!
Computes how values are laid out in memory: the size of every type, the
offset of every struct and union field, the position of locals and arguments
within a procedure's stack frame, and how a value is split into the load and
store widths a backend can move at once.

Structs are packed with no padding. Unions are as large as their largest
field and every field starts at offset 0.
*/

use crate::compiler::{
    ast::{for_each_local, Declaration, Expression, Type},
    semantics::{Local, SymbolTable},
    CompilerErrorDisplay, ErrorKind,
};

/// Load and store widths of the native backend.
pub const NATIVE_WIDTHS: &[u64] = &[8, 1];

/// Load and store widths of the portable backend.
pub const PORTABLE_WIDTHS: &[u64] = &[8, 4, 2, 1];

/// Offset of the first local below the frame base and of the first argument
/// above the saved frame base.
const FRAME_BASE: u64 = 8;

#[derive(Clone, Debug, PartialEq)]
pub enum LayoutError {
    UnresolvedType(String),
    RecursiveType(String),
    UnsizedArray(Type),
    UnsizedType(Type),
    UnresolvedTypeOf,
    UnknownField(Type, String),
    NotAnAggregate(Type),
    NotAnArray(Type),
    TooLarge(Type),
    UnexpandedMacro(String),
}

impl CompilerErrorDisplay for LayoutError {
    fn format(&self) -> String {
        match self {
            LayoutError::UnresolvedType(name) => format!("Could not find type {}", name),
            LayoutError::RecursiveType(name) => format!("Type {} contains itself", name),
            LayoutError::UnsizedArray(ty) => format!("Array {} has no length", ty),
            LayoutError::UnsizedType(ty) => format!("Type {} has no size", ty),
            LayoutError::UnresolvedTypeOf => "typeof has not been resolved".into(),
            LayoutError::UnknownField(ty, name) => format!("{} has no field {}", ty, name),
            LayoutError::NotAnAggregate(ty) => format!("{} is not a struct or union", ty),
            LayoutError::NotAnArray(ty) => format!("{} is not an array", ty),
            LayoutError::TooLarge(ty) => format!("Type {} is too large", ty),
            LayoutError::UnexpandedMacro(name) => format!("Macro {} has not been expanded", name),
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            LayoutError::UnresolvedType(_) | LayoutError::UnknownField(..) => {
                ErrorKind::UnresolvedSymbol
            }
            LayoutError::NotAnAggregate(_) | LayoutError::NotAnArray(_) => {
                ErrorKind::TypeMismatch
            }
            LayoutError::RecursiveType(_)
            | LayoutError::UnsizedArray(_)
            | LayoutError::UnsizedType(_)
            | LayoutError::UnresolvedTypeOf
            | LayoutError::TooLarge(_)
            | LayoutError::UnexpandedMacro(_) => ErrorKind::Unsupported,
        }
    }
}

pub type LayoutResult<T> = std::result::Result<T, LayoutError>;

/// An offset and a size in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationSize {
    pub offset: u64,
    pub size: u64,
}

/// One load or store: `width` bytes at `offset` from the start of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub width: u64,
}

/// Splits `size` bytes greedily into the largest widths that still fit.
pub fn chunks(size: u64, widths: &[u64]) -> Vec<Chunk> {
    let mut result = vec![];
    let mut offset = 0;
    while offset < size {
        let remaining = size - offset;
        match widths.iter().find(|w| **w <= remaining) {
            Some(width) => {
                result.push(Chunk {
                    offset,
                    width: *width,
                });
                offset += width;
            }
            None => break,
        }
    }
    result
}

pub struct Layout<'a> {
    symbols: &'a SymbolTable,
}

impl<'a> Layout<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Layout<'a> {
        Layout { symbols }
    }

    /// Follows named types, resolved `typeof`s and expanded macros until
    /// reaching a type constructor.
    pub fn resolve(&self, ty: &Type) -> LayoutResult<Type> {
        let mut seen: Vec<&str> = vec![];
        let mut current = ty;
        loop {
            match current {
                Type::Named(name) => {
                    if seen.contains(&name.as_str()) {
                        return Err(LayoutError::RecursiveType(name.clone()));
                    }
                    seen.push(name);
                    current = self
                        .symbols
                        .lookup_type(name)
                        .ok_or_else(|| LayoutError::UnresolvedType(name.clone()))?;
                }
                Type::TypeOf {
                    resolved: Some(inner),
                    ..
                } => current = &**inner,
                Type::TypeOf { resolved: None, .. } => return Err(LayoutError::UnresolvedTypeOf),
                Type::RunMacro(run) => {
                    current = run
                        .expanded_type()
                        .ok_or_else(|| LayoutError::UnexpandedMacro(run.name.clone()))?
                }
                _ => return Ok(current.clone()),
            }
        }
    }

    pub fn size_of(&self, ty: &Type) -> LayoutResult<u64> {
        self.size_of_visiting(ty, &mut vec![])
    }

    fn size_of_visiting(&self, ty: &Type, visiting: &mut Vec<String>) -> LayoutResult<u64> {
        match ty {
            Type::Primitive(p) => Ok(p.size()),
            Type::Pointer(_) | Type::Enum(_) => Ok(8),
            Type::Named(name) => {
                if visiting.contains(name) {
                    return Err(LayoutError::RecursiveType(name.clone()));
                }
                let inner = self
                    .symbols
                    .lookup_type(name)
                    .ok_or_else(|| LayoutError::UnresolvedType(name.clone()))?;
                visiting.push(name.clone());
                let size = self.size_of_visiting(inner, visiting)?;
                visiting.pop();
                Ok(size)
            }
            Type::Array {
                element,
                length: Some(n),
            } => n
                .checked_mul(self.size_of_visiting(element, visiting)?)
                .ok_or_else(|| LayoutError::TooLarge(ty.clone())),
            Type::Array { length: None, .. } => Err(LayoutError::UnsizedArray(ty.clone())),
            Type::Struct(fields) => {
                let mut size: u64 = 0;
                for f in fields {
                    size = size
                        .checked_add(self.size_of_visiting(&f.ty, visiting)?)
                        .ok_or_else(|| LayoutError::TooLarge(ty.clone()))?;
                }
                Ok(size)
            }
            Type::Union(fields) => {
                let mut size = 0;
                for f in fields {
                    size = size.max(self.size_of_visiting(&f.ty, visiting)?);
                }
                Ok(size)
            }
            Type::Procedure { .. } => Err(LayoutError::UnsizedType(ty.clone())),
            Type::TypeOf {
                resolved: Some(inner),
                ..
            } => self.size_of_visiting(inner, visiting),
            Type::TypeOf { resolved: None, .. } => Err(LayoutError::UnresolvedTypeOf),
            Type::RunMacro(run) => match run.expanded_type() {
                Some(inner) => self.size_of_visiting(inner, visiting),
                None => Err(LayoutError::UnexpandedMacro(run.name.clone())),
            },
        }
    }

    /// Offset and size of `name` within a struct or union. The name `*`
    /// stands for the whole value.
    pub fn field_location(&self, aggregate: &Type, name: &str) -> LayoutResult<LocationSize> {
        if name == "*" {
            return Ok(LocationSize {
                offset: 0,
                size: self.size_of(aggregate)?,
            });
        }

        let resolved = self.resolve(aggregate)?;
        let (fields, is_union) = match &resolved {
            Type::Struct(fields) => (fields, false),
            Type::Union(fields) => (fields, true),
            _ => return Err(LayoutError::NotAnAggregate(aggregate.clone())),
        };

        let mut offset = 0;
        for f in fields {
            let size = self.size_of(&f.ty)?;
            if f.name == name {
                return Ok(LocationSize { offset, size });
            }
            if !is_union {
                offset += size;
            }
        }
        Err(LayoutError::UnknownField(aggregate.clone(), name.into()))
    }

    pub fn field_type(&self, aggregate: &Type, name: &str) -> LayoutResult<Type> {
        if name == "*" {
            return Ok(aggregate.clone());
        }
        match self.resolve(aggregate)? {
            Type::Struct(fields) | Type::Union(fields) => fields
                .into_iter()
                .find(|f| f.name == name)
                .map(|f| f.ty)
                .ok_or_else(|| LayoutError::UnknownField(aggregate.clone(), name.into())),
            _ => Err(LayoutError::NotAnAggregate(aggregate.clone())),
        }
    }

    /// The element count of an array, looking through one pointer.
    pub fn length_of(&self, ty: &Type) -> LayoutResult<u64> {
        let resolved = match self.resolve(ty)? {
            Type::Pointer(inner) => self.resolve(&inner)?,
            other => other,
        };
        match resolved {
            Type::Array {
                length: Some(n), ..
            } => Ok(n),
            Type::Array { length: None, .. } => Err(LayoutError::UnsizedArray(ty.clone())),
            _ => Err(LayoutError::NotAnArray(ty.clone())),
        }
    }

    /// The element type of an array or pointer to array.
    pub fn element_of(&self, ty: &Type) -> LayoutResult<Type> {
        let resolved = match self.resolve(ty)? {
            Type::Pointer(inner) => self.resolve(&inner)?,
            other => other,
        };
        match resolved {
            Type::Array { element, .. } => Ok(*element),
            _ => Err(LayoutError::NotAnArray(ty.clone())),
        }
    }

    /// The chunks a value of `ty` is moved in: its whole size split greedily,
    /// the same way it is laid out in memory.
    pub fn value_chunks(&self, ty: &Type, widths: &[u64]) -> LayoutResult<Vec<Chunk>> {
        Ok(chunks(self.size_of(ty)?, widths))
    }

    /// Position of a live local below the frame base: 8 plus the sizes of
    /// every local declared before it. The latest declaration wins.
    pub fn local_location(&self, locals: &[Local], name: &str) -> LayoutResult<Option<LocationSize>> {
        let index = match locals.iter().rposition(|l| l.declaration.name == name) {
            Some(i) => i,
            None => return Ok(None),
        };
        let mut offset = FRAME_BASE;
        for l in &locals[..index] {
            offset += self.size_of(&l.declaration.ty)?;
        }
        let size = self.size_of(&locals[index].declaration.ty)?;
        Ok(Some(LocationSize { offset, size }))
    }

    /// Position of an argument above the saved frame base: 8 plus the sizes
    /// of the arguments after it, which were pushed later.
    pub fn argument_location(
        &self,
        arguments: &[Declaration],
        name: &str,
    ) -> LayoutResult<Option<LocationSize>> {
        let index = match arguments.iter().position(|a| a.name == name) {
            Some(i) => i,
            None => return Ok(None),
        };
        let mut offset = FRAME_BASE;
        for a in &arguments[index + 1..] {
            offset += self.size_of(&a.ty)?;
        }
        let size = self.size_of(&arguments[index].ty)?;
        Ok(Some(LocationSize { offset, size }))
    }

    /// Frame space for every local declared anywhere in `body`.
    pub fn locals_size(&self, body: &Expression) -> LayoutResult<u64> {
        let mut declarations = vec![];
        for_each_local(body, &mut |d| declarations.push(d));
        self.total_size(FRAME_BASE, declarations.into_iter().map(|d| &d.ty))
    }

    pub fn arguments_size(&self, arguments: &[Declaration]) -> LayoutResult<u64> {
        self.total_size(0, arguments.iter().map(|a| &a.ty))
    }

    pub fn returns_size(&self, returns: &[Type]) -> LayoutResult<u64> {
        self.total_size(0, returns.iter())
    }

    fn total_size<'t>(&self, start: u64, types: impl Iterator<Item = &'t Type>) -> LayoutResult<u64> {
        let mut size = start;
        for ty in types {
            size = size
                .checked_add(self.size_of(ty)?)
                .ok_or_else(|| LayoutError::TooLarge(ty.clone()))?;
        }
        Ok(size)
    }
}
