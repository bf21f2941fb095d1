use std::collections::BTreeSet;

use log::debug;

use crate::compiler::{
    ast::*,
    codegen::{annotated, entry_procedure, err, required, CodegenError, CodegenResult},
    error::AtLocation,
    flow::{if_chain, LabelCounter, LoopStack},
    memory::{Chunk, Layout, LayoutResult, PORTABLE_WIDTHS},
    semantics::{CheckedProgram, ItemSymbol, LocalScope, Resolved},
    source::Location,
};

use super::ir::{load_op, store_op, AbiTy, Class, DataItem, Definition, Inst, Value};

/// The wrapper QBE output always defines.
const MAIN: &str = "main";

fn placed<T>(result: LayoutResult<T>, location: &Location) -> CodegenResult<T> {
    result.at(location)
}

fn label(id: usize) -> String {
    format!("__{}", id)
}

fn mask(value: u64, size: u64) -> u64 {
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (size * 8)) - 1)
    }
}

/// One chunk of a value on the temporary stack.
#[derive(Clone, Debug, PartialEq)]
struct Part {
    value: Value,
    width: u64,
}

fn comparison(operator: BinaryOperator, class: Class) -> Option<&'static str> {
    use BinaryOperator::*;
    let names = match operator {
        Equal => ["ceql", "ceqw", "ceqd"],
        NotEqual => ["cnel", "cnew", "cned"],
        Greater => ["cugtl", "cugtw", "cgtd"],
        GreaterEqual => ["cugel", "cugew", "cged"],
        Less => ["cultl", "cultw", "cltd"],
        LessEqual => ["culel", "culew", "cled"],
        _ => return None,
    };
    let index = match class {
        Class::L => 0,
        Class::W => 1,
        Class::D => 2,
    };
    Some(names[index])
}

/// Lowers a checked program to QBE text. Values that the native backend
/// keeps on the machine stack are kept on a stack of temporaries here, in the
/// same order.
pub struct QbeContext<'a> {
    program: &'a CheckedProgram,
    layout: Layout<'a>,
    functions: Vec<Definition>,
    strings: Vec<Definition>,
    globals: Vec<Definition>,
    aggregates: BTreeSet<u64>,
    labels: LabelCounter,
    string_count: usize,

    // The function being generated.
    body: Vec<Inst>,
    /// Slots allocated while generating the body, moved to its start block.
    scratch: Vec<Inst>,
    stack: Vec<Part>,
    next_temp: usize,
    loops: LoopStack,
    scope: LocalScope,
    arguments: &'a [Declaration],
    returns: &'a [Type],
}

impl<'a> QbeContext<'a> {
    pub fn new(program: &'a CheckedProgram) -> QbeContext<'a> {
        QbeContext {
            program,
            layout: program.layout(),
            functions: vec![],
            strings: vec![],
            globals: vec![],
            aggregates: BTreeSet::new(),
            labels: LabelCounter::new(),
            string_count: 0,
            body: vec![],
            scratch: vec![],
            stack: vec![],
            next_temp: 0,
            loops: LoopStack::new(),
            scope: LocalScope::new(),
            arguments: &[],
            returns: &[],
        }
    }

    pub fn generate(mut self) -> CodegenResult<String> {
        let program = self.program;
        let entry = entry_procedure(program)?;

        for item in program.program().items() {
            match &item.kind {
                ItemKind::Procedure(p) => {
                    if p.name == MAIN {
                        return err(&p.body.location, CodegenError::ReservedSymbol(p.name.clone()));
                    }
                    self.procedure(p)?;
                }
                ItemKind::Global { name, ty } => {
                    if name == MAIN {
                        return err(&item.location, CodegenError::ReservedSymbol(name.clone()));
                    }
                    let size = placed(self.layout.size_of(ty), &item.location)?;
                    self.globals
                        .push(Definition::Data(name.clone(), vec![DataItem::Zero(size)]));
                }
                ItemKind::Type { .. } | ItemKind::Constant { .. } | ItemKind::Macro(_) => (),
            }
        }

        let argc = Value::named("argc");
        let argc2 = Value::named("argc2");
        let argv = Value::named("argv");
        let wrapper = Definition::Function {
            name: MAIN.into(),
            returns: None,
            parameters: vec![(Class::L, argc.clone()), (Class::L, argv.clone())],
            body: vec![
                Inst::Assign(argc2.clone(), Class::L, "copy", vec![argc]),
                Inst::Call {
                    result: None,
                    callee: Value::Global(entry.name.clone()),
                    arguments: vec![(Class::L, argc2), (Class::L, argv)],
                },
                Inst::Ret(None),
            ],
        };

        let mut text = format!("{}\n", wrapper);
        for size in &self.aggregates {
            text.push_str(&format!("{}\n", Definition::Aggregate(*size)));
        }
        for d in self.functions.iter().chain(&self.strings).chain(&self.globals) {
            text.push_str(&format!("{}\n", d));
        }
        Ok(text)
    }

    fn emit(&mut self, inst: Inst) {
        self.body.push(inst)
    }

    fn temp(&mut self) -> Value {
        let t = Value::Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    /// Emits `%.t =class op operands` into a fresh temporary.
    fn assign(&mut self, class: Class, op: &'static str, operands: Vec<Value>) -> Value {
        let t = self.temp();
        self.emit(Inst::Assign(t.clone(), class, op, operands));
        t
    }

    fn push(&mut self, value: Value, width: u64) {
        self.stack.push(Part { value, width })
    }

    fn pop(&mut self, location: &Location) -> CodegenResult<Part> {
        required(self.stack.pop(), location, || {
            CodegenError::Unsupported("reading past the temporary stack".into())
        })
    }

    fn fresh_block(&mut self) {
        let id = self.labels.next();
        self.emit(Inst::Label(label(id)));
    }

    fn size_of(&self, ty: &Type, location: &Location) -> CodegenResult<u64> {
        placed(self.layout.size_of(ty), location)
    }

    fn resolve(&self, ty: &Type, location: &Location) -> CodegenResult<Type> {
        placed(self.layout.resolve(ty), location)
    }

    fn chunks_of(&self, ty: &Type, location: &Location) -> CodegenResult<Vec<Chunk>> {
        placed(self.layout.value_chunks(ty, PORTABLE_WIDTHS), location)
    }

    /// Chunks of several values laid out one after another.
    fn chunks_of_all(&self, types: &[Type], location: &Location) -> CodegenResult<Vec<Chunk>> {
        let mut result = vec![];
        let mut base = 0;
        for ty in types {
            for c in self.chunks_of(ty, location)? {
                result.push(Chunk {
                    offset: base + c.offset,
                    width: c.width,
                });
            }
            base += self.size_of(ty, location)?;
        }
        Ok(result)
    }

    /// Pushes the chunks of a `ty` stored at `base + displacement`.
    fn load(&mut self, base: &Value, displacement: u64, ty: &Type, location: &Location) -> CodegenResult<()> {
        for c in self.chunks_of(ty, location)? {
            self.load_chunk(base, displacement + c.offset, c.width);
        }
        Ok(())
    }

    fn load_chunk(&mut self, base: &Value, offset: u64, width: u64) {
        let p = self.assign(Class::L, "add", vec![base.clone(), Value::Const(offset)]);
        let t = self.assign(Class::of_width(width), load_op(width), vec![p]);
        self.push(t, width);
    }

    /// Pops a `ty` into memory at `base + displacement`, last chunk first.
    fn store(&mut self, base: &Value, displacement: u64, ty: &Type, location: &Location) -> CodegenResult<()> {
        let chunks = self.chunks_of(ty, location)?;
        self.store_chunks(base, displacement, &chunks, location)
    }

    fn store_chunks(
        &mut self,
        base: &Value,
        displacement: u64,
        chunks: &[Chunk],
        location: &Location,
    ) -> CodegenResult<()> {
        for c in chunks.iter().rev() {
            let part = self.pop(location)?;
            let p = self.assign(
                Class::L,
                "add",
                vec![base.clone(), Value::Const(displacement + c.offset)],
            );
            self.emit(Inst::Store(store_op(c.width), part.value, p));
        }
        Ok(())
    }

    /// A stack slot of `size` bytes allocated at the start of the function.
    fn scratch_slot(&mut self, size: u64) -> Value {
        let t = self.temp();
        self.scratch
            .push(Inst::Assign(t.clone(), Class::L, "alloc8", vec![Value::Const(size)]));
        t
    }

    fn push_constant(&mut self, value: u64, size: u64) {
        let t = self.assign(Class::of_width(size), "copy", vec![Value::Const(mask(value, size))]);
        self.push(t, size);
    }

    fn push_string(&mut self, text: &[u8]) {
        let name = format!("__{}", self.string_count);
        self.string_count += 1;
        let mut bytes: Vec<DataItem> = text.iter().map(|b| DataItem::Byte(*b)).collect();
        bytes.push(DataItem::Byte(0));
        self.strings.push(Definition::Data(name.clone(), bytes));
        let t = self.assign(Class::L, "copy", vec![Value::Global(name)]);
        self.push(t, 8);
    }

    /// Address of a variable's storage: its slot for locals and arguments,
    /// its symbol for globals.
    fn variable(&self, name: &str) -> Option<(Value, Type)> {
        match self.program.symbols().resolve(name, &self.scope, self.arguments) {
            Resolved::Local(d) => {
                let local = self.scope.find(name)?;
                Some((Value::Temp(self.arguments.len() + local.slot), d.ty.clone()))
            }
            Resolved::Argument(d) => {
                let index = self.arguments.iter().position(|a| a.name == name)?;
                Some((Value::Temp(index), d.ty.clone()))
            }
            Resolved::Item(ItemSymbol::Global(ty)) => Some((Value::Global(name.into()), ty.clone())),
            _ => None,
        }
    }

    fn procedure(&mut self, procedure: &'a Procedure) -> CodegenResult<()> {
        debug!("Generating QBE for {}", procedure.name);
        let location = &procedure.body.location;
        self.body = vec![];
        self.scratch = vec![];
        self.stack = vec![];
        self.scope = LocalScope::new();
        self.arguments = &procedure.arguments;
        self.returns = &procedure.returns;

        let argc = procedure.arguments.len();
        for (i, a) in procedure.arguments.iter().enumerate() {
            let size = self.size_of(&a.ty, location)?;
            self.emit(Inst::Assign(Value::Temp(i), Class::L, "alloc8", vec![Value::Const(size)]));
        }

        let mut parameters = vec![];
        for (i, a) in procedure.arguments.iter().enumerate() {
            for c in self.chunks_of(&a.ty, location)? {
                let k = parameters.len();
                let parameter = Value::Named(format!("a{}", k));
                let pointer = Value::Named(format!("i{}", k));
                self.emit(Inst::Assign(
                    pointer.clone(),
                    Class::L,
                    "add",
                    vec![Value::Temp(i), Value::Const(c.offset)],
                ));
                self.emit(Inst::Store(store_op(c.width), parameter.clone(), pointer));
                parameters.push((Class::of_width(c.width), parameter));
            }
        }

        let returns_size = placed(self.layout.returns_size(&procedure.returns), location)?;
        let returns = if returns_size > 0 {
            self.aggregates.insert(returns_size);
            self.emit(Inst::Assign(
                Value::named("r"),
                Class::L,
                "alloc8",
                vec![Value::Const(returns_size)],
            ));
            Some(AbiTy::Aggregate(returns_size))
        } else {
            None
        };

        let mut locals = vec![];
        for_each_local(&procedure.body, &mut |d| locals.push(d));
        for (k, d) in locals.iter().enumerate() {
            let size = self.size_of(&d.ty, location)?;
            self.emit(Inst::Assign(
                Value::Temp(argc + k),
                Class::L,
                "alloc8",
                vec![Value::Const(size)],
            ));
        }
        self.next_temp = argc + locals.len();
        let prologue = self.body.len();

        self.expression(&procedure.body)?;
        self.emit(Inst::Ret(None));

        let scratch = std::mem::take(&mut self.scratch);
        let mut body = std::mem::take(&mut self.body);
        body.splice(prologue..prologue, scratch);
        self.functions.push(Definition::Function {
            name: procedure.name.clone(),
            returns,
            parameters,
            body,
        });
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> CodegenResult<()> {
        if !statement.is_enabled() {
            return Ok(());
        }
        let location = &statement.location;
        match &statement.kind {
            StatementKind::Expression(e) => self.expression(e),
            StatementKind::Declare {
                declarations,
                value,
            } => {
                if let Some(value) = value {
                    self.expression(value)?;
                }
                for d in declarations.iter().rev() {
                    let slot = self.scope.declare(d.clone());
                    if value.is_some() {
                        let base = Value::Temp(self.arguments.len() + slot);
                        self.store(&base, 0, &d.ty, location)?;
                    }
                }
                Ok(())
            }
            StatementKind::Assign { targets, value } => {
                self.expression(value)?;
                for target in targets.iter().rev() {
                    let ty = annotated(target, "assignment target")?;
                    let (base, displacement) = self.address(target)?;
                    self.store(&base, displacement, ty, &target.location)?;
                }
                Ok(())
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.expression(value)?;
                }
                if self.returns.is_empty() {
                    self.emit(Inst::Ret(None));
                } else {
                    let chunks = self.chunks_of_all(self.returns, location)?;
                    let r = Value::named("r");
                    self.store_chunks(&r, 0, &chunks, location)?;
                    self.emit(Inst::Ret(Some(r)));
                }
                self.fresh_block();
                Ok(())
            }
            StatementKind::While { condition, body } => {
                let start = self.labels.next();
                let inside = self.labels.next();
                let end = self.labels.next();
                self.emit(Inst::Label(label(start)));
                self.expression(condition)?;
                let c = self.pop(location)?;
                self.emit(Inst::Jnz(c.value, label(inside), label(end)));
                self.emit(Inst::Label(label(inside)));
                self.loops.push(end);
                self.expression(body)?;
                self.loops.pop();
                self.emit(Inst::Jmp(label(start)));
                self.emit(Inst::Label(label(end)));
                Ok(())
            }
            StatementKind::Break => match self.loops.innermost() {
                Some(end) => {
                    self.emit(Inst::Jmp(label(end)));
                    self.fresh_block();
                    Ok(())
                }
                None => err(location, CodegenError::Unsupported("break outside of a loop".into())),
            },
        }
    }

    /// The address of an assignable expression, as a base and a constant
    /// displacement from it.
    fn address(&mut self, expression: &Expression) -> CodegenResult<(Value, u64)> {
        let location = &expression.location;
        match &expression.kind {
            ExpressionKind::Identifier(name) => {
                let (base, _) = required(self.variable(name), location, || {
                    CodegenError::Unsupported(format!("taking the address of {}", name))
                })?;
                Ok((base, 0))
            }
            ExpressionKind::Field {
                parent,
                name,
                parent_ty,
                needs_reference,
            } => {
                let parent_ty = required(parent_ty.as_ref(), location, || {
                    CodegenError::MissingAnnotation("field parent")
                })?;
                let (base, displacement, aggregate) = if *needs_reference {
                    let (base, displacement) = self.address(parent)?;
                    (base, displacement, parent_ty.clone())
                } else {
                    self.expression(parent)?;
                    let pointer = self.pop(location)?;
                    match self.resolve(parent_ty, location)? {
                        Type::Pointer(pointee) => (pointer.value, 0, *pointee),
                        other => return err(location, CodegenError::Unsupported(format!("field of {}", other))),
                    }
                };
                let field = placed(self.layout.field_location(&aggregate, name), location)?;
                Ok((base, displacement + field.offset))
            }
            ExpressionKind::Index {
                array,
                index,
                array_ty,
            } => {
                let array_ty = required(array_ty.as_ref(), location, || {
                    CodegenError::MissingAnnotation("indexed array")
                })?;
                let start = if self.resolve(array_ty, location)?.is_pointer() {
                    self.expression(array)?;
                    self.pop(location)?.value
                } else {
                    let (base, displacement) = self.address(array)?;
                    self.assign(Class::L, "add", vec![base, Value::Const(displacement)])
                };
                let element = placed(self.layout.element_of(array_ty), location)?;
                let element_size = self.size_of(&element, location)?;
                self.expression(index)?;
                let i = self.pop(location)?;
                let offset = self.assign(Class::L, "mul", vec![i.value, Value::Const(element_size)]);
                let address = self.assign(Class::L, "add", vec![start, offset]);
                Ok((address, 0))
            }
            _ => err(location, CodegenError::Unsupported("taking this address".into())),
        }
    }

    fn expression(&mut self, expression: &Expression) -> CodegenResult<()> {
        let location = &expression.location;
        match &expression.kind {
            ExpressionKind::Block(statements) => {
                self.scope.enter_block();
                for s in statements {
                    self.statement(s)?;
                }
                self.scope.leave_block();
            }
            ExpressionKind::Number(value) => {
                let ty = annotated(expression, "number")?;
                self.number(*value, ty, location)?;
            }
            ExpressionKind::Str(text) => self.push_string(text.as_bytes()),
            ExpressionKind::Char(c) => self.push_constant(*c as u64, 1),
            ExpressionKind::Boolean(b) => self.push_constant(*b as u64, 1),
            ExpressionKind::Null => self.push_constant(0, 8),
            ExpressionKind::Identifier(name) => self.identifier(expression, name)?,
            ExpressionKind::Field { .. } | ExpressionKind::Index { .. } => {
                let ty = annotated(expression, "retrieval")?;
                let (base, displacement) = self.address(expression)?;
                self.load(&base, displacement, ty, location)?;
            }
            ExpressionKind::Call {
                callee,
                arguments,
                procedure_ty,
            } => self.call(callee, arguments, procedure_ty.as_ref(), location)?,
            ExpressionKind::Binary {
                operator,
                left,
                right,
                operand_ty,
            } => {
                let operand_ty = required(operand_ty.as_ref(), location, || {
                    CodegenError::MissingAnnotation("operator")
                })?;
                self.expression(left)?;
                self.expression(right)?;
                self.binary(*operator, operand_ty, location)?;
            }
            ExpressionKind::Not(operand) => {
                self.expression(operand)?;
                let b = self.pop(location)?;
                let t = self.assign(Class::W, "xor", vec![b.value, Value::Const(1)]);
                self.push(t, 1);
            }
            ExpressionKind::If { .. } => self.if_chain(expression)?,
            ExpressionKind::Multiple(parts) => {
                for part in parts {
                    self.expression(part)?;
                }
            }
            ExpressionKind::Reference(operand) => {
                let (base, displacement) = self.address(operand)?;
                let t = self.assign(Class::L, "add", vec![base, Value::Const(displacement)]);
                self.push(t, 8);
            }
            ExpressionKind::Cast {
                target,
                operand,
                input_ty,
            } => {
                let input_ty = required(input_ty.as_ref(), location, || {
                    CodegenError::MissingAnnotation("cast")
                })?;
                self.expression(operand)?;
                self.cast(input_ty, target, location)?;
            }
            ExpressionKind::Init(ty) => {
                for c in self.chunks_of(ty, location)? {
                    self.push_constant(0, c.width);
                }
            }
            ExpressionKind::Build { target, arguments } => self.build(target, arguments, location)?,
            ExpressionKind::SizeOf(ty) => {
                let size = self.size_of(ty, location)?;
                let result = annotated(expression, "sizeof")?;
                self.number(NumberValue::Integer(size), result, location)?;
            }
            ExpressionKind::LengthOf(ty) => {
                let length = placed(self.layout.length_of(ty), location)?;
                let result = annotated(expression, "lengthof")?;
                self.number(NumberValue::Integer(length), result, location)?;
            }
            ExpressionKind::RunMacro(run) => {
                let expanded = required(run.expanded_expression(), location, || {
                    CodegenError::MissingAnnotation("macro expansion")
                })?;
                self.expression(expanded)?;
            }
        }
        Ok(())
    }

    /// Evaluates the parts of a struct or array, stores them at their
    /// offsets in a scratch slot and loads the whole value back, so that it
    /// is chunked like any other value of `target`.
    fn build(&mut self, target: &Type, arguments: &[Expression], location: &Location) -> CodegenResult<()> {
        let parts: Vec<(u64, Type)> = match self.resolve(target, location)? {
            Type::Struct(fields) => {
                let mut offset = 0;
                let mut parts = vec![];
                for f in fields {
                    let size = self.size_of(&f.ty, location)?;
                    parts.push((offset, f.ty));
                    offset += size;
                }
                parts
            }
            Type::Array {
                element,
                length: Some(n),
            } => {
                let size = self.size_of(&element, location)?;
                (0..n).map(|i| (i * size, (*element).clone())).collect()
            }
            other => return err(location, CodegenError::Unsupported(format!("building {}", other))),
        };

        for a in arguments {
            self.expression(a)?;
        }
        let slot = self.scratch_slot(self.size_of(target, location)?);
        for (offset, ty) in parts.iter().rev() {
            self.store(&slot, *offset, ty, location)?;
        }
        self.load(&slot, 0, target, location)
    }

    fn number(&mut self, value: NumberValue, ty: &Type, location: &Location) -> CodegenResult<()> {
        let is_float = matches!(self.resolve(ty, location)?, Type::Primitive(Primitive::F64));
        let size = self.size_of(ty, location)?;
        self.push_constant(value.bits(is_float), size);
        Ok(())
    }

    fn identifier(&mut self, expression: &Expression, name: &str) -> CodegenResult<()> {
        let location = &expression.location;
        match name {
            "@file" => {
                self.push_string(location.file.as_bytes());
                return Ok(());
            }
            "@line" => {
                self.push_constant(location.line as u64, 8);
                return Ok(());
            }
            _ => (),
        }

        // Locals and arguments, then enum variants, then items.
        let program = self.program;
        let item = match program.symbols().resolve(name, &self.scope, self.arguments) {
            Resolved::Local(_) | Resolved::Argument(_) => return self.load_variable(name, location),
            Resolved::Item(symbol) => Some(symbol.clone()),
            Resolved::Unresolved => None,
        };

        let ty = annotated(expression, "identifier")?;
        if let Type::Enum(variants) = self.resolve(ty, location)? {
            if let Some(ordinal) = variants.iter().position(|v| v == name) {
                self.push_constant(ordinal as u64, 8);
                return Ok(());
            }
        }

        match item {
            Some(ItemSymbol::Global(_)) => self.load_variable(name, location)?,
            Some(ItemSymbol::Procedure(_)) => {
                let t = self.assign(Class::L, "copy", vec![Value::Global(name.into())]);
                self.push(t, 8);
            }
            Some(ItemSymbol::Constant(value)) => self.number(value, ty, location)?,
            Some(ItemSymbol::Type(_)) | Some(ItemSymbol::Macro(_)) | None => {
                return err(location, CodegenError::Unsupported(format!("value of {}", name)))
            }
        }
        Ok(())
    }

    fn load_variable(&mut self, name: &str, location: &Location) -> CodegenResult<()> {
        let (base, ty) = required(self.variable(name), location, || {
            CodegenError::Unsupported(format!("value of {}", name))
        })?;
        self.load(&base, 0, &ty, location)
    }

    fn call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        procedure_ty: Option<&Type>,
        location: &Location,
    ) -> CodegenResult<()> {
        let base = self.stack.len();

        if let ExpressionKind::Identifier(name) = &callee.kind {
            if syscall_arity(name).is_some() {
                for a in arguments {
                    self.expression(a)?;
                }
                let parts = self.stack.split_off(base);
                let t = self.temp();
                self.emit(Inst::Call {
                    result: Some((t.clone(), AbiTy::Base(Class::L))),
                    callee: Value::Global("syscall".into()),
                    arguments: parts
                        .into_iter()
                        .map(|p| (Class::of_width(p.width), p.value))
                        .collect(),
                });
                self.push(t, 8);
                return Ok(());
            }
        }

        let procedure_ty = required(procedure_ty, location, || CodegenError::MissingAnnotation("call"))?;
        let returns = match self.resolve(procedure_ty, location)? {
            Type::Procedure { returns, .. } => returns,
            other => return err(location, CodegenError::Unsupported(format!("calling {}", other))),
        };

        for a in arguments {
            self.expression(a)?;
        }
        self.expression(callee)?;
        let target = self.pop(location)?;
        let parts = self.stack.split_off(base);
        let arguments = parts
            .into_iter()
            .map(|p| (Class::of_width(p.width), p.value))
            .collect();

        let returns_size = placed(self.layout.returns_size(&returns), location)?;
        if returns_size == 0 {
            self.emit(Inst::Call {
                result: None,
                callee: target.value,
                arguments,
            });
            return Ok(());
        }

        self.aggregates.insert(returns_size);
        let result = self.temp();
        self.emit(Inst::Call {
            result: Some((result.clone(), AbiTy::Aggregate(returns_size))),
            callee: target.value,
            arguments,
        });
        for c in self.chunks_of_all(&returns, location)? {
            self.load_chunk(&result, c.offset, c.width);
        }
        Ok(())
    }

    fn binary(&mut self, operator: BinaryOperator, operand_ty: &Type, location: &Location) -> CodegenResult<()> {
        use BinaryOperator::*;

        let right = self.pop(location)?;
        let left = self.pop(location)?;

        if operator.is_logical() {
            let op = if operator == And { "and" } else { "or" };
            let t = self.assign(Class::W, op, vec![left.value, right.value]);
            self.push(t, 1);
            return Ok(());
        }

        if matches!(self.resolve(operand_ty, location)?, Type::Primitive(Primitive::F64)) {
            let l = self.assign(Class::D, "cast", vec![left.value]);
            let r = self.assign(Class::D, "cast", vec![right.value]);
            if let Some(op) = comparison(operator, Class::D) {
                let t = self.assign(Class::W, op, vec![l, r]);
                self.push(t, 1);
                return Ok(());
            }
            let op = match operator {
                Add => "add",
                Subtract => "sub",
                Multiply => "mul",
                Divide => "div",
                _ => return err(location, CodegenError::Unsupported(format!("{} on f64", operator))),
            };
            let d = self.assign(Class::D, op, vec![l, r]);
            let t = self.assign(Class::L, "cast", vec![d]);
            self.push(t, 8);
            return Ok(());
        }

        let size = self.size_of(operand_ty, location)?;
        let class = Class::of_width(size);
        if let Some(op) = comparison(operator, class) {
            let t = self.assign(Class::W, op, vec![left.value, right.value]);
            self.push(t, 1);
            return Ok(());
        }

        let op = match operator {
            Add => "add",
            Subtract => "sub",
            Multiply => "mul",
            Divide => "udiv",
            Modulus => "urem",
            _ => return err(location, CodegenError::Unsupported(format!("operator {}", operator))),
        };
        let t = self.assign(class, op, vec![left.value, right.value]);
        let t = self.truncate(t, size);
        self.push(t, size);
        Ok(())
    }

    /// Keeps only the low `size` bytes of a `w` value narrower than 4 bytes.
    fn truncate(&mut self, value: Value, size: u64) -> Value {
        match size {
            1 => self.assign(Class::W, "and", vec![value, Value::Const(255)]),
            2 => self.assign(Class::W, "and", vec![value, Value::Const(65535)]),
            _ => value,
        }
    }

    fn cast(&mut self, input: &Type, target: &Type, location: &Location) -> CodegenResult<()> {
        let from = self.resolve(input, location)?;
        let to = self.resolve(target, location)?;
        if let (Type::Primitive(Primitive::F64), Type::Primitive(Primitive::U64)) = (&from, &to) {
            let bits = self.pop(location)?;
            let d = self.assign(Class::D, "cast", vec![bits.value]);
            let t = self.assign(Class::L, "dtosi", vec![d]);
            self.push(t, 8);
            return Ok(());
        }

        let in_size = self.size_of(&from, location)?;
        let out_size = self.size_of(&to, location)?;
        if in_size == out_size {
            return Ok(());
        }
        let part = self.pop(location)?;
        let value = if out_size == 8 {
            self.assign(Class::L, "extuw", vec![part.value])
        } else if in_size == 8 {
            let narrowed = self.assign(Class::W, "copy", vec![part.value]);
            self.truncate(narrowed, out_size)
        } else if out_size < in_size {
            self.truncate(part.value, out_size)
        } else {
            part.value
        };
        self.push(value, out_size);
        Ok(())
    }

    /// Each arm copies what it produced into temporaries shared by all arms,
    /// which are pushed once the chain is done.
    fn if_chain(&mut self, expression: &Expression) -> CodegenResult<()> {
        let location = &expression.location;
        let arms = if_chain(expression);
        let arm_labels: Vec<usize> = arms.iter().map(|_| self.labels.next()).collect();
        let end = self.labels.next();
        let base = self.stack.len();
        let mut results: Option<Vec<Part>> = None;

        for (i, arm) in arms.iter().enumerate() {
            self.emit(Inst::Label(label(arm_labels[i])));
            if let Some(condition) = arm.condition {
                self.expression(condition)?;
                let c = self.pop(location)?;
                let inside = self.labels.next();
                let next = arm_labels.get(i + 1).copied().unwrap_or(end);
                self.emit(Inst::Jnz(c.value, label(inside), label(next)));
                self.emit(Inst::Label(label(inside)));
            }
            self.expression(arm.body)?;

            let produced = self.stack.split_off(base);
            if !produced.is_empty() {
                if results.is_none() {
                    let shared = produced
                        .iter()
                        .map(|p| Part {
                            value: self.temp(),
                            width: p.width,
                        })
                        .collect();
                    results = Some(shared);
                }
                if let Some(shared) = &results {
                    for (r, p) in shared.iter().zip(produced) {
                        self.body.push(Inst::Assign(
                            r.value.clone(),
                            Class::of_width(r.width),
                            "copy",
                            vec![p.value],
                        ));
                    }
                }
            }
            self.emit(Inst::Jmp(label(end)));
        }
        self.emit(Inst::Label(label(end)));

        if let Some(shared) = results {
            self.stack.extend(shared);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ast::builder::*, semantics::check};

    fn qbe(items: Vec<Item>) -> String {
        let checked = check(program(items)).unwrap();
        QbeContext::new(&checked).generate().unwrap()
    }

    fn assert_lines(text: &str, expected: &[&str]) {
        let block = expected
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>();
        assert!(text.contains(&block), "missing:\n{}\nin:\n{}", block, text);
    }

    #[test]
    fn main_wraps_the_entry_procedure() {
        let text = qbe(vec![entry("start", vec![])]);
        assert!(text.starts_with(
            "export function $main(l %.argc, l %.argv) {\n\
             @start\n  \
             %.argc2 =l copy %.argc\n  \
             call $start(l %.argc2, l %.argv)\n  \
             ret\n\
             }\n\
             export function $start() {\n\
             @start\n"
        ));
    }

    #[test]
    fn entry_named_main_is_reserved() {
        let checked = check(program(vec![entry("main", vec![])])).unwrap();
        let err = QbeContext::new(&checked).generate().unwrap_err();
        assert_eq!(err.inner(), CodegenError::ReservedSymbol("main".into()));
    }

    #[test]
    fn call_with_one_argument_and_one_return() {
        let text = qbe(vec![
            procedure("f", vec![("a", u64_ty())], vec![u64_ty()], vec![ret(Some(ident("a")))]),
            entry(
                "start",
                vec![declare(vec![("r", u64_ty())], Some(call("f", vec![num(5)])))],
            ),
        ]);

        assert_eq!(text.matches("type :.8 = { b 8 }\n").count(), 1);
        assert_lines(
            &text,
            &[
                "export function :.8 $f(l %.a0) {",
                "@start",
                "  %.0 =l alloc8 8",
                "  %.i0 =l add %.0, 0",
                "  storel %.a0, %.i0",
                "  %.r =l alloc8 8",
                "  %.1 =l add %.0, 0",
                "  %.2 =l loadl %.1",
                "  %.3 =l add %.r, 0",
                "  storel %.2, %.3",
                "  ret %.r",
                "@__0",
                "  ret",
                "}",
            ],
        );
        assert_lines(
            &text,
            &[
                "  %.1 =l copy 5",
                "  %.2 =l copy $f",
                "  %.3 =:.8 call %.2(l %.1)",
                "  %.4 =l add %.3, 0",
                "  %.5 =l loadl %.4",
                "  %.6 =l add %.0, 0",
                "  storel %.5, %.6",
            ],
        );
    }

    #[test]
    fn field_reads_through_a_pointer() {
        let text = qbe(vec![
            type_def("Point", structure(vec![("x", u8_ty()), ("y", u64_ty())])),
            procedure(
                "read_y",
                vec![("p", pointer(named("Point")))],
                vec![u64_ty()],
                vec![ret(Some(field(ident("p"), "y")))],
            ),
            entry("start", vec![]),
        ]);
        assert_lines(
            &text,
            &["  %.2 =l loadl %.1", "  %.3 =l add %.2, 1", "  %.4 =l loadl %.3"],
        );
    }

    #[test]
    fn narrow_values_use_word_temporaries() {
        let text = qbe(vec![entry(
            "start",
            vec![
                declare(vec![("a", u8_ty())], Some(add(num(250), num(10)))),
                declare(
                    vec![("c", bool_ty())],
                    Some(binary(BinaryOperator::Less, ident("a"), num(4))),
                ),
            ],
        )]);
        assert_lines(
            &text,
            &[
                "  %.2 =w copy 250",
                "  %.3 =w copy 10",
                "  %.4 =w add %.2, %.3",
                "  %.5 =w and %.4, 255",
                "  %.6 =l add %.0, 0",
                "  storeb %.5, %.6",
            ],
        );
        assert_lines(&text, &["  %.8 =w loadub %.7", "  %.9 =w copy 4", "  %.10 =w cultw %.8, %.9"]);
    }

    #[test]
    fn if_chain_labels() {
        let text = qbe(vec![entry(
            "start",
            vec![
                declare(vec![("a", bool_ty())], Some(boolean(true))),
                declare(vec![("b", bool_ty())], Some(boolean(false))),
                expr_stmt(if_else(
                    ident("a"),
                    block(vec![]),
                    Some(if_else(ident("b"), block(vec![]), Some(block(vec![])))),
                )),
            ],
        )]);

        // Arms are __0 to __2, the end is __3, bodies follow.
        assert!(text.contains(", @__4, @__1\n"), "{}", text);
        assert!(text.contains(", @__5, @__2\n"), "{}", text);
        assert_eq!(text.matches("  jmp @__3\n").count(), 3);
        for l in &["@__0\n", "@__1\n", "@__2\n", "@__3\n", "@__4\n", "@__5\n"] {
            assert!(text.contains(l), "{} in {}", l, text);
        }
    }

    #[test]
    fn loops_strings_and_globals() {
        let text = qbe(vec![
            global("counter", u64_ty()),
            entry(
                "start",
                vec![
                    while_loop(boolean(true), block(vec![brk()])),
                    declare(vec![("s", Type::string())], Some(string("hi"))),
                    assign(vec![ident("counter")], num(1)),
                ],
            ),
        ]);

        assert_lines(
            &text,
            &[
                "@__0",
                "  %.1 =w copy 1",
                "  jnz %.1, @__1, @__2",
                "@__1",
                "  jmp @__2",
                "@__3",
                "  jmp @__0",
                "@__2",
            ],
        );
        assert_lines(&text, &["  %.2 =l copy $__0"]);
        assert_lines(&text, &["  %.5 =l add $counter, 0", "  storel %.4, %.5"]);
        assert!(text.ends_with("data $__0 = { b 104, b 105, b 0 }\ndata $counter = { z 8 }\n"));
    }

    #[test]
    fn syscalls_go_through_libc() {
        let text = qbe(vec![entry(
            "start",
            vec![declare(
                vec![("r", uint_ty())],
                Some(call("@syscall1", vec![num(60), num(0)])),
            )],
        )]);
        assert_lines(&text, &["  %.3 =l call $syscall(l %.1, l %.2)"]);
    }

    #[test]
    fn built_values_are_repacked_into_whole_value_chunks() {
        let pair = structure(vec![("x", u8_ty()), ("y", u64_ty())]);
        let text = qbe(vec![entry(
            "start",
            vec![declare(
                vec![("p", pair.clone())],
                Some(build(pair, vec![num(1), num(2)])),
            )],
        )]);

        // The scratch slot is allocated with the locals.
        assert_lines(&text, &["  %.0 =l alloc8 9", "  %.3 =l alloc8 9"]);
        assert_lines(
            &text,
            &[
                "  %.1 =w copy 1",
                "  %.2 =l copy 2",
                "  %.4 =l add %.3, 1",
                "  storel %.2, %.4",
                "  %.5 =l add %.3, 0",
                "  storeb %.1, %.5",
                "  %.6 =l add %.3, 0",
                "  %.7 =l loadl %.6",
                "  %.8 =l add %.3, 8",
                "  %.9 =w loadub %.8",
                "  %.10 =l add %.0, 8",
                "  storeb %.9, %.10",
                "  %.11 =l add %.0, 0",
                "  storel %.7, %.11",
            ],
        );
    }

    #[test]
    fn enum_variants_come_before_items_and_after_locals() {
        let text = qbe(vec![
            type_def("Color", enumeration(vec!["red", "green"])),
            global("green", u8_ty()),
            entry(
                "start",
                vec![
                    declare(vec![("c", named("Color"))], Some(ident("green"))),
                    declare(vec![("red", named("Color"))], Some(ident("c"))),
                    declare(vec![("d", named("Color"))], Some(ident("red"))),
                ],
            ),
        ]);

        // `green` is the variant, not the global of the same name.
        assert_lines(&text, &["  %.3 =l copy 1"]);
        assert!(!text.contains("add $green"), "{}", text);

        // The local `red` shadows the variant.
        assert!(!text.contains("=l copy 0"), "{}", text);
        assert_lines(&text, &["  %.8 =l add %.1, 0", "  %.9 =l loadl %.8"]);
    }

    #[test]
    fn sizes_wanted_as_floats_are_float_constants() {
        let text = qbe(vec![entry(
            "start",
            vec![
                declare(vec![("s", f64_ty())], Some(size_of(u64_ty()))),
                declare(vec![("n", f64_ty())], Some(length_of(array(u8_ty(), Some(3))))),
            ],
        )]);
        assert!(text.contains(&format!("=l copy {}\n", 8.0f64.to_bits())), "{}", text);
        assert!(text.contains(&format!("=l copy {}\n", 3.0f64.to_bits())), "{}", text);
    }

    #[test]
    fn macro_invocations_generate_their_expansion() {
        let text = qbe(vec![
            macro_def(
                "double",
                vec![macro_argument(MacroSyntaxKind::Expression, false)],
                MacroSyntaxKind::Expression,
                vec![macro_variant(
                    vec!["x"],
                    false,
                    expression_syntax(add(ident("x"), ident("x"))),
                )],
            ),
            entry(
                "start",
                vec![declare(
                    vec![("a", u64_ty())],
                    Some(run_macro("double", vec![expression_syntax(num(21))])),
                )],
            ),
        ]);
        assert_eq!(text.matches("=l copy 21\n").count(), 2, "{}", text);
        assert!(text.contains("=l add %.1, %.2\n"), "{}", text);
    }
}
