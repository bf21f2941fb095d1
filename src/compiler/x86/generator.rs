use log::debug;

use crate::compiler::{
    ast::*,
    codegen::{annotated, entry_procedure, err, required, CodegenError, CodegenResult},
    error::AtLocation,
    flow::{if_chain, LabelCounter, LoopStack},
    memory::{chunks, Layout, LayoutResult, NATIVE_WIDTHS},
    semantics::{CheckedProgram, ItemSymbol, LocalScope, Resolved},
    source::Location,
};

use super::assembly::{Address, Cond, Inst, Operand, Reg64, Width};

use Reg64::*;

/// Registers receiving the arguments of `@syscallN`, in argument order.
const SYSCALL_REGISTERS: [Reg64; 6] = [Rdi, Rsi, Rdx, R10, R8, R9];

fn placed<T>(result: LayoutResult<T>, location: &Location) -> CodegenResult<T> {
    result.at(location)
}

fn top() -> Address {
    Address::reg(Rsp, 0)
}

fn imm(v: u64) -> Operand {
    Operand::Immediate(v)
}

fn mask(value: u64, size: u64) -> u64 {
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (size * 8)) - 1)
    }
}

/// Lowers a checked program to fasm text. The machine stack is the operand
/// stack: every value is pushed as exactly as many bytes as its type is
/// large.
pub struct FasmContext<'a> {
    program: &'a CheckedProgram,
    layout: Layout<'a>,
    code: Vec<Inst>,
    strings: Vec<Inst>,
    globals: Vec<Inst>,
    labels: LabelCounter,
    string_count: usize,
    loops: LoopStack,

    // The procedure being generated.
    scope: LocalScope,
    arguments: &'a [Declaration],
    arguments_size: u64,
    locals_size: u64,
    returns_size: u64,
}

impl<'a> FasmContext<'a> {
    pub fn new(program: &'a CheckedProgram) -> FasmContext<'a> {
        FasmContext {
            program,
            layout: program.layout(),
            code: vec![],
            strings: vec![],
            globals: vec![],
            labels: LabelCounter::new(),
            string_count: 0,
            loops: LoopStack::new(),
            scope: LocalScope::new(),
            arguments: &[],
            arguments_size: 0,
            locals_size: 0,
            returns_size: 0,
        }
    }

    pub fn generate(mut self) -> CodegenResult<String> {
        let program = self.program;
        let entry = entry_procedure(program)?;

        for item in program.program().items() {
            match &item.kind {
                ItemKind::Procedure(p) => self.procedure(p)?,
                ItemKind::Global { name, ty } => {
                    let size = placed(self.layout.size_of(ty), &item.location)?;
                    self.globals.push(Inst::Reserve(name.clone(), size));
                }
                ItemKind::Type { .. } | ItemKind::Constant { .. } | ItemKind::Macro(_) => (),
            }
        }

        let mut out = vec![
            Inst::Format("ELF64 executable".into()),
            Inst::Segment("readable executable".into()),
            Inst::Lea(Operand::reg(Rbx), Address::reg(Rsp, 8)),
            Inst::Push(Operand::reg(Rbx)),
            Inst::Call(Operand::Label(entry.name.clone())),
            Inst::Mov(Operand::reg(Rax), imm(60)),
            Inst::Mov(Operand::reg(Rdi), imm(0)),
            Inst::Syscall,
        ];
        out.append(&mut self.code);
        out.push(Inst::Segment("readable".into()));
        out.append(&mut self.strings);
        out.push(Inst::Segment("readable writeable".into()));
        out.append(&mut self.globals);

        let mut text = String::new();
        for inst in out {
            text.push_str(&inst.to_string());
            text.push('\n');
        }
        Ok(text)
    }

    fn emit(&mut self, inst: Inst) {
        self.code.push(inst)
    }

    fn size_of(&self, ty: &Type, location: &Location) -> CodegenResult<u64> {
        placed(self.layout.size_of(ty), location)
    }

    fn resolve(&self, ty: &Type, location: &Location) -> CodegenResult<Type> {
        placed(self.layout.resolve(ty), location)
    }

    fn reserve(&mut self, size: u64) {
        if size > 0 {
            self.emit(Inst::Sub(Operand::reg(Rsp), imm(size)));
        }
    }

    fn release(&mut self, size: u64) {
        if size > 0 {
            self.emit(Inst::Add(Operand::reg(Rsp), imm(size)));
        }
    }

    fn move_chunk(&mut self, offset: u64, width: u64, from: &Address, to: &Address, scratch: Reg64) {
        let width = if width == 8 { Width::Qword } else { Width::Byte };
        let offset = offset as i64;
        self.emit(Inst::Mov(
            Operand::sized(scratch, width),
            Operand::mem(width, from.offset(offset)),
        ));
        self.emit(Inst::Mov(
            Operand::mem(width, to.offset(offset)),
            Operand::sized(scratch, width),
        ));
    }

    /// Copies `size` bytes in chunks of 8, then 1.
    fn copy(&mut self, size: u64, from: &Address, to: &Address, scratch: Reg64) {
        for c in chunks(size, NATIVE_WIDTHS) {
            self.move_chunk(c.offset, c.width, from, to, scratch);
        }
    }

    /// Like `copy`, highest chunk first, for moving a value up the stack
    /// onto memory it may overlap.
    fn copy_backwards(&mut self, size: u64, from: &Address, to: &Address, scratch: Reg64) {
        for c in chunks(size, NATIVE_WIDTHS).into_iter().rev() {
            self.move_chunk(c.offset, c.width, from, to, scratch);
        }
    }

    fn push_immediate(&mut self, value: u64, size: u64) {
        let value = mask(value, size);
        match Width::of_size(size) {
            Some(Width::Qword) | None => {
                self.emit(Inst::Mov(Operand::reg(Rax), imm(value)));
                self.emit(Inst::Push(Operand::reg(Rax)));
            }
            Some(width) => {
                self.reserve(size);
                self.emit(Inst::Mov(Operand::mem(width, top()), imm(value)));
            }
        }
    }

    /// Pops a scalar of `size` bytes into `reg`, zero extended.
    fn pop_sized(&mut self, reg: Reg64, size: u64) {
        match Width::of_size(size) {
            Some(Width::Qword) | None => self.emit(Inst::Pop(Operand::reg(reg))),
            Some(Width::Dword) => {
                self.emit(Inst::Mov(
                    Operand::sized(reg, Width::Dword),
                    Operand::mem(Width::Dword, top()),
                ));
                self.release(4);
            }
            Some(width) => {
                self.emit(Inst::Movzx(
                    Operand::sized(reg, Width::Dword),
                    Operand::mem(width, top()),
                ));
                self.release(size);
            }
        }
    }

    fn push_sized(&mut self, reg: Reg64, size: u64) {
        match Width::of_size(size) {
            Some(Width::Qword) | None => self.emit(Inst::Push(Operand::reg(reg))),
            Some(width) => {
                self.reserve(size);
                self.emit(Inst::Mov(Operand::mem(width, top()), Operand::sized(reg, width)));
            }
        }
    }

    fn push_address(&mut self, address: Address) {
        self.emit(Inst::Lea(Operand::reg(Rax), address));
        self.emit(Inst::Push(Operand::reg(Rax)));
    }

    fn push_string(&mut self, text: &[u8]) {
        let label = format!("_{}", self.string_count);
        self.string_count += 1;
        self.strings.push(Inst::DataBytes(label.clone(), text.to_vec()));
        self.push_address(Address::label(&label, 0));
    }

    /// Pops a `bool` and jumps to `otherwise` unless it is true.
    fn branch_unless(&mut self, otherwise: &str) {
        self.pop_sized(Rax, 1);
        self.emit(Inst::Cmp(Operand::sized(Rax, Width::Byte), imm(1)));
        self.emit(Inst::Jcc(Cond::Ne, otherwise.into()));
    }

    /// The storage of a variable: a frame slot for locals and arguments, a
    /// label for globals.
    fn variable(&self, name: &str, location: &Location) -> CodegenResult<Option<(Address, Type)>> {
        match self.program.symbols().resolve(name, &self.scope, self.arguments) {
            Resolved::Local(d) => {
                let found = placed(self.layout.local_location(self.scope.locals(), name), location)?;
                Ok(found.map(|l| (Address::reg(Rbp, -((l.offset + l.size) as i64)), d.ty.clone())))
            }
            Resolved::Argument(d) => {
                let found = placed(self.layout.argument_location(self.arguments, name), location)?;
                Ok(found.map(|l| (Address::reg(Rbp, (l.offset + 8) as i64), d.ty.clone())))
            }
            Resolved::Item(ItemSymbol::Global(ty)) => Ok(Some((Address::label(name, 0), ty.clone()))),
            _ => Ok(None),
        }
    }

    fn procedure(&mut self, procedure: &'a Procedure) -> CodegenResult<()> {
        debug!("Generating fasm for {}", procedure.name);
        let location = &procedure.body.location;
        self.scope = LocalScope::new();
        self.arguments = &procedure.arguments;
        self.arguments_size = placed(self.layout.arguments_size(&procedure.arguments), location)?;
        self.locals_size = placed(self.layout.locals_size(&procedure.body), location)?;
        self.returns_size = placed(self.layout.returns_size(&procedure.returns), location)?;

        self.emit(Inst::Label(procedure.name.clone()));
        self.emit(Inst::Push(Operand::reg(Rbp)));
        self.emit(Inst::Mov(Operand::reg(Rbp), Operand::reg(Rsp)));
        self.reserve(self.locals_size);

        self.expression(&procedure.body)?;
        if procedure.has_implicit_return() {
            self.emit_return(0);
        }
        debug!(
            "{}: {} bytes of arguments, {} of locals, {} of returns",
            procedure.name, self.arguments_size, self.locals_size, self.returns_size
        );
        Ok(())
    }

    /// Moves the `returns_size` bytes on top of the stack to where the
    /// caller's arguments started and returns to the caller.
    fn emit_return(&mut self, returns_size: u64) {
        self.emit(Inst::Mov(Operand::reg(Rcx), Operand::mem(Width::Qword, Address::reg(Rbp, 0))));
        self.emit(Inst::Mov(Operand::reg(Rdx), Operand::mem(Width::Qword, Address::reg(Rbp, 8))));

        let adjust = 16 + self.arguments_size as i64 - returns_size as i64;
        self.copy_backwards(returns_size, &top(), &Address::reg(Rbp, adjust), Rax);

        self.emit(Inst::Mov(Operand::reg(Rsp), Operand::reg(Rbp)));
        if adjust > 0 {
            self.emit(Inst::Add(Operand::reg(Rsp), imm(adjust as u64)));
        } else if adjust < 0 {
            self.emit(Inst::Sub(Operand::reg(Rsp), imm((-adjust) as u64)));
        }
        self.emit(Inst::Mov(Operand::reg(Rbp), Operand::reg(Rcx)));
        self.emit(Inst::Push(Operand::reg(Rdx)));
        self.emit(Inst::Ret);
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
                    self.scope.declare(d.clone());
                    if value.is_some() {
                        let size = self.size_of(&d.ty, location)?;
                        let (slot, _) = required(self.variable(&d.name, location)?, location, || {
                            CodegenError::Unsupported(format!("local {}", d.name))
                        })?;
                        self.copy(size, &top(), &slot, Rax);
                        self.release(size);
                    }
                }
                Ok(())
            }
            StatementKind::Assign { targets, value } => {
                self.expression(value)?;
                for target in targets.iter().rev() {
                    self.store(target)?;
                }
                Ok(())
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.expression(value)?;
                }
                self.emit_return(self.returns_size);
                Ok(())
            }
            StatementKind::While { condition, body } => {
                let start = format!("__{}", self.labels.next());
                let end_id = self.labels.next();
                let end = format!("__{}", end_id);
                self.emit(Inst::Label(start.clone()));
                self.expression(condition)?;
                self.branch_unless(&end);
                self.loops.push(end_id);
                self.expression(body)?;
                self.loops.pop();
                self.emit(Inst::Jmp(start));
                self.emit(Inst::Label(end));
                Ok(())
            }
            StatementKind::Break => match self.loops.innermost() {
                Some(end) => {
                    self.emit(Inst::Jmp(format!("__{}", end)));
                    Ok(())
                }
                None => err(location, CodegenError::Unsupported("break outside of a loop".into())),
            },
        }
    }

    /// Pops the value on top of the stack into an assignment target.
    fn store(&mut self, target: &Expression) -> CodegenResult<()> {
        let location = &target.location;
        let size = self.size_of(annotated(target, "assignment target")?, location)?;
        match &target.kind {
            ExpressionKind::Identifier(name) => {
                let (slot, _) = required(self.variable(name, location)?, location, || {
                    CodegenError::Unsupported(format!("assignment to {}", name))
                })?;
                self.copy(size, &top(), &slot, Rax);
            }
            _ => {
                let displacement = self.address_parts(target)?;
                self.emit(Inst::Pop(Operand::reg(Rax)));
                self.copy(size, &top(), &Address::reg(Rax, displacement), Rbx);
            }
        }
        self.release(size);
        Ok(())
    }

    /// Pushes the address of an addressable expression.
    fn address(&mut self, expression: &Expression) -> CodegenResult<()> {
        let displacement = self.address_parts(expression)?;
        if displacement != 0 {
            self.emit(Inst::Pop(Operand::reg(Rax)));
            self.emit(Inst::Add(Operand::reg(Rax), imm(displacement as u64)));
            self.emit(Inst::Push(Operand::reg(Rax)));
        }
        Ok(())
    }

    /// Pushes a base address and returns the constant displacement still to
    /// be added to it, so field offsets end up in the final memory operand.
    fn address_parts(&mut self, expression: &Expression) -> CodegenResult<i64> {
        let location = &expression.location;
        match &expression.kind {
            ExpressionKind::Identifier(name) => {
                let (address, _) = required(self.variable(name, location)?, location, || {
                    CodegenError::Unsupported(format!("taking the address of {}", name))
                })?;
                self.push_address(address);
                Ok(0)
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
                let (displacement, aggregate) = if *needs_reference {
                    (self.address_parts(parent)?, parent_ty.clone())
                } else {
                    self.expression(parent)?;
                    match self.resolve(parent_ty, location)? {
                        Type::Pointer(pointee) => (0, *pointee),
                        other => return err(location, CodegenError::Unsupported(format!("field of {}", other))),
                    }
                };
                let field = placed(self.layout.field_location(&aggregate, name), location)?;
                Ok(displacement + field.offset as i64)
            }
            ExpressionKind::Index {
                array,
                index,
                array_ty,
            } => {
                let array_ty = required(array_ty.as_ref(), location, || {
                    CodegenError::MissingAnnotation("indexed array")
                })?;
                if self.resolve(array_ty, location)?.is_pointer() {
                    self.expression(array)?;
                } else {
                    self.address(array)?;
                }
                let element = placed(self.layout.element_of(array_ty), location)?;
                let element_size = self.size_of(&element, location)?;
                self.expression(index)?;
                self.emit(Inst::Pop(Operand::reg(Rax)));
                self.emit(Inst::Mov(Operand::reg(Rdx), imm(element_size)));
                self.emit(Inst::Mul(Operand::reg(Rdx)));
                self.emit(Inst::Pop(Operand::reg(Rcx)));
                self.emit(Inst::Add(Operand::reg(Rax), Operand::reg(Rcx)));
                self.emit(Inst::Push(Operand::reg(Rax)));
                Ok(0)
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
            ExpressionKind::Char(c) => self.push_immediate(*c as u64, 1),
            ExpressionKind::Boolean(b) => self.push_immediate(*b as u64, 1),
            ExpressionKind::Null => self.push_immediate(0, 8),
            ExpressionKind::Identifier(name) => self.identifier(expression, name)?,
            ExpressionKind::Field { .. } | ExpressionKind::Index { .. } => {
                let size = self.size_of(annotated(expression, "retrieval")?, location)?;
                let displacement = self.address_parts(expression)?;
                self.emit(Inst::Pop(Operand::reg(Rax)));
                self.reserve(size);
                self.copy(size, &Address::reg(Rax, displacement), &top(), Rbx);
            }
            ExpressionKind::Call {
                callee, arguments, ..
            } => self.call(callee, arguments)?,
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
                self.emit(Inst::Xor(Operand::mem(Width::Byte, top()), imm(1)));
            }
            ExpressionKind::If { .. } => self.if_chain(expression)?,
            ExpressionKind::Multiple(parts) => {
                for part in parts {
                    self.expression(part)?;
                }
            }
            ExpressionKind::Reference(operand) => self.address(operand)?,
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
                let size = self.size_of(ty, location)?;
                self.reserve(size);
                for c in chunks(size, NATIVE_WIDTHS) {
                    let width = if c.width == 8 { Width::Qword } else { Width::Byte };
                    self.emit(Inst::Mov(
                        Operand::mem(width, Address::reg(Rsp, c.offset as i64)),
                        imm(0),
                    ));
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

    fn number(&mut self, value: NumberValue, ty: &Type, location: &Location) -> CodegenResult<()> {
        let is_float = matches!(self.resolve(ty, location)?, Type::Primitive(Primitive::F64));
        let size = self.size_of(ty, location)?;
        self.push_immediate(value.bits(is_float), size);
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
                self.push_immediate(location.line as u64, 8);
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
                self.push_immediate(ordinal as u64, 8);
                return Ok(());
            }
        }

        match item {
            Some(ItemSymbol::Global(_)) => self.load_variable(name, location)?,
            Some(ItemSymbol::Procedure(_)) => self.push_address(Address::label(name, 0)),
            Some(ItemSymbol::Constant(value)) => self.number(value, ty, location)?,
            Some(ItemSymbol::Type(_)) | Some(ItemSymbol::Macro(_)) | None => {
                return err(location, CodegenError::Unsupported(format!("value of {}", name)))
            }
        }
        Ok(())
    }

    fn load_variable(&mut self, name: &str, location: &Location) -> CodegenResult<()> {
        let (address, ty) = required(self.variable(name, location)?, location, || {
            CodegenError::Unsupported(format!("value of {}", name))
        })?;
        let size = self.size_of(&ty, location)?;
        self.reserve(size);
        self.copy(size, &address, &top(), Rax);
        Ok(())
    }

    /// Arguments left to right, then the callee's address.
    fn call(&mut self, callee: &Expression, arguments: &[Expression]) -> CodegenResult<()> {
        if let ExpressionKind::Identifier(name) = &callee.kind {
            if let Some(count) = syscall_arity(name) {
                for a in arguments {
                    self.expression(a)?;
                }
                for reg in SYSCALL_REGISTERS[..count].iter().rev() {
                    self.emit(Inst::Pop(Operand::reg(*reg)));
                }
                self.emit(Inst::Pop(Operand::reg(Rax)));
                self.emit(Inst::Syscall);
                self.emit(Inst::Push(Operand::reg(Rax)));
                return Ok(());
            }
        }

        for a in arguments {
            self.expression(a)?;
        }
        self.expression(callee)?;
        self.emit(Inst::Pop(Operand::reg(Rax)));
        self.emit(Inst::Call(Operand::reg(Rax)));
        Ok(())
    }

    fn binary(&mut self, operator: BinaryOperator, operand_ty: &Type, location: &Location) -> CodegenResult<()> {
        use BinaryOperator::*;

        let size = self.size_of(operand_ty, location)?;
        let condition = match operator {
            Equal => Some(Cond::E),
            NotEqual => Some(Cond::Ne),
            Greater => Some(Cond::A),
            GreaterEqual => Some(Cond::Ae),
            Less => Some(Cond::B),
            LessEqual => Some(Cond::Be),
            _ => None,
        };

        if operator.is_logical() {
            self.pop_sized(Rbx, 1);
            let bl = Operand::sized(Rbx, Width::Byte);
            let inst = if operator == And {
                Inst::And(Operand::mem(Width::Byte, top()), bl)
            } else {
                Inst::Or(Operand::mem(Width::Byte, top()), bl)
            };
            self.emit(inst);
            return Ok(());
        }

        if matches!(self.resolve(operand_ty, location)?, Type::Primitive(Primitive::F64)) {
            let (xmm0, xmm1) = (Operand::Xmm(0), Operand::Xmm(1));
            self.emit(Inst::Movsd(xmm1.clone(), Operand::mem(Width::Qword, top())));
            self.release(8);
            self.emit(Inst::Movsd(xmm0.clone(), Operand::mem(Width::Qword, top())));
            self.release(8);
            if let Some(cond) = condition {
                self.emit(Inst::Xor(Operand::reg(Rcx), Operand::reg(Rcx)));
                self.emit(Inst::Mov(Operand::reg(Rdx), imm(1)));
                self.emit(Inst::Ucomisd(xmm0, xmm1));
                self.emit(Inst::Cmov(cond, Operand::reg(Rcx), Operand::reg(Rdx)));
                self.push_sized(Rcx, 1);
                return Ok(());
            }
            let inst = match operator {
                Add => Inst::Addsd(xmm0.clone(), xmm1),
                Subtract => Inst::Subsd(xmm0.clone(), xmm1),
                Multiply => Inst::Mulsd(xmm0.clone(), xmm1),
                Divide => Inst::Divsd(xmm0.clone(), xmm1),
                _ => return err(location, CodegenError::Unsupported(format!("{} on f64", operator))),
            };
            self.emit(inst);
            self.reserve(8);
            self.emit(Inst::Movsd(Operand::mem(Width::Qword, top()), xmm0));
            return Ok(());
        }

        self.pop_sized(Rbx, size);
        self.pop_sized(Rax, size);
        let (rax, rbx) = (Operand::reg(Rax), Operand::reg(Rbx));
        if let Some(cond) = condition {
            self.emit(Inst::Xor(Operand::reg(Rcx), Operand::reg(Rcx)));
            self.emit(Inst::Mov(Operand::reg(Rdx), imm(1)));
            self.emit(Inst::Cmp(rax, rbx));
            self.emit(Inst::Cmov(cond, Operand::reg(Rcx), Operand::reg(Rdx)));
            self.push_sized(Rcx, 1);
            return Ok(());
        }
        match operator {
            Add => self.emit(Inst::Add(rax, rbx)),
            Subtract => self.emit(Inst::Sub(rax, rbx)),
            Multiply => self.emit(Inst::Mul(rbx)),
            Divide | Modulus => {
                self.emit(Inst::Xor(Operand::reg(Rdx), Operand::reg(Rdx)));
                self.emit(Inst::Div(rbx));
                if operator == Modulus {
                    self.emit(Inst::Mov(rax, Operand::reg(Rdx)));
                }
            }
            _ => return err(location, CodegenError::Unsupported(format!("operator {}", operator))),
        }
        self.push_sized(Rax, size);
        Ok(())
    }

    fn cast(&mut self, input: &Type, target: &Type, location: &Location) -> CodegenResult<()> {
        let from = self.resolve(input, location)?;
        let to = self.resolve(target, location)?;
        if let (Type::Primitive(Primitive::F64), Type::Primitive(Primitive::U64)) = (&from, &to) {
            self.emit(Inst::Movsd(Operand::Xmm(0), Operand::mem(Width::Qword, top())));
            self.release(8);
            self.emit(Inst::Cvttsd2si(Operand::reg(Rax), Operand::Xmm(0)));
            self.emit(Inst::Push(Operand::reg(Rax)));
            return Ok(());
        }
        let in_size = self.size_of(&from, location)?;
        let out_size = self.size_of(&to, location)?;
        if in_size != out_size {
            self.pop_sized(Rax, in_size);
            self.push_sized(Rax, out_size);
        }
        Ok(())
    }

    /// Offsets and sizes of the parts a `build` fills in, in argument order.
    fn members(&self, target: &Type, location: &Location) -> CodegenResult<Vec<(u64, u64)>> {
        match self.resolve(target, location)? {
            Type::Struct(fields) => {
                let mut offset = 0;
                let mut members = vec![];
                for f in fields {
                    let size = self.size_of(&f.ty, location)?;
                    members.push((offset, size));
                    offset += size;
                }
                Ok(members)
            }
            Type::Array {
                element,
                length: Some(n),
            } => {
                let size = self.size_of(&element, location)?;
                Ok((0..n).map(|i| (i * size, size)).collect())
            }
            other => err(location, CodegenError::Unsupported(format!("building {}", other))),
        }
    }

    /// Reserves the whole value, then moves each evaluated part into place.
    fn build(&mut self, target: &Type, arguments: &[Expression], location: &Location) -> CodegenResult<()> {
        let size = self.size_of(target, location)?;
        let members = self.members(target, location)?;
        self.reserve(size);
        for (a, (offset, member_size)) in arguments.iter().zip(members) {
            self.expression(a)?;
            let to = Address::reg(Rsp, (member_size + offset) as i64);
            self.copy(member_size, &top(), &to, Rax);
            self.release(member_size);
        }
        Ok(())
    }

    /// Every arm gets a label, and every arm ends by jumping to one shared
    /// end label.
    fn if_chain(&mut self, expression: &Expression) -> CodegenResult<()> {
        let arms = if_chain(expression);
        let arm_labels: Vec<String> = arms
            .iter()
            .map(|_| format!("__{}", self.labels.next()))
            .collect();
        let end = format!("__{}", self.labels.next());

        for (i, arm) in arms.iter().enumerate() {
            self.emit(Inst::Label(arm_labels[i].clone()));
            if let Some(condition) = arm.condition {
                self.expression(condition)?;
                let next = arm_labels.get(i + 1).unwrap_or(&end).clone();
                self.branch_unless(&next);
            }
            self.expression(arm.body)?;
            self.emit(Inst::Jmp(end.clone()));
        }
        self.emit(Inst::Label(end));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ast::builder::*, semantics::check};

    fn fasm(items: Vec<Item>) -> String {
        let checked = check(program(items)).unwrap();
        FasmContext::new(&checked).generate().unwrap()
    }

    fn assert_lines(text: &str, expected: &[&str]) {
        let block = expected
            .iter()
            .map(|l| format!("{}\n", l))
            .collect::<String>();
        assert!(text.contains(&block), "missing:\n{}\nin:\n{}", block, text);
    }

    #[test]
    fn entry_stub_and_frame() {
        let text = fasm(vec![entry("start", vec![])]);
        assert!(text.starts_with(
            "format ELF64 executable\n\
             segment readable executable\n  \
             lea rbx, [rsp+8]\n  \
             push rbx\n  \
             call start\n  \
             mov rax, 60\n  \
             mov rdi, 0\n  \
             syscall\n\
             start:\n  \
             push rbp\n  \
             mov rbp, rsp\n  \
             sub rsp, 8\n"
        ));
        assert_lines(
            &text,
            &[
                "  mov rcx, [rbp]",
                "  mov rdx, [rbp+8]",
                "  mov rsp, rbp",
                "  add rsp, 16",
                "  mov rbp, rcx",
                "  push rdx",
                "  ret",
            ],
        );
    }

    #[test]
    fn call_with_one_argument_and_one_return() {
        let text = fasm(vec![
            procedure("f", vec![("a", u64_ty())], vec![u64_ty()], vec![ret(Some(ident("a")))]),
            entry(
                "start",
                vec![declare(vec![("r", u64_ty())], Some(call("f", vec![num(5)])))],
            ),
        ]);

        // The caller pushes the 8 byte argument, then the callee.
        assert_lines(
            &text,
            &[
                "  mov rax, 5",
                "  push rax",
                "  lea rax, [f]",
                "  push rax",
                "  pop rax",
                "  call rax",
            ],
        );

        // The argument sits just above the return address.
        assert_lines(&text, &["  sub rsp, 8", "  mov rax, [rbp+16]", "  mov [rsp], rax"]);

        // The result replaces the argument and the caller's stack drops by
        // 16 + 8 - 8 bytes.
        assert_lines(
            &text,
            &[
                "  mov rax, [rsp]",
                "  mov [rbp+16], rax",
                "  mov rsp, rbp",
                "  add rsp, 16",
                "  mov rbp, rcx",
                "  push rdx",
                "  ret",
            ],
        );

        // The result is stored into the first local slot.
        assert_lines(&text, &["  mov rax, [rsp]", "  mov [rbp-16], rax", "  add rsp, 8"]);
    }

    #[test]
    fn field_reads_through_a_pointer() {
        let text = fasm(vec![
            type_def("Point", structure(vec![("x", u8_ty()), ("y", u64_ty())])),
            procedure(
                "read_y",
                vec![("p", pointer(named("Point")))],
                vec![u64_ty()],
                vec![ret(Some(field(ident("p"), "y")))],
            ),
            procedure(
                "read_x",
                vec![("p", pointer(named("Point")))],
                vec![u8_ty()],
                vec![ret(Some(field(ident("p"), "x")))],
            ),
            entry("start", vec![]),
        ]);

        assert_lines(
            &text,
            &["  pop rax", "  sub rsp, 8", "  mov rbx, [rax+1]", "  mov [rsp], rbx"],
        );
        assert_lines(
            &text,
            &["  pop rax", "  sub rsp, 1", "  mov bl, [rax]", "  mov [rsp], bl"],
        );
    }

    #[test]
    fn if_chain_uses_one_label_per_arm_and_one_end() {
        let text = fasm(vec![entry(
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

        let labels: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("__") && l.ends_with(':'))
            .collect();
        assert_eq!(labels, vec!["__0:", "__1:", "__2:", "__3:"]);

        assert_lines(&text, &["  cmp al, 1", "  jne __1"]);
        assert_lines(&text, &["  cmp al, 1", "  jne __2"]);
        assert_eq!(text.matches("  jmp __3\n").count(), 3);
    }

    #[test]
    fn while_and_break() {
        let text = fasm(vec![entry(
            "start",
            vec![while_loop(boolean(true), block(vec![brk()]))],
        )]);
        assert_lines(
            &text,
            &[
                "__0:",
                "  sub rsp, 1",
                "  mov byte [rsp], 1",
                "  movzx eax, byte [rsp]",
                "  add rsp, 1",
                "  cmp al, 1",
                "  jne __1",
                "  jmp __1",
                "  jmp __0",
                "__1:",
            ],
        );
    }

    #[test]
    fn strings_and_globals_get_their_own_segments() {
        let text = fasm(vec![
            global("counter", u64_ty()),
            entry(
                "start",
                vec![
                    assign(vec![ident("counter")], num(1)),
                    declare(vec![("s", Type::string())], Some(string("hi"))),
                ],
            ),
        ]);

        assert_lines(&text, &["  mov rax, [rsp]", "  mov [counter], rax", "  add rsp, 8"]);
        assert_lines(&text, &["  lea rax, [_0]", "  push rax"]);
        assert_lines(&text, &["segment readable", "_0: db 104, 105, 0"]);
        assert!(text.ends_with("segment readable writeable\ncounter: rb 8\n"));
    }

    #[test]
    fn syscall_arguments_go_to_registers() {
        let text = fasm(vec![entry(
            "start",
            vec![declare(
                vec![("r", uint_ty())],
                Some(call("@syscall2", vec![num(1), num(2), num(3)])),
            )],
        )]);
        assert_lines(&text, &["  pop rsi", "  pop rdi", "  pop rax", "  syscall", "  push rax"]);
    }

    #[test]
    fn narrow_arithmetic_and_comparison() {
        let text = fasm(vec![entry(
            "start",
            vec![
                declare(vec![("a", u8_ty())], Some(add(num(2), num(3)))),
                declare(
                    vec![("c", bool_ty())],
                    Some(binary(BinaryOperator::Less, ident("a"), num(4))),
                ),
            ],
        )]);
        assert_lines(
            &text,
            &[
                "  movzx ebx, byte [rsp]",
                "  add rsp, 1",
                "  movzx eax, byte [rsp]",
                "  add rsp, 1",
                "  add rax, rbx",
                "  sub rsp, 1",
                "  mov [rsp], al",
            ],
        );
        assert_lines(
            &text,
            &[
                "  xor rcx, rcx",
                "  mov rdx, 1",
                "  cmp rax, rbx",
                "  cmovb rcx, rdx",
                "  sub rsp, 1",
                "  mov [rsp], cl",
            ],
        );
    }

    #[test]
    fn float_modulus_is_unsupported() {
        let checked = check(program(vec![entry(
            "start",
            vec![declare(
                vec![("x", f64_ty())],
                Some(binary(BinaryOperator::Modulus, decimal(1.5), decimal(2.0))),
            )],
        )]));
        // The checker may already reject the operator.
        if let Ok(checked) = checked {
            let err = FasmContext::new(&checked).generate().unwrap_err();
            assert!(matches!(err.inner(), CodegenError::Unsupported(_)));
        }
    }

    #[test]
    fn enum_variants_come_before_items_and_after_locals() {
        let text = fasm(vec![
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
        assert_lines(&text, &["  mov rax, 1", "  push rax"]);
        assert!(!text.contains("[green]"), "{}", text);

        // The local `red` shadows the variant.
        assert!(!text.contains("  mov rax, 0\n  push rax"), "{}", text);
    }

    #[test]
    fn sizes_wanted_as_floats_push_float_bits() {
        let text = fasm(vec![entry(
            "start",
            vec![
                declare(vec![("s", f64_ty())], Some(size_of(u64_ty()))),
                declare(vec![("n", f64_ty())], Some(length_of(array(u8_ty(), Some(3))))),
            ],
        )]);
        let eight = format!("  mov rax, {}", 8.0f64.to_bits());
        let three = format!("  mov rax, {}", 3.0f64.to_bits());
        assert_lines(&text, &[eight.as_str(), "  push rax"]);
        assert_lines(&text, &[three.as_str(), "  push rax"]);
    }

    #[test]
    fn macro_invocations_generate_their_expansion() {
        let text = fasm(vec![
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
        assert_lines(
            &text,
            &["  mov rax, 21", "  push rax", "  mov rax, 21", "  push rax"],
        );
    }
}
