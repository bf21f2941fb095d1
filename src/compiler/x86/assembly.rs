use std::fmt::*;

/*
Instruction model for the fasm output.

Registers are chosen as a 64 bit register plus an access width, so a value
of any scalar size can be moved through the same register family:
```
Register::new(Reg64::Rax, Width::Byte)  => al
Register::new(Reg64::Rbx, Width::Dword) => ebx
```

Memory operands are a base plus a signed displacement:
```
Address::reg(Reg64::Rbp, -16)      => [rbp-16]
Address::label("name", 8)          => [name+8]
Address::indexed(Reg64::Rax, Reg64::Rcx, 4) => [rax+rcx+4]
```

A size hint is only written when neither operand is a register, which is
the one case fasm cannot infer it. `movzx` and the unary forms always
carry it:
```
mov byte [rsp], 1
mov [rsp+8], rax
movzx eax, word [rsp]
```
*/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg64 {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rsp,
    Rbp,
    R8,
    R9,
    R10,
}

impl Display for Reg64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        use Reg64::*;
        let name = match self {
            Rax => "rax",
            Rbx => "rbx",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            Rsp => "rsp",
            Rbp => "rbp",
            R8 => "r8",
            R9 => "r9",
            R10 => "r10",
        };
        f.write_str(name)
    }
}

/// Access width of a register or memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
    Qword,
}

impl Width {
    /// The width moving exactly `size` bytes, if there is one.
    pub fn of_size(size: u64) -> Option<Width> {
        match size {
            1 => Some(Width::Byte),
            2 => Some(Width::Word),
            4 => Some(Width::Dword),
            8 => Some(Width::Qword),
            _ => None,
        }
    }

    pub fn size(self) -> u64 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
            Width::Qword => 8,
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let name = match self {
            Width::Byte => "byte",
            Width::Word => "word",
            Width::Dword => "dword",
            Width::Qword => "qword",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    pub reg: Reg64,
    pub width: Width,
}

impl Register {
    pub fn new(reg: Reg64, width: Width) -> Register {
        Register { reg, width }
    }

    pub fn full(reg: Reg64) -> Register {
        Register::new(reg, Width::Qword)
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        use Reg64::*;
        use Width::*;
        let legacy = |base: &str, f: &mut Formatter<'_>| match self.width {
            Byte => write!(f, "{}l", base),
            Word => write!(f, "{}x", base),
            Dword => write!(f, "e{}x", base),
            Qword => write!(f, "r{}x", base),
        };
        let index = |base: &str, f: &mut Formatter<'_>| match self.width {
            Byte => write!(f, "{}l", base),
            Word => write!(f, "{}", base),
            Dword => write!(f, "e{}", base),
            Qword => write!(f, "r{}", base),
        };
        let numbered = |n: u8, f: &mut Formatter<'_>| match self.width {
            Byte => write!(f, "r{}b", n),
            Word => write!(f, "r{}w", n),
            Dword => write!(f, "r{}d", n),
            Qword => write!(f, "r{}", n),
        };
        match self.reg {
            Rax => legacy("a", f),
            Rbx => legacy("b", f),
            Rcx => legacy("c", f),
            Rdx => legacy("d", f),
            Rsi => index("si", f),
            Rdi => index("di", f),
            Rsp => index("sp", f),
            Rbp => index("bp", f),
            R8 => numbered(8, f),
            R9 => numbered(9, f),
            R10 => numbered(10, f),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Base {
    Reg(Reg64),
    Indexed(Reg64, Reg64),
    Label(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Address {
    pub base: Base,
    pub displacement: i64,
}

impl Address {
    pub fn reg(reg: Reg64, displacement: i64) -> Address {
        Address {
            base: Base::Reg(reg),
            displacement,
        }
    }

    pub fn indexed(base: Reg64, index: Reg64, displacement: i64) -> Address {
        Address {
            base: Base::Indexed(base, index),
            displacement,
        }
    }

    pub fn label(name: &str, displacement: i64) -> Address {
        Address {
            base: Base::Label(name.into()),
            displacement,
        }
    }

    /// The same address moved by `by` bytes.
    pub fn offset(&self, by: i64) -> Address {
        Address {
            base: self.base.clone(),
            displacement: self.displacement + by,
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str("[")?;
        match &self.base {
            Base::Reg(r) => write!(f, "{}", r)?,
            Base::Indexed(b, i) => write!(f, "{}+{}", b, i)?,
            Base::Label(l) => f.write_str(l)?,
        }
        if self.displacement < 0 {
            write!(f, "-{}", -self.displacement)?;
        } else if self.displacement > 0 {
            write!(f, "+{}", self.displacement)?;
        }
        f.write_str("]")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Register(Register),
    Xmm(u8),
    Immediate(u64),
    Memory(Width, Address),
    Label(String),
}

impl Operand {
    pub fn reg(reg: Reg64) -> Operand {
        Operand::Register(Register::full(reg))
    }

    pub fn sized(reg: Reg64, width: Width) -> Operand {
        Operand::Register(Register::new(reg, width))
    }

    pub fn mem(width: Width, address: Address) -> Operand {
        Operand::Memory(width, address)
    }

    fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_) | Operand::Xmm(_))
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Operand::Register(r) => write!(f, "{}", r),
            Operand::Xmm(n) => write!(f, "xmm{}", n),
            Operand::Immediate(v) => write!(f, "{}", v),
            Operand::Memory(_, a) => write!(f, "{}", a),
            Operand::Label(l) => f.write_str(l),
        }
    }
}

/// Writes `a, b`, adding the size hint of the memory operand when the other
/// operand does not fix the size.
fn pair(f: &mut Formatter<'_>, a: &Operand, b: &Operand) -> Result {
    let hinted = |o: &Operand, other: &Operand, f: &mut Formatter<'_>| match o {
        Operand::Memory(w, addr) if !other.is_register() => write!(f, "{} {}", w, addr),
        _ => write!(f, "{}", o),
    };
    hinted(a, b, f)?;
    f.write_str(", ")?;
    hinted(b, a, f)
}

/// Unary memory operands always carry their size.
fn single(f: &mut Formatter<'_>, a: &Operand) -> Result {
    match a {
        Operand::Memory(w, addr) => write!(f, "{} {}", w, addr),
        _ => write!(f, "{}", a),
    }
}

/// Unsigned condition codes, which also apply after `ucomisd`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    E,
    Ne,
    A,
    Ae,
    B,
    Be,
}

impl Display for Cond {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let name = match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::A => "a",
            Cond::Ae => "ae",
            Cond::B => "b",
            Cond::Be => "be",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    Comment(String),
    Format(String),
    Segment(String),
    Label(String),
    /// Zero terminated bytes.
    DataBytes(String, Vec<u8>),
    /// Uninitialized storage of the given size.
    Reserve(String, u64),

    Jmp(String),
    Jcc(Cond, String),
    Call(Operand),
    Ret,
    Syscall,

    Push(Operand),
    Pop(Operand),
    Mov(Operand, Operand),
    Movzx(Operand, Operand),
    Lea(Operand, Address),
    Cmov(Cond, Operand, Operand),

    Add(Operand, Operand),
    Sub(Operand, Operand),
    Mul(Operand),
    Div(Operand),
    Cmp(Operand, Operand),
    And(Operand, Operand),
    Or(Operand, Operand),
    Xor(Operand, Operand),

    Movsd(Operand, Operand),
    Addsd(Operand, Operand),
    Subsd(Operand, Operand),
    Mulsd(Operand, Operand),
    Divsd(Operand, Operand),
    Ucomisd(Operand, Operand),
    Cvttsd2si(Operand, Operand),
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        use Inst::*;
        match self {
            Format(_) | Segment(_) | Label(_) | DataBytes(..) | Reserve(..) => (),
            _ => f.write_str("  ")?,
        }

        match self {
            Comment(comment) => write!(f, "; {}", comment),
            Format(format) => write!(f, "format {}", format),
            Segment(segment) => write!(f, "segment {}", segment),
            Label(lbl) => write!(f, "{}:", lbl),
            DataBytes(lbl, bytes) => {
                write!(f, "{}: db ", lbl)?;
                for b in bytes {
                    write!(f, "{}, ", b)?;
                }
                f.write_str("0")
            }
            Reserve(lbl, size) => write!(f, "{}: rb {}", lbl, size),

            Jmp(lbl) => write!(f, "jmp {}", lbl),
            Jcc(cond, lbl) => write!(f, "j{} {}", cond, lbl),
            Call(a) => write!(f, "call {}", a),
            Ret => f.write_str("ret"),
            Syscall => f.write_str("syscall"),

            Push(a) => write!(f, "push {}", a),
            Pop(a) => write!(f, "pop {}", a),
            Mov(a, b) => {
                f.write_str("mov ")?;
                pair(f, a, b)
            }
            Movzx(a, b) => {
                write!(f, "movzx {}, ", a)?;
                single(f, b)
            }
            Lea(a, addr) => write!(f, "lea {}, {}", a, addr),
            Cmov(cond, a, b) => {
                write!(f, "cmov{} ", cond)?;
                pair(f, a, b)
            }

            Add(a, b) => {
                f.write_str("add ")?;
                pair(f, a, b)
            }
            Sub(a, b) => {
                f.write_str("sub ")?;
                pair(f, a, b)
            }
            Mul(a) => {
                f.write_str("mul ")?;
                single(f, a)
            }
            Div(a) => {
                f.write_str("div ")?;
                single(f, a)
            }
            Cmp(a, b) => {
                f.write_str("cmp ")?;
                pair(f, a, b)
            }
            And(a, b) => {
                f.write_str("and ")?;
                pair(f, a, b)
            }
            Or(a, b) => {
                f.write_str("or ")?;
                pair(f, a, b)
            }
            Xor(a, b) => {
                f.write_str("xor ")?;
                pair(f, a, b)
            }

            Movsd(a, b) => write!(f, "movsd {}, {}", a, b),
            Addsd(a, b) => write!(f, "addsd {}, {}", a, b),
            Subsd(a, b) => write!(f, "subsd {}, {}", a, b),
            Mulsd(a, b) => write!(f, "mulsd {}, {}", a, b),
            Divsd(a, b) => write!(f, "divsd {}, {}", a, b),
            Ucomisd(a, b) => write!(f, "ucomisd {}, {}", a, b),
            Cvttsd2si(a, b) => write!(f, "cvttsd2si {}, {}", a, b),
        }
    }
}
