use std::fmt::*;

/*
Text model of the QBE intermediate language, as much of it as the
generator needs.

Every value the generator creates is a numbered temporary, written `%.N`.
Parameters and a few fixed temporaries have names instead:
```
Value::Temp(3)          => %.3
Value::Named("a0")      => %.a0
Value::Global("buffer") => $buffer
```

Instructions print indented, labels and definitions do not:
```
@start
  %.4 =l add %.0, 8
  storeb %.5, %.4
```
*/

/// Base classes of QBE values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    L,
    W,
    D,
}

impl Class {
    /// Scalars of 8 bytes live in `l` temporaries, narrower ones in `w`.
    pub fn of_width(width: u64) -> Class {
        if width == 8 {
            Class::L
        } else {
            Class::W
        }
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Class::L => f.write_str("l"),
            Class::W => f.write_str("w"),
            Class::D => f.write_str("d"),
        }
    }
}

/// The type a function returns or a call produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiTy {
    Base(Class),
    /// An opaque aggregate of the given size, declared as `type :.N`.
    Aggregate(u64),
}

impl Display for AbiTy {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            AbiTy::Base(c) => write!(f, "{}", c),
            AbiTy::Aggregate(size) => write!(f, ":.{}", size),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Temp(usize),
    Named(String),
    Global(String),
    Const(u64),
}

impl Value {
    pub fn named(name: &str) -> Value {
        Value::Named(name.into())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Value::Temp(id) => write!(f, "%.{}", id),
            Value::Named(name) => write!(f, "%.{}", name),
            Value::Global(name) => write!(f, "${}", name),
            // QBE reads integer constants as signed 64 bit numbers.
            Value::Const(v) => write!(f, "{}", *v as i64),
        }
    }
}

/// Store mnemonic for a chunk of `width` bytes.
pub fn store_op(width: u64) -> &'static str {
    match width {
        8 => "storel",
        4 => "storew",
        2 => "storeh",
        _ => "storeb",
    }
}

/// Zero extending load mnemonic for a chunk of `width` bytes.
pub fn load_op(width: u64) -> &'static str {
    match width {
        8 => "loadl",
        4 => "loaduw",
        2 => "loaduh",
        _ => "loadub",
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    Label(String),
    /// `%.t =c op a, b`
    Assign(Value, Class, &'static str, Vec<Value>),
    /// `storeX value, address`
    Store(&'static str, Value, Value),
    Call {
        result: Option<(Value, AbiTy)>,
        callee: Value,
        arguments: Vec<(Class, Value)>,
    },
    Jmp(String),
    Jnz(Value, String, String),
    Ret(Option<Value>),
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Inst::Label(lbl) => write!(f, "@{}", lbl),
            Inst::Assign(dest, class, op, operands) => {
                write!(f, "  {} ={} {}", dest, class, op)?;
                for (i, o) in operands.iter().enumerate() {
                    f.write_str(if i == 0 { " " } else { ", " })?;
                    write!(f, "{}", o)?;
                }
                Ok(())
            }
            Inst::Store(op, value, address) => write!(f, "  {} {}, {}", op, value, address),
            Inst::Call {
                result,
                callee,
                arguments,
            } => {
                f.write_str("  ")?;
                if let Some((dest, ty)) = result {
                    write!(f, "{} ={} ", dest, ty)?;
                }
                write!(f, "call {}(", callee)?;
                for (i, (class, value)) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", class, value)?;
                }
                f.write_str(")")
            }
            Inst::Jmp(lbl) => write!(f, "  jmp @{}", lbl),
            Inst::Jnz(cond, then, otherwise) => write!(f, "  jnz {}, @{}, @{}", cond, then, otherwise),
            Inst::Ret(Some(v)) => write!(f, "  ret {}", v),
            Inst::Ret(None) => f.write_str("  ret"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataItem {
    Byte(u8),
    Zero(u64),
}

impl Display for DataItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DataItem::Byte(b) => write!(f, "b {}", b),
            DataItem::Zero(n) => write!(f, "z {}", n),
        }
    }
}

/// Top level definitions, in the order they are written out.
#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    /// `type :.N = { b N }`
    Aggregate(u64),
    Function {
        name: String,
        returns: Option<AbiTy>,
        parameters: Vec<(Class, Value)>,
        body: Vec<Inst>,
    },
    Data(String, Vec<DataItem>),
}

impl Display for Definition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Definition::Aggregate(size) => write!(f, "type :.{} = {{ b {} }}", size, size),
            Definition::Function {
                name,
                returns,
                parameters,
                body,
            } => {
                f.write_str("export function ")?;
                if let Some(ty) = returns {
                    write!(f, "{} ", ty)?;
                }
                write!(f, "${}(", name)?;
                for (i, (class, value)) in parameters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", class, value)?;
                }
                f.write_str(") {\n@start\n")?;
                for inst in body {
                    writeln!(f, "{}", inst)?;
                }
                f.write_str("}")
            }
            Definition::Data(name, items) => {
                write!(f, "data ${} = {{ ", name)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(" }")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values() {
        for (value, expected) in vec![
            (Value::Temp(3), "%.3"),
            (Value::named("a0"), "%.a0"),
            (Value::Global("buffer".into()), "$buffer"),
            (Value::Const(255), "255"),
            (Value::Const(u64::MAX), "-1"),
        ] {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn instructions() {
        for (inst, expected) in vec![
            (
                Inst::Assign(Value::Temp(4), Class::L, "add", vec![Value::Temp(0), Value::Const(8)]),
                "  %.4 =l add %.0, 8",
            ),
            (
                Inst::Assign(Value::Temp(2), Class::L, "alloc8", vec![Value::Const(16)]),
                "  %.2 =l alloc8 16",
            ),
            (
                Inst::Store(store_op(1), Value::Temp(5), Value::Temp(4)),
                "  storeb %.5, %.4",
            ),
            (
                Inst::Call {
                    result: Some((Value::Temp(7), AbiTy::Aggregate(8))),
                    callee: Value::Temp(6),
                    arguments: vec![(Class::L, Value::Temp(1)), (Class::W, Value::Temp(2))],
                },
                "  %.7 =:.8 call %.6(l %.1, w %.2)",
            ),
            (
                Inst::Call {
                    result: None,
                    callee: Value::Global("f".into()),
                    arguments: vec![],
                },
                "  call $f()",
            ),
            (
                Inst::Jnz(Value::Temp(1), "__0".into(), "__1".into()),
                "  jnz %.1, @__0, @__1",
            ),
            (Inst::Ret(Some(Value::named("r"))), "  ret %.r"),
            (Inst::Label("__2".into()), "@__2"),
        ] {
            assert_eq!(inst.to_string(), expected);
        }
    }

    #[test]
    fn definitions() {
        assert_eq!(Definition::Aggregate(8).to_string(), "type :.8 = { b 8 }");
        assert_eq!(
            Definition::Data("__0".into(), vec![DataItem::Byte(104), DataItem::Byte(0)]).to_string(),
            "data $__0 = { b 104, b 0 }"
        );
        assert_eq!(
            Definition::Data("counter".into(), vec![DataItem::Zero(8)]).to_string(),
            "data $counter = { z 8 }"
        );
        assert_eq!(
            Definition::Function {
                name: "f".into(),
                returns: Some(AbiTy::Aggregate(8)),
                parameters: vec![(Class::L, Value::named("a0"))],
                body: vec![Inst::Ret(None)],
            }
            .to_string(),
            "export function :.8 $f(l %.a0) {\n@start\n  ret\n}"
        );
    }
}
