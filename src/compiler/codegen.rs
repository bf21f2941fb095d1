//! Entry point shared by the code generators: the stage's error type, the
//! choice of backend, and the checks both backends make on the program
//! before lowering it.

use log::debug;

use super::{
    ast::{Expression, Procedure, Type},
    error::{CompilerError, CompilerErrorDisplay, ErrorKind},
    memory::LayoutError,
    qbe::QbeContext,
    semantics::CheckedProgram,
    source::Location,
    x86::FasmContext,
};

#[derive(Clone, Debug, PartialEq)]
pub enum CodegenError {
    NoEntryProcedure,
    MultipleEntryProcedures(Vec<String>),
    ReservedSymbol(String),
    MissingAnnotation(&'static str),
    Unsupported(String),
    Layout(LayoutError),
}

impl CompilerErrorDisplay for CodegenError {
    fn format(&self) -> String {
        match self {
            CodegenError::NoEntryProcedure => "No procedure is marked as the entry point".into(),
            CodegenError::MultipleEntryProcedures(names) => format!(
                "Only one entry procedure is allowed, found: {}",
                names.join(", ")
            ),
            CodegenError::ReservedSymbol(name) => {
                format!("{} is reserved by the selected backend", name)
            }
            CodegenError::MissingAnnotation(what) => {
                format!("Missing type annotation on {}, was the program checked?", what)
            }
            CodegenError::Unsupported(what) => format!("{} is not supported", what),
            CodegenError::Layout(e) => e.format(),
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            CodegenError::NoEntryProcedure => ErrorKind::UnresolvedSymbol,
            CodegenError::MultipleEntryProcedures(_)
            | CodegenError::ReservedSymbol(_)
            | CodegenError::MissingAnnotation(_)
            | CodegenError::Unsupported(_) => ErrorKind::Unsupported,
            CodegenError::Layout(e) => e.kind(),
        }
    }
}

impl From<LayoutError> for CodegenError {
    fn from(e: LayoutError) -> Self {
        CodegenError::Layout(e)
    }
}

pub type CodegenResult<T> = std::result::Result<T, CompilerError<CodegenError>>;

pub(crate) fn err<T>(location: &Location, e: CodegenError) -> CodegenResult<T> {
    Err(CompilerError::new(location.clone(), e))
}

/// Unwraps something the checker guarantees, reporting `e` when it is absent.
pub(crate) fn required<T>(value: Option<T>, location: &Location, e: impl FnOnce() -> CodegenError) -> CodegenResult<T> {
    match value {
        Some(v) => Ok(v),
        None => err(location, e()),
    }
}

/// The annotation the checker left on `expression`.
pub(crate) fn annotated<'a>(expression: &'a Expression, what: &'static str) -> CodegenResult<&'a Type> {
    match &expression.ty {
        Some(ty) => Ok(ty),
        None => err(&expression.location, CodegenError::MissingAnnotation(what)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Fasm,
    Qbe,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fasm" => Ok(Backend::Fasm),
            "qbe" => Ok(Backend::Qbe),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Fasm => f.write_str("fasm"),
            Backend::Qbe => f.write_str("qbe"),
        }
    }
}

/// Lowers a checked program to the text of the chosen backend.
pub fn generate(program: &CheckedProgram, backend: Backend) -> CodegenResult<String> {
    debug!("Generating {} output", backend);
    match backend {
        Backend::Fasm => FasmContext::new(program).generate(),
        Backend::Qbe => QbeContext::new(program).generate(),
    }
}

/// The single procedure marked as the entry point.
pub fn entry_procedure(program: &CheckedProgram) -> CodegenResult<&Procedure> {
    let entries: Vec<&Procedure> = program.program().procedures().filter(|p| p.entry).collect();
    match entries.as_slice() {
        [entry] => Ok(entry),
        [] => {
            let location = program
                .program()
                .files
                .first()
                .map(|f| Location::new(&f.path, 1, 1))
                .unwrap_or_default();
            err(&location, CodegenError::NoEntryProcedure)
        }
        [_, second, ..] => err(
            &second.body.location,
            CodegenError::MultipleEntryProcedures(entries.iter().map(|p| p.name.clone()).collect()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ast::builder::*, semantics::check};

    #[test]
    fn exactly_one_entry() {
        for (items, expected) in vec![
            (vec![entry("start", vec![])], Ok("start".to_string())),
            (
                vec![procedure("helper", vec![], vec![], vec![])],
                Err(CodegenError::NoEntryProcedure),
            ),
            (
                vec![entry("a", vec![]), entry("b", vec![])],
                Err(CodegenError::MultipleEntryProcedures(vec![
                    "a".into(),
                    "b".into(),
                ])),
            ),
        ] {
            let checked = check(program(items)).unwrap();
            let found = entry_procedure(&checked)
                .map(|p| p.name.clone())
                .map_err(|e| e.inner());
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn both_backends_require_an_entry() {
        let checked = check(program(vec![procedure("helper", vec![], vec![], vec![])])).unwrap();
        for backend in vec![Backend::Fasm, Backend::Qbe] {
            let err = generate(&checked, backend).unwrap_err();
            assert_eq!(err.inner_ref(), &CodegenError::NoEntryProcedure);
            assert_eq!(err.kind(), ErrorKind::UnresolvedSymbol);
        }
    }

    #[test]
    fn parse_backend() {
        assert_eq!("fasm".parse::<Backend>(), Ok(Backend::Fasm));
        assert_eq!("qbe".parse::<Backend>(), Ok(Backend::Qbe));
        assert!("llvm".parse::<Backend>().is_err());
    }

    /// Positions of `needles` in `text`, in the order given.
    fn positions(text: &str, needles: &[&str]) -> Vec<usize> {
        needles
            .iter()
            .map(|n| text.find(n).unwrap_or_else(|| panic!("{} not in:\n{}", n, text)))
            .collect()
    }

    #[test]
    fn both_backends_evaluate_arguments_left_to_right() {
        let value = |name: &str, n: u64| procedure(name, vec![], vec![u64_ty()], vec![ret(Some(num(n)))]);
        let checked = check(program(vec![
            value("a", 1),
            value("b", 2),
            value("c", 3),
            procedure(
                "f",
                vec![("x", u64_ty()), ("y", u64_ty()), ("z", u64_ty())],
                vec![],
                vec![],
            ),
            entry(
                "start",
                vec![expr_stmt(call(
                    "f",
                    vec![call("a", vec![]), call("b", vec![]), call("c", vec![])],
                ))],
            ),
        ]))
        .unwrap();

        for (backend, needles) in vec![
            (
                Backend::Fasm,
                vec!["lea rax, [a]", "lea rax, [b]", "lea rax, [c]", "lea rax, [f]"],
            ),
            (Backend::Qbe, vec!["copy $a", "copy $b", "copy $c", "copy $f"]),
        ] {
            let text = generate(&checked, backend).unwrap();
            let start = text
                .find(if backend == Backend::Fasm { "\nstart:" } else { "function $start(" })
                .unwrap_or_else(|| panic!("no entry procedure in:\n{}", text));
            let found = positions(&text[start..], &needles);
            let mut sorted = found.clone();
            sorted.sort_unstable();
            assert_eq!(found, sorted, "{} evaluated calls out of order", backend);
        }
    }
}
