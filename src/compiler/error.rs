use super::source::Location;

/// Broad category of a compiler error. Every stage specific error maps onto
/// exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    UnresolvedSymbol,
    TypeMismatch,
    Arity,
    Unsupported,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UnresolvedSymbol => "unresolved-symbol",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::Arity => "arity",
            ErrorKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Represents all errors that are generated from within the Compiler
/// module and its submodules.
///
/// This type captures the metadata which is present for all errors caused by
/// input source code, the location of the offending node, and formats it
/// together with the stage specific inner error.
#[derive(Clone, Debug, PartialEq)]
pub struct CompilerError<IE: CompilerErrorDisplay> {
    location: Location,
    inner: IE,
}

impl<IE> CompilerError<IE>
where
    IE: CompilerErrorDisplay,
{
    pub fn new(location: Location, inner: IE) -> Self {
        CompilerError { location, inner }
    }

    pub fn inner(self) -> IE {
        self.inner
    }

    pub fn inner_ref(&self) -> &IE {
        &self.inner
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind()
    }
}

impl<IE> CompilerErrorDisplay for CompilerError<IE>
where
    IE: CompilerErrorDisplay,
{
    fn format(&self) -> String {
        format!("{}: {}", self.location, self.inner.format())
    }

    fn kind(&self) -> ErrorKind {
        self.inner.kind()
    }
}

impl<IE> std::fmt::Display for CompilerError<IE>
where
    IE: CompilerErrorDisplay,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&CompilerErrorDisplay::format(self))
    }
}

pub trait CompilerErrorDisplay {
    fn format(&self) -> String;
    fn kind(&self) -> ErrorKind;
}

/// Attaches a source location to a stage error that was produced without one,
/// converting it into the caller's error type along the way.
pub trait AtLocation<T, E> {
    fn at<IE>(self, location: &Location) -> Result<T, CompilerError<IE>>
    where
        IE: CompilerErrorDisplay + From<E>;
}

impl<T, E> AtLocation<T, E> for Result<T, E> {
    fn at<IE>(self, location: &Location) -> Result<T, CompilerError<IE>>
    where
        IE: CompilerErrorDisplay + From<E>,
    {
        self.map_err(|e| CompilerError::new(location.clone(), IE::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Boom;

    impl CompilerErrorDisplay for Boom {
        fn format(&self) -> String {
            "boom".into()
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Unsupported
        }
    }

    #[test]
    fn display_prefixes_location() {
        let err = CompilerError::new(Location::new("a.stk", 2, 4), Boom);
        assert_eq!(err.to_string(), "a.stk:2:4: boom");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn at_wraps_plain_errors() {
        impl From<&'static str> for Boom {
            fn from(_: &'static str) -> Self {
                Boom
            }
        }

        let r: Result<(), &'static str> = Err("x");
        let err = r.at::<Boom>(&Location::new("b.stk", 1, 1)).unwrap_err();
        assert_eq!(err.location(), &Location::new("b.stk", 1, 1));
        assert_eq!(err.inner(), Boom);
    }
}
