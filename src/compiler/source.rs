use serde::{Deserialize, Serialize};

/// A position in an input file. Every node in the AST carries one so that
/// errors can point back at the source that caused them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl Location {
    pub fn new(file: &str, line: u32, column: u32) -> Location {
        Location {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_file_line_column() {
        for (loc, expected) in vec![
            (Location::new("main.stk", 3, 7), "main.stk:3:7"),
            (Location::default(), ":0:0"),
        ] {
            assert_eq!(loc.to_string(), expected);
        }
    }
}
