use std::path::Path;

use crate::compiler::ast::Program;

/// Serialization format of an AST document, chosen by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn of_path(path: &Path) -> crate::result::Result<Format> {
        let ext = path
            .extension()
            .and_then(|ex| ex.to_str())
            .map(|ex| ex.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(Format::Json),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some(ex) => Err(format!(
                "Is not an AST document, expected extension json, yaml or yml but got {}",
                ex
            )),
            None => Err(format!("{} has no extension, expected json, yaml or yml", path.display())),
        }
    }
}

pub fn parse_program(text: &str, format: Format) -> crate::result::Result<Program> {
    match format {
        Format::Json => serde_json::from_str(text).map_err(|e| format!("Invalid JSON AST: {}", e)),
        Format::Yaml => serde_yaml::from_str(text).map_err(|e| format!("Invalid YAML AST: {}", e)),
    }
}

pub fn serialize_program(program: &Program, format: Format) -> crate::result::Result<String> {
    match format {
        Format::Json => serde_json::to_string_pretty(program).map_err(|e| format!("{}", e)),
        Format::Yaml => serde_yaml::to_string(program).map_err(|e| format!("{}", e)),
    }
}

pub fn read_program(path: &Path) -> crate::result::Result<Program> {
    let format = Format::of_path(path)?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Could not read {}: {}", path.display(), e))?;
    parse_program(&text, format)
}

/// Writes to `path`, or to stdout when there is none.
pub fn write_output(path: Option<&Path>, text: &str) -> crate::result::Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| format!("Could not write {}: {}", path.display(), e)),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::builder::*;

    #[test]
    fn format_from_extension() {
        for (path, expected) in vec![
            ("prog.json", Ok(Format::Json)),
            ("prog.YAML", Ok(Format::Yaml)),
            ("dir/prog.yml", Ok(Format::Yaml)),
        ] {
            assert_eq!(Format::of_path(Path::new(path)), expected, "{}", path);
        }
        assert!(Format::of_path(Path::new("prog.stk")).is_err());
        assert!(Format::of_path(Path::new("prog")).is_err());
    }

    #[test]
    fn documents_in_both_formats() {
        let source = program(vec![
            global("counter", u64_ty()),
            entry("start", vec![declare(vec![("x", u64_ty())], Some(num(3)))]),
        ]);
        for format in vec![Format::Json, Format::Yaml] {
            let text = serialize_program(&source, format).unwrap();
            assert_eq!(parse_program(&text, format).unwrap(), source);
        }
    }

    #[test]
    fn hand_written_yaml() {
        let text = "
files:
  - path: main.stk
    items:
      - kind:
          global:
            name: counter
            ty:
              primitive: u64
";
        let program = parse_program(text, Format::Yaml).unwrap();
        assert_eq!(program.files[0].path, "main.stk");
        assert_eq!(program.files[0].items[0].name(), "counter");
        assert!(parse_program("files: 3", Format::Yaml).is_err());
    }
}
