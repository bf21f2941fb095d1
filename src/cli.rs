use clap::{App, Arg, ArgMatches};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use crate::{
    compiler::{codegen::Backend, CompilerError, CompilerErrorDisplay},
    diagnostics::{config::TracingConfig, JsonDiagnostic},
};

// Exit Codes for different types of errors
pub const ERR_INPUT: i32 = 1;
pub const ERR_TYPE_CHECK: i32 = 2;
pub const ERR_CODEGEN: i32 = 3;
pub const ERR_OUTPUT: i32 = 4;

/// What the compiler writes to the output file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Emit {
    /// Backend text: fasm assembly or QBE IL.
    Asm,
    /// The input AST with the checker's annotations, in the input's format.
    CheckedAst,
}

pub fn configure_cli() -> clap::App<'static, 'static> {
    let app = App::new("Stack Compiler")
        .version("0.1.0")
        .about("Type checks a stack language program and compiles it to fasm assembly or QBE IL")
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .takes_value(true)
                .required(true)
                .help("The program to compile, as a JSON or YAML AST document (.json, .yaml, .yml)"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("File the output is written to. Defaults to stdout"),
        )
        .arg(
            Arg::with_name("backend")
                .short("b")
                .long("backend")
                .possible_values(&["fasm", "qbe"])
                .default_value("fasm")
                .takes_value(true)
                .help("fasm emits x86-64 assembly for Linux, qbe emits QBE intermediate language"),
        )
        .arg(
            Arg::with_name("emit")
                .long("emit")
                .possible_values(&["asm", "checked-ast"])
                .default_value("asm")
                .takes_value(true)
                .help("Write the backend output, or stop after type checking and write the annotated AST"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .possible_values(&["off", "error", "warn", "info", "debug", "trace"])
                .takes_value(true)
                .help("Logging level of the compiler, logs are written to the terminal"),
        )
        .arg(
            Arg::with_name("trace-type-checker")
                .long("trace-type-checker")
                .takes_value(true)
                .help("Traces every step of the type checker on the given lines: all, off, N, A..B, ..B or A..
                Requires --log-level trace.")
        )
        .arg(
            Arg::with_name("json-errors")
                .long("json-errors")
                .help("Print errors as JSON objects instead of file:line:column: message"),
        );
    app
}

pub fn get_log_level(args: &ArgMatches) -> Option<LevelFilter> {
    match args.value_of("log-level") {
        Some("off") => Some(LevelFilter::Off),
        Some("error") => Some(LevelFilter::Error),
        Some("warn") => Some(LevelFilter::Warn),
        Some("info") => Some(LevelFilter::Info),
        Some("debug") => Some(LevelFilter::Debug),
        Some("trace") => Some(LevelFilter::Trace),
        _ => None,
    }
}

pub fn configure_logging(level: LevelFilter) -> crate::result::Result<()> {
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .map_err(|e| format!("Failed to configure logger: {}", e))
}

pub fn get_backend(args: &ArgMatches) -> crate::result::Result<Backend> {
    args.value_of("backend").unwrap_or("fasm").parse()
}

pub fn get_emit(args: &ArgMatches) -> crate::result::Result<Emit> {
    match args.value_of("emit") {
        None | Some("asm") => Ok(Emit::Asm),
        Some("checked-ast") => Ok(Emit::CheckedAst),
        Some(other) => Err(format!("Unknown emit option: {}", other)),
    }
}

pub fn get_tracing(args: &ArgMatches) -> crate::result::Result<TracingConfig> {
    match args.value_of("trace-type-checker") {
        None => Ok(TracingConfig::Off),
        Some(range) => range.parse(),
    }
}

pub fn use_json_errors(args: &ArgMatches) -> bool {
    args.is_present("json-errors")
}

/// Prints a compiler error to stderr, as `file:line:column: message` or as
/// a JSON object.
pub fn print_errs<IE: CompilerErrorDisplay>(err: &CompilerError<IE>, json: bool) {
    if json {
        match JsonDiagnostic::from_error(err).to_json() {
            Ok(text) => eprintln!("{}", text),
            Err(msg) => eprintln!("{} (could not write JSON: {})", err, msg),
        }
    } else {
        eprintln!("{}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = configure_cli().get_matches_from(vec!["stackc", "-i", "prog.json"]);
        assert_eq!(get_backend(&args), Ok(Backend::Fasm));
        assert_eq!(get_emit(&args), Ok(Emit::Asm));
        assert_eq!(get_tracing(&args), Ok(TracingConfig::Off));
        assert_eq!(get_log_level(&args), None);
        assert!(!use_json_errors(&args));
    }

    #[test]
    fn options() {
        let args = configure_cli().get_matches_from(vec![
            "stackc",
            "-i",
            "prog.yaml",
            "-b",
            "qbe",
            "--emit",
            "checked-ast",
            "--log-level",
            "debug",
            "--trace-type-checker",
            "3..9",
            "--json-errors",
        ]);
        assert_eq!(get_backend(&args), Ok(Backend::Qbe));
        assert_eq!(get_emit(&args), Ok(Emit::CheckedAst));
        assert_eq!(get_tracing(&args), Ok(TracingConfig::Between(3, 9)));
        assert_eq!(get_log_level(&args), Some(LevelFilter::Debug));
        assert!(use_json_errors(&args));
    }
}
