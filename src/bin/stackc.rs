extern crate log;
extern crate simplelog;

use std::path::Path;
use std::process::exit;
use std::time::Instant;

use log::info;

use stackc::io::{serialize_program, Format};
use stackc::*;

fn main() {
    let config = configure_cli().get_matches();

    if let Some(level) = get_log_level(&config) {
        if let Err(msg) = configure_logging(level) {
            eprintln!("{}", msg);
        }
    }

    let json_errors = use_json_errors(&config);
    let (backend, emit, tracing) = match (get_backend(&config), get_emit(&config), get_tracing(&config)) {
        (Ok(backend), Ok(emit), Ok(tracing)) => (backend, emit, tracing),
        (Err(msg), _, _) | (_, Err(msg), _) | (_, _, Err(msg)) => {
            eprintln!("{}", msg);
            exit(ERR_INPUT)
        }
    };

    // clap enforces that the input is present
    let input = Path::new(config.value_of("input").unwrap_or_default());
    let output = config.value_of("output").map(Path::new);

    let read_time = Instant::now();
    let program = match read_program(input) {
        Ok(program) => program,
        Err(msg) => {
            eprintln!("{}", msg);
            exit(ERR_INPUT)
        }
    };
    eprintln!("Read: {}", read_time.elapsed().as_secs_f32());

    let check_time = Instant::now();
    let checked = match check_with_tracing(program, tracing) {
        Ok(checked) => checked,
        Err(err) => {
            info!("Type checking failed with {}", err.kind());
            print_errs(&err, json_errors);
            exit(ERR_TYPE_CHECK)
        }
    };
    eprintln!("Semantic: {}", check_time.elapsed().as_secs_f32());

    let text = match emit {
        Emit::CheckedAst => {
            let format = Format::of_path(input).unwrap_or(Format::Json);
            match serialize_program(checked.program(), format) {
                Ok(text) => text,
                Err(msg) => {
                    eprintln!("{}", msg);
                    exit(ERR_OUTPUT)
                }
            }
        }
        Emit::Asm => {
            let codegen_time = Instant::now();
            let text = match generate(&checked, backend) {
                Ok(text) => text,
                Err(err) => {
                    info!("Code generation failed with {}", err.kind());
                    print_errs(&err, json_errors);
                    exit(ERR_CODEGEN)
                }
            };
            eprintln!("{}: {}", backend, codegen_time.elapsed().as_secs_f32());
            text
        }
    };

    if let Err(msg) = write_output(output, &text) {
        eprintln!("{}", msg);
        exit(ERR_OUTPUT)
    }
}
