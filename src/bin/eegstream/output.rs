use crate::exit_codes;
use serde::Serialize;
use std::io::Write;

/// Print `value` as JSON on stdout and return the exit code
pub fn print_json<T: Serialize>(value: &T, compact: bool) -> i32 {
    let rendered = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    let json = match rendered {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: cannot encode JSON output: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let mut stdout = std::io::stdout().lock();
    match writeln!(stdout, "{}", json) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: cannot write to stdout: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
