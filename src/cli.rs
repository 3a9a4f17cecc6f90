//! Command-line entrypoint for kiln.
//!
//! Parses the command, loads the compilation unit and target config, lowers the
//! unit and writes the listing (or JSON IR) next to it.

use crate::build::{CompiledUnit, compile_unit};
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::compiler_messages::display_messages::{print_compiler_errors, print_formatted_error};
use crate::il::metadata::CompilationUnit;
use crate::settings::{CONFIG_FILE_NAME, LISTING_FILE_EXTENSION, TargetConfig, UNIT_FILE_EXTENSION};
use saying::say;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Compile {
        unit: String,
        options: CompileOptions,
    },

    Help,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CompileOptions {
    /// Explicit target config, otherwise `kiln.toml` in the working directory if there is one
    config: Option<String>,

    /// Where to write the output, otherwise next to the unit
    output: Option<String>,

    /// Write the IR as JSON instead of an assembly listing
    json: bool,
}

pub fn start_cli() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help(false);
        return;
    }

    let command = match get_command(&args[1..]) {
        Ok(command) => command,
        Err(e) => {
            say!(Red e);
            print_help(true);
            return;
        }
    };

    match command {
        Command::Help => print_help(false),

        Command::Compile { unit, options } => {
            let start = Instant::now();
            match run_compile(&unit, &options) {
                Ok(compiled) => {
                    if !compiled.failures.is_empty() {
                        say!(Yellow "\n", Bright Yellow { compiled.failures.len() }, " method(s) couldn't be lowered:");
                        print_compiler_errors(compiled.failures.to_owned());
                    }
                    say!(
                        "\nLowered ", Bold { compiled.methods.len() }, " method(s) in ",
                        Green #start.elapsed()
                    );
                    if compiled.has_fatal_failures() {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    print_formatted_error(e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn get_command(args: &[String]) -> Result<Command, String> {
    match args.first().map(String::as_str) {
        Some("help") | Some("--help") | Some("-h") => Ok(Command::Help),
        Some("compile") => parse_compile_command(args),
        Some(other) => Err(format!("Invalid command: '{other}'")),
        None => Ok(Command::Help),
    }
}

fn parse_compile_command(args: &[String]) -> Result<Command, String> {
    let mut unit = String::new();
    let mut options = CompileOptions::default();
    let mut index = 1usize;

    while let Some(arg) = args.get(index) {
        match arg.as_str() {
            "--config" | "--out" => {
                let Some(value) = args.get(index + 1) else {
                    return Err(format!("Missing value for {arg}"));
                };
                if value.starts_with("--") {
                    return Err(format!("Missing value for {arg}"));
                }
                if arg == "--config" {
                    options.config = Some(value.to_owned());
                } else {
                    options.output = Some(value.to_owned());
                }
                index += 2;
            }
            "--json" => {
                options.json = true;
                index += 1;
            }
            _ if arg.starts_with("--") => {
                return Err(format!(
                    "Unknown compile flag: '{arg}'. Supported flags are --config, --out, --json."
                ));
            }
            _ => {
                if unit.is_empty() {
                    unit = arg.to_owned();
                    index += 1;
                } else {
                    return Err(String::from("Compile accepts exactly one unit file."));
                }
            }
        }
    }

    if unit.is_empty() {
        return Err(format!("Missing the .{UNIT_FILE_EXTENSION} compilation unit to compile"));
    }

    Ok(Command::Compile { unit, options })
}

fn run_compile(unit_path: &str, options: &CompileOptions) -> Result<CompiledUnit, CompilerError> {
    let unit_path = Path::new(unit_path);
    let source = std::fs::read_to_string(unit_path)
        .map_err(|e| CompilerError::file_error(unit_path, format!("Couldn't read unit: {e}")))?;
    let unit = CompilationUnit::from_json(&source)?;

    let config_path = match &options.config {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = PathBuf::from(CONFIG_FILE_NAME);
            default.exists().then_some(default)
        }
    };
    let config = TargetConfig::load(config_path.as_deref())?;

    let compiled = compile_unit(&unit, &config)?;

    let (contents, extension) = if options.json {
        (compiled.to_json()?, "json")
    } else {
        (compiled.to_string(), LISTING_FILE_EXTENSION)
    };
    let output = output_path(unit_path, options.output.as_deref(), extension);

    std::fs::write(&output, contents)
        .map_err(|e| CompilerError::file_error(&output, format!("Couldn't write output: {e}")))?;
    say!(Bright Black "Wrote ", #output);

    Ok(compiled)
}

/// `--out` if given, else the unit path with the output extension.
/// A JSON output never overwrites the unit it came from.
fn output_path(unit_path: &Path, output: Option<&str>, extension: &str) -> PathBuf {
    if let Some(output) = output {
        return PathBuf::from(output);
    }

    if extension == UNIT_FILE_EXTENSION {
        let stem = unit_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        return unit_path.with_file_name(format!("{stem}.ir.{extension}"));
    }

    unit_path.with_extension(extension)
}

fn print_help(commands_only: bool) {
    if !commands_only {
        say!(Bright Black "------------------------------------");
        say!(Green Bold "kiln - x86 backend for stack bytecode");
        say!("Usage: ", Bold "<command>", Italic " <args>");
    }
    say!(Green Bold "\nCommands:");
    say!("  compile <unit.json>   - Lowers every method in a compilation unit");
    say!("  help                  - Shows this message");

    say!(Green Bold "\nCompile flags:");
    say!("  --config <path>   (default: ", CONFIG_FILE_NAME, " if present)");
    say!("  --out <path>      (default: next to the unit)");
    say!("  --json            Write the IR as JSON instead of a listing");
}

#[cfg(test)]
#[path = "tests/cli_tests.rs"]
mod tests;
