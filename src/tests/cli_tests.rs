//! Tests for compile command parsing and output placement.

use super::{Command, CompileOptions, get_command, output_path};
use std::path::{Path, PathBuf};

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn compile_command_uses_default_options() {
    let command = get_command(&args(&["compile", "unit.json"])).expect("command should parse");
    assert_eq!(
        command,
        Command::Compile {
            unit: String::from("unit.json"),
            options: CompileOptions::default(),
        }
    );
}

#[test]
fn compile_command_parses_config_out_and_json() {
    let command = get_command(&args(&[
        "compile",
        "unit.json",
        "--config",
        "target.toml",
        "--out",
        "build/unit.json",
        "--json",
    ]))
    .expect("command should parse");

    assert_eq!(
        command,
        Command::Compile {
            unit: String::from("unit.json"),
            options: CompileOptions {
                config: Some(String::from("target.toml")),
                output: Some(String::from("build/unit.json")),
                json: true,
            },
        }
    );
}

#[test]
fn compile_command_rejects_missing_flag_value() {
    let error = get_command(&args(&["compile", "unit.json", "--config"])).expect_err("should fail");
    assert!(error.contains("--config"));

    let error = get_command(&args(&["compile", "unit.json", "--out", "--json"])).expect_err("should fail");
    assert!(error.contains("--out"));
}

#[test]
fn compile_command_needs_exactly_one_unit() {
    assert!(get_command(&args(&["compile"])).is_err());
    assert!(get_command(&args(&["compile", "a.json", "b.json"])).is_err());
}

#[test]
fn unknown_commands_and_flags_are_errors() {
    assert!(get_command(&args(&["link", "unit.json"])).is_err());
    assert!(get_command(&args(&["compile", "unit.json", "--fast"])).is_err());
    assert_eq!(get_command(&args(&["help"])), Ok(Command::Help));
}

#[test]
fn listing_lands_next_to_the_unit() {
    let path = output_path(Path::new("out/program.json"), None, "asm");
    assert_eq!(path, PathBuf::from("out/program.asm"));
}

#[test]
fn json_output_never_overwrites_the_unit() {
    let path = output_path(Path::new("out/program.json"), None, "json");
    assert_eq!(path, PathBuf::from("out/program.ir.json"));

    let path = output_path(Path::new("out/program.json"), Some("elsewhere.json"), "json");
    assert_eq!(path, PathBuf::from("elsewhere.json"));
}
