use crate::compiler_messages::compiler_errors::{CompilerError, ErrorMetaDataKey, ErrorType};
use saying::say;

pub fn print_compiler_errors(errors: Vec<CompilerError>) {
    for err in errors {
        print_formatted_error(err);
    }
}

pub fn print_formatted_error(e: CompilerError) {
    let location = e.location.to_string();

    match e.error_type {
        ErrorType::UnsupportedFeature => {
            say!("\n(ಠ_ಠ) ", Dark Magenta location);
            say!(Red "Unsupported Feature");
        }

        ErrorType::InvalidStackShape => {
            say!("\nヽ(˶°o°)ﾉ  🔥🔥🔥 ", Dark Magenta location, " 🔥🔥🔥  ╰(°□°╰) ");
            say!(Red "Invalid Stack Shape");
            say!(Dark Yellow "Either the bytecode was not verified or a handler produced the wrong descriptors");
        }

        ErrorType::Metadata => {
            say!("\n(╯°□°)╯  ", Dark Magenta location);
            say!(Red "Metadata");
        }

        ErrorType::Decode => {
            say!("\n(╯°□°)╯  🔥🔥 ", Dark Magenta location, " 🔥🔥  Σ(°△°;) ");
            say!(Red "Malformed Bytecode");
        }

        ErrorType::File => {
            say!(Yellow "🏚 Can't find/read file or directory: ", location);
            say!(e.msg);
            return;
        }

        ErrorType::Config => {
            say!("\n (-_-)  🔥🔥🔥🔥 ", Dark Magenta location, " 🔥🔥🔥🔥  <(^~^)/ ");
            say!(Yellow "CONFIG FILE ISSUE- ");
        }

        ErrorType::Compiler => {
            say!("\nヽ༼☉ ‿ ⚆༽ﾉ  🔥🔥🔥🔥 ", Dark Magenta location, " 🔥🔥🔥🔥  ╰(° _ o╰) ");
            say!(Yellow "COMPILER BUG - ");
            say!(Dark Yellow "kiln developer skill issue (not your fault)");
        }
    }

    say!(Red e.msg);

    if let Some(suggestion) = e.metadata.get(&ErrorMetaDataKey::PrimarySuggestion) {
        say!(Green "Suggestion: ", suggestion);
    }
}
