use std::path::Path;

use ansi_term::Colour;
use failure::Error;
use structopt::StructOpt;

use opentab::colors::{CYAN, RED, WHITE, YELLOW};
use opentab::{MidiGenerationOptions, RhythmStrategy};

#[derive(Debug, StructOpt)]
#[structopt(name = "opentab", about = "The OpenTab guitar tablature toolchain.")]
enum OpentabCommand {
    #[structopt(name = "parse", about = "Parse a .otab file and print the JSON model.")]
    Parse {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,
    },

    #[structopt(name = "fmt", about = "Format a .otab file.")]
    Fmt {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(long = "write", help = "Rewrite the file in place.")]
        write: bool,
    },

    #[structopt(name = "check", about = "Report diagnostics for a .otab file.")]
    Check {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,
    },

    #[structopt(name = "to", about = "Compile a .otab file to another format.")]
    To {
        #[structopt(subcommand)]
        target: TargetCommand,
    },

    #[structopt(name = "import", about = "Import a foreign format as OpenTab.")]
    Import {
        #[structopt(subcommand)]
        source: ImportCommand,
    },
}

#[derive(Debug, StructOpt)]
enum TargetCommand {
    #[structopt(name = "ascii", about = "Render fixed-width ASCII tab.")]
    Ascii {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },

    #[structopt(name = "midi", about = "Compile to a Standard MIDI File.")]
    Midi {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(
            short = "d",
            long = "division",
            help = "MIDI ticks per beat.",
            default_value = "480"
        )]
        ticks_per_beat: u16,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },

    #[structopt(name = "musicxml", about = "Compile to partwise MusicXML.")]
    Musicxml {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },

    #[structopt(name = "svg", about = "Render an SVG of the ASCII tab view.")]
    Svg {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },
}

#[derive(Debug, StructOpt)]
enum ImportCommand {
    #[structopt(name = "gp", about = "Import a Guitar Pro .gpx archive.")]
    Gp {
        #[structopt(help = "Input .gpx file.")]
        input: String,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },

    #[structopt(name = "ascii", about = "Import free-form ASCII tab text.")]
    Ascii {
        #[structopt(help = "Input file, or stdin if not specified.")]
        input: Option<String>,

        #[structopt(
            long = "rhythm",
            help = "Rhythm strategy: unknown, fixed-eighth or column-grid.",
            default_value = "unknown"
        )]
        rhythm: RhythmStrategy,

        #[structopt(short = "o", long = "output", help = "Output file, or stdout.")]
        output: Option<String>,
    },
}

fn main() {
    let command = OpentabCommand::from_args();

    if let Err(err) = run_command(command) {
        eprintln!("{}", err);
        log(RED, "error:", "Command failed.");
        std::process::exit(1)
    }
}

fn log(color: Colour, prefix: &str, message: &str) {
    eprintln!("{} {}", color.bold().paint(prefix), WHITE.paint(message));
}

fn log_warnings(warnings: &[String]) {
    for warning in warnings {
        log(YELLOW, "warning:", warning);
    }
}

fn run_command(command: OpentabCommand) -> Result<(), Error> {
    match command {
        OpentabCommand::Parse { input } => {
            let source = read_input(input.as_ref())?;
            let document = opentab::parse_document(&source, input.as_deref())?;
            let json = serde_json::to_string_pretty(&document)?;
            println!("{}", json);
            Ok(())
        }

        OpentabCommand::Fmt { input, write } => {
            let source = read_input(input.as_ref())?;
            let formatted = opentab::format_source(&source);
            if write {
                let path = input
                    .as_ref()
                    .ok_or_else(|| failure::err_msg("--write requires an input file"))?;
                write_output(&formatted, Some(path))
            } else {
                write_output(&formatted, None::<&String>)
            }
        }

        OpentabCommand::Check { input } => {
            let source = read_input(input.as_ref())?;
            let diagnostics = opentab::validate_source(&source);
            let filename = input.as_deref().unwrap_or("<stdin>");
            for diagnostic in &diagnostics {
                println!(
                    "{}:{}:{}: {:?}: {}",
                    filename,
                    diagnostic.line,
                    diagnostic.start_col,
                    diagnostic.severity,
                    diagnostic.message
                );
            }
            if diagnostics.is_empty() {
                log(CYAN, "ok", "No findings.");
            }
            Ok(())
        }

        OpentabCommand::To { target } => run_target(target),

        OpentabCommand::Import { source } => run_import(source),
    }
}

fn run_target(target: TargetCommand) -> Result<(), Error> {
    match target {
        TargetCommand::Ascii { input, output } => {
            let source = read_input(input.as_ref())?;
            let ascii = opentab::compile_to_ascii(&source, input.as_deref())?;
            write_output(&ascii, output.as_ref())
        }

        TargetCommand::Midi {
            input,
            ticks_per_beat,
            output,
        } => {
            log(CYAN, "Compiling", "to MIDI ...");
            let source = read_input(input.as_ref())?;
            let options = MidiGenerationOptions { ticks_per_beat };
            let midi = opentab::compile_to_midi(&source, input.as_deref(), &options)?;
            log_warnings(&midi.warnings);
            write_binary(&midi.bytes, output.as_ref())
        }

        TargetCommand::Musicxml { input, output } => {
            let source = read_input(input.as_ref())?;
            let xml = opentab::compile_to_musicxml(&source, input.as_deref())?;
            write_output(&xml, output.as_ref())
        }

        TargetCommand::Svg { input, output } => {
            let source = read_input(input.as_ref())?;
            let svg = opentab::compile_to_svg(&source, input.as_deref())?;
            write_output(&svg, output.as_ref())
        }
    }
}

fn run_import(source: ImportCommand) -> Result<(), Error> {
    match source {
        ImportCommand::Gp { input, output } => {
            log(CYAN, "Importing", "Guitar Pro archive ...");
            let bytes = read_binary(&input)?;
            let import = opentab::import_gpx_archive(&bytes)?;
            log_warnings(&import.warnings);
            write_output(&import.source, output.as_ref())
        }

        ImportCommand::Ascii {
            input,
            rhythm,
            output,
        } => {
            log(CYAN, "Importing", "ASCII tab ...");
            let text = read_input(input.as_ref())?;
            let import = opentab::import_ascii_tab(&text, rhythm);
            log_warnings(&import.warnings);
            write_output(&import.source, output.as_ref())
        }
    }
}

fn read_input<P>(input: Option<P>) -> Result<String, Error>
where
    P: AsRef<Path>,
{
    use std::fs::File;
    use std::io::Read;

    let mut content = String::new();

    match input {
        Some(filename) => {
            File::open(filename.as_ref())?.read_to_string(&mut content)?;
        }
        None => {
            std::io::stdin().read_to_string(&mut content)?;
        }
    }

    Ok(content)
}

fn read_binary<P>(input: P) -> Result<Vec<u8>, Error>
where
    P: AsRef<Path>,
{
    use std::fs::File;
    use std::io::Read;

    let mut content = Vec::new();
    File::open(input.as_ref())?.read_to_end(&mut content)?;
    Ok(content)
}

fn write_output<P>(content: &str, output: Option<P>) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    use std::fs::File;
    use std::io::Write;

    if let Some(filename) = output {
        File::create(filename.as_ref())?.write_all(content.as_bytes())?;
    } else {
        std::io::stdout().write_all(content.as_bytes())?;
    }

    Ok(())
}

fn write_binary<P>(content: &[u8], output: Option<P>) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    use std::fs::File;
    use std::io::Write;

    if let Some(filename) = output {
        File::create(filename.as_ref())?.write_all(content)?;
    } else {
        std::io::stdout().write_all(content)?;
    }

    Ok(())
}
