//! steprun CLI - Command line interface for the execution daemon

use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use steprun_core::assist::NoAssistant;
use steprun_core::config::default_socket_path;
use steprun_core::protocol::{AutocorrectRequest, DebugRequest, DebugResponse, Request, Response};
use steprun_core::{Harness, HarnessConfig, Language, TraceStep};

mod client;

use client::Client;

#[derive(Parser)]
#[command(name = "steprun")]
#[command(author, version, about = "Run, trace and fix small programs")]
struct Cli {
    /// Print raw responses as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and trace a program via the daemon
    Exec {
        #[command(flatten)]
        program: Program,

        /// Socket path (defaults to STEPRUN_SOCKET env var or /run/steprun/steprun.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Run a program directly (without daemon)
    Run {
        #[command(flatten)]
        program: Program,

        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Print the step trace of a Python file
    Trace {
        /// Source file (or - for stdin)
        file: PathBuf,
    },

    /// Ask the daemon's assistant to correct a program
    Fix {
        /// Source file (or - for stdin)
        file: PathBuf,

        /// Socket path (defaults to STEPRUN_SOCKET env var or /run/steprun/steprun.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Get daemon status
    Status {
        /// Socket path (defaults to STEPRUN_SOCKET env var or /run/steprun/steprun.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Ping the daemon
    Ping {
        /// Socket path (defaults to STEPRUN_SOCKET env var or /run/steprun/steprun.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },
}

/// A program and what to feed it
#[derive(Args)]
struct Program {
    /// Source file (or - for stdin)
    file: PathBuf,

    /// python, c, cpp or java; guessed from the file extension when omitted
    #[arg(short, long)]
    language: Option<String>,

    /// Text for the program's standard input
    #[arg(short, long, conflicts_with = "input_file")]
    input: Option<String>,

    /// File whose contents become the program's standard input
    #[arg(long)]
    input_file: Option<PathBuf>,
}

impl Program {
    fn to_request(&self) -> Result<DebugRequest, Box<dyn std::error::Error>> {
        let language = language_for(&self.file, self.language.as_deref())?;
        let user_input = match (&self.input, &self.input_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        Ok(DebugRequest {
            code: read_source(&self.file)?,
            language,
            user_input,
        })
    }
}

/// An explicit tag wins; otherwise the extension decides
fn language_for(file: &Path, explicit: Option<&str>) -> Result<String, String> {
    if let Some(tag) = explicit {
        return Ok(tag.to_string());
    }
    Language::from_path(file)
        .map(|language| language.tag().to_string())
        .ok_or_else(|| format!("cannot tell the language of {}; pass --language", file.display()))
}

fn read_source(file: &Path) -> std::io::Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        std::fs::read_to_string(file)
    }
}

fn render_trace(steps: &[TraceStep]) -> String {
    steps
        .iter()
        .map(|step| format!("{:>4}  {}\n", step.line_number + 1, step.description))
        .collect()
}

/// Print a debug response; the exit status follows its error field
fn report(response: &DebugResponse) -> bool {
    if let Some(output) = &response.output {
        print!("{output}");
    }
    if !response.error.is_empty() {
        eprintln!("{}", response.error.trim_end());
    }
    match (&response.trace, &response.trace_error) {
        (Some(steps), _) => {
            println!("--- trace ---");
            print!("{}", render_trace(steps));
        }
        (None, Some(reason)) => println!("--- no trace: {reason} ---"),
        (None, None) => {}
    }
    if let Some(questions) = &response.questions {
        println!("--- questions ---");
        for question in questions {
            println!("{question}");
        }
    }
    response.error.is_empty()
}

/// A response of the wrong kind for the request that was sent
fn unexpected(response: &Response) -> Box<dyn std::error::Error> {
    tracing::warn!(?response, "daemon answered with the wrong response kind");
    format!("unexpected response: {response:?}").into()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("steprun=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let succeeded = match cli.command {
        Commands::Exec { program, socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let request = Request::Debug(program.to_request()?);
            match Client::connect(&socket).await?.call(&request).await? {
                Response::Debug(response) if cli.json => {
                    print_json(&response)?;
                    response.error.is_empty()
                }
                Response::Debug(response) => report(&response),
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Run { program, timeout } => {
            let request = program.to_request()?;
            let harness = Harness::new(HarnessConfig::builder().run_timeout_secs(timeout).build());
            let response = harness.debug(&request, &NoAssistant).await;
            if cli.json {
                print_json(&response)?;
                response.error.is_empty()
            } else {
                report(&response)
            }
        }

        Commands::Trace { file } => {
            let steps = steprun_core::trace(&read_source(&file)?)?;
            if cli.json {
                print_json(&steps)?;
            } else {
                print!("{}", render_trace(&steps));
            }
            true
        }

        Commands::Fix { file, socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let request = Request::Autocorrect(AutocorrectRequest {
                code: read_source(&file)?,
            });
            match Client::connect(&socket).await?.call(&request).await? {
                Response::Autocorrect(response) if cli.json => {
                    print_json(&response)?;
                    response.error.is_none()
                }
                Response::Autocorrect(response) => {
                    if let Some(error) = &response.error {
                        eprintln!("{error}");
                    }
                    if let Some(code) = &response.corrected_code {
                        println!("{code}");
                    }
                    if let Some(explanation) = &response.explanation {
                        eprintln!("{explanation}");
                    }
                    response.error.is_none()
                }
                other => return Err(unexpected(&other)),
            }
        }

        Commands::Status { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match Client::connect(&socket).await?.call(&Request::Status).await? {
                Response::Status {
                    in_flight,
                    completed,
                    failed,
                    max_concurrent,
                } => {
                    println!("in flight: {in_flight}/{max_concurrent}");
                    println!("completed: {completed}");
                    println!("failed:    {failed}");
                }
                other => return Err(unexpected(&other)),
            }
            true
        }

        Commands::Ping { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match Client::connect(&socket).await?.call(&Request::Ping).await? {
                Response::Pong => println!("pong"),
                other => return Err(unexpected(&other)),
            }
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_comes_from_flag_or_extension() {
        assert_eq!(language_for(Path::new("a.txt"), Some("java")).unwrap(), "java");
        assert_eq!(language_for(Path::new("prog.cc"), None).unwrap(), "cpp");
        assert_eq!(language_for(Path::new("main.py"), None).unwrap(), "python");
        assert!(language_for(Path::new("notes"), None).is_err());
    }

    #[test]
    fn trace_lines_are_one_based() {
        let steps = steprun_core::trace("x = 1\nif x:\n    y = 2").unwrap();
        assert_eq!(render_trace(&steps), "   1  x = 1\n   2  If x\n   3  y = 2\n");
    }

    #[test]
    fn mismatched_responses_become_errors() {
        let err = unexpected(&Response::Pong);
        assert_eq!(err.to_string(), "unexpected response: Pong");
    }

    #[test]
    fn program_reads_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("echo.py");
        let input = dir.path().join("input.txt");
        std::fs::write(&source, "print(input())\n").unwrap();
        std::fs::write(&input, "hello\n").unwrap();

        let program = Program {
            file: source,
            language: None,
            input: None,
            input_file: Some(input),
        };
        let request = program.to_request().unwrap();
        assert_eq!(request.language, "python");
        assert_eq!(request.code, "print(input())\n");
        assert_eq!(request.user_input, "hello\n");
    }
}
