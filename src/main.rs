use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use minic::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use minic::vm::{Vm, VmConfig};
use minic::{compile_source, disasm, parse_source};

#[derive(Parser)]
#[command(name = "minic", version, about = "Compile and run a small C-like language on a stack VM")]
struct Cli {
    /// Source file, or inline source when no such file exists
    input: String,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Function to start in
    #[arg(long, default_value = "main")]
    entry: String,

    /// Reject jumps that land between instructions (default in debug builds)
    #[arg(long, overrides_with = "no_validate_jumps")]
    validate_jumps: bool,

    #[arg(long, overrides_with = "validate_jumps")]
    no_validate_jumps: bool,

    /// Log every executed instruction
    #[arg(long)]
    trace: bool,

    #[arg(long, value_enum, default_value_t = DiagnosticFormat::Ansi)]
    diagnostics: DiagnosticFormat,

    #[arg(long)]
    no_color: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    Ast,
    Disasm,
    Json,
    Hex,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum DiagnosticFormat {
    Ansi,
    Json,
}

struct Reporter {
    format: DiagnosticFormat,
    renderer: AnsiRenderer,
}

impl Reporter {
    fn report(&self, d: &Diagnostic) {
        match self.format {
            DiagnosticFormat::Ansi => eprint!("{}", self.renderer.render(d)),
            DiagnosticFormat::Json => eprintln!("{}", json::render(d)),
        }
    }
}

fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("minic=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    let reporter = Reporter {
        format: cli.diagnostics,
        renderer: AnsiRenderer { use_color: !cli.no_color && std::io::stderr().is_terminal() },
    };

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) if Path::new(&cli.input).exists() => {
            reporter.report(&Diagnostic::error(format!("cannot read {}: {}", cli.input, e)));
            return ExitCode::FAILURE;
        }
        Err(_) => cli.input.clone(),
    };

    if let Some(Emit::Ast) = cli.emit {
        return match parse_source(&source) {
            Ok(program) => match serde_json::to_string_pretty(&program) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    reporter.report(&Diagnostic::error(format!("serialization error: {}", e)));
                    ExitCode::FAILURE
                }
            },
            Err(diags) => fail(&reporter, &diags),
        };
    }

    let code = match compile_source(&source, &cli.entry) {
        Ok(code) => code,
        Err(diags) => return fail(&reporter, &diags),
    };

    let emitted = match cli.emit {
        Some(Emit::Disasm) => Some(disasm::listing(&code).map(|s| s.trim_end().to_string())),
        Some(Emit::Json) => Some(disasm::to_json(&code).map(|v| v.to_string())),
        Some(Emit::Hex) => Some(Ok(disasm::hex(&code))),
        Some(Emit::Ast) | None => None,
    };
    if let Some(result) = emitted {
        return match result {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                reporter.report(&Diagnostic::error(e.to_string()));
                ExitCode::FAILURE
            }
        };
    }

    let mut config = VmConfig::new().entry(&cli.entry).trace(cli.trace);
    if cli.validate_jumps {
        config = config.validate_jumps(true);
    } else if cli.no_validate_jumps {
        config = config.validate_jumps(false);
    }

    let stdout = std::io::stdout().lock();
    let result = Vm::new(&code, stdout, config).and_then(|mut vm| {
        let exit = vm.run();
        for fault in vm.faults() {
            reporter.report(&Diagnostic::from(fault));
        }
        exit
    });
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.report(&Diagnostic::from(&e));
            ExitCode::FAILURE
        }
    }
}

fn fail(reporter: &Reporter, diags: &[Diagnostic]) -> ExitCode {
    for d in diags {
        reporter.report(d);
    }
    ExitCode::FAILURE
}
