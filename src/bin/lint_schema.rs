//! Lint ASN.1 schema files: naming, constraints, extension markers, trailing whitespace.
//!
//! Usage:
//!   lint_schema [OPTIONS] [FILE.asn ...]
//!   lint_schema < file.asn
//!
//! Options:
//!   --human, -H  Human-readable output
//!
//! Exit code 1 if any file fails to parse or has error-level findings.

use std::io::{self, Read};
use std::path::Path;
use uperdsl::lint::{lint_source, LintMessage, Severity};

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, m: &LintMessage, style: OutputStyle) {
    let severity = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    match style {
        OutputStyle::Compact => {
            println!("{}:{}: {}: {} [{}] {}", path, m.line, severity, m.message, m.rule.id(), m.path);
        }
        OutputStyle::Human => {
            println!("  {} line {}: {}", path, m.line, m.message);
            if !m.path.is_empty() {
                println!("    at: {}", m.path);
            }
            println!("    rule: {}", m.rule.id());
        }
    }
}

#[derive(Default)]
struct Totals {
    errors: usize,
    warnings: usize,
    failed: bool,
}

impl Totals {
    fn report(&mut self, path: &str, source: &str, style: OutputStyle) {
        let messages = match lint_source(source) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("{}: {}", path, e);
                self.failed = true;
                return;
            }
        };
        for m in &messages {
            match m.severity {
                Severity::Error => {
                    self.errors += 1;
                    self.failed = true;
                }
                Severity::Warning => self.warnings += 1,
            }
            print_message(path, m, style);
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };

    let mut totals = Totals::default();
    if args.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        totals.report("<stdin>", &src, style);
    } else {
        for path in &args {
            let path = Path::new(path);
            match std::fs::read_to_string(path) {
                Ok(src) => totals.report(&path.display().to_string(), &src, style),
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    totals.failed = true;
                }
            }
        }
    }

    if totals.errors > 0 || totals.warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", totals.errors, totals.warnings);
    }
    if totals.failed {
        std::process::exit(1);
    }
    Ok(())
}
