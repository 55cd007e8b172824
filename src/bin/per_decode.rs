//! Decode PER-encoded PDUs against a schema and dump them.
//!
//! Usage:
//!   per_decode [OPTIONS] SCHEMA.asn TYPE [HEX ...]
//!
//! Each HEX argument is one PDU (whitespace and `:` separators allowed). With no
//! HEX argument, PDUs are read from stdin, one per line.
//!
//! Options:
//!   --aligned              ALIGNED variant (default UNALIGNED)
//!   --reject-extensions    fail on unknown extensions instead of skipping them
//!   --quantum=FIELD=EXPR   scale an INTEGER component, e.g. --quantum=altitude=1/2^8 m
//!   --verbose, -v          print consumed bits and skipped extensions
//!
//! Logging goes through `RUST_LOG` (e.g. `RUST_LOG=uperdsl=trace`).

use anyhow::Context;
use std::io::{self, BufRead};
use std::path::PathBuf;
use uperdsl::dump::{dump_type, Formatters};
use uperdsl::per::Variant;
use uperdsl::{parse_file, Codec, CodecOptions, ExtensionPolicy, ResolvedModule};

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        anyhow::bail!("odd number of hex digits in {:?}", text);
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair)?;
            u8::from_str_radix(s, 16).with_context(|| format!("invalid hex byte {:?}", s))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut raw_args, &["--verbose", "-v"]);
    let aligned = take_flag(&mut raw_args, &["--aligned"]);
    let reject = take_flag(&mut raw_args, &["--reject-extensions"]);
    let mut formatters = Formatters::new();
    while let Some(pos) = raw_args.iter().position(|a| a.starts_with("--quantum=")) {
        let arg = raw_args.remove(pos);
        let spec = arg.trim_start_matches("--quantum=");
        let (field, expr) = spec
            .split_once('=')
            .with_context(|| format!("expected --quantum=FIELD=EXPR, got {}", arg))?;
        formatters = formatters.quantum(field, expr);
    }

    let mut args = raw_args.into_iter();
    let schema_path: PathBuf = args.next().map(PathBuf::from).context("missing SCHEMA argument")?;
    let type_name = args.next().context("missing TYPE argument")?;
    let pdus: Vec<String> = args.collect();

    let module = parse_file(&schema_path).map_err(|e| anyhow::anyhow!(e))?;
    let resolved = ResolvedModule::resolve(module).map_err(|e| anyhow::anyhow!(e))?;
    let options = CodecOptions {
        variant: if aligned { Variant::Aligned } else { Variant::Unaligned },
        extensions: if reject { ExtensionPolicy::Reject } else { ExtensionPolicy::Skip },
        ..CodecOptions::default()
    };
    let codec = Codec::new(resolved, options);

    let inputs: Vec<String> = if pdus.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .filter(|l| l.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .collect::<Result<_, _>>()?
    } else {
        pdus
    };

    let mut failures = 0usize;
    for (i, input) in inputs.iter().enumerate() {
        let bytes = parse_hex(input)?;
        match codec.decode(&type_name, &bytes) {
            Ok(decoded) => {
                println!("#{} {}", i, type_name);
                println!("{}", dump_type(codec.resolved(), &type_name, &decoded.value, &formatters)?);
                if verbose {
                    println!("  bits consumed: {} of {}", decoded.bits_consumed, bytes.len() * 8);
                    for skipped in &decoded.skipped_extensions {
                        println!(
                            "  skipped extension {} at {} ({} octets)",
                            skipped.index, skipped.path, skipped.octets
                        );
                    }
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("#{} {}: {}", i, type_name, e);
            }
        }
    }
    if failures > 0 {
        eprintln!("per_decode: {} of {} PDU(s) failed", failures, inputs.len());
        std::process::exit(1);
    }
    Ok(())
}
