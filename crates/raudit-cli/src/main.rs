use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;

use raudit_proto::wire::{self, Decoded};
use raudit_proto::{Event, EventKind, PrintMode, TypeCode, schema};
use raudit_rules::{ModuleRegistry, Outcome, RuleChain, RuleLocal, Tokenizer};

#[derive(Parser)]
#[command(name = "raudit")]
#[command(about = "Validate rule chains and evaluate audit event records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file and report chain statistics
    Check {
        /// Path to a rule file
        path: PathBuf,
    },

    /// Dump the token stream of a rule file (debugging aid)
    Tokens {
        /// Path to a rule file
        path: PathBuf,
    },

    /// Evaluate wire-encoded request records against a rule chain
    ///
    /// Records can be provided as a single argument (--event) or read
    /// from stdin, one record per line. Each verdict is printed as JSON.
    Eval {
        /// Path to a rule file
        #[arg(short, long)]
        rules: PathBuf,

        /// A single wire-encoded request record (if omitted, reads stdin)
        #[arg(short, long)]
        event: Option<String>,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Build a request record from name:type=value fields and print it
    Encode {
        /// Fields in name:type=value form (e.g. method:string=GET)
        #[arg(required = true)]
        fields: Vec<String>,

        /// Emit a reply record instead of a request
        #[arg(long)]
        reply: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { path } => cmd_check(path),
        Commands::Tokens { path } => cmd_tokens(path),
        Commands::Eval {
            rules,
            event,
            pretty,
        } => cmd_eval(rules, event, pretty),
        Commands::Encode { fields, reply } => cmd_encode(fields, reply),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_check(path: PathBuf) {
    let chain = load_chain(&path);
    println!(
        "OK: {} nodes, {} tests, {} actions, {} modules",
        chain.node_count(),
        chain.test_count(),
        chain.action_count(),
        chain.module_count()
    );
}

fn cmd_tokens(path: PathBuf) {
    let tokens = match Tokenizer::from_path(&path) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Error tokenizing {}: {e}", path.display());
            process::exit(1);
        }
    };
    for token in tokens.remaining() {
        println!("{:>4}  {:?}  {token}", token.line, token.kind);
    }
}

/// One evaluation result, serialized per input record.
#[derive(Serialize)]
struct Verdict {
    deny: bool,
    drop: bool,
    outcome: Outcome,
    reply: String,
}

fn cmd_eval(rules: PathBuf, event: Option<String>, pretty: bool) {
    let chain = load_chain(&rules);
    let mut local = RuleLocal::new();

    match event {
        Some(record) => {
            let ok = eval_record(&chain, &mut local, record.as_bytes(), pretty);
            if !ok {
                process::exit(1);
            }
        }
        None => {
            let stdin = io::stdin();
            let mut failures = 0usize;
            for (line_num, line) in stdin.lock().lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        eprintln!("Error reading line {}: {e}", line_num + 1);
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                if !eval_record(&chain, &mut local, line.as_bytes(), pretty) {
                    failures += 1;
                }
            }
            if failures > 0 {
                eprintln!("{failures} record(s) rejected");
                process::exit(1);
            }
        }
    }
}

/// Decode, validate, evaluate, print. Returns false on a rejected record.
fn eval_record(chain: &RuleChain, local: &mut RuleLocal, record: &[u8], pretty: bool) -> bool {
    // Stdin lines arrive stripped of their terminator.
    let mut buf = record.to_vec();
    if buf.last() != Some(&b'\n') {
        buf.push(b'\n');
    }

    let mut request = match wire::from_buffer(&buf) {
        Ok(Decoded::Complete { event, .. }) => event,
        Ok(Decoded::Incomplete) => {
            eprintln!("Protocol error: truncated record");
            return false;
        }
        Err(e) => {
            eprintln!("Protocol error: {e}");
            return false;
        }
    };
    if request.kind() != EventKind::Request {
        eprintln!("Protocol error: not a request record");
        return false;
    }
    let repairs = request.check();
    if repairs > 0 {
        log::warn!("request record needed {repairs} repair(s)");
    }

    let mut reply = schema::reply_template();
    let outcome = chain.run(local, &request, &mut reply);

    let mut reply_wire = Vec::new();
    if let Err(e) = wire::to_buffer(&reply, &mut reply_wire) {
        eprintln!("Error: cannot encode reply: {e}");
        return false;
    }
    let verdict = Verdict {
        deny: schema::reply_denied(&reply),
        drop: outcome == Outcome::Drop,
        outcome,
        reply: String::from_utf8_lossy(&reply_wire).trim_end().to_string(),
    };
    print_json(&verdict, pretty);
    true
}

fn cmd_encode(fields: Vec<String>, reply: bool) {
    let kind = if reply {
        EventKind::Reply
    } else {
        EventKind::Request
    };
    let mut event = Event::new(kind);

    for field in &fields {
        let Some((name, rest)) = field.split_once(':') else {
            eprintln!("Error: '{field}' is not name:type=value");
            process::exit(1);
        };
        let Some((type_name, value)) = rest.split_once('=') else {
            eprintln!("Error: '{field}' is not name:type=value");
            process::exit(1);
        };
        let Some(code) = TypeCode::from_name(type_name) else {
            eprintln!("Error: unknown type '{type_name}' in '{field}'");
            process::exit(1);
        };
        match event.append_scanned(name, code, value) {
            Ok(0) => {}
            Ok(errors) => {
                let unit = event.unit_by_name(name).expect("just appended");
                eprintln!(
                    "Warning: {errors} scan error(s) in '{field}', stored as \"{}\"",
                    unit.value().print(PrintMode::Wire)
                );
            }
            Err(e) => {
                eprintln!("Error: cannot append '{field}': {e}");
                process::exit(1);
            }
        }
    }

    let mut out = Vec::new();
    if let Err(e) = wire::to_buffer(&event, &mut out) {
        eprintln!("Error: cannot encode record: {e}");
        process::exit(1);
    }
    io::stdout().write_all(&out).expect("write to stdout");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_chain(path: &Path) -> RuleChain {
    let registry = ModuleRegistry::new();
    let mut sink = Event::new(EventKind::Reply);
    match RuleChain::parse_path(path, &registry, &mut sink) {
        Ok(chain) => chain,
        Err(e) => {
            eprintln!("Error parsing {}: {e}", path.display());
            if let Some(unit) = sink.unit_by_name("line")
                && unit.value().as_u32().is_some_and(|l| l > 0)
            {
                eprintln!("  near line {}", unit.value().print(PrintMode::Wire));
            }
            process::exit(1);
        }
    }
}

fn print_json(value: &impl Serialize, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            process::exit(1);
        }
    }
}
