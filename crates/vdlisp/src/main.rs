use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use vdlisp_core::{
    list_from_slice, list_to_vec, ChainFrame, EvalState, Kind, SourceLoc, Value, VdError,
};
use vdlisp_eval::Interpreter;

const C_RED: &str = "\x1b[1;31m";
const C_BOLD: &str = "\x1b[1m";
const C_RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "vdlisp", about = "VDLISP: a small Lisp with a tiered native compiler", version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Script file to execute
    file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse source and display the AST
    Ast {
        /// File to parse
        file: Option<String>,

        /// Expression to parse
        #[arg(short, long)]
        eval: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    if let Err(e) = vdlisp_core::representation_check() {
        eprintln!("vdlisp: {e}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if let Some(Commands::Ast { file, eval, json }) = cli.command {
        run_ast(file, eval, json);
        return;
    }

    let interp = Interpreter::new();

    // CLI arguments from index 2 onward, visible to user code
    let argv: Vec<Value> = std::env::args().skip(2).map(|a| Value::string(&a)).collect();
    interp.bind_global("argv", list_from_slice(&argv));

    load_lang_basics(&interp);

    match &cli.file {
        Some(file) => run_file(&interp, file),
        None => repl(&interp),
    }
}

/// Auto-load language-level sugar (e.g. `if`) when the file is present.
/// Absence and failure are both silent.
fn load_lang_basics(interp: &Interpreter) {
    let path = PathBuf::from("scripts/lang_basics.lisp");
    if !path.exists() {
        return;
    }
    if let Ok(text) = std::fs::read_to_string(&path) {
        let _ = interp.eval_str_named(&text, &path.to_string_lossy());
    }
}

fn run_file(interp: &Interpreter, file: &str) {
    let text = match std::fs::read_to_string(file) {
        Ok(t) => t,
        Err(_) => {
            eprintln!("could not open file: {file}");
            std::process::exit(1);
        }
    };
    let result = interp.parse_all(&text, file).and_then(|exprs| {
        if exprs.is_nil() {
            return Ok(None);
        }
        let env = interp.global_env.clone();
        interp.do_list(&exprs, &env).map(Some)
    });
    match result {
        Ok(Some(v)) => println!("{v}"),
        Ok(None) => {}
        Err(e) => {
            report_error(interp, &e);
            std::process::exit(1);
        }
    }
}

fn repl(interp: &Interpreter) {
    let mut rl = DefaultEditor::new().expect("failed to create line editor");
    let histfile = std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".vdlisp_history"))
        .ok();
    if let Some(path) = &histfile {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match interp.parse(&line, "(string)") {
                    Ok(expr) => {
                        if expr.is_nil() {
                            continue;
                        }
                        let env = interp.global_env.clone();
                        match interp.eval(&expr, &env) {
                            Ok(v) => println!("{v}"),
                            Err(e) => report_error(interp, &e),
                        }
                    }
                    Err(e) => report_error(interp, &e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &histfile {
        let _ = rl.save_history(path);
    }
}

fn use_color() -> bool {
    std::io::stderr().is_terminal() || std::env::var_os("VDLISP_COLOR").is_some()
}

/// `error: <file>:<line>:<col>: <message>`, the offending line, a caret
/// under the column (tabs preserved), and any call chain.
fn report_error(interp: &Interpreter, e: &VdError) {
    let loc = e
        .primary_loc()
        .cloned()
        .or_else(|| interp.ctx.source_loc(&interp.ctx.current_expr()));
    let Some(loc) = loc else {
        eprintln!("error: {e}");
        return;
    };

    print_error_with_loc(interp, &loc, &e.to_string());

    let chain = e
        .chain()
        .map(<[ChainFrame]>::to_vec)
        .or_else(|| interp.ctx.call_chain(&interp.ctx.current_expr()));
    if let Some(chain) = chain {
        print_call_chain(interp, &chain);
    }
}

fn print_error_with_loc(interp: &Interpreter, loc: &SourceLoc, msg: &str) {
    let color = use_color();
    if color {
        eprintln!("{C_RED}error: {loc}: {msg}{C_RESET}");
    } else {
        eprintln!("error: {loc}: {msg}");
    }
    if let Some(line) = interp.ctx.source_line(&loc.file, loc.line) {
        if color {
            eprintln!("{C_BOLD}{line}{C_RESET}");
        } else {
            eprintln!("{line}");
        }
        let caret = caret_pad(&line, loc.col);
        if color {
            eprintln!("{caret}{C_RED}^{C_RESET}");
        } else {
            eprintln!("{caret}^");
        }
    }
}

fn print_call_chain(interp: &Interpreter, chain: &[ChainFrame]) {
    if chain.is_empty() {
        return;
    }
    eprintln!("Call chain:");
    for frame in chain {
        match &frame.label {
            Some(label) => eprintln!("  at {label} {}", frame.loc),
            None => eprintln!("  at {}", frame.loc),
        }
        if let Some(line) = interp.ctx.source_line(&frame.loc.file, frame.loc.line) {
            eprintln!("    {line}");
            eprintln!("    {}^", caret_pad(&line, frame.loc.col));
        }
    }
}

/// Whitespace running up to the caret column; tabs in the source line are
/// preserved so the caret stays aligned in terminals.
fn caret_pad(line: &str, col: usize) -> String {
    let col_index = col.saturating_sub(1);
    let mut pad = String::new();
    let mut chars = line.chars();
    for _ in 0..col_index {
        match chars.next() {
            Some('\t') => pad.push('\t'),
            _ => pad.push(' '),
        }
    }
    pad
}

// ── `ast` subcommand ──────────────────────────────────────────────

fn run_ast(file: Option<String>, eval: Option<String>, json: bool) {
    let source = match (&file, &eval) {
        (Some(path), None) => match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("error reading {path}: {e}");
                std::process::exit(1);
            }
        },
        (None, Some(expr)) => expr.clone(),
        (Some(_), Some(_)) => {
            eprintln!("error: cannot specify both a file and --eval");
            std::process::exit(1);
        }
        (None, None) => {
            eprintln!("error: provide a file or --eval expression");
            std::process::exit(1);
        }
    };

    let interp = Interpreter::new();
    let exprs = match interp.parse_all(&source, "(ast)") {
        Ok(exprs) => list_to_vec(&exprs),
        Err(e) => {
            report_error(&interp, &e);
            std::process::exit(1);
        }
    };

    if json {
        let ast: Vec<serde_json::Value> = exprs.iter().map(value_to_ast_json).collect();
        let output = if ast.len() == 1 {
            serde_json::to_string_pretty(&ast[0])
        } else {
            serde_json::to_string_pretty(&ast)
        };
        println!("{}", output.expect("AST serialization"));
    } else {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print_ast(expr, 0);
        }
    }
}

fn value_to_ast_json(v: &Value) -> serde_json::Value {
    match v.kind() {
        Kind::Nil => serde_json::json!({ "type": "nil" }),
        Kind::Number => serde_json::json!({ "type": "number", "value": v.as_number() }),
        Kind::String => serde_json::json!({ "type": "string", "value": v.as_str() }),
        Kind::Symbol => serde_json::json!({ "type": "symbol", "value": v.symbol_text() }),
        Kind::Pair => {
            let (items, tail) = split_improper(v);
            let children: Vec<serde_json::Value> = items.iter().map(value_to_ast_json).collect();
            match tail {
                Some(t) => serde_json::json!({
                    "type": "pair",
                    "children": children,
                    "tail": value_to_ast_json(&t),
                }),
                None => serde_json::json!({ "type": "pair", "children": children }),
            }
        }
        _ => serde_json::json!({ "type": v.type_name() }),
    }
}

fn print_ast(v: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match v.kind() {
        Kind::Pair => {
            println!("{pad}Pair");
            let (items, tail) = split_improper(v);
            for item in &items {
                print_ast(item, indent + 1);
            }
            if let Some(t) = tail {
                println!("{pad}  .");
                print_ast(&t, indent + 1);
            }
        }
        Kind::Nil => println!("{pad}Nil"),
        Kind::Number => println!("{pad}Number {}", v),
        Kind::String => println!("{pad}String {:?}", v.as_str().unwrap_or("")),
        Kind::Symbol => println!("{pad}Symbol {}", v),
        _ => println!("{pad}{}", v.type_name()),
    }
}

/// Split a possibly improper list into its elements and dotted tail.
fn split_improper(v: &Value) -> (Vec<Value>, Option<Value>) {
    let mut items = Vec::new();
    let mut cur = v.clone();
    while let Kind::Pair = cur.kind() {
        items.push(vdlisp_core::pair_car(&cur));
        cur = vdlisp_core::pair_cdr(&cur);
    }
    if cur.is_nil() {
        (items, None)
    } else {
        (items, Some(cur))
    }
}
