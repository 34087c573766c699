use std::fs;
use std::path::PathBuf;
use std::process;

use rsl::cli::{self, GenArgs, GenCommand, Input, DEFAULT_DATABASE};
use rsl::config::{self, Config};
use rsl::emit::EmitOptions;
use rsl::logging;
use rsl::model::{sql, MetaModel};
use rsl::script::{evaluate, parse_file, Runtime, Value};
use tracing::{debug, info};

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let prog = argv.first().map_or("gen_erate", String::as_str);

    let args = match cli::parse_gen_argv(argv.get(1..).unwrap_or_default()) {
        Ok(GenCommand::Run(a)) => a,
        Ok(GenCommand::Help) => {
            println!("{}", cli::gen_usage(prog));
            process::exit(0);
        }
        Ok(GenCommand::Version) => {
            println!("{}", cli::version_string());
            process::exit(0);
        }
        Err(e) => {
            println!("{e}");
            println!("Couldn't find match for argument");
            println!("{}", cli::gen_brief_usage(prog));
            process::exit(1);
        }
    };

    process::exit(run(&argv, args));
}

/// Effective settings: command line over `.rslrc` over built-in defaults.
struct Settings {
    includes: Vec<PathBuf>,
    emit: EmitOptions,
    database: PathBuf,
    persist: bool,
    integrity: bool,
}

fn settings(args: &GenArgs, rc: Config) -> Settings {
    let mut includes = vec![PathBuf::from(".")];
    includes.extend(rc.includes);
    includes.extend(args.includes.iter().cloned());
    Settings {
        includes,
        emit: EmitOptions {
            mode: args.emit.or(rc.emit).unwrap_or_default(),
            force: args.force || rc.force.unwrap_or(false),
            diff: args.diff.clone().or(rc.diff),
        },
        database: args.database.clone().or(rc.database).unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
        persist: !args.nopersist && rc.persist.unwrap_or(true),
        integrity: args.integrity || rc.integrity.unwrap_or(false),
    }
}

fn load_rc() -> Config {
    let Some(path) = config::find_user_config() else { return Config::default() };
    match Config::load_file(&path) {
        Ok((rc, errors)) => {
            for e in errors {
                eprintln!("gen_erate: warning: {}: {e}", path.display());
            }
            rc
        }
        Err(e) => {
            eprintln!("gen_erate: warning: {}: {e}", path.display());
            Config::default()
        }
    }
}

/// Exit status for a value passed to `.exit`.
fn exit_status(value: &Value) -> i32 {
    match value {
        Value::Int(n) => i32::try_from(*n).unwrap_or(1),
        Value::Bool(b) => i32::from(*b),
        Value::Unit => 0,
        other => {
            eprintln!("{other}");
            1
        }
    }
}

fn run(argv: &[String], args: GenArgs) -> i32 {
    let rc = load_rc();
    logging::init(args.verbose || rc.verbose.unwrap_or(false));
    let quit_on_import_error = args.quit_on_import_error;
    let s = settings(&args, rc);
    debug!(database = %s.database.display(), emit = %s.emit.mode, persist = s.persist, "settings");

    if let Some(diff) = &s.emit.diff {
        if let Err(e) = fs::write(diff, format!("{}\n", argv.join(" "))) {
            eprintln!("gen_erate: {}: {e}", diff.display());
            return 1;
        }
    }

    let mut model = MetaModel::new();
    if s.persist && s.database.is_file() {
        if let Err(e) = sql::load_file(&mut model, &s.database) {
            eprintln!("gen_erate: {}: {e}", s.database.display());
            return 1;
        }
        info!(database = %s.database.display(), "database loaded");
    }

    for input in &args.inputs {
        match input {
            Input::Import(path) => {
                if let Err(e) = sql::load_file(&mut model, path) {
                    eprintln!("gen_erate: {}: {e}", path.display());
                    if quit_on_import_error {
                        return 1;
                    }
                }
            }
            Input::Arch(path) => {
                let body = match parse_file(path) {
                    Ok(b) => b,
                    Err(e) => {
                        eprintln!("gen_erate: {e}");
                        return 1;
                    }
                };
                let mut rt = Runtime::new(std::mem::take(&mut model)).with_emit(s.emit.clone());
                let result = evaluate(&mut rt, &body, &s.includes);
                model = rt.model;
                match result {
                    Ok(None) => {}
                    Ok(Some(value)) => return exit_status(&value),
                    Err(_) => return 1,
                }
            }
        }
    }

    let mut errors = 0;
    if s.integrity {
        errors += model.check_integrity();
    }

    if s.persist {
        if let Err(e) = sql::save_file(&model, &s.database) {
            eprintln!("gen_erate: {}: {e}", s.database.display());
            return 1;
        }
    }

    i32::from(errors > 0)
}
