use std::process;

use rsl::cli::{self, LintCommand};
use rsl::lint::lint_ast;
use rsl::logging;
use rsl::model::{sql, MetaModel};
use rsl::script::parse_file;

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let prog = argv.first().map_or("rsl-lint", String::as_str);

    let args = match cli::parse_lint_argv(argv.get(1..).unwrap_or_default()) {
        Ok(LintCommand::Run(a)) => a,
        Ok(LintCommand::Help) => {
            println!("{}", cli::lint_usage(prog));
            process::exit(0);
        }
        Ok(LintCommand::Version) => {
            println!("{}", cli::version_string());
            process::exit(0);
        }
        Err(e) => {
            eprintln!("rsl-lint: {e}");
            eprintln!("{}", cli::lint_usage(prog));
            process::exit(1);
        }
    };

    logging::init(args.verbosity > 1);

    let mut model = MetaModel::new();
    for path in &args.imports {
        if let Err(e) = sql::load_file(&mut model, path) {
            eprintln!("rsl-lint: {}: {e}", path.display());
            process::exit(1);
        }
    }

    let mut warnings = 0;
    for path in &args.files {
        match parse_file(path) {
            Ok(body) => warnings += lint_ast(&model, &body),
            Err(e) => {
                eprintln!("rsl-lint: {e}");
                process::exit(1);
            }
        }
    }

    process::exit(i32::from(warnings > 0));
}
