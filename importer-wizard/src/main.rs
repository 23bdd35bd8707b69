use frappe_importer::RunOptions;
use std::path::PathBuf;

const USAGE: &str = "\
Usage: frappe-importer [--config <path>] [--ephemeral] [MODE]

Modes:
  (none)                 interactive terminal wizard
  --tui-smoke[=page]     render one frame (connect|upload|mapping|import) and exit
  --watch <job_id>       poll an import job and show its progress
  --print-config         print the effective configuration as TOML
  --help                 show this message";

/// Value of `--flag <value>` or `--flag=<value>`.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{}=", flag);
    args.iter().enumerate().find_map(|(i, a)| {
        if a == flag {
            args.get(i + 1).cloned()
        } else {
            a.strip_prefix(&prefix).map(str::to_string)
        }
    })
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return;
    }

    let opts = RunOptions {
        config_path: flag_value(&args, "--config")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from),
        ephemeral: args.iter().any(|a| a == "--ephemeral"),
    };

    // Non-interactive TUI smoke test mode (for automated checks).
    // Usage: --tui-smoke or --tui-smoke=connect|upload|mapping|import
    if let Some(arg) = args
        .iter()
        .find(|a| a.as_str() == "--tui-smoke" || a.starts_with("--tui-smoke="))
    {
        let target = arg
            .split_once('=')
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.trim().is_empty());
        frappe_importer::run_tui_smoke(target);
        return;
    }

    if args.iter().any(|a| a == "--print-config") {
        frappe_importer::print_config(opts);
        return;
    }

    if args.iter().any(|a| a == "--watch" || a.starts_with("--watch=")) {
        match flag_value(&args, "--watch").filter(|v| !v.trim().is_empty()) {
            Some(job_id) => frappe_importer::run_watch(opts, job_id),
            None => {
                eprintln!("--watch needs a job id\n\n{}", USAGE);
                std::process::exit(2);
            }
        }
        return;
    }

    frappe_importer::run_tui(opts);
}
