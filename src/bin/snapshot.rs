use openworkers_snapshot_harness::{HarnessConfig, scenarios};
use std::env;
use std::fs;
use std::path::PathBuf;

const USAGE: &str = "usage:
    snapshot create [out.bin] [script.js] [--dump]
    snapshot scenarios";

fn main() {
    env_logger::init();

    let config = HarnessConfig::from_env();
    let args: Vec<String> = env::args().skip(1).collect();

    let code = match args.first().map(String::as_str) {
        Some("create") => create(&config, &args[1..]),
        Some("scenarios") | None => run_scenarios(&config),
        Some(other) => {
            eprintln!("Unknown command: {}\n{}", other, USAGE);
            2
        }
    };

    std::process::exit(code);
}

fn create(config: &HarnessConfig, args: &[String]) -> i32 {
    let dump = args.iter().any(|arg| arg == "--dump");
    let mut positional = args.iter().filter(|arg| !arg.starts_with("--"));

    let Some(path) = positional
        .next()
        .map(PathBuf::from)
        .or_else(|| config.blob_path.clone())
    else {
        eprintln!("No output path given (argument or SNAPSHOT_BLOB_PATH)\n{}", USAGE);
        return 2;
    };

    let script = match positional.next().map(fs::read_to_string).transpose() {
        Ok(script) => script,
        Err(err) => {
            eprintln!("Failed to read script: {}", err);
            return 1;
        }
    };

    println!("Creating V8 startup snapshot...");

    let (context, blob) = match scenarios::blob_for_script(config, script.as_deref()) {
        Ok(created) => created,
        Err(err) => {
            eprintln!("Failed to create snapshot: {}", err);
            return 1;
        }
    };

    if let Err(err) = blob.write_to(&path) {
        eprintln!("Failed to write {}: {}", path.display(), err);
        return 1;
    }

    if dump {
        print!("{}", blob.dump());
    }

    println!(
        "✅ Snapshot created: {} ({} bytes, context index {})",
        path.display(),
        blob.len(),
        context.0
    );

    0
}

fn run_scenarios(config: &HarnessConfig) -> i32 {
    let reports = scenarios::run_all(config);

    for report in &reports {
        match &report.result {
            Ok(observed) => println!("✅ {}: {}", report.name, observed),
            Err(reason) => println!("❌ {}: {}", report.name, reason),
        }
    }

    let failed = reports.iter().filter(|report| !report.passed()).count();
    if failed > 0 {
        eprintln!("{} of {} scenarios failed", failed, reports.len());
        return 1;
    }

    0
}
