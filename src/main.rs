use evdash::CliError;

fn json_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json")
}

fn report(err: &CliError) -> ! {
    // Help and version output are code 0 and belong on stdout.
    if err.code == 0 {
        print!("{}", err.message);
        std::process::exit(0);
    }
    if json_mode_args() {
        let payload = serde_json::json!({
            "error": {
                "code": err.code,
                "kind": err.kind,
                "message": err.message,
                "hint": err.hint,
                "retryable": err.retryable,
            }
        });
        eprintln!("{payload}");
    } else {
        eprintln!("{err}");
    }
    std::process::exit(err.code);
}

fn main() -> anyhow::Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let parsed = match evdash::parse_cli(raw_args) {
        Ok(parsed) => parsed,
        Err(err) => report(&err),
    };

    match evdash::run_with_parsed(parsed) {
        Ok(()) => Ok(()),
        Err(err) => report(&err),
    }
}
