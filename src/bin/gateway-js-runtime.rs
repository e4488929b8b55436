use gateway_js_runtime::config::EngineConfig;
use gateway_js_runtime::host::StdioChannel;
use gateway_js_runtime::{Engine, Phase};

fn usage() -> &'static str {
    "usage: gateway-js-runtime <validate|request|backend_call|response|error>\nReads one invocation JSON document on stdin and writes one envelope to stdout."
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let phase = match args.as_slice() {
        [flag] if flag == "-h" || flag == "--help" => {
            println!("{}", usage());
            return Ok(());
        }
        [phase] => Phase::parse(phase)?,
        _ => return Err(usage().to_string()),
    };

    let config = EngineConfig::from_env().map_err(|err| err.to_string())?;
    let engine = Engine::with_ureq(config);
    engine
        .run(phase, &mut StdioChannel)
        .map_err(|err| format!("failed to write invocation output: {err}"))
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
