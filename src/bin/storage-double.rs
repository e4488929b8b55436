use gateway_js_runtime::config::EngineConfig;
use gateway_js_runtime::shared::logging::EngineLog;
use gateway_js_runtime::storage_double::server::DEFAULT_ADDR;
use gateway_js_runtime::storage_double::{MemoryStore, StorageDoubleServer, StorageService};

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let addr = match args.as_slice() {
        [] => DEFAULT_ADDR.to_string(),
        [addr] => addr.clone(),
        _ => return Err("usage: storage-double [addr]".to_string()),
    };

    let config = EngineConfig::from_env().map_err(|err| err.to_string())?;
    let service = StorageService::new(MemoryStore::new(), EngineLog::new(config.log_path));
    let server = StorageDoubleServer::bind(&addr, service).map_err(|err| err.to_string())?;
    let base_url = server.base_url().map_err(|err| err.to_string())?;
    println!("storage double listening on {base_url}");
    server.serve(None).map_err(|err| err.to_string())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
