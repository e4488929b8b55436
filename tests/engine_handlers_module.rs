use gateway_js_runtime::config::EngineConfig;
use gateway_js_runtime::storage_double::LoopbackHttpClient;
use gateway_js_runtime::{Engine, Phase};
use serde_json::{json, Value};
use std::rc::Rc;

const GREETING_DEMO: &str = include_str!("../demos/greeting.js");

fn execute(phase: Phase, input: Value) -> Value {
    let engine = Engine::new(EngineConfig::default(), Rc::new(LoopbackHttpClient::new()));
    let output = engine.execute(phase, &input.to_string()).to_json_string();
    serde_json::from_str(&output).expect("output is json")
}

#[test]
fn backend_call_answers_hello_world_without_name() {
    let code = "exports.on_backend_call = ctx => ({status:200, headers:{'Content-Type':'application/json'}, body_json:{hello: ctx.request.query.name ? ctx.request.query.name[0] : 'World'}})";
    let output = execute(
        Phase::BackendCall,
        json!({ "code": code, "request": { "query": {} } }),
    );
    assert_eq!(
        output,
        json!({
            "status": 200,
            "headers": { "Content-Type": "application/json" },
            "body_json": { "hello": "World" }
        })
    );
}

#[test]
fn greeting_demo_reads_query_name() {
    let output = execute(
        Phase::BackendCall,
        json!({ "code": GREETING_DEMO, "request": { "query": { "name": ["Ada"] } } }),
    );
    assert_eq!(output["body_json"], json!({ "hello": "Ada" }));
}

#[test]
fn greeting_demo_decorates_gateway_response() {
    let output = execute(
        Phase::Response,
        json!({
            "code": GREETING_DEMO,
            "request": { "query": {} },
            "otoroshi_response": {
                "status": 200,
                "headers": { "content-type": "text/plain" },
                "body_str": "ok"
            }
        }),
    );
    assert_eq!(
        output,
        json!({
            "status": 200,
            "headers": { "content-type": "text/plain", "hello": "World" },
            "body_str": "ok"
        })
    );
}

#[test]
fn handler_output_keeps_script_key_order() {
    let engine = Engine::new(EngineConfig::default(), Rc::new(LoopbackHttpClient::new()));
    let input = json!({ "code": "exports.on_validate = () => ({ zeta: 1, alpha: 2 });" });
    let output = engine
        .execute(Phase::Validate, &input.to_string())
        .to_json_string();
    assert_eq!(output, r#"{"zeta":1,"alpha":2}"#);
}

#[test]
fn context_excludes_engine_fields_and_keeps_the_rest() {
    let code = "exports.on_validate = (ctx) => ({ result: true, keys: Object.keys(ctx).sort() });";
    let output = execute(
        Phase::Validate,
        json!({
            "code": code,
            "module": "m1",
            "externalApiUrl": "http://127.0.0.1:1",
            "externalApiHeaders": {},
            "env": { "A": "1" },
            "request": {},
            "apikey": null
        }),
    );
    assert_eq!(output["keys"], json!(["apikey", "env", "request"]));
}

#[test]
fn resolved_sync_promise_is_unwrapped() {
    let code = r#"
        exports.on_request = (ctx) => SyncPromise.resolve(ctx.otoroshi_request)
          .then((req) => ({ ...req, headers: { ...req.headers, 'x-seen': 'true' } }));
    "#;
    let output = execute(
        Phase::Request,
        json!({ "code": code, "otoroshi_request": { "headers": { "a": "b" } } }),
    );
    assert_eq!(output, json!({ "headers": { "a": "b", "x-seen": "true" } }));
}

#[test]
fn sync_promise_catch_recovers_from_rejection() {
    let code = r#"
        exports.on_validate = () => SyncPromise.reject(new Error('nope'))
          .catch((err) => ({ result: false, error: err.message }));
    "#;
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": false, "error": "nope" }));
}

#[test]
fn exception_inside_then_becomes_rejection() {
    let code = r#"
        exports.on_validate = () => SyncPromise.resolve(1)
          .then(() => { throw new Error('inside then'); })
          .then(() => ({ result: true }));
    "#;
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output["body_json"]["error"], "inside then");
}

#[test]
fn already_resolved_native_promise_is_settled() {
    let code = "exports.on_validate = async (ctx) => ({ result: ctx.allowed });";
    let output = execute(Phase::Validate, json!({ "code": code, "allowed": false }));
    assert_eq!(output, json!({ "result": false }));
}

#[test]
fn process_env_exposes_environment_snapshot() {
    let code = r#"
        exports.on_validate = () => {
          process.env.STAGE = 'tampered';
          return { result: true, stage: process.env.STAGE, missing: process.env.NOPE === undefined };
        };
    "#;
    let output = execute(
        Phase::Validate,
        json!({ "code": code, "env": { "STAGE": "prod" } }),
    );
    assert_eq!(
        output,
        json!({ "result": true, "stage": "prod", "missing": true })
    );
}

#[test]
fn module_exports_assignment_is_supported() {
    let code = "module.exports = { on_validate: () => ({ result: 'module' }) };";
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": "module" }));
}

#[test]
fn reassigned_exports_object_provides_handlers() {
    let code = "exports = { on_validate: () => ({ result: false }) };";
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": false }));
}

#[test]
fn var_redeclared_exports_provides_handlers() {
    let code = "var exports = {}; exports.on_validate = () => ({ result: false });";
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": false }));
}

#[test]
fn var_redeclared_module_keeps_exports_handlers() {
    let code = "var module = null; exports.on_validate = () => ({ result: 'kept' });";
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": "kept" }));
}

#[test]
fn capabilities_are_absent_without_external_api() {
    let code = r#"
        exports.on_validate = () => ({
          result: true,
          hostApi: typeof host_api,
          console: typeof console,
          storage: typeof storage,
          bridge: typeof __gateway_http,
        });
    "#;
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(
        output,
        json!({
            "result": true,
            "hostApi": "undefined",
            "console": "undefined",
            "storage": "undefined",
            "bridge": "undefined"
        })
    );
}

#[test]
fn script_may_define_its_own_console() {
    let code = r#"
        const lines = [];
        const console = { log: (line) => lines.push(line) };
        exports.on_validate = () => {
          console.log('local');
          return { result: true, lines: lines };
        };
    "#;
    let output = execute(Phase::Validate, json!({ "code": code }));
    assert_eq!(output, json!({ "result": true, "lines": ["local"] }));
}
