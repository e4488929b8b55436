//! JavaScript scaffolding wrapped around every guest script.
//!
//! The script runs inside a nested function so it may freely shadow any name
//! the scaffolding declares (`console`, `storage`, `fetch`, ...). `exports` and
//! `module` live in that same function, so a script may also reassign or
//! redeclare them with `var`. Native bridge
//! functions are read from `globalThis` once and then deleted, leaving the
//! shims below as the only way to reach them.

pub const HTTP_BRIDGE: &str = "__gateway_http";
pub const LOG_BRIDGE: &str = "__gateway_log";
pub const STORAGE_BRIDGE: &str = "__gateway_storage";

const SCOPE_HEAD: &str = r#"(function() {
  const __http = globalThis.__gateway_http;
  const __log = globalThis.__gateway_log;
  const __storage = globalThis.__gateway_storage;
  delete globalThis.__gateway_http;
  delete globalThis.__gateway_log;
  delete globalThis.__gateway_storage;
"#;

// Synchronous stand-in for Promise: values are settled on creation and every
// callback runs inline. Nothing here can represent a pending value.
const SYNC_PROMISE: &str = r#"
  function __adopt(result) {
    if (result && typeof result.then === 'function') {
      return result;
    }
    return __resolved(result);
  }

  function __resolved(value) {
    return {
      value: value,
      then: function(onResolved) {
        if (typeof onResolved !== 'function') {
          return __resolved(value);
        }
        try {
          return __adopt(onResolved(value));
        } catch (e) {
          return __rejected(e);
        }
      },
      catch: function() {
        return __resolved(value);
      },
      finally: function(onFinally) {
        if (typeof onFinally === 'function') {
          onFinally();
        }
        return __resolved(value);
      },
    };
  }

  function __rejected(error) {
    return {
      error: error,
      then: function(_onResolved, onRejected) {
        if (typeof onRejected !== 'function') {
          return __rejected(error);
        }
        try {
          return __adopt(onRejected(error));
        } catch (e) {
          return __rejected(e);
        }
      },
      catch: function(onRejected) {
        return this.then(undefined, onRejected);
      },
      finally: function(onFinally) {
        if (typeof onFinally === 'function') {
          onFinally();
        }
        return __rejected(error);
      },
    };
  }

  const SyncPromise = Object.freeze({
    resolve: (value) => __adopt(value),
    reject: (error) => __rejected(error),
  });
"#;

const FETCH: &str = r#"
  function __response(reply) {
    const unsupported = (name) => () => __rejected(new Error('unsupported method ' + name));
    return {
      status: reply.status,
      statusText: reply.statusText || '',
      headers: reply.headers || {},
      ok: reply.status > 199 && reply.status < 300,
      redirected: reply.status > 299 && reply.status < 400,
      clone: () => __response(reply),
      text: () => __resolved(reply.body),
      json: () => {
        try {
          return __resolved(JSON.parse(reply.body));
        } catch (e) {
          return __rejected(e);
        }
      },
      blob: unsupported('blob'),
      formData: unsupported('formData'),
      arrayBuffer: unsupported('arrayBuffer'),
      error: unsupported('error'),
    };
  }

  function fetch(url, _opts) {
    const opts = _opts || {};
    const headers = {};
    Object.keys(opts.headers || {}).forEach((name) => {
      headers[name] = String(opts.headers[name]);
    });
    const request = {
      url: String(url),
      method: String(opts.method || (opts.body ? 'POST' : 'GET')),
      headers: headers,
    };
    let raw;
    try {
      if (opts.body) {
        const body = typeof opts.body === 'string' ? opts.body : JSON.stringify(opts.body);
        raw = __http(JSON.stringify(request), body);
      } else {
        raw = __http(JSON.stringify(request));
      }
    } catch (e) {
      return __rejected(e);
    }
    const reply = JSON.parse(raw);
    if (!reply.ok) {
      return __rejected(new Error(reply.error));
    }
    return __resolved(__response(reply));
  }
"#;

const SCRIPT_HEAD: &str = r#"
  return (function(__initialExports) {
    var exports = __initialExports;
    var module = { exports: __initialExports };
"#;

// `module.exports = ...` wins over `exports`; otherwise whatever `exports` is
// bound to after the script ran, reassigned or not.
const SCRIPT_TAIL: &str = r#"
    if (module && typeof module === 'object' && module.exports !== __initialExports) {
      return module.exports;
    }
    return exports;
  })({});
})()"#;

/// Assembles the single evaluation unit: scaffolding, `process.env`, the
/// capability fragment and the guest script, in that order.
pub fn scope_source(env_json: &str, capability_fragment: &str, script: &str) -> String {
    let mut source = String::with_capacity(
        SCOPE_HEAD.len() + SYNC_PROMISE.len() + FETCH.len() + capability_fragment.len()
            + SCRIPT_HEAD.len()
            + script.len()
            + SCRIPT_TAIL.len()
            + 128,
    );
    source.push_str(SCOPE_HEAD);
    source.push_str(SYNC_PROMISE);
    source.push_str(FETCH);
    source.push_str("\n  const process = Object.freeze({ env: Object.freeze(");
    source.push_str(env_json);
    source.push_str(") });\n");
    source.push_str(capability_fragment);
    source.push_str(SCRIPT_HEAD);
    source.push_str(script);
    source.push_str(SCRIPT_TAIL);
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_source_orders_fragments() {
        let source = scope_source("{}", "/*caps*/", "/*script*/");
        let env = source.find("Object.freeze({})").expect("env");
        let caps = source.find("/*caps*/").expect("caps");
        let script = source.find("/*script*/").expect("script");
        assert!(source.find("function fetch").expect("fetch") < env);
        assert!(env < caps && caps < script);
        assert!(source.trim_end().ends_with("})()"));
    }
}
