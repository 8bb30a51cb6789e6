//! A V8 isolate built for exactly one snippet.
//!
//! Construction and evaluation are separate steps so the caller can lock the
//! thread down in between: V8 maps its heap and code space while the runtime
//! is built, and nothing after that needs a new descriptor or thread.

use crate::config::policy::CapabilityPolicy;
use crate::script::{ScriptError, ScriptLimits, ScriptOutcome, OUTPUT_LIMIT_MESSAGE};
use crate::verdict::verdict::RESOURCE_LIMIT_MESSAGE;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

const PRELUDE: &str = include_str!("prelude.js");

/// Process-wide V8 flags. They must be set before the first isolate exists.
const V8_FLAGS: &[&str] = &["snipbox", "--single-threaded", "--no-expose-wasm"];

static CONFIGURE_V8: Once = Once::new();

fn configure_v8() {
    CONFIGURE_V8.call_once(|| {
        let flags = V8_FLAGS.iter().map(|flag| flag.to_string()).collect();
        // The first entry stands in for argv[0] and always comes back.
        let rejected = deno_core::v8_set_flags(flags);
        for flag in rejected.iter().skip(1) {
            log::warn!("V8 rejected flag {}", flag);
        }
    });
}

struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates the isolate the first time the heap nears its limit, and grants
/// 1 MiB so the termination can unwind.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` is the `HeapLimitState` boxed in `ScriptEngine`, which
    // outlives the isolate that calls back into here.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// What the prelude hands back.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Envelope {
    Ok(String),
    Error(String),
    Overflow,
}

pub struct ScriptEngine {
    // Declared before `heap` so the isolate is dropped first.
    runtime: JsRuntime,
    heap: Box<HeapLimitState>,
    limits: ScriptLimits,
}

impl ScriptEngine {
    /// Builds a fresh isolate with no extensions and a bounded heap.
    pub fn new(limits: &ScriptLimits) -> Self {
        configure_v8();

        let create_params = v8::CreateParams::default().heap_limits(0, limits.max_heap_bytes);
        let mut runtime = JsRuntime::new(RuntimeOptions {
            create_params: Some(create_params),
            v8_platform: Some(v8::new_single_threaded_default_platform(false).make_shared()),
            ..Default::default()
        });

        let heap = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap as *const HeapLimitState as *mut std::ffi::c_void,
        );

        Self {
            runtime,
            heap,
            limits: *limits,
        }
    }

    /// Strips the host globals, evaluates `code` and renders the result.
    /// Consumes the engine: one isolate, one snippet.
    pub fn run(mut self, code: &str) -> ScriptOutcome {
        let source = match self.wrap(code) {
            Ok(source) => source,
            Err(e) => return ScriptOutcome::Faulted(e.to_string()),
        };

        let executed = self.runtime.execute_script("[snipbox:run]", source);
        if self.heap.triggered.load(Ordering::SeqCst) {
            log::debug!("heap limit of {} bytes reached", self.limits.max_heap_bytes);
            return ScriptOutcome::Faulted(RESOURCE_LIMIT_MESSAGE.to_string());
        }

        let value = match executed {
            Ok(value) => value,
            Err(e) => {
                let message = e.to_string();
                log::debug!("snippet escaped the prelude: {}", message);
                let first = message.lines().next().unwrap_or_default();
                return ScriptOutcome::Faulted(
                    first.strip_prefix("Uncaught ").unwrap_or(first).to_string(),
                );
            }
        };

        let rendered = {
            let scope = &mut self.runtime.handle_scope();
            let local = v8::Local::new(scope, value);
            local.to_rust_string_lossy(scope)
        };

        match decode(&rendered, self.limits.max_output_bytes) {
            Ok(outcome) => outcome,
            Err(e) => ScriptOutcome::Faulted(e.to_string()),
        }
    }

    /// `(prelude)(config)(source)`, with both arguments as JSON literals.
    fn wrap(&self, code: &str) -> Result<String, ScriptError> {
        let config = json!({
            "maxOutputBytes": self.limits.max_output_bytes,
            "absentGlobals": CapabilityPolicy::locked().absent_globals(),
        });
        let source = serde_json::to_string(code)?;
        Ok(format!("({})({})({});", PRELUDE.trim_end().trim_end_matches(';'), config, source))
    }
}

fn decode(rendered: &str, max_output_bytes: usize) -> Result<ScriptOutcome, ScriptError> {
    let outcome = match serde_json::from_str::<Envelope>(rendered)? {
        Envelope::Ok(output) if output.len() > max_output_bytes => {
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        }
        Envelope::Ok(output) => ScriptOutcome::Completed(output),
        Envelope::Error(message) => ScriptOutcome::Faulted(message),
        Envelope::Overflow => ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string()),
    };
    Ok(outcome)
}
