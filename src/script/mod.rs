//! Snippet evaluation on an embedded V8 isolate with no host bindings.
//!
//! Everything a snippet can reach is created fresh by [`ScriptEngine::new`]
//! and dropped with it. There is no snapshot, compile cache or shared global
//! object, so two runs cannot observe each other.

pub mod engine;

pub use engine::ScriptEngine;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stack reserved for the thread that evaluates a snippet. V8's own stack
/// guard trips well inside it.
pub const EVAL_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Fault reported when captured output passes `max_output_bytes`.
pub const OUTPUT_LIMIT_MESSAGE: &str = "output limit exceeded";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("malformed engine envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLimits {
    pub max_output_bytes: usize,
    /// V8 old-generation ceiling; reaching it ends the run as a resource fault
    pub max_heap_bytes: usize,
}

impl ScriptLimits {
    /// The heap gets a quarter of the worker's address space. The rest holds
    /// V8's code range, the binary and thread stacks.
    pub fn for_memory_limit(max_output_bytes: usize, memory_limit_bytes: u64) -> Self {
        Self {
            max_output_bytes,
            max_heap_bytes: usize::try_from(memory_limit_bytes / 4).unwrap_or(usize::MAX),
        }
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
            max_heap_bytes: 256 * 1024 * 1024,
        }
    }
}

/// What one evaluation produced, before any process-level classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Completed(String),
    Faulted(String),
}

/// Builds an engine and evaluates `code` in it. The worker splits these two
/// steps to install its syscall filter in between.
pub fn run_script(code: &str, limits: &ScriptLimits) -> ScriptOutcome {
    ScriptEngine::new(limits).run(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(code: &str, limits: ScriptLimits) -> ScriptOutcome {
        let code = code.to_string();
        std::thread::Builder::new()
            .stack_size(EVAL_STACK_BYTES)
            .spawn(move || run_script(&code, &limits))
            .unwrap()
            .join()
            .unwrap()
    }

    fn run(code: &str) -> ScriptOutcome {
        run_with(code, ScriptLimits::default())
    }

    fn output(code: &str) -> String {
        match run(code) {
            ScriptOutcome::Completed(out) => out,
            other => panic!("{:?} did not complete: {:?}", code, other),
        }
    }

    fn fault(code: &str) -> String {
        match run(code) {
            ScriptOutcome::Faulted(message) => message,
            other => panic!("{:?} did not fault: {:?}", code, other),
        }
    }

    #[test]
    fn arithmetic_completes() {
        assert_eq!(output("1 + 1"), "2");
        assert_eq!(output("2 ** 10"), "1024");
        assert_eq!(output("0.1 + 0.2"), "0.30000000000000004");
        assert_eq!(output("7 % 3"), "1");
        assert_eq!(output("1 / 0"), "Infinity");
        assert_eq!(output("-0"), "0");
    }

    #[test]
    fn thrown_error_reports_its_message() {
        assert_eq!(fault("throw new Error('boom')"), "boom");
        assert_eq!(fault("throw 'plain'"), "plain");
        assert_eq!(fault("throw new TypeError()"), "TypeError");
        assert_eq!(fault("throw { code: 7 }"), r#"{"code":7}"#);
    }

    #[test]
    fn same_snippet_gives_same_output() {
        let code = "const xs = [5, 3, 9]; xs.map(x => x * 2).join('-')";
        assert_eq!(output(code), output(code));
        assert_eq!(output(code), "10-6-18");
    }

    #[test]
    fn console_lines_then_final_value() {
        assert_eq!(output("console.log('a'); console.log(1, [1, 2])"), "a\n1 [1,2]");
        assert_eq!(output("console.log('a'); 42"), "a\n42");
        assert_eq!(output("let x = 1;"), "undefined");
        assert_eq!(output("console.info('i'); console.error('e')"), "i\ne");
    }

    #[test]
    fn host_capabilities_do_not_exist() {
        assert!(fault("process.env.HOME").contains("process is not defined"));
        assert!(fault("require('fs')").contains("require is not defined"));
        assert!(fault("fetch('http://example.com')").contains("fetch is not defined"));
        assert!(fault("globalThis.process").contains("globalThis is not defined"));
        assert!(fault("Deno.core.ops").contains("Deno is not defined"));
        assert!(fault("Math.random()").contains("not a function"));
        assert!(fault("Date.now()").contains("Date is not defined"));
        assert!(fault("setTimeout(() => 1, 0)").contains("not defined"));
        assert!(fault("WebAssembly.Module").contains("not defined"));
        assert!(fault("new Intl.DateTimeFormat().format()").contains("Intl is not defined"));
        assert_eq!(output("typeof process"), "undefined");
    }

    #[test]
    fn code_generation_is_unreachable() {
        assert!(fault("eval('1 + 1')").contains("eval is not defined"));
        assert!(fault("Function('return 1')()").contains("Function is not defined"));
        let message = fault("[].map.constructor('return this')()");
        assert!(message.contains("is not a function"), "{}", message);
        assert!(!message.contains("expression"), "{}", message);
        assert_eq!(output("(() => 1).constructor"), "undefined");
    }

    #[test]
    fn console_cannot_be_replaced_by_the_snippet() {
        assert_eq!(output("console.log = null; console.log('still')"), "still");
    }

    #[test]
    fn runaway_recursion_faults() {
        assert_eq!(
            fault("function f() { return f(); } f()"),
            "Maximum call stack size exceeded"
        );
    }

    #[test]
    fn output_cap_faults() {
        let limits = ScriptLimits {
            max_output_bytes: 64,
            ..ScriptLimits::default()
        };
        assert_eq!(
            run_with("for (let i = 0; i < 100; i++) console.log('line ' + i)", limits),
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        );
        assert_eq!(
            run_with("'x'.repeat(100)", limits),
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        );
        assert_eq!(
            run_with("'é'.repeat(40)", limits),
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        );
    }

    #[test]
    fn catching_the_output_fault_does_not_help() {
        let limits = ScriptLimits {
            max_output_bytes: 16,
            ..ScriptLimits::default()
        };
        let code = "try { console.log('x'.repeat(100)) } catch (e) {} 'fine'";
        assert_eq!(
            run_with(code, limits),
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        );
    }

    #[test]
    fn sparse_array_output_hits_the_cap() {
        let limits = ScriptLimits {
            max_output_bytes: 1024,
            ..ScriptLimits::default()
        };
        assert_eq!(
            run_with("const a = []; a[9999999] = 1; a", limits),
            ScriptOutcome::Faulted(OUTPUT_LIMIT_MESSAGE.to_string())
        );
    }

    #[test]
    fn syntax_errors_fault() {
        assert_eq!(fault("1 +"), "Unexpected end of input");
        assert!(fault("let let = 1").contains("let is disallowed"));
    }

    #[test]
    fn runtime_type_errors() {
        assert!(fault("null.x").contains("Cannot read properties of null"));
        assert!(fault("const a = 1; a = 2").contains("Assignment to constant variable"));
        assert!(fault("let f = 1; f()").contains("f is not a function"));
        assert!(fault("'ab'.repeat(-1)").contains("Invalid count value: -1"));
    }

    #[test]
    fn closures_and_scoping() {
        let code = r#"
            function counter() {
                let n = 0;
                return () => ++n;
            }
            const c = counter();
            c(); c();
            c()
        "#;
        assert_eq!(output(code), "3");

        let code = r#"
            const fns = [];
            for (let i = 0; i < 3; i++) fns.push(() => i);
            fns.map(f => f())
        "#;
        assert_eq!(output(code), "[0,1,2]");
    }

    #[test]
    fn destructuring_and_spread() {
        assert_eq!(
            output("const [a, , b = 5, ...rest] = [1, 2, undefined, 4, 6]; [a, b, rest]"),
            "[1,5,[4,6]]"
        );
        assert_eq!(
            output("const { x, y: { z }, ...others } = { x: 1, y: { z: 2 }, w: 3 }; [x, z, others]"),
            r#"[1,2,{"w":3}]"#
        );
        assert_eq!(output("Math.max(...[1, 9, 3])"), "9");
        assert_eq!(output("({ ...{ a: 1 }, b: 2 })"), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn control_flow() {
        let code = r#"
            let out = [];
            for (const k in { a: 1, b: 2 }) out.push(k);
            for (const v of [3, 4]) out.push(v);
            let i = 0;
            do { i++; } while (i < 5);
            out.push(i);
            switch (i) {
                case 4: out.push('four'); break;
                case 5: out.push('five');
                default: out.push('fallthrough');
            }
            out.join(',')
        "#;
        assert_eq!(output(code), "a,b,3,4,5,five,fallthrough");
    }

    #[test]
    fn try_catch_finally() {
        let code = r#"
            const log = [];
            try {
                null.boom;
            } catch (e) {
                log.push(e instanceof TypeError, e.name);
            } finally {
                log.push('done');
            }
            log
        "#;
        assert_eq!(output(code), r#"[true,"TypeError","done"]"#);
        assert_eq!(fault("try { throw new RangeError('r') } finally { }"), "r");
    }

    #[test]
    fn classes_and_constructors() {
        let code = r#"
            function Point(x, y) { this.x = x; this.y = y; }
            Point.prototype.sum = function () { return this.x + this.y; };
            const p = new Point(2, 3);
            [p.sum(), p instanceof Point]
        "#;
        assert_eq!(output(code), "[5,true]");
        let code = r#"
            class Stack {
                #items = [];
                push(x) { this.#items.push(x); return this; }
                get size() { return this.#items.length; }
            }
            new Stack().push(1).push(2).size
        "#;
        assert_eq!(output(code), "2");
    }

    #[test]
    fn strings_are_utf16() {
        assert_eq!(output("'\\u{1F600}'.length"), "2");
        assert_eq!(output("[...'\\u{1F600}'].length"), "1");
        assert_eq!(output("'\\u{1F600}'.charCodeAt(0)"), "55357");
        assert_eq!(output("'\\u{1F600}'.codePointAt(0)"), "128512");
    }

    #[test]
    fn arrays_keep_named_properties() {
        assert_eq!(output("const a = [1]; a.foo = 3; a.foo"), "3");
        // JSON rendering only lists indices, as JSON.stringify does.
        assert_eq!(output("const a = [1]; a.foo = 3; a"), "[1]");
    }

    #[test]
    fn number_formatting_is_exact() {
        assert_eq!(output("(0.1).toString(2)"), "0.0001100110011001100110011001100110011001100110011001101");
        let code = r#"
            const s = (0.000001).toString(2);
            const back = [...s.slice(2)].reduce((acc, d, i) => acc + Number(d) * 2 ** -(i + 1), 0);
            [s.startsWith('0.' + '0'.repeat(19) + '1'), back === 0.000001]
        "#;
        assert_eq!(output(code), "[true,true]");
        assert_eq!(output("(255).toString(16) + ' ' + (3.14159).toFixed(2)"), "ff 3.14");
        assert_eq!(output("1e21"), "1e+21");
        assert_eq!(output("1.5e-7"), "1.5e-7");
    }

    #[test]
    fn string_and_array_builtins() {
        assert_eq!(output("'Hello'.toUpperCase() + ' ' + 'a-b-c'.split('-').length"), "HELLO 3");
        assert_eq!(output("[3, 1, 10, 2].sort()"), "[1,10,2,3]");
        assert_eq!(output("[3, 1, 10, 2].sort((a, b) => a - b)"), "[1,2,3,10]");
        assert_eq!(output("[1, 2, 3, 4].filter(x => x % 2).reduce((a, b) => a + b, 0)"), "4");
        assert_eq!(output("[[1, [2]], 3].flat(Infinity)"), "[1,2,3]");
        assert_eq!(output("'a.b.c'.replaceAll('.', '/')"), "a/b/c");
        assert_eq!(output("/b+/.exec('abbbc')[0]"), "bbb");
        assert_eq!(output("Object.entries({ a: 1 })"), r#"[["a",1]]"#);
        assert_eq!(output("Array.from({ length: 3 }, (_, i) => i * i)"), "[0,1,4]");
        assert_eq!(output("[...new Set([1, 1, 2])]"), "[1,2]");
    }

    #[test]
    fn json_round_trip() {
        assert_eq!(
            output(r#"JSON.stringify(JSON.parse('{"a":[1,{"b":null}]}'))"#),
            r#"{"a":[1,{"b":null}]}"#
        );
        assert!(fault("JSON.parse('{bad')").contains("JSON"));
        assert!(fault("const a = []; a.push(a); JSON.stringify(a)")
            .starts_with("Converting circular structure to JSON"));
    }

    #[test]
    fn result_formatting() {
        assert_eq!(output("[1, undefined, () => 1]"), "[1,null,null]");
        assert_eq!(output("({ a: undefined, b: NaN })"), r#"{"b":null}"#);
        assert_eq!(output("function named() {} named"), "[Function: named]");
        assert_eq!(output("(() => {})"), "[Function (anonymous)]");
        assert_eq!(output("new RangeError('bad')"), "RangeError: bad");
        assert_eq!(output("const a = [1]; a.push(a); a"), r#"[1,"[Circular]"]"#);
        assert_eq!(output("const o = {}; [o, o]"), "[{},{}]");
        assert_eq!(output("null"), "null");
        assert_eq!(output("'text'"), "text");
        assert_eq!(output("10n ** 20n"), "100000000000000000000");
    }

    #[test]
    fn deeply_nested_values_fault_instead_of_crashing() {
        let message = fault("let v = []; for (let i = 0; i < 1e6; i++) v = [v]; v");
        assert_eq!(message, "Maximum call stack size exceeded");
        let message = fault("let v = {}; for (let i = 0; i < 1e6; i++) v = { v }; console.log(v)");
        assert_eq!(message, "Maximum call stack size exceeded");
    }

    #[test]
    fn heap_exhaustion_is_a_resource_fault() {
        let limits = ScriptLimits {
            max_heap_bytes: 32 * 1024 * 1024,
            ..ScriptLimits::default()
        };
        let code = "const keep = []; while (true) keep.push(new Array(1e5).fill(keep.length));";
        assert_eq!(
            run_with(code, limits),
            ScriptOutcome::Faulted(crate::verdict::verdict::RESOURCE_LIMIT_MESSAGE.to_string())
        );
    }

    #[test]
    fn long_running_loops_are_not_stopped_by_the_engine() {
        assert_eq!(output("let s = 0; for (let i = 0; i < 100000; i++) s += i; s"), "4999950000");
    }

    #[test]
    fn heap_share_follows_the_memory_limit() {
        let limits = ScriptLimits::for_memory_limit(10, 1024 * 1024 * 1024);
        assert_eq!(limits.max_output_bytes, 10);
        assert_eq!(limits.max_heap_bytes, 256 * 1024 * 1024);
    }
}
