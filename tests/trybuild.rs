/// Compile-fail tests for worker containment ordering
///
/// These tests verify that out-of-order containment steps fail to compile,
/// so a snippet can never be evaluated in a half-contained worker.

#[test]
fn typestate_compile_fail_tests() {
    let t = trybuild::TestCases::new();

    // Evaluating early fails to compile
    t.compile_fail("tests/typestate_compile_fail/evaluate_from_fresh.rs");
    t.compile_fail("tests/typestate_compile_fail/evaluate_from_hygienic.rs");

    // Skipped transitions fail to compile
    t.compile_fail("tests/typestate_compile_fail/skip_limits.rs");
    t.compile_fail("tests/typestate_compile_fail/lock_before_hygiene.rs");

    // State reuse fails to compile
    t.compile_fail("tests/typestate_compile_fail/reuse_consumed_state.rs");
}
