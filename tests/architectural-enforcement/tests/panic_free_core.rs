//! Integration Test: Panic-Free Core
//!
//! Every failure in a request (bad frames, dropped connections, server
//! errors) ends up as a message in the log. None of them may take the
//! process down.
//!
//! **Policy**: core production code MUST NOT call `.unwrap()` or `.expect(`.
//! Test modules are exempt.

use architectural_enforcement::{find_violations, report, workspace_root, Rule};

#[test]
fn test_no_unwrap_in_core() {
    let violations = find_violations(
        &workspace_root().join("streamer/core/src"),
        &[
            Rule {
                pattern: ".unwrap()",
                reason: "unwrap in production code",
            },
            Rule {
                pattern: ".expect(",
                reason: "expect in production code",
            },
        ],
    );
    report("Panicking calls found in core production code", &violations);
}
