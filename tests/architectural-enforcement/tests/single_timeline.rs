//! Integration Test: Single Event Timeline
//!
//! The conversation log and the session status are only ever touched from
//! the client's event loop. Transports talk to it through channels.
//!
//! **Policy**: core production code MUST NOT
//! - take locks (`Mutex`, `RwLock`): nothing is shared between tasks
//! - block the thread (`std::thread::sleep`, `block_on`): waiting is always
//!   an `.await`

use architectural_enforcement::{find_violations, report, workspace_root, Rule};

const CORE_SRC: &str = "streamer/core/src";

#[test]
fn test_no_locks_in_core() {
    let violations = find_violations(
        &workspace_root().join(CORE_SRC),
        &[
            Rule {
                pattern: "Mutex",
                reason: "Lock in single-timeline code",
            },
            Rule {
                pattern: "RwLock",
                reason: "Lock in single-timeline code",
            },
        ],
    );
    report("Locks found in core production code", &violations);
}

#[test]
fn test_no_blocking_waits_in_core() {
    let violations = find_violations(
        &workspace_root().join(CORE_SRC),
        &[
            Rule {
                pattern: "thread::sleep",
                reason: "Blocking sleep (use tokio::time)",
            },
            Rule {
                pattern: "block_on",
                reason: "Blocking on a future",
            },
            Rule {
                pattern: "blocking_recv",
                reason: "Blocking channel receive",
            },
        ],
    );
    report("Blocking waits found in core production code", &violations);
}

#[test]
fn test_no_blocking_sleep_in_cli() {
    let violations = find_violations(
        &workspace_root().join("streamer/cli/src"),
        &[Rule {
            pattern: "thread::sleep",
            reason: "Blocking sleep (use tokio::time)",
        }],
    );
    report("Blocking sleep found in CLI production code", &violations);
}
