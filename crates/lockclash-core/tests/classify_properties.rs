//! Property-based tests for failure classification.
//!
//! Classification must be pure and the state code must always win over
//! the message text.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use lockclash_core::{
    classify,
    classify::{SQLSTATE_DEADLOCK, SQLSTATE_LOCK_WAIT_TIMEOUT},
    classify_signal, FailureClass, LockFailure,
};
use proptest::prelude::*;

fn fast_config() -> ProptestConfig {
    ProptestConfig {
        cases: 64,
        max_shrink_iters: 256,
        ..ProptestConfig::default()
    }
}

/// Codes that carry no meaning for classification.
fn neutral_code_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        "[0-9A-Z]{5}"
            .prop_filter("must not be a known code", |code| {
                code != SQLSTATE_DEADLOCK && code != SQLSTATE_LOCK_WAIT_TIMEOUT
            })
            .prop_map(Some),
    ]
}

/// Messages that mention neither deadlocks nor lock-wait timeouts.
fn neutral_message_strategy() -> impl Strategy<Value = String> {
    "[a-z ]{0,40}".prop_filter("must be neutral", |message| {
        !message.contains("deadlock") && !message.contains("lock wait timeout")
    })
}

fn any_message_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        neutral_message_strategy(),
        Just("Deadlock found when trying to get lock".to_string()),
        Just("Lock wait timeout exceeded; try restarting transaction".to_string()),
        ".{0,60}",
    ]
}

proptest! {
    #![proptest_config(fast_config())]

    #[test]
    fn classify_is_pure(code in neutral_code_strategy(), message in any_message_strategy()) {
        let failure = LockFailure::engine(message.clone(), code.clone());
        let first = classify(&failure);
        let second = classify(&failure.clone());
        prop_assert_eq!(first, second);
        prop_assert_eq!(first, classify_signal(code.as_deref(), &message));
    }

    #[test]
    fn deadlock_code_beats_any_message(message in any_message_strategy()) {
        let failure = LockFailure::engine(message, Some(SQLSTATE_DEADLOCK));
        prop_assert_eq!(classify(&failure), FailureClass::Deadlock);
    }

    #[test]
    fn timeout_code_beats_any_message(message in any_message_strategy()) {
        let failure = LockFailure::engine(message, Some(SQLSTATE_LOCK_WAIT_TIMEOUT));
        prop_assert_eq!(classify(&failure), FailureClass::Timeout);
    }

    #[test]
    fn message_fallback_is_case_insensitive(
        code in neutral_code_strategy(),
        prefix in neutral_message_strategy(),
        upper in any::<bool>(),
    ) {
        let keyword = if upper { "DEADLOCK" } else { "Deadlock" };
        let failure = LockFailure::engine(format!("{prefix}{keyword} detected"), code);
        prop_assert_eq!(classify(&failure), FailureClass::Deadlock);
    }

    #[test]
    fn neutral_signal_is_error(
        code in neutral_code_strategy(),
        message in neutral_message_strategy(),
    ) {
        prop_assert_eq!(classify_signal(code.as_deref(), &message), FailureClass::Error);
    }

    #[test]
    fn not_found_is_always_error(target in any::<i64>(), table in "[a-z_]{1,20}") {
        let failure = LockFailure::NotFound { table, target };
        prop_assert_eq!(classify(&failure), FailureClass::Error);
        prop_assert!(!failure.is_retryable());
    }
}
