// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

// ── classify_frame ────────────────────────────────────────────────────

#[test]
fn result_frames_become_result_events() {
    let event =
        classify_frame(r#"{"id":100,"type":"result","success":true,"result":{"done": 1}}"#);
    let Some(UpstreamEvent::Result { id, success, payload }) = event else {
        panic!("expected result event");
    };
    assert_eq!(id, 100);
    assert!(success);
    assert_eq!(payload.as_deref(), Some(r#"{"done": 1}"#));
}

#[test]
fn result_missing_success_is_failed() {
    let Some(UpstreamEvent::Result { success, payload, .. }) =
        classify_frame(r#"{"id":101,"type":"result"}"#)
    else {
        panic!("expected result event");
    };
    assert!(!success);
    assert!(payload.is_none());
}

#[test]
fn subscription_events_carry_verbatim_new_state() {
    let text = r#"{"id":1,"type":"event","event":{"data":{"entity_id":"light.kitchen","new_state":{"entity_id":"light.kitchen","state":"on","attributes":{}}}}}"#;
    let Some(UpstreamEvent::State { entity_id, new_state }) = classify_frame(text) else {
        panic!("expected state event");
    };
    assert_eq!(entity_id, "light.kitchen");
    assert_eq!(new_state, r#"{"entity_id":"light.kitchen","state":"on","attributes":{}}"#);
}

#[test]
fn events_with_other_ids_are_dropped() {
    let text = r#"{"id":2,"type":"event","event":{"data":{"entity_id":"e","new_state":{}}}}"#;
    assert!(classify_frame(text).is_none());
}

#[test]
fn incomplete_events_are_dropped() {
    // Missing new_state.
    assert!(classify_frame(
        r#"{"id":1,"type":"event","event":{"data":{"entity_id":"light.kitchen"}}}"#
    )
    .is_none());
    // Missing entity_id.
    assert!(classify_frame(r#"{"id":1,"type":"event","event":{"data":{"new_state":{}}}}"#)
        .is_none());
    // Missing data entirely.
    assert!(classify_frame(r#"{"id":1,"type":"event","event":{}}"#).is_none());
}

#[test]
fn unrelated_and_malformed_frames_are_dropped() {
    assert!(classify_frame(r#"{"type":"pong","id":7}"#).is_none());
    assert!(classify_frame("garbage").is_none());
}
