use super::*;
use crate::model::{ConversationKind, MessageKind, Participant};

fn conversation(id: &str, created_at: i64, messages: Vec<Message>) -> Conversation {
    Conversation {
        id: id.to_owned(),
        kind: ConversationKind::Direct,
        participants: vec![Participant::Id("a".to_owned()), Participant::Id("b".to_owned())],
        group: None,
        messages,
        created_at,
    }
}

fn message(content: &str, created_at: i64) -> Message {
    Message { content: content.to_owned(), user: "b".to_owned(), seen: None, created_at, kind: MessageKind::Text }
}

fn online(id: &str) -> UserProfile {
    UserProfile { id: id.to_owned(), name: id.to_uppercase(), online: Some(true), ..UserProfile::default() }
}

#[test]
fn replace_all_keys_by_id() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![conversation("c1", 1, Vec::new()), conversation("c1", 2, Vec::new())]);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("c1").map(|c| c.created_at), Some(2));
}

#[test]
fn list_orders_by_latest_activity() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![
        conversation("old", 1, vec![message("x", 5)]),
        conversation("new", 2, vec![message("y", 50)]),
        conversation("empty", 20, Vec::new()),
    ]);
    let ids: Vec<String> = cache.list().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["new", "empty", "old"]);
}

#[test]
fn focus_requires_known_id_and_keeps_prior_focus() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![conversation("c1", 1, Vec::new())]);

    assert!(cache.focus("c1"));
    assert!(!cache.focus("nope"));
    assert_eq!(cache.focused_id(), Some("c1"));
    assert_eq!(cache.focused().map(|c| c.id.as_str()), Some("c1"));

    cache.clear_focus();
    assert!(cache.focused().is_none());
}

#[test]
fn replace_all_drops_focus_for_vanished_conversation() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![conversation("c1", 1, Vec::new()), conversation("c2", 1, Vec::new())]);
    cache.focus("c1");

    cache.replace_all(vec![conversation("c1", 1, Vec::new())]);
    assert_eq!(cache.focused_id(), Some("c1"));

    cache.replace_all(vec![conversation("c2", 1, Vec::new())]);
    assert!(cache.focused_id().is_none());
}

#[test]
fn presence_updates_only_touch_focused_conversation() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![conversation("c1", 1, Vec::new()), conversation("c2", 1, Vec::new())]);
    cache.focus("c1");

    let before = cache.get("c2").cloned();
    assert!(!cache.apply_presence("c2", &online("b")));
    assert_eq!(cache.get("c2").cloned(), before);

    assert!(cache.apply_presence("c1", &online("b")));
    let focused = cache.focused().expect("focused");
    assert_eq!(focused.participants[1], Participant::User(online("b")));
}

#[test]
fn presence_is_dropped_without_focus() {
    let mut cache = ConversationCache::new();
    cache.replace_all(vec![conversation("c1", 1, Vec::new())]);
    assert!(!cache.apply_presence("c1", &online("b")));
}

#[test]
fn push_message_targets_known_conversations_once() {
    let mut cache = ConversationCache::new();
    cache.upsert(conversation("c1", 1, Vec::new()));

    assert!(cache.push_message("c1", message("hi", 3)));
    assert!(!cache.push_message("c1", message("hi", 3)));
    assert!(!cache.push_message("missing", message("hi", 3)));
    assert_eq!(cache.get("c1").map(Conversation::unread_count), Some(1));
}
