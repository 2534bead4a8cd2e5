use super::filter::{matches, validate};
use super::{Incoming, IncomingCallback, TopicRegistry};
use crate::transport::QoS;
use crate::utils::error::RegistryError;
use std::sync::{Arc, Mutex};

fn recording_callback() -> (IncomingCallback, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: IncomingCallback = Arc::new(move |msg: Incoming<'_>| {
        sink.lock()
            .unwrap()
            .push((msg.topic.to_string(), msg.payload.to_vec()));
    });
    (callback, seen)
}

#[test]
fn test_exact_filter_matches() {
    assert!(matches("a/b/c", "a/b/c"));
    assert!(!matches("a/b/c", "a/b"));
    assert!(!matches("a/b", "a/b/c"));
}

#[test]
fn test_single_level_wildcard() {
    assert!(matches("a/+/c", "a/b/c"));
    assert!(matches("a/+", "a/"));
    assert!(!matches("a/+", "a"));
    assert!(!matches("a/+/c", "a/b/d/c"));
}

#[test]
fn test_multi_level_wildcard() {
    assert!(matches("prefix/+/jobs/#", "prefix/dev1/jobs/notify-next"));
    assert!(matches("prefix/+/jobs/#", "prefix/dev1/jobs/J1/update/accepted"));
    assert!(matches("prefix/+/jobs/#", "prefix/dev1/jobs"));
    assert!(!matches("prefix/+/jobs/#", "prefix/dev1/streams/s/data"));
    assert!(matches("#", "anything/at/all"));
}

#[test]
fn test_system_topics_need_explicit_prefix() {
    assert!(!matches("#", "$aws/things/t/jobs"));
    assert!(!matches("+/things/t/jobs", "$aws/things/t/jobs"));
    assert!(matches("$aws/things/+/jobs", "$aws/things/t/jobs"));
}

#[test]
fn test_validate_rejects_misplaced_wildcards() {
    assert!(validate("a/#").is_ok());
    assert!(validate("a/+/b").is_ok());
    assert!(validate("").is_err());
    assert!(validate("a/#/b").is_err());
    assert!(validate("a/b#").is_err());
    assert!(validate("a/b+/c").is_err());
}

#[test]
fn test_register_and_dispatch() {
    let registry = TopicRegistry::new(4);
    let (callback, seen) = recording_callback();
    registry.register("dev/+/cmd", QoS::AtLeastOnce, callback).unwrap();

    assert!(registry.dispatch("dev/1/cmd", b"on"));
    assert!(!registry.dispatch("dev/1/status", b"ignored"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "dev/1/cmd");
    assert_eq!(seen[0].1, b"on");
}

#[test]
fn test_one_entry_per_filter() {
    let registry = TopicRegistry::new(4);
    let (first, first_seen) = recording_callback();
    let (second, second_seen) = recording_callback();

    registry.register("a/b", QoS::AtLeastOnce, first).unwrap();
    registry.register("a/b", QoS::AtMostOnce, second).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.subscriptions(),
        vec![("a/b".to_string(), QoS::AtMostOnce)]
    );

    registry.dispatch("a/b", b"x");
    assert!(first_seen.lock().unwrap().is_empty());
    assert_eq!(second_seen.lock().unwrap().len(), 1);
}

#[test]
fn test_registry_full() {
    let registry = TopicRegistry::new(1);
    let (callback, _) = recording_callback();
    registry.register("a", QoS::AtLeastOnce, callback.clone()).unwrap();
    assert_eq!(
        registry.register("b", QoS::AtLeastOnce, callback),
        Err(RegistryError::Full(1))
    );
}

#[test]
fn test_unregister() {
    let registry = TopicRegistry::new(2);
    let (callback, _) = recording_callback();
    registry.register("a/#", QoS::AtLeastOnce, callback).unwrap();
    assert!(registry.contains("a/#"));
    assert!(registry.unregister("a/#"));
    assert!(!registry.unregister("a/#"));
    assert!(registry.is_empty());
    assert!(!registry.dispatch("a/b", b""));
}

#[test]
fn test_callback_may_touch_registry() {
    let registry = TopicRegistry::new(2);
    let inner = registry.clone();
    let callback: IncomingCallback = Arc::new(move |msg: Incoming<'_>| {
        inner.unregister(msg.topic);
    });
    registry.register("once", QoS::AtLeastOnce, callback).unwrap();

    assert!(registry.dispatch("once", b""));
    assert!(!registry.contains("once"));
}
