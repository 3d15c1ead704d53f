//! Registry behavior under concurrent callers from many threads.
//!
//! The registry is the only state shared across worker lanes, so these
//! tests hammer it directly: membership must never duplicate, publishes
//! must reach exactly the connections subscribed at some instant during
//! the call, and racing logins must resolve to one winner.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use stompmq::{Frame, FrameSink, Registry};

/// Sink that just counts delivered frames.
struct CountingSink {
    delivered: AtomicU64,
}

impl CountingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: AtomicU64::new(0),
        })
    }

    fn count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl FrameSink for CountingSink {
    fn send_frame(&self, _frame: Frame) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_concurrent_subscribes_never_duplicate() {
    let registry = Arc::new(Registry::new());
    let num_threads = 16;

    // Every thread subscribes the same connection to the same topic.
    let mut handles = Vec::new();
    for _ in 0..num_threads {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                registry.subscribe(1, "/news");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.subscribers("/news"), vec![1]);
}

#[test]
fn test_concurrent_subscribe_unsubscribe_keeps_set_consistent() {
    let registry = Arc::new(Registry::new());
    let num_threads = 8;

    let mut handles = Vec::new();
    for id in 0..num_threads as u64 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                registry.subscribe(id, "/news");
                registry.unsubscribe(id, "/news");
            }
        }));
    }

    // Observer: at no instant may the set contain a duplicate id.
    let observer = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for _ in 0..2000 {
                let snapshot = registry.subscribers("/news");
                let unique: HashSet<u64> = snapshot.iter().copied().collect();
                assert_eq!(unique.len(), snapshot.len(), "duplicate subscriber id");
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    observer.join().unwrap();

    // Every thread ended on an unsubscribe, so the topic is gone.
    assert!(registry.subscribers("/news").is_empty());
}

#[test]
fn test_concurrent_publish_reaches_stable_subscribers() {
    let registry = Arc::new(Registry::new());
    let subscribers: Vec<Arc<CountingSink>> = (0..4)
        .map(|id| {
            let sink = CountingSink::new();
            registry.register_connection(id, sink.clone());
            registry.subscribe(id, "/news");
            sink
        })
        .collect();

    let num_publishers = 8;
    let publishes_each = 100;
    let mut handles = Vec::new();
    for publisher in 0..num_publishers {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            for n in 0..publishes_each {
                let message_id = registry.next_message_id();
                let frame = Frame::message(
                    "/news",
                    1,
                    &format!("publisher-{}", publisher),
                    message_id,
                    &format!("message {}", n),
                );
                registry.publish("/news", frame);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Subscriber set never changed during the run, so every publish
    // reached every subscriber exactly once.
    let expected = (num_publishers * publishes_each) as u64;
    for sink in &subscribers {
        assert_eq!(sink.count(), expected);
    }
}

#[test]
fn test_message_ids_are_unique_across_threads() {
    let registry = Arc::new(Registry::new());
    let ids: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let ids = Arc::clone(&ids);
        handles.push(thread::spawn(move || {
            let mut local = Vec::with_capacity(1000);
            for _ in 0..1000 {
                local.push(registry.next_message_id());
            }
            ids.lock().extend(local);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let ids = ids.lock();
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 8000);
    assert_eq!(unique.len(), 8000);
    assert_eq!(*ids.iter().max().unwrap(), 8000);
}

#[test]
fn test_racing_logins_resolve_to_one_winner() {
    let registry = Arc::new(Registry::new());

    let mut handles = Vec::new();
    for id in 0..16u64 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || registry.login("alice", id)));
    }
    let winners: Vec<bool> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(winners.iter().filter(|won| **won).count(), 1);
    assert!(registry.is_logged_in("alice"));
}

#[test]
fn test_racing_credential_registration_is_first_write_wins() {
    let registry = Arc::new(Registry::new());

    let mut handles = Vec::new();
    for n in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            registry.register_credentials("bob", &format!("password-{}", n));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(registry.user_exists("bob"));
    let matching = (0..8)
        .filter(|n| registry.credentials_match("bob", &format!("password-{}", n)))
        .count();
    assert_eq!(matching, 1);
}

#[test]
fn test_remove_connection_races_with_publish() {
    let registry = Arc::new(Registry::new());
    for id in 0..8u64 {
        registry.register_connection(id, CountingSink::new());
        registry.subscribe(id, "/news");
    }

    let publisher = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for n in 0..500 {
                registry.publish("/news", Frame::message("/news", 1, "alice", n, "x"));
            }
        })
    };
    let remover = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for id in 0..8u64 {
                registry.remove_connection(id);
            }
        })
    };

    publisher.join().unwrap();
    remover.join().unwrap();

    // All connections are gone, their topic memberships with them.
    assert!(registry.subscribers("/news").is_empty());
    for id in 0..8u64 {
        assert!(!registry.deliver(id, Frame::new("MESSAGE")));
    }
}
