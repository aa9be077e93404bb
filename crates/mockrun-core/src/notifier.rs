//! At-most-once completion signalling.
//!
//! Several observers can see an instance terminate: the watcher blocked on
//! the process or container, the explicit stop path, and the container
//! removal supervisor. Each of them sends an [`Event`] to one dispatcher
//! thread that owns the table of pending identities. The first event for a
//! registered identity settles its [`Completion`]; later events for the same
//! identity are dropped. Because only the dispatcher touches the table, the
//! check and the mark cannot interleave.

use crate::Completion;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Reference to the instance an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceRef {
    /// No subprocess or container was ever created for this cycle.
    NotLaunched,
    /// Backend identity: container ID or process ID.
    Id(String),
}

/// Report that an instance has terminated, with the wait error if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub instance: InstanceRef,
    pub error: Option<String>,
}

impl Event {
    pub fn exited(id: impl Into<String>) -> Self {
        Self {
            instance: InstanceRef::Id(id.into()),
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            instance: InstanceRef::Id(id.into()),
            error: Some(error.into()),
        }
    }

    pub fn not_launched() -> Self {
        Self {
            instance: InstanceRef::NotLaunched,
            error: None,
        }
    }

    /// A start cycle that failed before any instance existed.
    pub fn launch_failed(error: impl Into<String>) -> Self {
        Self {
            instance: InstanceRef::NotLaunched,
            error: Some(error.into()),
        }
    }
}

enum Message {
    Register {
        id: String,
        completion: Completion,
    },
    Notify {
        event: Event,
        completion: Completion,
    },
    Flush(Sender<()>),
}

/// Handle to the completion dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Message>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::spawn()
    }
}

impl Notifier {
    /// Start a dispatcher thread. It exits once every handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::spawn(move || dispatch(&rx));
        Self { tx }
    }

    /// Record that one notification is owed for `id`, settling `completion`.
    /// The caller has already added the obligation to `completion`.
    pub fn register(&self, completion: &Completion, id: &str) {
        trace!("registering instance {id}");
        self.send(Message::Register {
            id: id.to_owned(),
            completion: completion.clone(),
        });
    }

    /// Deliver a termination event. For a registered identity the completion
    /// given at registration is settled; `completion` is only used for
    /// [`InstanceRef::NotLaunched`], which is always eligible.
    pub fn notify(&self, completion: &Completion, event: Event) {
        self.send(Message::Notify {
            event,
            completion: completion.clone(),
        });
    }

    /// Block until every message sent before this call has been handled.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(Message::Flush(ack_tx));
        let _ = ack_rx.recv();
    }

    fn send(&self, msg: Message) {
        if self.tx.send(msg).is_err() {
            warn!("completion dispatcher is gone; event dropped");
        }
    }
}

fn dispatch(rx: &Receiver<Message>) {
    let mut pending: HashMap<String, Completion> = HashMap::new();

    for msg in rx {
        match msg {
            Message::Register { id, completion } => {
                if pending.insert(id.clone(), completion).is_some() {
                    warn!("instance {id} registered twice; keeping the latest registration");
                }
            }
            Message::Notify { event, completion } => match event.instance {
                InstanceRef::NotLaunched => {
                    if let Some(err) = &event.error {
                        warn!("engine not launched: {err}");
                    }
                    debug!("no instance was launched, completing immediately");
                    settle(&completion, "not-launched");
                }
                InstanceRef::Id(id) => {
                    let Some(owed) = pending.remove(&id) else {
                        trace!("instance {id} already completed, ignoring event");
                        continue;
                    };
                    if let Some(err) = &event.error {
                        warn!("instance {id} terminated with error: {err}");
                    }
                    debug!("instance {id} terminated");
                    settle(&owed, &id);
                }
            },
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn settle(completion: &Completion, label: &str) {
    if let Err(e) = completion.done() {
        warn!("completion for {label}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn first_notify_settles_later_ones_are_ignored() {
        let notifier = Notifier::spawn();
        let completion = Completion::new();
        completion.add(1);
        notifier.register(&completion, "abc");

        notifier.notify(&completion, Event::exited("abc"));
        notifier.notify(&completion, Event::exited("abc"));
        notifier.notify(&completion, Event::failed("abc", "late"));
        notifier.flush();

        assert_eq!(completion.pending(), 0);
    }

    #[test]
    fn unregistered_identity_is_ignored() {
        let notifier = Notifier::spawn();
        let completion = Completion::new();
        completion.add(1);
        notifier.notify(&completion, Event::exited("never-registered"));
        notifier.flush();
        assert_eq!(completion.pending(), 1);
    }

    #[test]
    fn not_launched_settles_supplied_completion() {
        let notifier = Notifier::spawn();
        let completion = Completion::new();
        completion.add(1);
        notifier.notify(&completion, Event::not_launched());
        assert!(completion.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn concurrent_notifies_settle_exactly_once() {
        for _ in 0..20 {
            let notifier = Notifier::spawn();
            let completion = Completion::new();
            // A second, unrelated obligation must survive the race.
            completion.add(2);
            notifier.register(&completion, "4242");

            let barrier = Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let notifier = notifier.clone();
                    let completion = completion.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        let event = if i % 2 == 0 {
                            Event::exited("4242")
                        } else {
                            Event::failed("4242", "wait failed")
                        };
                        notifier.notify(&completion, event);
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            notifier.flush();
            assert_eq!(completion.pending(), 1);
        }
    }

    #[test]
    fn distinct_identities_settle_independently() {
        let notifier = Notifier::spawn();
        let first = Completion::new();
        let second = Completion::new();
        first.add(1);
        second.add(1);
        notifier.register(&first, "one");
        notifier.register(&second, "two");

        notifier.notify(&first, Event::exited("two"));
        notifier.flush();
        assert_eq!(first.pending(), 1);
        assert_eq!(second.pending(), 0);
    }

    #[test]
    fn reregistration_after_completion_owes_again() {
        let notifier = Notifier::spawn();
        let completion = Completion::new();
        completion.add(1);
        notifier.register(&completion, "77");
        notifier.notify(&completion, Event::exited("77"));
        notifier.flush();
        assert_eq!(completion.pending(), 0);

        completion.add(1);
        notifier.register(&completion, "77");
        notifier.notify(&completion, Event::exited("77"));
        notifier.flush();
        assert_eq!(completion.pending(), 0);
    }
}
