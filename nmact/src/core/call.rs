//! Correlation of in-flight calls with their callers.
//!
//! Every call gets a serial and a [`CallTag`] naming what it was aimed at.
//! A reply is only delivered if both match the entry that is still waiting,
//! so a late reply can never complete a different call. Calls that return
//! an object path are not completed directly: the correlator hands back an
//! [`Followup::AwaitObject`] and the caller is only woken once the object
//! cache has the object.

use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::oneshot;

use crate::api::models::{Error, ObjectPath, Result};
use crate::core::object_cache::{WaitPayload, WaitReply};
use crate::core::transport::Arg;

pub(crate) type Serial = u64;

/// What a call was aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallTag {
    pub target: ObjectPath,
    pub method: &'static str,
}

/// Pulls the awaited object path (and any extra data) out of a reply.
pub(crate) type Extract = fn(&[Arg]) -> Result<(ObjectPath, WaitPayload)>;

/// How to finish a call.
pub(crate) enum Completion {
    /// Hand the raw reply to the caller.
    Reply(oneshot::Sender<Result<Vec<Arg>>>),
    /// Wait for the returned object, then hand that over.
    Object { extract: Extract, reply: WaitReply },
}

/// What the worker must do after a reply was correlated.
pub(crate) enum Followup {
    Done,
    AwaitObject {
        path: ObjectPath,
        payload: WaitPayload,
        reply: WaitReply,
    },
}

struct InFlight {
    tag: CallTag,
    completion: Completion,
}

#[derive(Default)]
pub(crate) struct Correlator {
    next_serial: Serial,
    in_flight: HashMap<Serial, InFlight>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a call about to be issued.
    pub(crate) fn begin(&mut self, tag: CallTag, completion: Completion) -> Serial {
        self.next_serial += 1;
        let serial = self.next_serial;
        debug!("Call #{serial}: {} on {}", tag.method, tag.target);
        self.in_flight.insert(serial, InFlight { tag, completion });
        serial
    }

    /// Matches a reply against the call that is waiting for it.
    pub(crate) fn complete(&mut self, serial: Serial, tag: &CallTag, result: Result<Vec<Arg>>) -> Followup {
        let Some(entry) = self.in_flight.remove(&serial) else {
            debug!("Dropping reply #{serial} for {}: no longer waiting", tag.method);
            return Followup::Done;
        };
        if entry.tag != *tag {
            warn!(
                "Reply #{serial} is for {} on {}, expected {} on {}; dropping",
                tag.method, tag.target, entry.tag.method, entry.tag.target
            );
            self.in_flight.insert(serial, entry);
            return Followup::Done;
        }

        match entry.completion {
            Completion::Reply(reply) => {
                let _ = reply.send(result);
                Followup::Done
            }
            Completion::Object { extract, reply } => {
                match result.and_then(|args| extract(&args)) {
                    Ok((path, payload)) => Followup::AwaitObject {
                        path,
                        payload,
                        reply,
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Followup::Done
                    }
                }
            }
        }
    }

    /// Cancels a call still waiting for its reply.
    ///
    /// Returns `false` if the reply already arrived.
    pub(crate) fn cancel(&mut self, serial: Serial) -> bool {
        let Some(entry) = self.in_flight.remove(&serial) else {
            return false;
        };
        debug!("Call #{serial} ({}) cancelled", entry.tag.method);
        match entry.completion {
            Completion::Reply(reply) => {
                let _ = reply.send(Err(Error::Cancelled));
            }
            Completion::Object { reply, .. } => {
                let _ = reply.send(Err(Error::Cancelled));
            }
        }
        true
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// The first reply value is the object path.
pub(crate) fn first_path(args: &[Arg]) -> Result<(ObjectPath, WaitPayload)> {
    let path = path_at(args, 0)?;
    Ok((path, WaitPayload::default()))
}

/// `(o path, o active_connection)`: await the active connection and carry
/// the connection path.
pub(crate) fn added_and_activated(args: &[Arg]) -> Result<(ObjectPath, WaitPayload)> {
    let connection = path_at(args, 0)?;
    let active = path_at(args, 1)?;
    Ok((
        active,
        WaitPayload {
            connection: Some(connection),
            result: None,
        },
    ))
}

/// As [`added_and_activated`], plus the `a{sv}` result dictionary.
pub(crate) fn added_and_activated2(args: &[Arg]) -> Result<(ObjectPath, WaitPayload)> {
    let (active, mut payload) = added_and_activated(args)?;
    let result = args
        .get(2)
        .and_then(Arg::as_dict)
        .cloned()
        .ok_or_else(|| Error::UnexpectedReply("missing result dictionary".into()))?;
    payload.result = Some(result);
    Ok((active, payload))
}

fn path_at(args: &[Arg], idx: usize) -> Result<ObjectPath> {
    let path = args
        .get(idx)
        .and_then(Arg::as_path)
        .ok_or_else(|| Error::UnexpectedReply(format!("expected object path at position {idx}")))?;
    if path.is_root() {
        return Err(Error::UnexpectedReply("server returned no object".into()));
    }
    Ok(path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{PropValue, PropertyBag};

    fn path(s: &str) -> ObjectPath {
        ObjectPath::new(s).unwrap()
    }

    fn tag(method: &'static str) -> CallTag {
        CallTag {
            target: path("/org/freedesktop/NetworkManager"),
            method,
        }
    }

    #[test]
    fn raw_reply_reaches_caller() {
        let mut c = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        let serial = c.begin(tag("DeactivateConnection"), Completion::Reply(tx));
        assert!(matches!(
            c.complete(serial, &tag("DeactivateConnection"), Ok(vec![])),
            Followup::Done
        ));
        assert_eq!(rx.try_recv().unwrap(), Ok(vec![]));
        assert_eq!(c.in_flight(), 0);
    }

    #[test]
    fn mismatched_tag_is_not_delivered() {
        let mut c = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        let serial = c.begin(tag("ActivateConnection"), Completion::Reply(tx));
        c.complete(serial, &tag("CheckpointCreate"), Ok(vec![]));
        assert!(rx.try_recv().is_err());
        assert_eq!(c.in_flight(), 1);

        c.complete(serial, &tag("ActivateConnection"), Ok(vec![]));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn object_reply_becomes_await() {
        let mut c = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let serial = c.begin(
            tag("AddAndActivateConnection"),
            Completion::Object {
                extract: added_and_activated,
                reply: tx,
            },
        );
        let reply = vec![
            Arg::path(Some(&path("/org/freedesktop/NetworkManager/Settings/4"))),
            Arg::path(Some(&path("/org/freedesktop/NetworkManager/ActiveConnection/2"))),
        ];
        match c.complete(serial, &tag("AddAndActivateConnection"), Ok(reply)) {
            Followup::AwaitObject { path: p, payload, .. } => {
                assert_eq!(p, path("/org/freedesktop/NetworkManager/ActiveConnection/2"));
                assert_eq!(
                    payload.connection,
                    Some(path("/org/freedesktop/NetworkManager/Settings/4"))
                );
            }
            Followup::Done => panic!("expected an object wait"),
        }
    }

    #[test]
    fn transport_error_skips_object_wait() {
        let mut c = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        let serial = c.begin(
            tag("ActivateConnection"),
            Completion::Object {
                extract: first_path,
                reply: tx,
            },
        );
        let err = Error::Transport("Connection 'x' is not available".into());
        assert!(matches!(
            c.complete(serial, &tag("ActivateConnection"), Err(err.clone())),
            Followup::Done
        ));
        assert_eq!(rx.try_recv().unwrap(), Err(err));
    }

    #[test]
    fn cancel_completes_once() {
        let mut c = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        let serial = c.begin(tag("CheckpointCreate"), Completion::Reply(tx));
        assert!(c.cancel(serial));
        assert!(!c.cancel(serial));
        assert_eq!(rx.try_recv().unwrap(), Err(Error::Cancelled));
        // A late reply is dropped.
        assert!(matches!(
            c.complete(serial, &tag("CheckpointCreate"), Ok(vec![])),
            Followup::Done
        ));
    }

    #[test]
    fn extractors_reject_bad_replies() {
        assert!(first_path(&[]).is_err());
        assert!(first_path(&[Arg::path(None)]).is_err());
        assert!(first_path(&[Arg::Value(PropValue::U32(1))]).is_err());

        let two = [
            Arg::path(Some(&path("/a"))),
            Arg::path(Some(&path("/b"))),
        ];
        assert!(added_and_activated2(&two).is_err());

        let mut result = PropertyBag::new();
        result.insert("path".into(), PropValue::from("x"));
        let three = [two[0].clone(), two[1].clone(), Arg::Dict(result.clone())];
        let (active, payload) = added_and_activated2(&three).unwrap();
        assert_eq!(active, path("/b"));
        assert_eq!(payload.result, Some(result));
    }
}
