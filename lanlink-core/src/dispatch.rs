//! Routing of decoded messages to typed handlers.
//!
//! A [`MessageDispatcher`] holds (prototype, handler) pairs: each
//! prototype is a [`MessageData`] value that knows which raw messages
//! it matches and how to parse itself out of one. [`process`] drains a
//! [`MessageEmitter`] and, for every queued message, parses it into
//! every matching prototype and invokes that prototype's handler with
//! the originating connection (if any). Messages no prototype claims
//! go to an optional fallback.
//!
//! [`process`]: MessageDispatcher::process

use tracing::trace;

use crate::message::{ConnectionId, Message};

/// A source of decoded inbound messages (client session or server
/// host).
pub trait MessageEmitter {
    fn has_queued_messages(&self) -> bool;
    fn pop_message(&self) -> Option<Message>;
}

/// A typed message record layered over the generic framing contract.
///
/// Implementations match on the type tag (and possibly a leading key
/// field), fill themselves from a raw message, and serialize back into
/// one. The dispatcher only ever calls these three operations.
pub trait MessageData {
    /// Whether this record claims `message`.
    fn matches(&self, message: &Message) -> bool;
    /// Fill this record's fields from `message`. Only called after
    /// [`matches`](MessageData::matches) returned true.
    fn parse(&mut self, message: &Message);
    /// Encode this record as a wire message.
    fn serialize(&self) -> Message;
}

type Route = Box<dyn FnMut(&Message) -> bool + Send>;
type Fallback = Box<dyn FnMut(&Message) + Send>;

/// Matches queued messages against registered prototypes.
#[derive(Default)]
pub struct MessageDispatcher {
    routes: Vec<Route>,
    fallback: Option<Fallback>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype and the handler invoked whenever an
    /// incoming message matches it. The prototype's fields hold the
    /// parsed values when the handler runs.
    pub fn add_handler<M, F>(&mut self, prototype: M, mut handler: F)
    where
        M: MessageData + Send + 'static,
        F: FnMut(&M, Option<ConnectionId>) + Send + 'static,
    {
        let mut prototype = prototype;
        self.routes.push(Box::new(move |message| {
            if !prototype.matches(message) {
                return false;
            }
            prototype.parse(message);
            handler(&prototype, message.origin());
            true
        }));
    }

    /// Register a handler for messages no prototype matched.
    pub fn on_unmatched<F>(&mut self, handler: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.fallback = Some(Box::new(handler));
    }

    /// Drain `emitter`, routing each message to every matching
    /// prototype's handler. Returns the number of messages drained.
    pub fn process(&mut self, emitter: &dyn MessageEmitter) -> usize {
        let mut drained = 0;
        while let Some(message) = emitter.pop_message() {
            drained += 1;
            let mut matched = false;
            for route in &mut self.routes {
                matched |= route(&message);
            }
            if !matched {
                trace!(message_type = %message.message_type(), "unmatched message");
                if let Some(fallback) = &mut self.fallback {
                    fallback(&message);
                }
            }
        }
        drained
    }
}

// ── Tests ────────────────────────────────────────────────────────
