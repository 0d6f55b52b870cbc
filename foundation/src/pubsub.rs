//! Topic-filtered publish/subscribe bus.
//!
//! Topics are named fan-out channels; the name is a filter pattern.
//! Subscribing attaches a callback to the topic whose name equals the
//! filter, creating the topic on the fly when it does not exist yet.
//! Publishing walks the registered topics and, for every topic whose filter
//! matches the published (always concrete) topic, invokes that topic's
//! callbacks synchronously on the caller's context, in registration order.
//!
//! Filters may use MQTT-style wildcards: `+` matches exactly one `/`-level,
//! `#` matches everything from its position to the end and must be the last
//! token.
//!
//! Delivery takes time proportional to the number of matching subscribers;
//! route through a job queue when the publisher cannot afford that. The
//! matching callbacks are gathered under the broker lock but invoked after
//! it is released, so a callback may itself publish.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::pubsub::Broker;
//!
//! static BROKER: Broker = Broker::new();
//!
//! BROKER.create("sensor/temp").unwrap();
//! let id = BROKER.subscribe("sensor/+", &|payload: &[u8]| {
//!     assert_eq!(payload, b"23");
//! }).unwrap();
//! BROKER.publish("sensor/temp", b"23").unwrap();
//! BROKER.unsubscribe(id).unwrap();
//! ```

use core::fmt;

use spin::Mutex;

/// Topic names (and filters) are truncated to this many bytes.
pub const TOPIC_NAME_MAXLEN: usize = 32;

/// Failures surfaced by the bus API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "pubsub errors must be handled"]
pub enum PubSubError {
    Error,
    /// `create` with a name that is already registered.
    ExistTopic,
    /// `publish`/`destroy` naming a topic no filter matches.
    NoExistTopic,
    /// Topic or subscription table full.
    NoMemory,
    /// Empty name, malformed wildcard, or wildcard in a published topic.
    InvalidParam,
    /// The same callback is already attached to this topic.
    ExistSubscriber,
    /// `unsubscribe` with a stale handle.
    NoExistSubscriber,
}

impl fmt::Display for PubSubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "pubsub failure"),
            Self::ExistTopic => write!(f, "topic already exists"),
            Self::NoExistTopic => write!(f, "no such topic"),
            Self::NoMemory => write!(f, "pubsub table full"),
            Self::InvalidParam => write!(f, "invalid topic or filter"),
            Self::ExistSubscriber => write!(f, "subscriber already attached"),
            Self::NoExistSubscriber => write!(f, "no such subscriber"),
        }
    }
}

/// Subscriber callback: receives the published payload. Context lives in
/// the closure's captures; the reference must stay valid until
/// unsubscribed.
pub type Callback<'a> = &'a (dyn Fn(&[u8]) + Sync);

/// Handle returned by [`Broker::subscribe`]. Unique per broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u32);

#[derive(Clone, Copy)]
struct Topic {
    name: [u8; TOPIC_NAME_MAXLEN],
    name_len: u8,
}

impl Topic {
    fn matches(&self, name: &str) -> bool {
        self.name[..self.name_len as usize] == *name.as_bytes()
    }

    fn filter(&self) -> &str {
        // Names only ever come from `truncate_name`, which cuts on a char
        // boundary.
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

#[derive(Clone, Copy)]
struct Subscription<'a> {
    id: u32,
    filter: &'a str,
    callback: Callback<'a>,
    /// Owning topic, as a slot index into the topic table.
    topic: usize,
}

struct BrokerState<'a, const TOPICS: usize, const SUBS: usize> {
    topics: [Option<Topic>; TOPICS],
    /// Compact: `subs[..sub_count]` are occupied, in registration order.
    subs: [Option<Subscription<'a>>; SUBS],
    sub_count: usize,
    next_id: u32,
}

/// Publish/subscribe broker with fixed-capacity topic and subscription
/// tables.
///
/// `new` is `const`, so a broker can live in a `static`; callbacks that
/// need to publish from inside a delivery reach the broker that way.
pub struct Broker<'a, const TOPICS: usize = 8, const SUBS: usize = 16> {
    state: Mutex<BrokerState<'a, TOPICS, SUBS>>,
}

impl<'a, const TOPICS: usize, const SUBS: usize> Default for Broker<'a, TOPICS, SUBS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const TOPICS: usize, const SUBS: usize> Broker<'a, TOPICS, SUBS> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState {
                topics: [None; TOPICS],
                subs: [None; SUBS],
                sub_count: 0,
                next_id: 1,
            }),
        }
    }

    /// Register a topic.
    ///
    /// The name may itself be a filter pattern; it is truncated to
    /// [`TOPIC_NAME_MAXLEN`] bytes.
    pub fn create(&self, name: &str) -> Result<(), PubSubError> {
        let name = validate_filter(name)?;
        let mut state = self.state.lock();

        if state.topics.iter().flatten().any(|t| t.matches(name)) {
            return Err(PubSubError::ExistTopic);
        }
        let slot = state
            .topics
            .iter()
            .position(|t| t.is_none())
            .ok_or(PubSubError::NoMemory)?;

        state.topics[slot] = Some(new_topic(name));
        log::debug!("pubsub: topic {:?} created", name);
        Ok(())
    }

    /// Remove a topic and every subscription attached to it.
    ///
    /// Deliveries already collected by an in-flight `publish` still
    /// complete.
    pub fn destroy(&self, name: &str) -> Result<(), PubSubError> {
        let name = validate_filter(name)?;
        let mut state = self.state.lock();

        let slot = state
            .topics
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.matches(name)))
            .ok_or(PubSubError::NoExistTopic)?;

        state.topics[slot] = None;

        // Compact out this topic's subscriptions, preserving order.
        let mut keep = 0;
        for at in 0..state.sub_count {
            let sub = state.subs[at].unwrap();
            if sub.topic != slot {
                state.subs[keep] = Some(sub);
                keep += 1;
            }
        }
        for empty in keep..state.sub_count {
            state.subs[empty] = None;
        }
        state.sub_count = keep;
        Ok(())
    }

    /// Attach `callback` to the topic named exactly `filter`, creating the
    /// topic when absent.
    ///
    /// The filter reference is kept, not copied; it must stay valid for the
    /// subscription's lifetime. Statically allocated and heap-allocated
    /// callbacks go through this same slot table.
    pub fn subscribe(
        &self,
        filter: &'a str,
        callback: Callback<'a>,
    ) -> Result<SubscriptionId, PubSubError> {
        let name = validate_filter(filter)?;
        let mut state = self.state.lock();

        let topic = match state
            .topics
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.matches(name)))
        {
            Some(slot) => slot,
            None => {
                let slot = state
                    .topics
                    .iter()
                    .position(|t| t.is_none())
                    .ok_or(PubSubError::NoMemory)?;
                state.topics[slot] = Some(new_topic(name));
                slot
            }
        };

        let duplicate = state.subs[..state.sub_count].iter().flatten().any(|sub| {
            sub.topic == topic && callback_eq(sub.callback, callback)
        });
        if duplicate {
            return Err(PubSubError::ExistSubscriber);
        }

        if state.sub_count == SUBS {
            return Err(PubSubError::NoMemory);
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        let at = state.sub_count;
        state.subs[at] = Some(Subscription {
            id,
            filter,
            callback,
            topic,
        });
        state.sub_count += 1;
        Ok(SubscriptionId(id))
    }

    /// Detach a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PubSubError> {
        let mut state = self.state.lock();
        let at = state.subs[..state.sub_count]
            .iter()
            .position(|sub| sub.is_some_and(|s| s.id == id.0))
            .ok_or(PubSubError::NoExistSubscriber)?;

        for hole in at..state.sub_count - 1 {
            state.subs[hole] = state.subs[hole + 1];
        }
        let last = state.sub_count - 1;
        state.subs[last] = None;
        state.sub_count = last;
        Ok(())
    }

    /// Deliver `payload` to every subscription whose topic filter matches
    /// `topic`.
    ///
    /// `topic` must be concrete (no wildcards). Fails with
    /// [`PubSubError::NoExistTopic`] when no registered filter matches.
    /// Callbacks run on the caller's context after the broker lock is
    /// released.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubSubError> {
        if topic.is_empty() || has_wildcard(topic) {
            return Err(PubSubError::InvalidParam);
        }

        let mut pending: [Option<Callback<'a>>; SUBS] = [None; SUBS];
        let mut matched_topic = false;
        let mut n = 0;
        {
            let state = self.state.lock();
            for (slot, entry) in state.topics.iter().enumerate() {
                let Some(registered) = entry else { continue };
                if !filter_matches(registered.filter(), topic) {
                    continue;
                }
                matched_topic = true;
                for sub in state.subs[..state.sub_count].iter().flatten() {
                    if sub.topic == slot {
                        pending[n] = Some(sub.callback);
                        n += 1;
                    }
                }
            }
        }

        if !matched_topic {
            return Err(PubSubError::NoExistTopic);
        }

        log::trace!("pubsub: publishing {} bytes to {:?}", payload.len(), topic);
        for callback in pending.iter().flatten().take(n) {
            callback(payload);
        }
        Ok(())
    }

    /// Number of live subscriptions whose topic filter matches `topic`.
    pub fn count(&self, topic: &str) -> usize {
        let state = self.state.lock();
        let mut total = 0;
        for (slot, entry) in state.topics.iter().enumerate() {
            let Some(registered) = entry else { continue };
            if !filter_matches(registered.filter(), topic) {
                continue;
            }
            total += state.subs[..state.sub_count]
                .iter()
                .flatten()
                .filter(|sub| sub.topic == slot)
                .count();
        }
        total
    }

    /// The filter a subscription was registered with, if still live.
    pub fn filter_of(&self, id: SubscriptionId) -> Option<&'a str> {
        let state = self.state.lock();
        state.subs[..state.sub_count]
            .iter()
            .flatten()
            .find(|sub| sub.id == id.0)
            .map(|sub| sub.filter)
    }
}

fn new_topic(name: &str) -> Topic {
    let bytes = name.as_bytes();
    let mut topic = Topic {
        name: [0; TOPIC_NAME_MAXLEN],
        name_len: bytes.len() as u8,
    };
    topic.name[..bytes.len()].copy_from_slice(bytes);
    topic
}

/// Truncate to [`TOPIC_NAME_MAXLEN`] on a char boundary and check wildcard
/// structure: `#` only as the final token, `+` only as a whole token.
fn validate_filter(name: &str) -> Result<&str, PubSubError> {
    if name.is_empty() {
        return Err(PubSubError::InvalidParam);
    }
    let mut end = name.len().min(TOPIC_NAME_MAXLEN);
    while end > 0 && !name.is_char_boundary(end) {
        end -= 1;
    }
    let name = &name[..end];

    let mut tokens = name.split('/').peekable();
    while let Some(token) = tokens.next() {
        let last = tokens.peek().is_none();
        if token.contains('#') && (token != "#" || !last) {
            return Err(PubSubError::InvalidParam);
        }
        if token.contains('+') && token != "+" {
            return Err(PubSubError::InvalidParam);
        }
    }
    Ok(name)
}

fn has_wildcard(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}

/// MQTT-style match of a concrete `topic` against `filter`.
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_tokens = filter.split('/');
    let mut topic_tokens = topic.split('/');
    loop {
        match (filter_tokens.next(), topic_tokens.next()) {
            (None, None) => return true,
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(want), Some(have)) if want == have => {}
            _ => return false,
        }
    }
}

fn callback_eq(a: Callback<'_>, b: Callback<'_>) -> bool {
    // Compare the data pointers only; vtable identity is not stable.
    core::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}
