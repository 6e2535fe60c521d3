use std::{
    hash::Hash,
    num::ParseIntError,
    time::{Duration, Instant},
};

use hashlink::LruCache;
use teloxide::types::ReplyParameters;

/// An LRU map whose entries also expire after a fixed duration.
pub struct ExpiringLru<K: Hash + Eq, V> {
    inner: LruCache<K, (V, Instant)>,
    expire: Duration,
}

impl<K: Hash + Eq, V> ExpiringLru<K, V> {
    pub fn new(capacity: usize, expire: Duration) -> Self {
        Self {
            inner: LruCache::new(capacity),
            expire,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.inner.insert(key, (value, Instant::now() + self.expire));
    }

    /// Take the entry out, ignoring it if it has expired.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, expire) = self.inner.remove(key)?;
        (expire >= Instant::now()).then_some(value)
    }

}

/// Parse a comma separated list of chat ids, e.g. `-1001, -1002`. Empty items
/// are skipped, so `","` clears the list.
pub fn parse_chat_ids(text: &str) -> Result<Vec<i64>, ParseIntError> {
    text.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::parse)
        .collect()
}

pub trait SendMessageSettersExt {
    fn reply_to_message_id_opt(self, message_id: Option<teloxide::types::MessageId>) -> Self;
}

impl<T: teloxide::payloads::SendMessageSetters> SendMessageSettersExt for T {
    fn reply_to_message_id_opt(self, message_id: Option<teloxide::types::MessageId>) -> Self {
        if let Some(message_id) = message_id {
            self.reply_parameters(ReplyParameters::new(message_id).allow_sending_without_reply())
        } else {
            self
        }
    }
}
