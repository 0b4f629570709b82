//! Named publish/subscribe channels between clients

use std::collections::{BTreeSet, HashMap};

use tessera_proto::ClientId;

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    subscribers: HashMap<String, BTreeSet<ClientId>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: &str, client: ClientId) {
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(client);
    }

    /// Subscribers of `channel` in ascending id order
    pub fn subscribers(&self, channel: &str) -> Vec<ClientId> {
        self.subscribers
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn drop_client(&mut self, client: ClientId) {
        self.subscribers.retain(|_, set| {
            set.remove(&client);
            !set.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriptions_end_with_the_client() {
        let mut channels = ChannelRegistry::new();
        channels.register("clock", 1);
        channels.register("clock", 2);
        channels.register("clock", 1);
        assert_eq!(channels.subscribers("clock"), vec![1, 2]);
        channels.drop_client(1);
        assert_eq!(channels.subscribers("clock"), vec![2]);
        channels.drop_client(2);
        assert!(channels.subscribers("clock").is_empty());
        assert!(channels.subscribers("other").is_empty());
    }
}
