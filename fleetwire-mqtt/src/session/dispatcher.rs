// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! Fans out incoming MQTT publishes to registered receivers by topic filter.

use std::collections::HashMap;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::control_packet::Publish;
use crate::topic::TopicFilter;

pub type PublishTx = UnboundedSender<Publish>;
pub type PublishRx = UnboundedReceiver<Publish>;

/// Routes incoming publishes to the receivers registered for matching topic filters.
#[derive(Default)]
pub struct IncomingPublishDispatcher {
    filtered_txs: HashMap<TopicFilter, Vec<PublishTx>>,
}

impl IncomingPublishDispatcher {
    /// Register a new receiver for `topic_filter`. Multiple receivers may be registered for
    /// the same (or an overlapping wildcard) filter; each receives every matching publish.
    pub fn create_filtered_receiver(&mut self, topic_filter: TopicFilter) -> PublishRx {
        self.prune_filtered_txs();

        let (tx, rx) = unbounded_channel();
        self.filtered_txs.entry(topic_filter).or_default().push(tx);
        rx
    }

    /// Dispatch `publish` to every receiver whose filter matches its topic. Returns the
    /// number of receivers the publish was sent to.
    pub fn dispatch_publish(&mut self, publish: &Publish) -> usize {
        let topic_name = match String::from_utf8(publish.topic.to_vec())
            .map_err(|_| ())
            .and_then(|s| crate::topic::TopicName::from_string(s).map_err(|_| ()))
        {
            Ok(name) => name,
            Err(()) => {
                log::warn!("dropping publish with unparseable topic");
                return 0;
            }
        };

        let mut num_dispatches = 0;
        let mut closed = Vec::new();

        for (topic_filter, txs) in &self.filtered_txs {
            if !topic_filter.matches_topic_name(&topic_name) {
                continue;
            }
            for (pos, tx) in txs.iter().enumerate() {
                match tx.send(publish.clone()) {
                    Ok(()) => num_dispatches += 1,
                    Err(_) => closed.push((topic_filter.clone(), pos)),
                }
            }
        }

        for (topic_filter, pos) in closed.into_iter().rev() {
            if let Some(v) = self.filtered_txs.get_mut(&topic_filter) {
                v.remove(pos);
                if v.is_empty() {
                    self.filtered_txs.remove(&topic_filter);
                }
            }
        }

        log::debug!(
            "dispatched publish on topic '{}' to {} receivers",
            topic_name,
            num_dispatches
        );
        num_dispatches
    }

    /// Number of receivers a publish on `topic_name` would currently be dispatched to.
    /// Used by the session to register the expected ack fanout before dispatching.
    pub fn fanout_for(&self, topic_name: &crate::topic::TopicName) -> usize {
        self.filtered_txs
            .iter()
            .filter(|(filter, _)| filter.matches_topic_name(topic_name))
            .map(|(_, txs)| txs.len())
            .sum()
    }

    fn prune_filtered_txs(&mut self) {
        self.filtered_txs.retain(|_, v| {
            v.retain(|tx| !tx.is_closed());
            !v.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_packet::QoS;

    fn publish(topic: &str) -> Publish {
        Publish::new(topic, QoS::AtMostOnce, Vec::new())
    }

    #[test]
    fn dispatches_to_matching_filter_only() {
        let mut dispatcher = IncomingPublishDispatcher::default();
        let mut matching = dispatcher.create_filtered_receiver(TopicFilter::parse("devices/+/telemetry").unwrap());
        let mut non_matching = dispatcher.create_filtered_receiver(TopicFilter::parse("fleet/alerts").unwrap());

        let n = dispatcher.dispatch_publish(&publish("devices/dev-1/telemetry"));
        assert_eq!(n, 1);
        assert!(matching.try_recv().is_ok());
        assert!(non_matching.try_recv().is_err());
    }

    #[test]
    fn fans_out_to_multiple_receivers_on_same_filter() {
        let mut dispatcher = IncomingPublishDispatcher::default();
        let filter = TopicFilter::parse("devices/#").unwrap();
        let mut rx1 = dispatcher.create_filtered_receiver(filter.clone());
        let mut rx2 = dispatcher.create_filtered_receiver(filter);

        let n = dispatcher.dispatch_publish(&publish("devices/dev-1/telemetry"));
        assert_eq!(n, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn prunes_closed_receivers() {
        let mut dispatcher = IncomingPublishDispatcher::default();
        {
            let _rx = dispatcher.create_filtered_receiver(TopicFilter::parse("devices/+/telemetry").unwrap());
        }
        let n = dispatcher.dispatch_publish(&publish("devices/dev-1/telemetry"));
        assert_eq!(n, 0);
        assert!(dispatcher.filtered_txs.is_empty());
    }
}
