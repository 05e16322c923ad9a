use serde::Serialize;

use super::channel::EventChannel;
use super::event::ClassificationEvent;
use crate::error::Result;

/// Where a published event landed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub event_id: String,
    pub partition: u32,
    pub sequence_number: i64,
}

/// Publish a classification event, partitioned by category.
///
/// An event without an id is stamped with its content hash, so a producer
/// retrying the same classification publishes the same id twice and the
/// consumer stores one vertex.
pub async fn publish_event(channel: &dyn EventChannel, mut event: ClassificationEvent) -> Result<PublishReceipt> {
    let event_id = event.event_id();
    event.event_id = Some(event_id.clone());

    let payload = event.to_payload()?;
    let (partition, sequence_number) = channel.publish(event.category.as_str(), &payload).await?;
    log::debug!(
        "Published event {} to partition {} at sequence {}",
        event_id,
        partition,
        sequence_number
    );

    Ok(PublishReceipt {
        event_id,
        partition,
        sequence_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Category, GraphStore, Label, MemoryGraphStore, RiskLevel};
    use crate::ingest::channel::MemoryEventChannel;
    use crate::ingest::pipeline::IngestPipeline;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample(event_id: Option<&str>) -> ClassificationEvent {
        ClassificationEvent {
            event_id: event_id.map(str::to_string),
            category: Category::DigitalArrest,
            confidence: 0.92,
            risk_level: RiskLevel::High,
            source: "whatsapp".to_string(),
            sender: "+91-9876500004".to_string(),
            message: Some("CBI officer here, you are under digital arrest".to_string()),
        }
    }

    #[tokio::test]
    async fn test_publish_assigns_id_once() {
        let channel = MemoryEventChannel::new(4);
        let receipt = publish_event(&channel, sample(None)).await.unwrap();
        assert_eq!(receipt.event_id, sample(None).derived_event_id());

        let delivery = channel
            .receive(receipt.partition, 0, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let stored = ClassificationEvent::parse(&delivery.payload).unwrap();
        assert_eq!(stored.event_id(), receipt.event_id);
    }

    #[tokio::test]
    async fn test_publish_keeps_supplied_id_and_partitions_by_category() {
        let channel = MemoryEventChannel::new(4);
        let first = publish_event(&channel, sample(Some("evt_7"))).await.unwrap();
        let second = publish_event(&channel, sample(Some("evt_8"))).await.unwrap();
        assert_eq!(first.event_id, "evt_7");
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.sequence_number, first.sequence_number + 1);
    }

    #[tokio::test]
    async fn test_republished_event_without_id_stored_once() {
        let channel = Arc::new(MemoryEventChannel::new(4));
        let store = Arc::new(MemoryGraphStore::new());

        let first = publish_event(channel.as_ref(), sample(None)).await.unwrap();
        let retry = publish_event(channel.as_ref(), sample(None)).await.unwrap();
        assert_eq!(first.event_id, retry.event_id);
        assert_ne!(first.sequence_number, retry.sequence_number);

        let summaries = IngestPipeline::new(store.clone(), channel, "$Default")
            .drain()
            .await
            .unwrap();
        assert_eq!(summaries.iter().map(|s| s.committed).sum::<u64>(), 2);
        assert_eq!(store.count_vertices(Some(Label::FraudEvent)).await.unwrap(), 1);
    }
}
