//! # Delivery Flows
//!
//! Publisher → broker → subscriber, with the key exchange running over the
//! broker as well:
//!
//! 1. **Real-time**: encrypted messages arrive decrypted and in order
//! 2. **Gap repair**: a lost real-time message is resent and slotted in
//! 3. **Historical**: stored messages, then `on_done`
//! 4. **Combined**: stored then real-time, no gap and no duplicate at the seam

#[cfg(test)]
mod tests {
    use sc_04_subscription::{DeliveryMode, ResendSpec, SubscriptionApi, SubscriptionState};

    use crate::integration::harness::{
        eventually, fast_config, settle, Broker, Permissions, TestClient, STREAM,
    };

    fn numbered(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
        range.map(|i| format!("reading-{i}")).collect()
    }

    fn publish_all(client: &TestClient, contents: &[String]) {
        let publisher = client.publisher();
        for content in contents {
            publisher.publish(STREAM, 0, content.as_bytes()).unwrap();
        }
    }

    // =========================================================================
    // REAL-TIME
    // =========================================================================

    #[tokio::test]
    async fn test_realtime_messages_arrive_decrypted_in_order() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (_id, events) = bob.subscribed(DeliveryMode::RealTime).await;

        let expected = numbered(1..=5);
        publish_all(&alice, &expected);

        eventually("all readings", || events.received() == 5).await;
        assert_eq!(events.contents(), expected);
        assert_eq!(events.undecryptable(), 0);
        // One request covered the whole key.
        assert_eq!(broker.stored(&alice.inbox()), 1);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_message() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let carol = TestClient::connect(&broker, &permissions, fast_config());
        let (_, bob_events) = bob.subscribed(DeliveryMode::RealTime).await;
        let (_, carol_events) = carol.subscribed(DeliveryMode::RealTime).await;

        let expected = numbered(1..=3);
        publish_all(&alice, &expected);

        eventually("bob's readings", || bob_events.received() == 3).await;
        eventually("carol's readings", || carol_events.received() == 3).await;
        assert_eq!(bob_events.contents(), expected);
        assert_eq!(carol_events.contents(), expected);
        assert_eq!(alice.service.key_exchange().known_subscribers(STREAM), 2);
    }

    #[tokio::test]
    async fn test_lost_message_is_resent() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (_id, events) = bob.subscribed(DeliveryMode::RealTime).await;
        broker.drop_realtime(STREAM, 1);

        let expected = numbered(1..=4);
        publish_all(&alice, &expected);

        eventually("the lost reading", || events.received() == 4).await;
        assert_eq!(events.contents(), expected);
        assert!(events.errors().is_empty());
        assert!(stream_telemetry::GAP_FILL_REQUESTS.get() >= 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_client_stops_receiving() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (id, events) = bob.subscribed(DeliveryMode::RealTime).await;

        publish_all(&alice, &numbered(1..=1));
        eventually("first reading", || events.received() == 1).await;

        bob.service.unsubscribe(id).unwrap();
        let service = bob.service.clone();
        eventually("unsubscribe acknowledgement", move || service.subscription(id).is_none()).await;

        publish_all(&alice, &numbered(2..=2));
        settle().await;
        assert_eq!(events.contents(), numbered(1..=1));
    }

    // =========================================================================
    // HISTORICAL AND COMBINED
    // =========================================================================

    #[tokio::test]
    async fn test_historical_subscription_replays_and_completes() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());

        let stored = numbered(1..=3);
        publish_all(&alice, &stored);
        let (id, events) = bob.subscribe(DeliveryMode::Historical(ResendSpec::Last { count: 10 }));

        eventually("historical completion", || events.done_count() == 1).await;
        assert_eq!(events.contents(), stored);
        assert!(bob.service.subscription(id).is_none());

        publish_all(&alice, &numbered(4..=4));
        settle().await;
        assert_eq!(events.received(), 3);
        assert_eq!(events.done_count(), 1);
    }

    #[tokio::test]
    async fn test_combined_subscription_has_no_seam() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());

        publish_all(&alice, &numbered(1..=3));
        let (id, events) = bob.subscribe(DeliveryMode::Combined(ResendSpec::Last { count: 3 }));
        publish_all(&alice, &numbered(4..=6));

        eventually("stored and live readings", || events.received() >= 6).await;
        let subscription = bob.service.subscription(id).unwrap();
        eventually("end of resend", || !subscription.is_resending()).await;
        publish_all(&alice, &numbered(7..=7));
        eventually("post-seam reading", || events.received() >= 7).await;

        settle().await;
        assert_eq!(events.contents(), numbered(1..=7));
        assert_eq!(subscription.state(), SubscriptionState::Subscribed);
        assert_eq!(events.done_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_continues_where_it_left_off() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (id, events) = bob.subscribed(DeliveryMode::RealTime).await;

        publish_all(&alice, &numbered(1..=2));
        eventually("first readings", || events.received() == 2).await;

        bob.service.resubscribe(id).unwrap();
        let service = bob.service.clone();
        eventually("resubscribed", move || {
            service
                .subscription(id)
                .is_some_and(|s| s.state() == SubscriptionState::Subscribed)
        })
        .await;

        publish_all(&alice, &numbered(3..=4));
        eventually("later readings", || events.received() == 4).await;
        assert_eq!(events.contents(), numbered(1..=4));
    }
}
