//! # Key Rotation Flows
//!
//! How subscribers follow a publisher's key changes:
//!
//! - attached next key: learned from the message itself
//! - rotation: AES announce on the stream under the old key
//! - rekey: RSA announce to each still-permitted subscriber; revoked ones
//!   are left without the new key

#[cfg(test)]
mod tests {
    use sc_04_subscription::DeliveryMode;
    use shared_crypto::GroupKey;

    use crate::integration::harness::{eventually, fast_config, settle, Broker, Permissions, TestClient, STREAM};

    #[tokio::test]
    async fn test_attached_next_key_needs_no_request() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (_id, events) = bob.subscribed(DeliveryMode::RealTime).await;
        let publisher = alice.publisher();

        publisher
            .publish_with_next_key(STREAM, 0, "first", GroupKey::generate())
            .unwrap();
        eventually("first message", || events.received() == 1).await;

        publisher.publish(STREAM, 0, "second").unwrap();
        eventually("second message", || events.received() == 2).await;

        assert_eq!(events.contents(), vec!["first", "second"]);
        assert_eq!(broker.stored(&alice.inbox()), 1);
    }

    #[tokio::test]
    async fn test_rotation_is_announced_on_the_stream() {
        let broker = Broker::new();
        let permissions = Default::default();
        let alice = TestClient::connect(&broker, &permissions, fast_config());
        let bob = TestClient::connect(&broker, &permissions, fast_config());
        let (_id, events) = bob.subscribed(DeliveryMode::RealTime).await;
        let publisher = alice.publisher();

        publisher.publish(STREAM, 0, "before").unwrap();
        eventually("message under the first key", || events.received() == 1).await;

        publisher.rotate(STREAM).unwrap();
        publisher.publish(STREAM, 0, "after").unwrap();
        eventually("message under the rotated key", || events.received() == 2).await;

        assert_eq!(events.contents(), vec!["before", "after"]);
        assert_eq!(broker.stored(&alice.inbox()), 1);
        assert_eq!(events.undecryptable(), 0);
    }

    #[tokio::test]
    async fn test_rekey_leaves_revoked_subscriber_behind() {
        let broker = Broker::new();
        let permissions: std::sync::Arc<Permissions> = Default::default();
        let mut config = fast_config();
        config.decryption.max_key_requests = 2;
        let alice = TestClient::connect(&broker, &permissions, config.clone());
        let bob = TestClient::connect(&broker, &permissions, config.clone());
        let carol = TestClient::connect(&broker, &permissions, config);
        let (_, bob_events) = bob.subscribed(DeliveryMode::RealTime).await;
        let (_, carol_events) = carol.subscribed(DeliveryMode::RealTime).await;
        let publisher = alice.publisher();

        publisher.publish(STREAM, 0, "shared").unwrap();
        eventually("bob's first message", || bob_events.received() == 1).await;
        eventually("carol's first message", || carol_events.received() == 1).await;
        assert_eq!(alice.service.key_exchange().known_subscribers(STREAM), 2);

        permissions.revoke(carol.address());
        publisher.rekey(STREAM).unwrap();
        assert_eq!(alice.service.key_exchange().known_subscribers(STREAM), 1);

        publisher.publish(STREAM, 0, "bob only").unwrap();
        eventually("bob's second message", || bob_events.received() == 2).await;
        settle().await;

        assert_eq!(bob_events.contents(), vec!["shared", "bob only"]);
        assert_eq!(carol_events.contents(), vec!["shared"]);
    }
}
