//! Change-event notification tests over real sockets.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use lattice_primitives::{
        ChangeEvent, ChangeEventPublisher, PrimitiveError, ValueProxy, VersionedValue,
    };
    use lattice_transport::{
        ClientConfig, Connection, ExecutionContext, ServerConfig, TransportClient, TransportError,
        TransportServer,
    };

    use crate::harness::{init_tracing, loopback_member, wait_for};

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn committed(old: (&[u8], u64), new: (&[u8], u64)) -> ChangeEvent {
        ChangeEvent::new(
            VersionedValue::new(old.0.to_vec(), old.1),
            VersionedValue::new(new.0.to_vec(), new.1),
        )
        .unwrap()
    }

    async fn publishing_server(
        context: &ExecutionContext,
        publisher: &ChangeEventPublisher,
        conn_tx: mpsc::UnboundedSender<Connection>,
    ) -> (TransportServer, lattice_transport::Member) {
        let server = TransportServer::new(ServerConfig::default());
        let binding = server.clone();
        let subscribing = publisher.clone();
        let bound = context
            .submit(move || {
                binding.listen(loopback_member(0), move |connection: Connection| {
                    subscribing.subscribe(connection.clone());
                    let _ = conn_tx.send(connection);
                })
            })
            .await
            .unwrap()
            .await
            .unwrap();
        (server, bound)
    }

    async fn subscribed_proxy(
        context: &ExecutionContext,
        bound: &lattice_transport::Member,
    ) -> mpsc::UnboundedReceiver<(VersionedValue, VersionedValue)> {
        let client = TransportClient::new(ClientConfig::default());
        let member = bound.clone();
        let connection = context
            .submit(move || client.connect(&member))
            .await
            .unwrap()
            .await
            .unwrap();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        context
            .submit(move || {
                let proxy = ValueProxy::new(connection);
                proxy.subscribe(
                    move |new_value: &VersionedValue, old_value: &VersionedValue| {
                        let _ = event_tx.send((new_value.clone(), old_value.clone()));
                    },
                )
            })
            .await
            .unwrap()
            .unwrap();
        event_rx
    }

    async fn publish(
        context: &ExecutionContext,
        publisher: &ChangeEventPublisher,
        event: ChangeEvent,
    ) -> lattice_primitives::PublishOutcome {
        let publishing = publisher.clone();
        context
            .submit(move || publishing.publish(&event))
            .await
            .unwrap()
            .unwrap()
            .await
    }

    #[tokio::test]
    async fn committed_change_reaches_subscriber_once() {
        init_tracing();
        let context = ExecutionContext::new("events");
        let publisher = ChangeEventPublisher::new();
        let (conn_tx, _conn_rx) = mpsc::unbounded_channel();
        let (_server, bound) = publishing_server(&context, &publisher, conn_tx).await;
        let mut events = subscribed_proxy(&context, &bound).await;

        {
            let publisher = publisher.clone();
            assert!(wait_for(move || publisher.len() == 1).await);
        }

        let outcome = publish(
            &context,
            &publisher,
            committed((b"v1", 1), (b"v2", 2)),
        )
        .await;
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.failures.is_empty());

        let (new_value, old_value) = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert_eq!(new_value.version, 2);
        assert_eq!(new_value.value, b"v2");
        assert_eq!(old_value.version, 1);
        assert_eq!(old_value.value, b"v1");
        assert!(new_value.version > old_value.version);

        // Exactly once: nothing else arrives for this commit.
        let next = publish(
            &context,
            &publisher,
            committed((b"v2", 2), (b"v3", 3)),
        )
        .await;
        assert_eq!(next.delivered, 1);
        let (new_value, _) = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert_eq!(new_value.version, 3);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_events_are_dropped_by_proxy() {
        init_tracing();
        let context = ExecutionContext::new("stale-events");
        let publisher = ChangeEventPublisher::new();
        let (conn_tx, _conn_rx) = mpsc::unbounded_channel();
        let (_server, bound) = publishing_server(&context, &publisher, conn_tx).await;
        let mut events = subscribed_proxy(&context, &bound).await;

        {
            let publisher = publisher.clone();
            assert!(wait_for(move || publisher.len() == 1).await);
        }

        publish(&context, &publisher, committed((b"v1", 1), (b"v2", 2))).await;
        // A replayed commit still reaches the transport, but the proxy
        // drops it: the versions a listener observes strictly increase.
        publish(&context, &publisher, committed((b"v1", 1), (b"v2", 2))).await;
        publish(&context, &publisher, committed((b"v2", 2), (b"v3", 3))).await;

        let (first, _) = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        let (second, _) = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        assert_eq!(first.version, 2);
        assert_eq!(second.version, 3);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_subscriber_is_surfaced_not_torn_down() {
        init_tracing();
        let context = ExecutionContext::new("failed-subscriber");
        let publisher = ChangeEventPublisher::new();
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
        let (server, bound) = publishing_server(&context, &publisher, conn_tx).await;
        let mut healthy = subscribed_proxy(&context, &bound).await;
        let _other = subscribed_proxy(&context, &bound).await;

        let mut accepted = Vec::new();
        for _ in 0..2 {
            accepted.push(timeout(RECV_TIMEOUT, conn_rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(publisher.len(), 2);

        // Close one subscribed connection out from under the publisher.
        let casualty = accepted[1].clone();
        let casualty_id = casualty.id();
        context
            .submit(move || casualty.close())
            .await
            .unwrap()
            .await
            .unwrap();

        let outcome = publish(&context, &publisher, committed((b"v1", 1), (b"v2", 2))).await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failures.len(), 1);
        let (failed_id, error) = &outcome.failures[0];
        assert_eq!(*failed_id, casualty_id);
        assert!(matches!(error, TransportError::ConnectionClosed));

        // No automatic teardown: the dead subscriber stays until the
        // session layer unsubscribes it.
        assert_eq!(publisher.len(), 2);
        publisher.unsubscribe(casualty_id);
        assert_eq!(publisher.len(), 1);

        let (new_value, _) = timeout(RECV_TIMEOUT, healthy.recv()).await.unwrap().unwrap();
        assert_eq!(new_value.version, 2);
        drop(server);
    }

    #[tokio::test]
    async fn publish_requires_execution_context() {
        init_tracing();
        let publisher = ChangeEventPublisher::new();
        let event = committed((b"v1", 1), (b"v2", 2));
        let err = publisher.publish(&event).map(|_| ()).unwrap_err();
        assert!(matches!(
            err,
            PrimitiveError::Transport(TransportError::ContextViolation { .. })
        ));
    }
}
