// src/web/socket.rs - WebSocket subscriber: bridges one hub queue to one connection
use crate::hub::{Subscriber, SubscriberQueue};
use crate::web::AppState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};

/// Register the connection with the hub and pump frames until either side goes away.
pub async fn serve_subscriber(socket: WebSocket, state: AppState) {
    let (subscriber, queue) = Subscriber::new(state.queue_capacity);
    let id = subscriber.id();
    if let Err(e) = state.hub.register(subscriber).await {
        tracing::warn!("Rejecting websocket subscriber: {}", e);
        return;
    }

    let (sink, stream) = socket.split();
    tokio::select! {
        _ = drain_queue(queue, sink) => {}
        _ = wait_for_close(stream) => {
            tracing::debug!("Websocket subscriber {} disconnected", id);
        }
    }
    let _ = state.hub.unregister(id).await;
}

/// Forward queued messages as text frames until the hub closes the queue.
pub async fn drain_queue<S>(mut queue: SubscriberQueue, mut sink: S)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = sink.send(Message::Text(message.as_ref().into())).await {
            tracing::debug!("Error while writing to subscriber {}: {}", queue.id(), e);
            return;
        }
    }
    let _ = sink.close().await;
}

async fn wait_for_close<S, E>(mut stream: S)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(Ok(message)) = stream.next().await {
        if let Message::Close(_) = message {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_bus::FrameBus;
    use crate::hub::{BroadcastHub, SHUTDOWN_NOTICE};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_drain_forwards_until_queue_closes() {
        let bus = FrameBus::new();
        let hub = BroadcastHub::new(bus.subscribe()).spawn();
        let (subscriber, queue) = Subscriber::new(8);
        hub.register(subscriber).await.unwrap();
        hub.stop().await;

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = futures_util::sink::unfold(sent.clone(), |sent, message: Message| async move {
            sent.lock().unwrap().push(message);
            Ok::<_, Infallible>(sent)
        });
        drain_queue(queue, Box::pin(sink)).await;
        assert_eq!(
            *sent.lock().unwrap(),
            vec![Message::Text(SHUTDOWN_NOTICE.into())]
        );
    }
}
