//! Point-to-point TCP transport.
//!
//! One logical message per connection: the sender dials, writes a single
//! encoded envelope, shuts down its write half, and closes. The listener
//! reads each accepted connection to EOF, decodes it, and enqueues the
//! message for the dispatcher.
//!
//! Inbound messages are handed to the registered [`MessageHandler`] on a
//! single dedicated thread, one at a time, in arrival order — the handler
//! never has to defend against concurrent invocations, and a chain reply is
//! processed before the mempool reply that follows it.
//!
//! The handler is held as a `Weak` back-reference: the node owns the
//! transport, the transport merely looks the node up per message. `PING` is
//! answered with `PONG` here, before the handler sees it.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use ghyll_core::error::NetError;

use crate::codec::Message;

/// Ceiling on a single outbound connect-and-write; a slow peer must not
/// block the sender beyond this.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling on draining one inbound connection.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives decoded messages from the dispatcher thread.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message, sender: SocketAddr);
}

/// TCP transport: a listening socket, a serial dispatcher, and per-message
/// outbound connections.
pub struct TcpTransport {
    local_port: u16,
    runtime: tokio::runtime::Handle,
    handler: RwLock<Option<Weak<dyn MessageHandler>>>,
    inbox: Mutex<Option<mpsc::Sender<(Message, SocketAddr)>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Bind the listening socket (port 0 picks an ephemeral port), start the
    /// accept loop and the dispatcher thread.
    pub async fn bind(port: u16) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_port = listener.local_addr()?.port();
        let (inbox_tx, inbox_rx) = mpsc::channel();

        let transport = Arc::new(Self {
            local_port,
            runtime: tokio::runtime::Handle::current(),
            handler: RwLock::new(None),
            inbox: Mutex::new(Some(inbox_tx)),
            accept_task: Mutex::new(None),
        });

        let for_dispatch = Arc::downgrade(&transport);
        std::thread::Builder::new()
            .name(format!("ghyll-dispatch-{local_port}"))
            .spawn(move || dispatch_loop(inbox_rx, for_dispatch))?;

        let accept = tokio::spawn(Self::accept_loop(listener, Arc::clone(&transport)));
        *transport.accept_task.lock() = Some(accept);
        Ok(transport)
    }

    /// The port the listener is bound to.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Install the inbound handler. Stored weakly; dropping the handler
    /// silently stops dispatch.
    pub fn set_handler(&self, handler: Weak<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Send one message to `to` on a fresh connection.
    ///
    /// Fire-and-forget: the write happens on a spawned task with
    /// [`SEND_TIMEOUT`] applied, so the caller returns immediately and a
    /// stalled peer cannot block it. Failures are logged and swallowed.
    pub fn send(&self, message: Message, to: SocketAddr) {
        let from_port = self.local_port;
        self.runtime.spawn(async move {
            if let Err(e) = send_once(&message, from_port, to).await {
                debug!(%to, command = ?message.command(), error = %e, "send failed");
            }
        });
    }

    /// Stop accepting and dispatching. In-flight outbound sends may still
    /// complete.
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        // Dropping the sender lets the dispatcher thread drain and exit.
        self.inbox.lock().take();
    }

    async fn accept_loop(listener: TcpListener, transport: Arc<Self>) {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                if let Err(e) = transport.serve_connection(stream, remote).await {
                    debug!(%remote, error = %e, "dropping inbound message");
                }
            });
        }
    }

    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<(), NetError> {
        let mut data = Vec::new();
        timeout(READ_TIMEOUT, stream.read_to_end(&mut data))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(|e| NetError::Io(e.to_string()))?;

        let (message, from_port) = Message::decode(&data)?;
        let sender = SocketAddr::new(remote.ip(), from_port);

        if matches!(message, Message::Ping) {
            self.send(Message::Pong, sender);
        }

        if let Some(inbox) = self.inbox.lock().as_ref() {
            let _ = inbox.send((message, sender));
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serial handler loop: one message at a time, in arrival order.
fn dispatch_loop(
    inbox: mpsc::Receiver<(Message, SocketAddr)>,
    transport: Weak<TcpTransport>,
) {
    while let Ok((message, sender)) = inbox.recv() {
        let Some(transport) = transport.upgrade() else {
            break;
        };
        let handler = transport.handler.read().clone().and_then(|weak| weak.upgrade());
        drop(transport);
        if let Some(handler) = handler {
            handler.handle(message, sender);
        }
    }
}

async fn send_once(message: &Message, from_port: u16, to: SocketAddr) -> Result<(), NetError> {
    let bytes = message.encode(from_port)?;
    let mut stream = timeout(SEND_TIMEOUT, TcpStream::connect(to))
        .await
        .map_err(|_| NetError::Timeout)?
        .map_err(|e| NetError::Io(e.to_string()))?;
    timeout(SEND_TIMEOUT, stream.write_all(&bytes))
        .await
        .map_err(|_| NetError::Timeout)?
        .map_err(|e| NetError::Io(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| NetError::Io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VersionPayload;

    struct Recorder {
        sink: mpsc::Sender<(Message, SocketAddr)>,
    }

    impl MessageHandler for Recorder {
        fn handle(&self, message: Message, sender: SocketAddr) {
            let _ = self.sink.send((message, sender));
        }
    }

    async fn transport_with_recorder() -> (
        Arc<TcpTransport>,
        Arc<Recorder>,
        mpsc::Receiver<(Message, SocketAddr)>,
    ) {
        let transport = TcpTransport::bind(0).await.unwrap();
        let (tx, rx) = mpsc::channel();
        let recorder = Arc::new(Recorder { sink: tx });
        transport.set_handler(Arc::downgrade(&recorder) as Weak<dyn MessageHandler>);
        (transport, recorder, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn message_reaches_handler_with_listening_endpoint() {
        let (receiver, _keep, inbox) = transport_with_recorder().await;
        let (sender, _keep2, _inbox2) = transport_with_recorder().await;

        let to = SocketAddr::from(([127, 0, 0, 1], receiver.local_port()));
        sender.send(
            Message::Version(VersionPayload { version: 1, block_height: 4 }),
            to,
        );

        let (message, from) = inbox.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(
            message,
            Message::Version(VersionPayload { version: 1, block_height: 4 })
        );
        // The reported endpoint is the sender's *listening* port, not the
        // ephemeral connection port.
        assert_eq!(from.port(), sender.local_port());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_is_answered_with_pong() {
        let (receiver, _keep, _inbox) = transport_with_recorder().await;
        let (sender, _keep2, sender_inbox) = transport_with_recorder().await;

        let to = SocketAddr::from(([127, 0, 0, 1], receiver.local_port()));
        sender.send(Message::Ping, to);

        let (message, from) = sender_inbox.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(message, Message::Pong);
        assert_eq!(from.port(), receiver.local_port());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn messages_dispatch_in_arrival_order() {
        let (receiver, _keep, inbox) = transport_with_recorder().await;
        let (sender, _keep2, _inbox2) = transport_with_recorder().await;

        let to = SocketAddr::from(([127, 0, 0, 1], receiver.local_port()));
        for height in 0..20u64 {
            let bytes = Message::Version(VersionPayload { version: 1, block_height: height })
                .encode(sender.local_port())
                .unwrap();
            // Write sequentially on the test task so arrival order is fixed.
            let mut stream = TcpStream::connect(to).await.unwrap();
            stream.write_all(&bytes).await.unwrap();
            stream.shutdown().await.unwrap();
        }

        for expected in 0..20u64 {
            let (message, _) = inbox.recv_timeout(Duration::from_secs(3)).unwrap();
            match message {
                Message::Version(v) => assert_eq!(v.block_height, expected),
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_handler_stops_dispatch() {
        let transport = TcpTransport::bind(0).await.unwrap();
        let (tx, rx) = mpsc::channel();
        {
            let recorder = Arc::new(Recorder { sink: tx });
            transport.set_handler(Arc::downgrade(&recorder) as Weak<dyn MessageHandler>);
            // recorder dropped here
        }

        let (sender, _keep, _inbox) = transport_with_recorder().await;
        let to = SocketAddr::from(([127, 0, 0, 1], transport.local_port()));
        sender.send(Message::Ping, to);

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_stops_accepting() {
        let (receiver, _keep, inbox) = transport_with_recorder().await;
        let (sender, _keep2, _inbox2) = transport_with_recorder().await;
        receiver.shutdown();
        // Give the abort a beat to land before dialing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let to = SocketAddr::from(([127, 0, 0, 1], receiver.local_port()));
        sender.send(Message::Ping, to);
        assert!(inbox.recv_timeout(Duration::from_millis(500)).is_err());
    }
}
