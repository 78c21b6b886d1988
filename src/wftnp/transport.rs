//! Owns the single TCP connection: drives the receive loop, correlates
//! responses to requests, and fans out unsolicited notifications.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::TransportError;
use crate::wftnp::frame::{Frame, MessageType};
use crate::wftnp::uuid16;

/// Invoked for every type-6 frame with `(characteristic_uuid, value_bytes)`.
/// May be async; never invoked while holding any transport lock.
pub type NotificationCallback = Arc<dyn Fn(Uuid, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

type PendingKey = (u8, u8);
type PendingSender = oneshot::Sender<(u8, Vec<u8>)>;
type PendingTable = StdMutex<HashMap<PendingKey, PendingSender>>;

struct Inner {
    writer: Mutex<Option<OwnedWriteHalf>>,
    // A plain std Mutex, not tokio's: every critical section here is a
    // quick insert/remove with no `.await` inside it, and the synchronous
    // access lets `PendingGuard::drop` clean up without an executor.
    pending: PendingTable,
    sequence: Mutex<u8>,
    control_point_uuid: RwLock<Option<Uuid>>,
    control_point_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    control_point_tx: mpsc::UnboundedSender<Vec<u8>>,
    callback: RwLock<Option<NotificationCallback>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

/// A live WFTNP connection to one trainer.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Removes `key` from `pending` on drop. Held for the lifetime of a
/// `request()` call so that dropping the call's future early — the
/// caller lost a race in a `select!`, or wrapped the call in a
/// `tokio::time::timeout` that fired — can't leave a sequence number
/// permanently "live" with nothing left to complete it.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    key: PendingKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().unwrap().remove(&self.key);
    }
}

impl Transport {
    /// Opens one TCP connection, enables `TCP_NODELAY` best-effort, and
    /// spawns the receive loop. The sequence counter and pending table
    /// start fresh for every new connection.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY unavailable: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let (cp_tx, cp_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            writer: Mutex::new(Some(write_half)),
            pending: StdMutex::new(HashMap::new()),
            sequence: Mutex::new(0),
            control_point_uuid: RwLock::new(None),
            control_point_rx: Mutex::new(cp_rx),
            control_point_tx: cp_tx,
            callback: RwLock::new(None),
            receive_task: Mutex::new(None),
        });

        let loop_inner = inner.clone();
        let handle = tokio::spawn(async move { receive_loop(loop_inner, read_half).await });
        *inner.receive_task.lock().await = Some(handle);

        Ok(Self { inner })
    }

    /// Cancels the receive loop, shuts down the connection, fails all
    /// pending requests, and empties the control-point mailbox.
    pub async fn close(&self) {
        if let Some(handle) = self.inner.receive_task.lock().await.take() {
            handle.abort();
        }
        close_internal(&self.inner).await;
    }

    /// Installs the handler invoked for every unsolicited notification.
    pub async fn set_notification_callback(&self, cb: NotificationCallback) {
        *self.inner.callback.write().await = Some(cb);
    }

    /// Caches the FTMS control-point UUID so the receive loop can route
    /// its indications into the mailbox in addition to the user callback.
    pub async fn set_control_point_uuid(&self, uuid: Uuid) {
        *self.inner.control_point_uuid.write().await = Some(uuid);
    }

    /// Assigns a new sequence, writes the framed request, and awaits the
    /// correlated response. A non-zero `response_code` is surfaced as
    /// `TransportError::Rejected` rather than returned to the caller.
    ///
    /// Cancellation-safe: if this future is dropped before the response
    /// arrives (e.g. raced against a `timeout` or `select!` branch), the
    /// pending-table entry for `(message_type, sequence)` is removed by
    /// `PendingGuard` on drop, so the sequence is never left "live" with
    /// no one left to complete it.
    pub async fn request(
        &self,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let sequence = self.next_sequence().await;
        let key = (message_type.as_u8(), sequence);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(key, tx);
        let guard = PendingGuard {
            pending: &self.inner.pending,
            key,
        };

        let frame = Frame::request(message_type, sequence, payload);
        if let Err(e) = self.write_frame(&frame).await {
            drop(guard);
            return Err(e);
        }

        let result = rx.await;
        drop(guard);
        match result {
            Ok((response_code, payload)) if response_code == 0 => Ok(payload),
            Ok((response_code, _)) => Err(TransportError::Rejected {
                message_type: message_type.as_u8(),
                response_code,
            }),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Waits up to `timeout` for the next control-point mailbox entry.
    /// Entries are pushed by the receive loop whenever a notification's
    /// UUID matches the cached control-point UUID.
    pub async fn recv_control_point(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.inner.control_point_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                what: "control-point indication",
            }),
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut guard = self.inner.writer.lock().await;
        match guard.as_mut() {
            Some(w) => frame.write_to(w).await,
            None => Err(TransportError::Closed),
        }
    }

    async fn next_sequence(&self) -> u8 {
        let mut seq = self.inner.sequence.lock().await;
        *seq = seq.wrapping_add(1);
        *seq
    }
}

async fn close_internal(inner: &Arc<Inner>) {
    if let Some(mut w) = inner.writer.lock().await.take() {
        let _ = w.shutdown().await;
    }
    inner.pending.lock().unwrap().clear();
    let mut rx = inner.control_point_rx.lock().await;
    while rx.try_recv().is_ok() {}
}

async fn receive_loop(inner: Arc<Inner>, mut reader: OwnedReadHalf) {
    loop {
        match Frame::read_from(&mut reader).await {
            Ok(frame) if frame.message_type == MessageType::Notification.as_u8() => {
                handle_notification(&inner, frame.payload).await;
            }
            Ok(frame) => {
                let key = (frame.message_type, frame.sequence);
                let sender = inner.pending.lock().unwrap().remove(&key);
                match sender {
                    Some(tx) => {
                        let _ = tx.send((frame.response_code, frame.payload));
                    }
                    None => {
                        warn!(
                            "dropping unmatched frame type={} seq={}",
                            frame.message_type, frame.sequence
                        );
                    }
                }
            }
            Err(e) => {
                debug!("receive loop ending: {e}");
                break;
            }
        }
    }
    close_internal(&inner).await;
}

async fn handle_notification(inner: &Arc<Inner>, payload: Vec<u8>) {
    if payload.len() < 16 {
        warn!("notification payload shorter than a UUID, dropping");
        return;
    }
    let uuid = match uuid16::from_wire_bytes(&payload[..16]) {
        Some(u) => u,
        None => {
            warn!("notification carried an unparseable UUID, dropping");
            return;
        }
    };
    let value = payload[16..].to_vec();

    if inner.control_point_uuid.read().await.as_ref() == Some(&uuid) {
        let _ = inner.control_point_tx.send(value.clone());
    }

    let cb = inner.callback.read().await.clone();
    if let Some(cb) = cb {
        let fut = cb(uuid, value);
        tokio::spawn(async move {
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                warn!("notification callback panicked; error swallowed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = Transport::connect("127.0.0.1", addr.port());
        let (server_stream, client) = tokio::join!(
            async { listener.accept().await.unwrap().0 },
            client_fut
        );
        (client.unwrap(), server_stream)
    }

    #[tokio::test]
    async fn request_resolves_on_matching_response() {
        let (transport, mut server) = loopback_pair().await;

        let server_task = tokio::spawn(async move {
            let mut header = [0u8; 6];
            server.read_exact(&mut header).await.unwrap();
            let data_len = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut payload = vec![0u8; data_len];
            server.read_exact(&mut payload).await.unwrap();
            let response = Frame {
                message_type: header[1],
                sequence: header[2],
                response_code: 0,
                payload: vec![0xAA],
            };
            server.write_all(&response.encode()).await.unwrap();
        });

        let result = transport
            .request(MessageType::DiscoverServices, vec![])
            .await
            .unwrap();
        assert_eq!(result, vec![0xAA]);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn request_surfaces_nonzero_response_code_as_rejected() {
        let (transport, mut server) = loopback_pair().await;

        tokio::spawn(async move {
            let mut header = [0u8; 6];
            server.read_exact(&mut header).await.unwrap();
            let response = Frame {
                message_type: header[1],
                sequence: header[2],
                response_code: 7,
                payload: vec![],
            };
            server.write_all(&response.encode()).await.unwrap();
        });

        let err = transport
            .request(MessageType::ReadCharacteristic, vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected {
                response_code: 7,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_increment() {
        let (transport, mut server) = loopback_pair().await;

        let server_task = tokio::spawn(async move {
            for _ in 0..2 {
                let mut header = [0u8; 6];
                server.read_exact(&mut header).await.unwrap();
                assert_eq!(header[4], 0);
                assert_eq!(header[5], 0);
                let response = Frame {
                    message_type: header[1],
                    sequence: header[2],
                    response_code: 0,
                    payload: vec![],
                };
                server.write_all(&response.encode()).await.unwrap();
            }
        });

        transport
            .request(MessageType::DiscoverServices, vec![])
            .await
            .unwrap();
        transport
            .request(MessageType::DiscoverServices, vec![])
            .await
            .unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn notification_matching_control_point_uuid_reaches_mailbox() {
        let (transport, mut server) = loopback_pair().await;
        let cp_uuid = uuid16::FITNESS_MACHINE_CONTROL_POINT;
        transport.set_control_point_uuid(cp_uuid).await;

        let mut payload = uuid16::to_wire_bytes(&cp_uuid).to_vec();
        payload.extend_from_slice(&[0x80, 0x00, 0x01]);
        let notification = Frame {
            message_type: MessageType::Notification.as_u8(),
            sequence: 0,
            response_code: 0,
            payload,
        };
        server.write_all(&notification.encode()).await.unwrap();

        let mailbox_entry = transport
            .recv_control_point(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(mailbox_entry, vec![0x80, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn user_callback_invoked_for_other_notifications() {
        let (transport, mut server) = loopback_pair().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        transport
            .set_notification_callback(Arc::new(move |_uuid, _value| {
                let counter = counter_clone.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;

        let mut payload = uuid16::to_wire_bytes(&uuid16::INDOOR_BIKE_DATA).to_vec();
        payload.extend_from_slice(&[0x01, 0x00, 0x64, 0x00]);
        let notification = Frame {
            message_type: MessageType::Notification.as_u8(),
            sequence: 0,
            response_code: 0,
            payload,
        };
        server.write_all(&notification.encode()).await.unwrap();

        // Give the spawned callback task a chance to run.
        for _ in 0..20 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_fails_pending_requests_with_closed() {
        let (transport, _server) = loopback_pair().await;
        let transport_clone = transport.clone();
        let request_task = tokio::spawn(async move {
            transport_clone
                .request(MessageType::DiscoverServices, vec![])
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close().await;
        let result = request_task.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn dropping_a_request_future_removes_its_pending_entry() {
        let (transport, _server) = loopback_pair().await;

        {
            // Nothing ever answers this request; dropping the future before
            // it resolves must not leave the sequence's entry behind.
            let fut = transport.request(MessageType::DiscoverServices, vec![]);
            tokio::pin!(fut);
            tokio::time::timeout(Duration::from_millis(10), &mut fut)
                .await
                .expect_err("nothing answers, so this should time out and drop `fut`");
        }

        assert_eq!(transport.inner.pending.lock().unwrap().len(), 0);
    }
}
