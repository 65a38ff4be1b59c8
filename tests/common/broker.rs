//! Minimal MQTT 3.1.1 broker speaking just enough of the protocol to drive
//! `RumqttTransport` from tests.
//!
//! Every packet a client sends is recorded by type. CONNECT, SUBSCRIBE, PINGREQ and both
//! halves of the QoS 1/2 publish handshakes are answered; PUBREC can be held back to
//! catch a client that disconnects before its publish completes.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const PUBREL: u8 = 6;
pub const SUBSCRIBE: u8 = 8;
pub const PINGREQ: u8 = 12;
pub const DISCONNECT: u8 = 14;

enum Frame {
    Bytes(Vec<u8>),
    Close,
}

pub struct FakeBroker {
    port: u16,
    packets: Arc<Mutex<Vec<u8>>>,
    connection: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>,
    pubrec_permits: Arc<Semaphore>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    /// Listens on an ephemeral localhost port and answers every handshake right away
    pub async fn start() -> Self {
        Self::listen(Semaphore::MAX_PERMITS).await
    }

    /// Like [`FakeBroker::start`], but PUBREC is only sent after [`FakeBroker::release_pubrec`]
    pub async fn start_holding_pubrec() -> Self {
        Self::listen(0).await
    }

    async fn listen(permits: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let packets: Arc<Mutex<Vec<u8>>> = Arc::default();
        let connection: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>> = Arc::default();
        let pubrec_permits = Arc::new(Semaphore::new(permits));

        let task = tokio::spawn({
            let packets = packets.clone();
            let connection = connection.clone();
            let pubrec_permits = pubrec_permits.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (reader, mut writer) = stream.into_split();
                    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
                    *connection.lock().unwrap() = Some(frame_tx.clone());

                    tokio::spawn(async move {
                        while let Some(frame) = frame_rx.recv().await {
                            match frame {
                                Frame::Bytes(bytes) => {
                                    if writer.write_all(&bytes).await.is_err() {
                                        break;
                                    }
                                }
                                Frame::Close => {
                                    let _ = writer.shutdown().await;
                                    break;
                                }
                            }
                        }
                    });
                    tokio::spawn(serve(
                        reader,
                        frame_tx,
                        packets.clone(),
                        pubrec_permits.clone(),
                    ));
                }
            }
        });

        Self {
            port,
            packets,
            connection,
            pubrec_permits,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Types of every packet received so far, across all connections
    pub fn packets(&self) -> Vec<u8> {
        self.packets.lock().unwrap().clone()
    }

    pub fn release_pubrec(&self) {
        self.pubrec_permits.add_permits(1);
    }

    /// Sends a QoS 0 PUBLISH to the current client
    pub fn publish(&self, topic: &str, payload: &[u8]) {
        let mut body = Vec::new();
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);
        self.send(Frame::Bytes(frame(0x30, &body)));
    }

    /// Closes the current connection from the broker side
    pub fn drop_client(&self) {
        self.send(Frame::Close);
    }

    fn send(&self, frame: Frame) {
        let connection = self.connection.lock().unwrap();
        let sender = connection.as_ref().expect("no client connected");
        let _ = sender.send(frame);
    }

    /// Polls until `done` holds for the received packet types, panicking after two seconds
    pub async fn wait_for(&self, done: impl Fn(&[u8]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !done(&self.packets()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out, packets so far: {:?}",
                self.packets()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut reader: OwnedReadHalf,
    replies: mpsc::UnboundedSender<Frame>,
    packets: Arc<Mutex<Vec<u8>>>,
    pubrec_permits: Arc<Semaphore>,
) {
    while let Ok((header, body)) = read_packet(&mut reader).await {
        let kind = header >> 4;
        packets.lock().unwrap().push(kind);

        let reply = match kind {
            CONNECT => Some(vec![0x20, 0x02, 0x00, 0x00]),
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let pkid = [body[2 + topic_len], body[3 + topic_len]];
                match qos {
                    1 => Some(vec![0x40, 0x02, pkid[0], pkid[1]]),
                    2 => {
                        let Ok(permit) = pubrec_permits.acquire().await else {
                            break;
                        };
                        permit.forget();
                        Some(vec![0x50, 0x02, pkid[0], pkid[1]])
                    }
                    _ => None,
                }
            }
            PUBREL => Some(vec![0x70, 0x02, body[0], body[1]]),
            SUBSCRIBE => Some(suback(&body)),
            PINGREQ => Some(vec![0xD0, 0x00]),
            DISCONNECT => break,
            _ => None,
        };

        if let Some(reply) = reply {
            if replies.send(Frame::Bytes(reply)).is_err() {
                break;
            }
        }
    }
}

async fn read_packet(reader: &mut OwnedReadHalf) -> io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Grants every filter of a SUBSCRIBE at the requested QoS
fn suback(body: &[u8]) -> Vec<u8> {
    let mut reply = vec![body[0], body[1]];
    let mut idx = 2;
    while idx + 2 <= body.len() {
        let len = u16::from_be_bytes([body[idx], body[idx + 1]]) as usize;
        idx += 2 + len;
        reply.push(body[idx]);
        idx += 1;
    }
    frame(0x90, &reply)
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}
