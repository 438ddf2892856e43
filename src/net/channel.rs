use std::{
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::net::{Packet, PeerId};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("error receiving from the channel")]
    Recv(#[source] io::Error),

    #[error("error sending through the channel")]
    Send(#[source] io::Error),

    #[error("the channel is closed")]
    Closed,

    #[error("nothing was sent to this node by itself")]
    EmptyLoopBack,

    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
}

/// One end of a connection between two nodes. Each end only writes its own
/// direction and reads the other.
pub trait Channel: Send {
    fn close(&mut self) -> io::Result<()>;
    /// Sends a packet and returns the number of payload bytes written.
    fn send(&mut self, packet: &Packet) -> Result<usize, ChannelError>;
    /// Waits at most `timeout` for the next packet.
    fn recv(&mut self, timeout: Duration) -> Result<Packet, ChannelError>;
}

/// TCP connection to another node. Every packet travels as a frame: its
/// length as a little-endian `u32`, then the payload.
#[derive(Debug, Default)]
pub struct TcpChannel {
    /// `None` once the channel is closed.
    stream: Option<TcpStream>,
}

impl TcpChannel {
    const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

    /// Waits for the next node to connect to `listener` and reads the node
    /// index it announces. The listener is polled every `retry`; if no node
    /// has connected and announced itself within `timeout`, the error is
    /// `ErrorKind::TimedOut`.
    pub(crate) fn accept(listener: &TcpListener, timeout: Duration, retry: Duration) -> io::Result<(Self, PeerId)> {
        let deadline = Instant::now() + timeout;
        listener.set_nonblocking(true)?;
        let accepted = loop {
            match listener.accept() {
                Ok(accepted) => break Ok(accepted),
                Err(err) if err.kind() != ErrorKind::WouldBlock => break Err(err),
                Err(_) if Instant::now() < deadline => thread::sleep(retry),
                Err(_) => {
                    log::error!("no node connected to {:?} within {timeout:?}", listener.local_addr());
                    break Err(io::Error::new(
                        ErrorKind::TimedOut,
                        format!("no node connected within {timeout:?}"),
                    ));
                }
            }
        };
        listener.set_nonblocking(false)?;
        let (mut stream, address) = accepted?;
        stream.set_nonblocking(false)?;

        let remaining = deadline.saturating_duration_since(Instant::now()).max(retry);
        stream.set_read_timeout(Some(remaining))?;
        let mut handshake = [0; 8];
        stream.read_exact(&mut handshake).inspect_err(|err| {
            log::error!("no node index received from {address}: {err}");
        })?;
        stream.set_read_timeout(None)?;
        let remote_id = u64::from_le_bytes(handshake) as PeerId;
        stream.set_nodelay(true)?;
        log::info!("node {remote_id} connected from {address}");

        Ok((Self { stream: Some(stream) }, remote_id))
    }

    /// Connects to `address` and announces `local_id`. Refused connections are
    /// retried every `retry` until `timeout` has passed.
    pub(crate) fn connect(local_id: PeerId, address: &str, timeout: Duration, retry: Duration) -> io::Result<Self> {
        let deadline = Instant::now() + timeout;
        log::info!("node {local_id} connecting to {address}");

        let mut stream = loop {
            match TcpStream::connect(address) {
                Ok(stream) => break stream,
                Err(err) if Instant::now() < deadline => {
                    log::debug!("{address} is not ready yet: {err}");
                    thread::sleep(retry);
                }
                Err(err) => {
                    log::error!("gave up connecting to {address} after {timeout:?}: {err}");
                    return Err(err);
                }
            }
        };

        stream.write_all(&(local_id as u64).to_le_bytes())?;
        stream.set_nodelay(true)?;
        log::info!("node {local_id} connected to {address} from {}", stream.local_addr()?);
        Ok(Self { stream: Some(stream) })
    }

    fn stream(&mut self) -> Result<&mut TcpStream, ChannelError> {
        self.stream.as_mut().ok_or(ChannelError::Closed)
    }
}

impl Channel for TcpChannel {
    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                // The other end may already be gone.
                Err(err) if err.kind() != ErrorKind::NotConnected => return Err(err),
                _ => {}
            }
        }
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<usize, ChannelError> {
        let length = packet.len();
        if length > Self::MAX_FRAME_SIZE {
            return Err(ChannelError::FrameTooLarge(length));
        }
        let stream = self.stream()?;

        let mut frame = Vec::with_capacity(4 + length);
        frame.extend_from_slice(&(length as u32).to_le_bytes());
        frame.extend_from_slice(packet.as_slice());
        let written = stream.write_all(&frame);
        let peer = stream.peer_addr();
        match written {
            Ok(()) => {
                log::debug!("sent {length} bytes to {peer:?}");
                Ok(length)
            }
            Err(err) => {
                // Part of the frame may be on the wire: the stream can not be
                // framed anymore, so the channel closes.
                log::error!("error sending {length} bytes to {peer:?}, closing the channel: {err}");
                self.stream = None;
                Err(ChannelError::Send(err))
            }
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<Packet, ChannelError> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout)).map_err(ChannelError::Recv)?;

        let read_error = |err: io::Error| match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ChannelError::Timeout(timeout),
            ErrorKind::UnexpectedEof => ChannelError::Closed,
            _ => ChannelError::Recv(err),
        };

        let mut header = [0; 4];
        stream.read_exact(&mut header).map_err(read_error)?;
        let length = u32::from_le_bytes(header) as usize;
        if length > Self::MAX_FRAME_SIZE {
            return Err(ChannelError::FrameTooLarge(length));
        }

        let mut payload = vec![0; length];
        stream.read_exact(&mut payload).map_err(read_error)?;
        log::debug!("received {length} bytes from {:?}", stream.peer_addr());
        Ok(Packet::new(payload))
    }
}

/// Channel of a node with itself.
#[derive(Default)]
pub struct LoopBackChannel {
    queue: VecDeque<Packet>,
}

impl Channel for LoopBackChannel {
    fn close(&mut self) -> io::Result<()> {
        self.queue.clear();
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<usize, ChannelError> {
        self.queue.push_back(packet.clone());
        Ok(packet.len())
    }

    /// Never blocks: everything this node sent itself is already queued.
    fn recv(&mut self, _timeout: Duration) -> Result<Packet, ChannelError> {
        self.queue.pop_front().ok_or(ChannelError::EmptyLoopBack)
    }
}

/// In-process channel backed by a pair of queues. Used to run every party of a
/// protocol as a thread of the same process.
pub struct MemoryChannel {
    sender: Option<Sender<Packet>>,
    receiver: Receiver<Packet>,
}

impl MemoryChannel {
    /// Creates both ends of a connection.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::channel();
        let (right_tx, left_rx) = mpsc::channel();
        (
            Self {
                sender: Some(left_tx),
                receiver: left_rx,
            },
            Self {
                sender: Some(right_tx),
                receiver: right_rx,
            },
        )
    }
}

impl Channel for MemoryChannel {
    fn close(&mut self) -> io::Result<()> {
        self.sender = None;
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<usize, ChannelError> {
        let sender = self.sender.as_ref().ok_or(ChannelError::Closed)?;
        sender
            .send(packet.clone())
            .map_err(|_| ChannelError::Closed)?;
        Ok(packet.len())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Packet, ChannelError> {
        self.receiver.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ChannelError::Timeout(timeout),
            RecvTimeoutError::Disconnected => ChannelError::Closed,
        })
    }
}

/// Slot of a lane with no connection behind it, e.g. the bulk lane between two
/// participants.
#[derive(Debug, Default)]
pub struct NullChannel;

impl Channel for NullChannel {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn send(&mut self, _packet: &Packet) -> Result<usize, ChannelError> {
        Err(ChannelError::Closed)
    }

    fn recv(&mut self, _timeout: Duration) -> Result<Packet, ChannelError> {
        Err(ChannelError::Closed)
    }
}
