//! Connectionless UDP socket with a fixed reception buffer.
//!
//! One instance per traffic direction. Outgoing sockets are
//! `connect(2)`-ed to their target; incoming sockets are bound (port 0
//! picks an ephemeral one). The reception buffer is allocated once and
//! never grows: oversize datagrams are truncated by the kernel.

use std::borrow::Cow;
use std::io;
use std::net::UdpSocket;
use std::time::Duration;

/// Fixed reception buffer size.
pub const RECEPTION_SIZE: usize = 208 * 1024;

pub struct DatagramSocket {
    socket: Option<UdpSocket>,
    address: String,
    port: u16,
    outgoing: bool,
    reception: Box<[u8]>,
    received_len: usize,
}

impl DatagramSocket {
    pub fn new(address: impl Into<String>, port: u16, outgoing: bool) -> Self {
        let mut address = address.into();
        if address == "localhost" {
            address = "127.0.0.1".to_string();
        }
        Self {
            socket: None,
            address,
            port,
            outgoing,
            reception: vec![0u8; RECEPTION_SIZE].into_boxed_slice(),
            received_len: 0,
        }
    }

    /// Bind an incoming socket on an ephemeral port and report it.
    pub fn free_socket(address: &str) -> io::Result<Self> {
        let mut socket = Self::new(address, 0, false);
        socket.connect()?;
        Ok(socket)
    }

    /// Open the socket: connect for the outgoing role, bind otherwise.
    pub fn connect(&mut self) -> io::Result<()> {
        let target = format!("{}:{}", self.address, self.port);
        let socket = if self.outgoing {
            let socket = UdpSocket::bind("0.0.0.0:0")?;
            socket.connect(&target)?;
            socket
        } else {
            let socket = UdpSocket::bind(&target)?;
            // learn the port when an ephemeral one was requested
            self.port = socket.local_addr()?.port();
            socket
        };
        self.socket = Some(socket);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.socket = None;
        self.received_len = 0;
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        match &self.socket {
            Some(socket) => socket.set_nonblocking(!blocking),
            None => Ok(()),
        }
    }

    /// Bound how long a blocking `receive` may wait. `None` waits forever.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.socket {
            Some(socket) => socket.set_read_timeout(timeout),
            None => Ok(()),
        }
    }

    pub fn send(&self, payload: &[u8]) -> io::Result<usize> {
        let Some(socket) = &self.socket else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not open"));
        };
        if !self.outgoing {
            return Ok(0);
        }
        socket.send(payload)
    }

    /// Receive one datagram into the fixed buffer and return its length.
    /// Any error, including a receive timeout, is coerced to "no data".
    pub fn receive(&mut self, blocking: bool) -> usize {
        let Some(socket) = &self.socket else { return 0 };
        if socket.set_nonblocking(!blocking).is_err() {
            return 0;
        }
        match socket.recv_from(&mut self.reception) {
            Ok((len, _)) => {
                self.received_len = len;
                len
            }
            Err(_) => {
                self.received_len = 0;
                0
            }
        }
    }

    /// Length of the next queued datagram without consuming it; 0 when the
    /// queue is empty. Never blocks.
    pub fn peek(&mut self) -> usize {
        let Some(socket) = &self.socket else { return 0 };
        if socket.set_nonblocking(true).is_err() {
            return 0;
        }
        let len = socket.peek(&mut self.reception).unwrap_or(0);
        let _ = socket.set_nonblocking(false);
        len
    }

    /// Raw view of the last received datagram.
    pub fn binary_data(&self) -> &[u8] {
        &self.reception[..self.received_len]
    }

    /// Text view of the last received datagram.
    pub fn string_data(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.binary_data())
    }

    /// Machine-word view of the last received datagram, for peeking at
    /// leading counters. Trailing bytes that do not fill a word are
    /// dropped.
    pub fn number_data(&self) -> impl Iterator<Item = usize> + '_ {
        self.binary_data()
            .chunks_exact(size_of::<usize>())
            .map(|chunk| {
                let mut word = [0u8; size_of::<usize>()];
                word.copy_from_slice(chunk);
                usize::from_ne_bytes(word)
            })
    }
}
