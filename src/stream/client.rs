use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use serde::de::DeserializeOwned;

use crate::device::BufferSnapshot;
use crate::error::Result;
use crate::stream::protocol::{read_frame, write_handshake};

/// Subscriber side of the push protocol.
pub struct StreamClient {
    reader: BufReader<TcpStream>,
    peer: SocketAddr,
    frequency_hz: u32,
    received: u64,
}

impl StreamClient {
    /// Connects and sends the handshake; `frequency_hz == 0` asks for a single sample.
    pub fn connect<A: ToSocketAddrs>(addr: A, frequency_hz: u32) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        write_handshake(&mut stream, frequency_hz)?;
        log::info!("[client] subscribed to {} at {} Hz", peer, frequency_hz);

        Ok(Self {
            reader: BufReader::new(stream),
            peer,
            frequency_hz,
            received: 0,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Next raw payload. End of stream, including a reset from the server, is `None`.
    pub fn next_payload(&mut self) -> Result<Option<String>> {
        match read_frame(&mut self.reader) {
            Ok(Some(payload)) => {
                self.received += 1;
                Ok(Some(payload))
            }
            Ok(None) => {
                log::info!("[client] {} closed after {} payloads", self.peer, self.received);
                Ok(None)
            }
            Err(e) if e.is_disconnect() => {
                log::info!("[client] {} went away: {}", self.peer, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Next payload decoded as a rolling-buffer snapshot of `T`.
    pub fn next_snapshot<T: DeserializeOwned>(&mut self) -> Result<Option<BufferSnapshot<T>>> {
        match self.next_payload()? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Writes each payload to `out` as one line until the stream ends, or until `limit`
    /// payloads have been received (`0` for no limit). Returns the number written.
    pub fn print_all<W: Write>(&mut self, out: &mut W, limit: u64) -> Result<u64> {
        let mut written = 0;
        while let Some(payload) = self.next_payload()? {
            writeln!(out, "{}", payload)?;
            written += 1;
            if limit > 0 && self.received() >= limit {
                break;
            }
        }
        out.flush()?;
        Ok(written)
    }

    /// Iterator over payloads until the stream ends or fails.
    pub fn payloads(self) -> Payloads {
        Payloads {
            client: self,
            done: false,
        }
    }
}

pub struct Payloads {
    client: StreamClient,
    done: bool,
}

impl Iterator for Payloads {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.client.next_payload() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
