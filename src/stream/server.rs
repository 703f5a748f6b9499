use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::device::SnapshotSource;
use crate::error::Result;
use crate::stream::protocol::{read_handshake, write_frame};

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Pause after `failures` consecutive accept errors: doubles from 50 ms, capped at 2 s.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(6);
    (ACCEPT_BACKOFF_BASE * factor).min(ACCEPT_BACKOFF_MAX)
}

/// Push-protocol server for one device task
///
/// Serves one connection at a time on the calling thread: the next client is accepted only
/// after the current one disconnects or its single-shot reply has been sent. This assumes
/// a handful of subscribers at most.
pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    source: Arc<dyn SnapshotSource>,
    shutdown: AtomicBool,
    connections: AtomicU64,
}

impl StreamServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, source: Arc<dyn SnapshotSource>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        info!(
            "[server] {} listening on {}",
            source.source_name(),
            local_addr
        );
        Ok(Self {
            listener,
            local_addr,
            source,
            shutdown: AtomicBool::new(false),
            connections: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections_served(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Accept loop; returns after `shutdown`.
    pub fn run(&self) -> Result<()> {
        let mut failures: u32 = 0;
        for incoming in self.listener.incoming() {
            if self.is_shut_down() {
                break;
            }
            let stream = match incoming {
                Ok(stream) => {
                    failures = 0;
                    stream
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    warn!("[server] accept failed: {} (retrying in {:?})", e, pause);
                    thread::sleep(pause);
                    continue;
                }
            };
            self.connections.fetch_add(1, Ordering::Relaxed);
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown peer".to_string());
            info!("[server] {} accepted {}", self.source.source_name(), peer);

            match self.run_connection(stream) {
                Ok(sent) => info!("[server] {} done after {} frames", peer, sent),
                Err(e) if e.is_disconnect() => info!("[server] {} disconnected", peer),
                Err(e) => warn!("[server] {} dropped: {}", peer, e),
            }
        }
        info!("[server] {} stopped", self.source.source_name());
        Ok(())
    }

    /// Runs `run` on a dedicated thread.
    pub fn launch(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        let server = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-server", self.source.source_name()))
            .spawn(move || server.run())?;
        Ok(handle)
    }

    fn run_connection(&self, stream: TcpStream) -> Result<u64> {
        stream.set_nodelay(true)?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;
        serve_stream(&mut reader, &mut writer, self.source.as_ref(), &self.shutdown)
    }

    /// Stops accepting and ends any push loop at its next iteration. A blocked `accept` is
    /// woken with a throwaway loopback connection.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            warn!("[server] could not wake accept loop: {}", e);
        }
    }
}

/// One connection's worth of the protocol: read the handshake, then push snapshots.
///
/// With frequency 0 exactly one frame is written. Otherwise frames go out every
/// `1 / frequency` seconds until a write fails or `shutdown` is set. Returns the number of
/// frames written.
pub fn serve_stream<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    source: &dyn SnapshotSource,
    shutdown: &AtomicBool,
) -> Result<u64> {
    let frequency = read_handshake(reader)?;
    if frequency == 0 {
        write_frame(writer, &source.snapshot()?)?;
        return Ok(1);
    }

    let period = Duration::from_secs_f64(1.0 / frequency as f64);
    let mut sent = 0;
    while !shutdown.load(Ordering::SeqCst) {
        write_frame(writer, &source.snapshot()?)?;
        sent += 1;
        thread::sleep(period);
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferSnapshot, DeviceTask, Sampler};
    use crate::error::FlightError;
    use crate::stream::client::StreamClient;
    use std::io::{self, Cursor};

    struct Ticker {
        n: u64,
    }

    impl Sampler for Ticker {
        type Sample = u64;

        fn fetch(&mut self, slot: &mut u64) -> Result<()> {
            self.n += 1;
            *slot = self.n;
            Ok(())
        }
    }

    fn ticker_task() -> Arc<DeviceTask<Ticker>> {
        let task = Arc::new(DeviceTask::new("ticker", 50, 2, Ticker { n: 0 }).unwrap());
        task.sample_once().unwrap();
        task
    }

    fn start_server(task: Arc<DeviceTask<Ticker>>) -> (Arc<StreamServer>, JoinHandle<Result<()>>) {
        let server = Arc::new(StreamServer::bind("127.0.0.1:0", task).unwrap());
        let handle = server.launch().unwrap();
        (server, handle)
    }

    /// Accepts `limit` writes, then behaves like a closed socket.
    struct HangUpAfter {
        limit: usize,
        writes: usize,
    }

    impl Write for HangUpAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes >= self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(50));
        assert_eq!(accept_backoff(2), Duration::from_millis(100));
        assert_eq!(accept_backoff(4), Duration::from_millis(400));
        assert_eq!(accept_backoff(7), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }

    #[test]
    fn test_single_shot_in_memory() {
        let task = ticker_task();
        let mut reader = Cursor::new(b"0\n".to_vec());
        let mut out = Vec::new();
        let sent = serve_stream(&mut reader, &mut out, task.as_ref(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(out, b"{\"currentIndex\":0,\"values\":[1,0]}\n");
    }

    #[test]
    fn test_failing_writer_ends_push_loop() {
        let task = ticker_task();
        let mut reader = Cursor::new(b"1000\n".to_vec());
        let mut writer = HangUpAfter {
            limit: 6,
            writes: 0,
        };
        let err = serve_stream(&mut reader, &mut writer, task.as_ref(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_push_loop_observes_shutdown() {
        let task = ticker_task();
        let mut reader = Cursor::new(b"10\n".to_vec());
        let mut out = Vec::new();
        let sent =
            serve_stream(&mut reader, &mut out, task.as_ref(), &AtomicBool::new(true)).unwrap();
        assert_eq!(sent, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_single_shot_over_tcp() {
        let (server, handle) = start_server(ticker_task());

        let mut client = StreamClient::connect(server.local_addr(), 0).unwrap();
        let snapshot: BufferSnapshot<u64> = client.next_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.current(), Some(&1));
        assert!(client.next_payload().unwrap().is_none());

        server.shutdown();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_malformed_handshake_is_single_shot() {
        let (server, handle) = start_server(ticker_task());

        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(b"abc\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut frames = Vec::new();
        while let Some(frame) = crate::stream::protocol::read_frame(&mut reader).unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames, vec![r#"{"currentIndex":0,"values":[1,0]}"#.to_string()]);

        server.shutdown();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_streaming_client_then_next_client() {
        let task = ticker_task();
        let (server, handle) = start_server(task.clone());

        {
            let mut client = StreamClient::connect(server.local_addr(), 100).unwrap();
            for _ in 0..3 {
                task.sample_once().unwrap();
                let payload = client.next_payload().unwrap().unwrap();
                assert!(payload.starts_with(r#"{"currentIndex":"#));
            }
        }

        // Server survives the first client hanging up and serves the next one
        let mut second = StreamClient::connect(server.local_addr(), 0).unwrap();
        assert!(second.next_payload().unwrap().is_some());
        assert!(second.next_payload().unwrap().is_none());
        assert!(server.connections_served() >= 2);

        server.shutdown();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_without_clients() {
        let (server, handle) = start_server(ticker_task());
        server.shutdown();
        server.shutdown();
        handle.join().unwrap().unwrap();
        assert!(server.is_shut_down());
        assert_eq!(server.connections_served(), 0);
    }

    #[test]
    fn test_failed_snapshot_is_not_a_disconnect() {
        struct Broken;

        impl SnapshotSource for Broken {
            fn source_name(&self) -> &str {
                "broken"
            }

            fn snapshot(&self) -> Result<String> {
                Err(FlightError::poisoned("broken"))
            }
        }

        let mut reader = Cursor::new(b"0\n".to_vec());
        let mut out = Vec::new();
        let err = serve_stream(&mut reader, &mut out, &Broken, &AtomicBool::new(false))
            .unwrap_err();
        assert!(!err.is_disconnect());
    }
}
