//! Keeps the peer's view of the game in step with the local session.
//!
//! `Disconnected -> Connected -> Streaming -> Disconnected`: opening a link
//! writes the greeting and a full sync, then a reader thread forwards peer
//! commands to the control thread until the stream ends. A failed write moves
//! the link to `Degraded`: the write side is dropped while the reader runs on.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::direction::Dir;
use crate::game::Event;
use crate::grid::Pos;
use crate::protocol::{encode, LineBuffer, Outbound, PeerCommand, ProtocolError};
use crate::transport::{ChunkRead, ChunkWrite, LinkError, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected,
    Streaming,
    Degraded,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkStatus::Disconnected => "offline",
            LinkStatus::Connected => "connected",
            LinkStatus::Streaming => "streaming",
            LinkStatus::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Tags events with the link that produced them so a late event from a
/// closed link cannot touch its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkId(u64);

struct ReaderTask {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

pub struct Bridge {
    status: LinkStatus,
    current: Option<LinkId>,
    next_id: u64,
    peer_ready: bool,
    ready_ack: bool,
    writer: Option<Box<dyn ChunkWrite>>,
    reader: Option<ReaderTask>,
    events: Sender<Event>,
}

impl Bridge {
    pub fn new(events: Sender<Event>, ready_ack: bool) -> Self {
        Self {
            status: LinkStatus::Disconnected,
            current: None,
            next_id: 0,
            peer_ready: false,
            ready_ack,
            writer: None,
            reader: None,
            events,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn peer_ready(&self) -> bool {
        self.peer_ready
    }

    pub fn is_current(&self, link: LinkId) -> bool {
        self.current == Some(link)
    }

    /// Opens the link, writes the greeting and `sync`, and starts streaming.
    /// An already open link is closed first.
    pub fn open(&mut self, transport: &dyn Transport, sync: &[Outbound]) -> Result<(), LinkError> {
        if self.status != LinkStatus::Disconnected {
            self.close();
        }

        let link = transport.open()?;
        let id = LinkId(self.next_id);
        self.next_id += 1;
        info!(peer = %transport.describe(), link = id.0, "link opened");

        self.status = LinkStatus::Connected;
        self.current = Some(id);
        self.peer_ready = false;
        self.writer = Some(link.writer);

        self.send(&[Outbound::Greeting]);
        self.send(sync);
        if self.status == LinkStatus::Connected {
            self.status = LinkStatus::Streaming;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let events = self.events.clone();
        let reader_stop = Arc::clone(&stop);
        let reader = link.reader;
        let spawned = thread::Builder::new()
            .name("link-reader".to_string())
            .spawn(move || read_loop(id, reader, events, reader_stop));
        match spawned {
            Ok(handle) => {
                self.reader = Some(ReaderTask { handle, stop });
                Ok(())
            }
            Err(err) => {
                self.release();
                Err(LinkError::Reader(err))
            }
        }
    }

    pub fn send_sync(&mut self, lines: &[Outbound]) {
        self.send(lines);
    }

    pub fn send_position(&mut self, pos: Pos) {
        self.send(&[Outbound::Player(pos)]);
    }

    pub fn send_move(&mut self, dir: Dir) {
        self.send(&[Outbound::Move(dir)]);
    }

    /// The peer reported `READY:`.
    pub fn on_ready(&mut self) {
        self.peer_ready = true;
        if self.ready_ack {
            self.send_move(Dir::Right);
        }
    }

    /// The reader reached end of stream or failed.
    pub fn on_link_lost(&mut self, error: Option<LinkError>) {
        match &error {
            Some(err) => warn!(%err, "link lost"),
            None => info!("peer closed the link"),
        }
        self.release();
    }

    /// Closes both halves. Safe to call in any state.
    pub fn close(&mut self) {
        if self.status != LinkStatus::Disconnected {
            info!("closing link");
        }
        self.release();
    }

    /// Writes `lines` as one chunk. Without a writer this is a no-op.
    fn send(&mut self, lines: &[Outbound]) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        match writer.write_chunk(encode(lines).as_bytes()) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "write failed, link degraded");
                writer.close();
                self.writer = None;
                self.status = LinkStatus::Degraded;
                false
            }
        }
    }

    fn release(&mut self) {
        if let Some(task) = &self.reader {
            task.stop.store(true, Ordering::Release);
        }
        if let Some(mut writer) = self.writer.take() {
            writer.close();
        }
        if let Some(task) = self.reader.take() {
            // Readers return within their poll interval once stopped.
            if task.handle.join().is_err() {
                warn!("link reader panicked");
            }
        }
        self.status = LinkStatus::Disconnected;
        self.current = None;
        self.peer_ready = false;
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_loop(
    link: LinkId,
    mut reader: Box<dyn ChunkRead>,
    events: Sender<Event>,
    stop: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::default();
    let error = loop {
        let chunk = match reader.read_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break None,
            Err(err) => break Some(err),
        };
        if stop.load(Ordering::Acquire) {
            break None;
        }
        if chunk.is_empty() {
            continue;
        }
        for line in lines.push(&chunk) {
            match PeerCommand::decode(&line) {
                Ok(command) => {
                    debug!(?command, "peer command");
                    if events.send(Event::Peer { link, command }).is_err() {
                        return;
                    }
                }
                Err(ProtocolError::Empty) => {}
                Err(err) => debug!(%err, "dropping peer line"),
            }
        }
    };
    drop(reader);

    if !stop.load(Ordering::Acquire) {
        let _ = events.send(Event::LinkLost { link, error });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::transport::Link;

    /// In-memory link: chunks fed through a channel, writes collected.
    pub(crate) struct MemoryTransport {
        pub(crate) chunks: Mutex<Option<Receiver<Vec<u8>>>>,
        pub(crate) written: Arc<Mutex<Vec<u8>>>,
        pub(crate) closed: Arc<AtomicBool>,
        pub(crate) fail_writes: bool,
    }

    impl MemoryTransport {
        pub(crate) fn new() -> (Self, Sender<Vec<u8>>) {
            let (tx, rx) = mpsc::channel();
            let transport = Self {
                chunks: Mutex::new(Some(rx)),
                written: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                fail_writes: false,
            };
            (transport, tx)
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            let written = self.written.lock().unwrap();
            String::from_utf8_lossy(&written)
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    struct MemoryReader {
        chunks: Receiver<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    impl ChunkRead for MemoryReader {
        fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            // A dropped sender or a closed writer is end of stream.
            loop {
                if self.closed.load(Ordering::Acquire) {
                    return Ok(None);
                }
                match self.chunks.recv_timeout(Duration::from_millis(5)) {
                    Ok(chunk) => return Ok(Some(chunk)),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Ok(None),
                }
            }
        }
    }

    struct MemoryWriter {
        written: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
        fail: bool,
    }

    impl ChunkWrite for MemoryWriter {
        fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            if self.fail {
                return Err(LinkError::Write(std::io::Error::other("unplugged")));
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(LinkError::NotOpen);
            }
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    impl Transport for MemoryTransport {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        fn open(&self) -> Result<Link, LinkError> {
            let rx = self.chunks.lock().unwrap().take().ok_or(LinkError::Open {
                target: self.describe(),
                source: std::io::Error::other("already opened"),
            })?;
            self.closed.store(false, Ordering::Release);
            Ok(Link {
                reader: Box::new(MemoryReader {
                    chunks: rx,
                    closed: Arc::clone(&self.closed),
                }),
                writer: Box::new(MemoryWriter {
                    written: Arc::clone(&self.written),
                    closed: Arc::clone(&self.closed),
                    fail: self.fail_writes,
                }),
            })
        }
    }

    /// A port that outlives its links: every open shares one byte source,
    /// and closing the writer does not wake the reader, which only returns
    /// on its read timeout.
    struct PortTransport {
        source: Arc<Mutex<Receiver<Vec<u8>>>>,
        open_handles: Arc<AtomicUsize>,
    }

    struct PortReader {
        source: Arc<Mutex<Receiver<Vec<u8>>>>,
        open_handles: Arc<AtomicUsize>,
    }

    struct PortWriter {
        open_handles: Arc<AtomicUsize>,
    }

    impl Drop for PortReader {
        fn drop(&mut self) {
            self.open_handles.fetch_sub(1, Ordering::AcqRel);
        }
    }

    impl Drop for PortWriter {
        fn drop(&mut self) {
            self.open_handles.fetch_sub(1, Ordering::AcqRel);
        }
    }

    impl ChunkRead for PortReader {
        fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            let source = self.source.lock().unwrap();
            match source.recv_timeout(Duration::from_millis(20)) {
                Ok(chunk) => Ok(Some(chunk)),
                Err(RecvTimeoutError::Timeout) => Ok(Some(Vec::new())),
                Err(RecvTimeoutError::Disconnected) => Ok(None),
            }
        }
    }

    impl ChunkWrite for PortWriter {
        fn write_chunk(&mut self, _bytes: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    impl Transport for PortTransport {
        fn describe(&self) -> String {
            "port".to_string()
        }

        fn open(&self) -> Result<Link, LinkError> {
            self.open_handles.fetch_add(2, Ordering::AcqRel);
            Ok(Link {
                reader: Box::new(PortReader {
                    source: Arc::clone(&self.source),
                    open_handles: Arc::clone(&self.open_handles),
                }),
                writer: Box::new(PortWriter {
                    open_handles: Arc::clone(&self.open_handles),
                }),
            })
        }
    }

    fn sync() -> Vec<Outbound> {
        vec![Outbound::Player(Pos::new(1, 1)), Outbound::Exit(Pos::new(7, 7))]
    }

    fn next_event(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(2)).expect("link event")
    }

    #[test]
    fn open_writes_greeting_then_sync() {
        let (events, _rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, _feed) = MemoryTransport::new();

        bridge.open(&transport, &sync()).unwrap();

        assert_eq!(bridge.status(), LinkStatus::Streaming);
        assert_eq!(transport.lines(), vec!["TEST:CONNECTED", "P:1,1", "E:7,7"]);
    }

    #[test]
    fn open_failure_stays_disconnected() {
        let (events, _rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, _feed) = MemoryTransport::new();
        transport.chunks.lock().unwrap().take();

        assert!(matches!(
            bridge.open(&transport, &sync()),
            Err(LinkError::Open { .. })
        ));
        assert_eq!(bridge.status(), LinkStatus::Disconnected);
    }

    #[test]
    fn peer_lines_become_events() {
        let (events, rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, feed) = MemoryTransport::new();
        bridge.open(&transport, &sync()).unwrap();

        feed.send(b"POS:3,".to_vec()).unwrap();
        feed.send(b"4\r\nPOS:x,y\nWIN:1\n".to_vec()).unwrap();

        match next_event(&rx) {
            Event::Peer { link, command } => {
                assert!(bridge.is_current(link));
                assert_eq!(command, PeerCommand::Position(Pos::new(3, 4)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match next_event(&rx) {
            Event::Peer { command, .. } => {
                assert_eq!(command, PeerCommand::Win("1".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn end_of_stream_disconnects_and_stops_writes() {
        let (events, rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, feed) = MemoryTransport::new();
        bridge.open(&transport, &sync()).unwrap();

        drop(feed);
        match next_event(&rx) {
            Event::LinkLost { link, error } => {
                assert!(bridge.is_current(link));
                assert!(error.is_none());
                bridge.on_link_lost(error);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(bridge.status(), LinkStatus::Disconnected);
        assert!(transport.closed.load(Ordering::Acquire));
        assert!(bridge.reader.is_none());
        assert!(bridge.writer.is_none());

        let before = transport.lines().len();
        bridge.send_position(Pos::new(2, 1));
        assert_eq!(transport.lines().len(), before);
    }

    #[test]
    fn write_failure_degrades() {
        let (events, _rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (mut transport, _feed) = MemoryTransport::new();
        transport.fail_writes = true;

        bridge.open(&transport, &sync()).unwrap();

        assert_eq!(bridge.status(), LinkStatus::Degraded);
        assert!(bridge.writer.is_none());
        assert!(bridge.reader.is_some());
    }

    #[test]
    fn ready_ack_is_opt_in() {
        let (events, _rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, _feed) = MemoryTransport::new();
        bridge.open(&transport, &[]).unwrap();
        bridge.on_ready();
        assert!(bridge.peer_ready());
        assert_eq!(transport.lines(), vec!["TEST:CONNECTED"]);

        let (events, _rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, true);
        let (transport, _feed) = MemoryTransport::new();
        bridge.open(&transport, &[]).unwrap();
        bridge.on_ready();
        assert_eq!(transport.lines(), vec!["TEST:CONNECTED", "MOVE:RIGHT"]);
    }

    #[test]
    fn reconnecting_a_port_leaves_no_stale_reader() {
        let (events, rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (feed, source) = mpsc::channel();
        let transport = PortTransport {
            source: Arc::new(Mutex::new(source)),
            open_handles: Arc::new(AtomicUsize::new(0)),
        };

        bridge.open(&transport, &sync()).unwrap();
        assert_eq!(transport.open_handles.load(Ordering::Acquire), 2);
        bridge.close();
        assert_eq!(transport.open_handles.load(Ordering::Acquire), 0);

        bridge.open(&transport, &sync()).unwrap();
        feed.send(b"READY:again\n".to_vec()).unwrap();
        match next_event(&rx) {
            Event::Peer { link, command } => {
                assert!(bridge.is_current(link));
                assert_eq!(command, PeerCommand::Ready("again".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }

        bridge.close();
        assert_eq!(transport.open_handles.load(Ordering::Acquire), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_releases_both_halves() {
        let (events, rx) = mpsc::channel();
        let mut bridge = Bridge::new(events, false);
        let (transport, feed) = MemoryTransport::new();
        bridge.open(&transport, &sync()).unwrap();

        bridge.close();
        drop(feed);

        assert_eq!(bridge.status(), LinkStatus::Disconnected);
        assert!(transport.closed.load(Ordering::Acquire));
        assert!(bridge.reader.is_none());
        assert!(rx.try_recv().is_err());
    }
}
