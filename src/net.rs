//! Connection establishment and the buffered duplex session

use crate::error::{Result, TransferError};
use crate::logger::Logger;
use crate::protocol::Message;
use crate::protocol_core::{expect_message, read_message, write_message};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Default bind address for listen mode
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// How a process obtains its single connection.
/// Independent of whether it sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind, accept exactly one peer, then drop the listener
    Listen { host: String, port: u16 },
    /// Dial the peer
    Connect { host: String, port: u16 },
}

impl Endpoint {
    pub fn is_connect(&self) -> bool {
        matches!(self, Endpoint::Connect { .. })
    }

    pub fn establish(&self, logger: &dyn Logger) -> Result<TcpStream> {
        match self {
            Endpoint::Listen { host, port } => OneShotListener::bind(host, *port)?.accept(logger),
            Endpoint::Connect { host, port } => connect(host, *port, logger),
        }
    }
}

fn connect(host: &str, port: u16, logger: &dyn Logger) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    logger.info(&format!("Connecting to {}", addr));
    let stream = TcpStream::connect(&addr)
        .map_err(|e| TransferError::connection(format!("connect {}", addr), e))?;
    tune_socket(&stream);
    logger.output(&format!("Connected to {}", addr));
    Ok(stream)
}

/// Listening socket that serves exactly one peer
pub struct OneShotListener {
    listener: TcpListener,
}

impl OneShotListener {
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| TransferError::connection(format!("bind {}", addr), e))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransferError::connection("reading listener address", e))
    }

    /// Block until one peer connects; the listener is closed on return
    pub fn accept(self, logger: &dyn Logger) -> Result<TcpStream> {
        if let Ok(addr) = self.listener.local_addr() {
            logger.output(&format!("Listening on port {}...", addr.port()));
        }
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| TransferError::connection("accept", e))?;
        tune_socket(&stream);
        logger.output(&format!("Connection from {}", peer));
        Ok(stream)
    }
}

/// Low-latency control frames and keepalive on a long-lived transfer socket
pub fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        let fd = stream.as_raw_fd();
        unsafe {
            let keepalive: libc::c_int = 1;
            let _ = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                &keepalive as *const _ as *const libc::c_void,
                std::mem::size_of_val(&keepalive) as libc::socklen_t,
            );

            #[cfg(target_os = "linux")]
            {
                let keepidle: libc::c_int = 60; // Start probes after 60s idle
                let keepintvl: libc::c_int = 10; // 10s between probes
                let keepcnt: libc::c_int = 6; // 6 probes before failure
                for (opt, val) in [
                    (libc::TCP_KEEPIDLE, &keepidle),
                    (libc::TCP_KEEPINTVL, &keepintvl),
                    (libc::TCP_KEEPCNT, &keepcnt),
                ] {
                    let _ = libc::setsockopt(
                        fd,
                        libc::IPPROTO_TCP,
                        opt,
                        val as *const _ as *const libc::c_void,
                        std::mem::size_of_val(val) as libc::socklen_t,
                    );
                }
            }
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawSocket;
        use windows::Win32::Networking::WinSock::{setsockopt, SOCKET, SOL_SOCKET, SO_KEEPALIVE};
        let s = SOCKET(stream.as_raw_socket() as usize);
        unsafe {
            let keepalive: u32 = 1;
            let bytes = std::slice::from_raw_parts(
                (&keepalive as *const u32) as *const u8,
                std::mem::size_of_val(&keepalive),
            );
            let _ = setsockopt(s, SOL_SOCKET as i32, SO_KEEPALIVE as i32, Some(bytes));
        }
    }
}

/// One logical connection: a buffered read half and a buffered write half
pub struct Session<R, W> {
    reader: R,
    writer: W,
}

pub type TcpSession = Session<BufReader<TcpStream>, BufWriter<TcpStream>>;

impl TcpSession {
    pub fn from_stream(stream: TcpStream, buffer_size: usize) -> Result<Self> {
        let read_half = stream
            .try_clone()
            .map_err(|e| TransferError::connection("duplicating socket", e))?;
        Ok(Session::new(
            BufReader::with_capacity(buffer_size, read_half),
            BufWriter::with_capacity(buffer_size, stream),
        ))
    }
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Write one control frame and flush
    pub fn send(&mut self, msg: &Message) -> Result<()> {
        write_message(&mut self.writer, msg)
    }

    /// `None` on a clean end-of-stream between frames
    pub fn recv(&mut self) -> Result<Option<Message>> {
        read_message(&mut self.reader)
    }

    pub fn expect(&mut self, waiting_for: &str) -> Result<Message> {
        expect_message(&mut self.reader, waiting_for)
    }

    /// Raw access for unframed file bytes
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::protocol::{PreflightOk, TransferStart};
    use std::io::{Cursor, Read};

    #[test]
    fn test_listen_and_connect_pair() {
        let listener = OneShotListener::bind("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || listener.accept(&NoopLogger).unwrap());

        let client = Endpoint::Connect {
            host: "127.0.0.1".into(),
            port,
        }
        .establish(&NoopLogger)
        .unwrap();
        let server = handle.join().unwrap();

        let mut a = TcpSession::from_stream(client, 1024).unwrap();
        let mut b = TcpSession::from_stream(server, 1024).unwrap();
        let msg = Message::PreflightOk(PreflightOk {
            available_space: 77,
        });
        a.send(&msg).unwrap();
        assert_eq!(b.recv().unwrap(), Some(msg));

        // Raw bytes after a frame share the same buffered reader
        a.send(&Message::TransferStart(TransferStart { file_size: 3 }))
            .unwrap();
        a.writer_mut().write_all(b"xyz").unwrap();
        a.writer_mut().flush().unwrap();
        assert!(matches!(b.expect("start").unwrap(), Message::TransferStart(_)));
        let mut raw = [0u8; 3];
        b.reader_mut().read_exact(&mut raw).unwrap();
        assert_eq!(&raw, b"xyz");

        drop(a);
        assert_eq!(b.recv().unwrap(), None);
    }

    #[test]
    fn test_connect_refused_is_retryable() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = Endpoint::Connect {
            host: "127.0.0.1".into(),
            port,
        }
        .establish(&NoopLogger)
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_in_memory_session() {
        let mut session = Session::new(Cursor::new(Vec::new()), Vec::new());
        assert_eq!(session.recv().unwrap(), None);
        assert!(matches!(
            session.expect("Meta"),
            Err(TransferError::UnexpectedEof(_))
        ));
        assert!(!Endpoint::Listen {
            host: DEFAULT_LISTEN_HOST.into(),
            port: 1
        }
        .is_connect());
    }
}
