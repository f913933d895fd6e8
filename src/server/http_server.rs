use may::coroutine::JoinHandle;
use may::net::TcpListener;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use super::service::AppService;

/// HTTP server running an [`AppService`] accept loop on the `may`
/// runtime: one coroutine per accepted connection.
pub struct HttpServer(pub AppService);

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address; useful with port 0 for ephemeral test servers.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll-connect until the listener accepts, for test startup.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Cancel the accept loop and wait for it to finish.
    pub fn stop(self) {
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl HttpServer {
    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error when the address is invalid or cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let service = self.0;

        let handle = may::go!(move || {
            info!(addr = %local_addr, "Server listening");
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let service = service.clone();
                        may::go!(move || service.handle_connection(stream));
                    }
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                    }
                }
            }
        });

        Ok(ServerHandle {
            addr: local_addr,
            handle,
        })
    }
}
