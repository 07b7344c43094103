use std::net::{SocketAddr, TcpListener};

/// Gets a new socket address allocated by the OS.
///
/// Nothing is listening on the address once this returns.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Binds a listener on a new OS allocated address.
///
/// The address stays reachable for as long as the listener is alive.
pub fn spawn_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}
