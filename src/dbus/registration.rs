//! Listener registration handshake
//!
//! 1. Create a unix socket pair; one end stays here, the other goes to QEMU.
//! 2. Build a peer-to-peer connection over our end and export the listener.
//! 3. Authenticate while `RegisterListener` is in flight. QEMU authenticates
//!    the new peer before it replies, so neither side can go first. A
//!    refusal ends the exchange at once.
//!
//! The whole exchange is bounded by a timeout. A side connection that was
//! built is closed again if registration fails.

use std::os::fd::AsFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::{debug, info};
use zbus::zvariant::Fd;
use zbus::{Connection, connection};

use super::listener::{self, SharedDispatcher};
use super::proxy::ConsoleProxy;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("failed to create listener socket pair: {0}")]
    SocketPair(#[source] nix::Error),

    #[error("failed to set up listener socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to export listener interfaces: {0}")]
    Export(#[source] zbus::Error),

    #[error("listener connection handshake failed: {0}")]
    Handshake(#[source] zbus::Error),

    #[error("console refused listener registration: {0}")]
    Register(#[source] zbus::Error),

    #[error("listener registration timed out after {0:?}")]
    Timeout(Duration),
}

/// Register `dispatcher` as a display listener of `console`.
///
/// Returns the private connection QEMU pushes updates on; dropping or
/// closing it detaches the listener.
pub async fn register_listener(
    console: &ConsoleProxy<'_>,
    dispatcher: SharedDispatcher,
    timeout: Duration,
) -> Result<Connection, RegistrationError> {
    let capabilities = dispatcher.lock().await.capabilities();

    let (ours, theirs) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
    )
    .map_err(RegistrationError::SocketPair)?;
    debug!("Created listener socket pair");

    let stream =
        UnixStream::from_std(StdUnixStream::from(ours)).map_err(RegistrationError::Socket)?;

    let builder = connection::Builder::unix_stream(stream).p2p();
    let builder = listener::export(builder, dispatcher, capabilities)
        .map_err(RegistrationError::Export)?;

    let handshake = async {
        let build = builder.build();
        let register = console.register_listener(Fd::from(theirs.as_fd()));
        tokio::pin!(build, register);

        // A console that refuses never authenticates our end, so a refusal
        // has to win over the pending handshake.
        tokio::select! {
            registered = &mut register => {
                registered.map_err(RegistrationError::Register)?;
                build.await.map_err(RegistrationError::Handshake)
            }
            built = &mut build => {
                let conn = built.map_err(RegistrationError::Handshake)?;
                match register.await {
                    Ok(()) => Ok(conn),
                    Err(e) => {
                        if let Err(close) = conn.close().await {
                            debug!("Failed to close listener connection: {}", close);
                        }
                        Err(RegistrationError::Register(e))
                    }
                }
            }
        }
    };

    // On timeout or refusal the pending handshake is dropped, which tears
    // down the half-built connection along with it.
    let conn = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| RegistrationError::Timeout(timeout))??;

    info!("Display listener registered ({:?})", capabilities);
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use tokio::sync::Mutex;
    use vmview_frame::Capabilities;
    use zbus::fdo;
    use zbus::proxy::CacheProperties;
    use zbus::{Guid, interface, proxy};

    use crate::dbus::listener::{LISTENER_PATH, UNIX_MAP_INTERFACE, UNIX_SCANOUT_DMABUF2_INTERFACE};
    use crate::dbus::proxy::console_path;
    use crate::sink::StatsSink;

    #[derive(Clone, Copy)]
    enum Reply {
        Accept,
        Refuse,
        Silent,
    }

    /// Stand-in for QEMU's console object
    struct FakeConsole {
        reply: Reply,
        peer: Arc<Mutex<Option<Connection>>>,
    }

    #[interface(name = "org.qemu.Display1.Console")]
    impl FakeConsole {
        async fn register_listener(&self, listener: zbus::zvariant::OwnedFd) -> fdo::Result<()> {
            match self.reply {
                Reply::Refuse => Err(fdo::Error::Failed("console is not graphic".into())),
                Reply::Silent => std::future::pending().await,
                Reply::Accept => {
                    let fd: std::os::fd::OwnedFd = listener.into();
                    let stream = UnixStream::from_std(StdUnixStream::from(fd))
                        .map_err(|e| fdo::Error::IOError(e.to_string()))?;
                    let conn = connection::Builder::unix_stream(stream)
                        .server(Guid::generate())?
                        .p2p()
                        .build()
                        .await?;
                    *self.peer.lock().await = Some(conn);
                    Ok(())
                }
            }
        }
    }

    #[proxy(
        interface = "org.qemu.Display1.Listener",
        default_service = "org.qemu",
        default_path = "/org/qemu/Display1/Listener"
    )]
    trait DisplayListener {
        #[zbus(property)]
        fn interfaces(&self) -> zbus::Result<Vec<String>>;
    }

    struct Harness {
        _server: Connection,
        console: ConsoleProxy<'static>,
        peer: Arc<Mutex<Option<Connection>>>,
    }

    async fn harness(reply: Reply) -> Harness {
        let (server_end, client_end) = UnixStream::pair().unwrap();
        let peer = Arc::new(Mutex::new(None));
        let fake = FakeConsole {
            reply,
            peer: peer.clone(),
        };

        let (server, client) = tokio::try_join!(
            connection::Builder::unix_stream(server_end)
                .server(Guid::generate())
                .unwrap()
                .p2p()
                .serve_at(console_path(0), fake)
                .unwrap()
                .build(),
            connection::Builder::unix_stream(client_end).p2p().build(),
        )
        .unwrap();

        let console = ConsoleProxy::builder(&client)
            .path(console_path(0))
            .unwrap()
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .unwrap();

        Harness {
            _server: server,
            console,
            peer,
        }
    }

    fn dispatcher(capabilities: Capabilities) -> SharedDispatcher {
        listener::shared_dispatcher(
            Box::new(StatsSink::new(Duration::from_secs(1))),
            capabilities,
        )
    }

    async fn introspect(conn: &Connection) -> String {
        fdo::IntrospectableProxy::builder(conn)
            .destination("org.qemu")
            .unwrap()
            .path(LISTENER_PATH)
            .unwrap()
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .unwrap()
            .introspect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepted_registration_exports_listener() {
        let h = harness(Reply::Accept).await;
        let conn = register_listener(&h.console, dispatcher(Capabilities::all()), Duration::from_secs(5))
            .await
            .unwrap();

        let peer = h.peer.lock().await.clone().unwrap();
        let listener = DisplayListenerProxy::builder(&peer)
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .unwrap();
        assert_eq!(
            listener.interfaces().await.unwrap(),
            vec![UNIX_MAP_INTERFACE, UNIX_SCANOUT_DMABUF2_INTERFACE]
        );

        let xml = introspect(&peer).await;
        assert!(xml.contains(UNIX_MAP_INTERFACE));
        assert!(xml.contains(UNIX_SCANOUT_DMABUF2_INTERFACE));

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_extensions_are_not_exported() {
        let h = harness(Reply::Accept).await;
        let _conn = register_listener(
            &h.console,
            dispatcher(Capabilities::SHARED_MEMORY_MAP),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let peer = h.peer.lock().await.clone().unwrap();
        let listener = DisplayListenerProxy::builder(&peer)
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .unwrap();
        assert_eq!(listener.interfaces().await.unwrap(), vec![UNIX_MAP_INTERFACE]);

        let xml = introspect(&peer).await;
        assert!(xml.contains("org.qemu.Display1.Listener"));
        assert!(xml.contains(UNIX_MAP_INTERFACE));
        assert!(!xml.contains(UNIX_SCANOUT_DMABUF2_INTERFACE));
    }

    #[tokio::test]
    async fn test_refusal_is_reported_without_waiting() {
        let h = harness(Reply::Refuse).await;
        let timeout = Duration::from_secs(5);
        let start = Instant::now();

        let err = register_listener(&h.console, dispatcher(Capabilities::all()), timeout)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::Register(_)), "got {}", err);
        assert!(err.to_string().contains("console is not graphic"));
        assert!(start.elapsed() < timeout);
        assert!(h.peer.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_silent_console_times_out() {
        let h = harness(Reply::Silent).await;
        let timeout = Duration::from_millis(200);
        let start = Instant::now();

        let err = register_listener(&h.console, dispatcher(Capabilities::all()), timeout)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::Timeout(t) if t == timeout), "got {}", err);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
