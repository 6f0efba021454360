//! TCP backend: listeners, accept loops and outbound upgrades.

use crate::conn::{Conn, MuxedConn};
use crate::error::{NetError, Result};
use crate::muxer::Role;
use crate::network::{Backend, Network, WeakNetwork};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strand_core::{Multiaddr, PeerId, Scope};
use strand_transport::{Listener, TcpTransport, Transport, TransportConfig, TransportError, addr};

/// Connections over real TCP sockets.
pub(crate) struct TcpBackend {
    transport: TcpTransport,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl TcpBackend {
    pub(crate) fn new(config: TransportConfig) -> Self {
        Self {
            transport: TcpTransport::new(config),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Backend for TcpBackend {
    async fn listen(&self, net: &Network, addr: &Multiaddr) -> Result<Multiaddr> {
        let listener: Arc<dyn Listener> = Arc::from(self.transport.listen(addr).await?);
        let bound = listener.multiaddr();
        self.listeners().push(Arc::clone(&listener));

        let weak = net.downgrade();
        net.scope().spawn(move |scope| accept_loop(weak, listener, scope));
        Ok(bound)
    }

    async fn dial(&self, net: &Network, peer: &PeerId, addr: &Multiaddr) -> Result<Arc<dyn Conn>> {
        let raw = self.transport.dial(addr).await?;
        let inner = &net.inner;
        let conn = MuxedConn::upgrade(raw, &inner.key, Some(peer), Role::Dialer, &inner.config, &inner.scope).await?;
        Ok(conn)
    }

    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listeners()
            .iter()
            .filter(|l| !l.is_closed())
            .map(|l| l.multiaddr())
            .collect()
    }

    fn interface_listen_addresses(&self) -> Result<Vec<Multiaddr>> {
        let listen = self.listen_addresses();
        if listen.is_empty() {
            return Ok(listen);
        }
        Ok(addr::resolve_unspecified_addresses(&listen, &[])?)
    }
}

/// Accept connections until the network closes, upgrading each on its own task.
async fn accept_loop(net: WeakNetwork, listener: Arc<dyn Listener>, scope: Scope) {
    let closing = scope.closing();
    let bound = listener.multiaddr();
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            () = closing.wait() => break,
        };
        let raw = match accepted {
            Ok(raw) => raw,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!(addr = %bound, error = %e, "accept failed");
                continue;
            }
        };
        let Some(strong) = net.upgrade() else { break };
        tracing::trace!(addr = %bound, remote = %raw.remote_addr, "inbound connection");

        scope.spawn(move |scope| async move {
            let closing = scope.closing();
            let inner = &strong.inner;
            let upgraded = tokio::select! {
                res = MuxedConn::upgrade(raw, &inner.key, None, Role::Listener, &inner.config, &inner.scope) => res,
                () = closing.wait() => Err(NetError::Cancelled),
            };
            match upgraded {
                Ok(conn) => strong.add_conn(conn),
                Err(e) => tracing::debug!(error = %e, "inbound upgrade failed"),
            }
        });
    }

    listener.close();
    if let Some(net) = net.upgrade() {
        tracing::debug!(addr = %bound, "listener closed");
        for n in net.notifiees() {
            n.listen_close(&net, &bound);
        }
    }
}
