use tokio::sync::mpsc;

/// A push-based listener: connections are injected via `push` rather than
/// accepted off a real socket. Used to hand a CONNECT tunnel's unwrapped TLS
/// stream to a normal TLS-accepting server loop.
pub struct InjectableListener<C> {
    tx: mpsc::UnboundedSender<C>,
    rx: mpsc::UnboundedReceiver<C>,
}

impl<C> InjectableListener<C> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> InjectableListenerHandle<C> {
        InjectableListenerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Waits for the next injected connection. Returns `None` once every
    /// handle has been dropped and no more connections will arrive.
    pub async fn accept(&mut self) -> Option<C> {
        self.rx.recv().await
    }
}

impl<C> Default for InjectableListener<C> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InjectableListenerHandle<C> {
    tx: mpsc::UnboundedSender<C>,
}

impl<C> Clone for InjectableListenerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> InjectableListenerHandle<C> {
    /// Makes `conn` appear as the next accepted connection. Fails silently
    /// (matching the original's unbuffered, always-available channel) if the
    /// listener side has been dropped.
    pub fn push(&self, conn: C) {
        let _ = self.tx.send(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_connections_are_accepted_in_order() {
        let mut listener: InjectableListener<u32> = InjectableListener::new();
        let handle = listener.handle();

        handle.push(1);
        handle.push(2);

        assert_eq!(listener.accept().await, Some(1));
        assert_eq!(listener.accept().await, Some(2));
    }

    #[tokio::test]
    async fn listener_outlives_dropped_handles() {
        // The listener holds its own sender clone so `accept` can always be
        // called again later, even after every external handle is dropped
        // (it survives for the life of the proxy, per its push semantics).
        let mut listener: InjectableListener<u32> = InjectableListener::new();
        {
            let handle = listener.handle();
            handle.push(42);
        }
        assert_eq!(listener.accept().await, Some(42));
    }
}
