//! In-memory endpoint and helpers for dispatcher and service tests

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};

use super::endpoint::{Endpoint, EndpointName, ListeningInstance};
use super::processor::{RequestProcessor, SessionInfo};

type Incoming = Arc<Mutex<mpsc::UnboundedReceiver<io::Result<DuplexStream>>>>;

/// Endpoint whose clients arrive through a [`Connector`]
pub(crate) struct MemoryEndpoint {
    name: EndpointName,
    incoming: Incoming,
    fail_first: usize,
    fail_after: Option<usize>,
    fail_connect: bool,
    attempts: usize,
    created: usize,
}

impl MemoryEndpoint {
    pub fn new(name: &str) -> (Self, Connector) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Self {
            name: EndpointName::new(name),
            incoming: Arc::new(Mutex::new(rx)),
            fail_first: 0,
            fail_after: None,
            fail_connect: false,
            attempts: 0,
            created: 0,
        };
        (endpoint, Connector { tx })
    }

    /// Fail the first `n` creation attempts
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail every creation after `n` instances were created
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Every instance fails to connect at once, like `accept()` hitting EMFILE
    pub fn always_fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }
}

impl Endpoint for MemoryEndpoint {
    type Instance = MemoryInstance;

    fn name(&self) -> &EndpointName {
        &self.name
    }

    fn create_instance(&mut self) -> io::Result<MemoryInstance> {
        self.attempts += 1;
        if self.attempts <= self.fail_first || self.fail_after.is_some_and(|n| self.created >= n) {
            return Err(io::Error::other("simulated resource exhaustion"));
        }
        self.created += 1;
        Ok(MemoryInstance {
            incoming: self.incoming.clone(),
            fail_connect: self.fail_connect,
        })
    }
}

pub(crate) struct MemoryInstance {
    incoming: Incoming,
    fail_connect: bool,
}

#[async_trait]
impl ListeningInstance for MemoryInstance {
    type Conn = DuplexStream;

    async fn connect(self) -> io::Result<DuplexStream> {
        if self.fail_connect {
            return Err(io::Error::from_raw_os_error(24));
        }
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

/// Client side of a [`MemoryEndpoint`]
#[derive(Clone)]
pub(crate) struct Connector {
    tx: mpsc::UnboundedSender<io::Result<DuplexStream>>,
}

impl Connector {
    /// Connect a new client and return its stream
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _ = self.tx.send(Ok(server));
        client
    }

    /// Make the pending instance fail to connect
    pub fn fail_connect(&self) {
        let _ = self.tx.send(Err(io::Error::from(io::ErrorKind::ConnectionAborted)));
    }
}

/// Processor replying `echo:<request>`
pub(crate) struct Echo;

#[async_trait]
impl RequestProcessor for Echo {
    async fn process(&self, _session: &SessionInfo, request: &str) -> String {
        format!("echo:{}", request)
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
