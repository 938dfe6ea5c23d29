//! Windows named pipe endpoint
//!
//! Each instance is a new pipe server instance on the same name (duplex, byte
//! mode, no instance limit), waiting in `connect()` for one client.

use std::io;

use async_trait::async_trait;
use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
use tracing::debug;

use super::endpoint::{Connection, Endpoint, EndpointName, ListeningInstance};

impl Connection for NamedPipeServer {}

/// Endpoint backed by `\\.\pipe\<name>`
#[derive(Debug)]
pub struct NamedPipeEndpoint {
    name: EndpointName,
    pipe_path: String,
    buffer_size: u32,
    first: bool,
}

impl NamedPipeEndpoint {
    pub fn new(name: EndpointName, buffer_size: usize) -> Self {
        let pipe_path = name.pipe_path();
        Self {
            name,
            pipe_path,
            buffer_size: u32::try_from(buffer_size).unwrap_or(u32::MAX),
            first: true,
        }
    }
}

impl Endpoint for NamedPipeEndpoint {
    type Instance = NamedPipeInstance;

    fn name(&self) -> &EndpointName {
        &self.name
    }

    fn create_instance(&mut self) -> io::Result<NamedPipeInstance> {
        debug!(pipe = %self.pipe_path, first = self.first, "NamedPipeEndpoint::create_instance: called");
        let server = ServerOptions::new()
            .first_pipe_instance(self.first)
            .access_inbound(true)
            .access_outbound(true)
            .pipe_mode(PipeMode::Byte)
            .in_buffer_size(self.buffer_size)
            .out_buffer_size(self.buffer_size)
            .create(&self.pipe_path)?;
        self.first = false;
        Ok(NamedPipeInstance { server })
    }
}

/// One pipe server instance waiting for a client
#[derive(Debug)]
pub struct NamedPipeInstance {
    server: NamedPipeServer,
}

#[async_trait]
impl ListeningInstance for NamedPipeInstance {
    type Conn = NamedPipeServer;

    async fn connect(self) -> io::Result<NamedPipeServer> {
        self.server.connect().await?;
        Ok(self.server)
    }
}
