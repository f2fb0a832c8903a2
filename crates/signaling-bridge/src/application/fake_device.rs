//! In-memory device transport for unit tests.
//!
//! `FakeConnector` answers the discovery query with a canned response and
//! backs every opened stream with a `tokio::io::duplex` pipe.  The test keeps
//! the far end of the pipe and plays the device.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::DuplexStream;

use super::transport::{
    status, ConnectOptions, DeviceConnection, DeviceConnector, DeviceStream, QueryResponse,
    TransportError, CONTENT_FORMAT_CBOR,
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Everything the fake has been asked to do, in call order.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLog {
    pub connects: Vec<ConnectOptions>,
    pub queries: Vec<(String, String)>,
    pub opened_ports: Vec<u32>,
    pub closes: usize,
}

#[derive(Default)]
struct Shared {
    log: Mutex<FakeLog>,
    device_end: Mutex<Option<DuplexStream>>,
}

pub(crate) struct FakeConnector {
    discovery: QueryResponse,
    refuse_connect: bool,
    hang_connect: bool,
    panic_on_open: bool,
    shared: Arc<Shared>,
}

#[derive(Serialize)]
struct Info {
    #[serde(rename = "SignalingStreamPort")]
    port: u32,
}

impl FakeConnector {
    /// Discovery answers `205` advertising `port`.
    pub fn with_port(port: u32) -> Self {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&Info { port }, &mut payload).unwrap();
        Self::with_response(QueryResponse {
            status: status::CONTENT,
            content_format: Some(CONTENT_FORMAT_CBOR),
            payload,
        })
    }

    /// Discovery answers with `status` and no payload.
    pub fn with_status(status: u16) -> Self {
        Self::with_response(QueryResponse {
            status,
            content_format: None,
            payload: Vec::new(),
        })
    }

    /// Every connect attempt fails.
    pub fn refusing() -> Self {
        let mut fake = Self::with_status(status::NOT_FOUND);
        fake.refuse_connect = true;
        fake
    }

    /// Connect attempts never complete.
    pub fn hanging() -> Self {
        let mut fake = Self::with_port(4242);
        fake.hang_connect = true;
        fake
    }

    /// Discovery advertises `port`, then opening the stream panics.
    pub fn panicking_on_open(port: u32) -> Self {
        let mut fake = Self::with_port(port);
        fake.panic_on_open = true;
        fake
    }

    fn with_response(discovery: QueryResponse) -> Self {
        Self {
            discovery,
            refuse_connect: false,
            hang_connect: false,
            panic_on_open: false,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Takes the device end of the most recently opened stream.
    pub fn take_device_end(&self) -> Option<DuplexStream> {
        self.shared.device_end.lock().unwrap().take()
    }

    pub fn log(&self) -> FakeLog {
        self.shared.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn DeviceConnection>, TransportError> {
        self.shared.log.lock().unwrap().connects.push(options);
        if self.hang_connect {
            std::future::pending::<()>().await;
        }
        if self.refuse_connect {
            return Err(TransportError::Connect("refused by fake".into()));
        }
        Ok(Box::new(FakeConnection {
            discovery: self.discovery.clone(),
            panic_on_open: self.panic_on_open,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeConnection {
    discovery: QueryResponse,
    panic_on_open: bool,
    shared: Arc<Shared>,
}

#[async_trait]
impl DeviceConnection for FakeConnection {
    async fn query(&self, method: &str, path: &str) -> Result<QueryResponse, TransportError> {
        self.shared
            .log
            .lock()
            .unwrap()
            .queries
            .push((method.to_owned(), path.to_owned()));
        Ok(self.discovery.clone())
    }

    async fn open_stream(&self, port: u32) -> Result<DeviceStream, TransportError> {
        self.shared.log.lock().unwrap().opened_ports.push(port);
        if self.panic_on_open {
            panic!("fake device panicked opening port {port}");
        }
        let (relay_end, device_end) = tokio::io::duplex(PIPE_CAPACITY);
        *self.shared.device_end.lock().unwrap() = Some(device_end);
        let (reader, writer) = tokio::io::split(relay_end);
        Ok(DeviceStream {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.log.lock().unwrap().closes += 1;
        Ok(())
    }
}
