//! Hayes voice-modem control and caller-ID event demultiplexing.
//!
//! [`Modem::open`] attaches to a serial port and spawns a single worker
//! task that owns the wire (the worker module has the interleaving rules). The
//! returned handle submits command transactions over a request channel and
//! can be cloned freely; completed calls arrive on the paired receiver.
//!
//! Attributes that cannot change while the line stays open - the modem's
//! identity strings and its fax-class support - are read-through cached so
//! repeated queries cost no wire traffic. Caller-ID state is deliberately
//! never cached: the device is authoritative for the mode it is in.

pub mod command;
pub mod error;
pub mod transport;
mod worker;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::call::Call;
use crate::config::ConnectString;

pub use command::{CallerIdMode, Command, FaxClass};
pub use error::ModemError;
pub use transport::Transport;
pub use worker::ASSEMBLY_WINDOW;

use transport::READ_TIMEOUT;
use worker::{Request, Worker};

/// Cached modem attributes that are stable for the life of a session.
#[derive(Debug, Default)]
struct AttrCache {
    enabled: bool,
    info: Option<Vec<String>>,
    fax_classes: Option<Vec<FaxClass>>,
    fax_class: Option<FaxClass>,
}

/// Handle to a modem attached to a serial port.
///
/// Cloning is cheap; every clone talks to the same worker. The worker stops
/// once the last handle is dropped.
#[derive(Clone)]
pub struct Modem {
    requests: mpsc::Sender<Request>,
    caller_id_mode: Arc<RwLock<CallerIdMode>>,
    cache: Arc<RwLock<AttrCache>>,
}

impl Modem {
    /// Open the serial port named by the connect string and start the
    /// worker. Completed calls are delivered on the returned receiver.
    pub fn open(conn: &ConnectString) -> Result<(Self, mpsc::UnboundedReceiver<Call>), ModemError> {
        let port = tokio_serial::new(&conn.port, conn.baud)
            .open_native_async()
            .map_err(|source| ModemError::Open {
                port: conn.port.clone(),
                source,
            })?;
        info!(port = %conn.port, baud = conn.baud, "serial port open");
        Ok(Self::with_transport(port))
    }

    /// Start a modem worker over an arbitrary byte stream.
    ///
    /// This is how the tests and the modem simulator wire a scripted stream
    /// in place of a physical port.
    pub fn with_transport<T>(stream: T) -> (Self, mpsc::UnboundedReceiver<Call>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (req_tx, req_rx) = mpsc::channel(8);
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let caller_id_mode = Arc::new(RwLock::new(CallerIdMode::Off));

        let worker = Worker::new(
            Transport::new(stream, READ_TIMEOUT),
            req_rx,
            call_tx,
            caller_id_mode.clone(),
        );
        tokio::spawn(worker.run());

        let modem = Self {
            requests: req_tx,
            caller_id_mode,
            cache: Arc::new(RwLock::new(AttrCache {
                enabled: true,
                ..AttrCache::default()
            })),
        };
        (modem, call_rx)
    }

    /// Enable or disable the attribute cache. Disabling drops every cached
    /// value.
    pub fn set_cache_enabled(&self, enabled: bool) {
        let mut cache = self.cache_mut();
        cache.enabled = enabled;
        if !enabled {
            cache.info = None;
            cache.fax_classes = None;
            cache.fax_class = None;
        }
    }

    /// Reset the modem (`ATZ`).
    pub async fn reset(&self) -> Result<(), ModemError> {
        self.command(Command::Reset).await.map(|_| ())
    }

    /// Set the speaker volume (`ATL<n>`, n in 0..=3).
    pub async fn set_volume(&self, n: u8) -> Result<(), ModemError> {
        self.command(Command::Volume(n)).await.map(|_| ())
    }

    /// Read the modem's identity strings (`ATI0` through `ATI9`).
    ///
    /// Enumeration stops early at the first `ERROR`; `OK` replies are
    /// skipped. The result is cached.
    pub async fn info(&self) -> Result<Vec<String>, ModemError> {
        if let Some(infos) = self.cache().info.clone() {
            return Ok(infos);
        }

        let mut infos = Vec::new();
        for n in 0..10 {
            let reply = self.command(Command::Info(n)).await?;
            match reply.as_str() {
                "ERROR" => break,
                "OK" => continue,
                _ => infos.push(reply),
            }
        }

        let mut cache = self.cache_mut();
        if cache.enabled {
            cache.info = Some(infos.clone());
        }
        Ok(infos)
    }

    /// List the fax service classes the modem supports. Cached.
    pub async fn fax_classes(&self) -> Result<Vec<FaxClass>, ModemError> {
        if let Some(classes) = self.cache().fax_classes.clone() {
            return Ok(classes);
        }

        let reply = self.command(Command::FaxClasses).await?;
        let classes = reply
            .split(',')
            .map(FaxClass::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let mut cache = self.cache_mut();
        if cache.enabled {
            cache.fax_classes = Some(classes.clone());
        }
        Ok(classes)
    }

    /// Read the current fax class. Cached.
    pub async fn fax_class(&self) -> Result<FaxClass, ModemError> {
        if let Some(class) = self.cache().fax_class {
            return Ok(class);
        }

        let reply = self.command(Command::FaxClass).await?;
        let class = FaxClass::parse(&reply)?;

        let mut cache = self.cache_mut();
        if cache.enabled {
            cache.fax_class = Some(class);
        }
        Ok(class)
    }

    /// Set the fax class.
    ///
    /// When the cache already holds the target class this is a no-op with
    /// zero wire traffic.
    pub async fn set_fax_class(&self, class: FaxClass) -> Result<(), ModemError> {
        if self.cache().fax_class == Some(class) {
            return Ok(());
        }

        self.command(Command::SetFaxClass(class)).await?;

        let mut cache = self.cache_mut();
        if cache.enabled {
            cache.fax_class = Some(class);
        }
        Ok(())
    }

    /// List the caller-ID modes the modem supports. Never cached.
    pub async fn caller_id_modes(&self) -> Result<Vec<CallerIdMode>, ModemError> {
        let reply = self.command(Command::CallerIdModes).await?;
        command::parse_mode_range(&reply)
    }

    /// Read the current caller-ID mode from the device. Never cached.
    pub async fn caller_id_mode(&self) -> Result<CallerIdMode, ModemError> {
        let reply = self.command(Command::CallerIdMode).await?;
        let mode = CallerIdMode::parse(&reply)?;
        self.store_caller_id_mode(mode);
        Ok(mode)
    }

    /// Set the caller-ID mode.
    pub async fn set_caller_id_mode(&self, mode: CallerIdMode) -> Result<(), ModemError> {
        self.command(Command::SetCallerIdMode(mode)).await?;
        self.store_caller_id_mode(mode);
        Ok(())
    }

    /// Answer the line (`ATA`).
    pub async fn answer(&self) -> Result<(), ModemError> {
        self.command(Command::Answer).await.map(|_| ())
    }

    /// Hang up (`ATH0`).
    pub async fn hangup(&self) -> Result<(), ModemError> {
        self.command(Command::Hangup).await.map(|_| ())
    }

    /// Block the ringing call: answer, then immediately hang up.
    pub async fn block_call(&self) -> Result<(), ModemError> {
        self.answer().await?;
        self.hangup().await
    }

    async fn command(&self, cmd: Command) -> Result<String, ModemError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            cmd: cmd.to_string(),
            reply: reply_tx,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| ModemError::WorkerGone)?;
        reply_rx.await.map_err(|_| ModemError::WorkerGone)?
    }

    /// The worker reads this on every RING to decide whether caller-ID
    /// lines are coming.
    fn store_caller_id_mode(&self, mode: CallerIdMode) {
        let mut shared = match self.caller_id_mode.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *shared != mode {
            debug!(%mode, "caller-ID mode changed");
        }
        *shared = mode;
    }

    fn cache(&self) -> RwLockReadGuard<'_, AttrCache> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cache_mut(&self) -> RwLockWriteGuard<'_, AttrCache> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
