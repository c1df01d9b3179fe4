//! The DTE engine: lifecycle, mode control, send surface and rendezvous.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use muxlink_core::frame::{self, AT_DLCI, CLOSE_DOWN_FRAME, DATA_DLCI, MAX_PAYLOAD, OVERHEAD};

use crate::config::DteConfig;
use crate::dce::{Dce, DceState, WorkingMode};
use crate::error::DteError;
use crate::events::{EventSink, ModemEvent};
use crate::reader;
use crate::uart::{PatternIntervals, UartEvent, UartPort, LINE_PATTERN};

/// Escape sequence that drops a modem out of data mode.
const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Settle delay after writing a framed command, before blocking on the
/// rendezvous.
const CMUX_CMD_DELAY: Duration = Duration::from_millis(100);

/// Which dispatch the transaction in flight is waiting for.
///
/// This slot replaces per-transaction handler pointers: the send surface
/// arms it, the reader consumes it for one-shot dispatches, and every send
/// path disarms it on return — success, failure or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseRoute {
    /// No transaction in flight.
    Idle,
    /// Expecting a response line (command mode, or text in a frame).
    AwaitLine,
    /// Expecting a raw frame (channel establishment).
    AwaitFrame,
}

pub(crate) type ReceiveCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the [`Dte`] handle and its reader task.
pub(crate) struct DteShared {
    pub(crate) port: Arc<dyn UartPort>,
    pub(crate) config: DteConfig,
    pub(crate) events: EventSink,
    pub(crate) rendezvous: Notify,
    pub(crate) receive_cb: RwLock<Option<ReceiveCallback>>,
    dce: RwLock<Option<Weak<dyn Dce>>>,
    route: Mutex<ResponseRoute>,
    mode: Mutex<WorkingMode>,
    stop_tx: watch::Sender<bool>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
    tx_scratch: AsyncMutex<Vec<u8>>,
}

impl DteShared {
    pub(crate) fn bound_dce(&self) -> Option<Arc<dyn Dce>> {
        self.dce
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()?
            .upgrade()
    }

    pub(crate) fn route(&self) -> ResponseRoute {
        *lock(&self.route)
    }

    pub(crate) fn set_route(&self, route: ResponseRoute) {
        *lock(&self.route) = route;
    }

    fn mode(&self) -> WorkingMode {
        *lock(&self.mode)
    }

    fn set_mode(&self, mode: WorkingMode) {
        *lock(&self.mode) = mode;
    }
}

/// Handle to a DTE engine.
///
/// Cheap to clone; all clones drive the same engine. Created over a
/// [`UartPort`], bound to a [`Dce`], and started with the port's event
/// queue. Commands are serialized by the caller: the rendezvous admits one
/// transaction at a time.
#[derive(Clone)]
pub struct Dte {
    shared: Arc<DteShared>,
}

impl Dte {
    /// Create a DTE over `port`. Nothing runs until [`start`](Self::start).
    pub fn new(port: Arc<dyn UartPort>, config: DteConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let events = EventSink::new(config.event_capacity);
        Self {
            shared: Arc::new(DteShared {
                port,
                events,
                rendezvous: Notify::new(),
                receive_cb: RwLock::new(None),
                dce: RwLock::new(None),
                route: Mutex::new(ResponseRoute::Idle),
                mode: Mutex::new(WorkingMode::Command),
                stop_tx,
                reader_task: AsyncMutex::new(None),
                tx_scratch: AsyncMutex::new(Vec::with_capacity(OVERHEAD + MAX_PAYLOAD)),
                config,
            }),
        }
    }

    /// Install command-mode reception, spawn the reader task, and emit the
    /// de-multiplexing teardown (`+++` then the CMUX close-down frame) so
    /// a previously multiplexed modem returns to plain AT mode.
    ///
    /// `events` is the queue the UART driver delivers [`UartEvent`]s on.
    /// Exactly one reader exists per DTE; starting twice is an error.
    pub async fn start(&self, events: mpsc::Receiver<UartEvent>) -> Result<(), DteError> {
        let mut task = self.shared.reader_task.lock().await;
        if task.is_some() {
            return Err(DteError::AlreadyStarted);
        }

        let port = &self.shared.port;
        port.set_rx_timeout_symbols(1).await?;
        port.enable_pattern_detect(LINE_PATTERN, 1, PatternIntervals::default())
            .await?;
        port.reset_pattern_queue(self.shared.config.pattern_queue_size)
            .await?;
        // Command mode first: raw RX stays off until a mode change.
        port.disable_rx_interrupt().await?;

        let stop_rx = self.shared.stop_tx.subscribe();
        *task = Some(tokio::spawn(reader::run(
            Arc::clone(&self.shared),
            events,
            stop_rx,
        )));
        drop(task);

        port.write(ESCAPE_SEQUENCE).await?;
        port.write(&CLOSE_DOWN_FRAME).await?;
        debug!("DTE started");
        Ok(())
    }

    /// Stop and join the reader task.
    ///
    /// Callers must not hold an in-flight transaction across shutdown.
    pub async fn stop(&self) {
        let _ = self.shared.stop_tx.send(true);
        let handle = self.shared.reader_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("DTE stopped");
    }

    /// Bind a DCE. The DTE keeps only a weak reference: neither side owns
    /// the other, but both must outlive the binding.
    pub fn bind(&self, dce: &Arc<dyn Dce>) {
        *self
            .shared
            .dce
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(dce));
    }

    /// Drop the DCE binding.
    pub fn unbind(&self) {
        *self
            .shared
            .dce
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Subscribe to asynchronous modem events.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.shared.events.subscribe()
    }

    /// Register the receiver for data-channel payload bytes (PPP ingress).
    pub fn set_receive_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self
            .shared
            .receive_cb
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Remove the data-channel receiver.
    pub fn clear_receive_callback(&self) {
        *self
            .shared
            .receive_cb
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The current working mode.
    pub fn mode(&self) -> WorkingMode {
        self.shared.mode()
    }

    /// Release the caller blocked on the transaction in flight.
    ///
    /// Called by the DCE from within response dispatch once it has
    /// consumed the expected line or frame.
    pub fn process_cmd_done(&self) {
        self.shared.rendezvous.notify_one();
    }

    fn require_dce(&self) -> Result<Arc<dyn Dce>, DteError> {
        self.shared.bound_dce().ok_or(DteError::NotBound)
    }

    async fn wait_cmd_done(&self, timeout: Duration) -> Result<(), DteError> {
        tokio::time::timeout(timeout, self.shared.rendezvous.notified())
            .await
            .map_err(|_| DteError::Timeout)
    }

    /// Send a raw command in command mode and wait for the DCE to consume
    /// the response.
    pub async fn send_cmd(&self, command: &str, timeout: Duration) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        dce.set_state(DceState::Processing);
        self.shared.set_route(ResponseRoute::AwaitLine);
        let result = async {
            self.shared.port.write(command.as_bytes()).await?;
            self.wait_cmd_done(timeout).await
        }
        .await;
        self.shared.set_route(ResponseRoute::Idle);
        result
    }

    /// Send a command inside a UIH frame and wait for the DCE to consume
    /// the response.
    ///
    /// Commands listed in [`DteConfig::dial_commands`] are framed on the
    /// data channel so that the CONNECT response arrives there; everything
    /// else goes out on the AT channel.
    pub async fn send_cmux_cmd(&self, command: &str, timeout: Duration) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        let dlci = if self
            .shared
            .config
            .dial_commands
            .iter()
            .any(|dial| dial == command)
        {
            info!("dial command, routing over the data channel");
            DATA_DLCI
        } else {
            AT_DLCI
        };
        debug!(dlci, command = command.trim_end(), "> framed command");
        dce.set_state(DceState::Processing);
        self.shared.set_route(ResponseRoute::AwaitLine);
        let result = async {
            {
                let mut scratch = self.shared.tx_scratch.lock().await;
                frame::uih_frame_into(&mut scratch, dlci, command.as_bytes())?;
                self.shared.port.write(&scratch).await?;
            }
            tokio::time::sleep(CMUX_CMD_DELAY).await;
            self.wait_cmd_done(timeout).await
        }
        .await;
        self.shared.set_route(ResponseRoute::Idle);
        result
    }

    /// Open `dlci` on the peer with a SABM frame and wait for the DCE to
    /// consume the acknowledgement.
    pub async fn send_sabm(&self, dlci: u8, timeout: Duration) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        let sabm = frame::sabm_frame(dlci);
        debug!(dlci, "> SABM");
        dce.set_state(DceState::Processing);
        self.shared.set_route(ResponseRoute::AwaitFrame);
        let result = async {
            self.shared.port.write(&sabm).await?;
            self.wait_cmd_done(timeout).await
        }
        .await;
        self.shared.set_route(ResponseRoute::Idle);
        result
    }

    /// Write raw bytes, returning how many were accepted (PPP egress in
    /// raw data mode).
    pub async fn send_data(&self, data: &[u8]) -> Result<usize, DteError> {
        Ok(self.shared.port.write(data).await?)
    }

    /// Fragment `data` into UIH frames on the data channel and write them
    /// sequentially. Returns the original length.
    pub async fn send_cmux_data(&self, data: &[u8]) -> Result<usize, DteError> {
        let mut scratch = self.shared.tx_scratch.lock().await;
        for chunk in data.chunks(MAX_PAYLOAD) {
            frame::uih_frame_into(&mut scratch, DATA_DLCI, chunk)?;
            self.shared.port.write(&scratch).await?;
            trace!(len = chunk.len(), "> data frame");
        }
        Ok(data.len())
    }

    /// Write `data` and synchronously read back `prompt`, e.g. the `>`
    /// prompt of AT+CMGS.
    ///
    /// Pattern detection is suspended while the prompt is read — it may
    /// contain the line pattern — and restored on every exit path.
    pub async fn send_wait(
        &self,
        data: &[u8],
        prompt: &str,
        timeout: Duration,
    ) -> Result<(), DteError> {
        self.shared.port.disable_pattern_detect().await?;
        let result = self.send_wait_inner(data, prompt, timeout).await;
        let restore = self
            .shared
            .port
            .enable_pattern_detect(LINE_PATTERN, 1, PatternIntervals::default())
            .await;
        result.and(restore.map_err(DteError::from))
    }

    async fn send_wait_inner(
        &self,
        data: &[u8],
        prompt: &str,
        timeout: Duration,
    ) -> Result<(), DteError> {
        self.shared.port.write(data).await?;
        let mut buf = vec![0u8; prompt.len()];
        let got = self.shared.port.read(&mut buf, timeout).await?;
        if got < buf.len() {
            return Err(DteError::Timeout);
        }
        if buf != prompt.as_bytes() {
            return Err(DteError::PromptMismatch {
                expected: prompt.to_owned(),
                got: String::from_utf8_lossy(&buf).into_owned(),
            });
        }
        Ok(())
    }

    /// Switch the link's working mode, reconfiguring UART reception.
    ///
    /// Entering CMUX mode also runs the DCE's channel establishment.
    /// Switching to the mode already in force is an error.
    pub async fn change_mode(&self, new_mode: WorkingMode) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        if self.shared.mode() == new_mode {
            return Err(DteError::AlreadyInMode(new_mode));
        }
        let port = &self.shared.port;
        match new_mode {
            WorkingMode::Ppp => {
                info!("entering PPP mode");
                dce.set_working_mode(new_mode)?;
                self.shared.set_mode(new_mode);
                port.disable_pattern_detect().await?;
                port.enable_rx_interrupt().await?;
            }
            WorkingMode::Command => {
                info!("entering command mode");
                port.disable_rx_interrupt().await?;
                port.flush_input().await?;
                port.enable_pattern_detect(LINE_PATTERN, 1, PatternIntervals::default())
                    .await?;
                dce.set_working_mode(new_mode)?;
                self.shared.set_mode(new_mode);
            }
            WorkingMode::Cmux => {
                info!("entering CMUX mode");
                dce.set_working_mode(new_mode)?;
                self.shared.set_mode(new_mode);
                port.disable_pattern_detect().await?;
                port.enable_rx_interrupt().await?;
                dce.setup_cmux().await?;
            }
        }
        Ok(())
    }

    /// Define the PDP context and switch the link into PPP mode.
    pub async fn start_ppp(&self, apn: &str) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        info!(apn, "starting PPP session");
        dce.define_pdp_context(1, "IP", apn).await?;
        self.change_mode(WorkingMode::Ppp).await?;
        self.shared.events.publish(ModemEvent::PppStart);
        Ok(())
    }

    /// Leave PPP mode and hang up the data call.
    pub async fn stop_ppp(&self) -> Result<(), DteError> {
        let dce = self.require_dce()?;
        self.shared.events.publish(ModemEvent::PppStop);
        self.change_mode(WorkingMode::Command).await?;
        dce.hang_up().await?;
        Ok(())
    }

    /// Switch the link into CMUX mode, channel establishment included.
    pub async fn start_cmux(&self) -> Result<(), DteError> {
        self.change_mode(WorkingMode::Cmux).await
    }
}
