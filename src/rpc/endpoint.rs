//! MessagePack-RPC endpoint.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use super::batch::Batch;
use super::handler::{erase, run_invocation, ArgList, Args, ErasedHandler, Handler, Reply};
use super::notify::{spawn_worker, Notification, NotifyQueue};
use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::msgpack::{
    from_slice_with, Decode, Decoder, Encode, Encoder, ExtensionRegistry, Raw, Value, WireType,
};

/// Message kinds (element 0 of every message).
pub const REQUEST: u64 = 0;
pub const REPLY: u64 = 1;
pub const NOTIFICATION: u64 = 2;

/// Request ids are 31 bits wide.
const ID_MASK: u32 = 0x7fff_ffff;

/// Releases the underlying transport. Called at most once.
pub type Closer = Box<dyn FnOnce() -> std::io::Result<()> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An outstanding outgoing call.
struct Pending {
    method: String,
    /// `false` for calls that discard the result.
    wants_reply: bool,
    done: oneshot::Sender<Result<Raw>>,
}

struct State {
    next_id: u32,
    pending: HashMap<u32, Pending>,
    closed: bool,
    /// The fatal error that closed the endpoint.
    err: Option<Error>,
}

impl State {
    fn allocate_id(&mut self) -> u32 {
        loop {
            self.next_id = self.next_id.wrapping_add(1) & ID_MASK;
            if !self.pending.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }
}

struct Shared {
    config: EndpointConfig,
    extensions: Option<Arc<ExtensionRegistry>>,
    /// Held by the read loop for as long as it runs.
    reader: Mutex<Decoder<'static>>,
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    state: Mutex<State>,
    handlers: RwLock<HashMap<String, Arc<dyn ErasedHandler>>>,
    closer: Mutex<Option<Closer>>,
    /// Without a closer nothing unblocks the read loop, so `close` cannot
    /// wait for it.
    has_closer: bool,
    notifications: Arc<NotifyQueue>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// One side of a MessagePack-RPC connection.
///
/// The endpoint is a cheap handle: clones share the same connection. One
/// thread runs [`serve`](Endpoint::serve) (the read loop); any number of
/// threads may call, notify and register handlers concurrently.
///
/// # Message flow
///
/// ```text
///   caller ──call()──► [0, id, method, args] ──────────► peer
///   caller ◄─oneshot── read loop ◄── [1, id, err, result] ◄── peer
///   handler thread ◄── read loop ◄── [0, id, method, args] ◄── peer
///   notify worker  ◄── read loop ◄── [2, method, args] ◄────── peer
/// ```
///
/// # Example
///
/// ```no_run
/// use nvrpc::rpc::Endpoint;
///
/// # fn main() -> anyhow::Result<()> {
/// let nvim = Endpoint::dial("/tmp/nvim.sock", Default::default())?;
/// nvim.spawn_serve()?;
///
/// let mut line = String::new();
/// nvim.call("nvim_get_current_line", &mut line, &())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("Endpoint")
            .field("closed", &state.closed)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl Endpoint {
    /// Build an endpoint over a byte stream.
    ///
    /// `closer` is run once when the endpoint closes; it should make blocked
    /// reads on `reader` return. Editor handle extensions (buffer, window,
    /// tabpage) are decoded by default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the notification worker thread cannot be
    /// spawned.
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: Option<Closer>,
        config: EndpointConfig,
    ) -> Result<Self> {
        Self::with_extensions(
            reader,
            writer,
            closer,
            config,
            Some(Arc::new(ExtensionRegistry::editor())),
        )
    }

    /// Like [`Endpoint::new`] with an explicit extension registry (or none).
    pub fn with_extensions(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: Option<Closer>,
        config: EndpointConfig,
        extensions: Option<Arc<ExtensionRegistry>>,
    ) -> Result<Self> {
        let buffer = config.read_buffer_size.max(1);
        let mut decoder = Decoder::with_buffer(BufReader::with_capacity(buffer, reader));
        decoder.set_extensions(extensions.clone());
        let writer: Box<dyn Write + Send> = Box::new(writer);

        let notifications = NotifyQueue::new();
        let worker = spawn_worker(
            Arc::clone(&notifications),
            format!("{}-notify", config.worker_name),
        )?;

        Ok(Self {
            shared: Arc::new(Shared {
                extensions,
                reader: Mutex::new(decoder),
                writer: Mutex::new(BufWriter::with_capacity(buffer, writer)),
                state: Mutex::new(State {
                    next_id: 0,
                    pending: HashMap::new(),
                    closed: false,
                    err: None,
                }),
                handlers: RwLock::new(HashMap::new()),
                has_closer: closer.is_some(),
                closer: Mutex::new(closer),
                notifications,
                worker: Mutex::new(Some(worker)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.shared.config
    }

    pub fn extensions(&self) -> Option<&Arc<ExtensionRegistry>> {
        self.shared.extensions.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// The fatal error that closed the endpoint, if it closed because of one.
    pub fn error(&self) -> Option<Error> {
        lock(&self.shared.state).err.clone()
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register `handler` for requests and notifications named `method`,
    /// replacing any previous handler for that name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `method` is empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn demo(nvim: &nvrpc::rpc::Endpoint) -> nvrpc::Result<()> {
    /// nvim.register("add", |a: i64, b: i64| -> Result<i64, String> { Ok(a + b) })?;
    /// nvim.register("log", |line: String| println!("{}", line))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn register<H, A>(&self, method: impl Into<String>, handler: H) -> Result<()>
    where
        H: Handler<A>,
        A: ArgList,
    {
        let method = method.into();
        if method.is_empty() {
            return Err(Error::InvalidArgument(
                "handler method name is empty".to_string(),
            ));
        }
        debug!(method = %method, "registering handler");
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, erase(handler));
        Ok(())
    }

    fn handler(&self, method: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    // =========================================================================
    // Outgoing messages
    // =========================================================================

    /// Call `method` on the peer and decode the result into `result`, blocking
    /// until the reply arrives or the endpoint closes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`call_async`](Endpoint::call_async) there.
    ///
    /// # Errors
    ///
    /// - [`Error::Peer`] if the peer replied with an error
    /// - [`Error::Convert`] if the result did not fit `result`
    /// - [`Error::Closed`] if the endpoint closed first
    /// - [`Error::LongValue`] if an argument is too long to encode
    pub fn call<A, R>(&self, method: &str, result: &mut R, args: &A) -> Result<()>
    where
        A: Args + ?Sized,
        R: Decode + ?Sized,
    {
        let done = self.start_call(method, args, true)?;
        let raw = done.blocking_recv().map_err(|_| Error::Closed)??;
        self.decode_result(&raw, result)
    }

    /// Async form of [`call`](Endpoint::call).
    pub async fn call_async<A, R>(&self, method: &str, result: &mut R, args: &A) -> Result<()>
    where
        A: Args + ?Sized,
        R: Decode + ?Sized,
    {
        let done = self.start_call(method, args, true)?;
        let raw = done.await.map_err(|_| Error::Closed)??;
        self.decode_result(&raw, result)
    }

    /// Call `method` and wait for it to finish, discarding the result.
    pub fn call_ignore<A: Args + ?Sized>(&self, method: &str, args: &A) -> Result<()> {
        let done = self.start_call(method, args, false)?;
        done.blocking_recv().map_err(|_| Error::Closed)??;
        Ok(())
    }

    fn decode_result<R: Decode + ?Sized>(&self, raw: &Raw, result: &mut R) -> Result<()> {
        if raw.0.is_empty() {
            return Ok(());
        }
        from_slice_with(&raw.0, result, self.shared.extensions.clone())
    }

    /// Send a notification. Notifications have no reply.
    pub fn notify<A: Args + ?Sized>(&self, method: &str, args: &A) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let payload = encode_args(args)?;
        trace!(method = %method, "sending notification");
        self.send(|enc| {
            enc.pack_array_len(3)?;
            enc.pack_uint(NOTIFICATION)?;
            enc.pack_string(method)?;
            enc.pack_raw(&payload)
        })
    }

    /// Start a batch of calls executed atomically by the peer.
    pub fn batch<'a>(&self) -> Batch<'a> {
        Batch::new(self.clone())
    }

    /// Encode the arguments, register a pending entry and send the request.
    pub(crate) fn start_call<A: Args + ?Sized>(
        &self,
        method: &str,
        args: &A,
        wants_reply: bool,
    ) -> Result<oneshot::Receiver<Result<Raw>>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let payload = encode_args(args)?;

        let (done, receiver) = oneshot::channel();
        let id = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(Error::Closed);
            }
            let id = state.allocate_id();
            state.pending.insert(
                id,
                Pending {
                    method: method.to_string(),
                    wants_reply,
                    done,
                },
            );
            id
        };

        trace!(id = %id, method = %method, "sending request");
        let sent = self.send(|enc| {
            enc.pack_array_len(4)?;
            enc.pack_uint(REQUEST)?;
            enc.pack_uint(id as u64)?;
            enc.pack_string(method)?;
            enc.pack_raw(&payload)
        });
        if let Err(err) = sent {
            lock(&self.shared.state).pending.remove(&id);
            return Err(err);
        }
        Ok(receiver)
    }

    /// Write one message under the writer lock and flush. A transport failure
    /// closes the endpoint.
    fn send(&self, write: impl FnOnce(&mut Encoder<'_>) -> Result<()>) -> Result<()> {
        let result = {
            let mut writer = lock(&self.shared.writer);
            let written = write(&mut Encoder::new(&mut *writer));
            written.and_then(|()| writer.flush().map_err(Error::from))
        };
        match &result {
            Err(err) if err.is_fatal() => {
                error!("failed to write message: {}", err);
                self.shutdown(Some(err.clone()));
            }
            _ => {}
        }
        result
    }

    fn send_reply(&self, id: u64, reply: &Reply) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.send(|enc| {
            enc.pack_array_len(4)?;
            enc.pack_uint(REPLY)?;
            enc.pack_uint(id)?;
            match reply {
                Ok(result) => {
                    enc.pack_nil()?;
                    result.encode(enc)
                }
                Err(value) => {
                    value.encode(enc)?;
                    enc.pack_nil()
                }
            }
        })
    }

    // =========================================================================
    // Read loop
    // =========================================================================

    /// Run the read loop on the calling thread until the stream ends or the
    /// endpoint closes.
    ///
    /// Returns `Ok(())` on a clean end of stream or after [`close`](Endpoint::close).
    /// A fatal error closes the endpoint and is returned.
    pub fn serve(&self) -> Result<()> {
        let mut dec = lock(&self.shared.reader);
        debug!("read loop started");
        let result = loop {
            match self.handle_message(&mut dec) {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(()) => {
                debug!("peer closed the stream");
                self.shutdown(None);
                Ok(())
            }
            Err(_) if self.is_closed() => Ok(()),
            Err(err) => {
                error!("read loop failed: {}", err);
                self.shutdown(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Run [`serve`](Endpoint::serve) on a new named thread.
    pub fn spawn_serve(&self) -> Result<thread::JoinHandle<Result<()>>> {
        let endpoint = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-serve", self.shared.config.worker_name))
            .spawn(move || endpoint.serve())?;
        Ok(handle)
    }

    /// Read and route one message. `Ok(false)` means a clean end of stream.
    fn handle_message(&self, dec: &mut Decoder<'static>) -> Result<bool> {
        match dec.unpack() {
            Ok(()) => {}
            Err(Error::Eof) => return Ok(false),
            Err(err) => return Err(err),
        }
        if dec.wire_type() != WireType::ArrayLen {
            return Err(Error::Protocol(format!(
                "message is a {}, not an array",
                dec.wire_type()
            )));
        }

        let len = dec.len();
        let kind: u64 = read_field(dec, "message type")?;
        match (kind, len) {
            (REQUEST, 4) => self.handle_request(dec)?,
            (REPLY, 4) => self.handle_reply(dec)?,
            (NOTIFICATION, 3) => self.handle_notification(dec)?,
            (REQUEST | REPLY | NOTIFICATION, _) => {
                return Err(Error::Protocol(format!(
                    "invalid length {} for message type {}",
                    len, kind
                )))
            }
            _ => return Err(Error::Protocol(format!("unknown message type {}", kind))),
        }
        Ok(true)
    }

    fn handle_reply(&self, dec: &mut Decoder<'static>) -> Result<()> {
        let id: u64 = read_field(dec, "reply id")?;
        // Ids past 32 bits were never issued here.
        let pending = u32::try_from(id)
            .ok()
            .and_then(|id| lock(&self.shared.state).pending.remove(&id));
        let Some(pending) = pending else {
            warn!(id = %id, "reply for unknown request id");
            for _ in 0..2 {
                dec.unpack_nested()?;
                dec.skip()?;
            }
            return Ok(());
        };

        dec.unpack_nested()?;
        let outcome = if dec.wire_type() != WireType::Nil {
            let mut value = Value::Nil;
            dec.take_convert_error();
            value.decode_into(dec)?;
            dec.take_convert_error();
            dec.unpack_nested()?;
            dec.skip()?;
            Err(Error::Peer(value))
        } else if pending.wants_reply {
            dec.unpack_nested()?;
            dec.read_raw().map(Raw)
        } else {
            dec.unpack_nested()?;
            dec.skip()?;
            Ok(Raw::default())
        };

        trace!(id = %id, method = %pending.method, ok = outcome.is_ok(), "reply received");
        // The caller may have given up waiting.
        let _ = pending.done.send(outcome);
        Ok(())
    }

    fn handle_request(&self, dec: &mut Decoder<'static>) -> Result<()> {
        let id: u64 = read_field(dec, "request id")?;
        let method: String = read_field(dec, "request method")?;
        dec.unpack_nested()?;

        let Some(handler) = self.handler(&method) else {
            dec.skip()?;
            warn!(id = %id, method = %method, "request for unknown method");
            let reply = Err(Value::String(format!("unknown request method: {}", method)));
            return self.reply_or_closed(id, &reply);
        };

        dec.take_convert_error();
        let invocation = handler.prepare(dec)?;
        if let Some(err) = dec.take_convert_error() {
            warn!(id = %id, method = %method, "invalid request arguments: {}", err);
            let reply = Err(Value::String(
                Error::InvalidArgument(err.to_string()).to_string(),
            ));
            return self.reply_or_closed(id, &reply);
        }

        trace!(id = %id, method = %method, "dispatching request");
        let endpoint = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-request-{}", self.shared.config.worker_name, id))
            .spawn(move || {
                let reply = run_invocation(&method, invocation);
                if let Err(err) = endpoint.send_reply(id, &reply) {
                    debug!(id = %id, method = %method, "reply not sent: {}", err);
                }
            });
        if let Err(err) = spawned {
            error!(id = %id, "failed to spawn request worker: {}", err);
            let reply = Err(Value::String(format!("request worker unavailable: {}", err)));
            return self.reply_or_closed(id, &reply);
        }
        Ok(())
    }

    /// Reply from the read loop. A closed endpoint is not a read-loop error;
    /// a write failure is.
    fn reply_or_closed(&self, id: u64, reply: &Reply) -> Result<()> {
        match self.send_reply(id, reply) {
            Err(Error::Closed) => Ok(()),
            other => other,
        }
    }

    fn handle_notification(&self, dec: &mut Decoder<'static>) -> Result<()> {
        let method: String = read_field(dec, "notification method")?;
        dec.unpack_nested()?;

        let Some(handler) = self.handler(&method) else {
            dec.skip()?;
            debug!(method = %method, "no handler for notification");
            return Ok(());
        };

        dec.take_convert_error();
        let invocation = handler.prepare(dec)?;
        if let Some(err) = dec.take_convert_error() {
            warn!(method = %method, "dropping notification with invalid arguments: {}", err);
            return Ok(());
        }

        trace!(method = %method, "queueing notification");
        self.shared
            .notifications
            .push(Notification { method, invocation });
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close the endpoint.
    ///
    /// Fails every pending call with [`Error::Closed`], runs the closer, stops
    /// the notification worker and waits for the read loop to exit. Closing
    /// twice is a no-op.
    ///
    /// An endpoint built without a closer cannot interrupt a blocked read, so
    /// its read loop runs until the stream ends.
    pub fn close(&self) -> Result<()> {
        self.shutdown(None);

        // The read loop holds the decoder until it returns.
        if self.shared.has_closer {
            drop(lock(&self.shared.reader));
        }

        let worker = lock(&self.shared.worker).take();
        if let Some(handle) = worker {
            if handle.thread().id() == thread::current().id() {
                // Closing from a notification handler; the worker exits on its own.
                return Ok(());
            }
            if handle.join().is_err() {
                warn!("notification worker panicked during shutdown");
            }
        }
        Ok(())
    }

    fn shutdown(&self, err: Option<Error>) {
        let pending = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.err = err;
            std::mem::take(&mut state.pending)
        };

        debug!(pending = %pending.len(), "closing endpoint");
        for (_, call) in pending {
            let _ = call.done.send(Err(Error::Closed));
        }

        let closer = lock(&self.shared.closer).take();
        if let Some(close) = closer {
            if let Err(err) = close() {
                debug!("closing transport: {}", err);
            }
        }
        self.shared.notifications.shutdown();
    }
}

fn encode_args<A: Args + ?Sized>(args: &A) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    args.encode_args(&mut Encoder::new(&mut payload))?;
    Ok(payload)
}

/// Decode one framing field. A field that does not convert is a protocol
/// error.
fn read_field<T: Decode + Default>(dec: &mut Decoder<'_>, what: &str) -> Result<T> {
    let mut value = T::default();
    dec.take_convert_error();
    dec.decode_element(&mut value)?;
    match dec.take_convert_error() {
        Some(err) => Err(Error::Protocol(format!("invalid {}: {}", what, err))),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::to_vec;
    use pretty_assertions::assert_eq;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn endpoint(stream: UnixStream) -> Endpoint {
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Endpoint::unix(stream, EndpointConfig::default()).unwrap()
    }

    /// Raw peer side: read one message as a `Value`.
    fn read_value(dec: &mut Decoder<'_>) -> Value {
        let mut v = Value::Nil;
        dec.decode(&mut v).unwrap();
        v
    }

    fn write_raw(stream: &mut UnixStream, value: &impl Encode) {
        stream.write_all(&to_vec(value).unwrap()).unwrap();
    }

    #[test]
    fn test_request_framing_and_reply() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        ep.spawn_serve().unwrap();

        let caller = {
            let ep = ep.clone();
            thread::spawn(move || {
                let mut sum = 0i64;
                ep.call("sum", &mut sum, &(1i64, 2i64)).map(|()| sum)
            })
        };

        let mut dec = Decoder::new(peer.try_clone().unwrap());
        let request = read_value(&mut dec);
        let fields = request.as_array().unwrap();
        assert_eq!(fields[0], Value::Uint(0));
        assert_eq!(fields[2], Value::String("sum".into()));
        assert_eq!(
            fields[3],
            Value::Array(vec![Value::Uint(1), Value::Uint(2)])
        );
        let id = fields[1].as_u64().unwrap();
        assert!(id > 0 && id <= ID_MASK as u64);

        // A reply for an unknown id is skipped.
        write_raw(&mut peer, &(1u64, id + 100, (), 99i64));
        write_raw(&mut peer, &(1u64, id, (), 3i64));

        assert_eq!(caller.join().unwrap().unwrap(), 3);
        ep.close().unwrap();
    }

    #[test]
    fn test_reply_id_beyond_32_bits_is_unknown() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        ep.spawn_serve().unwrap();

        let caller = {
            let ep = ep.clone();
            thread::spawn(move || {
                let mut out = String::new();
                ep.call("name", &mut out, &()).map(|()| out)
            })
        };

        let mut dec = Decoder::new(peer.try_clone().unwrap());
        let request = read_value(&mut dec);
        let id = request.as_array().unwrap()[1].as_u64().unwrap();

        write_raw(&mut peer, &(1u64, u32::MAX as u64 + 5, (), "stray"));
        write_raw(&mut peer, &(1u64, u64::MAX, (), ()));
        write_raw(&mut peer, &(1u64, id, (), "main.rs"));

        assert_eq!(caller.join().unwrap().unwrap(), "main.rs");
        assert!(!ep.is_closed());
        assert!(ep.error().is_none());
        ep.close().unwrap();
    }

    #[test]
    fn test_peer_error_and_convert_error() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        ep.spawn_serve().unwrap();
        let mut dec = Decoder::new(peer.try_clone().unwrap());

        let caller = {
            let ep = ep.clone();
            thread::spawn(move || {
                let mut out = 0i64;
                ep.call("fail", &mut out, &())
            })
        };
        let request = read_value(&mut dec);
        let id = request.as_array().unwrap()[1].as_u64().unwrap();
        write_raw(&mut peer, &(1u64, id, (0i64, "Invalid buffer id"), ()));
        let err = caller.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Peer(_)));
        assert_eq!(err.peer_message(), Some("Invalid buffer id"));

        let caller = {
            let ep = ep.clone();
            thread::spawn(move || {
                let mut out = 0i64;
                ep.call("text", &mut out, &())
            })
        };
        let request = read_value(&mut dec);
        let id = request.as_array().unwrap()[1].as_u64().unwrap();
        write_raw(&mut peer, &(1u64, id, (), "not a number"));
        let err = caller.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Convert(_)));

        // The endpoint is still usable after a conversion failure.
        assert!(!ep.is_closed());
        ep.close().unwrap();
    }

    #[test]
    fn test_unknown_method_and_invalid_argument() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        ep.register("double", |n: i64| -> std::result::Result<i64, String> { Ok(n * 2) })
            .unwrap();
        ep.spawn_serve().unwrap();
        let mut dec = Decoder::new(peer.try_clone().unwrap());

        write_raw(&mut peer, &(0u64, 7u64, "missing", ()));
        let reply = read_value(&mut dec);
        let fields = reply.as_array().unwrap();
        assert_eq!(fields[1], Value::Uint(7));
        assert_eq!(
            fields[2],
            Value::String("unknown request method: missing".into())
        );

        write_raw(&mut peer, &(0u64, 8u64, "double", ("x",)));
        let reply = read_value(&mut dec);
        let message = reply.as_array().unwrap()[2].as_str().unwrap().to_string();
        assert!(message.contains("invalid argument"), "{}", message);

        write_raw(&mut peer, &(0u64, 9u64, "double", (21i64,)));
        let reply = read_value(&mut dec);
        let fields = reply.as_array().unwrap();
        assert_eq!(fields[2], Value::Nil);
        assert_eq!(fields[3], Value::Uint(42));

        ep.close().unwrap();
    }

    #[test]
    fn test_protocol_error_closes_endpoint() {
        let (a, mut peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        let serve = ep.spawn_serve().unwrap();

        write_raw(&mut peer, &(5u64, 1u64, ()));
        let err = serve.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(ep.is_closed());
        assert!(matches!(ep.error(), Some(Error::Protocol(_))));

        let mut out = Value::Nil;
        assert!(matches!(ep.call("x", &mut out, &()), Err(Error::Closed)));
    }

    #[test]
    fn test_close_fails_pending_calls() {
        let (a, _peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        ep.spawn_serve().unwrap();

        let caller = {
            let ep = ep.clone();
            thread::spawn(move || ep.call_ignore("never_answered", &()))
        };
        // Wait until the request is pending.
        while lock(&ep.shared.state).pending.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        ep.close().unwrap();
        assert!(matches!(caller.join().unwrap(), Err(Error::Closed)));
        assert!(ep.error().is_none());
        ep.close().unwrap();
    }

    #[test]
    fn test_register_rejects_empty_name_and_ids_wrap() {
        let (a, _peer) = UnixStream::pair().unwrap();
        let ep = endpoint(a);
        assert!(matches!(
            ep.register("", || ()),
            Err(Error::InvalidArgument(_))
        ));

        let mut state = State {
            next_id: ID_MASK,
            pending: HashMap::new(),
            closed: false,
            err: None,
        };
        assert_eq!(state.allocate_id(), 0);
        assert_eq!(state.allocate_id(), 1);
        ep.close().unwrap();
    }
}
