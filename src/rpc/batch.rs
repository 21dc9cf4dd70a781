//! Atomic call batches.
//!
//! A [`Batch`] buffers calls locally and sends them as one compound call
//! (`nvim_call_atomic` by default). The peer runs them in order and stops at
//! the first failure:
//!
//! ```text
//! request:  [[ [method, args], [method, args], ... ]]
//! reply:    [ [result, result, ...], nil | [index, kind, message] ]
//! ```

use tracing::{debug, trace};

use super::endpoint::Endpoint;
use super::handler::Args;
use crate::error::{Error, Result};
use crate::msgpack::{Decode, Encoder, Raw, Value};
use crate::msgpack_struct;

/// Reply of the compound call.
#[derive(Debug, Default)]
struct CompoundReply {
    results: Vec<Raw>,
    error: Option<Vec<Value>>,
}

msgpack_struct!(CompoundReply {
    results: ",array",
    error,
});

/// A sequence of calls executed atomically by the peer.
///
/// Result slots are borrowed until [`execute`](Batch::execute) returns. A batch
/// is reset by every `execute` and can be reused afterwards.
///
/// ```no_run
/// # fn demo(nvim: &nvrpc::Endpoint) -> nvrpc::Result<()> {
/// let (mut name, mut lines) = (String::new(), 0i64);
///
/// let mut batch = nvim.batch();
/// batch
///     .call("nvim_buf_get_name", &mut name, &(0i64,))
///     .call("nvim_buf_line_count", &mut lines, &(0i64,));
/// batch.execute()?;
/// # Ok(())
/// # }
/// ```
pub struct Batch<'a> {
    endpoint: Endpoint,
    slots: Vec<Option<&'a mut dyn Decode>>,
    /// Encoded `[method, args]` entries, without the enclosing array header.
    payload: Vec<u8>,
    /// First append failure; blocks further appends until `execute`.
    err: Option<Error>,
}

impl std::fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("calls", &self.slots.len())
            .field("payload_bytes", &self.payload.len())
            .field("err", &self.err)
            .finish()
    }
}

impl<'a> Batch<'a> {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            slots: Vec::new(),
            payload: Vec::new(),
            err: None,
        }
    }

    /// Queue a call whose result is decoded into `result`.
    pub fn call<R, A>(&mut self, method: &str, result: &'a mut R, args: &A) -> &mut Self
    where
        R: Decode,
        A: Args + ?Sized,
    {
        let slot: &'a mut dyn Decode = result;
        self.append(method, Some(slot), args)
    }

    /// Queue a call whose result is discarded.
    pub fn call_ignore<A: Args + ?Sized>(&mut self, method: &str, args: &A) -> &mut Self {
        self.append(method, None, args)
    }

    fn append<A: Args + ?Sized>(
        &mut self,
        method: &str,
        slot: Option<&'a mut dyn Decode>,
        args: &A,
    ) -> &mut Self {
        if self.err.is_some() {
            return self;
        }
        let mark = self.payload.len();
        match encode_call(&mut Encoder::new(&mut self.payload), method, args) {
            Ok(()) => self.slots.push(slot),
            Err(err) => {
                debug!(method = %method, "batch append failed: {}", err);
                self.payload.truncate(mark);
                self.err = Some(err);
            }
        }
        self
    }

    /// Number of queued calls.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Send the queued calls and fill their result slots.
    ///
    /// # Errors
    ///
    /// - the first append error, if any call failed to encode (nothing is sent)
    /// - [`Error::Indexed`] if call `index` failed on the peer; slots before
    ///   `index` are filled, the rest are untouched
    /// - any error of [`Endpoint::call`]
    pub fn execute(&mut self) -> Result<()> {
        let (slots, args) = match self.take()? {
            Some(taken) => taken,
            None => return Ok(()),
        };
        let mut reply = CompoundReply::default();
        let method = self.endpoint.config().batch_method.clone();
        self.endpoint.call(&method, &mut reply, &args)?;
        self.finish(slots, reply)
    }

    /// Async form of [`execute`](Batch::execute).
    pub async fn execute_async(&mut self) -> Result<()> {
        let (slots, args) = match self.take()? {
            Some(taken) => taken,
            None => return Ok(()),
        };
        let mut reply = CompoundReply::default();
        let method = self.endpoint.config().batch_method.clone();
        self.endpoint.call_async(&method, &mut reply, &args).await?;
        self.finish(slots, reply)
    }

    /// Reset the batch, returning its slots and the compound-call arguments.
    /// `None` for an empty batch.
    #[allow(clippy::type_complexity)]
    fn take(&mut self) -> Result<Option<(Vec<Option<&'a mut dyn Decode>>, (Raw,))>> {
        let slots = std::mem::take(&mut self.slots);
        let payload = std::mem::take(&mut self.payload);
        if let Some(err) = self.err.take() {
            return Err(err);
        }
        if slots.is_empty() {
            return Ok(None);
        }

        let mut calls = Vec::with_capacity(payload.len() + 5);
        Encoder::new(&mut calls).pack_array_len(slots.len() as u64)?;
        calls.extend_from_slice(&payload);
        trace!(calls = %slots.len(), "executing batch");
        Ok(Some((slots, (Raw(calls),))))
    }

    fn finish(
        &self,
        slots: Vec<Option<&'a mut dyn Decode>>,
        reply: CompoundReply,
    ) -> Result<()> {
        let failure = reply.error.map(indexed_error).transpose()?;
        let filled = match &failure {
            Some(Error::Indexed { index, .. }) => *index,
            _ => {
                if reply.results.len() != slots.len() {
                    return Err(Error::Protocol(format!(
                        "batch of {} calls returned {} results",
                        slots.len(),
                        reply.results.len()
                    )));
                }
                slots.len()
            }
        };

        let extensions = self.endpoint.extensions().cloned();
        let mut first_err = None;
        for (slot, raw) in slots.into_iter().zip(reply.results).take(filled) {
            let Some(dst) = slot else { continue };
            if let Err(err) = raw.decode_to(dst, extensions.clone()) {
                first_err.get_or_insert(err);
            }
        }

        match (failure, first_err) {
            (Some(err), _) => Err(err),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(()),
        }
    }
}

fn encode_call<A: Args + ?Sized>(enc: &mut Encoder<'_>, method: &str, args: &A) -> Result<()> {
    enc.pack_array_len(2)?;
    enc.pack_string(method)?;
    args.encode_args(enc)
}

/// Convert the peer's `[index, kind, message]` into an indexed error.
fn indexed_error(error: Vec<Value>) -> Result<Error> {
    let [index, kind, message]: [Value; 3] = error.try_into().map_err(|error: Vec<Value>| {
        Error::Protocol(format!("batch error has {} elements, expected 3", error.len()))
    })?;
    let index = index
        .as_u64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| Error::Protocol(format!("batch error index {} is not an index", index)))?;
    Ok(Error::Indexed {
        index,
        source: Box::new(Error::Peer(Value::Array(vec![kind, message]))),
    })
}
