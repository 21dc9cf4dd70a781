//! Handler signatures and argument lists.
//!
//! Any closure `Fn(A1, ..., An) -> R` with up to eight wire arguments can be
//! registered as a handler. Bound arguments are whatever the closure captures.
//!
//! - Each `Ai` is decoded from the next element of the incoming argument
//!   array. Missing elements leave the argument at its default, and extra
//!   elements are skipped.
//! - A trailing [`Variadic<T>`] collects every remaining element (an empty
//!   `Vec` when there are none).
//! - `R` is `()`, `Result<(), E>` or `Result<T, E>` with `T: Encode` and
//!   `E: Display`.

use std::any::Any;
use std::fmt::Display;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::Result;
use crate::msgpack::{Decode, Decoder, Encode, Encoder, Raw, Value, WireType};

/// Outcome of a handler: the encoded result, or the error value sent to the
/// peer.
pub type Reply = std::result::Result<Raw, Value>;

/// A handler invocation whose arguments are already decoded.
pub(crate) type Invocation = Box<dyn FnOnce() -> Reply + Send>;

// =============================================================================
// Outgoing argument lists
// =============================================================================

/// Values that encode as an RPC argument array.
///
/// Implemented for `()` (no arguments), tuples, slices, arrays and `Vec`s.
pub trait Args {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()>;
}

impl Args for () {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_array_len(0)
    }
}

impl<A: Args + ?Sized> Args for &A {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
        (**self).encode_args(enc)
    }
}

impl<T: Encode> Args for [T] {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
        enc.pack_array_len(self.len() as u64)?;
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }
}

impl<T: Encode> Args for Vec<T> {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
        self.as_slice().encode_args(enc)
    }
}

impl<T: Encode, const N: usize> Args for [T; N] {
    fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
        self.as_slice().encode_args(enc)
    }
}

macro_rules! impl_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: Encode),+> Args for ($($name,)+) {
            fn encode_args(&self, enc: &mut Encoder<'_>) -> Result<()> {
                self.encode(enc)
            }
        }
    };
}

impl_args_tuple!(A1);
impl_args_tuple!(A1, A2);
impl_args_tuple!(A1, A2, A3);
impl_args_tuple!(A1, A2, A3, A4);
impl_args_tuple!(A1, A2, A3, A4, A5);
impl_args_tuple!(A1, A2, A3, A4, A5, A6);
impl_args_tuple!(A1, A2, A3, A4, A5, A6, A7);
impl_args_tuple!(A1, A2, A3, A4, A5, A6, A7, A8);

// =============================================================================
// Incoming argument lists
// =============================================================================

/// Rest-of-arguments parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Deref for Variadic<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T> DerefMut for Variadic<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.0
    }
}

impl<T> From<Variadic<T>> for Vec<T> {
    fn from(v: Variadic<T>) -> Self {
        v.0
    }
}

/// A handler parameter decoded from the incoming argument array.
pub trait FromArg: Sized + Send + 'static {
    /// Take this parameter from the next of `remaining` array elements.
    fn from_arg(dec: &mut Decoder<'_>, remaining: &mut u64) -> Result<Self>;
}

impl<T: Decode + Default + Send + 'static> FromArg for T {
    fn from_arg(dec: &mut Decoder<'_>, remaining: &mut u64) -> Result<Self> {
        let mut value = T::default();
        if *remaining > 0 {
            *remaining -= 1;
            dec.decode_element(&mut value)?;
        }
        Ok(value)
    }
}

impl<T: Decode + Default + Send + 'static> FromArg for Variadic<T> {
    fn from_arg(dec: &mut Decoder<'_>, remaining: &mut u64) -> Result<Self> {
        let mut rest = Vec::with_capacity((*remaining).min(1024) as usize);
        while *remaining > 0 {
            *remaining -= 1;
            let mut value = T::default();
            dec.decode_element(&mut value)?;
            rest.push(value);
        }
        Ok(Variadic(rest))
    }
}

/// The full parameter list of a handler.
///
/// Conversion failures are recorded on the decoder; the endpoint checks for
/// them after `decode_args` returns.
pub trait ArgList: Sized + Send + 'static {
    /// Decode from an argument array whose header is already unpacked.
    fn decode_args(dec: &mut Decoder<'_>) -> Result<Self>;
}

fn argument_count(dec: &mut Decoder<'_>) -> Result<u64> {
    if dec.wire_type() == WireType::ArrayLen {
        Ok(dec.len())
    } else {
        dec.convert_mismatch("argument list")?;
        Ok(0)
    }
}

fn skip_rest(dec: &mut Decoder<'_>, mut remaining: u64) -> Result<()> {
    while remaining > 0 {
        remaining -= 1;
        dec.unpack_nested()?;
        dec.skip()?;
    }
    Ok(())
}

/// Turns a handler's return value into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Ok(Raw::default())
    }
}

impl<T: Encode, E: Display> IntoReply for std::result::Result<T, E> {
    fn into_reply(self) -> Reply {
        match self {
            Ok(value) => Raw::encode_from(&value).map_err(|err| Value::String(err.to_string())),
            Err(err) => Err(Value::String(err.to_string())),
        }
    }
}

/// A callable that can serve requests and notifications.
pub trait Handler<A: ArgList>: Send + Sync + 'static {
    fn invoke(&self, args: A) -> Reply;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<$($arg: FromArg),*> ArgList for ($($arg,)*) {
            #[allow(non_snake_case, unused_mut)]
            fn decode_args(dec: &mut Decoder<'_>) -> Result<Self> {
                let mut remaining = argument_count(dec)?;
                $(let $arg = $arg::from_arg(dec, &mut remaining)?;)*
                skip_rest(dec, remaining)?;
                Ok(($($arg,)*))
            }
        }

        impl<F, R, $($arg),*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($arg: FromArg,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, ($($arg,)*): ($($arg,)*)) -> Reply {
                (self)($($arg),*).into_reply()
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Type-erased handler stored in the endpoint's table.
pub(crate) trait ErasedHandler: Send + Sync {
    /// Decode arguments and bind them to the handler.
    fn prepare(&self, dec: &mut Decoder<'_>) -> Result<Invocation>;
}

struct Erased<H, A> {
    handler: Arc<H>,
    _args: PhantomData<fn() -> A>,
}

impl<H: Handler<A>, A: ArgList> ErasedHandler for Erased<H, A> {
    fn prepare(&self, dec: &mut Decoder<'_>) -> Result<Invocation> {
        let args = A::decode_args(dec)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::new(move || handler.invoke(args)))
    }
}

pub(crate) fn erase<H: Handler<A>, A: ArgList>(handler: H) -> Arc<dyn ErasedHandler> {
    Arc::new(Erased {
        handler: Arc::new(handler),
        _args: PhantomData,
    })
}

/// Run `invocation`, turning a panic into an error reply.
pub(crate) fn run_invocation(method: &str, invocation: Invocation) -> Reply {
    match catch_unwind(AssertUnwindSafe(invocation)) {
        Ok(reply) => reply,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(method = %method, "handler panicked: {}", message);
            Err(Value::String(format!("handler panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::msgpack::{from_slice, to_vec, Decoder};
    use pretty_assertions::assert_eq;

    fn args_bytes<A: Args + ?Sized>(args: &A) -> Vec<u8> {
        let mut buf = Vec::new();
        args.encode_args(&mut Encoder::new(&mut buf)).unwrap();
        buf
    }

    fn prepare<H: Handler<A>, A: ArgList>(handler: H, bytes: &[u8]) -> (Result<Invocation>, bool) {
        let erased = erase(handler);
        let mut dec = Decoder::from_slice(bytes);
        dec.unpack().unwrap();
        let invocation = erased.prepare(&mut dec);
        let converted = dec.take_convert_error().is_none();
        (invocation, converted)
    }

    fn reply_value(reply: Reply) -> Value {
        let raw = reply.unwrap();
        let mut v = Value::Nil;
        from_slice(&raw.0, &mut v).unwrap();
        v
    }

    #[test]
    fn test_args_encoding() {
        assert_eq!(args_bytes(&()), vec![0x90]);
        assert_eq!(args_bytes(&(1i64,)), vec![0x91, 0x01]);
        assert_eq!(args_bytes(&(1i64, "a")), vec![0x92, 0x01, 0xa1, b'a']);
        assert_eq!(args_bytes(&vec![1u8, 2]), vec![0x92, 0x01, 0x02]);
        assert_eq!(args_bytes(&[true]), vec![0x91, 0xc3]);
    }

    #[test]
    fn test_fixed_arguments() {
        let (inv, ok) = prepare(
            |a: i64, b: i64| -> std::result::Result<i64, String> { Ok(a + b) },
            &args_bytes(&(1i64, 2i64)),
        );
        assert!(ok);
        assert_eq!(reply_value(inv.unwrap()()), Value::Uint(3));
    }

    #[test]
    fn test_missing_and_extra_arguments() {
        let add = |a: i64, b: i64| -> std::result::Result<i64, String> { Ok(a * 10 + b) };

        let (inv, ok) = prepare(add, &args_bytes(&(4i64,)));
        assert!(ok);
        assert_eq!(reply_value(inv.unwrap()()), Value::Uint(40));

        let (inv, ok) = prepare(add, &args_bytes(&(1i64, 2i64, "extra", vec![1i64])));
        assert!(ok);
        assert_eq!(reply_value(inv.unwrap()()), Value::Uint(12));
    }

    #[test]
    fn test_variadic_tail() {
        let join = |sep: String, rest: Variadic<String>| -> std::result::Result<String, String> {
            Ok(rest.join(sep.as_str()))
        };

        let (inv, _) = prepare(join, &args_bytes(&(",", "a", "b", "c")));
        assert_eq!(
            reply_value(inv.unwrap()()),
            Value::String("a,b,c".to_string())
        );

        let count = |rest: Variadic<i64>| -> std::result::Result<usize, String> { Ok(rest.len()) };
        let (inv, _) = prepare(count, &args_bytes(&()));
        assert_eq!(reply_value(inv.unwrap()()), Value::Uint(0));
    }

    #[test]
    fn test_convert_error_is_recorded() {
        let (inv, ok) = prepare(
            |a: i64| -> std::result::Result<i64, String> { Ok(a) },
            &args_bytes(&("not a number",)),
        );
        assert!(inv.is_ok());
        assert!(!ok);

        let (_, ok) = prepare(|| (), &to_vec("scalar").unwrap());
        assert!(!ok);
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(().into_reply(), Ok(Raw::default()));

        let failed: std::result::Result<(), String> = Err("boom".into());
        assert_eq!(failed.into_reply(), Err(Value::String("boom".into())));

        let done: std::result::Result<(), Error> = Ok(());
        assert_eq!(done.into_reply(), Ok(Raw(vec![0xc0])));
    }

    #[test]
    fn test_panicking_handler_replies_error() {
        let (inv, _) = prepare(
            || -> std::result::Result<(), String> { panic!("kaboom") },
            &args_bytes(&()),
        );
        let reply = run_invocation("explode", inv.unwrap());
        assert_eq!(reply, Err(Value::String("handler panicked: kaboom".into())));
    }
}
