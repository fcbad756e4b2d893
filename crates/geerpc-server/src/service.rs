//! Typed method registry.
//!
//! Handlers are registered at compile time with the fixed call shape
//! `(args, &mut reply) -> Result<(), String>`: a deserializable argument in,
//! a serializable reply out, an error string on failure. Registration erases
//! the types behind an adapter that decodes the argument with the
//! connection's codec, seeds the reply with `R::default()` (so map and
//! vector replies start out as empty containers), runs the handler, and
//! encodes the reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use geerpc_common::{CodecType, Result, RpcError};

type HandlerFn = Box<dyn Fn(CodecType, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// One registered method: the erased handler plus its invocation counter.
pub struct MethodHandler {
    handler: HandlerFn,
    num_calls: AtomicU64,
}

impl MethodHandler {
    /// Decodes the argument, runs the handler, encodes the reply. A handler
    /// failure comes back as [`RpcError::Remote`] so the connection worker
    /// can lift the text into the response header.
    pub fn invoke(&self, codec_type: CodecType, arg_bytes: &[u8]) -> Result<Vec<u8>> {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(codec_type, arg_bytes)
    }

    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }
}

/// A named bundle of methods, addressed on the wire as `Service.Method`.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodHandler>>,
}

impl Service {
    /// Starts a service.
    ///
    /// # Panics
    ///
    /// Panics when `name` is empty or contains a dot; the wire form is
    /// `Service.Method`, so a dotted service name could never be resolved.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            !name.is_empty() && !name.contains('.'),
            "rpc server: {:?} is not a valid service name",
            name
        );
        Self {
            name,
            methods: HashMap::new(),
        }
    }

    /// Registers a handler under `name`. Later registrations under the same
    /// name replace earlier ones.
    ///
    /// # Panics
    ///
    /// Panics when `name` is empty or contains a dot.
    pub fn method<A, R, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + Default + 'static,
        F: Fn(A, &mut R) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        assert!(
            !name.is_empty() && !name.contains('.'),
            "rpc server: {:?} is not a valid method name",
            name
        );
        let handler: HandlerFn = Box::new(move |codec_type, arg_bytes| {
            let args: A = codec_type.decode(arg_bytes)?;
            let mut reply = R::default();
            f(args, &mut reply).map_err(RpcError::Remote)?;
            codec_type.encode(&reply)
        });
        self.methods.insert(
            name,
            Arc::new(MethodHandler {
                handler,
                num_calls: AtomicU64::new(0),
            }),
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handler(&self, method: &str) -> Option<Arc<MethodHandler>> {
        self.methods.get(method).cloned()
    }

    /// Completed invocations of `method`; zero for a method this service
    /// does not have.
    pub fn num_calls(&self, method: &str) -> u64 {
        self.methods.get(method).map_or(0, |m| m.num_calls())
    }
}
