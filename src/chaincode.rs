//! The program boundary: what a chaincode implements.
//!
//! # Example
//!
//! ```ignore
//! use chaincode_shim::{BoxFuture, Chaincode, ChaincodeStub, Response};
//!
//! struct Counter;
//!
//! impl Chaincode for Counter {
//!     fn init<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             match stub.put_state("count", b"0").await {
//!                 Ok(()) => Response::success(),
//!                 Err(e) => Response::error(e.to_string()),
//!             }
//!         })
//!     }
//!
//!     fn invoke<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
//!         Box::pin(async move { Response::success_with_message(stub.function()) })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::handler::ChaincodeStub;
use crate::protocol::Response;

/// Boxed future returned by [`Chaincode`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A transaction program.
///
/// `init` runs for INIT messages, `invoke` for TRANSACTION messages. A
/// [`Response`] with `status < 400` is reported as COMPLETED, anything else
/// as ERROR. Both methods may run concurrently for different transactions.
pub trait Chaincode: Send + Sync + 'static {
    fn init<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response>;

    fn invoke<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response>;
}

impl<C: Chaincode + ?Sized> Chaincode for Arc<C> {
    fn init<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
        (**self).init(stub)
    }

    fn invoke<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
        (**self).invoke(stub)
    }
}

impl<C: Chaincode + ?Sized> Chaincode for Box<C> {
    fn init<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
        (**self).init(stub)
    }

    fn invoke<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
        (**self).invoke(stub)
    }
}

/// Which program entry point an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryPoint {
    Init,
    Invoke,
}

impl EntryPoint {
    pub(crate) fn call<'a>(
        self,
        chaincode: &'a dyn Chaincode,
        stub: &'a ChaincodeStub,
    ) -> BoxFuture<'a, Response> {
        match self {
            EntryPoint::Init => chaincode.init(stub),
            EntryPoint::Invoke => chaincode.invoke(stub),
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            EntryPoint::Init => "init",
            EntryPoint::Invoke => "invoke",
        }
    }
}
