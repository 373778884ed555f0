//! Allow-listed proxies for everything that crosses the boundary.
//!
//! Each proxy kind carries a static operation table; anything not listed is
//! refused with a permission error before the delegate is touched. Proxies
//! that wrap a client resource have a server-side adapter implementing the
//! matching core trait over a `Handle`.

mod evaluator;
mod input;
mod output;
mod signal;

pub use evaluator::EvaluatorProxy;
pub use input::{CompleterProxy, InputSourceProxy, RemoteCompleter, RemoteInput};
pub use output::{OutputProxy, RemoteSink};
pub use signal::{ParkHandle, SignalProxy};
