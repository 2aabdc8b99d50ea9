//! Typed view of the remote-debugging protocol's Network domain.
//!
//! Only the pieces the recorder consumes are modelled: the three event streams
//! (`requestWillBeSent`, `responseReceived`, `loadingFailed`) and the payloads of
//! the `getResponseBody` and `getCookies` commands.

pub mod events;
pub mod types;

pub use events::{LoadingFailed, NetworkEvent, RequestWillBeSent, ResponseReceived};
pub use types::{
    header_value, Cookie, Headers, RequestData, ResourceTiming, ResponseBody, ResponseMetadata,
    TransactionId,
};
