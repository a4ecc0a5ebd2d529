mod controller;
mod decoder;
mod error;

use std::time::Duration;

use reqwest::Client;

pub use controller::{StreamController, TokenStream};
pub use decoder::{FrameDecoder, ProtocolEvent};
pub use error::{GenerateError, GenerateErrorKind};

/// Build the HTTP client shared by the streaming and registry paths.
///
/// Proxy discovery is disabled: the inference server is local, and system
/// proxies would only reroute or stall localhost traffic.
pub(crate) fn build_http_client(connect_timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .no_proxy()
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}
