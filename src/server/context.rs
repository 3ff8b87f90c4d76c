use flashforge::http::Envelope;
use serde::de::DeserializeOwned;

use crate::state::SharedState;

/**
 * Application-specific context (state shared by handler functions)
 */
#[derive(Debug)]
pub struct Context {
    /// The emulated printer.
    pub state: SharedState,
}

impl Context {
    /**
     * Return a new Context.
     */
    pub fn new(state: SharedState) -> Context {
        Context { state }
    }

    /// Decode a JSON body. Failures become the `500` envelope the firmware
    /// sends for requests it cannot read.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, Envelope> {
        serde_json::from_slice(body).map_err(|err| {
            tracing::warn!(error = %err, "undecodable request body");
            Envelope::failure(Envelope::INTERNAL, err.to_string())
        })
    }
}
