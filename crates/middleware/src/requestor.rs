//! Terminal invocation performing one transport round trip.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use courier_transport::Transport;

use crate::codec;
use crate::envelope::{CallEnvelope, ResultEnvelope};
use crate::error::Result;
use crate::interceptor::Invocation;
use crate::session::SessionMessage;

/// Sends the call to its current target and waits for the result.
#[derive(Clone)]
pub struct Requestor {
    transport: Arc<dyn Transport>,
}

impl Requestor {
    /// Create a requestor over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl fmt::Debug for Requestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requestor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Invocation for Requestor {
    #[instrument(skip_all, fields(method = call.method_name(), target = %call.target()))]
    async fn invoke(&self, call: &mut CallEnvelope) -> Result<Option<ResultEnvelope>> {
        let payload = codec::seal(&SessionMessage::call(call.clone()))?;

        let mut connection = self.transport.connect(call.target().endpoint()).await?;
        connection.send(payload).await?;

        if !call.expects_result() {
            connection.disconnect().await?;
            return Ok(None);
        }

        let reply = connection.receive().await?;
        let result = codec::open(&reply)?.into_result()?;
        debug!("Received result served by {}", result.served_by());
        Ok(Some(result))
    }
}
