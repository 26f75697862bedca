//! Exchange coordinator
//!
//! Holds at most one [`PendingRequest`]. Every resolution path takes the
//! request out of the coordinator before sending on its result slot, so a
//! request resolves exactly once no matter which side (response, timeout,
//! detach, stop) gets there first.

use phmetro_core::{ResponseFraming, SessionError, MAX_RESPONSE_LEN};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Outcome of one exchange
pub type ExchangeResult = Result<Vec<u8>, SessionError>;

/// A request that has been written and is waiting for its response
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    payload: Vec<u8>,
    issued_at: Instant,
    framing: ResponseFraming,
    received: Vec<u8>,
    result_slot: oneshot::Sender<ExchangeResult>,
}

impl PendingRequest {
    /// Request id, unique within a coordinator
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes that were written
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Time since the request was issued
    pub fn elapsed(&self) -> Duration {
        self.issued_at.elapsed()
    }

    /// Completion rule for the response
    pub fn framing(&self) -> ResponseFraming {
        self.framing
    }

    /// Bytes accumulated so far
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    fn resolve(self, result: ExchangeResult) {
        tracing::debug!(
            "Exchange #{} resolved after {:?}: {}",
            self.id,
            self.issued_at.elapsed(),
            match &result {
                Ok(bytes) => format!("{} bytes", bytes.len()),
                Err(e) => e.to_string(),
            }
        );
        // The caller may have gone away; nothing left to notify
        let _ = self.result_slot.send(result);
    }
}

/// Serializes request/response cycles
#[derive(Debug, Default)]
pub struct ExchangeCoordinator {
    pending: Option<PendingRequest>,
    next_id: u64,
}

impl ExchangeCoordinator {
    /// Create an idle coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request is outstanding
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// The outstanding request, if any
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Register a new request
    ///
    /// Fails with `Busy` while another request is outstanding.
    pub fn begin(
        &mut self,
        payload: &[u8],
        framing: ResponseFraming,
    ) -> Result<(u64, oneshot::Receiver<ExchangeResult>), SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::Busy);
        }
        framing.validate()?;

        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingRequest {
            id,
            payload: payload.to_vec(),
            issued_at: Instant::now(),
            framing,
            received: Vec::new(),
            result_slot: tx,
        });
        tracing::debug!("Exchange #{} issued ({} bytes, {})", id, payload.len(), framing);
        Ok((id, rx))
    }

    /// Feed received bytes to the outstanding request
    ///
    /// Returns true if this chunk completed the response. Bytes with no
    /// outstanding request, and bytes past the end of a frame, are dropped.
    /// A response that grows past [`MAX_RESPONSE_LEN`] without completing
    /// fails the request with `ResponseTooLong`, which is also returned.
    pub fn on_data(&mut self, data: &[u8]) -> Result<bool, SessionError> {
        let Some(pending) = self.pending.as_mut() else {
            tracing::trace!("Dropping {} stray bytes", data.len());
            return Ok(false);
        };

        pending.received.extend_from_slice(data);
        let Some(len) = pending.framing.frame_len(&pending.received) else {
            if pending.received.len() > MAX_RESPONSE_LEN {
                let error = SessionError::ResponseTooLong {
                    limit: MAX_RESPONSE_LEN,
                };
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Err(error.clone()));
                }
                return Err(error);
            }
            return Ok(false);
        };

        let Some(mut pending) = self.pending.take() else {
            return Ok(false);
        };
        if pending.received.len() > len {
            tracing::trace!(
                "Dropping {} bytes after frame",
                pending.received.len() - len
            );
        }
        let mut response = std::mem::take(&mut pending.received);
        response.truncate(len);
        pending.resolve(Ok(response));
        Ok(true)
    }

    /// Resolve request `id` with an error, if it is still outstanding
    pub fn fail(&mut self, id: u64, error: SessionError) -> bool {
        match self.take_if(id) {
            Some(pending) => {
                pending.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop request `id` without resolving it; its caller is gone
    pub fn abandon(&mut self, id: u64) -> bool {
        let abandoned = self.take_if(id);
        if abandoned.is_some() {
            tracing::debug!("Exchange #{} abandoned", id);
        }
        abandoned.is_some()
    }

    /// Resolve whatever is outstanding with `error`
    ///
    /// Returns the id of the cancelled request.
    pub fn cancel(&mut self, error: SessionError) -> Option<u64> {
        self.pending.take().map(|pending| {
            let id = pending.id;
            pending.resolve(Err(error));
            id
        })
    }

    fn take_if(&mut self, id: u64) -> Option<PendingRequest> {
        match &self.pending {
            Some(pending) if pending.id == id => self.pending.take(),
            _ => None,
        }
    }
}
