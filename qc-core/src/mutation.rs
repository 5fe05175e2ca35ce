//! Mutation dispatch
//!
//! Encodes a machine's typed mutation into the wire envelope, addresses it to
//! one physical machine and hands it to a transport. Nothing is awaited: the
//! outcome shows up later in the machine's event stream.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use qc_protocol::{
    encode_line, MachineIdentificationUnique, MutationData, MutationEnvelope, MutationRequest,
    MAX_MESSAGE_SIZE,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ControlError, Result};
use crate::namespace::MachineNamespace;

// ============================================================================
// Transports
// ============================================================================

/// Delivers encoded mutation requests toward the server
#[cfg_attr(test, mockall::automock)]
pub trait MutationTransport: Send + Sync {
    fn deliver(&self, request: &MutationRequest) -> Result<()>;
}

impl<X: MutationTransport + ?Sized> MutationTransport for Arc<X> {
    fn deliver(&self, request: &MutationRequest) -> Result<()> {
        (**self).deliver(request)
    }
}

/// In-process outbox, drained by whoever owns the receiving end
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outbox: mpsc::UnboundedSender<MutationRequest>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MutationRequest>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (Self { outbox }, rx)
    }
}

impl MutationTransport for ChannelTransport {
    fn deliver(&self, request: &MutationRequest) -> Result<()> {
        self.outbox
            .send(request.clone())
            .map_err(|_| ControlError::TargetUnreachable {
                target: request.target().to_string(),
            })
    }
}

/// Newline-delimited JSON over any writer
pub struct LineTransport<W> {
    writer: Mutex<W>,
}

impl<W: Write> LineTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> MutationTransport for LineTransport<W> {
    fn deliver(&self, request: &MutationRequest) -> Result<()> {
        let size = serde_json::to_vec(request)?.len() + 1;
        if size > MAX_MESSAGE_SIZE {
            return Err(ControlError::MessageTooLarge {
                size,
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        let line = encode_line(request).map_err(ControlError::transport)?;

        let mut writer = self.writer.lock();
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(|e| ControlError::transport(e.to_string()))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct MutationDispatcher<X> {
    transport: X,
}

impl<X: MutationTransport> MutationDispatcher<X> {
    pub fn new(transport: X) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Send a typed mutation of machine type `M` to `target`.
    ///
    /// Returns the request id on successful hand-off.
    pub fn send<M: MachineNamespace>(
        &self,
        target: MachineIdentificationUnique,
        mutation: &M::Mutation,
    ) -> Result<u64> {
        check_target(&target)?;
        if target.machine_identification != M::MACHINE_IDENTIFICATION {
            return Err(ControlError::AddressMismatch {
                expected: M::MACHINE_IDENTIFICATION.to_string(),
                actual: target.to_string(),
            });
        }

        let data = MutationData::encode(mutation).map_err(ControlError::InvalidAction)?;
        self.deliver(target, data)
    }

    /// Send an untyped `action` / `value` pair to `target`
    pub fn send_raw(
        &self,
        target: MachineIdentificationUnique,
        action: &str,
        value: Value,
    ) -> Result<u64> {
        check_target(&target)?;
        qc_protocol::validate_action_name(action).map_err(ControlError::InvalidAction)?;
        self.deliver(
            target,
            MutationData {
                action: action.to_string(),
                value,
            },
        )
    }

    fn deliver(&self, target: MachineIdentificationUnique, data: MutationData) -> Result<u64> {
        let request = MutationRequest::new(MutationEnvelope {
            machine_identification_unique: target,
            data,
        });

        match self.transport.deliver(&request) {
            Ok(()) => {
                debug!(
                    namespace = %target,
                    action = request.action(),
                    id = request.id,
                    "Sent mutation"
                );
                Ok(request.id)
            }
            Err(err) => {
                warn!(
                    namespace = %target,
                    action = request.action(),
                    error = %err,
                    "Mutation not delivered"
                );
                Err(err)
            }
        }
    }
}

fn check_target(target: &MachineIdentificationUnique) -> Result<()> {
    if target.is_valid() {
        Ok(())
    } else {
        Err(ControlError::InvalidAddress {
            target: target.to_string(),
        })
    }
}
