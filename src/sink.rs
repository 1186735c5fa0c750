//! Downstream hand-off

use crate::profile::StageOutput;
use crossbeam_channel::{Sender, TrySendError};
use thiserror::Error;

/// The downstream stage refused a message. Rejection is how backpressure is signalled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct SinkRejected {
    pub reason: String,
}

pub trait Downstream: Send {
    fn put(&mut self, item: StageOutput) -> Result<(), SinkRejected>;
}

/// collects everything, never rejects
impl Downstream for Vec<StageOutput> {
    fn put(&mut self, item: StageOutput) -> Result<(), SinkRejected> {
        self.push(item);
        Ok(())
    }
}

/// Queue to the next stage. A full or disconnected queue rejects without blocking.
impl Downstream for Sender<StageOutput> {
    fn put(&mut self, item: StageOutput) -> Result<(), SinkRejected> {
        self.try_send(item).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Disconnected(_) => "queue disconnected",
            };
            SinkRejected { reason: reason.to_string() }
        })
    }
}

impl<D: Downstream + ?Sized> Downstream for Box<D> {
    fn put(&mut self, item: StageOutput) -> Result<(), SinkRejected> {
        (**self).put(item)
    }
}
