//! A stage on its own thread.
//!
//! Profile delivery and parameter updates may come from different threads. Both are sent
//! as messages to the single thread that owns the [SenseStage], so a parameter change
//! always lands between two profiles and never inside a frame.

use crate::error::{ReconError, Result};
use crate::params::StreamHeader;
use crate::profile::AcquisitionProfile;
use crate::sink::Downstream;
use crate::stage::SenseStage;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::debug;
use std::thread::{self, JoinHandle};

enum Command {
    Configure(StreamHeader, Sender<Result<()>>),
    Process(AcquisitionProfile, Sender<Result<()>>),
    ParameterChanged {
        name: String,
        new_value: String,
        old_value: String,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

/// Cloneable entry point to a running stage. Every call blocks until the stage thread
/// has handled it and returns the stage's result.
#[derive(Clone)]
pub struct StageHandle {
    commands: Sender<Command>,
}

impl StageHandle {
    fn call(&self, make: impl FnOnce(Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands.send(make(reply_tx)).map_err(|_| ReconError::Disconnected)?;
        reply_rx.recv().map_err(|_| ReconError::Disconnected)?
    }

    pub fn configure(&self, header: StreamHeader) -> Result<()> {
        self.call(|reply| Command::Configure(header, reply))
    }

    pub fn process(&self, profile: AcquisitionProfile) -> Result<()> {
        self.call(|reply| Command::Process(profile, reply))
    }

    pub fn parameter_changed(&self, name: &str, new_value: &str, old_value: &str) -> Result<()> {
        self.call(|reply| Command::ParameterChanged {
            name: name.to_string(),
            new_value: new_value.to_string(),
            old_value: old_value.to_string(),
            reply,
        })
    }
}

/// Owns the stage thread. Joining hands the stage back.
pub struct StageActor<D: Downstream + 'static> {
    handle: StageHandle,
    worker: Option<JoinHandle<SenseStage<D>>>,
}

impl<D: Downstream + 'static> StageActor<D> {
    pub fn spawn(stage: SenseStage<D>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let name = format!("sense-stage-{}", stage.parameters().slice);
        let worker = thread::Builder::new().name(name).spawn(move || run(stage, rx))?;
        Ok(Self { handle: StageHandle { commands: tx }, worker: Some(worker) })
    }

    pub fn handle(&self) -> StageHandle {
        self.handle.clone()
    }

    /// Stops the thread after the commands already queued and returns the stage
    pub fn join(mut self) -> Result<SenseStage<D>> {
        // the worker may already be gone, join reports that
        let _ = self.handle.commands.send(Command::Shutdown);
        let worker = self.worker.take().ok_or(ReconError::Disconnected)?;
        worker.join().map_err(|_| ReconError::Disconnected)
    }
}

impl<D: Downstream + 'static> Drop for StageActor<D> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.handle.commands.send(Command::Shutdown);
            let _ = worker.join();
        }
    }
}

fn run<D: Downstream>(mut stage: SenseStage<D>, commands: Receiver<Command>) -> SenseStage<D> {
    for command in commands {
        // a caller that stopped waiting for its reply is not an error
        match command {
            Command::Configure(header, reply) => {
                let _ = reply.send(stage.configure(&header));
            }
            Command::Process(profile, reply) => {
                let _ = reply.send(stage.process(profile));
            }
            Command::ParameterChanged { name, new_value, old_value, reply } => {
                let _ = reply.send(stage.parameter_changed(&name, &new_value, &old_value));
            }
            Command::Shutdown => break,
        }
    }
    debug!("stage worker for slice {} stopping", stage.parameters().slice);
    stage
}
