use switchd_core::{Mode, SwitchId};
use switchd_schedule::WeightedSchedule;
use tokio::sync::{mpsc, oneshot};

use crate::engine::{PlannedEvent, SwitchSnapshot};
use crate::error::{DispatchError, Result};

/// Requests accepted by the dispatcher task. Each carries its reply channel.
pub(crate) enum Command {
    AddSchedule {
        switch: SwitchId,
        name: String,
        schedule: WeightedSchedule,
        reply: oneshot::Sender<Result<()>>,
    },
    UseSchedule {
        switch: SwitchId,
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DeleteSchedule {
        switch: SwitchId,
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetMode {
        switch: SwitchId,
        mode: Mode,
        level: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    Switch {
        switch: SwitchId,
        reply: oneshot::Sender<Result<SwitchSnapshot>>,
    },
    Switches {
        reply: oneshot::Sender<Vec<SwitchSnapshot>>,
    },
    NextEvent {
        reply: oneshot::Sender<Option<PlannedEvent>>,
    },
}

/// Cloneable front door to a running [`ScheduleDispatcher`](crate::ScheduleDispatcher).
///
/// Every call is a round trip through the dispatcher task, so mutations and
/// timer fires are applied in a single order. Calls fail with
/// [`DispatchError::Stopped`] once the task has exited.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Store a new named schedule on `switch`. Does not activate it.
    pub async fn add_schedule(
        &self,
        switch: &SwitchId,
        name: &str,
        schedule: WeightedSchedule,
    ) -> Result<()> {
        self.request(|reply| Command::AddSchedule {
            switch: switch.clone(),
            name: name.to_string(),
            schedule,
            reply,
        })
        .await?
    }

    /// Make `name` the active schedule. In `Auto` mode its current weight is
    /// applied right away.
    pub async fn use_schedule(&self, switch: &SwitchId, name: &str) -> Result<()> {
        self.request(|reply| Command::UseSchedule {
            switch: switch.clone(),
            name: name.to_string(),
            reply,
        })
        .await?
    }

    pub async fn delete_schedule(&self, switch: &SwitchId, name: &str) -> Result<()> {
        self.request(|reply| Command::DeleteSchedule {
            switch: switch.clone(),
            name: name.to_string(),
            reply,
        })
        .await?
    }

    /// Change the mode. `level` is applied for the override modes and ignored
    /// for `Auto`.
    pub async fn set_mode(&self, switch: &SwitchId, mode: Mode, level: i64) -> Result<()> {
        self.request(|reply| Command::SetMode {
            switch: switch.clone(),
            mode,
            level,
            reply,
        })
        .await?
    }

    pub async fn switch(&self, switch: &SwitchId) -> Result<SwitchSnapshot> {
        self.request(|reply| Command::Switch {
            switch: switch.clone(),
            reply,
        })
        .await?
    }

    pub async fn switches(&self) -> Result<Vec<SwitchSnapshot>> {
        self.request(|reply| Command::Switches { reply }).await
    }

    /// The currently armed batch of actions, if any.
    pub async fn next_event(&self) -> Result<Option<PlannedEvent>> {
        self.request(|reply| Command::NextEvent { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| DispatchError::Stopped)?;
        rx.await.map_err(|_| DispatchError::Stopped)
    }
}
