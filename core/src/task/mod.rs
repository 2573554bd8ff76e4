use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span};

type MutableJoinSet = Rc<RefCell<JoinSet<()>>>;

/// Owns every long-running task of a process together with the token used to cancel them.
pub struct Builder {
    join_set: MutableJoinSet,
    shutdown: CancellationToken,
}

impl Builder {
    pub fn new_task(&self, name: &'static str) -> Spawner {
        Spawner {
            name,
            join_set: self.join_set.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        debug!("Shutdown requested");
        self.shutdown.cancel();
    }

    pub async fn join_all(self) {
        let join_set = self.join_set.take();
        let _ = join_set.join_all().await;
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            join_set: MutableJoinSet::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub struct Spawner {
    name: &'static str,
    join_set: MutableJoinSet,
    shutdown: CancellationToken,
}

impl Spawner {
    #[track_caller]
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            error!("Refusing to spawn task after shutdown; task.name={}", self.name);
            return;
        }

        self.join_set
            .borrow_mut()
            .spawn(task.instrument(info_span!("task", task.name = self.name)));
    }

    /// Spawns `task` and drops it as soon as shutdown is requested.
    #[track_caller]
    pub fn spawn_cancellable<F>(self, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let name = self.name;
        self.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => debug!("Task cancelled; task.name={name}"),
                () = task => {}
            }
        });
    }

    #[track_caller]
    pub fn spawn_on_shutdown<F>(self, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.spawn(async move {
            shutdown.cancelled().await;
            task.await;
        });
    }
}
