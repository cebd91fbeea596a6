//! # Change Notifier Module
//!
//! The canonical [`CatalogView`] lives on a single tokio task owned by a
//! [`ChangeNotifier`]. Everything else talks to it through a cloneable
//! [`NotifierHandle`]:
//!
//! - [`NotifierHandle::signal`] reports an external catalog change. The view
//!   recounts right away.
//! - [`NotifierHandle::request_update`] and [`CatalogSignal::FilmRollsImported`]
//!   ask for the rule list to be recompiled. Requests that pile up while the task
//!   is busy collapse into a single recompute.
//! - [`NotifierHandle::with_view`] runs a closure against the view on the owning
//!   task.
//!
//! Listeners subscribe to [`CollectionEvent`]s through [`CatalogView::subscribe`]
//! before handing the view over.

use crate::{
    collection::{CatalogError, CatalogView},
    query::CameraIndex,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// An external change to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSignal {
    TagChanged,
    FilmRollsChanged,
    FilmRollsRemoved,
    ImageImported(u32),
    FilmRollsImported(u32),
}

impl CatalogSignal {
    fn needs_recompute(&self) -> bool {
        matches!(self, CatalogSignal::FilmRollsImported(_))
    }
}

/// What kind of change a [`CollectionEvent::Changed`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The statement was rebuilt.
    NewQuery,
    /// Same statement, different rows.
    Reload,
}

/// Broadcast by the canonical view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Changed(ChangeKind),
    Hint(String),
    SelectionChanged,
}

type ViewTask = Box<dyn FnOnce(&mut CatalogView) + Send>;

enum Message {
    Signal(CatalogSignal),
    RequestUpdate,
    Update(oneshot::Sender<Result<(), CatalogError>>),
    WithView(ViewTask),
    Shutdown(oneshot::Sender<()>),
}

/// Owns the canonical view and serializes every access to it.
pub struct ChangeNotifier {
    view: CatalogView,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ChangeNotifier {
    /// Moves `view` onto a new task and returns the handle used to drive it.
    pub fn spawn(view: CatalogView) -> NotifierHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = ChangeNotifier { view, rx };

        tokio::spawn(notifier.run());

        NotifierHandle { tx }
    }

    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            let mut batch = Batch::default();
            self.handle(message, &mut batch).await;

            while let Ok(message) = self.rx.try_recv() {
                self.handle(message, &mut batch).await;
            }

            if batch.recompute {
                self.recompute().await;
            }

            if !batch.shutdown.is_empty() {
                for ack in batch.shutdown {
                    let _ = ack.send(());
                }
                break;
            }
        }

        tracing::debug!("change notifier stopped");
    }

    async fn handle(&mut self, message: Message, batch: &mut Batch) {
        match message {
            Message::Signal(signal) => {
                tracing::debug!(?signal, "catalog changed");
                if let Err(e) = self.view.refresh().await {
                    tracing::warn!(error = %e, ?signal, "failed to recount collection");
                }
                batch.recompute |= signal.needs_recompute();
            }
            Message::RequestUpdate => batch.recompute = true,
            Message::Update(reply) => {
                let _ = reply.send(self.view.update().await);
            }
            Message::WithView(task) => task(&mut self.view),
            Message::Shutdown(ack) => batch.shutdown.push(ack),
        }
    }

    async fn recompute(&mut self) {
        let cameras = match CameraIndex::load(self.view.database()).await {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load cameras, keeping current query");
                return;
            }
        };

        match self.view.update_query(&cameras).await {
            Ok(()) => tracing::info!(count = self.view.count(), "collection recomputed"),
            Err(e) => tracing::warn!(error = %e, "failed to recompute collection"),
        }
    }
}

/// What the messages of one drained batch asked for.
#[derive(Default)]
struct Batch {
    recompute: bool,
    shutdown: Vec<oneshot::Sender<()>>,
}

/// A cloneable handle to a running [`ChangeNotifier`].
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl NotifierHandle {
    pub fn signal(&self, signal: CatalogSignal) -> Result<(), NotifierError> {
        self.send(Message::Signal(signal))
    }

    /// Schedules a recompile of the stored rule list.
    pub fn request_update(&self) -> Result<(), NotifierError> {
        self.send(Message::RequestUpdate)
    }

    /// Rebuilds the view from its current filter state and waits for the result.
    pub async fn update(&self) -> Result<(), NotifierError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Update(reply))?;

        Ok(rx.await.map_err(|_| NotifierError::Closed)??)
    }

    /// Runs `f` on the task owning the view and returns its result.
    pub async fn with_view<F, R>(&self, f: F) -> Result<R, NotifierError>
    where
        F: FnOnce(&mut CatalogView) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Message::WithView(Box::new(move |view| {
            let _ = reply.send(f(view));
        })))?;

        rx.await.map_err(|_| NotifierError::Closed)
    }

    /// Stops the notifier once everything queued so far has been handled.
    pub async fn shutdown(&self) -> Result<(), NotifierError> {
        let (ack, rx) = oneshot::channel();
        self.send(Message::Shutdown(ack))?;

        rx.await.map_err(|_| NotifierError::Closed)
    }

    fn send(&self, message: Message) -> Result<(), NotifierError> {
        self.tx.send(message).map_err(|_| NotifierError::Closed)
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("change notifier is not running")]
    Closed,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[cfg(test)]
mod tests {
    use super::{CatalogSignal, ChangeKind, ChangeNotifier, CollectionEvent, NotifierError};
    use crate::{
        collection::CatalogView,
        config::MemoryConfig,
        database::tests::{get_db, insert_images},
        query::FilterFlags,
    };
    use std::sync::Arc;
    use tokio::sync::broadcast;

    async fn view() -> (CatalogView, broadcast::Receiver<CollectionEvent>) {
        let db = get_db().await;
        insert_images(&db, &[(1, 1, 0), (2, 1, 1), (3, 2, 2)]).await;

        let (tx, _) = broadcast::channel(64);
        let view = CatalogView::open(db, Arc::new(MemoryConfig::new()), Some(tx))
            .await
            .unwrap();
        let rx = view.subscribe().unwrap();

        (view, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<CollectionEvent>) -> Vec<CollectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count(events: &[CollectionEvent], kind: ChangeKind) -> usize {
        events
            .iter()
            .filter(|event| **event == CollectionEvent::Changed(kind))
            .count()
    }

    #[tokio::test]
    async fn test_queued_requests_collapse_into_one_recompute() {
        let (view, mut rx) = view().await;
        drain(&mut rx);
        let handle = ChangeNotifier::spawn(view);

        handle.signal(CatalogSignal::FilmRollsImported(1)).unwrap();
        handle.request_update().unwrap();
        handle.signal(CatalogSignal::TagChanged).unwrap();
        handle.request_update().unwrap();
        handle.shutdown().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(1, count(&events, ChangeKind::NewQuery));
        assert_eq!(2, count(&events, ChangeKind::Reload));
    }

    #[tokio::test]
    async fn test_signal_recounts() {
        let (view, mut rx) = view().await;
        drain(&mut rx);
        let db = view.database().clone();
        let handle = ChangeNotifier::spawn(view);

        insert_images(&db, &[(4, 1, 0)]).await;
        handle.signal(CatalogSignal::ImageImported(4)).unwrap();

        assert_eq!(3, handle.with_view(|view| view.count()).await.unwrap());

        let events = drain(&mut rx);
        assert_eq!(0, count(&events, ChangeKind::NewQuery));
        assert_eq!(1, count(&events, ChangeKind::Reload));
        assert!(events.iter().any(|event| matches!(event, CollectionEvent::Hint(_))));
    }

    #[tokio::test]
    async fn test_with_view_then_update() {
        let (view, _rx) = view().await;
        let handle = ChangeNotifier::spawn(view);

        handle
            .with_view(|view| {
                view.set_film_id(2);
                view.set_filter_flags(FilterFlags::FILM_ID);
            })
            .await
            .unwrap();
        assert!(handle.with_view(|view| view.is_stale()).await.unwrap());

        handle.update().await.unwrap();

        assert_eq!(1, handle.with_view(|view| view.count()).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_update_compiles_rules() {
        let (view, mut rx) = view().await;
        drain(&mut rx);
        let handle = ChangeNotifier::spawn(view);

        handle.request_update().unwrap();
        tokio::task::yield_now().await;
        let flags = handle
            .with_view(|view| view.params().filter_flags)
            .await
            .unwrap();

        assert!(!flags.contains(FilterFlags::FILM_ID));
        assert_eq!(1, count(&drain(&mut rx), ChangeKind::NewQuery));
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (view, _rx) = view().await;
        let handle = ChangeNotifier::spawn(view);

        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        assert!(matches!(
            handle.signal(CatalogSignal::TagChanged),
            Err(NotifierError::Closed)
        ));
        assert!(matches!(
            handle.with_view(|view| view.count()).await,
            Err(NotifierError::Closed)
        ));
    }
}
