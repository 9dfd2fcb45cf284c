//! The live view model: everything one dashboard view owns between mount and
//! unmount.
//!
//! Backend calls run on worker threads and report back over a channel. All
//! state changes happen in [`LiveSession::pump`], on the thread that owns the
//! view, so the merge stores need no locking. Every result carries the epoch
//! (and for snapshots the generation) it was issued under; anything outdated
//! is dropped when it arrives.

pub mod command;
pub mod merge_store;
pub mod session;
pub mod snapshot;
pub mod subscriber;

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    RidewatchError,
    backend::{Backend, ChangeEvent, Subscription},
    config::{AppConfig, TableNames},
    records::{EventKind, PotholeEvent, RideEvent, SortOrder, TelemetrySample, TimedEvent},
};

use command::{CommandDispatcher, CommandState};
use merge_store::{InsertOutcome, MergeStore};
use session::{Session, SessionState};

/// Notifications handled per feed and pump, so a burst cannot stall a frame
const MAX_NOTIFICATIONS_PER_PUMP: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A short, non-blocking message for the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    fn error(error: &RidewatchError) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: error.to_string(),
        }
    }
}

enum WorkResult {
    Session {
        epoch: u64,
        result: Result<Option<String>, RidewatchError>,
    },
    Potholes {
        epoch: u64,
        generation: u64,
        result: Result<Vec<PotholeEvent>, RidewatchError>,
    },
    RideEvents {
        epoch: u64,
        generation: u64,
        result: Result<Vec<RideEvent>, RidewatchError>,
    },
    Stop {
        epoch: u64,
        result: Result<(), RidewatchError>,
    },
}

/// Event types with a list of their own in the view.
trait Listed: TimedEvent {
    fn snapshot_result(
        epoch: u64,
        generation: u64,
        result: Result<Vec<Self>, RidewatchError>,
    ) -> WorkResult;
}

impl Listed for PotholeEvent {
    fn snapshot_result(
        epoch: u64,
        generation: u64,
        result: Result<Vec<Self>, RidewatchError>,
    ) -> WorkResult {
        WorkResult::Potholes {
            epoch,
            generation,
            result,
        }
    }
}

impl Listed for RideEvent {
    fn snapshot_result(
        epoch: u64,
        generation: u64,
        result: Result<Vec<Self>, RidewatchError>,
    ) -> WorkResult {
        WorkResult::RideEvents {
            epoch,
            generation,
            result,
        }
    }
}

/// What worker threads need, kept apart from the feeds so both can be
/// borrowed at once.
struct WorkContext {
    backend: Arc<dyn Backend>,
    sender: Sender<WorkResult>,
    tables: TableNames,
    snapshot_limit: Option<usize>,
    epoch: u64,
}

/// One event list: its merge store, fetch bookkeeping and change feed.
pub struct EventFeed<T: TimedEvent> {
    store: Option<MergeStore<T>>,
    order: SortOrder,
    loading: bool,
    notice: Option<String>,
    generation: u64,
    subscription: Option<Subscription>,
    streamed_during_fetch: Vec<T>,
}

impl<T: TimedEvent> EventFeed<T> {
    fn new(order: SortOrder) -> Self {
        Self {
            store: None,
            order,
            loading: false,
            notice: None,
            generation: 0,
            subscription: None,
            streamed_during_fetch: Vec::new(),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.store.iter().flat_map(|store| store.iter())
    }

    pub fn len(&self) -> usize {
        self.store.as_ref().map_or(0, MergeStore::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Last fetch or feed problem, cleared by the next good snapshot.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Whether new events still stream in. False means the list is a stale
    /// snapshot.
    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    fn attach(&mut self, session: &Session) {
        self.store = Some(MergeStore::new(&session.session_id, self.order));
    }

    fn subscribe(&mut self, ctx: &WorkContext, session: &Session) -> Result<(), RidewatchError> {
        let subscription = subscriber::subscribe_events::<T>(
            ctx.backend.as_ref(),
            &ctx.tables,
            &session.rider_id,
            &session.session_id,
        )?;
        self.subscription = Some(subscription);
        Ok(())
    }

    fn apply_snapshot(
        &mut self,
        generation: u64,
        result: Result<Vec<T>, RidewatchError>,
    ) -> Option<Notice> {
        if generation != self.generation {
            debug!(
                "Ignoring {} snapshot generation {generation}, current is {}",
                T::KIND,
                self.generation
            );
            return None;
        }
        self.loading = false;
        let store = self.store.as_mut()?;

        match result {
            Ok(items) => {
                let kept = store.replace_all(items);
                for item in self.streamed_during_fetch.drain(..) {
                    store.insert(item);
                }
                debug!("Loaded {kept} {} from snapshot", T::KIND);
                self.notice = None;
                None
            }
            Err(e) => {
                self.streamed_during_fetch.clear();
                warn!("{e}");
                self.notice = Some(e.to_string());
                Some(Notice::error(&e))
            }
        }
    }

    fn drain(&mut self, notices: &mut Vec<Notice>) {
        let Some(subscription) = &self.subscription else {
            return;
        };
        let Some(store) = self.store.as_mut() else {
            return;
        };

        let mut closed = false;
        for _ in 0..MAX_NOTIFICATIONS_PER_PUMP {
            let Some(event) = subscription.try_next() else {
                break;
            };
            match event {
                ChangeEvent::Inserted(row) => {
                    let Some(item) = subscriber::accept_event::<T>(&row, store.session_id())
                    else {
                        continue;
                    };
                    if self.loading {
                        self.streamed_during_fetch.push(item.clone());
                    }
                    if store.insert(item) == InsertOutcome::Inserted {
                        debug!("New {} merged, {} held", T::KIND, store.len());
                        // rows caught up with during a fetch are not news
                        if T::KIND == EventKind::Potholes && !self.loading {
                            notices.push(Notice::info("New pothole detected"));
                        }
                    }
                }
                ChangeEvent::Error(reason) => {
                    let e = RidewatchError::SubscriptionFailed {
                        channel: subscription.channel().to_string(),
                        reason,
                    };
                    warn!("{e}");
                    notices.push(Notice::error(&e));
                }
                ChangeEvent::Closed => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            let e = RidewatchError::SubscriptionFailed {
                channel: subscription.channel().to_string(),
                reason: "feed closed".to_string(),
            };
            warn!("{e}");
            self.notice = Some(e.to_string());
            notices.push(Notice::error(&e));
            self.subscription = None;
        }
    }

    /// Re-sorts the held events. Returns whether the direction changed.
    fn set_order(&mut self, order: SortOrder) -> bool {
        if self.order == order {
            return false;
        }
        self.order = order;
        if let Some(store) = self.store.as_mut() {
            store.set_sort_order(order);
        }
        true
    }

    fn detach(&mut self, backend: &dyn Backend) {
        if let Some(subscription) = self.subscription.take() {
            let channel = subscription.channel().to_string();
            drop(subscription);
            backend.unsubscribe(&channel);
            debug!("Unsubscribed {channel}");
        }
        self.loading = false;
        self.streamed_during_fetch.clear();
    }
}

impl<T: Listed> EventFeed<T> {
    fn start_fetch(&mut self, ctx: &WorkContext, session: &Session) {
        self.generation += 1;
        self.loading = true;
        self.streamed_during_fetch.clear();

        let epoch = ctx.epoch;
        let generation = self.generation;
        let backend = ctx.backend.clone();
        let sender = ctx.sender.clone();
        let tables = ctx.tables.clone();
        let rider_id = session.rider_id.clone();
        let session_id = session.session_id.clone();
        let order = self.order;
        let limit = ctx.snapshot_limit;
        debug!("Fetching {} generation {generation}", T::KIND);

        thread::spawn(move || {
            let result = snapshot::fetch_snapshot::<T>(
                backend.as_ref(),
                &tables,
                &rider_id,
                &session_id,
                order,
                limit,
            );
            let _ = sender.send(T::snapshot_result(epoch, generation, result));
        });
    }
}

/// View model of the live dashboard for one rider.
pub struct LiveSession {
    ctx: WorkContext,
    receiver: Receiver<WorkResult>,
    rider_id: String,
    rider_label: String,
    state: SessionState,
    potholes: EventFeed<PotholeEvent>,
    ride_events: EventFeed<RideEvent>,
    telemetry: Option<Subscription>,
    latest_sample: Option<TelemetrySample>,
    commands: CommandDispatcher,
    notices: VecDeque<Notice>,
    mounted: bool,
}

impl LiveSession {
    /// Mounts the view for `rider_id`. With a known `session_id` the view is
    /// bound right away, otherwise the latest session is looked up first.
    pub fn mount(
        backend: Arc<dyn Backend>,
        config: &AppConfig,
        rider_id: &str,
        session_id: Option<&str>,
        rider_label: Option<&str>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let mut live = Self {
            ctx: WorkContext {
                backend,
                sender,
                tables: config.tables.clone(),
                snapshot_limit: config.snapshot_limit,
                epoch: 0,
            },
            receiver,
            rider_id: rider_id.to_string(),
            rider_label: rider_label.unwrap_or(rider_id).to_string(),
            state: SessionState::Resolving,
            potholes: EventFeed::new(SortOrder::Newest),
            ride_events: EventFeed::new(SortOrder::Newest),
            telemetry: None,
            latest_sample: None,
            commands: CommandDispatcher::new(rider_id, config.stop_redirect_delay()),
            notices: VecDeque::new(),
            mounted: true,
        };

        match session_id.filter(|s| !s.is_empty()) {
            Some(session_id) => live.bind_session(session_id.to_string()),
            None => live.start_resolve(),
        }
        live
    }

    fn start_resolve(&mut self) {
        info!("Resolving session for rider {}", self.rider_id);
        let epoch = self.ctx.epoch;
        let backend = self.ctx.backend.clone();
        let sender = self.ctx.sender.clone();
        let tables = self.ctx.tables.clone();
        let rider_id = self.rider_id.clone();
        thread::spawn(move || {
            let result = session::resolve_session(backend.as_ref(), &tables, &rider_id);
            let _ = sender.send(WorkResult::Session { epoch, result });
        });
    }

    fn bind_session(&mut self, session_id: String) {
        let session = Session {
            rider_id: self.rider_id.clone(),
            session_id,
            rider_label: self.rider_label.clone(),
        };
        info!(
            "Watching rider {} session {}",
            session.rider_id, session.session_id
        );

        self.potholes.attach(&session);
        self.ride_events.attach(&session);
        self.potholes.start_fetch(&self.ctx, &session);
        self.ride_events.start_fetch(&self.ctx, &session);

        let mut failures = Vec::new();
        if let Err(e) = self.potholes.subscribe(&self.ctx, &session) {
            failures.push(e);
        }
        if let Err(e) = self.ride_events.subscribe(&self.ctx, &session) {
            failures.push(e);
        }
        match subscriber::subscribe_telemetry(
            self.ctx.backend.as_ref(),
            &self.ctx.tables,
            &session.rider_id,
            &session.session_id,
        ) {
            Ok(subscription) => self.telemetry = Some(subscription),
            Err(e) => failures.push(e),
        }
        for e in failures {
            warn!("{e}, showing last snapshot");
            self.notices.push_back(Notice::error(&e));
        }

        self.state = SessionState::Ready(session);
    }

    /// Applies finished background work and pending notifications. Returns
    /// how many background results were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.receiver.try_recv() {
            self.handle(result);
            handled += 1;
        }
        self.drain_feeds();
        handled
    }

    /// Like [`Self::pump`], but first waits up to `timeout` for a result.
    pub fn pump_blocking(&mut self, timeout: Duration) -> usize {
        let mut handled = 0;
        if let Ok(result) = self.receiver.recv_timeout(timeout) {
            self.handle(result);
            handled += 1;
        }
        handled + self.pump()
    }

    fn handle(&mut self, result: WorkResult) {
        match result {
            WorkResult::Session { epoch, result } => {
                if epoch != self.ctx.epoch || self.state != SessionState::Resolving {
                    debug!("Ignoring outdated session resolution");
                    return;
                }
                match result {
                    Ok(Some(session_id)) => self.bind_session(session_id),
                    Ok(None) => {
                        let e = RidewatchError::SessionNotFound {
                            rider_id: self.rider_id.clone(),
                        };
                        warn!("{e}");
                        self.state = SessionState::NotFound;
                    }
                    Err(e) => {
                        error!("Could not resolve session for {}: {e}", self.rider_id);
                        self.state = SessionState::Failed(e.to_string());
                    }
                }
            }
            WorkResult::Potholes {
                epoch,
                generation,
                result,
            } => {
                if epoch != self.ctx.epoch {
                    debug!("Ignoring potholes snapshot from an unmounted view");
                    return;
                }
                let notice = self.potholes.apply_snapshot(generation, result);
                self.notices.extend(notice);
            }
            WorkResult::RideEvents {
                epoch,
                generation,
                result,
            } => {
                if epoch != self.ctx.epoch {
                    debug!("Ignoring ride events snapshot from an unmounted view");
                    return;
                }
                let notice = self.ride_events.apply_snapshot(generation, result);
                self.notices.extend(notice);
            }
            WorkResult::Stop { epoch, result } => {
                if epoch != self.ctx.epoch {
                    return;
                }
                if let Err(e) = self.commands.finish_stop(result, Instant::now()) {
                    self.notices.push_back(Notice::error(&e));
                } else if !self.commands.is_active() {
                    self.notices
                        .push_back(Notice::info(format!("Stop sent to {}", self.rider_label)));
                }
            }
        }
    }

    fn drain_feeds(&mut self) {
        let mut notices = Vec::new();
        self.potholes.drain(&mut notices);
        self.ride_events.drain(&mut notices);
        self.notices.extend(notices);

        let Some(session) = self.state.session() else {
            return;
        };
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let mut closed = false;
        for _ in 0..MAX_NOTIFICATIONS_PER_PUMP {
            match telemetry.try_next() {
                Some(ChangeEvent::Inserted(row)) => {
                    if let Some(sample) = subscriber::accept_sample(&row, &session.session_id) {
                        self.latest_sample = Some(sample);
                    }
                }
                Some(ChangeEvent::Error(reason)) => {
                    let e = RidewatchError::SubscriptionFailed {
                        channel: telemetry.channel().to_string(),
                        reason,
                    };
                    warn!("{e}");
                    self.notices.push_back(Notice::error(&e));
                }
                Some(ChangeEvent::Closed) => {
                    closed = true;
                    break;
                }
                None => break,
            }
        }
        if closed {
            warn!("Telemetry feed closed");
            self.telemetry = None;
        }
    }

    pub fn set_sort_order(&mut self, kind: EventKind, order: SortOrder) {
        let changed = match kind {
            EventKind::Potholes => self.potholes.set_order(order),
            EventKind::RideEvents => self.ride_events.set_order(order),
        };
        // a limited snapshot holds a different window of rows per direction
        if !changed || self.ctx.snapshot_limit.is_none() {
            return;
        }
        if let SessionState::Ready(session) = &self.state {
            match kind {
                EventKind::Potholes => self.potholes.start_fetch(&self.ctx, session),
                EventKind::RideEvents => self.ride_events.start_fetch(&self.ctx, session),
            }
        }
    }

    pub fn toggle_sort(&mut self, kind: EventKind) {
        let order = match kind {
            EventKind::Potholes => self.potholes.order(),
            EventKind::RideEvents => self.ride_events.order(),
        };
        self.set_sort_order(kind, order.toggled());
    }

    /// Sends the stop command in the background. Refused once the view is
    /// closed, while a stop is in flight or after it went through.
    pub fn stop(&mut self) -> Result<(), RidewatchError> {
        if !self.mounted {
            return Err(RidewatchError::ViewClosed {
                rider_id: self.rider_id.clone(),
            });
        }
        let record = self.commands.begin_stop()?;
        info!("Sending stop to rider {}", self.rider_id);

        let epoch = self.ctx.epoch;
        let backend = self.ctx.backend.clone();
        let sender = self.ctx.sender.clone();
        let table = self.ctx.tables.commands.clone();
        thread::spawn(move || {
            let result = record
                .to_row()
                .and_then(|row| backend.insert(&table, row));
            let _ = sender.send(WorkResult::Stop { epoch, result });
        });
        Ok(())
    }

    /// Closes every feed and makes all pending results ignorable.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        self.ctx.epoch += 1;

        let backend = self.ctx.backend.clone();
        self.potholes.detach(backend.as_ref());
        self.ride_events.detach(backend.as_ref());
        if let Some(telemetry) = self.telemetry.take() {
            let channel = telemetry.channel().to_string();
            drop(telemetry);
            backend.unsubscribe(&channel);
        }
        info!("Unmounted live view for rider {}", self.rider_id);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn rider_id(&self) -> &str {
        &self.rider_id
    }

    pub fn rider_label(&self) -> &str {
        &self.rider_label
    }

    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn potholes(&self) -> &EventFeed<PotholeEvent> {
        &self.potholes
    }

    pub fn ride_events(&self) -> &EventFeed<RideEvent> {
        &self.ride_events
    }

    pub fn latest_sample(&self) -> Option<&TelemetrySample> {
        self.latest_sample.as_ref()
    }

    pub fn command_state(&self) -> CommandState {
        self.commands.state()
    }

    pub fn is_active(&self) -> bool {
        self.commands.is_active()
    }

    pub fn can_stop(&self) -> bool {
        self.mounted && self.commands.can_stop()
    }

    pub fn should_navigate_away(&self, now: Instant) -> bool {
        self.commands.should_navigate(now)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailurePoint, MemoryBackend};
    use crate::records::Row;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    fn pothole_row(id: &str, at: &str, session: &str) -> Row {
        json!({"id": id, "detected_at": at, "rider_id": "R1", "session_id": session})
    }

    fn backend_with_upload() -> (Arc<MemoryBackend>, TableNames) {
        let backend = Arc::new(MemoryBackend::new());
        let tables = TableNames::default();
        backend.seed(
            &tables.uploads,
            vec![json!({"rider_id": "R1", "session_id": "F1", "uploaded_at": "2024-03-01T09:00:00Z"})],
        );
        (backend, tables)
    }

    fn wait_until(live: &mut LiveSession, what: &str, done: impl Fn(&LiveSession) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !done(live) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            live.pump_blocking(Duration::from_millis(20));
        }
    }

    fn loaded(live: &LiveSession) -> bool {
        matches!(live.session_state(), SessionState::Ready(_))
            && !live.potholes().is_loading()
            && !live.ride_events().is_loading()
    }

    fn pothole_ids(live: &LiveSession) -> Vec<String> {
        live.potholes().items().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn test_resolve_fetch_and_stream() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![
                pothole_row("t1", "2024-03-01T10:00:00Z", "F1"),
                pothole_row("t2", "2024-03-01T10:01:00Z", "F1"),
            ],
        );

        let mut live = LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", None, None);
        assert_eq!(live.session_state(), &SessionState::Resolving);
        wait_until(&mut live, "initial load", loaded);
        assert_eq!(pothole_ids(&live), vec!["t2", "t1"]);

        let t3 = pothole_row("t3", "2024-03-01T10:02:00Z", "F1");
        backend.insert(&tables.potholes, t3.clone()).unwrap();
        live.pump();
        assert_eq!(pothole_ids(&live), vec!["t3", "t2", "t1"]);

        backend.replay(&tables.potholes, t3);
        live.pump();
        assert_eq!(pothole_ids(&live), vec!["t3", "t2", "t1"]);
        assert!(live.take_notices().iter().any(|n| n.level == NoticeLevel::Info));
    }

    #[test]
    fn test_foreign_session_events_are_dropped() {
        let (backend, tables) = backend_with_upload();
        let mut live = LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", None, None);
        wait_until(&mut live, "initial load", loaded);

        backend
            .insert(
                &tables.potholes,
                pothole_row("old", "2024-03-01T10:00:00Z", "F0"),
            )
            .unwrap();
        live.pump();
        assert!(live.potholes().is_empty());
    }

    #[test]
    fn test_no_uploads_means_no_session() {
        let backend = Arc::new(MemoryBackend::new());
        let mut live = LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", None, None);
        wait_until(&mut live, "resolution", |l| {
            l.session_state() != &SessionState::Resolving
        });

        assert_eq!(live.session_state(), &SessionState::NotFound);
        // nothing keyed on a session may run
        assert_eq!(backend.query_count(), 1);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn test_resolution_failure_leaves_session_unresolved() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail(FailurePoint::Query(TableNames::default().uploads));
        let mut live = LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", None, None);
        wait_until(&mut live, "resolution", |l| {
            l.session_state() != &SessionState::Resolving
        });

        assert!(matches!(live.session_state(), SessionState::Failed(_)));
        assert!(live.session_state().session().is_none());
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![
                pothole_row("a", "2024-03-01T10:00:00Z", "F1"),
                pothole_row("b", "2024-03-01T10:01:00Z", "F1"),
            ],
        );
        let config = AppConfig {
            snapshot_limit: Some(10),
            ..Default::default()
        };
        let mut live = LiveSession::mount(backend.clone(), &config, "R1", Some("F1"), None);
        wait_until(&mut live, "initial load", loaded);
        let first_generation = live.potholes.generation;

        live.toggle_sort(EventKind::Potholes);
        assert!(live.potholes().is_loading());
        wait_until(&mut live, "refetch", loaded);
        assert_eq!(pothole_ids(&live), vec!["a", "b"]);

        // the slow answer to the first fetch arrives last
        let epoch = live.ctx.epoch;
        let late =
            PotholeEvent::from_row(&pothole_row("zzz", "2024-03-01T11:00:00Z", "F1")).unwrap();
        live.handle(WorkResult::Potholes {
            epoch,
            generation: first_generation,
            result: Ok(vec![late]),
        });
        assert_eq!(pothole_ids(&live), vec!["a", "b"]);
        assert_eq!(live.potholes().order(), SortOrder::Oldest);
    }

    #[test]
    fn test_unlimited_sort_change_does_not_refetch() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![
                pothole_row("a", "2024-03-01T10:00:00Z", "F1"),
                pothole_row("b", "2024-03-01T10:01:00Z", "F1"),
            ],
        );
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        wait_until(&mut live, "initial load", loaded);
        let queries = backend.query_count();

        live.toggle_sort(EventKind::Potholes);
        assert!(!live.potholes().is_loading());
        assert_eq!(pothole_ids(&live), vec!["a", "b"]);
        assert_eq!(backend.query_count(), queries);
    }

    #[test]
    fn test_fetch_failure_keeps_previous_list() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![pothole_row("a", "2024-03-01T10:00:00Z", "F1")],
        );
        let config = AppConfig {
            snapshot_limit: Some(10),
            ..Default::default()
        };
        let mut live = LiveSession::mount(backend.clone(), &config, "R1", Some("F1"), None);
        wait_until(&mut live, "initial load", loaded);

        backend.fail(FailurePoint::Query(tables.potholes.clone()));
        live.toggle_sort(EventKind::Potholes);
        wait_until(&mut live, "failed refetch", loaded);

        assert_eq!(pothole_ids(&live), vec!["a"]);
        assert!(live.potholes().notice().is_some());
        assert!(
            live.take_notices()
                .iter()
                .any(|n| n.level == NoticeLevel::Error)
        );
    }

    #[test]
    fn test_subscription_failure_leaves_stale_snapshot() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![pothole_row("a", "2024-03-01T10:00:00Z", "F1")],
        );
        backend.fail(FailurePoint::Subscribe(tables.potholes.clone()));

        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        wait_until(&mut live, "initial load", loaded);

        assert!(!live.potholes().is_live());
        assert!(live.ride_events().is_live());
        assert_eq!(pothole_ids(&live), vec!["a"]);
        assert!(
            live.take_notices()
                .iter()
                .any(|n| n.text.contains("potholes:R1:F1"))
        );
    }

    #[test]
    fn test_events_streamed_during_fetch_survive() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![pothole_row("a", "2024-03-01T10:00:00Z", "F1")],
        );
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        backend
            .insert(
                &tables.potholes,
                pothole_row("b", "2024-03-01T10:05:00Z", "F1"),
            )
            .unwrap();
        live.pump();
        wait_until(&mut live, "initial load", loaded);

        assert_eq!(pothole_ids(&live), vec!["b", "a"]);
    }

    #[test]
    fn test_unmount_closes_feeds_and_ignores_results() {
        let (backend, tables) = backend_with_upload();
        backend.seed(
            &tables.potholes,
            vec![pothole_row("a", "2024-03-01T10:00:00Z", "F1")],
        );
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        assert_eq!(backend.subscriber_count(), 3);

        live.unmount();
        assert_eq!(backend.subscriber_count(), 0);
        assert!(!live.can_stop());

        // both fetch threads still report back, after the unmount
        live.pump_blocking(Duration::from_millis(200));
        live.pump_blocking(Duration::from_millis(200));
        assert!(live.potholes().is_empty());
        assert!(!live.potholes().is_loading());
    }

    #[test]
    fn test_resolution_after_unmount_is_ignored() {
        let (backend, _) = backend_with_upload();
        let mut live = LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", None, None);
        live.unmount();

        // the lookup thread still answers
        let deadline = Instant::now() + WAIT;
        while live.pump_blocking(Duration::from_millis(20)) == 0 {
            assert!(Instant::now() < deadline, "timed out waiting for the lookup");
        }
        assert_eq!(live.session_state(), &SessionState::Resolving);
        assert_eq!(backend.query_count(), 1);
        assert_eq!(backend.subscriber_count(), 0);
        assert!(live.potholes().is_empty());
    }

    #[test]
    fn test_stop_refused_after_unmount() {
        let (backend, tables) = backend_with_upload();
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        live.unmount();

        assert!(matches!(
            live.stop(),
            Err(RidewatchError::ViewClosed { rider_id }) if rider_id == "R1"
        ));
        assert_eq!(live.command_state(), CommandState::Active);
        live.pump_blocking(Duration::from_millis(100));
        assert!(backend.rows(&tables.commands).is_empty());
    }

    #[test]
    fn test_drop_unmounts() {
        let (backend, _) = backend_with_upload();
        let live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        assert_eq!(backend.subscriber_count(), 3);
        drop(live);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn test_latest_telemetry_sample_kept() {
        let (backend, tables) = backend_with_upload();
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);
        assert!(live.latest_sample().is_none());

        backend
            .insert(&tables.telemetry, json!({"rider_id": "R1", "ax": 1.0, "speed": 5}))
            .unwrap();
        backend
            .insert(&tables.telemetry, json!({"rider_id": "R1", "ax": 2.0, "speed": 6}))
            .unwrap();
        backend
            .insert(&tables.telemetry, json!({"rider_id": "R2", "ax": 9.0}))
            .unwrap();
        live.pump();

        let sample = live.latest_sample().unwrap();
        assert_eq!(sample.ax, 2.0);
        assert_eq!(sample.speed_raw, 6.0);
    }

    #[test]
    fn test_stop_is_sent_once() {
        let (backend, tables) = backend_with_upload();
        let config = AppConfig {
            stop_redirect_delay_ms: 0,
            ..Default::default()
        };
        let mut live = LiveSession::mount(backend.clone(), &config, "R1", Some("F1"), None);
        assert!(live.can_stop());

        live.stop().unwrap();
        assert_eq!(live.command_state(), CommandState::Stopping);
        assert!(live.stop().is_err());

        wait_until(&mut live, "stop", |l| !l.is_active());
        assert!(live.stop().is_err());
        assert!(live.should_navigate_away(Instant::now()));
        assert_eq!(backend.rows(&tables.commands).len(), 1);
    }

    #[test]
    fn test_failed_stop_keeps_active() {
        let (backend, tables) = backend_with_upload();
        backend.fail(FailurePoint::Insert(tables.commands.clone()));
        let mut live =
            LiveSession::mount(backend.clone(), &AppConfig::default(), "R1", Some("F1"), None);

        live.stop().unwrap();
        wait_until(&mut live, "stop failure", |l| {
            l.command_state() == CommandState::Active
        });
        assert!(live.is_active());
        assert!(live.can_stop());
        assert!(
            live.take_notices()
                .iter()
                .any(|n| n.level == NoticeLevel::Error)
        );
    }
}
