//! The sync engine: one instance owns the open thread, the view cache, the
//! thread list and the realtime channel.
//!
//! All state lives behind one `std::sync::Mutex` that is never held across an
//! await. Every fetch captures the selection token it was started under and
//! re-checks it before applying, so switching threads never cancels requests;
//! it makes their results inert.

use std::{
    future::Future,
    mem, slice,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{
    StreamExt,
    future::{BoxFuture, FutureExt, Shared},
};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    channel::{EventBus, EventStream},
    config::SyncConfig,
    debounce::Debouncer,
    error::{ChatError, ChatErrorCategory},
    normalization::{SendOutcome, normalize_error, normalize_send_outcome},
    outbox::{new_request_id, now_ms, pending_message, validate_content},
    pagination::{AlwaysScrollable, LoadFlags, PageCursor, SERVER_LIMIT_CAP, ViewportProbe, bounded_limit},
    realtime::{RealtimeStateMachine, RefreshPlan, route_push, should_poll},
    store::MessageStore,
    thread_list::ThreadList,
    transport::{ChatTransport, with_deadline},
    types::{
        LoadOutcome, Message, MessageQuery, PushEvent, RealtimeState, SelectOutcome, SyncEvent,
        Thread, ThreadId, UserId,
    },
    view_cache::{ThreadViewCache, ThreadViewSnapshot},
};

type LatestFuture = Shared<BoxFuture<'static, Result<LoadOutcome, ChatError>>>;

struct InFlightLatest {
    token: u64,
    id: u64,
    future: LatestFuture,
}

#[derive(Default)]
struct LatestSlot {
    next_id: u64,
    in_flight: Option<InFlightLatest>,
}

/// A send whose pending row is already shown.
#[derive(Debug)]
pub(crate) struct OutgoingMessage {
    thread_id: ThreadId,
    content: String,
    request_id: String,
}

struct RunningTasks {
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct EngineState {
    selected: Option<ThreadId>,
    /// Bumped on every selection and on dispose.
    switch_token: u64,
    store: MessageStore,
    cursor: PageCursor,
    /// The open thread received a window (initial, restored, or refreshed).
    loaded: bool,
    loads: LoadFlags,
    distance_to_bottom: f64,
    cache: ThreadViewCache,
    threads: ThreadList,
    list_generation: u64,
    realtime: RealtimeStateMachine,
    visible: bool,
    pending_plan: RefreshPlan,
    disposed: bool,
}

impl EngineState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            selected: None,
            switch_token: 0,
            store: MessageStore::new(),
            cursor: PageCursor::default(),
            loaded: false,
            loads: LoadFlags::default(),
            distance_to_bottom: 0.0,
            cache: ThreadViewCache::new(config.view_cache_limit),
            threads: ThreadList::default(),
            list_generation: 0,
            realtime: RealtimeStateMachine::default(),
            visible: true,
            pending_plan: RefreshPlan::NONE,
            disposed: false,
        }
    }

    fn is_current(&self, token: u64) -> bool {
        !self.disposed && self.switch_token == token
    }

    fn stash_open_view(&mut self, saved_at: i64) {
        let Some(thread_id) = self.selected else {
            return;
        };
        if !self.loaded {
            return;
        }
        let snapshot =
            ThreadViewSnapshot::capture(&self.store, self.cursor, self.distance_to_bottom, saved_at);
        self.cache.save(thread_id, snapshot);
    }

    /// Apply `edit` to the open view of `thread_id`, or to its cached snapshot.
    ///
    /// Returns the rendered list only when the thread is open.
    fn edit_view<F>(&mut self, thread_id: ThreadId, edit: F) -> Option<Vec<Message>>
    where
        F: FnOnce(&mut MessageStore),
    {
        if self.selected == Some(thread_id) {
            edit(&mut self.store);
            return Some(self.store.rendered());
        }
        let updated = self.cache.update(thread_id, |snapshot| {
            let mut store = snapshot.to_store();
            edit(&mut store);
            snapshot.message_items = Arc::clone(store.confirmed());
            snapshot.pending_messages = store.pending().to_vec();
        });
        if !updated {
            trace!(thread_id, "no view to update for thread");
        }
        None
    }
}

struct Inner<T> {
    transport: T,
    config: SyncConfig,
    events: EventBus,
    viewport: Arc<dyn ViewportProbe>,
    state: Mutex<EngineState>,
    latest: Mutex<LatestSlot>,
    debouncer: Debouncer,
    tasks: Mutex<Option<RunningTasks>>,
}

/// Chat synchronization engine over a [`ChatTransport`].
///
/// Cloning is cheap and every clone drives the same state. Separate
/// instances share nothing.
pub struct SyncEngine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ChatTransport> SyncEngine<T> {
    /// Engine for a headless client; never auto-backfills.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self::with_viewport(transport, config, AlwaysScrollable)
    }

    pub fn with_viewport(
        transport: T,
        config: SyncConfig,
        viewport: impl ViewportProbe + 'static,
    ) -> Self {
        let state = EngineState::new(&config);
        Self {
            inner: Arc::new(Inner {
                transport,
                events: EventBus::new(config.event_buffer),
                viewport: Arc::new(viewport),
                state: Mutex::new(state),
                latest: Mutex::new(LatestSlot::default()),
                debouncer: Debouncer::new(config.push_debounce),
                tasks: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub fn selected_thread(&self) -> Option<ThreadId> {
        self.lock_state().selected
    }

    /// Rendered list of the open thread: confirmed and pending, sorted.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().store.rendered()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.lock_state().threads.threads().to_vec()
    }

    pub fn page_cursor(&self) -> PageCursor {
        self.lock_state().cursor
    }

    pub fn realtime_state(&self) -> RealtimeState {
        self.lock_state().realtime.state()
    }

    pub fn is_visible(&self) -> bool {
        self.lock_state().visible
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    /// Cached thread views, least recently used first.
    pub fn cached_thread_ids(&self) -> Vec<ThreadId> {
        self.lock_state().cache.thread_ids_lru_first()
    }

    /// Open a thread, restoring its cached view when one exists.
    pub async fn select_thread(&self, thread_id: ThreadId) -> Result<SelectOutcome, ChatError> {
        if self.switch_to(thread_id)? {
            return Ok(SelectOutcome::Restored);
        }
        self.load_initial(thread_id).await.map(SelectOutcome::Loaded)
    }

    /// Make `thread_id` the open thread without waiting on the network.
    ///
    /// Returns `true` when a cached view was restored; its refresh runs in the
    /// background. Otherwise the caller still owes a [`Self::load_initial`].
    pub(crate) fn switch_to(&self, thread_id: ThreadId) -> Result<bool, ChatError> {
        let restored = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(ChatError::disposed());
            }
            state.stash_open_view(now_ms());
            state.switch_token += 1;
            state.selected = Some(thread_id);
            match state.cache.restore(thread_id) {
                Some(snapshot) => {
                    state.store = snapshot.to_store();
                    state.cursor = snapshot.cursor();
                    state.distance_to_bottom = snapshot.distance_to_bottom;
                    state.loaded = true;
                    Some(state.store.rendered())
                }
                None => {
                    state.store.clear();
                    state.cursor = PageCursor::default();
                    state.distance_to_bottom = 0.0;
                    state.loaded = false;
                    None
                }
            }
        };
        debug!(thread_id, restored = restored.is_some(), "thread selected");

        let Some(messages) = restored else {
            return Ok(false);
        };

        self.emit_messages(thread_id, messages);
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.refresh_latest().await {
                engine.report_error(&err);
            }
            if let Err(err) = engine.backfill_if_no_scrollbar().await {
                engine.report_error(&err);
            }
        });
        Ok(true)
    }

    /// Fetch the newest window of the open thread and mark it read.
    ///
    /// Skipped when `thread_id` is not the open thread or an initial load for
    /// this selection is already in flight.
    pub async fn load_initial(&self, thread_id: ThreadId) -> Result<LoadOutcome, ChatError> {
        let token = {
            let mut state = self.lock_state();
            if state.disposed || state.selected != Some(thread_id) {
                return Ok(LoadOutcome::Skipped);
            }
            let token = state.switch_token;
            if !state.loads.try_begin_initial(token) {
                return Ok(LoadOutcome::Skipped);
            }
            token
        };

        let config = &self.inner.config;
        let query = MessageQuery::newest(bounded_limit(config.initial_limit, SERVER_LIMIT_CAP), true);
        let result = self
            .call(
                config.message_timeout,
                "load_initial",
                self.inner.transport.fetch_messages(thread_id, query),
            )
            .await;

        let (messages, received) = {
            let mut state = self.lock_state();
            state.loads.finish_initial(token);
            if !state.is_current(token) {
                debug!(thread_id, token, "dropping stale initial window");
                return Ok(LoadOutcome::Stale);
            }
            let page = result?;
            state.store.merge_confirmed(&page.messages);
            state.store.reconcile(config.reconcile_window_ms);
            state.cursor = PageCursor::from_initial(&page, state.store.oldest_confirmed_id());
            state.loaded = true;
            (state.store.rendered(), page.messages.len())
        };
        debug!(thread_id, received, "initial window applied");

        self.emit_messages(thread_id, messages);
        self.emit(SyncEvent::MessagesViewed { thread_id });

        if let Err(err) = self.backfill_if_no_scrollbar().await {
            self.report_error(&err);
        }
        Ok(LoadOutcome::Applied { received })
    }

    /// Fetch one page strictly older than the oldest loaded message.
    pub async fn load_older(&self) -> Result<LoadOutcome, ChatError> {
        let (thread_id, token, query) = {
            let mut state = self.lock_state();
            let Some(thread_id) = state.selected else {
                return Ok(LoadOutcome::Skipped);
            };
            if state.disposed {
                return Ok(LoadOutcome::Skipped);
            }
            let limit = bounded_limit(self.inner.config.older_limit, SERVER_LIMIT_CAP);
            let Some(query) = state.cursor.older_query(limit) else {
                return Ok(LoadOutcome::Skipped);
            };
            let token = state.switch_token;
            if !state.loads.try_begin_older(token) {
                trace!(thread_id, "older load already in flight");
                return Ok(LoadOutcome::Skipped);
            }
            (thread_id, token, query)
        };

        let result = self
            .call(
                self.inner.config.message_timeout,
                "load_older",
                self.inner.transport.fetch_messages(thread_id, query),
            )
            .await;

        let (messages, received) = {
            let mut state = self.lock_state();
            state.loads.finish_older(token);
            if !state.is_current(token) {
                debug!(thread_id, token, "dropping stale older page");
                return Ok(LoadOutcome::Stale);
            }
            let page = result?;
            state.store.merge_confirmed(&page.messages);
            state.store.reconcile(self.inner.config.reconcile_window_ms);
            let oldest = state.store.oldest_confirmed_id();
            state.cursor.advance_older(&page, oldest);
            (state.store.rendered(), page.messages.len())
        };
        debug!(thread_id, received, before_id = ?query.before_id, "older page applied");

        self.emit_messages(thread_id, messages);
        Ok(LoadOutcome::Applied { received })
    }

    /// Load older pages while the list does not overflow the viewport.
    ///
    /// Returns the number of pages loaded, at most `max_backfill_rounds`.
    pub async fn backfill_if_no_scrollbar(&self) -> Result<u32, ChatError> {
        let token = self.lock_state().switch_token;
        let mut rounds = 0;
        while rounds < self.inner.config.max_backfill_rounds {
            let rendered = {
                let state = self.lock_state();
                if !state.is_current(token) || !state.cursor.has_older {
                    break;
                }
                state.store.rendered()
            };
            if self.inner.viewport.has_scrollable_overflow(&rendered) {
                break;
            }
            match self.load_older().await? {
                LoadOutcome::Applied { .. } => rounds += 1,
                LoadOutcome::Skipped | LoadOutcome::Stale => break,
            }
        }
        if rounds > 0 {
            debug!(rounds, "backfilled older history");
        }
        Ok(rounds)
    }

    /// Merge the newest window of the open thread.
    ///
    /// Concurrent callers under the same selection share one request. The
    /// thread is marked read only while visible and pinned near the bottom.
    pub async fn refresh_latest(&self) -> Result<LoadOutcome, ChatError> {
        let (thread_id, token, mark_read) = {
            let state = self.lock_state();
            let Some(thread_id) = state.selected else {
                return Ok(LoadOutcome::Skipped);
            };
            if state.disposed {
                return Ok(LoadOutcome::Skipped);
            }
            let mark_read =
                state.visible && state.distance_to_bottom < self.inner.config.near_bottom_px;
            (thread_id, state.switch_token, mark_read)
        };

        let (id, future) = self.join_latest(thread_id, token, mark_read);
        let result = future.await;
        self.release_latest(id);
        result
    }

    fn join_latest(&self, thread_id: ThreadId, token: u64, mark_read: bool) -> (u64, LatestFuture) {
        let mut slot = self.inner.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = &slot.in_flight
            && in_flight.token == token
        {
            trace!(thread_id, token, "joining in-flight latest refresh");
            return (in_flight.id, in_flight.future.clone());
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let engine = self.clone();
        let future = async move { engine.fetch_latest(thread_id, token, mark_read).await }
            .boxed()
            .shared();
        slot.in_flight = Some(InFlightLatest {
            token,
            id,
            future: future.clone(),
        });
        (id, future)
    }

    fn release_latest(&self, id: u64) {
        let mut slot = self.inner.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.in_flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            slot.in_flight = None;
        }
    }

    async fn fetch_latest(
        &self,
        thread_id: ThreadId,
        token: u64,
        mark_read: bool,
    ) -> Result<LoadOutcome, ChatError> {
        let config = &self.inner.config;
        let query = MessageQuery::newest(bounded_limit(config.latest_limit, SERVER_LIMIT_CAP), mark_read);
        let result = self
            .call(
                config.message_timeout,
                "refresh_latest",
                self.inner.transport.fetch_messages(thread_id, query),
            )
            .await;

        let (changed, received) = {
            let mut state = self.lock_state();
            if !state.is_current(token) {
                debug!(thread_id, token, "dropping stale latest window");
                return Ok(LoadOutcome::Stale);
            }
            let page = result?;
            let added = state.store.merge_confirmed(&page.messages);
            let collapsed = state.store.reconcile(config.reconcile_window_ms);
            let oldest = state.store.oldest_confirmed_id();
            if state.loaded {
                state.cursor.seed_if_empty(oldest);
            } else {
                state.cursor = PageCursor::from_initial(&page, oldest);
                state.loaded = true;
            }
            let changed = (added > 0 || collapsed > 0).then(|| state.store.rendered());
            (changed, page.messages.len())
        };
        trace!(thread_id, received, changed = changed.is_some(), "latest window merged");

        if let Some(messages) = changed {
            self.emit_messages(thread_id, messages);
        }
        if mark_read {
            self.emit(SyncEvent::MessagesViewed { thread_id });
        }
        Ok(LoadOutcome::Applied { received })
    }

    /// Send a message optimistically.
    ///
    /// The pending row is shown at once and replaced by the confirmed row on
    /// success; on failure it is removed and the error is returned. If the
    /// user switched away meanwhile, the outcome lands in the cached view.
    pub async fn send(&self, thread_id: ThreadId, content: &str) -> Result<Message, ChatError> {
        let outgoing = self.queue_send(thread_id, content)?;
        self.deliver(outgoing).await
    }

    /// Validate `content` and show it as a pending row in `thread_id`.
    pub(crate) fn queue_send(
        &self,
        thread_id: ThreadId,
        content: &str,
    ) -> Result<OutgoingMessage, ChatError> {
        let config = &self.inner.config;
        let content = validate_content(content, config.max_message_chars)?;
        let request_id = new_request_id();
        let pending = pending_message(
            thread_id,
            config.self_user_id,
            content.clone(),
            now_ms(),
            request_id.clone(),
        );

        let rendered = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(ChatError::disposed());
            }
            state.edit_view(thread_id, |store| store.push_pending(pending))
        };
        if let Some(messages) = rendered {
            self.emit_messages(thread_id, messages);
        }
        debug!(thread_id, request_id = %request_id, "sending message");

        Ok(OutgoingMessage {
            thread_id,
            content,
            request_id,
        })
    }

    /// POST a queued message and settle its pending row.
    pub(crate) async fn deliver(&self, outgoing: OutgoingMessage) -> Result<Message, ChatError> {
        let OutgoingMessage {
            thread_id,
            content,
            request_id,
        } = outgoing;
        let config = &self.inner.config;
        let result = self
            .call(
                config.message_timeout,
                "send_message",
                self.inner
                    .transport
                    .send_message(thread_id, &content, &request_id),
            )
            .await;

        let window = config.reconcile_window_ms;
        match result {
            Ok(mut confirmed) => {
                confirmed.pending = false;
                if confirmed.local_request_id.is_empty() {
                    confirmed.local_request_id = request_id.clone();
                }
                let rendered = self.lock_state().edit_view(thread_id, |store| {
                    store.remove_pending(&request_id);
                    store.merge_confirmed(slice::from_ref(&confirmed));
                    store.reconcile(window);
                });
                if let Some(messages) = rendered {
                    self.emit_messages(thread_id, messages);
                }
                debug!(thread_id, message_id = confirmed.id, "message confirmed");
                self.emit(normalize_send_outcome(
                    request_id,
                    thread_id,
                    SendOutcome::Confirmed {
                        message: confirmed.clone(),
                    },
                ));
                self.schedule_refresh(RefreshPlan::THREAD_LIST);
                Ok(confirmed)
            }
            Err(error) => {
                let rendered = self.lock_state().edit_view(thread_id, |store| {
                    store.remove_pending(&request_id);
                });
                if let Some(messages) = rendered {
                    self.emit_messages(thread_id, messages);
                }
                self.emit(normalize_send_outcome(
                    request_id,
                    thread_id,
                    SendOutcome::Failed {
                        error: error.clone(),
                    },
                ));
                Err(error)
            }
        }
    }

    /// Replace the conversation list, unless a newer refresh already started.
    ///
    /// Views of threads missing from the response are dropped from the cache.
    pub async fn refresh_thread_list(&self) -> Result<LoadOutcome, ChatError> {
        let generation = {
            let mut state = self.lock_state();
            if state.disposed {
                return Ok(LoadOutcome::Skipped);
            }
            state.list_generation += 1;
            state.list_generation
        };

        let result = self
            .call(
                self.inner.config.thread_list_timeout,
                "list_threads",
                self.inner.transport.list_threads(),
            )
            .await;

        let (threads, received) = {
            let mut state = self.lock_state();
            if state.disposed || state.list_generation != generation {
                debug!(generation, "dropping superseded thread list");
                return Ok(LoadOutcome::Stale);
            }
            let threads = result?;
            let received = threads.len();
            state.threads.replace(threads);
            let live = state.threads.ids();
            state.cache.retain_threads(&live);
            (state.threads.threads().to_vec(), received)
        };

        self.emit(SyncEvent::ThreadListUpdated { threads });
        Ok(LoadOutcome::Applied { received })
    }

    /// Create (or reuse) the thread with `target_user_id` and refresh the list.
    pub async fn create_thread(&self, target_user_id: UserId) -> Result<ThreadId, ChatError> {
        if self.is_disposed() {
            return Err(ChatError::disposed());
        }
        let thread_id = self
            .call(
                self.inner.config.thread_list_timeout,
                "create_thread",
                self.inner.transport.create_thread(target_user_id),
            )
            .await?;
        info!(thread_id, target_user_id, "thread ready");

        if let Err(err) = self.refresh_thread_list().await {
            self.report_error(&err);
        }
        Ok(thread_id)
    }

    /// Create or reuse the thread with `target_user_id` and open it.
    pub async fn open_conversation_with(
        &self,
        target_user_id: UserId,
    ) -> Result<(ThreadId, SelectOutcome), ChatError> {
        let known = self.lock_state().threads.thread_with_user(target_user_id);
        let thread_id = match known {
            Some(thread_id) => {
                debug!(thread_id, target_user_id, "reusing listed conversation");
                thread_id
            }
            None => self.create_thread(target_user_id).await?,
        };
        let outcome = self.select_thread(thread_id).await?;
        Ok((thread_id, outcome))
    }

    /// Route one push event into the coalesced refresh.
    pub fn handle_push(&self, event: PushEvent) {
        let plan = match &event {
            PushEvent::Heartbeat => {
                trace!("push heartbeat");
                return;
            }
            PushEvent::Ready => {
                self.transition_realtime(RealtimeStateMachine::on_ready);
                RefreshPlan::BOTH
            }
            PushEvent::Chat { thread_id } => {
                let open_thread = self.lock_state().selected;
                trace!(?thread_id, ?open_thread, "push chat event");
                route_push(&event, open_thread)
            }
        };
        self.schedule_refresh(plan);
    }

    /// OR `plan` into the pending refresh and (re)start the debounce timer.
    pub fn schedule_refresh(&self, plan: RefreshPlan) {
        if plan.is_empty() {
            return;
        }
        {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.pending_plan = state.pending_plan.merge(plan);
        }
        let engine = self.clone();
        self.inner
            .debouncer
            .call(move || async move { engine.run_refresh_plan().await });
    }

    async fn run_refresh_plan(&self) {
        let plan = mem::take(&mut self.lock_state().pending_plan);
        trace!(?plan, "running coalesced refresh");

        let list = async {
            if plan.thread_list
                && let Err(err) = self.refresh_thread_list().await
            {
                self.report_error(&err);
            }
        };
        let open = async {
            if plan.open_thread
                && let Err(err) = self.refresh_latest().await
            {
                self.report_error(&err);
            }
        };
        tokio::join!(list, open);
    }

    /// Tab visibility changed; becoming visible refreshes everything once.
    pub fn set_visibility(&self, visible: bool) {
        let became_visible = {
            let mut state = self.lock_state();
            let was_visible = mem::replace(&mut state.visible, visible);
            visible && !was_visible
        };
        debug!(visible, "visibility changed");
        if became_visible {
            self.schedule_refresh(RefreshPlan::BOTH);
        }
    }

    /// Record how far the reader is from the bottom of the open thread.
    pub fn record_scroll(&self, distance_to_bottom: f64) {
        self.lock_state().distance_to_bottom = distance_to_bottom.max(0.0);
    }

    /// Start the push channel, the fallback polls and a first list refresh.
    pub fn start(&self) -> Result<(), ChatError> {
        if self.is_disposed() {
            return Err(ChatError::disposed());
        }
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_some() {
            return Err(ChatError::new(
                ChatErrorCategory::Internal,
                "sync_already_running",
                "sync tasks are already running",
            ));
        }

        let stop = CancellationToken::new();
        let config = &self.inner.config;
        let push = self.clone();
        let list_poll = self.clone();
        let message_poll = self.clone();
        let initial = self.clone();
        let (list_period, message_period) = (config.thread_list_poll, config.message_poll);
        let handles = vec![
            spawn_until(&stop, async move { push.run_push().await }),
            spawn_until(&stop, async move {
                list_poll.run_poll(list_period, RefreshPlan::THREAD_LIST).await
            }),
            spawn_until(&stop, async move {
                message_poll
                    .run_poll(
                        message_period,
                        RefreshPlan {
                            thread_list: false,
                            open_thread: true,
                        },
                    )
                    .await
            }),
            spawn_until(&stop, async move {
                if let Err(err) = initial.refresh_thread_list().await {
                    initial.report_error(&err);
                }
            }),
        ];
        *tasks = Some(RunningTasks { stop, handles });
        info!("sync engine started");
        Ok(())
    }

    async fn run_push(&self) {
        let policy = self.inner.config.reconnect;
        let mut attempt: u32 = 0;
        loop {
            self.transition_realtime(RealtimeStateMachine::begin_connect);
            let failure = match self.inner.transport.open_push().await {
                Ok(mut stream) => {
                    self.transition_realtime(RealtimeStateMachine::on_open);
                    attempt = 0;
                    let mut failure = None;
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => self.handle_push(event),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    failure
                }
                Err(err) => Some(err),
            };
            self.transition_realtime(|machine| Ok(machine.on_disconnect()));

            if let Some(err) = &failure {
                self.note_failure("push_stream", err);
                if err.category == ChatErrorCategory::Auth {
                    warn!("push channel stopped until sign-in");
                    return;
                }
            }
            let delay = policy.delay_for_attempt(
                attempt,
                failure.as_ref().and_then(|err| err.retry_after_ms),
            );
            attempt = attempt.saturating_add(1);
            debug!(
                delay_ms = delay.as_millis() as u64,
                attempt, "reconnecting push channel"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_poll(&self, period: Duration, plan: RefreshPlan) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let due = {
                let state = self.lock_state();
                should_poll(state.visible, state.realtime.state())
                    && (plan.thread_list || state.selected.is_some())
            };
            if !due {
                continue;
            }
            trace!(?plan, "polling");
            if plan.thread_list
                && let Err(err) = self.refresh_thread_list().await
            {
                self.report_error(&err);
            }
            if plan.open_thread
                && let Err(err) = self.refresh_latest().await
            {
                self.report_error(&err);
            }
        }
    }

    /// Stop timers and the push channel. In-flight results become inert.
    pub fn dispose(&self) {
        let changed = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.switch_token += 1;
            state.pending_plan = RefreshPlan::NONE;
            state.realtime.on_disconnect()
        };

        self.inner.debouncer.cancel();
        let running = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.stop.cancel();
            for handle in running.handles {
                handle.abort();
            }
        }
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = None;

        if let Some(state) = changed {
            self.emit(SyncEvent::RealtimeChanged { state });
        }
        info!("sync engine disposed");
    }

    /// Surface a background failure to subscribers.
    pub fn report_error(&self, err: &ChatError) {
        debug!(code = %err.code, "reporting sync error");
        self.emit(normalize_error(err));
    }

    async fn call<R, F>(&self, limit: Duration, operation: &'static str, fut: F) -> Result<R, ChatError>
    where
        F: Future<Output = Result<R, ChatError>>,
    {
        let result = with_deadline(limit, operation, fut).await;
        if let Err(err) = &result {
            self.note_failure(operation, err);
        }
        result
    }

    fn note_failure(&self, operation: &str, err: &ChatError) {
        warn!(operation, code = %err.code, category = ?err.category, "chat request failed");
        if err.category == ChatErrorCategory::Auth {
            self.emit(SyncEvent::SignInRequired);
        }
    }

    fn transition_realtime<F>(&self, step: F)
    where
        F: FnOnce(&mut RealtimeStateMachine) -> Result<Option<RealtimeState>, ChatError>,
    {
        let changed = step(&mut self.lock_state().realtime);
        match changed {
            Ok(Some(state)) => {
                debug!(?state, "realtime state changed");
                self.emit(SyncEvent::RealtimeChanged { state });
            }
            Ok(None) => {}
            Err(err) => warn!(code = %err.code, "{}", err.message),
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.events.emit(event);
    }

    fn emit_messages(&self, thread_id: ThreadId, messages: Vec<Message>) {
        self.emit(SyncEvent::MessagesUpdated {
            thread_id,
            messages,
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_until<F>(stop: &CancellationToken, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stop = stop.child_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = fut => {}
        }
    })
}
