//! The collaborator-facing event-callback system named in spec §6:
//! subscribers register for FRAME, REFILL, RESIZE, KEY, MOUSE, TIMER,
//! PRIVATE events in `Sync` or `Async` mode. Grounded directly on
//! `canvas_utils_old.h`'s `_event_produce`/`_event_consume`/`_event_thread`:
//! sync callbacks run immediately on the calling (main) thread; async
//! callbacks are queued onto a dedicated background thread that tracks a
//! running average callback duration and discards backlog via
//! `dvz_fifo_discard`'s "keep the newest N" policy once it can't keep up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};

/// The event families a collaborator (the visuals library, input glue,
/// etc.) may subscribe to. Distinct from `CanvasEvent`, which models the
/// *internal* per-frame scheduler queue (C11) rather than this
/// publish/subscribe surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserEventKind {
    Frame,
    Refill,
    Resize,
    Key,
    Mouse,
    Timer,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    Sync,
    Async,
}

/// Payload carried by a fired event. Kept as a small closed enum rather
/// than a void pointer, per the REDESIGN FLAGS note on tagged-variant
/// event payloads.
#[derive(Debug, Clone)]
pub enum UserEventPayload {
    Frame { frame_idx: u64 },
    Refill { img_idx: usize },
    Resize { width: u32, height: u32 },
    Key { code: u32, pressed: bool },
    Mouse { x: f64, y: f64, button: Option<u32> },
    Timer { id: u32 },
    Private { tag: u32, data: Vec<u8> },
}

impl UserEventPayload {
    fn kind(&self) -> UserEventKind {
        match self {
            UserEventPayload::Frame { .. } => UserEventKind::Frame,
            UserEventPayload::Refill { .. } => UserEventKind::Refill,
            UserEventPayload::Resize { .. } => UserEventKind::Resize,
            UserEventPayload::Key { .. } => UserEventKind::Key,
            UserEventPayload::Mouse { .. } => UserEventKind::Mouse,
            UserEventPayload::Timer { .. } => UserEventKind::Timer,
            UserEventPayload::Private { .. } => UserEventKind::Private,
        }
    }
}

type Callback = Box<dyn FnMut(&UserEventPayload) + Send>;

struct Registration {
    kind: UserEventKind,
    mode: CallbackMode,
    callback: Callback,
}

struct AsyncQueue {
    items: std::collections::VecDeque<UserEventPayload>,
    stop: bool,
}

/// Owns the registration table plus the async worker thread and its
/// overload-discard bookkeeping (`avg_event_time`/`events_to_keep` in the
/// original). Dropped (via `Canvas::drop`) by setting `stop` and joining.
pub struct EventDispatcher {
    registrations: Mutex<Vec<Registration>>,
    async_queue: Arc<(Mutex<AsyncQueue>, Condvar)>,
    worker: Option<std::thread::JoinHandle<()>>,
}

/// Event callbacks are never observed to run longer than this on average
/// before the discard policy starts trimming backlog, mirroring
/// `DVZ_MAX_EVENT_DURATION`.
const MAX_EVENT_DURATION: Duration = Duration::from_millis(50);
const MAX_FIFO_CAPACITY: usize = 1024;

impl EventDispatcher {
    pub fn new() -> Arc<Mutex<Self>> {
        let async_queue = Arc::new((
            Mutex::new(AsyncQueue {
                items: std::collections::VecDeque::new(),
                stop: false,
            }),
            Condvar::new(),
        ));

        let dispatcher = Arc::new(Mutex::new(EventDispatcher {
            registrations: Mutex::new(Vec::new()),
            async_queue: async_queue.clone(),
            worker: None,
        }));

        let worker_dispatcher = dispatcher.clone();
        let worker = std::thread::Builder::new()
            .name("vklite-canvas-events".into())
            .spawn(move || Self::async_loop(worker_dispatcher, async_queue))
            .expect("failed to spawn canvas event thread");
        dispatcher.lock().worker = Some(worker);
        dispatcher
    }

    pub fn register(&self, kind: UserEventKind, mode: CallbackMode, callback: Callback) {
        self.registrations.lock().push(Registration { kind, mode, callback });
    }

    /// Runs every registered `Sync` callback immediately, then enqueues
    /// the event for the async worker iff at least one `Async` callback
    /// is registered for this kind — matching `_event_produce`'s
    /// "only enqueue if someone's listening asynchronously".
    pub fn fire(&self, payload: UserEventPayload) {
        let kind = payload.kind();
        {
            let mut regs = self.registrations.lock();
            for reg in regs.iter_mut() {
                if reg.kind == kind && reg.mode == CallbackMode::Sync {
                    (reg.callback)(&payload);
                }
            }
        }
        let has_async = self
            .registrations
            .lock()
            .iter()
            .any(|r| r.kind == kind && r.mode == CallbackMode::Async);
        if has_async {
            let (lock, cond) = &*self.async_queue;
            let mut queue = lock.lock();
            queue.items.push_back(payload);
            cond.notify_all();
        }
    }

    fn async_loop(dispatcher: Arc<Mutex<EventDispatcher>>, async_queue: Arc<(Mutex<AsyncQueue>, Condvar)>) {
        let (lock, cond) = &*async_queue;
        let mut avg_event_time = Duration::ZERO;
        let mut counter: u32 = 0;

        loop {
            let item = {
                let mut queue = lock.lock();
                while queue.items.is_empty() && !queue.stop {
                    cond.wait(&mut queue);
                }
                if queue.stop && queue.items.is_empty() {
                    break;
                }
                queue.items.pop_front()
            };
            let Some(payload) = item else { break };
            let kind = payload.kind();

            let start = Instant::now();
            let mut n_callbacks = 0u32;
            {
                let mut guard = dispatcher.lock();
                let mut regs = guard.registrations.lock();
                for reg in regs.iter_mut() {
                    if reg.kind == kind && reg.mode == CallbackMode::Async {
                        (reg.callback)(&payload);
                        n_callbacks += 1;
                    }
                }
                drop(regs);
                let _ = &mut guard;
            }
            let mut elapsed = start.elapsed();
            if n_callbacks > 0 {
                elapsed /= n_callbacks;
            }

            avg_event_time = (avg_event_time * counter + elapsed) / (counter + 1);
            counter += 1;

            if avg_event_time > Duration::ZERO {
                let keep = (MAX_EVENT_DURATION.as_secs_f64() / avg_event_time.as_secs_f64())
                    .clamp(1.0, MAX_FIFO_CAPACITY as f64) as usize;
                if keep < MAX_FIFO_CAPACITY {
                    let mut queue = lock.lock();
                    let before = queue.items.len();
                    if before > keep {
                        trace!("event queue overloaded, discarding {} stale item(s)", before - keep);
                        let drop_count = before - keep;
                        for _ in 0..drop_count {
                            queue.items.pop_front();
                        }
                    }
                }
            }
        }
    }

    /// Signals the async worker to exit and joins it. Called from
    /// `Canvas::drop`.
    pub fn stop(&mut self) {
        {
            let (lock, cond) = &*self.async_queue;
            lock.lock().stop = true;
            cond.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn sync_callback_fires_immediately_on_matching_kind() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_cb = seen.clone();
        dispatcher.lock().register(
            UserEventKind::Key,
            CallbackMode::Sync,
            Box::new(move |_| {
                seen_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.lock().fire(UserEventPayload::Key { code: 65, pressed: true });
        dispatcher.lock().fire(UserEventPayload::Mouse { x: 0.0, y: 0.0, button: None });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        dispatcher.lock().stop();
    }

    #[test]
    fn unregistered_kind_is_a_no_op() {
        let dispatcher = EventDispatcher::new();
        dispatcher.lock().fire(UserEventPayload::Timer { id: 0 });
        dispatcher.lock().stop();
    }
}
