//! Session lifecycle event bus
//!
//! [`SessionEventBus`] listens to the process-wide events of an
//! [`AudioSession`] on a dedicated thread and forwards each one to a
//! [`SessionEventHandler`]. The handler is held weakly: the bus never keeps
//! its owner alive and the thread exits once the handler is gone.
//!
//! Handlers run on the bus thread. They are expected to hand the work off to
//! their control context and return quickly.

use std::sync::Weak;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{AudioError, AudioResult};
use crate::session::{AudioSession, InterruptionReason, RouteChangeReason, SessionEvent};

/// Receiver of session lifecycle events
pub trait SessionEventHandler: Send + Sync {
    /// `was_app_suspended` marks pseudo-interruptions caused by the
    /// application being suspended
    fn handle_interruption_began(&self, was_app_suspended: bool);

    fn handle_interruption_ended(&self, should_resume: bool);

    fn handle_route_change(&self, reason: RouteChangeReason);

    fn handle_media_services_reset(&self);

    fn handle_media_services_lost(&self);
}

/// Whether an interruption-began payload describes an app suspension
pub fn is_app_suspension(reason: Option<InterruptionReason>, was_suspended: bool) -> bool {
    reason == Some(InterruptionReason::AppWasSuspended) || was_suspended
}

/// Forward one event to `handler`
pub fn dispatch_event(handler: &dyn SessionEventHandler, event: SessionEvent) {
    match event {
        SessionEvent::InterruptionBegan { reason, was_suspended } => {
            handler.handle_interruption_began(is_app_suspension(reason, was_suspended))
        }
        SessionEvent::InterruptionEnded { options } => handler.handle_interruption_ended(options.should_resume),
        SessionEvent::RouteChanged { reason } => handler.handle_route_change(reason),
        SessionEvent::MediaServicesReset => handler.handle_media_services_reset(),
        SessionEvent::MediaServicesLost => handler.handle_media_services_lost(),
    }
}

struct Subscription {
    shutdown: Sender<()>,
    worker: JoinHandle<()>,
    worker_id: ThreadId,
}

/// Subscription to a session's lifecycle events
#[derive(Default)]
pub struct SessionEventBus {
    subscription: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventBus")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding `session` events to `handler`, replacing any
    /// previous subscription
    pub fn subscribe(&self, session: &dyn AudioSession, handler: Weak<dyn SessionEventHandler>) -> AudioResult<()> {
        self.unsubscribe();

        let events = session.subscribe_events();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let worker = std::thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || run_event_loop(events, shutdown_rx, handler))
            .map_err(|e| AudioError::platform(format!("failed to spawn event thread: {}", e)))?;

        debug!("Subscribed to session events");
        *self.subscription.lock() = Some(Subscription {
            shutdown: shutdown_tx,
            worker_id: worker.thread().id(),
            worker,
        });
        Ok(())
    }

    /// Stop forwarding events. Safe to call any number of times, with or
    /// without a prior subscription.
    pub fn unsubscribe(&self) {
        let Some(subscription) = self.subscription.lock().take() else {
            return;
        };
        drop(subscription.shutdown);

        if std::thread::current().id() == subscription.worker_id {
            // Called from a handler; the loop exits after it returns
            return;
        }
        if subscription.worker.join().is_err() {
            warn!("Session event thread panicked");
        }
        debug!("Unsubscribed from session events");
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

impl Drop for SessionEventBus {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn run_event_loop(events: Receiver<SessionEvent>, shutdown: Receiver<()>, handler: Weak<dyn SessionEventHandler>) {
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else {
                    debug!("Session event source closed");
                    break;
                };
                let Some(handler) = handler.upgrade() else {
                    debug!("Session event handler dropped");
                    break;
                };
                trace!("Session event: {:?}", event);
                dispatch_event(handler.as_ref(), event);
            }
            recv(shutdown) -> _ => break,
        }
    }
}
