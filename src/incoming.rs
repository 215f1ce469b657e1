//! Ringing-invite lifecycle: show, accept, decline, auto-decline.
//!
//! At most one invite is outstanding. The orchestrator owns it together with
//! its auto-decline timer and drives call-state changes only through the
//! [`CallStateMachine`] operations.

use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::audio::best_effort;
use crate::{AudioRouter, CallEvent, CallId, CallStateMachine, EventDispatcher, PhoneEvent, Result};

/// Caller-supplied reaction to accepting or declining an invite. It usually
/// tells the engine to answer or reject.
pub type InviteCallback = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Optional details carried by an `incoming` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteExtras {
    pub call_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_avatar: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteInfo {
    pub id: u64,
    pub from: String,
    pub call_id: CallId,
    pub contact_name: Option<String>,
    pub contact_avatar: Option<String>,
    pub token: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InviteInfo {
    /// Name to show: contact name if known, otherwise the caller number.
    pub fn display_name(&self) -> &str {
        self.contact_name.as_deref().unwrap_or(&self.from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Shown(u64),
    /// Another invite or call is in progress; the new one was not shown.
    Busy,
}

struct ActiveInvite {
    info: InviteInfo,
    accept: InviteCallback,
    decline: InviteCallback,
    timeout: Option<JoinHandle<()>>,
}

pub struct IncomingCallOrchestrator {
    calls: Weak<CallStateMachine>,
    audio: Arc<dyn AudioRouter>,
    dispatcher: Arc<EventDispatcher>,
    auto_decline: Duration,
    invite: Mutex<Option<ActiveInvite>>,
    next_id: AtomicU64,
}

impl IncomingCallOrchestrator {
    pub(crate) fn new(
        calls: Weak<CallStateMachine>,
        audio: Arc<dyn AudioRouter>,
        dispatcher: Arc<EventDispatcher>,
        auto_decline: Duration,
    ) -> Self {
        IncomingCallOrchestrator {
            calls,
            audio,
            dispatcher,
            auto_decline,
            invite: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn show_incoming_call(
        &self,
        from: &str,
        accept: InviteCallback,
        decline: InviteCallback,
        extras: InviteExtras,
    ) -> ShowOutcome {
        let call_id = CallId(extras.call_id.clone().unwrap_or_default());

        let mut slot = self.invite.lock();
        if let Some(current) = slot.as_ref() {
            warn!(from, current = %current.info.from, "invite already outstanding, ignoring new incoming call");
            drop(slot);
            self.busy(from, call_id);
            return ShowOutcome::Busy;
        }

        let Some(calls) = self.calls.upgrade() else {
            return ShowOutcome::Busy;
        };
        if !calls.enter_incoming(from, &call_id) {
            warn!(from, state = %calls.state(), "call in progress, ignoring new incoming call");
            drop(slot);
            self.busy(from, call_id);
            return ShowOutcome::Busy;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = InviteInfo {
            id,
            from: from.to_string(),
            call_id: call_id.clone(),
            contact_name: extras.contact_name,
            contact_avatar: extras.contact_avatar,
            token: extras.token,
            received_at: Utc::now(),
        };

        let weak_calls = self.calls.clone();
        let auto_decline = self.auto_decline;
        let timeout = tokio::spawn(async move {
            sleep(auto_decline).await;
            if let Some(calls) = weak_calls.upgrade() {
                calls.incoming().expire(id).await;
            }
        });

        info!(from, call_id = %call_id, "showing incoming call");
        let contact_name = info.contact_name.clone();
        *slot = Some(ActiveInvite {
            info,
            accept,
            decline,
            timeout: Some(timeout),
        });
        drop(slot);

        best_effort("start_ringtone", self.audio.start_ringtone());
        self.dispatcher.dispatch(PhoneEvent::Call(CallEvent::IncomingCall {
            from: from.to_string(),
            call_id,
            contact_name,
        }));
        ShowOutcome::Shown(id)
    }

    /// Accept the outstanding invite. Returns `false` when there is none.
    pub async fn accept(&self) -> bool {
        let Some(invite) = self.take(None, true) else {
            return false;
        };
        best_effort("stop_ringtone", self.audio.stop_ringtone());

        if let Some(calls) = self.calls.upgrade() {
            calls.accept_incoming();
        }

        if let Err(e) = (invite.accept)().await {
            warn!(error = %e, "accept callback failed");
        }

        self.dispatcher.dispatch(PhoneEvent::Call(CallEvent::IncomingAccepted {
            from: invite.info.from,
            call_id: invite.info.call_id,
        }));
        true
    }

    /// Decline the outstanding invite. Returns `false` when there is none.
    pub async fn decline(&self) -> bool {
        match self.take(None, true) {
            Some(invite) => {
                self.finish_decline(invite).await;
                true
            }
            None => false,
        }
    }

    /// Clear the invite without invoking its callbacks.
    pub fn hide_incoming_call(&self) -> bool {
        match self.take(None, true) {
            Some(_) => {
                best_effort("stop_ringtone", self.audio.stop_ringtone());
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<InviteInfo> {
        self.invite.lock().as_ref().map(|invite| invite.info.clone())
    }

    pub fn has_invite(&self) -> bool {
        self.invite.lock().is_some()
    }

    // Runs inside the auto-decline task, so its own handle must not be aborted.
    async fn expire(&self, id: u64) {
        let Some(invite) = self.take(Some(id), false) else {
            return;
        };
        info!(from = %invite.info.from, "auto-declining unanswered call");
        let missed = CallEvent::Missed {
            from: invite.info.from.clone(),
            call_id: invite.info.call_id.clone(),
        };
        self.finish_decline(invite).await;
        self.dispatcher.dispatch(PhoneEvent::Call(missed));
    }

    /// Decline from a synchronous caller such as hangup. The call returns to
    /// idle at once and the decline callback runs on its own task.
    pub(crate) fn decline_detached(&self) -> bool {
        let Some(invite) = self.take(None, true) else {
            return false;
        };
        info!(from = %invite.info.from, "declining ringing call");
        let decline = self.release(invite);
        tokio::spawn(async move {
            if let Err(e) = decline().await {
                warn!(error = %e, "decline callback failed");
            }
        });
        true
    }

    async fn finish_decline(&self, invite: ActiveInvite) {
        let decline = self.release(invite);
        if let Err(e) = decline().await {
            warn!(error = %e, "decline callback failed");
        }
    }

    // Silence the ringtone and return the call to idle; hands back the decline callback.
    fn release(&self, invite: ActiveInvite) -> InviteCallback {
        best_effort("stop_ringtone", self.audio.stop_ringtone());
        if let Some(calls) = self.calls.upgrade() {
            calls.decline_incoming();
        }
        invite.decline
    }

    fn take(&self, id: Option<u64>, abort_timeout: bool) -> Option<ActiveInvite> {
        let mut slot = self.invite.lock();
        if let Some(id) = id {
            if slot.as_ref().map(|invite| invite.info.id) != Some(id) {
                return None;
            }
        }
        let mut invite = slot.take()?;
        drop(slot);

        if let Some(timeout) = invite.timeout.take() {
            if abort_timeout {
                timeout.abort();
            }
        }
        Some(invite)
    }

    fn busy(&self, from: &str, call_id: CallId) {
        self.dispatcher.dispatch(PhoneEvent::Call(CallEvent::IncomingCallBusy {
            from: from.to_string(),
            call_id,
        }));
    }
}
