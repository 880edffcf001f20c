//! Client-local notification core.
//!
//! None of this runs on the server: the embedding client links the crate
//! and wires the two traits to its platform (the browser Notification API,
//! a desktop shell, ...). The decision of *whether* to notify is kept apart
//! from the mechanism of showing one, so the decision stays testable
//! without any UI runtime.

use crate::directory::Profile;
use crate::messages::MessageRecord;

/// Platform notification permission, mirroring the browser model.
/// `Default` means the user has not decided yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Default,
    Granted,
    Denied,
}

/// Platform hook that shows the permission prompt and reports the outcome.
pub trait PermissionPrompt {
    fn request_permission(&mut self) -> PermissionState;
}

/// Platform hook that actually displays a notification.
pub trait NotificationRenderer {
    fn render(&mut self, notification: &Notification);
}

/// What gets shown: the partner's name as the title, the message text as
/// the body, the partner's avatar as the icon when there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon_url: Option<String>,
}

/// Should this message raise a notification for this viewer?
/// Pure: only inbound messages qualify — never the viewer's own echoes.
pub fn should_notify(viewer_id: &str, message: &MessageRecord) -> bool {
    message.sender_id != viewer_id
}

/// Permission gate: prompts the platform at most once per application
/// load, and only while the user is still undecided. A denial is terminal
/// for the load — we never nag.
pub struct PermissionGate<P> {
    state: PermissionState,
    prompted: bool,
    prompt: P,
}

impl<P: PermissionPrompt> PermissionGate<P> {
    pub fn new(initial: PermissionState, prompt: P) -> Self {
        Self {
            state: initial,
            prompted: false,
            prompt,
        }
    }

    /// Current permission without prompting.
    pub fn state(&self) -> PermissionState {
        self.state
    }

    /// Prompt if (and only if) the user has not decided yet and we have
    /// not asked before in this load. Returns the resulting state.
    pub fn request(&mut self) -> PermissionState {
        if self.state == PermissionState::Default && !self.prompted {
            self.prompted = true;
            self.state = self.prompt.request_permission();
        }
        self.state
    }
}

/// Ties the pure decision and the permission gate to a platform renderer.
pub struct NotificationDispatcher<P, R> {
    gate: PermissionGate<P>,
    renderer: R,
}

impl<P: PermissionPrompt, R: NotificationRenderer> NotificationDispatcher<P, R> {
    pub fn new(initial: PermissionState, prompt: P, renderer: R) -> Self {
        Self {
            gate: PermissionGate::new(initial, prompt),
            renderer,
        }
    }

    /// Ask the platform for permission if the user is still undecided.
    /// Clients call this once at application load, not per message.
    pub fn request_permission(&mut self) -> PermissionState {
        self.gate.request()
    }

    /// Hand an inbound message to the renderer if the decision and the
    /// permission both allow it. Never prompts. Returns whether a
    /// notification was rendered.
    pub fn dispatch(
        &mut self,
        viewer_id: &str,
        message: &MessageRecord,
        partner: &Profile,
    ) -> bool {
        if !should_notify(viewer_id, message) {
            return false;
        }
        if self.gate.state() != PermissionState::Granted {
            return false;
        }

        let notification = Notification {
            title: partner.display_name.clone(),
            body: message.body.clone(),
            icon_url: partner.avatar_url.clone(),
        };
        self.renderer.render(&notification);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticPrompt {
        answer: PermissionState,
        calls: usize,
    }

    impl StaticPrompt {
        fn new(answer: PermissionState) -> Self {
            Self { answer, calls: 0 }
        }
    }

    impl PermissionPrompt for StaticPrompt {
        fn request_permission(&mut self) -> PermissionState {
            self.calls += 1;
            self.answer
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        rendered: Vec<Notification>,
    }

    impl NotificationRenderer for RecordingRenderer {
        fn render(&mut self, notification: &Notification) {
            self.rendered.push(notification.clone());
        }
    }

    fn inbound_message(sender: &str, recipient: &str, body: &str) -> MessageRecord {
        MessageRecord {
            id: "m-1".to_string(),
            room_id: "conversation_a_b".to_string(),
            seq: 1,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            body: body.to_string(),
            created_at_ms: 1,
            is_read: false,
        }
    }

    fn partner_profile() -> Profile {
        Profile {
            user_id: "partner-1".to_string(),
            display_name: "Riverside Catering".to_string(),
            avatar_url: Some("https://cdn.example/p1.png".to_string()),
        }
    }

    #[test]
    fn test_should_notify_only_for_inbound() {
        let inbound = inbound_message("partner-1", "customer-1", "hello");
        assert!(should_notify("customer-1", &inbound));
        // The viewer's own message echoed to another tab must stay silent.
        assert!(!should_notify("partner-1", &inbound));
    }

    #[test]
    fn test_dispatch_renders_partner_and_body() {
        let mut dispatcher = NotificationDispatcher::new(
            PermissionState::Granted,
            StaticPrompt::new(PermissionState::Granted),
            RecordingRenderer::default(),
        );

        let message = inbound_message("partner-1", "customer-1", "quote ready");
        assert!(dispatcher.dispatch("customer-1", &message, &partner_profile()));

        let rendered = &dispatcher.renderer.rendered;
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].title, "Riverside Catering");
        assert_eq!(rendered[0].body, "quote ready");
        assert_eq!(
            rendered[0].icon_url.as_deref(),
            Some("https://cdn.example/p1.png")
        );
    }

    #[test]
    fn test_dispatch_noop_without_grant() {
        for initial in [PermissionState::Default, PermissionState::Denied] {
            let mut dispatcher = NotificationDispatcher::new(
                initial,
                StaticPrompt::new(PermissionState::Granted),
                RecordingRenderer::default(),
            );

            let message = inbound_message("partner-1", "customer-1", "hello");
            assert!(!dispatcher.dispatch("customer-1", &message, &partner_profile()));
            assert!(dispatcher.renderer.rendered.is_empty());
        }
    }

    #[test]
    fn test_own_message_never_rendered() {
        let mut dispatcher = NotificationDispatcher::new(
            PermissionState::Granted,
            StaticPrompt::new(PermissionState::Granted),
            RecordingRenderer::default(),
        );

        let message = inbound_message("customer-1", "partner-1", "hello");
        assert!(!dispatcher.dispatch("customer-1", &message, &partner_profile()));
        assert!(dispatcher.renderer.rendered.is_empty());
    }

    #[test]
    fn test_prompt_at_most_once_per_load() {
        // The prompt leaves the user undecided (dismissed); a second
        // request must not re-prompt within the same load.
        let mut gate = PermissionGate::new(
            PermissionState::Default,
            StaticPrompt::new(PermissionState::Default),
        );

        assert_eq!(gate.request(), PermissionState::Default);
        assert_eq!(gate.request(), PermissionState::Default);
        assert_eq!(gate.prompt.calls, 1);
    }

    #[test]
    fn test_denied_never_prompts() {
        let mut gate = PermissionGate::new(
            PermissionState::Denied,
            StaticPrompt::new(PermissionState::Granted),
        );

        assert_eq!(gate.request(), PermissionState::Denied);
        assert_eq!(gate.prompt.calls, 0);
    }

    #[test]
    fn test_grant_flow_enables_dispatch() {
        let mut dispatcher = NotificationDispatcher::new(
            PermissionState::Default,
            StaticPrompt::new(PermissionState::Granted),
            RecordingRenderer::default(),
        );

        assert_eq!(dispatcher.request_permission(), PermissionState::Granted);

        let message = inbound_message("partner-1", "customer-1", "hello");
        assert!(dispatcher.dispatch("customer-1", &message, &partner_profile()));
        assert_eq!(dispatcher.renderer.rendered.len(), 1);
    }
}
