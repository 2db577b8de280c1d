//! Install affordance: captures the platform's deferred install prompt and
//! tracks where the user is in the install flow.

use futures::future::BoxFuture;
use thiserror::Error;

/// The user's answer to an install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallChoice {
    Accepted,
    Dismissed,
}

/// A captured platform install prompt.
///
/// Usable once: `await_choice` consumes it.
pub trait DeferredPrompt: Send {
    /// Show the prompt to the user.
    fn trigger(&mut self) -> Result<(), InstallError>;

    /// Resolve once the user has answered.
    fn await_choice(self: Box<Self>) -> BoxFuture<'static, InstallChoice>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Nothing captured yet
    Idle,
    PromptCaptured,
    Accepted,
    Dismissed,
    Installed,
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("No install prompt available")]
    NoPrompt,

    #[error("Failed to show install prompt: {0}")]
    Trigger(String),
}

pub struct InstallFlow {
    state: InstallState,
    prompt: Option<Box<dyn DeferredPrompt>>,
}

impl InstallFlow {
    /// `standalone` is the display-mode query: true when already running installed.
    pub fn new(standalone: bool) -> Self {
        Self {
            state: if standalone {
                InstallState::Installed
            } else {
                InstallState::Idle
            },
            prompt: None,
        }
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Whether an install button should be offered.
    pub fn can_prompt(&self) -> bool {
        self.state == InstallState::PromptCaptured && self.prompt.is_some()
    }

    /// Handle the platform's before-install event.
    ///
    /// Returns `false` if the app is already installed and the prompt was dropped.
    pub fn prompt_captured(&mut self, prompt: Box<dyn DeferredPrompt>) -> bool {
        if self.state == InstallState::Installed {
            tracing::debug!("Ignoring install prompt: already installed");
            return false;
        }
        self.prompt = Some(prompt);
        self.state = InstallState::PromptCaptured;
        tracing::info!("Install prompt captured");
        true
    }

    /// Show the captured prompt and wait for the user's answer.
    pub async fn install(&mut self) -> Result<InstallChoice, InstallError> {
        let mut prompt = self.prompt.take().ok_or(InstallError::NoPrompt)?;

        if let Err(e) = prompt.trigger() {
            // Still usable: leave it for another attempt
            self.prompt = Some(prompt);
            return Err(e);
        }

        let choice = prompt.await_choice().await;
        self.state = match choice {
            InstallChoice::Accepted => InstallState::Accepted,
            InstallChoice::Dismissed => InstallState::Dismissed,
        };
        tracing::info!("Install prompt answered: {:?}", choice);
        Ok(choice)
    }

    /// Handle the platform's app-installed event.
    pub fn app_installed(&mut self) {
        self.prompt = None;
        if self.state != InstallState::Installed {
            self.state = InstallState::Installed;
            tracing::info!("App installed");
        }
    }
}

impl std::fmt::Debug for InstallFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallFlow")
            .field("state", &self.state)
            .field("has_prompt", &self.prompt.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakePrompt {
        choice: InstallChoice,
        fail_trigger: bool,
        triggered: Arc<AtomicUsize>,
    }

    impl FakePrompt {
        fn boxed(choice: InstallChoice) -> (Box<dyn DeferredPrompt>, Arc<AtomicUsize>) {
            let triggered = Arc::new(AtomicUsize::new(0));
            let prompt = Box::new(Self {
                choice,
                fail_trigger: false,
                triggered: Arc::clone(&triggered),
            });
            (prompt, triggered)
        }
    }

    impl DeferredPrompt for FakePrompt {
        fn trigger(&mut self) -> Result<(), InstallError> {
            if self.fail_trigger {
                self.fail_trigger = false;
                return Err(InstallError::Trigger("not allowed without user gesture".into()));
            }
            self.triggered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn await_choice(self: Box<Self>) -> BoxFuture<'static, InstallChoice> {
            let choice = self.choice;
            Box::pin(async move { choice })
        }
    }

    #[test]
    fn test_standalone_starts_installed() {
        let mut flow = InstallFlow::new(true);
        assert_eq!(flow.state(), InstallState::Installed);

        let (prompt, _) = FakePrompt::boxed(InstallChoice::Accepted);
        assert!(!flow.prompt_captured(prompt));
        assert!(!flow.can_prompt());
    }

    #[tokio::test]
    async fn test_accept_flow() {
        let mut flow = InstallFlow::new(false);
        assert_eq!(flow.state(), InstallState::Idle);

        let (prompt, triggered) = FakePrompt::boxed(InstallChoice::Accepted);
        assert!(flow.prompt_captured(prompt));
        assert!(flow.can_prompt());

        assert_eq!(flow.install().await.unwrap(), InstallChoice::Accepted);
        assert_eq!(flow.state(), InstallState::Accepted);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);

        flow.app_installed();
        assert_eq!(flow.state(), InstallState::Installed);
    }

    #[tokio::test]
    async fn test_prompt_is_used_once() {
        let mut flow = InstallFlow::new(false);
        let (prompt, _) = FakePrompt::boxed(InstallChoice::Dismissed);
        flow.prompt_captured(prompt);

        assert_eq!(flow.install().await.unwrap(), InstallChoice::Dismissed);
        assert_eq!(flow.state(), InstallState::Dismissed);
        assert!(!flow.can_prompt());
        assert!(matches!(flow.install().await, Err(InstallError::NoPrompt)));

        // The platform may offer a fresh prompt later
        let (prompt, _) = FakePrompt::boxed(InstallChoice::Accepted);
        assert!(flow.prompt_captured(prompt));
        assert_eq!(flow.state(), InstallState::PromptCaptured);
    }

    #[tokio::test]
    async fn test_failed_trigger_keeps_prompt() {
        let mut flow = InstallFlow::new(false);
        let triggered = Arc::new(AtomicUsize::new(0));
        flow.prompt_captured(Box::new(FakePrompt {
            choice: InstallChoice::Accepted,
            fail_trigger: true,
            triggered: Arc::clone(&triggered),
        }));

        assert!(matches!(flow.install().await, Err(InstallError::Trigger(_))));
        assert!(flow.can_prompt());

        assert_eq!(flow.install().await.unwrap(), InstallChoice::Accepted);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_app_installed_drops_prompt() {
        let mut flow = InstallFlow::new(false);
        let (prompt, _) = FakePrompt::boxed(InstallChoice::Accepted);
        flow.prompt_captured(prompt);

        flow.app_installed();
        assert_eq!(flow.state(), InstallState::Installed);
        assert!(!flow.can_prompt());
    }
}
