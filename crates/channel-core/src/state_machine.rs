use crate::{error::ChannelError, types::ChannelLifecycleState};

/// Channel lifecycle: `Cold → Connecting → Active | Errored`, any → `Disposed`.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateMachine {
    state: ChannelLifecycleState,
}

impl ChannelStateMachine {
    pub fn state(&self) -> ChannelLifecycleState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == ChannelLifecycleState::Disposed
    }

    pub fn is_active(&self) -> bool {
        self.state == ChannelLifecycleState::Active
    }

    /// Start the initial watch. Retrying after a failed watch is allowed.
    pub fn begin_connect(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from_any_of(
            &[ChannelLifecycleState::Cold, ChannelLifecycleState::Errored],
            ChannelLifecycleState::Connecting,
            "initialize",
        )
    }

    pub fn on_connected(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from_any_of(
            &[ChannelLifecycleState::Connecting],
            ChannelLifecycleState::Active,
            "on_connected",
        )
    }

    pub fn on_connect_failed(&mut self) -> Result<ChannelLifecycleState, ChannelError> {
        self.transition_from_any_of(
            &[ChannelLifecycleState::Connecting],
            ChannelLifecycleState::Errored,
            "on_connect_failed",
        )
    }

    /// Enter `Disposed`. Returns `false` when already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.state = ChannelLifecycleState::Disposed;
        true
    }

    /// Guard for operations that need a loaded channel.
    pub fn ensure_active(&self, action: &str) -> Result<(), ChannelError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ChannelError::invalid_state(self.state, action))
        }
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ChannelLifecycleState],
        next: ChannelLifecycleState,
        action: &str,
    ) -> Result<ChannelLifecycleState, ChannelError> {
        if !expected.contains(&self.state) {
            return Err(ChannelError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}
