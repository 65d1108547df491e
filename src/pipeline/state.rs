//! Encoder job state management

use std::time::Instant;

/// Encoder job state machine
///
/// One instance per role. Transitions are validated so that a stop request
/// arriving while a start is still waiting for readiness cannot race it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No subprocess, nothing pending
    Idle,

    /// Start accepted; waiting for readiness or spawning
    Starting,

    /// Subprocess is alive
    Running {
        /// When the subprocess was spawned
        started_at: Instant,
    },

    /// Stop accepted; waiting for the subprocess to exit
    Stopping,

    /// Subprocess has exited and was reaped
    Stopped,
}

impl JobState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &JobState) -> bool {
        use JobState::*;

        match (self, target) {
            // From Idle
            (Idle, Starting) => true,

            // From Starting
            (Starting, Running { .. }) => true,
            (Starting, Idle) => true, // aborted or failed start

            // From Running
            (Running { .. }, Stopping) => true,
            (Running { .. }, Stopped) => true, // exited on its own

            // From Stopping
            (Stopping, Stopped) => true,

            // From Stopped - a role can be started again
            (Stopped, Starting) => true,

            // Self-transitions
            (a, b) if a == b => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Starting => "starting",
            JobState::Running { .. } => "running",
            JobState::Stopping => "stopping",
            JobState::Stopped => "stopped",
        }
    }

    /// A job in this state blocks a new start for the same role
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Starting | JobState::Running { .. } | JobState::Stopping
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }

    /// Get the duration since the subprocess was spawned (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let JobState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let running = JobState::Running {
            started_at: Instant::now(),
        };

        assert!(JobState::Idle.can_transition_to(&JobState::Starting));
        assert!(JobState::Starting.can_transition_to(&running));
        assert!(JobState::Starting.can_transition_to(&JobState::Idle));
        assert!(running.can_transition_to(&JobState::Stopping));
        assert!(running.can_transition_to(&JobState::Stopped));
        assert!(JobState::Stopping.can_transition_to(&JobState::Stopped));
        assert!(JobState::Stopped.can_transition_to(&JobState::Starting));

        // Self-transitions
        assert!(JobState::Idle.can_transition_to(&JobState::Idle));
        assert!(running.can_transition_to(&running));
    }

    #[test]
    fn test_invalid_transitions() {
        let running = JobState::Running {
            started_at: Instant::now(),
        };

        assert!(!JobState::Idle.can_transition_to(&running)); // must go through Starting
        assert!(!JobState::Idle.can_transition_to(&JobState::Stopping));
        assert!(!JobState::Stopping.can_transition_to(&JobState::Starting));
        assert!(!JobState::Stopped.can_transition_to(&running));
        assert!(!running.can_transition_to(&JobState::Starting));
    }

    #[test]
    fn test_state_checks() {
        let running = JobState::Running {
            started_at: Instant::now(),
        };

        assert!(running.is_active());
        assert!(running.is_running());
        assert!(running.running_duration().is_some());

        assert!(JobState::Starting.is_active());
        assert!(!JobState::Starting.is_running());

        assert!(!JobState::Idle.is_active());
        assert!(!JobState::Stopped.is_active());
        assert!(JobState::Stopped.running_duration().is_none());
    }
}
