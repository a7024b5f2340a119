//! Pipeline-wide state machine.

/// `Idle → Running → {Completed, TimedOut, Aborted} → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Aborted,
    Terminated,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::TimedOut => "timed_out",
            PipelineState::Aborted => "aborted",
            PipelineState::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Aborted)
                | (Completed, Terminated)
                | (TimedOut, Terminated)
                | (Aborted, Terminated)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
