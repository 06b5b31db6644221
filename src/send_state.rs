//! The sender's stop-and-wait logic as a pure state machine, decoupled from sockets, files and
//!  clocks. The I/O driver in [crate::sender] executes the returned [SendAction]s and feeds the
//!  outcome back as [SendEvent]s.
//!
//! ```ascii
//!                 ChunkReady                 Sent
//!  AwaitChunk ---------------> Sending ---------------> AwaitAck
//!     |   ^                      ^                         |
//!     |   |   Ack(seq)           | attempts left:          |
//!     |   +----------------------|-------------------------+
//!     |                          +-- Timeout / MalformedAck / Ack(other) / SendFailed
//!     | SourceExhausted                                    |
//!     v                                                    | budget exhausted
//!  Complete                                             Failed
//! ```

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    /// Waiting for the next chunk from the source; `next_seq` is the number it will be sent with
    AwaitChunk { next_seq: u32 },
    /// The chunk with `seq` is being (re-)transmitted, `attempt` is 1-based
    Sending { seq: u32, attempt: u32 },
    AwaitAck { seq: u32, attempt: u32 },
    /// All data was acknowledged, the EOF sentinel goes out as `eof_seq`
    Complete { eof_seq: u32 },
    Failed { seq: u32, attempts: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendEvent {
    ChunkReady,
    SourceExhausted,
    Sent,
    SendFailed,
    AckReceived(u32),
    MalformedAck,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendAction {
    ReadChunk,
    SendPacket { seq: u32, attempt: u32 },
    AwaitAck { seq: u32 },
    /// The chunk with `seq` is acknowledged - progress can be reported
    ChunkAcknowledged { seq: u32 },
    SendEof { seq: u32 },
    Abort { seq: u32, attempts: u32 },
    /// The event does not apply in the current state
    Ignore,
}

impl SendState {
    pub const INITIAL: SendState = SendState::AwaitChunk { next_seq: 0 };

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Complete { .. } | SendState::Failed { .. })
    }
}

/// NB: `ChunkAcknowledged` is followed by an implicit `ReadChunk` - the state is `AwaitChunk`
///  at that point, and the driver reads the next chunk after reporting progress
pub fn transition(state: SendState, event: SendEvent, max_attempts: u32) -> (SendState, SendAction) {
    use SendAction as A;
    use SendEvent as E;
    use SendState as S;

    match (state, event) {
        (S::AwaitChunk { next_seq }, E::ChunkReady) => {
            (S::Sending { seq: next_seq, attempt: 1 }, A::SendPacket { seq: next_seq, attempt: 1 })
        }
        (S::AwaitChunk { next_seq }, E::SourceExhausted) => {
            (S::Complete { eof_seq: next_seq }, A::SendEof { seq: next_seq })
        }

        (S::Sending { seq, attempt }, E::Sent) => {
            (S::AwaitAck { seq, attempt }, A::AwaitAck { seq })
        }
        (S::Sending { seq, attempt }, E::SendFailed) => {
            retry_or_fail(seq, attempt, max_attempts)
        }

        (S::AwaitAck { seq, .. }, E::AckReceived(acked)) if acked == seq => {
            (S::AwaitChunk { next_seq: seq.wrapping_add(1) }, A::ChunkAcknowledged { seq })
        }
        (S::AwaitAck { seq, attempt }, E::AckReceived(_) | E::MalformedAck | E::Timeout) => {
            retry_or_fail(seq, attempt, max_attempts)
        }

        (state, _) => (state, A::Ignore),
    }
}

fn retry_or_fail(seq: u32, attempt: u32, max_attempts: u32) -> (SendState, SendAction) {
    if attempt < max_attempts {
        (SendState::Sending { seq, attempt: attempt + 1 }, SendAction::SendPacket { seq, attempt: attempt + 1 })
    }
    else {
        (SendState::Failed { seq, attempts: attempt }, SendAction::Abort { seq, attempts: attempt })
    }
}
